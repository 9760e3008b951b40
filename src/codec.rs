//! # XDR Record Codec
//!
//! Low-level reading and writing of the XDR record layout: newline-terminated
//! ASCII header lines in a fixed order, followed by raw big-endian arrays with
//! no padding. Arrays use 4- or 8-byte words.
//!
//! Header lines are matched literally. The only tolerated variation is the
//! optional four-line grid description that may precede the binary-section
//! sentinel of a regridded file (see [`HeaderReader::read_sentinel`]).
//!
//! Byte swapping is done over disjoint slots with `rayon`, so large arrays
//! decode in parallel without shared state.

use rayon::prelude::*;
use std::io::{BufRead, Read, Write};

use crate::error::{truncated, XdrError, XdrResult};

/// Number of bytes per array element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordSize {
    Four,
    Eight,
}

impl WordSize {
    pub fn bytes(self) -> usize {
        match self {
            WordSize::Four => 4,
            WordSize::Eight => 8,
        }
    }

    pub fn bits(self) -> usize {
        self.bytes() * 8
    }
}

/// Line-oriented reader for the ASCII header of an XDR record.
pub struct HeaderReader<R: BufRead> {
    reader: R,
    line_number: usize,
}

impl<R: BufRead> HeaderReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, line_number: 0 }
    }

    /// Reads one header line without its terminating newline.
    pub fn read_line(&mut self) -> XdrResult<String> {
        let mut line = String::new();
        let bytes = self.reader.read_line(&mut line)?;
        self.line_number += 1;
        if bytes == 0 {
            return Err(XdrError::format(format!(
                "unexpected end of header at line {}",
                self.line_number
            )));
        }
        if !line.ends_with('\n') {
            return Err(XdrError::format(format!(
                "unterminated header line {}: '{}'",
                self.line_number, line
            )));
        }
        line.pop();
        Ok(line)
    }

    /// Reads a line that must equal `literal` exactly.
    pub fn expect_literal(&mut self, literal: &str) -> XdrResult<()> {
        let line = self.read_line()?;
        if line != literal {
            return Err(XdrError::format(format!(
                "header line {}: expected '{}', found '{}'",
                self.line_number, literal, line
            )));
        }
        Ok(())
    }

    /// Reads a line that must equal one of `literals`, returning its index.
    pub fn expect_one_of(&mut self, literals: &[&str]) -> XdrResult<usize> {
        let line = self.read_line()?;
        literals.iter().position(|l| *l == line).ok_or_else(|| {
            XdrError::format(format!(
                "header line {}: expected one of {:?}, found '{}'",
                self.line_number, literals, line
            ))
        })
    }

    /// Reads a line of whitespace-separated words, requiring exactly `count`.
    pub fn read_words(&mut self, count: usize) -> XdrResult<Vec<String>> {
        let line = self.read_line()?;
        let words: Vec<String> = line.split_whitespace().map(str::to_string).collect();
        if words.len() != count {
            return Err(XdrError::format(format!(
                "header line {}: expected {} words, found {}",
                self.line_number,
                count,
                words.len()
            )));
        }
        Ok(words)
    }

    pub fn read_integers(&mut self, count: usize) -> XdrResult<Vec<i64>> {
        let line_number = self.line_number + 1;
        self.read_words(count)?
            .iter()
            .map(|w| {
                w.parse::<i64>().map_err(|_| {
                    XdrError::format(format!("header line {}: invalid integer '{}'", line_number, w))
                })
            })
            .collect()
    }

    pub fn read_reals(&mut self, count: usize) -> XdrResult<Vec<f64>> {
        let line_number = self.line_number + 1;
        self.read_words(count)?
            .iter()
            .map(|w| {
                w.parse::<f64>().map_err(|_| {
                    XdrError::format(format!("header line {}: invalid real '{}'", line_number, w))
                })
            })
            .collect()
    }

    /// Reads the binary-section sentinel line.
    ///
    /// If the next line is not one of `sentinels`, it and the following three
    /// lines form the optional grid description, after which a sentinel must
    /// appear. Returns the matched sentinel index and the skipped lines.
    pub fn read_sentinel(&mut self, sentinels: &[&str]) -> XdrResult<(usize, Option<Vec<String>>)> {
        let first = self.read_line()?;
        if let Some(index) = sentinels.iter().position(|s| *s == first) {
            return Ok((index, None));
        }
        let mut block = vec![first];
        for _ in 0..3 {
            block.push(self.read_line()?);
        }
        let index = self.expect_one_of(sentinels)?;
        Ok((index, Some(block)))
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

fn read_bytes<R: Read>(reader: &mut R, count: usize, word: WordSize, what: &str) -> XdrResult<Vec<u8>> {
    let length = count
        .checked_mul(word.bytes())
        .ok_or_else(|| XdrError::format(format!("{}: array of {} words is too large", what, count)))?;
    // grows with the bytes actually present, never with the declared length
    let mut bytes = Vec::new();
    reader
        .take(length as u64)
        .read_to_end(&mut bytes)
        .map_err(|e| truncated(what, e))?;
    if bytes.len() < length {
        return Err(XdrError::format(format!(
            "{}: truncated stream ({} of {} bytes)",
            what,
            bytes.len(),
            length
        )));
    }
    Ok(bytes)
}

/// Reads `count` big-endian IEEE-754 reals.
pub fn read_reals<R: Read>(reader: &mut R, count: usize, word: WordSize) -> XdrResult<Vec<f64>> {
    let bytes = read_bytes(reader, count, word, "reading reals")?;
    let values: Vec<f64> = match word {
        WordSize::Four => bytes
            .par_chunks_exact(4)
            .map(|c| f32::from_be_bytes([c[0], c[1], c[2], c[3]]) as f64)
            .collect(),
        WordSize::Eight => bytes
            .par_chunks_exact(8)
            .map(|c| f64::from_be_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
            .collect(),
    };
    Ok(values)
}

/// Reads `count` big-endian two's-complement integers.
pub fn read_integers<R: Read>(reader: &mut R, count: usize, word: WordSize) -> XdrResult<Vec<i64>> {
    let bytes = read_bytes(reader, count, word, "reading integers")?;
    let values: Vec<i64> = match word {
        WordSize::Four => bytes
            .par_chunks_exact(4)
            .map(|c| i32::from_be_bytes([c[0], c[1], c[2], c[3]]) as i64)
            .collect(),
        WordSize::Eight => bytes
            .par_chunks_exact(8)
            .map(|c| i64::from_be_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
            .collect(),
    };
    Ok(values)
}

/// Writes reals as big-endian IEEE-754 words.
pub fn write_reals<W: Write>(writer: &mut W, values: &[f64], word: WordSize) -> XdrResult<()> {
    let mut bytes = vec![0u8; values.len() * word.bytes()];
    match word {
        WordSize::Four => bytes
            .par_chunks_exact_mut(4)
            .zip(values.par_iter())
            .for_each(|(slot, v)| slot.copy_from_slice(&(*v as f32).to_be_bytes())),
        WordSize::Eight => bytes
            .par_chunks_exact_mut(8)
            .zip(values.par_iter())
            .for_each(|(slot, v)| slot.copy_from_slice(&v.to_be_bytes())),
    }
    writer.write_all(&bytes).map_err(|e| truncated("writing reals", e))
}

/// Writes integers as big-endian words. 32-bit output rejects values that do not fit.
pub fn write_integers<W: Write>(writer: &mut W, values: &[i64], word: WordSize) -> XdrResult<()> {
    let mut bytes = vec![0u8; values.len() * word.bytes()];
    match word {
        WordSize::Four => {
            if let Some(v) = values.iter().find(|v| i32::try_from(**v).is_err()) {
                return Err(XdrError::range(format!("integer {} does not fit in 32 bits", v)));
            }
            bytes
                .par_chunks_exact_mut(4)
                .zip(values.par_iter())
                .for_each(|(slot, v)| slot.copy_from_slice(&(*v as i32).to_be_bytes()))
        }
        WordSize::Eight => bytes
            .par_chunks_exact_mut(8)
            .zip(values.par_iter())
            .for_each(|(slot, v)| slot.copy_from_slice(&v.to_be_bytes())),
    }
    writer.write_all(&bytes).map_err(|e| truncated("writing integers", e))
}

/// Fails unless the reader is exhausted, so trailing garbage is not silently accepted.
pub fn expect_end<R: Read>(reader: &mut R) -> XdrResult<()> {
    let mut probe = [0u8; 1];
    match reader.read(&mut probe)? {
        0 => Ok(()),
        _ => Err(XdrError::format("unexpected bytes after the last array")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_reals_are_big_endian() {
        let mut buffer = Vec::new();
        write_reals(&mut buffer, &[1.0], WordSize::Eight).unwrap();
        assert_eq!(buffer, vec![0x3f, 0xf0, 0, 0, 0, 0, 0, 0]);

        buffer.clear();
        write_reals(&mut buffer, &[1.0], WordSize::Four).unwrap();
        assert_eq!(buffer, vec![0x3f, 0x80, 0, 0]);
    }

    #[test]
    fn test_special_values_keep_bit_patterns() {
        let values = [f64::INFINITY, f64::NEG_INFINITY, f64::from_bits(0x7ff8_0000_0000_0123), -0.0];
        let mut buffer = Vec::new();
        write_reals(&mut buffer, &values, WordSize::Eight).unwrap();
        let read = read_reals(&mut Cursor::new(buffer), values.len(), WordSize::Eight).unwrap();
        let bits: Vec<u64> = read.iter().map(|v| v.to_bits()).collect();
        let expected: Vec<u64> = values.iter().map(|v| v.to_bits()).collect();
        assert_eq!(bits, expected);
    }

    #[test]
    fn test_integers_32_bit_range() {
        let mut buffer = Vec::new();
        write_integers(&mut buffer, &[-2, 70_000], WordSize::Four).unwrap();
        assert_eq!(&buffer[..4], &[0xff, 0xff, 0xff, 0xfe]);
        let read = read_integers(&mut Cursor::new(buffer), 2, WordSize::Four).unwrap();
        assert_eq!(read, vec![-2, 70_000]);

        let mut buffer = Vec::new();
        assert!(write_integers(&mut buffer, &[i64::MAX], WordSize::Four).is_err());
    }

    #[test]
    fn test_short_read_is_format_error() {
        let result = read_reals(&mut Cursor::new(vec![0u8; 12]), 2, WordSize::Eight);
        assert!(matches!(result, Err(XdrError::Format(_))));
    }

    #[test]
    fn test_header_literal_mismatch() {
        let mut reader = HeaderReader::new(Cursor::new("# Variable names:\n# Variable unit:\n"));
        assert!(reader.expect_literal("# Variable names:").is_ok());
        assert!(matches!(reader.expect_literal("# Variable units:"), Err(XdrError::Format(_))));
    }

    #[test]
    fn test_unterminated_line_rejected() {
        let mut reader = HeaderReader::new(Cursor::new("Swath 2.0"));
        assert!(reader.read_line().is_err());
    }

    #[test]
    fn test_sentinel_with_and_without_grid_block() {
        let sentinel = "# MSB 32-bit integers points[timesteps] and";
        let plain = format!("{}\n", sentinel);
        let mut reader = HeaderReader::new(Cursor::new(plain));
        assert_eq!(reader.read_sentinel(&[sentinel]).unwrap(), (0, None));

        let with_block = format!("# a\n1 2\n# b\n3 4\n{}\n", sentinel);
        let mut reader = HeaderReader::new(Cursor::new(with_block));
        let (_, block) = reader.read_sentinel(&[sentinel]).unwrap();
        assert_eq!(block.unwrap(), vec!["# a", "1 2", "# b", "3 4"]);

        let malformed = format!("# a\n1 2\n# b\n{}\n", sentinel);
        let mut reader = HeaderReader::new(Cursor::new(malformed));
        assert!(reader.read_sentinel(&[sentinel]).is_err());
    }
}
