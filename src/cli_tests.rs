//! # CLI Integration Tests
//!
//! Argument parsing, command-line overrides of configuration files and
//! error handling of the command-line interface.

#[cfg(test)]
mod tests {
    use clap::Parser;
    use std::path::PathBuf;

    use crate::aggregate::AggregationSpan;
    use crate::cli::{Cli, Commands, ConfigFormat, ReportFormat, TemplateType, convert_job, template_config};
    use crate::grid::RegridMethod;
    use crate::input::{FilterConfig, JobConfig};
    use crate::output::OutputFormat;

    fn convert(args: &[&str]) -> Commands {
        let mut full = vec!["xdrconvert", "convert"];
        full.extend_from_slice(args);
        Cli::parse_from(&full).command
    }

    /// Test basic CLI argument parsing
    #[test]
    fn test_cli_help() {
        let result = Cli::try_parse_from(["xdrconvert", "--help"]);
        assert!(result.is_err()); // --help causes early exit with "error"

        let error = result.unwrap_err();
        assert!(error.to_string().contains("Convert XDR observation files"));
    }

    /// Test version argument
    #[test]
    fn test_cli_version() {
        let result = Cli::try_parse_from(["xdrconvert", "--version"]);
        assert!(result.is_err());
    }

    /// Test global flags
    #[test]
    fn test_cli_global_flags() {
        let cli = Cli::parse_from([
            "xdrconvert",
            "--verbose",
            "--output-format",
            "json",
            "--config",
            "/path/to/job.json",
            "template",
            "basic",
        ]);

        assert!(cli.verbose);
        assert_eq!(cli.output_format, ReportFormat::Json);
        assert_eq!(cli.config, Some(PathBuf::from("/path/to/job.json")));
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        let result = Cli::try_parse_from(["xdrconvert", "-v", "-q", "template", "basic"]);
        assert!(result.is_err());
    }

    /// Test convert command argument parsing
    #[test]
    fn test_convert_command_basic() {
        if let Commands::Convert {
            input,
            output,
            format,
            ..
        } = convert(&["modis.xdr", "modis.txt", "-f", "ascii"])
        {
            assert_eq!(input, Some("modis.xdr".to_string()));
            assert_eq!(output, Some("modis.txt".to_string()));
            assert_eq!(format, Some(OutputFormat::Ascii));
        } else {
            panic!("Expected Convert command");
        }
    }

    /// Test convert command with filters
    #[test]
    fn test_convert_command_with_filters() {
        let command = convert(&[
            "sites.xdr",
            "sites.txt",
            "--bounds",
            "-90,25,-70,45",
            "--time-range",
            "20052380000:20052382359",
            "--range",
            "ozone:0:200",
            "--range",
            "pm25:-5:500",
            "--list",
            "id:10010,10020",
            "--force",
            "--dry-run",
        ]);
        if let Commands::Convert {
            bounds_filters,
            time_filters,
            range_filters,
            list_filters,
            force,
            dry_run,
            ..
        } = command
        {
            assert_eq!(bounds_filters.len(), 1);
            assert_eq!(bounds_filters[0].min_longitude, -90.0);
            assert_eq!(time_filters[0].last, 2005_238_2359);
            assert_eq!(range_filters.len(), 2);
            assert_eq!(range_filters[1].min_value, -5.0);
            assert_eq!(list_filters[0].values, vec![10010.0, 10020.0]);
            assert!(force);
            assert!(dry_run);
        } else {
            panic!("Expected Convert command");
        }
    }

    #[test]
    fn test_convert_command_with_regrid_options() {
        let command = convert(&[
            "modis.xdr",
            "daily.xdr",
            "--grid",
            "70,30,-130,20,1,1",
            "--method",
            "nearest",
            "--aggregate",
            "daily",
            "--utc-offset",
            "-5",
            "--minimum-valid-value",
            "-1",
        ]);
        if let Commands::Convert {
            grid,
            method,
            aggregate,
            utc_offset,
            minimum_valid_value,
            ..
        } = command
        {
            let grid = grid.unwrap();
            assert_eq!((grid.columns, grid.rows), (70, 30));
            assert_eq!(grid.west, -130.0);
            assert_eq!(method, Some(RegridMethod::Nearest));
            assert_eq!(aggregate, Some(AggregationSpan::Daily));
            assert_eq!(utc_offset, Some(-5));
            assert_eq!(minimum_valid_value, Some(-1.0));
        } else {
            panic!("Expected Convert command");
        }
    }

    #[test]
    fn test_invalid_filter_arguments() {
        assert!(Cli::try_parse_from(["xdrconvert", "convert", "a.xdr", "b.xdr", "--range", "ozone:10"]).is_err());
        assert!(Cli::try_parse_from(["xdrconvert", "convert", "a.xdr", "b.xdr", "--bounds", "1,2,3"]).is_err());
        assert!(Cli::try_parse_from(["xdrconvert", "convert", "a.xdr", "b.xdr", "--grid", "0,1,0,0,1,1"]).is_err());
        assert!(Cli::try_parse_from(["xdrconvert", "convert", "a.xdr", "b.xdr", "-f", "grib"]).is_err());
    }

    #[test]
    fn test_convert_job_from_arguments() {
        let command = convert(&[
            "modis.xdr",
            "modis.ncf",
            "-f",
            "ioapi",
            "--grid",
            "10,5,-100,30,1,1",
            "-n",
            "aod",
            "--reference",
            "cmaq.ncf",
            "--reference-variable",
            "AOD",
            "--compare-function",
            "ratio",
        ]);
        let job = convert_job(None, command).unwrap();
        assert_eq!(job.input, "modis.xdr");
        assert_eq!(job.format, OutputFormat::Ioapi);
        let regrid = job.regrid.as_ref().unwrap();
        assert_eq!(regrid.grid.columns, 10);
        assert_eq!(regrid.variable.as_deref(), Some("aod"));
        let compare = job.compare.as_ref().unwrap();
        assert_eq!(compare.variable, "AOD");
        assert_eq!(compare.function, "ratio");
        assert!(job.validate().is_ok());
    }

    #[test]
    fn test_convert_job_overrides_config() {
        let base = JobConfig::from_json(
            r#"{"input": "base.xdr", "output": "base.txt", "format": "ascii",
                "filters": [{"kind": "range", "params": {"variable": "ozone", "min_value": 0.0, "max_value": 100.0}}],
                "regrid": {"grid": {"columns": 4, "rows": 4, "west": 0.0, "south": 0.0,
                                    "cell_width": 1.0, "cell_height": 1.0}}}"#,
        )
        .unwrap();
        let command = convert(&["--list", "id:1,2", "--aggregate", "all"]);
        let job = convert_job(Some(base), command).unwrap();
        assert_eq!(job.input, "base.xdr");
        assert_eq!(job.format, OutputFormat::Ascii);
        assert!(matches!(job.filters[0], FilterConfig::Range { .. }));
        assert!(matches!(job.filters.last(), Some(FilterConfig::List { .. })));
        assert_eq!(job.regrid.unwrap().aggregate, Some(AggregationSpan::All));
    }

    #[test]
    fn test_convert_job_rejects_incomplete_arguments() {
        assert!(convert_job(None, convert(&["only_input.xdr"])).is_err());
        assert!(convert_job(None, convert(&["a.xdr", "b.xdr", "--method", "mean"])).is_err());
        assert!(convert_job(None, convert(&["a.xdr", "b.xdr", "--reference", "cmaq.ncf"])).is_err());
    }

    /// Test validate command
    #[test]
    fn test_validate_command() {
        let cli = Cli::parse_from(["xdrconvert", "validate", "job.yaml", "--detailed"]);
        if let Commands::Validate { config_file, detailed } = cli.command {
            assert_eq!(config_file, Some(PathBuf::from("job.yaml")));
            assert!(detailed);
        } else {
            panic!("Expected Validate command");
        }
    }

    /// Test info command
    #[test]
    fn test_info_command() {
        let cli = Cli::parse_from(["xdrconvert", "info", "modis.xdr", "--detailed", "-n", "aod", "--format", "csv"]);
        if let Commands::Info {
            file,
            detailed,
            variable,
            format,
        } = cli.command
        {
            assert_eq!(file, "modis.xdr");
            assert!(detailed);
            assert_eq!(variable, Some("aod".to_string()));
            assert_eq!(format, Some(ReportFormat::Csv));
        } else {
            panic!("Expected Info command");
        }
    }

    /// Test template command
    #[test]
    fn test_template_command() {
        let cli = Cli::parse_from(["xdrconvert", "template", "daily", "--format", "yaml", "-o", "daily.yaml"]);
        if let Commands::Template {
            template_type,
            output,
            format,
        } = cli.command
        {
            assert_eq!(template_type, TemplateType::Daily);
            assert_eq!(output, Some(PathBuf::from("daily.yaml")));
            assert_eq!(format, ConfigFormat::Yaml);
            let config = template_config(&template_type);
            assert_eq!(config.regrid.unwrap().aggregate, Some(AggregationSpan::Daily));
        } else {
            panic!("Expected Template command");
        }
    }

    /// Test completions command
    #[test]
    fn test_completions_command() {
        let cli = Cli::parse_from(["xdrconvert", "completions", "zsh"]);
        assert!(matches!(cli.command, Commands::Completions { output: None, .. }));
        assert!(Cli::try_parse_from(["xdrconvert", "completions", "cmd"]).is_err());
    }
}
