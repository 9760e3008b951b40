use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error};
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::process;
use std::time::{Duration, Instant};
use xdrconvert::XdrError;
use xdrconvert::cli::{Cli, Commands, ConfigFormat, ReportFormat, convert_job, template_config};
use xdrconvert::info::{get_xdr_info, print_file_info_csv, print_file_info_human, print_file_info_json, print_file_info_yaml};
use xdrconvert::input::JobConfig;
use xdrconvert::log::{config_echo, show_farewell_with_timing, show_greeting, show_summary};
use xdrconvert::process_job_with_progress;

fn main() {
    let cli = Cli::parse();
    init_logging(&cli);

    if let Err(err) = run(cli) {
        error!("{:#}", err);
        let code = err.downcast_ref::<XdrError>().map_or(1, XdrError::exit_code);
        process::exit(code);
    }
}

fn init_logging(cli: &Cli) {
    let level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        command @ Commands::Convert { .. } => convert(cli.config.as_deref(), cli.quiet, command),
        Commands::Validate { config_file, detailed } => {
            let path = config_file
                .or(cli.config)
                .context("No configuration file given (argument or --config)")?;
            validate(&path, detailed)
        }
        Commands::Info {
            file,
            detailed,
            variable,
            format,
        } => {
            let info = get_xdr_info(&file, variable.as_deref(), detailed)?;
            match format.unwrap_or(cli.output_format) {
                ReportFormat::Human => print_file_info_human(&info),
                ReportFormat::Json => print_file_info_json(&info)?,
                ReportFormat::Yaml => print_file_info_yaml(&info)?,
                ReportFormat::Csv => print_file_info_csv(&info)?,
            }
            Ok(())
        }
        Commands::Template {
            template_type,
            output,
            format,
        } => {
            let config = template_config(&template_type);
            let text = match format {
                ConfigFormat::Json => config.to_json()?,
                ConfigFormat::Yaml => config.to_yaml()?,
            };
            match output {
                Some(path) => {
                    fs::write(&path, text).with_context(|| format!("Failed to write template: {}", path.display()))?
                }
                None => println!("{}", text),
            }
            Ok(())
        }
        Commands::Completions { shell, output } => {
            let mut command = Cli::command();
            match output {
                Some(path) => {
                    let mut file = fs::File::create(&path)
                        .with_context(|| format!("Failed to create completions file: {}", path.display()))?;
                    clap_complete::generate(shell, &mut command, "xdrconvert", &mut file);
                }
                None => clap_complete::generate(shell, &mut command, "xdrconvert", &mut io::stdout()),
            }
            Ok(())
        }
    }
}

fn load_config(path: &Path) -> Result<JobConfig> {
    JobConfig::from_file(path).with_context(|| format!("Failed to load configuration: {}", path.display()))
}

fn convert(config_path: Option<&Path>, quiet: bool, command: Commands) -> Result<()> {
    let (force, dry_run) = match &command {
        Commands::Convert { force, dry_run, .. } => (*force, *dry_run),
        _ => (false, false),
    };
    let start_time = Instant::now();
    let base = config_path.map(load_config).transpose()?;
    let config = convert_job(base, command)?;

    if !quiet {
        show_greeting(&config_path.map_or_else(|| "command line".to_string(), |p| p.display().to_string()));
        config_echo(&config);
    }

    config.validate()?;
    if dry_run {
        println!("\nDry run: configuration is valid, nothing was written");
        return Ok(());
    }
    if !force && Path::new(&config.output).exists() {
        anyhow::bail!("Output file {} already exists (use --force to overwrite)", config.output);
    }

    let spinner = if quiet { ProgressBar::hidden() } else { ProgressBar::new_spinner() };
    if let Ok(style) = ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}") {
        spinner.set_style(style);
    }
    spinner.enable_steady_tick(Duration::from_millis(100));
    let result = process_job_with_progress(&config, |stage| {
        debug!("stage: {:?}", stage);
        spinner.set_message(stage.describe());
    });
    spinner.finish_and_clear();
    let summary = result?;

    if !quiet {
        show_summary(&summary);
        show_farewell_with_timing(start_time.elapsed());
    }
    Ok(())
}

fn validate(path: &Path, detailed: bool) -> Result<()> {
    let config = load_config(path)?;
    let outcome = config.validate();
    if detailed {
        println!("Configuration: {}", path.display());
        let exists = |p: &str| if Path::new(p).exists() { "found" } else { "missing" };
        println!("  Input: {} ({})", config.input, exists(&config.input));
        println!("  Output: {} ({})", config.output, config.format);
        println!("  Filters: {}", config.filters.len());
        for filter in &config.filters {
            println!("    - {}", filter.kind());
        }
        match &config.regrid {
            Some(regrid) => println!(
                "  Regrid: {} x {} x {} cells, method {:?}",
                regrid.grid.columns,
                regrid.grid.rows,
                regrid.grid.layer_edges.len().saturating_sub(1).max(1),
                regrid.method
            ),
            None => println!("  Regrid: none"),
        }
        if let Some(compare) = &config.compare {
            println!(
                "  Compare: {} against {} ({})",
                compare.function,
                compare.reference,
                exists(&compare.reference)
            );
        }
        io::stdout().flush()?;
    }
    outcome?;
    println!("Configuration is valid");
    Ok(())
}
