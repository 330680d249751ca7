//! `camdeck` - CLI for the camera control surface
//!
//! This binary runs the HTTP server and exposes the local analyzer and
//! configuration helpers on the command line.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::io::Read;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use camdeck::analysis::{CodeReport, LocalAnalyzer, NoteKind};
use camdeck::cli::{AnalyzeCommand, Cli, Command, ConfigCommand, ServeCommand};
use camdeck::{init_logging, Config, Error};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    // Validation reports problems instead of failing on them.
    if let Command::Config(ConfigCommand::Validate { file }) = &cli.command {
        handle_validate(file.clone().or_else(|| cli.config.clone()));
        return Ok(());
    }

    let config_path = cli.config.clone();
    let config = Config::load_from(config_path.clone()).context("Failed to load configuration")?;

    match cli.command {
        Command::Serve(cmd) => handle_serve(config, &cmd).await,
        Command::Analyze(cmd) => handle_analyze(&config, &cmd),
        Command::Config(cmd) => handle_config(&config, config_path, cmd),
    }
}

async fn handle_serve(mut config: Config, cmd: &ServeCommand) -> anyhow::Result<()> {
    if let Some(bind) = cmd.bind {
        config.server.bind = bind;
    }
    camdeck::web::serve(&config).await?;
    Ok(())
}

fn handle_analyze(config: &Config, cmd: &AnalyzeCommand) -> anyhow::Result<()> {
    let source = if cmd.reads_stdin() {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read standard input")?;
        buf
    } else {
        std::fs::read_to_string(&cmd.file).map_err(|source| Error::SourceRead {
            path: cmd.file.clone(),
            source,
        })?
    };

    let report = LocalAnalyzer::from_config(&config.analysis)?.report(&source);
    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&cmd.file.display().to_string(), &report);
    }
    Ok(())
}

fn print_report(name: &str, report: &CodeReport) {
    if let Some(issue) = &report.syntax_error {
        println!("{name}:{}:{}: {}", issue.lineno, issue.offset, issue.msg);
        return;
    }

    println!("Analysis of {name}");
    println!("{}", "=".repeat(12 + name.len()));
    if let Some(metrics) = &report.metrics {
        println!("  Lines:     {}", metrics.lines);
        println!("  Functions: {}", metrics.functions);
        println!("  Classes:   {}", metrics.classes);
    }
    if report.notes.is_empty() {
        println!();
        println!("No findings.");
        return;
    }
    println!();
    for note in &report.notes {
        let label = match note.kind {
            NoteKind::Todos => "TODO/FIXME",
            NoteKind::LongLines => "Long lines",
            NoteKind::BareExcept => "Bare except",
        };
        let lines: Vec<String> = note.lines.iter().map(ToString::to_string).collect();
        println!("  {label:<12} line {}", lines.join(", "));
    }
}

fn handle_config(
    config: &Config,
    config_path: Option<PathBuf>,
    cmd: ConfigCommand,
) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                print_config(config);
            }
        }
        ConfigCommand::Path => {
            let path = config_path.unwrap_or_else(Config::default_config_path);
            println!("{}", path.display());
        }
        ConfigCommand::Validate { file } => handle_validate(file),
    }
    Ok(())
}

fn handle_validate(file: Option<PathBuf>) {
    let path = file.unwrap_or_else(Config::default_config_path);
    println!("Validating configuration: {}", path.display());
    match Config::load_from(Some(path)) {
        Ok(_) => println!("Configuration is valid."),
        Err(e) => println!("Configuration error: {e}"),
    }
}

fn print_config(config: &Config) {
    println!("Current Configuration");
    println!("=====================");
    println!();
    println!("[Server]");
    println!("  Bind:               {}", config.server.bind);
    println!();
    println!("[Governor]");
    println!("  Capacity:           {}", config.governor.capacity);
    println!("  Refill per second:  {}", config.governor.refill_per_sec);
    println!("  Idle eviction (s):  {}", config.governor.idle_eviction_secs);
    println!();
    println!("[Costs]");
    println!("  Command:            {}", config.costs.command);
    println!("  Snapshot:           {}", config.costs.snapshot);
    println!("  Analyze:            {}", config.costs.analyze);
    println!();
    println!("[Camera]");
    println!("  Source:             {:?}", config.camera.source);
    if let Some(dir) = &config.camera.directory {
        println!("  Directory:          {}", dir.display());
    }
    println!(
        "  Resolution:         {}x{}",
        config.camera.width, config.camera.height
    );
    println!("  FPS:                {}", config.camera.fps);
    println!("  Stop timeout (ms):  {}", config.camera.stop_timeout_ms);
    println!();
    println!("[Analysis]");
    println!("  Backend:            {:?}", config.analysis.backend);
    println!("  Gemini model:       {}", config.analysis.gemini_model);
    println!(
        "  API key:            {}",
        if config.analysis.api_key.is_some() {
            "set"
        } else {
            "not set"
        }
    );
    println!("  Long line limit:    {}", config.analysis.long_line_limit);
}
