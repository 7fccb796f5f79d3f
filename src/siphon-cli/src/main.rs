use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use siphon_core::{init_logging, AppDirs, Config, LogLevel, SourceSettings};
use siphon_python::{GilGuard, Runtime, DEFAULT_DEFINITION};
use siphon_source::{configure_session, NullSink, SourceState, StreamSource};

mod dump;

use dump::{DumpPipeline, DumpTarget};

const TICK_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Parser)]
#[command(name = "siphon", version, about = "Relay live streams resolved by Streamlink")]
struct Cli {
    /// Config file (defaults to config.toml in the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log level override (RUST_LOG still takes precedence)
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevelArg>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the embedded interpreter and report whether Streamlink loaded
    Check,
    /// List the definitions offered for a URL
    Definitions(DefinitionsCommand),
    /// Relay a stream through a named pipe into a file or stdout
    Play(PlayCommand),
}

#[derive(Debug, Parser, Clone)]
struct DefinitionsCommand {
    url: String,
}

#[derive(Debug, Parser, Clone)]
struct PlayCommand {
    url: String,
    /// Preferred definition; falls back to "best", then the first offered
    #[arg(short, long)]
    definition: Option<String>,
    /// Output file; "-" or omitted writes to stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogLevelArg {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevelArg> for LogLevel {
    fn from(level: LogLevelArg) -> Self {
        match level {
            LogLevelArg::Trace => LogLevel::Trace,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Error => LogLevel::Error,
        }
    }
}

impl PlayCommand {
    fn settings(&self, base: &SourceSettings) -> SourceSettings {
        SourceSettings {
            url: self.url.clone(),
            definition: self
                .definition
                .clone()
                .unwrap_or_else(|| base.definition.clone()),
            ..base.clone()
        }
    }
}

fn load_config(cli: &Cli, dirs: &AppDirs) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load_or_default(dirs)?,
    };
    if let Some(level) = cli.log_level {
        config.logging.level = level.into();
    }
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let dirs = AppDirs::discover()?;
    let config = load_config(&cli, &dirs)?;
    let _logging = init_logging(&config.logging, &dirs)?;

    let runtime = siphon_python::runtime::init_global(&config.runtime);

    match &cli.command {
        Command::Check => check(runtime, &config),
        Command::Definitions(cmd) => definitions(runtime, &config, &cmd.url),
        Command::Play(cmd) => play(runtime, &config, cmd),
    }
}

fn check(runtime: &Runtime, config: &Config) -> Result<()> {
    match runtime.failure() {
        None => {
            println!(
                "{}.{} loaded",
                config.runtime.module, config.runtime.entry_point
            );
            Ok(())
        }
        Some(reason) => bail!("python runtime failed to load:\n{reason}"),
    }
}

fn definitions(runtime: &Runtime, config: &Config, url: &str) -> Result<()> {
    let settings = SourceSettings {
        url: url.to_string(),
        ..config.source.clone()
    };
    let session = configure_session(runtime, &settings)?;
    let gil = GilGuard::acquire();
    let catalog = gil
        .run(|py| session.streams(py, url))
        .with_context(|| format!("resolving {url}"))?;
    drop(gil);

    if catalog.is_empty() {
        println!("No streams found for {url}");
        return Ok(());
    }
    let selected = catalog
        .select(&settings.definition)
        .map(|info| info.name().to_string());
    for name in catalog.names() {
        let marker = if selected.as_deref() == Some(name) {
            " (selected)"
        } else if name == DEFAULT_DEFINITION {
            " (default)"
        } else {
            ""
        };
        println!("{name}{marker}");
    }
    Ok(())
}

fn play(runtime: &'static Runtime, config: &Config, cmd: &PlayCommand) -> Result<()> {
    let settings = cmd.settings(&config.source);
    let pipeline = DumpPipeline::new(DumpTarget::from_arg(cmd.output.clone()));
    let copied = pipeline.copied();

    tracing::info!(url = %settings.url, definition = %settings.definition, "play request");
    let mut source = StreamSource::new(
        "siphon-cli",
        runtime,
        settings,
        config.relay.clone(),
        Box::new(pipeline),
        Arc::new(NullSink),
    );
    if source.session().is_none() {
        bail!("could not create a streamlink session, see the log for details");
    }
    if source.show()? == SourceState::Inactive {
        bail!("no playable stream for {}", cmd.url);
    }

    while source.is_active() {
        thread::sleep(TICK_INTERVAL);
        source.tick();
    }
    drop(source);

    eprintln!("relayed {} bytes", copied.load(Ordering::SeqCst));
    Ok(())
}
