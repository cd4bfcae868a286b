// ── Safety policy ────────────────────────────────────────────────────────────
// Unsafe code is forbidden everywhere except:
//   • `plugins` – dynamic library loading and the C plugin ABI
// Each unsafe block in that module MUST carry a `// SAFETY:` comment.
#![deny(unsafe_code)]

mod app;
mod editor;
mod error;
mod explorer;
mod fetch;
mod io;
mod languages;
mod plugins;
mod search;
mod settings;
mod shell;
mod ui;
mod vcs;

use std::{path::PathBuf, process::ExitCode, time::Duration};

use clap::{ArgAction, Parser};
use env_logger::Env;

use crate::{
    app::{App, AppConfig, AppEvent},
    settings::{JsonFileStore, MemoryStore, SettingsStore},
};

const STARTUP_LOAD_WAIT: Duration = Duration::from_secs(30);

/// Construct: a source-code editor with streamed, cancellable file loading.
#[derive(Parser, Debug)]
#[command(name = "construct", version, about)]
struct Cli {
    /// File to open on startup.
    file: Option<PathBuf>,

    /// Settings file to use instead of the per-user default.
    #[arg(long, value_name = "PATH", conflicts_with = "ephemeral")]
    settings: Option<PathBuf>,

    /// Keep settings in memory only; nothing is read from or written to disk.
    #[arg(long)]
    ephemeral: bool,

    /// Directory to load plugins from.
    #[arg(long, value_name = "DIR", conflicts_with = "no_plugins")]
    plugins: Option<PathBuf>,

    /// Do not load any plugins.
    #[arg(long)]
    no_plugins: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            eprintln!("construct: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> error::Result<()> {
    let store: Box<dyn SettingsStore> = if cli.ephemeral {
        Box::new(MemoryStore::default())
    } else {
        let store = match cli.settings {
            Some(path) => JsonFileStore::new(path),
            None => JsonFileStore::at_default_location()?,
        };
        log::debug!("settings file: {}", store.path().display());
        Box::new(store)
    };
    let mut app = App::new(AppConfig::default(), store);

    if !cli.no_plugins {
        let dir = match cli.plugins {
            Some(dir) => dir,
            None => plugins::default_dir()?,
        };
        match app.load_plugins(&dir) {
            Ok(count) => log::info!("{count} plugin(s) loaded from {}", dir.display()),
            Err(e) => log::warn!("plugins unavailable: {e}"),
        }
    }

    if let Some(file) = cli.file {
        match app.open_file(&file) {
            Ok(id) => {
                for event in app.wait_for_load(id, STARTUP_LOAD_WAIT) {
                    if let AppEvent::LoadFailed { message, .. } = event {
                        eprintln!("construct: {}: {message}", file.display());
                    }
                }
            }
            Err(e) => eprintln!("construct: {}: {e}", file.display()),
        }
    }

    let stdin = std::io::stdin();
    shell::run(&mut app, stdin.lock(), std::io::stdout().lock())?;
    Ok(())
}
