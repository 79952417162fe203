//! stm32pio GUI backend - headless runner.
//!
//! Restores the saved projects list, optionally adds the project given on the
//! command line, waits for everything to load and prints each entry with its
//! stage.
//!
//! # Environment Variables
//!
//! See the [`config`] module for available configuration options.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::runtime::Handle;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use stm32pio_gui::config::Config;
use stm32pio_gui::ioc::IocLoader;
use stm32pio_gui::list::{AddOptions, ProjectsList};
use stm32pio_gui::observer::ListObserver;
use stm32pio_gui::project::board_parameters;
use stm32pio_gui::settings::{app_setting, init_app_settings, Settings, SharedStore};

/// stm32pio GUI backend.
///
/// Loads the projects list stored in the settings and reports the stage of
/// every project.
#[derive(Parser, Debug)]
#[command(name = "stm32pio-gui")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "\
ENVIRONMENT VARIABLES:
    STM32PIO_SETTINGS_PATH   Settings file (default: <config dir>/stm32pio/settings.json)
    STM32PIO_VERBOSE         Force verbose logging (1/0/true/false)

EXAMPLES:
    # Show the saved projects
    stm32pio-gui

    # Add a project and set its board
    stm32pio-gui -d ~/projects/blink -b nucleo_f031k6
")]
struct Cli {
    /// Path to the project directory (or its .ioc file) to open.
    #[arg(short, long)]
    directory: Option<String>,

    /// PlatformIO board name. Applied to the project given with --directory.
    #[arg(short, long, requires = "directory")]
    board: Option<String>,
}

/// Logs list notifications.
struct LogObserver;

impl ListObserver for LogObserver {
    fn begin_insert_rows(&self, first: usize, last: usize) {
        debug!(first, last, "Inserting rows");
    }

    fn begin_remove_rows(&self, first: usize, last: usize) {
        debug!(first, last, "Removing rows");
    }

    fn go_to_project(&self, index: usize) {
        info!(index, "Go to project");
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::from_env().context("Failed to load configuration")?;
    let mut settings = Settings::open(&config.settings_path).with_context(|| {
        format!(
            "Failed to open settings at {}",
            config.settings_path.display()
        )
    })?;
    init_app_settings(&mut settings);

    let verbose = config
        .verbose
        .or_else(|| app_setting(&settings, "verbose").and_then(|value| value.as_bool()))
        .unwrap_or(false);
    init_logging(verbose);

    info!(
        settings = %config.settings_path.display(),
        verbose,
        "Starting stm32pio GUI backend"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    runtime.block_on(run(cli, settings))
}

async fn run(cli: Cli, settings: Settings) -> Result<()> {
    let store: SharedStore = Arc::new(Mutex::new(settings));
    let list = ProjectsList::new(&Handle::current(), Arc::new(IocLoader), store)
        .with_observer(Arc::new(LogObserver));

    let restored = list.restore_from_settings();
    let startup_count = restored.len();
    tokio::spawn(async move {
        for item in &restored {
            item.initialized().await;
        }
        info!(count = startup_count, "All restored projects have been initialized");
    });

    if let Some(directory) = cli.directory {
        let item = list.add_list_item(&directory, cli_add_options(cli.board.as_deref()), None);
        if let Some(index) = list.index_of(&item) {
            list.go_to_project(index);
        }
        list.save_in_settings();
    }

    list.wait_initialized().await;
    for item in list.items() {
        item.wait_for_actions().await;
        println!("{}\t{}", item.name(), item.stage());
    }

    list.wait_for_saves().await;
    Ok(())
}

/// Options for the project named on the command line. It counts as a startup
/// project, so removing it later always rewrites the settings.
fn cli_add_options(board: Option<&str>) -> AddOptions {
    AddOptions {
        parameters: board.map(board_parameters).unwrap_or_default(),
        from_startup: true,
        ..AddOptions::default()
    }
}

/// Initializes the tracing subscriber. `RUST_LOG` wins over `verbose`.
fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();
}
