//! `sk` binary entry point.

use std::io::Write;
use std::process::ExitCode;

use shell_keeper::cli::{self, Cli};
use shell_keeper::config::Config;
use shell_keeper::paths::KeeperPaths;
use shell_keeper::preflight::{self, DTACH_INSTALL_HINT};
use shell_keeper::{commands, logging, Keeper, KeeperError};
use tracing::{debug, warn};

fn main() -> ExitCode {
    let cli = match cli::parse_args() {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("error: {}", e);
            eprintln!("Run 'sk --help' for usage.");
            return ExitCode::FAILURE;
        }
    };

    if cli.global.help {
        cli::print_help();
        return ExitCode::SUCCESS;
    }
    if cli.global.version {
        cli::print_version();
        return ExitCode::SUCCESS;
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            if matches!(e, KeeperError::MultiplexerMissing) {
                eprintln!("\n{}", DTACH_INSTALL_HINT);
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> shell_keeper::Result<()> {
    let paths = KeeperPaths::resolve()?;
    let (config, config_error) = Config::load_or_default(&cli.global, &paths)?;

    logging::init(Some(config.log_filter()));
    if let Some(e) = config_error {
        warn!(path = %paths.config_file().display(), error = %e, "using default configuration");
    }
    debug!(version = env!("CARGO_PKG_VERSION"), root = %paths.root().display(), "sk starting");

    let preflight = preflight::run()?;
    if let Some(warning) = preflight.linger_warning() {
        eprintln!("{}\n", warning);
    }

    let mut keeper = Keeper::open(config, &paths, Box::new(preflight.dtach))?
        .with_program(commands::program_path());

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    commands::dispatch(cli.command, &mut keeper, &mut out)?;
    out.flush()?;
    Ok(())
}
