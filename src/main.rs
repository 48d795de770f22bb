//! warden - service supervisor entry point.
//!
//! Without arguments the process enters service dispatch (on Unix: runs in
//! the foreground until SIGTERM/SIGINT). `-v`, `-i` and `-u` query, install
//! and remove the OS service record. The `protect` and `verify-config`
//! subcommands are the side-car tool for HMAC-protected configuration
//! files and run without a configuration of their own.

use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use warden::Error;
use warden::config::{ConfigStore, protect};
use warden::constants::{
    DEFAULT_CRYPTO_PASSWORD, SECTION_CRYPTO, SECTION_LOG, SECTION_LOG_EMAIL,
};
use warden::crypto::CryptoHelper;
use warden::logger::{EmailLogPlugin, Logger};
use warden::supervisor::{Supervisor, service};

#[derive(Parser)]
#[command(name = "warden")]
#[command(disable_version_flag = true)]
#[command(about = "Service supervisor with a heartbeat watchdog")]
#[command(
    long_about = "Supervises a child executable as an OS service: launches it, watches a \
cryptographically gated UDP heartbeat, signals a graceful shutdown handshake and restarts the \
child per policy. Configuration lives in <executable-stem>.json next to the binary."
)]
struct Cli {
    /// Report whether the service is currently installed
    #[arg(short = 'v', long = "installed")]
    installed: bool,

    /// Install the OS service record
    #[arg(short = 'i', long = "install")]
    install: bool,

    /// Uninstall the OS service record
    #[arg(short = 'u', long = "uninstall")]
    uninstall: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute protection hashes for a JSON configuration file
    ///
    /// Reads a document with a 'protectedSections' array, fills in the
    /// HMAC-SHA256 hash of every named section plus the array-level hash,
    /// and writes the result with the original key order preserved.
    Protect {
        /// Input JSON file to be protected
        source: PathBuf,
        /// Output file with computed hashes
        target: PathBuf,
        /// Secret password for the HMAC computation
        password: String,
    },
    /// Verify the protection hashes of a JSON configuration file
    VerifyConfig {
        /// Protected JSON file to check
        file: PathBuf,
        /// Secret password the hashes were computed with
        password: String,
    },
}

/// Exit codes of the protector tool, kept apart so scripted callers can
/// tell configuration problems from tampering.
fn run_tool(command: Commands) -> i32 {
    match command {
        Commands::Protect {
            source,
            target,
            password,
        } => {
            if !source.is_file() {
                eprintln!("Error: source file '{}' does not exist.", source.display());
                return 2;
            }
            match protect::protect_file(&source, &target, &password) {
                Ok(()) => {
                    println!(
                        "Protected configuration written to '{}'.",
                        target.display()
                    );
                    0
                }
                Err(e @ Error::ConfigParse { .. }) => {
                    eprintln!("Error: {e}");
                    4
                }
                Err(e @ Error::Io { .. }) => {
                    eprintln!("Error: {e}");
                    6
                }
                Err(e) => {
                    eprintln!("Error: {e}");
                    5
                }
            }
        }
        Commands::VerifyConfig { file, password } => {
            if !file.is_file() {
                eprintln!("Error: file '{}' does not exist.", file.display());
                return 2;
            }
            match protect::verify_file(&file, &password) {
                Ok(()) => {
                    println!("All protected sections verify.");
                    0
                }
                Err(e @ Error::ConfigParse { .. }) => {
                    eprintln!("Error: {e}");
                    4
                }
                Err(e) => {
                    eprintln!("Error: {e}");
                    5
                }
            }
        }
    }
}

fn run_service_mode(cli: &Cli, supervisor: &Arc<Supervisor>) -> anyhow::Result<i32> {
    if cli.installed {
        let installed = service::is_installed(supervisor).context("cannot query service state")?;
        println!(
            "The {} service is {} installed",
            supervisor.service_name(),
            if installed { "currently" } else { "not" }
        );
        return Ok(0);
    }

    if cli.install {
        if service::is_installed(supervisor).context("cannot query service state")? {
            eprintln!(
                "The {} service is already installed.",
                supervisor.service_name()
            );
        } else {
            service::install(supervisor).context("service installation failed")?;
            println!("{} service installed.", supervisor.service_name());
        }
        return Ok(0);
    }

    if cli.uninstall {
        if service::is_installed(supervisor).context("cannot query service state")? {
            service::uninstall(supervisor).context("service removal failed")?;
            println!("{} service uninstalled.", supervisor.service_name());
        } else {
            eprintln!(
                "The {} service is not installed.",
                supervisor.service_name()
            );
        }
        return Ok(0);
    }

    service::dispatch(Arc::clone(supervisor)).context("service dispatch failed")
}

fn main() {
    let cli = Cli::parse();

    // the protector tool needs no configuration or logger
    if let Some(command) = cli.command {
        exit(run_tool(command));
    }

    // configuration lives next to the executable, same stem, .json
    let exe_file = std::env::current_exe().unwrap_or_default();
    let cfg_path = exe_file.with_extension("json");
    let cfg = match ConfigStore::load(&cfg_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!(
                "Unable to use configuration file {}.\n{e}",
                cfg_path.display()
            );
            exit(-2);
        }
    };

    // the supervisor changes into the working directory first, so relative
    // log paths resolve from there
    let mut supervisor = Supervisor::new(&cfg);

    let mut logger = Logger::new();
    logger.configure(&cfg, SECTION_LOG);

    let mut crypto = CryptoHelper::new();
    crypto.configure(&cfg, SECTION_CRYPTO, DEFAULT_CRYPTO_PASSWORD);

    // plugins must exist before the logger starts
    EmailLogPlugin::configure_all(&cfg, &crypto, &mut logger, SECTION_LOG_EMAIL);

    let logger = Arc::new(logger);
    Logger::set_current(Some(Arc::clone(&logger)));
    logger.start();

    supervisor.configure(&cfg);
    let supervisor = Arc::new(supervisor);

    let result = run_service_mode(&cli, &supervisor);

    // strict reverse shutdown order: the logger flushes last
    logger.shutdown();
    Logger::set_current(None);

    match result {
        Ok(code) => exit(code),
        Err(e) => {
            eprintln!("Error: {e:#}");
            exit(1);
        }
    }
}
