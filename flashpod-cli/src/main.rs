//! flashpod CLI - Command-line tool for managing serial-attached flash
//! storage pods.
//!
//! ## Features
//!
//! - Query device identity and flash capacity
//! - List, upload, and delete stored files
//! - Erase the flash chip
//! - Stream the device's asynchronous log output
//! - Interactive serial port selection
//! - Shell completion generation
//! - Environment variable support

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use console::style;
use env_logger::Env;
use flashpod::{FlashInfo, NativePort, Session, SessionConfig};
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use std::io;
use std::path::{Path, PathBuf};

mod config;
mod monitor;
mod serial;

use config::Config;
use monitor::cmd_monitor;
use serial::{SerialOptions, ask_remember_port, select_serial_port};

/// CLI-layer error classes mapped to dedicated exit codes.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation or environment setup (exit code 2).
    #[error("{0}")]
    Usage(String),
    /// User cancelled a prompt (exit code 130).
    #[error("{0}")]
    Cancelled(String),
}

/// flashpod - manage a serial-attached flash storage pod.
///
/// Environment variables:
///   FLASHPOD_PORT              - Default serial port
///   FLASHPOD_BAUD              - Default baud rate (default: 500000)
///   FLASHPOD_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "flashpod")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "For more information, visit: https://github.com/flashpod/flashpod")]
struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "FLASHPOD_PORT")]
    port: Option<String>,

    /// Baud rate for the device link (default: 500000).
    #[arg(short, long, global = true, env = "FLASHPOD_BAUD")]
    baud: Option<u32>,

    /// Verbose output level (-v, -vv, -vvv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "FLASHPOD_NON_INTERACTIVE")]
    non_interactive: bool,

    /// List all available ports during selection (including unknown types).
    #[arg(long, global = true)]
    list_all_ports: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Show the device identity line.
    Info,

    /// Show flash capacity.
    Capacity {
        /// Output capacity as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// List files stored on the device.
    Ls {
        /// Output the file list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Upload a file to the device.
    Upload {
        /// Path of the local file to upload.
        file: PathBuf,

        /// Store under this name instead of the file's basename.
        #[arg(long = "as", value_name = "NAME")]
        as_name: Option<String>,
    },

    /// Request a file download (acknowledgement only).
    Download,

    /// Delete a file from the device.
    Rm {
        /// Name of the stored file to delete.
        name: String,
    },

    /// Erase the entire flash chip.
    Format {
        /// Skip the confirmation prompt.
        #[arg(long)]
        yes: bool,
    },

    /// Stream the device's asynchronous log output.
    Monitor,

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "flashpod v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    let code = match run(&cli) {
        Ok(()) => 0,
        Err(err) => match err.downcast_ref::<CliError>() {
            Some(CliError::Usage(msg)) => {
                eprintln!("{} {msg}", style("Error:").red().bold());
                2
            },
            Some(CliError::Cancelled(msg)) => {
                eprintln!("{msg}");
                130
            },
            None => {
                eprintln!("{} {err:#}", style("Error:").red().bold());
                1
            },
        },
    };
    std::process::exit(code);
}

fn run(cli: &Cli) -> Result<()> {
    // Load configuration
    let mut config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Info => cmd_info(cli, &mut config),
        Commands::Capacity { json } => cmd_capacity(cli, &mut config, *json),
        Commands::Ls { json } => cmd_ls(cli, &mut config, *json),
        Commands::Upload { file, as_name } => {
            cmd_upload(cli, &mut config, file, as_name.as_deref())
        },
        Commands::Download => cmd_download(cli, &mut config),
        Commands::Rm { name } => cmd_rm(cli, &mut config, name),
        Commands::Format { yes } => cmd_format(cli, &mut config, *yes),
        Commands::Monitor => {
            let session = open_session(cli, &mut config)?;
            cmd_monitor(&session, cli.quiet)?;
            session.disconnect()?;
            Ok(())
        },
        Commands::ListPorts { json } => {
            cmd_list_ports(*json);
            Ok(())
        },
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(*shell, &mut cmd, "flashpod", &mut io::stdout());
            Ok(())
        },
    }
}

/// Get serial port from CLI args or interactive selection.
fn get_port(cli: &Cli, config: &mut Config) -> Result<String> {
    let options = SerialOptions {
        port: cli.port.clone(),
        list_all_ports: cli.list_all_ports,
        non_interactive: cli.non_interactive,
    };

    let selected = select_serial_port(&options, config)?;

    // Ask to remember if not a known device and interactive mode
    if !selected.is_known && !cli.non_interactive {
        ask_remember_port(&selected.port, config)?;
    }

    Ok(selected.port.name)
}

/// Default baud rate when neither the CLI nor the config specifies one.
const DEFAULT_BAUD: u32 = 500_000;

/// Select a port and open a connected session.
fn open_session(cli: &Cli, config: &mut Config) -> Result<Session<NativePort>> {
    let port = get_port(cli, config)?;
    // Explicit --baud (or FLASHPOD_BAUD) wins, then the remembered config
    // value, then the pod's stock rate.
    let baud = cli
        .baud
        .or(config.connection.baud)
        .unwrap_or(DEFAULT_BAUD);
    if !cli.quiet {
        eprintln!(
            "{} Using port {} at {} baud",
            style("🔌").cyan(),
            style(&port).green(),
            baud
        );
    }

    let session = Session::new(SessionConfig::default().with_baud_rate(baud));
    session
        .connect(&port)
        .with_context(|| format!("failed to open {port}"))?;
    Ok(session)
}

/// Format a byte count as megabytes with two decimals.
#[allow(clippy::cast_precision_loss)]
fn format_mb(bytes: u64) -> String {
    format!("{:.2}MB", bytes as f64 / 1024.0 / 1024.0)
}

/// Print a one-line capacity summary.
fn print_capacity(info: &FlashInfo) {
    match info.used_percent() {
        Some(pct) => println!(
            "Capacity: {} / {} ({pct:.1}% used)",
            format_mb(info.used_bytes()),
            format_mb(info.total_bytes)
        ),
        None => println!("Capacity: device reports zero-size flash"),
    }
}

/// Info command implementation.
fn cmd_info(cli: &Cli, config: &mut Config) -> Result<()> {
    let session = open_session(cli, config)?;
    let identity = session.identity().context("identity query failed")?;
    println!("{identity}");
    session.disconnect()?;
    Ok(())
}

/// Capacity command implementation.
fn cmd_capacity(cli: &Cli, config: &mut Config, json: bool) -> Result<()> {
    let session = open_session(cli, config)?;
    let info = session.flash_info().context("flash info query failed")?;
    session.disconnect()?;

    if json {
        let payload = serde_json::json!({
            "total_bytes": info.total_bytes,
            "free_bytes": info.free_bytes,
            "used_bytes": info.used_bytes(),
            "used_percent": info.used_percent(),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        print_capacity(&info);
    }
    Ok(())
}

/// Ls command implementation.
fn cmd_ls(cli: &Cli, config: &mut Config, json: bool) -> Result<()> {
    let session = open_session(cli, config)?;
    let entries = session.list_files().context("file list query failed")?;
    session.disconnect()?;

    if json {
        let names: Vec<String> = entries
            .iter()
            .map(|e| e.display_name().into_owned())
            .collect();
        println!("{}", serde_json::to_string_pretty(&names)?);
    } else if entries.is_empty() {
        eprintln!("{}", style("No files to show").dim());
    } else {
        for entry in &entries {
            println!("{}", entry.display_name());
        }
    }
    Ok(())
}

/// Upload command implementation.
fn cmd_upload(cli: &Cli, config: &mut Config, file: &Path, as_name: Option<&str>) -> Result<()> {
    let content =
        std::fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;
    let name = match as_name {
        Some(name) => name.to_string(),
        None => file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| CliError::Usage(format!("{} has no file name", file.display())))?,
    };

    if !cli.quiet {
        eprintln!(
            "{} Uploading {} ({} bytes) as {}",
            style("📦").cyan(),
            file.display(),
            content.len(),
            style(&name).bold()
        );
    }

    let session = open_session(cli, config)?;

    let pb = if cli.quiet {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(content.len() as u64);
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb
    };

    let ack = session
        .upload_file(&name, &content, |sent, _total| {
            pb.set_position(sent as u64);
        })
        .context("upload failed")?;
    pb.finish_and_clear();

    if !cli.quiet {
        eprintln!(
            "{} Device: {}",
            style("✓").green(),
            String::from_utf8_lossy(&ack).trim()
        );
    }

    // The engine does not auto-refresh; show the post-upload capacity.
    let info = session.flash_info().context("flash info query failed")?;
    print_capacity(&info);
    session.disconnect()?;
    Ok(())
}

/// Download command implementation.
fn cmd_download(cli: &Cli, config: &mut Config) -> Result<()> {
    let session = open_session(cli, config)?;
    let ack = session.download_file().context("download request failed")?;
    session.disconnect()?;

    println!("{}", String::from_utf8_lossy(&ack).trim());
    eprintln!(
        "{} The pod firmware does not define the bulk download transfer yet; \
         only the acknowledgement above was received.",
        style("⚠").yellow()
    );
    Ok(())
}

/// Rm command implementation.
fn cmd_rm(cli: &Cli, config: &mut Config, name: &str) -> Result<()> {
    let session = open_session(cli, config)?;
    let ack = session.delete_file(name).context("delete failed")?;

    if !cli.quiet {
        eprintln!(
            "{} Device: {}",
            style("✓").green(),
            String::from_utf8_lossy(&ack).trim()
        );
    }

    // Stored-file state changed; show the refreshed capacity.
    let info = session.flash_info().context("flash info query failed")?;
    print_capacity(&info);
    session.disconnect()?;
    Ok(())
}

/// Format command implementation.
fn cmd_format(cli: &Cli, config: &mut Config, yes: bool) -> Result<()> {
    if !yes {
        if cli.non_interactive {
            return Err(CliError::Usage(
                "format erases every stored file; pass --yes to confirm".to_string(),
            )
            .into());
        }
        let confirmed = dialoguer::Confirm::with_theme(&dialoguer::theme::ColorfulTheme::default())
            .with_prompt("Erase the entire flash chip? All stored files will be lost")
            .default(false)
            .interact_opt()
            .map_err(|_| CliError::Usage("confirmation prompt failed".to_string()))?
            .unwrap_or(false);
        if !confirmed {
            return Err(CliError::Cancelled("format cancelled".to_string()).into());
        }
    }

    let session = open_session(cli, config)?;
    if !cli.quiet {
        eprintln!("{} Formatting flash...", style("🗑").red());
    }
    let ack = session.format_flash().context("format failed")?;
    session.disconnect()?;

    println!("{}", ack.trim());
    Ok(())
}

/// List-ports command implementation.
fn cmd_list_ports(json: bool) {
    let ports = flashpod::detect_ports();

    if json {
        match serde_json::to_string_pretty(&ports) {
            Ok(output) => println!("{output}"),
            Err(e) => eprintln!("{} failed to serialize port list: {e}", style("Error:").red()),
        }
    } else if ports.is_empty() {
        eprintln!("{}", style("No serial ports found").dim());
    } else {
        for line in flashpod::format_port_list(&ports) {
            println!("{line}");
        }
    }
}
