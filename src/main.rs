//! pfwd - port forwarding manager for nftables
//!
//! Forwards traffic arriving on a local port to a remote address and port,
//! for TCP and UDP at once, over IPv4 or IPv6. Rules live in a dedicated
//! `port_forward` nftables table; the full ruleset is persisted to the
//! system configuration after every change so forwards survive reboots.
//!
//! # Usage
//!
//! ```bash
//! # Interactive menu
//! pfwd
//!
//! # Non-interactive commands
//! pfwd add --family 4 --port 8080 --to 10.0.0.5          # remote port = 8080
//! pfwd add --family 6 --port 443 --to 2001:db8::1 --to-port 8443
//! pfwd clear --yes                                       # drop the whole table
//! pfwd show                                              # dump the live ruleset
//! ```
//!
//! # Security
//!
//! Runs as an unprivileged user and elevates only the approved system
//! binaries (nft, sysctl, systemctl, install). All inputs are validated
//! before elevation, and every privileged mutation lands in the audit log.

use clap::{Parser, Subcommand};
use pfwd::core::engine::NftCli;
use pfwd::core::forward::{AddrFamily, ForwardIntent};
use pfwd::core::service::Systemctl;
use pfwd::core::sysctl::{self, ProcSysctl};
use pfwd::core::table::{self, ClearOutcome};
use pfwd::menu::{self, Dispatcher};
use pfwd::settings::Settings;
use pfwd::{audit, elevation};
use std::process::ExitCode;

shadow_rs::shadow!(build);

#[derive(Parser)]
#[command(name = "pfwd")]
#[command(about = "Port forwarding manager for nftables", long_about = None)]
#[command(version = build::PKG_VERSION, long_version = build::CLAP_LONG_VERSION)]
struct Cli {
    /// Log level when PFWD_LOG is unset (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a port forward non-interactively
    Add {
        /// Address family: 4, v4, ipv4 or 6, v6, ipv6
        #[arg(short, long)]
        family: AddrFamily,
        /// Local port traffic arrives on
        #[arg(short, long)]
        port: u16,
        /// Remote address traffic is forwarded to
        #[arg(short, long, value_name = "ADDR")]
        to: String,
        /// Remote port (defaults to the local port)
        #[arg(long, value_name = "PORT")]
        to_port: Option<u16>,
    },
    /// Delete the port_forward table and all its rules
    Clear {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Show the current ruleset
    Show,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let settings = Settings::from_env();

    // Environment errors are fatal before any state is touched
    if let Err(msg) = startup_checks() {
        eprintln!("error: {msg}");
        return ExitCode::from(2);
    }

    match sysctl::ensure_prerequisites(&ProcSysctl, &settings) {
        Ok(report) => {
            for warning in &report.warnings {
                eprintln!("warning: {warning}");
            }
            if !report.appended.is_empty() {
                audit::log_sysctl(settings.audit_enabled, &report.appended, report.reloaded);
            }
        }
        Err(e) => {
            eprintln!("error: kernel prerequisites not satisfied: {e}");
            return ExitCode::from(2);
        }
    }

    let engine = NftCli;
    let service = Systemctl;

    match cli.command {
        Some(command) => match run_command(command, &engine, &service, &settings) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("error: {e}");
                ExitCode::FAILURE
            }
        },
        None => {
            let stdin = std::io::stdin();
            let stdout = std::io::stdout();
            Dispatcher::new(stdin.lock(), stdout.lock(), &engine, &service, &settings).run();
            ExitCode::SUCCESS
        }
    }
}

fn init_logging(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = std::env::var("PFWD_LOG")
        .ok()
        .and_then(|v| EnvFilter::try_new(v).ok())
        .or_else(|| EnvFilter::try_new(level).ok())
        .unwrap_or_else(|| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// One-time environment checks: privilege and firewall engine availability.
fn startup_checks() -> Result<(), String> {
    if !elevation::can_elevate() {
        return Err(
            "root privileges required (run as root, or install sudo/run0 for elevation)"
                .to_string(),
        );
    }

    if !elevation::engine_available() {
        eprintln!("warning: nft not found, attempting to install nftables");
        install_engine()?;
        if !elevation::engine_available() {
            return Err("nft still not found after package installation".to_string());
        }
    }

    Ok(())
}

/// Bounded recovery for a missing firewall engine: one install attempt via
/// the detected system package manager.
fn install_engine() -> Result<(), String> {
    let manager = elevation::detect_package_manager().ok_or_else(|| {
        "nft not found and no supported package manager available (apt-get, dnf, pacman)"
            .to_string()
    })?;

    let args: &[&str] = match manager {
        "pacman" => &["-S", "--noconfirm", "nftables"],
        _ => &["install", "-y", "nftables"],
    };

    let status = elevation::package_manager_command(manager, args)
        .map_err(|e| e.to_string())?
        .status()
        .map_err(|e| e.to_string())?;

    if status.success() {
        Ok(())
    } else {
        Err(format!("{manager} failed to install nftables"))
    }
}

fn run_command(
    command: Commands,
    engine: &NftCli,
    service: &Systemctl,
    settings: &Settings,
) -> pfwd::Result<()> {
    match command {
        Commands::Add {
            family,
            port,
            to,
            to_port,
        } => {
            let intent = ForwardIntent::new(family, port, to, to_port);
            intent.validate()?;

            let report = menu::apply_intent(engine, service, settings, &intent)?;
            for warning in &report.warnings {
                eprintln!("warning: {warning}");
            }
            println!(
                "forward {} -> {} installed and persisted",
                intent.local_port,
                intent.dnat_target()
            );
            print!("{}", table::list(engine)?);
        }
        Commands::Clear { yes } => {
            if !yes && !confirm_clear()? {
                println!("aborted, nothing changed");
                return Ok(());
            }
            match menu::clear_all(engine, service, settings)? {
                (ClearOutcome::Cleared, report) => {
                    println!("table and all rules cleared");
                    if let Some(report) = report {
                        for warning in &report.warnings {
                            eprintln!("warning: {warning}");
                        }
                    }
                }
                (ClearOutcome::NothingToClear, _) => {
                    println!("nothing to clear");
                }
            }
        }
        Commands::Show => {
            print!("{}", table::list(engine)?);
        }
    }
    Ok(())
}

fn confirm_clear() -> pfwd::Result<bool> {
    use std::io::Write;

    print!("Clear ALL forwarding rules? This deletes the entire port_forward table. [y/N]: ");
    std::io::stdout().flush()?;

    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    let answer = line.trim();
    Ok(answer == "y" || answer == "Y")
}
