//! vpcctl - single-host VPC fabric
//!
//! Builds isolated virtual networks from network namespaces, bridges, veth
//! pairs and iptables rules. The kernel is the only source of truth; nothing
//! is persisted between runs.

mod cli;
mod error;
mod fabric;
mod firewall;
mod kernel;
mod lock;
mod manifest;
mod naming;
mod network;
mod policy;
mod topology;

use cli::{Cli, Commands};
use error::Result;
use fabric::{Fabric, Operation, Report};
use kernel::SystemRunner;
use lock::FabricLock;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    match run() {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Run the CLI; `Ok(false)` means the operation finished without succeeding
fn run() -> Result<bool> {
    let cli = Cli::parse_args();

    if let Commands::Completion { shell } = cli.command {
        Cli::generate_completion(shell);
        return Ok(true);
    }

    let (config_path, explicit) = cli.config_path();
    let config = manifest::load(&config_path, explicit)?;
    init_logging(cli.verbose, &config.config.log_level);

    if !nix::unistd::geteuid().is_root() {
        tracing::warn!("not running as root; kernel commands will likely be refused");
    }

    let _lock = if cli.command.is_mutating() {
        Some(FabricLock::acquire(&config.config.lock_file)?)
    } else {
        None
    };

    let runner = SystemRunner::new(&config.config);
    let fabric = Fabric::new(&runner);

    match cli.command {
        Commands::CreateVpc { name, cidr } => {
            let report = fabric
                .create_vpc(&name, &cidr)
                .map_err(|e| e.during(Operation::CreateVpc, &name))?;
            finish(report)
        }
        Commands::AddSubnet {
            vpc,
            name,
            cidr,
            visibility,
        } => {
            let report = fabric
                .add_subnet(&vpc, &name, &cidr, visibility)
                .map_err(|e| e.during(Operation::AddSubnet, &name))?;
            finish(report)
        }
        Commands::PeerVpcs { vpc_a, vpc_b } => {
            let report = fabric
                .peer_vpcs(&vpc_a, &vpc_b)
                .map_err(|e| e.during(Operation::PeerVpcs, format!("{}<->{}", vpc_a, vpc_b)))?;
            finish(report)
        }
        Commands::ApplyFirewall { policy } => {
            let report = fabric
                .apply_firewall(&policy)
                .map_err(|e| e.during(Operation::ApplyFirewall, policy.display().to_string()))?;
            finish(report)
        }
        Commands::DeleteVpc { name } => {
            let report = fabric
                .delete_vpc(&name)
                .map_err(|e| e.during(Operation::DeleteVpc, &name))?;
            finish(report)
        }
        Commands::ListVpcs { json } => {
            let views = fabric
                .list_vpcs()
                .map_err(|e| e.during(Operation::ListVpcs, "*"))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&views)?);
            } else if views.is_empty() {
                println!("No VPCs found.");
            } else {
                print!("{}", fabric::render_table(&views));
            }
            Ok(true)
        }
        Commands::ShowVpc { name, json } => {
            let view = fabric
                .show_vpc(&name)
                .map_err(|e| e.during(Operation::ShowVpc, &name))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&view)?);
            } else {
                print!("{}", fabric::render_vpc(&view));
            }
            Ok(true)
        }
        Commands::Completion { .. } => Ok(true),
    }
}

/// Print a report and turn its outcome into the exit status
fn finish(report: Report) -> Result<bool> {
    print!("{}", report.render());

    if let Some(e) = report.teardown_failure() {
        return Err(e);
    }
    Ok(report.outcome.is_ok())
}

/// Log to stderr; VPCCTL_LOG overrides -v, which overrides the config level
fn init_logging(verbose: bool, config_level: &str) {
    let default = if verbose { "debug" } else { config_level };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_env("VPCCTL_LOG").unwrap_or_else(|_| EnvFilter::new(default)))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}
