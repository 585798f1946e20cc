//! Command-line interface for vpcctl
//!
//! Uses clap with derive for type-safe CLI parsing

use crate::firewall::Visibility;
use crate::manifest::DEFAULT_CONFIG_PATH;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// vpcctl - single-host VPCs from namespaces, bridges and veth pairs
#[derive(Parser)]
#[command(name = "vpcctl")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path [default: vpcctl.toml]
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Create a VPC bridge carrying the gateway address
    CreateVpc {
        /// VPC name
        name: String,

        /// Gateway address with the VPC prefix (e.g., 10.0.0.1/16)
        cidr: String,
    },

    /// Add a subnet namespace to a VPC
    AddSubnet {
        /// VPC name
        vpc: String,

        /// Subnet name (also the namespace name)
        name: String,

        /// Subnet in CIDR notation (e.g., 10.0.1.0/24)
        cidr: String,

        /// Subnet visibility
        #[arg(long = "type", value_enum, default_value_t = Visibility::Private)]
        visibility: Visibility,
    },

    /// Peer two VPCs
    PeerVpcs {
        /// First VPC
        vpc_a: String,

        /// Second VPC
        vpc_b: String,
    },

    /// Apply a JSON firewall policy file to subnet namespaces
    ApplyFirewall {
        /// Policy file path
        policy: PathBuf,
    },

    /// Delete a VPC with its subnets, peering link and rules
    DeleteVpc {
        /// VPC name
        name: String,
    },

    /// List VPCs
    ListVpcs {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show one VPC and its subnets
    ShowVpc {
        /// VPC name
        name: String,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts
    Completion {
        /// Shell to generate completion for
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Commands {
    /// Whether the command changes kernel state and needs the fabric lock
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Commands::CreateVpc { .. }
                | Commands::AddSubnet { .. }
                | Commands::PeerVpcs { .. }
                | Commands::ApplyFirewall { .. }
                | Commands::DeleteVpc { .. }
        )
    }
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Config path and whether it was given explicitly
    pub fn config_path(&self) -> (PathBuf, bool) {
        match &self.config {
            Some(path) => (path.clone(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        }
    }

    /// Generate shell completion scripts
    pub fn generate_completion(shell: Shell) {
        let mut cmd = Self::command();
        clap_complete::generate(shell, &mut cmd, "vpcctl", &mut std::io::stdout());
    }
}
