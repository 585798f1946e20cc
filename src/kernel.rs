//! Kernel command execution
//!
//! Every interaction with the host network stack goes through a [`Runner`]
//! executing a [`KernelCommand`]. The live kernel is the only source of
//! truth, so nothing here caches results.

pub mod parse;
pub mod state;

#[cfg(test)]
pub mod sim;

pub use state::KernelState;

use crate::error::{Error, Result};
use crate::manifest::GlobalConfig;
use std::fmt;
use std::process::Command;

/// Userspace tool used to talk to the kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    /// iproute2 `ip`
    Ip,
    /// `iptables`
    Iptables,
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tool::Ip => write!(f, "ip"),
            Tool::Iptables => write!(f, "iptables"),
        }
    }
}

/// A single command against the host or a namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelCommand {
    pub tool: Tool,
    /// Namespace to run in (`ip netns exec <ns> ...`), host if `None`
    pub netns: Option<String>,
    pub args: Vec<String>,
}

impl KernelCommand {
    /// `ip <args>` on the host
    pub fn ip<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tool: Tool::Ip,
            netns: None,
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// `iptables <args>` on the host
    pub fn iptables<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tool: Tool::Iptables,
            netns: None,
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Run this command inside a network namespace
    pub fn in_netns(mut self, netns: &str) -> Self {
        self.netns = Some(netns.to_string());
        self
    }
}

impl fmt::Display for KernelCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ns) = &self.netns {
            write!(f, "ip netns exec {} ", ns)?;
        }
        write!(f, "{}", self.tool)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Captured result of a kernel command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Exit code (`None` if killed by a signal)
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Turn a nonzero exit into `KernelCommandFailed`, keeping stderr verbatim
    pub fn check(self, command: &KernelCommand) -> Result<Self> {
        if self.success() {
            return Ok(self);
        }

        let status = match self.status {
            Some(code) => format!("exit {}", code),
            None => "killed by signal".to_string(),
        };

        Err(Error::KernelCommandFailed {
            command: command.to_string(),
            status,
            stderr: self.stderr.trim().to_string(),
        })
    }
}

/// Executes kernel commands
pub trait Runner {
    /// Run a command; `Err` only if it could not be started at all
    fn run(&self, command: &KernelCommand) -> Result<CommandOutput>;

    /// Run a command and fail on nonzero exit
    fn run_checked(&self, command: &KernelCommand) -> Result<CommandOutput> {
        self.run(command)?.check(command)
    }
}

/// Runner that spawns the real `ip` / `iptables` binaries
#[derive(Debug, Clone)]
pub struct SystemRunner {
    ip: String,
    iptables: String,
}

impl SystemRunner {
    pub fn new(config: &GlobalConfig) -> Self {
        Self {
            ip: config.ip.clone(),
            iptables: config.iptables.clone(),
        }
    }

    fn binary(&self, tool: Tool) -> &str {
        match tool {
            Tool::Ip => &self.ip,
            Tool::Iptables => &self.iptables,
        }
    }
}

impl Runner for SystemRunner {
    fn run(&self, command: &KernelCommand) -> Result<CommandOutput> {
        tracing::debug!(command = %command, "running kernel command");

        let mut cmd = match &command.netns {
            Some(ns) => {
                let mut cmd = Command::new(&self.ip);
                cmd.args(["netns", "exec", ns, self.binary(command.tool)]);
                cmd
            }
            None => Command::new(self.binary(command.tool)),
        };
        cmd.args(&command.args);

        let output = cmd.output().map_err(|e| Error::CommandSpawn {
            command: command.to_string(),
            source: e,
        })?;

        let result = CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };

        if !result.success() {
            tracing::debug!(
                command = %command,
                status = ?result.status,
                stderr = %result.stderr.trim(),
                "kernel command returned nonzero"
            );
        }

        Ok(result)
    }
}
