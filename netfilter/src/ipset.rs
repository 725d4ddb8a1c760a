// SPDX-License-Identifier: Apache-2.0

//! Driver for the `ipset` CLI, used to maintain the `bmlb-vip-vport`
//! membership set the MARK/MASQUERADE rules match against (spec.md §4.4).

use std::net::Ipv4Addr;
use std::process::Command;

use thiserror::Error;
use tracing::warn;

use api::L4Protocol;

#[derive(Debug, Error)]
pub enum IpsetError {
    #[error("failed to spawn ipset: {0}")]
    Spawn(std::io::Error),
    #[error("ipset {operation} failed: {stderr}")]
    CommandFailed { operation: &'static str, stderr: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetType {
    HashIpPort,
}

impl SetType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SetType::HashIpPort => "hash:ip,port",
        }
    }
}

/// One `hash:ip,port` member. Stringifies as `"ip,proto:port"` (spec.md
/// §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub address: Ipv4Addr,
    pub protocol: L4Protocol,
    pub port: u16,
}

impl std::fmt::Display for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{},{}:{}",
            self.address,
            self.protocol.as_str().to_lowercase(),
            self.port
        )
    }
}

pub trait IpsetDriver: Send + Sync {
    /// Create the named set if it does not exist. `ignore_existing = true`
    /// makes an existing set with the same parameters a success rather than
    /// an error.
    fn create_set(&self, name: &str, set_type: SetType, ignore_existing: bool) -> Result<(), IpsetError>;

    fn list_entries(&self, name: &str) -> Result<Vec<String>, IpsetError>;

    fn add_entry(&self, entry: &str, name: &str, ignore_existing: bool) -> Result<(), IpsetError>;

    fn del_entry(&self, entry: &str, name: &str) -> Result<(), IpsetError>;
}

/// Shells out to the system `ipset` binary, the same approach the original
/// controller took via `k8s.io/utils/exec`.
#[derive(Debug, Default)]
pub struct ExecIpsetDriver;

impl ExecIpsetDriver {
    fn run(&self, operation: &'static str, args: &[&str]) -> Result<std::process::Output, IpsetError> {
        Command::new("ipset")
            .args(args)
            .output()
            .map_err(IpsetError::Spawn)
            .map_err(|e| {
                warn!(operation, error = %e, "failed to spawn ipset");
                e
            })
    }
}

impl IpsetDriver for ExecIpsetDriver {
    fn create_set(&self, name: &str, set_type: SetType, ignore_existing: bool) -> Result<(), IpsetError> {
        let mut args = vec!["create", name, set_type.as_str()];
        if ignore_existing {
            args.push("-exist");
        }
        let output = self.run("create", &args)?;
        if output.status.success() {
            Ok(())
        } else {
            Err(IpsetError::CommandFailed {
                operation: "create",
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }

    fn list_entries(&self, name: &str) -> Result<Vec<String>, IpsetError> {
        let output = self.run("list", &["list", name, "-output", "plain"])?;
        if !output.status.success() {
            return Err(IpsetError::CommandFailed {
                operation: "list",
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut entries = Vec::new();
        let mut in_members = false;
        for line in stdout.lines() {
            if in_members {
                if !line.trim().is_empty() {
                    entries.push(line.trim().to_string());
                }
            } else if line.trim_start().starts_with("Members:") {
                in_members = true;
            }
        }
        Ok(entries)
    }

    fn add_entry(&self, entry: &str, name: &str, ignore_existing: bool) -> Result<(), IpsetError> {
        let mut args = vec!["add", name, entry];
        if ignore_existing {
            args.push("-exist");
        }
        let output = self.run("add", &args)?;
        if output.status.success() {
            Ok(())
        } else {
            Err(IpsetError::CommandFailed {
                operation: "add",
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }

    fn del_entry(&self, entry: &str, name: &str) -> Result<(), IpsetError> {
        let output = self.run("del", &["del", name, entry])?;
        if output.status.success() {
            Ok(())
        } else {
            Err(IpsetError::CommandFailed {
                operation: "del",
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_stringifies_as_ip_proto_port() {
        let entry = Entry {
            address: Ipv4Addr::new(10, 0, 0, 5),
            protocol: L4Protocol::Tcp,
            port: 8080,
        };
        assert_eq!(entry.to_string(), "10.0.0.5,tcp:8080");
    }

    #[test]
    fn set_type_renders_hash_ip_port() {
        assert_eq!(SetType::HashIpPort.as_str(), "hash:ip,port");
    }
}
