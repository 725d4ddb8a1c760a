// SPDX-License-Identifier: Apache-2.0

//! Minimal `/proc/sys` accessor, mirroring the original controller's
//! `utils/sysctl` package.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

const SYSCTL_BASE: &str = "/proc/sys";

#[derive(Debug, Error)]
pub enum SysctlError {
    #[error("failed to read sysctl {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write sysctl {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("sysctl {path} has non-integer value {value:?}")]
    NotAnInteger { path: PathBuf, value: String },
}

fn path_for(key: &str) -> PathBuf {
    Path::new(SYSCTL_BASE).join(key.replace('.', "/"))
}

pub fn get_sysctl(key: &str) -> Result<i64, SysctlError> {
    let path = path_for(key);
    let data = std::fs::read_to_string(&path).map_err(|source| SysctlError::Read {
        path: path.clone(),
        source,
    })?;
    data.trim()
        .parse()
        .map_err(|_| SysctlError::NotAnInteger {
            path,
            value: data.trim().to_string(),
        })
}

pub fn set_sysctl(key: &str, value: i64) -> Result<(), SysctlError> {
    let path = path_for(key);
    std::fs::write(&path, value.to_string()).map_err(|source| SysctlError::Write { path, source })
}

/// Set `key` to `value` iff it does not already hold it.
pub fn ensure_sysctl(key: &str, value: i64) -> Result<(), SysctlError> {
    let current = get_sysctl(key)?;
    if current != value {
        set_sysctl(key, value)?;
        info!(sysctl = key, from = current, to = value, "changed sysctl");
    }
    Ok(())
}

/// Indirection over `/proc/sys` so callers can swap in a fake for tests,
/// mirroring the `IpsetDriver`/`IptablesDriver` seams.
pub trait SysctlDriver: Send + Sync {
    fn ensure(&self, key: &str, value: i64) -> Result<(), SysctlError>;
}

/// The real `/proc/sys` backed implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcSysctlDriver;

impl SysctlDriver for ProcSysctlDriver {
    fn ensure(&self, key: &str, value: i64) -> Result<(), SysctlError> {
        ensure_sysctl(key, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_for_translates_dots_to_slashes() {
        assert_eq!(
            path_for("net.ipv4.vs.conntrack"),
            PathBuf::from("/proc/sys/net/ipv4/vs/conntrack")
        );
    }
}
