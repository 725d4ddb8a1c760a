// SPDX-License-Identifier: Apache-2.0

//! Driver for the `iptables` CLI. `ensure_rule` is idempotent by rule spec:
//! it checks for the rule with `-C` before inserting it, matching the
//! original controller's `EnsureRule` contract (spec.md §4.4).

use std::process::Command;

use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum IptablesError {
    #[error("failed to spawn iptables: {0}")]
    Spawn(std::io::Error),
    #[error("iptables {operation} failed: {stderr}")]
    CommandFailed {
        operation: &'static str,
        stderr: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Nat,
}

impl Table {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Table::Nat => "nat",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RulePosition {
    Prepend,
    Append,
}

pub trait IptablesDriver: Send + Sync {
    /// Ensure a rule matching `spec` exists in `table`/`chain`, inserting it
    /// at `position` if missing. Returns `true` if the rule already existed.
    fn ensure_rule(
        &self,
        position: RulePosition,
        table: Table,
        chain: &str,
        spec: &[&str],
    ) -> Result<bool, IptablesError>;
}

#[derive(Debug, Default)]
pub struct ExecIptablesDriver;

impl ExecIptablesDriver {
    fn run(&self, operation: &'static str, args: &[&str]) -> Result<std::process::Output, IptablesError> {
        Command::new("iptables")
            .args(args)
            .output()
            .map_err(IptablesError::Spawn)
            .map_err(|e| {
                warn!(operation, error = %e, "failed to spawn iptables");
                e
            })
    }

    fn rule_exists(&self, table: Table, chain: &str, spec: &[&str]) -> Result<bool, IptablesError> {
        let mut args = vec!["-t", table.as_str(), "-C", chain];
        args.extend_from_slice(spec);
        let output = self.run("check", &args)?;
        Ok(output.status.success())
    }
}

impl IptablesDriver for ExecIptablesDriver {
    fn ensure_rule(
        &self,
        position: RulePosition,
        table: Table,
        chain: &str,
        spec: &[&str],
    ) -> Result<bool, IptablesError> {
        if self.rule_exists(table, chain, spec)? {
            return Ok(true);
        }
        let position_flag = match position {
            RulePosition::Prepend => "-I",
            RulePosition::Append => "-A",
        };
        let mut args = vec!["-t", table.as_str(), position_flag, chain];
        args.extend_from_slice(spec);
        let output = self.run("insert", &args)?;
        if output.status.success() {
            Ok(false)
        } else {
            Err(IptablesError::CommandFailed {
                operation: "insert",
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_renders_name() {
        assert_eq!(Table::Nat.as_str(), "nat");
    }
}
