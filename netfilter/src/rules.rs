// SPDX-License-Identifier: Apache-2.0

//! The constant MARK/MASQUERADE rule set and ipset name the LVS adaptor
//! depends on (spec.md §4.5), plus the pure entry-diffing helper it drives.

use std::collections::HashSet;

use crate::iptables::{IptablesDriver, IptablesError, RulePosition, Table};

pub const VIP_VPORT_SET: &str = "bmlb-vip-vport";
const MARK: &str = "0x4000/0x4000";

struct ConstRule {
    position: RulePosition,
    chain: &'static str,
    spec: &'static [&'static str],
}

const CONST_RULES: &[ConstRule] = &[
    ConstRule {
        position: RulePosition::Prepend,
        chain: "OUTPUT",
        spec: &[
            "-p", "all", "-m", "set", "--match-set", VIP_VPORT_SET, "dst,dst", "-j", "MARK",
            "--set-xmark", MARK,
        ],
    },
    ConstRule {
        position: RulePosition::Prepend,
        chain: "PREROUTING",
        spec: &[
            "-p", "all", "-m", "set", "--match-set", VIP_VPORT_SET, "dst,dst", "-j", "MARK",
            "--set-xmark", MARK,
        ],
    },
    ConstRule {
        position: RulePosition::Prepend,
        chain: "POSTROUTING",
        spec: &["-m", "mark", "--mark", MARK, "-j", "MASQUERADE"],
    },
];

/// Ensure the three nat-table rules that route marked VIP traffic through
/// MASQUERADE exist. Every failure is best-effort: logged by the caller and
/// collected here rather than aborting (spec.md §4.5 failure semantics).
pub fn ensure_base_rules(iptables: &dyn IptablesDriver) -> Vec<IptablesError> {
    CONST_RULES
        .iter()
        .filter_map(|rule| {
            iptables
                .ensure_rule(rule.position, Table::Nat, rule.chain, rule.spec)
                .err()
        })
        .collect()
}

/// Diff `existing` ipset members against `expected`. When `remove_old` is
/// set, members present in `existing` but absent from `expected` are
/// returned for deletion; when clear, stale members are left alone (spec.md
/// §4.5.1).
#[must_use]
pub fn diff_entries(
    existing: &[String],
    expected: &HashSet<String>,
    remove_old: bool,
) -> (Vec<String>, Vec<String>) {
    let mut to_add: HashSet<String> = expected.clone();
    let mut to_remove = Vec::new();
    for entry in existing {
        if expected.contains(entry) {
            to_add.remove(entry);
        } else if remove_old {
            to_remove.push(entry.clone());
        }
    }
    (to_add.into_iter().collect(), to_remove)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_adds_missing_and_removes_stale_when_enabled() {
        let existing = vec!["10.0.0.1,tcp:80".to_string(), "10.0.0.1,tcp:81".to_string()];
        let expected: HashSet<String> = ["10.0.0.1,tcp:80".to_string(), "10.0.0.1,tcp:443".to_string()]
            .into_iter()
            .collect();
        let (to_add, to_remove) = diff_entries(&existing, &expected, true);
        assert_eq!(to_add, vec!["10.0.0.1,tcp:443".to_string()]);
        assert_eq!(to_remove, vec!["10.0.0.1,tcp:81".to_string()]);
    }

    #[test]
    fn diff_leaves_stale_entries_when_remove_old_is_disabled() {
        let existing = vec!["10.0.0.1,tcp:81".to_string()];
        let expected: HashSet<String> = HashSet::new();
        let (to_add, to_remove) = diff_entries(&existing, &expected, false);
        assert!(to_add.is_empty());
        assert!(to_remove.is_empty());
    }
}
