// SPDX-License-Identifier: Apache-2.0

//! ipset/iptables drivers and sysctl helper the LVS adaptor uses to keep the
//! VIP's MARK/MASQUERADE rules and membership set in sync (spec.md §4.4,
//! §4.5 preconditions).

pub mod ipset;
pub mod iptables;
pub mod rules;
pub mod sysctl;

pub use ipset::{Entry as IpsetEntry, ExecIpsetDriver, IpsetDriver, IpsetError, SetType};
pub use iptables::{ExecIptablesDriver, IptablesDriver, IptablesError, RulePosition, Table};
pub use rules::{VIP_VPORT_SET, diff_entries, ensure_base_rules};
pub use sysctl::{ProcSysctlDriver, SysctlDriver, SysctlError, ensure_sysctl};
