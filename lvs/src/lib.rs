// SPDX-License-Identifier: Apache-2.0

//! The LVS adaptor: the core reconciliation algorithm that keeps the kernel
//! IPVS table, the VIP ipset, and the MASQUERADE iptables rules in sync with
//! a snapshot of `LoadBalancer` services and their endpoints (spec.md §4.5).

mod adaptor;
mod desired;

pub use adaptor::{BuildReport, LvsAdaptor, LvsRequirement};
pub use ipvs::{IpvsDriver, IpvsError, RealServer, ServiceFlags, VirtualServer};
