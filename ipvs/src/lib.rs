// SPDX-License-Identifier: Apache-2.0

//! IPVS virtual/real server types and the driver trait the LVS adaptor
//! reconciles against (spec.md §4.3).

mod kernel;
mod types;

pub use kernel::{KernelIpvsDriver, KernelIpvsError};
pub use types::{RealServer, ServiceFlags, VirtualServer};

use std::net::Ipv4Addr;

use api::L4Protocol;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IpvsError {
    #[error("netlink transport error: {0}")]
    Kernel(#[from] KernelIpvsError),
    #[error("virtual server {0}:{1}/{2:?} not found")]
    NotFound(Ipv4Addr, u16, L4Protocol),
}

/// Abstracts the kernel IPVS table behind the operations the LVS adaptor
/// needs. Implementations must be safe for concurrent calls (spec.md §4.3) —
/// this controller drives one instance from several concurrently-running
/// reconciliation ticks.
pub trait IpvsDriver: Send + Sync {
    /// Remove every virtual server the kernel knows about. Errors on the
    /// first failure.
    fn flush(&self) -> Result<(), IpvsError>;

    fn add_virtual_server(&self, vs: &VirtualServer) -> Result<(), IpvsError>;

    /// Errors if `vs` does not already exist.
    fn update_virtual_server(&self, vs: &VirtualServer) -> Result<(), IpvsError>;

    /// Errors if `vs` does not exist.
    fn delete_virtual_server(&self, vs: &VirtualServer) -> Result<(), IpvsError>;

    /// Look up a virtual server by `(address, protocol, port)`.
    fn get_virtual_server(
        &self,
        address: Ipv4Addr,
        protocol: L4Protocol,
        port: u16,
    ) -> Result<VirtualServer, IpvsError>;

    fn get_virtual_servers(&self) -> Result<Vec<VirtualServer>, IpvsError>;

    fn add_real_server(&self, vs: &VirtualServer, rs: &RealServer) -> Result<(), IpvsError>;

    fn delete_real_server(&self, vs: &VirtualServer, rs: &RealServer) -> Result<(), IpvsError>;

    fn get_real_servers(&self, vs: &VirtualServer) -> Result<Vec<RealServer>, IpvsError>;
}
