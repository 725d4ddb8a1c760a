// SPDX-License-Identifier: Apache-2.0

//! The `LoadBalance` facade (spec.md §4.8): one contract, two data-plane
//! backends. The reconciler talks to whichever backend `--lbtype` selected
//! without knowing which one it is.

mod haproxy_lb;
mod lvs_lb;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Endpoints, Service};
use tokio::sync::watch;

pub use haproxy_lb::HaproxyLb;
pub use lvs_lb::LvsLb;

/// Picks one of `{LVS, HAProxy}` behind a common API (spec.md §4.8, C8).
#[async_trait]
pub trait LoadBalance: Send + Sync {
    /// `true` for LVS (real/virtual servers are diffed in place), `false`
    /// for HAProxy (the whole config is rebuilt and atomically swapped).
    fn supports_incremental_update(&self) -> bool;

    /// Project the current `(lbSvcs, endpoints)` snapshot onto the data
    /// plane. For LVS this programs the kernel directly; for HAProxy this
    /// renders a new config and hands it to the supervisor task.
    fn build(&self, lb_svcs: &[Service], endpoints: &[Endpoints]);

    /// Blocking backend runner loop (T4 in spec.md §5). A no-op for LVS,
    /// which has nothing left to do once `build` returns; the HAProxy
    /// supervisor event loop for the HAProxy backend.
    async fn run(&self, stop: watch::Receiver<bool>);
}
