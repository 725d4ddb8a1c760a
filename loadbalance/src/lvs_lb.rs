// SPDX-License-Identifier: Apache-2.0

use k8s_openapi::api::core::v1::{Endpoints, Service};
use tokio::sync::watch;
use tracing::{debug, warn};

use async_trait::async_trait;
use lvs::LvsAdaptor;

use crate::LoadBalance;

/// The LVS-backed `LoadBalance` implementation: `build` programs the kernel
/// directly and supports incremental (diff-only) updates, so `run` has
/// nothing left to do.
pub struct LvsLb {
    adaptor: LvsAdaptor,
}

impl LvsLb {
    #[must_use]
    pub fn new(adaptor: LvsAdaptor) -> Self {
        Self { adaptor }
    }
}

#[async_trait]
impl LoadBalance for LvsLb {
    fn supports_incremental_update(&self) -> bool {
        true
    }

    fn build(&self, lb_svcs: &[Service], endpoints: &[Endpoints]) {
        let report = self.adaptor.build(lb_svcs, endpoints);
        if report.warnings.is_empty() {
            debug!(?report, "lvs build cycle converged");
        } else {
            warn!(?report, "lvs build cycle completed with warnings");
        }
    }

    async fn run(&self, mut stop: watch::Receiver<bool>) {
        let _ = stop.changed().await;
    }
}
