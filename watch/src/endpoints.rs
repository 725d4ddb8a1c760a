// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use k8s_openapi::api::core::v1::Endpoints;
use kube::Api;
use kube::runtime::watcher;

use crate::handler::EndpointsHandler;
use crate::reflect::{TypedStore, WatchError, drive};

/// Watches all `Endpoints` cluster-wide, unfiltered — the LVS/HAProxy
/// adaptors decide which ones matter by cross-referencing `LoadBalancer`
/// service names. Ground: `original_source/watch/endpoint.go`'s
/// `EndpointsWatcher`.
pub struct EndpointsWatcher {
    store: Arc<TypedStore<Endpoints>>,
}

impl Default for EndpointsWatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EndpointsWatcher {
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: Arc::new(TypedStore::new()),
        }
    }

    #[must_use]
    pub fn list(&self) -> Vec<Arc<Endpoints>> {
        self.store.list()
    }

    #[must_use]
    pub fn has_synced(&self) -> bool {
        self.store.has_synced()
    }

    /// Runs until the watch stream ends or errors (T2 in spec.md §5).
    pub async fn run(&self, api: Api<Endpoints>, handler: Arc<dyn EndpointsHandler>) -> Result<(), WatchError> {
        let on_add_handler = Arc::clone(&handler);
        let on_update_handler = Arc::clone(&handler);
        let on_delete_handler = handler;
        drive(
            api,
            watcher::Config::default(),
            Arc::clone(&self.store),
            move |ep| on_add_handler.add_endpoints(ep),
            move |old, new| on_update_handler.update_endpoints(old, new),
            move |ep| on_delete_handler.delete_endpoints(ep),
        )
        .await
    }
}
