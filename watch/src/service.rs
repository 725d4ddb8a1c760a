// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use k8s_openapi::api::core::v1::Service;
use kube::Api;
use kube::runtime::watcher;

use crate::handler::ServiceHandler;
use crate::reflect::{TypedStore, WatchError, drive};

/// Watches `LoadBalancer`-typed services cluster-wide. Ground:
/// `original_source/watch/service.go`'s `ServiceWatcher`.
///
/// The server-side `spec.type=LoadBalancer` field selector means a service
/// that changes away from `LoadBalancer` simply stops matching the watch
/// and arrives here as a delete — which is exactly the "revoke this
/// service's ports" signal the reconciler needs (spec.md §4.10).
pub struct ServiceWatcher {
    store: Arc<TypedStore<Service>>,
}

impl Default for ServiceWatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceWatcher {
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: Arc::new(TypedStore::new()),
        }
    }

    #[must_use]
    pub fn list(&self) -> Vec<Arc<Service>> {
        self.store.list()
    }

    #[must_use]
    pub fn has_synced(&self) -> bool {
        self.store.has_synced()
    }

    /// Runs until the watch stream ends or errors. Intended to be driven
    /// from a dedicated task (T1 in spec.md §5).
    pub async fn run(&self, api: Api<Service>, handler: Arc<dyn ServiceHandler>) -> Result<(), WatchError> {
        let config = watcher::Config::default().fields("spec.type=LoadBalancer");
        let on_add_handler = Arc::clone(&handler);
        let on_update_handler = Arc::clone(&handler);
        let on_delete_handler = handler;
        drive(
            api,
            config,
            Arc::clone(&self.store),
            move |svc| on_add_handler.add_service(svc),
            move |old, new| on_update_handler.update_service(old, new),
            move |svc| on_delete_handler.delete_service(svc),
        )
        .await
    }
}
