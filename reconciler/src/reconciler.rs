// SPDX-License-Identifier: Apache-2.0

//! The reconciler / sync loop (spec.md §4.9, C9): the only writer of
//! data-plane state, driven by a coalescing channel fed from watch
//! callbacks plus a safety-net tick.

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use k8s_openapi::api::core::v1::{Endpoints, Service};
use kube::Client;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use loadbalance::LoadBalance;
use watch::{EndpointsHandler, EndpointsWatcher, ServiceHandler, ServiceWatcher};

use crate::allocator::{ProtocolAllocators, filter_and_allocate_ports};
use crate::patch::update_svcs;
use crate::skip::skip_service_update;
use api::binded_port_annotation;

/// Coalescing signal capacity (spec.md §4.9: "capacity 2 recommended").
const SYNC_CHAN_CAPACITY: usize = 2;

/// Safety-net full-resync period (spec.md §4.9, §7).
const TICK_PERIOD: Duration = Duration::from_secs(60);

const STARTUP_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct Reconciler {
    services: Arc<ServiceWatcher>,
    endpoints: Arc<EndpointsWatcher>,
    lb: Arc<dyn LoadBalance>,
    allocators: Arc<ProtocolAllocators>,
    vip: Ipv4Addr,
    client: Client,
    sync_tx: mpsc::Sender<()>,
    sync_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl Reconciler {
    #[must_use]
    pub fn new(
        services: Arc<ServiceWatcher>,
        endpoints: Arc<EndpointsWatcher>,
        lb: Arc<dyn LoadBalance>,
        allocators: Arc<ProtocolAllocators>,
        vip: Ipv4Addr,
        client: Client,
    ) -> Self {
        let (sync_tx, sync_rx) = mpsc::channel(SYNC_CHAN_CAPACITY);
        Self {
            services,
            endpoints,
            lb,
            allocators,
            vip,
            client,
            sync_tx,
            sync_rx: Mutex::new(Some(sync_rx)),
        }
    }

    /// Non-blocking coalescing send (spec.md §4.9 "Event → sync coupling").
    /// A full channel means a reconciliation is already pending; the signal
    /// is safely dropped.
    fn maybe_sync(&self) {
        let _ = self.sync_tx.try_send(());
    }

    async fn sync_once(&self) {
        let lb_svcs: Vec<Service> = self.services.list().iter().map(|s| s.as_ref().clone()).collect();
        let endpoints: Vec<Endpoints> = self.endpoints.list().iter().map(|e| e.as_ref().clone()).collect();

        let (filtered, needs_update) = filter_and_allocate_ports(&lb_svcs, &self.allocators, self.vip);
        debug!(
            services = filtered.len(),
            endpoints = endpoints.len(),
            patches = needs_update.len(),
            "reconciliation cycle"
        );
        self.lb.build(&filtered, &endpoints);
        update_svcs(&self.client, needs_update).await;
    }

    /// Wait for both watch caches to sync, then run the sync loop until the
    /// coalescing channel closes (spec.md §4.9 Startup).
    ///
    /// # Panics
    ///
    /// Panics if called more than once on the same `Reconciler`.
    pub async fn run(&self) {
        info!("waiting for watch caches to sync");
        loop {
            if self.services.has_synced() && self.endpoints.has_synced() {
                break;
            }
            tokio::time::sleep(STARTUP_POLL_INTERVAL).await;
        }
        info!("watch caches synced, entering reconciliation loop");

        let mut rx = self
            .sync_rx
            .lock()
            .unwrap()
            .take()
            .expect("Reconciler::run called more than once");
        self.maybe_sync();

        let mut ticker = tokio::time::interval(TICK_PERIOD);
        ticker.tick().await; // first tick is immediate; the initial signal above already covers it

        loop {
            tokio::select! {
                signal = rx.recv() => {
                    if signal.is_none() {
                        warn!("sync channel closed, stopping reconciler");
                        return;
                    }
                }
                _ = ticker.tick() => {}
            }
            self.sync_once().await;
        }
    }
}

impl ServiceHandler for Reconciler {
    fn add_service(&self, _svc: &Service) {
        self.maybe_sync();
    }

    fn delete_service(&self, svc: &Service) {
        if let Some(bound) = binded_port_annotation(svc) {
            self.allocators.revoke_all(&bound);
        }
        self.maybe_sync();
    }

    fn update_service(&self, old: &Service, new: &Service) {
        if skip_service_update(old, new) {
            return;
        }
        self.maybe_sync();
    }
}

impl EndpointsHandler for Reconciler {
    fn add_endpoints(&self, _ep: &Endpoints) {
        self.maybe_sync();
    }

    fn delete_endpoints(&self, _ep: &Endpoints) {
        self.maybe_sync();
    }

    fn update_endpoints(&self, _old: &Endpoints, _new: &Endpoints) {
        self.maybe_sync();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn annotated_service(name: &str, binded_port: &str) -> Service {
        let mut annotations = BTreeMap::new();
        annotations.insert(
            api::annotations::ANNOTATION_BINDED_PORT.to_string(),
            binded_port.to_string(),
        );
        Service {
            metadata: ObjectMeta {
                namespace: Some("default".to_string()),
                name: Some(name.to_string()),
                annotations: Some(annotations.into_iter().collect()),
                ..Default::default()
            },
            spec: None,
            status: None,
        }
    }

    #[test]
    fn delete_service_revokes_its_annotated_ports() {
        let allocators = ProtocolAllocators::new(29000, 29999).unwrap();
        let svc = annotated_service("web", "29000;");

        assert!(allocators.get(api::L4Protocol::Tcp).allocated(29000));

        if let Some(bound) = binded_port_annotation(&svc) {
            allocators.revoke_all(&bound);
        }

        assert!(
            allocators.get(api::L4Protocol::Tcp).allocated(29000),
            "port must be free after revocation"
        );
    }
}
