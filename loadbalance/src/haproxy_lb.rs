// SPDX-License-Identifier: Apache-2.0

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Endpoints, Service};
use tokio::sync::{mpsc, watch};
use tracing::warn;

use haproxy::HaproxySupervisor;

use crate::LoadBalance;

/// The HAProxy-backed `LoadBalance` implementation: `build` renders a whole
/// new config and hands it to the supervisor task over a bounded channel;
/// `run` drives that supervisor until told to stop.
pub struct HaproxyLb {
    supervisor: Arc<HaproxySupervisor>,
    tx: mpsc::Sender<Vec<u8>>,
    rx: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    bind_ip: String,
}

impl HaproxyLb {
    #[must_use]
    pub fn new(supervisor: Arc<HaproxySupervisor>, bind_ip: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::channel(2);
        Self {
            supervisor,
            tx,
            rx: Mutex::new(Some(rx)),
            bind_ip: bind_ip.into(),
        }
    }
}

#[async_trait]
impl LoadBalance for HaproxyLb {
    fn supports_incremental_update(&self) -> bool {
        false
    }

    fn build(&self, lb_svcs: &[Service], endpoints: &[Endpoints]) {
        let config = haproxy::render(lb_svcs, endpoints, &self.bind_ip);
        if let Err(e) = self.tx.try_send(config.into_bytes()) {
            warn!(error = %e, "dropping haproxy config buffer, supervisor is behind");
        }
    }

    async fn run(&self, stop: watch::Receiver<bool>) {
        let Some(rx) = self.rx.lock().unwrap().take() else {
            warn!("HaproxyLb::run called more than once");
            return;
        };
        self.supervisor.clone().run(rx, stop).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_supervisor(dir: &std::path::Path) -> Arc<HaproxySupervisor> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let script = dir.join("fake-haproxy.sh");
            std::fs::write(&script, "#!/bin/sh\nexit 0\n").unwrap();
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
            Arc::new(HaproxySupervisor::new(script, dir.join("haproxy.cfg"), dir.join("haproxy.pid")))
        }
        #[cfg(not(unix))]
        {
            Arc::new(HaproxySupervisor::new("/bin/true", dir.join("haproxy.cfg"), dir.join("haproxy.pid")))
        }
    }

    #[tokio::test]
    async fn build_forwards_rendered_config_to_supervisor_run_loop() {
        let dir = std::env::temp_dir().join(format!("bmlb-haproxy-lb-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let supervisor = fake_supervisor(&dir);
        let lb = HaproxyLb::new(Arc::clone(&supervisor), "0.0.0.0");
        assert!(!lb.supports_incremental_update());

        lb.build(&[], &[]);

        let (stop_tx, stop_rx) = watch::channel(false);
        let run_handle = tokio::spawn(async move { lb.run(stop_rx).await });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        stop_tx.send(true).unwrap();
        run_handle.await.unwrap();

        assert!(dir.join("haproxy.cfg").exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn run_called_twice_warns_and_returns_without_panicking() {
        let dir = std::env::temp_dir().join(format!("bmlb-haproxy-lb-dup-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let supervisor = fake_supervisor(&dir);
        let lb = HaproxyLb::new(supervisor, "0.0.0.0");

        let (_stop_tx, stop_rx) = watch::channel(true);
        lb.run(stop_rx.clone()).await;
        lb.run(stop_rx).await;

        let _ = std::fs::remove_dir_all(&dir);
    }
}
