// SPDX-License-Identifier: Apache-2.0

//! `bmlbd`: parses the CLI surface (spec.md §6), builds a cluster client and
//! one of the two data-plane backends, and runs the reconciler until an
//! interrupt or a fatal startup error (spec.md §5, §7).
//!
//! Ground: `init/src/main.rs`'s logging-init shape, `server/bmlb/bmlb.go`'s
//! `Server::Start()` client/watcher wiring.

use std::process::ExitCode;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{Endpoints, Service};
use kube::{Api, Client};
use thiserror::Error;
use tokio::sync::watch as stop_signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use args::{CmdArgs, LbType, Parser};
use haproxy::HaproxySupervisor;
use ipvs::{KernelIpvsDriver, KernelIpvsError};
use loadbalance::{HaproxyLb, LoadBalance, LvsLb};
use lvs::LvsAdaptor;
use netfilter::{ExecIpsetDriver, ExecIptablesDriver, ProcSysctlDriver};
use reconciler::{DEFAULT_PORT_MAX, DEFAULT_PORT_MIN, ProtocolAllocators, Reconciler};
use watch::{EndpointsWatcher, ServiceWatcher};

/// Where the HAProxy backend looks for its binary and writes its config
/// (spec.md §4.7). Ground: `original_source/haproxy/haproxy.go`'s
/// `NewHaproxy` defaults.
const HAPROXY_BINARY: &str = "/usr/local/sbin/haproxy";
const HAPROXY_CONF_FILE: &str = "/etc/haproxy/haproxy.cfg";
const HAPROXY_PID_FILE: &str = "/run/haproxy.pid";

/// Startup failures that abort the process (spec.md §7: "invalid --bind;
/// unreachable cluster API during startup; invalid --lbtype"). `--bind` and
/// `--lbtype` are already rejected by `clap` before this type is reachable.
#[derive(Debug, Error)]
enum StartupError {
    #[error("unreachable cluster API: {0}")]
    ClusterApi(#[from] kube::Error),
    #[error("failed to connect to the kernel IPVS table: {0}")]
    Ipvs(#[from] KernelIpvsError),
}

fn init_logging(args: &CmdArgs) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.default_log_directive()));
    tracing_subscriber::fmt()
        .with_ansi(false)
        .with_file(true)
        .with_level(true)
        .with_line_number(true)
        .with_env_filter(filter)
        .init();
}

fn build_load_balance(args: &CmdArgs) -> Result<Arc<dyn LoadBalance>, StartupError> {
    match args.lbtype() {
        LbType::Lvs => {
            let ipvs = Arc::new(KernelIpvsDriver::connect()?);
            let ipset = Arc::new(ExecIpsetDriver);
            let iptables = Arc::new(ExecIptablesDriver);
            let sysctl = Arc::new(ProcSysctlDriver);
            let adaptor = LvsAdaptor::new(ipvs, ipset, iptables, sysctl, args.bind(), args.remove_old_vs());
            Ok(Arc::new(LvsLb::new(adaptor)))
        }
        LbType::Haproxy => {
            let supervisor = Arc::new(HaproxySupervisor::new(HAPROXY_BINARY, HAPROXY_CONF_FILE, HAPROXY_PID_FILE));
            Ok(Arc::new(HaproxyLb::new(supervisor, args.bind().to_string())))
        }
    }
}

async fn run(args: CmdArgs) -> Result<(), StartupError> {
    if let Some(path) = args.kubeconfig() {
        // SAFETY: single-threaded at this point, before any client or task is built.
        unsafe { std::env::set_var("KUBECONFIG", path) };
    }
    let client = Client::try_default().await?;
    info!(lbtype = ?args.lbtype(), bind = %args.bind(), "bmlbd starting");

    let lb = build_load_balance(&args)?;
    let allocators = Arc::new(ProtocolAllocators::new(DEFAULT_PORT_MIN, DEFAULT_PORT_MAX).expect("default port range is valid"));
    let services = Arc::new(ServiceWatcher::new());
    let endpoints = Arc::new(EndpointsWatcher::new());
    let reconciler = Arc::new(Reconciler::new(
        Arc::clone(&services),
        Arc::clone(&endpoints),
        Arc::clone(&lb),
        allocators,
        args.bind(),
        client.clone(),
    ));

    let (stop_tx, stop_rx) = stop_signal::channel(false);

    let service_task = tokio::spawn({
        let services = Arc::clone(&services);
        let api: Api<Service> = Api::all(client.clone());
        let reconciler = Arc::clone(&reconciler);
        async move {
            if let Err(e) = services.run(api, reconciler).await {
                error!(error = %e, "service watch stream ended");
            }
        }
    });
    let endpoints_task = tokio::spawn({
        let endpoints = Arc::clone(&endpoints);
        let api: Api<Endpoints> = Api::all(client.clone());
        let reconciler = Arc::clone(&reconciler);
        async move {
            if let Err(e) = endpoints.run(api, reconciler).await {
                error!(error = %e, "endpoints watch stream ended");
            }
        }
    });
    let lb_task = tokio::spawn({
        let lb = Arc::clone(&lb);
        async move { lb.run(stop_rx).await }
    });

    tokio::select! {
        () = reconciler.run() => {
            info!("reconciler loop exited");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received interrupt, shutting down");
        }
    }

    let _ = stop_tx.send(true);
    service_task.abort();
    endpoints_task.abort();
    let _ = lb_task.await;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CmdArgs::parse();
    init_logging(&args);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "fatal startup error");
            ExitCode::FAILURE
        }
    }
}
