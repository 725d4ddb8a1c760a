// SPDX-License-Identifier: Apache-2.0

//! CLI surface for `bmlbd` (spec.md §6), parsed with `clap`'s derive API.

use std::net::Ipv4Addr;
use std::path::PathBuf;

pub use clap::Parser;
use clap::ValueEnum;

/// Which data-plane backend programs the VIP (spec.md §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[clap(rename_all = "lowercase")]
pub enum LbType {
    Haproxy,
    Lvs,
}

#[derive(Parser, Debug)]
#[command(name = "bmlbd")]
#[command(version)]
#[command(about = "Bare-metal external L4 load balancer controller", long_about = None)]
pub struct CmdArgs {
    /// Virtual IP this instance programs the data plane for.
    #[arg(long, value_name = "IP", default_value = "0.0.0.0")]
    bind: Ipv4Addr,

    /// Controller HTTP (profiling) port.
    #[arg(long, value_name = "PORT", default_value_t = 9010)]
    port: u16,

    /// Cluster API server address, e.g. `127.0.0.1:8080`.
    #[arg(long, value_name = "HOST:PORT", default_value = "127.0.0.1:8080")]
    master: String,

    /// Path to a kubeconfig file; unset means in-cluster config.
    #[arg(long, value_name = "PATH")]
    kubeconfig: Option<PathBuf>,

    /// Data-plane backend: `haproxy` rebuilds and atomically swaps a whole
    /// config; `lvs` diffs directly against the kernel IPVS table.
    #[arg(long, value_name = "TYPE", value_enum, default_value_t = LbType::Haproxy)]
    lbtype: LbType,

    /// Serve pprof-style profiling endpoints alongside the HTTP server.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    profiling: bool,

    /// Optional JSON config file, deep-merged under the flags above.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Prune IPVS virtual servers on the VIP that this controller did not
    /// create (spec.md §4.5 "foreign VSes"; see DESIGN.md's Open Question
    /// resolution).
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    remove_old_vs: bool,

    /// Increase log verbosity; repeatable. Overridden by `RUST_LOG` when set.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl CmdArgs {
    #[must_use]
    pub fn bind(&self) -> Ipv4Addr {
        self.bind
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn master(&self) -> &str {
        &self.master
    }

    #[must_use]
    pub fn kubeconfig(&self) -> Option<&PathBuf> {
        self.kubeconfig.as_ref()
    }

    #[must_use]
    pub fn lbtype(&self) -> LbType {
        self.lbtype
    }

    #[must_use]
    pub fn profiling(&self) -> bool {
        self.profiling
    }

    #[must_use]
    pub fn config(&self) -> Option<&PathBuf> {
        self.config.as_ref()
    }

    #[must_use]
    pub fn remove_old_vs(&self) -> bool {
        self.remove_old_vs
    }

    /// Default `tracing_subscriber::EnvFilter` directive for this verbosity
    /// level, used when `RUST_LOG` is unset (spec.md §4.12/ambient logging).
    #[must_use]
    pub fn default_log_directive(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let args = CmdArgs::parse_from(["bmlbd"]);
        assert_eq!(args.bind(), Ipv4Addr::new(0, 0, 0, 0));
        assert_eq!(args.port(), 9010);
        assert_eq!(args.master(), "127.0.0.1:8080");
        assert_eq!(args.lbtype(), LbType::Haproxy);
        assert!(args.profiling());
        assert!(args.remove_old_vs());
        assert_eq!(args.default_log_directive(), "info");
    }

    #[test]
    fn parses_lvs_backend_and_disables_remove_old_vs() {
        let args = CmdArgs::parse_from([
            "bmlbd",
            "--bind",
            "10.0.0.2",
            "--lbtype",
            "lvs",
            "--remove-old-vs=false",
        ]);
        assert_eq!(args.bind(), Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(args.lbtype(), LbType::Lvs);
        assert!(!args.remove_old_vs());
    }

    #[test]
    fn rejects_invalid_bind_address() {
        let result = CmdArgs::try_parse_from(["bmlbd", "--bind", "not-an-ip"]);
        assert!(result.is_err());
    }

    #[test]
    fn verbose_flag_raises_default_log_level() {
        let args = CmdArgs::parse_from(["bmlbd", "-vv"]);
        assert_eq!(args.default_log_directive(), "trace");
    }
}
