// SPDX-License-Identifier: Apache-2.0

//! The HAProxy process supervisor: atomic config swap, `-c` validation, and
//! graceful `-sf` restart (spec.md §4.7).
//!
//! Grounded on the original controller's `haproxy/haproxy.go` `Haproxy`
//! struct and its single-consumer `ConfigChan`, enriched with the
//! validate/atomic-rename/`-sf` steps spec.md §4.7 adds on top of that
//! original (which only ever overwrote the file in place).

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum HaproxyError {
    #[error("failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to rename {from:?} to {to:?}: {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to spawn {0:?}: {1}")]
    Spawn(PathBuf, std::io::Error),
    #[error("haproxy -c rejected the new config:\n{0}")]
    ValidationFailed(String),
}

fn pid_file_tmp(conf_file: &Path) -> PathBuf {
    let mut tmp = conf_file.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

/// Non-blank, parseable lines of `pid_file`. A missing file (first run) is
/// not an error — there is nothing to signal yet.
fn read_old_pids(pid_file: &Path) -> Vec<u32> {
    let Ok(contents) = std::fs::read_to_string(pid_file) else {
        return Vec::new();
    };
    contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter_map(|l| match l.parse() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!(line = l, error = %e, "ignoring unparseable pid in pidfile");
                None
            }
        })
        .collect()
}

/// Drives one HAProxy process across config reloads. `binary` is the path
/// to the `haproxy` executable; `conf_file`/`pid_file` are the files it is
/// started with.
pub struct HaproxySupervisor {
    binary: PathBuf,
    conf_file: PathBuf,
    pid_file: PathBuf,
    last_conf: Mutex<Option<Vec<u8>>>,
}

impl HaproxySupervisor {
    #[must_use]
    pub fn new(binary: impl Into<PathBuf>, conf_file: impl Into<PathBuf>, pid_file: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            conf_file: conf_file.into(),
            pid_file: pid_file.into(),
            last_conf: Mutex::new(None),
        }
    }

    /// Apply one new config buffer (spec.md §4.7 steps 1-7). Returns
    /// `Ok(false)` for the no-op "identical buffer" case (S4), `Ok(true)`
    /// once the swap (and best-effort restart) has happened.
    pub fn apply(&self, new_conf: &[u8]) -> Result<bool, HaproxyError> {
        let mut last = self.last_conf.lock().unwrap();
        if last.as_deref() == Some(new_conf) {
            return Ok(false);
        }

        let tmp = pid_file_tmp(&self.conf_file);
        std::fs::write(&tmp, new_conf).map_err(|source| HaproxyError::Write {
            path: tmp.clone(),
            source,
        })?;

        let output = Command::new(&self.binary)
            .args(["-f"])
            .arg(&tmp)
            .arg("-c")
            .output()
            .map_err(|e| HaproxyError::Spawn(self.binary.clone(), e))?;
        if !output.status.success() {
            let combined = format!(
                "{}{}",
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            );
            warn!(output = %combined, "haproxy -c rejected new config, keeping last known good");
            let _ = std::fs::remove_file(&tmp);
            return Err(HaproxyError::ValidationFailed(combined));
        }

        std::fs::rename(&tmp, &self.conf_file).map_err(|source| HaproxyError::Rename {
            from: tmp,
            to: self.conf_file.clone(),
            source,
        })?;

        let old_pids = read_old_pids(&self.pid_file);
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-f")
            .arg(&self.conf_file)
            .arg("-D")
            .arg("-p")
            .arg(&self.pid_file);
        if !old_pids.is_empty() {
            cmd.arg("-sf");
            for pid in &old_pids {
                cmd.arg(pid.to_string());
            }
        }
        match cmd.status() {
            Ok(status) if status.success() => info!(old_pids = old_pids.len(), "haproxy reloaded"),
            Ok(status) => warn!(?status, "haproxy restart exited non-zero"),
            Err(e) => warn!(error = %e, "failed to spawn haproxy for restart"),
        }

        *last = Some(new_conf.to_vec());
        Ok(true)
    }

    /// The blocking supervisor event loop (spec.md §4.7, "T4" in §5): pulls
    /// config buffers off `rx` one at a time, applying each with [`apply`]
    /// on a blocking thread, until `stop` fires.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<Vec<u8>>, mut stop: watch::Receiver<bool>) {
        loop {
            if *stop.borrow() {
                return;
            }
            tokio::select! {
                biased;
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        return;
                    }
                }
                buf = rx.recv() => {
                    let Some(buf) = buf else { return };
                    let this = Arc::clone(&self);
                    let result = tokio::task::spawn_blocking(move || this.apply(&buf)).await;
                    match result {
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => warn!(error = %e, "haproxy supervisor cycle failed"),
                        Err(e) => warn!(error = %e, "haproxy supervisor blocking task panicked"),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_old_pids_skips_blank_and_unparseable_lines() {
        let dir = std::env::temp_dir().join(format!("bmlb-haproxy-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let pid_file = dir.join("haproxy.pid");
        std::fs::write(&pid_file, "123\n\nnot-a-pid\n456\n").unwrap();
        assert_eq!(read_old_pids(&pid_file), vec![123, 456]);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_pid_file_yields_no_pids() {
        assert!(read_old_pids(Path::new("/nonexistent/bmlb-haproxy.pid")).is_empty());
    }

    #[test]
    fn identical_buffer_is_a_no_op() {
        let dir = std::env::temp_dir().join(format!("bmlb-haproxy-noop-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let supervisor = HaproxySupervisor::new(
            "/bin/true",
            dir.join("haproxy.cfg"),
            dir.join("haproxy.pid"),
        );
        *supervisor.last_conf.lock().unwrap() = Some(b"same".to_vec());
        assert!(!supervisor.apply(b"same").unwrap());
        let _ = std::fs::remove_dir_all(&dir);
    }

    /// Writes a fake `haproxy` binary that logs each invocation to
    /// `counter_file` and exits with `validate_status` when called with
    /// `-c`, `0` otherwise.
    fn fake_haproxy(dir: &Path, counter_file: &Path, validate_status: i32) -> PathBuf {
        let script = dir.join("fake-haproxy.sh");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\necho invoked >> {counter:?}\nif [ \"$3\" = \"-c\" ]; then exit {validate_status}; fi\nexit 0\n",
                counter = counter_file,
            ),
        )
        .unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        script
    }

    fn invocation_count(counter_file: &Path) -> usize {
        std::fs::read_to_string(counter_file)
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    #[test]
    fn second_identical_apply_spawns_no_additional_process() {
        let dir = std::env::temp_dir().join(format!("bmlb-haproxy-s4-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let counter = dir.join("invocations.log");
        let binary = fake_haproxy(&dir, &counter, 0);
        let supervisor = HaproxySupervisor::new(binary, dir.join("haproxy.cfg"), dir.join("haproxy.pid"));

        assert!(supervisor.apply(b"conf-a").unwrap());
        let after_first = invocation_count(&counter);
        assert_eq!(after_first, 2, "expected one -c validation and one restart spawn");

        assert!(!supervisor.apply(b"conf-a").unwrap());
        assert_eq!(
            invocation_count(&counter),
            after_first,
            "identical buffer must not spawn haproxy again"
        );

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn validation_failure_leaves_conf_file_untouched() {
        let dir = std::env::temp_dir().join(format!("bmlb-haproxy-badcfg-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let counter = dir.join("invocations.log");
        let binary = fake_haproxy(&dir, &counter, 1);
        let conf_file = dir.join("haproxy.cfg");
        let supervisor = HaproxySupervisor::new(binary, &conf_file, dir.join("haproxy.pid"));

        let err = supervisor.apply(b"broken").unwrap_err();
        assert!(matches!(err, HaproxyError::ValidationFailed(_)));
        assert!(!conf_file.exists(), "confFile must remain unchanged on validation failure");

        let _ = std::fs::remove_dir_all(&dir);
    }
}
