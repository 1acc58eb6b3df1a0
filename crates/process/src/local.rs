// Copyright (c) Telcoin, LLC
// SPDX-License-Identifier: Apache-2.0

//! Local process executor.

use cf_config::atomic_write;
use cf_types::{ForgeError, ForgeResult};
use nix::{
    sys::signal::{kill, Signal},
    unistd::Pid,
};
use std::{
    fs::OpenOptions,
    os::unix::fs::PermissionsExt,
    path::PathBuf,
    process::{Command, Stdio},
    time::Duration,
};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Poll interval while waiting for a terminated process to exit.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Everything needed to spawn one node process.
#[derive(Debug, Clone)]
pub struct StartSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub workdir: PathBuf,
    /// Combined stdout+stderr destination.
    pub logfile: PathBuf,
    /// Where to record the pid, written atomically.
    pub pidfile: PathBuf,
}

/// Handle for a locally spawned process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalHandle {
    pub pid: u32,
}

/// Spawns and reaps local node processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalExecutor;

impl LocalExecutor {
    /// Spawn the process described by `spec`, detached from this CLI, with
    /// its output redirected to the logfile and its pid recorded.
    pub fn start(&self, spec: &StartSpec) -> ForgeResult<LocalHandle> {
        let meta = std::fs::metadata(&spec.program).map_err(|_| {
            ForgeError::precondition(format!("binary not found: {}", spec.program.display()))
        })?;
        if meta.permissions().mode() & 0o111 == 0 {
            return Err(ForgeError::precondition(format!(
                "binary is not executable: {}",
                spec.program.display()
            )));
        }

        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&spec.logfile)
            .map_err(|e| {
                ForgeError::precondition(format!(
                    "cannot open log file {}: {e}",
                    spec.logfile.display()
                ))
            })?;
        let log_err = log.try_clone()?;

        let child = Command::new(&spec.program)
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k, v)))
            .current_dir(&spec.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .spawn()?;

        let pid = child.id();
        // write-then-rename so a concurrent reader never sees a torn pidfile
        atomic_write(&spec.pidfile, pid.to_string().as_bytes()).map_err(|e| {
            ForgeError::precondition(format!(
                "cannot write pid file {}: {e}",
                spec.pidfile.display()
            ))
        })?;

        info!(target: "forge::process", pid, program = %spec.program.display(), "process started");
        Ok(LocalHandle { pid })
    }

    /// Whether the process is still alive (signal 0 probe).
    pub fn is_alive(&self, handle: LocalHandle) -> bool {
        kill(Pid::from_raw(handle.pid as i32), None).is_ok()
    }

    /// Graceful stop: SIGTERM, wait up to `timeout`, then SIGKILL.
    ///
    /// Returns after the process has exited or the kill has been issued.
    /// Stopping a process that is already gone succeeds.
    pub async fn stop(&self, handle: LocalHandle, timeout: Duration) -> ForgeResult<()> {
        let pid = Pid::from_raw(handle.pid as i32);
        match kill(pid, Signal::SIGTERM) {
            Ok(()) => {}
            // already gone
            Err(nix::errno::Errno::ESRCH) => return Ok(()),
            Err(e) => return Err(ForgeError::unavailable("process", e.to_string())),
        }

        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if !self.is_alive(handle) {
                debug!(target: "forge::process", pid = handle.pid, "process exited after SIGTERM");
                return Ok(());
            }
            sleep(STOP_POLL_INTERVAL).await;
        }

        warn!(target: "forge::process", pid = handle.pid, "process ignored SIGTERM; killing");
        self.kill(handle);
        // give the kernel a beat to reap before callers re-probe
        sleep(STOP_POLL_INTERVAL).await;
        Ok(())
    }

    /// Immediate unconditional termination. Never fails: a missing target
    /// is already stopped.
    pub fn kill(&self, handle: LocalHandle) {
        let _ = kill(Pid::from_raw(handle.pid as i32), Signal::SIGKILL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sleeper(dir: &std::path::Path, secs: u32) -> StartSpec {
        StartSpec {
            program: PathBuf::from("/bin/sh"),
            args: vec!["-c".into(), format!("sleep {secs}")],
            env: vec![],
            workdir: dir.to_path_buf(),
            logfile: dir.join("node.log"),
            pidfile: dir.join("node.pid"),
        }
    }

    #[tokio::test]
    async fn start_records_pid_and_stop_terminates() {
        let tmp = tempfile::tempdir().unwrap();
        let exec = LocalExecutor;
        let handle = exec.start(&sleeper(tmp.path(), 30)).unwrap();

        let recorded: u32 =
            std::fs::read_to_string(tmp.path().join("node.pid")).unwrap().parse().unwrap();
        assert_eq!(recorded, handle.pid);
        assert!(exec.is_alive(handle));

        exec.stop(handle, Duration::from_secs(5)).await.unwrap();
        assert!(!exec.is_alive(handle));
    }

    #[tokio::test]
    async fn stop_is_idempotent_on_dead_processes() {
        let tmp = tempfile::tempdir().unwrap();
        let exec = LocalExecutor;
        let handle = exec.start(&sleeper(tmp.path(), 30)).unwrap();
        exec.kill(handle);
        sleep(Duration::from_millis(200)).await;
        // both stop and kill tolerate the corpse
        exec.stop(handle, Duration::from_secs(1)).await.unwrap();
        exec.kill(handle);
    }

    #[test]
    fn missing_binary_is_a_precondition_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let mut spec = sleeper(tmp.path(), 1);
        spec.program = tmp.path().join("no-such-binary");
        let err = LocalExecutor.start(&spec).unwrap_err();
        assert!(matches!(err, ForgeError::PreconditionFailed { .. }));
    }
}
