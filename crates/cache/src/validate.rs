// Copyright (c) Telcoin, LLC
// SPDX-License-Identifier: Apache-2.0

//! Cached binary validation.
//!
//! A cache entry is only trusted after it proves it can run here: its ELF
//! machine field must match the host architecture and a bounded `version`
//! probe must exit cleanly. When the caller knows which version the entry
//! is supposed to be, the probed output must agree, so a short-digest
//! collision between two commits surfaces as a mismatch instead of a
//! silent substitution.

use crate::CachedBinary;
use cf_types::{ForgeError, ForgeResult};
use nix::{
    sys::signal::{killpg, Signal},
    unistd::Pid,
};
use std::{
    fs::File,
    io::Read,
    path::Path,
    process::Stdio,
    time::Duration,
};
use tokio::{process::Command, time::timeout};
use tracing::{debug, warn};

/// How long the version probe may run before its process group is killed.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Why a cached binary was accepted or rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidateOutcome {
    /// Probe succeeded; carries the version string the binary reported.
    Valid { version: String },
    WrongArchitecture { expected: &'static str },
    ProbeTimedOut,
    ProbeFailed { detail: String },
    /// The probed version disagrees with what the entry claims to be.
    VersionMismatch { probed: String, expected: String },
}

impl ValidateOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }
}

/// Validate `entry`, optionally against the version string it must report.
pub async fn validate(entry: &CachedBinary, expected: Option<&str>) -> ForgeResult<ValidateOutcome> {
    if let Some(machine) = elf_machine(&entry.path)? {
        if Some(machine) != host_machine() {
            warn!(
                target: "forge::cache",
                path = %entry.path.display(),
                machine,
                "cached binary built for a different architecture"
            );
            return Ok(ValidateOutcome::WrongArchitecture { expected: std::env::consts::ARCH });
        }
    }

    let mut command = Command::new(&entry.path);
    command
        .arg("version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    // own process group so a timeout kill takes any children with it
    command.process_group(0);

    let child = match command.spawn() {
        Ok(child) => child,
        Err(e) => return Ok(ValidateOutcome::ProbeFailed { detail: e.to_string() }),
    };
    let pid = child.id();

    let output = match timeout(PROBE_TIMEOUT, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Ok(ValidateOutcome::ProbeFailed { detail: e.to_string() }),
        Err(_) => {
            if let Some(pid) = pid {
                let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
            }
            return Ok(ValidateOutcome::ProbeTimedOut);
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Ok(ValidateOutcome::ProbeFailed {
            detail: format!("exit {}: {}", output.status, stderr.trim()),
        });
    }

    let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
    debug!(target: "forge::cache", path = %entry.path.display(), version, "probe ok");

    if let Some(expected) = expected {
        if !version_matches(&version, expected) {
            return Ok(ValidateOutcome::VersionMismatch { probed: version, expected: expected.to_string() });
        }
    }

    Ok(ValidateOutcome::Valid { version })
}

/// Version strings match when either contains the other modulo a leading
/// `v` (binaries print `1.2.3` for tag `v1.2.3`, or a long commit id for a
/// short digest).
fn version_matches(probed: &str, expected: &str) -> bool {
    let probed = probed.trim_start_matches('v');
    let expected = expected.trim_start_matches('v');
    probed.contains(expected) || expected.contains(probed) && !probed.is_empty()
}

/// The ELF machine field of the file, or `None` for non-ELF files (scripts
/// pass straight to the probe).
fn elf_machine(path: &Path) -> ForgeResult<Option<u16>> {
    let mut header = [0u8; 20];
    let mut file = File::open(path)?;
    let read = file.read(&mut header)?;
    if read < 20 || header[..4] != [0x7f, b'E', b'L', b'F'] {
        return Ok(None);
    }
    Ok(Some(u16::from_le_bytes([header[18], header[19]])))
}

/// ELF machine value for the compilation target.
fn host_machine() -> Option<u16> {
    match std::env::consts::ARCH {
        "x86_64" => Some(62),
        "aarch64" => Some(183),
        "x86" => Some(3),
        "arm" => Some(40),
        "riscv64" => Some(243),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BinaryCache, CacheIdentity};
    use cf_types::NetworkSource;
    use std::fs;

    fn entry_with(tmp: &tempfile::TempDir, content: &[u8]) -> CachedBinary {
        let cache = BinaryCache::new(tmp.path().join("cache"), tmp.path().join("bin"));
        let id = CacheIdentity::new("demo", NetworkSource::Testnet, "v1.2.3");
        cache
            .store(&id, "demod", |path| {
                fs::write(path, content)?;
                Ok(())
            })
            .unwrap()
    }

    #[tokio::test]
    async fn script_probe_reports_its_version() {
        let tmp = tempfile::tempdir().unwrap();
        let entry = entry_with(&tmp, b"#!/bin/sh\necho v1.2.3\n");
        let outcome = validate(&entry, Some("v1.2.3")).await.unwrap();
        assert_eq!(outcome, ValidateOutcome::Valid { version: "v1.2.3".into() });
    }

    #[tokio::test]
    async fn version_mismatch_is_surfaced_not_substituted() {
        let tmp = tempfile::tempdir().unwrap();
        let entry = entry_with(&tmp, b"#!/bin/sh\necho v1.2.3\n");
        let outcome = validate(&entry, Some("v2.0.0")).await.unwrap();
        assert!(matches!(outcome, ValidateOutcome::VersionMismatch { .. }));
    }

    #[tokio::test]
    async fn nonzero_probe_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let entry = entry_with(&tmp, b"#!/bin/sh\nexit 3\n");
        let outcome = validate(&entry, None).await.unwrap();
        assert!(matches!(outcome, ValidateOutcome::ProbeFailed { .. }));
    }

    #[tokio::test]
    async fn foreign_elf_is_rejected_before_probing() {
        let tmp = tempfile::tempdir().unwrap();
        // an ELF header whose machine field matches nothing we run on
        let mut bytes = vec![0x7f, b'E', b'L', b'F'];
        bytes.resize(18, 0);
        bytes.extend_from_slice(&0xFFFEu16.to_le_bytes());
        bytes.resize(64, 0);
        let entry = entry_with(&tmp, &bytes);
        let outcome = validate(&entry, None).await.unwrap();
        assert!(matches!(outcome, ValidateOutcome::WrongArchitecture { .. }));
    }

    #[test]
    fn version_matching_tolerates_v_prefixes_and_long_commits() {
        assert!(version_matches("1.2.3", "v1.2.3"));
        assert!(version_matches("v1.2.3", "1.2.3"));
        assert!(version_matches("0123456789abcdef00", "0123456789ab"));
        assert!(!version_matches("1.2.3", "v2.0.0"));
        assert!(!version_matches("fedcba987654", "0123456789ab"));
    }
}
