// Copyright (c) Telcoin, LLC
// SPDX-License-Identifier: Apache-2.0

//! The production build collaborator: git checkout plus make.

use crate::{BinaryBuilder, BuildProgress};
use async_trait::async_trait;
use cf_types::{ForgeError, ForgeResult};
use std::path::Path;
use tokio::{process::Command, sync::mpsc};
use tracing::{debug, info};

/// Builds a chain binary by cloning its repository and invoking the
/// family's make target.
#[derive(Debug, Clone)]
pub struct GitMakeBuilder {
    /// Make target producing `build/<binary>` in the checkout.
    make_target: String,
}

impl Default for GitMakeBuilder {
    fn default() -> Self {
        Self { make_target: "build".into() }
    }
}

impl GitMakeBuilder {
    pub fn new(make_target: impl Into<String>) -> Self {
        Self { make_target: make_target.into() }
    }

    async fn run(
        &self,
        program: &str,
        args: &[&str],
        cwd: Option<&Path>,
    ) -> ForgeResult<std::process::Output> {
        let mut command = Command::new(program);
        command.args(args).kill_on_drop(true);
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }
        debug!(target: "forge::build", program, ?args, "running build step");
        let output = command
            .output()
            .await
            .map_err(|e| ForgeError::unavailable(program, e.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ForgeError::unavailable(
                program,
                format!("{} {} failed: {}", program, args.join(" "), stderr.trim()),
            ));
        }
        Ok(output)
    }
}

#[async_trait]
impl BinaryBuilder for GitMakeBuilder {
    async fn resolve_commit(&self, repo: &str, reference: &str) -> ForgeResult<String> {
        // a full commit id needs no network round trip
        if reference.len() == 40 && reference.chars().all(|c| c.is_ascii_hexdigit()) {
            return Ok(reference.to_string());
        }
        let output = self.run("git", &["ls-remote", repo, reference], None).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .split_whitespace()
            .next()
            .filter(|commit| !commit.is_empty())
            .map(|commit| commit.to_string())
            .ok_or_else(|| {
                ForgeError::unavailable("git", format!("{reference} not found in {repo}"))
            })
    }

    async fn build(
        &self,
        repo: &str,
        reference: &str,
        binary: &str,
        dest: &Path,
        progress: &mpsc::Sender<BuildProgress>,
    ) -> ForgeResult<()> {
        let checkout = tempfile::tempdir()?;
        let checkout_path = checkout.path();

        let _ = progress.send(BuildProgress::Building { step: format!("clone {repo}") }).await;
        let dest = checkout_path.display().to_string();
        self.run("git", &["clone", repo, dest.as_str()], None).await?;

        let _ = progress.send(BuildProgress::Building { step: format!("checkout {reference}") }).await;
        self.run("git", &["checkout", reference], Some(checkout_path)).await?;

        let _ = progress
            .send(BuildProgress::Building { step: format!("make {}", self.make_target) }).await;
        self.run("make", &[self.make_target.as_str()], Some(checkout_path)).await?;

        let built = checkout_path.join("build").join(binary);
        if !built.exists() {
            return Err(ForgeError::unavailable(
                "build",
                format!("make {} did not produce build/{binary}", self.make_target),
            ));
        }
        // the checkout is on a temp filesystem; copy rather than rename
        std::fs::copy(&built, dest)?;
        info!(target: "forge::build", binary, reference, "build finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn full_commit_ids_resolve_without_git() {
        let builder = GitMakeBuilder::default();
        let commit = "0123456789abcdef0123456789abcdef01234567";
        assert_eq!(builder.resolve_commit("ignored", commit).await.unwrap(), commit);
    }
}
