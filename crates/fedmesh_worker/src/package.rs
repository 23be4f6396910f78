//! Package Runtime
//!
//! Materializes a usable dispatcher in the run directory: fetch the compute
//! package from the control plane, optionally validate its digest, unpack
//! it, and bind the entry points it declares. A worker configured for a
//! local compute context skips all of that and stages the `client/`
//! directory instead.

use crate::discovery::DiscoveryClient;
use crate::dispatch::{DispatchConfig, Dispatcher, EntryPoint};
use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tar::Archive;
use tracing::{info, warn};
use walkdir::WalkDir;

/// Download attempts before the worker gives up on a compute package.
pub const PACKAGE_DOWNLOAD_TRIES: u32 = 10;

/// Pause between download attempts.
pub const PACKAGE_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Entry-point manifest carried inside the package.
pub const PACKAGE_MANIFEST: &str = "package.yaml";

pub struct PackageRuntime {
    run_path: PathBuf,
    archive_path: Option<PathBuf>,
    remote_checksum: Option<String>,
}

impl PackageRuntime {
    pub fn new(run_path: impl Into<PathBuf>) -> Self {
        Self {
            run_path: run_path.into(),
            archive_path: None,
            remote_checksum: None,
        }
    }

    /// Poll the control plane for the compute package. Returns false when
    /// every attempt failed; the worker then runs without a dispatcher.
    pub async fn download(
        &mut self,
        discovery: &DiscoveryClient,
        tries: u32,
        delay: Duration,
    ) -> bool {
        for remaining in (0..tries).rev() {
            match discovery.download_package(&self.run_path).await {
                Ok(archive_path) => {
                    info!("compute package stored at {}", archive_path.display());
                    self.archive_path = Some(archive_path);
                    self.remote_checksum = match discovery.package_checksum().await {
                        Ok(checksum) => Some(checksum),
                        Err(err) => {
                            warn!("package checksum not available: {err:#}");
                            None
                        }
                    };
                    return true;
                }
                Err(err) => {
                    warn!(
                        "no compute package available ({err:#}), retrying in {}s, {remaining} tries left",
                        delay.as_secs()
                    );
                }
            }
            if remaining > 0 {
                tokio::time::sleep(delay).await;
            }
        }
        false
    }

    /// Compare the archive digest against the configured checksum. The
    /// configured value is authoritative; the server-reported digest is
    /// only cross-checked for logging.
    pub fn validate(&self, expected: &str) -> Result<bool> {
        let archive_path = self
            .archive_path
            .as_ref()
            .context("no compute package downloaded")?;
        let digest = sha256_hex(archive_path)?;

        if let Some(remote) = &self.remote_checksum {
            if remote != &digest {
                warn!("server-reported package digest {remote} differs from local digest {digest}");
            }
        }

        let matches = digest == expected;
        if !matches {
            warn!("package digest {digest} does not match configured checksum {expected}");
        }
        Ok(matches)
    }

    /// Expand the archive into the run directory.
    pub fn unpack(&self) -> Result<()> {
        let archive_path = self
            .archive_path
            .as_ref()
            .context("no compute package downloaded")?;
        let file = File::open(archive_path)
            .with_context(|| format!("Failed to open {}", archive_path.display()))?;
        Archive::new(GzDecoder::new(file))
            .unpack(&self.run_path)
            .with_context(|| format!("Failed to unpack {}", archive_path.display()))?;
        info!("compute package unpacked into {}", self.run_path.display());
        Ok(())
    }

    /// Bind a dispatcher from the unpacked package's entry-point manifest.
    pub fn dispatcher(&self) -> Result<Dispatcher> {
        let manifest_path = find_manifest(&self.run_path)
            .with_context(|| format!("no {PACKAGE_MANIFEST} in unpacked compute package"))?;
        let manifest = std::fs::read_to_string(&manifest_path)
            .with_context(|| format!("Failed to read {}", manifest_path.display()))?;
        let config: DispatchConfig = serde_yaml::from_str(&manifest)
            .with_context(|| format!("Failed to parse {}", manifest_path.display()))?;

        for required in ["train", "validate"] {
            if !config.entry_points.contains_key(required) {
                anyhow::bail!("compute package is missing required entry point '{required}'");
            }
        }

        let run_path = manifest_path
            .parent()
            .unwrap_or(&self.run_path)
            .to_path_buf();
        Ok(Dispatcher::new(config, run_path))
    }
}

/// Locate the entry-point manifest, which may sit below a top-level
/// directory inside the archive.
fn find_manifest(run_path: &Path) -> Option<PathBuf> {
    let direct = run_path.join(PACKAGE_MANIFEST);
    if direct.is_file() {
        return Some(direct);
    }
    WalkDir::new(run_path)
        .min_depth(2)
        .max_depth(3)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .find(|entry| entry.file_type().is_file() && entry.file_name() == PACKAGE_MANIFEST)
        .map(|entry| entry.into_path())
}

/// Stage a local compute context: copy `source` into the run directory and
/// bind the conventional python entry points.
pub fn stage_local_package(source: &Path, run_path: &Path) -> Result<Dispatcher> {
    if !source.is_dir() {
        anyhow::bail!("local compute context {} is not a directory", source.display());
    }

    for entry in WalkDir::new(source) {
        let entry = entry.with_context(|| format!("Failed to walk {}", source.display()))?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .expect("walkdir yields paths under its root");
        if relative.as_os_str().is_empty() {
            continue;
        }
        let target = run_path.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create {}", target.display()))?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            std::fs::copy(entry.path(), &target)
                .with_context(|| format!("Failed to copy {}", entry.path().display()))?;
        }
    }

    let entry_points: HashMap<String, EntryPoint> = [
        ("train", "python3 train.py"),
        ("validate", "python3 validate.py"),
        ("predict", "python3 predict.py"),
    ]
    .into_iter()
    .map(|(name, command)| {
        (
            name.to_string(),
            EntryPoint {
                command: command.to_string(),
            },
        )
    })
    .collect();

    Ok(Dispatcher::new(DispatchConfig { entry_points }, run_path))
}

/// Hex-encoded SHA-256 of a file.
pub fn sha256_hex(path: &Path) -> Result<String> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect())
}
