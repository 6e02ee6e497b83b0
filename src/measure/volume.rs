//! Volume hashing: content fingerprints of directory trees and compose volumes
//!
//! A directory hash covers every regular file beneath the root as a
//! (relative path, SHA-384(content)) pair. Pairs are sorted by their `/`-separated
//! relative path before they are combined, so the result does not depend on the
//! order the filesystem yields entries. Symlinks are not followed and, like empty
//! directories, do not contribute.
//!
//! Volumes are keyed by their declared source, so `~/data` measures the same on
//! hosts with different home directories. A source that cannot be located is an
//! error, never a silent omission.
//!
//! Precondition: the tree is not modified while it is being hashed.

use super::compose::{expand_source, extract_volume_sources};
use crate::error::{Result, TeeError};
use crate::tee::report::measurement_from;
use crate::tee::Measurement;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha384};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

const DIRECTORY_DOMAIN: &[u8] = b"tdx-attest/directory/v1\0";
const VOLUMES_DOMAIN: &[u8] = b"tdx-attest/volumes/v1\0";

/// Hash of one declared volume
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeDigest {
    /// Normalized source as declared in the descriptor
    pub source: String,
    /// Where it was found on this host
    pub path: PathBuf,
    #[serde(with = "crate::serde_hex")]
    pub hash: Measurement,
}

/// Hashes directories and compose volumes relative to a base directory
#[derive(Debug, Clone)]
pub struct VolumeHasher {
    base_dir: PathBuf,
    /// Variables for `~`/`${VAR}` sources; the process environment when unset
    env: Option<BTreeMap<String, String>>,
}

impl VolumeHasher {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            env: None,
        }
    }

    /// Resolve interpolated sources from `env` instead of the process environment
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    fn lookup(&self, name: &str) -> Option<String> {
        match &self.env {
            Some(env) => env.get(name).cloned(),
            None => std::env::var(name).ok(),
        }
    }

    /// Host path of a declared source
    fn locate(&self, source: &str) -> Result<PathBuf> {
        let expanded = expand_source(source, |name| self.lookup(name))?;
        Ok(self.resolve(Path::new(&expanded)))
    }

    /// Hash a directory tree; relative paths resolve against the base directory
    pub fn hash_directory(&self, path: impl AsRef<Path>) -> Result<Measurement> {
        hash_directory(self.resolve(path.as_ref()))
    }

    /// Per-volume hashes for every bind mount declared in `descriptor`, in canonical order
    pub fn volume_digests(&self, descriptor: &str) -> Result<Vec<VolumeDigest>> {
        let sources = extract_volume_sources(descriptor);
        if sources.is_empty() {
            return Err(TeeError::Crypto("no volumes found in compose descriptor".into()));
        }

        sources
            .into_iter()
            .map(|source| {
                let path = self.locate(&source)?;
                let hash = hash_directory(&path)
                    .map_err(|e| TeeError::Crypto(format!("cannot hash volume {}: {}", source, e)))?;
                log::debug!("Volume {} ({}): {}", source, path.display(), hex::encode(hash));
                Ok(VolumeDigest { source, path, hash })
            })
            .collect()
    }

    /// Combined hash of all declared bind-mount volumes
    pub fn hash_compose_volumes(&self, descriptor: &str) -> Result<Measurement> {
        let digests = self.volume_digests(descriptor)?;
        let combined = combine_volumes(&digests);
        log::info!(
            "Hashed {} volumes: {}",
            digests.len(),
            hex::encode(combined)
        );
        Ok(combined)
    }
}

/// Hash a directory tree
pub fn hash_directory(path: impl AsRef<Path>) -> Result<Measurement> {
    let root = path.as_ref();
    if !root.is_dir() {
        return Err(TeeError::InvalidParam(format!(
            "{} does not exist or is not a directory",
            root.display()
        )));
    }

    let mut entries = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry
            .map_err(|e| TeeError::Crypto(format!("cannot walk {}: {}", root.display(), e)))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| TeeError::Crypto(format!("path outside hashed root: {}", e)))?;
        entries.push((relative_key(relative)?, hash_file(entry.path())?));
    }

    Ok(combine_entries(entries))
}

/// `/`-separated form of a relative path, identical on every platform
fn relative_key(relative: &Path) -> Result<String> {
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str().ok_or_else(|| {
                TeeError::InvalidParam(format!("non UTF-8 path: {}", relative.display()))
            })?),
            Component::CurDir => {}
            _ => {
                return Err(TeeError::InvalidParam(format!(
                    "unexpected path component in {}",
                    relative.display()
                )))
            }
        }
    }
    Ok(parts.join("/"))
}

fn hash_file(path: &Path) -> Result<Measurement> {
    let file = File::open(path)
        .map_err(|e| TeeError::Crypto(format!("cannot read {}: {}", path.display(), e)))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha384::new();
    std::io::copy(&mut reader, &mut hasher)
        .map_err(|e| TeeError::Crypto(format!("cannot read {}: {}", path.display(), e)))?;
    Ok(measurement_from(&hasher.finalize()))
}

/// Combine (relative path, content digest) pairs in lexicographic path order
pub(crate) fn combine_entries(mut entries: Vec<(String, Measurement)>) -> Measurement {
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    let mut h = Sha384::new();
    h.update(DIRECTORY_DOMAIN);
    for (key, digest) in &entries {
        h.update((key.len() as u64).to_be_bytes());
        h.update(key.as_bytes());
        h.update(digest);
    }
    measurement_from(&h.finalize())
}

fn combine_volumes(digests: &[VolumeDigest]) -> Measurement {
    let mut ordered: Vec<&VolumeDigest> = digests.iter().collect();
    ordered.sort_by(|a, b| a.source.cmp(&b.source));
    let mut h = Sha384::new();
    h.update(VOLUMES_DOMAIN);
    for volume in ordered {
        h.update((volume.source.len() as u64).to_be_bytes());
        h.update(volume.source.as_bytes());
        h.update(volume.hash);
    }
    measurement_from(&h.finalize())
}
