use crate::config::types::SiteSpec;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// A spec successfully loaded from disk, with its content hash
#[derive(Debug, Clone)]
pub struct LoadedSpec {
    pub spec: SiteSpec,
    pub hash: String,
    pub path: PathBuf,
}

/// Loads, parses and validates a single site spec file
pub fn load_spec(path: &Path) -> Result<SiteSpec, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let spec: SiteSpec = toml::from_str(&content)?;
    validate(&spec)?;
    Ok(spec)
}

/// Computes a SHA-256 hash of the spec file content
///
/// Recorded per run so history can tell which version of a spec produced
/// which results.
pub fn compute_spec_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Loads a spec and returns it together with its content hash
pub fn load_spec_with_hash(path: &Path) -> Result<LoadedSpec, ConfigError> {
    let spec = load_spec(path)?;
    let hash = compute_spec_hash(path)?;
    Ok(LoadedSpec {
        spec,
        hash,
        path: path.to_path_buf(),
    })
}

/// Scans a directory for `.toml` spec files and loads the valid ones.
///
/// Invalid files are skipped with a warning; they never abort the scan.
/// The engine treats the returned set as read-only for the whole run, so
/// adding or removing spec files takes effect on the next run without a
/// restart.
pub fn scan_spec_dir(dir: &Path) -> Result<Vec<LoadedSpec>, ConfigError> {
    let mut specs = Vec::new();
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "toml"))
        .collect();

    // Stable ordering keeps run output deterministic across scans
    entries.sort();

    for path in entries {
        match load_spec_with_hash(&path) {
            Ok(loaded) => {
                tracing::debug!("Loaded spec {} from {}", loaded.spec.site_name, path.display());
                specs.push(loaded);
            }
            Err(e) => {
                tracing::warn!("Skipping invalid spec {}: {}", path.display(), e);
            }
        }
    }

    Ok(specs)
}
