pub mod cluster;

pub use cluster::{
    parse_json_manifest, parse_yaml_manifest, validate_manifest, ClusterSpec, Manifest,
    ManifestError, Node, Registration, API_SERVER_PORT,
};

use std::path::Path;
use thiserror::Error;

/// Errors for file I/O operations (separate from pure parsing errors)
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Manifest error: {0}")]
    ManifestError(#[from] ManifestError),
}

// ============================================================================
// SBIO: I/O wrapper - thin layer over pure functions
// ============================================================================

/// Load, parse and validate a manifest file from disk.
/// `.yaml`/`.yml` files are parsed as YAML, everything else as JSON.
pub fn load_manifest_file(path: &Path) -> Result<Manifest, LoadError> {
    let content = std::fs::read_to_string(path)?;
    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    let manifest = if is_yaml {
        Manifest::from_yaml(&content)?
    } else {
        Manifest::from_json(&content)?
    };
    Ok(manifest)
}
