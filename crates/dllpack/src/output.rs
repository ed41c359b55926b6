//! Writing build artifacts: filename templates and atomic file replacement.

use std::{
    fs,
    path::{Path, PathBuf},
};

use cow_utils::CowUtils;
use log::debug;
use sha2::{Digest, Sha256};

use crate::error::{BuildError, BuildResult};

/// Number of hex digits of the content hash used by `[hash]`
pub const HASH_LENGTH: usize = 20;

/// Hex SHA-256 of `content`, truncated to [`HASH_LENGTH`]
pub fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    let mut hex: String = digest.iter().map(|byte| format!("{byte:02x}")).collect();
    hex.truncate(HASH_LENGTH);
    hex
}

/// Expand `[name]` and `[hash]` in an output filename template
pub fn expand_filename(template: &str, name: &str, content: &str) -> String {
    let named = template.cow_replace("[name]", name);
    if named.contains("[hash]") {
        named.cow_replace("[hash]", &content_hash(content)).into_owned()
    } else {
        named.into_owned()
    }
}

/// Write `content` to `path` through a sibling temporary file and a rename, so a
/// reader never observes a half-written file. Parent directories are created.
pub fn write_atomic(path: &Path, content: &str) -> BuildResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| BuildError::io(parent, e))?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path: PathBuf = path.with_file_name(tmp_name);

    fs::write(&tmp_path, content).map_err(|e| BuildError::io(&tmp_path, e))?;
    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(BuildError::io(path, e));
    }
    debug!("Wrote {} ({} bytes)", path.display(), content.len());
    Ok(())
}
