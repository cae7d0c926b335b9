use std::fs;
use std::path::Path;

use crate::error::{DiscoveryError, DiscoveryResult};

pub(crate) fn read_trimmed(path: &Path) -> DiscoveryResult<String> {
    fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|source| DiscoveryError::Read {
            path: path.to_path_buf(),
            source,
        })
}

pub(crate) fn read_u64(path: &Path) -> DiscoveryResult<u64> {
    let value = read_trimmed(path)?;
    value.parse().map_err(|_| DiscoveryError::Parse {
        path: path.to_path_buf(),
        value,
    })
}

/// Numeric suffix of `name` after `prefix`, e.g. `("renderD128", "renderD")` → 128.
pub(crate) fn index_suffix(name: &str, prefix: &str) -> Option<u64> {
    let digits = name.strip_prefix(prefix)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Names of entries in `dir`; empty when the directory cannot be read.
pub(crate) fn entry_names(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut names: Vec<String> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .collect();
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_suffix_requires_digits() {
        assert_eq!(index_suffix("accel3", "accel"), Some(3));
        assert_eq!(index_suffix("accel_controlD3", "accel"), None);
        assert_eq!(index_suffix("accel", "accel"), None);
        assert_eq!(index_suffix("card0", "card"), Some(0));
    }
}
