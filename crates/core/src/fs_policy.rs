//! Workspace path policy.
//!
//! Every path handed to a workspace mirror is relative to the mirror root and
//! must stay inside it once normalized.

use crate::Result;
use std::path::{Component, Path, PathBuf};

/// Validates a path intended for use within a workspace root.
///
/// This function:
/// 1. Normalizes the path (dropping `.` components).
/// 2. Rejects absolute paths, drive prefixes and any `..` component.
/// 3. Ensures the resulting path is non-empty and stays within `root`.
///
/// Returns the normalized relative path.
pub fn validate_workspace_path(root: &Path, input_path: &str) -> Result<PathBuf> {
    if input_path.contains('\0') {
        return Err(crate::Error::path_invalid(format!(
            "NUL byte in path: {:?}",
            input_path
        )));
    }

    // Cross-platform check: reject Windows-style absolute paths on any OS
    if input_path.len() >= 2
        && input_path.as_bytes()[1] == b':'
        && input_path.as_bytes()[0].is_ascii_alphabetic()
    {
        return Err(crate::Error::path_invalid(format!(
            "Absolute paths are not allowed in a workspace: {}",
            input_path
        )));
    }

    let mut normalized = PathBuf::new();
    for component in Path::new(input_path).components() {
        match component {
            Component::Normal(c) => normalized.push(c),
            Component::ParentDir => {
                return Err(crate::Error::path_invalid(format!(
                    "Path traversal detected in path: {}",
                    input_path
                )));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(crate::Error::path_invalid(format!(
                    "Absolute paths are not allowed in a workspace: {}",
                    input_path
                )));
            }
            Component::CurDir => {}
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(crate::Error::path_invalid(format!(
            "Path does not name a file: {:?}",
            input_path
        )));
    }

    let full_path = root.join(&normalized);
    if !full_path.starts_with(root) {
        return Err(crate::Error::path_invalid(format!(
            "Access denied: path {} is outside of root {}",
            input_path,
            root.display()
        )));
    }

    Ok(normalized)
}

/// Render a relative path with forward slashes, as the sandbox sees it.
pub fn to_slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
