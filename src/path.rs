//! Path validation and chroot handling.

use crate::error::{Result, ZkError};

/// Validate a client path.
///
/// A path is absolute, has no trailing `/` (except the root), and no empty,
/// `.` or `..` segments or NUL characters. When `sequential` is set the
/// path may end in `/` since the server appends the sequence suffix.
pub fn validate_path(path: &str, sequential: bool) -> Result<()> {
    let bad = |reason: &str| Err(ZkError::BadArguments(format!("Invalid path {:?}: {}", path, reason)));

    if path.is_empty() {
        return bad("path must not be empty");
    }
    if !path.starts_with('/') {
        return bad("path must start with /");
    }
    if path.len() == 1 {
        return if sequential {
            bad("sequential node may not be the root")
        } else {
            Ok(())
        };
    }
    if path.contains('\0') {
        return bad("null character not allowed");
    }

    let body = if sequential && path.ends_with('/') {
        &path[1..path.len() - 1]
    } else {
        &path[1..]
    };
    for segment in body.split('/') {
        match segment {
            "" => return bad("empty segment"),
            "." | ".." => return bad("relative segment"),
            _ => {}
        }
    }
    Ok(())
}

/// Prepend the chroot to a client path.
pub fn prepend_chroot(chroot: Option<&str>, path: &str) -> String {
    match chroot {
        None => path.to_string(),
        Some(root) if path == "/" => root.to_string(),
        Some(root) => format!("{}{}", root, path),
    }
}

/// Strip the chroot from a server path. Paths outside the chroot are
/// returned unchanged.
pub fn strip_chroot(chroot: Option<&str>, server_path: &str) -> String {
    match chroot {
        None => server_path.to_string(),
        Some(root) => match server_path.strip_prefix(root) {
            Some("") => "/".to_string(),
            Some(rest) if rest.starts_with('/') => rest.to_string(),
            _ => server_path.to_string(),
        },
    }
}

/// Parent of a path, or `None` for the root.
pub fn parent(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Last segment of a path.
pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Join a parent path and a child name.
pub fn join(parent: &str, child: &str) -> String {
    if parent == "/" {
        format!("/{}", child)
    } else {
        format!("{}/{}", parent, child)
    }
}
