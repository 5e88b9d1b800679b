use std::path::{Path, PathBuf};

/// Collapse `.` and `..` segments and duplicate slashes in a logical path.
///
/// `..` never climbs above the root, which keeps every logical path inside the directory it
/// is later joined onto.
pub fn normalize_logical(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    let joined = segments.join("/");
    if absolute {
        format!("/{joined}")
    } else {
        joined
    }
}

/// Directory part of a logical path, without the trailing slash.
///
/// `"/css/app.css"` yields `"/css"`, `"/app.css"` yields `""`.
pub fn logical_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(index) => &path[..index],
        None => "",
    }
}

/// Turn a reference found inside a file at `base_dir` into an absolute logical path.
pub fn absolutize_reference(reference: &str, base_dir: &str) -> String {
    if reference.starts_with('/') {
        normalize_logical(reference)
    } else {
        normalize_logical(&format!("/{}/{reference}", base_dir.trim_matches('/')))
    }
}

/// Physical location of a logical path under `root`.
///
/// The logical path always uses forward slashes; it is split and re-joined so the result
/// uses the native separator.
pub fn logical_to_path(root: &Path, logical: &str) -> PathBuf {
    let normalized = normalize_logical(logical);
    let mut path = root.to_path_buf();
    for segment in normalized.split('/').filter(|segment| !segment.is_empty()) {
        path.push(segment);
    }
    path
}
