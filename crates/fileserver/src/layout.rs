use std::path::{Path, PathBuf};

/// Reject a filename carrying any path separator or `..` component so a
/// download/upload request can never escape its task directory.
pub fn sanitize_filename(name: &str) -> Result<&str, &'static str> {
    if name.is_empty() {
        return Err("filename must not be empty");
    }
    if name.contains('/') || name.contains('\\') || name == ".." || name == "." {
        return Err("filename must not contain path separators");
    }
    Ok(name)
}

pub fn task_file_path(root: &str, task_id: &str, filename: &str) -> PathBuf {
    Path::new(root).join(task_id).join(filename)
}
