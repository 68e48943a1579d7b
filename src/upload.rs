//! Audio-path validation and upload persistence.
//!
//! User-supplied paths must either live inside the system temp directory
//! (where uploads are staged) or be plain relative paths with no `..`
//! segments. Uploads are streamed to a uniquely named temp file.

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Bytes read from an upload per write.
pub const UPLOAD_CHUNK_SIZE: usize = 1024 * 1024;

/// Validate a user-supplied audio path.
///
/// Returns `None` for absent or empty input, the resolved path for anything
/// inside the system temp directory, and the path unchanged for a safe
/// relative path.
pub fn validate_audio_path(path: Option<&str>) -> Result<Option<PathBuf>> {
    let Some(path) = path.filter(|p| !p.is_empty()) else {
        return Ok(None);
    };

    let system_temp = resolve(&std::env::temp_dir());
    let requested = resolve(Path::new(path));
    if requested.starts_with(&system_temp) {
        return Ok(Some(requested));
    }

    let raw = Path::new(path);
    if raw.is_absolute() {
        return Err(Error::Validation(
            "absolute audio file paths are not allowed".to_string(),
        ));
    }
    if normalize(raw)
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(Error::Validation(
            "path traversal in audio file paths is not allowed".to_string(),
        ));
    }
    Ok(Some(raw.to_path_buf()))
}

/// Persist an upload to a fresh temp file named `{prefix}_XXXX{ext}`.
///
/// The upload is consumed and dropped on every path. If reading or writing
/// fails, the partial file is removed before the error is returned.
pub async fn save_upload_to_temp<R>(upload: R, filename: Option<&str>, prefix: &str) -> Result<PathBuf>
where
    R: AsyncRead + Unpin,
{
    let suffix = filename
        .and_then(|f| Path::new(f).extension())
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();

    let path = tempfile::Builder::new()
        .prefix(&format!("{prefix}_"))
        .suffix(&suffix)
        .tempfile()?
        .into_temp_path()
        .keep()
        .map_err(|e| Error::Io(e.error))?;

    let written = copy_in_chunks(upload, &path).await;
    match written {
        Ok(bytes) => {
            debug!(path = %path.display(), bytes, "upload saved");
            Ok(path)
        }
        Err(e) => {
            if let Err(rm) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %rm, "failed to remove partial upload");
            }
            Err(e)
        }
    }
}

async fn copy_in_chunks<R>(mut upload: R, path: &Path) -> Result<u64>
where
    R: AsyncRead + Unpin,
{
    let mut file = tokio::fs::File::create(path).await?;
    let mut buf = vec![0u8; UPLOAD_CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = upload.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).await?;
        total += n as u64;
    }
    file.flush().await?;
    Ok(total)
}

/// Absolute, lexically normalised form of `path` with the deepest existing
/// ancestor canonicalised, so symlinked temp dirs compare equal.
fn resolve(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path.to_path_buf(),
        }
    };
    let normalized = normalize(&absolute);

    let mut existing = normalized.as_path();
    let mut tail: Vec<OsString> = Vec::new();
    loop {
        if let Ok(mut canonical) = existing.canonicalize() {
            for part in tail.iter().rev() {
                canonical.push(part);
            }
            return canonical;
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name.to_os_string());
                existing = parent;
            }
            _ => return normalized,
        }
    }
}

/// Collapse `.` and `name/..` pairs without touching the filesystem.
/// Leading `..` segments of a relative path are kept.
fn normalize(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }
    out.iter().collect()
}
