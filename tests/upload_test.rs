use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};

use genq::error::Error;
use genq::upload::{UPLOAD_CHUNK_SIZE, save_upload_to_temp, validate_audio_path};
use tokio::io::{AsyncRead, ReadBuf};

fn validation_message(err: Error) -> String {
    match err {
        Error::Validation(msg) => msg,
        other => panic!("expected a validation error, got {other:?}"),
    }
}

#[test]
fn empty_path_is_absent() {
    assert_eq!(validate_audio_path(None).unwrap(), None);
    assert_eq!(validate_audio_path(Some("")).unwrap(), None);
}

#[test]
fn parent_traversal_is_rejected() {
    let err = validate_audio_path(Some("../x.wav")).unwrap_err();
    assert_eq!(
        validation_message(err),
        "path traversal in audio file paths is not allowed"
    );

    let err = validate_audio_path(Some("uploads/../../x.wav")).unwrap_err();
    assert!(validation_message(err).contains("path traversal"));
}

#[test]
fn traversal_that_stays_inside_is_allowed() {
    assert_eq!(
        validate_audio_path(Some("uploads/../clip.wav")).unwrap(),
        Some(PathBuf::from("uploads/../clip.wav"))
    );
}

#[test]
fn plain_relative_path_is_returned_unchanged() {
    assert_eq!(
        validate_audio_path(Some("clip.wav")).unwrap(),
        Some(PathBuf::from("clip.wav"))
    );
}

#[test]
fn path_inside_temp_dir_is_resolved() {
    let temp = std::env::temp_dir();
    let requested = temp.join("foo").join("x.wav");

    let accepted = validate_audio_path(Some(requested.to_str().unwrap()))
        .unwrap()
        .unwrap();

    let canonical_temp = temp.canonicalize().unwrap();
    assert_eq!(accepted, canonical_temp.join("foo").join("x.wav"));
}

#[cfg(unix)]
#[test]
fn absolute_path_outside_temp_dir_is_rejected() {
    let err = validate_audio_path(Some("/etc/passwd")).unwrap_err();
    assert_eq!(
        validation_message(err),
        "absolute audio file paths are not allowed"
    );
}

#[test]
fn escaping_temp_dir_with_dotdot_is_rejected() {
    let temp = std::env::temp_dir();
    let escaping = format!("{}/../../etc/x.wav", temp.display());
    assert!(validate_audio_path(Some(&escaping)).is_err());
}

#[tokio::test]
async fn upload_is_saved_with_prefix_and_extension() {
    let path = save_upload_to_temp(&b"RIFF....WAVE"[..], Some("voice.wav"), "ref_audio")
        .await
        .unwrap();

    let name = path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("ref_audio_"), "{name}");
    assert!(name.ends_with(".wav"), "{name}");
    assert_eq!(std::fs::read(&path).unwrap(), b"RIFF....WAVE");

    // A saved upload is itself an acceptable request path.
    assert!(validate_audio_path(Some(path.to_str().unwrap())).is_ok());

    std::fs::remove_file(path).unwrap();
}

#[tokio::test]
async fn upload_without_filename_has_no_extension() {
    let path = save_upload_to_temp(&b"data"[..], None, "src_audio")
        .await
        .unwrap();
    let name = path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("src_audio_"));
    assert!(!name.contains('.'), "{name}");
    std::fs::remove_file(path).unwrap();
}

#[tokio::test]
async fn large_upload_spans_several_chunks() {
    let data: Vec<u8> = (0..UPLOAD_CHUNK_SIZE * 2 + 123)
        .map(|i| (i % 251) as u8)
        .collect();
    let path = save_upload_to_temp(io::Cursor::new(data.clone()), Some("big.flac"), "big")
        .await
        .unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), data);
    std::fs::remove_file(path).unwrap();
}

/// Yields one chunk of bytes, then an I/O error.
struct BrokenUpload {
    sent: bool,
}

impl AsyncRead for BrokenUpload {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.sent {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "client went away",
            )));
        }
        self.sent = true;
        buf.put_slice(b"partial");
        Poll::Ready(Ok(()))
    }
}

#[tokio::test]
async fn failed_upload_leaves_no_partial_file() {
    let prefix = format!("broken-{}", uuid::Uuid::new_v4().simple());

    let err = save_upload_to_temp(BrokenUpload { sent: false }, Some("x.wav"), &prefix)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Io(_)), "{err:?}");

    let leftovers: Vec<_> = std::fs::read_dir(std::env::temp_dir())
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(&prefix))
        .collect();
    assert!(leftovers.is_empty(), "partial upload left behind: {leftovers:?}");
}
