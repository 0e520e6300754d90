//! Error handling integration tests.
//!
//! These tests verify that meaningful errors are returned for various
//! failure conditions.

use std::time::Duration;

use snapframe::{CaptureState, ExtractOptions, MediaInput, SnapError};

#[test]
fn open_nonexistent_file() {
    let result = MediaInput::from_path("this_file_does_not_exist.mp4");
    assert!(result.is_err());

    let error_message = result.unwrap_err().to_string();
    assert!(
        error_message.contains("Failed to open media file"),
        "Error message should mention file open failure: {error_message}",
    );
}

#[tokio::test]
async fn extract_invalid_file() {
    let temporary_directory = tempfile::tempdir().expect("Failed to create temp dir");
    let invalid_file_path = temporary_directory.path().join("invalid.mp4");
    std::fs::write(&invalid_file_path, b"this is not a media file")
        .expect("Failed to write invalid file");

    let input = MediaInput::from_path(&invalid_file_path).expect("Failed to stat file");
    let options = ExtractOptions::new().with_timeout_budget(Duration::from_secs(20));
    let result = snapframe::extract_frames(&input, &options).await;

    match result {
        Err(SnapError::DecodeError(message)) => assert!(!message.is_empty()),
        other => panic!("Expected DecodeError, got: {other:?}"),
    }
}

#[tokio::test]
async fn extract_invalid_bytes() {
    let input = MediaInput::from_bytes(b"garbage".to_vec(), "video/webm");
    let options = ExtractOptions::new().with_timeout_budget(Duration::from_secs(20));
    let result = snapframe::extract_frames(&input, &options).await;

    let error = result.expect_err("garbage is not a video");
    assert!(error.is_terminal_capture_failure(), "{error:?}");
}

#[test]
fn error_kinds_are_stable() {
    assert_eq!(SnapError::DecodeError("x".into()).kind(), "decode");
    assert_eq!(
        SnapError::DimensionUnavailable { retries: 30 }.kind(),
        "dimension_unavailable"
    );
    assert_eq!(
        SnapError::FrameCaptureExhausted { anchors: 3 }.kind(),
        "frame_capture_exhausted"
    );
    assert_eq!(SnapError::Timeout(Duration::from_secs(1)).kind(), "timeout");
    assert_eq!(
        SnapError::RasterizationUnavailable("x".into()).kind(),
        "rasterization_unavailable"
    );
    assert_eq!(SnapError::Cancelled.kind(), "cancelled");
    assert_eq!(
        SnapError::AlreadyResolved(CaptureState::Done).kind(),
        "already_resolved"
    );
}

#[test]
fn error_display_messages() {
    let message = SnapError::FrameCaptureExhausted { anchors: 3 }.to_string();
    assert!(message.contains("3 anchor"), "{message}");

    let message = SnapError::Cancelled.to_string();
    assert_eq!(message, "Operation cancelled");

    let message = SnapError::UnsupportedInput("image/png".into()).to_string();
    assert!(message.contains("image/png"), "{message}");

    let error = SnapError::AlreadyResolved(CaptureState::Failed);
    assert_eq!(error.to_string(), "Capture already resolved as Failed");
    assert!(!error.is_terminal_capture_failure());
}

#[test]
fn io_errors_convert() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
    let error: SnapError = io.into();
    assert!(matches!(error, SnapError::IoError(_)));
    assert!(!error.is_terminal_capture_failure());
}
