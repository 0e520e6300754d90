//! Progress and cancellation integration tests.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{ScriptedBackend, Script, SeekOutcome, small_input};
use snapframe::{
    CancellationToken, CaptureState, ExtractOptions, ProgressCallback, ProgressInfo,
    extract_frames_with,
};

// ── CancellationToken ──────────────────────────────────────────────

#[test]
fn cancellation_token_default_not_cancelled() {
    let token = CancellationToken::new();
    assert!(!token.is_cancelled());
}

#[test]
fn cancellation_token_clone_shares_state() {
    let token = CancellationToken::new();
    let clone = token.clone();
    assert!(!clone.is_cancelled());

    token.cancel();
    assert!(clone.is_cancelled());
}

#[test]
fn cancellation_token_default_trait() {
    let token = CancellationToken::default();
    assert!(!token.is_cancelled());
}

// ── ProgressInfo ───────────────────────────────────────────────────

struct RecordingProgress {
    infos: Mutex<Vec<ProgressInfo>>,
}

impl ProgressCallback for RecordingProgress {
    fn on_progress(&self, info: &ProgressInfo) {
        self.infos.lock().unwrap().push(info.clone());
    }
}

fn recorder() -> Arc<RecordingProgress> {
    Arc::new(RecordingProgress {
        infos: Mutex::new(Vec::new()),
    })
}

#[tokio::test(start_paused = true)]
async fn transitions_are_numbered_and_timed() {
    let script = Script {
        seeks: vec![SeekOutcome::NeverReady, SeekOutcome::Ready],
        ..Script::metadata_only()
    };
    let (backend, _) = ScriptedBackend::new(script);
    let recorder = recorder();
    let options = ExtractOptions::new().with_progress(recorder.clone());

    extract_frames_with(&small_input(), backend, &options)
        .await
        .expect("second anchor should capture");

    let infos = recorder.infos.lock().unwrap();
    assert!(!infos.is_empty(), "Expected progress callbacks");

    for (index, info) in infos.iter().enumerate() {
        assert_eq!(info.transitions, index as u64 + 1);
    }
    for pair in infos.windows(2) {
        assert!(pair[1].elapsed >= pair[0].elapsed, "elapsed went backwards");
    }

    let last = infos.last().unwrap();
    assert_eq!(last.stage, CaptureState::Done);
    assert!(last.elapsed >= Duration::from_millis(6_100));
}

#[tokio::test(start_paused = true)]
async fn failed_extraction_reports_failed_once() {
    let script = Script {
        seeks: vec![SeekOutcome::Fail("bad packet".to_string())],
        ..Script::metadata_only()
    };
    let (backend, _) = ScriptedBackend::new(script);
    let recorder = recorder();
    let options = ExtractOptions::new().with_progress(recorder.clone());

    let result = extract_frames_with(&small_input(), backend, &options).await;
    assert!(result.is_err());

    let infos = recorder.infos.lock().unwrap();
    let stages: Vec<_> = infos.iter().map(|info| info.stage).collect();
    assert_eq!(
        stages,
        vec![
            CaptureState::AwaitMetadata,
            CaptureState::Seeking { anchor: 0 },
            CaptureState::Failed,
        ]
    );
}
