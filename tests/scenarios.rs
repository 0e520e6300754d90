//! End-to-end capture scenarios against a scripted decoder.
//!
//! Every test runs on a paused Tokio clock, so retry spacing, settle
//! delays, and the global budget are checked in virtual time.

mod common;

use std::{sync::Arc, time::Duration};

use common::{MB, ScriptedBackend, Script, SeekOutcome, StageRecorder, input_of_size, small_input};
use snapframe::{
    CancellationToken, CaptureState, DecoderSignal, ExtractOptions, MediaInput, Readiness,
    SnapError, extract_frames_with,
};
use tokio::time::Instant;

fn recorded_options() -> (ExtractOptions, Arc<StageRecorder>) {
    let recorder = Arc::new(StageRecorder::default());
    let options = ExtractOptions::new().with_progress(recorder.clone());
    (options, recorder)
}

fn assert_between(elapsed: Duration, low_ms: u64, high_ms: u64) {
    assert!(
        elapsed >= Duration::from_millis(low_ms) && elapsed < Duration::from_millis(high_ms),
        "elapsed {elapsed:?} outside {low_ms}..{high_ms} ms"
    );
}

fn assert_single_terminal(stages: &[CaptureState], expected: CaptureState) {
    let terminal: Vec<_> = stages.iter().filter(|stage| stage.is_terminal()).collect();
    assert_eq!(terminal, vec![&expected], "stages: {stages:?}");
    assert_eq!(stages.last(), Some(&expected), "stages: {stages:?}");
}

// ── Successful captures ────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn fast_path_captures_without_seeking() {
    let (backend, tally) = ScriptedBackend::new(Script::default());
    let (options, recorder) = recorded_options();

    let result = extract_frames_with(&small_input(), backend, &options)
        .await
        .expect("fast path should capture");

    assert_eq!(result.anchor, None);
    assert!(tally.seeks().is_empty());
    assert_between(result.elapsed, 300, 350);
    assert_eq!((result.preview.width, result.preview.height), (1280, 720));
    assert_eq!((result.api.width, result.api.height), (512, 288));
    assert_eq!(tally.frames(), 1);
    assert_eq!(tally.releases(), 1);
    assert_eq!(
        recorder.stages(),
        vec![
            CaptureState::AwaitMetadata,
            CaptureState::AwaitSeekStable { anchor: None },
            CaptureState::Capturing,
            CaptureState::Done,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn escalates_to_second_anchor_when_first_never_settles() {
    let script = Script {
        seeks: vec![SeekOutcome::NeverReady, SeekOutcome::Ready],
        ..Script::metadata_only()
    };
    let (backend, tally) = ScriptedBackend::new(script);
    let (options, recorder) = recorded_options();

    let result = extract_frames_with(&small_input(), backend, &options)
        .await
        .expect("second anchor should capture");

    assert_eq!(result.anchor, Some(1));
    assert_eq!(tally.seeks(), vec![Duration::ZERO, Duration::from_secs(1)]);
    // settle 500 + 14 * 300 between 15 polls, escalation 500, settle 500,
    // render settle 400.
    assert_between(result.elapsed, 6_100, 6_150);
    assert_eq!(tally.releases(), 1);

    let stages = recorder.stages();
    assert!(stages.contains(&CaptureState::Seeking { anchor: 0 }));
    assert!(stages.contains(&CaptureState::AwaitSeekStable { anchor: Some(1) }));
    assert!(!stages.contains(&CaptureState::Seeking { anchor: 2 }));
    assert_single_terminal(&stages, CaptureState::Done);
}

#[tokio::test(start_paused = true)]
async fn large_input_reaches_third_anchor() {
    let (_file, input) = input_of_size(150 * MB);
    let script = Script {
        seeks: vec![
            SeekOutcome::NeverReady,
            SeekOutcome::NeverReady,
            SeekOutcome::Ready,
        ],
        ..Script::metadata_only()
    };
    let (backend, tally) = ScriptedBackend::new(script);
    let (options, recorder) = recorded_options();

    let result = extract_frames_with(&input, backend, &options)
        .await
        .expect("third anchor should capture");

    assert_eq!(result.anchor, Some(2));
    assert_eq!(
        tally.seeks(),
        vec![Duration::ZERO, Duration::from_secs(1), Duration::from_secs(3)]
    );
    // Two anchors of 800 + 24 * 500, two escalations of 1000, settle 800,
    // render settle 400.
    assert_between(result.elapsed, 28_800, 28_850);
    assert_eq!((result.preview.width, result.preview.height), (1280, 720));
    assert_eq!(tally.frames(), 1);
    assert_eq!(tally.releases(), 1);

    let stages = recorder.stages();
    assert!(stages.contains(&CaptureState::AwaitSeekStable { anchor: Some(2) }));
    assert_single_terminal(&stages, CaptureState::Done);
}

#[tokio::test(start_paused = true)]
async fn exhausted_anchors_fall_back_to_current_position() {
    let script = Script {
        seeks: vec![
            SeekOutcome::NeverReady,
            SeekOutcome::NeverReady,
            SeekOutcome::Reject,
        ],
        // After the second anchor's last poll (9.9 s), before the third
        // anchor is tried (10.4 s).
        decoded_after: Some(Duration::from_secs(10)),
        ..Script::metadata_only()
    };
    let (backend, tally) = ScriptedBackend::new(script);
    let (options, recorder) = recorded_options();

    let result = extract_frames_with(&small_input(), backend, &options)
        .await
        .expect("last resort should capture");

    assert_eq!(result.anchor, None);
    assert_eq!(tally.seeks().len(), 3);
    assert_between(result.elapsed, 10_400, 10_450);
    assert_eq!(tally.frames(), 1);
    assert_eq!(tally.releases(), 1);

    let stages = recorder.stages();
    assert_eq!(
        &stages[stages.len() - 3..],
        &[
            CaptureState::Seeking { anchor: 2 },
            CaptureState::Capturing,
            CaptureState::Done,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn rejected_seek_moves_to_next_anchor() {
    let script = Script {
        seeks: vec![SeekOutcome::Reject, SeekOutcome::Ready],
        ..Script::metadata_only()
    };
    let (backend, tally) = ScriptedBackend::new(script);

    let result = extract_frames_with(&small_input(), backend, &ExtractOptions::new())
        .await
        .expect("second anchor should capture");

    assert_eq!(result.anchor, Some(1));
    assert_eq!(tally.seeks().len(), 2);
    // escalation 500, settle 500, render settle 400.
    assert_between(result.elapsed, 1_400, 1_450);
}

#[tokio::test(start_paused = true)]
async fn presented_frame_shortens_render_settle() {
    let with_presentation = Script {
        presentation: true,
        ..Script::metadata_only()
    };
    let (backend, _) = ScriptedBackend::new(with_presentation);
    let fast = extract_frames_with(&small_input(), backend, &ExtractOptions::new())
        .await
        .unwrap();

    let (backend, _) = ScriptedBackend::new(Script::metadata_only());
    let fixed = extract_frames_with(&small_input(), backend, &ExtractOptions::new())
        .await
        .unwrap();

    assert_between(fast.elapsed, 600, 650);
    assert_between(fixed.elapsed, 900, 950);
}

#[tokio::test(start_paused = true)]
async fn late_dimensions_are_absorbed_by_settle_polling() {
    let script = Script {
        dimensions_after: Some(Duration::from_secs(2)),
        ..Script::default()
    };
    let (backend, tally) = ScriptedBackend::new(script);

    let result = extract_frames_with(&small_input(), backend, &ExtractOptions::new())
        .await
        .unwrap();

    assert_eq!(result.anchor, Some(0));
    assert_eq!(tally.seeks(), vec![Duration::ZERO]);
    assert_eq!((result.preview.width, result.preview.height), (1280, 720));
    // Ready at the 2.0 s poll, then render settle.
    assert_between(result.elapsed, 2_400, 2_450);
}

#[tokio::test(start_paused = true)]
async fn unknown_duration_captures_at_current_position() {
    let script = Script {
        duration: Some(f64::NAN),
        dimensions_after: Some(Duration::from_secs(2)),
        ..Script::default()
    };
    let (backend, tally) = ScriptedBackend::new(script);

    let result = extract_frames_with(&small_input(), backend, &ExtractOptions::new())
        .await
        .unwrap();

    assert_eq!(result.anchor, None);
    assert!(tally.seeks().is_empty());
    // Dimension backoff 300 + 600 + 900 + 1200.
    assert_between(result.elapsed, 3_000, 3_050);
}

// ── Terminal failures ──────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn dimensions_never_available_fails_after_thirty_retries() {
    let (_file, input) = input_of_size(150 * MB);
    let script = Script {
        duration: Some(f64::NAN),
        dimensions_after: None,
        ..Script::default()
    };
    let (backend, tally) = ScriptedBackend::new(script);
    let (options, recorder) = recorded_options();

    let started = Instant::now();
    let error = extract_frames_with(&input, backend, &options)
        .await
        .expect_err("dimensions never arrive");

    assert!(
        matches!(error, SnapError::DimensionUnavailable { retries: 30 }),
        "{error:?}"
    );
    // 500 ms steps up to the 5 s cap: 27.5 s + 20 * 5 s.
    assert_between(started.elapsed(), 127_500, 128_000);
    assert_eq!(tally.frames(), 0);
    assert_eq!(tally.releases(), 1);
    assert_single_terminal(&recorder.stages(), CaptureState::Failed);
}

#[tokio::test(start_paused = true)]
async fn every_anchor_exhausted_without_fallback_frame() {
    let script = Script {
        seeks: vec![SeekOutcome::NeverReady],
        ..Script::metadata_only()
    };
    let (backend, tally) = ScriptedBackend::new(script);

    let started = Instant::now();
    let error = extract_frames_with(&small_input(), backend, &ExtractOptions::new())
        .await
        .expect_err("no anchor settles");

    assert!(
        matches!(error, SnapError::FrameCaptureExhausted { anchors: 3 }),
        "{error:?}"
    );
    assert_eq!(
        tally.seeks(),
        vec![Duration::ZERO, Duration::from_secs(1), Duration::from_secs(3)]
    );
    // Three anchors of 500 + 14 * 300, two escalations of 500.
    assert_between(started.elapsed(), 15_100, 15_150);
    assert_eq!(tally.frames(), 0);
    assert_eq!(tally.releases(), 1);
}

#[tokio::test(start_paused = true)]
async fn large_input_times_out_at_ceiling() {
    let (_file, input) = input_of_size(150 * MB);
    let script = Script {
        duration: None,
        ..Script::metadata_only()
    };
    let (backend, tally) = ScriptedBackend::new(script);
    let (options, recorder) = recorded_options();

    let started = Instant::now();
    let error = extract_frames_with(&input, backend, &options)
        .await
        .expect_err("decoder never becomes ready");

    assert!(
        matches!(error, SnapError::Timeout(budget) if budget == Duration::from_secs(300)),
        "{error:?}"
    );
    assert_between(started.elapsed(), 300_000, 300_050);
    assert_eq!(tally.frames(), 0);
    assert_eq!(tally.releases(), 1);

    let stages = recorder.stages();
    assert_single_terminal(&stages, CaptureState::Failed);

    // Nothing runs after resolution.
    tokio::time::advance(Duration::from_secs(60)).await;
    assert_eq!(recorder.stages(), stages);
    assert_eq!(tally.releases(), 1);
}

#[tokio::test(start_paused = true)]
async fn timeout_cuts_pending_dimension_retries() {
    let script = Script {
        duration: Some(f64::NAN),
        dimensions_after: None,
        ..Script::default()
    };
    let (backend, tally) = ScriptedBackend::new(script);
    let options = ExtractOptions::new().with_timeout_budget(Duration::from_secs(20));

    let started = Instant::now();
    let error = extract_frames_with(&small_input(), backend, &options)
        .await
        .expect_err("budget is shorter than the retry schedule");

    assert!(matches!(error, SnapError::Timeout(_)), "{error:?}");
    assert_between(started.elapsed(), 20_000, 20_050);
    assert_eq!(tally.frames(), 0);
    assert_eq!(tally.releases(), 1);
}

#[tokio::test(start_paused = true)]
async fn decode_error_stops_all_anchors() {
    let script = Script {
        seeks: vec![SeekOutcome::Fail("corrupt stream".to_string()), SeekOutcome::Ready],
        ..Script::metadata_only()
    };
    let (backend, tally) = ScriptedBackend::new(script);
    let (options, recorder) = recorded_options();

    let error = extract_frames_with(&small_input(), backend, &options)
        .await
        .expect_err("decoder reports an error");

    match error {
        SnapError::DecodeError(message) => assert!(message.contains("corrupt"), "{message}"),
        other => panic!("expected DecodeError, got {other:?}"),
    }
    assert_eq!(tally.seeks().len(), 1);
    assert_eq!(tally.frames(), 0);
    assert_eq!(tally.releases(), 1);
    assert_single_terminal(&recorder.stages(), CaptureState::Failed);
}

#[tokio::test(start_paused = true)]
async fn decode_error_while_awaiting_metadata() {
    let script = Script {
        on_open: vec![DecoderSignal::Error("unsupported codec".to_string())],
        readiness_on_open: Readiness::None,
        ..Script::default()
    };
    let (backend, tally) = ScriptedBackend::new(script);

    let error = extract_frames_with(&small_input(), backend, &ExtractOptions::new())
        .await
        .expect_err("open reports an error");

    assert!(matches!(error, SnapError::DecodeError(_)), "{error:?}");
    assert_eq!(tally.releases(), 1);
}

// ── Cancellation and input checks ──────────────────────────────────

#[tokio::test(start_paused = true)]
async fn cancellation_stops_at_next_step() {
    let script = Script {
        seeks: vec![SeekOutcome::NeverReady],
        ..Script::metadata_only()
    };
    let (backend, tally) = ScriptedBackend::new(script);
    let token = CancellationToken::new();
    let options = ExtractOptions::new().with_cancellation(token.clone());

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        token.cancel();
    });

    let started = Instant::now();
    let error = extract_frames_with(&small_input(), backend, &options)
        .await
        .expect_err("cancelled");

    assert!(matches!(error, SnapError::Cancelled), "{error:?}");
    assert!(started.elapsed() < Duration::from_millis(2_400));
    assert_eq!(tally.releases(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancelled_before_start_never_opens() {
    let (backend, tally) = ScriptedBackend::new(Script::default());
    let token = CancellationToken::new();
    token.cancel();
    let options = ExtractOptions::new().with_cancellation(token);

    let error = extract_frames_with(&small_input(), backend, &options)
        .await
        .expect_err("cancelled");

    assert!(matches!(error, SnapError::Cancelled));
    assert_eq!(tally.releases(), 1);
}

#[tokio::test(start_paused = true)]
async fn non_video_input_is_rejected() {
    let (backend, tally) = ScriptedBackend::new(Script::default());
    let input = MediaInput::from_bytes(vec![0_u8; 16], "image/png");

    let error = extract_frames_with(&input, backend, &ExtractOptions::new())
        .await
        .expect_err("not a video");

    assert!(matches!(error, SnapError::UnsupportedInput(_)), "{error:?}");
    assert_eq!(tally.releases(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_open_releases_backend() {
    let script = Script {
        fail_open: true,
        ..Script::default()
    };
    let (backend, tally) = ScriptedBackend::new(script);

    let result = extract_frames_with(&small_input(), backend, &ExtractOptions::new()).await;

    assert!(result.is_err());
    assert_eq!(tally.releases(), 1);
}
