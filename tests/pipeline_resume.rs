// tests/pipeline_resume.rs
//
// Resumability of the per-story pipeline, asserted through call counts on
// fake collaborators:
// - a full run records every artifact and mirrors the stage on the story
// - re-entry at RENDERED only publishes; re-entry at PUBLISHED does nothing
// - a zero-length narration file is regenerated, not skipped
// - orphaned artifacts from a crash are adopted without external calls
// - transient failures keep the last completed stage, fatal ones FAIL the job
//   and keep earlier artifacts

mod common;

use common::{sample_story, Harness, PublishStep};
use std::sync::atomic::Ordering;

use story_reel::error::{PipelineError, StageError};
use story_reel::pipeline::{ArtifactDir, Stage, StageExecutor, VideoJob};

#[tokio::test]
async fn full_run_records_every_stage() {
    let h = Harness::new();
    let id = h.add_story("Rust 2.0 announced", "https://rust.dev/2");

    let job = h.pipeline.advance(&id, Stage::Published).await.unwrap();
    assert_eq!(job.stage, Stage::Published);
    assert_eq!(job.completed_stage, Stage::Published);
    assert_eq!(job.stage_error, None);
    assert_eq!(job.publish_attempts, 1);
    assert_eq!(job.artifacts.external_id.as_deref(), Some("yt-default"));
    assert_eq!(job.artifacts.audio_duration_secs, Some(12.5));
    assert!(job.artifacts.video.as_ref().is_some_and(|p| p.exists()));
    assert_eq!(h.calls.snapshot(), (1, 1, 1, 1, 1));

    let story = h.store.get_story(&id).unwrap().unwrap();
    assert_eq!(story.stage, Stage::Published);

    let art = ArtifactDir::new(&h.output_dir(), &id);
    for stage in Stage::PRODUCING {
        assert!(art.is_usable(stage).await, "{stage} artifact should be usable");
        assert!(!art.staging_path(stage).unwrap().exists());
    }
    assert_eq!(art.load_receipt().await.unwrap().platform, "fake");
}

#[tokio::test]
async fn rendered_job_only_publishes_and_published_job_is_untouched() {
    let h = Harness::new();
    let id = h.add_story("GPU prices fall", "https://gpu.example/news");

    let job = h.pipeline.advance(&id, Stage::Rendered).await.unwrap();
    assert_eq!(job.stage, Stage::Rendered);
    assert_eq!(h.calls.snapshot(), (1, 1, 1, 1, 0));

    let art = ArtifactDir::new(&h.output_dir(), &id);
    let video = art.final_path(Stage::Rendered).unwrap();
    let before = std::fs::metadata(&video).unwrap().modified().unwrap();

    h.pipeline.advance(&id, Stage::Published).await.unwrap();
    assert_eq!(h.calls.snapshot(), (1, 1, 1, 1, 1));
    assert_eq!(std::fs::metadata(&video).unwrap().modified().unwrap(), before);

    let published = h.store.get_job(&id).unwrap().unwrap();
    let again = h.pipeline.advance(&id, Stage::Published).await.unwrap();
    assert_eq!(h.calls.snapshot(), (1, 1, 1, 1, 1));
    assert_eq!(again, published);

    // Lower targets are satisfied too.
    h.pipeline.advance(&id, Stage::Scripted).await.unwrap();
    assert_eq!(h.calls.snapshot(), (1, 1, 1, 1, 1));
}

#[tokio::test]
async fn zero_length_audio_is_regenerated() {
    let h = Harness::new();
    let id = h.add_story("Linux 7.0 released", "https://kernel.org/7");

    h.pipeline.advance(&id, Stage::Voiced).await.unwrap();
    let art = ArtifactDir::new(&h.output_dir(), &id);
    let audio = art.final_path(Stage::Voiced).unwrap();
    std::fs::write(&audio, b"").unwrap();

    let job = h.pipeline.advance(&id, Stage::Voiced).await.unwrap();
    assert_eq!(job.stage, Stage::Voiced);
    assert_eq!(h.calls.voice.load(Ordering::SeqCst), 2);
    assert_eq!(h.calls.script.load(Ordering::SeqCst), 1);
    assert!(std::fs::metadata(&audio).unwrap().len() > 0);
}

#[tokio::test]
async fn silent_voice_backend_is_transient_and_keeps_script() {
    let h = Harness::new();
    let id = h.add_story("AI writes AI", "https://ai.example/ai");
    h.voice.silent.store(true, Ordering::SeqCst);

    let err = h.pipeline.advance(&id, Stage::Voiced).await.unwrap_err();
    assert!(matches!(err, PipelineError::Stage(StageError::Transient { stage: Stage::Voiced, .. })));

    let job = h.store.get_job(&id).unwrap().unwrap();
    assert_eq!(job.stage, Stage::Scripted);
    assert_eq!(job.completed_stage, Stage::Scripted);
    assert!(job.stage_error.is_some());
    assert_eq!(h.store.get_story(&id).unwrap().unwrap().stage, Stage::Scripted);

    h.voice.silent.store(false, Ordering::SeqCst);
    let job = h.pipeline.advance(&id, Stage::Voiced).await.unwrap();
    assert_eq!(job.stage, Stage::Voiced);
    assert_eq!(job.stage_error, None);
    assert_eq!(h.calls.script.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn orphan_artifacts_are_adopted_without_calls() {
    let h = Harness::new();
    let id = h.add_story("Crash mid-stage", "https://crash.example/1");
    h.pipeline.advance(&id, Stage::Voiced).await.unwrap();

    // Simulate a crash after the artifact was written but before state was:
    // roll the recorded state back while the files stay on disk.
    h.store
        .update_job(&id, |j| {
            j.completed_stage = Stage::Ingested;
            j.stage = Stage::Ingested;
            j.artifacts = Default::default();
        })
        .unwrap();

    let job = h.pipeline.advance(&id, Stage::Voiced).await.unwrap();
    assert_eq!(job.completed_stage, Stage::Voiced);
    assert!(job.artifacts.script.is_some() && job.artifacts.audio.is_some());
    assert_eq!(h.calls.snapshot(), (1, 1, 0, 0, 0));
}

#[tokio::test]
async fn transient_render_failure_keeps_captioned() {
    let h = Harness::new();
    let id = h.add_story("Render me", "https://render.example/1");
    h.renderer.broken.store(true, Ordering::SeqCst);

    let err = h.pipeline.advance(&id, Stage::Rendered).await.unwrap_err();
    assert!(matches!(err, PipelineError::Stage(ref e) if e.is_retryable()));
    let job = h.store.get_job(&id).unwrap().unwrap();
    assert_eq!(job.stage, Stage::Captioned);
    assert!(job.stage_error.as_deref().unwrap_or("").contains("ffmpeg"));
    assert_eq!(job.failed_stage, None);

    h.renderer.broken.store(false, Ordering::SeqCst);
    let job = h.pipeline.advance(&id, Stage::Rendered).await.unwrap();
    assert_eq!(job.stage, Stage::Rendered);
    assert_eq!(h.calls.snapshot(), (1, 1, 1, 2, 0));
}

#[tokio::test]
async fn malformed_timestamps_are_never_promoted() {
    let h = Harness::new();
    let id = h.add_story("Bad timing", "https://timing.example/1");
    h.timestamps.corrupt.store(true, Ordering::SeqCst);

    let err = h.pipeline.advance(&id, Stage::Rendered).await.unwrap_err();
    assert!(matches!(err, PipelineError::Stage(StageError::Transient { stage: Stage::Timestamped, .. })));

    let job = h.store.get_job(&id).unwrap().unwrap();
    assert_eq!(job.stage, Stage::Voiced);
    assert_eq!(job.completed_stage, Stage::Voiced);
    assert_eq!(job.artifacts.timestamps, None);

    let art = ArtifactDir::new(&h.output_dir(), &id);
    assert!(!art.final_path(Stage::Timestamped).unwrap().exists());
    assert!(!art.staging_path(Stage::Timestamped).unwrap().exists());
    assert!(art.is_usable(Stage::Voiced).await);
    assert_eq!(h.calls.render.load(Ordering::SeqCst), 0);

    // Re-entry after the fix regenerates the timing data and carries on.
    h.timestamps.corrupt.store(false, Ordering::SeqCst);
    let job = h.pipeline.advance(&id, Stage::Rendered).await.unwrap();
    assert_eq!(job.stage, Stage::Rendered);
    assert_eq!(h.calls.snapshot(), (1, 1, 2, 1, 0));
}

#[tokio::test]
async fn story_without_title_fails_script_stage_fatally() {
    let h = Harness::new();
    let mut story = sample_story("placeholder", "https://untitled.example/1");
    story.title = "   ".into();
    let id = story.id.clone();
    h.store.upsert_stories(&[story]).unwrap();

    let err = h.pipeline.advance(&id, Stage::Published).await.unwrap_err();
    assert!(matches!(err, PipelineError::Stage(StageError::Fatal { stage: Stage::Scripted, .. })));

    let job = h.store.get_job(&id).unwrap().unwrap();
    assert_eq!(job.stage, Stage::Failed);
    assert_eq!(job.failed_stage, Some(Stage::Scripted));
    assert_eq!(job.completed_stage, Stage::Ingested);
    assert_eq!(h.store.get_story(&id).unwrap().unwrap().stage, Stage::Failed);
    assert_eq!(h.calls.snapshot(), (0, 0, 0, 0, 0));
}

#[tokio::test]
async fn unknown_voice_backend_fails_voice_stage_fatally() {
    let mut settings = common::settings();
    settings.voice_backend = "robot".into();
    let h = Harness::with_settings(settings, 1);
    let id = h.add_story("Voice me", "https://voice.example/1");

    let err = h.pipeline.advance(&id, Stage::Rendered).await.unwrap_err();
    match err {
        PipelineError::Stage(StageError::Fatal { stage, message }) => {
            assert_eq!(stage, Stage::Voiced);
            assert!(message.contains("robot"));
        }
        other => panic!("unexpected: {other:?}"),
    }

    let job = h.store.get_job(&id).unwrap().unwrap();
    assert_eq!(job.stage, Stage::Failed);
    assert_eq!(job.failed_stage, Some(Stage::Voiced));
    assert_eq!(job.completed_stage, Stage::Scripted);
    assert!(ArtifactDir::new(&h.output_dir(), &id).is_usable(Stage::Scripted).await);
    assert_eq!(h.calls.snapshot(), (1, 0, 0, 0, 0));
}

#[tokio::test]
async fn voice_stage_without_a_usable_script_is_fatal() {
    let h = Harness::new();
    let id = h.add_story("No script", "https://noscript.example/1");
    let story = h.store.get_story(&id).unwrap().unwrap();
    let job = VideoJob::new(id.clone(), chrono::Utc::now());
    let art = ArtifactDir::new(&h.output_dir(), &id);
    let executor = StageExecutor::new(h.services.clone(), common::settings());

    let run = executor.execute(Stage::Voiced, &story, &job, &art).await;
    assert!(matches!(run.outcome, Err(StageError::Fatal { stage: Stage::Voiced, .. })));

    art.stage_bytes(Stage::Scripted, br#"{"story_id":"x"}"#).await.unwrap();
    art.promote(Stage::Scripted).await.unwrap();
    let run = executor.execute(Stage::Voiced, &story, &job, &art).await;
    assert!(matches!(run.outcome, Err(StageError::Fatal { stage: Stage::Voiced, .. })));
    assert_eq!(h.calls.voice.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn rejected_publish_fails_job_but_keeps_video() {
    let h = Harness::new();
    let id = h.add_story("Policy bait", "https://bait.example/1");
    h.publisher.script.lock().push_back(PublishStep::Rejected);

    let err = h.pipeline.advance(&id, Stage::Published).await.unwrap_err();
    assert!(matches!(err, PipelineError::Stage(StageError::Fatal { stage: Stage::Published, .. })));

    let job = h.store.get_job(&id).unwrap().unwrap();
    assert_eq!(job.stage, Stage::Failed);
    assert_eq!(job.completed_stage, Stage::Rendered);
    assert_eq!(job.publish_attempts, 1);
    assert!(job.artifacts.video.as_ref().is_some_and(|p| p.exists()));
}

#[tokio::test]
async fn transient_publish_is_retried_in_call() {
    let h = Harness::new();
    let id = h.add_story("Flaky upload", "https://flaky.example/1");
    {
        let mut steps = h.publisher.script.lock();
        steps.push_back(PublishStep::Transient);
        steps.push_back(PublishStep::Transient);
        steps.push_back(PublishStep::Ok("yt-123"));
    }

    let job = h.pipeline.advance(&id, Stage::Published).await.unwrap();
    assert_eq!(job.artifacts.external_id.as_deref(), Some("yt-123"));
    assert_eq!(job.publish_attempts, 3);
}

#[tokio::test]
async fn exhausted_publish_attempts_stay_rendered() {
    let h = Harness::new();
    let id = h.add_story("Always down", "https://down.example/1");
    {
        let mut steps = h.publisher.script.lock();
        for _ in 0..3 {
            steps.push_back(PublishStep::Transient);
        }
    }

    let err = h.pipeline.advance(&id, Stage::Published).await.unwrap_err();
    assert!(matches!(err, PipelineError::Stage(ref e) if e.is_retryable()));
    let job = h.store.get_job(&id).unwrap().unwrap();
    assert_eq!(job.stage, Stage::Rendered);
    assert_eq!(job.publish_attempts, 3);
}

#[tokio::test]
async fn ingested_and_failed_are_not_targets() {
    let h = Harness::new();
    let id = h.add_story("Nope", "https://nope.example/1");
    for target in [Stage::Ingested, Stage::Failed] {
        let err = h.pipeline.advance(&id, target).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidTarget(t) if t == target));
    }
    assert!(h.store.get_job(&id).unwrap().is_none());
}

#[tokio::test]
async fn concurrent_advances_of_one_story_do_the_work_once() {
    let h = Harness::new();
    let id = h.add_story("Race", "https://race.example/1");

    let (a, b) = tokio::join!(
        h.pipeline.advance(&id, Stage::Scripted),
        h.pipeline.advance(&id, Stage::Scripted)
    );
    assert_eq!(a.unwrap().stage, Stage::Scripted);
    assert_eq!(b.unwrap().stage, Stage::Scripted);
    assert_eq!(h.calls.script.load(Ordering::SeqCst), 1);
    assert_eq!(h.pipeline.tracked_locks(), 0);
}

#[tokio::test]
async fn run_many_advances_every_story() {
    let h = Harness::new();
    let ids: Vec<String> = (0..5)
        .map(|i| h.add_story(&format!("Story {i}"), &format!("https://many.example/{i}")))
        .collect();

    let results = h.pipeline.run_many(ids.clone(), Stage::Captioned).await;
    assert_eq!(results.len(), 5);
    assert!(results.iter().all(|(_, r)| r.as_ref().is_ok_and(|j| j.stage == Stage::Captioned)));
    assert_eq!(h.calls.snapshot(), (5, 5, 5, 0, 0));
    assert_eq!(h.pipeline.tracked_locks(), 0);
}

#[tokio::test]
async fn rebuilding_a_published_story_never_uploads_again() {
    let h = Harness::new();
    let id = h.add_story("Upload once", "https://once.example/1");
    h.pipeline.advance(&id, Stage::Published).await.unwrap();

    let art = ArtifactDir::new(&h.output_dir(), &id);
    std::fs::remove_file(art.final_path(Stage::Rendered).unwrap()).unwrap();

    let job = h.pipeline.advance(&id, Stage::Rendered).await.unwrap();
    assert_eq!(job.stage, Stage::Published);
    assert_eq!(job.artifacts.external_id.as_deref(), Some("yt-default"));
    assert!(art.is_usable(Stage::Published).await);
    assert_eq!(h.calls.snapshot(), (1, 1, 1, 2, 1));

    let job = h.pipeline.advance(&id, Stage::Published).await.unwrap();
    assert_eq!(job.completed_stage, Stage::Published);
    assert_eq!(h.calls.snapshot(), (1, 1, 1, 2, 1));

    // Earlier stages rebuilt from scratch keep the upload record too.
    std::fs::write(art.final_path(Stage::Voiced).unwrap(), b"").unwrap();
    let job = h.pipeline.advance(&id, Stage::Published).await.unwrap();
    assert_eq!(job.artifacts.external_id.as_deref(), Some("yt-default"));
    assert_eq!(h.calls.snapshot(), (1, 2, 2, 3, 1));
}

#[tokio::test]
async fn lost_receipt_is_rewritten_from_the_job() {
    let h = Harness::new();
    let id = h.add_story("Receipt gone", "https://receipt.example/1");
    h.pipeline.advance(&id, Stage::Published).await.unwrap();

    let art = ArtifactDir::new(&h.output_dir(), &id);
    std::fs::remove_file(art.final_path(Stage::Published).unwrap()).unwrap();

    let job = h.pipeline.advance(&id, Stage::Published).await.unwrap();
    assert_eq!(job.stage, Stage::Published);
    let receipt = art.load_receipt().await.unwrap();
    assert_eq!(receipt.external_id, "yt-default");
    assert_eq!(receipt.platform, "fake");
    assert_eq!(h.calls.publish.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn empty_publish_id_is_not_recorded() {
    let h = Harness::new();
    let id = h.add_story("Nothing back", "https://empty.example/1");
    h.publisher.script.lock().push_back(PublishStep::Ok(""));

    let err = h.pipeline.advance(&id, Stage::Published).await.unwrap_err();
    assert!(matches!(err, PipelineError::Stage(StageError::Fatal { stage: Stage::Published, .. })));

    let job = h.store.get_job(&id).unwrap().unwrap();
    assert_eq!(job.stage, Stage::Failed);
    assert_eq!(job.failed_stage, Some(Stage::Published));
    assert_eq!(job.completed_stage, Stage::Rendered);
    assert_eq!(job.artifacts.external_id, None);

    let art = ArtifactDir::new(&h.output_dir(), &id);
    assert!(!art.final_path(Stage::Published).unwrap().exists());
    assert!(!art.staging_path(Stage::Published).unwrap().exists());
    assert!(art.is_usable(Stage::Rendered).await);

    let job = h.pipeline.advance(&id, Stage::Published).await.unwrap();
    assert_eq!(job.artifacts.external_id.as_deref(), Some("yt-default"));
    assert_eq!(h.calls.publish.load(Ordering::SeqCst), 2);
}
