//! Job lifecycle tests against in-memory collaborators.
//!
//! Every test drives the real orchestrator and poll scheduler; only the
//! generation backends, the language model and time are faked.

mod fixtures;
mod helpers;

use chrono::Duration;
use std::sync::atomic::Ordering;
use tokio::sync::broadcast::error::TryRecvError;
use tokio_test::assert_ok;

use genmedia_jobs::models::job::{codes, JobOutput, JobPatch, JobStatus};
use genmedia_jobs::services::orchestrator::{OrchestratorError, StartOutcome};
use genmedia_jobs::services::poller::TickOutcome;
use genmedia_jobs::services::store::JobStore;

use helpers::{test_config, Harness, PollStep};

#[tokio::test]
async fn test_video_job_runs_then_succeeds() {
    let h = Harness::new();
    h.video.script(&[PollStep::Done]);

    let job = assert_ok!(
        h.orchestrator
            .submit_structured("user-1", fixtures::VIDEO_MODEL, fixtures::video_request())
            .await
    );
    assert_eq!(job.status, JobStatus::Requested);

    assert_eq!(h.run_due().await, 1);
    let running = h.job(job.id).await;
    assert_eq!(running.status, JobStatus::Running);
    assert_eq!(running.metadata.operation.as_deref(), Some(format!("operations/{}", job.id).as_str()));
    assert_eq!(running.metadata.ttl, Some(job.metadata.created_at + Duration::minutes(90)));
    assert_eq!(running.metadata.attempt, Some(0));
    assert_eq!(
        running.metadata.next_poll,
        Some(job.metadata.created_at + Duration::seconds(10))
    );

    assert_eq!(h.advance(Duration::seconds(10)).await, 1);
    let done = h.job(job.id).await;
    assert_eq!(done.status, JobStatus::Succeeded);
    assert_eq!(h.video.start_count(), 1);

    let files = done.files.expect("value present");
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].name, "file0.mp4");
    assert_eq!(files[0].mime_type.as_deref(), Some("video/mp4"));
    assert_eq!(files[0].size, None);
    assert!(files[0].url.starts_with("https://signed.invalid/test-outputs/jobs/"));

    // Asynchronous bookkeeping is gone once the job is terminal.
    assert_eq!(done.metadata.operation, None);
    assert_eq!(done.metadata.ttl, None);
    assert_eq!(done.metadata.next_poll, None);
    assert_eq!(done.metadata.attempt, None);
    assert!(h.queue.is_empty());
}

#[tokio::test]
async fn test_assisted_prompt_becomes_video_job() {
    let h = Harness::with_llm(&fixtures::four_second_video_replies());
    let prompt = "Create a 4 second sunset video with gentle waves";

    let job = assert_ok!(h.orchestrator.submit_prompt("user-2", prompt).await);
    assert!(job.needs_analysis());

    h.run_due().await;
    let running = h.job(job.id).await;
    assert_eq!(running.status, JobStatus::Running);
    assert_eq!(running.model_id.as_deref(), Some(fixtures::VIDEO_MODEL));

    let request = running.request.expect("value present");
    assert_eq!(request["type"], "video");
    assert_eq!(request["durationSeconds"], 4);

    let assisted = running.assisted.expect("value present");
    assert_eq!(assisted.prompt, prompt);
    assert!(!assisted.reasons.is_empty());
    assert_eq!(h.video.start_count(), 1);
}

#[tokio::test]
async fn test_unknown_model_fails_without_backend_call() {
    let h = Harness::new();
    let job = assert_ok!(
        h.orchestrator
            .submit_structured("user-3", "dall-e-3", fixtures::image_request())
            .await
    );

    h.run_due().await;
    let failed = h.job(job.id).await;
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.error.expect("value present").code, codes::START_FAILED);
    assert_eq!(h.video.start_count(), 0);
    assert_eq!(h.image.starts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_poll_limit_fails_job() {
    let h = Harness::with_config(genmedia_jobs::config::JobConfig {
        max_poll_attempts: 3,
        ..test_config()
    });

    let job = assert_ok!(
        h.orchestrator
            .submit_structured("user-4", fixtures::VIDEO_MODEL, fixtures::video_request())
            .await
    );
    h.run_due().await;

    let failed = h.poll_until_terminal(job.id, 10).await;
    assert_eq!(failed.status, JobStatus::Failed);
    let error = failed.error.expect("value present");
    assert_eq!(error.code, codes::POLL_LIMIT_EXCEEDED);
    assert_eq!(h.video.poll_count(), 3);
    assert_eq!(failed.metadata.operation, None);
    assert!(h.queue.is_empty());
}

#[tokio::test]
async fn test_duplicate_start_triggers_call_backend_once() {
    let h = Harness::new();
    let job = assert_ok!(
        h.orchestrator
            .submit_structured("user-5", fixtures::VIDEO_MODEL, fixtures::video_request())
            .await
    );
    let path = job.path();

    let (first, second) = futures::join!(
        h.orchestrator.handle_created(&path),
        h.orchestrator.handle_created(&path)
    );
    let mut outcomes = vec![assert_ok!(first), assert_ok!(second)];
    outcomes.sort_by_key(|o| matches!(o, StartOutcome::Skipped));
    assert_eq!(outcomes, vec![StartOutcome::Running, StartOutcome::Skipped]);

    // The queued trigger is a third delivery of the same event.
    assert_eq!(
        assert_ok!(h.orchestrator.handle_created(&path).await),
        StartOutcome::Skipped
    );
    assert_eq!(h.video.start_count(), 1);
}

#[tokio::test]
async fn test_cancel_stops_polling() {
    let h = Harness::new();
    h.video.script(&[PollStep::Done]);
    let job = assert_ok!(
        h.orchestrator
            .submit_structured("user-6", fixtures::VIDEO_MODEL, fixtures::video_request())
            .await
    );
    h.run_due().await;

    let canceled = assert_ok!(h.orchestrator.cancel(job.id).await).expect("value present");
    assert_eq!(canceled.status, JobStatus::Canceled);
    assert_eq!(canceled.metadata.operation, None);

    // The queued tick still fires but finds nothing to do.
    assert_eq!(
        assert_ok!(h.poller.tick(&job.path()).await),
        TickOutcome::Skipped
    );
    h.advance(Duration::seconds(10)).await;
    assert_eq!(h.video.poll_count(), 0);
    assert_eq!(h.job(job.id).await.status, JobStatus::Canceled);

    // Already terminal.
    assert!(assert_ok!(h.orchestrator.cancel(job.id).await).is_none());
}

#[tokio::test]
async fn test_job_expires_after_ttl() {
    let h = Harness::with_config(genmedia_jobs::config::JobConfig {
        ttl_window: Duration::seconds(25),
        ..test_config()
    });
    let job = assert_ok!(
        h.orchestrator
            .submit_structured("user-7", fixtures::VIDEO_MODEL, fixtures::video_request())
            .await
    );
    h.run_due().await;

    let expired = h.poll_until_terminal(job.id, 10).await;
    assert_eq!(expired.status, JobStatus::Expired);
    assert_eq!(expired.error, None);
    assert_eq!(expired.metadata.ttl, None);
    assert_eq!(expired.metadata.next_poll, None);
    // Ticks at +10s and +20s polled; the one at +30s found the TTL passed.
    assert_eq!(h.video.poll_count(), 2);
}

#[tokio::test]
async fn test_synchronous_image_job() {
    let h = Harness::new();
    let job = assert_ok!(
        h.orchestrator
            .submit_structured("user-8", fixtures::IMAGE_MODEL, fixtures::image_request())
            .await
    );

    h.run_due().await;
    let done = h.job(job.id).await;
    assert_eq!(done.status, JobStatus::Succeeded);
    assert_eq!(done.metadata.operation, None);
    assert_eq!(done.metadata.ttl, None);

    let files = done.files.expect("value present");
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].name, "file0.png");
    assert_eq!(files[0].size, Some(4));

    let (bytes, content_type) = h.storage.object(&files[0].uri).expect("value present");
    assert_eq!(bytes, b"\x89PNG");
    assert_eq!(content_type, "image/png");
    assert!(h.queue.is_empty());
}

#[tokio::test]
async fn test_text_job_has_no_files() {
    let h = Harness::new();
    let job = assert_ok!(
        h.orchestrator
            .submit_structured("user-9", fixtures::TEXT_MODEL, fixtures::text_request())
            .await
    );

    h.run_due().await;
    let done = h.job(job.id).await;
    assert_eq!(done.status, JobStatus::Succeeded);
    assert_eq!(done.files, None);
    let response = done.response.expect("value present");
    assert_eq!(response.output, JobOutput::Text("Once upon a time.".to_string()));
}

#[tokio::test]
async fn test_transient_poll_failure_keeps_job_running() {
    let h = Harness::new();
    h.video.script(&[PollStep::Transient("upstream 503"), PollStep::Done]);
    let job = assert_ok!(
        h.orchestrator
            .submit_structured("user-10", fixtures::VIDEO_MODEL, fixtures::video_request())
            .await
    );
    h.run_due().await;

    h.advance(Duration::seconds(10)).await;
    let retrying = h.job(job.id).await;
    assert_eq!(retrying.status, JobStatus::Running);
    assert_eq!(retrying.metadata.attempt, Some(1));
    assert_eq!(retrying.metadata.last_error, Some(h.now()));
    assert_eq!(retrying.error, None);

    h.advance(Duration::seconds(10)).await;
    let done = h.job(job.id).await;
    assert_eq!(done.status, JobStatus::Succeeded);
    assert_eq!(done.metadata.attempt, None);
    assert_eq!(done.metadata.last_error, None);
}

#[tokio::test]
async fn test_backend_error_code_is_kept() {
    let h = Harness::new();
    h.video.script(&[PollStep::BackendError("RESOURCE_EXHAUSTED")]);
    let job = assert_ok!(
        h.orchestrator
            .submit_structured("user-11", fixtures::VIDEO_MODEL, fixtures::video_request())
            .await
    );
    h.run_due().await;

    let failed = h.poll_until_terminal(job.id, 5).await;
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.error.expect("value present").code, "RESOURCE_EXHAUSTED");
}

#[tokio::test]
async fn test_invalid_request_fails_validation() {
    let h = Harness::new();
    let job = assert_ok!(
        h.orchestrator
            .submit_structured("user-12", fixtures::VIDEO_MODEL, fixtures::video_request_bad_duration())
            .await
    );

    h.run_due().await;
    let failed = h.job(job.id).await;
    let error = failed.error.expect("value present");
    assert_eq!(error.code, codes::VALIDATION_ERROR);
    let details = error.details.expect("value present");
    assert!(details["issues"][0]
        .as_str()
        .is_some_and(|m| m.starts_with("request.durationSeconds")));
    assert_eq!(h.video.start_count(), 0);
}

#[tokio::test]
async fn test_adapter_contract_violation_fails_start() {
    let h = Harness::new();
    let job = assert_ok!(
        h.orchestrator
            .submit_structured("user-13", fixtures::MUSIC_MODEL, fixtures::music_request())
            .await
    );

    h.run_due().await;
    let failed = h.job(job.id).await;
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.error.expect("value present").code, codes::START_FAILED);
}

#[tokio::test]
async fn test_adapter_without_result_fails_start() {
    let h = Harness::new();
    let job = assert_ok!(
        h.orchestrator
            .submit_structured("user-20", fixtures::DRAFT_IMAGE_MODEL, fixtures::image_request())
            .await
    );

    h.run_due().await;
    let failed = h.job(job.id).await;
    assert_eq!(failed.status, JobStatus::Failed);
    let error = failed.error.expect("value present");
    assert_eq!(error.code, codes::START_FAILED);
    assert!(error.message.contains("no operation and no output"));
    assert_eq!(h.empty.starts.load(Ordering::SeqCst), 1);
    assert_eq!(failed.files, None);
}

#[tokio::test]
async fn test_operation_from_sync_adapter_fails_start() {
    let h = Harness::new();
    let job = assert_ok!(
        h.orchestrator
            .submit_structured("user-21", fixtures::SPEECH_MODEL, fixtures::speech_request())
            .await
    );

    h.run_due().await;
    let failed = h.job(job.id).await;
    assert_eq!(failed.status, JobStatus::Failed);
    let error = failed.error.expect("value present");
    assert_eq!(error.code, codes::START_FAILED);
    assert!(error.message.contains("an operation and no output"));
    assert_eq!(failed.metadata.operation, None);
    assert!(h.queue.is_empty(), "no poll may be scheduled");
}

#[tokio::test]
async fn test_unsignable_sync_output_fails_with_output_error() {
    let h = Harness::new();
    let job = assert_ok!(
        h.orchestrator
            .submit_structured("user-22", fixtures::SILENT_VIDEO_MODEL, fixtures::silent_video_request())
            .await
    );

    let outcome = h.orchestrator.handle_created(&job.path()).await;
    assert_eq!(
        assert_ok!(outcome),
        StartOutcome::Failed {
            code: codes::OUTPUT_FAILED.to_string()
        }
    );

    let failed = h.job(job.id).await;
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.error.expect("value present").code, codes::OUTPUT_FAILED);
    assert_eq!(failed.files, None);
    assert_eq!(failed.response, None);
    assert_eq!(h.unsignable.starts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_job_fails_when_start_trigger_cannot_be_queued() {
    let (orchestrator, store) = Harness::with_unavailable_queue();
    let mut changes = store.subscribe();

    let result = orchestrator
        .submit_structured("user-23", fixtures::IMAGE_MODEL, fixtures::image_request())
        .await;
    assert!(matches!(result, Err(OrchestratorError::Queue(_))));

    let created = changes.try_recv().expect("record was created");
    let stored = store.get(created.id).await.unwrap().expect("value present");
    assert_eq!(stored.status, JobStatus::Failed);
    let error = stored.error.expect("value present");
    assert_eq!(error.code, codes::START_FAILED);
    assert!(error.message.contains("Could not queue start trigger"));
}

#[tokio::test]
async fn test_abandoned_start_fails_claimed_job() {
    let h = Harness::new();
    let job = assert_ok!(
        h.orchestrator
            .submit_structured("user-24", fixtures::VIDEO_MODEL, fixtures::video_request())
            .await
    );

    // Claimed by a start whose worker then ran out of time.
    let claim = JobPatch::new(h.now()).status(JobStatus::Starting);
    assert_ok!(h.store.update_if(job.id, &[JobStatus::Requested], &claim).await);

    let abandoned = assert_ok!(
        h.orchestrator
            .abandon_start(&job.path(), "dispatch deadline exceeded")
            .await
    );
    let failed = abandoned.expect("value present");
    assert_eq!(failed.status, JobStatus::Failed);
    let error = failed.error.expect("value present");
    assert_eq!(error.code, codes::START_FAILED);
    assert!(error.message.contains("dispatch deadline exceeded"));

    let again = assert_ok!(h.orchestrator.abandon_start(&job.path(), "handler error").await);
    assert!(again.is_none());
}

#[tokio::test]
async fn test_abandon_start_leaves_running_job_alone() {
    let h = Harness::new();
    let job = assert_ok!(
        h.orchestrator
            .submit_structured("user-25", fixtures::VIDEO_MODEL, fixtures::video_request())
            .await
    );
    h.run_due().await;

    let abandoned = assert_ok!(h.orchestrator.abandon_start(&job.path(), "late timeout").await);
    assert!(abandoned.is_none());
    assert_eq!(h.job(job.id).await.status, JobStatus::Running);
}

#[tokio::test]
async fn test_start_tasks_get_the_longer_deadline() {
    let h = Harness::new();
    assert_ok!(
        h.orchestrator
            .submit_structured("user-26", fixtures::VIDEO_MODEL, fixtures::video_request())
            .await
    );

    let start = h.queue.pending();
    assert_eq!(start.len(), 1);
    assert_eq!(start[0].dispatch_deadline_secs, h.config.start_deadline.num_seconds());

    h.run_due().await;
    let poll = h.queue.pending();
    assert_eq!(poll.len(), 1);
    assert_eq!(poll[0].dispatch_deadline_secs, h.config.dispatch_deadline.num_seconds());
}

#[tokio::test]
async fn test_analysis_failure_keeps_prompt() {
    let h = Harness::with_llm(&["Sure! I would pick a video model."]);
    let prompt = "make me something nice";
    let job = assert_ok!(h.orchestrator.submit_prompt("user-14", prompt).await);

    h.run_due().await;
    let failed = h.job(job.id).await;
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.error.expect("value present").code, codes::AI_ANALYSIS_FAILED);
    assert_eq!(failed.assisted.expect("value present").prompt, prompt);
    assert_eq!(failed.model_id, None);
    assert_eq!(h.video.start_count(), 0);
}

#[tokio::test]
async fn test_early_poll_delivery_is_dropped() {
    let h = Harness::new();
    h.video.script(&[PollStep::Done]);
    let job = assert_ok!(
        h.orchestrator
            .submit_structured("user-15", fixtures::VIDEO_MODEL, fixtures::video_request())
            .await
    );
    h.run_due().await;

    // Redelivered immediately, well before nextPoll.
    assert_eq!(
        assert_ok!(h.poller.tick(&job.path()).await),
        TickOutcome::Skipped
    );
    assert_eq!(h.video.poll_count(), 0);

    h.advance(Duration::seconds(10)).await;
    assert_eq!(h.job(job.id).await.status, JobStatus::Succeeded);

    // A late duplicate after success changes nothing.
    assert_eq!(
        assert_ok!(h.poller.tick(&job.path()).await),
        TickOutcome::Skipped
    );
    assert_eq!(h.video.poll_count(), 1);
}

#[tokio::test]
async fn test_observed_transitions_follow_lifecycle() {
    let h = Harness::new();
    h.video.script(&[PollStep::Running, PollStep::Done]);
    let mut changes = h.store.subscribe();

    let job = assert_ok!(
        h.orchestrator
            .submit_structured("user-16", fixtures::VIDEO_MODEL, fixtures::video_request())
            .await
    );
    h.poll_until_terminal(job.id, 5).await;

    let mut statuses = Vec::new();
    loop {
        match changes.try_recv() {
            Ok(record) if record.id == job.id => statuses.push(record.status),
            Ok(_) => {}
            Err(TryRecvError::Empty) => break,
            Err(e) => panic!("change feed broken: {e}"),
        }
    }

    assert_eq!(statuses.first(), Some(&JobStatus::Requested));
    assert_eq!(statuses.last(), Some(&JobStatus::Succeeded));
    for pair in statuses.windows(2) {
        assert!(
            pair[0] == pair[1] || pair[0].can_transition_to(pair[1]),
            "illegal transition {} -> {}",
            pair[0],
            pair[1]
        );
    }
}
