//! In-memory harness for lifecycle tests: fake adapters, a scripted language
//! model and a manual clock wired into a real orchestrator and poll scheduler.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use genmedia_jobs::config::JobConfig;
use genmedia_jobs::models::job::{JobOutput, JobRecord, MediaOutput};
use genmedia_jobs::models::request::GenerationRequest;
use genmedia_jobs::services::adapters::{
    AdapterError, ModelAdapter, ModelRegistry, PollResult, StartContext, StartResult,
};
use genmedia_jobs::services::clock::{Clock, ManualClock};
use genmedia_jobs::services::llm::{ChatMessage, InferOptions, LanguageModel, LlmError};
use genmedia_jobs::services::orchestrator::{JobServices, Orchestrator};
use genmedia_jobs::services::poller::PollScheduler;
use genmedia_jobs::services::queue::{
    EnqueueOptions, MemoryTaskQueue, QueueError, ScheduledTask, Task, TaskQueue,
};
use genmedia_jobs::services::storage::MemoryObjectStore;
use genmedia_jobs::services::store::{JobStore, MemoryJobStore};

pub const OUTPUT_BUCKET: &str = "test-outputs";

/// What the fake video backend reports on successive polls.
#[derive(Debug, Clone, Copy)]
pub enum PollStep {
    Running,
    Transient(&'static str),
    Done,
    BackendError(&'static str),
}

/// Asynchronous video adapter; finished videos land in the job's output prefix.
pub struct FakeVideo {
    pub starts: AtomicUsize,
    pub polls: AtomicUsize,
    script: Mutex<VecDeque<PollStep>>,
}

impl FakeVideo {
    pub const MODEL_ID: &'static str = "veo-3.0-generate-001";

    fn new() -> Self {
        Self {
            starts: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
            script: Mutex::new(VecDeque::new()),
        }
    }

    /// Queue poll results; once exhausted, polls report `Running`.
    pub fn script(&self, steps: &[PollStep]) {
        self.script.lock().unwrap().extend(steps.iter().copied());
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelAdapter for FakeVideo {
    fn model_id(&self) -> &'static str {
        Self::MODEL_ID
    }

    fn is_async(&self) -> bool {
        true
    }

    async fn start(&self, request: &GenerationRequest, ctx: &StartContext<'_>) -> Result<StartResult, AdapterError> {
        assert!(matches!(request, GenerationRequest::Video(_)));
        self.starts.fetch_add(1, Ordering::SeqCst);
        let name = format!("operations/{}", ctx.job_id);
        Ok(StartResult::pending(name.clone(), json!({ "name": name })))
    }

    async fn poll(&self, operation_name: &str) -> Result<PollResult, AdapterError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let step = self.script.lock().unwrap().pop_front().unwrap_or(PollStep::Running);
        match step {
            PollStep::Running => Ok(PollResult::in_progress()),
            PollStep::Transient(message) => Err(AdapterError::Response(message.to_string())),
            PollStep::BackendError(code) => Ok(PollResult::failed(code, "backend rejected the request")),
            PollStep::Done => {
                let job_id = operation_name.trim_start_matches("operations/");
                let uri = format!("gs://{OUTPUT_BUCKET}/jobs/{job_id}/sample_0.mp4");
                let output = JobOutput::Media(vec![MediaOutput {
                    uri,
                    mime_type: Some("video/mp4".to_string()),
                    size: None,
                }]);
                Ok(PollResult::succeeded(output, json!({ "done": true })))
            }
        }
    }
}

/// Synchronous image adapter that uploads one PNG.
pub struct FakeImage {
    pub starts: AtomicUsize,
}

impl FakeImage {
    pub const MODEL_ID: &'static str = "imagen-4.0-generate-001";
}

#[async_trait]
impl ModelAdapter for FakeImage {
    fn model_id(&self) -> &'static str {
        Self::MODEL_ID
    }

    async fn start(&self, _: &GenerationRequest, ctx: &StartContext<'_>) -> Result<StartResult, AdapterError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        let bytes = b"\x89PNG";
        let uri = ctx.storage.upload(bytes, &ctx.output_path(0, "png"), "image/png").await?;
        let output = JobOutput::Media(vec![MediaOutput {
            uri,
            mime_type: Some("image/png".to_string()),
            size: Some(bytes.len() as u64),
        }]);
        Ok(StartResult::complete(output, json!({ "predictions": 1 })))
    }
}

/// Synchronous text adapter.
pub struct FakeText;

impl FakeText {
    pub const MODEL_ID: &'static str = "gemini-2.5-flash";
}

#[async_trait]
impl ModelAdapter for FakeText {
    fn model_id(&self) -> &'static str {
        Self::MODEL_ID
    }

    async fn start(&self, _: &GenerationRequest, _: &StartContext<'_>) -> Result<StartResult, AdapterError> {
        Ok(StartResult::complete(
            JobOutput::Text("Once upon a time.".to_string()),
            json!({ "candidates": 1 }),
        ))
    }
}

/// Adapter that breaks the start contract by returning both an operation and an output.
pub struct Contradictory;

impl Contradictory {
    pub const MODEL_ID: &'static str = "lyria-002";
}

#[async_trait]
impl ModelAdapter for Contradictory {
    fn model_id(&self) -> &'static str {
        Self::MODEL_ID
    }

    async fn start(&self, _: &GenerationRequest, _: &StartContext<'_>) -> Result<StartResult, AdapterError> {
        Ok(StartResult {
            operation_name: Some("operations/x".to_string()),
            output: Some(JobOutput::Text("x".to_string())),
            raw: json!({}),
        })
    }
}

/// How a misbehaving adapter breaks the start contract.
#[derive(Debug, Clone, Copy)]
pub enum BrokenStart {
    /// Neither an operation nor an output.
    Empty,
    /// An operation handle from an adapter that does not poll.
    OperationWithoutPolling,
    /// A media output whose URI cannot be signed.
    UnsignableOutput,
}

/// Synchronous adapter that returns a malformed start result.
pub struct Broken {
    model_id: &'static str,
    behavior: BrokenStart,
    pub starts: AtomicUsize,
}

impl Broken {
    pub fn new(model_id: &'static str, behavior: BrokenStart) -> Self {
        Self {
            model_id,
            behavior,
            starts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ModelAdapter for Broken {
    fn model_id(&self) -> &'static str {
        self.model_id
    }

    async fn start(&self, _: &GenerationRequest, ctx: &StartContext<'_>) -> Result<StartResult, AdapterError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(match self.behavior {
            BrokenStart::Empty => StartResult {
                operation_name: None,
                output: None,
                raw: json!({}),
            },
            BrokenStart::OperationWithoutPolling => {
                let name = format!("operations/{}", ctx.job_id);
                StartResult::pending(name.clone(), json!({ "name": name }))
            }
            BrokenStart::UnsignableOutput => {
                let output = JobOutput::Media(vec![MediaOutput {
                    uri: "https://elsewhere.invalid/clip.mp4".to_string(),
                    mime_type: Some("video/mp4".to_string()),
                    size: None,
                }]);
                StartResult::complete(output, json!({ "videos": 1 }))
            }
        })
    }
}

/// Task queue whose backend refuses every write.
pub struct UnavailableQueue;

#[async_trait]
impl TaskQueue for UnavailableQueue {
    async fn enqueue(&self, _: Task, _: EnqueueOptions, _: DateTime<Utc>) -> Result<ScheduledTask, QueueError> {
        Err(QueueError::Redis(redis::RedisError::from((
            redis::ErrorKind::IoError,
            "connection refused",
        ))))
    }

    async fn dequeue_due(&self, _: DateTime<Utc>) -> Result<Option<ScheduledTask>, QueueError> {
        Ok(None)
    }
}

/// Language model that replays canned replies.
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<String>>,
    pub calls: AtomicUsize,
}

#[async_trait]
impl LanguageModel for ScriptedLlm {
    async fn infer(&self, _: &[ChatMessage], options: InferOptions) -> Result<String, LlmError> {
        assert!(options.deterministic);
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(LlmError::EmptyResponse)
    }
}

pub fn test_config() -> JobConfig {
    JobConfig {
        ttl_window: Duration::minutes(90),
        poll_interval: Duration::seconds(10),
        max_poll_attempts: 600,
        signed_url_ttl: Duration::days(7),
        dispatch_deadline: Duration::seconds(60),
        start_deadline: Duration::seconds(600),
        output_bucket: OUTPUT_BUCKET.to_string(),
    }
}

pub struct Harness {
    pub store: Arc<MemoryJobStore>,
    pub queue: Arc<MemoryTaskQueue>,
    pub storage: Arc<MemoryObjectStore>,
    pub clock: Arc<ManualClock>,
    pub video: Arc<FakeVideo>,
    pub image: Arc<FakeImage>,
    pub empty: Arc<Broken>,
    pub unpolled: Arc<Broken>,
    pub unsignable: Arc<Broken>,
    pub llm: Arc<ScriptedLlm>,
    pub config: JobConfig,
    pub orchestrator: Orchestrator,
    pub poller: PollScheduler,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(test_config(), Vec::new())
    }

    pub fn with_config(config: JobConfig) -> Self {
        Self::build(config, Vec::new())
    }

    pub fn with_llm(replies: &[&str]) -> Self {
        Self::build(test_config(), replies.iter().map(|r| r.to_string()).collect())
    }

    fn build(config: JobConfig, replies: Vec<String>) -> Self {
        let store = Arc::new(MemoryJobStore::new());
        let queue = Arc::new(MemoryTaskQueue::new());
        let storage = Arc::new(MemoryObjectStore::new(OUTPUT_BUCKET));
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()));
        let video = Arc::new(FakeVideo::new());
        let image = Arc::new(FakeImage {
            starts: AtomicUsize::new(0),
        });
        let llm = Arc::new(ScriptedLlm {
            replies: Mutex::new(replies.into()),
            calls: AtomicUsize::new(0),
        });

        let empty = Arc::new(Broken::new("imagen-4.0-fast-generate-001", BrokenStart::Empty));
        let unpolled = Arc::new(Broken::new("chirp-3-hd", BrokenStart::OperationWithoutPolling));
        let unsignable = Arc::new(Broken::new("veo-2.0-generate-001", BrokenStart::UnsignableOutput));

        let mut registry = ModelRegistry::new();
        registry
            .register(video.clone())
            .register(image.clone())
            .register(Arc::new(FakeText))
            .register(Arc::new(Contradictory))
            .register(empty.clone())
            .register(unpolled.clone())
            .register(unsignable.clone());

        let services = JobServices {
            store: store.clone(),
            queue: queue.clone(),
            storage: storage.clone(),
            registry: Arc::new(registry),
            clock: clock.clone(),
            config: config.clone(),
        };

        Self {
            orchestrator: Orchestrator::new(services.clone(), llm.clone()),
            poller: PollScheduler::new(services),
            store,
            queue,
            storage,
            clock,
            video,
            image,
            empty,
            unpolled,
            unsignable,
            llm,
            config,
        }
    }

    /// An orchestrator over a fresh store whose task queue is down.
    pub fn with_unavailable_queue() -> (Orchestrator, Arc<MemoryJobStore>) {
        let store = Arc::new(MemoryJobStore::new());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()));
        let services = JobServices {
            store: store.clone(),
            queue: Arc::new(UnavailableQueue),
            storage: Arc::new(MemoryObjectStore::new(OUTPUT_BUCKET)),
            registry: Arc::new(ModelRegistry::new()),
            clock,
            config: test_config(),
        };
        let llm = Arc::new(ScriptedLlm {
            replies: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        });
        (Orchestrator::new(services, llm), store)
    }

    /// Deliver every task due at the current clock time, as the worker would.
    /// Returns how many tasks ran.
    pub async fn run_due(&self) -> usize {
        let mut ran = 0;
        while let Some(scheduled) = self.queue.dequeue_due(self.clock.now()).await.unwrap() {
            match &scheduled.task {
                Task::Start { job_path } => {
                    self.orchestrator.handle_created(job_path).await.unwrap();
                }
                Task::Poll { job_path } => {
                    self.poller.tick(job_path).await.unwrap();
                }
            }
            ran += 1;
        }
        ran
    }

    /// Move the clock forward and deliver whatever became due.
    pub async fn advance(&self, by: Duration) -> usize {
        self.clock.advance(by);
        self.run_due().await
    }

    /// Advance one poll interval at a time until the job is terminal or `max_ticks` pass.
    pub async fn poll_until_terminal(&self, id: Uuid, max_ticks: usize) -> JobRecord {
        for _ in 0..max_ticks {
            let record = self.job(id).await;
            if record.status.is_terminal() {
                return record;
            }
            self.advance(self.config.poll_interval).await;
        }
        self.job(id).await
    }

    pub fn now(&self) -> chrono::DateTime<Utc> {
        self.clock.now()
    }

    pub async fn job(&self, id: Uuid) -> JobRecord {
        self.store.get(id).await.unwrap().expect("job exists")
    }
}
