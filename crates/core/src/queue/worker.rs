use super::{Job, JobPayload, JobQueue};
use crate::{
    analysis::IntelligenceEngine,
    artifacts::ArtifactKind,
    cache::{self, Cache},
    compiler::CompilationService,
    deploy::DeploymentService,
    utils::current_timestamp,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::{
    sync::Semaphore,
    task::JoinSet,
    time::{Duration, MissedTickBehavior},
};

/// Progress handle passed to a running job
pub struct Progress {
    queue: JobQueue,
    id: String,
}

impl Progress {
    pub fn report(&self, percent: u8) {
        self.queue.set_progress(&self.id, percent);
    }
}

/// Executes one job; an `Err` makes the queue retry it
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job, progress: &Progress) -> eyre::Result<Value>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Processing,
    Completed,
    Failed,
}

/// Status row written to the cache under `job:<id>`.
///
/// Every attempt overwrites the row, so only the last attempt is visible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub status: RecordStatus,
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: u64,
}

impl JobRecord {
    fn new(status: RecordStatus, attempt: u32) -> Self {
        Self {
            status,
            attempt,
            result: None,
            error: None,
            updated_at: current_timestamp(),
        }
    }
}

/// Pulls jobs from one queue with bounded concurrency and a start rate limit
#[derive(Clone)]
pub struct Worker {
    queue: JobQueue,
    handler: Arc<dyn JobHandler>,
    cache: Cache,
    concurrency: usize,
    rate_limit_per_sec: u32,
}

impl Worker {
    pub fn new(queue: JobQueue, handler: Arc<dyn JobHandler>, cache: Cache) -> Self {
        Self {
            queue,
            handler,
            cache,
            concurrency: 1,
            rate_limit_per_sec: 0,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Maximum job starts per second; zero disables the limit
    pub fn with_rate_limit(mut self, per_sec: u32) -> Self {
        self.rate_limit_per_sec = per_sec;
        self
    }

    /// Processes jobs until the queue is closed, then waits for in-flight jobs
    pub async fn run(&self) {
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut limiter = (self.rate_limit_per_sec > 0).then(|| {
            let period = (Duration::from_secs(1) / self.rate_limit_per_sec)
                .max(Duration::from_millis(1));
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        let mut tasks = JoinSet::new();

        tracing::info!(
            "Worker started on {} queue (concurrency {})",
            self.queue.name(),
            self.concurrency
        );
        loop {
            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            let Some(job) = self.queue.next().await else {
                break;
            };
            if let Some(limiter) = limiter.as_mut() {
                limiter.tick().await;
            }

            let worker = self.clone();
            tasks.spawn(async move {
                let _permit = permit;
                worker.settle(job).await;
            });
            while let Some(joined) = tasks.try_join_next() {
                log_panic(joined);
            }
        }

        while let Some(joined) = tasks.join_next().await {
            log_panic(joined);
        }
        tracing::info!("Worker on {} queue stopped", self.queue.name());
    }

    async fn settle(&self, job: Job) {
        match self.process(&job).await {
            Ok(result) => self.queue.complete(&job.id, result),
            Err(e) => {
                self.queue.fail(&job.id, format!("{e}"));
            }
        }
    }

    /// Runs one attempt, recording its status row; failures are re-raised.
    ///
    /// The handler runs on its own task so that a panic fails the attempt
    /// instead of leaving the job active.
    async fn process(&self, job: &Job) -> eyre::Result<Value> {
        tracing::info!("Processing job {} (attempt {})", job.id, job.attempts_made);
        self.record(&job.id, JobRecord::new(RecordStatus::Processing, job.attempts_made))
            .await;

        let handler = self.handler.clone();
        let attempt = job.clone();
        let progress = Progress {
            queue: self.queue.clone(),
            id: job.id.clone(),
        };
        let outcome = tokio::spawn(async move { handler.handle(&attempt, &progress).await })
            .await
            .unwrap_or_else(|e| Err(eyre::eyre!("Job handler aborted: {}", e)));

        match outcome {
            Ok(result) => {
                let mut record = JobRecord::new(RecordStatus::Completed, job.attempts_made);
                record.result = Some(result.clone());
                self.record(&job.id, record).await;
                Ok(result)
            }
            Err(e) => {
                let mut record = JobRecord::new(RecordStatus::Failed, job.attempts_made);
                record.error = Some(format!("{e}"));
                self.record(&job.id, record).await;
                Err(e)
            }
        }
    }

    async fn record(&self, id: &str, record: JobRecord) {
        if !self.cache.set(&cache::job_key(id), &record, None).await {
            tracing::debug!("Status row for job {} not written", id);
        }
    }
}

fn log_panic(joined: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        tracing::error!("Job task aborted: {}", e);
    }
}

/// Routes each job subtype to the service that performs it
#[derive(Clone)]
pub struct JobDispatcher {
    engine: IntelligenceEngine,
    compilers: Vec<CompilationService>,
    deployer: DeploymentService,
}

impl JobDispatcher {
    pub fn new(engine: IntelligenceEngine, deployer: DeploymentService) -> Self {
        Self {
            engine,
            compilers: Vec::new(),
            deployer,
        }
    }

    pub fn with_compiler(mut self, compiler: CompilationService) -> Self {
        self.compilers.push(compiler);
        self
    }

    fn compiler(&self, chain: ArtifactKind) -> eyre::Result<&CompilationService> {
        self.compilers
            .iter()
            .find(|compiler| compiler.kind() == chain)
            .ok_or_else(|| eyre::eyre!("No {} compiler configured", chain))
    }
}

#[async_trait]
impl JobHandler for JobDispatcher {
    async fn handle(&self, job: &Job, progress: &Progress) -> eyre::Result<Value> {
        progress.report(10);
        let result = match &job.payload {
            JobPayload::Compile { chain, request } => {
                let report = self.compiler(*chain)?.compile(request).await.into_result()?;
                json!({
                    "artifactId": report.artifact_id,
                    "kind": report.kind,
                    "contractName": report.contract_name,
                })
            }
            JobPayload::Analyze { source } => {
                let analysis = self.engine.analyze(source).await.into_result()?;
                json!({
                    "sourceHash": analysis.source_hash,
                    "functions": analysis.functions.len(),
                    "maxRisk": analysis.max_risk(),
                })
            }
            JobPayload::Deploy { request } => {
                let record = self.deployer.submit(request).await.into_result()?;
                json!({
                    "artifactId": record.artifact_id,
                    "onchainId": record.onchain_id,
                    "transactionHash": record.transaction_hash,
                })
            }
        };
        progress.report(100);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        artifacts::{metadata::FsMetadataStore, ArtifactStore},
        compiler::{tests::MockToolchain, CompileRequest},
        config::{NetworkRegistry, PollingConfig},
        queue::{JobPolicy, JobState, QueueName},
        utils::hash_bytes,
    };
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Fails the first `failures` attempts of every job
    #[derive(Default)]
    struct Flaky {
        failures: u32,
        delay: Duration,
        calls: AtomicU32,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl JobHandler for Flaky {
        async fn handle(&self, job: &Job, progress: &Progress) -> eyre::Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(running, Ordering::SeqCst);
            progress.report(50);
            tokio::time::sleep(self.delay).await;
            self.running.fetch_sub(1, Ordering::SeqCst);

            if job.attempts_made <= self.failures {
                eyre::bail!("attempt {} failed", job.attempts_made);
            }
            Ok(json!(job.id))
        }
    }

    /// Panics on the first `panics` attempts of every job
    struct Panicky {
        panics: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl JobHandler for Panicky {
        async fn handle(&self, job: &Job, _progress: &Progress) -> eyre::Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if job.attempts_made <= self.panics {
                panic!("handler blew up on attempt {}", job.attempts_made);
            }
            Ok(json!("recovered"))
        }
    }

    fn analyze_job() -> JobPayload {
        JobPayload::Analyze {
            source: "contract A {}".to_string(),
        }
    }

    async fn run_to_completion(worker: Worker, queue: &JobQueue) {
        let running = tokio::spawn(async move { worker.run().await });
        queue.drain().await;
        queue.close();
        running.await.unwrap();
    }

    async fn row(cache: &Cache, id: &str) -> JobRecord {
        cache.get_as(&cache::job_key(id)).await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_attempts_are_retried() {
        let queue = JobQueue::new(QueueName::Analyze, JobPolicy::default());
        let cache = Cache::in_memory();
        let handler = Arc::new(Flaky {
            failures: 2,
            ..Default::default()
        });
        let id = queue.add(analyze_job());

        run_to_completion(Worker::new(queue.clone(), handler.clone(), cache.clone()), &queue).await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        let status = queue.status(&id);
        assert_eq!(status.status, JobState::Completed);
        assert_eq!(status.result, Some(json!(id)));

        let record = row(&cache, &id).await;
        assert_eq!(record.status, RecordStatus::Completed);
        assert_eq!(record.attempt, 3);
        assert_eq!(record.error, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_job_records_last_error() {
        let queue = JobQueue::new(QueueName::Analyze, JobPolicy::default());
        let cache = Cache::in_memory();
        let handler = Arc::new(Flaky {
            failures: u32::MAX,
            ..Default::default()
        });
        let id = queue.add(analyze_job());

        run_to_completion(Worker::new(queue.clone(), handler.clone(), cache.clone()), &queue).await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert_eq!(queue.status(&id).status, JobState::Failed);
        let record = row(&cache, &id).await;
        assert_eq!(record.status, RecordStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("attempt 3 failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_handler_fails_the_attempt() {
        let queue = JobQueue::new(QueueName::Analyze, JobPolicy::default());
        let cache = Cache::in_memory();
        let always = Arc::new(Panicky {
            panics: u32::MAX,
            calls: AtomicU32::new(0),
        });
        let id = queue.add(analyze_job());

        let worker = Worker::new(queue.clone(), always.clone(), cache.clone());
        tokio::time::timeout(Duration::from_secs(60), run_to_completion(worker, &queue))
            .await
            .unwrap();

        assert_eq!(always.calls.load(Ordering::SeqCst), 3);
        let status = queue.status(&id);
        assert_eq!(status.status, JobState::Failed);
        assert!(status.error.unwrap().contains("panicked"));
        assert_eq!(queue.counts().active, 0);

        let record = row(&cache, &id).await;
        assert_eq!(record.status, RecordStatus::Failed);
        assert_eq!(record.attempt, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_attempt_is_retried() {
        let queue = JobQueue::new(QueueName::Analyze, JobPolicy::default());
        let cache = Cache::in_memory();
        let once = Arc::new(Panicky {
            panics: 1,
            calls: AtomicU32::new(0),
        });
        let id = queue.add(analyze_job());

        let worker = Worker::new(queue.clone(), once.clone(), cache.clone());
        tokio::time::timeout(Duration::from_secs(60), run_to_completion(worker, &queue))
            .await
            .unwrap();

        assert_eq!(once.calls.load(Ordering::SeqCst), 2);
        let status = queue.status(&id);
        assert_eq!(status.status, JobState::Completed);
        assert_eq!(status.result, Some(json!("recovered")));
        assert_eq!(row(&cache, &id).await.status, RecordStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let queue = JobQueue::new(QueueName::Analyze, JobPolicy::default());
        let handler = Arc::new(Flaky {
            delay: Duration::from_millis(500),
            ..Default::default()
        });
        for _ in 0..6 {
            queue.add(analyze_job());
        }

        let worker = Worker::new(queue.clone(), handler.clone(), Cache::in_memory())
            .with_concurrency(2)
            .with_rate_limit(100);
        run_to_completion(worker, &queue).await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 6);
        assert_eq!(handler.peak.load(Ordering::SeqCst), 2);
        assert_eq!(queue.counts().completed, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_rows_survive_cache_outage() {
        let queue = JobQueue::new(QueueName::Analyze, JobPolicy::default());
        let cache = Cache::new(Arc::new(crate::cache::tests::RecordingBackend::failing()));
        let id = queue.add(analyze_job());

        run_to_completion(
            Worker::new(queue.clone(), Arc::new(Flaky::default()), cache),
            &queue,
        )
        .await;
        assert_eq!(queue.status(&id).status, JobState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatcher_routes_by_subtype() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::open(dir.path().join("store")).unwrap();
        let metadata = Arc::new(FsMetadataStore::new(dir.path().join("metadata")));
        let cache = Cache::in_memory();
        let compiler = CompilationService::new(
            Arc::new(MockToolchain::default()),
            store.clone(),
            metadata.clone(),
            cache.clone(),
        );
        let deployer = DeploymentService::new(
            store,
            metadata,
            NetworkRegistry::default(),
            PollingConfig::default(),
        );
        let dispatcher = Arc::new(
            JobDispatcher::new(IntelligenceEngine::new(cache.clone(), 60), deployer)
                .with_compiler(compiler),
        );

        let policy = JobPolicy {
            attempts: 1,
            ..Default::default()
        };
        let compile = JobQueue::new(QueueName::Compile, policy);
        let source = "contract Test { uint256 public value = 1; }";
        let built = compile.add(JobPayload::Compile {
            chain: ArtifactKind::Evm,
            request: CompileRequest {
                source: source.to_string(),
                contract_name: None,
                network: "localhost".to_string(),
            },
        });
        let unsupported = compile.add(JobPayload::Compile {
            chain: ArtifactKind::Soroban,
            request: CompileRequest {
                source: "#[contract] pub struct C;".to_string(),
                contract_name: None,
                network: "testnet".to_string(),
            },
        });
        let analyze = JobQueue::new(QueueName::Analyze, policy);
        let analyzed = analyze.add(JobPayload::Analyze {
            source: source.to_string(),
        });

        run_to_completion(Worker::new(compile.clone(), dispatcher.clone(), cache.clone()), &compile)
            .await;
        run_to_completion(Worker::new(analyze.clone(), dispatcher, cache.clone()), &analyze).await;

        let compiled = compile.status(&built);
        assert_eq!(compiled.status, JobState::Completed);
        assert_eq!(compiled.progress, Some(100));
        let bytecode = [b"bytecode:".as_slice(), source.as_bytes()].concat();
        assert_eq!(
            compiled.result.unwrap()["artifactId"],
            json!(hash_bytes(&bytecode))
        );

        let failed = compile.status(&unsupported);
        assert_eq!(failed.status, JobState::Failed);
        assert!(failed.error.unwrap().contains("No soroban compiler"));

        let result = analyze.status(&analyzed).result.unwrap();
        assert_eq!(result["sourceHash"], json!(hash_bytes(source.as_bytes())));
        assert_eq!(result["functions"], json!(0));
    }
}
