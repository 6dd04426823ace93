//! Shared request/response protocol for the external generation services:
//! capability probe, primary/secondary fallback, job polling and artifact
//! download. Speech and score synthesis both go through this module.

use reqwest::Client;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const MAX_POLL_ATTEMPTS: u32 = 120;

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub style: Option<String>,
    pub duration_hint: Option<f64>,
}

/// What a submit call hands back: the artifact itself, or job handles to
/// poll. Some services return several candidate jobs for one request; any
/// one of them completing satisfies the request.
#[derive(Debug)]
pub enum Submission {
    Inline(Vec<u8>),
    Jobs(Vec<String>),
}

#[derive(Debug, Clone)]
pub enum JobStatus {
    Pending,
    Complete { artifact_url: String },
    Failed { reason: String },
}

/// Contract every generation service implements: a cheap availability check,
/// a submit call, and a poll-by-id call. Artifact URLs are plain downloads.
pub trait GenerationService {
    fn name(&self) -> &'static str;

    /// Pre-flight availability check. Never propagates its own error; any
    /// failure, including network failure, reads as "unavailable".
    async fn probe(&self) -> bool;

    async fn submit(&self, request: &GenerationRequest) -> Result<Submission>;

    async fn poll(&self, job_id: &str) -> Result<JobStatus>;
}

/// Fixed-interval job poller with a bounded attempt ceiling. Exceeding the
/// ceiling is a timeout, reported distinctly from a provider-side failure.
#[derive(Debug, Clone, Copy)]
pub struct Poller {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for Poller {
    fn default() -> Self {
        Self {
            interval: POLL_INTERVAL,
            max_attempts: MAX_POLL_ATTEMPTS,
        }
    }
}

impl Poller {
    /// Polls the outstanding jobs until one completes, all fail, the attempt
    /// ceiling is hit, or the run is canceled.
    pub async fn wait_for_artifact<S: GenerationService>(
        &self,
        service: &S,
        jobs: &[String],
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<String> {
        if jobs.is_empty() {
            return Err(PipelineError::Provider {
                provider: service.name(),
                message: "submit returned no job handles".into(),
            });
        }
        if *cancel.borrow() {
            return Err(PipelineError::Canceled);
        }

        let mut failed = vec![false; jobs.len()];
        for attempt in 1..=self.max_attempts {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = canceled(cancel) => return Err(PipelineError::Canceled),
            }

            for (i, job) in jobs.iter().enumerate() {
                if failed[i] {
                    continue;
                }
                match service.poll(job).await {
                    Ok(JobStatus::Complete { artifact_url }) => {
                        info!(
                            "Job {} on '{}' completed after {} polls",
                            job,
                            service.name(),
                            attempt
                        );
                        return Ok(artifact_url);
                    }
                    Ok(JobStatus::Failed { reason }) => {
                        warn!("Job {} on '{}' failed: {}", job, service.name(), reason);
                        failed[i] = true;
                    }
                    Ok(JobStatus::Pending) => {
                        debug!(
                            "Job {} on '{}' still pending (poll {}/{})",
                            job,
                            service.name(),
                            attempt,
                            self.max_attempts
                        );
                    }
                    // Transient poll failures consume the attempt but leave
                    // the job outstanding.
                    Err(e) => warn!("Polling {} on '{}': {}", job, service.name(), e),
                }
            }

            if failed.iter().all(|f| *f) {
                return Err(PipelineError::Provider {
                    provider: service.name(),
                    message: "all submitted jobs failed".into(),
                });
            }
        }

        Err(PipelineError::PollTimeout {
            attempts: self.max_attempts,
        })
    }
}

/// Resolves once the cancel flag flips to true; never resolves if the sender
/// is gone.
async fn canceled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Cheap availability probe against a status endpoint. Any non-success,
/// including a network error or the probe timeout, reads as unavailable.
pub async fn probe_endpoint(client: &Client, url: &str, bearer: Option<&str>) -> bool {
    let mut request = client.get(url);
    if let Some(token) = bearer {
        request = request.bearer_auth(token);
    }
    match tokio::time::timeout(PROBE_TIMEOUT, request.send()).await {
        Ok(Ok(response)) => response.status().is_success(),
        _ => false,
    }
}

/// Downloads a completed artifact to `dest`. Redirects are followed by the
/// client; a partial file is removed rather than left on disk.
pub async fn download_artifact(client: &Client, url: &str, dest: &Path) -> Result<()> {
    info!("Downloading artifact to {}", dest.display());
    let result = stream_to_file(client, url, dest).await;
    if result.is_err() && dest.exists() {
        let _ = std::fs::remove_file(dest);
    }
    result
}

async fn stream_to_file(client: &Client, url: &str, dest: &Path) -> Result<()> {
    let mut response = client.get(url).send().await?.error_for_status()?;
    let mut file = std::fs::File::create(dest)?;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk)?;
    }
    file.flush()?;
    Ok(())
}

/// Runs one service end to end: submit, then either write the inline
/// artifact or poll the job handles and download the result.
pub async fn run_service<S: GenerationService>(
    service: &S,
    request: &GenerationRequest,
    dest: &Path,
    client: &Client,
    poller: &Poller,
    cancel: &mut watch::Receiver<bool>,
) -> Result<()> {
    match service.submit(request).await? {
        Submission::Inline(bytes) => {
            std::fs::write(dest, bytes)?;
            Ok(())
        }
        Submission::Jobs(jobs) => {
            let url = poller.wait_for_artifact(service, &jobs, cancel).await?;
            download_artifact(client, &url, dest).await
        }
    }
}

/// Probe-then-fallback across two services. A forced provider bypasses the
/// probe; otherwise the primary is probed and any runtime failure of its
/// generation call also falls through to the secondary. Cancellation and
/// poll timeouts are fatal to the stage and never trigger a fallback.
/// Returns the name of the provider that served the artifact.
pub async fn generate_with_fallback<P, S>(
    primary: &P,
    secondary: &S,
    forced: Option<&str>,
    request: &GenerationRequest,
    dest: &Path,
    client: &Client,
    poller: &Poller,
    cancel: &mut watch::Receiver<bool>,
) -> Result<&'static str>
where
    P: GenerationService,
    S: GenerationService,
{
    if let Some(name) = forced {
        if name == primary.name() {
            run_service(primary, request, dest, client, poller, cancel).await?;
            return Ok(primary.name());
        }
        if name == secondary.name() {
            run_service(secondary, request, dest, client, poller, cancel).await?;
            return Ok(secondary.name());
        }
        return Err(PipelineError::Config(format!(
            "forced provider '{}' is neither '{}' nor '{}'",
            name,
            primary.name(),
            secondary.name()
        )));
    }

    if primary.probe().await {
        match run_service(primary, request, dest, client, poller, cancel).await {
            Ok(()) => return Ok(primary.name()),
            Err(e @ (PipelineError::Canceled | PipelineError::PollTimeout { .. })) => {
                return Err(e);
            }
            Err(e) => warn!(
                "Provider '{}' failed ({}); falling back to '{}'",
                primary.name(),
                e,
                secondary.name()
            ),
        }
    } else {
        info!(
            "Provider '{}' unavailable; using '{}'",
            primary.name(),
            secondary.name()
        );
    }

    run_service(secondary, request, dest, client, poller, cancel).await?;
    Ok(secondary.name())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StubService {
        name: &'static str,
        available: bool,
        submission: fn() -> Result<Submission>,
        complete_after: Option<u32>,
        always_fail_jobs: bool,
        polls: AtomicU32,
    }

    impl StubService {
        fn pending_forever(name: &'static str) -> Self {
            Self {
                name,
                available: true,
                submission: || Ok(Submission::Jobs(vec!["job-1".into()])),
                complete_after: None,
                always_fail_jobs: false,
                polls: AtomicU32::new(0),
            }
        }
    }

    impl GenerationService for StubService {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn probe(&self) -> bool {
            self.available
        }

        async fn submit(&self, _request: &GenerationRequest) -> Result<Submission> {
            (self.submission)()
        }

        async fn poll(&self, _job_id: &str) -> Result<JobStatus> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.always_fail_jobs {
                return Ok(JobStatus::Failed {
                    reason: "boom".into(),
                });
            }
            match self.complete_after {
                Some(threshold) if n >= threshold => Ok(JobStatus::Complete {
                    artifact_url: "http://artifacts.test/a.wav".into(),
                }),
                _ => Ok(JobStatus::Pending),
            }
        }
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            prompt: "hello".into(),
            style: None,
            duration_hint: None,
        }
    }

    fn cancel_pair() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_after_exactly_max_attempts() {
        let service = StubService::pending_forever("stub");
        let poller = Poller {
            interval: Duration::from_secs(5),
            max_attempts: 7,
        };
        let (_tx, mut rx) = cancel_pair();

        let err = poller
            .wait_for_artifact(&service, &["job-1".into()], &mut rx)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::PollTimeout { attempts: 7 }));
        assert_eq!(service.polls.load(Ordering::SeqCst), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn completes_as_soon_as_a_job_reports_done() {
        let mut service = StubService::pending_forever("stub");
        service.complete_after = Some(3);
        let poller = Poller {
            interval: Duration::from_secs(5),
            max_attempts: 10,
        };
        let (_tx, mut rx) = cancel_pair();

        let url = poller
            .wait_for_artifact(&service, &["job-1".into()], &mut rx)
            .await
            .unwrap();

        assert_eq!(url, "http://artifacts.test/a.wav");
        assert_eq!(service.polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn all_jobs_failed_is_a_provider_error_not_a_timeout() {
        let mut service = StubService::pending_forever("stub");
        service.always_fail_jobs = true;
        let poller = Poller {
            interval: Duration::from_secs(5),
            max_attempts: 10,
        };
        let (_tx, mut rx) = cancel_pair();

        let err = poller
            .wait_for_artifact(&service, &["job-1".into(), "job-2".into()], &mut rx)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Provider { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_poll_loop() {
        let service = StubService::pending_forever("stub");
        let poller = Poller {
            interval: Duration::from_secs(3600),
            max_attempts: 100,
        };
        let (tx, mut rx) = cancel_pair();
        tx.send(true).unwrap();

        let err = poller
            .wait_for_artifact(&service, &["job-1".into()], &mut rx)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Canceled));
        assert_eq!(service.polls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn fallback_serves_from_secondary_when_primary_probe_fails() {
        let mut primary = StubService::pending_forever("primary");
        primary.available = false;
        let mut secondary = StubService::pending_forever("secondary");
        secondary.submission = || Ok(Submission::Inline(b"artifact".to_vec()));

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.wav");
        let client = Client::new();
        let (_tx, mut rx) = cancel_pair();

        let served = generate_with_fallback(
            &primary,
            &secondary,
            None,
            &request(),
            &dest,
            &client,
            &Poller::default(),
            &mut rx,
        )
        .await
        .unwrap();

        assert_eq!(served, "secondary");
        assert_eq!(std::fs::read(&dest).unwrap(), b"artifact");
        assert_eq!(primary.polls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn runtime_failure_of_primary_falls_through() {
        let mut primary = StubService::pending_forever("primary");
        primary.submission = || {
            Err(PipelineError::Provider {
                provider: "primary",
                message: "rate limited".into(),
            })
        };
        let mut secondary = StubService::pending_forever("secondary");
        secondary.submission = || Ok(Submission::Inline(b"x".to_vec()));

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.wav");
        let client = Client::new();
        let (_tx, mut rx) = cancel_pair();

        let served = generate_with_fallback(
            &primary,
            &secondary,
            None,
            &request(),
            &dest,
            &client,
            &Poller::default(),
            &mut rx,
        )
        .await
        .unwrap();

        assert_eq!(served, "secondary");
    }

    #[tokio::test]
    async fn unknown_forced_provider_is_a_config_error() {
        let primary = StubService::pending_forever("primary");
        let secondary = StubService::pending_forever("secondary");
        let dir = tempfile::tempdir().unwrap();
        let client = Client::new();
        let (_tx, mut rx) = cancel_pair();

        let err = generate_with_fallback(
            &primary,
            &secondary,
            Some("nonsense"),
            &request(),
            &dir.path().join("out.wav"),
            &client,
            &Poller::default(),
            &mut rx,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, PipelineError::Config(_)));
    }
}
