//! Score synthesis providers and the once-per-run score step. Replicate's
//! predictions API is the primary; a self-hosted MusicGen server with the
//! same submit/poll/download shape is the fallback. Both return job handles.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tracing::info;

use crate::args::Options;
use crate::error::{PipelineError, Result};
use crate::provider::{
    generate_with_fallback, probe_endpoint, GenerationRequest, GenerationService, JobStatus,
    Poller, Submission,
};

const REPLICATE_API_BASE: &str = "https://api.replicate.com/v1";
const REPLICATE_MUSICGEN_VERSION: &str =
    "671ac645ce5e552cc63a54a2bbff63fcf798043055d2dac5fc9e36a837eedcfb";

/// Provenance manifest written next to the cached score file so a reused
/// score still reports which provider produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreInfo {
    pub file_path: PathBuf,
    pub provider: String,
    pub duration_hint: f64,
}

pub struct ReplicateScore {
    client: Client,
    api_token: String,
}

impl ReplicateScore {
    pub fn new(client: Client, api_token: String) -> Self {
        Self { client, api_token }
    }
}

#[derive(Debug, Deserialize)]
struct Prediction {
    id: String,
    status: String,
    #[serde(default)]
    output: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

impl GenerationService for ReplicateScore {
    fn name(&self) -> &'static str {
        "replicate"
    }

    async fn probe(&self) -> bool {
        if self.api_token.is_empty() {
            return false;
        }
        let url = format!("{}/account", REPLICATE_API_BASE);
        probe_endpoint(&self.client, &url, Some(&self.api_token)).await
    }

    async fn submit(&self, request: &GenerationRequest) -> Result<Submission> {
        let prompt = match &request.style {
            Some(style) => format!("{}, {}", request.prompt, style),
            None => request.prompt.clone(),
        };
        let body = json!({
            "version": REPLICATE_MUSICGEN_VERSION,
            "input": {
                "prompt": prompt,
                "duration": request.duration_hint.unwrap_or(30.0).ceil() as u32,
                "output_format": "wav",
            },
        });
        let response = self
            .client
            .post(format!("{}/predictions", REPLICATE_API_BASE))
            .bearer_auth(&self.api_token)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(PipelineError::Provider {
                provider: self.name(),
                message: format!("prediction submit failed ({}): {}", status, detail),
            });
        }

        let prediction: Prediction = response.json().await?;
        Ok(Submission::Jobs(vec![prediction.id]))
    }

    async fn poll(&self, job_id: &str) -> Result<JobStatus> {
        let response = self
            .client
            .get(format!("{}/predictions/{}", REPLICATE_API_BASE, job_id))
            .bearer_auth(&self.api_token)
            .send()
            .await?
            .error_for_status()?;
        let prediction: Prediction = response.json().await?;

        match prediction.status.as_str() {
            "succeeded" => match artifact_url(prediction.output.as_ref()) {
                Some(url) => Ok(JobStatus::Complete { artifact_url: url }),
                None => Ok(JobStatus::Failed {
                    reason: "prediction succeeded without an output URL".into(),
                }),
            },
            "failed" | "canceled" => Ok(JobStatus::Failed {
                reason: prediction
                    .error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| format!("prediction {} reported {}", prediction.id, prediction.status)),
            }),
            _ => Ok(JobStatus::Pending),
        }
    }
}

/// Replicate reports output either as one URI or as a list of them.
fn artifact_url(output: Option<&serde_json::Value>) -> Option<String> {
    match output? {
        serde_json::Value::String(url) => Some(url.clone()),
        serde_json::Value::Array(items) => items.first()?.as_str().map(str::to_string),
        _ => None,
    }
}

pub struct MusicGenScore {
    client: Client,
    base_url: String,
}

impl MusicGenScore {
    pub fn new(client: Client, base_url: String) -> Self {
        Self { client, base_url }
    }
}

#[derive(Debug, Deserialize)]
struct MusicGenJob {
    job_id: String,
}

#[derive(Debug, Deserialize)]
struct MusicGenStatus {
    status: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl GenerationService for MusicGenScore {
    fn name(&self) -> &'static str {
        "musicgen"
    }

    async fn probe(&self) -> bool {
        probe_endpoint(&self.client, &format!("{}/health", self.base_url), None).await
    }

    async fn submit(&self, request: &GenerationRequest) -> Result<Submission> {
        let body = json!({
            "prompt": request.prompt,
            "style": request.style,
            "duration": request.duration_hint.unwrap_or(30.0).ceil() as u32,
        });
        let job: MusicGenJob = self
            .client
            .post(format!("{}/generate", self.base_url))
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(Submission::Jobs(vec![job.job_id]))
    }

    async fn poll(&self, job_id: &str) -> Result<JobStatus> {
        let status: MusicGenStatus = self
            .client
            .get(format!("{}/jobs/{}", self.base_url, job_id))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        match status.status.as_str() {
            "complete" => {
                let artifact_url = status
                    .url
                    .unwrap_or_else(|| format!("{}/jobs/{}/artifact", self.base_url, job_id));
                Ok(JobStatus::Complete { artifact_url })
            }
            "failed" => Ok(JobStatus::Failed {
                reason: status.error.unwrap_or_else(|| "job failed".into()),
            }),
            _ => Ok(JobStatus::Pending),
        }
    }
}

/// Synthesizes (or reuses) the single musical bed for the run. The target
/// duration comes from the measured video, not the theoretical schedule.
pub async fn synthesize(
    opts: &Options,
    client: &Client,
    target_duration: f64,
    cancel: &mut watch::Receiver<bool>,
) -> Result<ScoreInfo> {
    let dir = opts.explainer_dir();
    fs::create_dir_all(&dir)?;
    let score_path = dir.join("score.wav");
    let manifest_path = dir.join("score.json");

    if opts.reuse_score && score_path.is_file() {
        let info = load_manifest(&manifest_path)?.unwrap_or(ScoreInfo {
            file_path: score_path.clone(),
            provider: "unknown".into(),
            duration_hint: target_duration,
        });
        info!(
            "Reusing cached score from '{}' at {}",
            info.provider,
            score_path.display()
        );
        return Ok(info);
    }

    let request = GenerationRequest {
        prompt: "instrumental backing track for a narrated explainer".to_string(),
        style: Some(opts.score_style.clone()),
        duration_hint: Some(target_duration),
    };

    let primary = ReplicateScore::new(client.clone(), opts.replicate_api_token.clone());
    let secondary = MusicGenScore::new(client.clone(), opts.musicgen_url.clone());
    let forced = opts.force_provider.as_deref().filter(|name| {
        *name == primary.name() || *name == secondary.name()
    });

    let provider = generate_with_fallback(
        &primary,
        &secondary,
        forced,
        &request,
        &score_path,
        client,
        &Poller::default(),
        cancel,
    )
    .await?;

    let score = ScoreInfo {
        file_path: score_path,
        provider: provider.to_string(),
        duration_hint: target_duration,
    };
    save_manifest(&manifest_path, &score)?;
    info!("Score synthesized by '{}'", score.provider);
    Ok(score)
}

fn load_manifest(path: &Path) -> Result<Option<ScoreInfo>> {
    if !path.is_file() {
        return Ok(None);
    }
    let data = fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&data)?))
}

fn save_manifest(path: &Path, score: &ScoreInfo) -> Result<()> {
    let data = serde_json::to_string_pretty(score)?;
    fs::write(path, data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_url_handles_both_output_shapes() {
        let single = serde_json::json!("https://x.test/a.wav");
        let list = serde_json::json!(["https://x.test/b.wav", "https://x.test/c.wav"]);
        assert_eq!(
            artifact_url(Some(&single)).as_deref(),
            Some("https://x.test/a.wav")
        );
        assert_eq!(
            artifact_url(Some(&list)).as_deref(),
            Some("https://x.test/b.wav")
        );
        assert_eq!(artifact_url(Some(&serde_json::json!(42))), None);
        assert_eq!(artifact_url(None), None);
    }

    #[test]
    fn score_manifest_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("score.json");
        let score = ScoreInfo {
            file_path: dir.path().join("score.wav"),
            provider: "musicgen".into(),
            duration_hint: 42.5,
        };
        save_manifest(&path, &score).unwrap();
        let loaded = load_manifest(&path).unwrap().unwrap();
        assert_eq!(loaded.provider, "musicgen");
        assert!((loaded.duration_hint - 42.5).abs() < 1e-9);
    }
}
