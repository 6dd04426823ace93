//! Speech synthesis providers. The hosted API is the primary; a local piper
//! subprocess is the fallback so narration still works offline.

use reqwest::Client;
use serde_json::json;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::info;

use crate::error::{PipelineError, Result};
use crate::provider::{probe_endpoint, GenerationRequest, GenerationService, JobStatus, Submission};

const SPEECH_MODEL: &str = "tts-1";
const SPEECH_VOICE: &str = "alloy";

/// Hosted text-to-speech behind an OpenAI-compatible `/audio/speech`
/// endpoint. Returns the WAV bytes inline; no job handles involved.
#[derive(Debug, Clone)]
pub struct OpenAiSpeech {
    client: Client,
    base_url: String,
    api_key: String,
}

impl OpenAiSpeech {
    pub fn new(client: Client, base_url: String, api_key: String) -> Self {
        Self {
            client,
            base_url,
            api_key,
        }
    }
}

impl GenerationService for OpenAiSpeech {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn probe(&self) -> bool {
        if self.api_key.is_empty() {
            return false;
        }
        let url = format!("{}/models", self.base_url);
        probe_endpoint(&self.client, &url, Some(&self.api_key)).await
    }

    async fn submit(&self, request: &GenerationRequest) -> Result<Submission> {
        let body = json!({
            "model": SPEECH_MODEL,
            "voice": SPEECH_VOICE,
            "input": request.prompt,
            "response_format": "wav",
        });
        let response = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(PipelineError::Provider {
                provider: self.name(),
                message: format!("speech request failed ({}): {}", status, detail),
            });
        }
        Ok(Submission::Inline(response.bytes().await?.to_vec()))
    }

    async fn poll(&self, _job_id: &str) -> Result<JobStatus> {
        Err(PipelineError::Provider {
            provider: self.name(),
            message: "provider does not issue job handles".into(),
        })
    }
}

/// Local piper TTS. Text goes in on stdin, a WAV file comes out; the probe
/// checks that both the binary and the voice model are present.
#[derive(Debug, Clone)]
pub struct PiperSpeech {
    model_path: PathBuf,
}

impl PiperSpeech {
    pub fn new(model_path: PathBuf) -> Self {
        Self { model_path }
    }
}

impl GenerationService for PiperSpeech {
    fn name(&self) -> &'static str {
        "piper"
    }

    async fn probe(&self) -> bool {
        if !self.model_path.is_file() {
            return false;
        }
        Command::new("piper")
            .arg("--help")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    async fn submit(&self, request: &GenerationRequest) -> Result<Submission> {
        let out = tempfile::Builder::new()
            .prefix("scrollcast_piper_")
            .suffix(".wav")
            .tempfile()?;
        let out_path = out.path().to_path_buf();

        info!("Calling piper for {} chars of text", request.prompt.len());
        let mut child = Command::new("piper")
            .arg("--model")
            .arg(&self.model_path)
            .arg("--output_file")
            .arg(&out_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| PipelineError::Provider {
                provider: "piper",
                message: format!("failed to spawn piper: {}", e),
            })?;

        {
            let stdin = child.stdin.as_mut().ok_or(PipelineError::Provider {
                provider: "piper",
                message: "failed to open piper stdin".into(),
            })?;
            stdin.write_all(request.prompt.as_bytes())?;
        }

        let status = child.wait()?;
        if !status.success() {
            return Err(PipelineError::Provider {
                provider: "piper",
                message: format!("piper returned non-zero status {}", status),
            });
        }

        Ok(Submission::Inline(std::fs::read(&out_path)?))
    }

    async fn poll(&self, _job_id: &str) -> Result<JobStatus> {
        Err(PipelineError::Provider {
            provider: self.name(),
            message: "provider does not issue job handles".into(),
        })
    }
}
