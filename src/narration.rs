//! Per-panel narration synthesis and the on-disk narration manifest.

use hound::WavReader;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::args::Options;
use crate::error::{PipelineError, Result};
use crate::panel::Panel;
use crate::provider::{generate_with_fallback, GenerationRequest, Poller};
use crate::speech::{OpenAiSpeech, PiperSpeech};

/// One panel's synthesized narration. `file_path` is `None` when the panel is
/// silent or synthesis failed; a failure additionally carries `error`.
/// Degraded clips never abort the batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NarrationClip {
    pub panel_id: String,
    pub file_path: Option<PathBuf>,
    pub duration_seconds: f64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NarrationClip {
    fn silent(panel: &Panel) -> Self {
        Self {
            panel_id: panel.id.clone(),
            file_path: None,
            duration_seconds: 0.0,
            text: String::new(),
            provider: None,
            error: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct NarrationManifest {
    panels: Vec<NarrationClip>,
}

pub fn wav_duration_seconds(path: &Path) -> Result<f64> {
    let reader = WavReader::open(path)?;
    let spec = reader.spec();
    let samples = reader.len();
    let frames = samples as f64 / spec.channels as f64;
    Ok(frames / spec.sample_rate as f64)
}

pub fn load_manifest(path: &Path) -> Result<Option<Vec<NarrationClip>>> {
    if !path.is_file() {
        return Ok(None);
    }
    let data = fs::read_to_string(path)?;
    let manifest: NarrationManifest = serde_json::from_str(&data)?;
    Ok(Some(manifest.panels))
}

pub fn save_manifest(path: &Path, clips: &[NarrationClip]) -> Result<()> {
    let manifest = NarrationManifest {
        panels: clips.to_vec(),
    };
    let data = serde_json::to_string_pretty(&manifest)?;
    fs::write(path, data)?;
    Ok(())
}

/// Synthesizes narration for every panel, sequentially. A panel whose
/// synthesis fails is recorded with an error and zero duration; cancellation
/// and poll timeouts abort the whole stage.
pub async fn synthesize_all(
    panels: &[Panel],
    opts: &Options,
    client: &Client,
    out_dir: &Path,
    cancel: &mut watch::Receiver<bool>,
) -> Result<Vec<NarrationClip>> {
    fs::create_dir_all(out_dir)?;

    let primary = OpenAiSpeech::new(
        client.clone(),
        opts.speech_api_url.clone(),
        opts.speech_api_key.clone(),
    );
    let secondary = PiperSpeech::new(opts.piper_model.clone());
    let forced = opts
        .force_provider
        .as_deref()
        .filter(|name| *name == "openai" || *name == "piper");
    let poller = Poller::default();

    let mut clips = Vec::with_capacity(panels.len());
    for (i, panel) in panels.iter().enumerate() {
        let text = panel.narration_text().trim().to_string();
        if text.is_empty() {
            info!("Panel '{}' has no narration text; staying silent", panel.id);
            clips.push(NarrationClip::silent(panel));
            continue;
        }

        info!(
            "Synthesizing narration {}/{} for panel '{}' ({} chars)",
            i + 1,
            panels.len(),
            panel.id,
            text.len()
        );

        let dest = out_dir.join(format!("narration_{}.wav", panel.id));
        let request = GenerationRequest {
            prompt: text.clone(),
            style: None,
            duration_hint: None,
        };

        match generate_with_fallback(
            &primary, &secondary, forced, &request, &dest, client, &poller, cancel,
        )
        .await
        {
            Ok(provider) => match wav_duration_seconds(&dest) {
                Ok(duration) => {
                    info!(
                        "Panel '{}' narrated by '{}' ({:.2}s)",
                        panel.id, provider, duration
                    );
                    clips.push(NarrationClip {
                        panel_id: panel.id.clone(),
                        file_path: Some(dest),
                        duration_seconds: duration,
                        text,
                        provider: Some(provider.to_string()),
                        error: None,
                    });
                }
                Err(e) => {
                    warn!(
                        "Panel '{}' produced an unreadable clip: {}",
                        panel.id, e
                    );
                    let mut clip = NarrationClip::silent(panel);
                    clip.text = text;
                    clip.error = Some(format!("unreadable clip: {}", e));
                    clips.push(clip);
                }
            },
            Err(e @ (PipelineError::Canceled | PipelineError::PollTimeout { .. })) => {
                return Err(e);
            }
            Err(e) => {
                warn!("Narration for panel '{}' failed: {}", panel.id, e);
                let mut clip = NarrationClip::silent(panel);
                clip.text = text;
                clip.error = Some(e.to_string());
                clips.push(clip);
            }
        }
    }

    Ok(clips)
}

/// Narration durations in panel order, for the timeline builder. A clip whose
/// file has gone missing since the manifest was written counts as silent.
pub fn durations_for(panels: &[Panel], clips: &[NarrationClip]) -> Vec<f64> {
    panels
        .iter()
        .map(|panel| {
            clips
                .iter()
                .find(|clip| clip.panel_id == panel.id)
                .filter(|clip| clip.file_path.as_deref().is_some_and(Path::is_file))
                .map(|clip| clip.duration_seconds)
                .unwrap_or(0.0)
        })
        .collect()
}
