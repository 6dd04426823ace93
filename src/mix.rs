//! Mix engine: places narration, ambience and the musical bed on the shared
//! timeline and renders them to one audio file through an ffmpeg
//! filter_complex graph.
//!
//! Anchor points are deliberately asymmetric: narration starts once the
//! scroll-in animation finishes, while ambience covers the full time the
//! panel is visible, including its scroll-in.

use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

use crate::error::Result;
use crate::ffmpeg;
use crate::narration::NarrationClip;
use crate::timeline::Schedule;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Music,
    Narration,
    Ambience,
}

/// One entry of the track placement graph: a source, where it starts, how
/// loud it is, and whether it loops or gets trimmed.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackPlacement {
    pub kind: TrackKind,
    pub path: PathBuf,
    pub start_seconds: f64,
    pub gain: f64,
    pub loop_input: bool,
    pub trim_to: Option<f64>,
}

/// Builds the placement graph. Tracks with zero gain or a missing source
/// file are omitted rather than erroring; an empty result means the run
/// degrades to video-only output.
pub fn plan_tracks(
    schedule: &Schedule,
    clips: &[NarrationClip],
    score_path: Option<&Path>,
    ambience_paths: &[Option<PathBuf>],
    music_gain: f64,
    ambience_gain: f64,
) -> Vec<TrackPlacement> {
    let mut placements = Vec::new();

    if let Some(score) = score_path {
        if music_gain > 0.0 && score.is_file() {
            placements.push(TrackPlacement {
                kind: TrackKind::Music,
                path: score.to_path_buf(),
                start_seconds: 0.0,
                gain: music_gain,
                loop_input: true,
                trim_to: Some(schedule.total_duration),
            });
        } else {
            debug!("Music track omitted (gain {} / {})", music_gain, score.display());
        }
    }

    for step in &schedule.steps {
        let clip = clips.iter().find(|c| c.panel_id == step.panel_id);
        if let Some(path) = clip.and_then(|c| c.file_path.as_deref()) {
            if path.is_file() {
                placements.push(TrackPlacement {
                    kind: TrackKind::Narration,
                    path: path.to_path_buf(),
                    start_seconds: step.narration_start(),
                    gain: 1.0,
                    loop_input: false,
                    trim_to: None,
                });
            }
        }

        if ambience_gain <= 0.0 {
            continue;
        }
        if let Some(Some(path)) = ambience_paths.get(step.index) {
            if path.is_file() {
                placements.push(TrackPlacement {
                    kind: TrackKind::Ambience,
                    path: path.clone(),
                    start_seconds: step.start_time,
                    gain: ambience_gain,
                    loop_input: false,
                    trim_to: Some(step.step_duration()),
                });
            }
        }
    }

    placements
}

/// Per-input filter chains merged through a sum-and-normalize `amix`, then
/// hard-trimmed to the schedule duration.
fn build_filter(placements: &[TrackPlacement], total_duration: f64) -> String {
    let mut filter = String::new();

    for (i, placement) in placements.iter().enumerate() {
        let mut chain: Vec<String> = Vec::new();
        if let Some(trim) = placement.trim_to {
            chain.push(format!("atrim=0:{:.3}", trim));
        }
        if placement.start_seconds > 0.0 {
            let ms = (placement.start_seconds * 1000.0).round() as i64;
            chain.push(format!("adelay={0}|{0}", ms));
        }
        if placement.gain != 1.0 {
            chain.push(format!("volume={}", placement.gain));
        }
        if chain.is_empty() {
            chain.push("anull".to_string());
        }
        filter.push_str(&format!("[{}:a]{}[t{}];", i, chain.join(","), i));
    }

    for i in 0..placements.len() {
        filter.push_str(&format!("[t{}]", i));
    }
    filter.push_str(&format!(
        "amix=inputs={}:duration=longest:dropout_transition=0,atrim=0:{:.3}[aout]",
        placements.len(),
        total_duration
    ));

    filter
}

/// Renders the placement graph to a PCM WAV at `out_path`. Returns `None`
/// when no tracks resolve, which downstream treats as "no audio".
pub fn mix(
    schedule: &Schedule,
    clips: &[NarrationClip],
    score_path: Option<&Path>,
    ambience_paths: &[Option<PathBuf>],
    music_gain: f64,
    ambience_gain: f64,
    out_path: &Path,
) -> Result<Option<PathBuf>> {
    let placements = plan_tracks(
        schedule,
        clips,
        score_path,
        ambience_paths,
        music_gain,
        ambience_gain,
    );
    if placements.is_empty() {
        info!("No audio tracks resolved; skipping mix");
        return Ok(None);
    }

    let narration_count = placements
        .iter()
        .filter(|p| p.kind == TrackKind::Narration)
        .count();
    info!(
        "Mixing {} tracks ({} narration) over {:.2}s",
        placements.len(),
        narration_count,
        schedule.total_duration
    );

    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-y").arg("-loglevel").arg("error");
    for placement in &placements {
        if placement.loop_input {
            cmd.arg("-stream_loop").arg("-1");
        }
        cmd.arg("-i").arg(&placement.path);
    }
    cmd.arg("-filter_complex")
        .arg(build_filter(&placements, schedule.total_duration))
        .arg("-map")
        .arg("[aout]")
        .arg("-c:a")
        .arg("pcm_s16le")
        .arg(out_path);

    ffmpeg::run(cmd, "ffmpeg")?;
    Ok(Some(out_path.to_path_buf()))
}
