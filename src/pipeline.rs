//! Pipeline orchestrator: sequences narration, timeline, capture, score,
//! mix and mux per output format, with reuse flags short-circuiting the
//! expensive generation stages.

use anyhow::Context;
use reqwest::Client;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::ambience::AmbienceLibrary;
use crate::args::{Aspect, Options};
use crate::capture;
use crate::ffmpeg;
use crate::mix;
use crate::narration::{self, NarrationClip};
use crate::panel::{self, Panel};
use crate::score::{self, ScoreInfo};
use crate::surface::HttpSurface;
use crate::timeline;

/// Margin added to the measured video duration before requesting the score.
/// Capture wall-clock time tracks the schedule closely but not exactly
/// (frame-rate rounding, capture start-up latency), so the bed is ordered a
/// little long and trimmed at mix time.
const SCORE_SAFETY_MARGIN: f64 = 2.0;

const HTTP_TIMEOUT: Duration = Duration::from_secs(300);

pub async fn run(opts: &Options, mut cancel: watch::Receiver<bool>) -> anyhow::Result<()> {
    let client = Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .context("failed to build HTTP client")?;

    let panels = panel::load_panels(&opts.panels_path()).context("panel loading failed")?;

    std::fs::create_dir_all(opts.explainer_dir())
        .context("failed to create the work directory")?;

    let clips = narration_stage(&panels, opts, &client, &mut cancel)
        .await
        .context("narration synthesis failed")?;
    let durations = narration::durations_for(&panels, &clips);

    let ambience_paths = ambience_stage(&panels, opts);

    let mut score: Option<ScoreInfo> = None;
    for &aspect in &opts.formats {
        render_format(
            opts,
            &client,
            &panels,
            &clips,
            &durations,
            &ambience_paths,
            &mut score,
            aspect,
            &mut cancel,
        )
        .await
        .with_context(|| format!("rendering the {} output failed", aspect.label()))?;
    }

    Ok(())
}

async fn narration_stage(
    panels: &[Panel],
    opts: &Options,
    client: &Client,
    cancel: &mut watch::Receiver<bool>,
) -> anyhow::Result<Vec<NarrationClip>> {
    if opts.skip_narration {
        info!("Narration skipped; all panels hold for the minimum pause");
        return Ok(Vec::new());
    }

    let manifest_path = opts.explainer_dir().join("narration.json");
    if opts.reuse_narration {
        if let Some(clips) = narration::load_manifest(&manifest_path)? {
            info!(
                "Reusing narration manifest with {} clips from {}",
                clips.len(),
                manifest_path.display()
            );
            return Ok(clips);
        }
        warn!("No narration manifest to reuse; synthesizing from scratch");
    }

    let out_dir = opts.explainer_dir().join("narration");
    let clips = narration::synthesize_all(panels, opts, client, &out_dir, cancel).await?;
    narration::save_manifest(&manifest_path, &clips)?;

    let failures = clips.iter().filter(|c| c.error.is_some()).count();
    if failures > 0 {
        warn!(
            "{} of {} panels fell back to silence; see the manifest for details",
            failures,
            clips.len()
        );
    }
    Ok(clips)
}

fn ambience_stage(panels: &[Panel], opts: &Options) -> Vec<Option<PathBuf>> {
    if opts.skip_ambience {
        return vec![None; panels.len()];
    }
    let library = AmbienceLibrary::open(&opts.ambience_dir);
    panels
        .iter()
        .map(|panel| {
            let resolved = library.resolve(panel);
            if resolved.is_none() {
                info!("No ambience for panel '{}'", panel.id);
            }
            resolved
        })
        .collect()
}

#[allow(clippy::too_many_arguments)]
async fn render_format(
    opts: &Options,
    client: &Client,
    panels: &[Panel],
    clips: &[NarrationClip],
    durations: &[f64],
    ambience_paths: &[Option<PathBuf>],
    score: &mut Option<ScoreInfo>,
    aspect: Aspect,
    cancel: &mut watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let (width, height) = aspect.dimensions();
    let schedule = timeline::build(
        panels,
        durations,
        height as f64,
        opts.pause_padding,
        opts.scroll_speed,
    );
    info!(
        "Schedule for {}: {} steps, {:.2}s total",
        aspect.label(),
        schedule.steps.len(),
        schedule.total_duration
    );

    // Scratch (frame dump, silent video, intermediate mix) lives in a temp
    // dir owned by this format pass and is removed no matter how the pass
    // ends. Only the cached manifests and the final deliverable survive.
    let scratch = tempfile::Builder::new()
        .prefix("scrollcast_")
        .tempdir_in(&opts.work_dir)
        .context("failed to create the scratch directory")?;

    let page_url = format!(
        "{}/explainer/{}?w={}&h={}",
        opts.surface_url, opts.explainer, width, height
    );
    let mut surface = HttpSurface::new(opts.surface_url.clone());
    let frame_dir = scratch.path().join("frames");
    let recording = capture::record(&mut surface, &schedule, &page_url, &frame_dir, cancel)
        .await
        .context("capture failed")?;

    let silent_video = scratch.path().join("silent.mp4");
    capture::encode_video(&recording, width, height, &silent_video)
        .context("video encoding failed")?;

    let measured = ffmpeg::probe_duration(&silent_video).context("duration probe failed")?;
    info!(
        "Encoded video measures {:.2}s (schedule {:.2}s, capture wall clock {:.2}s)",
        measured,
        schedule.total_duration,
        recording.wall_clock.as_secs_f64()
    );

    if score.is_none() && !opts.skip_score {
        let target = measured + SCORE_SAFETY_MARGIN;
        let info = score::synthesize(opts, client, target, cancel)
            .await
            .context("score synthesis failed")?;
        *score = Some(info);
    }

    let mixed = mix::mix(
        &schedule,
        clips,
        score.as_ref().map(|s| s.file_path.as_path()),
        ambience_paths,
        opts.music_gain,
        opts.ambience_gain,
        &scratch.path().join("mix.wav"),
    )
    .context("audio mix failed")?;

    let final_path = opts
        .explainer_dir()
        .join(format!("{}_{}.mp4", opts.explainer, aspect.label()));
    ffmpeg::mux(&silent_video, mixed.as_deref(), &final_path).context("mux failed")?;

    info!("Finished {} output: {}", aspect.label(), final_path.display());
    Ok(())
}
