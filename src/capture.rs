//! Capture driver: walks the schedule on a live render surface, spools the
//! pushed frame stream to scratch, derives the empirical frame rate, and
//! encodes the frame sequence into a silent video.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::{PipelineError, Result};
use crate::ffmpeg::FrameEncoder;
use crate::surface::{Frame, RenderSurface};
use crate::timeline::Schedule;

pub const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Animation sampling cadence during scroll segments (~60 Hz).
const ANIMATION_TICK: Duration = Duration::from_millis(16);

/// Hold position within a segment. The surface rests 40% into the panel's
/// screen rather than at the extreme top so the composition stays centered
/// through the narration.
const SWEET_SPOT_FRACTION: f64 = 0.4;

/// Hard ceiling on frames spooled to scratch: ten minutes at 60 Hz.
pub const MAX_CAPTURED_FRAMES: usize = 36_000;

const MIN_FRAME_RATE: f64 = 15.0;
const MAX_FRAME_RATE: f64 = 60.0;
const FALLBACK_FRAME_RATE: u32 = 30;

/// The recorded frame sequence. Scratch-only; the frame files are deleted
/// with the run's scratch directory.
#[derive(Debug)]
pub struct CaptureResult {
    pub frame_paths: Vec<PathBuf>,
    pub frame_rate: u32,
    pub wall_clock: Duration,
}

impl CaptureResult {
    pub fn frame_count(&self) -> usize {
        self.frame_paths.len()
    }
}

fn ease_in_out_cubic(t: f64) -> f64 {
    let t = t.clamp(0.0, 1.0);
    if t < 0.5 {
        4.0 * t * t * t
    } else {
        1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
    }
}

fn rest_position(scroll_start: f64, scroll_end: f64) -> f64 {
    scroll_start + SWEET_SPOT_FRACTION * (scroll_end - scroll_start)
}

/// Drives the surface through the schedule while the frame collector spools
/// the pushed stream to `frame_dir`. Each step animates into its rest
/// position, then holds for the pause segment.
pub async fn record<S: RenderSurface>(
    surface: &mut S,
    schedule: &Schedule,
    page_url: &str,
    frame_dir: &Path,
    cancel: &mut watch::Receiver<bool>,
) -> Result<CaptureResult> {
    fs::create_dir_all(frame_dir)?;

    tokio::time::timeout(NAVIGATION_TIMEOUT, surface.navigate(page_url))
        .await
        .map_err(|_| PipelineError::NavigationTimeout(NAVIGATION_TIMEOUT))??;

    let frames = surface.frames().ok_or(PipelineError::CaptureChannel)?;
    let collector = tokio::spawn(collect_frames(
        frames,
        frame_dir.to_path_buf(),
        MAX_CAPTURED_FRAMES,
    ));

    let started = Instant::now();
    let mut position = 0.0_f64;

    for step in &schedule.steps {
        if collector.is_finished() {
            // The stream died under us; close and surface the disconnect.
            let _ = surface.close().await;
            return Err(PipelineError::CaptureChannel);
        }

        let rest = rest_position(step.scroll_start, step.scroll_end);
        animate_scroll(surface, position, rest, step.scroll_duration).await?;
        hold(step.pause_duration, cancel).await?;
        position = rest;
    }

    let wall_clock = started.elapsed();
    surface.close().await?;

    let (frame_paths, timestamps) = collector
        .await
        .map_err(|_| PipelineError::CaptureChannel)??;
    if frame_paths.is_empty() {
        return Err(PipelineError::CaptureChannel);
    }

    let frame_rate = empirical_frame_rate(&timestamps);
    info!(
        "Captured {} frames in {:.2}s ({} fps)",
        frame_paths.len(),
        wall_clock.as_secs_f64(),
        frame_rate
    );

    Ok(CaptureResult {
        frame_paths,
        frame_rate,
        wall_clock,
    })
}

async fn animate_scroll<S: RenderSurface>(
    surface: &mut S,
    from: f64,
    to: f64,
    duration: f64,
) -> Result<()> {
    if duration <= 0.0 {
        surface.set_scroll(to).await?;
        return Ok(());
    }

    let started = Instant::now();
    let mut ticker = tokio::time::interval(ANIMATION_TICK);
    loop {
        ticker.tick().await;
        let t = started.elapsed().as_secs_f64() / duration;
        let eased = ease_in_out_cubic(t);
        surface.set_scroll(from + (to - from) * eased).await?;
        if t >= 1.0 {
            return Ok(());
        }
    }
}

async fn hold(duration: f64, cancel: &mut watch::Receiver<bool>) -> Result<()> {
    if *cancel.borrow() {
        return Err(PipelineError::Canceled);
    }
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs_f64(duration.max(0.0))) => Ok(()),
        _ = wait_canceled(cancel) => Err(PipelineError::Canceled),
    }
}

async fn wait_canceled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn collect_frames(
    mut rx: mpsc::Receiver<Frame>,
    dir: PathBuf,
    max_frames: usize,
) -> Result<(Vec<PathBuf>, Vec<Duration>)> {
    let mut paths = Vec::new();
    let mut timestamps = Vec::new();
    while let Some(frame) = rx.recv().await {
        if paths.len() >= max_frames {
            return Err(PipelineError::FrameOverflow(max_frames));
        }
        let path = dir.join(format!("frame_{:06}.rgba", paths.len()));
        fs::write(&path, &frame.data)?;
        paths.push(path);
        timestamps.push(frame.timestamp);
    }
    Ok((paths, timestamps))
}

/// Frame rate observed at capture time, clamped to a sane encoding range.
/// Deriving this from timestamps rather than assuming a constant keeps the
/// encoded video from drifting against wall-clock-placed audio.
fn empirical_frame_rate(timestamps: &[Duration]) -> u32 {
    if timestamps.len() < 2 {
        warn!("Too few frames to derive a frame rate; assuming {}", FALLBACK_FRAME_RATE);
        return FALLBACK_FRAME_RATE;
    }
    let span = timestamps[timestamps.len() - 1].saturating_sub(timestamps[0]);
    let span_seconds = span.as_secs_f64();
    if span_seconds <= 0.0 {
        warn!("Degenerate capture timestamps; assuming {}", FALLBACK_FRAME_RATE);
        return FALLBACK_FRAME_RATE;
    }
    let fps = (timestamps.len() - 1) as f64 / span_seconds;
    fps.clamp(MIN_FRAME_RATE, MAX_FRAME_RATE).round() as u32
}

/// Feeds the ordered frame files through one ffmpeg rawvideo encode at the
/// empirical frame rate.
pub fn encode_video(
    capture: &CaptureResult,
    width: u32,
    height: u32,
    out_path: &Path,
) -> Result<()> {
    let mut encoder = FrameEncoder::start(width, height, capture.frame_rate, out_path)?;
    for path in &capture.frame_paths {
        let frame = fs::read(path)?;
        encoder.write_frame(&frame)?;
    }
    encoder.finish()?;
    info!(
        "Encoded {} frames to {}",
        capture.frame_count(),
        out_path.display()
    );
    Ok(())
}
