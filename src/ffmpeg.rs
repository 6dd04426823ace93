//! ffmpeg/ffprobe subprocess plumbing: rawvideo frame encoding, the final
//! mux, and duration probing. All invocations are non-interactive; failures
//! surface the exit status plus a stderr excerpt.

use std::fs;
use std::io::{Read, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, Command, Stdio};
use tracing::info;

use crate::error::{PipelineError, Result};

const STDERR_EXCERPT_BYTES: usize = 2000;

/// Runs a prepared command to completion, capturing output. Non-zero exit
/// becomes a subprocess error carrying the tail of stderr.
pub fn run(mut cmd: Command, tool: &'static str) -> Result<()> {
    let output = cmd
        .stdin(Stdio::null())
        .output()
        .map_err(|e| PipelineError::Config(format!("failed to spawn {}: {}", tool, e)))?;
    if !output.status.success() {
        return Err(PipelineError::Subprocess {
            tool,
            status: output.status,
            stderr: excerpt(&String::from_utf8_lossy(&output.stderr)),
        });
    }
    Ok(())
}

fn excerpt(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.len() <= STDERR_EXCERPT_BYTES {
        return trimmed.to_string();
    }
    let tail_start = trimmed.len() - STDERR_EXCERPT_BYTES;
    let mut start = tail_start;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &trimmed[start..])
}

/// Streaming rawvideo encoder: RGBA frames go in on stdin, an H.264 MP4
/// comes out at the given frame rate.
pub struct FrameEncoder {
    child: Child,
    stdin: Option<ChildStdin>,
    width: u32,
    height: u32,
}

impl FrameEncoder {
    pub fn start(width: u32, height: u32, fps: u32, output_path: &Path) -> Result<Self> {
        let mut cmd = Command::new("ffmpeg");
        cmd.arg("-y")
            .arg("-loglevel")
            .arg("error")
            .arg("-f")
            .arg("rawvideo")
            .arg("-pix_fmt")
            .arg("rgba")
            .arg("-s")
            .arg(format!("{}x{}", width, height))
            .arg("-r")
            .arg(fps.to_string())
            .arg("-i")
            .arg("-")
            .arg("-c:v")
            .arg("libx264")
            .arg("-pix_fmt")
            .arg("yuv420p")
            .arg("-crf")
            .arg("18")
            .arg(output_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| PipelineError::Config(format!("failed to spawn ffmpeg: {}", e)))?;
        let stdin = child.stdin.take().ok_or_else(|| {
            PipelineError::Config("failed to open ffmpeg stdin".into())
        })?;

        Ok(Self {
            child,
            stdin: Some(stdin),
            width,
            height,
        })
    }

    pub fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        let expected = (self.width * self.height * 4) as usize;
        if frame.len() != expected {
            return Err(PipelineError::Config(format!(
                "frame size mismatch: got {} bytes, expected {}",
                frame.len(),
                expected
            )));
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| PipelineError::Config("ffmpeg stdin already closed".into()))?;
        stdin.write_all(frame)?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin.flush();
        }
        let status = self.child.wait()?;
        if !status.success() {
            let stderr = self
                .child
                .stderr
                .take()
                .map(|mut s| {
                    let mut buf = String::new();
                    let _ = s.read_to_string(&mut buf);
                    buf
                })
                .unwrap_or_default();
            return Err(PipelineError::Subprocess {
                tool: "ffmpeg",
                status,
                stderr: excerpt(&stderr),
            });
        }
        Ok(())
    }
}

/// Joins the silent video with the mixed audio. With no audio the video is
/// passed through unmodified, so the deliverable stays bit-identical to the
/// raw capture encode.
pub fn mux(video: &Path, audio: Option<&Path>, out: &Path) -> Result<()> {
    let Some(audio) = audio else {
        info!("No audio track; passing video through unmodified");
        fs::copy(video, out)?;
        return Ok(());
    };

    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-y")
        .arg("-loglevel")
        .arg("error")
        .arg("-i")
        .arg(video)
        .arg("-i")
        .arg(audio)
        .arg("-map")
        .arg("0:v:0")
        .arg("-map")
        .arg("1:a:0")
        .arg("-c:v")
        .arg("copy")
        .arg("-c:a")
        .arg("aac")
        .arg("-shortest")
        .arg(out);
    run(cmd, "ffmpeg")?;
    info!("Muxed {} + audio into {}", video.display(), out.display());
    Ok(())
}

/// Actual duration of an encoded media file, in seconds.
pub fn probe_duration(path: &Path) -> Result<f64> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .output()
        .map_err(|e| PipelineError::Config(format!("failed to spawn ffprobe: {}", e)))?;

    if !output.status.success() {
        return Err(PipelineError::Subprocess {
            tool: "ffprobe",
            status: output.status,
            stderr: excerpt(&String::from_utf8_lossy(&output.stderr)),
        });
    }

    let text = String::from_utf8_lossy(&output.stdout);
    text.trim().parse::<f64>().map_err(|_| {
        PipelineError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("ffprobe reported an unparsable duration: '{}'", text.trim()),
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mux_without_audio_copies_the_video_bit_for_bit() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("silent.mp4");
        let out = dir.path().join("final.mp4");
        fs::write(&video, b"not really mp4 but bytes").unwrap();

        mux(&video, None, &out).unwrap();
        assert_eq!(fs::read(&video).unwrap(), fs::read(&out).unwrap());
    }

    #[test]
    fn stderr_excerpt_keeps_the_tail() {
        let long = "x".repeat(STDERR_EXCERPT_BYTES + 100);
        let cut = excerpt(&long);
        assert!(cut.starts_with("..."));
        assert_eq!(cut.len(), STDERR_EXCERPT_BYTES + 3);
        assert_eq!(excerpt("  short  "), "short");
    }
}
