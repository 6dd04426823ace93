//! Render surface contract and the HTTP implementation that talks to the
//! companion renderer process.
//!
//! The renderer owns all drawing; this side only navigates, drives the
//! scroll position, and consumes the frame stream. Frames arrive pushed, not
//! polled: one chunked HTTP response carries length-prefixed raw RGBA frames,
//! each stamped with the renderer's monotonic capture clock.

use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::Result;

/// Bound on in-flight frames between the stream reader and the collector.
/// The reader blocks once the channel is full, which backpressures the HTTP
/// stream instead of growing memory without limit.
pub const FRAME_CHANNEL_CAPACITY: usize = 64;

/// Wire framing: 8-byte LE timestamp in microseconds, 4-byte LE payload
/// length, then the raw RGBA payload.
const FRAME_HEADER_BYTES: usize = 12;

#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub timestamp: Duration,
}

/// A controllable on-screen surface. `frames` hands out the push channel at
/// most once; the stream ends when the surface is closed or the connection
/// drops.
pub trait RenderSurface {
    async fn navigate(&mut self, url: &str) -> Result<()>;
    async fn set_scroll(&mut self, y: f64) -> Result<()>;
    fn frames(&mut self) -> Option<mpsc::Receiver<Frame>>;
    async fn close(&mut self) -> Result<()>;
}

pub struct HttpSurface {
    client: Client,
    base_url: String,
    frames: Option<mpsc::Receiver<Frame>>,
    reader: Option<JoinHandle<()>>,
}

impl HttpSurface {
    /// The surface holds its own client: the capture stream stays open for
    /// the whole recording, so it must not inherit a total-request timeout.
    pub fn new(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
            frames: None,
            reader: None,
        }
    }
}

impl RenderSurface for HttpSurface {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        self.client
            .post(format!("{}/navigate", self.base_url))
            .json(&json!({ "url": url }))
            .send()
            .await?
            .error_for_status()?;

        // Capture starts with navigation and runs for the surface lifetime.
        let response = self
            .client
            .get(format!("{}/capture", self.base_url))
            .send()
            .await?
            .error_for_status()?;

        let (tx, rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        self.frames = Some(rx);
        self.reader = Some(tokio::spawn(read_frames(response, tx)));
        Ok(())
    }

    async fn set_scroll(&mut self, y: f64) -> Result<()> {
        self.client
            .post(format!("{}/scroll", self.base_url))
            .json(&json!({ "y": y }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    fn frames(&mut self) -> Option<mpsc::Receiver<Frame>> {
        self.frames.take()
    }

    async fn close(&mut self) -> Result<()> {
        // Stopping the renderer ends the capture stream; the reader task
        // drains whatever is still buffered and exits.
        let _ = self
            .client
            .post(format!("{}/stop", self.base_url))
            .send()
            .await;
        if let Some(reader) = self.reader.take() {
            let _ = reader.await;
        }
        Ok(())
    }
}

async fn read_frames(mut response: reqwest::Response, tx: mpsc::Sender<Frame>) {
    let mut buf: Vec<u8> = Vec::new();
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                buf.extend_from_slice(&chunk);
                while let Some((frame, consumed)) = parse_frame(&buf) {
                    buf.drain(..consumed);
                    if tx.send(frame).await.is_err() {
                        debug!("Frame consumer gone; stopping stream reader");
                        return;
                    }
                }
            }
            Ok(None) => return,
            Err(e) => {
                warn!("Frame stream ended with error: {}", e);
                return;
            }
        }
    }
}

fn parse_frame(buf: &[u8]) -> Option<(Frame, usize)> {
    if buf.len() < FRAME_HEADER_BYTES {
        return None;
    }
    let micros = u64::from_le_bytes(buf[0..8].try_into().unwrap());
    let len = u32::from_le_bytes(buf[8..12].try_into().unwrap()) as usize;
    let total = FRAME_HEADER_BYTES + len;
    if buf.len() < total {
        return None;
    }
    let frame = Frame {
        data: buf[FRAME_HEADER_BYTES..total].to_vec(),
        timestamp: Duration::from_micros(micros),
    };
    Some((frame, total))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(micros: u64, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&micros.to_le_bytes());
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn parses_a_complete_frame_and_reports_consumed_bytes() {
        let wire = encode(1_500_000, b"rgba");
        let (frame, consumed) = parse_frame(&wire).unwrap();
        assert_eq!(frame.timestamp, Duration::from_micros(1_500_000));
        assert_eq!(frame.data, b"rgba");
        assert_eq!(consumed, wire.len());
    }

    #[test]
    fn waits_for_more_bytes_on_partial_input() {
        let wire = encode(1, &[0u8; 16]);
        assert!(parse_frame(&wire[..5]).is_none());
        assert!(parse_frame(&wire[..wire.len() - 1]).is_none());
    }

    #[test]
    fn parses_back_to_back_frames() {
        let mut wire = encode(10, b"aa");
        wire.extend_from_slice(&encode(20, b"bb"));
        let (first, consumed) = parse_frame(&wire).unwrap();
        assert_eq!(first.data, b"aa");
        let (second, _) = parse_frame(&wire[consumed..]).unwrap();
        assert_eq!(second.data, b"bb");
    }
}
