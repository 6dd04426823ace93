use clap::Parser;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{PipelineError, Result};

#[derive(Parser, Debug)]
pub struct Args {
    /// Identity of the explainer to render (names the panel document and all
    /// cached artifacts).
    #[clap(long)]
    pub explainer: String,

    #[clap(long, default_value = "./content")]
    pub content_dir: PathBuf,

    #[clap(long, default_value = "./out")]
    pub work_dir: PathBuf,

    #[clap(long, default_value = "./assets/ambience")]
    pub ambience_dir: PathBuf,

    /// Comma-separated output formats: 9x16, 16x9, 1x1.
    #[clap(long, default_value = "9x16")]
    pub formats: String,

    /// Base URL of the render surface process.
    #[clap(long, default_value = "http://127.0.0.1:7700")]
    pub surface_url: String,

    #[clap(long, default_value = "./tts/en_US-amy-medium.onnx")]
    pub piper_model: PathBuf,

    #[clap(long, default_value = "cinematic ambient underscore, warm, unobtrusive")]
    pub score_style: String,

    #[clap(long, default_value_t = 0.25)]
    pub music_gain: f64,

    #[clap(long, default_value_t = 0.5)]
    pub ambience_gain: f64,

    #[clap(long, default_value_t = 0.5)]
    pub pause_padding: f64,

    #[clap(long, default_value_t = 1.0)]
    pub scroll_speed: f64,

    /// Skip the capability probe and use exactly this provider
    /// (openai | piper for speech, replicate | musicgen for score).
    #[clap(long)]
    pub force_provider: Option<String>,

    #[clap(long)]
    pub reuse_narration: bool,

    #[clap(long)]
    pub reuse_score: bool,

    #[clap(long)]
    pub skip_narration: bool,

    #[clap(long)]
    pub skip_score: bool,

    #[clap(long)]
    pub skip_ambience: bool,
}

/// Output aspect ratio. Each variant fixes the capture viewport; the schedule
/// is viewport-height-derived, so it is rebuilt per format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Aspect {
    Portrait,
    Landscape,
    Square,
}

impl Aspect {
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            Self::Portrait => (1080, 1920),
            Self::Landscape => (1920, 1080),
            Self::Square => (1080, 1080),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Portrait => "9x16",
            Self::Landscape => "16x9",
            Self::Square => "1x1",
        }
    }
}

impl FromStr for Aspect {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "9x16" | "portrait" => Ok(Self::Portrait),
            "16x9" | "landscape" => Ok(Self::Landscape),
            "1x1" | "square" => Ok(Self::Square),
            other => Err(PipelineError::Config(format!(
                "unknown output format '{}' (expected 9x16, 16x9 or 1x1)",
                other
            ))),
        }
    }
}

/// Fully resolved, immutable run configuration. Produced once by
/// [`Options::resolve`] and passed through every stage; nothing re-reads the
/// environment or the argument list after this point.
#[derive(Debug, Clone)]
pub struct Options {
    pub explainer: String,
    pub content_dir: PathBuf,
    pub work_dir: PathBuf,
    pub ambience_dir: PathBuf,
    pub formats: Vec<Aspect>,
    pub surface_url: String,
    pub piper_model: PathBuf,
    pub score_style: String,
    pub music_gain: f64,
    pub ambience_gain: f64,
    pub pause_padding: f64,
    pub scroll_speed: f64,
    pub force_provider: Option<String>,
    pub reuse_narration: bool,
    pub reuse_score: bool,
    pub skip_narration: bool,
    pub skip_score: bool,
    pub skip_ambience: bool,
    pub speech_api_url: String,
    pub speech_api_key: String,
    pub replicate_api_token: String,
    pub musicgen_url: String,
}

impl Options {
    pub fn resolve(args: Args) -> Result<Self> {
        let mut formats = Vec::new();
        for part in args.formats.split(',') {
            let aspect = part.parse::<Aspect>()?;
            if !formats.contains(&aspect) {
                formats.push(aspect);
            }
        }

        if args.scroll_speed <= 0.0 {
            return Err(PipelineError::Config(format!(
                "scroll speed must be positive, got {}",
                args.scroll_speed
            )));
        }
        if args.pause_padding < 0.0 {
            return Err(PipelineError::Config(format!(
                "pause padding must not be negative, got {}",
                args.pause_padding
            )));
        }

        let speech_api_url = std::env::var("SPEECH_API_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let speech_api_key = std::env::var("SPEECH_API_KEY").unwrap_or_default();
        let replicate_api_token = std::env::var("REPLICATE_API_TOKEN").unwrap_or_default();
        let musicgen_url =
            std::env::var("MUSICGEN_URL").unwrap_or_else(|_| "http://127.0.0.1:8760".to_string());

        // A forced provider removes the fallback path, so its credential is
        // required up front, before any network activity.
        if let Some(forced) = args.force_provider.as_deref() {
            match forced {
                "openai" if speech_api_key.is_empty() => {
                    return Err(PipelineError::Config(
                        "provider 'openai' forced but SPEECH_API_KEY is not set".into(),
                    ));
                }
                "replicate" if replicate_api_token.is_empty() => {
                    return Err(PipelineError::Config(
                        "provider 'replicate' forced but REPLICATE_API_TOKEN is not set".into(),
                    ));
                }
                "openai" | "replicate" | "piper" | "musicgen" => {}
                other => {
                    return Err(PipelineError::Config(format!(
                        "unknown provider '{}'",
                        other
                    )));
                }
            }
        }

        Ok(Self {
            explainer: args.explainer,
            content_dir: args.content_dir,
            work_dir: args.work_dir,
            ambience_dir: args.ambience_dir,
            formats,
            surface_url: args.surface_url.trim_end_matches('/').to_string(),
            piper_model: args.piper_model,
            score_style: args.score_style,
            music_gain: args.music_gain,
            ambience_gain: args.ambience_gain,
            pause_padding: args.pause_padding,
            scroll_speed: args.scroll_speed,
            force_provider: args.force_provider,
            reuse_narration: args.reuse_narration,
            reuse_score: args.reuse_score,
            skip_narration: args.skip_narration,
            skip_score: args.skip_score,
            skip_ambience: args.skip_ambience,
            speech_api_url: speech_api_url.trim_end_matches('/').to_string(),
            speech_api_key,
            replicate_api_token,
            musicgen_url: musicgen_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn panels_path(&self) -> PathBuf {
        self.content_dir.join(format!("{}.json", self.explainer))
    }

    pub fn explainer_dir(&self) -> PathBuf {
        self.work_dir.join(&self.explainer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aspect_parses_labels_and_aliases() {
        assert_eq!("9x16".parse::<Aspect>().unwrap(), Aspect::Portrait);
        assert_eq!("landscape".parse::<Aspect>().unwrap(), Aspect::Landscape);
        assert!("4x3".parse::<Aspect>().is_err());
    }

    #[test]
    fn portrait_viewport_is_vertical() {
        let (w, h) = Aspect::Portrait.dimensions();
        assert!(h > w);
    }
}
