use regex::Regex;
use std::path::PathBuf;
use tracing::debug;

use crate::panel::Panel;

const EXTENSIONS: [&str; 3] = ["wav", "mp3", "ogg"];

/// Directory of ambience loops, resolved per panel. Files are matched by the
/// panel's explicit ambience key first, then by panel id, then by a
/// normalized form of the id (lowercased, punctuation runs collapsed to `_`,
/// trailing counters stripped) so `Intro-02` still finds `intro.wav`.
#[derive(Debug, Clone)]
pub struct AmbienceLibrary {
    dir: PathBuf,
}

impl AmbienceLibrary {
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn resolve(&self, panel: &Panel) -> Option<PathBuf> {
        let mut stems: Vec<String> = Vec::new();
        if let Some(key) = panel.ambience.as_deref() {
            stems.push(key.to_string());
            stems.push(normalize_key(key));
        }
        stems.push(panel.id.clone());
        stems.push(normalize_key(&panel.id));
        stems.push(strip_counter(&normalize_key(&panel.id)));

        for stem in stems {
            if stem.is_empty() {
                continue;
            }
            for ext in EXTENSIONS {
                let candidate = self.dir.join(format!("{}.{}", stem, ext));
                if candidate.is_file() {
                    debug!(
                        "Ambience for panel '{}' resolved to {}",
                        panel.id,
                        candidate.display()
                    );
                    return Some(candidate);
                }
            }
        }
        None
    }
}

fn normalize_key(key: &str) -> String {
    let re = Regex::new(r"[^a-z0-9]+").unwrap();
    re.replace_all(&key.to_lowercase(), "_")
        .trim_matches('_')
        .to_string()
}

fn strip_counter(key: &str) -> String {
    let re = Regex::new(r"_?\d+$").unwrap();
    re.replace(key, "").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn panel(id: &str, ambience: Option<&str>) -> Panel {
        Panel {
            id: id.to_string(),
            title: id.to_string(),
            message: String::new(),
            narration_override_text: None,
            ambience: ambience.map(str::to_string),
            tags: Vec::new(),
        }
    }

    #[test]
    fn normalizes_keys() {
        assert_eq!(normalize_key("City Rain!"), "city_rain");
        assert_eq!(normalize_key("--Intro--"), "intro");
        assert_eq!(strip_counter("intro_02"), "intro");
    }

    #[test]
    fn explicit_key_wins_over_panel_id() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("rain.wav"), b"x").unwrap();
        fs::write(dir.path().join("intro.wav"), b"x").unwrap();

        let lib = AmbienceLibrary::open(dir.path());
        let resolved = lib.resolve(&panel("intro", Some("rain"))).unwrap();
        assert_eq!(resolved.file_name().unwrap(), "rain.wav");
    }

    #[test]
    fn falls_back_to_normalized_id_patterns() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("city_rain.mp3"), b"x").unwrap();

        let lib = AmbienceLibrary::open(dir.path());
        assert!(lib.resolve(&panel("City Rain-03", None)).is_some());
        assert!(lib.resolve(&panel("desert", None)).is_none());
    }
}
