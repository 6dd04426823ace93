use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::error::{PipelineError, Result};

/// One narrative unit of an explainer. Ordering in the document defines
/// screen order; ids are unique within a document.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Panel {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub narration_override_text: Option<String>,
    #[serde(default)]
    pub ambience: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Panel {
    /// The text that is actually narrated: the override when present and
    /// non-blank, otherwise the on-screen message.
    pub fn narration_text(&self) -> &str {
        match self.narration_override_text.as_deref() {
            Some(text) if !text.trim().is_empty() => text,
            _ => &self.message,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PanelDocument {
    panels: Vec<Panel>,
}

pub fn load_panels(path: &Path) -> Result<Vec<Panel>> {
    let data = fs::read_to_string(path).map_err(|e| {
        PipelineError::PanelSource(format!("cannot read {}: {}", path.display(), e))
    })?;
    let doc: PanelDocument = serde_json::from_str(&data)
        .map_err(|e| PipelineError::PanelSource(format!("{}: {}", path.display(), e)))?;
    validate(&doc.panels)?;
    info!("Loaded {} panels from {}", doc.panels.len(), path.display());
    Ok(doc.panels)
}

fn validate(panels: &[Panel]) -> Result<()> {
    if panels.is_empty() {
        return Err(PipelineError::PanelSource(
            "panel document contains no panels".into(),
        ));
    }
    let mut seen = HashSet::new();
    for panel in panels {
        if panel.id.trim().is_empty() {
            return Err(PipelineError::PanelSource(format!(
                "panel '{}' has an empty id",
                panel.title
            )));
        }
        if !seen.insert(panel.id.as_str()) {
            return Err(PipelineError::PanelSource(format!(
                "duplicate panel id '{}'",
                panel.id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn panel(id: &str) -> Panel {
        Panel {
            id: id.to_string(),
            title: id.to_string(),
            message: "hello".to_string(),
            narration_override_text: None,
            ambience: None,
            tags: Vec::new(),
        }
    }

    #[test]
    fn parses_a_valid_document() {
        let json = r#"{"panels":[
            {"id":"intro","title":"Intro","message":"Hi there","tags":["calm"]},
            {"id":"outro","title":"Outro","message":"Bye","ambience":"rain"}
        ]}"#;
        let doc: PanelDocument = serde_json::from_str(json).unwrap();
        assert_eq!(doc.panels.len(), 2);
        assert_eq!(doc.panels[1].ambience.as_deref(), Some("rain"));
    }

    #[test]
    fn rejects_unknown_fields() {
        let json = r#"{"panels":[{"id":"a","title":"A","message":"x","sprite":"no"}]}"#;
        assert!(serde_json::from_str::<PanelDocument>(json).is_err());
    }

    #[test]
    fn rejects_duplicate_ids() {
        let panels = vec![panel("a"), panel("a")];
        assert!(validate(&panels).is_err());
    }

    #[test]
    fn rejects_empty_documents_and_blank_ids() {
        assert!(validate(&[]).is_err());
        assert!(validate(&[panel("  ")]).is_err());
    }

    #[test]
    fn blank_override_falls_back_to_message() {
        let mut p = panel("a");
        p.narration_override_text = Some("   ".to_string());
        assert_eq!(p.narration_text(), "hello");
        p.narration_override_text = Some("spoken".to_string());
        assert_eq!(p.narration_text(), "spoken");
    }
}
