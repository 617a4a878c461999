use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayPosition {
    Top,
    Bottom,
    Sidebar,
}

impl std::str::FromStr for DisplayPosition {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "top" => Ok(DisplayPosition::Top),
            "bottom" => Ok(DisplayPosition::Bottom),
            "sidebar" => Ok(DisplayPosition::Sidebar),
            other => Err(EngineError::validation(format!("unknown display position '{other}'"))),
        }
    }
}

/// Singleton configuration shared by the engine and the rendering widget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub enabled: bool,
    pub max_recommendations: usize,
    pub similarity_threshold: f32,
    pub max_terms_per_doc: usize,
    pub max_similar_per_doc: usize,
    pub auto_index: bool,
    pub display_position: DisplayPosition,
    pub heading_text: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_recommendations: 5,
            similarity_threshold: 0.1,
            max_terms_per_doc: 100,
            max_similar_per_doc: 20,
            auto_index: false,
            display_position: DisplayPosition::Bottom,
            heading_text: "Related Pages".to_string(),
        }
    }
}

/// Partial update; `None` leaves the stored value alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsUpdate {
    pub enabled: Option<bool>,
    pub max_recommendations: Option<usize>,
    pub similarity_threshold: Option<f32>,
    pub max_terms_per_doc: Option<usize>,
    pub max_similar_per_doc: Option<usize>,
    pub auto_index: Option<bool>,
    pub display_position: Option<DisplayPosition>,
    pub heading_text: Option<String>,
}

impl Settings {
    /// Merge `update` into a copy of `self`, rejecting it whole if any field is invalid.
    pub fn merged(&self, update: &SettingsUpdate) -> Result<Settings> {
        let mut next = self.clone();
        if let Some(v) = update.enabled { next.enabled = v; }
        if let Some(v) = update.max_recommendations { next.max_recommendations = v; }
        if let Some(v) = update.similarity_threshold { next.similarity_threshold = v; }
        if let Some(v) = update.max_terms_per_doc { next.max_terms_per_doc = v; }
        if let Some(v) = update.max_similar_per_doc { next.max_similar_per_doc = v; }
        if let Some(v) = update.auto_index { next.auto_index = v; }
        if let Some(v) = update.display_position { next.display_position = v; }
        if let Some(v) = &update.heading_text { next.heading_text = v.trim().to_string(); }
        next.validate()?;
        Ok(next)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(EngineError::validation("similarity_threshold must be between 0 and 1"));
        }
        if self.max_recommendations == 0 {
            return Err(EngineError::validation("max_recommendations must be at least 1"));
        }
        if self.max_terms_per_doc == 0 {
            return Err(EngineError::validation("max_terms_per_doc must be at least 1"));
        }
        if self.max_similar_per_doc == 0 {
            return Err(EngineError::validation("max_similar_per_doc must be at least 1"));
        }
        if self.heading_text.is_empty() {
            return Err(EngineError::validation("heading_text must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_unset_fields() {
        let base = Settings::default();
        let next = base
            .merged(&SettingsUpdate { similarity_threshold: Some(0.5), ..Default::default() })
            .unwrap();
        assert_eq!(next.similarity_threshold, 0.5);
        assert_eq!(next.max_recommendations, base.max_recommendations);
        assert_eq!(next.heading_text, base.heading_text);
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let err = Settings::default()
            .merged(&SettingsUpdate { similarity_threshold: Some(1.5), ..Default::default() })
            .unwrap_err();
        assert!(err.is_client_error());
    }

    #[test]
    fn rejects_zero_caps() {
        let update = SettingsUpdate { max_terms_per_doc: Some(0), ..Default::default() };
        assert!(Settings::default().merged(&update).is_err());
    }

    #[test]
    fn parses_display_position() {
        assert_eq!("Sidebar".parse::<DisplayPosition>().unwrap(), DisplayPosition::Sidebar);
        assert!("footer".parse::<DisplayPosition>().is_err());
    }
}
