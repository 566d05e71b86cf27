//! Label model representing a Gmail label

use serde::{Deserialize, Serialize};

use crate::error::MailError;

/// Unique identifier for a label (Gmail label ID)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LabelId(pub String);

impl LabelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    // Gmail system labels the policy layer refers to
    pub const INBOX: &'static str = "INBOX";
    pub const TRASH: &'static str = "TRASH";
    pub const SPAM: &'static str = "SPAM";
}

impl From<String> for LabelId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for LabelId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Colors Gmail accepts for label text and background
pub const LABEL_COLOR_PALETTE: &[&str] = &[
    "#000000", "#434343", "#666666", "#999999", "#cccccc", "#efefef", "#f3f3f3", "#ffffff",
    "#fb4c2f", "#ffad47", "#fad165", "#16a766", "#43d692", "#4a86e8", "#a479e2", "#f691b3",
    "#f6c5be", "#ffe6c7", "#fef1d1", "#b9e4d0", "#c6f3de", "#c9daf8", "#e4d7f5", "#fcdee8",
    "#efa093", "#ffd6a2", "#fce8b3", "#89d3b2", "#a0eac9", "#a4c2f4", "#d0bcf1", "#fbc8d9",
    "#e66550", "#ffbc6b", "#fcda83", "#44b984", "#68dfa9", "#6d9eeb", "#b694e8", "#f7a7c0",
    "#cc3a21", "#eaa041", "#f2c960", "#149e60", "#3dc789", "#3c78d8", "#8e63ce", "#e07798",
    "#ac2b16", "#cf8933", "#d5ae49", "#0b804b", "#2a9c68", "#285bac", "#653e9b", "#b65775",
    "#822111", "#a46a21", "#aa8831", "#076239", "#1a764d", "#1c4587", "#41236d", "#83334c",
    "#464646", "#e7e7e7", "#0d3472", "#b6cff5", "#0d3b44", "#98d7e4", "#3d188e", "#e3d7ff",
    "#711a36", "#fbd3e0", "#8a1c0a", "#f2b2a8", "#7a2e0b", "#ffc8af", "#7a4706", "#ffdeb5",
    "#594c05", "#fbe983", "#684e07", "#fdedc1", "#0b4f30", "#b3efd3", "#04502e", "#a2dcc1",
    "#c2c2c2", "#4986e7", "#2da2bb", "#b99aff", "#994a64", "#f691b2", "#ff7537", "#ffad46",
    "#662e37", "#ebdbde", "#cca6ac", "#094228", "#42d692", "#16a765",
];

/// Text and background color pair for a label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelColor {
    pub text_color: String,
    pub background_color: String,
}

impl LabelColor {
    /// Build a color pair, rejecting anything outside the Gmail palette
    pub fn new(text_color: &str, background_color: &str) -> Result<Self, MailError> {
        Ok(Self {
            text_color: palette_color(text_color)?,
            background_color: palette_color(background_color)?,
        })
    }

    /// Build a color pair from optional halves; both or neither must be given
    pub fn from_parts(
        text_color: Option<&str>,
        background_color: Option<&str>,
    ) -> Result<Option<Self>, MailError> {
        match (text_color, background_color) {
            (None, None) => Ok(None),
            (Some(text), Some(background)) => Self::new(text, background).map(Some),
            _ => Err(MailError::InvalidArgument(
                "text and background colors must be given together".to_string(),
            )),
        }
    }
}

fn palette_color(color: &str) -> Result<String, MailError> {
    let normalized = color.trim().to_lowercase();
    if LABEL_COLOR_PALETTE.contains(&normalized.as_str()) {
        Ok(normalized)
    } else {
        Err(MailError::InvalidArgument(format!(
            "color {color} is not in the Gmail label palette"
        )))
    }
}

/// A mail label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    /// Label ID (e.g., "INBOX", "Label_123")
    pub id: LabelId,
    /// Display name
    pub name: String,
    /// Whether this is a system label
    pub is_system: bool,
    pub color: Option<LabelColor>,
}

impl Label {
    /// Create a new user label
    pub fn new(id: impl Into<LabelId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_system: false,
            color: None,
        }
    }

    /// Create a system label
    pub fn system(id: impl Into<LabelId>, name: impl Into<String>) -> Self {
        Self {
            is_system: true,
            ..Self::new(id, name)
        }
    }

    pub fn with_color(mut self, color: LabelColor) -> Self {
        self.color = Some(color);
        self
    }
}

/// Request to create a user label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLabel {
    pub name: String,
    pub color: Option<LabelColor>,
}

impl NewLabel {
    pub fn new(name: impl Into<String>) -> Result<Self, MailError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(MailError::InvalidArgument(
                "label name must not be empty".to_string(),
            ));
        }
        Ok(Self { name, color: None })
    }

    pub fn with_color(mut self, color: Option<LabelColor>) -> Self {
        self.color = color;
        self
    }
}

/// Partial update of an existing label
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelUpdate {
    pub name: Option<String>,
    pub color: Option<LabelColor>,
}

impl LabelUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.color.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_palette_color_accepted_case_insensitively() {
        let color = LabelColor::new("#FFFFFF", " #4A86E8 ").unwrap();
        assert_eq!(color.text_color, "#ffffff");
        assert_eq!(color.background_color, "#4a86e8");
    }

    #[test]
    fn test_off_palette_color_rejected() {
        let err = LabelColor::new("#123456", "#ffffff").unwrap_err();
        assert!(err.to_string().contains("#123456"));
    }

    #[test]
    fn test_color_halves_must_pair() {
        assert_eq!(LabelColor::from_parts(None, None).unwrap(), None);
        assert!(LabelColor::from_parts(Some("#000000"), None).is_err());
        assert!(
            LabelColor::from_parts(Some("#000000"), Some("#ffffff"))
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn test_new_label_requires_name() {
        assert!(NewLabel::new("  ").is_err());
        assert_eq!(NewLabel::new("Receipts").unwrap().name, "Receipts");
    }

    #[test]
    fn test_palette_has_no_duplicates() {
        let mut colors: Vec<_> = LABEL_COLOR_PALETTE.to_vec();
        colors.sort_unstable();
        colors.dedup();
        assert_eq!(colors.len(), LABEL_COLOR_PALETTE.len());
    }
}
