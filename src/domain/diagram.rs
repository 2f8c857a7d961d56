use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Full text of one diagram.
///
/// Identity is the exact byte content: two sources are the same diagram if
/// and only if their text matches byte for byte. This is the key used by the
/// render cache and the codec; no normalization is applied.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiagramSource(String);

impl DiagramSource {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Blank sources short-circuit the pipeline to a cleared preview.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<&str> for DiagramSource {
    fn from(text: &str) -> Self {
        Self(text.to_string())
    }
}

impl From<String> for DiagramSource {
    fn from(text: String) -> Self {
        Self(text)
    }
}

/// Output format requested from the render server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Svg,
    Png,
}

impl ImageFormat {
    /// Path segment used in the render server URL scheme.
    pub fn path_segment(&self) -> &'static str {
        match self {
            Self::Svg => "svg",
            Self::Png => "png",
        }
    }

    pub fn file_extension(&self) -> &'static str {
        self.path_segment()
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path_segment())
    }
}

impl FromStr for ImageFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "svg" => Ok(Self::Svg),
            "png" => Ok(Self::Png),
            other => Err(format!("unknown image format `{other}` (expected svg or png)")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_detection_ignores_whitespace() {
        assert!(DiagramSource::from("").is_blank());
        assert!(DiagramSource::from("  \n\t ").is_blank());
        assert!(!DiagramSource::from("@startuml\n@enduml").is_blank());
    }

    #[test]
    fn identity_is_exact_bytes() {
        let a = DiagramSource::from("@startuml\nA -> B\n@enduml");
        let b = DiagramSource::from("@startuml\nA -> B \n@enduml");
        assert_ne!(a, b);
    }

    #[test]
    fn format_parses_case_insensitively() {
        assert_eq!("SVG".parse::<ImageFormat>().unwrap(), ImageFormat::Svg);
        assert_eq!("png".parse::<ImageFormat>().unwrap(), ImageFormat::Png);
        assert!("pdf".parse::<ImageFormat>().is_err());
    }
}
