use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    options::HeaderOptions,
    stream::MediaKind,
};

/// A container location plus an optional format name overriding probing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl Endpoint {
    pub fn new(location: &str) -> Self {
        Self {
            location: location.to_string(),
            format: None,
        }
    }

    pub fn with_format(mut self, format: &str) -> Self {
        self.format = Some(format.to_string());
        self
    }

    pub fn format(&self) -> Option<&str> {
        self.format.as_deref()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscodeConfig {
    pub input: Endpoint,
    pub output: Endpoint,
    /// Forwarded to the output container when its header is written.
    #[serde(default)]
    pub header_options: serde_json::Map<String, serde_json::Value>,
    /// Skip streams of unknown kind instead of failing the run.
    #[serde(default)]
    pub accept_unknown_streams: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_codec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_codec: Option<String>,
}

impl TranscodeConfig {
    pub fn new(input: Endpoint, output: Endpoint) -> Self {
        Self {
            input,
            output,
            ..Default::default()
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.input.location.is_empty() {
            return Err(Error::Config("input location is empty".into()));
        }
        if self.output.location.is_empty() {
            return Err(Error::Config("output location is empty".into()));
        }
        Ok(())
    }

    /// Header options in their typed form. Values that are neither
    /// integers nor strings fail here.
    pub fn header_options(&self) -> Result<HeaderOptions> {
        HeaderOptions::from_json(&self.header_options)
    }

    /// Encoder name override for streams of `kind`, if any.
    pub fn codec_for(&self, kind: MediaKind) -> Option<&str> {
        match kind {
            MediaKind::Video => self.video_codec.as_deref(),
            MediaKind::Audio => self.audio_codec.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "input": {{ "location": "in.nut" }},
                "output": {{ "location": "out.mkv", "format": "matroska" }},
                "header_options": {{ "cluster_size_limit": 2097152, "live": "0" }},
                "video_codec": "mpeg4"
            }}"#
        )
        .unwrap();

        let config = TranscodeConfig::from_file(file.path()).unwrap();
        assert_eq!(config.input, Endpoint::new("in.nut"));
        assert_eq!(config.output.format(), Some("matroska"));
        assert!(!config.accept_unknown_streams);
        assert_eq!(config.codec_for(MediaKind::Video), Some("mpeg4"));
        assert_eq!(config.codec_for(MediaKind::Audio), None);
        assert_eq!(config.header_options().unwrap().len(), 2);
    }

    #[test]
    fn test_missing_locations_are_rejected() {
        let config = TranscodeConfig::new(Endpoint::new(""), Endpoint::new("out.nut"));
        assert!(matches!(config.validate(), Err(Error::Config(_))));
        let config = TranscodeConfig::new(Endpoint::new("in.nut"), Endpoint::default());
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_bad_header_option_surfaces_as_unsupported_option() {
        let mut config = TranscodeConfig::new(Endpoint::new("a"), Endpoint::new("b"));
        config
            .header_options
            .insert("flag".into(), serde_json::Value::Bool(true));
        assert!(matches!(
            config.header_options(),
            Err(Error::UnsupportedOption { .. })
        ));
    }

    #[test]
    fn test_invalid_json_is_a_json_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(
            TranscodeConfig::from_file(file.path()),
            Err(Error::Json(_))
        ));
    }
}
