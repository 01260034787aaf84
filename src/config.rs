use crate::augment::{AugmentOptions, CitationStyle, OutputDetail, DEFAULT_MAX_RESULTS};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Provider for new sessions (e.g. "gemini", "claude").
    pub provider: Option<String>,

    pub search: SearchConfig,

    pub augment: AugmentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub enabled: bool,
    pub max_results: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AugmentConfig {
    pub deep_thinking: bool,
    pub citation_style: Option<CitationStyle>,
    pub output_detail: Option<OutputDetail>,
}

impl Config {
    /// Load config if the file exists, otherwise return Ok(None).
    pub fn load_optional(path: impl AsRef<Path>) -> anyhow::Result<Option<Self>> {
        let path = path.as_ref();
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(anyhow::Error::new(e))
                    .with_context(|| format!("failed to read config: {}", path.display()))
            }
        };

        let s = String::from_utf8(bytes).context("config is not valid UTF-8")?;
        let cfg: Config = toml::from_str(&s)
            .with_context(|| format!("failed to parse TOML: {}", path.display()))?;
        Ok(Some(cfg))
    }

    /// Augmentation defaults before command-line flags are applied.
    pub fn augment_options(&self) -> AugmentOptions {
        AugmentOptions {
            web_search: self.search.enabled,
            max_results: self.search.max_results,
            deep_thinking: self.augment.deep_thinking,
            citation_style: self.augment.citation_style,
            output_detail: self.augment.output_detail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load_optional(dir.path().join("config.toml"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn parses_sections_into_options() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
provider = "claude"

[search]
enabled = true

[augment]
citation_style = "footnote"
output_detail = "concise"
"#,
        )
        .unwrap();

        let cfg = Config::load_optional(&path).unwrap().unwrap();
        assert_eq!(cfg.provider.as_deref(), Some("claude"));
        let opts = cfg.augment_options();
        assert!(opts.web_search);
        assert_eq!(opts.max_results, DEFAULT_MAX_RESULTS);
        assert!(!opts.deep_thinking);
        assert_eq!(opts.citation_style, Some(CitationStyle::Footnote));
        assert_eq!(opts.output_detail, Some(OutputDetail::Concise));
    }

    #[test]
    fn rejects_unknown_styles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[augment]\ncitation_style = \"mla\"\n").unwrap();
        assert!(Config::load_optional(&path).is_err());
    }
}
