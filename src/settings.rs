//! Credential and endpoint lookup.
//!
//! Every key resolves through three layers, first non-empty value wins:
//! the user override store, values baked in at build time, then the process
//! environment. Lookups are live; nothing is cached between calls.

use anyhow::Context;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

pub const GEMINI_API_KEY: &str = "GEMINI_API_KEY";
pub const GEMINI_ACCESS_TOKEN: &str = "GEMINI_ACCESS_TOKEN";
pub const GEMINI_MODEL: &str = "GEMINI_MODEL";
pub const GEMINI_BASE_URL: &str = "GEMINI_BASE_URL";
pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const OPENAI_BASE_URL: &str = "OPENAI_BASE_URL";
pub const OPENAI_MODEL: &str = "OPENAI_MODEL";
pub const ANTHROPIC_API_KEY: &str = "ANTHROPIC_API_KEY";
pub const ANTHROPIC_BASE_URL: &str = "ANTHROPIC_BASE_URL";
pub const ANTHROPIC_MODEL: &str = "ANTHROPIC_MODEL";
pub const ANTHROPIC_VERSION: &str = "ANTHROPIC_VERSION";
pub const PLACEHOLDER_API_KEY: &str = "PLACEHOLDER_API_KEY";
pub const TAVILY_API_KEY: &str = "TAVILY_API_KEY";
pub const SERPER_API_KEY: &str = "SERPER_API_KEY";
pub const SEARCH_PROXY_URL: &str = "SEARCH_PROXY_URL";

/// Every key the application reads.
pub const KEYS: [&str; 15] = [
    GEMINI_API_KEY,
    GEMINI_ACCESS_TOKEN,
    GEMINI_MODEL,
    GEMINI_BASE_URL,
    OPENAI_API_KEY,
    OPENAI_BASE_URL,
    OPENAI_MODEL,
    ANTHROPIC_API_KEY,
    ANTHROPIC_BASE_URL,
    ANTHROPIC_MODEL,
    ANTHROPIC_VERSION,
    PLACEHOLDER_API_KEY,
    TAVILY_API_KEY,
    SERPER_API_KEY,
    SEARCH_PROXY_URL,
];

/// Values captured from the build environment.
fn build_time() -> BTreeMap<String, String> {
    let baked: [(&str, Option<&'static str>); 15] = [
        (GEMINI_API_KEY, option_env!("GEMINI_API_KEY")),
        (GEMINI_ACCESS_TOKEN, option_env!("GEMINI_ACCESS_TOKEN")),
        (GEMINI_MODEL, option_env!("GEMINI_MODEL")),
        (GEMINI_BASE_URL, option_env!("GEMINI_BASE_URL")),
        (OPENAI_API_KEY, option_env!("OPENAI_API_KEY")),
        (OPENAI_BASE_URL, option_env!("OPENAI_BASE_URL")),
        (OPENAI_MODEL, option_env!("OPENAI_MODEL")),
        (ANTHROPIC_API_KEY, option_env!("ANTHROPIC_API_KEY")),
        (ANTHROPIC_BASE_URL, option_env!("ANTHROPIC_BASE_URL")),
        (ANTHROPIC_MODEL, option_env!("ANTHROPIC_MODEL")),
        (ANTHROPIC_VERSION, option_env!("ANTHROPIC_VERSION")),
        (PLACEHOLDER_API_KEY, option_env!("PLACEHOLDER_API_KEY")),
        (TAVILY_API_KEY, option_env!("TAVILY_API_KEY")),
        (SERPER_API_KEY, option_env!("SERPER_API_KEY")),
        (SEARCH_PROXY_URL, option_env!("SEARCH_PROXY_URL")),
    ];
    baked
        .into_iter()
        .filter_map(|(k, v)| v.map(|v| (k.to_string(), v.to_string())))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    Override,
    BuildTime,
    Environment,
}

#[derive(Debug, Clone)]
enum EnvLayer {
    Process,
    Fixed(BTreeMap<String, String>),
}

#[derive(Debug)]
struct Layers {
    overrides: BTreeMap<String, String>,
    /// In-memory overrides that are never written back (e.g. `--model`).
    transient: BTreeMap<String, String>,
    overrides_path: Option<PathBuf>,
    build: BTreeMap<String, String>,
    env: EnvLayer,
}

/// Shared, cheaply cloned handle. Clones observe each other's changes.
#[derive(Debug, Clone)]
pub struct Settings {
    inner: Arc<RwLock<Layers>>,
}

impl Settings {
    /// Real settings: persisted overrides at `overrides_path`, build-time
    /// values and the process environment.
    pub fn load(overrides_path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = overrides_path.into();
        let overrides = load_overrides(&path)?;
        Ok(Self::from_layers(
            overrides,
            Some(path),
            build_time(),
            EnvLayer::Process,
        ))
    }

    /// Isolated settings with no persistence and an empty environment.
    pub fn in_memory() -> Self {
        Self::from_layers(
            BTreeMap::new(),
            None,
            BTreeMap::new(),
            EnvLayer::Fixed(BTreeMap::new()),
        )
    }

    /// Isolated settings with explicit build-time and environment layers.
    pub fn with_layers(
        build: impl IntoIterator<Item = (String, String)>,
        env: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        Self::from_layers(
            BTreeMap::new(),
            None,
            build.into_iter().collect(),
            EnvLayer::Fixed(env.into_iter().collect()),
        )
    }

    fn from_layers(
        overrides: BTreeMap<String, String>,
        overrides_path: Option<PathBuf>,
        build: BTreeMap<String, String>,
        env: EnvLayer,
    ) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Layers {
                overrides,
                transient: BTreeMap::new(),
                overrides_path,
                build,
                env,
            })),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.resolve(key).map(|(v, _)| v)
    }

    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    pub fn is_set(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Value plus the layer it came from.
    pub fn resolve(&self, key: &str) -> Option<(String, Layer)> {
        let layers = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let non_empty = |v: &String| {
            let v = v.trim();
            (!v.is_empty()).then(|| v.to_string())
        };

        if let Some(v) = layers
            .transient
            .get(key)
            .and_then(non_empty)
            .or_else(|| layers.overrides.get(key).and_then(non_empty))
        {
            return Some((v, Layer::Override));
        }
        if let Some(v) = layers.build.get(key).and_then(non_empty) {
            return Some((v, Layer::BuildTime));
        }
        let env = match &layers.env {
            EnvLayer::Process => std::env::var(key).ok(),
            EnvLayer::Fixed(map) => map.get(key).cloned(),
        };
        env.as_ref().and_then(non_empty).map(|v| (v, Layer::Environment))
    }

    /// Set a user override and persist it.
    pub fn set_override(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut layers = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        layers.overrides.insert(key.to_string(), value.trim().to_string());
        persist(&layers)
    }

    /// Remove a user override and persist. Returns whether one existed.
    pub fn remove_override(&self, key: &str) -> anyhow::Result<bool> {
        let mut layers = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let existed = layers.overrides.remove(key).is_some();
        if existed {
            persist(&layers)?;
        }
        Ok(existed)
    }

    /// Override for this process only.
    pub fn set_transient(&self, key: &str, value: &str) {
        let mut layers = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        layers.transient.insert(key.to_string(), value.trim().to_string());
    }

    pub fn override_keys(&self) -> Vec<String> {
        let layers = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        layers.overrides.keys().cloned().collect()
    }
}

/// Mask a secret for display, keeping a short tail.
pub fn mask(value: &str) -> String {
    let n = value.chars().count();
    if n <= 4 {
        return "•".repeat(n);
    }
    let tail: String = value.chars().skip(n - 4).collect();
    format!("{}{tail}", "•".repeat((n - 4).min(8)))
}

fn load_overrides(path: &Path) -> anyhow::Result<BTreeMap<String, String>> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => {
            return Err(anyhow::Error::new(e))
                .with_context(|| format!("failed to read overrides: {}", path.display()))
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(map) => Ok(map),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable overrides file");
            Ok(BTreeMap::new())
        }
    }
}

fn persist(layers: &Layers) -> anyhow::Result<()> {
    let Some(path) = &layers.overrides_path else {
        return Ok(());
    };
    let bytes = serde_json::to_vec_pretty(&layers.overrides).context("failed to encode overrides")?;
    crate::paths::write_atomic(path, &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kv(k: &str, v: &str) -> (String, String) {
        (k.to_string(), v.to_string())
    }

    #[test]
    fn override_beats_build_time_beats_environment() {
        let s = Settings::with_layers(
            [kv(OPENAI_MODEL, "baked-model")],
            [kv(OPENAI_MODEL, "env-model"), kv(OPENAI_API_KEY, "env-key")],
        );
        assert_eq!(s.resolve(OPENAI_MODEL), Some(("baked-model".into(), Layer::BuildTime)));
        assert_eq!(s.resolve(OPENAI_API_KEY), Some(("env-key".into(), Layer::Environment)));

        s.set_override(OPENAI_MODEL, "user-model").unwrap();
        assert_eq!(s.resolve(OPENAI_MODEL), Some(("user-model".into(), Layer::Override)));

        assert!(s.remove_override(OPENAI_MODEL).unwrap());
        assert_eq!(s.get(OPENAI_MODEL).as_deref(), Some("baked-model"));
    }

    #[test]
    fn empty_values_fall_through() {
        let s = Settings::with_layers([kv(GEMINI_API_KEY, "  ")], [kv(GEMINI_API_KEY, "from-env")]);
        s.set_override(GEMINI_API_KEY, "").unwrap();
        assert_eq!(s.get(GEMINI_API_KEY).as_deref(), Some("from-env"));
    }

    #[test]
    fn clones_share_live_state() {
        let s = Settings::in_memory();
        let view = s.clone();
        assert!(!view.is_set(PLACEHOLDER_API_KEY));
        s.set_transient(PLACEHOLDER_API_KEY, "demo");
        assert!(view.is_set(PLACEHOLDER_API_KEY));
        assert!(s.override_keys().is_empty());
    }

    #[test]
    fn overrides_persist_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("overrides.json");

        let s = Settings::load(&path).unwrap();
        s.set_override(TAVILY_API_KEY, "tvly-123").unwrap();

        let again = Settings::load(&path).unwrap();
        assert_eq!(again.override_keys(), vec![TAVILY_API_KEY.to_string()]);
        assert_eq!(again.resolve(TAVILY_API_KEY).map(|(_, l)| l), Some(Layer::Override));
    }

    #[test]
    fn masks_secrets() {
        assert_eq!(mask("abc"), "•••");
        assert_eq!(mask("sk-1234567890abcd"), "••••••••abcd");
    }
}
