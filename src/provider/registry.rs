use super::anthropic::AnthropicProvider;
use super::openai::OpenAiProvider;
use super::placeholder::PlaceholderProvider;
use super::{Provider, ProviderDescriptor, ProviderId};
use crate::settings::Settings;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Resolves provider ids to one shared adapter instance each.
///
/// Adapters are built on first use and live as long as the registry. They
/// all share one HTTP client and one live view of the settings.
pub struct Registry {
    http: reqwest::Client,
    settings: Settings,
    placeholder_pace: Option<Duration>,
    cache: Mutex<HashMap<ProviderId, Arc<dyn Provider>>>,
}

impl Registry {
    pub fn new(http: reqwest::Client, settings: Settings) -> Self {
        Self {
            http,
            settings,
            placeholder_pace: None,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Override the placeholder's delay between fragments.
    pub fn with_placeholder_pace(mut self, pace: Duration) -> Self {
        self.placeholder_pace = Some(pace);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Resolve a user-supplied id. Unknown ids get the placeholder and a
    /// warning, never an error.
    pub fn resolve(&self, id: &str) -> Arc<dyn Provider> {
        let id = match id.parse::<ProviderId>() {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(error = %e, "falling back to the placeholder provider");
                ProviderId::Placeholder
            }
        };
        self.get(id)
    }

    pub fn get(&self, id: ProviderId) -> Arc<dyn Provider> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache.entry(id).or_insert_with(|| self.build(id)).clone()
    }

    /// Current readiness of every known provider.
    pub fn descriptors(&self) -> Vec<ProviderDescriptor> {
        ProviderId::ALL
            .into_iter()
            .map(|id| {
                let p = self.get(id);
                ProviderDescriptor {
                    id,
                    display_name: p.display_name(),
                    configured: p.is_configured(),
                }
            })
            .collect()
    }

    /// Drop every cached adapter; the next lookup builds fresh ones.
    pub fn reset(&self) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn build(&self, id: ProviderId) -> Arc<dyn Provider> {
        tracing::debug!(provider = %id, "initializing provider");
        match id {
            ProviderId::Gemini => {
                #[cfg(feature = "google")]
                {
                    Arc::new(super::gemini::GeminiProvider::new(
                        self.http.clone(),
                        self.settings.clone(),
                    ))
                }
                #[cfg(not(feature = "google"))]
                {
                    tracing::warn!("gemini provider is not enabled in this build; using the placeholder");
                    self.build(ProviderId::Placeholder)
                }
            }
            ProviderId::OpenAi => Arc::new(OpenAiProvider::new(self.http.clone(), self.settings.clone())),
            ProviderId::Anthropic => {
                Arc::new(AnthropicProvider::new(self.http.clone(), self.settings.clone()))
            }
            ProviderId::Placeholder => {
                let p = PlaceholderProvider::new(self.settings.clone());
                match self.placeholder_pace {
                    Some(pace) => Arc::new(p.with_pace(pace)),
                    None => Arc::new(p),
                }
            }
        }
    }
}
