use reqwest::StatusCode;

/// Failures an adapter can hit. Adapters turn these into a terminal error
/// chunk via `Display`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("{provider} API key is not configured.")]
    CredentialMissing { provider: &'static str },

    #[error("{provider} request failed: {status} {detail}")]
    Transport {
        provider: &'static str,
        status: u16,
        detail: String,
    },

    #[error("{provider} error: {message}")]
    Network {
        provider: &'static str,
        message: String,
    },

    #[error("{provider} error: {message}")]
    Upstream {
        provider: &'static str,
        message: String,
    },

    #[error("no usable {provider} model (tried {tried}): {last}")]
    ModelsExhausted {
        provider: &'static str,
        tried: String,
        last: Box<ProviderError>,
    },
}

impl ProviderError {
    pub fn transport(provider: &'static str, status: StatusCode, body: &str) -> Self {
        let body = body.trim();
        let detail = if body.is_empty() {
            status.canonical_reason().unwrap_or("Unknown error").to_string()
        } else {
            body.to_string()
        };
        ProviderError::Transport {
            provider,
            status: status.as_u16(),
            detail,
        }
    }

    pub fn network(provider: &'static str, err: impl std::fmt::Display) -> Self {
        ProviderError::Network {
            provider,
            message: err.to_string(),
        }
    }

    /// Whether the backend rejected the model itself rather than the request.
    ///
    /// Only transport failures qualify; a dropped connection says nothing
    /// about the model.
    pub fn is_model_unavailable(&self) -> bool {
        match self {
            ProviderError::Transport { status: 404, .. } => true,
            ProviderError::Transport { detail, .. } => mentions_unknown_model(detail),
            ProviderError::Upstream { message, .. } => mentions_unknown_model(message),
            _ => false,
        }
    }
}

fn mentions_unknown_model(text: &str) -> bool {
    let text = text.to_ascii_lowercase();
    ["not found", "404", "does not support"]
        .iter()
        .any(|marker| text.contains(marker))
}

/// Pull a human readable message out of a provider error body, if it is one
/// of the common `{"error": {"message": ...}}` / `{"error": "..."}` shapes.
pub(crate) fn error_message(value: &serde_json::Value) -> Option<String> {
    let err = value.get("error")?;
    let message = match err {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Object(map) => map
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_owned)
            .unwrap_or_else(|| err.to_string()),
        serde_json::Value::Null => return None,
        other => other.to_string(),
    };
    let collapsed = message.split_whitespace().collect::<Vec<_>>().join(" ");
    Some(collapsed)
}
