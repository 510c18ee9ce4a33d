//! Model-provider selection.
//!
//! The language model itself runs inside the automation bridge; this module
//! only resolves which provider/model to use and where the credentials come
//! from, failing fast at startup when a required key is missing. The resolved
//! configuration is serialized into every agent run request.

use serde::Serialize;
use thiserror::Error;

/// Supported model providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Anthropic,
    Ollama,
}

impl Provider {
    /// Default model used when none is specified.
    fn default_model(self) -> &'static str {
        match self {
            Provider::OpenAi => "gpt-4o",
            Provider::Anthropic => "claude-3-5-sonnet-20241022",
            Provider::Ollama => "llama3.1",
        }
    }

    /// Environment variable holding the provider's API key.
    fn api_key_var(self) -> Option<&'static str> {
        match self {
            Provider::OpenAi => Some("OPENAI_API_KEY"),
            Provider::Anthropic => Some("ANTHROPIC_API_KEY"),
            Provider::Ollama => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Ollama => "ollama",
        }
    }
}

impl std::str::FromStr for Provider {
    type Err = LlmConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "anthropic" => Ok(Provider::Anthropic),
            "ollama" => Ok(Provider::Ollama),
            other => Err(LlmConfigError::UnsupportedProvider(other.to_string())),
        }
    }
}

/// Errors raised while resolving the model configuration.
#[derive(Debug, Error)]
pub enum LlmConfigError {
    #[error(
        "unsupported LLM provider: {0}. Supported providers: openai, anthropic, ollama"
    )]
    UnsupportedProvider(String),
    #[error("{provider} API key is required. Set {var} or pass --llm-api-key")]
    MissingApiKey { provider: &'static str, var: &'static str },
}

/// Resolved provider/model selection forwarded to the bridge.
#[derive(Debug, Clone, Serialize)]
pub struct ModelConfig {
    pub provider: Provider,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub temperature: f64,
}

/// Resolve a model configuration from explicit options and the environment.
///
/// Provider-specific defaults mirror what each ecosystem expects: OpenAI and
/// Anthropic require an API key, Ollama only needs a reachable server.
pub fn resolve(
    provider: Provider,
    model: Option<String>,
    api_key: Option<String>,
    base_url: Option<String>,
    temperature: f64,
) -> Result<ModelConfig, LlmConfigError> {
    let model = model.unwrap_or_else(|| provider.default_model().to_string());

    let api_key = match provider.api_key_var() {
        Some(var) => {
            let key = api_key.or_else(|| std::env::var(var).ok());
            if key.is_none() {
                return Err(LlmConfigError::MissingApiKey {
                    provider: provider.as_str(),
                    var,
                });
            }
            key
        }
        None => None,
    };

    let base_url = match provider {
        Provider::Ollama => base_url
            .or_else(|| std::env::var("OLLAMA_BASE_URL").ok())
            .or_else(|| Some("http://localhost:11434".to_string())),
        _ => base_url,
    };

    Ok(ModelConfig {
        provider,
        model,
        api_key,
        base_url,
        temperature,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_parses_case_insensitively() {
        assert_eq!("OpenAI".parse::<Provider>().unwrap(), Provider::OpenAi);
        assert_eq!("anthropic".parse::<Provider>().unwrap(), Provider::Anthropic);
        assert!("gemini".parse::<Provider>().is_err());
    }

    #[test]
    fn openai_requires_api_key() {
        let result = resolve(Provider::OpenAi, None, None, None, 0.0);
        match std::env::var("OPENAI_API_KEY") {
            Ok(_) => assert!(result.is_ok()),
            Err(_) => assert!(matches!(
                result,
                Err(LlmConfigError::MissingApiKey { .. })
            )),
        }
    }

    #[test]
    fn explicit_key_satisfies_openai() {
        let config =
            resolve(Provider::OpenAi, None, Some("sk-test".into()), None, 0.0).unwrap();
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn ollama_defaults_base_url_and_needs_no_key() {
        let config = resolve(Provider::Ollama, None, None, None, 0.7).unwrap();
        assert_eq!(config.model, "llama3.1");
        assert!(config.api_key.is_none());
        assert!(config.base_url.is_some());
    }

    #[test]
    fn explicit_model_wins_over_default() {
        let config = resolve(
            Provider::Anthropic,
            Some("claude-3-opus-20240229".into()),
            Some("key".into()),
            None,
            0.0,
        )
        .unwrap();
        assert_eq!(config.model, "claude-3-opus-20240229");
    }
}
