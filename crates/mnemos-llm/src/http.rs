//! HTTP plumbing shared by the backends.

use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use url::Url;

use mnemos_core::error::{MnemosError, MnemosResult};

/// Resolve the API key from configuration, then from `env_var`.
pub(crate) fn resolve_api_key(
    configured: Option<&str>,
    env_var: &str,
    provider: &str,
) -> MnemosResult<SecretString> {
    configured
        .map(str::to_string)
        .or_else(|| std::env::var(env_var).ok())
        .filter(|key| !key.trim().is_empty())
        .map(SecretString::new)
        .ok_or_else(|| {
            MnemosError::Configuration(format!(
                "{} API key not found. Set {} or provide api_key in config.",
                provider, env_var
            ))
        })
}

/// Join `path` onto `base`, keeping any path prefix the base already has.
pub(crate) fn endpoint(base: &str, path: &str) -> MnemosResult<Url> {
    let normalized = if base.ends_with('/') {
        base.to_string()
    } else {
        format!("{}/", base)
    };
    Url::parse(&normalized)
        .and_then(|url| url.join(path))
        .map_err(|e| MnemosError::Configuration(format!("Invalid base URL '{}': {}", base, e)))
}

pub(crate) fn client(timeout_secs: u64) -> MnemosResult<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .build()
        .map_err(|e| MnemosError::Configuration(format!("Failed to create HTTP client: {}", e)))
}

pub(crate) fn bearer(key: &SecretString) -> String {
    format!("Bearer {}", key.expose_secret())
}

pub(crate) fn map_send_error(provider: &str, err: reqwest::Error) -> MnemosError {
    if err.is_timeout() {
        MnemosError::timeout(format!("{} request timed out", provider))
    } else {
        MnemosError::network(format!("{} request failed: {}", provider, err))
    }
}

/// Read the body and turn non-success statuses into typed errors.
pub(crate) async fn read_body(
    provider: &str,
    response: reqwest::Response,
    extract_message: impl Fn(&str) -> Option<String>,
) -> MnemosResult<String> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| map_send_error(provider, e))?;
    if !status.is_success() {
        let message = extract_message(&body).unwrap_or(body);
        return Err(MnemosError::from_http_status(
            status.as_u16(),
            &format!("{} API error: {}", provider, message),
        ));
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_keeps_base_path() {
        assert_eq!(
            endpoint("https://api.openai.com/v1", "chat/completions")
                .unwrap()
                .as_str(),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            endpoint("http://localhost:8080/openai/v1/", "chat/completions")
                .unwrap()
                .as_str(),
            "http://localhost:8080/openai/v1/chat/completions"
        );
        assert!(endpoint("not a url", "x").is_err());
    }

    #[test]
    fn test_configured_key_wins() {
        let key = resolve_api_key(Some("sk-test"), "MNEMOS_TEST_UNSET_KEY", "Test").unwrap();
        assert_eq!(bearer(&key), "Bearer sk-test");
        assert!(resolve_api_key(Some("  "), "MNEMOS_TEST_UNSET_KEY", "Test").is_err());
    }
}
