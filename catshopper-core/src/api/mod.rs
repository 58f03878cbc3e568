//! Generation backend client
//!
//! The backend is a REST service that produces content plans, scripts,
//! scene prompts, images, voiceovers, videos and social media plans. Every
//! failure (transport, timeout, non-2xx, malformed JSON) is reported as
//! [`Error::RequestFailed`](crate::Error::RequestFailed) with a readable
//! message, so callers never distinguish transport from application errors.
//!
//! [`GenerationApi`] is the seam the orchestrator and job poller depend on;
//! [`ApiClient`] is the HTTP implementation.
//!
//! ## Credentials
//!
//! Credentialed endpoints take an optional explicit [`Credentials`]. When
//! none is given the client falls back to the persisted provider preference
//! and that provider's stored key. A freshly supplied key is persisted for
//! reuse. Keys are only ever logged through [`redact`].

mod client;

pub use client::ApiClient;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::types::{
    ApiProvider, ContentPlan, Episode, JobStatus, JobTicket, PlanRequest, SocialMediaPlan,
    VideoResult, VisualPrompts,
};

/// Provider selection plus an optional API key
#[derive(Clone)]
pub struct Credentials {
    provider: ApiProvider,
    api_key: Option<SecretString>,
}

impl Credentials {
    pub fn new(provider: ApiProvider, api_key: impl Into<String>) -> Self {
        Self {
            provider,
            api_key: Some(SecretString::from(api_key.into())),
        }
    }

    /// Provider selection without a key (the backend may hold its own)
    pub fn provider_only(provider: ApiProvider) -> Self {
        Self {
            provider,
            api_key: None,
        }
    }

    pub fn provider(&self) -> ApiProvider {
        self.provider
    }

    pub fn has_key(&self) -> bool {
        self.api_key.is_some()
    }

    pub(crate) fn expose_key(&self) -> Option<&str> {
        self.api_key.as_ref().map(|k| k.expose_secret())
    }

    /// Check key format before anything is sent
    pub fn validate(&self) -> Result<()> {
        let Some(key) = self.expose_key() else {
            return Ok(());
        };
        if key.trim().is_empty() {
            return Err(Error::Validation(format!(
                "{} API key is empty",
                self.provider.display_name()
            )));
        }
        if self.provider == ApiProvider::OpenAI && !key.starts_with("sk-") {
            return Err(Error::Validation(
                "Invalid OpenAI API key format. API keys should start with 'sk-'".to_string(),
            ));
        }
        Ok(())
    }

    /// Log-safe description of these credentials
    pub fn redacted(&self) -> String {
        match self.expose_key() {
            Some(key) => format!("{} {}", self.provider, redact(key)),
            None => format!("{} <no key>", self.provider),
        }
    }

    pub(crate) fn body(&self) -> AuthFields<'_> {
        AuthFields {
            api_key: self.expose_key(),
            api_provider: self.provider,
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("provider", &self.provider)
            .field("api_key", &self.expose_key().map(redact))
            .finish()
    }
}

/// `api_key` / `api_provider` fields merged into credentialed request bodies
#[derive(Debug, Serialize)]
pub(crate) struct AuthFields<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<&'a str>,
    api_provider: ApiProvider,
}

/// Redacted placeholder for an API key: its first three characters and a
/// short SHA-256 fingerprint, so two keys can be told apart in logs.
pub fn redact(key: &str) -> String {
    let prefix: String = key.chars().take(3).collect();
    let digest = Sha256::digest(key.as_bytes());
    format!("{}…[{}]", prefix, &hex::encode(digest)[..8])
}

/// Operations the orchestrator and job poller need from the backend.
#[async_trait]
pub trait GenerationApi: Send + Sync {
    /// POST /content/generate-plan
    async fn generate_plan(
        &self,
        request: &PlanRequest,
        credentials: Option<&Credentials>,
    ) -> Result<ContentPlan>;

    /// POST to the script endpoint; returns the script text
    async fn generate_script(
        &self,
        episode: &Episode,
        cat_name: &str,
        content_style: &str,
        credentials: Option<&Credentials>,
    ) -> Result<String>;

    /// POST /generate/visual-prompts/{episode}
    async fn generate_visual_prompts(
        &self,
        episode: usize,
        credentials: Option<&Credentials>,
    ) -> Result<VisualPrompts>;

    /// POST /generate/images/{episode}; starts a job
    async fn start_images(
        &self,
        episode: usize,
        credentials: Option<&Credentials>,
    ) -> Result<JobTicket>;

    /// POST /generate/voiceovers/{episode}; starts a job
    async fn start_voiceovers(
        &self,
        episode: usize,
        credentials: Option<&Credentials>,
    ) -> Result<JobTicket>;

    /// POST /generate/video/{episode}
    async fn generate_video(&self, episode: usize) -> Result<VideoResult>;

    /// POST /generate/social-media/{episode}
    async fn generate_social_media(&self, episode: usize) -> Result<SocialMediaPlan>;

    /// POST /generate/full-pipeline/{episode}; starts a job
    async fn start_full_pipeline(
        &self,
        episode: usize,
        credentials: Option<&Credentials>,
    ) -> Result<JobTicket>;

    /// GET /jobs/{job_id}
    async fn job_status(&self, job_id: &str) -> Result<JobStatus>;

    /// Bounded health probe; `false` on any failure
    async fn check_status(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_hides_key() {
        let key = "sk-live-very-secret-value";
        let redacted = redact(key);
        assert!(redacted.starts_with("sk-…["));
        assert!(!redacted.contains("very-secret"));
        assert_eq!(redacted, redact(key));
        assert_ne!(redacted, redact("sk-live-other-value"));
    }

    #[test]
    fn test_debug_does_not_leak_key() {
        let creds = Credentials::new(ApiProvider::OpenAI, "sk-abcdef123456");
        let debug = format!("{:?}", creds);
        assert!(!debug.contains("abcdef123456"));
        assert!(creds.redacted().starts_with("openai sk-"));
    }

    #[test]
    fn test_validate_openai_prefix() {
        assert!(Credentials::new(ApiProvider::OpenAI, "sk-123").validate().is_ok());
        assert!(matches!(
            Credentials::new(ApiProvider::OpenAI, "hf_123").validate(),
            Err(Error::Validation(_))
        ));
        assert!(Credentials::new(ApiProvider::HuggingFace, "hf_123")
            .validate()
            .is_ok());
        assert!(Credentials::new(ApiProvider::HuggingFace, "  ")
            .validate()
            .is_err());
        assert!(Credentials::provider_only(ApiProvider::OpenAI)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_auth_fields_skip_missing_key() {
        let creds = Credentials::provider_only(ApiProvider::HuggingFace);
        let json = serde_json::to_value(creds.body()).unwrap();
        assert_eq!(json, serde_json::json!({"api_provider": "huggingface"}));
    }
}
