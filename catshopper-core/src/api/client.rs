//! HTTP client for the generation backend REST API

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::ApiConfig;
use crate::error::{Error, Result};
use crate::store::{PreferenceStore, PROVIDER_PREFERENCE};
use crate::types::{
    ApiProvider, ContentPlan, Episode, JobStatus, JobTicket, PlanRequest, SocialMediaPlan,
    VideoResult, VisualPrompts,
};

use super::{redact, AuthFields, Credentials, GenerationApi};

/// Response from GET /status
#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
}

/// Response from the script endpoint
#[derive(Debug, Deserialize)]
struct ScriptResponse {
    script: String,
}

/// Request body for content-plan generation
#[derive(Serialize)]
struct GeneratePlanRequest<'a> {
    #[serde(flatten)]
    plan: &'a PlanRequest,
    #[serde(flatten)]
    auth: AuthFields<'a>,
}

/// Request body for script generation
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateScriptRequest<'a> {
    episode: &'a Episode,
    cat_name: &'a str,
    content_style: &'a str,
    #[serde(flatten)]
    auth: AuthFields<'a>,
}

/// HTTP client for the generation backend
pub struct ApiClient {
    http_client: reqwest::Client,
    base_url: String,
    script_endpoint: String,
    status_timeout: Duration,
    default_provider: ApiProvider,
    preferences: Arc<dyn PreferenceStore>,
}

impl ApiClient {
    /// Create a new client from configuration
    ///
    /// `preferences` supplies stored provider/key preferences and receives
    /// freshly supplied keys.
    pub fn new(config: &ApiConfig, preferences: Arc<dyn PreferenceStore>) -> Result<Self> {
        config.validate()?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout())
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            script_endpoint: config.script_endpoint.clone(),
            status_timeout: config.status_timeout(),
            default_provider: config.provider,
            preferences,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send one request and decode the JSON response.
    ///
    /// Non-2xx responses yield the `detail` field of the JSON error body when
    /// present, otherwise `HTTP error {status}`.
    pub async fn request<T, B>(&self, method: Method, endpoint: &str, body: Option<&B>) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = format!("{}{}", self.base_url, endpoint);
        tracing::debug!(method = %method, url = %url, "Sending backend request");

        let mut request = self.http_client.request(method, &url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::RequestFailed(format!("HTTP request failed: {}", e)))?;

        let status = response.status();

        if status.is_success() {
            response
                .json::<T>()
                .await
                .map_err(|e| Error::RequestFailed(format!("failed to parse response: {}", e)))
        } else {
            let error_text = response.text().await.unwrap_or_default();
            Err(Error::RequestFailed(error_message(status, &error_text)))
        }
    }

    /// Resolve the credentials for one request.
    ///
    /// Explicit credentials are validated and, when they carry a key,
    /// persisted as the provider preference. Otherwise the stored preference
    /// is used, defaulting to the configured provider.
    pub fn resolve_credentials(&self, explicit: Option<&Credentials>) -> Result<Credentials> {
        if let Some(creds) = explicit {
            creds.validate()?;
            if creds.has_key() {
                self.remember(creds);
            }
            return Ok(creds.clone());
        }

        let provider = match self.stored_preference(PROVIDER_PREFERENCE) {
            Some(value) => value.parse().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Ignoring stored provider preference");
                self.default_provider
            }),
            None => self.default_provider,
        };

        let creds = match self.stored_preference(provider.key_preference()) {
            Some(key) => Credentials::new(provider, key),
            None => Credentials::provider_only(provider),
        };
        creds.validate()?;
        Ok(creds)
    }

    fn stored_preference(&self, key: &str) -> Option<String> {
        match self.preferences.get_preference(key) {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                tracing::warn!(key, error = %e, "Failed to read preference");
                None
            }
        }
    }

    fn remember(&self, creds: &Credentials) {
        let Some(key) = creds.expose_key() else {
            return;
        };
        let provider = creds.provider();
        let saved = self
            .preferences
            .set_preference(provider.key_preference(), key)
            .and_then(|_| {
                self.preferences
                    .set_preference(PROVIDER_PREFERENCE, provider.as_str())
            });
        match saved {
            Ok(()) => tracing::debug!(key = %redact(key), provider = %provider, "Stored API key"),
            Err(e) => tracing::warn!(provider = %provider, error = %e, "Failed to store API key"),
        }
    }

    async fn post_with_auth<T>(
        &self,
        endpoint: &str,
        credentials: Option<&Credentials>,
    ) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let creds = self.resolve_credentials(credentials)?;
        self.request(Method::POST, endpoint, Some(&creds.body()))
            .await
    }

    // ============================================
    // Remote plan persistence
    // ============================================

    /// GET /content-plans
    pub async fn list_remote_plans(&self) -> Result<Vec<ContentPlan>> {
        self.request::<_, ()>(Method::GET, "/content-plans", None)
            .await
    }

    /// GET /content-plans/{id}; `None` when the backend answers 404
    pub async fn get_remote_plan(&self, id: &str) -> Result<Option<ContentPlan>> {
        let url = format!(
            "{}/content-plans/{}",
            self.base_url,
            urlencoding::encode(id)
        );
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::RequestFailed(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::RequestFailed(error_message(status, &error_text)));
        }
        response
            .json()
            .await
            .map(Some)
            .map_err(|e| Error::RequestFailed(format!("failed to parse response: {}", e)))
    }

    /// POST /content-plans for new plans, PUT /content-plans/{id} otherwise
    pub async fn save_remote_plan(&self, plan: &ContentPlan) -> Result<ContentPlan> {
        match plan.id.as_deref() {
            Some(id) => {
                let endpoint = format!("/content-plans/{}", urlencoding::encode(id));
                self.request(Method::PUT, &endpoint, Some(plan)).await
            }
            None => {
                self.request(Method::POST, "/content-plans", Some(plan))
                    .await
            }
        }
    }

    /// DELETE /content-plans/{id}
    pub async fn delete_remote_plan(&self, id: &str) -> Result<()> {
        let endpoint = format!("/content-plans/{}", urlencoding::encode(id));
        let _: serde_json::Value = self.request::<_, ()>(Method::DELETE, &endpoint, None).await?;
        Ok(())
    }
}

#[async_trait]
impl GenerationApi for ApiClient {
    async fn generate_plan(
        &self,
        request: &PlanRequest,
        credentials: Option<&Credentials>,
    ) -> Result<ContentPlan> {
        let creds = self.resolve_credentials(credentials)?;
        if !creds.has_key() {
            return Err(Error::Validation(format!(
                "{} API key is required.",
                creds.provider().display_name()
            )));
        }
        tracing::info!(
            series = %request.series_title,
            episodes = request.num_episodes,
            credentials = %creds.redacted(),
            "Generating content plan"
        );

        let body = GeneratePlanRequest {
            plan: request,
            auth: creds.body(),
        };
        let plan: ContentPlan = self
            .request(Method::POST, "/content/generate-plan", Some(&body))
            .await?;

        if plan.episodes.is_empty() {
            return Err(Error::RequestFailed(
                "content plan response contained no episodes".to_string(),
            ));
        }
        Ok(plan)
    }

    async fn generate_script(
        &self,
        episode: &Episode,
        cat_name: &str,
        content_style: &str,
        credentials: Option<&Credentials>,
    ) -> Result<String> {
        let creds = self.resolve_credentials(credentials)?;
        let body = GenerateScriptRequest {
            episode,
            cat_name,
            content_style,
            auth: creds.body(),
        };
        let response: ScriptResponse = self
            .request(Method::POST, &self.script_endpoint, Some(&body))
            .await?;
        Ok(response.script)
    }

    async fn generate_visual_prompts(
        &self,
        episode: usize,
        credentials: Option<&Credentials>,
    ) -> Result<VisualPrompts> {
        self.post_with_auth(&format!("/generate/visual-prompts/{}", episode), credentials)
            .await
    }

    async fn start_images(
        &self,
        episode: usize,
        credentials: Option<&Credentials>,
    ) -> Result<JobTicket> {
        self.post_with_auth(&format!("/generate/images/{}", episode), credentials)
            .await
    }

    async fn start_voiceovers(
        &self,
        episode: usize,
        credentials: Option<&Credentials>,
    ) -> Result<JobTicket> {
        self.post_with_auth(&format!("/generate/voiceovers/{}", episode), credentials)
            .await
    }

    async fn generate_video(&self, episode: usize) -> Result<VideoResult> {
        self.request::<_, ()>(Method::POST, &format!("/generate/video/{}", episode), None)
            .await
    }

    async fn generate_social_media(&self, episode: usize) -> Result<SocialMediaPlan> {
        self.request::<_, ()>(
            Method::POST,
            &format!("/generate/social-media/{}", episode),
            None,
        )
        .await
    }

    async fn start_full_pipeline(
        &self,
        episode: usize,
        credentials: Option<&Credentials>,
    ) -> Result<JobTicket> {
        self.post_with_auth(&format!("/generate/full-pipeline/{}", episode), credentials)
            .await
    }

    async fn job_status(&self, job_id: &str) -> Result<JobStatus> {
        let endpoint = format!("/jobs/{}", urlencoding::encode(job_id));
        self.request::<_, ()>(Method::GET, &endpoint, None).await
    }

    async fn check_status(&self) -> bool {
        let url = format!("{}/status", self.base_url);

        let response = match self
            .http_client
            .get(&url)
            .timeout(self.status_timeout)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                tracing::debug!(status = %response.status(), "Status probe rejected");
                return false;
            }
            Err(e) => {
                tracing::debug!(error = %e, "Status probe failed");
                return false;
            }
        };

        match response.json::<StatusResponse>().await {
            Ok(body) => body.status == "operational",
            Err(e) => {
                tracing::debug!(error = %e, "Status probe returned malformed body");
                false
            }
        }
    }
}

/// Build the message for a non-2xx response
fn error_message(status: reqwest::StatusCode, body: &str) -> String {
    let detail = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|json| json.get("detail").cloned())
        .and_then(|detail| match detail {
            serde_json::Value::String(s) if !s.is_empty() => Some(s),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        });

    detail.unwrap_or_else(|| format!("HTTP error {}", status.as_u16()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Database;

    fn client_with(config: ApiConfig) -> Result<ApiClient> {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        ApiClient::new(&config, Arc::new(db))
    }

    #[test]
    fn test_client_rejects_invalid_config() {
        let config = ApiConfig {
            base_url: "not a url".to_string(),
            ..Default::default()
        };
        assert!(client_with(config).is_err());
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let config = ApiConfig {
            base_url: "http://localhost:8000/".to_string(),
            ..Default::default()
        };
        let client = client_with(config).unwrap();
        assert_eq!(client.base_url(), "http://localhost:8000");
    }

    #[test]
    fn test_error_message_prefers_detail() {
        let status = reqwest::StatusCode::BAD_REQUEST;
        assert_eq!(
            error_message(status, r#"{"detail": "OpenAI API key is required"}"#),
            "OpenAI API key is required"
        );
        assert_eq!(error_message(status, "<html>oops</html>"), "HTTP error 400");
        assert_eq!(error_message(status, r#"{"error": "x"}"#), "HTTP error 400");
        assert!(error_message(status, r#"{"detail": [{"msg": "field required"}]}"#)
            .contains("field required"));
    }

    #[test]
    fn test_resolve_defaults_to_openai_without_key() {
        let client = client_with(ApiConfig::default()).unwrap();
        let creds = client.resolve_credentials(None).unwrap();
        assert_eq!(creds.provider(), ApiProvider::OpenAI);
        assert!(!creds.has_key());
    }

    #[test]
    fn test_explicit_key_is_remembered() {
        let client = client_with(ApiConfig::default()).unwrap();
        let explicit = Credentials::new(ApiProvider::HuggingFace, "hf_secret");
        client.resolve_credentials(Some(&explicit)).unwrap();

        let resolved = client.resolve_credentials(None).unwrap();
        assert_eq!(resolved.provider(), ApiProvider::HuggingFace);
        assert_eq!(resolved.expose_key(), Some("hf_secret"));
    }

    #[test]
    fn test_invalid_explicit_key_is_not_stored() {
        let client = client_with(ApiConfig::default()).unwrap();
        let explicit = Credentials::new(ApiProvider::OpenAI, "not-an-openai-key");
        assert!(matches!(
            client.resolve_credentials(Some(&explicit)),
            Err(Error::Validation(_))
        ));
        assert!(!client.resolve_credentials(None).unwrap().has_key());
    }
}
