//! Core domain types for catshopper
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Plan** | A [`ContentPlan`]: a generated series concept with an ordered list of episodes |
//! | **Episode** | One slot of a plan, addressed by its position, never by an id |
//! | **Stage** | One step of the per-episode pipeline (script, visual prompts, images, voiceovers, video, social media) |
//! | **Job** | A backend-tracked unit of work identified by an opaque id, polled to completion |
//! | **Provider** | The generation backend used for a request (`openai` or `huggingface`), each with its own key |
//!
//! Wire shapes mirror the backend's JSON. Required fields fail deserialization
//! when missing so malformed payloads stop at the API boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder plan id used for script keys of plans that were never saved.
pub const UNSAVED_PLAN_ID: &str = "temp-plan";

/// Default cat name when a plan does not carry one
pub const DEFAULT_CAT_NAME: &str = "Whiskers";

/// Default content style when a plan does not carry one
pub const DEFAULT_CONTENT_STYLE: &str = "humorous, family-friendly";

// ============================================
// Content plan
// ============================================

/// A generated series concept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentPlan {
    /// Stable id once saved; `None` for a freshly generated plan
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub series_concept: String,
    #[serde(default = "default_cat_name")]
    pub cat_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_style: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub cat_personality: CatPersonality,
    pub episodes: Vec<Episode>,
}

fn default_cat_name() -> String {
    DEFAULT_CAT_NAME.to_string()
}

impl ContentPlan {
    /// Id used to key scripts; unsaved plans share [`UNSAVED_PLAN_ID`].
    pub fn storage_id(&self) -> &str {
        self.id.as_deref().unwrap_or(UNSAVED_PLAN_ID)
    }

    /// Whether the plan has been assigned a stable id.
    pub fn is_saved(&self) -> bool {
        self.id.is_some()
    }

    /// Assign a fresh id to an unsaved plan and return the id.
    pub fn ensure_id(&mut self) -> &str {
        self.id
            .get_or_insert_with(|| uuid::Uuid::new_v4().to_string())
            .as_str()
    }

    /// Content style with the series default applied.
    pub fn style_or_default(&self) -> &str {
        self.content_style
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(DEFAULT_CONTENT_STYLE)
    }

    /// Number of episodes that carry a script.
    pub fn scripted_count(&self) -> usize {
        self.episodes.iter().filter(|e| e.script.is_some()).count()
    }
}

/// Personality sheet for the series' cat.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatPersonality {
    #[serde(default)]
    pub traits: Vec<String>,
    #[serde(default)]
    pub quirks: Vec<String>,
    #[serde(default)]
    pub catchphrases: Vec<String>,
}

/// One episode of a plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Episode {
    pub title: String,
    #[serde(default, alias = "description")]
    pub premise: String,
    #[serde(default)]
    pub setting: String,
    #[serde(default)]
    pub items: Vec<String>,
    #[serde(default)]
    pub conflict: String,
    #[serde(default)]
    pub resolution: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    /// Denormalized copy of the episode's script
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
}

// ============================================
// Providers
// ============================================

/// Generation provider selected for a request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiProvider {
    #[default]
    OpenAI,
    HuggingFace,
}

impl ApiProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiProvider::OpenAI => "openai",
            ApiProvider::HuggingFace => "huggingface",
        }
    }

    /// Returns the display name for this provider
    pub fn display_name(&self) -> &'static str {
        match self {
            ApiProvider::OpenAI => "OpenAI",
            ApiProvider::HuggingFace => "Hugging Face",
        }
    }

    /// Preference key under which this provider's API key is stored
    pub fn key_preference(&self) -> &'static str {
        match self {
            ApiProvider::OpenAI => "openai_api_key",
            ApiProvider::HuggingFace => "huggingface_api_key",
        }
    }
}

impl std::fmt::Display for ApiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ApiProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai" => Ok(ApiProvider::OpenAI),
            "huggingface" => Ok(ApiProvider::HuggingFace),
            _ => Err(format!("unknown api provider: {}", s)),
        }
    }
}

// ============================================
// Pipeline stages
// ============================================

/// One step of the per-episode generation pipeline, in dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Script,
    VisualPrompts,
    Images,
    Voiceovers,
    Video,
    SocialMedia,
}

impl Stage {
    /// All stages in the order `generate_all_stages` runs them
    pub const ALL: [Stage; 6] = [
        Stage::Script,
        Stage::VisualPrompts,
        Stage::Images,
        Stage::Voiceovers,
        Stage::Video,
        Stage::SocialMedia,
    ];

    /// Stages that must hold an artifact before this one can start
    pub fn prerequisites(&self) -> &'static [Stage] {
        match self {
            Stage::Script => &[],
            Stage::VisualPrompts => &[Stage::Script],
            Stage::Images => &[Stage::VisualPrompts],
            Stage::Voiceovers => &[Stage::Script],
            Stage::Video => &[Stage::Images, Stage::Voiceovers],
            Stage::SocialMedia => &[Stage::Script],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Script => "script",
            Stage::VisualPrompts => "visual-prompts",
            Stage::Images => "images",
            Stage::Voiceovers => "voiceovers",
            Stage::Video => "video",
            Stage::SocialMedia => "social-media",
        }
    }

    /// Returns the display name for this stage
    pub fn display_name(&self) -> &'static str {
        match self {
            Stage::Script => "Script",
            Stage::VisualPrompts => "Visual Prompts",
            Stage::Images => "Images",
            Stage::Voiceovers => "Voiceovers",
            Stage::Video => "Video",
            Stage::SocialMedia => "Social Media",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "script" => Ok(Stage::Script),
            "visual-prompts" | "visualPrompts" => Ok(Stage::VisualPrompts),
            "images" => Ok(Stage::Images),
            "voiceovers" => Ok(Stage::Voiceovers),
            "video" => Ok(Stage::Video),
            "social-media" | "socialMedia" => Ok(Stage::SocialMedia),
            _ => Err(format!("unknown stage: {}", s)),
        }
    }
}

/// State of one stage for one episode
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StageState {
    #[default]
    Idle,
    Running,
    Done,
    /// Last attempt failed; any previous artifact is retained
    Error(String),
}

impl StageState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageState::Idle => "idle",
            StageState::Running => "running",
            StageState::Done => "done",
            StageState::Error(_) => "error",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, StageState::Running)
    }
}

impl std::fmt::Display for StageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageState::Error(msg) => write!(f, "error: {}", msg),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

// ============================================
// Stage artifacts
// ============================================

/// Scene prompts produced for an episode's script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisualPrompts {
    pub scenes: Vec<Scene>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scene {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub stable_diffusion_prompt: String,
    #[serde(default)]
    pub style: String,
    #[serde(default)]
    pub shot_type: String,
}

/// Rendered video location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoResult {
    pub path: String,
}

/// Social media rollout for an episode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocialMediaPlan {
    pub platforms: Vec<serde_json::Value>,
    #[serde(default)]
    pub content_variations: Vec<serde_json::Value>,
}

// ============================================
// Jobs
// ============================================

/// Backend job lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }
}

/// Response from POST endpoints that start a job
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JobTicket {
    pub job_id: String,
}

/// Response from GET /jobs/{job_id}
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JobStatus {
    pub status: JobState,
    /// Percent complete; the backend may send null while it does not know
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub result_path: Option<String>,
}

/// Terminal success of a polled job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub job_id: String,
    pub result_path: Option<String>,
}

/// Latest observed state of a job, as published by the poller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobProgress {
    pub job_id: String,
    pub state: JobState,
    /// Displayed progress; never decreases while the job runs
    pub percent: u8,
}

// ============================================
// Requests
// ============================================

/// Parameters for content-plan generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanRequest {
    pub series_title: String,
    pub num_episodes: u32,
    pub cat_name: String,
    pub content_style: String,
    pub theme: String,
}

impl Default for PlanRequest {
    fn default() -> Self {
        Self {
            series_title: "Mischievous Cat Shopper".to_string(),
            num_episodes: 5,
            cat_name: DEFAULT_CAT_NAME.to_string(),
            content_style: DEFAULT_CONTENT_STYLE.to_string(),
            theme: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_accepts_description_alias_and_defaults() {
        let json = r#"{
            "series_concept": "A cat with expensive taste",
            "episodes": [
                {"title": "Grocery Store Mayhem", "description": "Sneaks in for tuna"}
            ]
        }"#;
        let plan: ContentPlan = serde_json::from_str(json).unwrap();
        assert!(plan.id.is_none());
        assert_eq!(plan.cat_name, "Whiskers");
        assert_eq!(plan.storage_id(), UNSAVED_PLAN_ID);
        assert_eq!(plan.episodes[0].premise, "Sneaks in for tuna");
        assert!(plan.episodes[0].items.is_empty());
        assert_eq!(plan.style_or_default(), DEFAULT_CONTENT_STYLE);
    }

    #[test]
    fn test_episode_without_title_is_rejected() {
        let json = r#"{"series_concept": "x", "episodes": [{"premise": "no title"}]}"#;
        assert!(serde_json::from_str::<ContentPlan>(json).is_err());
    }

    #[test]
    fn test_stage_prerequisites_follow_pipeline_order() {
        for stage in Stage::ALL {
            for prereq in stage.prerequisites() {
                assert!(prereq < &stage, "{} must come before {}", prereq, stage);
            }
        }
        assert_eq!(
            Stage::Video.prerequisites(),
            &[Stage::Images, Stage::Voiceovers]
        );
    }

    #[test]
    fn test_stage_parse_accepts_both_spellings() {
        assert_eq!("visual-prompts".parse::<Stage>(), Ok(Stage::VisualPrompts));
        assert_eq!("socialMedia".parse::<Stage>(), Ok(Stage::SocialMedia));
        assert!("thumbnail".parse::<Stage>().is_err());
    }

    #[test]
    fn test_job_status_progress_may_be_null() {
        let status: JobStatus =
            serde_json::from_str(r#"{"status": "running", "progress": null}"#).unwrap();
        assert_eq!(status.status, JobState::Running);
        assert!(status.progress.is_none());
        assert!(!status.status.is_terminal());
    }

    #[test]
    fn test_provider_key_preferences() {
        assert_eq!(ApiProvider::default(), ApiProvider::OpenAI);
        assert_eq!(ApiProvider::OpenAI.key_preference(), "openai_api_key");
        assert_eq!(
            "huggingface".parse::<ApiProvider>(),
            Ok(ApiProvider::HuggingFace)
        );
    }
}
