//! catshopper - Mischievous Cat Shopper content pipeline client
//!
//! Generates content plans and drives each episode through script, visual
//! prompts, images, voiceovers, video and social media generation on the
//! backend service.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Store: $XDG_DATA_HOME/catshopper/store.db (~/.local/share/catshopper/store.db)
//! - Logs: $XDG_STATE_HOME/catshopper/ (~/.local/state/catshopper/)
//! - Config: $XDG_CONFIG_HOME/catshopper/config.toml (~/.config/catshopper/config.toml)

mod progress;

use std::future::Future;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use catshopper_core::api::redact;
use catshopper_core::store::{PreferenceStore, PROVIDER_PREFERENCE};
use catshopper_core::{
    ApiClient, ApiProvider, Config, ConnectionState, ContentPlan, Credentials, Database,
    EpisodeReport, GenerationApi, Orchestrator, PipelineEvent, PlanLibrary, PlanRequest, Stage,
    StageOutcome, Stores, DEFAULT_CAT_NAME, DEFAULT_CONTENT_STYLE,
};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "catshopper")]
#[command(about = "Drive the Mischievous Cat Shopper content pipeline")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show configuration and probe the backend
    Status,

    /// Manage stored API keys
    Key {
        #[command(subcommand)]
        command: KeyCommand,
    },

    /// Generate and manage content plans
    Plan {
        #[command(subcommand)]
        command: PlanCommand,
    },

    /// Edit episode scripts
    Script {
        #[command(subcommand)]
        command: ScriptCommand,
    },

    /// Run one stage for one episode
    Stage {
        /// Plan id
        plan: String,
        /// Episode index (0-based)
        episode: usize,
        /// script, visual-prompts, images, voiceovers, video or social-media
        stage: Stage,
        #[command(flatten)]
        auth: AuthArgs,
    },

    /// Run every stage for one episode
    Episode {
        /// Plan id
        plan: String,
        /// Episode index (0-based)
        episode: usize,
        #[command(flatten)]
        auth: AuthArgs,
    },

    /// Run every stage for every episode of a plan
    RunAll {
        /// Plan id
        plan: String,
        #[command(flatten)]
        auth: AuthArgs,
    },

    /// Start the server-side full pipeline for one episode
    Pipeline {
        /// Plan id
        plan: String,
        /// Episode index (0-based)
        episode: usize,
        #[command(flatten)]
        auth: AuthArgs,
    },
}

#[derive(Subcommand)]
enum KeyCommand {
    /// Validate and store an API key for a provider
    Set {
        #[arg(long)]
        provider: ApiProvider,
        #[arg(long)]
        key: String,
    },
}

#[derive(Subcommand)]
enum PlanCommand {
    /// Generate a new content plan and save it locally
    Generate {
        #[arg(long, default_value = "Mischievous Cat Shopper")]
        title: String,
        #[arg(long, default_value_t = 5)]
        episodes: u32,
        #[arg(long, default_value = DEFAULT_CAT_NAME)]
        cat_name: String,
        #[arg(long, default_value = DEFAULT_CONTENT_STYLE)]
        style: String,
        #[arg(long, default_value = "")]
        theme: String,
        #[command(flatten)]
        auth: AuthArgs,
    },

    /// List saved content plans
    List,

    /// Show one content plan
    Show {
        id: String,
        /// Print the raw plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete a saved content plan (its scripts are kept)
    Delete { id: String },

    /// Copy plans saved on the backend into the local store
    Import,
}

#[derive(Subcommand)]
enum ScriptCommand {
    /// Store an edited script for an episode (reads stdin without --file)
    Save {
        /// Plan id
        plan: String,
        /// Episode index (0-based)
        episode: usize,
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

#[derive(clap::Args)]
struct AuthArgs {
    /// Provider for this run (default: stored preference)
    #[arg(long)]
    provider: Option<ApiProvider>,

    /// API key for this run; stored for later runs
    #[arg(long)]
    api_key: Option<String>,
}

/// Shared handles for one command
struct App {
    config: Config,
    db: Arc<Database>,
    client: Arc<ApiClient>,
    shutdown: CancellationToken,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load().context("failed to load configuration")?;

    let _log_guard =
        catshopper_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!("catshopper starting");

    let store_path = Config::store_path();
    let db = Database::open(&store_path).context("failed to open local store")?;
    db.migrate().context("failed to run store migrations")?;
    let db = Arc::new(db);

    let client = ApiClient::new(&config.api, db.clone()).context("failed to create API client")?;

    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nCancelling...");
        token.cancel();
    })
    .context("failed to set Ctrl+C handler")?;

    let ctx = App {
        config,
        db,
        client: Arc::new(client),
        shutdown,
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to create async runtime")?;

    runtime.block_on(run(ctx, args.command))
}

async fn run(ctx: App, command: Command) -> Result<()> {
    match command {
        Command::Status => cmd_status(&ctx).await,
        Command::Key {
            command: KeyCommand::Set { provider, key },
        } => cmd_key_set(&ctx, provider, key),
        Command::Plan { command } => match command {
            PlanCommand::Generate {
                title,
                episodes,
                cat_name,
                style,
                theme,
                auth,
            } => {
                let request = PlanRequest {
                    series_title: title,
                    num_episodes: episodes,
                    cat_name,
                    content_style: style,
                    theme,
                };
                cmd_plan_generate(&ctx, request, auth).await
            }
            PlanCommand::List => cmd_plan_list(&ctx),
            PlanCommand::Show { id, json } => cmd_plan_show(&ctx, &id, json),
            PlanCommand::Delete { id } => cmd_plan_delete(&ctx, &id),
            PlanCommand::Import => cmd_plan_import(&ctx).await,
        },
        Command::Script {
            command:
                ScriptCommand::Save {
                    plan,
                    episode,
                    file,
                },
        } => cmd_script_save(&ctx, &plan, episode, file),
        Command::Stage {
            plan,
            episode,
            stage,
            auth,
        } => cmd_stage(&ctx, &plan, episode, stage, auth).await,
        Command::Episode {
            plan,
            episode,
            auth,
        } => cmd_episode(&ctx, &plan, episode, auth).await,
        Command::RunAll { plan, auth } => cmd_run_all(&ctx, &plan, auth).await,
        Command::Pipeline {
            plan,
            episode,
            auth,
        } => cmd_pipeline(&ctx, &plan, episode, auth).await,
    }
}

// ============================================
// Status and keys
// ============================================

async fn cmd_status(ctx: &App) -> Result<()> {
    println!("Catshopper Configuration");
    println!("========================");
    println!();

    let provider = stored_provider(ctx);
    let key = ctx
        .db
        .get_preference(provider.key_preference())
        .context("failed to read stored API key")?;

    println!("Backend URL:     {}", ctx.config.api.base_url);
    println!("Provider:        {}", provider.display_name());
    println!(
        "API Key:         {}",
        key.as_deref().map(redact).unwrap_or_else(|| "<not set>".to_string())
    );
    println!("Script endpoint: {}", ctx.config.api.script_endpoint);
    println!("Store:           {}", Config::store_path().display());
    println!(
        "Logs:            {}",
        catshopper_core::logging::log_file_path().display()
    );
    println!(
        "Config file:     {}{}",
        Config::config_path().display(),
        if Config::config_path().exists() {
            ""
        } else {
            " (not found, using defaults)"
        }
    );
    println!();

    let state = if ctx.client.check_status().await {
        ConnectionState::Operational
    } else {
        ConnectionState::Disconnected
    };
    println!("Backend:         {}", state);

    Ok(())
}

fn cmd_key_set(ctx: &App, provider: ApiProvider, key: String) -> Result<()> {
    let creds = Credentials::new(provider, key.clone());
    creds.validate().context("invalid API key")?;

    ctx.db
        .set_preference(provider.key_preference(), &key)
        .context("failed to store API key")?;
    ctx.db
        .set_preference(PROVIDER_PREFERENCE, provider.as_str())
        .context("failed to store provider preference")?;

    println!(
        "Stored {} API key {}",
        provider.display_name(),
        redact(&key)
    );
    Ok(())
}

// ============================================
// Plans
// ============================================

async fn cmd_plan_generate(ctx: &App, request: PlanRequest, auth: AuthArgs) -> Result<()> {
    ensure_operational(ctx).await?;
    let creds = credentials(ctx, auth)?;
    let library = PlanLibrary::new(ctx.db.clone());

    println!(
        "Generating {} episode(s) of \"{}\"...",
        request.num_episodes, request.series_title
    );
    let plan = cancellable(
        &ctx.shutdown,
        library.generate(ctx.client.as_ref(), &request, creds.as_ref()),
    )
    .await
    .context("content plan generation failed")?;

    println!(
        "Saved plan {}: {} ({} episodes)",
        plan.storage_id(),
        plan.series_concept,
        plan.episodes.len()
    );
    Ok(())
}

fn cmd_plan_list(ctx: &App) -> Result<()> {
    let plans = PlanLibrary::new(ctx.db.clone())
        .list()
        .context("failed to load plans")?;

    if plans.is_empty() {
        println!("No saved content plans.");
        return Ok(());
    }

    println!(
        "{:<38} {:<17} {:>8} {:>8}  CONCEPT",
        "ID", "CREATED", "EPISODES", "SCRIPTED"
    );
    for plan in &plans {
        println!(
            "{:<38} {:<17} {:>8} {:>8}  {}",
            plan.storage_id(),
            plan.created_at
                .with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M"),
            plan.episodes.len(),
            plan.scripted_count(),
            truncate(&plan.series_concept, 60)
        );
    }
    Ok(())
}

fn cmd_plan_show(ctx: &App, id: &str, json: bool) -> Result<()> {
    let plan = load_plan(ctx, id)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    println!("{}", plan.series_concept);
    println!("{}", "=".repeat(plan.series_concept.chars().count().min(72)));
    println!();
    println!("ID:              {}", plan.storage_id());
    println!("Cat:             {}", plan.cat_name);
    println!("Style:           {}", plan.style_or_default());
    println!(
        "Created:         {}",
        plan.created_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M")
    );
    let personality = &plan.cat_personality;
    if !personality.traits.is_empty() {
        println!("Traits:          {}", personality.traits.join(", "));
    }
    if !personality.quirks.is_empty() {
        println!("Quirks:          {}", personality.quirks.join(", "));
    }
    if !personality.catchphrases.is_empty() {
        println!("Catchphrases:    {}", personality.catchphrases.join(" / "));
    }
    println!();

    for (index, episode) in plan.episodes.iter().enumerate() {
        let scripted = if episode.script.is_some() {
            "scripted"
        } else {
            "no script"
        };
        println!("[{}] {} ({})", index, episode.title, scripted);
        if !episode.premise.is_empty() {
            println!("    {}", episode.premise);
        }
        if !episode.setting.is_empty() {
            println!("    Setting: {}", episode.setting);
        }
        if !episode.items.is_empty() {
            println!("    Items:   {}", episode.items.join(", "));
        }
    }
    Ok(())
}

fn cmd_plan_delete(ctx: &App, id: &str) -> Result<()> {
    PlanLibrary::new(ctx.db.clone())
        .delete(id)
        .with_context(|| format!("failed to delete plan {}", id))?;
    println!("Deleted plan {}", id);
    Ok(())
}

async fn cmd_plan_import(ctx: &App) -> Result<()> {
    ensure_operational(ctx).await?;
    let summary = cancellable(
        &ctx.shutdown,
        PlanLibrary::new(ctx.db.clone()).import_remote(&ctx.client),
    )
    .await
    .context("failed to import remote plans")?;

    println!(
        "Imported {} plan(s), kept {} local copy(ies)",
        summary.imported, summary.skipped
    );
    Ok(())
}

// ============================================
// Scripts
// ============================================

fn cmd_script_save(
    ctx: &App,
    plan_id: &str,
    episode: usize,
    file: Option<PathBuf>,
) -> Result<()> {
    let text = match &file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("failed to read script from stdin")?;
            text
        }
    };

    let plan = load_plan(ctx, plan_id)?;
    let orchestrator = Orchestrator::load(
        plan,
        ctx.client.clone(),
        Stores::from_database(ctx.db.clone()),
        &ctx.config.pipeline,
    );
    let mut events = orchestrator.subscribe();

    orchestrator
        .save_script(episode, text)
        .with_context(|| format!("failed to save script for episode {}", episode))?;

    while let Ok(event) = events.try_recv() {
        if let PipelineEvent::PersistenceWarning { message } = event {
            eprintln!("warning: {}", message);
        }
    }
    println!("Saved script for episode {} of plan {}", episode, plan_id);
    Ok(())
}

// ============================================
// Generation
// ============================================

async fn cmd_stage(
    ctx: &App,
    plan_id: &str,
    episode: usize,
    stage: Stage,
    auth: AuthArgs,
) -> Result<()> {
    let orchestrator = open_orchestrator(ctx, plan_id, auth).await?;
    let view = progress::spawn(orchestrator.subscribe());

    let result = cancellable(&ctx.shutdown, async {
        orchestrator
            .generate_stage(episode, stage)
            .await
            .map(|()| orchestrator.artifacts(episode))
    })
    .await;

    drop(orchestrator);
    let _ = view.await;

    let artifacts = result
        .with_context(|| format!("{} failed for episode {}", stage.display_name(), episode))?;
    println!("Episode {} {}: done", episode, stage.display_name());

    if let Some(artifacts) = artifacts {
        match stage {
            Stage::Script => {
                if let Some(script) = &artifacts.script {
                    println!();
                    println!("{}", script);
                }
            }
            Stage::VisualPrompts => {
                for (i, scene) in artifacts
                    .visual_prompts
                    .iter()
                    .flat_map(|p| &p.scenes)
                    .enumerate()
                {
                    println!("  Scene {}: {}", i + 1, scene.description);
                }
            }
            Stage::Images | Stage::Voiceovers => {
                let outcome = if stage == Stage::Images {
                    &artifacts.images
                } else {
                    &artifacts.voiceovers
                };
                if let Some(path) = outcome.as_ref().and_then(|o| o.result_path.as_deref()) {
                    println!("  Output: {}", path);
                }
            }
            Stage::Video => {
                if let Some(video) = &artifacts.video {
                    println!("  Video: {}", video.path);
                }
            }
            Stage::SocialMedia => {
                if let Some(social) = &artifacts.social_media {
                    println!(
                        "  {} platform(s), {} content variation(s)",
                        social.platforms.len(),
                        social.content_variations.len()
                    );
                }
            }
        }
    }
    Ok(())
}

async fn cmd_episode(ctx: &App, plan_id: &str, episode: usize, auth: AuthArgs) -> Result<()> {
    let orchestrator = open_orchestrator(ctx, plan_id, auth).await?;
    let view = progress::spawn(orchestrator.subscribe());

    let result = cancellable(&ctx.shutdown, orchestrator.generate_all_stages(episode)).await;

    drop(orchestrator);
    let _ = view.await;

    let report = result.with_context(|| format!("episode {} could not be generated", episode))?;
    print_report(&report);

    let problems = report.failed() + report.skipped();
    if problems > 0 {
        bail!("{} stage(s) failed or were skipped", problems);
    }
    Ok(())
}

async fn cmd_run_all(ctx: &App, plan_id: &str, auth: AuthArgs) -> Result<()> {
    let orchestrator = open_orchestrator(ctx, plan_id, auth).await?;
    let view = progress::spawn(orchestrator.subscribe());

    let result = cancellable(&ctx.shutdown, async {
        Ok::<_, anyhow::Error>(orchestrator.generate_all_episodes().await)
    })
    .await;

    drop(orchestrator);
    let _ = view.await;

    let summary = result?;
    for report in &summary.reports {
        print_report(report);
    }
    println!();
    println!(
        "{} episode(s): {} stage(s) completed, {} failed or skipped",
        summary.total_episodes, summary.success_count, summary.failure_count
    );

    if summary.failure_count > 0 {
        bail!(
            "{} stage(s) failed or were skipped",
            summary.failure_count
        );
    }
    Ok(())
}

async fn cmd_pipeline(ctx: &App, plan_id: &str, episode: usize, auth: AuthArgs) -> Result<()> {
    let orchestrator = open_orchestrator(ctx, plan_id, auth).await?;
    let view = progress::spawn(orchestrator.subscribe());

    let result = cancellable(&ctx.shutdown, orchestrator.run_full_pipeline(episode)).await;

    drop(orchestrator);
    let _ = view.await;

    let outcome = result.with_context(|| format!("full pipeline failed for episode {}", episode))?;
    println!("Pipeline job {} completed", outcome.job_id);
    if let Some(path) = outcome.result_path {
        println!("  Output: {}", path);
    }
    Ok(())
}

fn print_report(report: &EpisodeReport) {
    println!("Episode {}", report.episode);
    for (stage, outcome) in &report.outcomes {
        let status = match outcome {
            StageOutcome::Completed => "done".to_string(),
            StageOutcome::Failed(msg) => format!("failed: {}", msg),
            StageOutcome::Skipped { missing } => {
                format!("skipped (needs {})", missing.display_name())
            }
        };
        println!("  {:<16} {}", stage.display_name(), status);
    }
}

// ============================================
// Helpers
// ============================================

fn load_plan(ctx: &App, id: &str) -> Result<ContentPlan> {
    PlanLibrary::new(ctx.db.clone())
        .get(id)
        .with_context(|| format!("failed to load plan {}", id))
}

/// Load a plan into an orchestrator after confirming the backend is up
async fn open_orchestrator(ctx: &App, plan_id: &str, auth: AuthArgs) -> Result<Orchestrator> {
    let plan = load_plan(ctx, plan_id)?;
    let creds = credentials(ctx, auth)?;

    let orchestrator = Orchestrator::load(
        plan,
        ctx.client.clone(),
        Stores::from_database(ctx.db.clone()),
        &ctx.config.pipeline,
    )
    .with_shutdown(ctx.shutdown.clone());
    orchestrator.set_credentials(creds)?;

    if orchestrator.probe_connection().await != ConnectionState::Operational {
        return Err(catshopper_core::Error::Connection(format!(
            "backend at {} is not operational",
            ctx.config.api.base_url
        ))
        .into());
    }
    Ok(orchestrator)
}

async fn ensure_operational(ctx: &App) -> Result<()> {
    if !ctx.client.check_status().await {
        return Err(catshopper_core::Error::Connection(format!(
            "backend at {} is not operational",
            ctx.config.api.base_url
        ))
        .into());
    }
    Ok(())
}

/// Explicit credentials from the command line, if any
fn credentials(ctx: &App, auth: AuthArgs) -> Result<Option<Credentials>> {
    let creds = match (auth.provider, auth.api_key) {
        (provider, Some(key)) => Some(Credentials::new(
            provider.unwrap_or_else(|| stored_provider(ctx)),
            key,
        )),
        (Some(provider), None) => {
            let stored = ctx
                .db
                .get_preference(provider.key_preference())
                .context("failed to read stored API key")?;
            Some(match stored {
                Some(key) => Credentials::new(provider, key),
                None => Credentials::provider_only(provider),
            })
        }
        (None, None) => None,
    };

    if let Some(creds) = &creds {
        creds.validate().context("invalid API key")?;
    }
    Ok(creds)
}

fn stored_provider(ctx: &App) -> ApiProvider {
    ctx.db
        .get_preference(PROVIDER_PREFERENCE)
        .ok()
        .flatten()
        .and_then(|p| p.parse().ok())
        .unwrap_or(ctx.config.api.provider)
}

/// Run `work` unless Ctrl-C arrives first
async fn cancellable<T, E>(
    shutdown: &CancellationToken,
    work: impl Future<Output = std::result::Result<T, E>>,
) -> Result<T>
where
    E: Into<anyhow::Error>,
{
    tokio::select! {
        result = work => result.map_err(Into::into),
        _ = shutdown.cancelled() => bail!("cancelled"),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}
