//! Command-line interface for meetvault.
//!
//! Provides commands for running the orchestrator, inspecting and retrying
//! work items, and moving tasks through their workflow.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use crate::config::{self, paths, Settings, StorageSettings};
use crate::core::Orchestrator;
use crate::domain::WorkItemState;
use crate::registry::{ProcessingRecord, Registry};

pub mod task;

/// meetvault - meeting recordings to transcripts, notes and tasks
#[derive(Parser, Debug)]
#[command(name = "meetvault")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Watch the input location and process meetings until interrupted
    Serve,

    /// Process what is currently in the input location
    Process {
        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,
    },

    /// Queue status summary and recent items
    Status,

    /// List work items
    Items {
        /// Only items in this state
        #[arg(short, long, value_enum)]
        state: Option<StateFilter>,
    },

    /// Show one work item and its history
    Show {
        /// Identity or unique prefix
        identity: String,
    },

    /// Re-queue a failed item
    Retry {
        /// Identity or unique prefix
        identity: String,
    },

    /// Task workflow commands
    Task {
        #[command(subcommand)]
        command: task::TaskCommands,
    },

    /// Show resolved configuration (debug)
    Config,
}

/// Work item state filter
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StateFilter {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl From<StateFilter> for WorkItemState {
    fn from(filter: StateFilter) -> Self {
        match filter {
            StateFilter::Queued => WorkItemState::Queued,
            StateFilter::Processing => WorkItemState::Processing,
            StateFilter::Completed => WorkItemState::Completed,
            StateFilter::Failed => WorkItemState::Failed,
        }
    }
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Serve => serve().await,
            Commands::Process { once } => process(once).await,
            Commands::Status => show_status().await,
            Commands::Items { state } => list_items(state.map(Into::into)).await,
            Commands::Show { identity } => show_item(&identity).await,
            Commands::Retry { identity } => retry_item(&identity).await,
            Commands::Task { command } => task::execute(command).await,
            Commands::Config => show_config(),
        }
    }
}

fn load() -> Result<Settings> {
    Ok(config::settings()?.clone())
}

/// Registry for read/maintenance commands; no instance lock needed
fn open_registry(settings: &Settings) -> Result<Registry> {
    let path = paths::registry_db(&settings.home);
    Registry::open(&path).with_context(|| format!("Failed to open registry {}", path.display()))
}

async fn serve() -> Result<()> {
    let orchestrator = Orchestrator::from_settings(load()?).await?;
    orchestrator.serve().await
}

async fn process(once: bool) -> Result<()> {
    let orchestrator = Orchestrator::from_settings(load()?).await?;
    if !once {
        return orchestrator.serve().await;
    }

    let report = orchestrator.run_once().await?;
    println!(
        "Cycle finished: {} queued, {} duplicates, {} retried",
        report.queued, report.duplicates, report.retried
    );
    println!(
        "Registry: {} completed, {} failed, {} queued",
        report.status.completed, report.status.failed, report.status.queued
    );
    Ok(())
}

async fn show_status() -> Result<()> {
    let settings = load()?;
    let registry = open_registry(&settings)?;
    let status = registry.status().await?;

    println!("══════════════════════════════════════════════════════════════");
    println!("meetvault Status");
    println!("══════════════════════════════════════════════════════════════");
    println!();
    println!("Mode:      {}", settings.storage.mode());
    println!("Registry:  {}", paths::registry_db(&settings.home).display());
    println!();
    println!("Items:");
    println!("  Queued:     {}", status.queued);
    println!("  Processing: {}", status.processing);
    println!("  Completed:  {}", status.completed);
    println!("  Failed:     {}", status.failed);
    println!("  Total:      {}", status.total());
    println!();

    if !status.recent.is_empty() {
        println!("Recent:");
        for record in &status.recent {
            println!(
                "  [{}] {} ({})",
                state_tag(record.item.state),
                record.item.name,
                record.item.identity.short()
            );
        }
    }
    Ok(())
}

fn state_tag(state: WorkItemState) -> &'static str {
    match state {
        WorkItemState::Discovered => "DISC",
        WorkItemState::Queued => "QUEU",
        WorkItemState::Processing => "PROC",
        WorkItemState::Completed => "DONE",
        WorkItemState::Failed => "FAIL",
    }
}

fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() > width {
        let cut: String = value.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", cut)
    } else {
        value.to_string()
    }
}

async fn list_items(state: Option<WorkItemState>) -> Result<()> {
    let registry = open_registry(&load()?)?;
    let records = registry.list(state).await?;

    if records.is_empty() {
        println!("No items found");
        return Ok(());
    }

    println!(
        "{:<14} {:<11} {:<8} {:<40}",
        "IDENTITY", "STATE", "ATTEMPTS", "NAME"
    );
    println!("{}", "-".repeat(76));
    for record in &records {
        println!(
            "{:<14} {:<11} {:<8} {:<40}",
            record.item.identity.short(),
            record.item.state.as_str(),
            record.item.attempt_count,
            truncate(&record.item.name, 40)
        );
    }
    println!("\nTotal: {} items", records.len());
    Ok(())
}

fn print_record(record: &ProcessingRecord) {
    let item = &record.item;
    println!("Identity:    {}", item.identity);
    println!("Name:        {}", item.name);
    println!("Location:    {}", item.location);
    println!("Fingerprint: {}", item.fingerprint);
    println!("Size:        {} bytes", item.size_bytes);
    println!("State:       {}", item.state);
    println!("Attempts:    {}", item.attempt_count);
    println!("Discovered:  {}", item.discovered_at);
    if let Some(at) = record.last_attempt_at {
        println!("Last try:    {}", at);
    }
    if let Some(at) = item.completed_at {
        println!("Completed:   {}", at);
    }
    if let Some(error) = &item.last_error {
        println!(
            "Last error:  [{}] {}",
            record.failed_stage.as_deref().unwrap_or("-"),
            error
        );
    }
}

async fn show_item(query: &str) -> Result<()> {
    let registry = open_registry(&load()?)?;
    let identity = registry.resolve_identity(query).await?;
    let record = registry
        .get(&identity)
        .await?
        .with_context(|| format!("Item not found: {}", identity))?;

    print_record(&record);

    let history = registry.history(&identity).await?;
    if !history.is_empty() {
        println!("\nHistory:");
        for event in history {
            let from = event
                .from
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string());
            match event.detail {
                Some(detail) => println!("  {}  {} → {}  {}", event.at, from, event.to, detail),
                None => println!("  {}  {} → {}", event.at, from, event.to),
            }
        }
    }
    Ok(())
}

async fn retry_item(query: &str) -> Result<()> {
    let registry = open_registry(&load()?)?;
    let identity = registry.resolve_identity(query).await?;
    registry
        .retry(&identity, "manual retry")
        .await
        .with_context(|| format!("Cannot retry {}", identity))?;

    println!("✓ Re-queued {}", identity);
    println!("  A running orchestrator picks it up on its next poll.");
    Ok(())
}

fn show_config() -> Result<()> {
    let cfg = config::settings()?;

    println!("══════════════════════════════════════════════════════════════");
    println!("meetvault Configuration");
    println!("══════════════════════════════════════════════════════════════");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!("Home:        {}", cfg.home.display());
    println!();

    match &cfg.storage {
        StorageSettings::Local(local) => {
            println!("Storage: local");
            println!("  Input:     {}", local.input_dir.display());
            println!("  Output:    {}", local.output_dir.display());
            println!("  Processed: {}", local.processed_dir.display());
        }
        StorageSettings::Cloud(cloud) => {
            println!("Storage: cloud");
            println!("  Input folder:     {}", cloud.input_folder_id);
            println!("  Output folder:    {}", cloud.output_folder_id);
            println!("  Processed folder: {}", cloud.processed_folder_id);
            println!("  Credentials:      {}", cloud.credentials_path.display());
            println!("  Token:            {}", cloud.token_path.display());
        }
    }
    println!();
    match &cfg.vault.remote_folder_id {
        Some(folder) => {
            println!("Vault: remote folder {}", folder);
            println!("  Task mirror: {}", cfg.task_root().display());
        }
        None => println!("Vault: {}", cfg.vault.local_path.display()),
    }
    println!();

    let orch = &cfg.orchestrator;
    println!("Orchestrator:");
    println!("  Workers:        {}", orch.worker_count);
    println!("  Queue capacity: {}", orch.queue_capacity);
    println!("  Poll interval:  {}s", orch.poll_interval.as_secs());
    println!("  Shutdown grace: {}s", orch.shutdown_grace.as_secs());
    println!(
        "  Auto retry:     {} attempts, {}s apart",
        orch.max_item_attempts,
        orch.retry_delay.as_secs()
    );
    println!();
    println!("Tools:");
    println!("  ffmpeg:  {}", cfg.tools.ffmpeg_path);
    println!("  whisper: {} (model {})", cfg.tools.whisper_path, cfg.tools.whisper_model);
    println!(
        "  fabric:  {} (patterns {}, {})",
        cfg.tools.fabric_path, cfg.tools.analysis_pattern, cfg.tools.entity_pattern
    );
    println!();
    println!("Safety limits:");
    println!("  Input patterns: {}", cfg.safety.input_patterns.join(", "));
    println!("  Stage timeout:  {}s", cfg.safety.stage_timeout_seconds);
    println!("  Max source:     {} bytes", cfg.safety.max_source_bytes);

    Ok(())
}
