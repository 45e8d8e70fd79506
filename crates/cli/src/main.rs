//! gitlocalize command-line tool.
//!
//! Provides subcommands for running sync cycles, inspecting the sync log
//! and resources, and generating / validating configuration files.

mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use gitlocalize_core::config::AppConfig;
use gitlocalize_core::db::{queries, Database};
use gitlocalize_core::models::SyncAction;
use gitlocalize_core::sync::{build_sync_manager, SyncEngine, SyncReport};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// gitlocalize command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "gitlocalize",
    version,
    about = "Sync CMS translation segments with a git repository of gettext files"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true, default_value = "./gitlocalize.toml")]
    config: PathBuf,

    /// Log filter (e.g. "info", "gitlocalize_core=debug"). Overrides RUST_LOG
    /// and `daemon.log_level`.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one sync cycle (pull translations, then push source content).
    Sync {
        /// Print the cycle report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Request a sync through the configured manager and wait until idle.
    Trigger,

    /// Show the sync watermark and pending work.
    Status,

    /// Show recent sync log entries.
    Log {
        /// Maximum number of entries to show.
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },

    /// List resources and their translated pages.
    Resources,

    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./gitlocalize.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let directive = log_directive(
        cli.log_level.as_deref(),
        std::env::var(EnvFilter::DEFAULT_ENV).ok(),
        &cli.config,
    );
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(directive))
        .with_target(false)
        .without_time()
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { output } => cmd_init(&output),
        Commands::Validate => cmd_validate(&cli.config),
        Commands::Sync { json } => {
            let (config, db) = load_workspace(&cli.config)?;
            cmd_sync(&config, db, json).await
        }
        Commands::Trigger => {
            let (config, db) = load_workspace(&cli.config)?;
            cmd_trigger(&config, db).await
        }
        Commands::Status => {
            let (config, db) = load_workspace(&cli.config)?;
            cmd_status(&config, &db)
        }
        Commands::Log { limit } => {
            let (_, db) = load_workspace(&cli.config)?;
            cmd_log(&db, limit)
        }
        Commands::Resources => {
            let (_, db) = load_workspace(&cli.config)?;
            cmd_resources(&db)
        }
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

/// Log filter: `--log-level`, then RUST_LOG, then `daemon.log_level` from the
/// config file, then "warn".
fn log_directive(flag: Option<&str>, env: Option<String>, config_path: &Path) -> String {
    if let Some(level) = flag {
        return level.to_string();
    }
    if let Some(level) = env.filter(|l| !l.is_empty()) {
        return level;
    }
    AppConfig::load_from_file(config_path)
        .map(|config| config.daemon.log_level)
        .unwrap_or_else(|_| "warn".to_string())
}

fn load_config(path: &Path) -> Result<AppConfig> {
    AppConfig::load_and_resolve(path).context("failed to load configuration file")
}

fn load_workspace(path: &Path) -> Result<(AppConfig, Arc<Database>)> {
    let config = load_config(path)?;
    let db = open_database(&config)?;
    debug!(
        config = %path.display(),
        database = %config.daemon.database_path().display(),
        "workspace loaded"
    );
    Ok((config, Arc::new(db)))
}

fn open_database(config: &AppConfig) -> Result<Database> {
    std::fs::create_dir_all(&config.daemon.data_dir).with_context(|| {
        format!(
            "failed to create data directory {}",
            config.daemon.data_dir.display()
        )
    })?;
    let db = Database::new(config.daemon.database_path()).context("failed to open database")?;
    db.initialize().context("failed to initialize database")?;
    db.ensure_languages(&config.sync.source_language, &config.sync.languages)
        .context("failed to register languages")?;
    Ok(db)
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_init(output: &Path) -> Result<()> {
    let default_config = r#"# gitlocalize configuration

[daemon]
# Default log filter; RUST_LOG and --log-level take precedence.
log_level = "warn"
data_dir = "/var/lib/gitlocalize"

[repository]
path = "/var/lib/gitlocalize/repo"
url = "https://github.com/owner/translations.git"
remote = "origin"
branch = "main"
token_env = "GITLOCALIZE_TOKEN"
author_name = "gitlocalize"
author_email = "gitlocalize@example.com"

[sync]
# "immediate" runs syncs inline; "background" queues them for a worker.
manager = "immediate"
source_language = "en"
languages = ["de", "fr"]
wrap_width = 200
commit_message = "Updates to source content"
templates_dir = "templates"
locales_dir = "locales"
config_file = "l10n.toml"
"#;

    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, default_config).context("failed to write config file")?;

    println!("Default configuration written to {}", output.display());
    println!();
    println!("Next steps:");
    println!("  1. Edit the repository URL, path and target languages");
    println!("  2. Export the token variable (GITLOCALIZE_TOKEN) if the remote needs one");
    println!(
        "  3. Validate with: gitlocalize validate --config {}",
        output.display()
    );
    println!("  4. Sync with: gitlocalize sync --config {}", output.display());

    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    config
        .resolve_env_vars()
        .context("failed to resolve environment variables")?;
    println!("  [OK] Environment variable references processed");

    match config.validate() {
        Ok(()) => println!("  [OK] All required fields are valid"),
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    }

    println!();
    println!("Configuration summary:");
    println!("  Repository    : {}", config.repository.path.display());
    println!(
        "  Remote        : {} ({})",
        config.repository.remote,
        config.repository.url.as_deref().unwrap_or("existing clone")
    );
    println!("  Branch        : {}", config.repository.branch);
    println!(
        "  Token         : {}",
        if config.repository.token.is_some() {
            "set"
        } else {
            "not set"
        }
    );
    println!("  Source lang   : {}", config.sync.source_language);
    println!("  Target langs  : {}", config.sync.languages.join(", "));
    println!("  Manager       : {:?}", config.sync.manager);
    println!("  Data directory: {}", config.daemon.data_dir.display());
    println!();
    println!("Configuration is valid.");

    Ok(())
}

async fn cmd_sync(config: &AppConfig, db: Arc<Database>, json: bool) -> Result<()> {
    let engine = SyncEngine::from_config(config, db).context("failed to set up sync engine")?;

    if !json {
        println!("Running sync cycle...");
        println!();
    }

    let report = tokio::task::spawn_blocking(move || engine.sync())
        .await
        .context("sync task failed")?
        .context("sync cycle failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

async fn cmd_trigger(config: &AppConfig, db: Arc<Database>) -> Result<()> {
    let engine = Arc::new(
        SyncEngine::from_config(config, db.clone()).context("failed to set up sync engine")?,
    );
    let manager = build_sync_manager(config.sync.manager, engine)
        .context("failed to start sync manager")?;

    tokio::task::block_in_place(|| manager.trigger()).context("sync trigger failed")?;
    if manager.is_queued() || manager.is_running() {
        println!("Sync queued, waiting for the worker...");
    }
    while manager.is_queued() || manager.is_running() {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    match db.list_sync_logs(1).context("failed to read sync log")?.first() {
        Some(entry) => println!(
            "{}",
            style::success(&format!(
                "Sync finished; last entry {} {} at {}",
                entry.id, entry.action, entry.created_at
            ))
        ),
        None => println!("{}", style::warn("Sync finished without a log entry")),
    }
    Ok(())
}

fn print_report(report: &SyncReport) {
    let pull = &report.pull;
    let push = &report.push;

    println!("{}", style::header("Pull (repository → CMS)"));
    if pull.up_to_date {
        println!("  Already up to date at {}", short_sha(&pull.head_commit_id));
    } else {
        println!(
            "  Commits       : {} → {}",
            pull.previous_commit_id
                .as_deref()
                .map(short_sha)
                .unwrap_or("start"),
            short_sha(&pull.head_commit_id)
        );
        println!("  Files imported: {}", pull.files_imported);
        if pull.files_skipped > 0 {
            println!(
                "  {}",
                style::warn(&format!("Files skipped : {}", pull.files_skipped))
            );
        }
        println!(
            "  Translations  : {} created, {} updated, {} cleared, {} unchanged",
            pull.translations_created,
            pull.translations_updated,
            pull.translations_cleared,
            pull.translations_unchanged
        );
        if pull.unknown_segments > 0 {
            println!("  Unknown msgids: {}", pull.unknown_segments);
        }
        println!(
            "  Pages         : {} created, {} updated, {} waiting on parent",
            pull.propagation.pages_created,
            pull.propagation.pages_updated,
            pull.propagation.pages_blocked
        );
    }

    println!();
    println!("{}", style::header("Push (CMS → repository)"));
    match push.log_id {
        None => println!("  No new submissions"),
        Some(_) => {
            println!("  Submissions   : {}", push.submissions_pushed);
            println!(
                "  Files written : {} for {} resource(s)",
                push.files_written, push.resources_written
            );
            println!(
                "  Commit        : {}",
                push.commit_id.as_deref().map(short_sha).unwrap_or("none (tree unchanged)")
            );
        }
    }

    println!();
    println!("  {}", style::dim(&format!("Started at : {}", report.started_at)));
    println!("  {}", style::dim(&format!("Completed  : {}", report.completed_at)));
}

fn cmd_status(config: &AppConfig, db: &Database) -> Result<()> {
    let watermark = db
        .last_synced_commit_id()
        .context("failed to read sync watermark")?;
    let pulls = db
        .count_sync_logs(SyncAction::Pull)
        .context("failed to count pulls")?;
    let pushes = db
        .count_sync_logs(SyncAction::Push)
        .context("failed to count pushes")?;
    let submissions = db
        .list_current_submissions()
        .context("failed to list submissions")?;
    let pending = submissions.iter().filter(|(s, _)| !s.is_pushed()).count();
    let resources = db.list_resources().context("failed to list resources")?;
    let last = db.list_sync_logs(1).context("failed to read sync log")?;

    println!("{}", style::header("gitlocalize Status"));
    println!();
    println!("  Repository       : {}", config.repository.path.display());
    println!(
        "  Languages        : {} → {}",
        config.sync.source_language,
        config.sync.languages.join(", ")
    );
    println!(
        "  Last synced commit: {}",
        watermark.as_deref().unwrap_or("never")
    );
    println!(
        "  Last sync at     : {}",
        last.first().map(|e| e.created_at.as_str()).unwrap_or("never")
    );
    println!("  Pulls / pushes   : {} / {}", pulls, pushes);
    println!("  Resources        : {}", resources.len());
    println!(
        "  Pending submissions: {} of {}",
        pending,
        submissions.len()
    );

    Ok(())
}

fn cmd_log(db: &Database, limit: u32) -> Result<()> {
    let entries = db.list_sync_logs(limit).context("failed to list sync log")?;

    if entries.is_empty() {
        println!("No sync log entries found.");
        return Ok(());
    }

    println!();
    println!("{}", style::header("Sync Log"));
    println!();

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["ID", "Direction", "Commit", "Resources", "At"]);

    for entry in &entries {
        let resources = db
            .list_sync_log_resources(entry.id)
            .context("failed to list sync log resources")?;
        let commit = if entry.commit_id.is_empty() {
            Cell::new("-").fg(comfy_table::Color::DarkGrey)
        } else {
            Cell::new(short_sha(&entry.commit_id))
        };
        table.add_row(vec![
            Cell::new(entry.id),
            Cell::new(style::action(entry.action.as_str())),
            commit,
            Cell::new(resources.len()),
            Cell::new(&entry.created_at),
        ]);
    }

    println!("{}", table);
    println!();
    println!("{} entries shown", entries.len());

    Ok(())
}

fn cmd_resources(db: &Database) -> Result<()> {
    let resources = db.list_resources().context("failed to list resources")?;
    if resources.is_empty() {
        println!("No resources registered.");
        return Ok(());
    }
    let languages = queries::list_target_languages(&db.conn())
        .context("failed to list languages")?;

    let mut header = vec!["Path".to_string(), "Revision".to_string(), "Parent".to_string()];
    header.extend(languages.iter().map(|l| l.code.clone()));

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(header);

    for resource in &resources {
        let parent = resource
            .parent_id
            .and_then(|id| resources.iter().find(|r| r.id == id))
            .map(|r| r.path.as_str())
            .unwrap_or("-");
        let mut row = vec![
            Cell::new(&resource.path),
            Cell::new(
                resource
                    .current_revision_id
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ),
            Cell::new(parent),
        ];
        for language in &languages {
            let page = db
                .get_translated_page(resource.id, &language.code)
                .context("failed to read translated page")?;
            row.push(match page {
                Some(_) => Cell::new("✓").fg(comfy_table::Color::Green),
                None => Cell::new("·").fg(comfy_table::Color::DarkGrey),
            });
        }
        table.add_row(row);
    }

    println!("{}", table);
    Ok(())
}

// ---------------------------------------------------------------------------
// Utilities
// ---------------------------------------------------------------------------

fn short_sha(sha: &str) -> &str {
    if sha.is_empty() {
        "none"
    } else {
        &sha[..sha.len().min(10)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_directive_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("gitlocalize.toml");
        std::fs::write(
            &config,
            "[daemon]\nlog_level = \"debug\"\n\n[repository]\npath = \"/tmp/repo\"\n",
        )
        .unwrap();

        assert_eq!(
            log_directive(Some("trace"), Some("info".into()), &config),
            "trace"
        );
        assert_eq!(log_directive(None, Some("info".into()), &config), "info");
        assert_eq!(log_directive(None, None, &config), "debug");
        assert_eq!(log_directive(None, Some(String::new()), &config), "debug");
        assert_eq!(
            log_directive(None, None, &dir.path().join("missing.toml")),
            "warn"
        );
    }
}
