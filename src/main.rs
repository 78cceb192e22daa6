use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;

use podcrawl::config::Config;
use podcrawl::feed::{build_client, FeedRefresher, RefreshReport};
use podcrawl::storage::{Database, DatabaseError};
use podcrawl::util::validate_feed_url;

/// Get the config directory path (~/.config/podcrawl/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("podcrawl"))
}

#[derive(Parser, Debug)]
#[command(name = "podcrawl", version, about = "Podcast feed crawler with adaptive refresh scheduling")]
struct Args {
    /// Config file (default: ~/.config/podcrawl/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Start tracking a feed URL
    #[arg(long, value_name = "URL")]
    add_feed: Option<String>,

    /// Add a category to the taxonomy
    #[arg(long, value_name = "NAME")]
    add_category: Option<String>,

    /// Parent category for --add-category
    #[arg(long, value_name = "NAME", requires = "add_category")]
    parent: Option<String>,

    /// Mark a podcast as promoted (checked at least hourly)
    #[arg(long, value_name = "PODCAST_ID")]
    promote: Option<i64>,

    /// Refresh a single podcast and exit
    #[arg(long, value_name = "PODCAST_ID", conflicts_with = "watch")]
    refresh_one: Option<i64>,

    /// Podcasts per refresh cycle (overrides batch_limit)
    #[arg(long, value_name = "N")]
    limit: Option<i64>,

    /// Keep running cycles until interrupted
    #[arg(long)]
    watch: bool,

    /// Print one JSON object per refreshed podcast
    #[arg(long)]
    json: bool,
}

impl Args {
    fn has_admin_action(&self) -> bool {
        self.add_feed.is_some() || self.add_category.is_some() || self.promote.is_some()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
    }

    // SEC-007: user-only access to the config directory
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) =
            std::fs::set_permissions(&config_dir, std::fs::Permissions::from_mode(0o700))
        {
            tracing::warn!(
                path = %config_dir.display(),
                error = %e,
                "Failed to set config directory permissions to 0700"
            );
        }
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = config.database_path(&config_dir);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: the podcast database is in use by another process.");
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    run_admin_actions(&args, &db).await?;
    if args.has_admin_action() && args.refresh_one.is_none() && !args.watch {
        return Ok(());
    }

    let settings = config.refresh_settings();
    let client = build_client(&settings.http).context("Failed to build HTTP client")?;
    let refresher = FeedRefresher::new(db, client, settings);

    if let Some(podcast_id) = args.refresh_one {
        let summary = refresher
            .refresh(podcast_id)
            .await
            .with_context(|| format!("Failed to refresh podcast {podcast_id}"))?;
        if args.json {
            println!("{}", serde_json::to_string(&summary)?);
        } else {
            println!(
                "{podcast_id}\t{}\tactive={}\terrors={}",
                summary.outcome, summary.active, summary.errors
            );
        }
        return Ok(());
    }

    let limit = args.limit.unwrap_or(config.batch_limit).max(1);
    let interval = config.cycle_interval(args.watch);

    loop {
        // Pick up taxonomy edits made since the previous cycle
        refresher.category_cache().invalidate().await;

        let reports = refresher
            .refresh_due(limit)
            .await
            .context("Refresh cycle failed")?;
        print_reports(&reports, args.json)?;

        let Some(pause) = interval else {
            break;
        };

        tracing::info!(minutes = pause.as_secs() / 60, "Waiting for next cycle");
        tokio::select! {
            _ = tokio::time::sleep(pause) => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, stopping");
                break;
            }
        }
    }

    Ok(())
}

async fn run_admin_actions(args: &Args, db: &Database) -> Result<()> {
    if let Some(raw) = &args.add_feed {
        let url = validate_feed_url(raw).with_context(|| format!("Refusing feed URL '{raw}'"))?;
        match db.get_podcast_by_rss(url.as_str()).await? {
            Some(existing) => println!("Already tracking podcast {}: {url}", existing.id),
            None => {
                let id = db
                    .insert_podcast(url.as_str(), Utc::now().timestamp())
                    .await
                    .context("Failed to add feed")?;
                println!("Tracking podcast {id}: {url}");
            }
        }
    }

    if let Some(name) = &args.add_category {
        let parent_id = match &args.parent {
            Some(parent) => Some(
                db.get_category_by_name(parent)
                    .await?
                    .with_context(|| format!("Parent category '{parent}' does not exist"))?
                    .id,
            ),
            None => None,
        };
        let id = db
            .create_category(name, parent_id)
            .await
            .with_context(|| format!("Failed to create category '{name}'"))?;
        println!("Created category {id}: {name}");
    }

    if let Some(podcast_id) = args.promote {
        if !db.set_podcast_promoted(podcast_id, true).await? {
            anyhow::bail!("Podcast {podcast_id} does not exist");
        }
        println!("Promoted podcast {podcast_id}");
    }

    Ok(())
}

fn print_reports(reports: &[RefreshReport], json: bool) -> Result<()> {
    if json {
        for report in reports {
            println!("{}", serde_json::to_string(report)?);
        }
        return Ok(());
    }

    for report in reports {
        match (&report.summary, &report.error) {
            (Some(summary), _) => println!(
                "{}\t{}\t{}",
                report.podcast_id, summary.outcome, report.rss
            ),
            (None, Some(error)) => {
                println!("{}\terror\t{}\t{}", report.podcast_id, report.rss, error)
            }
            (None, None) => {}
        }
    }
    println!("Refreshed {} podcasts", reports.len());
    Ok(())
}
