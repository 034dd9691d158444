use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use news_server_sync::config;
use news_server_sync::db;
use news_server_sync::remote::NewsServerClient;
use news_server_sync::{NewsDataRepository, PageHierarchyCache, SettingsRepository, SyncOutcome};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Sync app settings when missing or stale
    Sync {
        /// Sync even if the local copy is up to date
        #[arg(long)]
        force: bool,
    },
    /// Show the state of the local settings cache
    Status,
    /// List top-level pages with their content-bearing child pages
    Pages {
        /// Only this newspaper (default: all)
        #[arg(long)]
        newspaper: Option<String>,
    },
    /// Fetch articles of a page
    Articles {
        #[arg(long)]
        page: String,
        /// Fetch articles following this article id
        #[arg(long)]
        after: Option<String>,
        #[arg(long)]
        count: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let client = Arc::new(NewsServerClient::from_config(&cfg)?);
    let settings = SettingsRepository::new(pool, client.clone());

    match args.command {
        Command::Sync { force } => {
            if force {
                settings.load_app_settings().await?;
                info!("forced settings sync complete");
            } else {
                match settings.ensure_settings_loaded().await? {
                    SyncOutcome::Synced => info!("settings synced"),
                    SyncOutcome::UpToDate => info!("settings already up to date"),
                }
            }
        }
        Command::Status => {
            let counts = db::settings_counts(settings.pool()).await?;
            println!("languages:   {}", counts.languages);
            println!("countries:   {}", counts.countries);
            println!("newspapers:  {}", counts.newspapers);
            println!("pages:       {}", counts.pages);
            println!("page groups: {}", counts.page_groups);
            println!("data loaded: {}", counts.all_present());
            println!(
                "last sync:   {}",
                settings.local_settings_update_time().await?
            );
            match settings.is_app_settings_updated().await {
                Ok(updated) => println!("stale:       {}", updated),
                Err(err) => warn!(?err, "could not reach news server"),
            }
        }
        Command::Pages { newspaper } => {
            settings.ensure_settings_loaded().await?;
            let newspapers = settings
                .newspapers()
                .await?
                .into_iter()
                .filter(|n| newspaper.as_deref().map_or(true, |id| n.id == id))
                .collect::<Vec<_>>();
            if newspapers.is_empty() {
                return Err(anyhow!("no matching newspaper in local settings"));
            }

            let cache = PageHierarchyCache::new(Arc::new(settings.clone()))
                .with_resolve_timeout(cfg.hierarchy.resolve_timeout());
            for np in &newspapers {
                let top_pages = settings.top_pages_for_newspaper(np).await?;
                info!(newspaper = %np.id, top_pages = top_pages.len(), "loaded top pages");
                cache.on_top_level_list_changed(&top_pages);

                println!("{} ({})", np.name.as_deref().unwrap_or(&np.id), np.id);
                let resolved =
                    futures::future::join_all(top_pages.iter().map(|p| cache.resolve(p))).await;
                for (top, children) in top_pages.iter().zip(resolved) {
                    match children {
                        Ok(children) => {
                            let names: Vec<&str> =
                                children.iter().map(|p| p.display_name()).collect();
                            println!("  {} [{}]: {}", top.display_name(), top.id, names.join(", "));
                        }
                        Err(err) => println!("  {} [{}]: <{}>", top.display_name(), top.id, err),
                    }
                }
            }
        }
        Command::Articles { page, after, count } => {
            settings.ensure_settings_loaded().await?;
            let page = settings
                .page_by_id(&page)
                .await?
                .with_context(|| format!("page {} not found in local settings", page))?;
            let news = NewsDataRepository::with_request_size(client, cfg.articles.request_size);
            let articles = match after {
                Some(last_id) => news.articles_after_last_id(&page, &last_id, count).await?,
                None => news.latest_articles_by_page(&page, count).await?,
            };
            for article in articles {
                let published = article
                    .publication_time
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default();
                println!(
                    "{}\t{}\t{}",
                    article.id,
                    published,
                    article.title.as_deref().unwrap_or("")
                );
            }
        }
    }

    Ok(())
}
