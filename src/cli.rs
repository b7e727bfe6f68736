use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::json;

use sheba_cache::firestore::FirestoreCatalog;
use sheba_cache::llm::{AnthropicClient, LlmClient};
use sheba_cache::model::now_millis;
use sheba_cache::{
    Connectivity, EscalationOutcome, LocalStore, RefreshOutcome, RemoteCatalog, RetryPolicy,
    SearchWaterfall, ServiceDetail, ServiceSummary, SyncCoordinator, resolve_db_path,
};

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

#[derive(Parser)]
#[command(name = "sheba", about = "Sheba: offline catalog of citizen services")]
struct Cli {
    /// Output machine-readable JSON (default: human-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Never touch the network
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Pull the remote catalog if it is newer than the local one
    Refresh {
        /// Retry failed refreshes with backoff
        #[arg(long)]
        retry: bool,
    },
    /// Search local services, escalating remotely when nothing matches
    Search {
        /// Free-text query (positional, collects remaining args)
        query: Vec<String>,
        /// Wait for remote or generated results when nothing matches locally
        #[arg(long)]
        wait: bool,
    },
    /// Show one service with its detail and record the view
    Show { id: String },
    /// List cached services
    Browse {
        #[arg(long)]
        category: Option<String>,
    },
    /// List cached categories
    Categories,
    /// Manage bookmarked services
    Favorite {
        #[command(subcommand)]
        action: FavoriteAction,
    },
    /// Recently viewed services
    History {
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Delete history older than the given number of days
    Prune {
        #[arg(long)]
        days: u32,
    },
    /// Push a local service (e.g. a generated one) to the remote catalog
    Publish { id: String },
    /// Drop every cached service and the applied catalog version
    Clear,
}

#[derive(Subcommand)]
enum FavoriteAction {
    Add { id: String },
    Remove { id: String },
    List,
}

// ============================================================================
// Output Formatting
// ============================================================================

/// One line per service with both title variants.
fn format_service(service: &ServiceSummary) {
    if service.title.en == service.title.bn {
        println!("{}  {} [{}]", service.id, service.title.en, service.category);
    } else {
        println!(
            "{}  {} / {} [{}]",
            service.id, service.title.en, service.title.bn, service.category
        );
    }
}

fn format_services(services: &[ServiceSummary]) {
    for service in services {
        format_service(service);
    }
}

fn format_detail(service: &ServiceSummary, detail: Option<&ServiceDetail>) {
    println!("{} ({})", service.title.en, service.id);
    if service.title.bn != service.title.en {
        println!("{}", service.title.bn);
    }
    if !service.subtitle.en.is_empty() {
        println!("  {}", service.subtitle.en);
    }

    let Some(detail) = detail else {
        println!();
        println!("No details available.");
        return;
    };

    let sections = [
        ("Instructions", &detail.instructions),
        ("Required documents", &detail.required_documents),
        ("Processing time", &detail.processing_time),
        ("Contact", &detail.contact_info),
    ];
    for (heading, text) in sections {
        if text.en.trim().is_empty() {
            continue;
        }
        println!();
        println!("{heading}:");
        for line in text.en.lines() {
            println!("  {line}");
        }
    }
    if let Some(link) = &detail.youtube_link {
        println!();
        println!("Video: {link}");
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let store = LocalStore::open(&resolve_db_path())?;
    let connectivity = Connectivity::new(!cli.offline);

    match cli.command {
        Command::Refresh { retry } => {
            let coordinator = SyncCoordinator::new(store, require_remote()?, connectivity);
            let result = if retry {
                coordinator.spawn_refresh(RetryPolicy::default()).await?
            } else {
                coordinator.refresh().await
            };
            let outcome = result.map_err(|e| format!("Refresh failed, try later: {e}"))?;

            if cli.json {
                let output = match outcome {
                    RefreshOutcome::UpToDate { version } => {
                        json!({ "status": "up_to_date", "version": version })
                    }
                    RefreshOutcome::Refreshed {
                        from,
                        to,
                        services,
                        details,
                    } => json!({
                        "status": "refreshed",
                        "from": from,
                        "to": to,
                        "services": services,
                        "details": details,
                    }),
                };
                print_json(&output)?;
            } else {
                match outcome {
                    RefreshOutcome::UpToDate { version } => {
                        println!("Catalog is up to date (version {version}).")
                    }
                    RefreshOutcome::Refreshed {
                        to,
                        services,
                        details,
                        ..
                    } => println!(
                        "Updated catalog to version {to}: {services} services, {details} details."
                    ),
                }
            }
        }
        Command::Search { query, wait } => {
            let query = query.join(" ");
            if query.trim().is_empty() {
                eprintln!("Error: No query provided.");
                std::process::exit(1);
            }

            let results = if wait {
                search_with_escalation(store, connectivity, &query).await?
            } else {
                let local = store.search_once(&query)?;
                if local.is_empty() {
                    eprintln!("No local matches. Rerun with --wait to search further.");
                }
                local
            };

            if cli.json {
                print_json(&results)?;
            } else if results.is_empty() {
                eprintln!("No services found.");
            } else {
                format_services(&results);
            }
        }
        Command::Show { id } => {
            let Some(service) = store.get_service(&id)? else {
                eprintln!("No service found with id '{id}'.");
                std::process::exit(1);
            };
            let detail = match optional_remote() {
                Some(remote) => {
                    SyncCoordinator::new(store.clone(), remote, connectivity)
                        .ensure_detail(&id)
                        .await?
                }
                None => store.get_detail(&id)?,
            };
            store.record_view(&id)?;

            if cli.json {
                print_json(&json!({
                    "service": service,
                    "detail": detail,
                    "favorite": store.is_favorite(&id)?,
                }))?;
            } else {
                format_detail(&service, detail.as_ref());
            }
        }
        Command::Browse { category } => {
            let services = match &category {
                Some(category) => store.services_in_category_once(category)?,
                None => store.services_once()?,
            };
            if cli.json {
                print_json(&services)?;
            } else if services.is_empty() {
                eprintln!("No cached services. Run `sheba refresh` first.");
            } else {
                format_services(&services);
            }
        }
        Command::Categories => {
            let categories = store.categories()?;
            if cli.json {
                print_json(&categories)?;
            } else if categories.is_empty() {
                eprintln!("No categories found.");
            } else {
                for category in &categories {
                    println!("{category}");
                }
            }
        }
        Command::Favorite { action } => match action {
            FavoriteAction::Add { id } => {
                let added = store.add_favorite(&id);
                if cli.json {
                    print_json(&json!({ "id": id, "added": added }))?;
                } else if added {
                    println!("Added '{id}' to favorites.");
                } else {
                    eprintln!("Could not add '{id}': unknown service or already a favorite.");
                }
            }
            FavoriteAction::Remove { id } => {
                let removed = store.remove_favorite(&id);
                if cli.json {
                    print_json(&json!({ "id": id, "removed": removed }))?;
                } else if removed {
                    println!("Removed '{id}' from favorites.");
                } else {
                    eprintln!("'{id}' is not a favorite.");
                }
            }
            FavoriteAction::List => {
                let favorites = store.favorites_once()?;
                if cli.json {
                    print_json(&favorites)?;
                } else if favorites.is_empty() {
                    eprintln!("No favorites yet.");
                } else {
                    format_services(&favorites);
                }
            }
        },
        Command::History { limit } => {
            let entries = store.recent_history_once(limit)?;
            if cli.json {
                print_json(&entries)?;
            } else if entries.is_empty() {
                eprintln!("No history.");
            } else {
                for entry in &entries {
                    let title = store
                        .get_service(&entry.service_id)?
                        .map(|s| s.title.en)
                        .unwrap_or_default();
                    let when = chrono::DateTime::from_timestamp_millis(entry.accessed_at)
                        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_else(|| entry.accessed_at.to_string());
                    println!("{when}  {}  {title}", entry.service_id);
                }
            }
        }
        Command::Prune { days } => {
            let cutoff = now_millis() - i64::from(days) * MILLIS_PER_DAY;
            let removed = store.prune_history(cutoff)?;
            if cli.json {
                print_json(&json!({ "removed": removed, "cutoff": cutoff }))?;
            } else {
                println!("Removed {removed} history entries older than {days} days.");
            }
        }
        Command::Publish { id } => {
            SyncCoordinator::new(store, require_remote()?, connectivity)
                .publish(&id)
                .await
                .map_err(|e| format!("Publish failed: {e}"))?;
            if cli.json {
                print_json(&json!({ "id": id, "published": true }))?;
            } else {
                println!("Published '{id}'.");
            }
        }
        Command::Clear => {
            let removed = store.clear_catalog()?;
            if cli.json {
                print_json(&json!({ "removed": removed }))?;
            } else {
                println!("Cleared {removed} cached services.");
            }
        }
    }

    Ok(())
}

/// Create the remote catalog client from environment, or error if not
/// configured.
fn require_remote() -> Result<Arc<dyn RemoteCatalog>, String> {
    let catalog = FirestoreCatalog::from_env()
        .map_err(|e| format!("{e}. Set SHEBA_FIREBASE_PROJECT to reach the remote catalog."))?;
    Ok(Arc::new(catalog))
}

/// Run the full waterfall for `query` and wait for any escalation.
async fn search_with_escalation(
    store: LocalStore,
    connectivity: Connectivity,
    query: &str,
) -> Result<Vec<ServiceSummary>, Box<dyn std::error::Error>> {
    let waterfall = match (optional_remote(), optional_llm()) {
        (None, None) => return Ok(store.search_once(query)?),
        (Some(remote), llm) => {
            let waterfall = SearchWaterfall::new(store, remote, connectivity);
            match llm {
                Some(llm) => waterfall.with_generator(llm),
                None => waterfall,
            }
        }
        (None, Some(llm)) => {
            SearchWaterfall::without_remote(store, connectivity).with_generator(llm)
        }
    };

    let outcome = waterfall.search(query)?;
    let Some(escalation) = outcome.escalation else {
        return Ok(outcome.local);
    };
    Ok(match escalation.finish().await {
        EscalationOutcome::Remote(found) => {
            eprintln!("Found {} service(s) remotely.", found.len());
            found
        }
        EscalationOutcome::Generated(service) => {
            eprintln!("Generated a new entry; it is stored locally only.");
            vec![service]
        }
        EscalationOutcome::Nothing => Vec::new(),
    })
}

fn optional_remote() -> Option<Arc<dyn RemoteCatalog>> {
    match FirestoreCatalog::from_env() {
        Ok(catalog) => Some(Arc::new(catalog)),
        Err(e) => {
            tracing::debug!("Remote catalog disabled: {e}");
            None
        }
    }
}

fn optional_llm() -> Option<Arc<dyn LlmClient>> {
    match AnthropicClient::from_env() {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            tracing::debug!("Generative fallback disabled: {e}");
            None
        }
    }
}
