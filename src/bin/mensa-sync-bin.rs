use mensa_sync::config::{EthConfig, SyncConfig, UzhConfig};
use mensa_sync::constants::{DEFAULT_DB, ETH_API_URL, ETH_CLIENT_ID, UZH_API_URL, UZH_ORGANISATION};
use mensa_sync::data_types::{Destination, Language};
use mensa_sync::shared_main::{build_coordinator, logger_init};
use mensa_sync::sync_coordinator::SyncCoordinator;
use mensa_sync::task_scheduler_funcs::start_refresh_jobs;

use chrono::Local;
use clap::Parser;
use log::log_enabled;
use std::{path::PathBuf, sync::Arc, time::Instant};
use tokio_cron_scheduler::JobScheduler;

/// Keeps a local cache of ETH and UZH mensa menus up to date.
/// {n}Prints the cached menus after refreshing.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// SQLite cache file
    #[arg(long, env = "MENSA_DB", default_value = DEFAULT_DB)]
    db: PathBuf,
    #[arg(long, env = "ETH_API_URL", default_value = ETH_API_URL)]
    eth_url: String,
    #[arg(long, env = "ETH_CLIENT_ID", default_value = ETH_CLIENT_ID)]
    eth_client_id: String,
    #[arg(long, env = "ETH_SEED", default_value = "assets/eth_mensas.json")]
    eth_seed: PathBuf,
    #[arg(long, env = "UZH_API_URL", default_value = UZH_API_URL)]
    uzh_url: String,
    /// API key for the UZH menu GraphQL endpoint
    #[arg(long, env = "UZH_API_KEY")]
    uzh_api_key: Option<String>,
    #[arg(long, env = "UZH_SEED", default_value = "assets/uzh_mensas.json")]
    uzh_seed: PathBuf,
    /// Menu language{n}[de, en]
    #[arg(short, long, default_value = "de")]
    lang: Language,
    /// Time window{n}[today, tomorrow, this_week, next_week]
    #[arg(short, long, default_value = "today")]
    destination: Destination,
    /// Fetch even if the cache is fresh
    #[arg(short, long)]
    force: bool,
    /// Keep running and refresh periodically
    #[arg(short, long)]
    watch: bool,
    /// Enable verbose logging (mostly performance metrics){n}[SETS env: RUST_LOG=debug]
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }

    logger_init(module_path!());
    log::info!("Starting mensa-sync...");

    if !(log_enabled!(log::Level::Debug) || log_enabled!(log::Level::Trace)) {
        log::info!("Enable verbose logging for performance metrics");
    }

    let config = SyncConfig {
        db_path: args.db,
        eth: EthConfig {
            api_url: args.eth_url,
            client_id: args.eth_client_id,
            seed_path: args.eth_seed,
        },
        uzh: UzhConfig {
            api_url: args.uzh_url,
            api_key: args.uzh_api_key,
            organisation: UZH_ORGANISATION.to_string(),
            seed_path: args.uzh_seed,
        },
        ..SyncConfig::default()
    };
    let coordinator = build_coordinator(&config)?;

    coordinator.delete_expired().await?;

    let now = Instant::now();
    let fetched = if args.force {
        coordinator.force_refresh(args.destination, args.lang).await
    } else {
        coordinator.refresh_if_needed(args.destination, args.lang).await
    };
    log::info!("Refresh: {:?} fetched in {:.2?}", fetched, now.elapsed());

    print_menus(&coordinator, args.destination, args.lang).await?;

    if args.watch {
        let sched = JobScheduler::new().await?;
        start_refresh_jobs(&sched, Arc::clone(&coordinator), args.lang).await?;
        sched.start().await?;
        log::info!("Task scheduler running, Ctrl+C to stop");

        tokio::signal::ctrl_c().await?;
        log::info!("Shutting down...");
    }

    Ok(())
}

async fn print_menus(
    coordinator: &SyncCoordinator,
    destination: Destination,
    language: Language,
) -> anyhow::Result<()> {
    let dates = destination.target_dates(Local::now().date_naive());

    for (institution, locations) in coordinator.base_locations().await {
        for location in locations {
            println!("== {} / {} ==", institution, location.title);
            for mensa in &location.mensas {
                println!("-- {} ({})", mensa.title, mensa.meal_time);
                for &date in &dates {
                    let menus = coordinator.menus(mensa.id, language, date).await?;
                    if menus.is_empty() {
                        continue;
                    }

                    println!("   {}", date.format("%a %d.%m.%Y"));
                    for menu in menus {
                        let flag = if menu.is_vegan {
                            " (vegan)"
                        } else if menu.is_vegetarian {
                            " (vegetarisch)"
                        } else {
                            ""
                        };
                        println!(
                            "   * {}{}: {} [{}]",
                            menu.title,
                            flag,
                            menu.description.replace('\n', ", "),
                            menu.price.join(" / ")
                        );
                    }
                }
            }
        }
    }

    Ok(())
}
