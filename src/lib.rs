pub mod api;
pub mod cache;
pub mod clients;
pub mod clock;
pub mod config;
pub mod models;
pub mod quota;
pub mod scheduler;
pub mod services;
pub mod state;

use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

pub use config::Config;
use scheduler::Scheduler;
use services::monitor::QuotaMonitor;
use state::AppState;

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::load()?;
    config.validate()?;

    let prometheus_handle = if config.observability.metrics_enabled {
        use metrics_exporter_prometheus::PrometheusBuilder;
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("Failed to install Prometheus recorder")?;
        info!("Prometheus metrics recorder initialized");
        Some(handle)
    } else {
        None
    };

    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let mut log_level = config.general.log_level.clone();
    if config.general.suppress_connection_errors {
        log_level.push_str(",reqwest::retry=off,hyper_util=off");
    }

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level));

    let fmt_layer = tracing_subscriber::fmt::layer();

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    if config.observability.loki_enabled {
        let url = url::Url::parse(&config.observability.loki_url).context("Invalid Loki URL")?;

        let (layer, task) = tracing_loki::builder()
            .label("app", "guardarr")?
            .extra_field("env", "production")?
            .build_url(url)?;

        tokio::spawn(task);

        registry.with(layer).init();
        info!(
            "Loki logging initialized at {}",
            config.observability.loki_url
        );
    } else {
        registry.init();
    }

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    match args[1].as_str() {
        "daemon" | "-d" | "--daemon" => run_daemon(config, prometheus_handle).await,

        "check" | "-c" | "--check" => run_single_check(config).await,

        "search" | "s" => {
            if args.len() < 3 {
                println!("Usage: guardarr search <query>");
                return Ok(());
            }
            let query = args[2..].join(" ");
            cmd_search(config, &query).await
        }

        "init" => {
            if Config::create_default_if_missing()? {
                println!("Created config.toml with default settings");
            } else {
                println!("config.toml already exists");
            }
            Ok(())
        }

        "help" | "-h" | "--help" => {
            print_help();
            Ok(())
        }

        other => {
            println!("Unknown command: {other}");
            print_help();
            Ok(())
        }
    }
}

fn print_help() {
    println!("guardarr v{}", env!("CARGO_PKG_VERSION"));
    println!("Content-protection search service");
    println!();
    println!("Usage: guardarr <command>");
    println!();
    println!("Commands:");
    println!("  daemon, -d     Run the API server, scheduler, and monitors");
    println!("  check, -c      Run due scheduled searches once and exit");
    println!("  search <q>     Run a one-off text search and print the results");
    println!("  init           Create a default config.toml");
    println!("  help           Show this help");
}

async fn run_daemon(
    config: Config,
    prometheus_handle: Option<metrics_exporter_prometheus::PrometheusHandle>,
) -> anyhow::Result<()> {
    info!(
        "Guardarr v{} starting in daemon mode...",
        env!("CARGO_PKG_VERSION")
    );

    let state = AppState::from_config(config.clone(), prometheus_handle)?;

    state.cache.start_maintenance();

    let scheduler = if config.scheduler.enabled {
        let scheduler = Scheduler::new(
            Arc::clone(&state.search),
            Arc::clone(&state.store),
            config.scheduler.clone(),
        );
        scheduler.start().await?;
        Some(scheduler)
    } else {
        None
    };

    let monitor = QuotaMonitor::new(Arc::clone(&state.quota));
    monitor.start();

    let server_handle: Option<tokio::task::JoinHandle<()>> = if config.server.enabled {
        let port = config.server.port;
        info!("Starting Web API on port {port}");

        let app = api::router(Arc::clone(&state));
        let addr = format!("0.0.0.0:{port}");
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        Some(tokio::spawn(async move {
            info!("🌐 Web Server running at http://0.0.0.0:{port}");
            if let Err(e) = axum::serve(listener, app).await {
                error!("Web server error: {e}");
            }
        }))
    } else {
        None
    };

    info!("Daemon running. Press Ctrl+C to stop.");

    match signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!("Error listening for shutdown: {e}"),
    }

    if let Some(scheduler) = scheduler {
        scheduler.stop().await;
    }
    monitor.stop();
    state.cache.stop_maintenance();
    if let Some(handle) = server_handle {
        handle.abort();
    }
    info!("Daemon stopped");

    Ok(())
}

async fn run_single_check(config: Config) -> anyhow::Result<()> {
    let state = AppState::from_config(config.clone(), None)?;
    let scheduler = Scheduler::new(
        Arc::clone(&state.search),
        Arc::clone(&state.store),
        config.scheduler,
    );
    scheduler.run_once().await;
    Ok(())
}

async fn cmd_search(config: Config, query: &str) -> anyhow::Result<()> {
    use models::{QueryType, Tier};
    use services::search::TextSearchInput;

    let state = AppState::from_config(config, None)?;

    let outcome = state
        .search
        .text_search(
            "cli",
            Tier::Admin,
            TextSearchInput {
                query_type: QueryType::Name,
                query: query.to_string(),
                options: serde_json::Value::Null,
                scheduled: false,
                schedule_interval_minutes: None,
            },
        )
        .await?;

    let formatted = state.search.results(&outcome.search_id, None).await?;

    if formatted.fallback {
        println!("(live results unavailable, showing samples)");
    }
    println!(
        "{} result(s) for \"{query}\" [search {}]",
        formatted.total_results, formatted.search_id
    );
    for result in formatted.results {
        println!(
            "  [{:?}] {} -> {}",
            result.match_level, result.title, result.url
        );
    }

    Ok(())
}
