// # RakeDB Master
//
// HTTP job service entry point: accepts SQL jobs, compiles them to
// map/reduce plans and scatters sub-jobs to the worker fleet (or runs them
// against a local shard store with --local).

use rakedb::api::{AppState, JobRegistry};
use rakedb::config::{self, MasterConfig};
use rakedb::error::EngineError;
use rakedb::execution::PlanRunner;
use rakedb::master::Master;
use rakedb::network::auth::Secret;
use rakedb::store::disk::DiskStore;
use rakedb::worker::{LocalRunner, MapEngine};
use rakedb::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

struct Args {
    port: Option<u16>,
    bind: Option<String>,
    config: Option<PathBuf>,
    local: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        port: None,
        bind: None,
        config: None,
        local: false,
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        let mut value = |name: &str| {
            it.next()
                .ok_or_else(|| EngineError::Config(format!("{} needs a value", name)))
        };
        match arg.as_str() {
            "--port" => {
                args.port = Some(value("--port")?.parse().map_err(|_| {
                    EngineError::Config("--port needs a port number".to_string())
                })?)
            }
            "--bind" => args.bind = Some(value("--bind")?),
            "--config" => args.config = Some(PathBuf::from(value("--config")?)),
            "--local" => args.local = true,
            other => {
                return Err(EngineError::Config(format!("unknown argument: {}", other)))
            }
        }
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let args = parse_args()?;
    let mut config: MasterConfig = match &args.config {
        Some(path) => config::load(path)?,
        None => MasterConfig::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(bind) = args.bind {
        config.bind = bind;
    }

    info!("RakeDB master {} starting", rakedb::VERSION);

    let runner: Arc<dyn PlanRunner> = if args.local || config.workers.is_empty() {
        let data_dir = config
            .data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("./data"));
        info!("serving locally from {}", data_dir.display());
        Arc::new(LocalRunner::new(
            Arc::new(DiskStore::new(data_dir)),
            Arc::new(MapEngine::new(None)?),
        ))
    } else {
        let secret = Arc::new(Secret::load(&config.secret_path)?);
        info!("scattering to {} workers", config.workers.len());
        Arc::new(Master::new(config.workers.clone(), secret))
    };

    let state = Arc::new(AppState {
        runner,
        jobs: JobRegistry::new(),
    });
    let app = rakedb::api::router(state);

    let addr = format!("{}:{}", config.bind, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| EngineError::Network(format!("cannot bind {}: {}", addr, e)))?;
    info!("listening on {}", addr);

    axum::serve(listener, app)
        .await
        .map_err(|e| EngineError::Network(e.to_string()))?;
    Ok(())
}
