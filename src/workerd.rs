// # RakeDB Worker
//
// Worker daemon entry point. Acquires the data-directory advisory lock,
// writes a PID file, builds the map pool and serves authenticated sub-jobs
// until shut down. Lock and PID file are released on normal exit.

use rakedb::config::{self, WorkerConfig};
use rakedb::error::EngineError;
use rakedb::network::auth::Secret;
use rakedb::store::disk::DiskStore;
use rakedb::worker::{LockDir, MapEngine, PidFile, WorkerServer};
use rakedb::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

struct Args {
    port: Option<u16>,
    host: Option<String>,
    pid_file: Option<PathBuf>,
    parallel: Option<usize>,
    config: Option<PathBuf>,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        port: None,
        host: None,
        pid_file: None,
        parallel: None,
        config: None,
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
            "--host" => args.host = Some(value("--host")?),
            "--pid-file" => args.pid_file = Some(PathBuf::from(value("--pid-file")?)),
            "--parallel" | "-j" => {
                args.parallel = Some(value("--parallel")?.parse().map_err(|_| {
                    EngineError::Config("--parallel needs a thread count".to_string())
                })?)
            }
            "--config" => args.config = Some(PathBuf::from(value("--config")?)),
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
    let mut config: WorkerConfig = match &args.config {
        Some(path) => config::load(path)?,
        None => WorkerConfig::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(pid_file) = args.pid_file {
        config.pid_file = pid_file;
    }
    if args.parallel.is_some() {
        config.parallel = args.parallel;
    }

    info!("RakeDB worker {} starting", rakedb::VERSION);

    let secret = Arc::new(Secret::load(&config.secret_path)?);
    let _lock = LockDir::acquire(Path::new(".lock").to_path_buf())?;
    let _pid = PidFile::write(config.pid_file.clone())?;

    let engine = Arc::new(MapEngine::new(config.parallel)?);
    let store = Arc::new(DiskStore::new(config.data_dir.clone()));
    let server = Arc::new(WorkerServer::new(
        store,
        engine,
        secret,
        config.master_addr,
    ));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| EngineError::Network(format!("cannot bind {}: {}", addr, e)))?;
    info!("worker successfully started");

    tokio::select! {
        result = server.serve(listener) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }
    Ok(())
}
