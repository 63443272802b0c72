/// Worker daemon: serves compiled sub-jobs over the authenticated wire
/// protocol, fanning each request out to the local map pool.

pub mod engine;

pub use engine::{LocalRunner, MapEngine};

use crate::error::{EngineError, Result};
use crate::execution::{CompiledPlan, MapOut, Progress};
use crate::network::auth::{authenticate, Secret};
use crate::network::frame::{read_frame, write_frame};
use crate::network::protocol::{
    decode_master_frame, encode_worker_frame, final_frame, ControlFrame, MasterFrame, WorkerFrame,
    WorkerRequest,
};
use crate::safeevent::SafeEvent;
use crate::store::ShardStore;
use parking_lot::Mutex;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Advisory lock: a `.lock` directory guarding the data directory. Present
/// means another daemon may be running. Removed on drop, not on crash;
/// operators sweep stale locks.
pub struct LockDir(std::path::PathBuf);

impl LockDir {
    pub fn acquire(path: std::path::PathBuf) -> Result<LockDir> {
        std::fs::create_dir(&path).map_err(|_| {
            EngineError::Config(format!(
                "cannot acquire {}: another worker may be running",
                path.display()
            ))
        })?;
        Ok(LockDir(path))
    }
}

impl Drop for LockDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

/// PID file written at startup, removed on shutdown.
pub struct PidFile(std::path::PathBuf);

impl PidFile {
    pub fn write(path: std::path::PathBuf) -> Result<PidFile> {
        std::fs::write(&path, format!("{}", std::process::id()))?;
        Ok(PidFile(path))
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

/// Single-slot cache of the most recently compiled plan, keyed by request
/// id. Amortizes recompilation when the master retries a request.
#[derive(Default)]
pub struct PlanCache {
    slot: Mutex<Option<(String, Arc<CompiledPlan>)>>,
}

impl PlanCache {
    pub fn get_or_compile(
        &self,
        request_id: &str,
        compile: impl FnOnce() -> Result<CompiledPlan>,
    ) -> Result<Arc<CompiledPlan>> {
        let mut slot = self.slot.lock();
        if let Some((id, plan)) = slot.as_ref() {
            if id == request_id {
                return Ok(plan.clone());
            }
        }
        let plan = Arc::new(compile()?);
        *slot = Some((request_id.to_string(), plan.clone()));
        Ok(plan)
    }
}

pub struct WorkerServer {
    store: Arc<dyn ShardStore>,
    engine: Arc<MapEngine>,
    secret: Arc<Secret>,
    /// Peer address the master is expected to connect from; loopback is
    /// always allowed.
    master_addr: Option<IpAddr>,
    cache: Arc<PlanCache>,
}

impl WorkerServer {
    pub fn new(
        store: Arc<dyn ShardStore>,
        engine: Arc<MapEngine>,
        secret: Arc<Secret>,
        master_addr: Option<IpAddr>,
    ) -> WorkerServer {
        WorkerServer {
            store,
            engine,
            secret,
            master_addr,
            cache: Arc::new(PlanCache::default()),
        }
    }

    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!(
            "worker listening on {} with {} map threads",
            listener
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_default(),
            self.engine.parallelism()
        );
        loop {
            let (socket, peer) = listener
                .accept()
                .await
                .map_err(|e| EngineError::Network(e.to_string()))?;
            let server = self.clone();
            tokio::spawn(async move {
                let allowed = peer.ip().is_loopback()
                    || server.master_addr.map(|m| m == peer.ip()).unwrap_or(false);
                let (r, w) = socket.into_split();
                if let Err(e) = server.handle_connection(r, w, allowed).await {
                    if !matches!(e, EngineError::Auth(_)) {
                        warn!("connection from {} failed: {}", peer, e);
                    }
                }
            });
        }
    }

    /// One request per connection: authenticate, read the compiled sub-job,
    /// stream progress frames, then the final frame. An `Interrupt` control
    /// frame (or the master hanging up) cancels the job.
    pub async fn handle_connection<R, W>(&self, r: R, w: W, peer_allowed: bool) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send,
    {
        let mut reader = BufReader::new(r);
        let mut writer = w;
        authenticate(&mut reader, &mut writer, peer_allowed, &self.secret).await?;

        let payload = read_frame(&mut reader).await?;
        let request = match decode_master_frame(&payload)? {
            MasterFrame::Request(req) => *req,
            MasterFrame::Control(c) => {
                return Err(EngineError::Network(format!(
                    "expected a request, got control frame {:?}",
                    c
                )))
            }
        };
        info!(request_id = %request.request_id, rerun = %request.plan.rerun(), "request accepted");

        let cancel = SafeEvent::new();
        let (progress_tx, mut progress_rx) = tokio::sync::mpsc::unbounded_channel::<Progress>();
        let mut job = self.spawn_job(request, progress_tx, cancel.clone());

        // Frames from the master are consumed by their own task so a frame
        // is never half-read when something else wins the race below.
        let control_cancel = cancel.clone();
        let control = tokio::spawn(async move {
            loop {
                match read_frame(&mut reader).await {
                    Ok(payload) => match decode_master_frame(&payload) {
                        Ok(MasterFrame::Control(ControlFrame::Interrupt)) => {
                            info!("interrupt received");
                            control_cancel.set();
                        }
                        Ok(MasterFrame::Request(_)) => {
                            warn!("unexpected second request on connection");
                            control_cancel.set();
                            break;
                        }
                        Err(e) => {
                            warn!("undecodable frame: {}", e);
                            control_cancel.set();
                            break;
                        }
                    },
                    Err(_) => {
                        // Master went away; treat as cancellation.
                        control_cancel.set();
                        break;
                    }
                }
            }
        });

        let result = loop {
            tokio::select! {
                Some(p) = progress_rx.recv() => {
                    let frame = encode_worker_frame(&WorkerFrame::Progress { progress: p })?;
                    write_frame(&mut writer, &frame).await?;
                }
                result = &mut job => {
                    break result
                        .map_err(|e| EngineError::Internal(format!("job task failed: {}", e)))?;
                }
            }
        };
        control.abort();

        // Flush progress that raced the completion.
        while let Ok(p) = progress_rx.try_recv() {
            let frame = encode_worker_frame(&WorkerFrame::Progress { progress: p })?;
            write_frame(&mut writer, &frame).await?;
        }
        if let Err(e) = &result {
            if e.is_user() {
                info!("request finished with user error: {}", e);
            } else {
                warn!("request failed: {}", e);
            }
        }
        let frame = encode_worker_frame(&final_frame(&result))?;
        write_frame(&mut writer, &frame).await?;
        Ok(())
    }

    fn spawn_job(
        &self,
        request: WorkerRequest,
        progress_tx: tokio::sync::mpsc::UnboundedSender<Progress>,
        cancel: SafeEvent,
    ) -> tokio::task::JoinHandle<Result<Option<MapOut>>> {
        let store = self.store.clone();
        let engine = self.engine.clone();
        let cache = self.cache.clone();
        tokio::task::spawn_blocking(move || {
            let compiled = cache.get_or_compile(&request.request_id, || {
                CompiledPlan::compile(&request.plan, request.shared.clone())
            })?;
            let shards = store.list_shards(compiled.rerun())?;
            let mut emit = |p: Progress| {
                let _ = progress_tx.send(p);
            };
            // The worker ships the reduced accumulator (None when it holds
            // no shards); the master reduces across workers and finalizes.
            engine.run(compiled, shards, request.chunksize, &mut emit, &cancel)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{PlanMode, QueryPlan, SharedValues};
    use crate::parser::Select;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn plan_cache_is_single_slot_keyed_by_request() {
        let cache = PlanCache::default();
        let compiles = AtomicUsize::new(0);
        let compile = || {
            compiles.fetch_add(1, Ordering::SeqCst);
            CompiledPlan::compile(
                &QueryPlan {
                    select: Select::parse("SELECT object_id FROM test LIMIT 1").unwrap(),
                    mode: PlanMode::NonAgg { streaming: false },
                },
                SharedValues::new(),
            )
        };
        cache.get_or_compile("a", compile).unwrap();
        cache.get_or_compile("a", compile).unwrap();
        assert_eq!(compiles.load(Ordering::SeqCst), 1);
        cache.get_or_compile("b", compile).unwrap();
        // Evicted: "a" compiles again.
        cache.get_or_compile("a", compile).unwrap();
        assert_eq!(compiles.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn lock_dir_is_exclusive_and_released() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".lock");
        let lock = LockDir::acquire(path.clone()).unwrap();
        assert!(LockDir::acquire(path.clone()).is_err());
        drop(lock);
        assert!(!path.exists());
        let _again = LockDir::acquire(path).unwrap();
    }

    #[test]
    fn pid_file_is_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pid");
        let pid = PidFile::write(path.clone()).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, format!("{}", std::process::id()));
        drop(pid);
        assert!(!path.exists());
    }
}
