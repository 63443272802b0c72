/// Master scatter engine.
///
/// One task per worker: connect, authenticate, send the compiled sub-job,
/// consume progress frames until the final value. Per-worker progress is
/// recorded under a lock and re-published as the component sum. Worker
/// partials are reduced on the job task; the fan-out fails atomically on the
/// first worker error.

use crate::config::WorkerAddr;
use crate::error::{EngineError, Result};
use crate::execution::{
    CompiledPlan, MapOut, PlanOutput, PlanRunner, Progress, ProgressCB, QueryPlan, SharedValues,
};
use crate::network::auth::{knock, Secret};
use crate::network::frame::{read_frame, write_frame};
use crate::network::protocol::{
    decode_worker_frame, encode_control, encode_request, ControlFrame, WorkerFrame, WorkerRequest,
};
use crate::network::relay::request_proxy;
use crate::safeevent::SafeEvent;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::{TcpStream, UnixStream};
use tracing::{debug, info};
use uuid::Uuid;

pub struct Master {
    workers: Vec<WorkerAddr>,
    secret: Arc<Secret>,
}

impl Master {
    pub fn new(workers: Vec<WorkerAddr>, secret: Arc<Secret>) -> Master {
        Master { workers, secret }
    }
}

#[async_trait::async_trait]
impl PlanRunner for Master {
    async fn run(
        &self,
        plan: &QueryPlan,
        shared: &SharedValues,
        progress: Option<ProgressCB>,
        interrupt: &SafeEvent,
    ) -> Result<PlanOutput> {
        if self.workers.is_empty() {
            return Err(EngineError::Config("no workers configured".to_string()));
        }
        // The same closures must reduce worker partials here, so compile
        // the plan locally too.
        let compiled = CompiledPlan::compile(plan, shared.clone())?;
        let request = WorkerRequest {
            request_id: Uuid::new_v4().simple().to_string(),
            plan: plan.clone(),
            shared: shared.clone(),
            chunksize: None,
        };
        debug!(request_id = %request.request_id, "scattering to {} workers", self.workers.len());

        let progresses: Arc<Mutex<Vec<Option<Progress>>>> =
            Arc::new(Mutex::new(vec![None; self.workers.len()]));
        let mut tasks = Vec::with_capacity(self.workers.len());
        for (i, addr) in self.workers.iter().enumerate() {
            let addr = addr.clone();
            let secret = self.secret.clone();
            let request = request.clone();
            let interrupt = interrupt.clone();
            let progresses = progresses.clone();
            let progress = progress.clone();
            tasks.push(tokio::spawn(async move {
                let publish = move |p: Progress| {
                    let mut table = progresses.lock();
                    let data = p.data.clone();
                    table[i] = Some(p);
                    let (done, total) = table
                        .iter()
                        .flatten()
                        .fold((0, 0), |(d, t), q| (d + q.done, t + q.total));
                    drop(table);
                    if let Some(cb) = &progress {
                        cb(Progress { done, total, data });
                    }
                };
                let result = scatter_one(&addr, &secret, &request, publish, &interrupt).await;
                result.map_err(|e| {
                    if e.is_user() {
                        e
                    } else {
                        EngineError::Network(format!("@{}: {}", addr, e))
                    }
                })
            }));
        }

        let mut partials: Vec<MapOut> = Vec::new();
        let mut failure: Option<EngineError> = None;
        for task in tasks {
            let outcome = task
                .await
                .map_err(|e| EngineError::Internal(format!("scatter task failed: {}", e)));
            match outcome.and_then(|r| r) {
                Ok(Some(value)) => partials.push(value),
                Ok(None) => {}
                Err(e) => {
                    // First user error wins; otherwise keep the first error.
                    match &failure {
                        Some(prev) if prev.is_user() => {}
                        Some(_) if e.is_user() => failure = Some(e),
                        Some(_) => {}
                        None => failure = Some(e),
                    }
                }
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }

        let mut acc: Option<MapOut> = None;
        for value in partials {
            acc = Some(match acc {
                None => value,
                Some(prev) => compiled.reduce(prev, value)?,
            });
        }
        compiled.finalize(acc)
    }
}

async fn scatter_one(
    addr: &WorkerAddr,
    secret: &Secret,
    request: &WorkerRequest,
    publish: impl Fn(Progress),
    interrupt: &SafeEvent,
) -> Result<Option<MapOut>> {
    match addr {
        WorkerAddr::Tcp(addr) => {
            let stream = TcpStream::connect(addr)
                .await
                .map_err(|e| EngineError::Network(e.to_string()))?;
            let (r, w) = stream.into_split();
            drive_worker(r, w, secret, request, publish, interrupt).await
        }
        WorkerAddr::Unix(path) => {
            let mut stream = UnixStream::connect(path)
                .await
                .map_err(|e| EngineError::Network(e.to_string()))?;
            request_proxy(&mut stream).await?;
            let (r, w) = stream.into_split();
            drive_worker(r, w, secret, request, publish, interrupt).await
        }
    }
}

async fn drive_worker<R, W>(
    r: R,
    w: W,
    secret: &Secret,
    request: &WorkerRequest,
    publish: impl Fn(Progress),
    interrupt: &SafeEvent,
) -> Result<Option<MapOut>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut reader = BufReader::new(r);
    let mut writer = w;
    knock(&mut reader, &mut writer, secret).await?;
    write_frame(&mut writer, &encode_request(request)?).await?;

    // The interrupt is forwarded from its own task so the frame-read loop
    // below is never torn down mid-frame.
    let forward_interrupt = {
        let interrupt = interrupt.clone();
        tokio::spawn(async move {
            interrupt.wait().await;
            info!("forwarding interrupt to worker");
            if let Ok(frame) = encode_control(&ControlFrame::Interrupt) {
                let _ = write_frame(&mut writer, &frame).await;
            }
        })
    };

    let result = loop {
        let frame = match read_frame(&mut reader).await {
            Ok(f) => f,
            Err(e) => break Err(e),
        };
        match decode_worker_frame(&frame) {
            Ok(WorkerFrame::Progress { progress }) => publish(progress),
            Ok(WorkerFrame::Result { value }) => break Ok(value),
            Ok(WorkerFrame::UserError { reason }) => break Err(EngineError::User(reason)),
            Ok(WorkerFrame::Error { reason }) => break Err(EngineError::Internal(reason)),
            Err(e) => break Err(e),
        }
    };
    forward_interrupt.abort();
    result
}
