/// Map-tier engine.
///
/// Shards are partitioned into contiguous chunks and dispatched to a fixed
/// thread pool; completions arrive unordered and are folded into the running
/// accumulator on the serving thread, which also emits progress and checks
/// the cancel signal between completions. The in-flight chunks of a
/// cancelled job run to completion, but nothing further is scheduled.

use crate::error::{EngineError, Result};
use crate::execution::{
    CompiledPlan, MapOut, PlanOutput, PlanRunner, Progress, ProgressCB, QueryPlan, SharedValues,
};
use crate::kernel::Value;
use crate::safeevent::SafeEvent;
use crate::store::{Shard, ShardStore};
use async_trait::async_trait;
use std::sync::Arc;

/// Chunks are capped so even huge reruns produce reasonably granular
/// progress.
pub const MAX_CHUNK_SIZE: usize = 1024;

pub fn chunk_size(n_shards: usize, parallelism: usize, requested: Option<usize>) -> usize {
    match requested {
        Some(n) => n.max(1),
        None => n_shards
            .div_ceil(parallelism.max(1))
            .clamp(1, MAX_CHUNK_SIZE),
    }
}

pub struct MapEngine {
    pool: rayon::ThreadPool,
    parallelism: usize,
}

enum ChunkMsg {
    Done(Result<MapOut>),
    Cancelled,
}

impl MapEngine {
    /// Pool sized to the local CPU count unless overridden.
    pub fn new(parallel: Option<usize>) -> Result<MapEngine> {
        let parallelism = parallel.unwrap_or_else(num_cpus::get).max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(parallelism)
            .thread_name(|i| format!("rakedb-map-{}", i))
            .build()
            .map_err(|e| EngineError::Internal(format!("failed to build map pool: {}", e)))?;
        Ok(MapEngine { pool, parallelism })
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Runs one compiled plan over the shard list, returning the reduced
    /// (not finalized) accumulator. Blocking; call from a blocking thread.
    pub fn run(
        &self,
        compiled: Arc<CompiledPlan>,
        shards: Vec<Arc<dyn Shard>>,
        chunksize: Option<usize>,
        progress: &mut dyn FnMut(Progress),
        cancel: &SafeEvent,
    ) -> Result<Option<MapOut>> {
        let n = shards.len();
        if n == 0 {
            return Ok(None);
        }
        let started = std::time::Instant::now();
        let size = chunk_size(n, self.parallelism, chunksize);
        let ranges: Vec<(usize, usize)> = (0..n)
            .step_by(size)
            .map(|start| (start, (start + size).min(n)))
            .collect();
        let total = ranges.len() as u64;
        let streaming = compiled.streaming();

        let (tx, rx) = crossbeam::channel::unbounded::<ChunkMsg>();
        let shards = Arc::new(shards);
        for (start, end) in ranges {
            let tx = tx.clone();
            let compiled = compiled.clone();
            let shards = shards.clone();
            let cancel = cancel.clone();
            self.pool.spawn(move || {
                if cancel.is_set() {
                    let _ = tx.send(ChunkMsg::Cancelled);
                    return;
                }
                let _ = tx.send(ChunkMsg::Done(map_chunk(&compiled, &shards[start..end])));
            });
        }
        drop(tx);

        let mut acc: Option<MapOut> = None;
        for done in 1..=total {
            let msg = rx
                .recv()
                .map_err(|_| EngineError::Internal("map pool hung up".to_string()))?;
            if cancel.is_set() {
                return Err(EngineError::cancelled());
            }
            let out = match msg {
                ChunkMsg::Cancelled => return Err(EngineError::cancelled()),
                ChunkMsg::Done(r) => r?,
            };
            if streaming {
                progress(Progress {
                    done,
                    total,
                    data: Some(streamed_data(&out)),
                });
            } else {
                acc = Some(match acc {
                    None => out,
                    Some(prev) => compiled.reduce(prev, out)?,
                });
                progress(Progress {
                    done,
                    total,
                    data: None,
                });
            }
        }
        if cancel.is_set() {
            return Err(EngineError::cancelled());
        }
        tracing::debug!(
            shards = n,
            chunks = total,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "map/reduce finished"
        );
        Ok(acc)
    }
}

fn map_chunk(compiled: &CompiledPlan, shards: &[Arc<dyn Shard>]) -> Result<MapOut> {
    let mut acc: Option<MapOut> = None;
    for shard in shards {
        let out = compiled.map_shard(shard.clone())?;
        acc = Some(match acc {
            None => out,
            Some(prev) => compiled.reduce(prev, out)?,
        });
    }
    acc.ok_or_else(|| EngineError::Internal("empty chunk".to_string()))
}

/// The payload forwarded to streaming clients for one completed chunk.
fn streamed_data(out: &MapOut) -> Value {
    match out {
        MapOut::Rows { targets, .. } => {
            Value::Row(targets.iter().cloned().map(Value::Array).collect())
        }
        MapOut::Groups(_) => Value::Null,
    }
}

/// Runs plans against a local shard store without any worker fleet: the
/// serving mode for single-node deployments and the test double for the
/// scatter path.
pub struct LocalRunner {
    store: Arc<dyn ShardStore>,
    engine: Arc<MapEngine>,
}

impl LocalRunner {
    pub fn new(store: Arc<dyn ShardStore>, engine: Arc<MapEngine>) -> LocalRunner {
        LocalRunner { store, engine }
    }
}

#[async_trait]
impl PlanRunner for LocalRunner {
    async fn run(
        &self,
        plan: &QueryPlan,
        shared: &SharedValues,
        progress: Option<ProgressCB>,
        interrupt: &SafeEvent,
    ) -> Result<PlanOutput> {
        let compiled = Arc::new(CompiledPlan::compile(plan, shared.clone())?);
        let shards = self.store.list_shards(compiled.rerun())?;
        let engine = self.engine.clone();
        let cancel = interrupt.clone();
        let compiled_for_run = compiled.clone();
        let acc = tokio::task::spawn_blocking(move || {
            let mut emit = |p: Progress| {
                if let Some(cb) = &progress {
                    cb(p);
                }
            };
            engine.run(compiled_for_run, shards, None, &mut emit, &cancel)
        })
        .await
        .map_err(|e| EngineError::Internal(format!("map task panicked: {}", e)))??;
        compiled.finalize(acc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_sizing() {
        assert_eq!(chunk_size(100, 8, None), 13);
        assert_eq!(chunk_size(4, 8, None), 1);
        assert_eq!(chunk_size(100_000, 8, None), MAX_CHUNK_SIZE);
        assert_eq!(chunk_size(100, 8, Some(7)), 7);
        assert_eq!(chunk_size(100, 8, Some(0)), 1);
    }
}
