/// Serializable plan IR.
///
/// The master ships a `QueryPlan` to each worker instead of code: the parsed
/// `Select`, which phase to run, and (for aggregate passes) the results of
/// the passes already completed. Workers recompile the plan against the
/// fixed operator registries, so master and workers always agree on
/// semantics.

use crate::error::{EngineError, Result};
use crate::execution::agg::{self, AggPlan};
use crate::execution::context::SharedValues;
use crate::execution::nonagg::{self, RowsOut};
use crate::kernel::{GroupMap, NdArray, Value, Vector};
use crate::parser::Select;
use crate::safeevent::SafeEvent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryPlan {
    pub select: Select,
    pub mode: PlanMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PlanMode {
    NonAgg {
        streaming: bool,
    },
    AggPass {
        pass: usize,
        /// Finalized results of passes `0..pass`, keyed by group.
        prior: Vec<GroupMap>,
    },
}

impl QueryPlan {
    pub fn rerun(&self) -> &str {
        &self.select.from
    }
}

/// Mapper/reducer output exchanged between chunks and between workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MapOut {
    Rows {
        targets: Vec<NdArray>,
        sort_keys: Option<Vec<Vector>>,
    },
    Groups(GroupMap),
}

/// Finalized output of one plan execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PlanOutput {
    Table(Vec<NdArray>),
    Groups(GroupMap),
}

impl PlanOutput {
    pub fn into_groups(self) -> Result<GroupMap> {
        match self {
            PlanOutput::Groups(g) => Ok(g),
            PlanOutput::Table(_) => Err(EngineError::Internal(
                "expected grouped output".to_string(),
            )),
        }
    }

    pub fn into_table(self) -> Result<Vec<NdArray>> {
        match self {
            PlanOutput::Table(t) => Ok(t),
            PlanOutput::Groups(_) => Err(EngineError::Internal(
                "expected row-table output".to_string(),
            )),
        }
    }
}

/// Progress of one sub-job. Monotonic within a job; the master sums the
/// per-worker components. `data` carries streamed mapper output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub done: u64,
    pub total: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

pub type ProgressCB = Arc<dyn Fn(Progress) + Send + Sync>;

/// A compiled plan: validated `Select` plus the pass machinery, ready to map
/// shards and merge partials.
pub struct CompiledPlan {
    select: Select,
    shared: Arc<SharedValues>,
    mode: CompiledMode,
}

enum CompiledMode {
    NonAgg { streaming: bool },
    AggPass { plan: AggPlan, pass: usize, prior: Vec<GroupMap> },
}

impl CompiledPlan {
    pub fn compile(plan: &QueryPlan, shared: SharedValues) -> Result<CompiledPlan> {
        let mode = match &plan.mode {
            PlanMode::NonAgg { streaming } => {
                nonagg::check_select(&plan.select, *streaming)?;
                CompiledMode::NonAgg {
                    streaming: *streaming,
                }
            }
            PlanMode::AggPass { pass, prior } => {
                agg::check_select(&plan.select)?;
                let agg_plan = AggPlan::build(&plan.select)?;
                if *pass >= agg_plan.len() || prior.len() != *pass {
                    return Err(EngineError::Internal(format!(
                        "inconsistent aggregate pass {} of {}",
                        pass,
                        agg_plan.len()
                    )));
                }
                CompiledMode::AggPass {
                    plan: agg_plan,
                    pass: *pass,
                    prior: prior.clone(),
                }
            }
        };
        Ok(CompiledPlan {
            select: plan.select.clone(),
            shared: Arc::new(shared),
            mode,
        })
    }

    pub fn rerun(&self) -> &str {
        &self.select.from
    }

    pub fn streaming(&self) -> bool {
        matches!(self.mode, CompiledMode::NonAgg { streaming: true })
    }

    pub fn map_shard(&self, shard: Arc<dyn crate::store::Shard>) -> Result<MapOut> {
        match &self.mode {
            CompiledMode::NonAgg { .. } => {
                let out = nonagg::map_shard(&self.select, &self.shared, shard)?;
                Ok(MapOut::Rows {
                    targets: out.targets,
                    sort_keys: out.sort_keys,
                })
            }
            CompiledMode::AggPass { plan, pass, prior } => Ok(MapOut::Groups(agg::map_shard(
                &self.select,
                plan,
                *pass,
                prior,
                &self.shared,
                shard,
            )?)),
        }
    }

    /// Merge two partials. Contract: associative, and commutative up to the
    /// unspecified tie/row order of unsorted results; chunks complete out of
    /// order, so nothing may depend on arrival order.
    pub fn reduce(&self, a: MapOut, b: MapOut) -> Result<MapOut> {
        match (&self.mode, a, b) {
            (
                CompiledMode::NonAgg { .. },
                MapOut::Rows {
                    targets: at,
                    sort_keys: ak,
                },
                MapOut::Rows {
                    targets: bt,
                    sort_keys: bk,
                },
            ) => {
                let merged = nonagg::reduce(
                    &self.select,
                    RowsOut {
                        targets: at,
                        sort_keys: ak,
                    },
                    RowsOut {
                        targets: bt,
                        sort_keys: bk,
                    },
                )?;
                Ok(MapOut::Rows {
                    targets: merged.targets,
                    sort_keys: merged.sort_keys,
                })
            }
            (CompiledMode::AggPass { plan, pass, .. }, MapOut::Groups(a), MapOut::Groups(b)) => {
                Ok(MapOut::Groups(agg::reduce(plan, *pass, a, b)?))
            }
            _ => Err(EngineError::Internal(
                "mismatched partials in reduce".to_string(),
            )),
        }
    }

    pub fn finalize(&self, acc: Option<MapOut>) -> Result<PlanOutput> {
        match &self.mode {
            CompiledMode::NonAgg { .. } => {
                let rows = match acc {
                    Some(MapOut::Rows { targets, sort_keys }) => {
                        Some(RowsOut { targets, sort_keys })
                    }
                    Some(MapOut::Groups(_)) => {
                        return Err(EngineError::Internal(
                            "mismatched partials in finalize".to_string(),
                        ))
                    }
                    None => None,
                };
                Ok(PlanOutput::Table(nonagg::finalize(&self.select, rows)?))
            }
            CompiledMode::AggPass { plan, pass, .. } => {
                let groups = match acc {
                    Some(MapOut::Groups(g)) => Some(g),
                    Some(MapOut::Rows { .. }) => {
                        return Err(EngineError::Internal(
                            "mismatched partials in finalize".to_string(),
                        ))
                    }
                    None => None,
                };
                Ok(PlanOutput::Groups(agg::finalize(plan, *pass, groups)?))
            }
        }
    }
}

/// Executes one plan over the whole catalog: locally or by scattering to
/// workers. Returns the finalized output.
#[async_trait]
pub trait PlanRunner: Send + Sync {
    async fn run(
        &self,
        plan: &QueryPlan,
        shared: &SharedValues,
        progress: Option<ProgressCB>,
        interrupt: &SafeEvent,
    ) -> Result<PlanOutput>;
}
