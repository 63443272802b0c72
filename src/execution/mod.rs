/// Query execution: SQL in, result table out.
///
/// `run_sql` parses, classifies (aggregate vs non-aggregate), drives the
/// planner through a `PlanRunner`, and shapes the final result table.

pub mod agg;
pub mod agg_functions;
pub mod context;
pub mod functions;
pub mod nonagg;
pub mod plan;

pub use context::SharedValues;
pub use plan::{
    CompiledPlan, MapOut, PlanMode, PlanOutput, PlanRunner, Progress, ProgressCB, QueryPlan,
};

use crate::error::{EngineError, Result};
use crate::kernel::Value;
use crate::parser::{ExprKind, Expression, Select};
use crate::safeevent::SafeEvent;
use serde::{Deserialize, Serialize};

/// Final result table. For aggregate queries a virtual `$group_by` column
/// listing the group-key tuples is prepended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub target_names: Vec<String>,
    pub target_list: Vec<Value>,
}

/// Whether the query contains aggregate calls; rejects unknown functions.
pub fn is_agg_query(select: &Select) -> Result<bool> {
    let mut found_agg = false;
    let mut error: Option<EngineError> = None;
    let mut probe = |e: &Expression| {
        if let ExprKind::FuncCall { name, .. } = &e.kind {
            if agg_functions::is_aggregate(name) {
                found_agg = true;
            } else if !functions::is_scalar(name) && error.is_none() {
                error = Some(EngineError::Sql(format!("no such function: {}", name)));
            }
        }
    };
    for target in &select.target_list {
        target.expr.walk(&mut probe);
    }
    if let Some(e) = error {
        return Err(e);
    }
    Ok(found_agg)
}

pub async fn run_sql(
    sql: &str,
    runner: &dyn PlanRunner,
    shared: &SharedValues,
    progress: Option<ProgressCB>,
    interrupt: &SafeEvent,
    streaming: bool,
) -> Result<QueryResult> {
    let select = Select::parse(sql)?;
    if is_agg_query(&select)? {
        // A streaming client still gets progress envelopes for aggregate
        // queries; only row data streaming is aggregate-free.
        let result = agg::run_agg_query(&select, runner, shared, progress, interrupt).await?;

        let mut group_column = Vec::with_capacity(result.groups.len());
        let mut columns: Vec<Vec<Value>> =
            vec![Vec::with_capacity(result.groups.len()); result.target_names.len()];
        for (key, row) in result.groups {
            group_column.push(key.to_value());
            for (i, v) in row.into_iter().enumerate() {
                columns[i].push(v);
            }
        }
        let mut target_names = vec!["$group_by".to_string()];
        target_names.extend(result.target_names);
        let mut target_list = vec![Value::Row(group_column)];
        target_list.extend(columns.into_iter().map(Value::Row));
        Ok(QueryResult {
            target_names,
            target_list,
        })
    } else {
        nonagg::check_select(&select, streaming)?;
        let plan = QueryPlan {
            select: select.clone(),
            mode: PlanMode::NonAgg { streaming },
        };
        let table = runner
            .run(&plan, shared, progress, interrupt)
            .await?
            .into_table()?;
        Ok(QueryResult {
            target_names: select.target_names(),
            target_list: table.into_iter().map(Value::Array).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        let agg = Select::parse("SELECT count(*) FROM t").unwrap();
        assert!(is_agg_query(&agg).unwrap());
        let nonagg = Select::parse("SELECT isnan(flux) FROM t LIMIT 1").unwrap();
        assert!(!is_agg_query(&nonagg).unwrap());
        let unknown = Select::parse("SELECT frobnicate(flux) FROM t LIMIT 1").unwrap();
        assert!(is_agg_query(&unknown).is_err());
    }
}
