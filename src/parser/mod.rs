/// SQL surface: a restricted subset of PostgreSQL `SELECT`.
///
/// `Select` resolves the clauses the engine supports and rejects everything
/// else up front, so the planners downstream never meet surprising syntax.
/// The parsed form is serializable; the master ships it to workers inside
/// the plan IR.

pub mod expression;

pub use expression::{ExprBuilder, ExprKind, Expression, NodeId, SourceLoc};

use crate::error::{EngineError, Result};
use crate::kernel::Scalar;
use serde::{Deserialize, Serialize};
use sqlparser::ast;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub expr: Expression,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderByItem {
    pub node: Expression,
    pub reverse: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Select {
    pub target_list: Vec<Target>,
    /// Relation name: selects the catalog version ("rerun") to scan.
    pub from: String,
    pub where_clause: Option<Expression>,
    pub group_by: Option<Vec<Expression>>,
    pub order_by: Option<Vec<OrderByItem>>,
    pub limit: Option<usize>,
}

impl Select {
    pub fn parse(sql: &str) -> Result<Select> {
        let statements = Parser::parse_sql(&GenericDialect {}, sql)
            .map_err(|e| EngineError::Sql(e.to_string()))?;
        if statements.len() != 1 {
            return Err(EngineError::Sql(format!(
                "multiple statements are not allowed: {}",
                sql
            )));
        }
        let query = match statements.into_iter().next().unwrap() {
            ast::Statement::Query(q) => q,
            _ => {
                return Err(EngineError::Sql(
                    "only SELECT statements are supported".to_string(),
                ))
            }
        };
        Select::from_query(*query)
    }

    fn from_query(query: ast::Query) -> Result<Select> {
        if query.with.is_some() {
            return Err(EngineError::Sql("WITH is not supported".to_string()));
        }
        if query.fetch.is_some() || !query.locks.is_empty() || query.for_clause.is_some() {
            return Err(EngineError::Sql("unsupported query clause".to_string()));
        }
        if query.settings.is_some() || query.format_clause.is_some() {
            return Err(EngineError::Sql("unsupported query clause".to_string()));
        }

        let select = match *query.body {
            ast::SetExpr::Select(s) => s,
            _ => {
                return Err(EngineError::Sql(
                    "only plain SELECT statements are supported".to_string(),
                ))
            }
        };

        check_select_body(&select)?;

        let mut builder = ExprBuilder::new();

        let mut target_list = Vec::new();
        for item in &select.projection {
            match item {
                ast::SelectItem::UnnamedExpr(e) => target_list.push(Target {
                    expr: builder.lower(e)?,
                    name: None,
                }),
                ast::SelectItem::ExprWithAlias { expr, alias } => target_list.push(Target {
                    expr: builder.lower(expr)?,
                    name: Some(alias.value.clone()),
                }),
                _ => {
                    return Err(EngineError::Sql(
                        "\"*\" is not allowed for selecting columns".to_string(),
                    ))
                }
            }
        }
        if target_list.is_empty() {
            return Err(EngineError::Sql("target list must be specified".to_string()));
        }

        let from = extract_relation(&select.from)?;

        let where_clause = match &select.selection {
            Some(e) => Some(builder.lower(e)?),
            None => None,
        };

        let group_by = match &select.group_by {
            ast::GroupByExpr::Expressions(exprs, modifiers) => {
                if !modifiers.is_empty() {
                    return Err(EngineError::Sql(
                        "GROUP BY modifiers are not supported".to_string(),
                    ));
                }
                if exprs.is_empty() {
                    None
                } else {
                    Some(
                        exprs
                            .iter()
                            .map(|e| builder.lower(e))
                            .collect::<Result<Vec<_>>>()?,
                    )
                }
            }
            ast::GroupByExpr::All(_) => {
                return Err(EngineError::Sql("GROUP BY ALL is not supported".to_string()))
            }
        };

        let order_by = match &query.order_by {
            None => None,
            Some(ob) => {
                if ob.interpolate.is_some() {
                    return Err(EngineError::Sql(
                        "unsupported ORDER BY clause".to_string(),
                    ));
                }
                match &ob.kind {
                    ast::OrderByKind::All(_) => {
                        return Err(EngineError::Sql(
                            "ORDER BY ALL is not supported".to_string(),
                        ))
                    }
                    ast::OrderByKind::Expressions(items) => {
                        let mut out = Vec::new();
                        for item in items {
                            if item.with_fill.is_some() {
                                return Err(EngineError::Sql(
                                    "unsupported ORDER BY clause".to_string(),
                                ));
                            }
                            if item.options.nulls_first.is_some() {
                                return Err(EngineError::Sql(
                                    "syntax `NULLS {FIRST | LAST}` is not supported".to_string(),
                                ));
                            }
                            out.push(OrderByItem {
                                node: builder.lower(&item.expr)?,
                                reverse: item.options.asc == Some(false),
                            });
                        }
                        Some(out)
                    }
                }
            }
        };

        let limit = extract_limit(&query.limit_clause)?;

        Ok(Select {
            target_list,
            from,
            where_clause,
            group_by,
            order_by,
            limit,
        })
    }

    /// Result column labels: explicit alias or `colN`.
    pub fn target_names(&self) -> Vec<String> {
        self.target_list
            .iter()
            .enumerate()
            .map(|(i, t)| t.name.clone().unwrap_or_else(|| format!("col{}", i)))
            .collect()
    }
}

fn check_select_body(select: &ast::Select) -> Result<()> {
    if select.distinct.is_some() {
        return Err(EngineError::Sql("DISTINCT is not supported".to_string()));
    }
    if select.top.is_some() || select.into.is_some() {
        return Err(EngineError::Sql("unsupported select clause".to_string()));
    }
    if select.having.is_some() {
        return Err(EngineError::Sql("HAVING is not supported".to_string()));
    }
    if !select.lateral_views.is_empty()
        || select.prewhere.is_some()
        || !select.cluster_by.is_empty()
        || !select.distribute_by.is_empty()
        || !select.sort_by.is_empty()
        || !select.named_window.is_empty()
        || select.qualify.is_some()
        || select.value_table_mode.is_some()
        || select.connect_by.is_some()
    {
        return Err(EngineError::Sql("unsupported select clause".to_string()));
    }
    Ok(())
}

fn extract_relation(from: &[ast::TableWithJoins]) -> Result<String> {
    if from.len() != 1 {
        return Err(EngineError::Sql(
            "exactly one FROM relation must be specified".to_string(),
        ));
    }
    if !from[0].joins.is_empty() {
        return Err(EngineError::Sql("JOIN is not supported".to_string()));
    }
    match &from[0].relation {
        ast::TableFactor::Table { name, args, .. } => {
            if args.is_some() {
                return Err(EngineError::Sql(
                    "table functions are not supported".to_string(),
                ));
            }
            let name = name.to_string();
            if name.contains('.') {
                return Err(EngineError::Sql(format!(
                    "schema cannot be specified: {}",
                    name
                )));
            }
            Ok(name)
        }
        _ => Err(EngineError::Sql(
            "unsupported syntax in FROM clause".to_string(),
        )),
    }
}

fn extract_limit(limit_clause: &Option<ast::LimitClause>) -> Result<Option<usize>> {
    let (limit, offset) = match limit_clause {
        None => return Ok(None),
        Some(ast::LimitClause::LimitOffset {
            limit,
            offset,
            limit_by,
        }) => {
            if !limit_by.is_empty() {
                return Err(EngineError::Sql("LIMIT BY is not supported".to_string()));
            }
            (limit.as_ref(), offset.as_ref())
        }
        Some(ast::LimitClause::OffsetCommaLimit { .. }) => {
            return Err(EngineError::Sql(
                "`OFFSET, LIMIT` syntax is not supported".to_string(),
            ))
        }
    };
    if let Some(off) = offset {
        match const_int(&off.value)? {
            0 => {}
            _ => return Err(EngineError::Sql("OFFSET is not supported".to_string())),
        }
    }
    match limit {
        None => Ok(None),
        Some(e) => {
            let n = const_int(e)?;
            if n < 0 {
                return Err(EngineError::Sql(
                    "limit count must be a non-negative integer".to_string(),
                ));
            }
            Ok(Some(n as usize))
        }
    }
}

fn const_int(e: &ast::Expr) -> Result<i64> {
    let mut builder = ExprBuilder::new();
    match builder.lower(e)?.kind {
        ExprKind::Const(Scalar::Int(i)) => Ok(i),
        _ => Err(EngineError::Sql(
            "limit count must be an integer".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::ops::{BinOp, BoolOp};

    fn parse(sql: &str) -> Select {
        Select::parse(sql).unwrap()
    }

    #[test]
    fn clauses_are_resolved() {
        let s = parse(
            "SELECT object_id, flux AS f FROM pdr2_wide \
             WHERE object_id % 2 = 0 ORDER BY flux DESC LIMIT 10",
        );
        assert_eq!(s.from, "pdr2_wide");
        assert_eq!(s.target_list.len(), 2);
        assert_eq!(s.target_names(), vec!["col0", "f"]);
        assert!(s.where_clause.is_some());
        let ob = s.order_by.unwrap();
        assert_eq!(ob.len(), 1);
        assert!(ob[0].reverse);
        assert_eq!(s.limit, Some(10));
    }

    #[test]
    fn column_paths_have_up_to_three_parts() {
        let s = parse("SELECT forced.i.psfflux_flux FROM t LIMIT 1");
        match &s.target_list[0].expr.kind {
            ExprKind::ColumnRef(path) => {
                assert_eq!(path, &["forced", "i", "psfflux_flux"]);
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn shared_refs_are_rewritten() {
        let s = parse("SELECT shared.radius FROM t LIMIT 1");
        match &s.target_list[0].expr.kind {
            ExprKind::SharedRef(name) => assert_eq!(name, "radius"),
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn known_constants_fold() {
        let s = parse("SELECT pi, arcsec FROM t LIMIT 1");
        match &s.target_list[0].expr.kind {
            ExprKind::Const(Scalar::Float(v)) => {
                assert!((v - std::f64::consts::PI).abs() < 1e-12)
            }
            other => panic!("unexpected kind: {:?}", other),
        }
        match &s.target_list[1].expr.kind {
            ExprKind::Const(Scalar::Float(v)) => {
                assert!((v - 3600.0 * 180.0 / std::f64::consts::PI).abs() < 1e-6)
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn function_calls_with_named_args() {
        let s = parse("SELECT histogram(flux, bins => 20) FROM t");
        match &s.target_list[0].expr.kind {
            ExprKind::FuncCall {
                name,
                args,
                named_args,
                agg_star,
            } => {
                assert_eq!(name, "histogram");
                assert_eq!(args.len(), 1);
                assert_eq!(named_args.len(), 1);
                assert_eq!(named_args[0].0, "bins");
                assert!(!agg_star);
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn count_star_sets_agg_star() {
        let s = parse("SELECT count(*) FROM t");
        match &s.target_list[0].expr.kind {
            ExprKind::FuncCall { name, agg_star, .. } => {
                assert_eq!(name, "count");
                assert!(agg_star);
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn between_and_boolean_operators() {
        let s = parse("SELECT a FROM t WHERE a BETWEEN 1 AND 2 AND NOT b = 0 LIMIT 1");
        let w = s.where_clause.unwrap();
        match &w.kind {
            ExprKind::Bool { op, args } => {
                assert_eq!(*op, BoolOp::And);
                assert!(matches!(args[0].kind, ExprKind::Between { .. }));
                assert!(matches!(
                    args[1].kind,
                    ExprKind::Bool {
                        op: BoolOp::Not,
                        ..
                    }
                ));
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn row_literals_and_indirection() {
        let s = parse("SELECT (1, 2), coord[0] FROM t LIMIT 1");
        assert!(matches!(&s.target_list[0].expr.kind, ExprKind::Row(args) if args.len() == 2));
        match &s.target_list[1].expr.kind {
            ExprKind::Indirection { index, .. } => assert_eq!(*index, 0),
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn binary_operator_lowering() {
        let s = parse("SELECT a + b * 2 FROM t LIMIT 1");
        match &s.target_list[0].expr.kind {
            ExprKind::Binary { op, .. } => assert_eq!(*op, BinOp::Add),
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn rejected_syntax() {
        for sql in [
            "SELECT * FROM t",
            "SELECT a FROM t; SELECT b FROM t",
            "INSERT INTO t VALUES (1)",
            "SELECT a FROM t JOIN u ON t.x = u.x",
            "SELECT a FROM s.t",
            "SELECT a FROM t LIMIT 5 OFFSET 3",
            "SELECT a FROM t ORDER BY a NULLS FIRST",
            "SELECT a FROM t HAVING a > 1",
            "SELECT DISTINCT a FROM t",
            "SELECT a FROM t, u",
        ] {
            assert!(Select::parse(sql).is_err(), "expected rejection: {}", sql);
        }
    }

    #[test]
    fn offset_zero_is_accepted() {
        let s = parse("SELECT a FROM t LIMIT 5 OFFSET 0");
        assert_eq!(s.limit, Some(5));
    }

    #[test]
    fn walk_is_post_order() {
        let s = parse("SELECT a + 1 FROM t LIMIT 1");
        let mut kinds = Vec::new();
        s.target_list[0].expr.walk(&mut |e| {
            kinds.push(match &e.kind {
                ExprKind::ColumnRef(_) => "col",
                ExprKind::Const(_) => "const",
                ExprKind::Binary { .. } => "bin",
                _ => "other",
            })
        });
        assert_eq!(kinds, vec!["col", "const", "bin"]);
    }

    #[test]
    fn walk_pruning_skips_children() {
        let s = parse("SELECT count(a + 1) FROM t");
        let mut seen = Vec::new();
        s.target_list[0].expr.walk_pruned(
            &mut |e| {
                seen.push(matches!(e.kind, ExprKind::FuncCall { .. }));
            },
            &|e| matches!(e.kind, ExprKind::FuncCall { .. }),
        );
        // Only the pruned function node itself is visited.
        assert_eq!(seen, vec![true]);
    }

    #[test]
    fn serde_round_trip_preserves_structure() {
        let s = parse(
            "SELECT count(*), histogram(flux, bins => 3, range => (0, 1)) \
             FROM t WHERE flux BETWEEN 0 AND 1 GROUP BY object_id % 2",
        );
        let json = serde_json::to_string(&s).unwrap();
        let back: Select = serde_json::from_str(&json).unwrap();
        assert_eq!(s, back);

        // Node sequences induced by walk agree.
        let mut a_ids = Vec::new();
        let mut b_ids = Vec::new();
        for t in &s.target_list {
            t.expr.walk(&mut |e| a_ids.push(e.id));
        }
        for t in &back.target_list {
            t.expr.walk(&mut |e| b_ids.push(e.id));
        }
        assert_eq!(a_ids, b_ids);
    }
}
