/// Typed expression AST.
///
/// The raw `sqlparser` tree is validated and lowered into this model at
/// parse time; evaluation and planning never see `sqlparser` types. Every
/// node carries a stable id (used by the aggregate planner to key results)
/// and its source location.

use crate::error::{EngineError, Result};
use crate::kernel::ops::{BinOp, BoolOp, UnaryOp};
use crate::kernel::Scalar;
use serde::{Deserialize, Serialize};
use sqlparser::ast::{self, Spanned};

pub type NodeId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourceLoc {
    pub line: u64,
    pub column: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expression {
    pub id: NodeId,
    pub loc: SourceLoc,
    pub kind: ExprKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    Const(Scalar),
    /// Dotted column path, e.g. `forced.i.psfflux_flux`.
    ColumnRef(Vec<String>),
    /// Client-provided parameter, `shared.<name>`.
    SharedRef(String),
    Unary {
        op: UnaryOp,
        arg: Box<Expression>,
    },
    Binary {
        op: BinOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Between {
        arg: Box<Expression>,
        low: Box<Expression>,
        high: Box<Expression>,
        negated: bool,
    },
    Bool {
        op: BoolOp,
        args: Vec<Expression>,
    },
    FuncCall {
        name: String,
        args: Vec<Expression>,
        named_args: Vec<(String, Expression)>,
        agg_star: bool,
    },
    Row(Vec<Expression>),
    Indirection {
        arg: Box<Expression>,
        index: i64,
    },
}

impl Expression {
    fn children(&self) -> Vec<&Expression> {
        match &self.kind {
            ExprKind::Const(_) | ExprKind::ColumnRef(_) | ExprKind::SharedRef(_) => Vec::new(),
            ExprKind::Unary { arg, .. } => vec![arg],
            ExprKind::Binary { left, right, .. } => vec![left, right],
            ExprKind::Between { arg, low, high, .. } => vec![arg, low, high],
            ExprKind::Bool { args, .. } => args.iter().collect(),
            ExprKind::FuncCall {
                args, named_args, ..
            } => args
                .iter()
                .chain(named_args.iter().map(|(_, e)| e))
                .collect(),
            ExprKind::Row(args) => args.iter().collect(),
            ExprKind::Indirection { arg, .. } => vec![arg],
        }
    }

    /// Post-order traversal.
    pub fn walk<'a>(&'a self, f: &mut dyn FnMut(&'a Expression)) {
        self.walk_pruned(f, &|_| false)
    }

    /// Post-order traversal that does not descend below nodes for which
    /// `prune` is true (the pruned node itself is still visited).
    pub fn walk_pruned<'a>(
        &'a self,
        f: &mut dyn FnMut(&'a Expression),
        prune: &dyn Fn(&Expression) -> bool,
    ) {
        if !prune(self) {
            for child in self.children() {
                child.walk_pruned(f, prune);
            }
        }
        f(self)
    }
}

/// Pure constants folded at parse time.
fn named_constant(name: &str) -> Option<f64> {
    let v = match name {
        "pi" => std::f64::consts::PI,
        "e" => std::f64::consts::E,
        "degree" => 180.0 / std::f64::consts::PI,
        "arcmin" => 60.0 * 180.0 / std::f64::consts::PI,
        "arcsec" => 60.0 * 60.0 * 180.0 / std::f64::consts::PI,
        _ => return None,
    };
    Some(v)
}

/// Lowers `sqlparser` expressions, allocating node ids as it goes.
#[derive(Default)]
pub struct ExprBuilder {
    next_id: NodeId,
}

impl ExprBuilder {
    pub fn new() -> ExprBuilder {
        ExprBuilder::default()
    }

    fn node(&mut self, loc: SourceLoc, kind: ExprKind) -> Expression {
        let id = self.next_id;
        self.next_id += 1;
        Expression { id, loc, kind }
    }

    pub fn lower(&mut self, e: &ast::Expr) -> Result<Expression> {
        let span = e.span();
        let loc = SourceLoc {
            line: span.start.line,
            column: span.start.column,
        };
        let kind = self.lower_kind(e)?;
        Ok(self.node(loc, kind))
    }

    fn lower_kind(&mut self, e: &ast::Expr) -> Result<ExprKind> {
        match e {
            ast::Expr::Value(v) => Ok(ExprKind::Const(lower_literal(&v.value)?)),
            ast::Expr::Identifier(ident) => {
                let name = ident.value.clone();
                if let Some(c) = named_constant(&name) {
                    return Ok(ExprKind::Const(Scalar::Float(c)));
                }
                Ok(ExprKind::ColumnRef(vec![name]))
            }
            ast::Expr::CompoundIdentifier(parts) => {
                let fields: Vec<String> = parts.iter().map(|i| i.value.clone()).collect();
                if fields.len() == 2 && fields[0] == "shared" {
                    return Ok(ExprKind::SharedRef(fields[1].clone()));
                }
                Ok(ExprKind::ColumnRef(fields))
            }
            ast::Expr::Nested(inner) => self.lower_kind(inner),
            ast::Expr::UnaryOp { op, expr } => {
                let arg = self.lower(expr)?;
                match op {
                    ast::UnaryOperator::Plus => Ok(ExprKind::Unary {
                        op: UnaryOp::Plus,
                        arg: Box::new(arg),
                    }),
                    ast::UnaryOperator::Minus => Ok(ExprKind::Unary {
                        op: UnaryOp::Minus,
                        arg: Box::new(arg),
                    }),
                    ast::UnaryOperator::Not => Ok(ExprKind::Bool {
                        op: BoolOp::Not,
                        args: vec![arg],
                    }),
                    other => Err(EngineError::Sql(format!(
                        "unary operator `{}` is not supported",
                        other
                    ))),
                }
            }
            ast::Expr::BinaryOp { left, op, right } => {
                if matches!(op, ast::BinaryOperator::And | ast::BinaryOperator::Or) {
                    let bool_op = if matches!(op, ast::BinaryOperator::And) {
                        BoolOp::And
                    } else {
                        BoolOp::Or
                    };
                    return Ok(ExprKind::Bool {
                        op: bool_op,
                        args: vec![self.lower(left)?, self.lower(right)?],
                    });
                }
                let bin = match op {
                    ast::BinaryOperator::Eq => BinOp::Eq,
                    ast::BinaryOperator::NotEq => BinOp::Ne,
                    ast::BinaryOperator::Lt => BinOp::Lt,
                    ast::BinaryOperator::LtEq => BinOp::Le,
                    ast::BinaryOperator::Gt => BinOp::Gt,
                    ast::BinaryOperator::GtEq => BinOp::Ge,
                    ast::BinaryOperator::Plus => BinOp::Add,
                    ast::BinaryOperator::Minus => BinOp::Sub,
                    ast::BinaryOperator::Multiply => BinOp::Mul,
                    ast::BinaryOperator::Divide => BinOp::Div,
                    ast::BinaryOperator::Modulo => BinOp::Mod,
                    ast::BinaryOperator::DuckIntegerDivide
                    | ast::BinaryOperator::MyIntegerDivide => BinOp::FloorDiv,
                    other => {
                        return Err(EngineError::Sql(format!(
                            "binary operator `{}` is not supported",
                            other
                        )))
                    }
                };
                Ok(ExprKind::Binary {
                    op: bin,
                    left: Box::new(self.lower(left)?),
                    right: Box::new(self.lower(right)?),
                })
            }
            ast::Expr::Between {
                expr,
                negated,
                low,
                high,
            } => Ok(ExprKind::Between {
                arg: Box::new(self.lower(expr)?),
                low: Box::new(self.lower(low)?),
                high: Box::new(self.lower(high)?),
                negated: *negated,
            }),
            ast::Expr::Tuple(items) => {
                if items.is_empty() {
                    return Err(EngineError::Sql("empty row literal".to_string()));
                }
                let args = items
                    .iter()
                    .map(|i| self.lower(i))
                    .collect::<Result<Vec<_>>>()?;
                Ok(ExprKind::Row(args))
            }
            ast::Expr::Function(f) => self.lower_function(f),
            ast::Expr::CompoundFieldAccess { root, access_chain } => {
                self.lower_subscript(root, access_chain)
            }
            other => Err(EngineError::Sql(format!("unsupported syntax: {}", other))),
        }
    }

    fn lower_function(&mut self, f: &ast::Function) -> Result<ExprKind> {
        if f.over.is_some() || f.filter.is_some() || !f.within_group.is_empty() {
            return Err(EngineError::Sql(format!(
                "unsupported function syntax: {}",
                f.name
            )));
        }
        let name = f.name.to_string().to_ascii_lowercase();
        if name.contains('.') {
            return Err(EngineError::Sql(format!(
                "schema-qualified function names are not supported: {}",
                f.name
            )));
        }
        let list = match &f.args {
            ast::FunctionArguments::None => None,
            ast::FunctionArguments::List(list) => Some(list),
            ast::FunctionArguments::Subquery(_) => {
                return Err(EngineError::Sql("subqueries are not supported".to_string()))
            }
        };
        let mut args = Vec::new();
        let mut named_args: Vec<(String, Expression)> = Vec::new();
        let mut agg_star = false;
        if let Some(list) = list {
            if list.duplicate_treatment.is_some() {
                return Err(EngineError::Sql(format!(
                    "DISTINCT/ALL is not supported in function `{}`",
                    name
                )));
            }
            if !list.clauses.is_empty() {
                return Err(EngineError::Sql(format!(
                    "unsupported function clause in `{}`",
                    name
                )));
            }
            for arg in &list.args {
                match arg {
                    ast::FunctionArg::Unnamed(ast::FunctionArgExpr::Wildcard) => {
                        agg_star = true;
                    }
                    ast::FunctionArg::Unnamed(ast::FunctionArgExpr::Expr(e)) => {
                        args.push(self.lower(e)?);
                    }
                    ast::FunctionArg::Named {
                        name: arg_name,
                        arg: ast::FunctionArgExpr::Expr(e),
                        ..
                    } => {
                        let key = arg_name.value.clone();
                        if named_args.iter().any(|(k, _)| *k == key) {
                            return Err(EngineError::Sql(format!(
                                "argument names must be unique for function `{}`",
                                name
                            )));
                        }
                        named_args.push((key, self.lower(e)?));
                    }
                    _ => {
                        return Err(EngineError::Sql(format!(
                            "unsupported argument in function `{}`",
                            name
                        )))
                    }
                }
            }
        }
        Ok(ExprKind::FuncCall {
            name,
            args,
            named_args,
            agg_star,
        })
    }

    fn lower_subscript(
        &mut self,
        root: &ast::Expr,
        access_chain: &[ast::AccessExpr],
    ) -> Result<ExprKind> {
        if access_chain.len() != 1 {
            return Err(EngineError::Sql(
                "nested indices are not supported".to_string(),
            ));
        }
        let index = match &access_chain[0] {
            ast::AccessExpr::Subscript(ast::Subscript::Index { index }) => index,
            ast::AccessExpr::Subscript(ast::Subscript::Slice { .. }) => {
                return Err(EngineError::Sql("slicing is not supported".to_string()))
            }
            ast::AccessExpr::Dot(_) => {
                return Err(EngineError::Sql("unsupported field access".to_string()))
            }
        };
        let idx = match index {
            ast::Expr::Value(v) => match lower_literal(&v.value)? {
                Scalar::Int(i) => i,
                other => {
                    return Err(EngineError::Sql(format!(
                        "index value must be an integer, given: {}",
                        other
                    )))
                }
            },
            _ => {
                return Err(EngineError::Sql(
                    "index value must be an integer constant".to_string(),
                ))
            }
        };
        Ok(ExprKind::Indirection {
            arg: Box::new(self.lower(root)?),
            index: idx,
        })
    }
}

fn lower_literal(v: &ast::Value) -> Result<Scalar> {
    match v {
        ast::Value::Number(repr, _) => {
            if repr.contains(['.', 'e', 'E']) {
                repr.parse::<f64>()
                    .map(Scalar::Float)
                    .map_err(|_| EngineError::Sql(format!("bad numeric literal: {}", repr)))
            } else {
                match repr.parse::<i64>() {
                    Ok(i) => Ok(Scalar::Int(i)),
                    Err(_) => repr
                        .parse::<f64>()
                        .map(Scalar::Float)
                        .map_err(|_| EngineError::Sql(format!("bad numeric literal: {}", repr))),
                }
            }
        }
        ast::Value::Boolean(b) => Ok(Scalar::Bool(*b)),
        ast::Value::SingleQuotedString(s) => Ok(Scalar::Str(s.clone())),
        other => Err(EngineError::Sql(format!("unsupported literal: {}", other))),
    }
}
