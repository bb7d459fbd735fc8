//! Expression compilation and row evaluation
//!
//! The sqlparser AST is lowered into a small arithmetic tree with column
//! references resolved to positions in a per-expression column list. Binding
//! happens once, against the table schema; evaluation is then a plain
//! recursive walk per row with no name lookups.
//!
//! Everything is computed in `f64`. Comparisons and boolean combinators
//! yield 1.0 / 0.0, and any non-zero value counts as true, which is what the
//! C-style cut syntax expects. Division by zero follows IEEE semantics.

use sqlparser::ast::{
    BinaryOperator, Expr as SqlExpr, FunctionArg, FunctionArgExpr, FunctionArguments,
    UnaryOperator, Value,
};

use crate::storage::column_as_f64;
use crate::{Error, Result};
use arrow::array::BooleanArray;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Func {
    Abs,
    Sqrt,
    Log,
    Exp,
    Pow,
    Min,
    Max,
}

#[derive(Debug, Clone)]
enum Node {
    Const(f64),
    /// Position in [`CompiledExpr::columns`]
    Column(usize),
    Neg(Box<Node>),
    Not(Box<Node>),
    Bin(BinOp, Box<Node>, Box<Node>),
    Call(Func, Vec<Node>),
}

/// An expression bound to a table schema, ready to evaluate.
#[derive(Debug, Clone)]
pub struct CompiledExpr {
    source: String,
    root: Node,
    /// Referenced column names, in first-use order
    columns: Vec<String>,
}

impl CompiledExpr {
    /// The original expression text.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Names of the columns the expression reads.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Evaluate the expression for every row of `batch`.
    ///
    /// # Errors
    /// Returns an error if a referenced column is missing from the batch or
    /// is non-numeric (the batch no longer matches the schema the expression
    /// was compiled against).
    pub fn evaluate(&self, batch: &RecordBatch) -> Result<Vec<f64>> {
        let data: Vec<Vec<f64>> = self
            .columns
            .iter()
            .map(|name| column_as_f64(batch, name))
            .collect::<Result<_>>()?;
        let values = (0..batch.num_rows())
            .map(|row| eval_node(&self.root, &data, row))
            .collect();
        Ok(values)
    }

    /// Evaluate the expression as a boolean row mask (non-zero = selected).
    ///
    /// # Errors
    /// Same conditions as [`CompiledExpr::evaluate`].
    pub fn evaluate_mask(&self, batch: &RecordBatch) -> Result<BooleanArray> {
        let values = self.evaluate(batch)?;
        Ok(values.iter().map(|v| Some(*v != 0.0)).collect())
    }
}

/// Lower a parsed expression, resolving columns against `schema`.
pub(super) fn compile(source: &str, ast: &SqlExpr, schema: &SchemaRef) -> Result<CompiledExpr> {
    let mut columns = Vec::new();
    let root = lower(ast, schema, &mut columns)
        .map_err(|e| prefix_source(source, &e))?;
    Ok(CompiledExpr {
        source: source.to_string(),
        root,
        columns,
    })
}

fn prefix_source(source: &str, err: &Error) -> Error {
    match err {
        Error::Configuration(msg) => {
            Error::Configuration(format!("expression '{source}': {msg}"))
        }
        _ => Error::Configuration(format!("expression '{source}': {err}")),
    }
}

fn lower(expr: &SqlExpr, schema: &SchemaRef, columns: &mut Vec<String>) -> Result<Node> {
    match expr {
        SqlExpr::Identifier(ident) => {
            let name = ident.value.as_str();
            if schema.fields().iter().all(|f| f.name() != name) {
                return Err(Error::Configuration(format!(
                    "column '{name}' not found in schema"
                )));
            }
            let pos = match columns.iter().position(|c| c == name) {
                Some(pos) => pos,
                None => {
                    columns.push(name.to_string());
                    columns.len() - 1
                }
            };
            Ok(Node::Column(pos))
        }
        SqlExpr::Value(Value::Number(text, _)) => text
            .parse::<f64>()
            .map(Node::Const)
            .map_err(|_| Error::Configuration(format!("invalid numeric literal '{text}'"))),
        SqlExpr::Value(Value::Boolean(b)) => Ok(Node::Const(if *b { 1.0 } else { 0.0 })),
        SqlExpr::Nested(inner) => lower(inner, schema, columns),
        SqlExpr::UnaryOp { op, expr } => {
            let inner = lower(expr, schema, columns)?;
            match op {
                UnaryOperator::Minus => Ok(Node::Neg(Box::new(inner))),
                UnaryOperator::Plus => Ok(inner),
                UnaryOperator::Not => Ok(Node::Not(Box::new(inner))),
                other => Err(Error::Configuration(format!(
                    "unsupported unary operator '{other}'"
                ))),
            }
        }
        SqlExpr::BinaryOp { left, op, right } => {
            let op = lower_binop(op)?;
            let left = lower(left, schema, columns)?;
            let right = lower(right, schema, columns)?;
            Ok(Node::Bin(op, Box::new(left), Box::new(right)))
        }
        SqlExpr::Function(function) => {
            let name = function.name.to_string().to_lowercase();
            let (func, arity) = match name.as_str() {
                "fabs" | "abs" => (Func::Abs, 1),
                "sqrt" => (Func::Sqrt, 1),
                "log" => (Func::Log, 1),
                "exp" => (Func::Exp, 1),
                "pow" => (Func::Pow, 2),
                "min" => (Func::Min, 2),
                "max" => (Func::Max, 2),
                other => {
                    return Err(Error::Configuration(format!(
                        "unknown function '{other}'"
                    )))
                }
            };
            let args = function_args(function)?;
            if args.len() != arity {
                return Err(Error::Configuration(format!(
                    "function '{name}' takes {arity} argument(s), got {}",
                    args.len()
                )));
            }
            let lowered = args
                .iter()
                .map(|arg| lower(arg, schema, columns))
                .collect::<Result<Vec<_>>>()?;
            Ok(Node::Call(func, lowered))
        }
        other => Err(Error::Configuration(format!(
            "unsupported construct '{other}'"
        ))),
    }
}

fn lower_binop(op: &BinaryOperator) -> Result<BinOp> {
    match op {
        BinaryOperator::Plus => Ok(BinOp::Add),
        BinaryOperator::Minus => Ok(BinOp::Sub),
        BinaryOperator::Multiply => Ok(BinOp::Mul),
        BinaryOperator::Divide => Ok(BinOp::Div),
        BinaryOperator::Modulo => Ok(BinOp::Rem),
        BinaryOperator::Eq => Ok(BinOp::Eq),
        BinaryOperator::NotEq => Ok(BinOp::Ne),
        BinaryOperator::Lt => Ok(BinOp::Lt),
        BinaryOperator::LtEq => Ok(BinOp::LtEq),
        BinaryOperator::Gt => Ok(BinOp::Gt),
        BinaryOperator::GtEq => Ok(BinOp::GtEq),
        BinaryOperator::And => Ok(BinOp::And),
        BinaryOperator::Or => Ok(BinOp::Or),
        other => Err(Error::Configuration(format!(
            "unsupported operator '{other}'"
        ))),
    }
}

fn function_args(function: &sqlparser::ast::Function) -> Result<Vec<&SqlExpr>> {
    let FunctionArguments::List(list) = &function.args else {
        return Err(Error::Configuration(format!(
            "function '{}' requires an argument list",
            function.name
        )));
    };
    list.args
        .iter()
        .map(|arg| match arg {
            FunctionArg::Unnamed(FunctionArgExpr::Expr(expr)) => Ok(expr),
            other => Err(Error::Configuration(format!(
                "unsupported function argument '{other}'"
            ))),
        })
        .collect()
}

const fn truth(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

fn eval_node(node: &Node, data: &[Vec<f64>], row: usize) -> f64 {
    match node {
        Node::Const(value) => *value,
        Node::Column(pos) => data[*pos][row],
        Node::Neg(inner) => -eval_node(inner, data, row),
        Node::Not(inner) => {
            if eval_node(inner, data, row) == 0.0 {
                1.0
            } else {
                0.0
            }
        }
        Node::Bin(op, left, right) => {
            let l = eval_node(left, data, row);
            // short-circuit the boolean combinators
            match op {
                BinOp::And => {
                    return if l != 0.0 && eval_node(right, data, row) != 0.0 {
                        1.0
                    } else {
                        0.0
                    }
                }
                BinOp::Or => {
                    return if l != 0.0 || eval_node(right, data, row) != 0.0 {
                        1.0
                    } else {
                        0.0
                    }
                }
                _ => {}
            }
            let r = eval_node(right, data, row);
            match op {
                BinOp::Add => l + r,
                BinOp::Sub => l - r,
                BinOp::Mul => l * r,
                BinOp::Div => l / r,
                BinOp::Rem => l % r,
                BinOp::Eq => truth(l == r),
                BinOp::Ne => truth(l != r),
                BinOp::Lt => truth(l < r),
                BinOp::LtEq => truth(l <= r),
                BinOp::Gt => truth(l > r),
                BinOp::GtEq => truth(l >= r),
                BinOp::And | BinOp::Or => unreachable!("handled above"),
            }
        }
        Node::Call(func, args) => {
            let a = eval_node(&args[0], data, row);
            match func {
                Func::Abs => a.abs(),
                Func::Sqrt => a.sqrt(),
                Func::Log => a.ln(),
                Func::Exp => a.exp(),
                Func::Pow => a.powf(eval_node(&args[1], data, row)),
                Func::Min => a.min(eval_node(&args[1], data, row)),
                Func::Max => a.max(eval_node(&args[1], data, row)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::Expression;
    use arrow::array::{Float64Array, RecordBatch};
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    fn batch(a: Vec<f64>, b: Vec<f64>) -> RecordBatch {
        let schema = Schema::new(vec![
            Field::new("a", DataType::Float64, false),
            Field::new("b", DataType::Float64, false),
        ]);
        RecordBatch::try_new(
            Arc::new(schema),
            vec![
                Arc::new(Float64Array::from(a)),
                Arc::new(Float64Array::from(b)),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_column_reuse_binds_once() {
        let data = batch(vec![2.0], vec![3.0]);
        let expr = Expression::parse("a * a + b").unwrap();
        let compiled = expr.compile(&data.schema()).unwrap();
        assert_eq!(compiled.columns(), ["a", "b"]);
        assert_eq!(compiled.evaluate(&data).unwrap(), vec![7.0]);
    }

    #[test]
    fn test_division_follows_ieee() {
        let data = batch(vec![1.0, 0.0], vec![0.0, 0.0]);
        let expr = Expression::parse("a / b").unwrap();
        let compiled = expr.compile(&data.schema()).unwrap();
        let values = compiled.evaluate(&data).unwrap();
        assert!(values[0].is_infinite());
        assert!(values[1].is_nan());
    }

    #[test]
    fn test_modulo() {
        let data = batch(vec![7.0], vec![4.0]);
        let expr = Expression::parse("a % b").unwrap();
        let compiled = expr.compile(&data.schema()).unwrap();
        assert_eq!(compiled.evaluate(&data).unwrap(), vec![3.0]);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Comparisons and combinators only ever produce 0 or 1.
            #[test]
            fn prop_predicates_are_boolean(
                a in proptest::collection::vec(-1e3f64..1e3, 1..50),
                b in proptest::collection::vec(-1e3f64..1e3, 1..50),
            ) {
                let n = a.len().min(b.len());
                let data = batch(a[..n].to_vec(), b[..n].to_vec());
                let expr = Expression::parse("a < b || a == b && !(a > 0)").unwrap();
                let compiled = expr.compile(&data.schema()).unwrap();
                for v in compiled.evaluate(&data).unwrap() {
                    prop_assert!(v == 0.0 || v == 1.0);
                }
            }

            /// Arithmetic evaluation agrees with direct computation.
            #[test]
            fn prop_arithmetic_matches_reference(
                a in proptest::collection::vec(-1e3f64..1e3, 1..50),
                b in proptest::collection::vec(1e-3f64..1e3, 1..50),
            ) {
                let n = a.len().min(b.len());
                let data = batch(a[..n].to_vec(), b[..n].to_vec());
                let expr = Expression::parse("fabs(a) / b + min(a, b)").unwrap();
                let compiled = expr.compile(&data.schema()).unwrap();
                let values = compiled.evaluate(&data).unwrap();
                for (i, v) in values.iter().enumerate() {
                    let want = a[i].abs() / b[i] + a[i].min(b[i]);
                    prop_assert!((v - want).abs() < 1e-9);
                }
            }
        }
    }
}
