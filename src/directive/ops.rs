//! Arithmetic binary-operator directives.

use serde_json::{Map, Number, Value};

use crate::context::Context;
use crate::directive::TemplateDirective;
use crate::error::MetadataMapperError;
use crate::source::SourceMap;

/// The operation a [`BinOp`] node performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Add,
    Sub,
    Mul,
    TrueDiv,
    FloorDiv,
}

impl Op {
    fn verb(self) -> &'static str {
        match self {
            Op::Add => "add",
            Op::Sub => "subtract",
            Op::Mul => "multiply",
            Op::TrueDiv | Op::FloorDiv => "divide",
        }
    }
}

/// A binary operation over two already-resolved operand values.
///
/// `add` also concatenates strings and arrays; the other operators are
/// numeric only. `truediv` always produces a float; `floordiv` floors
/// (yielding an integer for integer operands).
#[derive(Debug)]
pub struct BinOp {
    op: Op,
    left: Value,
    right: Value,
}

impl BinOp {
    fn build(
        op: Op,
        params: &Map<String, Value>,
    ) -> Result<Box<dyn TemplateDirective>, MetadataMapperError> {
        let operand = |name: &str| {
            params
                .get(name)
                .cloned()
                .ok_or_else(|| MetadataMapperError::Directive(format!("missing key: '{name}'")))
        };
        Ok(Box::new(Self {
            op,
            left: operand("left")?,
            right: operand("right")?,
        }))
    }

    fn type_error(&self) -> MetadataMapperError {
        MetadataMapperError::Directive(format!(
            "cannot {} '{}' and '{}'",
            self.op.verb(),
            crate::value::json_type_name(&self.left),
            crate::value::json_type_name(&self.right),
        ))
    }
}

macro_rules! binop_factory {
    ($name:ident, $op:expr) => {
        pub(super) fn $name(
            _context: &Context,
            _sources: &SourceMap,
            params: &Map<String, Value>,
        ) -> Result<Box<dyn TemplateDirective>, MetadataMapperError> {
            BinOp::build($op, params)
        }
    };
}

binop_factory!(build_add, Op::Add);
binop_factory!(build_sub, Op::Sub);
binop_factory!(build_mul, Op::Mul);
binop_factory!(build_truediv, Op::TrueDiv);
binop_factory!(build_floordiv, Op::FloorDiv);

impl TemplateDirective for BinOp {
    fn call(&self, _sources: &SourceMap) -> Result<Value, MetadataMapperError> {
        match (&self.left, &self.right) {
            (Value::Number(l), Value::Number(r)) => numeric(self.op, l, r, || self.type_error()),
            (Value::String(l), Value::String(r)) if self.op == Op::Add => {
                Ok(Value::String(format!("{l}{r}")))
            }
            (Value::Array(l), Value::Array(r)) if self.op == Op::Add => {
                let mut items = l.clone();
                items.extend(r.iter().cloned());
                Ok(Value::Array(items))
            }
            _ => Err(self.type_error()),
        }
    }
}

fn numeric(
    op: Op,
    left: &Number,
    right: &Number,
    type_error: impl Fn() -> MetadataMapperError,
) -> Result<Value, MetadataMapperError> {
    // Integer operands stay integral except under true division.
    if let (Some(l), Some(r)) = (left.as_i64(), right.as_i64()) {
        let result = match op {
            Op::Add => l.checked_add(r),
            Op::Sub => l.checked_sub(r),
            Op::Mul => l.checked_mul(r),
            Op::TrueDiv => return float_op(op, l as f64, r as f64),
            Op::FloorDiv => {
                if r == 0 {
                    return Err(MetadataMapperError::Directive(
                        "division by zero".to_string(),
                    ));
                }
                Some(floor_div(l, r))
            }
        };
        return result
            .map(Value::from)
            .ok_or_else(|| MetadataMapperError::Directive("integer overflow".to_string()));
    }

    match (left.as_f64(), right.as_f64()) {
        (Some(l), Some(r)) => float_op(op, l, r),
        _ => Err(type_error()),
    }
}

fn float_op(op: Op, left: f64, right: f64) -> Result<Value, MetadataMapperError> {
    if matches!(op, Op::TrueDiv | Op::FloorDiv) && right == 0.0 {
        return Err(MetadataMapperError::Directive(
            "division by zero".to_string(),
        ));
    }

    let result = match op {
        Op::Add => left + right,
        Op::Sub => left - right,
        Op::Mul => left * right,
        Op::TrueDiv => left / right,
        Op::FloorDiv => (left / right).floor(),
    };

    Number::from_f64(result)
        .map(Value::Number)
        .ok_or_else(|| MetadataMapperError::Directive(format!("non-finite result {result}")))
}

/// Floor division rounding toward negative infinity.
fn floor_div(left: i64, right: i64) -> i64 {
    let quotient = left / right;
    let remainder = left % right;
    if remainder != 0 && (remainder < 0) != (right < 0) {
        quotient - 1
    } else {
        quotient
    }
}
