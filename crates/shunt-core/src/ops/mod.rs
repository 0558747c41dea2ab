//! Elementwise unary operations.
//!
//! Every op is reachable three ways: the free functions in this module,
//! the `Tensor` methods (`t.lgamma()`), and the in-place methods
//! (`t.lgamma_()`). All three go through [`crate::dispatch::current`], so an
//! override registered for an op applies to every call site.

use std::fmt;
use std::str::FromStr;

use crate::dispatch;
use crate::tensor::Tensor;
use crate::{Result, ShuntError};

pub mod special;
pub(crate) mod unary;

/// Identifier of a dispatchable unary op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum UnaryOp {
    /// Natural log of the absolute value of the gamma function.
    Lgamma,
    Exp,
    Log,
    Sqrt,
    Abs,
    Neg,
}

impl UnaryOp {
    pub const ALL: [UnaryOp; 6] = [
        UnaryOp::Lgamma,
        UnaryOp::Exp,
        UnaryOp::Log,
        UnaryOp::Sqrt,
        UnaryOp::Abs,
        UnaryOp::Neg,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            UnaryOp::Lgamma => "lgamma",
            UnaryOp::Exp => "exp",
            UnaryOp::Log => "log",
            UnaryOp::Sqrt => "sqrt",
            UnaryOp::Abs => "abs",
            UnaryOp::Neg => "neg",
        }
    }

    /// Scalar evaluation in double precision.
    pub fn eval(&self, x: f64) -> f64 {
        match self {
            UnaryOp::Lgamma => special::ln_gamma(x),
            UnaryOp::Exp => x.exp(),
            UnaryOp::Log => x.ln(),
            UnaryOp::Sqrt => x.sqrt(),
            UnaryOp::Abs => x.abs(),
            UnaryOp::Neg => -x,
        }
    }

    /// Scalar evaluation in single precision.
    pub fn eval_f32(&self, x: f32) -> f32 {
        match self {
            UnaryOp::Lgamma => special::ln_gamma(x as f64) as f32,
            UnaryOp::Exp => x.exp(),
            UnaryOp::Log => x.ln(),
            UnaryOp::Sqrt => x.sqrt(),
            UnaryOp::Abs => x.abs(),
            UnaryOp::Neg => -x,
        }
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for UnaryOp {
    type Err = ShuntError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        UnaryOp::ALL
            .into_iter()
            .find(|op| op.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ShuntError::UnknownName {
                kind: "op",
                value: s.to_string(),
            })
    }
}

/// Element-wise log-gamma: `ln |Γ(x)|`.
pub fn lgamma(input: &Tensor) -> Result<Tensor> {
    unary(UnaryOp::Lgamma, input)
}

/// Element-wise exponential.
pub fn exp(input: &Tensor) -> Result<Tensor> {
    unary(UnaryOp::Exp, input)
}

/// Element-wise natural logarithm.
pub fn log(input: &Tensor) -> Result<Tensor> {
    unary(UnaryOp::Log, input)
}

/// Element-wise square root.
pub fn sqrt(input: &Tensor) -> Result<Tensor> {
    unary(UnaryOp::Sqrt, input)
}

/// Element-wise absolute value.
pub fn abs(input: &Tensor) -> Result<Tensor> {
    unary(UnaryOp::Abs, input)
}

/// Element-wise negation.
pub fn neg(input: &Tensor) -> Result<Tensor> {
    unary(UnaryOp::Neg, input)
}

/// Apply `op` through the dispatch table active on this thread.
pub fn unary(op: UnaryOp, input: &Tensor) -> Result<Tensor> {
    dispatch::current().call_unary(op, input)
}
