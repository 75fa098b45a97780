//! The expression AST, the formula language wired into live pipelines.
//!
//! Expressions are long-lived configuration objects: the engine walks the
//! same parsed tree every time a pipeline is (re)built. Reactive-modifier
//! nodes ([`Expr::Distinct`], [`Expr::Debounce`], [`Expr::On`]) therefore
//! carry a [`Label`] cell that is assigned once on first discovery and
//! reused across rebuilds, so a rebuilt pipeline maps onto the same
//! sub-streams instead of creating fresh ones.

use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Negate,
    Not,
}

/// Binary operators. Comparison/equality fall back to enum-value
/// comparison when the operands are not numeric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    And,
    Or,
    Xor,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Add,
    Subtract,
    Multiply,
    Divide,
}

/// Label cell for reactive-modifier nodes.
///
/// Empty until the engine's source discovery assigns one (`distinct1`,
/// `debounce1`, `on1`, …); the assignment sticks for the lifetime of the
/// node and survives cloning, which is what keeps pipeline rebuilds from
/// duplicating sub-streams. Labels are bookkeeping, not identity: they are
/// ignored by equality and skipped by serde.
#[derive(Debug, Clone, Default)]
pub struct Label(Arc<OnceLock<String>>);

impl Label {
    /// The assigned label, if any.
    #[must_use]
    pub fn get(&self) -> Option<&str> {
        self.0.get().map(String::as_str)
    }

    /// Return the assigned label, assigning the result of `make` first
    /// if none was assigned yet.
    pub fn get_or_assign(&self, make: impl FnOnce() -> String) -> &str {
        self.0.get_or_init(make).as_str()
    }
}

impl PartialEq for Label {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

/// A `(condition, result)` arm of a [`Expr::When`] expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhenCase {
    pub cond: Expr,
    pub then: Expr,
}

/// An expression tree node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Expr {
    /// Apply a unary operator.
    Unary { op: UnaryOp, expr: Box<Expr> },
    /// Apply a binary operator.
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    /// Convert a numeric value between units of a quantity.
    Convert {
        expr: Box<Expr>,
        quantity: String,
        from_unit: String,
        to_unit: String,
    },
    /// Two-way conditional; a missing `otherwise` yields an empty emit.
    If {
        cond: Box<Expr>,
        then: Box<Expr>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        otherwise: Option<Box<Expr>>,
    },
    /// First-match multi-way conditional.
    When {
        cases: Vec<WhenCase>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        otherwise: Option<Box<Expr>>,
    },
    /// Capture the value of `then` whenever `sample_on` fires.
    On {
        sample_on: Box<Expr>,
        then: Box<Expr>,
        #[serde(skip)]
        label: Label,
    },
    /// Suppress consecutive near-equal emissions of the inner expression.
    Distinct {
        expr: Box<Expr>,
        #[serde(skip)]
        label: Label,
    },
    /// Trailing-edge debounce of the inner expression.
    Debounce {
        seconds: f64,
        expr: Box<Expr>,
        #[serde(skip)]
        label: Label,
    },
    /// Reference to an observable: `localId`, `deviceId:localId`, or the
    /// device-type wildcard form `>type:localId<`.
    Observable { id: String },
    /// A symbolic literal.
    EnumValue { value: String },
    /// A numeric literal.
    Value { value: f64 },
    /// The empty expression.
    None,
}

impl Expr {
    /// Reference to an observable by id.
    #[must_use]
    pub fn observable(id: impl Into<String>) -> Self {
        Self::Observable { id: id.into() }
    }

    /// Numeric literal.
    #[must_use]
    pub fn value(value: f64) -> Self {
        Self::Value { value }
    }

    /// Symbolic literal.
    #[must_use]
    pub fn enum_value(value: impl Into<String>) -> Self {
        Self::EnumValue {
            value: value.into(),
        }
    }

    /// Binary operation.
    #[must_use]
    pub fn binary(left: Expr, op: BinaryOp, right: Expr) -> Self {
        Self::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    /// Unary operation.
    #[must_use]
    pub fn unary(op: UnaryOp, expr: Expr) -> Self {
        Self::Unary {
            op,
            expr: Box::new(expr),
        }
    }

    /// Two-way conditional.
    #[must_use]
    pub fn if_else(cond: Expr, then: Expr, otherwise: Expr) -> Self {
        Self::If {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Some(Box::new(otherwise)),
        }
    }
}
