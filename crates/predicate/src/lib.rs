//! Threshold predicates used by expression evaluation.
//!
//! Each predicate is a union of open intervals on the real line, so
//! intersection is plain interval arithmetic and never recurses into the
//! other predicate.

#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PredicateError {
    #[error("expected threshold function to be one of [{supported}], got {0}", supported = ThresholdFunc::supported())]
    UnsupportedFunc(String),
    #[error("incorrect number of arguments for threshold function '{func}': got {got} but need {need}")]
    Arity { func: ThresholdFunc, got: usize, need: usize },
    #[error("no variable specified to reference for refId {0}")]
    MissingExpression(String),
    #[error("threshold expression requires exactly one condition, got {0}")]
    ConditionCount(usize),
    #[error("malformed threshold expression for refId {ref_id}: {reason}")]
    Malformed { ref_id: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ThresholdFunc {
    #[serde(rename = "gt")]
    IsAbove,
    #[serde(rename = "lt")]
    IsBelow,
    #[serde(rename = "within_range")]
    WithinRange,
    #[serde(rename = "outside_range")]
    OutsideRange,
}

impl ThresholdFunc {
    pub const ALL: [ThresholdFunc; 4] =
        [ThresholdFunc::IsAbove, ThresholdFunc::IsBelow, ThresholdFunc::WithinRange, ThresholdFunc::OutsideRange];

    pub fn as_str(self) -> &'static str {
        match self {
            ThresholdFunc::IsAbove => "gt",
            ThresholdFunc::IsBelow => "lt",
            ThresholdFunc::WithinRange => "within_range",
            ThresholdFunc::OutsideRange => "outside_range",
        }
    }

    /// Number of parameters the function consumes.
    pub fn arity(self) -> usize {
        match self {
            ThresholdFunc::IsAbove | ThresholdFunc::IsBelow => 1,
            ThresholdFunc::WithinRange | ThresholdFunc::OutsideRange => 2,
        }
    }

    fn supported() -> String { Self::ALL.map(|f| f.as_str()).join(", ") }
}

impl fmt::Display for ThresholdFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for ThresholdFunc {
    type Err = PredicateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Self::ALL.into_iter().find(|f| f.as_str() == lower).ok_or_else(|| PredicateError::UnsupportedFunc(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    GreaterThan(f64),
    LessThan(f64),
    WithinRange { left: f64, right: f64 },
    OutsideRange { left: f64, right: f64 },
}

impl Predicate {
    /// Build a predicate from a function and its parameters; extra parameters
    /// are ignored.
    pub fn new(func: ThresholdFunc, params: &[f64]) -> Result<Self, PredicateError> {
        if params.len() < func.arity() {
            return Err(PredicateError::Arity { func, got: params.len(), need: func.arity() });
        }
        Ok(match func {
            ThresholdFunc::IsAbove => Predicate::GreaterThan(params[0]),
            ThresholdFunc::IsBelow => Predicate::LessThan(params[0]),
            ThresholdFunc::WithinRange => Predicate::WithinRange { left: params[0], right: params[1] },
            ThresholdFunc::OutsideRange => Predicate::OutsideRange { left: params[0], right: params[1] },
        })
    }

    pub fn eval(&self, x: f64) -> bool {
        match *self {
            Predicate::GreaterThan(v) => x > v,
            Predicate::LessThan(v) => x < v,
            Predicate::WithinRange { left, right } => x > left && x < right,
            Predicate::OutsideRange { left, right } => x < left || x > right,
        }
    }

    /// The predicate as a union of non-empty open intervals.
    fn intervals(&self) -> Vec<(f64, f64)> {
        let all = match *self {
            Predicate::GreaterThan(v) => vec![(v, f64::INFINITY)],
            Predicate::LessThan(v) => vec![(f64::NEG_INFINITY, v)],
            Predicate::WithinRange { left, right } => vec![(left, right)],
            Predicate::OutsideRange { left, right } => vec![(f64::NEG_INFINITY, left), (right, f64::INFINITY)],
        };
        // NaN bounds compare false and drop out here
        all.into_iter().filter(|(lo, hi)| lo < hi).collect()
    }

    /// Whether some value satisfies both predicates.
    pub fn intersects(&self, other: &Predicate) -> bool {
        let theirs = other.intervals();
        self.intervals()
            .iter()
            .any(|(a_lo, a_hi)| theirs.iter().any(|(b_lo, b_hi)| a_lo.max(*b_lo) < a_hi.min(*b_hi)))
    }
}

#[derive(Debug, Deserialize)]
struct ConditionJson {
    evaluator: EvaluatorJson,
}

#[derive(Debug, Deserialize)]
struct EvaluatorJson {
    #[serde(default)]
    params: Vec<f64>,
    #[serde(rename = "type")]
    kind: String,
}

/// Maps every value of a referenced variable to 1 (predicate holds), 0, or
/// no-data.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdCommand {
    pub ref_id: String,
    pub reference_var: String,
    predicate: Predicate,
}

impl ThresholdCommand {
    pub fn new(
        ref_id: impl Into<String>,
        reference_var: impl Into<String>,
        func: &str,
        params: &[f64],
    ) -> Result<Self, PredicateError> {
        let predicate = Predicate::new(func.parse()?, params)?;
        Ok(Self { ref_id: ref_id.into(), reference_var: reference_var.into(), predicate })
    }

    /// Parse the query body: `{"expression": "A", "conditions": [{"evaluator": {"type": "gt", "params": [5]}}]}`.
    pub fn from_query(ref_id: &str, query: &serde_json::Value) -> Result<Self, PredicateError> {
        let expression = query.get("expression").ok_or_else(|| PredicateError::MissingExpression(ref_id.to_string()))?;
        let reference_var = expression.as_str().ok_or_else(|| PredicateError::Malformed {
            ref_id: ref_id.to_string(),
            reason: format!("expected expression to be a string, got {expression}"),
        })?;
        let conditions: Vec<ConditionJson> = match query.get("conditions") {
            None | Some(serde_json::Value::Null) => Vec::new(),
            Some(raw) => serde_json::from_value(raw.clone())
                .map_err(|e| PredicateError::Malformed { ref_id: ref_id.to_string(), reason: e.to_string() })?,
        };
        // query bodies must use the exact lower-case names
        for c in &conditions {
            if !ThresholdFunc::ALL.iter().any(|f| f.as_str() == c.evaluator.kind) {
                return Err(PredicateError::UnsupportedFunc(c.evaluator.kind.clone()));
            }
        }
        // one condition for now; several could become an OR later
        let [only] = conditions.as_slice() else {
            return Err(PredicateError::ConditionCount(conditions.len()));
        };
        debug!(ref_id, reference_var, func = %only.evaluator.kind, "threshold command parsed");
        Self::new(ref_id, reference_var, &only.evaluator.kind, &only.evaluator.params)
    }

    pub fn predicate(&self) -> &Predicate { &self.predicate }

    pub fn needs_vars(&self) -> Vec<&str> { vec![self.reference_var.as_str()] }

    pub fn execute(&self, values: &[Option<f64>]) -> Vec<Option<f64>> {
        values.iter().map(|v| v.map(|x| if self.predicate.eval(x) { 1.0 } else { 0.0 })).collect()
    }
}
