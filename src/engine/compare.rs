use std::cmp::Ordering;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::quantity_parser::QuantityParser;

/// Direction of an extreme-value merge
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Extreme {
    Max,
    Min,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CompareError {
    /// One side is numeric and the other is not; usually a mistyped quantity
    #[error("cannot compare {0} with {1}: mixed numeric and non-numeric values")]
    Mixed(String, String),
    /// Neither side is a number or a size tier
    #[error("cannot compare {0} with {1}: values are not ordered")]
    Unordered(String, String),
}

/// Ordinal tiers that may appear as scalar values, e.g. a database `profile`
const TIERS: [&str; 3] = ["small", "medium", "large"];

enum Scalar {
    Tier(usize),
    Number(f64),
    Other,
}

fn scalar(value: &Value) -> Scalar {
    match value {
        Value::Number(n) => n.as_f64().map(Scalar::Number).unwrap_or(Scalar::Other),
        Value::String(s) => {
            if let Some(tier) = TIERS.iter().position(|t| t == s) {
                Scalar::Tier(tier)
            } else {
                Quantity(s.clone())
                    .to_f64()
                    .map(Scalar::Number)
                    .unwrap_or(Scalar::Other)
            }
        }
        _ => Scalar::Other,
    }
}

fn ordering(a: &Value, b: &Value) -> Result<Ordering, CompareError> {
    if a == b {
        return Ok(Ordering::Equal);
    }
    match (scalar(a), scalar(b)) {
        (Scalar::Tier(x), Scalar::Tier(y)) => Ok(x.cmp(&y)),
        (Scalar::Number(x), Scalar::Number(y)) => {
            Ok(x.partial_cmp(&y).unwrap_or(Ordering::Equal))
        }
        (Scalar::Number(_), _) | (_, Scalar::Number(_)) => {
            Err(CompareError::Mixed(a.to_string(), b.to_string()))
        }
        _ => Err(CompareError::Unordered(a.to_string(), b.to_string())),
    }
}

/// Returns `(larger, smaller)`. On a tie `a` is reported as the larger.
pub fn compare<'a>(a: &'a Value, b: &'a Value) -> Result<(&'a Value, &'a Value), CompareError> {
    match ordering(a, b)? {
        Ordering::Less => Ok((b, a)),
        Ordering::Equal | Ordering::Greater => Ok((a, b)),
    }
}

/// Picks the larger or smaller of two scalars. Incomparable input never fails: it is logged
/// and the first operand wins.
pub fn pick<'a>(a: &'a Value, b: &'a Value, extreme: Extreme) -> &'a Value {
    match compare(a, b) {
        Ok((larger, smaller)) => match extreme {
            Extreme::Max => larger,
            Extreme::Min => smaller,
        },
        Err(err @ CompareError::Mixed(..)) => {
            warn!("{err}; keeping {a}");
            a
        }
        Err(err) => {
            debug!("{err}; keeping {a}");
            a
        }
    }
}

/// Leaf-by-leaf equality used for change detection. Numeric leaves are equal when they
/// denote the same quantity (`1Gi` and `1024Mi`).
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(a), Value::Object(b)) => deep_equal_maps(a, b),
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(a, b)| deep_equal(a, b))
        }
        (Value::Object(_), _) | (_, Value::Object(_)) => false,
        (Value::Array(_), _) | (_, Value::Array(_)) => false,
        (a, b) => matches!(ordering(a, b), Ok(Ordering::Equal)),
    }
}

pub fn deep_equal_maps(a: &Map<String, Value>, b: &Map<String, Value>) -> bool {
    a.len() == b.len()
        && a.iter()
            .all(|(key, value)| b.get(key).is_some_and(|other| deep_equal(value, other)))
}
