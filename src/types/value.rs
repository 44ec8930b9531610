use std::fmt;

use serde::{Deserialize, Serialize};

/// Comparison operators usable in rating conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    /// Parse an operator symbol such as `>=`.
    #[must_use]
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "==" => CompareOp::Eq,
            "!=" => CompareOp::Neq,
            ">" => CompareOp::Gt,
            ">=" => CompareOp::Gte,
            "<" => CompareOp::Lt,
            "<=" => CompareOp::Lte,
            _ => return None,
        })
    }

    /// `lhs <op> rhs`. Unordered operands (NaN) satisfy only `!=`.
    #[must_use]
    pub fn holds<T: PartialOrd + ?Sized>(self, lhs: &T, rhs: &T) -> bool {
        match self {
            CompareOp::Eq => lhs == rhs,
            CompareOp::Neq => lhs != rhs,
            CompareOp::Gt => lhs > rhs,
            CompareOp::Gte => lhs >= rhs,
            CompareOp::Lt => lhs < rhs,
            CompareOp::Lte => lhs <= rhs,
        }
    }

    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Neq => "!=",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Payload of a persisted condition, i.e. the `value` half of
/// `{"type": "rating_gt", "value": 10}`.
///
/// Stored rules may come from other writers, so any JSON scalar is accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl Value {
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "{v:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operators_on_integers() {
        assert!(CompareOp::Gt.holds(&51, &50));
        assert!(!CompareOp::Gt.holds(&50, &50));
        assert!(CompareOp::Gte.holds(&50, &50));
        assert!(CompareOp::Lte.holds(&-3, &0));
        assert!(CompareOp::Neq.holds(&1, &2));
        assert!(CompareOp::Eq.holds("ivan", "ivan"));
    }

    #[test]
    fn nan_is_unordered() {
        assert!(!CompareOp::Eq.holds(&f64::NAN, &f64::NAN));
        assert!(!CompareOp::Gte.holds(&f64::NAN, &0.0));
        assert!(CompareOp::Neq.holds(&f64::NAN, &0.0));
    }

    #[test]
    fn symbols_round_trip() {
        for op in [
            CompareOp::Eq,
            CompareOp::Neq,
            CompareOp::Gt,
            CompareOp::Gte,
            CompareOp::Lt,
            CompareOp::Lte,
        ] {
            assert_eq!(CompareOp::from_symbol(op.symbol()), Some(op));
        }
        assert_eq!(CompareOp::from_symbol("=>"), None);
    }

    #[test]
    fn any_json_scalar_is_accepted() {
        let parsed: Vec<Value> = serde_json::from_str(r#"[null, true, 5, 2.5, "x"]"#).unwrap();
        assert_eq!(
            parsed,
            vec![
                Value::Null,
                Value::Bool(true),
                Value::Int(5),
                Value::Float(2.5),
                Value::String("x".into()),
            ]
        );
        assert_eq!(parsed[4].to_string(), "\"x\"");
        assert_eq!(parsed[2].as_int(), Some(5));
        assert_eq!(parsed[4].as_str(), Some("x"));
    }
}
