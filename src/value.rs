//! Dynamic tagged value model (spec.md §3, §4.1).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ArchetypeError, Location};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Null,
    Bool,
    Int,
    String,
    StringList,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    String(String),
    StringList(Vec<String>),
}

impl Value {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    #[must_use]
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Null,
            Value::Bool(_) => ValueType::Bool,
            Value::Int(_) => ValueType::Int,
            Value::String(_) => ValueType::String,
            Value::StringList(_) => ValueType::StringList,
        }
    }

    /// Parses a comma-separated string into a `StringList`: trims whitespace,
    /// drops empties, and treats the literal `"none"` as the empty list.
    #[must_use]
    pub fn parse_string_list(raw: &str) -> Vec<String> {
        if raw.trim().eq_ignore_ascii_case("none") {
            return Vec::new();
        }
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToOwned::to_owned)
            .collect()
    }

    /// Parses `true/yes/y/on` vs `false/no/n/off`, case-insensitively.
    pub fn parse_bool(raw: &str) -> Option<bool> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "y" | "on" => Some(true),
            "false" | "no" | "n" | "off" => Some(false),
            _ => None,
        }
    }

    fn type_error(&self, to: ValueType) -> ArchetypeError {
        ArchetypeError::ValueTypeError {
            loc: Location::unknown(),
            from: self.value_type(),
            to,
        }
    }

    pub fn as_bool(&self) -> Result<bool, ArchetypeError> {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::String(s) => Value::parse_bool(s).ok_or_else(|| self.type_error(ValueType::Bool)),
            _ => Err(self.type_error(ValueType::Bool)),
        }
    }

    pub fn as_int(&self) -> Result<i64, ArchetypeError> {
        match self {
            Value::Int(n) => Ok(*n),
            Value::String(s) => s.trim().parse().map_err(|_| self.type_error(ValueType::Int)),
            _ => Err(self.type_error(ValueType::Int)),
        }
    }

    pub fn as_string(&self) -> Result<String, ArchetypeError> {
        match self {
            Value::String(s) => Ok(s.clone()),
            Value::Bool(b) => Ok(b.to_string()),
            Value::Int(n) => Ok(n.to_string()),
            Value::StringList(xs) if xs.len() == 1 => Ok(xs[0].clone()),
            Value::StringList(xs) => Ok(xs.join(",")),
            Value::Null => Err(self.type_error(ValueType::String)),
        }
    }

    pub fn as_list(&self) -> Result<Vec<String>, ArchetypeError> {
        match self {
            Value::StringList(xs) => Ok(xs.clone()),
            Value::String(s) => Ok(Value::parse_string_list(s)),
            _ => Err(self.type_error(ValueType::StringList)),
        }
    }

    /// Value-identity equality: cross-type is `false`, except a `String`
    /// matching a single-element `StringList` (spec.md §4.1).
    #[must_use]
    pub fn values_equal(a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::String(s), Value::StringList(xs)) | (Value::StringList(xs), Value::String(s)) => {
                xs.len() == 1 && &xs[0] == s
            }
            _ => a == b,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "{s}"),
            Value::StringList(xs) => write!(f, "{}", xs.join(",")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_list_round_trip() {
        let xs = vec!["a".to_string(), "b".to_string()];
        let v = Value::StringList(xs.clone());
        assert_eq!(v.as_list().unwrap(), xs);
    }

    #[test]
    fn string_list_parses_none_as_empty() {
        assert!(Value::parse_string_list("none").is_empty());
    }

    #[test]
    fn string_list_trims_and_drops_empties() {
        assert_eq!(
            Value::parse_string_list(" a, , b ,"),
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn bool_accepts_aliases() {
        assert_eq!(Value::parse_bool("YES"), Some(true));
        assert_eq!(Value::parse_bool("off"), Some(false));
        assert_eq!(Value::parse_bool("maybe"), None);
    }

    #[test]
    fn equals_string_vs_singleton_list() {
        let a = Value::String("x".into());
        let b = Value::StringList(vec!["x".into()]);
        assert!(Value::values_equal(&a, &b));
        let c = Value::StringList(vec!["x".into(), "y".into()]);
        assert!(!Value::values_equal(&a, &c));
    }

    #[test]
    fn cross_type_equality_is_false() {
        assert!(!Value::values_equal(&Value::Int(1), &Value::Bool(true)));
    }

    #[test]
    fn coercion_error_is_typed() {
        let err = Value::Null.as_bool().unwrap_err();
        assert!(matches!(err, ArchetypeError::ValueTypeError { .. }));
    }
}
