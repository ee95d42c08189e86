//! Lookups over a contract's variable set.

use crate::types::{ScValue, ScVariable};

/// Keys split by type, as returned by the lookup helpers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitValues {
    pub strings: Vec<String>,
    pub uint64s: Vec<u64>,
}

impl SplitValues {
    fn push(&mut self, v: &ScValue) {
        match v {
            ScValue::Uint64(n) => self.uint64s.push(*n),
            ScValue::String(s) => self.strings.push(s.clone()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty() && self.uint64s.is_empty()
    }
}

/// Keys whose value equals `value` (same type and content).
pub fn keys_by_value(variables: &[ScVariable], value: &ScValue) -> SplitValues {
    let mut out = SplitValues::default();
    for v in variables.iter().filter(|v| &v.value == value) {
        out.push(&v.key);
    }
    out
}

/// Values stored under `key` (same type and content).
pub fn values_by_key(variables: &[ScVariable], key: &ScValue) -> SplitValues {
    let mut out = SplitValues::default();
    for v in variables.iter().filter(|v| &v.key == key) {
        out.push(&v.value);
    }
    out
}

/// Every key, split by type.
pub fn convert_keys(variables: &[ScVariable]) -> SplitValues {
    let mut out = SplitValues::default();
    for v in variables {
        out.push(&v.key);
    }
    out
}

/// Every value, split by type.
pub fn convert_values(variables: &[ScVariable]) -> SplitValues {
    let mut out = SplitValues::default();
    for v in variables {
        out.push(&v.value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> Vec<ScVariable> {
        vec![
            ScVariable::new("owner", "dero1alice"),
            ScVariable::new("admin", "dero1alice"),
            ScVariable::new(7u64, "dero1alice"),
            ScVariable::new("supply", 1000u64),
            ScVariable::new(8u64, 1000u64),
        ]
    }

    #[test]
    fn lookup_keys_by_string_value() {
        let out = keys_by_value(&vars(), &ScValue::from("dero1alice"));
        assert_eq!(out.strings, vec!["owner", "admin"]);
        assert_eq!(out.uint64s, vec![7]);
    }

    #[test]
    fn lookup_keys_by_numeric_value_ignores_strings() {
        let out = keys_by_value(&vars(), &ScValue::Uint64(1000));
        assert_eq!(out.strings, vec!["supply"]);
        assert_eq!(out.uint64s, vec![8]);
    }

    #[test]
    fn lookup_values_by_key() {
        let out = values_by_key(&vars(), &ScValue::from("supply"));
        assert_eq!(out.uint64s, vec![1000]);
        assert!(out.strings.is_empty());
        assert!(values_by_key(&vars(), &ScValue::from("missing")).is_empty());
    }

    #[test]
    fn convert_splits_by_type() {
        let keys = convert_keys(&vars());
        assert_eq!(keys.strings.len(), 3);
        assert_eq!(keys.uint64s, vec![7, 8]);
        let values = convert_values(&vars());
        assert_eq!(values.strings.len(), 3);
        assert_eq!(values.uint64s, vec![1000, 1000]);
    }
}
