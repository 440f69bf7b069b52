//! Dynamic ERP record shape (§9 Design Notes).
//!
//! Upstream returns heterogeneous values for many-to-one fields: `false`
//! when absent, or a `[id, display_name]` tuple when present. We model this
//! as a sum type at the boundary instead of passing untyped JSON further in.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A many-to-one reference field as returned by the ERP's RPC layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Ref {
    /// `false`: the field is not set on this record.
    None,
    /// A bare id with no display name attached.
    Id(i64),
    /// The common case: `[id, display_name]`.
    IdName(i64, String),
}

impl Ref {
    /// Parse a raw JSON value as it arrives from `search_read`/`read`.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Array(items) => {
                let id = items.first().and_then(Value::as_i64);
                let name = items.get(1).and_then(Value::as_str).map(str::to_owned);
                match (id, name) {
                    (Some(id), Some(name)) => Self::IdName(id, name),
                    (Some(id), None) => Self::Id(id),
                    _ => Self::None,
                }
            }
            Value::Number(n) => n.as_i64().map_or(Self::None, Self::Id),
            _ => Self::None,
        }
    }

    #[must_use]
    pub fn id(&self) -> Option<i64> {
        match self {
            Self::None => None,
            Self::Id(id) | Self::IdName(id, _) => Some(*id),
        }
    }

    /// The display name, or `""` when absent (matches the webhook payload's
    /// "absent string fields are empty" rule, §6).
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::IdName(_, name) => name,
            _ => "",
        }
    }

    #[must_use]
    pub fn is_present(&self) -> bool {
        !matches!(self, Self::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_false_as_none() {
        assert_eq!(Ref::from_value(&json!(false)), Ref::None);
    }

    #[test]
    fn parses_id_name_tuple() {
        let r = Ref::from_value(&json!([42, "Acme Corp"]));
        assert_eq!(r.id(), Some(42));
        assert_eq!(r.name(), "Acme Corp");
    }

    #[test]
    fn parses_bare_scalar_id() {
        let r = Ref::from_value(&json!(7));
        assert_eq!(r.id(), Some(7));
        assert_eq!(r.name(), "");
    }

    #[test]
    fn absent_name_is_empty_string() {
        assert_eq!(Ref::None.name(), "");
        assert!(!Ref::None.is_present());
    }
}
