use serde::de::DeserializeOwned;
use serde_json::Value;

/// Tri-state view of one field in a partial-update body: absent, explicit
/// `null`, or a value.
#[derive(Debug, Clone, PartialEq)]
pub enum Patch<T> {
    Omitted,
    Null,
    Value(T),
}

impl<T> Patch<T> {
    /// Changeset form for nullable columns.
    pub fn into_nullable(self) -> Option<Option<T>> {
        match self {
            Patch::Omitted => None,
            Patch::Null => Some(None),
            Patch::Value(value) => Some(Some(value)),
        }
    }

    /// Changeset form for non-nullable columns; `null` is rejected.
    pub fn into_required(self, field: &str) -> Result<Option<T>, String> {
        match self {
            Patch::Omitted => Ok(None),
            Patch::Null => Err(format!("{field} cannot be null")),
            Patch::Value(value) => Ok(Some(value)),
        }
    }
}

pub fn patch_field<T: DeserializeOwned>(body: &Value, field: &str) -> Result<Patch<T>, String> {
    match body.get(field) {
        None => Ok(Patch::Omitted),
        Some(Value::Null) => Ok(Patch::Null),
        Some(value) => T::deserialize(value)
            .map(Patch::Value)
            .map_err(|err| format!("invalid {field}: {err}")),
    }
}

/// Like [`patch_field`] for text, trimming and treating blank strings as
/// `null`.
pub fn patch_text(body: &Value, field: &str) -> Result<Patch<String>, String> {
    Ok(match patch_field::<String>(body, field)? {
        Patch::Value(text) if text.trim().is_empty() => Patch::Null,
        Patch::Value(text) => Patch::Value(text.trim().to_string()),
        other => other,
    })
}
