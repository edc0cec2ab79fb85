use std::collections::HashMap;

use crate::models::Table;

/// A table reference as it shows up on the wire: a numeric id, or text that
/// may or may not hold one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableRef<'a> {
    Id(i32),
    Text(&'a str),
}

impl From<i32> for TableRef<'_> {
    fn from(value: i32) -> Self {
        TableRef::Id(value)
    }
}

impl<'a> From<&'a str> for TableRef<'a> {
    fn from(value: &'a str) -> Self {
        match value.trim().parse::<i32>() {
            Ok(id) => TableRef::Id(id),
            Err(_) => TableRef::Text(value),
        }
    }
}

/// Numeric table id to join code, built from one table list. Rebuild it
/// whenever that list changes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdentityMapper {
    codes: HashMap<i32, String>,
}

impl IdentityMapper {
    pub fn from_tables<'a, I>(tables: I) -> Self
    where
        I: IntoIterator<Item = &'a Table>,
    {
        Self {
            codes: tables
                .into_iter()
                .map(|table| (table.id, table.join_code.clone()))
                .collect(),
        }
    }

    pub fn lookup(&self, id: i32) -> Option<&str> {
        self.codes.get(&id).map(String::as_str)
    }

    /// Join code when known, otherwise the reference rendered as-is.
    pub fn resolve<'a>(&self, id: impl Into<TableRef<'a>>) -> String {
        match id.into() {
            TableRef::Id(id) => self
                .lookup(id)
                .map(str::to_string)
                .unwrap_or_else(|| id.to_string()),
            TableRef::Text(text) => text.to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}
