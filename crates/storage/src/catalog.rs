//! Conversation table discovery.
//!
//! Table names cannot be bound as query parameters, so every name that ends
//! up interpolated into SQL goes through [`TableName`], which can only be
//! obtained from the store's own metadata listing.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use tracing::{debug, warn};

use crate::{Error, MessageStore, Result};

/// Prefix shared by every conversation table.
pub const TABLE_PREFIX: &str = "Msg_";

/// A conversation table name that was listed by the catalog and passed
/// identifier validation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct TableName(String);

impl TableName {
    /// Validate a raw name from the metadata catalog.
    pub(crate) fn from_catalog(name: String) -> Result<Self> {
        if is_valid_table_name(&name) {
            Ok(Self(name))
        } else {
            Err(Error::InvalidTableName(name))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The name quoted for use as an SQL identifier.
    pub(crate) fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TableName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn is_valid_table_name(name: &str) -> bool {
    match name.strip_prefix(TABLE_PREFIX) {
        Some(rest) => {
            !rest.is_empty() && rest.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}

/// Tables present in `current` but not in `previous`.
pub fn discover_new(
    previous: &BTreeSet<TableName>,
    current: &BTreeSet<TableName>,
) -> BTreeSet<TableName> {
    current.difference(previous).cloned().collect()
}

/// Tracks the set of known conversation tables.
#[derive(Debug, Default)]
pub struct SchemaCatalog {
    known: BTreeSet<TableName>,
}

impl SchemaCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// List every conversation table currently in the store.
    ///
    /// Names that match the prefix but fail validation are skipped and logged.
    pub fn list_conversation_tables(store: &MessageStore) -> Result<BTreeSet<TableName>> {
        let names = store.table_names_with_prefix(TABLE_PREFIX)?;
        let mut tables = BTreeSet::new();
        for name in names {
            match TableName::from_catalog(name) {
                Ok(table) => {
                    tables.insert(table);
                }
                Err(e) => warn!(error = %e, "skipping conversation table"),
            }
        }
        Ok(tables)
    }

    /// Re-list the store and return the tables not seen before.
    pub fn refresh(&mut self, store: &MessageStore) -> Result<BTreeSet<TableName>> {
        let current = Self::list_conversation_tables(store)?;
        let new = discover_new(&self.known, &current);
        if !new.is_empty() {
            debug!(count = new.len(), "discovered conversation tables");
        }
        // Tables are never dropped at runtime; keep anything seen before.
        self.known.extend(current);
        Ok(new)
    }

    pub fn tables(&self) -> &BTreeSet<TableName> {
        &self.known
    }

    pub fn contains(&self, name: &str) -> bool {
        self.known.iter().any(|t| t.as_str() == name)
    }

    /// Look up a user-supplied name against the known tables.
    pub fn lookup(&self, name: &str) -> Result<TableName> {
        self.known
            .iter()
            .find(|t| t.as_str() == name)
            .cloned()
            .ok_or_else(|| Error::UnknownTable(name.to_string()))
    }
}
