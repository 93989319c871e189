//! Per-table delivery cursors.

use std::collections::BTreeMap;

use storage::TableName;

/// Lifecycle of a tracked table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableState {
    /// Discovered during the current poll; not queried until the next one.
    Initializing,
    /// Queried on every poll that sees a change.
    Watching,
}

#[derive(Debug, Clone, Copy)]
struct Tracked {
    cursor: i64,
    state: TableState,
}

/// Highest delivered local id per conversation table.
///
/// Cursors only move forward.
#[derive(Debug, Default)]
pub struct CursorTracker {
    tables: BTreeMap<TableName, Tracked>,
}

impl CursorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `table` at `cursor`. Already tracked tables are left
    /// untouched.
    pub fn track(&mut self, table: TableName, cursor: i64, state: TableState) {
        self.tables.entry(table).or_insert(Tracked { cursor, state });
    }

    pub fn cursor(&self, table: &TableName) -> Option<i64> {
        self.tables.get(table).map(|t| t.cursor)
    }

    pub fn state(&self, table: &TableName) -> Option<TableState> {
        self.tables.get(table).map(|t| t.state)
    }

    /// Move the cursor of `table` to `local_id`. Returns `false` (and leaves
    /// the cursor alone) when `local_id` is not past it.
    pub fn advance(&mut self, table: &TableName, local_id: i64) -> bool {
        match self.tables.get_mut(table) {
            Some(tracked) if local_id > tracked.cursor => {
                tracked.cursor = local_id;
                true
            }
            _ => false,
        }
    }

    /// Tables being watched, with their cursors.
    pub fn watching(&self) -> Vec<(TableName, i64)> {
        self.tables
            .iter()
            .filter(|(_, t)| t.state == TableState::Watching)
            .map(|(name, t)| (name.clone(), t.cursor))
            .collect()
    }

    pub fn has_initializing(&self) -> bool {
        self.tables
            .values()
            .any(|t| t.state == TableState::Initializing)
    }

    /// Move every initializing table to watching. Returns how many moved.
    pub fn promote_initializing(&mut self) -> usize {
        let mut promoted = 0;
        for tracked in self.tables.values_mut() {
            if tracked.state == TableState::Initializing {
                tracked.state = TableState::Watching;
                promoted += 1;
            }
        }
        promoted
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
