//! Durable set of users the operator has singled out.
//!
//! The selection is the one piece of console state that must survive a
//! restart. It persists as a plain JSON array of user ids under
//! [`SELECTION_KEY`], written in full on every toggle.

use tracing::warn;
use wd_core::UserId;

use crate::persist::{LocalStore, PersistResult, SELECTION_KEY};

/// Insertion-ordered set of selected user ids. Order is the order the
/// operator selected them in, which keeps the persisted file diffable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionSet {
    ids: Vec<UserId>,
}

impl SelectionSet {
    /// Loads the persisted selection. Missing state means an empty
    /// selection; unreadable state is logged and treated the same, so a
    /// corrupt file never blocks startup. Duplicates in the file are
    /// collapsed.
    pub fn load(store: &LocalStore) -> Self {
        let ids: Vec<UserId> = match store.get(SELECTION_KEY) {
            Ok(Some(ids)) => ids,
            Ok(None) => Vec::new(),
            Err(err) => {
                warn!(error = %err, "Could not read persisted selection, starting empty");
                Vec::new()
            }
        };
        let mut set = Self::default();
        for id in ids {
            set.insert(id);
        }
        set
    }

    pub fn is_selected(&self, id: UserId) -> bool {
        self.ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[UserId] {
        &self.ids
    }

    /// Adds an id without persisting. Duplicate inserts are no-ops.
    pub fn insert(&mut self, id: UserId) -> bool {
        if self.ids.contains(&id) {
            return false;
        }
        self.ids.push(id);
        true
    }

    /// Flips membership and persists the whole set. Returns whether the
    /// user is selected after the flip.
    ///
    /// The in-memory flip is applied before the write, so on a write
    /// failure the console still reflects what the operator just did;
    /// the error comes back for logging and the next successful toggle
    /// re-persists everything.
    pub fn toggle(&mut self, store: &LocalStore, id: UserId) -> PersistResult<bool> {
        let selected = match self.ids.iter().position(|existing| *existing == id) {
            Some(index) => {
                self.ids.remove(index);
                false
            }
            None => {
                self.ids.push(id);
                true
            }
        };
        store.put(SELECTION_KEY, &self.ids)?;
        Ok(selected)
    }
}

// ============================================================================
// Tests
// ============================================================================
