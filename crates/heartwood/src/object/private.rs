//! Per-class native data attached to an object

use std::sync::Arc;

use indexmap::IndexMap;

use super::ClassId;
use crate::error::ExceptionSink;

/// Native data a class attaches to its instances.
pub trait PrivateData: Send + Sync {
    /// Free the data. Called exactly once, when the owning object is
    /// deleted, and only for the class that registered it.
    fn release(&self, sink: &mut ExceptionSink);
}

struct Entry {
    data: Arc<dyn PrivateData>,
    // Registered for a parent class that shares the subclass's data.
    is_virtual: bool,
}

/// Private data keyed by class id.
#[derive(Default)]
pub(crate) struct KeyList {
    entries: IndexMap<ClassId, Entry>,
}

impl KeyList {
    /// Store data owned by `class`, replacing and returning any previous owner entry.
    pub(crate) fn insert(&mut self, class: ClassId, data: Arc<dyn PrivateData>) -> Option<Arc<dyn PrivateData>> {
        self.entries
            .insert(
                class,
                Entry {
                    data,
                    is_virtual: false,
                },
            )
            .filter(|old| !old.is_virtual)
            .map(|old| old.data)
    }

    /// Make `data` visible under a parent class without transferring ownership.
    /// A class with its own entry keeps it.
    pub(crate) fn insert_virtual(&mut self, class: ClassId, data: Arc<dyn PrivateData>) {
        self.entries.entry(class).or_insert(Entry {
            data,
            is_virtual: true,
        });
    }

    pub(crate) fn get(&self, class: ClassId) -> Option<Arc<dyn PrivateData>> {
        self.entries.get(&class).map(|e| Arc::clone(&e.data))
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Release every owned entry, most recently registered first.
    pub(crate) fn release_all(self, sink: &mut ExceptionSink) {
        for (_, entry) in self.entries.into_iter().rev() {
            if !entry.is_virtual {
                entry.data.release(sink);
            }
        }
    }
}
