//! Cache of per-model setups.
//!
//! A setup is everything that depends only on the model structure: the enumeration, the
//! edge dictionaries and the static function rows. It is keyed by the model id, its
//! structural revision and the mode, so any structural edit forces a fresh setup.

use std::collections::HashMap;

use crate::config::Mode;
use crate::functions::FunctionRows;
use crate::model::Assembly;
use crate::variables::Topology;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SetupKey {
    pub model: u64,
    pub revision: u64,
    pub mode: Mode,
}

impl SetupKey {
    pub fn of(model: &Assembly, mode: Mode) -> Self {
        Self {
            model: model.id(),
            revision: model.revision(),
            mode,
        }
    }
}

/// The structure-dependent part of a differentiation.
#[derive(Debug, Clone)]
pub struct Setup {
    pub topology: Topology,
    /// Column of each parameter in the gradient.
    pub param_index: HashMap<String, usize>,
    pub rows: FunctionRows,
}

#[derive(Debug, Default)]
pub struct SetupCache {
    entries: HashMap<SetupKey, Setup>,
}

impl SetupCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &SetupKey) -> Option<&Setup> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &SetupKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Stores `setup`, dropping entries of older revisions of the same model.
    pub fn insert(&mut self, key: SetupKey, setup: Setup) {
        self.entries
            .retain(|k, _| k.model != key.model || k.revision >= key.revision);
        self.entries.insert(key, setup);
    }

    /// Forgets every setup of `model`.
    pub fn invalidate(&mut self, model: &Assembly) {
        let id = model.id();
        self.entries.retain(|k, _| k.model != id);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
