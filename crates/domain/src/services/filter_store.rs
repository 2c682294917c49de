//! Filter state holder with undo history, presets and optional persistence.
//!
//! Mutations never fail: an invalid state is still stored, and its problems
//! are reported through [`FilterStore::validation_errors`]. Callers must check
//! [`FilterStore::is_valid`] before using the state to drive a fetch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::clock::SharedClock;
use super::preference_store::PreferenceStore;
use crate::error::StoreError;
use crate::models::{ActiveFilter, FilterFieldError, FilterPatch, FilterPreset, FilterState};
use shared::validation::validate_preset_label;

/// Default number of previous states kept for undo.
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Current version of the persisted filter document.
const PERSISTED_VERSION: u32 = 1;

/// Shape of the persisted document. Filters are read back as a patch so
/// missing categories fall back to the store defaults.
#[derive(Debug, Serialize)]
struct PersistedFilters<'a> {
    version: u32,
    filters: &'a FilterState,
    presets: Vec<&'a FilterPreset>,
    saved_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct SavedFilters {
    #[serde(default)]
    filters: FilterPatch,
    #[serde(default)]
    presets: Vec<FilterPreset>,
}

struct Persistence {
    store: Arc<dyn PreferenceStore>,
    key: String,
}

/// Holds one user's filter state.
pub struct FilterStore {
    defaults: FilterState,
    current: FilterState,
    validation_errors: Vec<FilterFieldError>,
    history: VecDeque<FilterState>,
    history_limit: usize,
    presets: BTreeMap<String, FilterPreset>,
    persistence: Option<Persistence>,
    clock: SharedClock,
    changes: watch::Sender<FilterState>,
}

impl FilterStore {
    pub fn new(clock: SharedClock) -> Self {
        let defaults = FilterState::default();
        let (changes, _) = watch::channel(defaults.clone());
        Self {
            current: defaults.clone(),
            defaults,
            validation_errors: Vec::new(),
            history: VecDeque::new(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            presets: BTreeMap::new(),
            persistence: None,
            clock,
            changes,
        }
    }

    /// Uses `defaults` as both the starting state and the target of [`reset`](Self::reset).
    pub fn with_defaults(mut self, defaults: FilterState) -> Self {
        self.current = defaults.clone();
        self.defaults = defaults;
        self.revalidate();
        self.changes.send_replace(self.current.clone());
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        while self.history.len() > limit {
            self.history.pop_front();
        }
        self
    }

    /// Persists to `store` under `{key_prefix}:{owner}`.
    pub fn with_persistence(
        mut self,
        store: Arc<dyn PreferenceStore>,
        key_prefix: &str,
        owner: &str,
    ) -> Self {
        self.persistence = Some(Persistence {
            store,
            key: format!("{}:{}", key_prefix, owner),
        });
        self
    }

    pub fn get(&self) -> &FilterState {
        &self.current
    }

    pub fn defaults(&self) -> &FilterState {
        &self.defaults
    }

    pub fn persistence_key(&self) -> Option<&str> {
        self.persistence.as_ref().map(|p| p.key.as_str())
    }

    /// Merges `patch` over the current state, replacing whole categories.
    pub fn update(&mut self, patch: FilterPatch) -> FilterState {
        let next = patch.apply_to(&self.current);
        self.commit(next)
    }

    /// Restores this store's configured defaults.
    pub fn reset(&mut self) -> FilterState {
        let defaults = self.defaults.clone();
        self.commit(defaults)
    }

    /// Removes every user selection, ignoring configured defaults.
    pub fn clear(&mut self) -> FilterState {
        self.commit(FilterState::default())
    }

    /// Steps back to the previous state. Returns `None` when there is no history.
    pub fn undo(&mut self) -> Option<FilterState> {
        let previous = self.history.pop_back()?;
        self.current = previous;
        self.revalidate();
        self.changes.send_replace(self.current.clone());
        debug!(history_len = self.history.len(), "Filter state undone");
        Some(self.current.clone())
    }

    pub fn can_undo(&self) -> bool {
        !self.history.is_empty()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn is_valid(&self) -> bool {
        self.validation_errors.is_empty()
    }

    pub fn validation_errors(&self) -> &[FilterFieldError] {
        &self.validation_errors
    }

    pub fn active_filter_count(&self) -> usize {
        self.current.active_filter_count()
    }

    pub fn describe_active_filters(&self) -> Vec<ActiveFilter> {
        self.current.active_filters()
    }

    /// Snapshots the current state under `label`, replacing any preset with that label.
    pub fn save_preset(&mut self, label: &str) -> Result<FilterPreset, FilterFieldError> {
        let label = label.trim();
        validate_preset_label(label).map_err(|e| FilterFieldError {
            field: "label".to_string(),
            code: e.code.to_string(),
            message: e
                .message
                .map(|m| m.to_string())
                .unwrap_or_else(|| e.code.to_string()),
        })?;

        let preset = FilterPreset {
            label: label.to_string(),
            filters: self.current.clone(),
            created_at: self.clock.now(),
        };
        self.presets.insert(label.to_string(), preset.clone());
        Ok(preset)
    }

    /// Replaces the current state with a preset's snapshot.
    pub fn apply_preset(&mut self, label: &str) -> Option<FilterState> {
        let filters = self.presets.get(label)?.filters.clone();
        Some(self.commit(filters))
    }

    pub fn delete_preset(&mut self, label: &str) -> bool {
        self.presets.remove(label).is_some()
    }

    /// Presets ordered by label.
    pub fn presets(&self) -> Vec<FilterPreset> {
        self.presets.values().cloned().collect()
    }

    pub fn subscribe(&self) -> watch::Receiver<FilterState> {
        self.changes.subscribe()
    }

    /// Writes filters and presets to the preference store. No-op without persistence.
    pub async fn save(&self) -> Result<(), StoreError> {
        let Some(persistence) = &self.persistence else {
            return Ok(());
        };

        let document = serde_json::to_value(PersistedFilters {
            version: PERSISTED_VERSION,
            filters: &self.current,
            presets: self.presets.values().collect(),
            saved_at: self.clock.now(),
        })?;
        persistence.store.save(&persistence.key, &document).await?;
        debug!(key = %persistence.key, "Filter state saved");
        Ok(())
    }

    /// Restores saved filters merged over the defaults.
    ///
    /// Read and parse failures are logged and treated as nothing saved.
    /// Returns whether saved state was applied.
    pub async fn load(&mut self) -> bool {
        let (store, key) = match &self.persistence {
            Some(p) => (p.store.clone(), p.key.clone()),
            None => return false,
        };

        let document = match store.load(&key).await {
            Ok(Some(document)) => document,
            Ok(None) => return false,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read saved filters");
                return false;
            }
        };

        let saved: SavedFilters = match serde_json::from_value(document) {
            Ok(saved) => saved,
            Err(e) => {
                warn!(key = %key, error = %e, "Ignoring unreadable saved filters");
                return false;
            }
        };

        self.current = saved.filters.apply_to(&self.defaults);
        self.presets = saved
            .presets
            .into_iter()
            .map(|p| (p.label.clone(), p))
            .collect();
        self.history.clear();
        self.revalidate();
        self.changes.send_replace(self.current.clone());
        debug!(
            key = %key,
            presets = self.presets.len(),
            "Filter state loaded"
        );
        true
    }

    /// Deletes the persisted document. No-op without persistence.
    pub async fn clear_persistence(&self) -> Result<(), StoreError> {
        if let Some(persistence) = &self.persistence {
            persistence.store.remove(&persistence.key).await?;
        }
        Ok(())
    }

    fn commit(&mut self, next: FilterState) -> FilterState {
        if next != self.current {
            if self.history_limit > 0 {
                if self.history.len() == self.history_limit {
                    self.history.pop_front();
                }
                self.history.push_back(self.current.clone());
            }
            self.current = next;
            self.changes.send_replace(self.current.clone());
        }
        self.revalidate();
        self.current.clone()
    }

    fn revalidate(&mut self) {
        self.validation_errors = match self.current.validate_at(self.clock.now()) {
            Ok(()) => Vec::new(),
            Err(errors) => {
                debug!(errors = errors.len(), "Filter state failed validation");
                errors
            }
        };
    }
}
