//! Settings shared between the request handlers and the tick loop.
//!
//! Handlers mutate through [`SharedSettings::apply_change`] or
//! [`SharedSettings::replace`]; the tick loop picks up the result at the next
//! tick boundary through [`SharedSettings::take_pending`]. Every accepted
//! change is persisted through a [`SettingsStore`] on a best-effort basis.
//!
//! Changes made from the tick loop ([`SharedSettings::force_stop`]) are only
//! marked dirty; [`SharedSettings::flush`] saves them later from a thread that
//! is allowed to block on flash.

use std::sync::{Mutex, MutexGuard, PoisonError};

use enumset::EnumSet;
use log::{debug, info, warn};

use crate::change::{invalidations_between, ConfigChange, Invalidation, Invalidations};
use crate::error::{PacerError, StoreError};
use crate::geometry::Geometry;
use crate::settings::PacerSettings;

/// Persistence backend for [`PacerSettings`].
pub trait SettingsStore: Send + Sync {
    fn load(&self) -> Result<PacerSettings, StoreError>;
    fn save(&self, settings: &PacerSettings) -> Result<(), StoreError>;
}

/// Keeps settings in RAM only; for host tools and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    saved: Mutex<Option<PacerSettings>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Last saved settings, if any.
    #[must_use]
    pub fn saved(&self) -> Option<PacerSettings> {
        self.saved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SettingsStore for MemoryStore {
    fn load(&self) -> Result<PacerSettings, StoreError> {
        self.saved().ok_or(StoreError::NotFound)
    }

    fn save(&self, settings: &PacerSettings) -> Result<(), StoreError> {
        *self.saved.lock().unwrap_or_else(PoisonError::into_inner) = Some(settings.clone());
        Ok(())
    }
}

/// Settings handed to the tick loop along with what changed.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingChange {
    pub settings: PacerSettings,
    pub invalidations: Invalidations,
    pub generation: u64,
}

#[derive(Debug)]
struct Inner {
    settings: PacerSettings,
    pending: Invalidations,
    generation: u64,
    /// Committed without being saved
    dirty: bool,
}

pub struct SharedSettings {
    inner: Mutex<Inner>,
    store: Box<dyn SettingsStore>,
    /// Generation last handed to the store; held across each save
    persisted: Mutex<u64>,
}

impl SharedSettings {
    /// Wrap `settings`, marking everything stale so the first tick builds
    /// all derived state.
    pub fn new(settings: PacerSettings, store: Box<dyn SettingsStore>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                settings,
                pending: EnumSet::all(),
                generation: 0,
                dirty: false,
            }),
            store,
            persisted: Mutex::new(0),
        }
    }

    /// Load from `store`, falling back to defaults if nothing usable is
    /// stored.
    pub fn load(store: Box<dyn SettingsStore>) -> Self {
        let settings = match store.load() {
            Ok(settings) => match settings.validate() {
                Ok(()) => {
                    info!("Loaded pacer settings");
                    settings
                }
                Err(e) => {
                    warn!("Stored pacer settings rejected ({e}), using defaults");
                    PacerSettings::default()
                }
            },
            Err(StoreError::NotFound) => {
                info!("No stored pacer settings, using defaults");
                PacerSettings::default()
            }
            Err(e) => {
                warn!("Failed to load pacer settings ({e}), using defaults");
                PacerSettings::default()
            }
        };
        Self::new(settings, store)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Save `settings` unless a newer generation has already been saved.
    fn persist(&self, settings: &PacerSettings, generation: u64) {
        let mut persisted = self.persisted.lock().unwrap_or_else(PoisonError::into_inner);
        if *persisted >= generation {
            debug!("Skipping save of stale generation {generation}");
            return;
        }
        if let Err(e) = self.store.save(settings) {
            warn!("Failed to save pacer settings: {e}");
        }
        *persisted = generation;
    }

    /// Validate and commit a candidate, or leave the current settings as
    /// they are.
    fn commit(
        &self,
        edit: impl FnOnce(&mut PacerSettings) -> Result<Invalidations, PacerError>,
    ) -> Result<Invalidations, PacerError> {
        let saved = {
            let mut inner = self.lock();
            let mut candidate = inner.settings.clone();
            let invalidations = edit(&mut candidate)?;
            candidate.validate()?;
            if invalidations.contains(Invalidation::Geometry) {
                Geometry::recompute(&candidate)?;
            }

            inner.settings = candidate;
            inner.pending |= invalidations;
            inner.generation += 1;
            inner.dirty = false;
            (inner.settings.clone(), inner.generation, invalidations)
        };

        self.persist(&saved.0, saved.1);
        Ok(saved.2)
    }

    /// Apply one change request. On error nothing is modified.
    pub fn apply_change(&self, change: ConfigChange) -> Result<Invalidations, PacerError> {
        let result = self.commit(|settings| change.apply(settings));
        match &result {
            Ok(_) => info!("Applied {change:?}"),
            Err(e) => warn!("Rejected {change:?}: {e}"),
        }
        result
    }

    /// Replace the whole settings document, all or nothing.
    pub fn replace(&self, settings: PacerSettings) -> Result<Invalidations, PacerError> {
        let result = self.commit(|current| {
            let invalidations = invalidations_between(current, &settings);
            *current = settings;
            Ok(invalidations)
        });
        if let Err(e) = &result {
            warn!("Rejected settings replacement: {e}");
        }
        result
    }

    /// Switch a lane off from the tick loop, e.g. after its buffer could not
    /// be allocated. Never touches the store; see [`Self::flush`].
    pub fn force_stop(&self, lane: usize) {
        if PacerSettings::check_lane(lane).is_err() {
            return;
        }
        let mut inner = self.lock();
        if !inner.settings.running[lane] {
            return;
        }
        inner.settings.running[lane] = false;
        inner.pending |= Invalidation::RunState;
        inner.generation += 1;
        inner.dirty = true;
        warn!("Lane {lane} stopped");
    }

    /// Save settings changed by [`Self::force_stop`], if any.
    pub fn flush(&self) {
        let (settings, generation) = {
            let mut inner = self.lock();
            if !inner.dirty {
                return;
            }
            inner.dirty = false;
            (inner.settings.clone(), inner.generation)
        };
        self.persist(&settings, generation);
    }

    #[must_use]
    pub fn snapshot(&self) -> PacerSettings {
        self.lock().settings.clone()
    }

    /// Incremented on every accepted change.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Take the settings if anything changed since the last call.
    #[must_use]
    pub fn take_pending(&self) -> Option<PendingChange> {
        let mut inner = self.lock();
        if inner.pending.is_empty() {
            return None;
        }
        let invalidations = std::mem::take(&mut inner.pending);
        Some(PendingChange {
            settings: inner.settings.clone(),
            invalidations,
            generation: inner.generation,
        })
    }
}
