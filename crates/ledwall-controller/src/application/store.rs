//! Live state stores shared between the dispatcher, the compositor, and the
//! background services.
//!
//! Both stores follow the same snapshot/swap discipline: readers take an
//! `Arc` clone under a short `std::sync::RwLock` read guard and keep no lock
//! while using it, writers validate first and then swap a whole `Arc` in.
//! The compositor therefore never observes a half-updated program or
//! hardware configuration, and no lock is ever held across an `.await`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use ledwall_core::{HardwareConfig, HwConfigError, Program, ProgramId};

/// Errors from program-store mutations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("program {0} is not installed")]
    NotFound(Uuid),
}

/// Multi-reader/single-writer registry of installed programs, with at most
/// one marked active.
#[derive(Default)]
pub struct ProgramStore {
    inner: RwLock<ProgramTable>,
}

#[derive(Default)]
struct ProgramTable {
    programs: HashMap<ProgramId, Arc<Program>>,
    active: Option<ProgramId>,
}

impl ProgramStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs or replaces a program.  Replacing the active program takes
    /// effect on the compositor's next snapshot.
    pub fn load(&self, program: Program) -> ProgramId {
        let id = program.guid;
        let mut table = self.write();
        table.programs.insert(id, Arc::new(program));
        info!(%id, "program installed");
        id
    }

    /// Marks a program active.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the id is not installed; the
    /// previously active program stays active.
    pub fn switch_active(&self, id: ProgramId) -> Result<(), StoreError> {
        let mut table = self.write();
        if !table.programs.contains_key(&id) {
            return Err(StoreError::NotFound(id));
        }
        table.active = Some(id);
        info!(%id, "active program switched");
        Ok(())
    }

    /// The active program snapshot, if any.  O(1): one Arc clone under a
    /// read guard.
    pub fn get_active(&self) -> Option<Arc<Program>> {
        let table = self.read();
        table.active.and_then(|id| table.programs.get(&id).cloned())
    }

    pub fn get(&self, id: ProgramId) -> Option<Arc<Program>> {
        self.read().programs.get(&id).cloned()
    }

    /// Removes a program; removing the active one leaves the display idle.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the id is not installed.
    pub fn remove(&self, id: ProgramId) -> Result<(), StoreError> {
        let mut table = self.write();
        if table.programs.remove(&id).is_none() {
            return Err(StoreError::NotFound(id));
        }
        if table.active == Some(id) {
            table.active = None;
        }
        Ok(())
    }

    /// Installed program snapshots in unspecified order.
    pub fn list(&self) -> Vec<Arc<Program>> {
        self.read().programs.values().cloned().collect()
    }

    pub fn active_id(&self) -> Option<ProgramId> {
        self.read().active
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ProgramTable> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ProgramTable> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Snapshot/swap store for the hardware configuration.
pub struct HwConfigStore {
    inner: RwLock<Arc<HardwareConfig>>,
}

impl HwConfigStore {
    pub fn new(config: HardwareConfig) -> Self {
        Self {
            inner: RwLock::new(Arc::new(config)),
        }
    }

    /// Current configuration snapshot.
    pub fn get(&self) -> Arc<HardwareConfig> {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Validates and installs a new configuration.
    ///
    /// # Errors
    ///
    /// Returns the [`HwConfigError`] and keeps the previous configuration
    /// active when validation fails.
    pub fn replace(&self, config: HardwareConfig) -> Result<(), HwConfigError> {
        config.validate()?;
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(config);
        info!("hardware configuration replaced");
        Ok(())
    }

    /// Applies `mutate` to a copy of the current configuration and installs
    /// the result if it still validates.
    ///
    /// # Errors
    ///
    /// Returns the [`HwConfigError`] and keeps the previous configuration on
    /// validation failure.
    pub fn update<F>(&self, mutate: F) -> Result<(), HwConfigError>
    where
        F: FnOnce(&mut HardwareConfig),
    {
        let mut next = (*self.get()).clone();
        mutate(&mut next);
        self.replace(next)
    }
}

impl Default for HwConfigStore {
    fn default() -> Self {
        Self::new(HardwareConfig::default())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
