//! Read-only reference data owned by the surrounding platform.
//!
//! Chains hold only ids; names and types are looked up on demand so that
//! edits or archiving in the CRUD layer never invalidate a chain.

use crate::error::{LedgerError, Result};
use crate::types::{FacilityRef, PlotRef, UserRef};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Facility {
    pub id: String,
    pub name: String,
    pub facility_type: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plot {
    pub id: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
}

/// Lookup of reference entities.
pub trait ReferenceDirectory: Send + Sync {
    fn facility(&self, id: &FacilityRef) -> Option<Facility>;
    fn plot(&self, id: &PlotRef) -> Option<Plot>;
    fn user(&self, id: &UserRef) -> Option<User>;

    /// Whether writes must reference known entities.
    fn enforces_existence(&self) -> bool {
        true
    }

    fn require_facility(&self, id: &FacilityRef) -> Result<()> {
        if self.enforces_existence() && self.facility(id).is_none() {
            return Err(LedgerError::Validation(format!("unknown facility: {}", id)));
        }
        Ok(())
    }

    fn require_plot(&self, id: &PlotRef) -> Result<()> {
        if self.enforces_existence() && self.plot(id).is_none() {
            return Err(LedgerError::Validation(format!("unknown plot: {}", id)));
        }
        Ok(())
    }

    fn require_user(&self, id: &UserRef) -> Result<()> {
        if self.enforces_existence() && self.user(id).is_none() {
            return Err(LedgerError::Validation(format!("unknown user: {}", id)));
        }
        Ok(())
    }
}

/// Accepts any reference and resolves none.
#[derive(Clone, Copy, Debug, Default)]
pub struct OpenDirectory;

impl ReferenceDirectory for OpenDirectory {
    fn facility(&self, _id: &FacilityRef) -> Option<Facility> {
        None
    }

    fn plot(&self, _id: &PlotRef) -> Option<Plot> {
        None
    }

    fn user(&self, _id: &UserRef) -> Option<User> {
        None
    }

    fn enforces_existence(&self) -> bool {
        false
    }
}

/// Directory backed by in-process maps, typically loaded from the platform's
/// CRUD service at startup.
#[derive(Default)]
pub struct InMemoryDirectory {
    facilities: RwLock<HashMap<String, Facility>>,
    plots: RwLock<HashMap<String, Plot>>,
    users: RwLock<HashMap<String, User>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_facility(&self, id: &str, name: &str, facility_type: &str) {
        self.facilities.write().insert(
            id.to_string(),
            Facility {
                id: id.to_string(),
                name: name.to_string(),
                facility_type: facility_type.to_string(),
            },
        );
    }

    pub fn add_plot(&self, id: &str, name: &str) {
        self.plots.write().insert(
            id.to_string(),
            Plot {
                id: id.to_string(),
                name: name.to_string(),
            },
        );
    }

    pub fn add_user(&self, id: &str, name: &str) {
        self.users.write().insert(
            id.to_string(),
            User {
                id: id.to_string(),
                name: name.to_string(),
            },
        );
    }
}

impl ReferenceDirectory for InMemoryDirectory {
    fn facility(&self, id: &FacilityRef) -> Option<Facility> {
        self.facilities.read().get(&id.0).cloned()
    }

    fn plot(&self, id: &PlotRef) -> Option<Plot> {
        self.plots.read().get(&id.0).cloned()
    }

    fn user(&self, id: &UserRef) -> Option<User> {
        self.users.read().get(&id.0).cloned()
    }
}
