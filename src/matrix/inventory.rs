//! Slot inventory of the switch mainframe.

use crate::hardware::scpi::ScpiTransport;
use crate::matrix::SLOT_COUNT;
use std::fmt;
use tracing::{debug, warn};

/// Type identifier reported by the Agilent 34932A Dual 4x16 Armature Matrix.
pub const DUAL_4X16_TYPE_ID: &str = "34932A";

/// Classification of whatever sits in a mainframe slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    /// Agilent 34932A, the only module the mapping table can be built on.
    Dual4x16Armature,
    /// Installed module of some other type.
    Unsupported(String),
    /// Nothing installed, or the slot could not be read.
    Empty,
}

impl ModuleKind {
    /// Classify a type identifier as reported by `SYST:CTYP?`.
    pub fn from_type_id(type_id: &str) -> Self {
        match type_id.trim() {
            "" => ModuleKind::Empty,
            DUAL_4X16_TYPE_ID => ModuleKind::Dual4x16Armature,
            other => ModuleKind::Unsupported(other.to_string()),
        }
    }

    /// Whether the mapping table may allocate this module.
    pub fn is_usable(&self) -> bool {
        matches!(self, ModuleKind::Dual4x16Armature)
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleKind::Dual4x16Armature => f.write_str(DUAL_4X16_TYPE_ID),
            ModuleKind::Unsupported(type_id) => f.write_str(type_id),
            ModuleKind::Empty => f.write_str("empty"),
        }
    }
}

/// One mainframe slot and its contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    /// Slot index, 1-based
    pub slot: u8,
    /// What is installed in the slot
    pub kind: ModuleKind,
}

impl Module {
    /// Convenience constructor.
    pub fn new(slot: u8, kind: ModuleKind) -> Self {
        Self { slot, kind }
    }

    /// Whether the mapping table may allocate this module.
    pub fn is_usable(&self) -> bool {
        self.kind.is_usable()
    }
}

/// Classify one `SYST:CTYP?` response.
///
/// The response looks like `AGILENT TECHNOLOGIES,34932A,0,1.10`; the second
/// field is the module type. An empty response means the slot is empty.
pub fn parse_slot_response(slot: u8, response: &str) -> Module {
    let response = response.trim();
    if response.is_empty() {
        return Module::new(slot, ModuleKind::Empty);
    }

    let kind = match response.split(',').nth(1) {
        Some(type_id) => ModuleKind::from_type_id(type_id),
        None => ModuleKind::Unsupported(response.to_string()),
    };
    Module::new(slot, kind)
}

/// Query every mainframe slot for its module type.
///
/// A slot whose query fails is reported as empty: an absent module is a
/// legitimate hardware state, not an error.
pub async fn discover_modules<T>(transport: &T) -> Vec<Module>
where
    T: ScpiTransport + ?Sized,
{
    let mut modules = Vec::with_capacity(usize::from(SLOT_COUNT));
    for slot in 1..=SLOT_COUNT {
        let module = match transport.query(&format!("SYST:CTYP? {}", slot)).await {
            Ok(response) => parse_slot_response(slot, &response),
            Err(e) => {
                warn!(slot, error = %e, "Slot query failed, treating slot as empty");
                Module::new(slot, ModuleKind::Empty)
            }
        };
        debug!(slot, kind = %module.kind, "Slot inventory");
        modules.push(module);
    }
    modules
}
