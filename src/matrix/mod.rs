//! Pin-to-relay mapping core.
//!
//! A test fixture numbers its contacts as `row * 1000 + column`, left to right
//! across every installed module. The 34932A numbers its relays as
//! `slot * 1000 + row * 100 + column` in its own dual 4x16 layout. This module
//! discovers the installed modules, builds the bijection between the two
//! numbering schemes and renders pin sets as SCPI channel-list expressions.
//!
//! Everything here is synchronous and free of I/O except
//! [`inventory::discover_modules`], which issues one query per slot.

pub mod inventory;
pub mod range_expr;
pub mod table;

pub use inventory::{discover_modules, parse_slot_response, Module, ModuleKind};
pub use range_expr::{compress_pins, compress_relays, decode_states, expand, states_for_pins};
pub use table::{logical_position, CapacityAdvisory, MappingTable, TableBuild};

/// Number of slots in the switch mainframe.
pub const SLOT_COUNT: u8 = 8;

/// Rows of each half of a dual 4x16 matrix, also the number of fixture rows.
pub const MATRIX_ROWS: u32 = 4;

/// Columns of each half of a dual 4x16 matrix.
pub const MATRIX_COLUMNS: u32 = 16;

/// Fixture columns served by one module (both matrix halves side by side).
pub const PINS_PER_MODULE: u32 = 2 * MATRIX_COLUMNS;

/// Multiplier of the row component of a logical pin number.
pub const PIN_ROW_SCALE: u32 = 1000;

/// Multiplier of the slot component of a relay address.
pub const RELAY_SLOT_SCALE: u32 = 1000;

/// Multiplier of the physical row component of a relay address.
pub const RELAY_ROW_SCALE: u32 = 100;

/// Largest fixture width a fully populated mainframe supports.
pub const MAX_PINS: u32 = SLOT_COUNT as u32 * PINS_PER_MODULE;

/// Encode a logical pin number.
pub fn pin_number(row: u32, column: u32) -> u32 {
    row * PIN_ROW_SCALE + column
}

/// Encode a physical relay address.
pub fn relay_number(slot: u8, physical_row: u32, physical_column: u32) -> u32 {
    u32::from(slot) * RELAY_SLOT_SCALE + physical_row * RELAY_ROW_SCALE + physical_column
}
