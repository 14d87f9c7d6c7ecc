//! Bidirectional pin/relay mapping table.
//!
//! Each allocated 34932A contributes two 4x16 matrices. Matrix one (physical
//! rows 1-4) and matrix two (physical rows 5-8) sit side by side on the
//! fixture, so module `k` in allocation order covers fixture columns
//! `32k + 1 ..= 32k + 32`:
//!
//! ```text
//!  fixture row  | cols 1..16        | cols 17..32       | cols 33..48       | ...
//!  -------------+-------------------+-------------------+-------------------+----
//!        1      | slot A, row 1     | slot A, row 5     | slot B, row 1     |
//!        2      | slot A, row 2     | slot A, row 6     | slot B, row 2     |
//!        3      | slot A, row 3     | slot A, row 7     | slot B, row 3     |
//!        4      | slot A, row 4     | slot A, row 8     | slot B, row 4     |
//! ```
//!
//! The table is built once per switch initialisation and is read-only
//! afterwards.

use crate::error::{SwitchError, SwitchResult};
use crate::matrix::inventory::{Module, DUAL_4X16_TYPE_ID};
use crate::matrix::{
    pin_number, relay_number, MATRIX_COLUMNS, MATRIX_ROWS, PINS_PER_MODULE, PIN_ROW_SCALE,
};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{info, warn};

/// Reduced-capacity notice returned when too few modules are installed.
///
/// The table is still built, for `max_pins` fixture columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityAdvisory {
    /// Fixture columns the caller asked for
    pub requested_pins: u32,
    /// Modules the request would need
    pub required_modules: u32,
    /// Usable modules actually installed
    pub installed_modules: u32,
    /// Fixture columns the table was built for
    pub max_pins: u32,
}

impl fmt::Display for CapacityAdvisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "a mapping table for {} pins needs {} {} modules, only {} installed; \
             maximum possible number of pins is {}",
            self.requested_pins,
            self.required_modules,
            DUAL_4X16_TYPE_ID,
            self.installed_modules,
            self.max_pins
        )
    }
}

/// Result of [`MappingTable::build`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableBuild {
    /// The built table
    pub table: MappingTable,
    /// Present when the table was clamped to the installed capacity
    pub advisory: Option<CapacityAdvisory>,
}

/// Fixture position of a relay on the `allocation_index`-th allocated module.
///
/// Returns `(row, column)` of the logical pin wired to physical relay
/// `(physical_row, physical_column)`. Physical rows are `1..=8`, columns
/// `1..=16`.
///
/// # Panics
/// Panics in debug builds when `physical_row` is 0.
pub fn logical_position(allocation_index: u32, physical_row: u32, physical_column: u32) -> (u32, u32) {
    let half = (physical_row - 1) / MATRIX_ROWS;
    let block = 2 * allocation_index + half;
    let row = (physical_row - 1) % MATRIX_ROWS + 1;
    (row, block * MATRIX_COLUMNS + physical_column)
}

/// Pin-to-relay bijection for the installed modules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingTable {
    pin_to_relay: BTreeMap<u32, u32>,
    relay_to_pin: BTreeMap<u32, u32>,
    pins_per_row: u32,
    slots: Vec<u8>,
}

impl MappingTable {
    /// Build the table for `requested_pins` fixture columns.
    ///
    /// Modules are allocated lowest slot first. Fails only when no usable
    /// module is installed; too few modules clamp the table and yield a
    /// [`CapacityAdvisory`].
    pub fn build(modules: &[Module], requested_pins: u32) -> SwitchResult<TableBuild> {
        let usable: Vec<u8> = modules
            .iter()
            .filter(|m| m.is_usable())
            .map(|m| m.slot)
            .collect();
        if usable.is_empty() {
            return Err(SwitchError::NoUsableModules {
                module_type: DUAL_4X16_TYPE_ID,
            });
        }

        let required_modules = requested_pins.div_ceil(PINS_PER_MODULE);
        let installed_modules = usable.len() as u32;
        let mut advisory = None;
        let allocated = if required_modules > installed_modules {
            let notice = CapacityAdvisory {
                requested_pins,
                required_modules,
                installed_modules,
                max_pins: installed_modules * PINS_PER_MODULE,
            };
            warn!(%notice, "Switch capacity insufficient, mapping table clamped");
            advisory = Some(notice);
            installed_modules
        } else {
            required_modules
        };

        // Generation works on whole modules; the partial last module is cut
        // back to `pins_per_row` afterwards.
        let working_pins = allocated * PINS_PER_MODULE;
        let pins_per_row = requested_pins.min(working_pins);
        let slots = usable[..allocated as usize].to_vec();

        let pins: Vec<u32> = (1..=MATRIX_ROWS)
            .flat_map(|row| (1..=working_pins).map(move |column| pin_number(row, column)))
            .collect();
        let relays = aligned_relays(&slots, working_pins);

        let mut pin_to_relay = BTreeMap::new();
        let mut relay_to_pin = BTreeMap::new();
        for (&pin, &relay) in pins.iter().zip(&relays) {
            if pin % PIN_ROW_SCALE > pins_per_row {
                continue;
            }
            let previous_relay = pin_to_relay.insert(pin, relay);
            let previous_pin = relay_to_pin.insert(relay, pin);
            debug_assert!(
                previous_relay.is_none() && previous_pin.is_none(),
                "pin {pin} / relay {relay} mapped twice"
            );
        }

        info!(
            pins_per_row,
            rows = MATRIX_ROWS,
            slots = ?slots,
            "Mapping table built"
        );

        Ok(TableBuild {
            table: Self {
                pin_to_relay,
                relay_to_pin,
                pins_per_row,
                slots,
            },
            advisory,
        })
    }

    /// Relay wired to `pin`, if the pin is part of the fixture.
    pub fn relay_of(&self, pin: u32) -> Option<u32> {
        self.pin_to_relay.get(&pin).copied()
    }

    /// Pin wired to `relay`, if the relay is allocated.
    pub fn pin_of(&self, relay: u32) -> Option<u32> {
        self.relay_to_pin.get(&relay).copied()
    }

    /// Translate pins to relays, preserving order.
    ///
    /// Fails listing every pin absent from the table; no partial result.
    pub fn pins_to_relays(&self, pins: &[u32]) -> SwitchResult<Vec<u32>> {
        translate(&self.pin_to_relay, pins).map_err(SwitchError::UnknownPins)
    }

    /// Translate relays to pins, preserving order.
    ///
    /// Fails listing every relay absent from the table; no partial result.
    pub fn relays_to_pins(&self, relays: &[u32]) -> SwitchResult<Vec<u32>> {
        translate(&self.relay_to_pin, relays).map_err(SwitchError::UnknownRelays)
    }

    /// Number of mapped pins (all rows).
    pub fn len(&self) -> usize {
        self.pin_to_relay.len()
    }

    /// True when nothing is mapped.
    pub fn is_empty(&self) -> bool {
        self.pin_to_relay.is_empty()
    }

    /// Fixture columns per row.
    pub fn pins_per_row(&self) -> u32 {
        self.pins_per_row
    }

    /// Slots of the allocated modules, in allocation order.
    pub fn allocated_slots(&self) -> &[u8] {
        &self.slots
    }

    /// All mapped pins, ascending.
    pub fn pins(&self) -> impl Iterator<Item = u32> + '_ {
        self.pin_to_relay.keys().copied()
    }

    /// All mapped relays, ascending.
    pub fn relays(&self) -> impl Iterator<Item = u32> + '_ {
        self.relay_to_pin.keys().copied()
    }

    /// `(pin, relay)` pairs ordered by pin.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.pin_to_relay.iter().map(|(&pin, &relay)| (pin, relay))
    }

    /// Every pin of one fixture row, ascending. Empty for unknown rows.
    pub fn row_pins(&self, row: u32) -> Vec<u32> {
        if !(1..=MATRIX_ROWS).contains(&row) {
            return Vec::new();
        }
        self.pin_to_relay
            .range(pin_number(row, 1)..pin_number(row + 1, 0))
            .map(|(&pin, _)| pin)
            .collect()
    }
}

/// Relay addresses laid out in the same row-major order as the pin sequence.
fn aligned_relays(slots: &[u8], working_pins: u32) -> Vec<u32> {
    let mut aligned = vec![0u32; (MATRIX_ROWS * working_pins) as usize];
    for (allocation_index, &slot) in slots.iter().enumerate() {
        for physical_row in 1..=2 * MATRIX_ROWS {
            for physical_column in 1..=MATRIX_COLUMNS {
                let (row, column) =
                    logical_position(allocation_index as u32, physical_row, physical_column);
                let index = ((row - 1) * working_pins + (column - 1)) as usize;
                aligned[index] = relay_number(slot, physical_row, physical_column);
            }
        }
    }
    aligned
}

fn translate(map: &BTreeMap<u32, u32>, keys: &[u32]) -> Result<Vec<u32>, Vec<u32>> {
    let mut values = Vec::with_capacity(keys.len());
    let mut unknown = Vec::new();
    for key in keys {
        match map.get(key) {
            Some(&value) => values.push(value),
            None => unknown.push(*key),
        }
    }
    if unknown.is_empty() {
        Ok(values)
    } else {
        Err(unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::inventory::ModuleKind;
    use crate::matrix::{MAX_PINS, SLOT_COUNT};
    use std::collections::HashSet;
    use tracing_test::traced_test;

    fn inventory(usable_slots: &[u8]) -> Vec<Module> {
        (1..=SLOT_COUNT)
            .map(|slot| {
                let kind = if usable_slots.contains(&slot) {
                    ModuleKind::Dual4x16Armature
                } else {
                    ModuleKind::Empty
                };
                Module::new(slot, kind)
            })
            .collect()
    }

    fn build(usable_slots: &[u8], pins: u32) -> TableBuild {
        MappingTable::build(&inventory(usable_slots), pins).unwrap()
    }

    #[test]
    fn logical_position_covers_blocks() {
        assert_eq!(logical_position(0, 1, 1), (1, 1));
        assert_eq!(logical_position(0, 4, 16), (4, 16));
        assert_eq!(logical_position(0, 5, 1), (1, 17));
        assert_eq!(logical_position(0, 8, 16), (4, 32));
        assert_eq!(logical_position(1, 1, 1), (1, 33));
        assert_eq!(logical_position(1, 7, 2), (3, 50));
    }

    #[test]
    fn logical_position_is_injective() {
        let mut seen = HashSet::new();
        for k in 0..3 {
            for r in 1..=8 {
                for c in 1..=16 {
                    let (row, column) = logical_position(k, r, c);
                    assert!((1..=4).contains(&row));
                    assert!((1..=96).contains(&column));
                    assert!(seen.insert((row, column)));
                }
            }
        }
        assert_eq!(seen.len(), 3 * 128);
    }

    #[test]
    fn single_module_layout() {
        let TableBuild { table, advisory } = build(&[1], 32);
        assert!(advisory.is_none());
        assert_eq!(table.len(), 128);
        assert_eq!(table.relay_of(1001), Some(1101));
        assert_eq!(table.relay_of(1016), Some(1116));
        assert_eq!(table.relay_of(1017), Some(1501));
        assert_eq!(table.relay_of(1032), Some(1516));
        assert_eq!(table.relay_of(2001), Some(1201));
        assert_eq!(table.relay_of(4032), Some(1816));
        assert_eq!(table.pin_of(1716), Some(3032));
    }

    #[test]
    fn modules_allocated_lowest_slot_first() {
        let TableBuild { table, .. } = build(&[2, 5, 7], 64);
        assert_eq!(table.allocated_slots(), &[2, 5]);
        assert_eq!(table.relay_of(1001), Some(2101));
        assert_eq!(table.relay_of(1033), Some(5101));
        assert_eq!(table.relay_of(3050), Some(5702));
        assert!(table.relays().all(|relay| relay / 1000 != 7));
    }

    #[test]
    fn unsupported_modules_are_skipped() {
        let mut modules = inventory(&[4]);
        modules[0].kind = ModuleKind::Unsupported("34921A".into());
        let TableBuild { table, .. } = MappingTable::build(&modules, 32).unwrap();
        assert_eq!(table.allocated_slots(), &[4]);
    }

    #[test]
    fn partial_module_is_truncated() {
        let TableBuild { table, advisory } = build(&[1, 2], 40);
        assert!(advisory.is_none());
        assert_eq!(table.pins_per_row(), 40);
        assert_eq!(table.len(), 160);
        assert_eq!(table.relay_of(1040), Some(2108));
        assert_eq!(table.relay_of(1041), None);
        assert_eq!(table.pin_of(2109), None);
        assert_eq!(table.pin_of(2501), None);
    }

    #[test]
    fn capacity_clamp_yields_advisory() {
        let TableBuild { table, advisory } = build(&[3], 100);
        assert_eq!(
            advisory,
            Some(CapacityAdvisory {
                requested_pins: 100,
                required_modules: 4,
                installed_modules: 1,
                max_pins: 32,
            })
        );
        assert_eq!(table.pins_per_row(), 32);
        assert_eq!(table.len(), 128);
        assert_eq!(table.relay_of(1033), None);
    }

    #[test]
    #[traced_test]
    fn capacity_advisory_is_logged() {
        build(&[1, 2], 100);
        assert!(logs_contain("Switch capacity insufficient"));
        assert!(logs_contain("mapping table for 100 pins needs 4 34932A modules"));
    }

    #[test]
    fn no_usable_modules_is_fatal() {
        let err = MappingTable::build(&inventory(&[]), 32).unwrap_err();
        assert_eq!(
            err,
            SwitchError::NoUsableModules {
                module_type: "34932A"
            }
        );
    }

    #[test]
    fn zero_pins_builds_empty_table() {
        let TableBuild { table, advisory } = build(&[1], 0);
        assert!(table.is_empty());
        assert!(advisory.is_none());
        assert!(table.allocated_slots().is_empty());
    }

    #[test]
    fn bijective_for_every_pin_count() {
        let all = [1, 2, 3, 4, 5, 6, 7, 8];
        for pins in 1..=MAX_PINS {
            let TableBuild { table, advisory } = build(&all, pins);
            assert!(advisory.is_none());
            assert_eq!(table.len(), (4 * pins) as usize, "pins={pins}");
            assert_eq!(table.relays().count(), table.len());
            for (pin, relay) in table.iter() {
                assert!(pin % 1000 <= pins);
                assert_eq!(table.pin_of(relay), Some(pin));
            }
        }
    }

    #[test]
    fn builds_are_deterministic() {
        let first = build(&[2, 6], 50);
        let second = build(&[2, 6], 50);
        assert_eq!(first, second);
    }

    #[test]
    fn round_trip_identity() {
        let TableBuild { table, .. } = build(&[1, 8], 64);
        for pin in table.pins() {
            let relays = table.pins_to_relays(&[pin]).unwrap();
            assert_eq!(table.relays_to_pins(&relays).unwrap(), vec![pin]);
        }
    }

    #[test]
    fn translation_preserves_order() {
        let TableBuild { table, .. } = build(&[1], 32);
        assert_eq!(
            table.pins_to_relays(&[4032, 1001, 1017]).unwrap(),
            vec![1816, 1101, 1501]
        );
        assert_eq!(
            table.relays_to_pins(&[1501, 1101]).unwrap(),
            vec![1017, 1001]
        );
    }

    #[test]
    fn unknown_values_are_all_reported() {
        let TableBuild { table, .. } = build(&[1], 32);
        assert_eq!(
            table.pins_to_relays(&[1001, 99999, 5001]).unwrap_err(),
            SwitchError::UnknownPins(vec![99999, 5001])
        );
        assert_eq!(
            table.relays_to_pins(&[1101, 2101]).unwrap_err(),
            SwitchError::UnknownRelays(vec![2101])
        );
    }

    #[test]
    fn row_pins_are_contiguous() {
        let TableBuild { table, .. } = build(&[1, 2], 40);
        let row = table.row_pins(2);
        assert_eq!(row.len(), 40);
        assert_eq!(row.first(), Some(&2001));
        assert_eq!(row.last(), Some(&2040));
        assert!(table.row_pins(5).is_empty());
        assert!(table.row_pins(0).is_empty());
        assert!(table.row_pins(u32::MAX).is_empty());
    }
}
