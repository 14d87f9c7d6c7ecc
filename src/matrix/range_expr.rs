//! SCPI channel-list expressions.
//!
//! The instrument addresses relay sets as comma-separated tokens, each a
//! single relay or an inclusive `low:high` run, strictly ascending:
//! `1101:1116,1201,1305:1307`. State queries answer with one `0`/`1` per
//! relay of the expanded list, in the same ascending order.
//!
//! Runs are detected on relay addresses, not on pin numbers: neighbouring
//! pins are often wired to relays on different matrix halves.

use crate::error::{SwitchError, SwitchResult};
use crate::matrix::table::MappingTable;
use std::collections::BTreeMap;

/// Relays of `pins`, ascending and de-duplicated.
///
/// This is the order in which the instrument reports relay states.
pub fn sorted_relays(table: &MappingTable, pins: &[u32]) -> SwitchResult<Vec<u32>> {
    let mut relays = table.pins_to_relays(pins)?;
    relays.sort_unstable();
    relays.dedup();
    Ok(relays)
}

/// Range expression over the relays wired to `pins`.
///
/// Every pin is resolved first; one unknown pin fails the whole call.
pub fn compress_pins(table: &MappingTable, pins: &[u32]) -> SwitchResult<String> {
    Ok(compress_relays(&sorted_relays(table, pins)?))
}

/// Range expression over arbitrary relay addresses.
///
/// Input is sorted and de-duplicated first. Runs of two or more consecutive
/// addresses become `first:last`; isolated addresses stay bare.
pub fn compress_relays(relays: &[u32]) -> String {
    let mut sorted = relays.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut tokens = Vec::new();
    let mut iter = sorted.into_iter().peekable();
    while let Some(first) = iter.next() {
        let mut last = first;
        while let Some(&next) = iter.peek() {
            if last.checked_add(1) != Some(next) {
                break;
            }
            last = next;
            iter.next();
        }
        if first == last {
            tokens.push(first.to_string());
        } else {
            tokens.push(format!("{first}:{last}"));
        }
    }
    tokens.join(",")
}

/// Expand a range expression into its relay addresses.
///
/// Rejects spaces, empty tokens, reversed runs and tokens that are not
/// strictly ascending.
pub fn expand(expr: &str) -> SwitchResult<Vec<u32>> {
    if expr.is_empty() {
        return Ok(Vec::new());
    }

    let malformed = |reason: &str| {
        SwitchError::MalformedRangeExpression(format!("{reason} in '{expr}'"))
    };
    let parse = |token: &str| {
        token
            .parse::<u32>()
            .map_err(|_| malformed(&format!("invalid relay '{token}'")))
    };

    let mut relays: Vec<u32> = Vec::new();
    for token in expr.split(',') {
        let (low, high) = match token.split_once(':') {
            Some((low, high)) => (parse(low)?, parse(high)?),
            None => {
                let single = parse(token)?;
                (single, single)
            }
        };
        if low > high {
            return Err(malformed(&format!("reversed run '{token}'")));
        }
        if relays.last().is_some_and(|&previous| low <= previous) {
            return Err(malformed(&format!("token '{token}' is not ascending")));
        }
        relays.extend(low..=high);
    }
    Ok(relays)
}

/// Decode a relay-state response (`1,0,1`) holding `expected` entries.
pub fn decode_states(response: &str, expected: usize) -> SwitchResult<Vec<bool>> {
    let response = response.trim();
    if response.is_empty() && expected == 0 {
        return Ok(Vec::new());
    }

    let states = response
        .split(',')
        .map(|token| match token.trim() {
            "1" => Ok(true),
            "0" => Ok(false),
            other => Err(SwitchError::MalformedStateResponse(format!(
                "unexpected state '{other}' in '{response}'"
            ))),
        })
        .collect::<SwitchResult<Vec<bool>>>()?;

    if states.len() != expected {
        return Err(SwitchError::MalformedStateResponse(format!(
            "expected {expected} states, got {} in '{response}'",
            states.len()
        )));
    }
    Ok(states)
}

/// Re-align states reported for [`sorted_relays`] with the caller's pins.
///
/// Repeated pins receive the same state.
pub fn states_for_pins(
    table: &MappingTable,
    pins: &[u32],
    relay_states: &[bool],
) -> SwitchResult<Vec<bool>> {
    let relays = table.pins_to_relays(pins)?;
    let sorted = sorted_relays(table, pins)?;
    if sorted.len() != relay_states.len() {
        return Err(SwitchError::MalformedStateResponse(format!(
            "expected {} states, got {}",
            sorted.len(),
            relay_states.len()
        )));
    }

    let by_relay: BTreeMap<u32, bool> = sorted.into_iter().zip(relay_states.iter().copied()).collect();
    relays
        .iter()
        .map(|relay| {
            by_relay.get(relay).copied().ok_or_else(|| {
                SwitchError::MalformedStateResponse(format!("no state reported for relay {relay}"))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::inventory::{Module, ModuleKind};

    fn table() -> MappingTable {
        let modules = vec![
            Module::new(1, ModuleKind::Dual4x16Armature),
            Module::new(2, ModuleKind::Empty),
        ];
        MappingTable::build(&modules, 32).unwrap().table
    }

    #[test]
    fn compresses_runs_and_singletons() {
        assert_eq!(compress_relays(&[10, 11, 12, 15]), "10:12,15");
        assert_eq!(compress_relays(&[5, 7, 9]), "5,7,9");
        assert_eq!(compress_relays(&[10, 11, 15]), "10:11,15");
        assert_eq!(compress_relays(&[1, 3, 4]), "1,3:4");
        assert_eq!(compress_relays(&[]), "");
        assert_eq!(compress_relays(&[42]), "42");
    }

    #[test]
    fn unsorted_and_duplicate_relays_are_normalised() {
        assert_eq!(compress_relays(&[12, 10, 11, 11, 15, 10]), "10:12,15");
    }

    #[test]
    fn compresses_pins_over_resolved_relays() {
        let table = table();
        assert_eq!(compress_pins(&table, &[]).unwrap(), "");
        assert_eq!(compress_pins(&table, &[2001]).unwrap(), "1201");
        assert_eq!(compress_pins(&table, &[1001, 1002, 1003, 1006]).unwrap(), "1101:1103,1106");
        assert_eq!(compress_pins(&table, &[1001, 1003, 1005]).unwrap(), "1101,1103,1105");
        assert_eq!(compress_pins(&table, &[1001, 1002, 1010]).unwrap(), "1101:1102,1110");
    }

    #[test]
    fn adjacent_pins_on_different_halves_stay_separate() {
        let table = table();
        assert_eq!(compress_pins(&table, &[1016, 1017]).unwrap(), "1116,1501");
        // Pin order is not relay order: 1017 -> 1501, 2001 -> 1201.
        assert_eq!(compress_pins(&table, &[1017, 2001]).unwrap(), "1201,1501");
    }

    #[test]
    fn duplicate_pins_collapse() {
        let table = table();
        assert_eq!(compress_pins(&table, &[1002, 1001, 1002]).unwrap(), "1101:1102");
    }

    #[test]
    fn whole_row_is_two_runs() {
        let table = table();
        let row = table.row_pins(1);
        assert_eq!(compress_pins(&table, &row).unwrap(), "1101:1116,1501:1516");
    }

    #[test]
    fn unknown_pin_fails_compression() {
        let table = table();
        assert_eq!(
            compress_pins(&table, &[1001, 99999]).unwrap_err(),
            SwitchError::UnknownPins(vec![99999])
        );
    }

    #[test]
    fn expand_inverts_compress() {
        let relays = vec![1101, 1102, 1103, 1106, 1201, 1501, 1502];
        assert_eq!(expand(&compress_relays(&relays)).unwrap(), relays);
        assert_eq!(expand("").unwrap(), Vec::<u32>::new());
        assert_eq!(expand("7").unwrap(), vec![7]);
    }

    #[test]
    fn expand_rejects_bad_grammar() {
        for expr in ["5,3", "3:1", "1:3,2", "a", "1, 2", "1,,2", "1:", ":4", "2,2"] {
            assert!(
                matches!(expand(expr), Err(SwitchError::MalformedRangeExpression(_))),
                "accepted {expr:?}"
            );
        }
    }

    #[test]
    fn decodes_state_responses() {
        assert_eq!(decode_states("1,0,1\n", 3).unwrap(), vec![true, false, true]);
        assert_eq!(decode_states("", 0).unwrap(), Vec::<bool>::new());
        assert!(decode_states("1,0", 3).is_err());
        assert!(decode_states("1,2,0", 3).is_err());
        assert!(decode_states("", 1).is_err());
    }

    #[test]
    fn states_follow_input_order() {
        let table = table();
        // Sorted relays: 1201 (pin 2001), 1501 (pin 1017)
        let states = states_for_pins(&table, &[1017, 2001, 1017], &[false, true]).unwrap();
        assert_eq!(states, vec![true, false, true]);
        assert!(states_for_pins(&table, &[1017], &[true, false]).is_err());
    }
}
