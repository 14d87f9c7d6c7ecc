//! Custom error types for the switch core.
//!
//! `SwitchError` covers everything the mapping engine and the range-expression
//! codec can reject. The hardware layer returns `anyhow::Result` and attaches
//! context naming the operation in progress; a `SwitchError` raised underneath
//! stays reachable through `anyhow::Error::downcast_ref`.
//!
//! ## Error Hierarchy
//!
//! - **`NoUsableModules`**: no supported matrix module is installed, so no
//!   mapping table can be built. Fatal to switch initialisation.
//! - **`UnknownPins`** / **`UnknownRelays`**: a lookup hit values absent from
//!   the table. Every offending value is reported, not just the first.
//! - **`MalformedRangeExpression`** / **`MalformedStateResponse`**: text that
//!   does not follow the instrument's range or state grammar.
//! - **`Instrument`**: the instrument error queue reported a non-zero code.
//! - **`Configuration`**: semantic errors in loaded configuration.

use thiserror::Error;

/// Convenience alias for results using the switch error type.
pub type SwitchResult<T> = std::result::Result<T, SwitchError>;

/// Errors raised by the mapping core and SCPI text codecs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SwitchError {
    /// Zero usable matrix modules were found in the mainframe slots.
    #[error("no {module_type} module found in the switch mainframe slots")]
    NoUsableModules {
        /// Type identifier of the supported module
        module_type: &'static str,
    },

    /// Pins not present in the current mapping table.
    #[error("{} are not pin numbers for the current switch configuration", join_values(.0))]
    UnknownPins(Vec<u32>),

    /// Relays not present in the current mapping table.
    #[error("{} are not relay numbers for the current switch configuration", join_values(.0))]
    UnknownRelays(Vec<u32>),

    /// Range expression that violates the `low:high,single` grammar.
    #[error("malformed range expression: {0}")]
    MalformedRangeExpression(String),

    /// Relay-state query response that cannot be decoded.
    #[error("malformed relay state response: {0}")]
    MalformedStateResponse(String),

    /// Non-zero entry read from the instrument error queue.
    #[error("instrument error {code}: {message}")]
    Instrument {
        /// Numeric SCPI error code
        code: i32,
        /// Message text reported by the instrument
        message: String,
    },

    /// Configuration values that parsed but make no sense.
    #[error("Configuration validation error: {0}")]
    Configuration(String),
}

fn join_values(values: &[u32]) -> String {
    values
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_pins_lists_every_value() {
        let err = SwitchError::UnknownPins(vec![99999, 5001]);
        assert_eq!(
            err.to_string(),
            "99999,5001 are not pin numbers for the current switch configuration"
        );
    }

    #[test]
    fn instrument_error_message() {
        let err = SwitchError::Instrument {
            code: -113,
            message: "Undefined header".into(),
        };
        assert_eq!(err.to_string(), "instrument error -113: Undefined header");
    }

    #[test]
    fn survives_anyhow_context() {
        let err = anyhow::Error::new(SwitchError::UnknownRelays(vec![42]))
            .context("commutation failed");
        assert_eq!(err.to_string(), "commutation failed");
        assert_eq!(
            err.downcast_ref::<SwitchError>(),
            Some(&SwitchError::UnknownRelays(vec![42]))
        );
    }
}
