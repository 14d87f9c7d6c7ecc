//! Mock SCPI instrument for testing
//!
//! `MockScpi` stands in for a 34980A mainframe without physical hardware. It
//! provides:
//! - Slot inventory answers for `SYST:CTYP?`
//! - Relay state tracking for `ROUT:CLOSE`, `ROUT:OPEN` and `ROUT:CLOSE?`
//! - An error queue for `SYST:ERR?`
//! - Scripted responses, one-shot failure injection and a call log

use crate::hardware::scpi::ScpiTransport;
use crate::matrix::range_expr::{compress_relays, expand};
use crate::matrix::SLOT_COUNT;
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

const NO_ERROR: &str = "+0,\"No error\"";

/// Scripted SCPI instrument.
///
/// # Example
///
/// ```
/// use fixture_switch::hardware::mock::MockScpi;
/// use fixture_switch::hardware::scpi::ScpiTransport;
///
/// # tokio_test_block_on(async {
/// let mock = MockScpi::with_modules(&[1]);
/// let response = mock.query("SYST:CTYP? 1").await.unwrap();
/// assert!(response.contains("34932A"));
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Runtime::new().unwrap().block_on(f)
/// # }
/// ```
pub struct MockScpi {
    slots: Mutex<Vec<String>>,
    scripted: Mutex<Vec<(String, String)>>,
    closed: Mutex<BTreeSet<u32>>,
    errors: Mutex<VecDeque<String>>,
    should_fail_next: AtomicBool,
    call_log: Mutex<Vec<String>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockScpi {
    /// Create a mainframe with every slot empty.
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(vec![String::new(); usize::from(SLOT_COUNT)]),
            scripted: Mutex::new(Vec::new()),
            closed: Mutex::new(BTreeSet::new()),
            errors: Mutex::new(VecDeque::new()),
            should_fail_next: AtomicBool::new(false),
            call_log: Mutex::new(Vec::new()),
        }
    }

    /// Create a mainframe with 34932A modules in the given slots.
    pub fn with_modules(slots: &[u8]) -> Self {
        let mock = Self::new();
        for &slot in slots {
            mock.set_slot(slot, "AGILENT TECHNOLOGIES,34932A,0,1.10");
        }
        mock
    }

    /// Set the raw `SYST:CTYP?` answer for one slot (1-based).
    pub fn set_slot(&self, slot: u8, response: &str) {
        if let Some(entry) = locked(&self.slots).get_mut(usize::from(slot).wrapping_sub(1)) {
            *entry = response.to_string();
        }
    }

    /// Answer queries starting with `prefix` with `response`.
    ///
    /// Scripted answers take precedence over the simulated instrument.
    pub fn script(&self, prefix: &str, response: &str) {
        locked(&self.scripted).push((prefix.to_string(), response.to_string()));
    }

    /// Queue an entry for the next `SYST:ERR?`.
    pub fn push_error(&self, entry: &str) {
        locked(&self.errors).push_back(entry.to_string());
    }

    /// Trigger a failure on the next operation
    pub fn trigger_failure(&self) {
        self.should_fail_next.store(true, Ordering::SeqCst);
    }

    /// Currently closed relays, ascending.
    pub fn closed_relays(&self) -> Vec<u32> {
        locked(&self.closed).iter().copied().collect()
    }

    /// Get a copy of the call log for verification
    pub fn calls(&self) -> Vec<String> {
        locked(&self.call_log).clone()
    }

    /// Clear the call log
    pub fn clear_calls(&self) {
        locked(&self.call_log).clear();
    }

    fn log_call(&self, command: &str) -> Result<()> {
        locked(&self.call_log).push(command.to_string());
        if self.should_fail_next.swap(false, Ordering::SeqCst) {
            bail!("Mock transport failure on \"{}\"", command);
        }
        Ok(())
    }

    fn channel_list(argument: &str) -> Result<Vec<u32>> {
        let expr = argument
            .trim()
            .strip_prefix("(@")
            .and_then(|rest| rest.strip_suffix(')'))
            .ok_or_else(|| anyhow!("Malformed channel list '{}'", argument))?;
        Ok(expand(expr)?)
    }
}

impl Default for MockScpi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScpiTransport for MockScpi {
    async fn query(&self, command: &str) -> Result<String> {
        self.log_call(command)?;

        if let Some((_, response)) = locked(&self.scripted)
            .iter()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()))
        {
            return Ok(response.clone());
        }

        let (header, argument) = command.split_once(' ').unwrap_or((command, ""));
        match header.to_ascii_uppercase().as_str() {
            "*IDN?" => Ok("Agilent Technologies,34980A,MY00000000,2.41-2.41-0.00-0.00".into()),
            "SYST:CTYP?" => {
                let slot: usize = argument.trim().parse()?;
                locked(&self.slots)
                    .get(slot.wrapping_sub(1))
                    .cloned()
                    .ok_or_else(|| anyhow!("Invalid slot {}", slot))
            }
            "ROUT:CLOSE?" => {
                let relays = Self::channel_list(argument)?;
                let closed = locked(&self.closed);
                Ok(relays
                    .iter()
                    .map(|relay| if closed.contains(relay) { "1" } else { "0" })
                    .collect::<Vec<_>>()
                    .join(","))
            }
            header if header.starts_with("SYST:ERR?") => Ok(locked(&self.errors)
                .pop_front()
                .unwrap_or_else(|| NO_ERROR.to_string())),
            _ => bail!("Mock has no answer for \"{}\"", command),
        }
    }

    async fn write(&self, command: &str) -> Result<()> {
        self.log_call(command)?;

        let (header, argument) = command.split_once(' ').unwrap_or((command, ""));
        match header.to_ascii_uppercase().as_str() {
            "*RST" => locked(&self.closed).clear(),
            "ROUT:OPEN:ALL" => locked(&self.closed).clear(),
            "ROUT:CLOSE" => {
                let relays = Self::channel_list(argument)?;
                locked(&self.closed).extend(relays);
            }
            "ROUT:OPEN" => {
                let relays = Self::channel_list(argument)?;
                let mut closed = locked(&self.closed);
                for relay in relays {
                    closed.remove(&relay);
                }
            }
            _ => {}
        }
        Ok(())
    }
}

impl std::fmt::Debug for MockScpi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockScpi")
            .field("closed", &compress_relays(&self.closed_relays()))
            .field("calls", &locked(&self.call_log).len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tracks_relay_states() {
        let mock = MockScpi::with_modules(&[1]);
        mock.write("ROUT:CLOSE (@1101:1103,1201)").await.unwrap();
        mock.write("ROUT:OPEN (@1102)").await.unwrap();
        assert_eq!(mock.closed_relays(), vec![1101, 1103, 1201]);

        let states = mock.query("ROUT:CLOSE? (@1101:1103)").await.unwrap();
        assert_eq!(states, "1,0,1");

        mock.write("ROUT:OPEN:ALL ALL").await.unwrap();
        assert!(mock.closed_relays().is_empty());
    }

    #[tokio::test]
    async fn error_queue_drains() {
        let mock = MockScpi::new();
        mock.push_error("-221,\"Settings conflict\"");
        assert_eq!(mock.query("SYST:ERR?").await.unwrap(), "-221,\"Settings conflict\"");
        assert_eq!(mock.query("SYST:ERR?;*CLS").await.unwrap(), NO_ERROR);
    }

    #[tokio::test]
    async fn failure_is_one_shot() {
        let mock = MockScpi::new();
        mock.trigger_failure();
        assert!(mock.write("*RST").await.is_err());
        assert!(mock.write("*RST").await.is_ok());
        assert_eq!(mock.calls(), vec!["*RST", "*RST"]);
    }

    #[tokio::test]
    async fn scripted_answers_win() {
        let mock = MockScpi::with_modules(&[1]);
        mock.script("SYST:CTYP? 1", "");
        assert_eq!(mock.query("SYST:CTYP? 1").await.unwrap(), "");
        assert!(mock.query("MEAS:VOLT?").await.is_err());
    }

    #[tokio::test]
    async fn rejects_malformed_channel_list() {
        let mock = MockScpi::new();
        assert!(mock.write("ROUT:CLOSE 1101").await.is_err());
        assert!(mock.write("ROUT:CLOSE (@1103,1101)").await.is_err());
    }
}
