//! Agilent 34980A Multifunction Switch/Measure Mainframe Driver
//!
//! Reference: Agilent 34980A User's Guide, 34932A Dual 4x16 Armature Matrix
//! User's Guide.
//!
//! Protocol Overview:
//! - SCPI over LAN (raw socket, port 5025)
//! - Slot inventory: `SYST:CTYP? <slot>`
//! - Switching: `ROUT:CLOSE (@<list>)`, `ROUT:OPEN (@<list>)`
//! - State query: `ROUT:CLOSE? (@<list>)`, one `0`/`1` per listed relay
//!
//! # Example Usage
//!
//! ```no_run
//! use fixture_switch::hardware::agilent_34980a::Agilent34980A;
//! use fixture_switch::hardware::capabilities::RelaySwitch;
//! use fixture_switch::hardware::scpi::TcpScpiClient;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let transport =
//!         TcpScpiClient::connect("TCPIP0::192.168.1.50::INSTR", Duration::from_secs(5)).await?;
//!     let switch = Agilent34980A::init(transport, 64).await?;
//!
//!     switch.close(&[1001, 1002, 2040]).await?;
//!     let states = switch.closed_states(&[1001, 3001]).await?;
//!     println!("{:?}", states);
//!
//!     switch.open_all().await
//! }
//! ```

use crate::hardware::capabilities::RelaySwitch;
use crate::hardware::scpi::ScpiTransport;
use crate::matrix::inventory::{discover_modules, Module};
use crate::matrix::range_expr::{compress_pins, compress_relays, decode_states, sorted_relays, states_for_pins};
use crate::matrix::table::{CapacityAdvisory, MappingTable, TableBuild};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::fmt;
use tracing::{debug, info};

/// Target state of a relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// Contact open
    Open,
    /// Contact closed
    Closed,
}

impl RelayState {
    fn keyword(self) -> &'static str {
        match self {
            RelayState::Open => "OPEN",
            RelayState::Closed => "CLOSE",
        }
    }
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Driver for the 34980A mainframe populated with 34932A modules.
///
/// A value of this type only exists once the mapping table is built, so every
/// method can translate pins without a readiness check.
pub struct Agilent34980A<T> {
    transport: T,
    modules: Vec<Module>,
    table: MappingTable,
    advisory: Option<CapacityAdvisory>,
}

impl<T: ScpiTransport> Agilent34980A<T> {
    /// Reset the mainframe, read its slots and build the mapping table for a
    /// fixture `pin_count` columns wide.
    ///
    /// # Errors
    /// Fails when the reset is rejected or no 34932A module is installed.
    /// Too few modules is not an error; see [`Self::capacity_advisory`].
    pub async fn init(transport: T, pin_count: u32) -> Result<Self> {
        transport
            .write_checked("*RST")
            .await
            .context("switch reset failed")?;

        let modules = discover_modules(&transport).await;
        let TableBuild { table, advisory } = MappingTable::build(&modules, pin_count)
            .context("failed to build the pin mapping table")?;

        info!(
            pins_per_row = table.pins_per_row(),
            slots = ?table.allocated_slots(),
            clamped = advisory.is_some(),
            "Agilent 34980A initialised"
        );

        Ok(Self {
            transport,
            modules,
            table,
            advisory,
        })
    }

    /// Slot inventory read during initialisation.
    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    /// The pin/relay mapping table.
    pub fn table(&self) -> &MappingTable {
        &self.table
    }

    /// Present when fewer modules are installed than the fixture needs.
    pub fn capacity_advisory(&self) -> Option<&CapacityAdvisory> {
        self.advisory.as_ref()
    }

    /// Underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Open or close the relays wired to `pins`.
    ///
    /// All pins are resolved before anything is sent; an empty pin list sends
    /// nothing.
    pub async fn set_commutation(&self, pins: &[u32], state: RelayState) -> Result<()> {
        let expr = compress_pins(&self.table, pins).context("commutation failed")?;
        if expr.is_empty() {
            debug!(%state, "Empty pin list, nothing to switch");
            return Ok(());
        }

        self.transport
            .write_checked(&format!("ROUT:{} (@{})", state, expr))
            .await
            .context("commutation failed")
    }

    /// Closed/open state of each pin, in the order of `pins`.
    pub async fn commutation_state(&self, pins: &[u32]) -> Result<Vec<bool>> {
        const ERR_MSG: &str = "failed to get pin states";

        let relays = sorted_relays(&self.table, pins).context(ERR_MSG)?;
        if relays.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .transport
            .query(&format!("ROUT:CLOSE? (@{})", compress_relays(&relays)))
            .await
            .context(ERR_MSG)?;
        let states = decode_states(&response, relays.len()).context(ERR_MSG)?;
        states_for_pins(&self.table, pins, &states).context(ERR_MSG)
    }

    /// Open every relay of every installed module.
    ///
    /// `*OPC` holds the error-queue check until the relays have settled.
    pub async fn open_all_relays(&self) -> Result<()> {
        self.transport
            .write_checked("ROUT:OPEN:ALL ALL;*OPC")
            .await
            .context("failed to open all relays")
    }
}

#[async_trait]
impl<T: ScpiTransport> RelaySwitch for Agilent34980A<T> {
    async fn close(&self, pins: &[u32]) -> Result<()> {
        self.set_commutation(pins, RelayState::Closed).await
    }

    async fn open(&self, pins: &[u32]) -> Result<()> {
        self.set_commutation(pins, RelayState::Open).await
    }

    async fn closed_states(&self, pins: &[u32]) -> Result<Vec<bool>> {
        self.commutation_state(pins).await
    }

    async fn open_all(&self) -> Result<()> {
        self.open_all_relays().await
    }
}
