//! Hardware Capabilities
//!
//! Small capability traits implemented by the instrument drivers, so that
//! orchestration code can be written against what a device does rather than
//! which device it is:
//!
//! - The switch mainframe implements `RelaySwitch`
//! - The source/measure unit implements `Readable`
//!
//! Each capability trait is async (`#[async_trait]`), thread-safe
//! (`Send + Sync`) and returns `anyhow::Result`.

use anyhow::Result;
use async_trait::async_trait;

/// Capability: Fixture Commutation
///
/// Devices that connect fixture pins to measurement rows through relays.
///
/// # Contract
/// - Pins are logical fixture pins (`row * 1000 + column`)
/// - Every pin is validated before any relay moves; an unknown pin fails the
///   whole call with nothing switched
/// - `closed_states` answers in the order of the `pins` argument
#[async_trait]
pub trait RelaySwitch: Send + Sync {
    /// Close the relays wired to `pins`.
    async fn close(&self, pins: &[u32]) -> Result<()>;

    /// Open the relays wired to `pins`.
    async fn open(&self, pins: &[u32]) -> Result<()>;

    /// Whether each pin's relay is currently closed.
    async fn closed_states(&self, pins: &[u32]) -> Result<Vec<bool>>;

    /// Open every relay of every installed module.
    async fn open_all(&self) -> Result<()>;
}

/// Capability: Scalar Readout
///
/// Devices that return one measured value per read.
#[async_trait]
pub trait Readable: Send + Sync {
    /// Read the current measurand in base SI units.
    async fn read(&self) -> Result<f64>;
}
