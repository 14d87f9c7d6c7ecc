//! Instrument drivers and their SCPI transports.
//!
//! - `scpi`: transport trait, raw-socket client, error-queue handling
//! - `mock`: scripted 34980A stand-in for tests and `--mock` runs
//! - `capabilities`: `RelaySwitch` and `Readable` traits
//! - `agilent_34980a`: switch mainframe driver on top of the mapping core
//! - `keithley_2400`: source/measure unit driver

pub mod agilent_34980a;
pub mod capabilities;
pub mod keithley_2400;
pub mod mock;
pub mod scpi;

pub use agilent_34980a::{Agilent34980A, RelayState};
pub use keithley_2400::{Keithley2400, SourceSetup};
pub use mock::MockScpi;
pub use scpi::{ScpiTransport, TcpScpiClient};
