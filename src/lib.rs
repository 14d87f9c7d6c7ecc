//! # Fixture Switch Core Library
//!
//! Control library for a test fixture wired through an Agilent 34980A switch
//! mainframe populated with 34932A Dual 4x16 Armature Matrix modules, plus a
//! Keithley 2400 source/measure unit. Fixture pins are addressed as
//! `row * 1000 + column`; the library translates them to relay channels and
//! sends compact SCPI channel lists.
//!
//! ## Crate Structure
//!
//! - **`matrix`**: The hardware-independent core. Slot inventory parsing, the
//!   bidirectional pin/relay mapping table and the channel-list range
//!   expression codec.
//! - **`hardware`**: SCPI transport, a scripted mock mainframe, capability
//!   traits and the 34980A and 2400 drivers.
//! - **`config`**: TOML + environment configuration loaded with `figment`.
//! - **`error`**: The `SwitchError` enum for mapping and instrument failures.
//! - **`tracing_setup`**: Structured logging initialisation.
//!
//! ## Example
//!
//! ```
//! use fixture_switch::hardware::{capabilities::RelaySwitch, Agilent34980A, MockScpi};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let switch = Agilent34980A::init(MockScpi::with_modules(&[1, 2]), 64).await?;
//! switch.close(&[1001, 4064]).await?;
//! assert_eq!(switch.closed_states(&[1001, 2001]).await?, vec![true, false]);
//! # Ok::<(), anyhow::Error>(())
//! # }).unwrap();
//! ```

pub mod config;
pub mod error;
pub mod hardware;
pub mod matrix;
pub mod tracing_setup;
