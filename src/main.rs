//! CLI Entry Point for fixture-switch
//!
//! Drives the fixture switch matrix from the command line:
//! - Inspect the slot inventory and the pin/relay mapping table
//! - Open, close and query fixture pins
//! - Print the channel list a pin set compresses to
//! - Source a voltage or current on the SMU and take one reading
//!
//! # Usage
//!
//! ```bash
//! fixture-switch --config config/fixture_switch.toml close 1001 1002 2040
//! fixture-switch --mock 2 --pin-count 64 map
//! fixture-switch source --voltage 1.5 --compliance 0.001
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fixture_switch::config::{AppConfig, ApplicationConfig, SwitchConfig, DEFAULT_CONFIG_PATH};
use fixture_switch::hardware::capabilities::RelaySwitch;
use fixture_switch::hardware::keithley_2400::Ranging;
use fixture_switch::hardware::{
    Agilent34980A, Keithley2400, MockScpi, ScpiTransport, SourceSetup, TcpScpiClient,
};
use fixture_switch::matrix::{compress_pins, MATRIX_ROWS, PINS_PER_MODULE, SLOT_COUNT};
use fixture_switch::tracing_setup;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "fixture-switch")]
#[command(about = "Pin-level control of a 34980A fixture switch matrix", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Use a simulated mainframe with this many 34932A modules
    #[arg(long, global = true, value_parser = clap::value_parser!(u8).range(1..=i64::from(SLOT_COUNT)))]
    mock: Option<u8>,

    /// Override the configured fixture pin count
    #[arg(long, global = true)]
    pin_count: Option<u32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the installed modules
    Slots,
    /// Print the pin to relay mapping table
    Map,
    /// Close the relays of the given pins
    Close {
        #[arg(required = true)]
        pins: Vec<u32>,
    },
    /// Open the relays of the given pins
    Open {
        #[arg(required = true)]
        pins: Vec<u32>,
    },
    /// Report whether each pin is closed
    State {
        #[arg(required = true)]
        pins: Vec<u32>,
    },
    /// Open every relay
    OpenAll,
    /// Print the channel list for the given pins without switching
    Expr {
        #[arg(required = true)]
        pins: Vec<u32>,
    },
    /// Source a voltage or current on the SMU and print one reading
    Source {
        /// Source level in volts
        #[arg(long, allow_hyphen_values = true, required_unless_present = "current")]
        voltage: Option<f64>,
        /// Source level in amperes
        #[arg(long, allow_hyphen_values = true, conflicts_with = "voltage")]
        current: Option<f64>,
        /// Compliance limit of the measured quantity
        #[arg(long)]
        compliance: f64,
        /// Integration time in power-line cycles
        #[arg(long, default_value_t = 1.0)]
        nplc: f64,
        /// Fix source and sense ranges instead of auto ranging
        #[arg(long)]
        fixed_range: bool,
        /// Four-wire sensing
        #[arg(long)]
        remote_sense: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli)?;
    tracing_setup::init_from_config(&config).map_err(anyhow::Error::msg)?;

    if let Commands::Source {
        voltage,
        current,
        compliance,
        nplc,
        fixed_range,
        remote_sense,
    } = cli.command
    {
        let setup = match (voltage, current) {
            (Some(level), _) => SourceSetup::voltage(level, compliance),
            (None, Some(level)) => SourceSetup::current(level, compliance),
            (None, None) => anyhow::bail!("either --voltage or --current is required"),
        }
        .with_nplc(nplc)
        .with_ranging(if fixed_range { Ranging::Fixed } else { Ranging::Auto })
        .with_remote_sense(remote_sense);
        return source(cli.mock.is_some(), &config, &setup).await;
    }

    match cli.mock {
        Some(modules) => {
            let slots: Vec<u8> = (1..=modules).collect();
            info!(?slots, "Using simulated mainframe");
            run(MockScpi::with_modules(&slots), &config, cli.command).await
        }
        None => {
            let client = TcpScpiClient::connect(&config.switch.address, config.switch.timeout())
                .await
                .with_context(|| format!("failed to connect to {}", config.switch.address))?;
            run(client, &config, cli.command).await
        }
    }
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match AppConfig::load_from(&cli.config) {
        Ok(config) => config,
        Err(e) if cli.mock.is_some() => {
            eprintln!("warning: {e}; using simulated defaults");
            AppConfig {
                application: ApplicationConfig::default(),
                switch: SwitchConfig {
                    address: "mock".to_string(),
                    pin_count: u32::from(cli.mock.unwrap_or(1)) * PINS_PER_MODULE,
                    timeout_ms: 5000,
                },
                smu: None,
            }
        }
        Err(e) => {
            return Err(e).with_context(|| format!("failed to load {}", cli.config.display()));
        }
    };

    if let Some(pin_count) = cli.pin_count {
        config.switch.pin_count = pin_count;
    }
    config.validate()?;
    Ok(config)
}

async fn source(mock: bool, config: &AppConfig, setup: &SourceSetup) -> Result<()> {
    let reading = if mock {
        let transport = MockScpi::new();
        transport.script(":READ?", &format!("{:E},{:E}", setup.level, 0.0));
        Keithley2400::init(transport).await?.source_and_read(setup).await?
    } else {
        let smu = config
            .smu
            .as_ref()
            .context("no [smu] section in the configuration")?;
        let transport = TcpScpiClient::connect(&smu.address, smu.timeout())
            .await
            .with_context(|| format!("failed to connect to {}", smu.address))?;
        Keithley2400::init(transport).await?.source_and_read(setup).await?
    };

    println!("{} V, {} A", reading.voltage, reading.current);
    Ok(())
}

async fn run<T: ScpiTransport>(transport: T, config: &AppConfig, command: Commands) -> Result<()> {
    let switch = Agilent34980A::init(transport, config.switch.pin_count).await?;
    if let Some(advisory) = switch.capacity_advisory() {
        eprintln!("warning: {}", advisory);
    }

    match command {
        Commands::Slots => {
            for module in switch.modules() {
                println!("slot {}: {}", module.slot, module.kind);
            }
        }
        Commands::Map => {
            for row in 1..=MATRIX_ROWS {
                for pin in switch.table().row_pins(row) {
                    if let Some(relay) = switch.table().relay_of(pin) {
                        println!("{pin} -> {relay}");
                    }
                }
            }
        }
        Commands::Close { pins } => {
            switch.close(&pins).await?;
            println!("closed {}", compress_pins(switch.table(), &pins)?);
        }
        Commands::Open { pins } => {
            switch.open(&pins).await?;
            println!("opened {}", compress_pins(switch.table(), &pins)?);
        }
        Commands::State { pins } => {
            let states = switch.closed_states(&pins).await?;
            for (pin, closed) in pins.iter().zip(states) {
                println!("{pin}: {}", if closed { "CLOSED" } else { "OPEN" });
            }
        }
        Commands::OpenAll => {
            switch.open_all().await?;
            println!("all relays open");
        }
        Commands::Expr { pins } => {
            println!("{}", compress_pins(switch.table(), &pins)?);
        }
        Commands::Source { .. } => anyhow::bail!("source does not use the switch"),
    }

    Ok(())
}
