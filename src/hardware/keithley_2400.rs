//! Keithley 2400 SourceMeter Driver
//!
//! Reference: Keithley Series 2400 SourceMeter User's Manual
//!
//! Protocol Overview:
//! - SCPI, here carried over a GPIB-LAN bridge or the mock transport
//! - Source setup: `SOUR:FUNC`, `SOUR:<f>:RANG`, `SENS:<f>:PROT`, `SENS:<f>:NPLC`
//! - Readout: `:READ?` with `FORM:ELEM VOLT,CURR` returns `<volts>,<amps>`
//!
//! Commands that the instrument accepts silently in any state are written
//! without an error-queue check; level, range and compliance settings are
//! checked because they can conflict with each other.

use crate::hardware::capabilities::Readable;
use crate::hardware::scpi::ScpiTransport;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

/// Source voltage ranges, volts.
pub const VOLTAGE_RANGES: [f64; 5] = [0.02, 0.2, 2.0, 20.0, 200.0];

/// Source/measure current ranges, amperes.
pub const CURRENT_RANGES: [f64; 9] = [10e-9, 100e-9, 1e-6, 10e-6, 100e-6, 1e-3, 0.01, 0.1, 1.0];

/// Smallest range that holds `|target|`, or the largest range when none does.
pub fn suitable_range(ranges: &[f64], target: f64) -> f64 {
    let magnitude = target.abs();
    let largest = ranges.iter().copied().fold(f64::NAN, f64::max);
    ranges
        .iter()
        .copied()
        .filter(|&range| range >= magnitude)
        .fold(None, |best: Option<f64>, range| {
            Some(best.map_or(range, |b| b.min(range)))
        })
        .unwrap_or(largest)
}

/// What the instrument sources; the other quantity is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFunction {
    /// Source volts, measure amps
    Voltage,
    /// Source amps, measure volts
    Current,
}

impl SourceFunction {
    fn source_keyword(self) -> &'static str {
        match self {
            SourceFunction::Voltage => "VOLT",
            SourceFunction::Current => "CURR",
        }
    }

    fn sense_keyword(self) -> &'static str {
        match self {
            SourceFunction::Voltage => "CURR",
            SourceFunction::Current => "VOLT",
        }
    }
}

/// Ranging policy for source and sense.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ranging {
    /// Instrument picks the range
    Auto,
    /// Range fixed to the smallest one holding the level/compliance
    Fixed,
}

/// Source/measure configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSetup {
    /// Sourced quantity
    pub function: SourceFunction,
    /// Source level in volts or amps
    pub level: f64,
    /// Compliance limit of the measured quantity
    pub compliance: f64,
    /// Integration time in power-line cycles (0.01..=10)
    pub nplc: f64,
    /// Ranging policy
    pub ranging: Ranging,
    /// Four-wire remote sensing
    pub remote_sense: bool,
}

/// Commands realising a [`SourceSetup`], split by error checking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupCommands {
    /// Written without an error-queue check
    pub unchecked: Vec<String>,
    /// Written with an error-queue check
    pub checked: Vec<String>,
}

impl SourceSetup {
    /// Voltage source with compliance current, auto ranging, 1 NPLC.
    pub fn voltage(level: f64, compliance_amps: f64) -> Self {
        Self::new(SourceFunction::Voltage, level, compliance_amps)
    }

    /// Current source with compliance voltage, auto ranging, 1 NPLC.
    pub fn current(level: f64, compliance_volts: f64) -> Self {
        Self::new(SourceFunction::Current, level, compliance_volts)
    }

    fn new(function: SourceFunction, level: f64, compliance: f64) -> Self {
        Self {
            function,
            level,
            compliance,
            nplc: 1.0,
            ranging: Ranging::Auto,
            remote_sense: false,
        }
    }

    /// Set integration time.
    pub fn with_nplc(mut self, nplc: f64) -> Self {
        self.nplc = nplc;
        self
    }

    /// Set ranging policy.
    pub fn with_ranging(mut self, ranging: Ranging) -> Self {
        self.ranging = ranging;
        self
    }

    /// Enable or disable four-wire sensing.
    pub fn with_remote_sense(mut self, enabled: bool) -> Self {
        self.remote_sense = enabled;
        self
    }

    /// Check limits the instrument would reject.
    pub fn validate(&self) -> Result<()> {
        if !(0.01..=10.0).contains(&self.nplc) {
            bail!("NPLC must be within 0.01..=10, got {}", self.nplc);
        }
        if self.compliance.is_nan() || self.compliance <= 0.0 {
            bail!("Compliance must be positive, got {}", self.compliance);
        }
        if !self.level.is_finite() {
            bail!("Source level must be finite, got {}", self.level);
        }
        Ok(())
    }

    /// SCPI command sequence for this setup.
    pub fn commands(&self) -> SetupCommands {
        let src = self.function.source_keyword();
        let sense = self.function.sense_keyword();
        let (source_ranges, sense_ranges): (&[f64], &[f64]) = match self.function {
            SourceFunction::Voltage => (&VOLTAGE_RANGES, &CURRENT_RANGES),
            SourceFunction::Current => (&CURRENT_RANGES, &VOLTAGE_RANGES),
        };
        let auto = self.ranging == Ranging::Auto;

        let mut unchecked = vec![
            format!("SOUR:FUNC {src}"),
            "OUTP:SMOD ZERO".to_string(),
        ];
        if self.function == SourceFunction::Voltage {
            unchecked.push("SOUR:VOLT:PROT:LEV 210".to_string());
        }
        unchecked.push(format!("SOUR:{src}:MODE FIX"));
        unchecked.push(format!("SOUR:{src}:RANG:AUTO {}", on_off(auto)));
        unchecked.push("SOUR:DEL:AUTO ON".to_string());
        unchecked.push("SYST:AZER:STAT ONCE".to_string());
        unchecked.push(format!("SENS:FUNC \"{sense}:DC\""));
        unchecked.push(format!("SENS:{sense}:DC:RANG:AUTO {}", on_off(auto)));

        let mut checked = Vec::new();
        if !auto {
            checked.push(format!(
                "SOUR:{src}:RANG {}",
                suitable_range(source_ranges, self.level)
            ));
        }
        checked.push(format!("SOUR:{src} {}", self.level));
        if !auto {
            checked.push(format!(
                "SENS:{sense}:DC:RANG {}",
                suitable_range(sense_ranges, self.compliance)
            ));
        }
        checked.push(format!("SENS:{sense}:PROT {}", self.compliance));
        checked.push(format!("SENS:{sense}:NPLC {}", self.nplc));

        unchecked.push(format!("SYST:RSEN {}", on_off(self.remote_sense)));

        SetupCommands { unchecked, checked }
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "ON"
    } else {
        "OFF"
    }
}

/// One `:READ?` result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceReading {
    /// Volts
    pub voltage: f64,
    /// Amperes
    pub current: f64,
}

/// Parse a `<volts>,<amps>` `:READ?` response.
pub fn parse_reading(response: &str) -> Result<SourceReading> {
    let mut fields = response.trim().split(',').map(str::trim);
    let mut next = |name: &str| -> Result<f64> {
        let field = fields
            .next()
            .ok_or_else(|| anyhow!("missing {} in reading '{}'", name, response.trim()))?;
        field
            .parse::<f64>()
            .with_context(|| format!("conversion for {} value '{}' failed", name, field))
    };
    let voltage = next("voltage")?;
    let current = next("current")?;
    Ok(SourceReading { voltage, current })
}

/// Driver for the Keithley 2400 SourceMeter.
pub struct Keithley2400<T> {
    transport: T,
    function: Mutex<Option<SourceFunction>>,
}

impl<T: ScpiTransport> Keithley2400<T> {
    /// Reset the instrument and select the `voltage,current` reading format.
    pub async fn init(transport: T) -> Result<Self> {
        transport
            .write_checked("*RST")
            .await
            .context("source/measure unit reset failed")?;
        transport
            .write_checked("FORM:ELEM VOLT,CURR")
            .await
            .context("reading format selection failed")?;
        Ok(Self {
            transport,
            function: Mutex::new(None),
        })
    }

    /// Underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Apply a source configuration.
    pub async fn configure(&self, setup: &SourceSetup) -> Result<()> {
        let context = match (setup.function, setup.ranging) {
            (SourceFunction::Voltage, Ranging::Auto) => "auto range voltage source init fail",
            (SourceFunction::Voltage, Ranging::Fixed) => "fixed range voltage source init fail",
            (SourceFunction::Current, Ranging::Auto) => "auto range current source init fail",
            (SourceFunction::Current, Ranging::Fixed) => "fixed range current source init fail",
        };
        setup.validate().context(context)?;

        let commands = setup.commands();
        for command in &commands.unchecked {
            self.transport.write(command).await.context(context)?;
        }
        for command in &commands.checked {
            self.transport.write_checked(command).await.context(context)?;
        }

        debug!(?setup, "Source configured");
        *self.function.lock().unwrap_or_else(PoisonError::into_inner) = Some(setup.function);
        Ok(())
    }

    /// Switch the output on or off.
    pub async fn set_output(&self, enabled: bool) -> Result<()> {
        self.transport
            .write_checked(&format!("OUTP {}", on_off(enabled)))
            .await
            .context("output switching failed")
    }

    /// Trigger and read one voltage/current pair.
    pub async fn read_source_data(&self) -> Result<SourceReading> {
        let response = self.transport.query(":READ?").await.context("data read fail")?;
        parse_reading(&response)
    }

    /// Apply `setup`, switch the output on for one reading, then off again.
    ///
    /// The output is switched off even when the reading fails.
    pub async fn source_and_read(&self, setup: &SourceSetup) -> Result<SourceReading> {
        self.configure(setup).await?;
        self.set_output(true).await?;
        let reading = self.read_source_data().await;
        self.set_output(false).await?;
        reading
    }
}

#[async_trait]
impl<T: ScpiTransport> Readable for Keithley2400<T> {
    /// Reads the measured quantity of the configured source function.
    async fn read(&self) -> Result<f64> {
        let function = *self.function.lock().unwrap_or_else(PoisonError::into_inner);
        let reading = self.read_source_data().await?;
        match function {
            Some(SourceFunction::Voltage) => Ok(reading.current),
            Some(SourceFunction::Current) => Ok(reading.voltage),
            None => bail!("source function not configured"),
        }
    }
}
