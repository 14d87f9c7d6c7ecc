//! SCPI transport abstraction and raw-socket client.
//!
//! Both instruments speak SCPI over LAN. [`ScpiTransport`] hides the carrier so
//! drivers work unchanged against [`TcpScpiClient`] or
//! [`MockScpi`](crate::hardware::mock::MockScpi).

use crate::error::SwitchError;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

/// Default raw-socket SCPI port of Keysight/Agilent LXI instruments.
pub const DEFAULT_SCPI_PORT: u16 = 5025;

/// Default command timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Query that pops one entry off the instrument error queue.
pub const ERROR_QUERY: &str = "SYST:ERR?";

/// Trait for SCPI communication transports.
#[async_trait]
pub trait ScpiTransport: Send + Sync {
    /// Send a query command and return the trimmed response.
    async fn query(&self, command: &str) -> Result<String>;

    /// Send a command without expecting a response.
    async fn write(&self, command: &str) -> Result<()>;

    /// Read the error queue and fail on any non-zero entry.
    async fn check_errors(&self) -> Result<()> {
        let response = self
            .query(&format!("{ERROR_QUERY};*CLS"))
            .await
            .context("error queue query failed")?;
        parse_error_response(&response)
    }

    /// Send a command, then check the error queue.
    async fn write_checked(&self, command: &str) -> Result<()> {
        self.write(command).await?;
        self.check_errors()
            .await
            .with_context(|| format!("instrument rejected \"{command}\""))
    }

    /// Query `*IDN?`.
    async fn identify(&self) -> Result<InstrumentInfo> {
        let response = self.query("*IDN?").await?;
        InstrumentInfo::parse(&response)
    }
}

/// Decode one `SYST:ERR?` entry such as `-113,"Undefined header"`.
pub fn parse_error_response(response: &str) -> Result<()> {
    let cleaned = response.trim().replace('"', "");
    let (code, message) = cleaned.split_once(',').unwrap_or((cleaned.as_str(), ""));
    let code: i32 = code
        .trim()
        .parse()
        .map_err(|_| anyhow!("unreadable error queue response '{}'", response.trim()))?;

    if code != 0 {
        return Err(SwitchError::Instrument {
            code,
            message: message.trim().to_string(),
        }
        .into());
    }
    Ok(())
}

/// Identification fields from `*IDN?`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentInfo {
    /// Manufacturer name
    pub manufacturer: String,
    /// Model number
    pub model: String,
    /// Serial number
    pub serial: String,
    /// Firmware version
    pub version: String,
}

impl InstrumentInfo {
    /// Parse a `manufacturer,model,serial,version` response.
    pub fn parse(response: &str) -> Result<Self> {
        let fields: Vec<&str> = response.trim().splitn(4, ',').map(str::trim).collect();
        match fields.as_slice() {
            [manufacturer, model, serial, version] => Ok(Self {
                manufacturer: manufacturer.to_string(),
                model: model.to_string(),
                serial: serial.to_string(),
                version: version.to_string(),
            }),
            _ => bail!("unexpected *IDN? response '{}'", response.trim()),
        }
    }
}

impl fmt::Display for InstrumentInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Manufacturer:\t{}", self.manufacturer)?;
        writeln!(f, "Model:\t\t{}", self.model)?;
        writeln!(f, "Serial:\t\t{}", self.serial)?;
        writeln!(f, "Version:\t{}", self.version)
    }
}

/// Resolve an instrument address to `(host, port)`.
///
/// Accepts VISA LAN resources (`TCPIP0::10.0.0.5::INSTR`,
/// `TCPIP0::10.0.0.5::5025::SOCKET`), `host:port` and a bare host.
pub fn parse_address(address: &str) -> Result<(String, u16)> {
    let address = address.trim();
    if address.to_ascii_uppercase().starts_with("TCPIP") {
        let parts: Vec<&str> = address.split("::").collect();
        return match parts.as_slice() {
            [_, host, suffix] if suffix.eq_ignore_ascii_case("INSTR") => {
                Ok((host.to_string(), DEFAULT_SCPI_PORT))
            }
            [_, host, port, suffix] if suffix.eq_ignore_ascii_case("SOCKET") => {
                let port = port
                    .parse()
                    .with_context(|| format!("Invalid port in resource '{address}'"))?;
                Ok((host.to_string(), port))
            }
            _ => bail!("Unsupported VISA resource '{address}'"),
        };
    }

    match address.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse()
                .with_context(|| format!("Invalid address: {address}"))?;
            Ok((host.to_string(), port))
        }
        None if !address.is_empty() => Ok((address.to_string(), DEFAULT_SCPI_PORT)),
        None => bail!("Empty instrument address"),
    }
}

/// SCPI client over a raw TCP socket.
///
/// A command that times out leaves the instrument out of step with the
/// client: its late reply would be read as the answer to the next query. The
/// connection is therefore dropped on timeout and re-opened by the next call.
pub struct TcpScpiClient {
    stream: Mutex<Option<BufReader<TcpStream>>>,
    host: String,
    port: u16,
    address: String,
    timeout: Duration,
}

impl TcpScpiClient {
    /// Connect to an instrument address (see [`parse_address`]).
    pub async fn connect(address: &str, io_timeout: Duration) -> Result<Self> {
        let (host, port) = parse_address(address)?;
        let stream = Self::open(&host, port, io_timeout).await?;

        Ok(Self {
            stream: Mutex::new(Some(stream)),
            address: format!("{host}:{port}"),
            host,
            port,
            timeout: io_timeout,
        })
    }

    /// Address this client is connected to.
    pub fn address(&self) -> &str {
        &self.address
    }

    async fn open(host: &str, port: u16, io_timeout: Duration) -> Result<BufReader<TcpStream>> {
        let stream = timeout(io_timeout, TcpStream::connect((host, port)))
            .await
            .with_context(|| format!("Connection timeout to {}:{}", host, port))?
            .with_context(|| format!("Failed to connect to {}:{}", host, port))?;
        stream.set_nodelay(true)?;

        tracing::info!("Connected to SCPI instrument at {}:{}", host, port);
        Ok(BufReader::new(stream))
    }

    /// The live connection, re-opened if an earlier timeout dropped it.
    async fn connection<'a>(
        &self,
        slot: &'a mut Option<BufReader<TcpStream>>,
    ) -> Result<&'a mut BufReader<TcpStream>> {
        if slot.is_none() {
            tracing::debug!("Reconnecting to {}", self.address);
            *slot = Some(Self::open(&self.host, self.port, self.timeout).await?);
        }
        slot.as_mut()
            .ok_or_else(|| anyhow!("No connection to {}", self.address))
    }

    async fn send(stream: &mut BufReader<TcpStream>, command: &str) -> Result<()> {
        stream
            .get_mut()
            .write_all(format!("{command}\n").as_bytes())
            .await
            .with_context(|| format!("Failed to write command: {}", command))?;
        stream
            .get_mut()
            .flush()
            .await
            .context("Failed to flush stream")
    }

    /// Clear any pending data from the input buffer.
    async fn flush_input_buffer(stream: &mut BufReader<TcpStream>) {
        let buffered = stream.buffer().len();
        if buffered > 0 {
            tracing::debug!("Flushing {} bytes from buffer", buffered);
            stream.consume(buffered);
        }

        let mut discard = [0u8; 256];
        loop {
            match timeout(Duration::from_millis(10), stream.get_mut().peek(&mut discard)).await {
                Ok(Ok(n)) if n > 0 => {
                    let flushed = stream.get_mut().try_read(&mut discard[..n]).unwrap_or(0);
                    tracing::debug!("Flushed {} stale bytes from stream", flushed);
                    if flushed == 0 {
                        break;
                    }
                }
                _ => break,
            }
        }
    }
}

#[async_trait]
impl ScpiTransport for TcpScpiClient {
    async fn query(&self, command: &str) -> Result<String> {
        let mut slot = self.stream.lock().await;
        let stream = self.connection(&mut slot).await?;
        Self::flush_input_buffer(stream).await;
        tracing::debug!("SCPI query: {:?}", command);

        let mut response = String::new();
        let exchange = async {
            Self::send(stream, command).await?;
            let read = stream
                .read_line(&mut response)
                .await
                .context("Failed to read response")?;
            Ok::<usize, anyhow::Error>(read)
        };
        match timeout(self.timeout, exchange).await {
            Ok(Ok(0)) => {
                *slot = None;
                bail!("Connection closed by {}", self.address)
            }
            Ok(Ok(_)) => {
                let trimmed = response.trim().to_string();
                tracing::debug!("SCPI response: {:?}", trimmed);
                Ok(trimmed)
            }
            Ok(Err(e)) => {
                *slot = None;
                Err(e)
            }
            Err(_) => {
                *slot = None;
                bail!("Timeout waiting for response to: {}", command)
            }
        }
    }

    async fn write(&self, command: &str) -> Result<()> {
        let mut slot = self.stream.lock().await;
        let stream = self.connection(&mut slot).await?;
        tracing::debug!("SCPI write: {:?}", command);
        match timeout(self.timeout, Self::send(stream, command)).await {
            Ok(result) => result,
            Err(_) => {
                *slot = None;
                bail!("Timeout writing: {}", command)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[test]
    fn parses_error_queue_entries() {
        assert!(parse_error_response("+0,\"No error\"").is_ok());
        let err = parse_error_response("-113,\"Undefined header\"").unwrap_err();
        assert_eq!(
            err.downcast_ref::<SwitchError>(),
            Some(&SwitchError::Instrument {
                code: -113,
                message: "Undefined header".into()
            })
        );
        assert!(parse_error_response("garbage").is_err());
    }

    #[test]
    fn parses_idn() {
        let info =
            InstrumentInfo::parse("Agilent Technologies,34980A,MY44001234,2.41-2.41-0.00-0.00\n")
                .unwrap();
        assert_eq!(info.manufacturer, "Agilent Technologies");
        assert_eq!(info.model, "34980A");
        assert_eq!(info.serial, "MY44001234");
        assert_eq!(info.version, "2.41-2.41-0.00-0.00");
        assert!(InstrumentInfo::parse("KEITHLEY").is_err());
    }

    #[test]
    fn parses_addresses() {
        assert_eq!(
            parse_address("TCPIP0::192.168.1.100::INSTR").unwrap(),
            ("192.168.1.100".to_string(), 5025)
        );
        assert_eq!(
            parse_address("TCPIP0::192.168.1.100::5000::SOCKET").unwrap(),
            ("192.168.1.100".to_string(), 5000)
        );
        assert_eq!(
            parse_address("10.0.0.7:1234").unwrap(),
            ("10.0.0.7".to_string(), 1234)
        );
        assert_eq!(parse_address("switch.lab").unwrap(), ("switch.lab".to_string(), 5025));
        assert!(parse_address("GPIB0::5::INSTR").is_err());
        assert!(parse_address("TCPIP0::host::x::SOCKET").is_err());
        assert!(parse_address("").is_err());
    }

    #[tokio::test]
    async fn tcp_client_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            let mut buf = [0u8; 64];
            while !received.ends_with(b"*IDN?\n") {
                let n = socket.read(&mut buf).await.unwrap();
                received.extend_from_slice(&buf[..n]);
            }
            socket
                .write_all(b"Agilent Technologies,34980A,MY1,1.0\n")
                .await
                .unwrap();
            String::from_utf8(received).unwrap()
        });

        let client = TcpScpiClient::connect(&format!("127.0.0.1:{port}"), Duration::from_secs(2))
            .await
            .unwrap();
        client.write("*RST").await.unwrap();
        let info = client.identify().await.unwrap();
        assert_eq!(info.model, "34980A");

        assert_eq!(server.await.unwrap(), "*RST\n*IDN?\n");
    }

    async fn read_command(socket: &mut TcpStream) -> String {
        let mut received = Vec::new();
        let mut buf = [0u8; 64];
        while !received.ends_with(b"\n") {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            received.extend_from_slice(&buf[..n]);
        }
        String::from_utf8(received).unwrap()
    }

    #[tokio::test]
    async fn late_reply_is_not_taken_for_next_answer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut first, _) = listener.accept().await.unwrap();
            assert_eq!(read_command(&mut first).await, "Q1?\n");
            tokio::time::sleep(Duration::from_millis(300)).await;
            // The client may already have hung up
            let _ = first.write_all(b"ANSWER-1\n").await;

            let (mut second, _) = listener.accept().await.unwrap();
            assert_eq!(read_command(&mut second).await, "Q2?\n");
            second.write_all(b"ANSWER-2\n").await.unwrap();
            // Keep the connection open until the client has read the reply
            read_command(&mut second).await;
        });

        let client =
            TcpScpiClient::connect(&format!("127.0.0.1:{port}"), Duration::from_millis(100))
                .await
                .unwrap();

        let err = client.query("Q1?").await.unwrap_err();
        assert!(err.to_string().contains("Timeout"));

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(client.query("Q2?").await.unwrap(), "ANSWER-2");

        drop(client);
        server.await.unwrap();
    }
}
