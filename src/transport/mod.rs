//! Instrument bus access.
//!
//! The capture logic only needs three primitives from a connection: a plain
//! command write, a text query, and a binary-safe read. [`Transport`] captures
//! that contract; [`open_resource`] picks the implementation matching a VISA
//! resource string.

use crate::error::TransportError;
use log::debug;
use std::fmt;
use std::time::Duration;

pub mod scripted;
pub mod socket;
#[cfg(feature = "visa")]
pub mod visa;

pub use scripted::{Exchange, ScriptedTransport};
pub use socket::{SocketTransport, SocketTransportBuilder};
#[cfg(feature = "visa")]
pub use visa::VisaTransport;

/// Resource used when nothing else is configured: GPIB board 0, address 17.
pub const DEFAULT_RESOURCE: &str = "GPIB0::17::INSTR";

/// Line terminator appended to every command on the wire.
pub const COMMAND_TERMINATOR: &str = "\n";

/// Upper bound for one raw block. A full colour PostScript screen dump is
/// well under a megabyte.
pub const MAX_BLOCK_SIZE: usize = 16 * 1024 * 1024;

pub(crate) const READ_CHUNK: usize = 4096;

/// Capability contract of an open instrument connection.
pub trait Transport {
    /// Send a command that produces no response.
    fn write(&mut self, command: &str) -> Result<(), TransportError>;

    /// Send a command and read back one line of text.
    fn query(&mut self, command: &str) -> Result<String, TransportError>;

    /// Read one response block verbatim, with no terminator or encoding
    /// assumptions.
    fn read_raw(&mut self) -> Result<Vec<u8>, TransportError>;

    /// Resource string this transport was opened with.
    fn resource(&self) -> &str;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, command: &str) -> Result<(), TransportError> {
        (**self).write(command)
    }

    fn query(&mut self, command: &str) -> Result<String, TransportError> {
        (**self).query(command)
    }

    fn read_raw(&mut self) -> Result<Vec<u8>, TransportError> {
        (**self).read_raw()
    }

    fn resource(&self) -> &str {
        (**self).resource()
    }
}

/// Timeouts applied when opening a transport.
///
/// `idle_timeout` marks the end of a raw block on links that carry no
/// end-of-message indicator: once some bytes have arrived, a silence this
/// long means the instrument is done talking.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Timeout for establishing the connection
    pub connect_timeout: Duration,
    /// Timeout for the first byte of a response
    pub read_timeout: Duration,
    /// Timeout for writing a command
    pub write_timeout: Duration,
    /// Silence that terminates a raw block once data has started flowing
    pub idle_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            // plot generation on the 4195A takes a while
            read_timeout: Duration::from_secs(20),
            write_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_millis(1500),
        }
    }
}

/// How a link marks the end of a raw block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockEnd {
    /// No end indicator: EOF, or silence once data has started.
    Idle,
    /// A read shorter than the buffer carries END. Silence once data has
    /// started also ends the block, for messages that fill the last buffer
    /// exactly.
    ShortRead,
}

/// Collect one raw block from `read_chunk`.
///
/// `read_chunk` gets the buffer and whether bytes have already arrived, so
/// the link can switch to its idle timeout. Before the first byte a timeout
/// is an error; after it, a timeout ends the block.
pub(crate) fn collect_block<F>(end: BlockEnd, mut read_chunk: F) -> Result<Vec<u8>, TransportError>
where
    F: FnMut(&mut [u8], bool) -> Result<usize, TransportError>,
{
    let mut block = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let started = !block.is_empty();
        match read_chunk(&mut chunk, started) {
            Ok(0) if !started && end == BlockEnd::Idle => return Err(TransportError::Closed),
            Ok(0) => break,
            Ok(n) => {
                block.extend_from_slice(&chunk[..n]);
                if block.len() > MAX_BLOCK_SIZE {
                    return Err(TransportError::Oversized(MAX_BLOCK_SIZE));
                }
                if end == BlockEnd::ShortRead && n < chunk.len() {
                    break;
                }
            }
            Err(TransportError::Timeout(_)) if started => break,
            Err(e) => return Err(e),
        }
    }

    Ok(block)
}

/// A parsed VISA resource string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    /// `TCPIP[board]::host::port::SOCKET`
    TcpSocket { host: String, port: u16 },
    /// `GPIB[board]::address[::secondary]::INSTR`
    Gpib { board: u16, address: u8 },
}

impl Resource {
    pub fn parse(resource: &str) -> Result<Self, TransportError> {
        let invalid = || TransportError::InvalidResource(resource.to_string());
        let parts: Vec<&str> = resource.trim().split("::").collect();
        let interface = parts.first().ok_or_else(invalid)?.to_ascii_uppercase();

        if let Some(board) = interface.strip_prefix("TCPIP") {
            parse_board(board).ok_or_else(invalid)?;
            match parts.as_slice() {
                [_, host, port, kind] if kind.eq_ignore_ascii_case("SOCKET") => {
                    if host.is_empty() {
                        return Err(invalid());
                    }
                    let port = port.parse::<u16>().map_err(|_| invalid())?;
                    Ok(Resource::TcpSocket {
                        host: host.to_string(),
                        port,
                    })
                }
                _ => Err(invalid()),
            }
        } else if let Some(board) = interface.strip_prefix("GPIB") {
            let board = parse_board(board).ok_or_else(invalid)?;
            let address = match parts.as_slice() {
                [_, addr, kind] if kind.eq_ignore_ascii_case("INSTR") => addr,
                [_, addr, _secondary, kind] if kind.eq_ignore_ascii_case("INSTR") => addr,
                _ => return Err(invalid()),
            };
            let address = address
                .parse::<u8>()
                .ok()
                .filter(|a| *a <= 30)
                .ok_or_else(invalid)?;
            Ok(Resource::Gpib { board, address })
        } else {
            Err(invalid())
        }
    }
}

fn parse_board(board: &str) -> Option<u16> {
    if board.is_empty() {
        Some(0)
    } else {
        board.parse().ok()
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::TcpSocket { host, port } => write!(f, "TCPIP::{host}::{port}::SOCKET"),
            Resource::Gpib { board, address } => write!(f, "GPIB{board}::{address}::INSTR"),
        }
    }
}

/// Open the transport matching `resource`.
///
/// TCP sockets are always available. GPIB goes through the system VISA
/// library and needs the `visa` feature.
pub fn open_resource(
    resource: &str,
    config: &ConnectionConfig,
) -> Result<Box<dyn Transport>, TransportError> {
    let parsed = Resource::parse(resource)?;
    debug!("Opening {parsed} ({resource})");

    match parsed {
        Resource::TcpSocket { host, port } => {
            let transport = SocketTransport::builder()
                .address(&host)
                .port(port)
                .config(config.clone())
                .build()?;
            Ok(Box::new(transport))
        }
        #[cfg(feature = "visa")]
        Resource::Gpib { .. } => Ok(Box::new(VisaTransport::open(resource, config)?)),
        #[cfg(not(feature = "visa"))]
        Resource::Gpib { .. } => Err(TransportError::Unsupported {
            resource: resource.to_string(),
            reason: "GPIB needs a build with the `visa` feature".to_string(),
        }),
    }
}
