use super::{BlockEnd, COMMAND_TERMINATOR, ConnectionConfig, Transport, collect_block};
use crate::error::TransportError;
use log::{debug, warn};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Builder for [`SocketTransport`].
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use hp4195_dump::transport::SocketTransport;
///
/// let transport = SocketTransport::builder()
///     .address("192.168.1.40")
///     .port(1234)
///     .read_timeout(Duration::from_secs(30))
///     .build()?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Default)]
pub struct SocketTransportBuilder {
    address: Option<String>,
    port: Option<u16>,
    config: ConnectionConfig,
}

impl SocketTransportBuilder {
    pub fn address(mut self, addr: &str) -> Self {
        self.address = Some(addr.to_string());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the full connection configuration
    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.config.write_timeout = timeout;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<SocketTransport, TransportError> {
        let address = self
            .address
            .ok_or_else(|| TransportError::InvalidResource("Address must be specified".into()))?;
        let port = self
            .port
            .ok_or_else(|| TransportError::InvalidResource("Port must be specified".into()))?;

        let socket_addr: SocketAddr = (address.as_str(), port)
            .to_socket_addrs()
            .map_err(|e| TransportError::io(e, format!("Resolving {address}")))?
            .next()
            .ok_or_else(|| TransportError::InvalidResource(address.clone()))?;

        debug!("Connecting to {socket_addr}");

        let stream = TcpStream::connect_timeout(&socket_addr, self.config.connect_timeout)
            .map_err(|e| {
                warn!("Failed to connect to {address}:{port}: {e}");
                TransportError::io(e, format!("Failed to connect to {address}:{port}"))
            })?;

        stream
            .set_read_timeout(Some(self.config.read_timeout))
            .map_err(|e| TransportError::io(e, "Setting read timeout"))?;
        stream
            .set_write_timeout(Some(self.config.write_timeout))
            .map_err(|e| TransportError::io(e, "Setting write timeout"))?;
        // commands are tiny; don't let Nagle hold them back
        stream
            .set_nodelay(true)
            .map_err(|e| TransportError::io(e, "Setting TCP_NODELAY"))?;

        let writer = stream
            .try_clone()
            .map_err(|e| TransportError::io(e, "Cloning socket"))?;

        debug!("Connected to {address}:{port}");

        Ok(SocketTransport {
            resource: format!("TCPIP::{address}::{port}::SOCKET"),
            reader: BufReader::new(stream),
            writer,
            config: self.config,
        })
    }
}

/// Instrument reached through a raw TCP socket (a LAN/GPIB gateway, or a
/// VISA `TCPIP::host::port::SOCKET` resource).
pub struct SocketTransport {
    resource: String,
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    config: ConnectionConfig,
}

impl SocketTransport {
    pub fn builder() -> SocketTransportBuilder {
        SocketTransportBuilder::default()
    }

    /// Get the current connection configuration
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    fn set_read_timeout(&self, timeout: Duration) -> Result<(), TransportError> {
        self.reader
            .get_ref()
            .set_read_timeout(Some(timeout))
            .map_err(|e| TransportError::io(e, "Setting read timeout"))
    }

    fn read_block(&mut self) -> Result<Vec<u8>, TransportError> {
        let idle_timeout = self.config.idle_timeout;
        let mut idle_armed = false;

        collect_block(BlockEnd::Idle, |buf, started| {
            if started && !idle_armed {
                self.set_read_timeout(idle_timeout)?;
                idle_armed = true;
            }
            loop {
                match self.reader.read(buf) {
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    other => {
                        return other.map_err(|e| TransportError::io(e, "Reading raw block"));
                    }
                }
            }
        })
    }
}

impl Transport for SocketTransport {
    fn write(&mut self, command: &str) -> Result<(), TransportError> {
        debug!("-> {command}");
        let mut line = String::with_capacity(command.len() + COMMAND_TERMINATOR.len());
        line.push_str(command);
        line.push_str(COMMAND_TERMINATOR);

        self.writer
            .write_all(line.as_bytes())
            .and_then(|_| self.writer.flush())
            .map_err(|e| TransportError::io(e, format!("Writing '{command}'")))
    }

    fn query(&mut self, command: &str) -> Result<String, TransportError> {
        self.write(command)?;

        let mut line = Vec::new();
        let n = self
            .reader
            .read_until(b'\n', &mut line)
            .map_err(|e| TransportError::io(e, format!("Reading response to '{command}'")))?;
        if n == 0 {
            return Err(TransportError::Closed);
        }

        let text = String::from_utf8(line).map_err(|_| TransportError::NonTextResponse {
            command: command.to_string(),
        })?;
        let text = text.trim_end_matches(['\r', '\n']).to_string();
        debug!("<- {text:?}");
        Ok(text)
    }

    fn read_raw(&mut self) -> Result<Vec<u8>, TransportError> {
        let result = self.read_block();
        // idle timeout only applies within a block
        self.set_read_timeout(self.config.read_timeout)?;
        let block = result?;
        debug!(
            "<- {} raw bytes: {:02x?}",
            block.len(),
            &block[..block.len().min(16)]
        );
        Ok(block)
    }

    fn resource(&self) -> &str {
        &self.resource
    }
}
