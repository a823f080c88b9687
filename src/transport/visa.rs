//! GPIB (and any other VISA resource) through the system VISA library.

use super::{BlockEnd, COMMAND_TERMINATOR, ConnectionConfig, Transport, collect_block};
use crate::error::TransportError;
use log::debug;
use std::ffi::CString;
use std::io::{self, Read, Write};
use std::time::Duration;
use visa_rs::attribute::AttrTmoValue;
use visa_rs::enums::status::ErrorCode;
use visa_rs::prelude::*;

pub struct VisaTransport {
    resource: String,
    // closing the default resource manager closes every session it opened,
    // so it has to outlive the instrument
    instr: Instrument,
    _rm: DefaultRM,
    config: ConnectionConfig,
}

impl VisaTransport {
    pub fn open(resource: &str, config: &ConnectionConfig) -> Result<Self, TransportError> {
        let unsupported = |reason: String| TransportError::Unsupported {
            resource: resource.to_string(),
            reason,
        };

        let rm = DefaultRM::new().map_err(|e| unsupported(format!("VISA unavailable: {e}")))?;
        let name = CString::new(resource)
            .map_err(|_| TransportError::InvalidResource(resource.to_string()))?;
        let instr = rm
            .open(&name.into(), AccessMode::NO_LOCK, config.connect_timeout)
            .map_err(|e| unsupported(format!("open failed: {e}")))?;

        debug!("Opened VISA session for {resource}");

        let transport = Self {
            resource: resource.to_string(),
            instr,
            _rm: rm,
            config: config.clone(),
        };
        transport.set_timeout(transport.config.read_timeout)?;
        Ok(transport)
    }

    /// Set the session I/O timeout. VISA has a single timeout for reads and
    /// writes.
    fn set_timeout(&self, timeout: Duration) -> Result<(), TransportError> {
        let millis = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        let attr = AttrTmoValue::new_checked(millis).ok_or_else(|| {
            TransportError::Timeout(format!("VISA cannot use a timeout of {millis} ms"))
        })?;
        self.instr
            .set_attr(attr)
            .map_err(|e| TransportError::Unsupported {
                resource: self.resource.clone(),
                reason: format!("setting timeout failed: {e}"),
            })
    }

    /// Read until the device signals END (a short read). A message that
    /// fills the last buffer exactly ends on `idle_timeout` of silence.
    fn read_message(&mut self) -> Result<Vec<u8>, TransportError> {
        let idle_timeout = self.config.idle_timeout;
        let mut idle_armed = false;

        let result = collect_block(BlockEnd::ShortRead, |buf, started| {
            if started && !idle_armed {
                self.set_timeout(idle_timeout)?;
                idle_armed = true;
            }
            self.instr.read(buf).map_err(read_error)
        });
        if idle_armed {
            self.set_timeout(self.config.read_timeout)?;
        }
        result
    }
}

fn read_error(e: io::Error) -> TransportError {
    let timed_out = e
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<visa_rs::Error>())
        .is_some_and(|inner| inner.0 == ErrorCode::ErrorTmo);
    if timed_out {
        TransportError::Timeout(format!("VISA read: {e}"))
    } else {
        TransportError::io(e, "VISA read")
    }
}

impl Transport for VisaTransport {
    fn write(&mut self, command: &str) -> Result<(), TransportError> {
        debug!("-> {command}");
        let line = format!("{command}{COMMAND_TERMINATOR}");
        self.instr
            .write_all(line.as_bytes())
            .map_err(|e| TransportError::io(e, format!("Writing '{command}'")))
    }

    fn query(&mut self, command: &str) -> Result<String, TransportError> {
        self.write(command)?;
        let reply = self.read_message()?;
        let text = String::from_utf8(reply).map_err(|_| TransportError::NonTextResponse {
            command: command.to_string(),
        })?;
        let text = text.trim_end_matches(['\r', '\n']).to_string();
        debug!("<- {text:?}");
        Ok(text)
    }

    fn read_raw(&mut self) -> Result<Vec<u8>, TransportError> {
        let block = self.read_message()?;
        debug!("<- {} raw bytes", block.len());
        Ok(block)
    }

    fn resource(&self) -> &str {
        &self.resource
    }
}
