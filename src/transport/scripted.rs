use super::Transport;
use crate::error::TransportError;
use log::debug;
use std::collections::VecDeque;

/// One bus operation as seen by a [`ScriptedTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exchange {
    Write(String),
    Query(String),
    ReadRaw,
}

/// Offline transport that replays canned responses and records every
/// operation in the order it was issued.
///
/// Text responses are consumed by [`Transport::query`], raw responses by
/// [`Transport::read_raw`]. A fault can be armed to fire on the n-th
/// operation to exercise the abort paths.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    resource: String,
    text_responses: VecDeque<String>,
    raw_responses: VecDeque<Vec<u8>>,
    log: Vec<Exchange>,
    fail_at: Option<usize>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            resource: "SCRIPTED::INSTR".to_string(),
            ..Default::default()
        }
    }

    /// Queue a reply for the next `query`.
    pub fn with_text(mut self, response: &str) -> Self {
        self.text_responses.push_back(response.to_string());
        self
    }

    /// Queue a block for the next `read_raw`.
    pub fn with_raw(mut self, block: &[u8]) -> Self {
        self.raw_responses.push_back(block.to_vec());
        self
    }

    /// Make the operation with zero-based index `index` fail with a timeout.
    pub fn fail_at(mut self, index: usize) -> Self {
        self.fail_at = Some(index);
        self
    }

    pub fn push_text(&mut self, response: &str) {
        self.text_responses.push_back(response.to_string());
    }

    pub fn push_raw(&mut self, block: &[u8]) {
        self.raw_responses.push_back(block.to_vec());
    }

    /// Every operation issued so far.
    pub fn log(&self) -> &[Exchange] {
        &self.log
    }

    /// Commands sent, in order, whether written or queried.
    pub fn commands(&self) -> Vec<&str> {
        self.log
            .iter()
            .filter_map(|op| match op {
                Exchange::Write(cmd) | Exchange::Query(cmd) => Some(cmd.as_str()),
                Exchange::ReadRaw => None,
            })
            .collect()
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    fn record(&mut self, op: Exchange) -> Result<(), TransportError> {
        let index = self.log.len();
        debug!("scripted #{index}: {op:?}");
        self.log.push(op);
        if self.fail_at == Some(index) {
            return Err(TransportError::Timeout(format!("scripted fault at #{index}")));
        }
        Ok(())
    }
}

impl Transport for ScriptedTransport {
    fn write(&mut self, command: &str) -> Result<(), TransportError> {
        self.record(Exchange::Write(command.to_string()))
    }

    fn query(&mut self, command: &str) -> Result<String, TransportError> {
        self.record(Exchange::Query(command.to_string()))?;
        self.text_responses
            .pop_front()
            .ok_or_else(|| TransportError::ScriptExhausted(command.to_string()))
    }

    fn read_raw(&mut self) -> Result<Vec<u8>, TransportError> {
        self.record(Exchange::ReadRaw)?;
        self.raw_responses
            .pop_front()
            .ok_or_else(|| TransportError::ScriptExhausted("raw read".to_string()))
    }

    fn resource(&self) -> &str {
        &self.resource
    }
}
