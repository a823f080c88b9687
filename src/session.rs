//! Interactive capture loop.
//!
//! [`Session`] is a plain state machine fed one input line at a time; it
//! never touches the bus. [`run_interactive`] wires it to a console and to the
//! capture sequencer, reusing one connection for every capture.

use crate::error::{DumpError, IdentityError, SessionError};
use crate::sequencer::CaptureSequencer;
use crate::sink::OutputSink;
use crate::transport::Transport;
use log::{error, info};
use std::io::{BufRead, Write};

/// Consecutive empty inputs that end the session.
pub const EMPTY_INPUTS_TO_QUIT: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    AwaitingComment,
    AwaitingFilename { comment: Option<String> },
    Capturing { comment: Option<String>, base: String },
    Terminated,
}

/// What the driver should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    PromptComment,
    PromptFilename,
    Capture { comment: Option<String>, base: String },
    Terminated,
}

#[derive(Debug)]
pub struct Session {
    state: State,
    empty_inputs: usize,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: State::AwaitingComment,
            empty_inputs: 0,
        }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn is_terminated(&self) -> bool {
        self.state == State::Terminated
    }

    /// Step for the current state without consuming input.
    pub fn current(&self) -> Step {
        match &self.state {
            State::AwaitingComment => Step::PromptComment,
            State::AwaitingFilename { .. } => Step::PromptFilename,
            State::Capturing { comment, base } => Step::Capture {
                comment: comment.clone(),
                base: base.clone(),
            },
            State::Terminated => Step::Terminated,
        }
    }

    /// Feed one line of user input.
    pub fn feed(&mut self, line: &str) -> Step {
        let input = line.trim();

        if input.is_empty() {
            self.empty_inputs += 1;
            if self.empty_inputs >= EMPTY_INPUTS_TO_QUIT {
                self.state = State::Terminated;
                return Step::Terminated;
            }
        } else {
            self.empty_inputs = 0;
        }

        let next = match std::mem::replace(&mut self.state, State::Terminated) {
            State::AwaitingComment => State::AwaitingFilename {
                comment: (!input.is_empty()).then(|| input.to_string()),
            },
            State::AwaitingFilename { comment } if input.is_empty() => {
                State::AwaitingFilename { comment }
            }
            State::AwaitingFilename { comment } => State::Capturing {
                comment,
                base: input.to_string(),
            },
            // input while busy or finished changes nothing
            other => other,
        };
        self.state = next;
        self.current()
    }

    /// The driver finished the pending capture, successfully or not.
    pub fn capture_done(&mut self) -> Step {
        if let State::Capturing { .. } = self.state {
            self.state = State::AwaitingComment;
        }
        self.current()
    }

    /// End the session, e.g. on end of input.
    pub fn terminate(&mut self) {
        self.state = State::Terminated;
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub captures: usize,
    pub failures: usize,
}

/// Prompt for comment and filename until two consecutive empty inputs.
///
/// Capture failures are reported and the loop carries on; the sequencer
/// re-checks the instrument identity before the next attempt. A wrong
/// instrument ends the session.
pub fn run_interactive<T, R, W>(
    transport: &mut T,
    sequencer: &mut CaptureSequencer,
    sink: &OutputSink,
    mut input: R,
    mut output: W,
) -> Result<SessionSummary, SessionError>
where
    T: Transport + ?Sized,
    R: BufRead,
    W: Write,
{
    let mut session = Session::new();
    let mut summary = SessionSummary::default();
    let mut step = session.current();

    writeln!(
        output,
        "Interactive mode on {}. Two empty inputs in a row to quit.",
        transport.resource()
    )?;

    loop {
        match step {
            Step::PromptComment => write!(output, "comment (empty for none): ")?,
            Step::PromptFilename => write!(output, "filename (no extension): ")?,
            Step::Capture { comment, base } => {
                match capture_one(transport, sequencer, sink, comment.as_deref(), &base) {
                    Ok(line) => {
                        summary.captures += 1;
                        writeln!(output, "{line}")?;
                    }
                    Err(DumpError::Identity(e @ IdentityError::Mismatch { .. })) => {
                        error!("{e}");
                        return Err(SessionError::Identity(e));
                    }
                    Err(e) => {
                        summary.failures += 1;
                        error!("Capture failed: {e}");
                        writeln!(output, "capture failed: {e}")?;
                    }
                }
                step = session.capture_done();
                continue;
            }
            Step::Terminated => break,
        }
        output.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            session.terminate();
            writeln!(output)?;
            break;
        }
        step = session.feed(&line);
    }

    info!(
        "Session ended: {} captures, {} failures",
        summary.captures, summary.failures
    );
    Ok(summary)
}

fn capture_one<T: Transport + ?Sized>(
    transport: &mut T,
    sequencer: &mut CaptureSequencer,
    sink: &OutputSink,
    comment: Option<&str>,
    base: &str,
) -> Result<String, DumpError> {
    // usage errors before touching the bus
    OutputSink::validate_base_name(base)?;
    let capture = sequencer.acquire(transport, comment)?;
    let saved = sink.persist(base, &capture)?;
    Ok(format!(
        "saved {} ({}, {} bytes)",
        saved.path.display(),
        saved.format,
        saved.bytes_written
    ))
}
