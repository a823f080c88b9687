//! HP 4195A screen capture sequence.
//!
//! A capture is a fixed series of blocking round-trips:
//!
//! 1. `CMT"<text>"` when a comment is given
//! 2. `CPYM1` selects copy mode 1
//! 3. `PLTF1` selects plot format 1
//! 4. `SENDPS` then a raw read: the header block
//! 5. `COPY` then a raw read: the plot data block
//!
//! `SENDPS` is only valid in copy mode 1, so the order is part of the
//! protocol. The sequence is not resumable: if any step fails the instrument
//! may already have advanced its plot buffer, and the next attempt has to
//! start over from the identity check.

use crate::comment::{Comment, sanitize_optional};
use crate::error::{CaptureError, DumpError, IdentityError, TransportError};
use crate::format::{PlotFormat, classify};
use crate::transport::Transport;
use log::{debug, info, warn};

pub const ID_QUERY: &str = "ID?";
pub const ID_PREFIX: &str = "HP4195";
pub const COPY_MODE_1: &str = "CPYM1";
pub const PLOT_FORMAT_1: &str = "PLTF1";
pub const SEND_HEADER: &str = "SENDPS";
pub const COPY: &str = "COPY";

/// Check that the instrument on the other end is a 4195A.
pub fn verify_identity<T: Transport + ?Sized>(transport: &mut T) -> Result<(), IdentityError> {
    let response = transport.query(ID_QUERY)?;
    if response.starts_with(ID_PREFIX) {
        debug!("Instrument identified as {response}");
        Ok(())
    } else {
        Err(IdentityError::Mismatch { response })
    }
}

/// Run the capture sequence and return `(header, plot_data)` verbatim.
pub fn capture<T: Transport + ?Sized>(
    transport: &mut T,
    comment: Option<&Comment>,
) -> Result<(Vec<u8>, Vec<u8>), CaptureError> {
    let at = |step: &'static str| {
        move |source: TransportError| CaptureError::Transport { step, source }
    };

    if let Some(comment) = comment {
        transport.write(&comment.command()).map_err(at("CMT"))?;
    }
    transport.write(COPY_MODE_1).map_err(at(COPY_MODE_1))?;
    transport.write(PLOT_FORMAT_1).map_err(at(PLOT_FORMAT_1))?;

    transport.write(SEND_HEADER).map_err(at(SEND_HEADER))?;
    let header = transport.read_raw().map_err(at(SEND_HEADER))?;

    transport.write(COPY).map_err(at(COPY))?;
    let plot_data = transport.read_raw().map_err(at(COPY))?;

    debug!(
        "Captured {} header bytes, {} plot bytes",
        header.len(),
        plot_data.len()
    );
    Ok((header, plot_data))
}

/// One captured screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capture {
    pub header: Vec<u8>,
    pub plot_data: Vec<u8>,
    /// The comment was cut to fit the instrument.
    pub comment_truncated: bool,
}

impl Capture {
    /// Header followed by plot data, no separator.
    pub fn bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.header.len() + self.plot_data.len());
        out.extend_from_slice(&self.header);
        out.extend_from_slice(&self.plot_data);
        out
    }

    pub fn len(&self) -> usize {
        self.header.len() + self.plot_data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Format of the artifact, decided by the plot data block. The header
    /// block carries no signature of its own.
    pub fn format(&self) -> PlotFormat {
        classify(&self.plot_data)
    }
}

/// Drives captures over one long-lived connection.
///
/// The identity check runs before the first capture and again after any
/// failure that may have left the instrument mid-sequence.
#[derive(Debug, Default)]
pub struct CaptureSequencer {
    verified: bool,
}

impl CaptureSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the next [`acquire`](Self::acquire) starts with `ID?`.
    pub fn needs_identity_check(&self) -> bool {
        !self.verified
    }

    /// Forget the previous identity check.
    pub fn invalidate(&mut self) {
        self.verified = false;
    }

    /// Verify (if needed), validate the comment, and capture.
    ///
    /// `None` and `Some("")` both mean no comment.
    pub fn acquire<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        raw_comment: Option<&str>,
    ) -> Result<Capture, DumpError> {
        let result = self.acquire_inner(transport, raw_comment);
        if let Err(e) = &result {
            if e.instrument_state_unknown() {
                warn!("Instrument state unknown after failure, will re-check identity");
                self.verified = false;
            }
        }
        result
    }

    fn acquire_inner<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        raw_comment: Option<&str>,
    ) -> Result<Capture, DumpError> {
        if !self.verified {
            verify_identity(transport)?;
            self.verified = true;
        }

        let comment = sanitize_optional(raw_comment)?;
        if let Some(c) = &comment {
            info!("Plot comment: '{c}'");
        }

        let (header, plot_data) = capture(transport, comment.as_ref())?;
        Ok(Capture {
            header,
            plot_data,
            comment_truncated: comment.is_some_and(|c| c.was_truncated()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comment::sanitize;
    use crate::error::CommentError;
    use crate::transport::{Exchange, ScriptedTransport};

    fn instrument(id: &str, header: &[u8], data: &[u8]) -> ScriptedTransport {
        ScriptedTransport::new()
            .with_text(id)
            .with_raw(header)
            .with_raw(data)
    }

    #[test]
    fn test_verify_identity_accepts_hp4195() {
        let mut transport = ScriptedTransport::new().with_text("HP4195A");
        verify_identity(&mut transport).unwrap();
        assert_eq!(transport.commands(), vec!["ID?"]);
    }

    #[test]
    fn test_verify_identity_rejects_other_devices() {
        for id in ["HP4194A", "hp4195a", "", " HP4195A", "HEWLETT-PACKARD,4195A"] {
            let mut transport = ScriptedTransport::new().with_text(id);
            let err = verify_identity(&mut transport).unwrap_err();
            assert!(
                matches!(&err, IdentityError::Mismatch { response } if response == id),
                "{id:?} should not verify"
            );
        }
    }

    #[test]
    fn test_mismatch_stops_before_any_capture_command() {
        let mut transport = instrument("HP8753C", b"H", b"D");
        let mut sequencer = CaptureSequencer::new();
        let err = sequencer.acquire(&mut transport, Some("hello")).unwrap_err();

        assert!(matches!(err, DumpError::Identity(IdentityError::Mismatch { .. })));
        assert_eq!(transport.log(), &[Exchange::Query("ID?".to_string())]);
        assert!(sequencer.needs_identity_check());
    }

    #[test]
    fn test_capture_order_with_comment() {
        let mut transport = ScriptedTransport::new()
            .with_raw(b"\x00\x01header")
            .with_raw(b"IN;SP1;");
        let comment = sanitize("S21 sweep").unwrap();

        let (header, data) = capture(&mut transport, Some(&comment)).unwrap();

        assert_eq!(header, b"\x00\x01header");
        assert_eq!(data, b"IN;SP1;");
        assert_eq!(
            transport.log(),
            &[
                Exchange::Write("CMT\"S21 sweep\"".to_string()),
                Exchange::Write("CPYM1".to_string()),
                Exchange::Write("PLTF1".to_string()),
                Exchange::Write("SENDPS".to_string()),
                Exchange::ReadRaw,
                Exchange::Write("COPY".to_string()),
                Exchange::ReadRaw,
            ]
        );
    }

    #[test]
    fn test_capture_without_comment_sends_no_cmt() {
        let mut transport = ScriptedTransport::new().with_raw(b"h").with_raw(b"d");
        capture(&mut transport, None).unwrap();
        assert_eq!(transport.commands(), vec!["CPYM1", "PLTF1", "SENDPS", "COPY"]);
    }

    #[test]
    fn test_empty_comment_sends_no_cmt() {
        let mut transport = instrument("HP4195A", b"h", b"d");
        CaptureSequencer::new()
            .acquire(&mut transport, Some(""))
            .unwrap();
        assert_eq!(
            transport.commands(),
            vec!["ID?", "CPYM1", "PLTF1", "SENDPS", "COPY"]
        );
    }

    #[test]
    fn test_non_ascii_comment_never_reaches_bus() {
        let mut transport = instrument("HP4195A", b"h", b"d");
        let err = CaptureSequencer::new()
            .acquire(&mut transport, Some("Ω match"))
            .unwrap_err();

        assert!(matches!(
            err,
            DumpError::Comment(CommentError::NonAscii { ch: 'Ω', .. })
        ));
        assert_eq!(transport.commands(), vec!["ID?"]);
    }

    #[test]
    fn test_long_comment_flagged_and_truncated_on_bus() {
        let mut transport = instrument("HP4195A", b"h", b"d");
        let capture = CaptureSequencer::new()
            .acquire(&mut transport, Some("0123456789abcdefghijklmnopqrstuvwxyz"))
            .unwrap();

        assert!(capture.comment_truncated);
        assert_eq!(transport.commands()[1], "CMT\"0123456789abcdefghijklmnop\"");
    }

    #[test]
    fn test_fault_aborts_without_retry() {
        // ops: 0 CPYM1, 1 PLTF1, 2 SENDPS, 3 raw read
        let mut transport = ScriptedTransport::new()
            .with_raw(b"h")
            .with_raw(b"d")
            .fail_at(3);
        let err = capture(&mut transport, None).unwrap_err();

        assert!(matches!(
            err,
            CaptureError::Transport {
                step: "SENDPS",
                source: TransportError::Timeout(_)
            }
        ));
        assert_eq!(transport.commands(), vec!["CPYM1", "PLTF1", "SENDPS"]);
    }

    #[test]
    fn test_reverify_after_transport_fault() {
        // ops: 0 ID?, 1 CPYM1, 2 PLTF1 fails
        let mut transport = ScriptedTransport::new().with_text("HP4195A").fail_at(2);
        let mut sequencer = CaptureSequencer::new();
        assert!(sequencer.acquire(&mut transport, None).is_err());
        assert!(sequencer.needs_identity_check());

        let mut transport = instrument("HP4195A", b"h", b"d");
        sequencer.acquire(&mut transport, None).unwrap();
        assert!(!sequencer.needs_identity_check());

        // verified connection: second capture skips ID?
        transport.push_raw(b"h2");
        transport.push_raw(b"d2");
        transport.clear_log();
        let second = sequencer.acquire(&mut transport, None).unwrap();
        assert_eq!(second.bytes(), b"h2d2");
        assert_eq!(transport.commands(), vec!["CPYM1", "PLTF1", "SENDPS", "COPY"]);
    }

    #[test]
    fn test_comment_error_keeps_verification() {
        let mut transport = instrument("HP4195A", b"h", b"d");
        let mut sequencer = CaptureSequencer::new();
        assert!(sequencer.acquire(&mut transport, Some("naïve")).is_err());
        assert!(!sequencer.needs_identity_check());
    }

    #[test]
    fn test_quoted_comment_sends_no_capture_command() {
        let mut transport = instrument("HP4195A", b"h", b"d");
        let mut sequencer = CaptureSequencer::new();
        let err = sequencer
            .acquire(&mut transport, Some("x\"\nCOPY"))
            .unwrap_err();

        assert!(matches!(
            err,
            DumpError::Comment(CommentError::ForbiddenChar { ch: '"', .. })
        ));
        assert_eq!(transport.commands(), vec!["ID?"]);
    }

    #[test]
    fn test_end_to_end_postscript() {
        let mut transport = instrument("HP4195A", b"HEADERBYTES", b"%!PS...rest");
        let capture = CaptureSequencer::new()
            .acquire(&mut transport, Some("Test 1.5k"))
            .unwrap();

        assert_eq!(capture.bytes(), b"HEADERBYTES%!PS...rest");
        assert_eq!(capture.format(), PlotFormat::PostScript);
        assert!(!capture.comment_truncated);
        assert_eq!(
            transport.commands(),
            vec!["ID?", "CMT\"Test 1.5k\"", "CPYM1", "PLTF1", "SENDPS", "COPY"]
        );
    }

    #[test]
    fn test_capture_format_from_plot_data() {
        let capture = Capture {
            header: b"HEADERBYTES".to_vec(),
            plot_data: vec![0x0a, 0x05, 0x01, 0x08, 0x00],
            comment_truncated: false,
        };
        assert_eq!(capture.format(), PlotFormat::Pcx);

        let capture = Capture {
            header: Vec::new(),
            plot_data: b"IN;SP1;".to_vec(),
            comment_truncated: false,
        };
        assert_eq!(capture.format(), PlotFormat::Hpgl);
        assert!(!capture.is_empty());
        assert_eq!(capture.len(), 7);
    }
}
