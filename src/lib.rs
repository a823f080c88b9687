pub mod comment;
pub mod error;
pub mod format;
pub mod rom;
pub mod sequencer;
pub mod session;
pub mod sink;
pub mod transport;

pub use comment::{CMT_MAXLEN, Comment, sanitize, sanitize_optional};
pub use error::{
    CaptureError, CommentError, DumpError, IdentityError, RomError, SessionError, SinkError,
    TransportError,
};
pub use format::{PlotFormat, classify};
pub use rom::{FontTable, extract_font_file, extract_font_table};
pub use sequencer::{Capture, CaptureSequencer, capture, verify_identity};
pub use session::{Session, SessionSummary, Step, run_interactive};
pub use sink::{
    ConversionOutcome, Converter, ConverterConfig, ExternalConverter, OutputSink, SavedArtifact,
    SinkConfig,
};
pub use transport::{
    ConnectionConfig, DEFAULT_RESOURCE, Resource, ScriptedTransport, SocketTransport, Transport,
    open_resource,
};
