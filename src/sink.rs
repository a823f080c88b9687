//! Writing captures to disk and handing them to an external rasterizer.

use crate::error::SinkError;
use crate::format::PlotFormat;
use crate::sequencer::Capture;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Extension of raw captured plot files. A base name must not carry it.
pub const RESERVED_EXTENSION: &str = ".plt";

/// External program that turns an HPGL plot into a raster image.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConverterConfig {
    pub program: String,
    /// Passed before the plot file path.
    pub args: Vec<String>,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        // hp2xx: PNG output, quiet, fixed pen colour map
        Self {
            program: "hp2xx".to_string(),
            args: ["-m", "png", "-q", "-c", "12345671"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// What happened after the plot file was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionOutcome {
    Converted { program: String },
    /// No converter configured.
    Disabled,
    /// The converter only reads HPGL.
    NotApplicable(PlotFormat),
    Unavailable { program: String },
    Failed { program: String, reason: String },
}

/// Post-processing step run on a written plot file.
pub trait Converter {
    fn convert(&self, plot_file: &Path) -> ConversionOutcome;
}

/// Runs a [`ConverterConfig`] program found on `PATH`.
#[derive(Debug, Clone)]
pub struct ExternalConverter {
    config: ConverterConfig,
}

impl ExternalConverter {
    pub fn new(config: ConverterConfig) -> Self {
        Self { config }
    }

    fn resolve(&self) -> Option<PathBuf> {
        let program = Path::new(&self.config.program);
        if program.components().count() > 1 {
            return program.is_file().then(|| program.to_path_buf());
        }
        which::which(program).ok()
    }
}

impl Converter for ExternalConverter {
    fn convert(&self, plot_file: &Path) -> ConversionOutcome {
        let program = self.config.program.clone();
        let Some(binary) = self.resolve() else {
            return ConversionOutcome::Unavailable { program };
        };

        debug!(
            "Running {} {:?} {}",
            binary.display(),
            self.config.args,
            plot_file.display()
        );
        match Command::new(&binary)
            .args(&self.config.args)
            .arg(plot_file)
            .status()
        {
            Ok(status) if status.success() => ConversionOutcome::Converted { program },
            Ok(status) => ConversionOutcome::Failed {
                program,
                reason: format!("exited with {status}"),
            },
            Err(e) => ConversionOutcome::Failed {
                program,
                reason: e.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkConfig {
    pub directory: PathBuf,
    /// Pick the extension from the plot signature instead of always `.plt`.
    pub detect_format: bool,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            detect_format: true,
        }
    }
}

/// A plot file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedArtifact {
    pub path: PathBuf,
    pub format: PlotFormat,
    pub bytes_written: usize,
    pub conversion: ConversionOutcome,
}

pub struct OutputSink {
    config: SinkConfig,
    converter: Option<Box<dyn Converter>>,
}

impl OutputSink {
    pub fn new(config: SinkConfig) -> Self {
        Self {
            config,
            converter: None,
        }
    }

    pub fn with_converter(mut self, converter: Box<dyn Converter>) -> Self {
        self.converter = Some(converter);
        self
    }

    pub fn config(&self) -> &SinkConfig {
        &self.config
    }

    /// Reject base names that already end in `.plt`.
    ///
    /// Only that exact suffix is refused; names like `test 1.5k` that merely
    /// contain a dot are fine.
    pub fn validate_base_name(base: &str) -> Result<(), SinkError> {
        if base.trim().is_empty() {
            return Err(SinkError::EmptyBaseName);
        }
        if base.ends_with(RESERVED_EXTENSION) {
            return Err(SinkError::ReservedExtension(base.to_string()));
        }
        Ok(())
    }

    pub fn artifact_path(&self, base: &str, format: PlotFormat) -> PathBuf {
        let extension = if self.config.detect_format {
            format.extension()
        } else {
            PlotFormat::Hpgl.extension()
        };
        // appended by hand; Path::with_extension would eat "1.5k" in "test 1.5k"
        self.config.directory.join(format!("{base}.{extension}"))
    }

    /// Write the capture, then run the converter if one is set.
    ///
    /// Conversion problems are logged and reported in the result, never
    /// returned as errors.
    pub fn persist(&self, base: &str, capture: &Capture) -> Result<SavedArtifact, SinkError> {
        Self::validate_base_name(base)?;

        let format = capture.format();
        let path = self.artifact_path(base, format);
        let bytes = capture.bytes();

        std::fs::write(&path, &bytes).map_err(|source| SinkError::Write {
            path: path.clone(),
            source,
        })?;
        info!("Wrote {} bytes ({format}) to {}", bytes.len(), path.display());

        let conversion = self.convert(&path, format);
        Ok(SavedArtifact {
            path,
            format,
            bytes_written: bytes.len(),
            conversion,
        })
    }

    fn convert(&self, path: &Path, format: PlotFormat) -> ConversionOutcome {
        let Some(converter) = &self.converter else {
            return ConversionOutcome::Disabled;
        };
        if format != PlotFormat::Hpgl {
            debug!("No conversion for {format} output");
            return ConversionOutcome::NotApplicable(format);
        }

        let outcome = converter.convert(path);
        match &outcome {
            ConversionOutcome::Converted { program } => {
                info!("Converted {} with {program}", path.display())
            }
            ConversionOutcome::Unavailable { program } => {
                warn!("{program} not found, skipping conversion")
            }
            ConversionOutcome::Failed { program, reason } => {
                warn!("{program} failed on {}: {reason}", path.display())
            }
            ConversionOutcome::Disabled | ConversionOutcome::NotApplicable(_) => {}
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct RecordingConverter {
        calls: Rc<RefCell<Vec<PathBuf>>>,
        outcome: ConversionOutcome,
    }

    impl Converter for RecordingConverter {
        fn convert(&self, plot_file: &Path) -> ConversionOutcome {
            self.calls.borrow_mut().push(plot_file.to_path_buf());
            self.outcome.clone()
        }
    }

    fn capture(header: &[u8], data: &[u8]) -> Capture {
        Capture {
            header: header.to_vec(),
            plot_data: data.to_vec(),
            comment_truncated: false,
        }
    }

    fn sink_in(dir: &Path) -> OutputSink {
        OutputSink::new(SinkConfig {
            directory: dir.to_path_buf(),
            detect_format: true,
        })
    }

    #[test]
    fn test_base_name_validation() {
        assert!(OutputSink::validate_base_name("test 1.5k").is_ok());
        assert!(OutputSink::validate_base_name("sweep.plt.old").is_ok());
        assert!(matches!(
            OutputSink::validate_base_name("sweep.plt"),
            Err(SinkError::ReservedExtension(_))
        ));
        assert!(matches!(
            OutputSink::validate_base_name(""),
            Err(SinkError::EmptyBaseName)
        ));
    }

    #[test]
    fn test_artifact_path_keeps_dotted_base() {
        let sink = sink_in(Path::new("out"));
        assert_eq!(
            sink.artifact_path("test 1.5k", PlotFormat::PostScript),
            Path::new("out").join("test 1.5k.ps")
        );

        let fixed = OutputSink::new(SinkConfig {
            directory: PathBuf::from("out"),
            detect_format: false,
        });
        assert_eq!(
            fixed.artifact_path("s11", PlotFormat::Pcx),
            Path::new("out").join("s11.plt")
        );
    }

    #[test]
    fn test_persist_writes_header_then_data() {
        let dir = tempfile::tempdir().unwrap();
        let saved = sink_in(dir.path())
            .persist("shot", &capture(b"HEADERBYTES", b"%!PS...rest"))
            .unwrap();

        assert_eq!(saved.path, dir.path().join("shot.ps"));
        assert_eq!(saved.format, PlotFormat::PostScript);
        assert_eq!(saved.bytes_written, 22);
        assert_eq!(saved.conversion, ConversionOutcome::Disabled);
        assert_eq!(
            std::fs::read(&saved.path).unwrap(),
            b"HEADERBYTES%!PS...rest"
        );
    }

    #[test]
    fn test_reserved_extension_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let result = sink_in(dir.path()).persist("shot.plt", &capture(b"h", b"d"));
        assert!(matches!(result, Err(SinkError::ReservedExtension(_))));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_converter_runs_for_hpgl_only() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Rc::new(RefCell::new(Vec::new()));
        let sink = sink_in(dir.path()).with_converter(Box::new(RecordingConverter {
            calls: calls.clone(),
            outcome: ConversionOutcome::Converted {
                program: "fake".to_string(),
            },
        }));

        let saved = sink.persist("plot", &capture(b"", b"IN;SP1;")).unwrap();
        assert_eq!(
            saved.conversion,
            ConversionOutcome::Converted {
                program: "fake".to_string()
            }
        );
        assert_eq!(*calls.borrow(), vec![dir.path().join("plot.plt")]);

        let saved = sink
            .persist("image", &capture(b"", &[0x0a, 0x05, 0x01, 0x08]))
            .unwrap();
        assert_eq!(
            saved.conversion,
            ConversionOutcome::NotApplicable(PlotFormat::Pcx)
        );
        assert_eq!(calls.borrow().len(), 1);
    }

    #[test]
    fn test_converter_failure_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink_in(dir.path()).with_converter(Box::new(RecordingConverter {
            calls: Rc::new(RefCell::new(Vec::new())),
            outcome: ConversionOutcome::Failed {
                program: "fake".to_string(),
                reason: "exit status: 1".to_string(),
            },
        }));

        let saved = sink.persist("plot", &capture(b"", b"IN;")).unwrap();
        assert!(matches!(saved.conversion, ConversionOutcome::Failed { .. }));
        assert!(saved.path.exists());
    }

    #[test]
    fn test_missing_converter_is_unavailable() {
        let converter = ExternalConverter::new(ConverterConfig {
            program: "hp4195-no-such-rasterizer".to_string(),
            args: Vec::new(),
        });
        assert_eq!(
            converter.convert(Path::new("plot.plt")),
            ConversionOutcome::Unavailable {
                program: "hp4195-no-such-rasterizer".to_string()
            }
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_external_converter_exit_status() {
        let dir = tempfile::tempdir().unwrap();
        let plot = dir.path().join("plot.plt");
        std::fs::write(&plot, b"IN;").unwrap();

        let ok = ExternalConverter::new(ConverterConfig {
            program: "true".to_string(),
            args: Vec::new(),
        });
        assert!(matches!(
            ok.convert(&plot),
            ConversionOutcome::Converted { .. }
        ));

        let failing = ExternalConverter::new(ConverterConfig {
            program: "false".to_string(),
            args: Vec::new(),
        });
        assert!(matches!(
            failing.convert(&plot),
            ConversionOutcome::Failed { .. }
        ));
    }
}
