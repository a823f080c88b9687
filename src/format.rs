use std::fmt;

/// Leading bytes of a PostScript dump.
pub const POSTSCRIPT_MAGIC: &[u8] = b"%!PS";
/// Leading bytes of a PCX dump (manufacturer 0x0A, version 5, RLE, 8 bpp).
pub const PCX_MAGIC: &[u8] = &[0x0A, 0x05, 0x01, 0x08];

/// Content format of a captured plot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlotFormat {
    PostScript,
    Pcx,
    /// HP-GL plotter commands; anything unrecognized lands here.
    Hpgl,
}

impl PlotFormat {
    pub fn extension(self) -> &'static str {
        match self {
            PlotFormat::PostScript => "ps",
            PlotFormat::Pcx => "pcx",
            PlotFormat::Hpgl => "plt",
        }
    }
}

impl fmt::Display for PlotFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlotFormat::PostScript => "PostScript",
            PlotFormat::Pcx => "PCX",
            PlotFormat::Hpgl => "HPGL",
        };
        f.write_str(name)
    }
}

/// Identify a plot by its magic signature.
pub fn classify(data: &[u8]) -> PlotFormat {
    if data.starts_with(POSTSCRIPT_MAGIC) {
        PlotFormat::PostScript
    } else if data.starts_with(PCX_MAGIC) {
        PlotFormat::Pcx
    } else {
        PlotFormat::Hpgl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_postscript() {
        assert_eq!(classify(b"%!PS-Adobe-3.0\n%%Title: 4195A"), PlotFormat::PostScript);
    }

    #[test]
    fn test_classify_pcx() {
        assert_eq!(
            classify(&[0x0a, 0x05, 0x01, 0x08, 0x00, 0x00, 0x7f, 0x02]),
            PlotFormat::Pcx
        );
    }

    #[test]
    fn test_classify_fallback() {
        assert_eq!(classify(b"IN;SP1;PU0,0;PD100,100;"), PlotFormat::Hpgl);
        assert_eq!(classify(b""), PlotFormat::Hpgl);
        // partial signatures don't count
        assert_eq!(classify(b"%!P"), PlotFormat::Hpgl);
        assert_eq!(classify(&[0x0a, 0x05, 0x01]), PlotFormat::Hpgl);
        assert_eq!(classify(b"%!Ps"), PlotFormat::Hpgl);
    }

    #[test]
    fn test_extensions() {
        assert_eq!(PlotFormat::PostScript.extension(), "ps");
        assert_eq!(PlotFormat::Pcx.extension(), "pcx");
        assert_eq!(PlotFormat::Hpgl.extension(), "plt");
        assert_eq!(PlotFormat::Hpgl.to_string(), "HPGL");
    }
}
