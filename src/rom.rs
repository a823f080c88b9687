//! Character font extraction from HP 4195A firmware ROM dumps.
//!
//! The firmware keeps a table of 128 big-endian pointers at `0x9000`, one
//! per character. Each glyph is a 13-row, one-byte-per-row bitmap that
//! starts 5 bytes before the address its pointer names.

use crate::error::RomError;
use byteorder::{BigEndian, ReadBytesExt};
use log::debug;
use std::io::Cursor;
use std::path::Path;

pub const FONT_TABLE_START: usize = 0x9000;
pub const GLYPH_START_OFFSET: i64 = -5;
pub const GLYPH_COUNT: usize = 0x80;
/// Rows per glyph, one byte each.
pub const GLYPH_BYTES: usize = 13;
pub const FONT_TABLE_SIZE: usize = GLYPH_COUNT * GLYPH_BYTES;
/// Sanity limit for ROM images.
pub const MAX_ROM_SIZE: usize = 1024 * 1024;

/// The extracted 128-glyph font.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontTable {
    bytes: Vec<u8>,
}

impl FontTable {
    /// All glyphs back to back, `GLYPH_BYTES` each.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn glyph(&self, index: usize) -> Option<&[u8]> {
        let start = index.checked_mul(GLYPH_BYTES)?;
        self.bytes.get(start..start.checked_add(GLYPH_BYTES)?)
    }

    /// Render one glyph as text, `#` for set pixels, MSB on the left.
    pub fn render(&self, index: usize) -> Option<String> {
        let rows = self.glyph(index)?;
        let mut out = String::with_capacity(GLYPH_BYTES * 9);
        for row in rows {
            for bit in (0..8).rev() {
                out.push(if row & (1 << bit) != 0 { '#' } else { '.' });
            }
            out.push('\n');
        }
        Some(out)
    }
}

pub fn extract_font_table(rom: &[u8]) -> Result<FontTable, RomError> {
    if rom.is_empty() || rom.len() > MAX_ROM_SIZE {
        return Err(RomError::Size(rom.len()));
    }
    let needed = FONT_TABLE_START + FONT_TABLE_SIZE;
    if rom.len() <= needed {
        return Err(RomError::Truncated {
            len: rom.len(),
            needed,
        });
    }

    let mut pointers = Cursor::new(&rom[FONT_TABLE_START..]);
    let mut bytes = Vec::with_capacity(FONT_TABLE_SIZE);

    for index in 0..GLYPH_COUNT {
        let pointer = pointers.read_u32::<BigEndian>()?;
        let start = i64::from(pointer) + GLYPH_START_OFFSET;
        let out_of_bounds = || RomError::GlyphOutOfBounds {
            index,
            start: start.max(0) as u64,
            len: rom.len(),
        };

        // pointers are 32 bit, so the end can overflow a 32-bit usize
        let start = usize::try_from(start).map_err(|_| out_of_bounds())?;
        let end = start.checked_add(GLYPH_BYTES).ok_or_else(out_of_bounds)?;
        let glyph = rom.get(start..end).ok_or_else(out_of_bounds)?;
        bytes.extend_from_slice(glyph);
    }

    debug!("Extracted {} glyphs", GLYPH_COUNT);
    Ok(FontTable { bytes })
}

/// Read a ROM image from disk and extract its font.
pub fn extract_font_file(path: &Path) -> Result<FontTable, RomError> {
    let rom = std::fs::read(path)?;
    extract_font_table(&rom)
}
