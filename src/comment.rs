//! Plot comment validation.
//!
//! The 4195A prints an optional comment line at the top of the plot. It only
//! accepts 7-bit ASCII and silently drops anything past 26 characters, so
//! comments are checked and cut to size before they go on the bus. A quote
//! or a line break would end the `CMT` string early and let the rest run as
//! a command, so those are refused too.

use crate::error::CommentError;
use log::warn;
use std::fmt;

/// Longest comment the instrument will print.
pub const CMT_MAXLEN: usize = 26;

/// A comment that is safe to embed in a `CMT"..."` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    text: String,
    truncated: bool,
}

impl Comment {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// True when the input was longer than [`CMT_MAXLEN`] and got cut.
    pub fn was_truncated(&self) -> bool {
        self.truncated
    }

    /// The `CMT` command carrying this comment.
    pub fn command(&self) -> String {
        format!("CMT\"{}\"", self.text)
    }
}

impl fmt::Display for Comment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Validate `raw` and truncate it to [`CMT_MAXLEN`] bytes.
pub fn sanitize(raw: &str) -> Result<Comment, CommentError> {
    if let Some((position, ch)) = raw.char_indices().find(|(_, c)| !c.is_ascii()) {
        return Err(CommentError::NonAscii { ch, position });
    }
    if let Some((position, ch)) = raw
        .char_indices()
        .find(|(_, c)| *c == '"' || c.is_ascii_control())
    {
        return Err(CommentError::ForbiddenChar { ch, position });
    }

    // all ASCII from here, so byte slicing stays on char boundaries
    if raw.len() > CMT_MAXLEN {
        let text = raw[..CMT_MAXLEN].to_string();
        warn!("Max {CMT_MAXLEN} chars for comment. Truncating to '{text}'");
        return Ok(Comment {
            text,
            truncated: true,
        });
    }

    Ok(Comment {
        text: raw.to_string(),
        truncated: false,
    })
}

/// Like [`sanitize`], but treats a missing and an empty comment the same:
/// neither produces a comment.
pub fn sanitize_optional(raw: Option<&str>) -> Result<Option<Comment>, CommentError> {
    match raw {
        None | Some("") => Ok(None),
        Some(text) => sanitize(text).map(Some),
    }
}
