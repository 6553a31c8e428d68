//! Program XML parser.
//!
//! Accepts a bare `<program>` document, one wrapped in the SDK command
//! envelope, or either preceded by an XML declaration.  Parsing is strict:
//! a document that deserializes but fails structural validation is rejected
//! as a whole.

use quick_xml::de::from_str;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

use super::model::{Program, ValidationError};

/// Errors from parsing or validating a program document.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("program XML is malformed: {0}")]
    Xml(#[from] quick_xml::DeError),
    #[error("unrecognized document: expected <program> or <sdk>, got `{0}`")]
    UnknownRoot(String),
    #[error("malformed XML declaration")]
    BadDeclaration,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Parses and validates a program XML file from disk.
///
/// # Errors
///
/// Returns [`ParseError`] on I/O failure, malformed XML, or validation failure.
pub fn parse_program_file(
    path: &Path,
    canvas_width: u32,
    canvas_height: u32,
) -> Result<Program, ParseError> {
    let xml = std::fs::read_to_string(path).map_err(|source| ParseError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_program_xml(&xml, canvas_width, canvas_height)
}

/// Parses and validates program XML from a string (file or network payload).
///
/// # Errors
///
/// Returns [`ParseError`] if the XML is malformed or the program violates a
/// structural invariant.  On error no program value escapes this function,
/// so callers cannot install a half-parsed tree.
pub fn parse_program_xml(
    xml: &str,
    canvas_width: u32,
    canvas_height: u32,
) -> Result<Program, ParseError> {
    let trimmed = xml.trim();

    if trimmed.starts_with("<?xml") {
        let pos = trimmed.find("?>").ok_or(ParseError::BadDeclaration)?;
        return parse_program_xml(&trimmed[pos + 2..], canvas_width, canvas_height);
    }

    let body = if trimmed.starts_with("<sdk") {
        extract_program_element(trimmed)?
    } else if trimmed.starts_with("<program") {
        trimmed
    } else {
        let head: String = trimmed.chars().take(40).collect();
        return Err(ParseError::UnknownRoot(head));
    };

    let program: Program = from_str(body)?;
    program.validate(canvas_width, canvas_height)?;
    debug!(
        guid = %program.guid,
        scenes = program.scenes.len(),
        "parsed program"
    );
    Ok(program)
}

/// Slices the `<program>…</program>` element out of an SDK envelope.
fn extract_program_element(xml: &str) -> Result<&str, ParseError> {
    let start = xml
        .find("<program")
        .ok_or_else(|| ParseError::UnknownRoot("<sdk> without <program>".to_string()))?;
    let end = xml
        .rfind("</program>")
        .ok_or_else(|| ParseError::UnknownRoot("unclosed <program>".to_string()))?;
    Ok(&xml[start..end + "</program>".len()])
}

// ── Tests ─────────────────────────────────────────────────────────────────────
