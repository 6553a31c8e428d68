//! The SDK request/response envelope.
//!
//! Wire shape (XML over a framed TCP stream):
//!
//! ```text
//! Request:  <sdk guid="G"><in method="M"><param attr="v"/></in></sdk>
//! Response: <sdk guid="G"><out method="M" result="kSuccess"><data/></out></sdk>
//! ```
//!
//! The GUID is echoed verbatim for correlation.  `result` is drawn from the
//! closed [`ResultCode`] set.  Method bodies are heterogeneous, so the
//! envelope parser hands the raw inner XML of `<in>` to the handler, which
//! picks it apart with the typed parsers (program XML) or the attribute
//! helpers below.

use thiserror::Error;

/// Envelope-level parse failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("missing <sdk> root element")]
    NoSdkRoot,
    #[error("missing guid attribute on <sdk>")]
    NoGuid,
    #[error("missing <in method=…> element")]
    NoMethod,
}

/// The closed set of response result codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Success,
    ParseError,
    ValidationError,
    NotFound,
    HardwareError,
    Busy,
    Unsupported,
}

impl ResultCode {
    /// Wire spelling of the code.
    pub fn as_str(self) -> &'static str {
        match self {
            ResultCode::Success => "kSuccess",
            ResultCode::ParseError => "kParseError",
            ResultCode::ValidationError => "kValidationError",
            ResultCode::NotFound => "kNotFound",
            ResultCode::HardwareError => "kHardwareError",
            ResultCode::Busy => "kBusy",
            ResultCode::Unsupported => "kUnsupported",
        }
    }

    /// Parses a wire spelling back to a code, for client-side tests.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "kSuccess" => Some(ResultCode::Success),
            "kParseError" => Some(ResultCode::ParseError),
            "kValidationError" => Some(ResultCode::ValidationError),
            "kNotFound" => Some(ResultCode::NotFound),
            "kHardwareError" => Some(ResultCode::HardwareError),
            "kBusy" => Some(ResultCode::Busy),
            "kUnsupported" => Some(ResultCode::Unsupported),
            _ => None,
        }
    }
}

/// A parsed inbound command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdkRequest {
    /// Correlation GUID, echoed in the response.
    pub guid: String,
    /// Method name, e.g. `"AddProgram"`.
    pub method: String,
    /// Raw inner XML of `<in>…</in>` (may be empty).
    pub body: String,
}

impl SdkRequest {
    /// Parses the envelope of one request document.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError`] when the `<sdk>` root, its guid, or the
    /// `<in method>` element is missing.
    pub fn parse(xml: &str) -> Result<Self, EnvelopeError> {
        let xml = skip_declaration(xml.trim());
        if !xml.starts_with("<sdk") {
            return Err(EnvelopeError::NoSdkRoot);
        }
        let guid = attr_in_tag(xml, "<sdk", "guid").ok_or(EnvelopeError::NoGuid)?;

        let in_start = xml.find("<in ").or_else(|| xml.find("<in>")).ok_or(EnvelopeError::NoMethod)?;
        let method =
            attr_in_tag(&xml[in_start..], "<in", "method").ok_or(EnvelopeError::NoMethod)?;

        let body = match (xml[in_start..].find('>'), xml.rfind("</in>")) {
            (Some(gt), Some(end)) if in_start + gt + 1 <= end => {
                xml[in_start + gt + 1..end].trim().to_string()
            }
            _ => String::new(),
        };

        Ok(Self { guid, method, body })
    }
}

/// Builder for an outbound response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdkResponse {
    pub guid: String,
    pub method: String,
    pub result: ResultCode,
    pub body: String,
}

impl SdkResponse {
    pub fn new(guid: &str, method: &str, result: ResultCode) -> Self {
        Self {
            guid: guid.to_string(),
            method: method.to_string(),
            result,
            body: String::new(),
        }
    }

    /// Attaches pre-rendered inner XML (already escaped by the caller).
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Attaches a human-readable error detail element.
    pub fn with_error_detail(self, message: &str) -> Self {
        let escaped = xml_escape(message);
        self.with_body(format!("<error message=\"{escaped}\"/>"))
    }

    /// Renders the full response document.
    pub fn to_xml(&self) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\
             <sdk guid=\"{}\"><out method=\"{}\" result=\"{}\">{}</out></sdk>",
            xml_escape(&self.guid),
            xml_escape(&self.method),
            self.result.as_str(),
            self.body,
        )
    }
}

// ── Fragment helpers ──────────────────────────────────────────────────────────

/// Returns the value of `attr` on the first element named `element` in the
/// fragment, e.g. `element_attr(body, "luminance", "value")`.
pub fn element_attr(fragment: &str, element: &str, attr: &str) -> Option<String> {
    let tag = format!("<{element}");
    let pos = find_tag(fragment, &tag)?;
    attr_in_tag(&fragment[pos..], &tag, attr)
}

/// Returns the raw tag text of every element named `element` in the
/// fragment, in document order.  Only the opening tag is captured, which is
/// all the attribute-style bodies of this protocol need.
pub fn elements_of<'a>(fragment: &'a str, element: &str) -> Vec<&'a str> {
    let tag = format!("<{element}");
    let mut out = Vec::new();
    let mut from = 0;
    while let Some(pos) = find_tag(&fragment[from..], &tag) {
        let abs = from + pos;
        match fragment[abs..].find('>') {
            Some(gt) => {
                out.push(&fragment[abs..abs + gt + 1]);
                from = abs + gt + 1;
            }
            None => break,
        }
    }
    out
}

/// Returns the value of `attr` inside a single raw tag string.
pub fn tag_attr(tag: &str, attr: &str) -> Option<String> {
    let needle = format!("{attr}=\"");
    let start = tag.find(&needle)? + needle.len();
    let end = tag[start..].find('"')? + start;
    Some(xml_unescape(&tag[start..end]))
}

/// Escapes an attribute/text value for embedding in built XML.
pub fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn xml_unescape(value: &str) -> String {
    value
        .replace("&quot;", "\"")
        .replace("&gt;", ">")
        .replace("&lt;", "<")
        .replace("&amp;", "&")
}

fn skip_declaration(xml: &str) -> &str {
    if xml.starts_with("<?xml") {
        match xml.find("?>") {
            Some(pos) => xml[pos + 2..].trim_start(),
            None => xml,
        }
    } else {
        xml
    }
}

/// Finds `tag` (e.g. `"<in"`) followed by a delimiter, so `<in>` does not
/// match `<inner>`.
fn find_tag(haystack: &str, tag: &str) -> Option<usize> {
    let mut from = 0;
    while let Some(pos) = haystack[from..].find(tag) {
        let abs = from + pos;
        match haystack.as_bytes().get(abs + tag.len()) {
            Some(b' ') | Some(b'>') | Some(b'/') | Some(b'\t') | Some(b'\n') => return Some(abs),
            _ => from = abs + tag.len(),
        }
    }
    None
}

fn attr_in_tag(from_tag: &str, tag: &str, attr: &str) -> Option<String> {
    let gt = from_tag.find('>')?;
    let head = &from_tag[tag.len()..gt];
    let needle = format!("{attr}=\"");
    let start = head.find(&needle)? + needle.len();
    let end = head[start..].find('"')? + start;
    Some(xml_unescape(&head[start..end]))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
