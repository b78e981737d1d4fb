//! `multipart/form-data` body parsing, lazily invoked from
//! [`crate::context::Context::get_multipart`] the same way
//! [`crate::context::Context::parse_json`] lazily invokes `serde_json`.

use memchr::memmem;

/// One part of a parsed multipart body. `filename` is `Some` for a file
/// upload field, `None` for a plain form field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartField {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

/// Parse failure, surfaced to the caller the same way `ContextError`
/// surfaces a bad JSON body.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MultipartError {
    #[error("missing multipart boundary in Content-Type")]
    MissingBoundary,
    #[error("malformed multipart body")]
    Malformed,
}

/// Parses `body` against the `boundary` named in the request's
/// `Content-Type` header. Each part's headers are scanned for
/// `Content-Disposition`'s `name`/`filename` and the part's own
/// `Content-Type`, same as a browser-generated multipart POST.
pub(crate) fn parse(content_type: &[u8], body: &[u8]) -> Result<Vec<MultipartField>, MultipartError> {
    let boundary = extract_boundary(content_type).ok_or(MultipartError::MissingBoundary)?;
    let delimiter = format!("--{boundary}");
    let finder = memmem::Finder::new(delimiter.as_bytes());

    let mut fields = Vec::new();
    let mut positions = finder.find_iter(body);
    let Some(mut part_start) = positions.next() else {
        return Err(MultipartError::Malformed);
    };
    part_start += delimiter.len();

    for next in positions {
        let mut part = &body[part_start..next];
        if let Some(stripped) = part.strip_prefix(b"\r\n") {
            part = stripped;
        }
        if !part.is_empty() {
            fields.push(parse_part(part)?);
        }
        part_start = next + delimiter.len();
    }

    Ok(fields)
}

fn parse_part(part: &[u8]) -> Result<MultipartField, MultipartError> {
    let header_end = memmem::find(part, b"\r\n\r\n").ok_or(MultipartError::Malformed)?;
    let headers = String::from_utf8_lossy(&part[..header_end]);
    let mut data = &part[header_end + 4..];
    if let Some(trimmed) = data.strip_suffix(b"\r\n") {
        data = trimmed;
    }

    let mut name = None;
    let mut filename = None;
    let mut content_type = None;

    for line in headers.split("\r\n") {
        let (header_name, value) = line.split_once(':').unwrap_or(("", ""));
        if header_name.eq_ignore_ascii_case("content-disposition") {
            name = disposition_param(value, "name");
            filename = disposition_param(value, "filename");
        } else if header_name.eq_ignore_ascii_case("content-type") {
            content_type = Some(value.trim().to_string());
        }
    }

    Ok(MultipartField {
        name: name.ok_or(MultipartError::Malformed)?,
        filename,
        content_type,
        data: data.to_vec(),
    })
}

fn disposition_param(value: &str, key: &str) -> Option<String> {
    for segment in value.split(';') {
        let segment = segment.trim();
        let Some((k, v)) = segment.split_once('=') else {
            continue;
        };
        if k.trim().eq_ignore_ascii_case(key) {
            return Some(v.trim().trim_matches('"').to_string());
        }
    }
    None
}

fn extract_boundary(content_type: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(content_type).ok()?;
    for segment in text.split(';').skip(1) {
        let segment = segment.trim();
        if let Some(value) = segment.strip_prefix("boundary=") {
            return Some(value.trim_matches('"').to_string());
        }
    }
    None
}
