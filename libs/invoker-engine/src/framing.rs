//! Response Framing Protocol
//!
//! Containers answer by printing a minimal HTTP-style message on stdout:
//!
//! ```text
//! Content-Type: application/json
//! X-Custom: 1
//!
//! {"body": "anything"}
//! ```
//!
//! The header block ends at the first blank line (`"\n\n"`). A content type
//! is mandatory; without one nothing is returned, not even the body.

use crate::error::ExecError;
use indexmap::IndexMap;

/// Header name → value in first-seen order; later duplicates overwrite the value
pub type Headers = IndexMap<String, String>;

pub const CONTENT_TYPE: &str = "content-type";
const SEPARATOR: &[u8] = b"\n\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramedResponse {
    headers: Headers,
    body: Vec<u8>,
}

impl FramedResponse {
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .iter()
            .rev()
            .find(|(key, _)| key.eq_ignore_ascii_case(CONTENT_TYPE))
            .map(|(_, value)| value.as_str())
    }

    pub fn into_parts(self) -> (Headers, Vec<u8>) {
        (self.headers, self.body)
    }
}

/// Parse container stdout into headers and a byte-exact body
pub fn frame_response(stdout: &[u8]) -> Result<FramedResponse, ExecError> {
    let (head, body) = split_message(stdout);
    let (headers, has_content_type) = parse_headers(&String::from_utf8_lossy(head));

    if !has_content_type {
        return Err(ExecError::MissingContentType);
    }

    Ok(FramedResponse {
        headers,
        body: body.map(<[u8]>::to_vec).unwrap_or_default(),
    })
}

/// Split on the first blank line. No separator means no body part.
fn split_message(data: &[u8]) -> (&[u8], Option<&[u8]>) {
    match data
        .windows(SEPARATOR.len())
        .position(|window| window == SEPARATOR)
    {
        Some(idx) => (&data[..idx], Some(&data[idx + SEPARATOR.len()..])),
        None => (data, None),
    }
}

fn parse_headers(block: &str) -> (Headers, bool) {
    let mut headers = Headers::new();
    let mut has_content_type = false;

    for line in block.split('\n') {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        if key.eq_ignore_ascii_case(CONTENT_TYPE) {
            has_content_type = true;
        }
        headers.insert(key.to_string(), value.trim().to_string());
    }

    (headers, has_content_type)
}
