use super::MAX_HEADER_SIZE;
use crate::error::{MmsError, MmsResult};

/// An HTTP response header accumulated from raw network bytes.
///
/// Bytes are appended as they arrive; [`HttpResponse::parse`] reports `false` until the
/// header/body separator shows up, then parses once. Anything after the separator is
/// kept as the start of the body.
#[derive(Debug, Default, Clone)]
pub struct HttpResponse {
    buffer: Vec<u8>,
    parsed: bool,
    body_start: usize,

    pub protocol: String,
    pub minor_version: u8,
    pub status_code: u16,
    pub reason_phrase: String,
    fields: Vec<String>,
}

impl HttpResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes appended after a successful parse belong to the body.
    pub fn append(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    fn separator(&self) -> Option<(usize, usize)> {
        let crlf = find(&self.buffer, b"\r\n\r\n").map(|pos| (pos, pos + 4));
        let lf = find(&self.buffer, b"\n\n").map(|pos| (pos, pos + 2));
        match (crlf, lf) {
            (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
            (a, b) => a.or(b),
        }
    }

    /// Parse the header if it is complete. Returns whether it is.
    ///
    /// Calling this again after a successful parse does nothing.
    pub fn parse(&mut self) -> MmsResult<bool> {
        if self.parsed {
            return Ok(true);
        }
        let Some((header_end, body_start)) = self.separator() else {
            if self.buffer.len() > MAX_HEADER_SIZE {
                return Err(MmsError::MalformedResponse(format!(
                    "header exceeds {MAX_HEADER_SIZE} bytes"
                )));
            }
            return Ok(false);
        };

        let header = String::from_utf8_lossy(&self.buffer[..header_end]).into_owned();
        let mut lines = header.split('\n').map(|line| line.trim_end_matches('\r'));

        let status_line = lines
            .next()
            .ok_or_else(|| MmsError::MalformedResponse("empty response".to_string()))?;
        let (protocol, rest) = status_line
            .split_once(' ')
            .ok_or_else(|| malformed_status(status_line))?;

        let minor_version = match protocol.split_once('/') {
            Some((_, version)) => version
                .strip_prefix("1.")
                .and_then(|minor| minor.parse().ok())
                .ok_or_else(|| malformed_status(status_line))?,
            // ICY and friends carry no version
            None => 0,
        };

        let rest = rest.trim_start();
        let (code, reason) = rest.split_once(' ').unwrap_or((rest, ""));
        let status_code = code.parse().map_err(|_| malformed_status(status_line))?;

        let mut fields = Vec::new();
        for line in lines {
            if !line.contains(':') {
                break;
            }
            fields.push(line.to_string());
        }

        self.protocol = protocol.to_string();
        self.minor_version = minor_version;
        self.status_code = status_code;
        self.reason_phrase = reason.to_string();
        self.fields = fields;
        self.body_start = body_start;
        self.parsed = true;
        Ok(true)
    }

    /// First field named `name`, compared case-insensitively.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields_named(name).next()
    }

    /// Every field named `name`, in arrival order.
    pub fn fields_named<'a, 'n>(&'a self, name: &'n str) -> impl Iterator<Item = &'a str> + 'n
    where
        'a: 'n,
    {
        self.fields.iter().filter_map(move |line| {
            let (field_name, value) = line.split_once(':')?;
            field_name
                .trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim_start_matches(' '))
        })
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Body bytes received so far. Empty until parsed.
    pub fn body(&self) -> &[u8] {
        if self.parsed {
            &self.buffer[self.body_start..]
        } else {
            &[]
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        self.field("Content-Type")
    }
}

fn malformed_status(line: &str) -> MmsError {
    MmsError::MalformedResponse(format!("bad status line: {line:?}"))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
