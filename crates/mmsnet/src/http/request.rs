use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::{BufMut, Bytes, BytesMut};

/// A raw HTTP/1.x request, serialized by hand so that duplicate fields such as
/// repeated `Pragma` lines keep their order on the wire.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    method: String,
    uri: String,
    minor_version: u8,
    fields: Vec<String>,
    body: Option<Bytes>,
}

impl HttpRequest {
    pub fn get(uri: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            uri: uri.into(),
            minor_version: 0,
            fields: Vec::new(),
            body: None,
        }
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn minor_version(mut self, minor_version: u8) -> Self {
        self.minor_version = minor_version;
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Append a raw `Name: value` field line.
    pub fn field(&mut self, line: impl Into<String>) -> &mut Self {
        self.fields.push(line.into());
        self
    }

    pub fn basic_auth(&mut self, username: &str, password: Option<&str>) -> &mut Self {
        let credentials = format!("{username}:{}", password.unwrap_or_default());
        self.field(format!("Authorization: Basic {}", STANDARD.encode(credentials)))
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn build(&self) -> Bytes {
        let mut out = BytesMut::new();
        out.put_slice(
            format!(
                "{} {} HTTP/1.{}\r\n",
                self.method, self.uri, self.minor_version
            )
            .as_bytes(),
        );
        for field in &self.fields {
            out.put_slice(field.as_bytes());
            out.put_slice(b"\r\n");
        }
        if let Some(body) = &self.body {
            out.put_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
        }
        out.put_slice(b"\r\n");
        if let Some(body) = &self.body {
            out.put_slice(body);
        }
        out.freeze()
    }
}
