use crate::error::{MmsError, MmsResult};
use std::{fmt, str::FromStr};

/// A parsed playback address: `protocol://[user[:pass]@]host[:port][/path]`.
///
/// Port `0` means unset; callers fill it from the default of the transport they try.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Url {
    pub protocol: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl Url {
    /// The protocol token is lowercased, as schemes are case-insensitive.
    pub fn parse(raw: &str) -> MmsResult<Self> {
        let Some((protocol, rest)) = raw.split_once("://") else {
            return Err(MmsError::MalformedUrl(format!("missing \"://\" in {raw}")));
        };
        if protocol.is_empty() {
            return Err(MmsError::MalformedUrl(format!("empty protocol in {raw}")));
        }

        let (authority, path) = match rest.find('/') {
            Some(slash) => (&rest[..slash], &rest[slash..]),
            None => (rest, "/"),
        };

        // credentials only count when they come before the path
        let (userinfo, hostport) = match authority.rfind('@') {
            Some(at) => (Some(&authority[..at]), &authority[at + 1..]),
            None => (None, authority),
        };
        let (username, password) = match userinfo {
            Some(info) => match info.split_once(':') {
                Some((user, pass)) => (Some(user.to_string()), Some(pass.to_string())),
                None => (Some(info.to_string()), None),
            },
            None => (None, None),
        };

        let (host, port) = split_host_port(hostport)
            .ok_or_else(|| MmsError::MalformedUrl(format!("invalid host or port in {raw}")))?;
        if host.is_empty() {
            return Err(MmsError::MalformedUrl(format!("empty host in {raw}")));
        }

        Ok(Self {
            protocol: protocol.to_ascii_lowercase(),
            username,
            password,
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }

    /// Port to connect to, using `default` when the address does not carry one.
    pub fn port_or(&self, default: u16) -> u16 {
        if self.port == 0 {
            default
        } else {
            self.port
        }
    }

    /// `host:port` as sent in a `Host` field.
    pub fn authority(&self, default_port: u16) -> String {
        format!("{}:{}", self.bracketed_host(), self.port_or(default_port))
    }

    pub fn bracketed_host(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        }
    }

    /// Resolve a `Location` value against this address.
    ///
    /// For `http_proxy` addresses the location is resolved against the proxied address, and
    /// an `http` result keeps going through the same proxy.
    pub fn redirect(&self, location: &str) -> MmsResult<Url> {
        let location = location.trim();
        if self.protocol == "http_proxy" {
            let inner = Url::parse(self.path.strip_prefix('/').unwrap_or(&self.path))?;
            let target = inner.redirect(location)?;
            if target.protocol != "http" {
                return Ok(target);
            }
            let mut next = self.clone();
            next.path = format!("/{target}");
            return Ok(next);
        }
        if location.contains("://") {
            return Url::parse(location);
        }

        let mut next = self.clone();
        if location.starts_with('/') {
            next.path = location.to_string();
        } else {
            let dir = match self.path.rfind('/') {
                Some(slash) => &self.path[..=slash],
                None => "/",
            };
            next.path = format!("{dir}{location}");
        }
        Ok(next)
    }
}

fn split_host_port(hostport: &str) -> Option<(&str, u16)> {
    if let Some(literal) = hostport.strip_prefix('[') {
        let (host, after) = literal.split_once(']')?;
        return match after.strip_prefix(':') {
            Some(port) => Some((host, port.parse().ok()?)),
            None if after.is_empty() => Some((host, 0)),
            None => None,
        };
    }

    match hostport.split_once(':') {
        Some((host, "")) => Some((host, 0)),
        Some((host, port)) => Some((host, port.parse().ok()?)),
        None => Some((hostport, 0)),
    }
}

impl FromStr for Url {
    type Err = MmsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Url::parse(s)
    }
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://", self.protocol)?;
        if let Some(username) = &self.username {
            f.write_str(username)?;
            if let Some(password) = &self.password {
                write!(f, ":{password}")?;
            }
            f.write_str("@")?;
        }
        f.write_str(&self.bracketed_host())?;
        if self.port != 0 {
            write!(f, ":{}", self.port)?;
        }
        f.write_str(&self.path)
    }
}

const UNRESERVED: &[u8] = b"-_.!~*'()";
const RESERVED: &[u8] = b";/?:@&=+$,";

/// Percent-encode everything that is neither unreserved nor reserved.
///
/// Existing `%XX` escapes are kept, so escaping an escaped path is a no-op.
pub fn escape_path(path: &str) -> String {
    let bytes = path.as_bytes();
    let mut out = String::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        let escaped = c == b'%'
            && bytes.get(i + 1).is_some_and(u8::is_ascii_hexdigit)
            && bytes.get(i + 2).is_some_and(u8::is_ascii_hexdigit);
        if c.is_ascii_alphanumeric() || UNRESERVED.contains(&c) || RESERVED.contains(&c) || escaped
        {
            out.push(c as char);
        } else {
            out.push_str(&format!("%{c:02X}"));
        }
        i += 1;
    }
    out
}

/// Decode `%XX` sequences. Invalid sequences are copied through untouched.
pub fn unescape_path(path: &str) -> String {
    let bytes = path.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3])
                .ok()
                .and_then(|h| u8::from_str_radix(h, 16).ok());
            if let Some(byte) = hex {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
