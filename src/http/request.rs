use crate::{
    errors::ErrorKind,
    http::{route::Route, types},
    Verb,
};
use memchr::{memchr, memmem};
use serde::de::DeserializeOwned;
use std::{borrow::Cow, str};

/// A request as observed by the server.
///
/// Built once the whole request (head and declared body) has been read and
/// never modified afterwards. The server keeps every one it receives; see
/// [`Server::requests`](crate::Server::requests).
///
/// # Accepted input
///
/// ```text
/// [METHOD] SP [TARGET] SP "HTTP/1." [0|1] CRLF
/// *( [NAME] ":" OWS [VALUE] OWS CRLF )
/// CRLF
/// [BODY]
/// ```
///
/// - `[METHOD]` is kept verbatim; routing maps it through [`Verb::parse`]
///   and falls back to `GET`.
/// - The body is read only when `Content-Length` is a number greater than
///   zero. A missing or unparsable `Content-Length` means no body.
/// - `Transfer-Encoding: chunked` is not supported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    method: String,
    target: String,
    path: String,
    headers: Vec<(String, String)>,
    body: Option<Vec<u8>>,
}

impl Request {
    #[cfg(test)]
    pub(crate) fn for_test(method: &str, target: &str, body: Option<&[u8]>) -> Self {
        Request {
            method: method.to_owned(),
            target: target.to_owned(),
            path: decode_path(target),
            headers: Vec::new(),
            body: body.map(<[u8]>::to_vec),
        }
    }
}

// Public API
impl Request {
    /// The method exactly as the client sent it.
    #[inline]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The method as a [`Verb`], if it is one.
    #[inline]
    pub fn verb(&self) -> Option<Verb> {
        Verb::parse(&self.method)
    }

    /// The raw request target, including any query string.
    #[inline]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// The percent-decoded path of the target, without query or fragment.
    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The route this request resolves to.
    pub fn route(&self) -> Route {
        Route::from_parts(Some(&self.method), Some(&self.path))
    }

    /// All headers in arrival order.
    #[inline]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Returns the first header value with case-insensitive name matching
    /// (per [RFC 7230](https://tools.ietf.org/html/rfc7230#section-3.2)).
    /// Uses linear search.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns the request body if one was sent.
    #[inline]
    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// Returns the body as UTF-8 text, if present and valid.
    pub fn body_str(&self) -> Option<&str> {
        self.body().and_then(|body| str::from_utf8(body).ok())
    }

    /// Decodes the body as JSON. A missing body decodes like an empty one.
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(self.body().unwrap_or_default())
    }
}

//

/// Head of a request whose terminator has been seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Head {
    method: String,
    target: String,
    headers: Vec<(String, String)>,
    content_length: usize,
    len: usize,
}

/// A request being assembled from socket reads.
///
/// Bytes are appended as they arrive. Once the head terminator has been
/// seen the head is parsed, and everything after it counts towards the body.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct Message {
    buffer: Vec<u8>,
    head: Option<Head>,
}

impl Message {
    #[inline]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn from<V: AsRef<[u8]>>(value: V) -> Result<Self, ErrorKind> {
        let mut message = Message::new();
        message.append(value.as_ref(), usize::MAX)?;
        Ok(message)
    }

    /// Appends freshly read bytes and parses the head as soon as it is
    /// complete.
    pub(crate) fn append(&mut self, bytes: &[u8], head_limit: usize) -> Result<(), ErrorKind> {
        self.buffer.extend_from_slice(bytes);

        if self.head.is_none() {
            match memmem::find(&self.buffer, b"\r\n\r\n") {
                Some(end) if end + 4 > head_limit => return Err(ErrorKind::HeadTooLarge),
                Some(end) => self.head = Some(parse_head(&self.buffer[..end + 4])?),
                None if self.buffer.len() > head_limit => return Err(ErrorKind::HeadTooLarge),
                None => {}
            }
        }

        Ok(())
    }

    #[inline]
    pub(crate) fn needs_more_head(&self) -> bool {
        self.head.is_none()
    }

    /// Declared body length; `0` until the head is complete.
    #[inline]
    pub(crate) fn content_length(&self) -> usize {
        self.head.as_ref().map_or(0, |head| head.content_length)
    }

    #[inline]
    pub(crate) fn body_received(&self) -> usize {
        self.head
            .as_ref()
            .map_or(0, |head| self.buffer.len() - head.len)
    }

    #[inline]
    pub(crate) fn needs_more_body(&self) -> bool {
        self.body_received() < self.content_length()
    }

    /// Freezes the message into a [`Request`]. Bytes past the declared body
    /// length are discarded.
    pub(crate) fn into_request(self) -> Option<Request> {
        let Message { mut buffer, head } = self;
        let head = head?;

        let body = match head.content_length {
            0 => None,
            len => {
                buffer.truncate(head.len + len);
                Some(buffer.split_off(head.len))
            }
        };

        Some(Request {
            path: decode_path(&head.target),
            method: head.method,
            target: head.target,
            headers: head.headers,
            body,
        })
    }
}

fn parse_head(head: &[u8]) -> Result<Head, ErrorKind> {
    let text = simdutf8::basic::from_utf8(head).map_err(|_| ErrorKind::InvalidEncoding)?;
    let mut lines = text[..text.len() - 4].split("\r\n");

    let (method, target) = lines
        .next()
        .and_then(parse_request_line)
        .ok_or(ErrorKind::InvalidRequestLine)?;

    let mut headers = Vec::new();
    let mut content_length = 0;
    for line in lines {
        let colon = memchr(b':', line.as_bytes()).ok_or(ErrorKind::InvalidHeader)?;
        let name = &line[..colon];
        if name.is_empty() || name.bytes().any(|b| b.is_ascii_whitespace()) {
            return Err(ErrorKind::InvalidHeader);
        }
        let value = line[colon + 1..].trim_matches(|c| c == ' ' || c == '\t');

        if name.eq_ignore_ascii_case("content-length") {
            content_length = types::slice_to_usize(value.as_bytes()).unwrap_or(0);
        }
        headers.push((name.to_owned(), value.to_owned()));
    }

    Ok(Head {
        method: method.to_owned(),
        target: target.to_owned(),
        headers,
        content_length,
        len: head.len(),
    })
}

fn parse_request_line(line: &str) -> Option<(&str, &str)> {
    let mut parts = line.split(' ');
    let (method, target, version) = (parts.next()?, parts.next()?, parts.next()?);

    let valid = parts.next().is_none()
        && !method.is_empty()
        && method.bytes().all(|b| b.is_ascii_alphabetic())
        && !target.is_empty()
        && matches!(version, "HTTP/1.1" | "HTTP/1.0");

    valid.then_some((method, target))
}

/// Path component of a request target, percent-decoded.
fn decode_path(target: &str) -> String {
    // absolute-form: `http://host:port/path`
    let target = match target.find("://") {
        Some(scheme) => {
            let rest = &target[scheme + 3..];
            rest.find('/').map_or("/", |start| &rest[start..])
        }
        None => target,
    };

    let end = target.find(['?', '#']).unwrap_or(target.len());
    let path = &target[..end];

    urlencoding::decode(path)
        .unwrap_or(Cow::Borrowed(path))
        .into_owned()
}
