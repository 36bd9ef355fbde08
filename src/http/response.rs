//! Canned HTTP responses served for registered routes.

use crate::{errors::ResponseError, http::types};
use serde::Serialize;
use std::io::Write;

const CONTENT_LENGTH: &str = "Content-Length";
const CONTENT_TYPE: &str = "Content-Type";
const JSON_CONTENT_TYPE: &str = "application/json";
const TEXT_CONTENT_TYPE: &str = "text/html";

/// A status code, headers and an optional body.
///
/// Whenever the body is non-empty and no `Content-Length` header was given,
/// one equal to the body's byte length is added. A `Content-Length` supplied
/// by the caller is never replaced, even if it is wrong, so tests can serve
/// deliberately broken responses.
///
/// The [`text`](Response::text) and JSON constructors also add a
/// `Content-Type` unless one is present.
///
/// # Examples
/// ```
/// use perfidy::Response;
///
/// let not_found = Response::from(404);
/// assert_eq!(not_found.body(), None);
///
/// let page = Response::from("<h1>Hello</h1>");
/// assert_eq!(page.status(), 200);
/// assert_eq!(page.header("Content-Type"), Some("text/html"));
/// assert_eq!(page.header("Content-Length"), Some("14"));
///
/// let created = Response::raw_json(201, [("Location", "/users/1")], r#"{"id":1}"#).unwrap();
/// assert_eq!(created.header("Content-Type"), Some("application/json"));
/// ```
///
/// # Hanging
///
/// A response built with [`Response::hang`], or with the reserved status
/// [`Response::HANG_STATUS`], is never written: the server accepts the
/// request and then keeps the connection open without answering, so client
/// timeouts can be tested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: u16,
    body: Option<Vec<u8>>,
    headers: Vec<(String, String)>,
    hang: bool,
}

impl Response {
    /// Reserved status that turns a response into a [hang](Response::hang).
    pub const HANG_STATUS: u16 = 666;

    /// A response with `status` and neither headers nor body.
    #[inline]
    pub fn new(status: u16) -> Self {
        Response {
            status,
            body: None,
            headers: Vec::new(),
            hang: status == Self::HANG_STATUS,
        }
    }

    /// A response that is never sent.
    ///
    /// The connection stays open until the client gives up or the server is
    /// stopped.
    pub fn hang() -> Self {
        Response {
            status: Self::HANG_STATUS,
            body: None,
            headers: Vec::new(),
            hang: true,
        }
    }

    /// A response with arbitrary bytes as the body.
    ///
    /// Only `Content-Length` is derived; no `Content-Type` is added.
    pub fn with_data<H, K, V, B>(status: u16, headers: H, data: Option<B>) -> Self
    where
        H: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
        B: Into<Vec<u8>>,
    {
        let mut response = Response {
            status,
            body: data.map(Into::into),
            headers: Vec::new(),
            hang: status == Self::HANG_STATUS,
        };

        for (name, value) in headers {
            response.set_header(name.into(), value.into());
        }

        if let Some(len) = response.body.as_ref().map(Vec::len).filter(|len| *len > 0) {
            response.default_header(CONTENT_LENGTH, len.to_string());
        }

        response
    }

    /// A UTF-8 text body served as `text/html`.
    pub fn text<H, K, V>(status: u16, headers: H, text: impl Into<String>) -> Self
    where
        H: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let text: String = text.into();
        Self::with_data(status, headers, Some(text.into_bytes()))
            .with_default_header(CONTENT_TYPE, TEXT_CONTENT_TYPE)
    }

    /// Serializes `value` as the JSON body.
    ///
    /// # Errors
    /// [`ResponseError::UnableToSerializeJson`] when `value` can't be
    /// represented as JSON (for example a map with non-string keys).
    pub fn json<H, K, V, T>(status: u16, headers: H, value: &T) -> Result<Self, ResponseError>
    where
        H: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
        T: Serialize + ?Sized,
    {
        let data = serde_json::to_vec(value)?;
        Ok(Self::with_data(status, headers, Some(data))
            .with_default_header(CONTENT_TYPE, JSON_CONTENT_TYPE))
    }

    /// Uses `json` verbatim as the body after checking it parses.
    ///
    /// Any JSON value is accepted, including bare strings and numbers.
    ///
    /// # Errors
    /// [`ResponseError::UnableToSerializeJson`] when `json` is not
    /// well-formed.
    pub fn raw_json<H, K, V>(status: u16, headers: H, json: &str) -> Result<Self, ResponseError>
    where
        H: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        serde_json::from_str::<serde::de::IgnoredAny>(json)?;
        Ok(Self::with_data(status, headers, Some(json.as_bytes()))
            .with_default_header(CONTENT_TYPE, JSON_CONTENT_TYPE))
    }

    /// Adds a header, replacing any existing header with exactly that name.
    ///
    /// Headers set here count as caller-supplied: a `Content-Length` given
    /// this way, in any letter case, replaces the derived one.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(name.into(), value.into());
        self
    }

    fn with_default_header(mut self, name: &str, value: &str) -> Self {
        self.default_header(name, value.to_owned());
        self
    }

    fn set_header(&mut self, name: String, value: String) {
        // At most one Content-Length may reach the wire.
        let any_case = name.eq_ignore_ascii_case(CONTENT_LENGTH);
        let existing = self.headers.iter_mut().find(|(n, _)| match any_case {
            true => n.eq_ignore_ascii_case(&name),
            false => *n == name,
        });

        match existing {
            Some(header) => *header = (name, value),
            None => self.headers.push((name, value)),
        }
    }

    fn default_header(&mut self, name: &str, value: String) {
        if self.header(name).is_none() {
            self.headers.push((name.to_owned(), value));
        }
    }
}

// Public API
impl Response {
    #[inline]
    pub const fn status(&self) -> u16 {
        self.status
    }

    #[inline]
    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// All headers in the order they will be written.
    #[inline]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Returns the first header value with case-insensitive name matching.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether the server should withhold this response entirely.
    #[inline]
    pub const fn is_hang(&self) -> bool {
        self.hang
    }
}

impl Response {
    /// Serializes the status line, headers and body.
    pub(crate) fn write_to(&self, buffer: &mut Vec<u8>) {
        let _ = write!(
            buffer,
            "HTTP/1.1 {} {}\r\n",
            self.status,
            types::reason_phrase(self.status)
        );

        for (name, value) in &self.headers {
            buffer.extend_from_slice(name.as_bytes());
            buffer.extend_from_slice(b": ");
            buffer.extend_from_slice(value.as_bytes());
            buffer.extend_from_slice(b"\r\n");
        }
        buffer.extend_from_slice(b"\r\n");

        if let Some(body) = &self.body {
            buffer.extend_from_slice(body);
        }
    }

    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut buffer =
            Vec::with_capacity(64 + self.body.as_ref().map_or(0, Vec::len));
        self.write_to(&mut buffer);
        buffer
    }
}

impl Default for Response {
    /// `200` with no body.
    fn default() -> Self {
        Response::new(200)
    }
}

impl From<u16> for Response {
    fn from(status: u16) -> Self {
        Response::new(status)
    }
}

impl From<&str> for Response {
    fn from(text: &str) -> Self {
        Response::text(200, [] as [(String, String); 0], text)
    }
}

impl From<String> for Response {
    fn from(text: String) -> Self {
        Response::text(200, [] as [(String, String); 0], text)
    }
}

#[cfg(test)]
mod content_length_tests {
    use super::*;

    #[test]
    fn derived() {
        #[rustfmt::skip]
        let cases: [(Option<&[u8]>, Option<&str>); 4] = [
            (None,                  None),
            (Some(b""),             None),
            (Some(b"x"),            Some("1")),
            (Some("caf\u{e9}".as_bytes()), Some("5")),
        ];

        for (data, expected) in cases {
            let resp = Response::with_data(200, [] as [(&str, &str); 0], data);
            assert_eq!(resp.header("Content-Length"), expected, "{data:?}");
            assert_eq!(resp.header("Content-Type"), None);
        }
    }

    #[test]
    fn explicit_wins() {
        let resp = Response::with_data(200, [("Content-Length", "99")], Some("short"));
        assert_eq!(resp.header("Content-Length"), Some("99"));
        assert_eq!(resp.headers().len(), 1);

        let resp = Response::with_data(200, [("content-length", "3")], Some("short"));
        assert_eq!(resp.headers(), [("content-length".to_owned(), "3".to_owned())]);

        let resp = Response::text(200, [] as [(&str, &str); 0], "hello")
            .with_header("Content-Length", "1");
        assert_eq!(resp.header("Content-Length"), Some("1"));

        let resp = Response::text(200, [] as [(&str, &str); 0], "hello")
            .with_header("content-length", "1");
        assert_eq!(
            String::from_utf8(resp.to_bytes()).unwrap(),
            "HTTP/1.1 200 OK\r\ncontent-length: 1\r\nContent-Type: text/html\r\n\r\nhello"
        );

        let resp = Response::with_data(
            200,
            [("Content-Length", "1"), ("CONTENT-LENGTH", "2")],
            Some("hello"),
        );
        assert_eq!(resp.headers(), [("CONTENT-LENGTH".to_owned(), "2".to_owned())]);
    }

    #[test]
    fn duplicate_names_collapse() {
        let resp = Response::with_data(200, [("X-A", "1"), ("X-A", "2"), ("x-a", "3")], None::<&str>);
        assert_eq!(
            resp.headers(),
            [
                ("X-A".to_owned(), "2".to_owned()),
                ("x-a".to_owned(), "3".to_owned())
            ]
        );
    }
}

#[cfg(test)]
mod constructor_tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn bare_values() {
        let status = Response::from(201);
        assert_eq!(status.status(), 201);
        assert_eq!(status.body(), None);
        assert!(status.headers().is_empty());

        let text = Response::from("hi");
        assert_eq!(text.status(), 200);
        assert_eq!(text.body(), Some(&b"hi"[..]));
        assert_eq!(text.header("content-type"), Some("text/html"));

        assert_eq!(Response::default(), Response::new(200));
    }

    #[test]
    fn text_keeps_given_content_type() {
        let resp = Response::text(200, [("Content-Type", "text/plain")], "plain");
        assert_eq!(resp.header("Content-Type"), Some("text/plain"));
        assert_eq!(resp.headers().len(), 2);
    }

    #[test]
    fn json_value() {
        let resp = Response::json(
            201,
            [] as [(&str, &str); 0],
            &serde_json::json!({ "thing": 42 }),
        )
        .unwrap();

        assert_eq!(resp.status(), 201);
        assert_eq!(resp.header("Content-Type"), Some("application/json"));
        let parsed: serde_json::Value = serde_json::from_slice(resp.body().unwrap()).unwrap();
        assert_eq!(parsed["thing"], 42);
        assert_eq!(
            resp.header("Content-Length"),
            Some(resp.body().unwrap().len().to_string().as_str())
        );
    }

    #[test]
    fn json_unserializable() {
        let mut map = HashMap::new();
        map.insert((1, 2), "tuple keys are not JSON");

        let err = Response::json(200, [] as [(&str, &str); 0], &map).unwrap_err();
        assert!(matches!(err, ResponseError::UnableToSerializeJson(_)));
    }

    #[test]
    fn raw_json() {
        #[rustfmt::skip]
        let cases = [
            (r#"{"thing":42}"#, true),
            (r#"[1, 2, 3]"#,    true),
            (r#""fragment""#,   true),
            ("42",              true),
            (r#"{"thing":"#,    false),
            ("not json",        false),
            ("",                false),
        ];

        for (src, ok) in cases {
            let result = Response::raw_json(200, [] as [(&str, &str); 0], src);
            assert_eq!(result.is_ok(), ok, "{src:?}");
            if let Ok(resp) = result {
                assert_eq!(resp.body(), Some(src.as_bytes()));
            }
        }
    }

    #[test]
    fn hang_flag() {
        assert!(Response::hang().is_hang());
        assert!(Response::from(Response::HANG_STATUS).is_hang());
        assert!(!Response::from(665).is_hang());
        assert!(!Response::from(667).is_hang());
    }
}
