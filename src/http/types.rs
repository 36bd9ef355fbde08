//! Core HTTP protocol types and utilities

use std::fmt;

#[inline(always)]
pub(crate) fn slice_to_usize(bytes: &[u8]) -> Option<usize> {
    if bytes.is_empty() {
        return None;
    }

    let mut result: usize = 0;

    for &byte in bytes {
        if !byte.is_ascii_digit() {
            return None;
        }

        result = result
            .checked_mul(10)?
            .checked_add((byte - b'0') as usize)?;
    }

    Some(result)
}

// VERB

/// HTTP verbs a [`Route`](crate::Route) can be registered for
///
/// # References
///
/// - [RFC 7231, Section 4](https://datatracker.ietf.org/doc/html/rfc7231#section-4)
/// - [RFC 5789](https://datatracker.ietf.org/doc/html/rfc5789) (PATCH method)
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum Verb {
    /// [[RFC7231, Section 4.3.1](https://tools.ietf.org/html/rfc7231#section-4.3.1)]
    #[default]
    Get,
    /// [[RFC7231, Section 4.3.2](https://tools.ietf.org/html/rfc7231#section-4.3.2)]
    Head,
    /// [[RFC7231, Section 4.3.3](https://tools.ietf.org/html/rfc7231#section-4.3.3)]
    Post,
    /// [[RFC7231, Section 4.3.4](https://tools.ietf.org/html/rfc7231#section-4.3.4)]
    Put,
    /// [[RFC5789, Section 2](https://tools.ietf.org/html/rfc5789#section-2)]
    Patch,
    /// [[RFC7231, Section 4.3.5](https://tools.ietf.org/html/rfc7231#section-4.3.5)]
    Delete,
}

impl Verb {
    /// Parses a verb, ignoring ASCII case.
    ///
    /// Unknown verbs are not an error: they yield `None` and the caller
    /// decides what that means.
    ///
    /// ```
    /// use perfidy::Verb;
    ///
    /// assert_eq!(Verb::parse("post"), Some(Verb::Post));
    /// assert_eq!(Verb::parse("OPTIONS"), None);
    /// ```
    pub fn parse(src: &str) -> Option<Self> {
        Self::from_bytes(src.as_bytes())
    }

    #[inline]
    pub(crate) fn from_bytes(src: &[u8]) -> Option<Self> {
        const ALL: [Verb; 6] = [
            Verb::Get,
            Verb::Head,
            Verb::Post,
            Verb::Put,
            Verb::Patch,
            Verb::Delete,
        ];

        ALL.into_iter()
            .find(|verb| verb.as_str().as_bytes().eq_ignore_ascii_case(src))
    }

    /// Canonical uppercase form, as sent on the wire.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Head => "HEAD",
            Verb::Post => "POST",
            Verb::Put => "PUT",
            Verb::Patch => "PATCH",
            Verb::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// STATUS

macro_rules! set_reason_phrases {
    ($( $num:literal => $str:literal; )+) => {
        /// Standard reason phrase for `status`, or `""` for codes without one.
        ///
        /// Canned routes may use any number (`800`, `541`, ...), so the status
        /// itself is never validated against this table.
        #[inline]
        pub(crate) const fn reason_phrase(status: u16) -> &'static str {
            match status { $(
                $num => $str,
            )+
                _ => "",
            }
        }
    }
}

set_reason_phrases! {
    100 => "Continue";
    101 => "Switching Protocols";
    102 => "Processing";

    200 => "OK";
    201 => "Created";
    202 => "Accepted";
    203 => "Non Authoritative Information";
    204 => "No Content";
    205 => "Reset Content";
    206 => "Partial Content";
    207 => "Multi-Status";
    208 => "Already Reported";
    226 => "IM Used";

    300 => "Multiple Choices";
    301 => "Moved Permanently";
    302 => "Found";
    303 => "See Other";
    304 => "Not Modified";
    305 => "Use Proxy";
    307 => "Temporary Redirect";
    308 => "Permanent Redirect";

    400 => "Bad Request";
    401 => "Unauthorized";
    402 => "Payment Required";
    403 => "Forbidden";
    404 => "Not Found";
    405 => "Method Not Allowed";
    406 => "Not Acceptable";
    407 => "Proxy Authentication Required";
    408 => "Request Timeout";
    409 => "Conflict";
    410 => "Gone";
    411 => "Length Required";
    412 => "Precondition Failed";
    413 => "Payload Too Large";
    414 => "URI Too Long";
    415 => "Unsupported Media Type";
    416 => "Range Not Satisfiable";
    417 => "Expectation Failed";
    418 => "I'm a teapot";
    421 => "Misdirected Request";
    422 => "Unprocessable Entity";
    423 => "Locked";
    424 => "Failed Dependency";
    425 => "Too Early";
    426 => "Upgrade Required";
    428 => "Precondition Required";
    429 => "Too Many Requests";
    431 => "Request Header Fields Too Large";
    451 => "Unavailable For Legal Reasons";

    500 => "Internal Server Error";
    501 => "Not Implemented";
    502 => "Bad Gateway";
    503 => "Service Unavailable";
    504 => "Gateway Timeout";
    505 => "HTTP Version Not Supported";
    506 => "Variant Also Negotiates";
    507 => "Insufficient Storage";
    508 => "Loop Detected";
    510 => "Not Extended";
    511 => "Network Authentication Required";
}
