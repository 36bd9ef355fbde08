use std::{fmt, io, path::Path};
use thiserror::Error;

/// Failure to bring the server's listening socket up.
///
/// Both variants are returned synchronously from [`Server::start`](crate::Server::start)
/// and leave the server unstarted.
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Another listener already owns the port.
    #[error("The port {port} is already in use.")]
    PortAlreadyInUse { port: u16 },

    /// Any other OS-level failure while binding or preparing the event loop.
    #[error("{reason}")]
    Unknown { reason: String },
}

impl NetworkError {
    pub(crate) fn from_bind(port: u16, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::AddrInUse => NetworkError::PortAlreadyInUse { port },
            _ => NetworkError::Unknown {
                reason: err.to_string(),
            },
        }
    }
}

/// Failure to load route definitions from a JSON file.
///
/// Every variant carries the name of the offending file.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum FileError {
    #[error("The file \u{201c}{0}\u{201d} could not be found.")]
    NotFound(String),

    #[error("Unable to open or read the file at {0}.")]
    Unreadable(String),

    #[error("Couldn't parse the file of routes named {0}.")]
    Malformed(String),

    #[error("Expected an array of objects in {0}, but found some other JSON type.")]
    NotArrayOfObjects(String),
}

impl FileError {
    pub(crate) fn name_of(path: &Path) -> String {
        path.display().to_string()
    }
}

/// Failure to build a JSON [`Response`](crate::Response).
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ResponseError {
    #[error("Unable to convert given JSON to data: {0}")]
    UnableToSerializeJson(String),
}

impl From<serde_json::Error> for ResponseError {
    fn from(err: serde_json::Error) -> Self {
        ResponseError::UnableToSerializeJson(err.to_string())
    }
}

/// Per-connection failures. These end a single connection and are never
/// reported to the code driving the server.
#[derive(Error, Debug, PartialEq)]
pub(crate) enum ErrorKind {
    #[error("malformed request line")]
    InvalidRequestLine,
    #[error("malformed header line")]
    InvalidHeader,
    #[error("request head is not valid UTF-8")]
    InvalidEncoding,
    #[error("request head exceeds the configured limit")]
    HeadTooLarge,
    #[error("declared body of {0} bytes exceeds the configured limit")]
    BodyTooLarge(usize),

    #[error("peer closed the connection early")]
    Closed,
    #[error("socket timed out")]
    TimedOut,
    #[error("i/o failure: {0}")]
    Io(IoError),
}

macro_rules! http_errors {
    ($($name:ident: $status_code:literal; )*) => {
        /// Canned response written before the connection is dropped, or
        /// `None` when the socket is no longer usable.
        pub(crate) const fn as_http(&self) -> Option<&'static [u8]> {
            match self {
                $(Self::$name { .. } => Some(concat!(
                    "HTTP/1.1 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: 0\r\n\r\n",
                ).as_bytes()),)*
                _ => None,
            }
        }
    };
}

impl ErrorKind {
    http_errors! {
        InvalidRequestLine: "400 Bad Request";
        InvalidHeader: "400 Bad Request";
        InvalidEncoding: "400 Bad Request";
        HeadTooLarge: "431 Request Header Fields Too Large";
        BodyTooLarge: "413 Payload Too Large";
    }
}

impl From<io::Error> for ErrorKind {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut => ErrorKind::TimedOut,
            io::ErrorKind::UnexpectedEof => ErrorKind::Closed,
            _ => ErrorKind::Io(IoError(err)),
        }
    }
}

#[derive(Debug)]
pub(crate) struct IoError(pub(crate) io::Error);

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}
