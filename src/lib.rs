//! perfidy - in-process fake HTTP/1.1 server for testing HTTP clients
//!
//! Start a [`Server`] on a local port, register canned [`Response`]s for
//! [`Route`]s, point the client under test at it, then assert on the
//! [`Request`]s the server received.
//!
//! # Behaviour
//!
//! - **One request per connection**: every response is followed by closing
//!   the connection. There is no keep-alive.
//! - **Exact routing**: a route is a verb plus a path, matched exactly.
//!   Unregistered routes get the server's default status with no body.
//! - **Request log**: every complete request is recorded, in arrival order.
//! - **Hangs**: status [`666`](Response::HANG_STATUS) is never sent, so client
//!   timeouts can be tested.
//! - **Own event loop**: the server runs its I/O on a background thread, so
//!   it works from plain `#[test]` functions.
//!
//! # Examples
//!
//! ```no_run
//! use perfidy::{Response, Server};
//! use std::{sync::mpsc, time::Duration};
//!
//! let server = Server::launch(0, 404).unwrap();
//!
//! server.add("GET /201", 201);
//! server.add("GET /users/1", Response::raw_json(200, [("X-Cache", "miss")], r#"{"id":1}"#).unwrap());
//!
//! let (tx, rx) = mpsc::channel();
//! server.add_with_handler("POST /form", 200, move |request| {
//!     let _ = tx.send(request.body().map(<[u8]>::to_vec));
//! });
//!
//! // ... run the client against `server.url()` ...
//!
//! let posted = rx.recv_timeout(Duration::from_secs(5)).unwrap();
//! assert_eq!(server.number_of_requests("POST /form"), 1);
//! ```
//!
//! Routes can also be loaded from JSON, see [`Server::add_from_file`].
//!
//! # Logging
//!
//! The crate reports through [`tracing`]: `info` for start and stop, `warn`
//! for rejected requests and failed connection tasks, `debug`/`trace` for
//! per-connection detail. Nothing is printed unless a subscriber is
//! installed.

pub(crate) mod http {
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod route;
    pub(crate) mod types;
}
pub(crate) mod server {
    pub(crate) mod connection;
    pub(crate) mod definitions;
    pub(crate) mod route_table;
    pub(crate) mod server_impl;
}
pub(crate) mod errors;
pub mod limits;

pub use crate::{
    errors::{FileError, NetworkError, ResponseError},
    http::{request::Request, response::Response, route::Route, types::Verb},
    server::{
        route_table::{RequestHandler, RouteTable},
        server_impl::{Server, ServerBuilder},
    },
};

#[cfg(test)]
pub(crate) mod tools {
    use std::{
        io::{self, Read, Write},
        net::{SocketAddr, TcpStream},
        str::from_utf8,
        time::Duration,
    };

    /// A parsed response as seen by a client.
    #[derive(Debug)]
    pub(crate) struct Reply {
        pub(crate) status_line: String,
        pub(crate) status: u16,
        pub(crate) headers: Vec<(String, String)>,
        pub(crate) body: Vec<u8>,
    }

    impl Reply {
        pub(crate) fn header(&self, name: &str) -> Option<&str> {
            self.headers
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
        }
    }

    pub(crate) fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .try_init();
    }

    /// Writes `request` on a fresh connection and reads until the server
    /// closes it.
    pub(crate) fn send_raw(addr: SocketAddr, request: &str) -> io::Result<Vec<u8>> {
        let mut stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(Some(Duration::from_secs(5)))?;
        stream.write_all(request.as_bytes())?;

        let mut response = Vec::new();
        stream.read_to_end(&mut response)?;
        Ok(response)
    }

    pub(crate) fn send(addr: SocketAddr, request: &str) -> io::Result<Reply> {
        let raw = send_raw(addr, request)?;
        parse(&raw).ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "malformed response"))
    }

    fn parse(raw: &[u8]) -> Option<Reply> {
        let end = memchr::memmem::find(raw, b"\r\n\r\n")?;
        let head = from_utf8(&raw[..end]).ok()?;
        let mut lines = head.split("\r\n");

        let status_line = lines.next()?.to_owned();
        let status = status_line.split(' ').nth(1)?.parse().ok()?;

        let headers = lines
            .map(|line| {
                let (name, value) = line.split_once(':')?;
                Some((name.to_owned(), value.trim().to_owned()))
            })
            .collect::<Option<_>>()?;

        Some(Reply {
            status_line,
            status,
            headers,
            body: raw[end + 4..].to_vec(),
        })
    }
}
