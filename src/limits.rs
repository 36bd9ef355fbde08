//! Server configuration limits and timeouts
//!
//! The port and the default status are the knobs most tests touch; they live
//! on [`ServerBuilder`](crate::ServerBuilder) directly. Everything here has a
//! default suitable for a test suite and rarely needs changing.
//!
//! # Examples
//!
//! ```no_run
//! use perfidy::{Server, limits::{ConnLimits, ServerLimits}};
//! use std::time::Duration;
//!
//! let mut server = Server::builder()
//!     .port(10175)
//!     .default_status(404)
//!     .server_limits(ServerLimits {
//!         backlog: 32,
//!         ..ServerLimits::default()
//!     })
//!     .connection_limits(ConnLimits {
//!         socket_read_timeout: Duration::from_secs(2),
//!         body_size: 64 * 1024,
//!         ..ConnLimits::default()
//!     })
//!     .build();
//!
//! server.start().unwrap();
//! ```

use std::time::Duration;

/// Listening socket and event loop settings.
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// Length of the pending-connection queue passed to `listen(2)` (default: `10`).
    pub backlog: i32,

    /// How long [`stop`](crate::Server::stop) waits for the event loop to
    /// wind down before abandoning it (default: `1 second`).
    ///
    /// Connections held open by a [hang](crate::Response::hang) response are
    /// dropped, not drained, so this only bounds the teardown itself.
    pub stop_timeout: Duration,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            backlog: 10,
            stop_timeout: Duration::from_secs(1),

            _priv: (),
        }
    }
}

/// Connection-level limits and timeouts
///
/// Every accepted connection serves exactly one request. These values bound
/// how long it may take to arrive and how large it may be.
#[derive(Debug, Clone)]
pub struct ConnLimits {
    /// Maximum duration to wait for the next chunk of the request (default: `10 seconds`)
    ///
    /// If no data is received within this time, the connection is dropped
    /// without a response.
    pub socket_read_timeout: Duration,

    /// Maximum duration to wait for the response to be written (default: `10 seconds`)
    pub socket_write_timeout: Duration,

    /// Maximum size of the request line plus headers, in bytes (default: `16 KiB`)
    ///
    /// A larger head is answered with `431 Request Header Fields Too Large`.
    pub head_size: usize,

    /// Maximum declared `Content-Length`, in bytes (default: `8 MiB`)
    ///
    /// A larger body is answered with `413 Payload Too Large` before any of
    /// it is read.
    pub body_size: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ConnLimits {
    #[inline(always)]
    fn default() -> Self {
        Self {
            socket_read_timeout: Duration::from_secs(10),
            socket_write_timeout: Duration::from_secs(10),
            head_size: 16 * 1024,
            body_size: 8 * 1024 * 1024,

            _priv: (),
        }
    }
}
