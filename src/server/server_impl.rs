use crate::{
    errors::{FileError, NetworkError},
    http::{request::Request, response::Response, route::Route},
    limits::{ConnLimits, ServerLimits},
    server::{
        connection::{HttpConnection, Outcome},
        definitions,
        route_table::RouteTable,
    },
};
use serde_json::{Map, Value};
use socket2::{Domain, Protocol, Socket, Type};
use std::{
    future, io,
    net::{Ipv4Addr, SocketAddr},
    path::Path,
    sync::Arc,
    thread,
    time::Duration,
};
use tokio::{
    net::{TcpListener, TcpStream},
    runtime::{self, Handle, Runtime},
    task::JoinSet,
};
use tracing::{debug, info, trace, warn};

/// A fake HTTP/1.1 server answering with canned responses.
///
/// The server listens on `127.0.0.1` and drives all connections from one
/// background event-loop thread, so it can be used from ordinary
/// (synchronous) tests as well as from inside an async runtime. Each
/// connection carries exactly one request and is closed after the response.
///
/// Requests to routes without a registered response get the server's
/// default status and an empty body. Every request is logged and can be
/// inspected with [`requests`](Server::requests).
///
/// # Examples
///
/// ```no_run
/// use perfidy::{Response, Server};
///
/// let server = Server::launch(0, 404).unwrap();
/// server.add("GET /201", 201);
/// server.add("POST /users", Response::raw_json(201, [("Location", "/users/7")], r#"{"id":7}"#).unwrap());
///
/// // ... point the client under test at `server.url()` ...
///
/// assert_eq!(server.number_of_requests("POST /users"), 0);
/// ```
///
/// Scoped form, stopping the server even when the closure panics:
///
/// ```no_run
/// use perfidy::Server;
///
/// let count = Server::run_with(0, 404, |server| {
///     server.add("/ping", "pong");
///     // ... exercise the client ...
///     server.number_of_requests("/ping")
/// })
/// .unwrap();
/// ```
#[derive(Debug)]
pub struct Server {
    port: u16,
    default_status: u16,
    routes: Arc<RouteTable>,
    server_limits: ServerLimits,
    conn_limits: ConnLimits,
    running: Option<Running>,
}

#[derive(Debug)]
struct Running {
    runtime: Runtime,
    local_addr: SocketAddr,
}

impl Server {
    pub const DEFAULT_PORT: u16 = 10175;
    pub const DEFAULT_STATUS: u16 = 404;

    /// An unstarted server. Use `0` as the port to let the OS pick one.
    pub fn new(port: u16, default_status: u16) -> Self {
        Self::builder().port(port).default_status(default_status).build()
    }

    /// Creates a new builder for configuring the server instance.
    ///
    /// # Examples
    ///
    /// ```
    /// use perfidy::{limits::ConnLimits, Server};
    /// use std::time::Duration;
    ///
    /// let server = Server::builder()
    ///     .port(0)
    ///     .default_status(500)
    ///     .connection_limits(ConnLimits {
    ///         socket_read_timeout: Duration::from_secs(1),
    ///         ..ConnLimits::default() // Required line
    ///     })
    ///     .build();
    ///
    /// assert!(!server.is_running());
    /// ```
    #[inline]
    pub fn builder() -> ServerBuilder {
        ServerBuilder {
            port: Self::DEFAULT_PORT,
            default_status: Self::DEFAULT_STATUS,
            server_limits: None,
            connection_limits: None,
        }
    }

    /// [`Server::new`] followed by [`start`](Server::start).
    pub fn launch(port: u16, default_status: u16) -> Result<Self, NetworkError> {
        let mut server = Self::new(port, default_status);
        server.start()?;
        Ok(server)
    }

    /// Starts a server, hands it to `body` and stops it afterwards.
    ///
    /// The server is stopped on every exit path, including a panic inside
    /// `body`, so neither routes nor logged requests outlive the call.
    pub fn run_with<F, R>(port: u16, default_status: u16, body: F) -> Result<R, NetworkError>
    where
        F: FnOnce(&Server) -> R,
    {
        let mut server = Self::launch(port, default_status)?;
        let result = body(&server);
        server.stop();
        Ok(result)
    }

    /// Binds the listening socket and starts accepting connections.
    ///
    /// Does nothing if the server is already running.
    ///
    /// # Errors
    /// - [`NetworkError::PortAlreadyInUse`] when another socket holds the port.
    /// - [`NetworkError::Unknown`] for any other failure.
    pub fn start(&mut self) -> Result<(), NetworkError> {
        if self.running.is_some() {
            return Ok(());
        }

        let listener = bind(self.port, self.server_limits.backlog)
            .map_err(|err| NetworkError::from_bind(self.port, err))?;

        let runtime = runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("perfidy-event-loop")
            .enable_io()
            .enable_time()
            .build()
            .map_err(unknown)?;

        let attached = {
            let _guard = runtime.enter();
            TcpListener::from_std(listener)
                .and_then(|listener| Ok((listener.local_addr()?, listener)))
        };
        let (local_addr, listener) = match attached {
            Ok(attached) => attached,
            Err(err) => {
                shut_down(runtime, self.server_limits.stop_timeout);
                return Err(unknown(err));
            }
        };

        runtime.spawn(accept_loop(
            listener,
            self.routes.clone(),
            self.default_status,
            self.conn_limits.clone(),
        ));

        info!(port = local_addr.port(), default_status = self.default_status, "server started");
        self.running = Some(Running {
            runtime,
            local_addr,
        });
        Ok(())
    }

    /// Stops the server: clears the route table and the request log, closes
    /// the listener and drops every open connection.
    ///
    /// Safe to call on a server that was never started, and more than once.
    ///
    /// The port is free again once this returns, also when called from
    /// inside an async runtime.
    pub fn stop(&mut self) {
        if let Some(Running {
            runtime,
            local_addr,
        }) = self.running.take()
        {
            shut_down(runtime, self.server_limits.stop_timeout);
            info!(port = local_addr.port(), "server stopped");
        }

        self.routes.clear();
    }
}

// Public API
impl Server {
    /// Registers `response` for `route`, replacing any earlier registration
    /// and handler.
    ///
    /// ```
    /// use perfidy::{Response, Server};
    ///
    /// let server = Server::new(0, 404);
    /// server.add("GET /201", 201);
    /// server.add("/page", "<p>hello</p>");
    /// server.add("DELETE /users/1", Response::new(204));
    /// ```
    pub fn add(&self, route: impl Into<Route>, response: impl Into<Response>) {
        self.routes.add(route.into(), response.into(), None);
    }

    /// Like [`add`](Server::add), also calling `handler` with every completed
    /// request for `route`.
    ///
    /// The handler runs on the event-loop thread; use a channel to get data
    /// back to the test.
    ///
    /// ```no_run
    /// use perfidy::Server;
    /// use std::{sync::mpsc, time::Duration};
    ///
    /// let server = Server::launch(0, 404).unwrap();
    /// let (tx, rx) = mpsc::channel();
    /// server.add_with_handler("POST /form", 200, move |request| {
    ///     let _ = tx.send(request.body_str().unwrap_or_default().to_owned());
    /// });
    ///
    /// // ... client posts to `/form` ...
    ///
    /// let body = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    /// ```
    pub fn add_with_handler<F>(
        &self,
        route: impl Into<Route>,
        response: impl Into<Response>,
        handler: F,
    ) where
        F: Fn(&Request) + Send + Sync + 'static,
    {
        self.routes
            .add(route.into(), response.into(), Some(Arc::new(handler)));
    }

    /// Registers several routes in order.
    pub fn add_all<I, R, S>(&self, routes: I)
    where
        I: IntoIterator<Item = (R, S)>,
        R: Into<Route>,
        S: Into<Response>,
    {
        self.routes.add_batch(
            routes
                .into_iter()
                .map(|(route, response)| (route.into(), response.into())),
        );
    }

    /// Registers route definitions given as JSON objects.
    ///
    /// See [`add_from_file`](Server::add_from_file) for the format.
    pub fn add_definitions<'a, I>(&self, objects: I)
    where
        I: IntoIterator<Item = &'a Map<String, Value>>,
    {
        self.routes.add_batch(definitions::from_objects(objects));
    }

    /// Registers route definitions from a JSON array of objects.
    ///
    /// # Errors
    /// [`FileError::NotArrayOfObjects`] if `json` has another shape; nothing
    /// is registered in that case.
    pub fn add_json(&self, json: &Value) -> Result<(), FileError> {
        self.routes
            .add_batch(definitions::from_value(json, "JSON value")?);
        Ok(())
    }

    /// Registers route definitions read from a JSON file.
    ///
    /// The file holds an array of objects with the optional fields
    /// `method` (default `GET`), `path` (default `/`), `status` (default
    /// `200`) and `content`. Objects and arrays in `content` are served as
    /// serialized JSON, strings verbatim, numbers and booleans as text.
    ///
    /// ```json
    /// [
    ///   { "method": "GET", "path": "/api/account/111", "content": { "id": "111" } },
    ///   { "method": "PUT", "path": "/api/account/111/money", "status": 204 }
    /// ]
    /// ```
    ///
    /// # Errors
    /// A [`FileError`] naming the file when it is missing, unreadable, not
    /// JSON, or not an array of objects.
    pub fn add_from_file(&self, path: impl AsRef<Path>) -> Result<(), FileError> {
        self.routes
            .add_batch(definitions::from_file(path.as_ref())?);
        Ok(())
    }

    /// Every logged request for `route`, oldest first.
    pub fn requests(&self, route: impl Into<Route>) -> Vec<Request> {
        self.routes.requests_for(&route.into())
    }

    pub fn number_of_requests(&self, route: impl Into<Route>) -> usize {
        self.routes.number_of_requests(&route.into())
    }

    pub fn did_request(&self, route: impl Into<Route>) -> bool {
        self.routes.did_request(&route.into())
    }

    /// The underlying table, for registrations with precomputed [`Route`]s.
    #[inline]
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// The bound port while running, otherwise the configured one.
    pub fn port(&self) -> u16 {
        self.local_addr().map_or(self.port, |addr| addr.port())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|running| running.local_addr)
    }

    /// `http://127.0.0.1:<port>`
    pub fn url(&self) -> String {
        format!("http://{}:{}", Ipv4Addr::LOCALHOST, self.port())
    }

    #[inline]
    pub const fn default_status(&self) -> u16 {
        self.default_status
    }

    #[inline]
    pub const fn is_running(&self) -> bool {
        self.running.is_some()
    }
}

impl Default for Server {
    /// Unstarted, on [`DEFAULT_PORT`](Server::DEFAULT_PORT) with
    /// [`DEFAULT_STATUS`](Server::DEFAULT_STATUS).
    fn default() -> Self {
        Self::new(Self::DEFAULT_PORT, Self::DEFAULT_STATUS)
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

fn bind(port: u16, backlog: i32) -> io::Result<std::net::TcpListener> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));

    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;
    socket.set_nonblocking(true)?;

    Ok(socket.into())
}

/// Shuts `runtime` down and waits until its listener and connections are
/// closed.
fn shut_down(runtime: Runtime, timeout: Duration) {
    // Blocking on shutdown panics inside another runtime, so wait on a
    // plain thread there instead.
    if Handle::try_current().is_err() {
        return runtime.shutdown_timeout(timeout);
    }

    let waiter = thread::spawn(move || runtime.shutdown_timeout(timeout));
    if waiter.join().is_err() {
        warn!("event loop shutdown panicked");
    }
}

#[inline]
fn unknown(err: io::Error) -> NetworkError {
    NetworkError::Unknown {
        reason: err.to_string(),
    }
}

async fn accept_loop(
    listener: TcpListener,
    routes: Arc<RouteTable>,
    default_status: u16,
    limits: ConnLimits,
) {
    let mut live = JoinSet::new();
    let mut next_id: u64 = 0;

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(value) => value,
                    Err(err) => {
                        warn!(error = %err, "accept failed");
                        continue;
                    }
                };

                next_id += 1;
                trace!(conn = next_id, %peer, "accepted");

                let conn = HttpConnection::new(next_id, routes.clone(), default_status, limits.clone());
                live.spawn(serve(conn, stream));
            }
            Some(finished) = live.join_next(), if !live.is_empty() => {
                if let Err(err) = finished {
                    warn!(error = %err, "connection task failed");
                }
            }
        }
    }
}

async fn serve(conn: HttpConnection, mut stream: TcpStream) {
    if conn.run(&mut stream).await == Outcome::Stalled {
        // Keep the socket open without answering until the server stops.
        debug!("holding connection open");
        future::pending::<()>().await;
    }
}

//

/// Builder for configuring and creating [`Server`] instances.
#[derive(Debug, Clone)]
pub struct ServerBuilder {
    port: u16,
    default_status: u16,
    server_limits: Option<ServerLimits>,
    connection_limits: Option<ConnLimits>,
}

impl ServerBuilder {
    /// Port to listen on (default: [`Server::DEFAULT_PORT`]). `0` picks a
    /// free port.
    #[inline(always)]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Status served for unregistered routes (default:
    /// [`Server::DEFAULT_STATUS`]).
    #[inline(always)]
    pub fn default_status(mut self, status: u16) -> Self {
        self.default_status = status;
        self
    }

    /// Configures the listening socket and event loop.
    #[inline(always)]
    pub fn server_limits(mut self, limits: ServerLimits) -> Self {
        self.server_limits = Some(limits);
        self
    }

    /// Configures per-connection timeouts and size limits.
    #[inline(always)]
    pub fn connection_limits(mut self, limits: ConnLimits) -> Self {
        self.connection_limits = Some(limits);
        self
    }

    /// Finalizes the builder. The server is not started.
    pub fn build(self) -> Server {
        Server {
            port: self.port,
            default_status: self.default_status,
            routes: Arc::new(RouteTable::new()),
            server_limits: self.server_limits.unwrap_or_default(),
            conn_limits: self.connection_limits.unwrap_or_default(),
            running: None,
        }
    }
}
