use crate::{
    errors::ErrorKind,
    http::{request::Message, response::Response},
    limits::ConnLimits,
    server::route_table::RouteTable,
};
use std::{fmt, sync::Arc};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    time::sleep,
};
use tracing::{debug, trace, warn};

const READ_CHUNK: usize = 4 * 1024;

/// Serves exactly one request on one connection.
pub(crate) struct HttpConnection {
    id: u64,
    routes: Arc<RouteTable>,
    default_status: u16,
    limits: ConnLimits,
}

/// How a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// A response was written and the stream shut down.
    Closed,
    /// The response was a hang. Nothing was written and the stream must be
    /// kept open by the caller.
    Stalled,
    /// The request was rejected or the peer went away.
    Dropped,
}

impl HttpConnection {
    #[inline]
    pub(crate) fn new(
        id: u64,
        routes: Arc<RouteTable>,
        default_status: u16,
        limits: ConnLimits,
    ) -> Self {
        Self {
            id,
            routes,
            default_status,
            limits,
        }
    }

    pub(crate) async fn run<S>(&self, stream: &mut S) -> Outcome
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match self.drive(stream).await {
            Ok(outcome) => outcome,
            Err(err) => {
                match err.as_http() {
                    Some(http) => {
                        warn!(conn = self.id, error = %err, "rejecting request");
                        let _ = writer::write_bytes(stream, http, self.limits.socket_write_timeout)
                            .await;
                        let _ = stream.shutdown().await;
                    }
                    None => debug!(conn = self.id, error = %err, "connection dropped"),
                }
                Outcome::Dropped
            }
        }
    }

    async fn drive<S>(&self, stream: &mut S) -> Result<Outcome, ErrorKind>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut buf = vec![0; READ_CHUNK];
        let mut state = State::Ready;

        loop {
            let from = state.phase();

            let next = match state {
                State::Ready => State::ReadingHead(Message::new()),

                State::ReadingHead(mut message) => {
                    let n = self.read_chunk(stream, &mut buf).await?;
                    message.append(&buf[..n], self.limits.head_size)?;

                    match message.needs_more_head() {
                        true => State::ReadingHead(message),
                        false => match message.content_length() {
                            len if len > self.limits.body_size => {
                                return Err(ErrorKind::BodyTooLarge(len))
                            }
                            _ => State::ReadingBody(message),
                        },
                    }
                }

                State::ReadingBody(mut message) => {
                    while message.needs_more_body() {
                        let n = self.read_chunk(stream, &mut buf).await?;
                        message.append(&buf[..n], self.limits.head_size)?;
                    }
                    State::ReadComplete(message)
                }

                State::ReadComplete(message) => {
                    let request = message.into_request().ok_or(ErrorKind::InvalidRequestLine)?;
                    let route = request.route();

                    let response = self
                        .routes
                        .complete(request)
                        .unwrap_or_else(|| Response::new(self.default_status));

                    debug!(conn = self.id, %route, status = response.status(), "request complete");
                    State::WritingResponse(response)
                }

                State::WritingResponse(response) => {
                    if response.is_hang() {
                        debug!(conn = self.id, "withholding response");
                        return Ok(Outcome::Stalled);
                    }

                    writer::write_bytes(
                        stream,
                        &response.to_bytes(),
                        self.limits.socket_write_timeout,
                    )
                    .await?;
                    State::WriteComplete
                }

                State::WriteComplete => {
                    let _ = stream.shutdown().await;
                    trace!(conn = self.id, "connection closed");
                    return Ok(Outcome::Closed);
                }
            };

            state = advance(from, next);
        }
    }

    async fn read_chunk<S>(&self, stream: &mut S, buf: &mut [u8]) -> Result<usize, ErrorKind>
    where
        S: AsyncRead + Unpin,
    {
        tokio::select! {
            biased;

            read_result = stream.read(buf) => match read_result? {
                0 => Err(ErrorKind::Closed),
                n => {
                    trace!(conn = self.id, bytes = n, "read");
                    Ok(n)
                }
            },
            _ = sleep(self.limits.socket_read_timeout) => Err(ErrorKind::TimedOut),
        }
    }
}

pub(crate) mod writer {
    use crate::errors::ErrorKind;
    use tokio::{
        io::{AsyncWrite, AsyncWriteExt},
        time::{timeout, Duration},
    };

    #[inline]
    pub(crate) async fn write_bytes<S>(
        stream: &mut S,
        bytes: &[u8],
        time: Duration,
    ) -> Result<(), ErrorKind>
    where
        S: AsyncWrite + Unpin,
    {
        let write = async {
            stream.write_all(bytes).await?;
            stream.flush().await
        };

        match timeout(time, write).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ErrorKind::TimedOut),
        }
    }
}

// STATE MACHINE

/// Where a connection is in its single request/response exchange.
#[derive(Debug)]
pub(crate) enum State {
    Ready,
    ReadingHead(Message),
    ReadingBody(Message),
    ReadComplete(Message),
    WritingResponse(Response),
    WriteComplete,
}

/// [`State`] without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Ready,
    ReadingHead,
    ReadingBody,
    ReadComplete,
    WritingResponse,
    WriteComplete,
}

impl State {
    pub(crate) const fn phase(&self) -> Phase {
        match self {
            State::Ready => Phase::Ready,
            State::ReadingHead(_) => Phase::ReadingHead,
            State::ReadingBody(_) => Phase::ReadingBody,
            State::ReadComplete(_) => Phase::ReadComplete,
            State::WritingResponse(_) => Phase::WritingResponse,
            State::WriteComplete => Phase::WriteComplete,
        }
    }
}

impl Phase {
    pub(crate) const fn name(self) -> &'static str {
        match self {
            Phase::Ready => "READY",
            Phase::ReadingHead => "READING_HEAD",
            Phase::ReadingBody => "READING_BODY",
            Phase::ReadComplete => "READ_COMPLETE",
            Phase::WritingResponse => "WRITING_RESPONSE",
            Phase::WriteComplete => "WRITE_COMPLETE",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct IllegalTransition {
    pub(crate) from: Phase,
    pub(crate) to: Phase,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "illegal transition from {} to {}", self.from, self.to)
    }
}

/// Checks `from -> to` and returns the state to enter.
///
/// A body of length zero never produces a read, so entering
/// `READING_BODY` with nothing to read lands directly in `READ_COMPLETE`.
pub(crate) fn transition(from: Phase, to: State) -> Result<State, IllegalTransition> {
    use Phase::*;

    let legal = matches!(
        (from, to.phase()),
        (Ready, ReadingHead)
            | (ReadingHead, ReadingHead)
            | (ReadingHead, ReadingBody)
            | (ReadingBody, ReadComplete)
            | (ReadComplete, WritingResponse)
            | (WritingResponse, WriteComplete)
    );

    if !legal {
        return Err(IllegalTransition {
            from,
            to: to.phase(),
        });
    }

    Ok(match to {
        State::ReadingBody(message) if !message.needs_more_body() => {
            State::ReadComplete(message)
        }
        to => to,
    })
}

/// [`transition`] for the connection loop: events arriving out of order
/// mean the loop itself is broken, so an illegal transition panics.
#[inline]
#[track_caller]
fn advance(from: Phase, to: State) -> State {
    match transition(from, to) {
        Ok(state) => state,
        Err(err) => panic!("{err}"),
    }
}

#[cfg(test)]
mod transition_tests {
    use super::*;

    fn head(src: &str) -> Message {
        Message::from(src).unwrap()
    }

    #[test]
    fn legal_path() {
        let mut state = State::Ready;
        for next in [
            State::ReadingHead(Message::new()),
            State::ReadingHead(Message::new()),
            State::ReadingBody(head("POST / HTTP/1.1\r\ncontent-length: 2\r\n\r\n")),
            State::ReadComplete(head("POST / HTTP/1.1\r\ncontent-length: 2\r\n\r\nhi")),
            State::WritingResponse(Response::default()),
            State::WriteComplete,
        ] {
            let expected = next.phase();
            state = transition(state.phase(), next).unwrap();
            assert_eq!(state.phase(), expected);
        }
    }

    #[test]
    fn empty_body_short_circuits() {
        for src in [
            "GET / HTTP/1.1\r\n\r\n",
            "DELETE /x HTTP/1.1\r\ncontent-length: 0\r\n\r\n",
            "POST /x HTTP/1.1\r\ncontent-length: nope\r\n\r\n",
        ] {
            let state = transition(Phase::ReadingHead, State::ReadingBody(head(src))).unwrap();
            assert_eq!(state.phase(), Phase::ReadComplete, "{src:?}");
        }

        let waiting = head("PUT /x HTTP/1.1\r\ncontent-length: 3\r\n\r\n");
        let state = transition(Phase::ReadingHead, State::ReadingBody(waiting)).unwrap();
        assert_eq!(state.phase(), Phase::ReadingBody);
    }

    #[test]
    fn rejected() {
        #[rustfmt::skip]
        let cases = [
            (Phase::Ready,           State::WriteComplete),
            (Phase::Ready,           State::ReadingBody(Message::new())),
            (Phase::ReadingHead,     State::WritingResponse(Response::default())),
            (Phase::ReadingBody,     State::ReadingHead(Message::new())),
            (Phase::ReadComplete,    State::ReadComplete(Message::new())),
            (Phase::WritingResponse, State::ReadingHead(Message::new())),
            (Phase::WriteComplete,   State::Ready),
            (Phase::WriteComplete,   State::WriteComplete),
        ];

        for (from, to) in cases {
            let to_phase = to.phase();
            assert_eq!(
                transition(from, to).map(|s| s.phase()),
                Err(IllegalTransition { from, to: to_phase })
            );
        }
    }

    #[test]
    #[should_panic(expected = "illegal transition from READY to WRITE_COMPLETE")]
    fn illegal_transition_panics() {
        advance(Phase::Ready, State::WriteComplete);
    }
}

#[cfg(test)]
mod connection_tests {
    use super::*;
    use crate::http::request::Request;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };
    use tokio::{io::duplex, time::timeout};

    fn connection(routes: &Arc<RouteTable>, limits: ConnLimits) -> HttpConnection {
        HttpConnection::new(0, routes.clone(), 404, limits)
    }

    async fn exchange(
        conn: &HttpConnection,
        request: &[u8],
    ) -> (Outcome, String) {
        let (mut client, mut server) = duplex(64 * 1024);
        client.write_all(request).await.unwrap();

        let outcome = conn.run(&mut server).await;
        drop(server);

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        (outcome, String::from_utf8(response).unwrap())
    }

    #[tokio::test]
    async fn default_status() {
        let routes = Arc::new(RouteTable::new());
        let conn = connection(&routes, ConnLimits::default());

        let (outcome, response) =
            exchange(&conn, b"GET /missing HTTP/1.1\r\nHost: localhost\r\n\r\n").await;

        assert_eq!(outcome, Outcome::Closed);
        assert_eq!(response, "HTTP/1.1 404 Not Found\r\n\r\n");
        assert_eq!(routes.number_of_requests(&"/missing".into()), 1);
    }

    #[tokio::test]
    async fn registered_route() {
        let routes = Arc::new(RouteTable::new());
        routes.add("GET /201".into(), Response::text(201, [("X-Test", "yes")], "made"), None);
        let conn = connection(&routes, ConnLimits::default());

        let (_, response) = exchange(&conn, b"get /201 HTTP/1.1\r\n\r\n").await;
        assert_eq!(
            response,
            "HTTP/1.1 201 Created\r\nX-Test: yes\r\nContent-Length: 4\r\nContent-Type: text/html\r\n\r\nmade"
        );
    }

    #[tokio::test]
    async fn body_in_pieces() {
        let routes = Arc::new(RouteTable::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        routes.add(
            "POST /form".into(),
            Response::default(),
            Some(Arc::new(move |request: &Request| {
                assert_eq!(request.body_str(), Some(r#"{"age":"55"}"#));
                seen.fetch_add(1, Ordering::SeqCst);
            })),
        );

        let (mut client, mut server) = duplex(1024);
        let conn = connection(&routes, ConnLimits::default());
        let task = tokio::spawn(async move { conn.run(&mut server).await });

        for piece in [
            "POST /form HTTP/1.1\r\nContent-",
            "Length: 12\r\n\r\n{\"age\"",
            ":\"55\"}",
        ] {
            client.write_all(piece.as_bytes()).await.unwrap();
            client.flush().await.unwrap();
            tokio::task::yield_now().await;
        }

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();

        assert_eq!(task.await.unwrap(), Outcome::Closed);
        assert!(response.starts_with(b"HTTP/1.1 200 OK\r\n"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(routes.requests_for(&"POST /form".into()).len(), 1);
    }

    #[tokio::test]
    async fn hang_writes_nothing() {
        let routes = Arc::new(RouteTable::new());
        routes.add("/hang".into(), Response::from(Response::HANG_STATUS), None);
        let conn = connection(&routes, ConnLimits::default());

        let (mut client, mut server) = duplex(1024);
        client.write_all(b"GET /hang HTTP/1.1\r\n\r\n").await.unwrap();
        assert_eq!(conn.run(&mut server).await, Outcome::Stalled);

        let mut byte = [0; 1];
        let read = timeout(Duration::from_millis(50), client.read(&mut byte)).await;
        assert!(read.is_err(), "expected no bytes and no EOF");
        assert_eq!(routes.number_of_requests(&"/hang".into()), 1);

        drop(server);
    }

    #[tokio::test]
    async fn rejected_requests() {
        let limits = ConnLimits {
            head_size: 64,
            body_size: 8,
            ..ConnLimits::default()
        };

        #[rustfmt::skip]
        let cases: [(&[u8], &str); 4] = [
            (b"NONSENSE\r\n\r\n",                                     "HTTP/1.1 400 Bad Request\r\n"),
            (b"GET / HTTP/1.1\r\nno colon\r\n\r\n",                   "HTTP/1.1 400 Bad Request\r\n"),
            (b"POST / HTTP/1.1\r\nContent-Length: 9\r\n\r\n123456789", "HTTP/1.1 413 Payload Too Large\r\n"),
            (b"GET / HTTP/1.1\r\nX-Long: aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\r\n\r\n",
                                                                      "HTTP/1.1 431 Request Header Fields Too Large\r\n"),
        ];

        for (request, status_line) in cases {
            let routes = Arc::new(RouteTable::new());
            let conn = connection(&routes, limits.clone());

            let (outcome, response) = exchange(&conn, request).await;
            assert_eq!(outcome, Outcome::Dropped);
            assert!(response.starts_with(status_line), "{response:?}");
            assert_eq!(routes.number_of_requests(&"/".into()), 0);
        }
    }

    #[tokio::test]
    async fn peer_gone() {
        let routes = Arc::new(RouteTable::new());
        let conn = connection(&routes, ConnLimits::default());

        let (mut client, mut server) = duplex(1024);
        client.write_all(b"GET /partial HTTP/1.1\r\nHost").await.unwrap();
        drop(client);

        assert_eq!(conn.run(&mut server).await, Outcome::Dropped);
        assert!(!routes.did_request(&"/partial".into()));
    }

    #[tokio::test]
    async fn read_timeout() {
        let routes = Arc::new(RouteTable::new());
        let conn = connection(
            &routes,
            ConnLimits {
                socket_read_timeout: Duration::from_millis(20),
                ..ConnLimits::default()
            },
        );

        let (mut client, mut server) = duplex(1024);
        client.write_all(b"POST /slow HTTP/1.1\r\nContent-Length: 5\r\n\r\nab").await.unwrap();

        assert_eq!(conn.run(&mut server).await, Outcome::Dropped);
        assert!(!routes.did_request(&"POST /slow".into()));
        drop(client);
    }

    #[tokio::test]
    async fn extra_bytes_ignored() {
        let routes = Arc::new(RouteTable::new());
        let conn = connection(&routes, ConnLimits::default());

        let (outcome, response) = exchange(
            &conn,
            b"PUT /n HTTP/1.1\r\nContent-Length: 2\r\n\r\nokGET /second HTTP/1.1\r\n\r\n",
        )
        .await;

        assert_eq!(outcome, Outcome::Closed);
        assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));
        let logged = routes.requests_for(&"PUT /n".into());
        assert_eq!(logged[0].body(), Some(&b"ok"[..]));
        assert!(!routes.did_request(&"/second".into()));
    }
}
