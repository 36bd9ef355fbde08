use crate::http::{request::Request, response::Response, route::Route};
use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

/// Observer invoked with every completed request for its route.
///
/// Runs on the server's event-loop thread, after the request has been
/// appended to the log and before the response is written. A handler that
/// needs to report back to test code should do so through a channel.
pub type RequestHandler = Arc<dyn Fn(&Request) + Send + Sync>;

/// Registered responses, observers and the log of received requests.
///
/// All three live behind a single lock, so a request is recorded and its
/// response looked up atomically with respect to concurrent registrations.
///
/// # Examples
/// ```
/// use perfidy::{Response, Route, RouteTable};
///
/// let table = RouteTable::new();
/// table.add("GET /users".into(), Response::from("[]"), None);
///
/// assert_eq!(table.response_for(&"/users".into()).unwrap().status(), 200);
/// assert!(table.response_for(&"POST /users".into()).is_none());
/// assert_eq!(table.number_of_requests(&Route::from("/users")), 0);
/// ```
#[derive(Default)]
pub struct RouteTable {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    responses: HashMap<Route, Response>,
    handlers: HashMap<Route, RequestHandler>,
    requests: Vec<Request>,
}

impl RouteTable {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicking handler runs outside the lock, so poisoning only
        // means a panic elsewhere; the maps are still consistent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `response` for `route`, replacing any previous one.
    ///
    /// The handler is replaced too: passing `None` removes a handler left by
    /// an earlier registration of the same route.
    pub fn add(&self, route: Route, response: Response, handler: Option<RequestHandler>) {
        let mut inner = self.lock();
        match handler {
            Some(handler) => inner.handlers.insert(route.clone(), handler),
            None => inner.handlers.remove(&route),
        };
        inner.responses.insert(route, response);
    }

    /// Registers several routes at once, in iteration order.
    pub fn add_batch<I>(&self, routes: I)
    where
        I: IntoIterator<Item = (Route, Response)>,
    {
        let mut inner = self.lock();
        for (route, response) in routes {
            inner.handlers.remove(&route);
            inner.responses.insert(route, response);
        }
    }

    /// The registered response, if any.
    pub fn response_for(&self, route: &Route) -> Option<Response> {
        self.lock().responses.get(route).cloned()
    }

    /// Appends `request` to the log and then calls the handler registered
    /// for its route, if any.
    pub fn record_completed(&self, request: Request) {
        let _ = self.complete(request);
    }

    /// Records `request` and resolves its response under one lock.
    ///
    /// The handler is called after the lock is released so that it may use
    /// the table itself.
    pub(crate) fn complete(&self, request: Request) -> Option<Response> {
        let route = request.route();

        let (response, handler) = {
            let mut inner = self.lock();
            let response = inner.responses.get(&route).cloned();
            let handler = inner.handlers.get(&route).cloned();
            inner.requests.push(request);

            let request = handler.as_ref().and_then(|_| inner.requests.last().cloned());
            (response, handler.zip(request))
        };

        if let Some((handler, request)) = handler {
            handler(&request);
        }

        response
    }

    /// Every logged request for `route`, oldest first.
    pub fn requests_for(&self, route: &Route) -> Vec<Request> {
        self.lock()
            .requests
            .iter()
            .filter(|request| request.route() == *route)
            .cloned()
            .collect()
    }

    pub fn number_of_requests(&self, route: &Route) -> usize {
        self.lock()
            .requests
            .iter()
            .filter(|request| request.route() == *route)
            .count()
    }

    #[inline]
    pub fn did_request(&self, route: &Route) -> bool {
        self.number_of_requests(route) > 0
    }

    /// Forgets all responses, handlers and logged requests.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.responses.clear();
        inner.handlers.clear();
        inner.requests.clear();
    }
}

impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("RouteTable")
            .field("routes", &inner.responses.keys().collect::<Vec<_>>())
            .field("handlers", &inner.handlers.len())
            .field("requests", &inner.requests.len())
            .finish()
    }
}
