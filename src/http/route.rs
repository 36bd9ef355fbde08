use crate::http::types::Verb;
use std::{convert::Infallible, fmt, str::FromStr};

/// Identity of an endpoint: a [`Verb`] and a path.
///
/// Lookups are exact: two routes match only when both the verb and the
/// normalized path are equal. There is no pattern or prefix matching.
///
/// # Path normalization
///
/// Every stored path starts with `/`. Characters outside the URL path set are
/// percent-escaped, and escaped spaces are written as `+` so that routes stay
/// readable:
///
/// ```
/// use perfidy::{Route, Verb};
///
/// let route = Route::new(Some(Verb::Put), Some("user profile/1"));
/// assert_eq!(route.path(), "/user+profile/1");
/// assert_eq!(route.to_string(), "PUT /user+profile/1");
/// ```
///
/// # Shorthand
///
/// `"<VERB> <path>"` splits on the first run of whitespace. When the first
/// token is not a known verb the whole string is the path and the verb is
/// `GET`. A blank string is `GET /`.
///
/// ```
/// use perfidy::{Route, Verb};
///
/// let post: Route = "post /form".into();
/// assert_eq!((post.verb(), post.path()), (Verb::Post, "/form"));
///
/// let get: Route = "/users/1".into();
/// assert_eq!((get.verb(), get.path()), (Verb::Get, "/users/1"));
///
/// assert_eq!(Route::from(""), Route::default());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Route {
    verb: Verb,
    path: String,
}

impl Route {
    /// Builds a route, falling back to `GET` and `/` for missing parts.
    pub fn new(verb: Option<Verb>, path: Option<&str>) -> Self {
        Route {
            verb: verb.unwrap_or_default(),
            path: path.map_or_else(|| "/".to_owned(), normalize_path),
        }
    }

    /// Like [`Route::new`], with the verb given as text.
    ///
    /// An unknown verb becomes `GET`.
    pub fn from_parts(method: Option<&str>, path: Option<&str>) -> Self {
        Self::new(method.and_then(Verb::parse), path)
    }

    #[inline]
    pub const fn verb(&self) -> Verb {
        self.verb
    }

    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Default for Route {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.verb, self.path)
    }
}

impl FromStr for Route {
    type Err = Infallible;

    fn from_str(src: &str) -> Result<Self, Self::Err> {
        let src = src.trim();
        let (first, rest) = match src.find(char::is_whitespace) {
            Some(split) => (&src[..split], src[split..].trim_start()),
            None => (src, ""),
        };

        Ok(match Verb::parse(first) {
            Some(verb) => Route::new(Some(verb), Some(rest)),
            None => Route::new(None, Some(src)),
        })
    }
}

impl From<&str> for Route {
    fn from(src: &str) -> Self {
        match src.parse() {
            Ok(route) => route,
            Err(never) => match never {},
        }
    }
}

impl From<String> for Route {
    fn from(src: String) -> Self {
        Route::from(src.as_str())
    }
}

impl From<&Route> for Route {
    fn from(route: &Route) -> Self {
        route.clone()
    }
}

// `!$&'()*+,-./0-9:;=@A-Z_a-z~`
#[inline]
fn is_path_allowed(byte: u8) -> bool {
    byte.is_ascii_alphanumeric()
        || matches!(
            byte,
            b'!' | b'$'
                | b'&'
                | b'\''
                | b'('
                | b')'
                | b'*'
                | b'+'
                | b','
                | b'-'
                | b'.'
                | b'/'
                | b':'
                | b';'
                | b'='
                | b'@'
                | b'_'
                | b'~'
        )
}

pub(crate) fn normalize_path(src: &str) -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";

    let src = src.trim();
    let mut path = String::with_capacity(src.len() + 1);
    if !src.starts_with('/') {
        path.push('/');
    }

    for &byte in src.as_bytes() {
        match byte {
            b' ' => path.push('+'),
            b if is_path_allowed(b) => path.push(b as char),
            b => {
                path.push('%');
                path.push(HEX[(b >> 4) as usize] as char);
                path.push(HEX[(b & 0x0F) as usize] as char);
            }
        }
    }

    path
}
