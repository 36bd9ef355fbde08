//! Route definitions loaded from JSON.
//!
//! A definition file holds an array of objects:
//!
//! ```json
//! [
//!   { "method": "GET",  "path": "/api/account/111", "content": { "id": "111" } },
//!   { "method": "POST", "path": "/api/account", "status": 201, "content": { "id": "111" } },
//!   { "method": "PUT",  "path": "/api/account/111/money", "status": 204 }
//! ]
//! ```
//!
//! Every field is optional. A missing or mistyped `method`, `path` or
//! `status` falls back to `GET`, `/` and `200`. `content` becomes the body:
//! objects and arrays are serialized as JSON, strings are used verbatim,
//! numbers and booleans as their text, and `null` means no body. No
//! `Content-Type` is added.

use crate::{
    errors::FileError,
    http::{response::Response, route::Route},
};
use serde_json::{Map, Value};
use std::{fs, io, path::Path};
use tracing::debug;

const DEFAULT_STATUS: u16 = 200;

/// Builds one route per object, in order.
pub(crate) fn from_objects<'a, I>(objects: I) -> Vec<(Route, Response)>
where
    I: IntoIterator<Item = &'a Map<String, Value>>,
{
    objects.into_iter().map(definition).collect()
}

/// Builds routes from a JSON array of objects. `name` identifies the
/// source in errors.
pub(crate) fn from_value(value: &Value, name: &str) -> Result<Vec<(Route, Response)>, FileError> {
    let objects = value
        .as_array()
        .and_then(|items| items.iter().map(Value::as_object).collect::<Option<Vec<_>>>())
        .ok_or_else(|| FileError::NotArrayOfObjects(name.to_owned()))?;

    Ok(from_objects(objects))
}

/// Reads and parses a definition file.
pub(crate) fn from_file(path: &Path) -> Result<Vec<(Route, Response)>, FileError> {
    let name = FileError::name_of(path);

    let data = fs::read(path).map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => FileError::NotFound(name.clone()),
        _ => FileError::Unreadable(name.clone()),
    })?;

    let value: Value =
        serde_json::from_slice(&data).map_err(|_| FileError::Malformed(name.clone()))?;

    let routes = from_value(&value, &name)?;
    debug!(file = %name, routes = routes.len(), "loaded route definitions");
    Ok(routes)
}

fn definition(object: &Map<String, Value>) -> (Route, Response) {
    let route = Route::from_parts(
        object.get("method").and_then(Value::as_str),
        object.get("path").and_then(Value::as_str),
    );

    let status = object
        .get("status")
        .and_then(Value::as_u64)
        .and_then(|status| u16::try_from(status).ok())
        .unwrap_or(DEFAULT_STATUS);

    let body = object.get("content").and_then(content_bytes);
    (
        route,
        Response::with_data(status, [] as [(String, String); 0], body),
    )
}

fn content_bytes(content: &Value) -> Option<Vec<u8>> {
    match content {
        Value::Null => None,
        Value::String(text) => Some(text.clone().into_bytes()),
        Value::Bool(_) | Value::Number(_) => Some(content.to_string().into_bytes()),
        Value::Array(_) | Value::Object(_) => serde_json::to_vec(content).ok(),
    }
}
