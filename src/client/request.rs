use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::DockerError;

/// A request to the Engine API, before the host and version are applied
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
    versioned: bool,
}

impl Request {
    /// `path` is relative to the version prefix, e.g. `/containers/json`
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            versioned: true,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    #[must_use]
    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    /// Add the parameter only when a value is present
    #[must_use]
    pub fn query_opt(self, key: &str, value: Option<impl ToString>) -> Self {
        match value {
            Some(value) => self.query(key, value),
            None => self,
        }
    }

    /// Booleans are sent as `1`/`0`
    #[must_use]
    pub fn query_bool(self, key: &str, value: bool) -> Self {
        self.query(key, if value { "1" } else { "0" })
    }

    /// A JSON-encoded parameter such as `filters`
    pub fn query_json<T: Serialize + ?Sized>(self, key: &str, value: &T) -> Result<Self, DockerError> {
        let encoded = serde_json::to_string(value)?;
        Ok(self.query(key, encoded))
    }

    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Send `body` as JSON
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, DockerError> {
        self.body = Bytes::from(serde_json::to_vec(body)?);
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(self)
    }

    #[must_use]
    pub fn raw_body(mut self, body: Bytes, content_type: &'static str) -> Self {
        self.body = body;
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        self
    }

    /// Skip the `/v{version}` prefix
    #[must_use]
    pub fn unversioned(mut self) -> Self {
        self.versioned = false;
        self
    }

    /// Origin-form target, e.g. `/docker/v1.41/images/create?fromImage=busybox`
    #[must_use]
    pub fn target(&self, path_prefix: &str, api_version: &str) -> String {
        let mut target = String::from(path_prefix);
        if self.versioned {
            target.push_str("/v");
            target.push_str(api_version);
        }
        if !self.path.starts_with('/') {
            target.push('/');
        }
        target.push_str(&self.path);

        if !self.query.is_empty() {
            let query = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(&self.query)
                .finish();
            target.push('?');
            target.push_str(&query);
        }

        target
    }

    pub(crate) fn into_parts(self) -> (Method, HeaderMap, Bytes) {
        (self.method, self.headers, self.body)
    }
}

/// A fully read response
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, DockerError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Turn a non-2xx status into [`DockerError::Api`], using the daemon's `message`
pub(crate) fn check_status(status: StatusCode, body: &[u8]) -> Result<(), DockerError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(api_error(status, body))
    }
}

pub(crate) fn api_error(status: StatusCode, body: &[u8]) -> DockerError {
    let explanation = match serde_json::from_slice::<bollard::models::ErrorResponse>(body) {
        Ok(error) => Some(error.message),
        Err(_) => {
            let text = String::from_utf8_lossy(body).trim().to_string();
            (!text.is_empty()).then_some(text)
        }
    };

    DockerError::Api {
        status,
        explanation,
    }
}
