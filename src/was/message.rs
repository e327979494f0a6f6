//! Request and response metadata, and the application handler seam.

use std::future::Future;

use futures_util::future::BoxFuture;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode};

use crate::error::WasError;
use crate::was::body::{IncomingBody, OutgoingBody};

/// A request as carried by `REQUEST` … `DATA|NO_DATA`.
#[derive(Debug)]
pub struct Request<B> {
    pub method: Method,
    pub uri: String,
    pub script_name: Option<String>,
    pub path_info: Option<String>,
    pub query_string: Option<String>,
    pub headers: HeaderMap,
    /// Application parameters, in order; not HTTP headers.
    pub parameters: Vec<(String, String)>,
    /// `None` is sent as `NO_DATA`.
    pub body: Option<B>,
}

impl<B> Request<B> {
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            script_name: None,
            path_info: None,
            query_string: None,
            headers: HeaderMap::new(),
            parameters: Vec::new(),
            body: None,
        }
    }

    pub fn get(uri: impl Into<String>) -> Self {
        Self::new(Method::GET, uri)
    }

    pub fn post(uri: impl Into<String>, body: impl Into<B>) -> Self {
        Self::new(Method::POST, uri).with_body(body)
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.push((key.into(), value.into()));
        self
    }

    pub fn with_script_name(mut self, script_name: impl Into<String>) -> Self {
        self.script_name = Some(script_name.into());
        self
    }

    pub fn with_path_info(mut self, path_info: impl Into<String>) -> Self {
        self.path_info = Some(path_info.into());
        self
    }

    pub fn with_query_string(mut self, query_string: impl Into<String>) -> Self {
        self.query_string = Some(query_string.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<B>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Metadata only; the body is handed over separately.
    pub(crate) fn split_body(self) -> (Request<()>, Option<B>) {
        let Request {
            method,
            uri,
            script_name,
            path_info,
            query_string,
            headers,
            parameters,
            body,
        } = self;
        let head = Request {
            method,
            uri,
            script_name,
            path_info,
            query_string,
            headers,
            parameters,
            body: None,
        };
        (head, body)
    }
}

impl Request<()> {
    pub(crate) fn with_incoming(self, body: Option<IncomingBody>) -> Request<IncomingBody> {
        Request {
            method: self.method,
            uri: self.uri,
            script_name: self.script_name,
            path_info: self.path_info,
            query_string: self.query_string,
            headers: self.headers,
            parameters: self.parameters,
            body,
        }
    }
}

/// A response as carried by `STATUS` … `DATA|NO_DATA`.
#[derive(Debug)]
pub struct Response<B> {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Option<B>,
}

impl<B> Response<B> {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<B>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// True for statuses that never carry a body.
pub fn status_forbids_body(status: StatusCode) -> bool {
    status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED
}

/// Parse a received `key=value` pair into `headers`.
pub(crate) fn append_header(
    headers: &mut HeaderMap,
    key: &str,
    value: &str,
) -> Result<(), WasError> {
    let name = HeaderName::from_bytes(key.as_bytes())
        .map_err(|_| WasError::protocol("malformed HEADER packet"))?;
    let value =
        HeaderValue::from_str(value).map_err(|_| WasError::protocol("malformed HEADER packet"))?;
    headers.append(name, value);
    Ok(())
}

/// The application behind a WAS server.
///
/// The returned future runs in the connection task, next to the driver
/// that keeps the request body flowing.
pub trait RequestHandler: Send + Sync {
    fn handle(&self, request: Request<IncomingBody>) -> BoxFuture<'_, Response<OutgoingBody>>;
}

impl<F, Fut> RequestHandler for F
where
    F: Fn(Request<IncomingBody>) -> Fut + Send + Sync,
    Fut: Future<Output = Response<OutgoingBody>> + Send + 'static,
{
    fn handle(&self, request: Request<IncomingBody>) -> BoxFuture<'_, Response<OutgoingBody>> {
        Box::pin(self(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders() {
        let request: Request<OutgoingBody> = Request::post("/upload", "foobar")
            .with_header(http::header::ACCEPT, HeaderValue::from_static("*/*"))
            .with_parameter("document_root", "/srv")
            .with_query_string("a=1");
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.body.as_ref().and_then(|b| b.remaining()), Some(6));
        assert_eq!(request.parameters, vec![("document_root".to_string(), "/srv".to_string())]);

        let (head, body) = request.split_body();
        assert!(head.body.is_none());
        assert!(body.is_some());
        assert_eq!(head.query_string.as_deref(), Some("a=1"));
    }

    #[test]
    fn bodyless_statuses() {
        assert!(status_forbids_body(StatusCode::CONTINUE));
        assert!(status_forbids_body(StatusCode::NO_CONTENT));
        assert!(status_forbids_body(StatusCode::NOT_MODIFIED));
        assert!(!status_forbids_body(StatusCode::OK));
    }

    #[test]
    fn received_header_names_are_lower_cased() {
        let mut headers = HeaderMap::new();
        append_header(&mut headers, "Content-Type", "text/plain").unwrap();
        assert_eq!(headers["content-type"], "text/plain");
        assert!(append_header(&mut headers, "bad name", "x").is_err());
    }
}
