//! Built-in applications served by the `was-proxy` binary.
//!
//! - `mirror`: echoes the request headers and streams the request body
//!   back; a request without body gets 204
//! - `hello`: answers "hello"
//! - `null`: answers 204 and ignores any request body

use futures_util::future::BoxFuture;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::was::{IncomingBody, OutgoingBody, Request, RequestHandler, Response};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BuiltinHandler {
    Mirror,
    Hello,
    Null,
}

impl BuiltinHandler {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "mirror" => Some(Self::Mirror),
            "hello" => Some(Self::Hello),
            "null" => Some(Self::Null),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Mirror => "mirror",
            Self::Hello => "hello",
            Self::Null => "null",
        }
    }
}

fn mirror(request: Request<IncomingBody>) -> Response<OutgoingBody> {
    let status = if request.body.is_some() {
        StatusCode::OK
    } else {
        StatusCode::NO_CONTENT
    };
    Response {
        status,
        headers: request.headers,
        body: request.body.map(OutgoingBody::from),
    }
}

fn hello() -> Response<OutgoingBody> {
    Response::new(StatusCode::OK)
        .with_header(CONTENT_TYPE, HeaderValue::from_static("text/plain"))
        .with_body("hello")
}

impl RequestHandler for BuiltinHandler {
    fn handle(&self, request: Request<IncomingBody>) -> BoxFuture<'_, Response<OutgoingBody>> {
        let handler = *self;
        Box::pin(async move {
            match handler {
                BuiltinHandler::Mirror => mirror(request),
                BuiltinHandler::Hello => hello(),
                BuiltinHandler::Null => Response::new(StatusCode::NO_CONTENT),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::was::body;

    #[test]
    fn names_round_trip() {
        for handler in [BuiltinHandler::Mirror, BuiltinHandler::Hello, BuiltinHandler::Null] {
            assert_eq!(BuiltinHandler::from_name(handler.name()), Some(handler));
        }
        assert_eq!(BuiltinHandler::from_name("cgi"), None);
    }

    #[tokio::test]
    async fn mirror_without_body_is_no_content() {
        let response = BuiltinHandler::Mirror.handle(Request::get("/")).await;
        assert_eq!(response.status, StatusCode::NO_CONTENT);
        assert!(response.body.is_none());
    }

    #[tokio::test]
    async fn mirror_passes_the_body_through() {
        let (tx, incoming) = body::channel(2);
        tx.set_length(3);
        let request = Request::get("/").with_body(incoming);

        let response = BuiltinHandler::Mirror.handle(request).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body.as_ref().and_then(OutgoingBody::remaining), Some(3));
    }

    #[tokio::test]
    async fn hello_answers() {
        let response = BuiltinHandler::Hello.handle(Request::get("/")).await;
        assert_eq!(response.headers[CONTENT_TYPE], "text/plain");
        assert_eq!(response.body.and_then(|b| b.remaining()), Some(5));
    }
}
