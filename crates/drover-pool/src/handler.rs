//! Application handler contract.
//!
//! A [`HandlerFactory`] is shared by the whole pool and is asked to
//! [`load`](HandlerFactory::load) one [`Handler`] per worker, inside that
//! worker's thread. Handlers therefore need not be `Send`; their futures run
//! on the worker's `LocalSet`.
//!
//! Any `tower::Service` over hyper requests, including an `axum::Router`, can
//! be adapted with [`from_service`].

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;

use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::StatusCode;
use tower::{Service, ServiceExt};

/// Boxed error returned by handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Response body type.
pub type Body = UnsyncBoxBody<Bytes, BoxError>;

pub type Request = hyper::Request<Incoming>;
pub type Response = hyper::Response<Body>;

/// Serves requests for one worker.
pub trait Handler: 'static {
    type Future: Future<Output = Result<Response, BoxError>> + 'static;

    fn call(&self, req: Request) -> Self::Future;
}

impl<F, Fut> Handler for F
where
    F: Fn(Request) -> Fut + 'static,
    Fut: Future<Output = Result<Response, BoxError>> + 'static,
{
    type Future = Fut;

    fn call(&self, req: Request) -> Fut {
        self(req)
    }
}

/// Produces a fresh [`Handler`] for each worker.
///
/// A load error is fatal for the initial spawn and counts as a crash for a
/// replacement worker.
pub trait HandlerFactory: Send + Sync + 'static {
    type Handler: Handler;

    fn load(&self) -> Result<Self::Handler, BoxError>;
}

impl<F, H> HandlerFactory for F
where
    F: Fn() -> Result<H, BoxError> + Send + Sync + 'static,
    H: Handler,
{
    type Handler = H;

    fn load(&self) -> Result<H, BoxError> {
        self()
    }
}

/// [`Handler`] backed by a `tower::Service`.
#[derive(Debug, Clone)]
pub struct ServiceHandler<S> {
    service: S,
}

/// Adapt a `tower::Service` (an `axum::Router`, for instance) into a handler.
pub fn from_service<S>(service: S) -> ServiceHandler<S> {
    ServiceHandler { service }
}

impl<S, B> Handler for ServiceHandler<S>
where
    S: Service<Request, Response = hyper::Response<B>> + Clone + 'static,
    S::Error: Into<BoxError>,
    S::Future: 'static,
    B: hyper::body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    type Future = Pin<Box<dyn Future<Output = Result<Response, BoxError>>>>;

    fn call(&self, req: Request) -> Self::Future {
        let service = self.service.clone();
        Box::pin(async move {
            let response = service.oneshot(req).await.map_err(Into::into)?;
            Ok(response.map(|body| body.map_err(Into::into).boxed_unsync()))
        })
    }
}

/// A body holding `bytes`.
pub fn full(bytes: impl Into<Bytes>) -> Body {
    Full::new(bytes.into())
        .map_err(|never: Infallible| match never {})
        .boxed_unsync()
}

pub fn empty() -> Body {
    Empty::<Bytes>::new()
        .map_err(|never: Infallible| match never {})
        .boxed_unsync()
}

/// `200 OK` with a plain-text body.
pub fn text(body: impl Into<Bytes>) -> Response {
    with_content_type(StatusCode::OK, full(body), "text/plain; charset=utf-8")
}

/// JSON response with the given status.
pub fn json(status: StatusCode, value: &serde_json::Value) -> Response {
    with_content_type(status, full(value.to_string()), "application/json")
}

/// `{"detail": ...}` error response.
pub fn error_response(status: StatusCode, detail: &str) -> Response {
    json(status, &serde_json::json!({ "detail": detail }))
}

fn with_content_type(status: StatusCode, body: Body, content_type: &'static str) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_error_response_shape() {
        let response = error_response(StatusCode::SERVICE_UNAVAILABLE, "Request timed out");
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value, serde_json::json!({ "detail": "Request timed out" }));
    }

    #[tokio::test]
    async fn test_text_response() {
        let response = text("hello");
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"hello");
    }

    #[test]
    fn test_closure_factory_loads() {
        let factory = || -> Result<_, BoxError> {
            Ok(|_req: Request| async { Ok::<_, BoxError>(text("ok")) })
        };
        assert!(HandlerFactory::load(&factory).is_ok());
    }
}
