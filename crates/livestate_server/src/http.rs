//! HTTP binding of [`StateServer`] on axum.

use crate::broadcaster::EventStream;
use crate::server::{Route, ServerResponse, StateServer};
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use bytes::Bytes;
use livestate_protocol::STREAM_HEADERS;
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info};

impl IntoResponse for ServerResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if self.body.is_empty() {
            return status.into_response();
        }
        (status, [(CONTENT_TYPE, "application/json")], self.body).into_response()
    }
}

/// Builds the axum router serving every endpoint of `server`.
pub fn router(server: Arc<StateServer>) -> Router {
    Router::new().fallback(dispatch).with_state(server)
}

/// Serves `server` on `listener` until `shutdown` resolves.
///
/// Open streams are ended when shutdown begins.
pub async fn serve<F>(listener: TcpListener, server: Arc<StateServer>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "livestate server listening");
    }

    let streams = Arc::clone(&server);
    axum::serve(listener, router(server))
        .with_graceful_shutdown(async move {
            shutdown.await;
            info!("shutting down, closing open streams");
            streams.close_streams();
        })
        .await
}

async fn dispatch(
    State(server): State<Arc<StateServer>>,
    method: Method,
    uri: Uri,
    Query(query): Query<Vec<(String, String)>>,
    body: Bytes,
) -> Response {
    let path = uri.path();
    debug!(%method, path, "request");

    let is_stream = matches!(
        server.route(path),
        Some(Route::SharedStream | Route::ToggleStream)
    );

    match method {
        Method::GET if is_stream => match server.open_stream(path) {
            Ok(events) => stream_response(events),
            Err(e) => ServerResponse::from_error(&e).into_response(),
        },
        Method::GET => {
            let query: Vec<(&str, &str)> = query
                .iter()
                .map(|(name, value)| (name.as_str(), value.as_str()))
                .collect();
            server.handle_get(path, &query).into_response()
        }
        Method::POST => server.handle_post(path, &body).into_response(),
        Method::HEAD => ServerResponse::empty(server.handle_head(path)).into_response(),
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

fn stream_response(events: EventStream) -> Response {
    let frames = futures_util::stream::unfold(events, |mut events| async move {
        let frame = events.recv().await?;
        Some((Ok::<_, Infallible>(Bytes::from(frame)), events))
    });

    let mut response = Response::new(Body::from_stream(frames));
    let headers = response.headers_mut();
    for (name, value) in STREAM_HEADERS {
        if let Ok(name) = HeaderName::from_bytes(name.as_bytes()) {
            headers.insert(name, HeaderValue::from_static(value));
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use axum::http::Request;
    use futures_util::StreamExt;
    use tower::ServiceExt;

    fn app() -> (Arc<StateServer>, Router) {
        let server = Arc::new(StateServer::new(ServerConfig::default()));
        (Arc::clone(&server), router(server))
    }

    async fn body_of(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn read_and_write_over_http() {
        let (_, app) = app();

        let request = Request::post("/api/shared")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"key":"k","value":[1,2]}"#))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let request = Request::get("/api/shared?key=k").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_of(response).await, br#"{"key":"k","value":[1,2]}"#);
    }

    #[tokio::test]
    async fn missing_key_is_bad_request() {
        let (_, app) = app();
        let request = Request::get("/api/shared").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_of(response).await, br#"{"error":"Key parameter is required"}"#);
    }

    #[tokio::test]
    async fn probe_and_unknown_path() {
        let (_, app) = app();

        let request = Request::head("/api/shared").body(Body::empty()).unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let request = Request::get("/api/kill").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn stream_sends_connected_then_changes() {
        let (server, app) = app();

        let request = Request::get("/api/shared/stream").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "text/event-stream"
        );
        assert_eq!(response.headers().get("cache-control").unwrap(), "no-cache");

        let mut body = response.into_body().into_data_stream();
        let first = body.next().await.unwrap().unwrap();
        assert_eq!(&first[..], b"data: {\"connected\": true}\n\n");

        server.handle_post("/api/shared", br#"{"key":"k","value":true}"#);
        let next = body.next().await.unwrap().unwrap();
        assert_eq!(&next[..], b"data: {\"key\":\"k\",\"value\":true}\n\n");

        drop(body);
        assert_eq!(server.shared().subscriber_count(), 0);
    }
}
