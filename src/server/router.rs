use super::{ChatEndpoint, EndpointRequest, EndpointResponse, Method, CORS_HEADERS};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("server stopped: {0}")]
    Serve(#[source] std::io::Error),
}

/// Every path and method goes to the chat endpoint.
pub fn router(endpoint: Arc<ChatEndpoint>) -> Router {
    Router::new().fallback(dispatch).with_state(endpoint)
}

fn endpoint_request(
    method: &axum::http::Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: &Bytes,
) -> EndpointRequest {
    let headers = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_ascii_lowercase(), value.to_string()))
        })
        .collect::<HashMap<_, _>>();
    let mut request = EndpointRequest::new(Method::parse(method.as_str()), uri.path())
        .with_query(uri.query().unwrap_or_default())
        .with_body(String::from_utf8_lossy(body).into_owned());
    request.headers = headers;
    request
}

fn into_response(response: EndpointResponse) -> Response {
    let status =
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut headers = HeaderMap::new();
    for (name, value) in CORS_HEADERS {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.insert(name, value);
        }
    }
    if let Some(content_type) = response.content_type {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    }
    (status, headers, response.body).into_response()
}

async fn dispatch(
    State(endpoint): State<Arc<ChatEndpoint>>,
    method: axum::http::Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = endpoint_request(&method, &uri, &headers, &body);
    let raw_body = request.body.clone();
    let worker = Arc::clone(&endpoint);
    // Chat turns block on outbound HTTP; keep them off the async workers.
    let response = match tokio::task::spawn_blocking(move || worker.handle(&request)).await {
        Ok(response) => response,
        Err(err) => endpoint.unhandled(&raw_body, &format!("chat handler aborted: {err}")),
    };
    into_response(response)
}

pub async fn serve(bind_address: &str, endpoint: Arc<ChatEndpoint>) -> Result<(), ServerError> {
    let listener = tokio::net::TcpListener::bind(bind_address)
        .await
        .map_err(|source| ServerError::Bind {
            address: bind_address.to_string(),
            source,
        })?;
    axum::serve(listener, router(endpoint))
        .await
        .map_err(ServerError::Serve)
}
