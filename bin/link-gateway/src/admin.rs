//! Administrative and decision HTTP API over the policy engine

use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Bytes};
use hyper::{Method, Request, Response, StatusCode};
use link_policy::{AclRule, Connection, LbPolicy, PolicyEngine, RuleKey};
use prometheus::{Encoder, Registry, TextEncoder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::convert::Infallible;
use std::fmt::Display;
use std::sync::Arc;
use tracing::debug;

pub struct AdminState {
    pub engine: Arc<PolicyEngine>,
    pub registry: Arc<Registry>,
}

type HttpResponse = Response<Full<Bytes>>;

fn respond(status: StatusCode, content_type: &str, body: impl Into<Bytes>) -> HttpResponse {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    if let Ok(value) = content_type.parse() {
        response.headers_mut().insert(hyper::header::CONTENT_TYPE, value);
    }
    response
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> HttpResponse {
    match serde_json::to_vec(value) {
        Ok(body) => respond(status, "application/json", body),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

fn error_response(status: StatusCode, message: impl Display) -> HttpResponse {
    let body = json!({ "error": message.to_string() }).to_string();
    respond(status, "application/json", body)
}

async fn read_json<B, T>(req: Request<B>) -> Result<T, HttpResponse>
where
    B: Body,
    B::Error: Display,
    T: DeserializeOwned,
{
    let body = req
        .into_body()
        .collect()
        .await
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, e))?
        .to_bytes();
    serde_json::from_slice(&body).map_err(|e| error_response(StatusCode::BAD_REQUEST, e))
}

fn gather(registry: &Registry) -> HttpResponse {
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    match encoder.encode(&registry.gather(), &mut buffer) {
        Ok(()) => respond(StatusCode::OK, "text/plain; version=0.0.4", buffer),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

pub async fn handle<B>(req: Request<B>, state: Arc<AdminState>) -> Result<HttpResponse, Infallible>
where
    B: Body,
    B::Error: Display,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    debug!("{} {}", method, path);

    let response = match (method, path.as_str()) {
        (Method::GET, "/healthz") => respond(StatusCode::OK, "text/plain", "OK\n"),
        (Method::GET, "/metrics") => gather(&state.registry),
        (Method::GET, "/policies") => json_response(StatusCode::OK, &state.engine.list()),
        (Method::POST, "/policies/acl") => match read_json::<_, AclRule>(req).await {
            Ok(rule) => {
                state.engine.add_acl(rule);
                json_response(StatusCode::OK, &json!({}))
            }
            Err(response) => response,
        },
        (Method::DELETE, "/policies/acl") => match read_json::<_, RuleKey>(req).await {
            Ok(key) => json_response(StatusCode::OK, &json!({ "deleted": state.engine.delete_acl(&key) })),
            Err(response) => response,
        },
        (Method::POST, "/policies/lb") => match read_json::<_, LbPolicy>(req).await {
            Ok(policy) => {
                state.engine.add_lb(policy);
                json_response(StatusCode::OK, &json!({}))
            }
            Err(response) => response,
        },
        (Method::DELETE, "/policies/lb") => match read_json::<_, RuleKey>(req).await {
            Ok(key) => json_response(StatusCode::OK, &json!({ "deleted": state.engine.delete_lb(&key) })),
            Err(response) => response,
        },
        (Method::POST, "/decisions") => match read_json::<_, Connection>(req).await {
            Ok(connection) => json_response(StatusCode::OK, &state.engine.decide(&connection)),
            Err(response) => response,
        },
        (_, "/healthz" | "/metrics" | "/policies" | "/policies/acl" | "/policies/lb" | "/decisions") => {
            error_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
        }
        _ => error_response(StatusCode::NOT_FOUND, "not found"),
    };

    Ok(response)
}
