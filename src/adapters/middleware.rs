//! Handler pipeline for the edge server.
//!
//! Every registered handler is wrapped in a fixed order, innermost first:
//! caller-supplied [`Wrapper`]s in registration order, then CORS when it is
//! enabled, then the access log. CORS therefore answers preflights before any
//! caller wrapper (auth, for instance) sees them, and the access log records
//! every request including rejected ones.
use std::{fmt, net::SocketAddr, sync::Arc, time::Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, Request},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    middleware::{Next, from_fn},
    response::{IntoResponse, Response},
    routing::MethodRouter,
};
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Local};
use http_body_util::BodyExt;

/// Caller-supplied decoration applied to every handler, e.g. authentication
/// via `axum::middleware::from_fn`.
#[derive(Clone)]
pub struct Wrapper(Arc<dyn Fn(MethodRouter) -> MethodRouter + Send + Sync>);

impl Wrapper {
    pub fn new<F>(wrap: F) -> Self
    where
        F: Fn(MethodRouter) -> MethodRouter + Send + Sync + 'static,
    {
        Self(Arc::new(wrap))
    }

    pub fn wrap(&self, handler: MethodRouter) -> MethodRouter {
        (self.0)(handler)
    }
}

impl fmt::Debug for Wrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Wrapper(..)")
    }
}

/// One layer of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// The caller wrapper at this registration index
    Wrapper(usize),
    Cors,
    AccessLog,
}

/// The ordered pipeline applied by the edge server to each handler.
#[derive(Debug, Clone, Default)]
pub struct MiddlewareChain {
    wrappers: Vec<Wrapper>,
    cors: bool,
}

impl MiddlewareChain {
    pub fn new(wrappers: Vec<Wrapper>, cors: bool) -> Self {
        Self { wrappers, cors }
    }

    /// Stages innermost first.
    pub fn stages(&self) -> Vec<Stage> {
        let mut stages: Vec<Stage> = (0..self.wrappers.len()).map(Stage::Wrapper).collect();
        if self.cors {
            stages.push(Stage::Cors);
        }
        stages.push(Stage::AccessLog);
        stages
    }

    pub fn apply(&self, handler: MethodRouter) -> MethodRouter {
        self.stages()
            .into_iter()
            .fold(handler, |handler, stage| match stage {
                Stage::Wrapper(index) => match self.wrappers.get(index) {
                    Some(wrapper) => wrapper.wrap(handler),
                    None => handler,
                },
                Stage::Cors => handler.layer(from_fn(cors_middleware)),
                Stage::AccessLog => handler.layer(from_fn(access_log_middleware)),
            })
    }
}

const CORS_ALLOW_METHODS: &str = "POST, PATCH, GET, OPTIONS, PUT, DELETE";
const CORS_ALLOW_HEADERS: &str =
    "Accept, Content-Type, Content-Length, Accept-Encoding, X-CSRF-Token, Authorization";

fn set_cors_headers(headers: &mut HeaderMap, origin: Option<HeaderValue>) {
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        origin.unwrap_or_else(|| HeaderValue::from_static("*")),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(CORS_ALLOW_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(CORS_ALLOW_HEADERS),
    );
}

/// Permissive CORS reflecting the caller's origin. Preflights (`OPTIONS`)
/// are answered here and never reach the inner handler.
pub async fn cors_middleware(req: Request, next: Next) -> Response {
    let origin = req.headers().get(header::ORIGIN).cloned();

    let mut response = if req.method() == Method::OPTIONS {
        StatusCode::OK.into_response()
    } else {
        next.run(req).await
    };

    set_cors_headers(response.headers_mut(), origin);
    response
}

/// Fields of one combined-format access log line.
#[derive(Debug, Clone)]
pub struct AccessRecord {
    pub remote: Option<SocketAddr>,
    pub user: Option<String>,
    pub time: DateTime<Local>,
    pub method: Method,
    pub uri: String,
    pub protocol: String,
    pub status: StatusCode,
    pub size: Option<u64>,
    pub referer: Option<String>,
    pub user_agent: Option<String>,
}

impl AccessRecord {
    /// Render in Apache combined log format.
    pub fn combined(&self) -> String {
        format!(
            "{} - {} [{}] \"{} {} {}\" {} {} \"{}\" \"{}\"",
            self.remote
                .map_or_else(|| "-".to_string(), |addr| addr.ip().to_string()),
            self.user.as_deref().unwrap_or("-"),
            self.time.format("%d/%b/%Y:%H:%M:%S %z"),
            self.method,
            self.uri,
            self.protocol,
            self.status.as_u16(),
            self.size.map_or_else(|| "-".to_string(), |size| size.to_string()),
            self.referer.as_deref().unwrap_or(""),
            self.user_agent.as_deref().unwrap_or(""),
        )
    }
}

fn header_string(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// User name from `Authorization: Basic ...`, if any.
fn basic_auth_user(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;
    let (user, _) = credentials.split_once(':')?;
    Some(user.to_string())
}

/// Calls `on_complete` with the number of body bytes handed to the
/// connection once the body is dropped, whether it finished or was abandoned.
pub fn counted_body<F>(body: Body, on_complete: F) -> Body
where
    F: FnOnce(u64) + Send + 'static,
{
    let mut tally = ByteTally {
        written: 0,
        on_complete: Some(on_complete),
    };
    Body::new(body.map_frame(move |frame| {
        if let Some(data) = frame.data_ref() {
            tally.written += data.len() as u64;
        }
        frame
    }))
}

struct ByteTally<F: FnOnce(u64)> {
    written: u64,
    on_complete: Option<F>,
}

impl<F: FnOnce(u64)> Drop for ByteTally<F> {
    fn drop(&mut self) {
        if let Some(on_complete) = self.on_complete.take() {
            on_complete(self.written);
        }
    }
}

fn emit_access_line(record: &AccessRecord, start: Instant) {
    tracing::info!(
        target: "portico::access",
        method = %record.method,
        path = %record.uri,
        status = record.status.as_u16(),
        bytes = record.size.unwrap_or(0),
        latency_ms = start.elapsed().as_millis() as u64,
        "{}",
        record.combined()
    );
}

/// Emit one combined-format line per request under the `portico::access`
/// target. The line is written when the response body is done, so the size
/// is the number of bytes actually sent.
pub async fn access_log_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let time = Local::now();
    let remote = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let method = req.method().clone();
    let uri = req.uri().to_string();
    let protocol = format!("{:?}", req.version());
    let user = basic_auth_user(req.headers());
    let referer = header_string(req.headers(), header::REFERER);
    let user_agent = header_string(req.headers(), header::USER_AGENT);

    let response = next.run(req).await;
    let (parts, body) = response.into_parts();

    let mut record = AccessRecord {
        remote,
        user,
        time,
        method,
        uri,
        protocol,
        status: parts.status,
        size: None,
        referer,
        user_agent,
    };

    let body = counted_body(body, move |written| {
        record.size = (written > 0).then_some(written);
        emit_access_line(&record, start);
    });

    Response::from_parts(parts, body)
}
