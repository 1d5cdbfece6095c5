//! Public HTTP surface: ingestion and the read-only query endpoints.

use crate::errors::ApiError;
use crate::ingest::IngestGate;
use crate::metrics_defs::REQUEST_DURATION;
use crate::query::{PageParams, QueryService};
use http::HeaderName;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode, Uri};
use serde::Serialize;
use shared::histogram;
use shared::http::{BoxedBody, full_body, json_response};
use std::collections::HashMap;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

pub const API_KEY_HEADER: HeaderName = HeaderName::from_static("x-api-key");

#[derive(Debug, PartialEq)]
enum Route<'a> {
    Ingest,
    Errors,
    ErrorDetail(&'a str),
    Metrics,
    TopEndpoints,
}

impl Route<'_> {
    fn parse(path: &str) -> Option<Route<'_>> {
        let path = path.trim_end_matches('/');
        match path {
            "/ingest" => Some(Route::Ingest),
            "/errors" => Some(Route::Errors),
            "/metrics" => Some(Route::Metrics),
            "/metrics/top-endpoints" => Some(Route::TopEndpoints),
            _ => {
                let fingerprint = path.strip_prefix("/errors/")?;
                (!fingerprint.is_empty() && !fingerprint.contains('/'))
                    .then_some(Route::ErrorDetail(fingerprint))
            }
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Route::Ingest => "ingest",
            Route::Errors => "errors",
            Route::ErrorDetail(_) => "error_detail",
            Route::Metrics => "metrics",
            Route::TopEndpoints => "top_endpoints",
        }
    }

    fn method(&self) -> Method {
        match self {
            Route::Ingest => Method::POST,
            _ => Method::GET,
        }
    }
}

struct QueryParams(HashMap<String, String>);

impl QueryParams {
    fn from_uri(uri: &Uri) -> Self {
        let pairs = uri
            .query()
            .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();
        QueryParams(pairs)
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    // Unparseable values fall back to defaults.
    fn page(&self) -> PageParams {
        PageParams {
            limit: self.get("limit").and_then(|v| v.parse().ok()),
            offset: self.get("offset").and_then(|v| v.parse().ok()),
        }
    }
}

struct Handlers {
    gate: IngestGate,
    query: QueryService,
    max_body_bytes: usize,
}

#[derive(Clone)]
pub struct TelemetryService {
    inner: Arc<Handlers>,
}

impl TelemetryService {
    pub fn new(gate: IngestGate, query: QueryService, max_body_bytes: usize) -> Self {
        Self {
            inner: Arc::new(Handlers {
                gate,
                query,
                max_body_bytes,
            }),
        }
    }

    /// Handles a request whose body has already been read.
    pub async fn handle(&self, req: Request<Bytes>) -> Response<Bytes> {
        let started = Instant::now();
        let route = Route::parse(req.uri().path());
        let route_name = route.as_ref().map_or("unknown", Route::name);

        let response = match route {
            Some(route) => match self.dispatch(route, &req).await {
                Ok(response) => response,
                Err(e) => error_response(&e),
            },
            None => error_response(&ApiError::NotFound),
        };

        histogram!(
            REQUEST_DURATION,
            "route" => route_name,
            "status" => response.status().as_str().to_owned()
        )
        .record(started.elapsed().as_secs_f64());
        response
    }

    async fn dispatch(
        &self,
        route: Route<'_>,
        req: &Request<Bytes>,
    ) -> Result<Response<Bytes>, ApiError> {
        if req.method() != route.method() {
            return Err(ApiError::MethodNotAllowed);
        }

        let api_key = req
            .headers()
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok());
        let params = QueryParams::from_uri(req.uri());
        let query = &self.inner.query;

        match route {
            Route::Ingest => {
                self.inner.gate.ingest(api_key, req.body()).await?;
                let mut response = Response::new(Bytes::new());
                *response.status_mut() = StatusCode::ACCEPTED;
                Ok(response)
            }
            Route::Errors => ok(&query.list_errors(api_key, params.page()).await?),
            Route::ErrorDetail(fingerprint) => ok(&query
                .error_detail(api_key, fingerprint, params.get("url"))
                .await?),
            Route::Metrics => ok(&query
                .list_metrics(api_key, params.get("url"), params.page())
                .await?),
            Route::TopEndpoints => ok(&query.top_endpoints(api_key).await?),
        }
    }
}

fn ok<T: Serialize>(value: &T) -> Result<Response<Bytes>, ApiError> {
    Ok(json_response(StatusCode::OK, value))
}

fn error_response(error: &ApiError) -> Response<Bytes> {
    json_response(error.status(), &error.body())
}

impl Service<Request<Incoming>> for TelemetryService {
    type Response = Response<BoxedBody>;
    type Error = Infallible;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let service = self.clone();
        Box::pin(async move {
            let limit = service.inner.max_body_bytes;
            let (parts, body) = req.into_parts();

            let body = match Limited::new(body, limit).collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    let error = if e.downcast_ref::<LengthLimitError>().is_some() {
                        ApiError::PayloadTooLarge(limit)
                    } else {
                        tracing::debug!(error = %e, "Failed to read request body");
                        ApiError::bad_field("non_field_errors", "Could not read request body")
                    };
                    return Ok(error_response(&error).map(full_body));
                }
            };

            let response = service.handle(Request::from_parts(parts, body)).await;
            Ok(response.map(full_body))
        })
    }
}
