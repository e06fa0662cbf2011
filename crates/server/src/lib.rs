//! Server crate provides HTTP server functionality.
//!
//! This module implements the HTTP server for the order-and-catalog
//! backend: order aggregation reads, batch/status mutations, catalog
//! management, invoice rendering, and the admin login flow. Mutation
//! handlers require a bearer token verified by the auth gate.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use auth::{AuthGate, Claims};
use axum::{
    Router,
    body::Body,
    extract::{FromRequestParts, Multipart, Path as AxumPath, Query, State},
    http::{HeaderMap, StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use invoice::{InvoiceDocument, InvoiceRenderer};
use model::{InvoiceRequest, ProductUpdate};
use prometheus::{CounterVec, HistogramOpts, HistogramVec, Opts, Registry};
use serde::Deserialize;
use serde_json::json;
use service::{
    AdminAuth, BatchController, CatalogService, ImageUpload, OrderAggregator, ProductForm,
    ServiceError, UpstreamKind,
};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

/// Server represents the HTTP server for the storefront backend.
pub struct Server {
    port: String,
    state: AppState,
}

/// Metrics collects and exposes HTTP server metrics.
struct Metrics {
    registry: Registry,
    http_requests_total: CounterVec,
    http_request_duration_seconds: HistogramVec,
    errors_total: CounterVec,
}

impl Metrics {
    fn new() -> Self {
        let registry = Registry::new();

        let http_requests_total = CounterVec::new(
            Opts::new("http_requests_total", "Total number of HTTP requests"),
            &["method", "endpoint", "status"],
        )
        .expect("Failed to create http_requests_total metric");

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP request duration in seconds",
            ),
            &["method", "endpoint"],
        )
        .expect("Failed to create http_request_duration_seconds metric");

        let errors_total = CounterVec::new(
            Opts::new("errors_total", "Total number of errors"),
            &["source", "endpoint"],
        )
        .expect("Failed to create errors_total metric");

        registry
            .register(Box::new(http_requests_total.clone()))
            .expect("Failed to register http_requests_total metric");
        registry
            .register(Box::new(http_request_duration_seconds.clone()))
            .expect("Failed to register http_request_duration_seconds metric");
        registry
            .register(Box::new(errors_total.clone()))
            .expect("Failed to register errors_total metric");

        Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            errors_total,
        }
    }

    fn record_request(&self, method: &str, endpoint: &str, status: u16, duration: Duration) {
        self.http_requests_total
            .with_label_values(&[method, endpoint, &status.to_string()])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, endpoint])
            .observe(duration.as_secs_f64());
    }

    fn record_error(&self, source: &str, endpoint: &str) {
        self.errors_total
            .with_label_values(&[source, endpoint])
            .inc();
    }
}

/// Application state shared between request handlers
#[derive(Clone)]
struct AppState {
    aggregator: Arc<dyn OrderAggregator>,
    controller: Arc<dyn BatchController>,
    catalog: Arc<dyn CatalogService>,
    admin_auth: Arc<dyn AdminAuth>,
    renderer: Arc<dyn InvoiceRenderer>,
    auth_gate: Arc<AuthGate>,
    metrics: Arc<Metrics>,
}

/// Extracts the `Bearer` token from an Authorization header value.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Extractor guarding mutation endpoints: verifies the bearer token and
/// exposes its claims. Rejects with 401 on a missing or bad token.
struct AdminClaims(#[allow(dead_code)] Claims);

impl FromRequestParts<AppState> for AdminClaims {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(token) = bearer_token(&parts.headers) else {
            warn!("Rejected request without bearer token: {}", parts.uri.path());
            return Err(unauthorized("missing bearer token"));
        };
        match state.auth_gate.verify_token(token) {
            Ok(claims) => Ok(Self(claims)),
            Err(_) => {
                warn!("Rejected invalid bearer token: {}", parts.uri.path());
                Err(unauthorized("invalid or expired token"))
            }
        }
    }
}

fn unauthorized(msg: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        axum::Json(json!({ "error": msg })),
    )
        .into_response()
}

/// Maps a service error onto the HTTP taxonomy. Upstream and internal
/// failures are logged in detail and answered with a generic body; the
/// client never learns which collaborator broke.
fn error_response(err: &ServiceError, endpoint: &str) -> Response {
    match err {
        ServiceError::InvalidArgument(msg) => {
            warn!("Bad request on {}: {}", endpoint, msg);
            (
                StatusCode::BAD_REQUEST,
                axum::Json(json!({ "error": msg })),
            )
                .into_response()
        }
        ServiceError::NotFound(msg) => {
            warn!("Not found on {}: {}", endpoint, msg);
            (StatusCode::NOT_FOUND, axum::Json(json!({ "error": msg }))).into_response()
        }
        ServiceError::Unauthorized(msg) => {
            warn!("Unauthorized on {}: {}", endpoint, msg);
            unauthorized(msg)
        }
        ServiceError::Upstream { .. } | ServiceError::Internal(_) => {
            error!("Request failed on {}: {}", endpoint, err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                axum::Json(json!({ "error": "an internal error occurred" })),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct StatusQuery {
    status: String,
}

#[derive(Debug, Deserialize)]
struct OrderIdQuery {
    order_id: String,
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Deserialize)]
struct BulkStatusRequest {
    #[serde(default)]
    product_ids: Vec<String>,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct CreateBatchRequest {
    #[serde(default)]
    batch_name: String,
    #[serde(default)]
    product_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct BatchStatusRequest {
    #[serde(default)]
    batch_name: String,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct OrderStatusRequest {
    #[serde(default)]
    order_id: String,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    #[serde(default)]
    status: String,
}

impl Server {
    /// Creates a new Server instance over the injected services.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        port: String,
        aggregator: Arc<dyn OrderAggregator>,
        controller: Arc<dyn BatchController>,
        catalog: Arc<dyn CatalogService>,
        admin_auth: Arc<dyn AdminAuth>,
        renderer: Arc<dyn InvoiceRenderer>,
        auth_gate: Arc<AuthGate>,
    ) -> Self {
        info!("Initializing HTTP server on port {}", port);

        Self {
            port,
            state: AppState {
                aggregator,
                controller,
                catalog,
                admin_auth,
                renderer,
                auth_gate,
                metrics: Arc::new(Metrics::new()),
            },
        }
    }

    /// Starts the server and blocks until it's shut down.
    pub async fn start(&self) -> Result<()> {
        let app = self.create_router();

        let listener = TcpListener::bind(format!("0.0.0.0:{}", self.port))
            .await
            .context("Failed to bind to port")?;

        info!("HTTP server listening on port {}", self.port);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("Server error")?;

        info!("HTTP server shut down gracefully");
        Ok(())
    }

    fn create_router(&self) -> Router {
        let metrics = self.state.metrics.clone();

        Router::new()
            .route("/login", post(Self::handle_login))
            .route("/orders", get(Self::handle_orders_by_status))
            .route("/api/orders", get(Self::handle_tracking_items))
            .route("/api/orders/metadata", get(Self::handle_order_metadata))
            .route("/api/orders/details", get(Self::handle_order_details))
            .route("/api/orders/invoice", post(Self::handle_invoice))
            .route(
                "/api/products/manage",
                get(Self::handle_manage_view).post(Self::handle_bulk_status_update),
            )
            .route("/api/products/create_batch", post(Self::handle_create_batch))
            .route(
                "/api/products/update_batch_status",
                post(Self::handle_update_batch_status),
            )
            .route(
                "/api/products/update_status",
                post(Self::handle_update_order_status),
            )
            .route("/update-order/{order_id}", put(Self::handle_update_order))
            .route("/api/products/new", post(Self::handle_add_product))
            .route("/api/products/{id}", put(Self::handle_update_product))
            .route(
                "/api/products/delete/{id}",
                delete(Self::handle_delete_product),
            )
            .route("/api/product-list", get(Self::handle_product_list))
            .route("/api/products", get(Self::handle_product_summaries))
            .route("/health", get(Self::handle_health))
            .route("/metrics", get(Self::handle_metrics))
            .layer(axum::middleware::from_fn_with_state(
                metrics,
                Self::metrics_middleware,
            ))
            .with_state(self.state.clone())
    }

    /// Middleware for collecting metrics on HTTP requests
    async fn metrics_middleware(
        State(metrics): State<Arc<Metrics>>,
        req: axum::extract::Request,
        next: axum::middleware::Next,
    ) -> Response {
        let method = req.method().to_string();
        let path = req.uri().path().to_string();

        let start = std::time::Instant::now();
        let response = next.run(req).await;
        let duration = start.elapsed();

        let status = response.status().as_u16();
        metrics.record_request(&method, &path, status, duration);
        if status >= 400 {
            metrics.record_error("http", &path);
        }

        response
    }

    async fn handle_login(
        State(state): State<AppState>,
        axum::Json(req): axum::Json<LoginRequest>,
    ) -> Response {
        info!("Received login request");
        match state.admin_auth.login(&req.email, &req.password).await {
            Ok(token) => (StatusCode::OK, axum::Json(json!({ "token": token }))).into_response(),
            Err(err) => error_response(&err, "/login"),
        }
    }

    async fn handle_orders_by_status(
        State(state): State<AppState>,
        Query(query): Query<StatusQuery>,
    ) -> Response {
        info!("Received order list request for status: {}", query.status);
        match state.aggregator.orders_by_status(&query.status).await {
            Ok(orders) => (StatusCode::OK, axum::Json(orders)).into_response(),
            Err(err) => error_response(&err, "/orders"),
        }
    }

    async fn handle_tracking_items(
        State(state): State<AppState>,
        Query(query): Query<OrderIdQuery>,
    ) -> Response {
        info!("Received tracking request for order: {}", query.order_id);
        match state.aggregator.tracking_items(&query.order_id).await {
            Ok(items) => (StatusCode::OK, axum::Json(items)).into_response(),
            Err(err) => error_response(&err, "/api/orders"),
        }
    }

    async fn handle_order_metadata(
        State(state): State<AppState>,
        Query(query): Query<OrderIdQuery>,
    ) -> Response {
        info!("Received metadata request for order: {}", query.order_id);
        match state.aggregator.order_metadata(&query.order_id).await {
            Ok(details) => (StatusCode::OK, axum::Json(details)).into_response(),
            Err(err) => error_response(&err, "/api/orders/metadata"),
        }
    }

    async fn handle_order_details(State(state): State<AppState>) -> Response {
        info!("Received grouped order details request");
        match state.aggregator.order_details().await {
            Ok(orders) => {
                (StatusCode::OK, axum::Json(json!({ "orders": orders }))).into_response()
            }
            Err(err) => error_response(&err, "/api/orders/details"),
        }
    }

    async fn handle_manage_view(State(state): State<AppState>) -> Response {
        info!("Received management view request");
        match state.aggregator.manage_view().await {
            Ok(rows) => (StatusCode::OK, axum::Json(rows)).into_response(),
            Err(err) => error_response(&err, "/api/products/manage"),
        }
    }

    async fn handle_bulk_status_update(
        State(state): State<AppState>,
        _admin: AdminClaims,
        axum::Json(req): axum::Json<BulkStatusRequest>,
    ) -> Response {
        info!(
            "Received bulk status update for {} orders",
            req.product_ids.len()
        );
        match state
            .controller
            .bulk_update_status(&req.product_ids, &req.status)
            .await
        {
            Ok(affected) => (
                StatusCode::OK,
                axum::Json(json!({
                    "message": format!("updated {} orders", affected)
                })),
            )
                .into_response(),
            Err(err) => error_response(&err, "/api/products/manage"),
        }
    }

    async fn handle_create_batch(
        State(state): State<AppState>,
        _admin: AdminClaims,
        axum::Json(req): axum::Json<CreateBatchRequest>,
    ) -> Response {
        info!(
            "Received batch assignment: {} -> {} orders",
            req.batch_name,
            req.product_ids.len()
        );
        match state
            .controller
            .create_batch(&req.batch_name, &req.product_ids)
            .await
        {
            Ok(()) => (
                StatusCode::CREATED,
                axum::Json(json!({ "message": "batch created successfully" })),
            )
                .into_response(),
            Err(err) => error_response(&err, "/api/products/create_batch"),
        }
    }

    async fn handle_update_batch_status(
        State(state): State<AppState>,
        _admin: AdminClaims,
        axum::Json(req): axum::Json<BatchStatusRequest>,
    ) -> Response {
        info!(
            "Received batch status update: {} -> {}",
            req.batch_name, req.status
        );
        match state
            .controller
            .update_batch_status(&req.batch_name, &req.status)
            .await
        {
            Ok(affected) => (
                StatusCode::OK,
                axum::Json(json!({
                    "message": format!("updated {} orders", affected)
                })),
            )
                .into_response(),
            Err(err) => error_response(&err, "/api/products/update_batch_status"),
        }
    }

    async fn handle_update_order_status(
        State(state): State<AppState>,
        _admin: AdminClaims,
        axum::Json(req): axum::Json<OrderStatusRequest>,
    ) -> Response {
        info!("Received status update for order: {}", req.order_id);
        match state
            .controller
            .update_order_status(&req.order_id, &req.status)
            .await
        {
            Ok(()) => (
                StatusCode::OK,
                axum::Json(json!({ "message": "order status updated" })),
            )
                .into_response(),
            Err(err) => error_response(&err, "/api/products/update_status"),
        }
    }

    async fn handle_update_order(
        State(state): State<AppState>,
        AxumPath(order_id): AxumPath<String>,
        _admin: AdminClaims,
        axum::Json(req): axum::Json<StatusBody>,
    ) -> Response {
        info!("Received order update for: {}", order_id);
        match state.controller.update_order(&order_id, &req.status).await {
            Ok(()) => (
                StatusCode::OK,
                axum::Json(json!({ "message": "order updated successfully" })),
            )
                .into_response(),
            Err(err) => error_response(&err, "/update-order"),
        }
    }

    async fn handle_invoice(
        State(state): State<AppState>,
        axum::Json(req): axum::Json<InvoiceRequest>,
    ) -> Response {
        info!("Received invoice request for order: {}", req.id);
        let document = InvoiceDocument::from_request(&req);
        match state.renderer.render(&document) {
            Ok(bytes) => Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "application/pdf")
                .header(
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"Invoice_{}.pdf\"", req.id),
                )
                .body(Body::from(bytes))
                .unwrap_or_else(|_| {
                    (StatusCode::INTERNAL_SERVER_ERROR, "Failed to create response")
                        .into_response()
                }),
            Err(e) => error_response(
                &ServiceError::Upstream {
                    kind: UpstreamKind::Renderer,
                    message: e.to_string(),
                },
                "/api/orders/invoice",
            ),
        }
    }

    async fn handle_add_product(
        State(state): State<AppState>,
        _admin: AdminClaims,
        mut multipart: Multipart,
    ) -> Response {
        info!("Received add product request");

        let mut image: Option<ImageUpload> = None;
        let mut form = ProductForm::default();

        loop {
            let field = match multipart.next_field().await {
                Ok(Some(field)) => field,
                Ok(None) => break,
                Err(e) => {
                    warn!("Malformed multipart body: {}", e);
                    return (
                        StatusCode::BAD_REQUEST,
                        axum::Json(json!({ "error": "malformed multipart body" })),
                    )
                        .into_response();
                }
            };

            let name = field.name().unwrap_or_default().to_string();
            if name == "image" {
                let filename = field.file_name().unwrap_or("image").to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                match field.bytes().await {
                    Ok(bytes) => {
                        image = Some(ImageUpload {
                            filename,
                            content_type,
                            bytes: bytes.to_vec(),
                        });
                    }
                    Err(e) => {
                        warn!("Failed to read image part: {}", e);
                        return (
                            StatusCode::BAD_REQUEST,
                            axum::Json(json!({ "error": "failed to read image" })),
                        )
                            .into_response();
                    }
                }
                continue;
            }

            let value = match field.text().await {
                Ok(value) => value,
                Err(e) => {
                    warn!("Failed to read form field {}: {}", name, e);
                    return (
                        StatusCode::BAD_REQUEST,
                        axum::Json(json!({ "error": "malformed multipart body" })),
                    )
                        .into_response();
                }
            };
            match name.as_str() {
                "name" => form.name = Some(value),
                "price" => form.price = Some(value),
                "category" => form.category = Some(value),
                "size" => form.size = Some(value),
                "description" => form.description = Some(value),
                "disabledSizes" => form.disabled_sizes = Some(value),
                _ => {}
            }
        }

        match state.catalog.add_product(image, form).await {
            Ok(()) => (
                StatusCode::CREATED,
                axum::Json(json!({ "message": "product added successfully" })),
            )
                .into_response(),
            Err(err) => error_response(&err, "/api/products/new"),
        }
    }

    async fn handle_update_product(
        State(state): State<AppState>,
        AxumPath(id): AxumPath<i32>,
        _admin: AdminClaims,
        axum::Json(patch): axum::Json<ProductUpdate>,
    ) -> Response {
        info!("Received product update for id: {}", id);
        match state.catalog.update_product(id, patch).await {
            Ok(()) => (
                StatusCode::OK,
                axum::Json(json!({ "message": "product updated successfully" })),
            )
                .into_response(),
            Err(err) => error_response(&err, "/api/products"),
        }
    }

    async fn handle_delete_product(
        State(state): State<AppState>,
        AxumPath(id): AxumPath<i32>,
        _admin: AdminClaims,
    ) -> Response {
        info!("Received product delete for id: {}", id);
        match state.catalog.delete_product(id).await {
            Ok(()) => (
                StatusCode::OK,
                axum::Json(json!({ "message": "product deleted successfully" })),
            )
                .into_response(),
            Err(err) => error_response(&err, "/api/products/delete"),
        }
    }

    async fn handle_product_list(State(state): State<AppState>) -> Response {
        info!("Received product list request");
        match state.catalog.list_products().await {
            Ok(products) => (StatusCode::OK, axum::Json(products)).into_response(),
            Err(err) => error_response(&err, "/api/product-list"),
        }
    }

    async fn handle_product_summaries(State(state): State<AppState>) -> Response {
        info!("Received product summaries request");
        match state.catalog.product_summaries().await {
            Ok(products) => (StatusCode::OK, axum::Json(products)).into_response(),
            Err(err) => error_response(&err, "/api/products"),
        }
    }

    async fn handle_health() -> &'static str {
        info!("Health check requested");
        "OK"
    }

    async fn handle_metrics(State(state): State<AppState>) -> Response {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();

        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&state.metrics.registry.gather(), &mut buffer) {
            error!("Failed to encode metrics: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response();
        }

        match String::from_utf8(buffer) {
            Ok(metrics_text) => (StatusCode::OK, metrics_text).into_response(),
            Err(e) => {
                error!("Failed to convert metrics to UTF-8: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Invalid metrics data").into_response()
            }
        }
    }
}

/// Waits for a shutdown signal (Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
