/// Storefront Backend Application
///
/// This is the main entry point for the order-and-catalog backend.
/// The application exposes REST API endpoints for order aggregation,
/// batch/status management, catalog maintenance, and invoice rendering.
///
/// # Architecture
///
/// The application follows a modular architecture with:
/// - Repository layer for data access
/// - Service layer for business logic (aggregator, batch controller, catalog)
/// - API layer for HTTP endpoints
/// - External collaborators behind traits (blob storage, document rendering)
/// - Metrics for monitoring
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinSet;
use tracing::{error, info};

use app_config::AppConfig;
use auth::AuthGate;
use blobstore::DriveStore;
use invoice::PdfRenderer;
use repository::{
    PgAdminsRepository, PgOrdersRepository, PgProductsRepository, PgTrackingRepository,
};
use server::Server;
use service::{AdminAuthImpl, BatchControllerImpl, CatalogServiceImpl, OrderAggregatorImpl};
use tokio_postgres::{Client, NoTls};

/// Initialize the tracing subscriber for logging
fn init_logger() -> Result<()> {
    tracing_subscriber::fmt::init();
    Ok(())
}

/// Opens a dedicated connection for one repository and spawns its
/// connection driver. `tokio_postgres::Client` is not `Clone`, so each
/// repository gets its own client.
async fn connect_client(dsn: &str, label: &str) -> Result<Client> {
    let (client, connection) = tokio_postgres::connect(dsn, NoTls)
        .await
        .with_context(|| format!("Failed to connect to database for {label} repository"))?;
    info!("Connected to database for {} repository", label);

    let label = label.to_string();
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!("{} connection error: {}", label, e);
        }
    });
    Ok(client)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger
    if let Err(err) = init_logger() {
        eprintln!("Failed to initialize logger: {}", err);
        return Err(anyhow::anyhow!("Failed to initialize logger"));
    }

    info!("Storefront Backend starting...");

    // Load configuration
    let config = AppConfig::load().context("Failed to load configuration")?;

    // Initialize database pool and apply migrations
    let db_pool = match db::init_db_pool(&config).await {
        Ok(pool) => {
            info!("Database initialized successfully");
            pool
        }
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            error!("Database connection is required for application to function properly");
            return Err(anyhow::anyhow!("Failed to initialize database"));
        }
    };

    let dsn = format!(
        "host={} port={} user={} password={} dbname={} sslmode=disable",
        config.db_host, config.db_port, config.db_user, config.db_password, config.db_name
    );

    // Repositories, one dedicated connection each. The orders repository
    // is constructed twice: one instance feeds the read-side aggregator,
    // the other the batch controller.
    let orders_repo = PgOrdersRepository::new(connect_client(&dsn, "orders").await?);
    let controller_orders_repo =
        PgOrdersRepository::new(connect_client(&dsn, "batch-controller").await?);
    let tracking_repo = PgTrackingRepository::new(connect_client(&dsn, "tracking").await?);
    let products_repo = PgProductsRepository::new(connect_client(&dsn, "products").await?);
    let admins_repo = PgAdminsRepository::new(connect_client(&dsn, "admins").await?);

    // External collaborators
    let blob_store = DriveStore::new(
        config.blob_api_base.clone(),
        config.blob_upload_base.clone(),
        config.blob_folder_id.clone(),
        config.blob_api_token.clone(),
    );
    let auth_gate = Arc::new(AuthGate::new(
        &config.jwt_secret,
        config.jwt_issuer.clone(),
        config.token_ttl,
    ));
    let renderer = Arc::new(PdfRenderer::new());

    // Services
    let aggregator = Arc::new(OrderAggregatorImpl::new(orders_repo, tracking_repo));
    let controller = Arc::new(BatchControllerImpl::new(
        db_pool.clone(),
        controller_orders_repo,
    ));
    let catalog = Arc::new(CatalogServiceImpl::new(products_repo, blob_store));
    let admin_auth = Arc::new(AdminAuthImpl::new(admins_repo, (*auth_gate).clone()));

    // Start HTTP server
    let http_port = config.http_port.to_string();
    info!("Using HTTP port: {}", http_port);

    let http_server = Server::new(
        http_port,
        aggregator,
        controller,
        catalog,
        admin_auth,
        renderer,
        auth_gate,
    );

    let mut tasks = JoinSet::new();
    tasks.spawn(async move {
        if let Err(err) = http_server.start().await {
            error!("HTTP server error: {}", err);
            // Exit the application if the server fails to start
            std::process::exit(1);
        }
    });

    // Wait for all tasks to complete
    while let Some(res) = tasks.join_next().await {
        if let Err(err) = res {
            error!("Task error: {}", err);
        }
    }

    info!("Application stopped");
    Ok(())
}
