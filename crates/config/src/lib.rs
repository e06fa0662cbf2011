use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

/// `AppConfig` holds all configuration parameters required by the application.
///
/// The configuration is loaded from environment variables (optionally via a `.env` file)
/// or uses default values if the variable is not set. Fields cover the database,
/// the HTTP server, the auth gate, and the blob-storage collaborator.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AppConfig {
    // --- Database settings ---
    /// Database hostname or service name (e.g. "postgres" in Docker Compose, "localhost" for local runs).
    pub db_host: String,
    /// Database port (default: 5432).
    pub db_port: u16,
    /// Database user.
    pub db_user: String,
    /// Database password.
    pub db_password: String,
    /// Database name.
    pub db_name: String,

    // --- HTTP server ---
    /// The port on which the HTTP server will listen.
    pub http_port: u16,

    // --- Shutdown timeout ---
    /// Graceful shutdown timeout (human-friendly format, e.g. "5s", "1m").
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub shutdown_timeout: Duration,

    // --- Auth gate ---
    /// Secret used to sign admin bearer tokens (HS256).
    pub jwt_secret: String,
    /// Issuer claim stamped into and required from every token.
    pub jwt_issuer: String,
    /// Token lifetime (human-friendly format, e.g. "24h").
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub token_ttl: Duration,

    // --- Blob storage collaborator ---
    /// Base URL for blob metadata/permission/delete calls.
    pub blob_api_base: String,
    /// Base URL for blob content uploads.
    pub blob_upload_base: String,
    /// Folder (collection) id new images are uploaded into.
    pub blob_folder_id: String,
    /// Bearer token for the blob-storage API.
    pub blob_api_token: String,
}

/// Custom deserializer for duration fields.
/// Accepts human-readable formats like "5s", "1m", "24h".
fn deserialize_duration_secs<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    let val = String::deserialize(deserializer)?;
    humantime::parse_duration(&val)
        .map_err(|e| D::Error::custom(format!("Invalid duration '{val}': {e}")))
}

impl AppConfig {
    /// Loads configuration from environment variables (and optionally from `.env` file).
    ///
    /// Fields not set via env will be filled with default values.
    ///
    /// # Errors
    /// Returns an error if environment variables are invalid or missing required values.
    pub fn load() -> Result<Self> {
        // Load from .env file (for Docker environment)
        dotenvy::dotenv().ok();

        // Note: these default values are for local development; deployments
        // override them through the environment.
        let settings = config::Config::builder()
            // Database
            .set_default("db_host", "localhost")?
            .set_default("db_port", 5432)?
            .set_default("db_user", "storefront_user")?
            .set_default("db_password", "securepassword")?
            .set_default("db_name", "storefront_db")?
            // HTTP
            .set_default("http_port", 8081)?
            // Shutdown
            .set_default("shutdown_timeout", "5s")?
            // Auth gate
            .set_default("jwt_secret", "dev-only-secret")?
            .set_default("jwt_issuer", "storefront-backend")?
            .set_default("token_ttl", "24h")?
            // Blob storage
            .set_default("blob_api_base", "https://www.googleapis.com/drive/v3")?
            .set_default("blob_upload_base", "https://www.googleapis.com/upload/drive/v3")?
            .set_default("blob_folder_id", "")?
            .set_default("blob_api_token", "")?
            .add_source(config::Environment::default().separator("_"))
            .build()?;

        settings
            .try_deserialize()
            .context("Failed to load configuration")
    }
}
