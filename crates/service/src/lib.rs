//! Business logic layer: order aggregation, the batch/status controller,
//! catalog mutations, and the admin login flow.
//!
//! Services own the repositories they read and write through, plus the
//! Postgres pool for the one multi-statement operation (batch assignment)
//! that runs inside an explicit transaction. All other mutations are
//! single statements and rely on statement-level atomicity.
//!
//! # Features
//! - Validated entry points: order-id format, non-blank status tags and
//!   batch labels are checked before any store access.
//! - Grouped read models for the dashboard (orders nested with items).
//! - Well-typed error handling via [`ServiceError`].
//! - Dependency injection for testability and loose coupling.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use auth::{AuthError, AuthGate};
use blobstore::BlobStore;
use chrono::Utc;
use deadpool_postgres::{Pool, PoolError};
use model::{
    BatchRef, ManageRow, NewProduct, Order, OrderDetailRow, OrderDetails, OrderId, OrderItem,
    ParseError, Product, ProductSummary, ProductUpdate, StatusTag, TrackingItem,
};
use repository::{
    AdminsRepository, OrdersRepository, ProductsRepository, RepositoryError, TrackingRepository,
};
use thiserror::Error;
use tracing::instrument;

/// Which external collaborator an [`ServiceError::Upstream`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamKind {
    BlobUpload,
    BlobDelete,
    Renderer,
}

impl fmt::Display for UpstreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BlobUpload => "blob upload",
            Self::BlobDelete => "blob delete",
            Self::Renderer => "document rendering",
        };
        f.write_str(name)
    }
}

/// The main error type for all service operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Malformed id or missing/blank required field.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// No matching order/product/tracking data.
    #[error("not found: {0}")]
    NotFound(String),
    /// Failed credential check.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// An external collaborator reported failure.
    #[error("{kind} failed: {message}")]
    Upstream { kind: UpstreamKind, message: String },
    /// Unclassified store or runtime failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<RepositoryError> for ServiceError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound => Self::NotFound("no matching rows".into()),
            RepositoryError::Db(e) => Self::Internal(e.to_string()),
        }
    }
}

impl From<PoolError> for ServiceError {
    fn from(err: PoolError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<ParseError> for ServiceError {
    fn from(err: ParseError) -> Self {
        Self::InvalidArgument(err.to_string())
    }
}

/// Read-side composition over orders and tracking lines.
#[async_trait]
pub trait OrderAggregator: Send + Sync {
    /// Raw order rows with exactly the given status; no aggregation.
    async fn orders_by_status(&self, status: &str) -> Result<Vec<Order>, ServiceError>;

    /// Tracking items for one order. Strict: no lines means the order is
    /// incomplete and is reported as missing.
    async fn tracking_items(&self, order_id: &str) -> Result<Vec<TrackingItem>, ServiceError>;

    /// Order header with all its tracking lines nested. Strict on both the
    /// header and the lines.
    async fn order_metadata(&self, order_id: &str) -> Result<OrderDetails, ServiceError>;

    /// All orders grouped with their items, newest first. Lenient: an
    /// order without lines appears with an empty items list.
    async fn order_details(&self) -> Result<Vec<OrderDetails>, ServiceError>;

    /// Batch-management summary rows, unbatched orders first.
    async fn manage_view(&self) -> Result<Vec<ManageRow>, ServiceError>;
}

/// Aggregator implementation over the order and tracking repositories.
pub struct OrderAggregatorImpl<R1, R2> {
    orders_repo: R1,
    tracking_repo: R2,
}

impl<R1, R2> OrderAggregatorImpl<R1, R2>
where
    R1: OrdersRepository,
    R2: TrackingRepository,
{
    pub fn new(orders_repo: R1, tracking_repo: R2) -> Self {
        Self {
            orders_repo,
            tracking_repo,
        }
    }
}

/// Groups flat LEFT JOIN rows by order id, preserving first-encountered
/// order. Header fields come from the first row of each group; rows with
/// NULL line columns contribute no item.
fn group_details(rows: Vec<OrderDetailRow>) -> Vec<OrderDetails> {
    let mut grouped: Vec<OrderDetails> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for row in rows {
        let idx = match index.get(row.order_id.as_str()) {
            Some(&i) => i,
            None => {
                index.insert(row.order_id.clone(), grouped.len());
                grouped.push(OrderDetails {
                    order_id: row.order_id.clone(),
                    status: row.status.clone(),
                    batch: row.batch.clone(),
                    date_created: row.date_created,
                    estimated_time: row.estimated_time,
                    customer_name: row.customer_name.clone(),
                    customer_email: row.customer_email.clone(),
                    customer_contact: row.customer_contact.clone(),
                    items: Vec::new(),
                });
                grouped.len() - 1
            }
        };

        if let (Some(product_name), Some(product_size), Some(product_quantity), Some(total_amount)) = (
            row.product_name,
            row.product_size,
            row.product_quantity,
            row.total_amount,
        ) {
            grouped[idx].items.push(OrderItem {
                product_name,
                product_size,
                product_quantity,
                total_amount,
                status: row.line_status.unwrap_or_default(),
            });
        }
    }

    grouped
}

#[async_trait]
impl<R1, R2> OrderAggregator for OrderAggregatorImpl<R1, R2>
where
    R1: OrdersRepository,
    R2: TrackingRepository,
{
    #[instrument(skip(self))]
    async fn orders_by_status(&self, status: &str) -> Result<Vec<Order>, ServiceError> {
        Ok(self.orders_repo.get_by_status(status).await?)
    }

    #[instrument(skip(self))]
    async fn tracking_items(&self, order_id: &str) -> Result<Vec<TrackingItem>, ServiceError> {
        let order_id = OrderId::parse(order_id)?;
        let lines = self.tracking_repo.get_by_order_id(&order_id).await?;
        if lines.is_empty() {
            return Err(ServiceError::NotFound(format!(
                "no tracking data for order {order_id}"
            )));
        }
        Ok(lines
            .into_iter()
            .map(|line| TrackingItem {
                name: line.product_name,
                size: line.product_size,
                quantity: line.product_quantity,
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn order_metadata(&self, order_id: &str) -> Result<OrderDetails, ServiceError> {
        let order_id = OrderId::parse(order_id)?;
        let order = self
            .orders_repo
            .get_by_id(&order_id)
            .await
            .map_err(|err| match err {
                RepositoryError::NotFound => {
                    ServiceError::NotFound(format!("order {order_id} not found"))
                }
                other => other.into(),
            })?;

        let lines = self.tracking_repo.get_by_order_id(&order_id).await?;
        // A header without lines is an incomplete order: reported as
        // missing tracking data, not as an empty item list.
        let Some(first) = lines.first() else {
            return Err(ServiceError::NotFound(format!(
                "no tracking data for order {order_id}"
            )));
        };

        Ok(OrderDetails {
            order_id: order.order_id,
            status: order.status,
            batch: order.batch,
            date_created: order.date_created,
            estimated_time: order.estimated_time,
            customer_name: Some(first.customer_name.clone()),
            customer_email: Some(first.customer_email.clone()),
            customer_contact: Some(first.customer_contact.clone()),
            items: lines
                .into_iter()
                .map(|line| OrderItem {
                    product_name: line.product_name,
                    product_size: line.product_size,
                    product_quantity: line.product_quantity,
                    total_amount: line.total_amount,
                    status: line.status,
                })
                .collect(),
        })
    }

    #[instrument(skip(self))]
    async fn order_details(&self) -> Result<Vec<OrderDetails>, ServiceError> {
        let rows = self.orders_repo.detail_rows().await?;
        let grouped = group_details(rows);
        if grouped.is_empty() {
            return Err(ServiceError::NotFound("no orders found".into()));
        }
        Ok(grouped)
    }

    #[instrument(skip(self))]
    async fn manage_view(&self) -> Result<Vec<ManageRow>, ServiceError> {
        Ok(self.orders_repo.manage_rows().await?)
    }
}

/// Status and batch lifecycle operations over orders.
#[async_trait]
pub trait BatchController: Send + Sync {
    /// Sets the status on every order in the set; one atomic statement.
    /// Does not touch batch membership.
    async fn bulk_update_status(
        &self,
        order_ids: &[String],
        status: &str,
    ) -> Result<u64, ServiceError>;

    /// Assigns every order in the set to the named batch, all-or-nothing.
    async fn create_batch(&self, label: &str, order_ids: &[String]) -> Result<(), ServiceError>;

    /// Sets the status on every order in the batch bucket. The
    /// "New Batch" label targets exactly the unbatched orders.
    async fn update_batch_status(&self, label: &str, status: &str) -> Result<u64, ServiceError>;

    /// Sets the status of one order; `NotFound` if no row matched.
    async fn update_order_status(&self, order_id: &str, status: &str) -> Result<(), ServiceError>;

    /// Sets the status of one order and stamps `updated_at`.
    async fn update_order(&self, order_id: &str, status: &str) -> Result<(), ServiceError>;
}

/// Controller implementation; holds the pool for the transactional batch
/// assignment loop.
pub struct BatchControllerImpl<R> {
    db_pool: Pool,
    orders_repo: R,
}

impl<R> BatchControllerImpl<R>
where
    R: OrdersRepository,
{
    pub fn new(db_pool: Pool, orders_repo: R) -> Self {
        Self {
            db_pool,
            orders_repo,
        }
    }
}

#[async_trait]
impl<R> BatchController for BatchControllerImpl<R>
where
    R: OrdersRepository,
{
    #[instrument(skip(self))]
    async fn bulk_update_status(
        &self,
        order_ids: &[String],
        status: &str,
    ) -> Result<u64, ServiceError> {
        if order_ids.is_empty() {
            return Err(ServiceError::InvalidArgument("no order ids given".into()));
        }
        let status = StatusTag::parse(status)?;
        Ok(self.orders_repo.bulk_update_status(order_ids, &status).await?)
    }

    #[instrument(skip(self))]
    async fn create_batch(&self, label: &str, order_ids: &[String]) -> Result<(), ServiceError> {
        let label = match BatchRef::parse(label)? {
            BatchRef::Named(label) => label,
            BatchRef::Unbatched => {
                return Err(ServiceError::InvalidArgument(format!(
                    "{:?} is reserved for unbatched orders",
                    model::UNBATCHED_LABEL
                )));
            }
        };
        if order_ids.is_empty() {
            return Err(ServiceError::InvalidArgument("no order ids given".into()));
        }

        let mut client = self.db_pool.get().await?;
        let tx = client
            .transaction()
            .await
            .map_err(|e| ServiceError::Internal(format!("begin transaction failed: {e}")))?;

        for order_id in order_ids {
            self.orders_repo
                .assign_batch_tx(&tx, order_id, &label)
                .await?;
        }

        tx.commit()
            .await
            .map_err(|e| ServiceError::Internal(format!("commit failed: {e}")))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn update_batch_status(&self, label: &str, status: &str) -> Result<u64, ServiceError> {
        let batch = BatchRef::parse(label)?;
        let status = StatusTag::parse(status)?;
        Ok(self
            .orders_repo
            .update_status_by_batch(&batch, &status)
            .await?)
    }

    #[instrument(skip(self))]
    async fn update_order_status(&self, order_id: &str, status: &str) -> Result<(), ServiceError> {
        let order_id = OrderId::parse(order_id)?;
        let status = StatusTag::parse(status)?;
        let affected = self.orders_repo.update_status(&order_id, &status).await?;
        if affected == 0 {
            return Err(ServiceError::NotFound(format!("order {order_id} not found")));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn update_order(&self, order_id: &str, status: &str) -> Result<(), ServiceError> {
        let order_id = OrderId::parse(order_id)?;
        let status = StatusTag::parse(status)?;
        let affected = self
            .orders_repo
            .update_status_touched(&order_id, &status, Utc::now())
            .await?;
        if affected == 0 {
            return Err(ServiceError::NotFound(format!("order {order_id} not found")));
        }
        Ok(())
    }
}

/// Image part of a catalog-add request.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Raw multipart form fields of a catalog-add request, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductForm {
    pub name: Option<String>,
    pub price: Option<String>,
    pub category: Option<String>,
    pub size: Option<String>,
    pub description: Option<String>,
    pub disabled_sizes: Option<String>,
}

/// Catalog mutations and reads.
#[async_trait]
pub trait CatalogService: Send + Sync {
    /// Uploads the image, then inserts the catalog row. The row is never
    /// written when the upload fails.
    async fn add_product(
        &self,
        image: Option<ImageUpload>,
        form: ProductForm,
    ) -> Result<(), ServiceError>;

    /// Partial update; `NotFound` when no row matched.
    async fn update_product(&self, id: i32, patch: ProductUpdate) -> Result<(), ServiceError>;

    /// Deletes blob first, row second. A failed blob delete leaves the
    /// row in place; nothing is retried.
    async fn delete_product(&self, id: i32) -> Result<(), ServiceError>;

    async fn list_products(&self) -> Result<Vec<Product>, ServiceError>;

    async fn product_summaries(&self) -> Result<Vec<ProductSummary>, ServiceError>;
}

/// Catalog implementation over the products repository and the blob store.
pub struct CatalogServiceImpl<R, B> {
    products_repo: R,
    blob_store: B,
}

impl<R, B> CatalogServiceImpl<R, B>
where
    R: ProductsRepository,
    B: BlobStore,
{
    pub fn new(products_repo: R, blob_store: B) -> Self {
        Self {
            products_repo,
            blob_store,
        }
    }
}

fn required(field: Option<String>, name: &str) -> Result<String, ServiceError> {
    match field {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ServiceError::InvalidArgument(format!(
            "missing required field: {name}"
        ))),
    }
}

#[async_trait]
impl<R, B> CatalogService for CatalogServiceImpl<R, B>
where
    R: ProductsRepository,
    B: BlobStore,
{
    #[instrument(skip(self, image, form))]
    async fn add_product(
        &self,
        image: Option<ImageUpload>,
        form: ProductForm,
    ) -> Result<(), ServiceError> {
        let Some(image) = image else {
            return Err(ServiceError::InvalidArgument("no image provided".into()));
        };
        let name = required(form.name, "name")?;
        let price_raw = required(form.price, "price")?;
        let category = required(form.category, "category")?;
        let size = required(form.size, "size")?;
        let price: f64 = price_raw
            .trim()
            .parse()
            .map_err(|_| ServiceError::InvalidArgument("price must be numeric".into()))?;

        let stored = self
            .blob_store
            .upload(&image.filename, &image.content_type, image.bytes)
            .await
            .map_err(|e| ServiceError::Upstream {
                kind: UpstreamKind::BlobUpload,
                message: e.to_string(),
            })?;

        self.products_repo
            .insert(&NewProduct {
                name,
                price,
                category,
                image: stored.url,
                file_id: stored.file_id,
                size,
                description: form.description,
                disabled_sizes: form.disabled_sizes,
            })
            .await?;
        Ok(())
    }

    #[instrument(skip(self, patch))]
    async fn update_product(&self, id: i32, patch: ProductUpdate) -> Result<(), ServiceError> {
        let affected = self.products_repo.update(id, &patch).await?;
        if affected == 0 {
            return Err(ServiceError::NotFound(format!("product {id} not found")));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_product(&self, id: i32) -> Result<(), ServiceError> {
        let file_id = self
            .products_repo
            .file_id(id)
            .await
            .map_err(|err| match err {
                RepositoryError::NotFound => {
                    ServiceError::NotFound(format!("product {id} not found"))
                }
                other => other.into(),
            })?;

        if let Some(file_id) = file_id {
            self.blob_store
                .delete(&file_id)
                .await
                .map_err(|e| ServiceError::Upstream {
                    kind: UpstreamKind::BlobDelete,
                    message: e.to_string(),
                })?;
        }

        let affected = self.products_repo.delete(id).await?;
        if affected == 0 {
            return Err(ServiceError::NotFound(format!("product {id} not found")));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_products(&self) -> Result<Vec<Product>, ServiceError> {
        Ok(self.products_repo.list().await?)
    }

    #[instrument(skip(self))]
    async fn product_summaries(&self) -> Result<Vec<ProductSummary>, ServiceError> {
        Ok(self.products_repo.summaries().await?)
    }
}

/// Admin login: credential check plus token issuance.
#[async_trait]
pub trait AdminAuth: Send + Sync {
    /// Returns a bearer token on success.
    async fn login(&self, email: &str, password: &str) -> Result<String, ServiceError>;
}

/// Login implementation over the admins repository and the auth gate.
pub struct AdminAuthImpl<R> {
    admins_repo: R,
    gate: AuthGate,
}

impl<R> AdminAuthImpl<R>
where
    R: AdminsRepository,
{
    pub fn new(admins_repo: R, gate: AuthGate) -> Self {
        Self { admins_repo, gate }
    }
}

#[async_trait]
impl<R> AdminAuth for AdminAuthImpl<R>
where
    R: AdminsRepository,
{
    #[instrument(skip(self, password))]
    async fn login(&self, email: &str, password: &str) -> Result<String, ServiceError> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(ServiceError::InvalidArgument(
                "email and password are required".into(),
            ));
        }

        // Unknown email and wrong password collapse into the same answer.
        let admin = self
            .admins_repo
            .get_by_email(email)
            .await
            .map_err(|err| match err {
                RepositoryError::NotFound => {
                    ServiceError::Unauthorized("invalid credentials".into())
                }
                other => other.into(),
            })?;

        match self.gate.verify_password(&admin.password_hash, password) {
            Ok(()) => {}
            Err(AuthError::InvalidCredentials) => {
                return Err(ServiceError::Unauthorized("invalid credentials".into()));
            }
            Err(err) => return Err(ServiceError::Internal(err.to_string())),
        }

        self.gate
            .issue_token(&admin.email)
            .map_err(|e| ServiceError::Internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blobstore::{BlobStoreError, StoredImage};
    use chrono::{DateTime, Duration as ChronoDuration, Utc};
    use deadpool_postgres::{Manager, ManagerConfig, RecyclingMethod};
    use model::{Admin, TrackingLine};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_postgres::{Config as PgConfig, NoTls, Transaction};

    fn ts(offset_secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000 + offset_secs, 0).unwrap()
    }

    fn order(id: &str, status: &str, batch: Option<&str>, created: DateTime<Utc>) -> Order {
        Order {
            order_id: id.to_string(),
            status: status.to_string(),
            batch: batch.map(str::to_string),
            date_created: created,
            estimated_time: None,
            updated_at: None,
        }
    }

    fn line(order_id: &str, product: &str) -> TrackingLine {
        TrackingLine {
            order_id: order_id.to_string(),
            customer_name: "Ada Obi".to_string(),
            customer_email: "ada@example.com".to_string(),
            customer_contact: "+2348000000000".to_string(),
            product_name: product.to_string(),
            product_size: "42".to_string(),
            product_quantity: 2,
            total_amount: 10000.0,
            status: "pending".to_string(),
        }
    }

    fn detail_row(order: &Order, line: Option<&TrackingLine>) -> OrderDetailRow {
        OrderDetailRow {
            order_id: order.order_id.clone(),
            status: order.status.clone(),
            batch: order.batch.clone(),
            date_created: order.date_created,
            estimated_time: order.estimated_time,
            customer_name: line.map(|l| l.customer_name.clone()),
            customer_email: line.map(|l| l.customer_email.clone()),
            customer_contact: line.map(|l| l.customer_contact.clone()),
            product_name: line.map(|l| l.product_name.clone()),
            product_size: line.map(|l| l.product_size.clone()),
            product_quantity: line.map(|l| l.product_quantity),
            total_amount: line.map(|l| l.total_amount),
            line_status: line.map(|l| l.status.clone()),
        }
    }

    /// Pool that never connects; only validation paths may run against it.
    fn dummy_pool() -> Pool {
        let mut cfg = PgConfig::new();
        cfg.host("localhost").user("unused").dbname("unused");
        let mgr = Manager::from_config(
            cfg,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        Pool::builder(mgr).max_size(1).build().unwrap()
    }

    #[derive(Default)]
    struct MockOrdersRepo {
        orders: Mutex<Vec<Order>>,
        detail_rows: Mutex<Vec<OrderDetailRow>>,
        manage_rows: Mutex<Vec<ManageRow>>,
        calls: AtomicUsize,
        batch_status_calls: Mutex<Vec<(BatchRef, String)>>,
    }

    impl MockOrdersRepo {
        fn with_orders(orders: Vec<Order>) -> Self {
            Self {
                orders: Mutex::new(orders),
                ..Self::default()
            }
        }

        fn order(&self, id: &str) -> Option<Order> {
            self.orders
                .lock()
                .unwrap()
                .iter()
                .find(|o| o.order_id == id)
                .cloned()
        }
    }

    #[async_trait]
    impl OrdersRepository for MockOrdersRepo {
        async fn get_by_status(&self, status: &str) -> Result<Vec<Order>, RepositoryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .orders
                .lock()
                .unwrap()
                .iter()
                .filter(|o| o.status == status)
                .cloned()
                .collect())
        }

        async fn get_by_id(&self, order_id: &OrderId) -> Result<Order, RepositoryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.order(order_id.as_str()).ok_or(RepositoryError::NotFound)
        }

        async fn detail_rows(&self) -> Result<Vec<OrderDetailRow>, RepositoryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.detail_rows.lock().unwrap().clone())
        }

        async fn manage_rows(&self) -> Result<Vec<ManageRow>, RepositoryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.manage_rows.lock().unwrap().clone())
        }

        async fn bulk_update_status(
            &self,
            order_ids: &[String],
            status: &StatusTag,
        ) -> Result<u64, RepositoryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut orders = self.orders.lock().unwrap();
            let mut affected = 0;
            for order in orders.iter_mut() {
                if order_ids.contains(&order.order_id) {
                    order.status = status.as_str().to_string();
                    affected += 1;
                }
            }
            Ok(affected)
        }

        async fn update_status(
            &self,
            order_id: &OrderId,
            status: &StatusTag,
        ) -> Result<u64, RepositoryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut orders = self.orders.lock().unwrap();
            let mut affected = 0;
            for order in orders.iter_mut() {
                if order.order_id == order_id.as_str() {
                    order.status = status.as_str().to_string();
                    affected += 1;
                }
            }
            Ok(affected)
        }

        async fn update_status_touched(
            &self,
            order_id: &OrderId,
            status: &StatusTag,
            updated_at: DateTime<Utc>,
        ) -> Result<u64, RepositoryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut orders = self.orders.lock().unwrap();
            let mut affected = 0;
            for order in orders.iter_mut() {
                if order.order_id == order_id.as_str() {
                    order.status = status.as_str().to_string();
                    order.updated_at = Some(updated_at);
                    affected += 1;
                }
            }
            Ok(affected)
        }

        async fn update_status_by_batch(
            &self,
            batch: &BatchRef,
            status: &StatusTag,
        ) -> Result<u64, RepositoryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.batch_status_calls
                .lock()
                .unwrap()
                .push((batch.clone(), status.as_str().to_string()));
            let mut orders = self.orders.lock().unwrap();
            let mut affected = 0;
            for order in orders.iter_mut() {
                let hit = match batch {
                    BatchRef::Unbatched => order.batch.is_none(),
                    BatchRef::Named(label) => order.batch.as_deref() == Some(label),
                };
                if hit {
                    order.status = status.as_str().to_string();
                    affected += 1;
                }
            }
            Ok(affected)
        }

        async fn assign_batch_tx(
            &self,
            _tx: &Transaction<'_>,
            _order_id: &str,
            _label: &str,
        ) -> Result<u64, RepositoryError> {
            unreachable!("transactional path is not exercised in unit tests")
        }
    }

    #[derive(Default)]
    struct MockTrackingRepo {
        lines: Mutex<Vec<TrackingLine>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TrackingRepository for MockTrackingRepo {
        async fn get_by_order_id(
            &self,
            order_id: &OrderId,
        ) -> Result<Vec<TrackingLine>, RepositoryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .lines
                .lock()
                .unwrap()
                .iter()
                .filter(|l| l.order_id == order_id.as_str())
                .cloned()
                .collect())
        }
    }

    fn aggregator(
        orders: Vec<Order>,
        lines: Vec<TrackingLine>,
    ) -> OrderAggregatorImpl<MockOrdersRepo, MockTrackingRepo> {
        let orders_repo = MockOrdersRepo::with_orders(orders);
        let tracking_repo = MockTrackingRepo {
            lines: Mutex::new(lines),
            ..MockTrackingRepo::default()
        };
        OrderAggregatorImpl::new(orders_repo, tracking_repo)
    }

    #[tokio::test]
    async fn test_malformed_id_rejected_before_store_access() {
        let agg = aggregator(vec![], vec![]);
        for bad in ["", "ORD-short", "XRD-aaaa1111", "ORD-aaaa 111", "ord-aaaa1111"] {
            assert!(matches!(
                agg.tracking_items(bad).await,
                Err(ServiceError::InvalidArgument(_))
            ));
            assert!(matches!(
                agg.order_metadata(bad).await,
                Err(ServiceError::InvalidArgument(_))
            ));
        }
        assert_eq!(agg.orders_repo.calls.load(Ordering::SeqCst), 0);
        assert_eq!(agg.tracking_repo.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_metadata_strict_on_missing_lines() {
        let orders = vec![order("ORD-aaaa1111", "pending", None, ts(0))];
        let agg = aggregator(orders, vec![]);
        // Header exists, but an order without tracking lines is incomplete.
        assert!(matches!(
            agg.order_metadata("ORD-aaaa1111").await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_metadata_nests_lines_under_header() {
        let orders = vec![order("ORD-aaaa1111", "pending", Some("week-49"), ts(0))];
        let lines = vec![line("ORD-aaaa1111", "Sneaker A"), line("ORD-aaaa1111", "Slide B")];
        let agg = aggregator(orders, lines);
        let details = agg.order_metadata("ORD-aaaa1111").await.unwrap();
        assert_eq!(details.order_id, "ORD-aaaa1111");
        assert_eq!(details.batch.as_deref(), Some("week-49"));
        assert_eq!(details.customer_name.as_deref(), Some("Ada Obi"));
        assert_eq!(details.items.len(), 2);
    }

    #[tokio::test]
    async fn test_metadata_missing_header() {
        let agg = aggregator(vec![], vec![line("ORD-aaaa1111", "Sneaker A")]);
        assert!(matches!(
            agg.order_metadata("ORD-aaaa1111").await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_tracking_items_projection() {
        let orders = vec![order("ORD-aaaa1111", "pending", None, ts(0))];
        let agg = aggregator(orders, vec![line("ORD-aaaa1111", "Sneaker A")]);
        let items = agg.tracking_items("ORD-aaaa1111").await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "Sneaker A");
        assert_eq!(items[0].size, "42");
        assert_eq!(items[0].quantity, 2);
    }

    #[tokio::test]
    async fn test_details_lenient_on_zero_line_orders() {
        let with_lines = order("ORD-aaaa1111", "pending", None, ts(10));
        let without_lines = order("ORD-bbbb2222", "pending", None, ts(5));
        let l1 = line("ORD-aaaa1111", "Sneaker A");
        let l2 = line("ORD-aaaa1111", "Slide B");

        let agg = aggregator(vec![], vec![]);
        *agg.orders_repo.detail_rows.lock().unwrap() = vec![
            detail_row(&with_lines, Some(&l1)),
            detail_row(&with_lines, Some(&l2)),
            detail_row(&without_lines, None),
        ];

        let details = agg.order_details().await.unwrap();
        assert_eq!(details.len(), 2);
        // First-seen order preserved: newest order first, as the store sorts.
        assert_eq!(details[0].order_id, "ORD-aaaa1111");
        assert_eq!(details[0].items.len(), 2);
        assert_eq!(details[0].customer_name.as_deref(), Some("Ada Obi"));
        // The zero-line order still appears, with no items and no customer.
        assert_eq!(details[1].order_id, "ORD-bbbb2222");
        assert!(details[1].items.is_empty());
        assert!(details[1].customer_name.is_none());
    }

    #[tokio::test]
    async fn test_details_header_from_first_row() {
        let header = order("ORD-aaaa1111", "pending", Some("week-49"), ts(0));
        let l1 = line("ORD-aaaa1111", "Sneaker A");
        let l2 = line("ORD-aaaa1111", "Slide B");
        let agg = aggregator(vec![], vec![]);
        *agg.orders_repo.detail_rows.lock().unwrap() =
            vec![detail_row(&header, Some(&l1)), detail_row(&header, Some(&l2))];

        let details = agg.order_details().await.unwrap();
        assert_eq!(details.len(), 1);
        assert_eq!(details[0].status, "pending");
        assert_eq!(details[0].batch.as_deref(), Some("week-49"));
        assert_eq!(
            details[0]
                .items
                .iter()
                .map(|i| i.product_name.as_str())
                .collect::<Vec<_>>(),
            vec!["Sneaker A", "Slide B"]
        );
    }

    #[tokio::test]
    async fn test_details_empty_set_is_not_found() {
        let agg = aggregator(vec![], vec![]);
        assert!(matches!(
            agg.order_details().await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_orders_by_status_exact_match() {
        let orders = vec![
            order("ORD-aaaa1111", "pending", None, ts(0)),
            order("ORD-bbbb2222", "shipped", None, ts(1)),
        ];
        let agg = aggregator(orders, vec![]);
        let rows = agg.orders_by_status("pending").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].order_id, "ORD-aaaa1111");
        // No match is an empty list, not an error.
        assert!(agg.orders_by_status("Pending").await.unwrap().is_empty());
    }

    fn controller(orders: Vec<Order>) -> BatchControllerImpl<MockOrdersRepo> {
        BatchControllerImpl::new(dummy_pool(), MockOrdersRepo::with_orders(orders))
    }

    #[tokio::test]
    async fn test_bulk_update_preconditions() {
        let ctl = controller(vec![]);
        assert!(matches!(
            ctl.bulk_update_status(&[], "shipped").await,
            Err(ServiceError::InvalidArgument(_))
        ));
        assert!(matches!(
            ctl.bulk_update_status(&["ORD-aaaa1111".to_string()], "  ").await,
            Err(ServiceError::InvalidArgument(_))
        ));
        assert_eq!(ctl.orders_repo.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_bulk_update_leaves_batch_untouched() {
        let ctl = controller(vec![
            order("ORD-aaaa1111", "pending", Some("week-49"), ts(0)),
            order("ORD-bbbb2222", "pending", None, ts(1)),
        ]);
        let affected = ctl
            .bulk_update_status(&["ORD-aaaa1111".to_string()], "shipped")
            .await
            .unwrap();
        assert_eq!(affected, 1);
        let updated = ctl.orders_repo.order("ORD-aaaa1111").unwrap();
        assert_eq!(updated.status, "shipped");
        assert_eq!(updated.batch.as_deref(), Some("week-49"));
        // The other order is untouched.
        assert_eq!(ctl.orders_repo.order("ORD-bbbb2222").unwrap().status, "pending");
    }

    #[tokio::test]
    async fn test_create_batch_rejects_sentinel_and_empties() {
        let ctl = controller(vec![]);
        let ids = vec!["ORD-aaaa1111".to_string()];
        assert!(matches!(
            ctl.create_batch("New Batch", &ids).await,
            Err(ServiceError::InvalidArgument(_))
        ));
        assert!(matches!(
            ctl.create_batch("", &ids).await,
            Err(ServiceError::InvalidArgument(_))
        ));
        assert!(matches!(
            ctl.create_batch("week-49", &[]).await,
            Err(ServiceError::InvalidArgument(_))
        ));
        assert_eq!(ctl.orders_repo.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_batch_status_sentinel_targets_null_bucket_only() {
        let ctl = controller(vec![
            order("ORD-aaaa1111", "pending", None, ts(0)),
            order("ORD-bbbb2222", "pending", Some("week-49"), ts(1)),
        ]);
        let affected = ctl.update_batch_status("New Batch", "processing").await.unwrap();
        assert_eq!(affected, 1);
        assert_eq!(ctl.orders_repo.order("ORD-aaaa1111").unwrap().status, "processing");
        // A batched order is never hit by the sentinel bucket.
        assert_eq!(ctl.orders_repo.order("ORD-bbbb2222").unwrap().status, "pending");

        let calls = ctl.orders_repo.batch_status_calls.lock().unwrap();
        assert_eq!(calls.as_slice(), &[(BatchRef::Unbatched, "processing".to_string())]);
    }

    #[tokio::test]
    async fn test_batch_status_named_label_exact_match() {
        let ctl = controller(vec![
            order("ORD-aaaa1111", "pending", Some("week-49"), ts(0)),
            order("ORD-bbbb2222", "pending", Some("week-50"), ts(1)),
            order("ORD-cccc3333", "pending", None, ts(2)),
        ]);
        let affected = ctl.update_batch_status("week-49", "shipped").await.unwrap();
        assert_eq!(affected, 1);
        assert_eq!(ctl.orders_repo.order("ORD-aaaa1111").unwrap().status, "shipped");
        assert_eq!(ctl.orders_repo.order("ORD-bbbb2222").unwrap().status, "pending");
        assert_eq!(ctl.orders_repo.order("ORD-cccc3333").unwrap().status, "pending");
    }

    #[tokio::test]
    async fn test_single_order_update_checks_existence() {
        let ctl = controller(vec![order("ORD-aaaa1111", "pending", None, ts(0))]);
        assert!(matches!(
            ctl.update_order_status("ORD-zzzz9999", "shipped").await,
            Err(ServiceError::NotFound(_))
        ));
        ctl.update_order_status("ORD-aaaa1111", "shipped").await.unwrap();
        assert_eq!(ctl.orders_repo.order("ORD-aaaa1111").unwrap().status, "shipped");
    }

    #[tokio::test]
    async fn test_update_order_stamps_updated_at() {
        let ctl = controller(vec![order("ORD-aaaa1111", "pending", None, ts(0))]);
        let before = Utc::now() - ChronoDuration::seconds(1);
        ctl.update_order("ORD-aaaa1111", "delivered").await.unwrap();
        let updated = ctl.orders_repo.order("ORD-aaaa1111").unwrap();
        assert_eq!(updated.status, "delivered");
        assert!(updated.updated_at.unwrap() > before);
    }

    #[derive(Default)]
    struct MockProductsRepo {
        rows: Mutex<Vec<(i32, NewProduct)>>,
        file_ids: Mutex<HashMap<i32, Option<String>>>,
    }

    #[async_trait]
    impl ProductsRepository for MockProductsRepo {
        async fn insert(&self, product: &NewProduct) -> Result<(), RepositoryError> {
            let mut rows = self.rows.lock().unwrap();
            let id = rows.len() as i32 + 1;
            self.file_ids
                .lock()
                .unwrap()
                .insert(id, Some(product.file_id.clone()));
            rows.push((id, product.clone()));
            Ok(())
        }

        async fn list(&self) -> Result<Vec<Product>, RepositoryError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .map(|(id, p)| Product {
                    id: *id,
                    name: p.name.clone(),
                    price: p.price,
                    category: p.category.clone(),
                    image: p.image.clone(),
                    size: p.size.clone(),
                    description: p.description.clone(),
                    disabled_sizes: p.disabled_sizes.clone(),
                })
                .collect())
        }

        async fn summaries(&self) -> Result<Vec<ProductSummary>, RepositoryError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .map(|(id, p)| ProductSummary {
                    id: *id,
                    name: p.name.clone(),
                    price: p.price,
                    image: p.image.clone(),
                })
                .collect())
        }

        async fn update(&self, id: i32, patch: &ProductUpdate) -> Result<u64, RepositoryError> {
            let mut rows = self.rows.lock().unwrap();
            let Some((_, product)) = rows.iter_mut().find(|(pid, _)| *pid == id) else {
                return Ok(0);
            };
            if let Some(name) = &patch.name {
                product.name = name.clone();
            }
            if let Some(price) = patch.price {
                product.price = price;
            }
            Ok(1)
        }

        async fn file_id(&self, id: i32) -> Result<Option<String>, RepositoryError> {
            self.file_ids
                .lock()
                .unwrap()
                .get(&id)
                .cloned()
                .ok_or(RepositoryError::NotFound)
        }

        async fn delete(&self, id: i32) -> Result<u64, RepositoryError> {
            let mut rows = self.rows.lock().unwrap();
            let before = rows.len();
            rows.retain(|(pid, _)| *pid != id);
            self.file_ids.lock().unwrap().remove(&id);
            Ok((before - rows.len()) as u64)
        }
    }

    #[derive(Default)]
    struct MockBlobStore {
        fail_upload: bool,
        fail_delete: bool,
        uploads: AtomicUsize,
        deletes: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl BlobStore for MockBlobStore {
        async fn upload(
            &self,
            filename: &str,
            _content_type: &str,
            _bytes: Vec<u8>,
        ) -> Result<StoredImage, BlobStoreError> {
            if self.fail_upload {
                return Err(BlobStoreError::Upload("boom".into()));
            }
            self.uploads.fetch_add(1, Ordering::SeqCst);
            Ok(StoredImage {
                url: format!("https://blobs.example.com/{filename}"),
                file_id: format!("fid-{filename}"),
            })
        }

        async fn delete(&self, file_id: &str) -> Result<(), BlobStoreError> {
            if self.fail_delete {
                return Err(BlobStoreError::Delete("boom".into()));
            }
            self.deletes.lock().unwrap().push(file_id.to_string());
            Ok(())
        }
    }

    fn image() -> ImageUpload {
        ImageUpload {
            filename: "sneaker-a.png".to_string(),
            content_type: "image/png".to_string(),
            bytes: vec![1, 2, 3],
        }
    }

    fn form() -> ProductForm {
        ProductForm {
            name: Some("Sneaker A".to_string()),
            price: Some("5000".to_string()),
            category: Some("shoes".to_string()),
            size: Some("42".to_string()),
            description: None,
            disabled_sizes: Some("[\"38\"]".to_string()),
        }
    }

    fn catalog(blob: MockBlobStore) -> CatalogServiceImpl<MockProductsRepo, MockBlobStore> {
        CatalogServiceImpl::new(MockProductsRepo::default(), blob)
    }

    #[tokio::test]
    async fn test_add_product_requires_image_and_fields() {
        let svc = catalog(MockBlobStore::default());
        assert!(matches!(
            svc.add_product(None, form()).await,
            Err(ServiceError::InvalidArgument(_))
        ));

        let mut missing = form();
        missing.category = None;
        assert!(matches!(
            svc.add_product(Some(image()), missing).await,
            Err(ServiceError::InvalidArgument(_))
        ));

        let mut bad_price = form();
        bad_price.price = Some("a lot".to_string());
        assert!(matches!(
            svc.add_product(Some(image()), bad_price).await,
            Err(ServiceError::InvalidArgument(_))
        ));

        // None of the rejects reached the blob store.
        assert_eq!(svc.blob_store.uploads.load(Ordering::SeqCst), 0);
        assert!(svc.products_repo.rows.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_product_aborts_on_upload_failure() {
        let svc = catalog(MockBlobStore {
            fail_upload: true,
            ..MockBlobStore::default()
        });
        let err = svc.add_product(Some(image()), form()).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Upstream {
                kind: UpstreamKind::BlobUpload,
                ..
            }
        ));
        // The catalog row must not exist when the upload failed.
        assert!(svc.products_repo.rows.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_product_stores_blob_reference() {
        let svc = catalog(MockBlobStore::default());
        svc.add_product(Some(image()), form()).await.unwrap();
        let rows = svc.products_repo.rows.lock().unwrap();
        assert_eq!(rows.len(), 1);
        let (_, product) = &rows[0];
        assert_eq!(product.image, "https://blobs.example.com/sneaker-a.png");
        assert_eq!(product.file_id, "fid-sneaker-a.png");
        assert_eq!(product.price, 5000.0);
    }

    #[tokio::test]
    async fn test_delete_product_keeps_row_on_blob_failure() {
        let svc = catalog(MockBlobStore {
            fail_delete: true,
            ..MockBlobStore::default()
        });
        svc.add_product(Some(image()), form()).await.unwrap();

        let err = svc.delete_product(1).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Upstream {
                kind: UpstreamKind::BlobDelete,
                ..
            }
        ));
        // The row survives a failed blob delete and stays fetchable.
        assert_eq!(svc.products_repo.rows.lock().unwrap().len(), 1);
        assert_eq!(svc.list_products().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_product_removes_blob_then_row() {
        let svc = catalog(MockBlobStore::default());
        svc.add_product(Some(image()), form()).await.unwrap();
        svc.delete_product(1).await.unwrap();
        assert!(svc.products_repo.rows.lock().unwrap().is_empty());
        assert_eq!(
            svc.blob_store.deletes.lock().unwrap().as_slice(),
            &["fid-sneaker-a.png".to_string()]
        );
    }

    #[tokio::test]
    async fn test_delete_product_without_blob_skips_collaborator() {
        let svc = catalog(MockBlobStore::default());
        svc.products_repo.rows.lock().unwrap().push((
            7,
            NewProduct {
                name: "Legacy".to_string(),
                price: 1.0,
                category: "misc".to_string(),
                image: String::new(),
                file_id: String::new(),
                size: "40".to_string(),
                description: None,
                disabled_sizes: None,
            },
        ));
        svc.products_repo.file_ids.lock().unwrap().insert(7, None);

        svc.delete_product(7).await.unwrap();
        assert!(svc.blob_store.deletes.lock().unwrap().is_empty());
        assert!(svc.products_repo.rows.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_missing_product() {
        let svc = catalog(MockBlobStore::default());
        assert!(matches!(
            svc.delete_product(42).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_product_checks_existence() {
        let svc = catalog(MockBlobStore::default());
        assert!(matches!(
            svc.update_product(42, ProductUpdate::default()).await,
            Err(ServiceError::NotFound(_))
        ));

        svc.add_product(Some(image()), form()).await.unwrap();
        svc.update_product(
            1,
            ProductUpdate {
                price: Some(5500.0),
                ..ProductUpdate::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(svc.products_repo.rows.lock().unwrap()[0].1.price, 5500.0);
    }

    struct MockAdminsRepo {
        admin: Admin,
    }

    #[async_trait]
    impl AdminsRepository for MockAdminsRepo {
        async fn get_by_email(&self, email: &str) -> Result<Admin, RepositoryError> {
            if self.admin.email == email {
                Ok(self.admin.clone())
            } else {
                Err(RepositoryError::NotFound)
            }
        }
    }

    fn auth_service(password: &str) -> (AdminAuthImpl<MockAdminsRepo>, AuthGate) {
        let gate = AuthGate::new(
            "test-secret",
            "storefront-test",
            std::time::Duration::from_secs(3600),
        );
        let admin = Admin {
            id: 1,
            email: "admin@example.com".to_string(),
            password_hash: gate.hash_password(password).unwrap(),
        };
        (
            AdminAuthImpl::new(MockAdminsRepo { admin }, gate.clone()),
            gate,
        )
    }

    #[tokio::test]
    async fn test_login_issues_verifiable_token() {
        let (svc, gate) = auth_service("hunter2");
        let token = svc.login("admin@example.com", "hunter2").await.unwrap();
        let claims = gate.verify_token(&token).unwrap();
        assert_eq!(claims.sub, "admin@example.com");
    }

    #[tokio::test]
    async fn test_login_rejects_bad_credentials_uniformly() {
        let (svc, _) = auth_service("hunter2");
        assert!(matches!(
            svc.login("admin@example.com", "wrong").await,
            Err(ServiceError::Unauthorized(_))
        ));
        assert!(matches!(
            svc.login("nobody@example.com", "hunter2").await,
            Err(ServiceError::Unauthorized(_))
        ));
        assert!(matches!(
            svc.login("", "hunter2").await,
            Err(ServiceError::InvalidArgument(_))
        ));
    }
}
