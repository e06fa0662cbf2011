//! # Data Repository Layer
//!
//! This module provides repository traits and PostgreSQL implementations
//! for all entities: orders, tracking lines, products, admins.
//! Bulk status updates are issued as single statements (and are therefore
//! atomic); batch assignment exposes a transactional variant so the
//! service layer can make the per-id loop all-or-nothing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use model::{
    Admin, BatchRef, ManageRow, NewProduct, Order, OrderDetailRow, OrderId, Product,
    ProductSummary, ProductUpdate, StatusTag, TrackingLine,
};
use thiserror::Error;
use tokio_postgres::{Client, Row, Transaction};

/// # RepositoryError
///
/// Error types that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database-related errors, wrapping the underlying PostgreSQL error
    #[error("Database error: {0}")]
    Db(#[from] tokio_postgres::Error),
    /// No result found.
    #[error("Not found")]
    NotFound,
}

/// # OrdersRepository
///
/// Repository interface for order headers: status-filtered listing, header
/// lookup, the joined dashboard queries, and the status/batch mutations
/// driven by the batch controller.
#[async_trait]
pub trait OrdersRepository: Send + Sync {
    /// All order rows with exactly the given status.
    async fn get_by_status(&self, status: &str) -> Result<Vec<Order>, RepositoryError>;

    /// The order header, or [`RepositoryError::NotFound`].
    async fn get_by_id(&self, order_id: &OrderId) -> Result<Order, RepositoryError>;

    /// Flat orders-to-tracking LEFT JOIN rows, newest order first.
    /// Orders without tracking lines appear once with NULL line columns.
    async fn detail_rows(&self) -> Result<Vec<OrderDetailRow>, RepositoryError>;

    /// One summary row per order with a MAX-aggregate representative
    /// tracking line; unbatched orders sort ahead of any named batch.
    async fn manage_rows(&self) -> Result<Vec<ManageRow>, RepositoryError>;

    /// Sets the status for every order in `order_ids` in one statement.
    /// Returns the number of rows that matched.
    async fn bulk_update_status(
        &self,
        order_ids: &[String],
        status: &StatusTag,
    ) -> Result<u64, RepositoryError>;

    /// Sets the status of a single order. Returns the matched-row count.
    async fn update_status(
        &self,
        order_id: &OrderId,
        status: &StatusTag,
    ) -> Result<u64, RepositoryError>;

    /// Sets the status of a single order and stamps `updated_at`.
    async fn update_status_touched(
        &self,
        order_id: &OrderId,
        status: &StatusTag,
        updated_at: DateTime<Utc>,
    ) -> Result<u64, RepositoryError>;

    /// Sets the status for every order in the given batch bucket in one
    /// statement. [`BatchRef::Unbatched`] targets `batch IS NULL` rows only.
    async fn update_status_by_batch(
        &self,
        batch: &BatchRef,
        status: &StatusTag,
    ) -> Result<u64, RepositoryError>;

    /// Assigns one order to a batch inside the caller's transaction.
    async fn assign_batch_tx(
        &self,
        tx: &Transaction<'_>,
        order_id: &str,
        label: &str,
    ) -> Result<u64, RepositoryError>;
}

/// PostgreSQL implementation of the OrdersRepository trait.
pub struct PgOrdersRepository {
    /// PostgreSQL client for database operations
    db: Client,
}

impl PgOrdersRepository {
    pub fn new(db: Client) -> Self {
        Self { db }
    }
}

fn order_from_row(row: &Row) -> Order {
    Order {
        order_id: row.get("order_id"),
        status: row.get("status"),
        batch: row.get("batch"),
        date_created: row.get("date_created"),
        estimated_time: row.get("estimated_time"),
        updated_at: row.get("updated_at"),
    }
}

#[async_trait]
impl OrdersRepository for PgOrdersRepository {
    async fn get_by_status(&self, status: &str) -> Result<Vec<Order>, RepositoryError> {
        let query = r#"
            SELECT order_id, status, batch, date_created, estimated_time, updated_at
            FROM orders WHERE status = $1
            ORDER BY date_created DESC
        "#;
        let rows = self.db.query(query, &[&status]).await?;
        Ok(rows.iter().map(order_from_row).collect())
    }

    async fn get_by_id(&self, order_id: &OrderId) -> Result<Order, RepositoryError> {
        let query = r#"
            SELECT order_id, status, batch, date_created, estimated_time, updated_at
            FROM orders WHERE order_id = $1
        "#;
        let row = self.db.query_opt(query, &[&order_id.as_str()]).await?;
        match row {
            Some(row) => Ok(order_from_row(&row)),
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn detail_rows(&self) -> Result<Vec<OrderDetailRow>, RepositoryError> {
        let query = r#"
            SELECT o.order_id, o.status, o.batch, o.date_created, o.estimated_time,
                   t.customer_name, t.customer_email, t.customer_contact,
                   t.product_name, t.product_size, t.product_quantity,
                   t.total_amount, t.status AS line_status
            FROM orders o
            LEFT JOIN tracking t ON t.order_id = o.order_id
            ORDER BY o.date_created DESC
        "#;
        let rows = self.db.query(query, &[]).await?;
        Ok(rows
            .iter()
            .map(|row| OrderDetailRow {
                order_id: row.get("order_id"),
                status: row.get("status"),
                batch: row.get("batch"),
                date_created: row.get("date_created"),
                estimated_time: row.get("estimated_time"),
                customer_name: row.get("customer_name"),
                customer_email: row.get("customer_email"),
                customer_contact: row.get("customer_contact"),
                product_name: row.get("product_name"),
                product_size: row.get("product_size"),
                product_quantity: row.get("product_quantity"),
                total_amount: row.get("total_amount"),
                line_status: row.get("line_status"),
            })
            .collect())
    }

    async fn manage_rows(&self) -> Result<Vec<ManageRow>, RepositoryError> {
        // One representative line per order is enough for the summary
        // table; MAX picks it deterministically. `batch IS NOT NULL`
        // sorts false first, so unbatched orders lead.
        let query = r#"
            SELECT o.order_id, o.status, o.batch, o.date_created, o.estimated_time,
                   t.customer_name, t.customer_contact, t.customer_email, t.product_name
            FROM orders o
            JOIN (
                SELECT order_id,
                       MAX(customer_name) AS customer_name,
                       MAX(customer_contact) AS customer_contact,
                       MAX(customer_email) AS customer_email,
                       MAX(product_name) AS product_name
                FROM tracking
                GROUP BY order_id
            ) t ON t.order_id = o.order_id
            ORDER BY o.batch IS NOT NULL, o.batch, o.date_created DESC
        "#;
        let rows = self.db.query(query, &[]).await?;
        Ok(rows
            .iter()
            .map(|row| ManageRow {
                order_id: row.get("order_id"),
                status: row.get("status"),
                batch: row.get("batch"),
                date_created: row.get("date_created"),
                estimated_time: row.get("estimated_time"),
                customer_name: row.get("customer_name"),
                customer_contact: row.get("customer_contact"),
                customer_email: row.get("customer_email"),
                product_name: row.get("product_name"),
            })
            .collect())
    }

    async fn bulk_update_status(
        &self,
        order_ids: &[String],
        status: &StatusTag,
    ) -> Result<u64, RepositoryError> {
        let query = "UPDATE orders SET status = $1 WHERE order_id = ANY($2)";
        let affected = self
            .db
            .execute(query, &[&status.as_str(), &order_ids])
            .await?;
        Ok(affected)
    }

    async fn update_status(
        &self,
        order_id: &OrderId,
        status: &StatusTag,
    ) -> Result<u64, RepositoryError> {
        let query = "UPDATE orders SET status = $1 WHERE order_id = $2";
        let affected = self
            .db
            .execute(query, &[&status.as_str(), &order_id.as_str()])
            .await?;
        Ok(affected)
    }

    async fn update_status_touched(
        &self,
        order_id: &OrderId,
        status: &StatusTag,
        updated_at: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let query = "UPDATE orders SET status = $1, updated_at = $2 WHERE order_id = $3";
        let affected = self
            .db
            .execute(query, &[&status.as_str(), &updated_at, &order_id.as_str()])
            .await?;
        Ok(affected)
    }

    async fn update_status_by_batch(
        &self,
        batch: &BatchRef,
        status: &StatusTag,
    ) -> Result<u64, RepositoryError> {
        let affected = match batch {
            BatchRef::Unbatched => {
                let query = "UPDATE orders SET status = $1 WHERE batch IS NULL";
                self.db.execute(query, &[&status.as_str()]).await?
            }
            BatchRef::Named(label) => {
                let query = "UPDATE orders SET status = $1 WHERE batch = $2";
                self.db.execute(query, &[&status.as_str(), label]).await?
            }
        };
        Ok(affected)
    }

    async fn assign_batch_tx(
        &self,
        tx: &Transaction<'_>,
        order_id: &str,
        label: &str,
    ) -> Result<u64, RepositoryError> {
        let query = "UPDATE orders SET batch = $1 WHERE order_id = $2";
        let affected = tx.execute(query, &[&label, &order_id]).await?;
        Ok(affected)
    }
}

/// # TrackingRepository
///
/// Repository interface for per-order tracking lines. Lines are written
/// when an order is placed and only ever read here.
#[async_trait]
pub trait TrackingRepository: Send + Sync {
    /// All tracking lines belonging to the order, possibly empty.
    async fn get_by_order_id(&self, order_id: &OrderId)
    -> Result<Vec<TrackingLine>, RepositoryError>;
}

/// PostgreSQL implementation of the TrackingRepository trait.
pub struct PgTrackingRepository {
    /// PostgreSQL client for database operations
    db: Client,
}

impl PgTrackingRepository {
    pub fn new(db: Client) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TrackingRepository for PgTrackingRepository {
    async fn get_by_order_id(
        &self,
        order_id: &OrderId,
    ) -> Result<Vec<TrackingLine>, RepositoryError> {
        let query = r#"
            SELECT order_id, customer_name, customer_email, customer_contact,
                   product_name, product_size, product_quantity, total_amount, status
            FROM tracking WHERE order_id = $1
            ORDER BY id
        "#;
        let rows = self.db.query(query, &[&order_id.as_str()]).await?;
        Ok(rows
            .iter()
            .map(|row| TrackingLine {
                order_id: row.get("order_id"),
                customer_name: row.get("customer_name"),
                customer_email: row.get("customer_email"),
                customer_contact: row.get("customer_contact"),
                product_name: row.get("product_name"),
                product_size: row.get("product_size"),
                product_quantity: row.get("product_quantity"),
                total_amount: row.get("total_amount"),
                status: row.get("status"),
            })
            .collect())
    }
}

/// # ProductsRepository
///
/// Repository interface for the product catalog. The blob-store file id
/// never leaves this layer except through [`ProductsRepository::file_id`],
/// which the delete flow uses before touching the blob.
#[async_trait]
pub trait ProductsRepository: Send + Sync {
    async fn insert(&self, product: &NewProduct) -> Result<(), RepositoryError>;

    async fn list(&self) -> Result<Vec<Product>, RepositoryError>;

    async fn summaries(&self) -> Result<Vec<ProductSummary>, RepositoryError>;

    /// Partial update: `None` fields keep their current column value.
    /// Returns the matched-row count.
    async fn update(&self, id: i32, patch: &ProductUpdate) -> Result<u64, RepositoryError>;

    /// The stored blob file id for a product, or `None` when the product
    /// has no blob attached. [`RepositoryError::NotFound`] if the row
    /// itself is absent.
    async fn file_id(&self, id: i32) -> Result<Option<String>, RepositoryError>;

    async fn delete(&self, id: i32) -> Result<u64, RepositoryError>;
}

/// PostgreSQL implementation of the ProductsRepository trait.
pub struct PgProductsRepository {
    /// PostgreSQL client for database operations
    db: Client,
}

impl PgProductsRepository {
    pub fn new(db: Client) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ProductsRepository for PgProductsRepository {
    async fn insert(&self, product: &NewProduct) -> Result<(), RepositoryError> {
        let query = r#"
            INSERT INTO products (name, price, category, image, file_id, size, description, disabled_sizes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#;
        self.db
            .execute(
                query,
                &[
                    &product.name,
                    &product.price,
                    &product.category,
                    &product.image,
                    &product.file_id,
                    &product.size,
                    &product.description,
                    &product.disabled_sizes,
                ],
            )
            .await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Product>, RepositoryError> {
        let query = r#"
            SELECT id, name, price, category, image, size, description, disabled_sizes
            FROM products ORDER BY id
        "#;
        let rows = self.db.query(query, &[]).await?;
        Ok(rows
            .iter()
            .map(|row| Product {
                id: row.get("id"),
                name: row.get("name"),
                price: row.get("price"),
                category: row.get("category"),
                image: row.get("image"),
                size: row.get("size"),
                description: row.get("description"),
                disabled_sizes: row.get("disabled_sizes"),
            })
            .collect())
    }

    async fn summaries(&self) -> Result<Vec<ProductSummary>, RepositoryError> {
        let query = "SELECT id, name, price, image FROM products ORDER BY id";
        let rows = self.db.query(query, &[]).await?;
        Ok(rows
            .iter()
            .map(|row| ProductSummary {
                id: row.get("id"),
                name: row.get("name"),
                price: row.get("price"),
                image: row.get("image"),
            })
            .collect())
    }

    async fn update(&self, id: i32, patch: &ProductUpdate) -> Result<u64, RepositoryError> {
        let query = r#"
            UPDATE products SET
                name = COALESCE($2, name),
                price = COALESCE($3, price),
                description = COALESCE($4, description),
                category = COALESCE($5, category),
                size = COALESCE($6, size),
                disabled_sizes = COALESCE($7, disabled_sizes)
            WHERE id = $1
        "#;
        let affected = self
            .db
            .execute(
                query,
                &[
                    &id,
                    &patch.name,
                    &patch.price,
                    &patch.description,
                    &patch.category,
                    &patch.size,
                    &patch.disabled_sizes,
                ],
            )
            .await?;
        Ok(affected)
    }

    async fn file_id(&self, id: i32) -> Result<Option<String>, RepositoryError> {
        let query = "SELECT file_id FROM products WHERE id = $1";
        let row = self.db.query_opt(query, &[&id]).await?;
        match row {
            Some(row) => Ok(row.get("file_id")),
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn delete(&self, id: i32) -> Result<u64, RepositoryError> {
        let query = "DELETE FROM products WHERE id = $1";
        let affected = self.db.execute(query, &[&id]).await?;
        Ok(affected)
    }
}

/// # AdminsRepository
///
/// Repository interface for admin credential rows used by the auth gate.
#[async_trait]
pub trait AdminsRepository: Send + Sync {
    async fn get_by_email(&self, email: &str) -> Result<Admin, RepositoryError>;
}

/// PostgreSQL implementation of the AdminsRepository trait.
pub struct PgAdminsRepository {
    /// PostgreSQL client for database operations
    db: Client,
}

impl PgAdminsRepository {
    pub fn new(db: Client) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AdminsRepository for PgAdminsRepository {
    async fn get_by_email(&self, email: &str) -> Result<Admin, RepositoryError> {
        let query = "SELECT id, email, password_hash FROM admins WHERE email = $1";
        let row = self.db.query_opt(query, &[&email]).await?;
        match row {
            Some(row) => Ok(Admin {
                id: row.get("id"),
                email: row.get("email"),
                password_hash: row.get("password_hash"),
            }),
            None => Err(RepositoryError::NotFound),
        }
    }
}
