use super::{like_pattern, ProductStore, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{NewProduct, Pagination, Product, ProductPage, ProductUpdate};
use sqlx::{FromRow, PgPool};
use tracing::{debug, info, warn};
use uuid::Uuid;

const PRODUCT_COLUMNS: &str =
    "id, name, description, price, image_url, revision, created_at, updated_at";

#[derive(Debug, FromRow)]
struct ProductRow {
    id: Uuid,
    name: String,
    description: String,
    price: f64,
    image_url: Option<String>,
    revision: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        Product {
            id: row.id,
            name: row.name,
            description: row.description,
            price: row.price,
            image_url: row.image_url,
            revision: row.revision,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// PostgreSQL implementation of the product store
pub struct PostgresProductStore {
    pool: PgPool,
}

impl PostgresProductStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the bundled schema migrations
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        info!("Product store migrations applied");
        Ok(())
    }

    /// Get the database pool (useful for testing)
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ProductStore for PostgresProductStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn create(&self, product: &NewProduct) -> Result<Product, StoreError> {
        let id = Uuid::new_v4();

        let row = sqlx::query_as::<_, ProductRow>(&format!(
            r#"
            INSERT INTO products (id, name, description, price, image_url, revision, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, 1, NOW(), NOW())
            RETURNING {}
            "#,
            PRODUCT_COLUMNS
        ))
        .bind(id)
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.price)
        .bind(&product.image_url)
        .fetch_one(&self.pool)
        .await?;

        debug!(product_id = %id, "Inserted product at revision 1");
        Ok(row.into())
    }

    async fn update(&self, update: &ProductUpdate) -> Result<Product, StoreError> {
        // Compare-and-swap on the revision column
        let row = sqlx::query_as::<_, ProductRow>(&format!(
            r#"
            UPDATE products
            SET name = $3, description = $4, price = $5, image_url = $6,
                revision = revision + 1, updated_at = NOW()
            WHERE id = $1 AND revision = $2
            RETURNING {}
            "#,
            PRODUCT_COLUMNS
        ))
        .bind(update.id)
        .bind(update.expected_revision)
        .bind(&update.attributes.name)
        .bind(&update.attributes.description)
        .bind(update.attributes.price)
        .bind(&update.attributes.image_url)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            debug!(
                product_id = %update.id,
                revision = row.revision,
                "Updated product"
            );
            return Ok(row.into());
        }

        let current: Option<i64> = sqlx::query_scalar("SELECT revision FROM products WHERE id = $1")
            .bind(update.id)
            .fetch_optional(&self.pool)
            .await?;

        match current {
            None => Err(StoreError::NotFound(update.id)),
            Some(actual) => {
                warn!(
                    product_id = %update.id,
                    expected = update.expected_revision,
                    actual,
                    "Revision conflict"
                );
                Err(StoreError::Conflict {
                    id: update.id,
                    expected: update.expected_revision,
                    actual,
                })
            }
        }
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Product>, StoreError> {
        let row = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {} FROM products WHERE id = $1",
            PRODUCT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Product::from))
    }

    async fn search(
        &self,
        query: &str,
        pagination: Pagination,
    ) -> Result<ProductPage, StoreError> {
        let pattern = like_pattern(query);

        let total_count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM products
            WHERE name ILIKE $1 OR description ILIKE $1
            "#,
        )
        .bind(&pattern)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query_as::<_, ProductRow>(&format!(
            r#"
            SELECT {}
            FROM products
            WHERE name ILIKE $1 OR description ILIKE $1
            ORDER BY created_at DESC, id
            LIMIT $2 OFFSET $3
            "#,
            PRODUCT_COLUMNS
        ))
        .bind(&pattern)
        .bind(pagination.limit)
        .bind(pagination.offset)
        .fetch_all(&self.pool)
        .await?;

        debug!(
            query,
            total_count,
            returned = rows.len(),
            "Searched products"
        );

        Ok(ProductPage {
            items: rows.into_iter().map(Product::from).collect(),
            total_count,
            offset: pagination.offset,
            limit: pagination.limit,
        })
    }
}
