use anyhow::{Result, Context};
use async_trait::async_trait;
use sqlx::{Pool, Postgres, postgres::PgPoolOptions};
use sqlx::types::Json;
use std::sync::Arc;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::cli::config::SinkSettings;
use crate::scrape::catalog::{ProductItem, ProductRecord};

/// Persistence sink for extracted product records.
///
/// Uniqueness by product code is the sink's concern: `save_records`
/// upserts, the extraction engine never deduplicates details.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProductStore: Send + Sync {
    /// Upsert a batch of records
    async fn save_records(&self, batch: &[ProductRecord]) -> Result<()>;

    /// Drop every stored record
    async fn clear_all(&self) -> Result<()>;

    /// Fetch one record by product code
    async fn get_by_code(&self, product_code: &str) -> Result<Option<ProductRecord>>;
}

/// Write records to the sink in fixed-size batches.
///
/// The batch size bounds both memory and the cost of a mid-run failure.
pub async fn save_in_batches(
    store: &dyn ProductStore,
    records: &[ProductRecord],
    batch_size: usize,
) -> Result<usize> {
    let mut flushed = 0;

    for batch in records.chunks(batch_size.max(1)) {
        store.save_records(batch).await?;
        flushed += 1;
        debug!("Flushed batch of {} records", batch.len());
    }

    Ok(flushed)
}

/// Factory for creating a ProductStore implementation
pub struct ProductStoreFactory;

impl ProductStoreFactory {
    /// Create a new ProductStore instance based on the settings
    pub async fn create(settings: &SinkSettings) -> Result<Arc<dyn ProductStore>> {
        match settings.storage_type.as_str() {
            "postgresql" => {
                let store = PostgresProductStore::new(settings).await?;
                Ok(Arc::new(store))
            }
            _ => {
                anyhow::bail!("Unsupported product sink type: {}", settings.storage_type);
            }
        }
    }
}

/// PostgreSQL implementation of ProductStore
pub struct PostgresProductStore {
    /// PostgreSQL connection pool
    pool: Pool<Postgres>,

    /// Schema name
    schema: String,

    /// Table name
    table: String,
}

impl PostgresProductStore {
    /// Create a new PostgreSQL product store
    pub async fn new(settings: &SinkSettings) -> Result<Self> {
        // Create connection pool
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&settings.connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        let store = Self {
            pool,
            schema: settings.schema_name.clone(),
            table: settings.table_name.clone(),
        };

        // Ensure the table exists
        store.ensure_table().await?;

        debug!("Connected to PostgreSQL product sink");

        Ok(store)
    }

    async fn ensure_table(&self) -> Result<()> {
        let query = format!(
            "CREATE TABLE IF NOT EXISTS {}.{} (
                product_code TEXT PRIMARY KEY,
                consumer_price BIGINT NOT NULL,
                seller_price BIGINT NOT NULL,
                shipping_cost BIGINT NOT NULL,
                items JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
            self.schema, self.table
        );

        sqlx::query(&query)
            .execute(&self.pool)
            .await
            .context(format!("Failed to create products table: {}", self.table))?;

        Ok(())
    }
}

#[async_trait]
impl ProductStore for PostgresProductStore {
    async fn save_records(&self, batch: &[ProductRecord]) -> Result<()> {
        let query = format!(
            "INSERT INTO {}.{} (product_code, consumer_price, seller_price, shipping_cost, items, updated_at)
             VALUES ($1, $2, $3, $4, $5, NOW())
             ON CONFLICT (product_code) DO UPDATE
             SET consumer_price = $2, seller_price = $3, shipping_cost = $4, items = $5, updated_at = NOW()",
            self.schema, self.table
        );

        for record in batch {
            sqlx::query(&query)
                .bind(&record.product_code)
                .bind(record.consumer_price)
                .bind(record.seller_price)
                .bind(record.shipping_cost)
                .bind(Json(&record.items))
                .execute(&self.pool)
                .await
                .context(format!("Failed to store product {}", record.product_code))?;
        }

        debug!("Stored batch of {} product records", batch.len());

        Ok(())
    }

    async fn clear_all(&self) -> Result<()> {
        let query = format!("TRUNCATE TABLE {}.{}", self.schema, self.table);

        sqlx::query(&query)
            .execute(&self.pool)
            .await
            .context("Failed to clear product records")?;

        debug!("Cleared all product records");

        Ok(())
    }

    async fn get_by_code(&self, product_code: &str) -> Result<Option<ProductRecord>> {
        let query = format!(
            "SELECT product_code, consumer_price, seller_price, shipping_cost, items
             FROM {}.{} WHERE product_code = $1",
            self.schema, self.table
        );

        #[derive(sqlx::FromRow)]
        struct Row {
            product_code: String,
            consumer_price: i64,
            seller_price: i64,
            shipping_cost: i64,
            items: Json<Vec<ProductItem>>,
        }

        let row = sqlx::query_as::<_, Row>(&query)
            .bind(product_code)
            .fetch_optional(&self.pool)
            .await
            .context(format!("Failed to query product {}", product_code))?;

        Ok(row.map(|row| ProductRecord {
            product_code: row.product_code,
            consumer_price: row.consumer_price,
            seller_price: row.seller_price,
            shipping_cost: row.shipping_cost,
            items: row.items.0,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Records batch sizes handed to the sink
    #[derive(Default)]
    struct RecordingStore {
        batches: Mutex<Vec<usize>>,
        saved: AtomicUsize,
    }

    #[async_trait]
    impl ProductStore for RecordingStore {
        async fn save_records(&self, batch: &[ProductRecord]) -> Result<()> {
            self.batches.lock().unwrap().push(batch.len());
            self.saved.fetch_add(batch.len(), Ordering::SeqCst);
            Ok(())
        }

        async fn clear_all(&self) -> Result<()> {
            Ok(())
        }

        async fn get_by_code(&self, _product_code: &str) -> Result<Option<ProductRecord>> {
            Ok(None)
        }
    }

    fn record(n: usize) -> ProductRecord {
        ProductRecord {
            product_code: format!("P{}", n),
            consumer_price: 1000,
            seller_price: 800,
            shipping_cost: 0,
            items: vec![],
        }
    }

    #[tokio::test]
    async fn batching_splits_123_records_into_50_50_23() {
        let store = RecordingStore::default();
        let records: Vec<_> = (0..123).map(record).collect();

        let flushes = save_in_batches(&store, &records, 50).await.unwrap();

        assert_eq!(flushes, 3);
        assert_eq!(*store.batches.lock().unwrap(), vec![50, 50, 23]);
        assert_eq!(store.saved.load(Ordering::SeqCst), 123);
    }

    #[tokio::test]
    async fn empty_input_flushes_nothing() {
        let store = RecordingStore::default();
        let flushes = save_in_batches(&store, &[], 50).await.unwrap();

        assert_eq!(flushes, 0);
        assert!(store.batches.lock().unwrap().is_empty());
    }
}
