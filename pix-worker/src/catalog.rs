use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::CatalogError;
use crate::types::CatalogRecord;

const UNIQUE_VIOLATION: &str = "23505";

#[async_trait]
pub trait Catalog: Send + Sync {
    /// Create the record keyed by `(partition_key, row_key)`. There is no upsert: an
    /// existing key is reported as `CatalogError::Conflict` and left untouched.
    async fn create(&self, record: &CatalogRecord) -> Result<(), CatalogError>;
}

/// Catalog backed by the `products` table, see `migrations/`.
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Catalog for PgCatalog {
    async fn create(&self, record: &CatalogRecord) -> Result<(), CatalogError> {
        let result = sqlx::query(
            r#"
INSERT INTO products
    (partition_key, row_key, name, brand, price, quantity_available, image_url, created_at)
VALUES
    ($1, $2, $3, $4, $5, $6, $7, NOW())
            "#,
        )
        .bind(&record.partition_key)
        .bind(&record.row_key)
        .bind(&record.name)
        .bind(&record.brand)
        .bind(record.price)
        .bind(record.quantity_available)
        .bind(&record.image_url)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(CatalogError::Conflict {
                partition_key: record.partition_key.clone(),
                row_key: record.row_key.clone(),
            }),
            Err(e) => Err(CatalogError::WriteFailed(e.to_string())),
        }
    }
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db_error) => {
            db_error.code().as_deref() == Some(UNIQUE_VIOLATION)
                || db_error.kind() == sqlx::error::ErrorKind::UniqueViolation
        }
        _ => false,
    }
}

/// In-memory catalog with the same create-only semantics as `PgCatalog`.
#[derive(Default)]
pub struct MemoryCatalog {
    records: Mutex<HashMap<(String, String), CatalogRecord>>,
    fail_with: Mutex<Option<CatalogError>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `create` call fail with `error`.
    pub fn fail_with(self, error: CatalogError) -> Self {
        *self.fail_with.lock().expect("poisoned lock") = Some(error);
        self
    }

    pub fn get(&self, partition_key: &str, row_key: &str) -> Option<CatalogRecord> {
        self.records
            .lock()
            .expect("poisoned lock")
            .get(&(partition_key.to_owned(), row_key.to_owned()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("poisoned lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn create(&self, record: &CatalogRecord) -> Result<(), CatalogError> {
        if let Some(error) = self.fail_with.lock().expect("poisoned lock").clone() {
            return Err(error);
        }

        let key = (record.partition_key.clone(), record.row_key.clone());
        let mut records = self.records.lock().expect("poisoned lock");
        if records.contains_key(&key) {
            return Err(CatalogError::Conflict {
                partition_key: key.0,
                row_key: key.1,
            });
        }
        records.insert(key, record.clone());
        Ok(())
    }
}
