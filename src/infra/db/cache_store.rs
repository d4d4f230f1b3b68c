//! Rendered HTML kept in the `content_block_cache` table.

use async_trait::async_trait;
use sqlx::postgres::PgPool;

use crate::cache::{CacheKey, CacheStore, CacheStoreError};

#[derive(Clone)]
pub struct PostgresCacheStore {
    pool: PgPool,
}

impl PostgresCacheStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Drop every entry whose key starts with `prefix`.
    pub async fn purge_prefix(&self, prefix: &str) -> Result<u64, CacheStoreError> {
        let result = sqlx::query("DELETE FROM content_block_cache WHERE key LIKE $1")
            .bind(like_prefix(prefix))
            .execute(&self.pool)
            .await
            .map_err(CacheStoreError::backend)?;
        Ok(result.rows_affected())
    }
}

fn like_prefix(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for ch in prefix.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

#[async_trait]
impl CacheStore for PostgresCacheStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<String>, CacheStoreError> {
        sqlx::query_scalar::<_, String>("SELECT html FROM content_block_cache WHERE key = $1")
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(CacheStoreError::backend)
    }

    async fn set(&self, key: &CacheKey, html: &str) -> Result<(), CacheStoreError> {
        sqlx::query(
            r#"
            INSERT INTO content_block_cache (key, html)
            VALUES ($1, $2)
            ON CONFLICT (key) DO UPDATE SET html = EXCLUDED.html, updated_at = now()
            "#,
        )
        .bind(key.as_str())
        .bind(html)
        .execute(&self.pool)
        .await
        .map_err(CacheStoreError::backend)?;
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<(), CacheStoreError> {
        sqlx::query("DELETE FROM content_block_cache WHERE key = $1")
            .bind(key.as_str())
            .execute(&self.pool)
            .await
            .map_err(CacheStoreError::backend)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::like_prefix;

    #[test]
    fn like_prefix_escapes_wildcards() {
        assert_eq!(like_prefix("content_blocks"), "content\\_blocks%");
        assert_eq!(like_prefix("a%b"), "a\\%b%");
    }
}
