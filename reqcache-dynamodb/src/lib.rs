//! A `Storage` implementation backed by DynamoDB.
//!
//! One table per `cache_name`, partition key `cache_key` (string), value
//! stored as a binary attribute. DynamoDB items are capped at 400 KB;
//! anything over that is logged and skipped rather than attempted, since
//! the write would be rejected by the service anyway.

use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;

use reqcache::error::{CacheError, Result};
use reqcache::storage::Storage;

/// DynamoDB's hard per-item size ceiling.
const MAX_ITEM_BYTES: usize = 400 * 1024;

/// A DynamoDB-backed [`Storage`] namespace, one table per `(cache_name,
/// namespace)` pair.
pub struct DynamoDbBackend {
    client: Client,
    table: String,
}

impl DynamoDbBackend {
    /// Wraps an existing client, targeting `<cache_name>_<namespace>`.
    pub fn new(client: Client, cache_name: &str, namespace: &str) -> Self {
        Self { client, table: format!("{cache_name}_{namespace}") }
    }
}

#[async_trait]
impl Storage for DynamoDbBackend {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table)
            .key("cache_key", AttributeValue::S(key.to_string()))
            .send()
            .await
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))?;

        let Some(item) = output.item else { return Ok(None) };
        match item.get("value") {
            Some(AttributeValue::B(blob)) => Ok(Some(blob.clone().into_inner())),
            _ => Ok(None),
        }
    }

    async fn write(&self, key: &str, value: Vec<u8>) -> Result<()> {
        if value.len() > MAX_ITEM_BYTES {
            log::warn!(
                "skipping write of {} bytes for key {key}: exceeds DynamoDB's {MAX_ITEM_BYTES}-byte item limit",
                value.len()
            );
            return Err(CacheError::OversizedItem {
                limit: MAX_ITEM_BYTES,
                detail: format!("key {key} is {} bytes", value.len()),
            });
        }

        self.client
            .put_item()
            .table_name(&self.table)
            .item("cache_key", AttributeValue::S(key.to_string()))
            .item("value", AttributeValue::B(value.into()))
            .send()
            .await
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete_item()
            .table_name(&self.table)
            .key("cache_key", AttributeValue::S(key.to_string()))
            .send()
            .await
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut last_key = None;
        loop {
            let mut request = self.client.scan().table_name(&self.table).projection_expression("cache_key");
            if let Some(start) = last_key.take() {
                request = request.set_exclusive_start_key(Some(start));
            }
            let output = request.send().await.map_err(|e| CacheError::BackendUnavailable(e.to_string()))?;
            for item in output.items.unwrap_or_default() {
                if let Some(AttributeValue::S(key)) = item.get("cache_key") {
                    keys.push(key.clone());
                }
            }
            last_key = output.last_evaluated_key;
            if last_key.is_none() {
                break;
            }
        }
        Ok(keys)
    }

    async fn values(&self) -> Result<Vec<Vec<u8>>> {
        let mut values = Vec::new();
        let mut last_key = None;
        loop {
            let mut request = self.client.scan().table_name(&self.table);
            if let Some(start) = last_key.take() {
                request = request.set_exclusive_start_key(Some(start));
            }
            let output = request.send().await.map_err(|e| CacheError::BackendUnavailable(e.to_string()))?;
            for item in output.items.unwrap_or_default() {
                if let Some(AttributeValue::B(blob)) = item.get("value") {
                    values.push(blob.clone().into_inner());
                }
            }
            last_key = output.last_evaluated_key;
            if last_key.is_none() {
                break;
            }
        }
        Ok(values)
    }

    async fn clear(&self) -> Result<()> {
        for key in self.keys().await? {
            self.delete(&key).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_limit_matches_dynamodb_s_documented_ceiling() {
        assert_eq!(MAX_ITEM_BYTES, 400 * 1024);
    }
}
