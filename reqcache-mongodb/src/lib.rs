//! A `Storage` implementation backed by MongoDB.
//!
//! `cache_name` selects the database; `responses` and `redirects` each
//! get their own collection, one document per key: `{_id: key, data:
//! <bytes>}`. A document's BSON body is capped well under MongoDB's
//! 16 MB document limit (`GRIDFS_THRESHOLD_BYTES`); entries at or above
//! it are written to a GridFS bucket instead and the collection document
//! carries only a reference, mirroring the same namespace-sharing
//! pattern the Redis and DynamoDB backends use for their own oversized-
//! item handling.

use async_trait::async_trait;
use futures_util::TryStreamExt;
use mongodb::bson::{doc, Binary, Bson, Document};
use mongodb::gridfs::GridFsBucket;
use mongodb::{Client, Collection};

use reqcache::error::{CacheError, Result};
use reqcache::storage::Storage;

/// Documents at or above this size are offloaded to GridFS, leaving
/// headroom under MongoDB's 16 MB document limit.
const GRIDFS_THRESHOLD_BYTES: usize = 8 * 1024 * 1024;

/// A MongoDB-backed [`Storage`] namespace.
pub struct MongoBackend {
    collection: Collection<Document>,
    bucket: GridFsBucket,
}

impl MongoBackend {
    /// Opens `<cache_name>`'s `<namespace>` collection and its shared
    /// GridFS bucket.
    pub fn new(client: &Client, cache_name: &str, namespace: &str) -> Self {
        let db = client.database(cache_name);
        let collection = db.collection::<Document>(namespace);
        let bucket = db.gridfs_bucket(None);
        Self { collection, bucket }
    }

    async fn read_gridfs(&self, filename: &str) -> Result<Option<Vec<u8>>> {
        let mut cursor = self
            .bucket
            .open_download_stream_by_name(filename, None)
            .await
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))?;
        let mut buf = Vec::new();
        use futures_util::AsyncReadExt;
        cursor
            .read_to_end(&mut buf)
            .await
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))?;
        Ok(Some(buf))
    }

    async fn delete_gridfs(&self, filename: &str) -> Result<()> {
        let mut cursor = self
            .bucket
            .find(doc! { "filename": filename }, None)
            .await
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))?;
        while let Some(file) =
            cursor.try_next().await.map_err(|e| CacheError::BackendUnavailable(e.to_string()))?
        {
            let _ = self.bucket.delete(file.id).await;
        }
        Ok(())
    }

    async fn write_gridfs(&self, filename: &str, value: Vec<u8>) -> Result<()> {
        self.delete_gridfs(filename).await?;
        let mut stream = self.bucket.open_upload_stream(filename, None);
        use futures_util::AsyncWriteExt;
        stream.write_all(&value).await.map_err(|e| CacheError::BackendUnavailable(e.to_string()))?;
        stream.close().await.map_err(|e| CacheError::BackendUnavailable(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl Storage for MongoBackend {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let filter = doc! { "_id": key };
        let found = self
            .collection
            .find_one(filter, None)
            .await
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))?;
        let Some(document) = found else { return Ok(None) };

        if let Some(Bson::Boolean(true)) = document.get("gridfs") {
            return self.read_gridfs(key).await;
        }
        match document.get("data") {
            Some(Bson::Binary(binary)) => Ok(Some(binary.bytes.clone())),
            _ => Ok(None),
        }
    }

    async fn write(&self, key: &str, value: Vec<u8>) -> Result<()> {
        if value.len() >= GRIDFS_THRESHOLD_BYTES {
            self.write_gridfs(key, value).await?;
            let document = doc! { "_id": key, "gridfs": true };
            self.collection
                .replace_one(doc! { "_id": key }, document, mongodb::options::ReplaceOptions::builder().upsert(true).build())
                .await
                .map_err(|e| CacheError::BackendUnavailable(e.to_string()))?;
            return Ok(());
        }

        let document = doc! {
            "_id": key,
            "data": Binary { subtype: mongodb::bson::spec::BinarySubtype::Generic, bytes: value },
        };
        self.collection
            .replace_one(doc! { "_id": key }, document, mongodb::options::ReplaceOptions::builder().upsert(true).build())
            .await
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.delete_gridfs(key).await?;
        self.collection
            .delete_one(doc! { "_id": key }, None)
            .await
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let options = mongodb::options::FindOptions::builder().projection(doc! { "_id": 1 }).build();
        let mut cursor = self
            .collection
            .find(doc! {}, options)
            .await
            .map_err(|e| CacheError::BackendUnavailable(e.to_string()))?;
        let mut keys = Vec::new();
        while let Some(document) =
            cursor.try_next().await.map_err(|e| CacheError::BackendUnavailable(e.to_string()))?
        {
            if let Some(Bson::String(key)) = document.get("_id") {
                keys.push(key.clone());
            }
        }
        Ok(keys)
    }

    async fn values(&self) -> Result<Vec<Vec<u8>>> {
        let keys = self.keys().await?;
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.read(&key).await? {
                values.push(value);
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
    fn gridfs_threshold_leaves_headroom_under_the_bson_document_limit() {
        const BSON_DOCUMENT_LIMIT: usize = 16 * 1024 * 1024;
        assert!(GRIDFS_THRESHOLD_BYTES < BSON_DOCUMENT_LIMIT);
    }
}
