//! S3 client wrapper with the bucket-level operations the pipeline needs.

use std::collections::BTreeMap;

use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use maktaba::{Error, Result};
use tracing::{debug, info, warn};

use crate::keys::{content_type_for, embeddings_key, metadata_key, raw_key, raw_prefix};
use crate::zip_bundle::build_zip;

/// Connection settings for an S3-compatible endpoint.
#[derive(Debug, Clone)]
pub struct S3Config {
    /// Full endpoint URL, e.g. `https://s3.us-west-004.backblazeb2.com`.
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
}

/// Object store adapter over one bucket.
#[derive(Clone)]
pub struct ObjectStore {
    client: Client,
    bucket: String,
    endpoint_host: String,
}

impl ObjectStore {
    /// Connect to an S3-compatible endpoint with explicit credentials.
    pub fn connect(config: &S3Config) -> Result<Self> {
        if config.endpoint.is_empty() || config.bucket.is_empty() {
            return Err(Error::config("S3 endpoint and bucket are required"));
        }

        let credentials = Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            None,
            None,
            "maktaba",
        );
        let sdk_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .endpoint_url(config.endpoint.clone())
            .credentials_provider(credentials)
            .build();

        let endpoint_host = strip_scheme(&config.endpoint);
        info!(endpoint = %config.endpoint, bucket = %config.bucket, "S3 client initialized");

        Ok(Self {
            client: Client::from_conf(sdk_config),
            bucket: config.bucket.clone(),
            endpoint_host,
        })
    }

    /// Wrap an existing client; used by tests and local stacks.
    #[must_use]
    pub fn with_client(client: Client, bucket: &str, endpoint_host: &str) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            endpoint_host: endpoint_host.to_string(),
        }
    }

    /// Public URL of a key: `https://<bucket>.<endpoint_host>/<key>`.
    #[must_use]
    pub fn public_url(&self, key: &str) -> String {
        format!("https://{}.{}/{}", self.bucket, self.endpoint_host, key)
    }

    // ============== Primitive operations ==============

    pub async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| Error::storage(format!("S3 put failed for {key}: {e}")))?;
        Ok(())
    }

    /// Fetch an object; `Ok(None)` when the key does not exist.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => {
                let bytes = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| Error::storage(format!("S3 read failed for {key}: {e}")))?;
                Ok(Some(bytes.into_bytes().to_vec()))
            }
            Err(e) if e.to_string().contains("NoSuchKey") => Ok(None),
            Err(e) => Err(Error::storage(format!("S3 get failed for {key}: {e}"))),
        }
    }

    /// List keys under a prefix, following continuation tokens.
    pub async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut req = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);
            if let Some(token) = continuation_token {
                req = req.continuation_token(token);
            }

            let output = req
                .send()
                .await
                .map_err(|e| Error::storage(format!("S3 list failed for {prefix}: {e}")))?;

            if let Some(contents) = output.contents {
                keys.extend(contents.into_iter().filter_map(|obj| obj.key));
            }

            match output.next_continuation_token {
                Some(token) => continuation_token = Some(token),
                None => break,
            }
        }

        keys.sort();
        Ok(keys)
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Error::storage(format!("S3 delete failed for {key}: {e}")))?;
        Ok(())
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.head(key).await?.is_some())
    }

    /// HEAD an object; `Ok(Some(content_length))` when present.
    pub async fn head(&self, key: &str) -> Result<Option<i64>> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => Ok(Some(output.content_length.unwrap_or(0))),
            Err(e) => {
                let msg = e.to_string();
                if msg.contains("NotFound") || msg.contains("NoSuchKey") || msg.contains("404") {
                    Ok(None)
                } else {
                    Err(Error::storage(format!("S3 head failed for {key}: {e}")))
                }
            }
        }
    }

    // ============== Book-level operations ==============

    /// Whether any raw page of the book is in the bucket.
    pub async fn book_exists(&self, book_id: i64) -> Result<bool> {
        Ok(!self.list(&raw_prefix(book_id)).await?.is_empty())
    }

    /// Public URLs of the book's raw pages, in filename order.
    pub async fn raw_file_urls(&self, book_id: i64) -> Result<Vec<String>> {
        let keys = self.list(&raw_prefix(book_id)).await?;
        Ok(keys.iter().map(|k| self.public_url(k)).collect())
    }

    /// Public URL of the metadata document, when it has been uploaded.
    pub async fn metadata_url_if_exists(&self, book_id: i64) -> Result<Option<String>> {
        let key = metadata_key(book_id);
        Ok(self.head(&key).await?.map(|_| self.public_url(&key)))
    }

    /// Upload the raw pages of one book. Returns the public URLs in
    /// filename order.
    pub async fn upload_raw_files(
        &self,
        book_id: i64,
        files: &BTreeMap<String, Vec<u8>>,
    ) -> Result<Vec<String>> {
        let mut urls = Vec::with_capacity(files.len());
        for (filename, content) in files {
            let key = raw_key(book_id, filename);
            self.put(&key, content.clone(), content_type_for(filename))
                .await?;
            urls.push(self.public_url(&key));
        }
        info!(book_id, file_count = urls.len(), "Uploaded raw files");
        Ok(urls)
    }

    /// Upload the processed metadata document. Returns its public URL.
    pub async fn upload_metadata(
        &self,
        book_id: i64,
        metadata: &maktaba::types::ProcessedBook,
    ) -> Result<String> {
        let key = metadata_key(book_id);
        let body = serde_json::to_vec_pretty(metadata)?;
        self.put(&key, body, "application/json; charset=utf-8")
            .await?;
        debug!(book_id, key = %key, "Uploaded metadata");
        Ok(self.public_url(&key))
    }

    /// Upload the embedded-chunks JSONL mirror. Returns its public URL.
    pub async fn upload_embeddings_jsonl(&self, book_id: i64, jsonl: String) -> Result<String> {
        let key = embeddings_key(book_id);
        self.put(&key, jsonl.into_bytes(), "application/x-ndjson; charset=utf-8")
            .await?;
        Ok(self.public_url(&key))
    }

    /// Delete everything the bucket holds for one book. Returns true
    /// when at least one object was removed.
    pub async fn delete_book(&self, book_id: i64) -> Result<bool> {
        let mut deleted = 0usize;

        for key in self.list(&raw_prefix(book_id)).await? {
            self.delete(&key).await?;
            deleted += 1;
        }
        for key in [metadata_key(book_id), embeddings_key(book_id)] {
            if self.head(&key).await?.is_some() {
                self.delete(&key).await?;
                deleted += 1;
            }
        }

        info!(book_id, deleted_objects = deleted, "Deleted book from object store");
        Ok(deleted > 0)
    }

    // ============== ZIP downloads ==============

    /// Bundle the raw pages of the given books into one ZIP, with
    /// entries named `<book_id>/<filename>`. Books without raw files are
    /// skipped with a warning.
    pub async fn download_books_as_zip(&self, book_ids: &[i64]) -> Result<(Vec<u8>, String)> {
        let mut entries = Vec::new();
        for &book_id in book_ids {
            let keys = self.list(&raw_prefix(book_id)).await?;
            if keys.is_empty() {
                warn!(book_id, "No raw files found for book, skipping");
                continue;
            }
            for key in keys {
                if let Some(content) = self.get(&key).await? {
                    let filename = key.rsplit('/').next().unwrap_or(&key).to_string();
                    entries.push((format!("{book_id}/{filename}"), content));
                }
            }
        }
        Ok((build_zip(&entries)?, zip_filename("book", book_ids)))
    }

    /// Bundle metadata documents into one ZIP (`<book_id>.json`).
    pub async fn download_metadata_as_zip(&self, book_ids: &[i64]) -> Result<(Vec<u8>, String)> {
        let mut entries = Vec::new();
        for &book_id in book_ids {
            match self.get(&metadata_key(book_id)).await? {
                Some(content) => entries.push((format!("{book_id}.json"), content)),
                None => warn!(book_id, "Metadata not found for book, skipping"),
            }
        }
        Ok((build_zip(&entries)?, zip_filename("metadata", book_ids)))
    }

    /// Bundle embeddings JSONL mirrors into one ZIP (`<book_id>.jsonl`).
    pub async fn download_embeddings_as_zip(&self, book_ids: &[i64]) -> Result<(Vec<u8>, String)> {
        let mut entries = Vec::new();
        for &book_id in book_ids {
            match self.get(&embeddings_key(book_id)).await? {
                Some(content) => entries.push((format!("{book_id}.jsonl"), content)),
                None => warn!(book_id, "Embeddings not found for book, skipping"),
            }
        }
        Ok((build_zip(&entries)?, zip_filename("embeddings", book_ids)))
    }
}

fn strip_scheme(endpoint: &str) -> String {
    endpoint
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/')
        .to_string()
}

fn zip_filename(kind: &str, book_ids: &[i64]) -> String {
    match book_ids {
        [only] => format!("{kind}_{only}.zip"),
        many => {
            let joined = many
                .iter()
                .take(5)
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("-");
            format!("{kind}s_{joined}.zip")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_scheme() {
        assert_eq!(
            strip_scheme("https://s3.us-west-004.backblazeb2.com"),
            "s3.us-west-004.backblazeb2.com"
        );
        assert_eq!(strip_scheme("http://localhost:9000/"), "localhost:9000");
    }

    #[test]
    fn test_zip_filenames() {
        assert_eq!(zip_filename("book", &[42]), "book_42.zip");
        assert_eq!(zip_filename("metadata", &[1, 2, 3]), "metadatas_1-2-3.zip");
        // Long lists are truncated to the first five ids.
        assert_eq!(
            zip_filename("book", &[1, 2, 3, 4, 5, 6, 7]),
            "books_1-2-3-4-5.zip"
        );
    }

    #[test]
    fn test_connect_requires_endpoint_and_bucket() {
        let config = S3Config {
            endpoint: String::new(),
            access_key: "k".into(),
            secret_key: "s".into(),
            bucket: "islamic-library".into(),
        };
        assert!(ObjectStore::connect(&config).is_err());
    }

    #[test]
    fn test_public_url_shape() {
        let config = S3Config {
            endpoint: "https://s3.us-west-004.backblazeb2.com".into(),
            access_key: "k".into(),
            secret_key: "s".into(),
            bucket: "islamic-library".into(),
        };
        let store = ObjectStore::connect(&config).unwrap();
        assert_eq!(
            store.public_url("raw/42/001.htm"),
            "https://islamic-library.s3.us-west-004.backblazeb2.com/raw/42/001.htm"
        );
    }
}
