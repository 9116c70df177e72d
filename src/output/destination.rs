//! Snapshot destinations (local disk, S3, R2, GCS, Azure)
//!
//! Every write is a single object-store `put`. On local disk that is a write
//! to a temporary file followed by a rename, so readers never observe a
//! partial object.

use crate::error::{Error, Result};
use bytes::Bytes;
use chrono::NaiveDate;
use object_store::aws::AmazonS3Builder;
use object_store::azure::MicrosoftAzureBuilder;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use std::sync::Arc;

/// Build a Hive-style partitioned path for a snapshot file
///
/// Format: `{dataset}/dt={YYYY-MM-DD}/{filename}`
///
/// Examples:
/// - `transactions/dt=2025-12-14/data.csv`
/// - `transactions/dt=2025-12-14/manifest.json`
pub fn build_partitioned_path(dataset: &str, partition: NaiveDate, filename: &str) -> String {
    format!("{}/{filename}", build_partitioned_dir(dataset, partition))
}

/// Build the partition directory (without filename)
///
/// Format: `{dataset}/dt={YYYY-MM-DD}`
pub fn build_partitioned_dir(dataset: &str, partition: NaiveDate) -> String {
    format!("{}/dt={}", dataset_dir(dataset), partition.format("%Y-%m-%d"))
}

/// Top-level snapshot directory of a dataset: `curated.daily` -> `curated_daily`
pub fn dataset_dir(dataset: &str) -> String {
    dataset.replace('.', "_")
}

/// Backend behind a destination URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Local,
    S3,
    /// Cloudflare R2 through the S3 API; `R2_ENDPOINT_URL` names the endpoint
    R2,
    Gcs,
    Azure,
}

impl StoreKind {
    /// Split a destination into backend and the remainder after `scheme://`
    fn detect(url: &str) -> (Self, &str) {
        match url.split_once("://") {
            Some(("s3", rest)) => (Self::S3, rest),
            Some(("r2", rest)) => (Self::R2, rest),
            Some(("gs", rest)) => (Self::Gcs, rest),
            Some(("az", rest)) => (Self::Azure, rest),
            Some(("file", rest)) => (Self::Local, rest),
            _ => (Self::Local, url),
        }
    }

    pub fn scheme(self) -> &'static str {
        match self {
            Self::Local => "file",
            Self::S3 => "s3",
            Self::R2 => "r2",
            Self::Gcs => "gs",
            Self::Azure => "az",
        }
    }
}

/// Where snapshot objects are written
#[derive(Debug, Clone)]
pub struct SnapshotDestination {
    store: Arc<dyn ObjectStore>,
    kind: StoreKind,
    /// Key prefix inside the bucket or container
    prefix: String,
    /// Destination as configured, used in returned locations
    root: String,
}

impl SnapshotDestination {
    /// Open a destination from `s3://`, `r2://`, `gs://`, `az://`,
    /// `file://` or a plain local path. Local directories are created.
    pub fn parse(url: &str) -> Result<Self> {
        let (kind, rest) = StoreKind::detect(url);
        if kind == StoreKind::Local {
            return Self::local(rest);
        }

        let (bucket, prefix) = split_bucket(rest, kind.scheme())?;
        let store = remote_store(kind, bucket).map_err(|e| {
            Error::config(format!("cannot open {} destination {url}: {e}", kind.scheme()))
        })?;

        Ok(Self {
            store,
            kind,
            prefix,
            root: url.trim_end_matches('/').to_string(),
        })
    }

    fn local(path: &str) -> Result<Self> {
        std::fs::create_dir_all(path).map_err(|e| Error::io(path, e))?;
        let store = LocalFileSystem::new_with_prefix(path)
            .map_err(|e| Error::config(format!("cannot open snapshot directory {path}: {e}")))?;

        Ok(Self {
            store: Arc::new(store),
            kind: StoreKind::Local,
            prefix: String::new(),
            root: path.trim_end_matches('/').to_string(),
        })
    }

    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    pub fn is_cloud(&self) -> bool {
        self.kind != StoreKind::Local
    }

    fn object_path(&self, relative: &str) -> ObjectPath {
        if self.prefix.is_empty() {
            ObjectPath::from(relative)
        } else {
            ObjectPath::from(format!("{}/{relative}", self.prefix.trim_end_matches('/')))
        }
    }

    /// Location of a relative path, for logs and reports
    pub fn location(&self, relative: &str) -> String {
        format!("{}/{relative}", self.root)
    }

    /// Write an object atomically; returns its full location
    pub async fn put(&self, relative: &str, data: Bytes) -> Result<String> {
        let path = self.object_path(relative);
        let size = data.len();
        self.store.put(&path, data.into()).await?;

        let location = self.location(relative);
        tracing::debug!(location = %location, bytes = size, "Wrote object");
        Ok(location)
    }

    /// Copy an existing object over another, replacing it atomically
    pub async fn copy(&self, from: &str, to: &str) -> Result<String> {
        let source = self.object_path(from);
        let target = self.object_path(to);
        self.store.copy(&source, &target).await?;
        Ok(self.location(to))
    }
}

/// Object store for a bucket; credentials come from the environment
fn remote_store(kind: StoreKind, bucket: &str) -> object_store::Result<Arc<dyn ObjectStore>> {
    let store: Arc<dyn ObjectStore> = match kind {
        StoreKind::S3 | StoreKind::R2 => {
            let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
            if kind == StoreKind::R2 {
                if let Ok(endpoint) = std::env::var("R2_ENDPOINT_URL") {
                    builder = builder.with_endpoint(endpoint);
                }
            }
            Arc::new(builder.build()?)
        }
        StoreKind::Gcs => Arc::new(
            GoogleCloudStorageBuilder::from_env()
                .with_bucket_name(bucket)
                .build()?,
        ),
        StoreKind::Azure => Arc::new(
            MicrosoftAzureBuilder::from_env()
                .with_container_name(bucket)
                .build()?,
        ),
        StoreKind::Local => Arc::new(LocalFileSystem::new()),
    };
    Ok(store)
}

/// Split `bucket/some/prefix/` into `bucket` and `some/prefix`
fn split_bucket<'a>(rest: &'a str, scheme: &str) -> Result<(&'a str, String)> {
    let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
    if bucket.is_empty() {
        return Err(Error::config(format!("{scheme}:// destination needs a bucket: {rest}")));
    }
    Ok((bucket, prefix.trim_matches('/').to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partitioned_paths() {
        let date = NaiveDate::from_ymd_opt(2025, 12, 14).unwrap();
        assert_eq!(
            build_partitioned_path("transactions", date, "data.csv"),
            "transactions/dt=2025-12-14/data.csv"
        );
        assert_eq!(
            build_partitioned_dir("curated.daily", date),
            "curated_daily/dt=2025-12-14"
        );
    }

    #[test]
    fn test_split_bucket() {
        let (bucket, prefix) = split_bucket("my-bucket/exports/daily/", "s3").unwrap();
        assert_eq!(bucket, "my-bucket");
        assert_eq!(prefix, "exports/daily");

        let (bucket, prefix) = split_bucket("only-bucket", "gs").unwrap();
        assert_eq!(bucket, "only-bucket");
        assert!(prefix.is_empty());

        assert!(split_bucket("/path", "s3").is_err());
    }

    #[test]
    fn test_detect_store_kind() {
        assert_eq!(StoreKind::detect("r2://b/p"), (StoreKind::R2, "b/p"));
        assert_eq!(StoreKind::detect("az://c"), (StoreKind::Azure, "c"));
        assert_eq!(StoreKind::detect("file:///tmp/x"), (StoreKind::Local, "/tmp/x"));
        assert_eq!(StoreKind::detect("./out"), (StoreKind::Local, "./out"));
        assert_eq!(StoreKind::Gcs.scheme(), "gs");
    }

    #[test]
    fn test_parse_local_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("snapshots");
        let dest = SnapshotDestination::parse(path.to_str().unwrap()).unwrap();
        assert_eq!(dest.kind(), StoreKind::Local);
        assert!(!dest.is_cloud());
        assert!(path.is_dir());
    }

    #[tokio::test]
    async fn test_put_and_copy() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dest = SnapshotDestination::parse(temp_dir.path().to_str().unwrap()).unwrap();

        let location = dest
            .put("d/dt=2024-01-01/data.csv", Bytes::from_static(b"a,b\n"))
            .await
            .unwrap();
        assert!(location.ends_with("d/dt=2024-01-01/data.csv"));
        assert!(temp_dir.path().join("d/dt=2024-01-01/data.csv").is_file());

        dest.copy("d/dt=2024-01-01/data.csv", "d/latest.csv")
            .await
            .unwrap();
        let alias = temp_dir.path().join("d/latest.csv");
        assert_eq!(std::fs::read(&alias).unwrap(), b"a,b\n");

        // Overwrite replaces the alias
        dest.put("d/dt=2024-01-02/data.csv", Bytes::from_static(b"x\n"))
            .await
            .unwrap();
        dest.copy("d/dt=2024-01-02/data.csv", "d/latest.csv")
            .await
            .unwrap();
        assert_eq!(std::fs::read(&alias).unwrap(), b"x\n");
    }
}
