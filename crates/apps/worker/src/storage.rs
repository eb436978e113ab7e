use std::path::{Component, Path, PathBuf};

use runtime::{Phase, ProgressCallback};
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::info;

use crate::config::StoreConfig;
use crate::error::JobError;

const CHUNK: usize = 1024 * 1024;

/// Description of an uploaded output, published in the job result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredObject {
    /// Store root: a directory or the host of the HTTP store.
    pub bucket: String,
    pub key: String,
    pub path: String,
    pub size: u64,
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
}

/// Destination for finished outputs.
#[derive(Clone, Debug)]
pub struct ObjectStore {
    backend: StoreConfig,
    public_base_url: Option<String>,
    http: reqwest::Client,
}

impl ObjectStore {
    pub fn new(backend: StoreConfig, public_base_url: Option<String>, http: reqwest::Client) -> Self {
        Self {
            backend,
            public_base_url,
            http,
        }
    }

    /// Stores `local` under `key`, reporting `(Upload, bytes, size)`.
    pub async fn put(
        &self,
        local: &Path,
        key: &str,
        progress: &mut (dyn ProgressCallback + Send),
    ) -> Result<StoredObject, JobError> {
        let key = validate_key(key)?;
        let size = tokio::fs::metadata(local).await?.len();
        progress.on_progress(Phase::Upload, 0, Some(size));

        let (bucket, path) = match &self.backend {
            StoreConfig::LocalDir(root) => {
                let dest = root.join(&key);
                copy_atomic(local, &dest, size, progress).await?;
                (root.display().to_string(), format!("file://{}", dest.display()))
            }
            StoreConfig::Http(base) => {
                let url = join_url(base, &key);
                let body = tokio::fs::read(local).await?;
                self.http
                    .put(&url)
                    .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                    .body(body)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| JobError::Upload(e.to_string()))?;
                progress.on_progress(Phase::Upload, size, Some(size));
                let host = reqwest::Url::parse(base)
                    .ok()
                    .and_then(|u| u.host_str().map(str::to_string))
                    .unwrap_or_else(|| base.clone());
                (host, url)
            }
        };

        let filename = key.rsplit('/').next().unwrap_or(&key).to_string();
        let object = StoredObject {
            bucket,
            public_url: self.public_base_url.as_deref().map(|b| join_url(b, &key)),
            key,
            path,
            size,
            filename,
        };
        info!(key = %object.key, bytes = size, "output stored");
        Ok(object)
    }
}

fn join_url(base: &str, key: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), key)
}

/// Keys are relative slash-separated paths without `..`.
pub(crate) fn validate_key(key: &str) -> Result<String, JobError> {
    let key = key.trim_start_matches('/');
    let ok = !key.is_empty()
        && Path::new(key)
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if ok {
        Ok(key.to_string())
    } else {
        Err(JobError::InvalidParameter(format!("bad output key {key:?}")))
    }
}

async fn copy_atomic(
    src: &Path,
    dest: &Path,
    size: u64,
    progress: &mut (dyn ProgressCallback + Send),
) -> Result<(), JobError> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut partial = dest.as_os_str().to_owned();
    partial.push(".partial");
    let partial = PathBuf::from(partial);

    let mut input = tokio::fs::File::open(src).await?;
    let mut output = tokio::fs::File::create(&partial).await?;
    let mut buf = vec![0u8; CHUNK];
    let mut copied = 0u64;
    loop {
        let n = input.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        output.write_all(&buf[..n]).await?;
        copied += n as u64;
        progress.on_progress(Phase::Upload, copied, Some(size));
    }
    output.sync_all().await?;
    tokio::fs::rename(&partial, dest).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{validate_key, ObjectStore, StoredObject};
    use crate::config::StoreConfig;
    use pretty_assertions::assert_eq;
    use runtime::NoProgress;
    use serde_json::json;

    #[test]
    fn keys_must_stay_inside_the_store() {
        assert_eq!(validate_key("/a/b.geojsonl").unwrap(), "a/b.geojsonl");
        assert!(validate_key("../escape").is_err());
        assert!(validate_key("").is_err());
    }

    #[tokio::test]
    async fn local_store_copies_and_describes_the_object() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("out.geojsonl");
        std::fs::write(&local, b"{}\n").unwrap();
        let root = dir.path().join("store");
        let store = ObjectStore::new(
            StoreConfig::LocalDir(root.clone()),
            Some("https://cdn.example.com/".to_string()),
            reqwest::Client::new(),
        );

        let obj = store
            .put(&local, "jobs/1/out.geojsonl", &mut NoProgress)
            .await
            .unwrap();
        assert_eq!(std::fs::read(root.join("jobs/1/out.geojsonl")).unwrap(), b"{}\n");
        assert_eq!(obj.size, 3);
        assert_eq!(obj.filename, "out.geojsonl");

        let value = serde_json::to_value(&obj).unwrap();
        assert_eq!(
            value["publicUrl"],
            json!("https://cdn.example.com/jobs/1/out.geojsonl")
        );

        let without = StoredObject {
            public_url: None,
            ..obj
        };
        assert!(serde_json::to_value(&without).unwrap().get("publicUrl").is_none());
    }
}
