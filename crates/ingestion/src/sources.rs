//! Document sources
//!
//! Text extraction happens upstream; a source only lists and reads `.txt`
//! files. Documents come back sorted by object name so runs are repeatable.

use async_trait::async_trait;
use chunkforge_common::config::StorageConfig;
use chunkforge_common::{AppError, Document, Result};
use reqwest::Url;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, instrument};

const TEXT_EXTENSION: &str = "txt";

#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Read every document. Fails with `NotFound` when there are none.
    async fn load(&self) -> Result<Vec<Document>>;

    /// Human-readable location, for logs and errors
    fn describe(&self) -> String;
}

/// Source name for a file: its base name without extension
fn source_name(file_name: &str) -> String {
    let base = file_name.rsplit('/').next().unwrap_or(file_name);
    Path::new(base)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| base.to_string())
}

/// All `*.txt` files directly inside a local directory
pub struct LocalDirectorySource {
    dir: PathBuf,
}

impl LocalDirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl DocumentSource for LocalDirectorySource {
    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    async fn load(&self) -> Result<Vec<Document>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(|e| AppError::Source {
            message: format!("cannot read directory {}: {}", self.dir.display(), e),
        })?;

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_text = path.extension().is_some_and(|ext| ext == TEXT_EXTENSION);
            if is_text && entry.file_type().await?.is_file() {
                paths.push(path);
            }
        }
        paths.sort();

        if paths.is_empty() {
            return Err(AppError::NotFound {
                resource_type: "text files".to_string(),
                id: self.describe(),
            });
        }

        let mut documents = Vec::with_capacity(paths.len());
        for path in paths {
            let text = tokio::fs::read_to_string(&path).await.map_err(|e| AppError::Source {
                message: format!("cannot read {}: {}", path.display(), e),
            })?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            debug!(file = %path.display(), bytes = text.len(), "Loaded document");
            documents.push(Document::new(source_name(&name), text).with_location(path.display().to_string()));
        }

        info!(documents = documents.len(), "Loaded local documents");
        Ok(documents)
    }

    fn describe(&self) -> String {
        self.dir.display().to_string()
    }
}

/// `*.txt` objects under a prefix in a Cloud Storage bucket, read through
/// the JSON API
pub struct GcsBucketSource {
    client: reqwest::Client,
    endpoint: String,
    access_token: Option<String>,
    bucket: String,
    prefix: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectList {
    #[serde(default)]
    items: Vec<ObjectItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectItem {
    name: String,
}

impl GcsBucketSource {
    pub fn new(config: &StorageConfig, bucket: impl Into<String>, prefix: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::configuration(format!("failed to create HTTP client: {}", e)))?;

        let bucket = bucket.into();
        if bucket.trim().is_empty() {
            return Err(AppError::Validation {
                message: "bucket name must not be empty".to_string(),
                field: Some("bucket_name".to_string()),
            });
        }

        Ok(Self {
            client,
            endpoint: config.gcs_endpoint.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
            bucket,
            prefix: prefix.into(),
        })
    }

    /// `{endpoint}/storage/v1/b/{bucket}/o[/{object}]` with each segment escaped
    fn object_url(&self, object: Option<&str>) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| AppError::configuration(format!("invalid storage endpoint: {}", e)))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| AppError::configuration("storage endpoint cannot be a base URL"))?;
            segments.pop_if_empty().extend(["storage", "v1", "b", self.bucket.as_str(), "o"]);
            if let Some(object) = object {
                segments.push(object);
            }
        }
        Ok(url)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.access_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = self.authorize(builder).send().await.map_err(|e| AppError::Source {
            message: format!("bucket '{}' request failed: {}", self.bucket, e),
        })?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(AppError::NotFound {
                resource_type: "bucket".to_string(),
                id: self.bucket.clone(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Source {
                message: format!("bucket '{}' returned {}: {}", self.bucket, status, body),
            });
        }
        Ok(response)
    }

    async fn list_text_objects(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![("prefix", self.prefix.as_str())];
            if let Some(token) = page_token.as_deref() {
                query.push(("pageToken", token));
            }
            let request = self.client.get(self.object_url(None)?).query(&query);
            let page: ObjectList = self.send(request).await?.json().await.map_err(|e| AppError::Source {
                message: format!("invalid object listing for bucket '{}': {}", self.bucket, e),
            })?;

            names.extend(
                page.items
                    .into_iter()
                    .map(|item| item.name)
                    .filter(|name| name.ends_with(".txt")),
            );

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        names.sort();
        Ok(names)
    }
}

#[async_trait]
impl DocumentSource for GcsBucketSource {
    #[instrument(skip(self), fields(bucket = %self.bucket, prefix = %self.prefix))]
    async fn load(&self) -> Result<Vec<Document>> {
        let names = self.list_text_objects().await?;
        if names.is_empty() {
            return Err(AppError::NotFound {
                resource_type: "text files".to_string(),
                id: self.describe(),
            });
        }

        let mut documents = Vec::with_capacity(names.len());
        for name in names {
            let request = self
                .client
                .get(self.object_url(Some(&name))?)
                .query(&[("alt", "media")]);
            let text = self.send(request).await?.text().await.map_err(|e| AppError::Source {
                message: format!("cannot read gs://{}/{}: {}", self.bucket, name, e),
            })?;

            debug!(object = %name, bytes = text.len(), "Downloaded document");
            documents.push(
                Document::new(source_name(&name), text)
                    .with_location(format!("gs://{}/{}", self.bucket, name))
                    .with_extra("gcs_path", name.clone())
                    .with_extra("bucket", self.bucket.clone()),
            );
        }

        info!(documents = documents.len(), "Loaded bucket documents");
        Ok(documents)
    }

    fn describe(&self) -> String {
        format!("gs://{}/{}", self.bucket, self.prefix)
    }
}
