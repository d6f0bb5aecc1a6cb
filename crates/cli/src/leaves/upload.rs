//! Release uploads to object storage.
//!
//! The minified web build of a configuration is mirrored into that
//! configuration's bucket, one object per file keyed by its path relative
//! to the build directory.

use super::{files_under, run_command, slash_path, substitute, Workspace};
use crate::manifest::{Optimization, UploadConfig};
use anyhow::{Context, Result};
use futures::stream::{self, StreamExt, TryStreamExt};
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use waverun_core::{Action, TaskContext};

const UPLOAD_BUILD: &str = "web";
const UPLOAD_PARALLELISM: usize = 8;

/// Opens the object store behind an upload bucket
pub trait BucketOpener: Send + Sync {
    fn open(&self, bucket: &str, upload: &UploadConfig) -> Result<Arc<dyn ObjectStore>>;
}

/// Amazon S3 or a compatible endpoint; credentials come from the `AWS_*`
/// environment variables
#[derive(Debug, Clone, Copy, Default)]
pub struct S3Buckets;

impl BucketOpener for S3Buckets {
    fn open(&self, bucket: &str, upload: &UploadConfig) -> Result<Arc<dyn ObjectStore>> {
        let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
        if let Some(region) = &upload.region {
            builder = builder.with_region(region);
        }
        if let Some(endpoint) = &upload.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }
        let store = builder
            .build()
            .with_context(|| format!("Failed to open bucket {}", bucket))?;
        Ok(Arc::new(store))
    }
}

/// Resource choosing how buckets are opened; [`S3Buckets`] when absent
#[derive(Clone)]
pub struct Buckets(pub Arc<dyn BucketOpener>);

impl Buckets {
    pub fn new(opener: impl BucketOpener + 'static) -> Self {
        Self(Arc::new(opener))
    }
}

impl std::fmt::Debug for Buckets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Buckets")
    }
}

async fn put_file(store: Arc<dyn ObjectStore>, source: PathBuf, file: PathBuf) -> Result<()> {
    let relative = file.strip_prefix(&source)?;
    let key = ObjectPath::from(slash_path(relative));
    let data = tokio::fs::read(&file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;
    store
        .put(&key, data.into())
        .await
        .with_context(|| format!("Failed to upload {}", key))?;
    tracing::debug!("Uploaded {}", key);
    Ok(())
}

/// Put every file below `source` into `store`, returning the object count
pub async fn mirror(store: Arc<dyn ObjectStore>, source: &Path) -> Result<usize> {
    let listing = source.to_path_buf();
    let files = tokio::task::spawn_blocking(move || files_under(&listing))
        .await
        .context("upload listing was interrupted")?;
    if files.is_empty() {
        anyhow::bail!("nothing to upload in {}", source.display());
    }

    let puts = files
        .into_iter()
        .map(|file| put_file(Arc::clone(&store), source.to_path_buf(), file));
    let uploaded: Vec<()> = stream::iter(puts)
        .buffer_unordered(UPLOAD_PARALLELISM)
        .try_collect()
        .await?;
    Ok(uploaded.len())
}

async fn upload_config(ctx: TaskContext, config: String) -> Result<()> {
    let workspace = Workspace::from_context(&ctx)?;
    let upload = &workspace.manifest.upload;
    let bucket = upload
        .buckets
        .get(&config)
        .with_context(|| format!("no upload bucket for configuration '{}'", config))?;
    let source = workspace
        .layout
        .target(UPLOAD_BUILD, &config, Optimization::Min);

    if let Some(template) = &workspace.manifest.commands.upload {
        let line = substitute(
            template,
            &[
                ("source", source.display().to_string()),
                ("bucket", bucket.clone()),
                ("config", config.clone()),
                ("region", upload.region.clone().unwrap_or_default()),
            ],
        );
        return run_command(workspace.layout.root(), &line).await;
    }

    let store = match ctx.resources().get::<Buckets>() {
        Some(buckets) => buckets.0.open(bucket, upload)?,
        None => S3Buckets.open(bucket, upload)?,
    };
    let count = mirror(store, &source).await?;
    tracing::info!("Uploaded {} files to {}", count, bucket);
    Ok(())
}

pub fn upload(config: String) -> Action {
    Action::deferred(move |ctx| upload_config(ctx, config.clone()))
}
