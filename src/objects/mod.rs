//! Raw file storage backends.
//!
//! - **`local`** ([`LocalObjectStore`]): files under `[storage].root`.
//! - **`s3`** ([`S3ObjectStore`]): an S3 bucket (or MinIO / LocalStack) via SigV4-signed requests.
//! - **`memory`**: [`InMemoryObjectStore`] from `kbchat-core`, for tests and throwaway runs.

mod local;
mod s3;

pub use local::LocalObjectStore;
pub use s3::S3ObjectStore;

use anyhow::{bail, Context, Result};
use std::sync::Arc;

use kbchat_core::objects::memory::InMemoryObjectStore;
use kbchat_core::objects::ObjectStore;

use crate::config::StorageConfig;

pub fn create_object_store(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>> {
    match config.objects.as_str() {
        "local" => Ok(Arc::new(LocalObjectStore::new(&config.root))),
        "memory" => Ok(Arc::new(InMemoryObjectStore::new())),
        "s3" => {
            let s3 = config
                .s3
                .clone()
                .context("storage.objects = \"s3\" requires a [storage.s3] section")?;
            Ok(Arc::new(S3ObjectStore::from_env(s3)?))
        }
        other => bail!("Unknown object store: {}", other),
    }
}
