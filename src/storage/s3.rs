use super::oss::store_name;
use super::OperatorStore;
use crate::config::StorageConfig;
use crate::core::uploader::PART_SIZE;
use anyhow::Result;
use opendal::services::S3;

/// S3 兼容存储
pub fn build(config: &StorageConfig) -> Result<OperatorStore> {
    let mut builder = S3::default()
        .bucket(&config.bucket)
        .endpoint(&config.endpoint)
        .access_key_id(&config.access_key)
        .secret_access_key(&config.secret_key);

    if let Some(ref region) = config.region {
        builder = builder.region(region);
    }

    if let Some(ref p) = config.prefix {
        builder = builder.root(p);
    }

    OperatorStore::new(builder, store_name("s3", config), PART_SIZE as usize)
}
