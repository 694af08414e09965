use super::OperatorStore;
use crate::config::StorageConfig;
use crate::core::uploader::PART_SIZE;
use anyhow::Result;
use opendal::services::Oss;

/// 阿里云 OSS
pub fn build(config: &StorageConfig) -> Result<OperatorStore> {
    let mut builder = Oss::default()
        .bucket(&config.bucket)
        .endpoint(&config.endpoint)
        .access_key_id(&config.access_key)
        .access_key_secret(&config.secret_key);

    if let Some(ref p) = config.prefix {
        builder = builder.root(p);
    }

    OperatorStore::new(builder, store_name("oss", config), PART_SIZE as usize)
}

pub(super) fn store_name(scheme: &str, config: &StorageConfig) -> String {
    format!(
        "{}://{}{}",
        scheme,
        config.bucket,
        config
            .prefix
            .as_deref()
            .map(|p| format!("/{}", p.trim_matches('/')))
            .unwrap_or_default()
    )
}
