//! 应用配置模块
//!
//! `config.json` 保存定时设置、忽略规则和同步状态标志。同步状态标志同时是
//! 协作式取消信号，外部随时可能修改它，所以每次判断都重新读取文件，不做缓存。

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// 定时同步配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub enabled: bool,
    /// 同步间隔（秒）
    #[serde(default = "default_interval")]
    pub interval: u64,
}

fn default_interval() -> u64 {
    3600 // 默认每小时同步一次
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: default_interval(),
        }
    }
}

/// 同步状态标志
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    #[default]
    Stopped,
    Running,
}

/// 持久化的同步配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfiguration {
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
    #[serde(default)]
    pub sync_status: SyncState,
}

impl Default for SyncConfiguration {
    fn default() -> Self {
        Self {
            schedule: ScheduleConfig::default(),
            ignore_patterns: vec![
                ".git/".to_string(),
                ".DS_Store".to_string(),
                "*.tmp".to_string(),
            ],
            sync_status: SyncState::Stopped,
        }
    }
}

/// 配置更新请求，未提供的字段保持不变
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigUpdate {
    pub schedule: Option<ScheduleConfig>,
    pub ignore_patterns: Option<Vec<String>>,
}

/// `config.json` 的读写入口
pub struct ConfigStore {
    path: PathBuf,
    /// 串行化进程内的读-改-写
    write_lock: Mutex<()>,
}

impl ConfigStore {
    /// 打开配置文件，不存在时写入默认配置
    pub fn open(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir)?;
        let store = Self {
            path: data_dir.join("config.json"),
            write_lock: Mutex::new(()),
        };
        if !store.path.exists() {
            store.write(&SyncConfiguration::default())?;
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> Result<SyncConfiguration> {
        let content = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// 当前是否处于运行状态（取消检查点使用）
    pub fn is_running(&self) -> Result<bool> {
        Ok(self.read()?.sync_status == SyncState::Running)
    }

    pub fn write(&self, config: &SyncConfiguration) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.write_locked(config)
    }

    /// 在锁内读取、修改并写回配置
    pub fn update(&self, f: impl FnOnce(&mut SyncConfiguration)) -> Result<SyncConfiguration> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut config = self.read()?;
        f(&mut config);
        self.write_locked(&config)?;
        Ok(config)
    }

    pub fn set_sync_status(&self, status: SyncState) -> Result<()> {
        self.update(|config| config.sync_status = status)?;
        Ok(())
    }

    /// 替换单个配置段（如 `log`），与同步状态写入共用同一把锁
    pub fn update_section(&self, key: &str, section: serde_json::Value) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut value = self.read_value();
        value[key] = section;
        write_json_atomic(&self.path, &value)
    }

    /// 合并写入：保留文件中其他模块的配置段（如 `log`）
    fn write_locked(&self, config: &SyncConfiguration) -> Result<()> {
        let mut value = self.read_value();

        value["schedule"] = serde_json::to_value(&config.schedule)?;
        value["ignore_patterns"] = serde_json::to_value(&config.ignore_patterns)?;
        value["sync_status"] = serde_json::to_value(config.sync_status)?;

        write_json_atomic(&self.path, &value)
    }

    /// 文件缺失或损坏时从空对象开始
    fn read_value(&self) -> serde_json::Value {
        fs::read_to_string(&self.path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .filter(serde_json::Value::is_object)
            .unwrap_or_else(|| serde_json::json!({}))
    }
}

/// 先写同目录下的临时文件再重命名，读取方不会看到写了一半的 JSON。
/// 临时文件名每次唯一，并发写同一路径不会互相覆盖临时文件
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut temp, value)?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// 存储类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Oss,
    S3,
}

/// 对象存储连接配置（来自环境变量）
#[derive(Clone)]
pub struct StorageConfig {
    pub typ: StorageType,
    pub bucket: String,
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    /// 仅 S3 使用
    pub region: Option<String>,
    pub prefix: Option<String>,
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("typ", &self.typ)
            .field("bucket", &self.bucket)
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key)
            .field("secret_key", &"***")
            .field("region", &self.region)
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl StorageConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let typ = match get("STORAGE_TYPE").as_deref().map(str::to_lowercase).as_deref() {
            None | Some("oss") => StorageType::Oss,
            Some("s3") => StorageType::S3,
            Some(other) => {
                return Err(SyncError::Configuration(format!(
                    "不支持的存储类型: {}",
                    other
                )))
            }
        };

        let missing: Vec<&str> = [
            "OSS_ACCESS_KEY_ID",
            "OSS_ACCESS_KEY_SECRET",
            "OSS_BUCKET",
            "OSS_ENDPOINT",
        ]
        .into_iter()
        .filter(|key| get(key).is_none())
        .collect();
        if !missing.is_empty() {
            return Err(SyncError::Configuration(format!(
                "对象存储配置不完整，缺少 {}",
                missing.join(", ")
            )));
        }

        let region = get("S3_REGION");
        if typ == StorageType::S3 && region.is_none() {
            return Err(SyncError::Configuration("S3 存储需要 S3_REGION".to_string()));
        }

        Ok(Self {
            typ,
            bucket: get("OSS_BUCKET").unwrap_or_default(),
            endpoint: get("OSS_ENDPOINT").unwrap_or_default(),
            access_key: get("OSS_ACCESS_KEY_ID").unwrap_or_default(),
            secret_key: get("OSS_ACCESS_KEY_SECRET").unwrap_or_default(),
            region,
            prefix: get("OSS_PREFIX"),
        })
    }
}
