//! 测试用内存对象存储，记录每次调用并支持注入失败

use crate::storage::{ObjectStore, PartToken, RemoteObject};
use crate::AppState;
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// 在临时目录中创建应用状态，源目录为 `<tmp>/host`
pub fn app_state(store: Option<Arc<MemoryStore>>) -> (tempfile::TempDir, AppState) {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("host");
    std::fs::create_dir_all(&source).unwrap();

    let store = store.map(|s| s as Arc<dyn ObjectStore>);
    let state = AppState::new(dir.path().join("data"), source, store).unwrap();
    (dir, state)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    List,
    Stat { key: String },
    Put { key: String, len: u64 },
    Init { key: String },
    Part { key: String, index: u32, len: u64 },
    Complete { key: String, indices: Vec<u32> },
    Abort { key: String },
}

type Hook = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
struct Inner {
    objects: BTreeMap<String, Vec<u8>>,
    calls: Vec<Call>,
    uploads: HashMap<String, (String, Vec<Bytes>)>,
    fail_list: bool,
    fail_put: HashSet<String>,
    fail_part: Option<(String, u32)>,
    fail_complete: HashSet<String>,
    next_upload: u32,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    /// 每个文件开始上传时调用（put 或 init_multipart）
    on_upload: Mutex<Option<Hook>>,
}

impl MemoryStore {
    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn uploaded_keys(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Put { key, .. } | Call::Init { key } => Some(key),
                _ => None,
            })
            .collect()
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().objects.get(key).cloned()
    }

    pub fn insert(&self, key: &str, data: Vec<u8>) {
        self.lock().objects.insert(key.to_string(), data);
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn fail_list(&self) {
        self.lock().fail_list = true;
    }

    pub fn fail_put(&self, key: &str) {
        self.lock().fail_put.insert(key.to_string());
    }

    pub fn fail_part(&self, key: &str, index: u32) {
        self.lock().fail_part = Some((key.to_string(), index));
    }

    pub fn fail_complete(&self, key: &str) {
        self.lock().fail_complete.insert(key.to_string());
    }

    /// 是否还有未提交也未放弃的分片会话
    pub fn open_uploads(&self) -> usize {
        self.lock().uploads.len()
    }

    pub fn on_upload(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *self.on_upload.lock().unwrap() = Some(Arc::new(hook));
    }

    fn run_hook(&self, key: &str) {
        let hook = self.on_upload.lock().unwrap().clone();
        if let Some(hook) = hook {
            hook(key);
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_all(&self) -> Result<Vec<RemoteObject>> {
        let mut inner = self.lock();
        inner.calls.push(Call::List);
        if inner.fail_list {
            bail!("connection refused");
        }
        Ok(inner
            .objects
            .iter()
            .map(|(key, data)| RemoteObject {
                key: key.clone(),
                size: data.len() as u64,
                etag: None,
            })
            .collect())
    }

    async fn stat(&self, key: &str) -> Result<Option<u64>> {
        let mut inner = self.lock();
        inner.calls.push(Call::Stat { key: key.to_string() });
        Ok(inner.objects.get(key).map(|d| d.len() as u64))
    }

    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        self.run_hook(key);
        let mut inner = self.lock();
        if inner.fail_put.contains(key) {
            bail!("put rejected: {}", key);
        }
        inner.calls.push(Call::Put {
            key: key.to_string(),
            len: data.len() as u64,
        });
        inner.objects.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn init_multipart(&self, key: &str) -> Result<String> {
        self.run_hook(key);
        let mut inner = self.lock();
        inner.calls.push(Call::Init { key: key.to_string() });
        inner.next_upload += 1;
        let id = format!("upload-{}", inner.next_upload);
        inner.uploads.insert(id.clone(), (key.to_string(), Vec::new()));
        Ok(id)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        index: u32,
        data: Bytes,
    ) -> Result<PartToken> {
        let mut inner = self.lock();
        if inner.fail_part.as_ref() == Some(&(key.to_string(), index)) {
            bail!("part {} rejected", index);
        }
        inner.calls.push(Call::Part {
            key: key.to_string(),
            index,
            len: data.len() as u64,
        });
        let (_, parts) = inner
            .uploads
            .get_mut(upload_id)
            .ok_or_else(|| anyhow!("no such upload"))?;
        parts.push(data);
        Ok(PartToken {
            index,
            token: format!("etag-{}", index),
        })
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<PartToken>,
    ) -> Result<()> {
        let mut inner = self.lock();
        if inner.fail_complete.contains(key) {
            bail!("complete rejected: {}", key);
        }
        inner.calls.push(Call::Complete {
            key: key.to_string(),
            indices: parts.iter().map(|p| p.index).collect(),
        });
        let (_, data) = inner
            .uploads
            .remove(upload_id)
            .ok_or_else(|| anyhow!("no such upload"))?;
        let joined: Vec<u8> = data.iter().flat_map(|b| b.iter().copied()).collect();
        inner.objects.insert(key.to_string(), joined);
        Ok(())
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<()> {
        let mut inner = self.lock();
        inner.calls.push(Call::Abort { key: key.to_string() });
        inner.uploads.remove(upload_id);
        Ok(())
    }

    async fn probe(&self) -> Result<()> {
        if self.lock().fail_list {
            bail!("connection refused");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "memory://test"
    }
}
