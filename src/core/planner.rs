//! 同步计划：遍历源目录，过滤忽略规则，与远程列表比较后产出待上传文件
//!
//! 只比较文件大小：远程已存在且大小相同即视为最新。大小相同但内容不同的
//! 文件不会被重新上传，这是已知限制。

use crate::core::pattern::PatternSet;
use crate::storage::RemoteObject;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// 单个文件的上传任务
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTask {
    pub local_path: PathBuf,
    pub remote_key: String,
    pub size: u64,
}

/// 远程对象索引：key -> 大小
pub type RemoteIndex = HashMap<String, u64>;

pub fn index_listing(objects: Vec<RemoteObject>) -> RemoteIndex {
    objects.into_iter().map(|o| (o.key, o.size)).collect()
}

/// 计划过程统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanStats {
    /// 通过忽略规则的文件数
    pub scanned: u64,
    /// 远程已存在且大小一致
    pub skipped: u64,
    pub ignored_files: u64,
    pub ignored_dirs: u64,
    /// 无法读取的目录项
    pub errors: u64,
    pub cancelled: bool,
}

/// 相对路径转远程 key，分隔符统一为 `/`
pub fn remote_key(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

pub struct SyncPlanner<C> {
    root: PathBuf,
    patterns: PatternSet,
    remote: RemoteIndex,
    should_continue: C,
}

impl<C> SyncPlanner<C>
where
    C: FnMut() -> bool,
{
    /// `should_continue` 在每次产出任务前调用，返回 false 时结束计划
    pub fn new<S: AsRef<str>>(
        root: impl Into<PathBuf>,
        patterns: &[S],
        remote: RemoteIndex,
        should_continue: C,
    ) -> Self {
        Self {
            root: root.into(),
            patterns: PatternSet::new(patterns),
            remote,
            should_continue,
        }
    }

    pub fn plan(self) -> Plan<C> {
        let walker = WalkDir::new(&self.root)
            .min_depth(1)
            .follow_links(false)
            .into_iter();

        Plan {
            walker,
            planner: self,
            stats: PlanStats::default(),
            done: false,
        }
    }
}

/// 惰性的任务序列，只能遍历一次
pub struct Plan<C> {
    walker: walkdir::IntoIter,
    planner: SyncPlanner<C>,
    stats: PlanStats,
    done: bool,
}

impl<C> Plan<C> {
    pub fn stats(&self) -> &PlanStats {
        &self.stats
    }
}

impl<C> Iterator for Plan<C>
where
    C: FnMut() -> bool,
{
    type Item = TransferTask;

    fn next(&mut self) -> Option<TransferTask> {
        if self.done {
            return None;
        }

        loop {
            let entry = match self.walker.next() {
                Some(Ok(entry)) => entry,
                Some(Err(e)) => {
                    warn!("读取目录项失败: {}", e);
                    self.stats.errors += 1;
                    continue;
                }
                None => {
                    self.done = true;
                    return None;
                }
            };

            let Ok(relative) = entry.path().strip_prefix(&self.planner.root) else {
                continue;
            };
            let file_type = entry.file_type();

            if file_type.is_dir() {
                if self.planner.patterns.is_directory_ignored(relative) {
                    debug!("忽略目录: {}", relative.display());
                    self.stats.ignored_dirs += 1;
                    self.walker.skip_current_dir();
                }
                continue;
            }

            // 不跟随符号链接，只处理普通文件
            if !file_type.is_file() {
                continue;
            }

            let name = entry.file_name().to_string_lossy();
            if self.planner.patterns.is_file_ignored(&name) {
                debug!("忽略文件: {}", relative.display());
                self.stats.ignored_files += 1;
                continue;
            }

            let size = match entry.metadata() {
                Ok(meta) => meta.len(),
                Err(e) => {
                    warn!("读取文件信息失败 {}: {}", entry.path().display(), e);
                    self.stats.errors += 1;
                    continue;
                }
            };
            self.stats.scanned += 1;

            let key = remote_key(relative);
            if self.planner.remote.get(&key) == Some(&size) {
                debug!("跳过相同文件: {}", key);
                self.stats.skipped += 1;
                continue;
            }

            if !(self.planner.should_continue)() {
                debug!("计划被取消");
                self.stats.cancelled = true;
                self.done = true;
                return None;
            }

            return Some(TransferTask {
                local_path: entry.into_path(),
                remote_key: key,
                size,
            });
        }
    }
}
