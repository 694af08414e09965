//! 浏览源目录

use crate::error::{Result, SyncError};
use crate::AppState;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fs;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileItem {
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub name: String,
    pub size: u64,
    pub modified: Option<DateTime<Local>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FileListing {
    File {
        name: String,
        size: u64,
        modified: Option<DateTime<Local>>,
    },
    Directory {
        path: String,
        items: Vec<FileItem>,
    },
}

/// 把请求路径按字面规范化后拼到根目录下，越过根目录时返回 None
fn resolve(root: &Path, requested: &str) -> Option<PathBuf> {
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in Path::new(requested.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop()?;
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(parts.iter().fold(root.to_path_buf(), |path, part| path.join(part)))
}

fn modified(meta: &fs::Metadata) -> Option<DateTime<Local>> {
    meta.modified().ok().map(DateTime::<Local>::from)
}

/// 列出源目录下的文件或目录内容，`path` 相对于源目录
pub fn list_files(state: &AppState, path: &str) -> Result<FileListing> {
    let full_path = resolve(&state.source_root, path)
        .ok_or_else(|| SyncError::InvalidPath(path.to_string()))?;

    let meta = match fs::metadata(&full_path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(SyncError::NotFound(path.to_string()))
        }
        Err(e) => return Err(e.into()),
    };

    if meta.is_file() {
        return Ok(FileListing::File {
            name: full_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            size: meta.len(),
            modified: modified(&meta),
        });
    }

    let mut items = Vec::new();
    for entry in fs::read_dir(&full_path)? {
        let entry = entry?;
        let item_meta = match entry.metadata() {
            Ok(meta) => meta,
            Err(e) => {
                tracing::warn!("读取文件信息失败 {}: {}", entry.path().display(), e);
                continue;
            }
        };
        items.push(FileItem {
            kind: if item_meta.is_dir() {
                EntryKind::Directory
            } else {
                EntryKind::File
            },
            name: entry.file_name().to_string_lossy().into_owned(),
            size: item_meta.len(),
            modified: modified(&item_meta),
        });
    }
    items.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(FileListing::Directory {
        path: path.to_string(),
        items,
    })
}
