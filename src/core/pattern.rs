//! 忽略规则匹配
//!
//! 不含 `*` 的规则只作用于目录路径，含 `*` 的规则只作用于文件名。
//! 规则按 `/` 拆成若干段，从路径末尾开始逐段匹配；以 `/` 开头的规则
//! 锚定到源目录根部，必须匹配完整的相对路径。段内支持 `*`、`?`、`[...]`。

use regex::Regex;
use std::path::{Component, Path};

/// 单条已编译的规则
#[derive(Debug)]
struct CompiledPattern {
    segments: Vec<Regex>,
    anchored: bool,
}

impl CompiledPattern {
    fn compile(pattern: &str) -> Option<Self> {
        let segments: Vec<Regex> = pattern
            .split('/')
            .filter(|s| !s.is_empty())
            .map(segment_regex)
            .collect::<Option<_>>()?;
        if segments.is_empty() {
            return None;
        }
        Some(Self {
            segments,
            anchored: pattern.starts_with('/'),
        })
    }

    /// 从右向左匹配路径各段
    fn matches(&self, parts: &[String]) -> bool {
        if parts.len() < self.segments.len() {
            return false;
        }
        if self.anchored && parts.len() != self.segments.len() {
            return false;
        }
        parts
            .iter()
            .rev()
            .zip(self.segments.iter().rev())
            .all(|(part, re)| re.is_match(part))
    }
}

/// 把一段 glob 转成正则，`[` 没有闭合时按字面量处理
fn segment_regex(segment: &str) -> Option<Regex> {
    let chars: Vec<char> = segment.chars().collect();
    let mut re = String::from("^");
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            '[' => match chars[i + 1..].iter().position(|&c| c == ']') {
                Some(offset) if offset > 0 => {
                    let class: String = chars[i + 1..i + 1 + offset].iter().collect();
                    re.push('[');
                    if let Some(rest) = class.strip_prefix('!') {
                        re.push('^');
                        re.push_str(&escape_class(rest));
                    } else {
                        re.push_str(&escape_class(&class));
                    }
                    re.push(']');
                    i += offset + 1;
                }
                _ => re.push_str(r"\["),
            },
            c => re.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }
    re.push('$');

    Regex::new(&re).ok()
}

fn escape_class(class: &str) -> String {
    class
        .chars()
        .map(|c| match c {
            '\\' | '[' | ']' | '^' | '&' | '~' => format!("\\{}", c),
            c => c.to_string(),
        })
        .collect()
}

fn path_parts(path: &Path) -> Vec<String> {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect()
}

/// 编译后的忽略规则集合，一次同步内复用
#[derive(Debug, Default)]
pub struct PatternSet {
    dir_patterns: Vec<CompiledPattern>,
    file_patterns: Vec<CompiledPattern>,
}

impl PatternSet {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Self {
        let mut set = Self::default();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let Some(compiled) = CompiledPattern::compile(pattern) else {
                tracing::debug!("忽略无效规则: {:?}", pattern);
                continue;
            };
            if pattern.contains('*') {
                set.file_patterns.push(compiled);
            } else {
                set.dir_patterns.push(compiled);
            }
        }
        set
    }

    /// `path` 为相对源目录的目录路径
    pub fn is_directory_ignored(&self, path: &Path) -> bool {
        let parts = path_parts(path);
        !parts.is_empty() && self.dir_patterns.iter().any(|p| p.matches(&parts))
    }

    /// `name` 为不含目录的文件名
    pub fn is_file_ignored(&self, name: &str) -> bool {
        let parts = [name.to_string()];
        self.file_patterns.iter().any(|p| p.matches(&parts))
    }
}

pub fn is_directory_ignored<S: AsRef<str>>(path: &Path, patterns: &[S]) -> bool {
    PatternSet::new(patterns).is_directory_ignored(path)
}

pub fn is_file_ignored<S: AsRef<str>>(name: &str, patterns: &[S]) -> bool {
    PatternSet::new(patterns).is_file_ignored(name)
}
