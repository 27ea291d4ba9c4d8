//! 通道键（ChannelKey）
//!
//! 私有/命名空间通道以 `{ base, scope }` 结构化寻址，按结构哈希，
//! 不依赖字符串拼接，因此 base 中包含任何分隔符都不会与带 scope 的键冲突。
//!
use serde::{Deserialize, Serialize};
use std::fmt;

const SEPARATOR: char = '#';
const ESCAPE: char = '\\';

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelKey {
    base: String,
    scope: Option<String>,
}

impl ChannelKey {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            scope: None,
        }
    }

    /// 私有通道：与同名的非限定通道完全隔离
    pub fn scoped(base: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            scope: Some(scope.into()),
        }
    }

    /// 基础通道名（用于查找静态事件配置）
    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    pub fn is_scoped(&self) -> bool {
        self.scope.is_some()
    }

    /// 规范化文本形式：`base` 或 `base#scope`，两部分中的 `\` 与 `#` 以 `\` 转义
    pub fn canonical(&self) -> String {
        let mut out = String::with_capacity(self.base.len() + 8);
        push_escaped(&mut out, &self.base);
        if let Some(scope) = &self.scope {
            out.push(SEPARATOR);
            push_escaped(&mut out, scope);
        }
        out
    }
}

fn push_escaped(out: &mut String, part: &str) {
    for ch in part.chars() {
        if ch == SEPARATOR || ch == ESCAPE {
            out.push(ESCAPE);
        }
        out.push(ch);
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl From<&str> for ChannelKey {
    fn from(base: &str) -> Self {
        Self::new(base)
    }
}

impl From<String> for ChannelKey {
    fn from(base: String) -> Self {
        Self::new(base)
    }
}

impl From<&ChannelKey> for ChannelKey {
    fn from(key: &ChannelKey) -> Self {
        key.clone()
    }
}

impl<B: Into<String>, S: Into<String>> From<(B, S)> for ChannelKey {
    fn from((base, scope): (B, S)) -> Self {
        Self::scoped(base, scope)
    }
}
