//! 消息内容清洗
//!
//! 移除可执行标签（连同其内容），保留一组安全的格式标签，
//! 其余标签只去掉标签本身、保留内部文本。

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// 连同内容一起移除的标签
const EXECUTABLE_TAGS: [&str; 7] = [
    "script", "style", "iframe", "object", "embed", "noscript", "template",
];

/// 默认允许保留的格式标签
const DEFAULT_SAFE_TAGS: [&str; 14] = [
    "b",
    "strong",
    "i",
    "em",
    "u",
    "s",
    "code",
    "pre",
    "br",
    "p",
    "blockquote",
    "ul",
    "ol",
    "li",
];

static EXECUTABLE_BLOCKS: Lazy<Vec<Regex>> = Lazy::new(|| {
    EXECUTABLE_TAGS
        .iter()
        .filter_map(|tag| {
            Regex::new(&format!(r"(?is)<\s*{tag}\b[^>]*>.*?<\s*/\s*{tag}\s*>")).ok()
        })
        .collect()
});

static EXECUTABLE_STRAY: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)<\s*/?\s*(?:{})\b[^>]*>",
        EXECUTABLE_TAGS.join("|")
    ))
    .ok()
});

static COMMENTS: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").ok());

static ANY_TAG: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"<\s*(/?)\s*([A-Za-z][A-Za-z0-9]*)\b[^>]*?(/?)\s*>").ok());

/// 清洗后安全标签的规范形式，或单独的 `<`
static CANONICAL_TAG: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"<(/?)([a-z][a-z0-9]*)(/?)>|<").ok());

/// 基于白名单的标记清洗器
#[derive(Debug, Clone)]
pub struct MarkupSanitizer {
    safe_tags: Vec<String>,
}

impl Default for MarkupSanitizer {
    fn default() -> Self {
        Self::new(DEFAULT_SAFE_TAGS.iter().map(|tag| tag.to_string()))
    }
}

impl MarkupSanitizer {
    pub fn new(safe_tags: impl IntoIterator<Item = String>) -> Self {
        Self {
            safe_tags: safe_tags
                .into_iter()
                .map(|tag| tag.to_ascii_lowercase())
                .filter(|tag| !EXECUTABLE_TAGS.contains(&tag.as_str()))
                .collect(),
        }
    }

    fn is_safe(&self, tag: &str) -> bool {
        self.safe_tags.iter().any(|safe| safe == tag)
    }

    /// 返回清洗后的内容
    ///
    /// 反复清洗直到结果不再变化，之后剩余的 `<` 只允许作为安全标签的开头，
    /// 其余一律转义为 `&lt;`。
    pub fn sanitize(&self, input: &str) -> String {
        let mut text = input.to_owned();
        loop {
            let next = self.strip_once(&text);
            if next == text {
                break;
            }
            text = next;
        }
        self.escape_stray_brackets(&text)
    }

    fn strip_once(&self, input: &str) -> String {
        let mut text = input.to_owned();

        for block in EXECUTABLE_BLOCKS.iter() {
            text = block.replace_all(&text, "").into_owned();
        }
        if let Some(stray) = EXECUTABLE_STRAY.as_ref() {
            text = stray.replace_all(&text, "").into_owned();
        }
        if let Some(comments) = COMMENTS.as_ref() {
            text = comments.replace_all(&text, "").into_owned();
        }

        let Some(any_tag) = ANY_TAG.as_ref() else {
            return text;
        };

        // 安全标签去掉属性后保留，其余标签删除
        any_tag
            .replace_all(&text, |caps: &Captures| {
                let name = caps[2].to_ascii_lowercase();
                if !self.is_safe(&name) {
                    return String::new();
                }
                if !caps[1].is_empty() {
                    format!("</{name}>")
                } else if !caps[3].is_empty() {
                    format!("<{name}/>")
                } else {
                    format!("<{name}>")
                }
            })
            .into_owned()
    }

    fn escape_stray_brackets(&self, input: &str) -> String {
        let Some(canonical) = CANONICAL_TAG.as_ref() else {
            return input.replace('<', "&lt;");
        };

        canonical
            .replace_all(input, |caps: &Captures| match caps.get(2) {
                Some(name) if self.is_safe(name.as_str()) => caps[0].to_owned(),
                _ => caps[0].replacen('<', "&lt;", 1),
            })
            .into_owned()
    }
}
