//! 全局配置结构（Config）与默认值。
//!
//! 该模块同时提供生成 `config.yml` 的字段元信息。

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::config::{ConfigSpec, FieldMeta};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    // 路径配置
    #[serde(default)]
    pub save_path: String,

    // 抓取配置
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    // 网络配置
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    #[serde(default = "default_min_connect_timeout")]
    pub min_connect_timeout: f64,

    // 生成配置
    #[serde(default = "default_book_language")]
    pub book_language: String,

    // 文件管理配置
    #[serde(default = "default_true")]
    pub allow_overwrite_files: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            save_path: String::new(),
            settle_delay_ms: default_settle_delay_ms(),
            request_timeout: default_request_timeout(),
            min_connect_timeout: default_min_connect_timeout(),
            book_language: default_book_language(),
            allow_overwrite_files: default_true(),
        }
    }
}

impl ConfigSpec for Config {
    const FILE_NAME: &'static str = "config.yml";

    fn fields() -> &'static [FieldMeta] {
        static FIELDS: [FieldMeta; 6] = [
            FieldMeta {
                name: "save_path",
                description: "保存路径（留空为当前目录）",
            },
            FieldMeta {
                name: "settle_delay_ms",
                description: "切换章节后等待页面加载的时间, 单位ms（阅读器无就绪信号时使用）",
            },
            FieldMeta {
                name: "request_timeout",
                description: "图片请求超时时间（秒）",
            },
            FieldMeta {
                name: "min_connect_timeout",
                description: "连接超时时间（秒）",
            },
            FieldMeta {
                name: "book_language",
                description: "EPUB 元信息中的语言代码",
            },
            FieldMeta {
                name: "allow_overwrite_files",
                description: "是否覆盖已存在的 rdata/epub 文件",
            },
        ];
        &FIELDS
    }

    fn validate(&self) -> Result<(), String> {
        if self.request_timeout == 0 {
            return Err("request_timeout 必须大于 0".to_string());
        }
        if !self.min_connect_timeout.is_finite() || self.min_connect_timeout <= 0.0 {
            return Err(format!(
                "min_connect_timeout 必须为正数: {}",
                self.min_connect_timeout
            ));
        }
        if self.book_language.trim().is_empty() {
            return Err("book_language 不能为空".to_string());
        }
        Ok(())
    }
}

impl Config {
    pub fn default_save_dir(&self) -> PathBuf {
        if self.save_path.trim().is_empty() {
            std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
        } else {
            PathBuf::from(&self.save_path)
        }
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.min_connect_timeout)
    }
}

/// 把书名等任意文本转为可用的文件名：Windows 禁用字符换成全角，
/// 去掉结尾的空格和点，避开保留设备名，并按字节长度截断。
pub fn safe_fs_name(name: &str, replacement: &str, max_len: usize) -> String {
    let mut cleaned: String = name
        .chars()
        .map(|ch| match ch {
            ':' => '：',
            '"' => '＂',
            '<' => '《',
            '>' => '》',
            '/' | '\\' => '、',
            '|' => '｜',
            '?' => '？',
            '*' => '＊',
            c if (c as u32) < 32 => replacement.chars().next().unwrap_or('_'),
            _ => ch,
        })
        .collect();

    trim_trailing(&mut cleaned);

    const RESERVED: [&str; 22] = [
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
        "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    if RESERVED.contains(&cleaned.to_uppercase().as_str()) {
        cleaned.insert(0, '_');
    }

    if cleaned.len() > max_len {
        // 不能在多字节字符中间截断
        let mut end = max_len;
        while end > 0 && !cleaned.is_char_boundary(end) {
            end -= 1;
        }
        cleaned.truncate(end);
        trim_trailing(&mut cleaned);
    }

    cleaned
}

fn trim_trailing(name: &mut String) {
    while name.ends_with(' ') || name.ends_with('.') {
        name.pop();
    }
    if name.is_empty() {
        name.push_str("unnamed");
    }
}

fn default_true() -> bool {
    true
}

fn default_settle_delay_ms() -> u64 {
    2000
}

fn default_request_timeout() -> u64 {
    15
}

fn default_min_connect_timeout() -> f64 {
    3.05
}

fn default_book_language() -> String {
    "zh".to_string()
}
