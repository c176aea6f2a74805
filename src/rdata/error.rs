use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("未找到原始数据文件: {}", path.display())]
    NotFound { path: PathBuf },
    #[error("{} 不是一个合法的原始数据文件: {source}", path.display())]
    Invalid {
        path: PathBuf,
        source: zip::result::ZipError,
    },
    #[error("原始数据文件缺少 {name}")]
    MissingEntry { name: String },
    #[error("{name} 格式错误: {source}")]
    Metadata {
        name: String,
        source: serde_json::Error,
    },
    #[error("元信息字段 {field} 取值非法: {value:?}")]
    InvalidField { field: &'static str, value: String },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl ArchiveError {
    /// 必需的元信息缺失或无法解析。
    pub fn is_metadata_problem(&self) -> bool {
        matches!(
            self,
            ArchiveError::MissingEntry { .. }
                | ArchiveError::Metadata { .. }
                | ArchiveError::InvalidField { .. }
        )
    }

    /// 进程退出码：3 文件不存在，4 不是 zip，5 元信息问题，其余 10。
    pub fn exit_code(&self) -> u8 {
        match self {
            ArchiveError::NotFound { .. } => 3,
            ArchiveError::Invalid { .. } => 4,
            e if e.is_metadata_problem() => 5,
            _ => 10,
        }
    }
}
