//! 下载流程模块入口。
//!
//! 子模块：
//! - `source`    ：阅读器会话接口与录制回放实现
//! - `fetcher`   ：图片下载
//! - `extractor` ：逐章抓取并写入原始数据文件
//! - `progress`  ：CLI 进度条

pub mod extractor;
pub mod fetcher;
pub mod progress;
pub mod source;
