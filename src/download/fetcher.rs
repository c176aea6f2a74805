//! 图片下载。单张失败只告警，不中断整本书。

use std::io::{Seek, Write};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{ACCEPT, ACCEPT_ENCODING, CONNECTION, HeaderMap, HeaderValue};
use thiserror::Error;
use tracing::debug;

use crate::base_system::report::{Notice, Reporter};
use crate::rdata::model::image_entry;
use crate::rdata::{ArchiveError, RawArchiveWriter};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("图片地址为空")]
    EmptyUrl,
    #[error("HTTP {status}")]
    Status { status: u16 },
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
}

#[async_trait]
pub trait AssetFetch: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, connect_timeout: Duration) -> Result<Self, FetchError> {
        // reqwest 未启用 gzip 解码，要求服务端按原样返回。
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl AssetFetch for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(FetchError::EmptyUrl);
        }
        // 协议相对地址（`//host/path`）按 https 处理。
        let url = match url.strip_prefix("//") {
            Some(rest) => format!("https://{rest}"),
            None => url.to_string(),
        };
        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

/// 下载 `url` 并存为 `Images/{name}.jpg`。
///
/// 返回是否新写入了条目；同名图片已存在时不再请求。
/// 网络或 HTTP 失败只上报，返回 `Ok(false)`；写入原始数据文件失败才返回错误。
pub async fn fetch_asset<F, W>(
    fetcher: &F,
    url: &str,
    name: &str,
    writer: &mut RawArchiveWriter<W>,
    reporter: &dyn Reporter,
) -> Result<bool, ArchiveError>
where
    F: AssetFetch + ?Sized,
    W: Write + Seek,
{
    if writer.contains(&image_entry(name)) {
        return Ok(false);
    }
    match fetcher.fetch(url).await {
        Ok(data) => {
            debug!(target: "fetch", url, name, bytes = data.len(), "asset fetched");
            writer.write_image(name, &data)
        }
        Err(err) => {
            debug!(target: "fetch", url, error = %err, "asset fetch failed");
            reporter.notice(Notice::AssetFetchFailed {
                url: url.to_string(),
                reason: err.to_string(),
            });
            Ok(false)
        }
    }
}
