// 该文件是 FKD （面部关键点检测） 项目的一部分。
// src/model/fetch.rs - 模型资源获取
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// 默认的模型描述文件位置，相对于页面路径
pub const DEFAULT_MODEL_ASSET: &str = "model/model.json";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
  #[error("不支持的 URI 方案: {0}")]
  UnsupportedScheme(String),
  #[error("无效的 URL: {0}")]
  InvalidUrl(String),
  #[error("资源不存在: {0}")]
  NotFound(String),
  #[error("读取 {url} 失败: {message}")]
  Io { url: String, message: String },
  #[error("请求 {url} 失败: {message}")]
  Http { url: String, message: String },
  #[error("请求 {url} 返回状态码 {status}")]
  Status { url: String, status: u16 },
}

/// 按 URL 获取模型描述与权重分片
#[async_trait]
pub trait AssetFetcher: Send + Sync + 'static {
  async fn fetch(&self, url: &Url) -> Result<Bytes, FetchError>;
}

#[cfg(feature = "http_fetch")]
pub struct HttpFetcher {
  client: reqwest::Client,
}

#[cfg(feature = "http_fetch")]
impl HttpFetcher {
  pub fn new() -> Result<Self, FetchError> {
    use reqwest::header::{CACHE_CONTROL, HeaderMap, HeaderValue, PRAGMA};

    // 禁止中间代理返回过期的缓存
    let mut headers = HeaderMap::new();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));

    let client = reqwest::Client::builder()
      .default_headers(headers)
      .build()
      .map_err(|e| FetchError::Http {
        url: String::new(),
        message: e.to_string(),
      })?;

    Ok(Self { client })
  }
}

#[cfg(feature = "http_fetch")]
#[async_trait]
impl AssetFetcher for HttpFetcher {
  async fn fetch(&self, url: &Url) -> Result<Bytes, FetchError> {
    debug!("HTTP 获取: {}", url);
    let http_error = |e: reqwest::Error| FetchError::Http {
      url: url.to_string(),
      message: e.to_string(),
    };

    let response = self.client.get(url.clone()).send().await.map_err(http_error)?;
    let status = response.status();
    if !status.is_success() {
      return Err(FetchError::Status {
        url: url.to_string(),
        status: status.as_u16(),
      });
    }

    let bytes = response.bytes().await.map_err(http_error)?;
    debug!("HTTP 获取完成: {} ({} 字节)", url, bytes.len());
    Ok(bytes)
  }
}

/// 读取本地 file:// 资源
#[derive(Debug, Default, Clone, Copy)]
pub struct FileFetcher;

#[async_trait]
impl AssetFetcher for FileFetcher {
  async fn fetch(&self, url: &Url) -> Result<Bytes, FetchError> {
    if url.scheme() != "file" {
      return Err(FetchError::UnsupportedScheme(url.scheme().to_string()));
    }
    let path = url
      .to_file_path()
      .map_err(|_| FetchError::InvalidUrl(url.to_string()))?;

    debug!("读取文件: {}", path.display());
    match tokio::fs::read(&path).await {
      Ok(data) => Ok(Bytes::from(data)),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        Err(FetchError::NotFound(url.to_string()))
      }
      Err(e) => Err(FetchError::Io {
        url: url.to_string(),
        message: e.to_string(),
      }),
    }
  }
}

/// 内存中的资源表，查找时忽略查询参数
#[derive(Debug, Default, Clone)]
pub struct StaticFetcher {
  assets: HashMap<String, Bytes>,
}

impl StaticFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&mut self, url: &Url, data: impl Into<Bytes>) {
    self.assets.insert(Self::key(url), data.into());
  }

  pub fn with(mut self, url: &Url, data: impl Into<Bytes>) -> Self {
    self.insert(url, data);
    self
  }

  fn key(url: &Url) -> String {
    let mut key = url.clone();
    key.set_query(None);
    key.set_fragment(None);
    key.into()
  }
}

#[async_trait]
impl AssetFetcher for StaticFetcher {
  async fn fetch(&self, url: &Url) -> Result<Bytes, FetchError> {
    self
      .assets
      .get(&Self::key(url))
      .cloned()
      .ok_or_else(|| FetchError::NotFound(url.to_string()))
  }
}

/// 按 URL 方案分派到 HTTP 或本地文件
pub struct FetcherWrapper {
  #[cfg(feature = "http_fetch")]
  http: HttpFetcher,
  file: FileFetcher,
}

impl FetcherWrapper {
  pub fn new() -> Result<Self, FetchError> {
    Ok(Self {
      #[cfg(feature = "http_fetch")]
      http: HttpFetcher::new()?,
      file: FileFetcher,
    })
  }
}

#[async_trait]
impl AssetFetcher for FetcherWrapper {
  async fn fetch(&self, url: &Url) -> Result<Bytes, FetchError> {
    match url.scheme() {
      #[cfg(feature = "http_fetch")]
      "http" | "https" => self.http.fetch(url).await,
      "file" => self.file.fetch(url).await,
      other => Err(FetchError::UnsupportedScheme(other.to_string())),
    }
  }
}

/// 将资源路径解析为相对于页面所在目录的 URL
///
/// 页面路径以 `/` 结尾时直接拼接；最后一段看起来像文件名（包含 `.`）时使用其所在目录；
/// 否则视为目录并补上 `/`。`asset` 可以携带查询参数。
pub fn resolve_asset_url(page: &Url, asset: &str) -> Result<Url, FetchError> {
  let path = page.path();
  let base = if path.ends_with('/') {
    path.to_string()
  } else {
    let last_slash = path.rfind('/').map(|i| i + 1).unwrap_or(0);
    let last_segment = &path[last_slash..];
    if last_segment.contains('.') {
      path[..last_slash].to_string()
    } else {
      format!("{}/", path)
    }
  };

  let (asset_path, query) = match asset.split_once('?') {
    Some((p, q)) => (p, Some(q)),
    None => (asset, None),
  };

  let mut url = page.clone();
  url.set_path(&format!("{}{}", base, asset_path.trim_start_matches('/')));
  url.set_query(query);
  url.set_fragment(None);
  Ok(url)
}

/// `.json` 结尾的 URL 即模型描述文件，其余视为页面地址
pub fn resolve_model_url(url: &Url) -> Result<Url, FetchError> {
  if url.cannot_be_a_base() {
    return Err(FetchError::InvalidUrl(url.to_string()));
  }
  if url.path().ends_with(".json") {
    Ok(url.clone())
  } else {
    resolve_asset_url(url, DEFAULT_MODEL_ASSET)
  }
}
