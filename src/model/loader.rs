// 该文件是 FKD （面部关键点检测） 项目的一部分。
// src/model/loader.rs - 模型懒加载
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

//! 模型只加载一次。
//!
//! `ModelLoader::get_model` 在模型已加载时直接返回句柄；加载进行中时，
//! 所有调用者等待同一个加载过程并得到同一个结果；加载失败后状态回到
//! `Unloaded`，下一次调用重新获取全部资源。

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use super::fetch::{AssetFetcher, FetchError, resolve_model_url};
use super::layers_model::LayersModel;
use super::Model;
use crate::FromUrl;
use crate::tensor::TensorRegistry;

/// 缓存令牌使用的查询参数名
pub const CACHE_BUST_PARAM: &str = "v";

#[derive(Error, Debug, Clone)]
pub enum LoadError {
  #[error("获取模型资源失败: {0}")]
  Fetch(#[from] FetchError),
  #[error("模型描述无效: {0}")]
  Descriptor(String),
  #[error("模型权重无效: {0}")]
  Weights(String),
  #[error("模型加载超时 ({0:?})")]
  Timeout(Duration),
  #[error("模型预热失败: {0}")]
  Warmup(String),
  #[error("加载任务失败: {0}")]
  TaskFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
  Unloaded,
  Loading,
  Loaded,
}

/// 向推理管线提供模型
#[async_trait]
pub trait ModelProvider: Send + Sync + 'static {
  type Model: Model + 'static;

  async fn get_model(&self) -> Result<Arc<Self::Model>, LoadError>;

  fn phase(&self) -> LoadPhase;
}

type SharedLoad = Shared<BoxFuture<'static, Result<Arc<LayersModel>, LoadError>>>;

enum LoadState {
  Unloaded,
  Loading { attempt: u64, future: SharedLoad },
  Loaded(Arc<LayersModel>),
}

pub struct ModelLoaderBuilder {
  url: Url,
  cache_bust: Option<String>,
  timeout: Option<Duration>,
  registry: TensorRegistry,
}

impl FromUrl for ModelLoaderBuilder {
  type Error = LoadError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    Ok(ModelLoaderBuilder {
      url: resolve_model_url(url)?,
      cache_bust: None,
      timeout: None,
      registry: TensorRegistry::new(),
    })
  }
}

impl ModelLoaderBuilder {
  pub fn cache_bust(mut self, token: impl Into<String>) -> Self {
    self.cache_bust = Some(token.into());
    self
  }

  /// 以当前时间戳作为缓存令牌
  pub fn cache_bust_auto(self) -> Self {
    let token = chrono::Utc::now().timestamp_millis().to_string();
    self.cache_bust(token)
  }

  pub fn timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }

  /// 预热推理使用的张量登记表
  pub fn registry(mut self, registry: TensorRegistry) -> Self {
    self.registry = registry;
    self
  }

  pub fn build<F: AssetFetcher>(self, fetcher: F) -> ModelLoader<F> {
    let mut url = self.url;
    if let Some(token) = &self.cache_bust {
      url.query_pairs_mut().append_pair(CACHE_BUST_PARAM, token);
    }
    info!("模型描述地址: {}", url);

    ModelLoader {
      fetcher: Arc::new(fetcher),
      url,
      timeout: self.timeout,
      registry: self.registry,
      state: Mutex::new(LoadState::Unloaded),
      attempts: Mutex::new(0),
    }
  }
}

pub struct ModelLoader<F: AssetFetcher> {
  fetcher: Arc<F>,
  url: Url,
  timeout: Option<Duration>,
  registry: TensorRegistry,
  state: Mutex<LoadState>,
  attempts: Mutex<u64>,
}

impl<F: AssetFetcher> ModelLoader<F> {
  /// 实际请求的模型描述地址（含缓存令牌）
  pub fn url(&self) -> &Url {
    &self.url
  }

  pub fn registry(&self) -> &TensorRegistry {
    &self.registry
  }

  pub fn fetcher(&self) -> &F {
    &self.fetcher
  }

  /// 已开始的加载次数
  pub fn attempts(&self) -> u64 {
    *self.attempts.lock()
  }

  fn start_load(&self) -> BoxFuture<'static, Result<Arc<LayersModel>, LoadError>> {
    let fetcher = self.fetcher.clone();
    let url = self.url.clone();
    let registry = self.registry.clone();
    let timeout = self.timeout;

    async move {
      let load = async {
        let model = LayersModel::load(&*fetcher, &url).await?;
        warm_up(model, registry).await
      };
      // 解析中的 panic 同样视为一次失败的加载
      let load = AssertUnwindSafe(load).catch_unwind().map(|result| {
        result.unwrap_or_else(|panic| Err(LoadError::TaskFailed(panic_message(&*panic))))
      });

      match timeout {
        Some(limit) => tokio::time::timeout(limit, load)
          .await
          .map_err(|_| LoadError::Timeout(limit))?,
        None => load.await,
      }
    }
    .boxed()
  }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
  if let Some(message) = panic.downcast_ref::<&str>() {
    message.to_string()
  } else if let Some(message) = panic.downcast_ref::<String>() {
    message.clone()
  } else {
    "未知的 panic".to_string()
  }
}

/// 用全零输入执行一次推理，结果立即释放
async fn warm_up(model: LayersModel, registry: TensorRegistry) -> Result<Arc<LayersModel>, LoadError> {
  let model = Arc::new(model);
  let worker = model.clone();

  tokio::task::spawn_blocking(move || {
    let mut shape = vec![1];
    shape.extend_from_slice(worker.input_shape());
    let input = registry.zeros(&shape);
    let prediction = worker
      .predict(&input)
      .map_err(|e| LoadError::Warmup(e.to_string()))?;
    debug!("预热完成, {} 个输出", prediction.len());
    Ok::<(), LoadError>(())
  })
  .await
  .map_err(|e| LoadError::TaskFailed(e.to_string()))??;

  Ok(model)
}

#[async_trait]
impl<F: AssetFetcher> ModelProvider for ModelLoader<F> {
  type Model = LayersModel;

  async fn get_model(&self) -> Result<Arc<LayersModel>, LoadError> {
    let (attempt, future) = {
      let mut state = self.state.lock();
      match &*state {
        LoadState::Loaded(model) => {
          debug!("模型已加载");
          return Ok(model.clone());
        }
        LoadState::Loading { attempt, future } => {
          debug!("等待进行中的模型加载 (#{})", attempt);
          (*attempt, future.clone())
        }
        LoadState::Unloaded => {
          let attempt = {
            let mut attempts = self.attempts.lock();
            *attempts += 1;
            *attempts
          };
          info!("开始加载模型 (#{}): {}", attempt, self.url);
          let future = self.start_load().shared();
          *state = LoadState::Loading {
            attempt,
            future: future.clone(),
          };
          (attempt, future)
        }
      }
    };

    let result = future.await;

    let mut state = self.state.lock();
    if let LoadState::Loading { attempt: current, .. } = &*state
      && *current == attempt
    {
      *state = match &result {
        Ok(model) => {
          info!("模型加载完成 (#{})", attempt);
          LoadState::Loaded(model.clone())
        }
        Err(e) => {
          error!("模型加载失败 (#{}): {}", attempt, e);
          LoadState::Unloaded
        }
      };
    } else if result.is_err() {
      warn!("模型加载失败 (#{}), 状态已由其他调用者更新", attempt);
    }

    result
  }

  fn phase(&self) -> LoadPhase {
    match &*self.state.lock() {
      LoadState::Unloaded => LoadPhase::Unloaded,
      LoadState::Loading { .. } => LoadPhase::Loading,
      LoadState::Loaded(_) => LoadPhase::Loaded,
    }
  }
}
