// 该文件是 FKD （面部关键点检测） 项目的一部分。
// src/model.rs - 模型
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

use thiserror::Error;

use crate::tensor::{Tensor, TensorError};

#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("模型预测没有返回张量输出")]
  MissingOutput,
  #[error("模型输出形状错误: 期望 {expected} 个数值, 实际为 {actual}")]
  OutputShape { expected: usize, actual: usize },
  #[error("输入形状 {actual:?} 与模型期望 {expected:?} 不一致")]
  InputShape {
    expected: Vec<usize>,
    actual: Vec<usize>,
  },
  #[error("层 {layer} 计算失败: {reason}")]
  Layer { layer: String, reason: String },
  #[error("张量错误: {0}")]
  Tensor(#[from] TensorError),
  #[error("推理任务失败: {0}")]
  TaskFailed(String),
}

/// 一次预测的输出，可能是单个张量或多个张量
#[derive(Debug)]
pub enum Prediction {
  Single(Tensor),
  Multiple(Vec<Tensor>),
}

impl Prediction {
  pub fn len(&self) -> usize {
    match self {
      Prediction::Single(_) => 1,
      Prediction::Multiple(tensors) => tensors.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// 取第一个输出，其余输出在此释放
  pub fn into_primary(self) -> Option<Tensor> {
    match self {
      Prediction::Single(tensor) => Some(tensor),
      Prediction::Multiple(tensors) => tensors.into_iter().next(),
    }
  }
}

/// 加载完成后只读共享的推理模型
pub trait Model: Send + Sync {
  /// 单个样本的输入形状，不含批维度
  fn input_shape(&self) -> &[usize];

  fn predict(&self, input: &Tensor) -> Result<Prediction, InferenceError>;
}

mod fetch;
mod layers;
mod layers_model;
mod loader;
mod weights;

#[cfg(feature = "http_fetch")]
pub use self::fetch::HttpFetcher;
pub use self::fetch::{
  AssetFetcher, FetchError, FetcherWrapper, FileFetcher, StaticFetcher, resolve_asset_url,
  resolve_model_url,
};
pub use self::layers::{Activation, Padding};
pub use self::layers_model::{LayersModel, ModelDescriptor, Quantization, WeightSpec, WeightsGroup};
pub use self::loader::{LoadError, LoadPhase, ModelLoader, ModelLoaderBuilder, ModelProvider};
pub use self::weights::{WeightMap, decode_weights};

#[cfg(test)]
mod tests {
  use super::*;
  use crate::tensor::TensorRegistry;

  #[test]
  fn test_into_primary_releases_the_rest() {
    let registry = TensorRegistry::new();
    let prediction = Prediction::Multiple(vec![
      registry.zeros(&[1, 30]),
      registry.zeros(&[1, 2]),
      registry.zeros(&[1, 4]),
    ]);
    assert_eq!(prediction.len(), 3);

    let primary = prediction.into_primary().unwrap();
    assert_eq!(primary.shape(), &[1, 30]);
    assert_eq!(registry.live(), 1);
  }

  #[test]
  fn test_empty_prediction_has_no_primary() {
    let prediction = Prediction::Multiple(Vec::new());
    assert!(prediction.is_empty());
    assert!(prediction.into_primary().is_none());
  }

  #[test]
  fn test_error_messages() {
    assert_eq!(InferenceError::MissingOutput.to_string(), "模型预测没有返回张量输出");
    let shape = InferenceError::OutputShape {
      expected: 30,
      actual: 28,
    };
    assert_eq!(shape.to_string(), "模型输出形状错误: 期望 30 个数值, 实际为 28");
  }
}
