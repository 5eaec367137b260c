// 该文件是 FKD （面部关键点检测） 项目的一部分。
// src/pipeline.rs - 推理管线
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

//! 图像 → 96x96 灰度张量 → 模型 → 30 个坐标 → 叠加层。
//!
//! 任何一步失败都会中止本次预测，叠加层保持不变，模型加载状态也不受影响。

use std::fmt::Display;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::{
  frame::{AsNhwcFrame, FaceFrame},
  input::{ImageSource, PreprocessError},
  keypoints::{COORD_COUNT, Keypoints},
  model::{InferenceError, LoadError, LoadPhase, Model, ModelProvider},
  output::Render,
  status::Status,
  tensor::TensorRegistry,
};

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("模型加载失败: {0}")]
  Load(#[from] LoadError),
  #[error("预处理失败: {0}")]
  Preprocess(#[from] PreprocessError),
  #[error("推理失败: {0}")]
  Inference(#[from] InferenceError),
  #[error("渲染失败: {0}")]
  Render(String),
}

pub struct PipelineBuilder {
  serialize: bool,
  registry: TensorRegistry,
}

impl Default for PipelineBuilder {
  fn default() -> Self {
    Self {
      serialize: true,
      registry: TensorRegistry::new(),
    }
  }
}

impl PipelineBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  /// 是否串行执行预测；串行时完成顺序与提交顺序一致
  pub fn serialize(mut self, serialize: bool) -> Self {
    self.serialize = serialize;
    self
  }

  pub fn registry(mut self, registry: TensorRegistry) -> Self {
    self.registry = registry;
    self
  }

  pub fn build<P, O>(self, provider: Arc<P>, output: O) -> Pipeline<P, O>
  where
    P: ModelProvider,
    O: Render<FaceFrame, Keypoints>,
  {
    Pipeline {
      provider,
      output,
      registry: self.registry,
      gate: self.serialize.then(|| tokio::sync::Mutex::new(())),
      status: Mutex::new(Status::Idle),
    }
  }
}

pub struct Pipeline<P, O> {
  provider: Arc<P>,
  output: O,
  registry: TensorRegistry,
  gate: Option<tokio::sync::Mutex<()>>,
  status: Mutex<Status>,
}

impl<P, O> Pipeline<P, O>
where
  P: ModelProvider,
  O: Render<FaceFrame, Keypoints>,
  O::Error: Display,
{
  pub fn provider(&self) -> &Arc<P> {
    &self.provider
  }

  pub fn output(&self) -> &O {
    &self.output
  }

  pub fn registry(&self) -> &TensorRegistry {
    &self.registry
  }

  /// 最近一次操作后的状态
  pub fn status(&self) -> Status {
    *self.status.lock()
  }

  fn set_status(&self, status: Status) {
    info!("{}", status);
    *self.status.lock() = status;
  }

  /// 主动加载模型
  pub async fn load_model(&self) -> Result<Status, PipelineError> {
    if self.provider.phase() == LoadPhase::Loaded {
      self.set_status(Status::ModelAlreadyLoaded);
      return Ok(Status::ModelAlreadyLoaded);
    }

    self.set_status(Status::LoadingModel);
    match self.provider.get_model().await {
      Ok(_) => {
        self.set_status(Status::ModelLoaded);
        Ok(Status::ModelLoaded)
      }
      Err(e) => {
        error!("模型加载失败: {}", e);
        self.set_status(Status::ModelLoadFailed);
        Err(e.into())
      }
    }
  }

  /// 对一张图像预测关键点并渲染到输出
  pub async fn predict(&self, source: ImageSource) -> Result<Keypoints, PipelineError> {
    let _guard = match &self.gate {
      Some(gate) => Some(gate.lock().await),
      None => None,
    };

    self.set_status(Status::Processing);
    match self.run(source).await {
      Ok(keypoints) => {
        self.set_status(Status::PredictionComplete);
        Ok(keypoints)
      }
      Err(e) => {
        error!("预测失败: {}", e);
        self.set_status(Status::from_error(&e));
        Err(e)
      }
    }
  }

  async fn run(&self, source: ImageSource) -> Result<Keypoints, PipelineError> {
    let model = self.provider.get_model().await?;
    let frame = decode_frame(source).await?;

    let registry = self.registry.clone();
    let input = frame.clone();
    let now = std::time::Instant::now();
    let keypoints = tokio::task::spawn_blocking(move || infer(&*model, &registry, &input))
      .await
      .map_err(|e| InferenceError::TaskFailed(e.to_string()))??;
    debug!("推理完成，耗时: {:.2?}", now.elapsed());

    self
      .output
      .render_result(&frame, &keypoints)
      .map_err(|e| PipelineError::Render(e.to_string()))?;

    Ok(keypoints)
  }
}

/// 解码任意尺寸的图像并转换为模型输入帧
pub async fn decode_frame(source: ImageSource) -> Result<FaceFrame, PreprocessError> {
  tokio::task::spawn_blocking(move || {
    let image = source.decode()?;
    debug!("解码图像: {}x{}", image.width(), image.height());
    Ok(FaceFrame::from_image(&image))
  })
  .await
  .map_err(|e| PreprocessError::TaskFailed(e.to_string()))?
}

/// 同步执行一次推理，所有中间张量在返回前释放
pub fn infer<M: Model + ?Sized>(
  model: &M,
  registry: &TensorRegistry,
  frame: &FaceFrame,
) -> Result<Keypoints, InferenceError> {
  let input = registry.from_vec(&frame.tensor_shape(), frame.as_nhwc().to_vec())?;
  let prediction = model.predict(&input)?;
  if prediction.len() > 1 {
    debug!("模型有 {} 个输出, 只使用第一个", prediction.len());
  }

  let output = prediction.into_primary().ok_or(InferenceError::MissingOutput)?;
  let values = output.to_vec();
  Keypoints::from_slice(&values).ok_or(InferenceError::OutputShape {
    expected: COORD_COUNT,
    actual: values.len(),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::Prediction;
  use crate::tensor::Tensor;

  struct ShapeModel {
    outputs: Vec<usize>,
  }

  impl Model for ShapeModel {
    fn input_shape(&self) -> &[usize] {
      &[96, 96, 1]
    }

    fn predict(&self, input: &Tensor) -> Result<Prediction, InferenceError> {
      let registry = input.registry();
      let tensors: Vec<Tensor> = self.outputs.iter().map(|&n| registry.zeros(&[1, n])).collect();
      Ok(Prediction::Multiple(tensors))
    }
  }

  #[test]
  fn test_infer_uses_first_output() {
    let registry = TensorRegistry::new();
    let model = ShapeModel {
      outputs: vec![COORD_COUNT, 4],
    };
    let keypoints = infer(&model, &registry, &FaceFrame::default()).unwrap();
    assert_eq!(keypoints.as_slice(), &[0.0; COORD_COUNT]);
    assert_eq!(registry.live(), 0);
    assert_eq!(registry.allocated(), 3);
  }

  #[test]
  fn test_infer_rejects_wrong_output_length() {
    let registry = TensorRegistry::new();
    let model = ShapeModel { outputs: vec![28] };
    let result = infer(&model, &registry, &FaceFrame::default());
    assert!(matches!(
      result,
      Err(InferenceError::OutputShape {
        expected: 30,
        actual: 28
      })
    ));
    assert_eq!(registry.live(), 0);
  }

  #[test]
  fn test_infer_missing_output() {
    let registry = TensorRegistry::new();
    let model = ShapeModel { outputs: vec![] };
    let result = infer(&model, &registry, &FaceFrame::default());
    assert!(matches!(result, Err(InferenceError::MissingOutput)));
    assert_eq!(registry.live(), 0);
  }
}
