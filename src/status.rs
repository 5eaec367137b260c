// 该文件是 FKD （面部关键点检测） 项目的一部分。
// src/status.rs - 用户可见的状态信息
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

use std::fmt;

use crate::pipeline::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
  Idle,
  LoadingModel,
  ModelLoaded,
  ModelAlreadyLoaded,
  ModelLoadFailed,
  Processing,
  PredictionComplete,
  PredictionFailed,
}

impl Status {
  /// 预测失败时展示给用户的状态
  pub fn from_error(error: &PipelineError) -> Self {
    match error {
      PipelineError::Load(_) => Status::ModelLoadFailed,
      _ => Status::PredictionFailed,
    }
  }
}

impl fmt::Display for Status {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let text = match self {
      Status::Idle => "Status: idle",
      Status::LoadingModel => "Loading model...",
      Status::ModelLoaded => "Model loaded. Upload a face image.",
      Status::ModelAlreadyLoaded => "Model already loaded.",
      Status::ModelLoadFailed => "Model loading failed. Check console.",
      Status::Processing => "Processing image...",
      Status::PredictionComplete => "Prediction complete!",
      Status::PredictionFailed => "Error during prediction.",
    };
    f.write_str(text)
  }
}
