// 该文件是 FKD （面部关键点检测） 项目的一部分。
// src/input.rs - 图像输入
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

mod image_source;
pub use self::image_source::ImageSource;

#[cfg(feature = "camera_input")]
mod v4l_input;
#[cfg(feature = "camera_input")]
pub use self::v4l_input::{V4lInput, V4lInputError};

/// 图像解码或预处理失败
#[derive(Error, Debug)]
pub enum PreprocessError {
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Unable to load the selected image: {0}")]
  DecodeError(#[from] image::ImageError),
  #[cfg(feature = "camera_input")]
  #[error("Camera capture error: {0}")]
  CameraError(#[from] V4lInputError),
  #[error("URI scheme mismatch: {0}")]
  SchemeMismatch(String),
  #[error("Decode task failed: {0}")]
  TaskFailed(String),
}
