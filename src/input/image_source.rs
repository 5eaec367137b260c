// 该文件是 FKD （面部关键点检测） 项目的一部分。
// src/input/image_source.rs - 图片输入源
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

use std::path::PathBuf;

use image::{DynamicImage, ImageReader};
use tracing::{debug, error};
use url::Url;

use super::PreprocessError;
use crate::{FromUrl, FromUrlWithScheme};

const FILE_SCHEME: &str = "file";

/// 待预测的图像来源
#[derive(Debug, Clone)]
pub enum ImageSource {
  /// 上传的文件内容 (PNG/JPEG)
  Bytes(Vec<u8>),
  /// 本地图片文件
  Path(PathBuf),
  /// 已解码的图像
  Decoded(DynamicImage),
  /// 摄像头，解码时截取一帧
  #[cfg(feature = "camera_input")]
  Camera(super::V4lInput),
}

impl ImageSource {
  /// 解码为任意尺寸的像素缓冲
  pub fn decode(self) -> Result<DynamicImage, PreprocessError> {
    let image = match self {
      ImageSource::Bytes(bytes) => {
        debug!("从内存解码图片, {} 字节", bytes.len());
        image::load_from_memory(&bytes)?
      }
      ImageSource::Path(path) => {
        debug!("从文件解码图片: {}", path.display());
        ImageReader::open(&path)?.with_guessed_format()?.decode()?
      }
      ImageSource::Decoded(image) => image,
      #[cfg(feature = "camera_input")]
      ImageSource::Camera(camera) => DynamicImage::ImageRgb8(camera.capture_still()?),
    };

    debug!("图片尺寸: {}x{}", image.width(), image.height());
    Ok(image)
  }
}

impl FromUrlWithScheme for ImageSource {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageSource {
  type Error = PreprocessError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      Self::SCHEME => Ok(ImageSource::Path(PathBuf::from(url.path()))),
      FILE_SCHEME => url
        .to_file_path()
        .map(ImageSource::Path)
        .map_err(|_| PreprocessError::SchemeMismatch(format!("无效的文件路径: {}", url))),
      #[cfg(feature = "camera_input")]
      super::V4lInput::SCHEME => Ok(ImageSource::Camera(super::V4lInput::from_url(url)?)),
      other => {
        error!(
          "URI scheme mismatch: expected '{}' or '{}', found '{}'",
          Self::SCHEME,
          FILE_SCHEME,
          other
        );
        Err(PreprocessError::SchemeMismatch(other.to_string()))
      }
    }
  }
}
