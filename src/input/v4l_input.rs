// 该文件是 FKD （面部关键点检测） 项目的一部分。
// src/input/v4l_input.rs - V4L 摄像头静帧输入
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

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;
use v4l::FourCC;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;

use crate::{FromUrl, FromUrlWithScheme};

const DEFAULT_DEVICE: &str = "/dev/video0";
const CAPTURE_WIDTH: u32 = 640;
const CAPTURE_HEIGHT: u32 = 480;
// 刚打开的摄像头前几帧曝光往往尚未稳定
const SKIP_FRAMES: usize = 3;

#[derive(Error, Debug)]
pub enum V4lInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("V4L error: {0}")]
  V4lError(#[from] std::io::Error),
  #[error("Unsupported pixel format: {0}")]
  UnsupportedPixelFormat(String),
  #[error("MJPG decode error: {0}")]
  DecodeError(#[from] image::ImageError),
  #[error("Captured buffer size mismatch: {0} bytes")]
  BufferSizeMismatch(usize),
}

/// 从摄像头截取一张静帧
#[derive(Debug, Clone)]
pub struct V4lInput {
  device_path: String,
}

impl FromUrlWithScheme for V4lInput {
  const SCHEME: &'static str = "v4l";
}

impl FromUrl for V4lInput {
  type Error = V4lInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(V4lInputError::SchemaMismatch);
    }

    // v4l:///dev/video0
    let device_path = if url.path().is_empty() || url.path() == "/" {
      DEFAULT_DEVICE.to_string()
    } else {
      url.path().to_string()
    };

    Ok(V4lInput { device_path })
  }
}

impl V4lInput {
  pub fn device_path(&self) -> &str {
    &self.device_path
  }

  /// 阻塞直到取得一帧
  pub fn capture_still(&self) -> Result<RgbImage, V4lInputError> {
    info!("打开摄像头: {}", self.device_path);
    let device = Device::with_path(&self.device_path)?;

    let mut format = device.format()?;
    format.width = CAPTURE_WIDTH;
    format.height = CAPTURE_HEIGHT;
    format.fourcc = FourCC::new(YUYV);
    // 驱动可能改用自己支持的格式
    let format = device.set_format(&format)?;
    debug!(
      "摄像头格式: {}x{} {} stride={}",
      format.width, format.height, format.fourcc, format.stride
    );
    if format.fourcc != FourCC::new(YUYV) && format.fourcc != FourCC::new(MJPG) {
      return Err(V4lInputError::UnsupportedPixelFormat(format.fourcc.to_string()));
    }

    let mut stream = Stream::with_buffers(&device, Type::VideoCapture, 4)?;
    for _ in 0..SKIP_FRAMES {
      stream.next()?;
    }
    let (buffer, meta) = stream.next()?;
    let used = (meta.bytesused as usize).min(buffer.len());
    let data = if used > 0 { &buffer[..used] } else { buffer };

    convert_frame(format.fourcc, format.width, format.height, format.stride, data)
  }
}

const YUYV: &[u8; 4] = b"YUYV";
const MJPG: &[u8; 4] = b"MJPG";

/// 按像素格式把一帧原始数据转换为 RGB
fn convert_frame(
  fourcc: FourCC,
  width: u32,
  height: u32,
  stride: u32,
  data: &[u8],
) -> Result<RgbImage, V4lInputError> {
  if fourcc == FourCC::new(MJPG) {
    return Ok(image::load_from_memory(data)?.to_rgb8());
  }
  if fourcc != FourCC::new(YUYV) {
    return Err(V4lInputError::UnsupportedPixelFormat(fourcc.to_string()));
  }

  let row_bytes = width as usize * 2;
  let stride = (stride as usize).max(row_bytes);
  let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
  for y in 0..height as usize {
    let start = y * stride;
    let row = data
      .get(start..start + row_bytes)
      .ok_or(V4lInputError::BufferSizeMismatch(data.len()))?;
    yuyv_to_rgb(row, &mut rgb);
  }

  let len = rgb.len();
  RgbImage::from_raw(width, height, rgb).ok_or(V4lInputError::BufferSizeMismatch(len))
}

/// 将一行 YUYV 数据转换为 RGB
fn yuyv_to_rgb(yuyv: &[u8], rgb: &mut Vec<u8>) {
  for chunk in yuyv.chunks_exact(4) {
    let u = chunk[1] as f32 - 128.0;
    let v = chunk[3] as f32 - 128.0;

    for y in [chunk[0] as f32, chunk[2] as f32] {
      let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
      let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
      let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
      rgb.extend_from_slice(&[r, g, b]);
    }
  }
}
