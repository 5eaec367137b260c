// 该文件是 FKD （面部关键点检测） 项目的一部分。
// src/frame.rs - NHWC 灰度帧定义
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

use image::{DynamicImage, Rgb, RgbImage, imageops::FilterType};
use thiserror::Error;

const GRAY_CHANNELS: usize = 1;

/// 亮度加权系数 (R, G, B)
pub const LUMA_WEIGHTS: [f32; 3] = [0.299, 0.587, 0.114];

/// 模型输入边长
pub const FACE_FRAME_SIZE: u32 = 96;

/// 模型输入帧：96x96 单通道
pub type FaceFrame = GrayNhwcFrame<FACE_FRAME_SIZE, FACE_FRAME_SIZE>;

pub trait AsNhwcFrame<const W: u32, const H: u32> {
  fn as_nhwc(&self) -> &[f32];
}

#[derive(Error, Debug)]
#[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
pub struct FrameSizeError {
  pub expected: usize,
  pub actual: usize,
}

/// 像素的归一化亮度，alpha 通道不参与计算
pub fn luma(r: u8, g: u8, b: u8) -> f32 {
  (LUMA_WEIGHTS[0] * r as f32 + LUMA_WEIGHTS[1] * g as f32 + LUMA_WEIGHTS[2] * b as f32) / 255.0
}

/// 归一化到 [0, 1] 的灰度帧，按行优先存储
#[derive(Debug, Clone, PartialEq)]
pub struct GrayNhwcFrame<const W: u32, const H: u32> {
  data: Box<[f32]>,
}

impl<const W: u32, const H: u32> TryFrom<Vec<f32>> for GrayNhwcFrame<W, H> {
  type Error = FrameSizeError;

  fn try_from(data: Vec<f32>) -> Result<Self, Self::Error> {
    let expected = GRAY_CHANNELS * W as usize * H as usize;
    if data.len() != expected {
      return Err(FrameSizeError {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      data: data.into_boxed_slice(),
    })
  }
}

impl<const W: u32, const H: u32> Default for GrayNhwcFrame<W, H> {
  fn default() -> Self {
    let size = GRAY_CHANNELS * (W as usize) * (H as usize);
    let data = vec![0f32; size].into_boxed_slice();
    Self { data }
  }
}

impl<const W: u32, const H: u32> GrayNhwcFrame<W, H> {
  /// 缩放到 WxH 并转换为灰度
  pub fn from_image(image: &DynamicImage) -> Self {
    let rgba = if image.width() == W && image.height() == H {
      image.to_rgba8()
    } else {
      image.resize_exact(W, H, FilterType::Triangle).to_rgba8()
    };

    let data = rgba
      .pixels()
      .map(|pixel| luma(pixel[0], pixel[1], pixel[2]))
      .collect::<Vec<_>>()
      .into_boxed_slice();

    Self { data }
  }

  pub fn height(&self) -> usize {
    H as usize
  }

  pub fn width(&self) -> usize {
    W as usize
  }

  pub fn channels(&self) -> usize {
    GRAY_CHANNELS
  }

  /// 张量形状 (1, H, W, 1)
  pub fn tensor_shape(&self) -> [usize; 4] {
    [1, H as usize, W as usize, GRAY_CHANNELS]
  }

  /// 还原为可绘制的 RGB 图像
  pub fn to_rgb_image(&self) -> RgbImage {
    RgbImage::from_fn(W, H, |x, y| {
      let idx = (y * W + x) as usize;
      let v = (self.data[idx] * 255.0).round().clamp(0.0, 255.0) as u8;
      Rgb([v, v, v])
    })
  }
}

impl<const W: u32, const H: u32> AsNhwcFrame<W, H> for GrayNhwcFrame<W, H> {
  fn as_nhwc(&self) -> &[f32] {
    &self.data
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{Rgba, RgbaImage};

  #[test]
  fn test_gradient_matches_luma_formula() {
    let image = RgbaImage::from_fn(96, 96, |x, y| {
      Rgba([
        (x * 255 / 95) as u8,
        (y * 255 / 95) as u8,
        ((x + y) * 255 / 190) as u8,
        (x % 7 * 30) as u8,
      ])
    });
    let frame = FaceFrame::from_image(&DynamicImage::ImageRgba8(image.clone()));

    for (i, pixel) in image.pixels().enumerate() {
      let expected = (0.299 * pixel[0] as f64 + 0.587 * pixel[1] as f64 + 0.114 * pixel[2] as f64)
        / 255.0;
      let actual = frame.as_nhwc()[i] as f64;
      assert!(
        (actual - expected).abs() < 1e-6,
        "pixel {i}: {actual} != {expected}"
      );
    }
  }

  #[test]
  fn test_any_size_is_resampled_to_frame() {
    let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(300, 200, Rgb([255, 255, 255])));
    let frame = FaceFrame::from_image(&image);

    assert_eq!(frame.as_nhwc().len(), 96 * 96);
    assert!(frame.as_nhwc().iter().all(|v| (v - 1.0).abs() < 1e-5));
    assert_eq!(frame.tensor_shape(), [1, 96, 96, 1]);
  }

  #[test]
  fn test_try_from_rejects_wrong_length() {
    let err = GrayNhwcFrame::<4, 4>::try_from(vec![0.0; 15]).unwrap_err();
    assert_eq!(err.expected, 16);
    assert_eq!(err.actual, 15);
  }

  #[test]
  fn test_to_rgb_image_scales_back() {
    let frame = GrayNhwcFrame::<2, 1>::try_from(vec![0.0, 1.0]).unwrap();
    let image = frame.to_rgb_image();
    assert_eq!(image.get_pixel(0, 0), &Rgb([0, 0, 0]));
    assert_eq!(image.get_pixel(1, 0), &Rgb([255, 255, 255]));
  }
}
