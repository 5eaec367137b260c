// 该文件是 FKD （面部关键点检测） 项目的一部分。
// src/output/overlay.rs - 内存中的叠加层
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

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use image::RgbImage;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::GrayNhwcFrame,
  keypoints::Keypoints,
  output::{
    Render,
    draw::{Draw, DrawKeypointsOnFrame},
  },
};

#[derive(Error, Debug)]
pub enum OverlayError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

struct OverlayInner {
  draw: Draw,
  image: Mutex<Option<RgbImage>>,
  renders: AtomicU64,
}

/// 展示预测结果的画布，克隆后共享同一块画布，后写入者覆盖先写入者
#[derive(Clone)]
pub struct OverlaySurface {
  inner: Arc<OverlayInner>,
}

impl Default for OverlaySurface {
  fn default() -> Self {
    Self::with_draw(Draw::default())
  }
}

impl FromUrlWithScheme for OverlaySurface {
  const SCHEME: &'static str = "overlay";
}

impl FromUrl for OverlaySurface {
  type Error = OverlayError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OverlayError::SchemeMismatch(format!(
        "期望输出方式 '{}', 实际输出方式 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }

    Ok(Self::default())
  }
}

impl OverlaySurface {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_draw(draw: Draw) -> Self {
    Self {
      inner: Arc::new(OverlayInner {
        draw,
        image: Mutex::new(None),
        renders: AtomicU64::new(0),
      }),
    }
  }

  /// 当前画布内容，尚未渲染时为 `None`
  pub fn snapshot(&self) -> Option<RgbImage> {
    self.inner.image.lock().clone()
  }

  pub fn render_count(&self) -> u64 {
    self.inner.renders.load(Ordering::SeqCst)
  }

  pub fn clear(&self) {
    *self.inner.image.lock() = None;
  }
}

impl<const W: u32, const H: u32> Render<GrayNhwcFrame<W, H>, Keypoints> for OverlaySurface {
  type Error = OverlayError;

  fn render_result(&self, frame: &GrayNhwcFrame<W, H>, result: &Keypoints) -> Result<(), Self::Error> {
    let image = self.inner.draw.draw_keypoints(frame, result);
    *self.inner.image.lock() = Some(image);
    let count = self.inner.renders.fetch_add(1, Ordering::SeqCst) + 1;
    debug!("叠加层已更新 (第 {} 次)", count);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::FaceFrame;
  use crate::keypoints::COORD_COUNT;

  #[test]
  fn test_clones_share_the_surface() {
    let surface = OverlaySurface::new();
    let view = surface.clone();
    assert!(view.snapshot().is_none());

    let keypoints = Keypoints::new([48.0; COORD_COUNT]);
    surface.render_result(&FaceFrame::default(), &keypoints).unwrap();

    let image = view.snapshot().unwrap();
    assert_eq!(image.dimensions(), (96, 96));
    assert_eq!(view.render_count(), 1);

    view.clear();
    assert!(surface.snapshot().is_none());
  }

  #[test]
  fn test_scheme_mismatch() {
    let result = OverlaySurface::from_url(&Url::parse("image:///tmp/a.png").unwrap());
    assert!(matches!(result, Err(OverlayError::SchemeMismatch(_))));
  }
}
