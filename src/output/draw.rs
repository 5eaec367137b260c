// 该文件是 FKD （面部关键点检测） 项目的一部分。
// src/output/draw.rs - 关键点绘制
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

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_line_segment_mut;

use crate::frame::GrayNhwcFrame;
use crate::keypoints::Keypoints;

// 十字标记常量
const MARKER_ARM: f32 = 2.0;
const MARKER_COLOR: [u8; 3] = [0x38, 0xbd, 0xf8]; // #38bdf8

pub struct Draw {
  arm: f32,
  color: [u8; 3],
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      arm: MARKER_ARM,
      color: MARKER_COLOR,
    }
  }
}

impl Draw {
  pub fn with_color(mut self, color: [u8; 3]) -> Self {
    self.color = color;
    self
  }

  pub fn with_arm(mut self, arm: f32) -> Self {
    self.arm = arm;
    self
  }

  pub fn color(&self) -> [u8; 3] {
    self.color
  }

  // 以 (x, y) 为中心画一个十字，坐标为输入图像像素
  fn draw_cross(&self, image: &mut RgbImage, x: f32, y: f32) {
    if !x.is_finite() || !y.is_finite() {
      return;
    }

    let color = Rgb(self.color);
    draw_line_segment_mut(image, (x - self.arm, y), (x + self.arm, y), color);
    draw_line_segment_mut(image, (x, y - self.arm), (x, y + self.arm), color);
  }
}

pub trait DrawKeypointsOnImage {
  fn draw_keypoints_on_image(&self, image: &mut RgbImage, keypoints: &Keypoints);
}

impl DrawKeypointsOnImage for Draw {
  fn draw_keypoints_on_image(&self, image: &mut RgbImage, keypoints: &Keypoints) {
    for (x, y) in keypoints.points() {
      self.draw_cross(image, x, y);
    }
  }
}

pub trait ToRgbImage {
  fn to_rgb_image(&self) -> RgbImage;
}

impl<const W: u32, const H: u32> ToRgbImage for GrayNhwcFrame<W, H> {
  fn to_rgb_image(&self) -> RgbImage {
    GrayNhwcFrame::to_rgb_image(self)
  }
}

pub trait DrawKeypointsOnFrame<Frame> {
  fn draw_keypoints(&self, frame: &Frame, keypoints: &Keypoints) -> RgbImage;
}

impl<Frame: ToRgbImage, D: DrawKeypointsOnImage> DrawKeypointsOnFrame<Frame> for D {
  fn draw_keypoints(&self, frame: &Frame, keypoints: &Keypoints) -> RgbImage {
    let mut image = frame.to_rgb_image();
    self.draw_keypoints_on_image(&mut image, keypoints);
    image
  }
}
