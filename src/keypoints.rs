// 该文件是 FKD （面部关键点检测） 项目的一部分。
// src/keypoints.rs - 关键点向量与派生指标
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

/// 关键点数量
pub const KEYPOINT_COUNT: usize = 15;

/// 模型输出的坐标数量 (x, y 交替)
pub const COORD_COUNT: usize = KEYPOINT_COUNT * 2;

/// 面部关键点，顺序与模型输出一致
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Landmark {
  LeftEyeCenter,
  RightEyeCenter,
  LeftEyeInnerCorner,
  LeftEyeOuterCorner,
  RightEyeInnerCorner,
  RightEyeOuterCorner,
  LeftEyebrowInnerEnd,
  LeftEyebrowOuterEnd,
  RightEyebrowInnerEnd,
  RightEyebrowOuterEnd,
  NoseTip,
  MouthLeftCorner,
  MouthRightCorner,
  MouthCenterTopLip,
  MouthCenterBottomLip,
}

impl Landmark {
  pub const ALL: [Landmark; KEYPOINT_COUNT] = [
    Landmark::LeftEyeCenter,
    Landmark::RightEyeCenter,
    Landmark::LeftEyeInnerCorner,
    Landmark::LeftEyeOuterCorner,
    Landmark::RightEyeInnerCorner,
    Landmark::RightEyeOuterCorner,
    Landmark::LeftEyebrowInnerEnd,
    Landmark::LeftEyebrowOuterEnd,
    Landmark::RightEyebrowInnerEnd,
    Landmark::RightEyebrowOuterEnd,
    Landmark::NoseTip,
    Landmark::MouthLeftCorner,
    Landmark::MouthRightCorner,
    Landmark::MouthCenterTopLip,
    Landmark::MouthCenterBottomLip,
  ];

  pub fn index(self) -> usize {
    self as usize
  }

  pub fn to_label_str(self) -> &'static str {
    match self {
      Landmark::LeftEyeCenter => "left_eye_center",
      Landmark::RightEyeCenter => "right_eye_center",
      Landmark::LeftEyeInnerCorner => "left_eye_inner_corner",
      Landmark::LeftEyeOuterCorner => "left_eye_outer_corner",
      Landmark::RightEyeInnerCorner => "right_eye_inner_corner",
      Landmark::RightEyeOuterCorner => "right_eye_outer_corner",
      Landmark::LeftEyebrowInnerEnd => "left_eyebrow_inner_end",
      Landmark::LeftEyebrowOuterEnd => "left_eyebrow_outer_end",
      Landmark::RightEyebrowInnerEnd => "right_eyebrow_inner_end",
      Landmark::RightEyebrowOuterEnd => "right_eyebrow_outer_end",
      Landmark::NoseTip => "nose_tip",
      Landmark::MouthLeftCorner => "mouth_left_corner",
      Landmark::MouthRightCorner => "mouth_right_corner",
      Landmark::MouthCenterTopLip => "mouth_center_top_lip",
      Landmark::MouthCenterBottomLip => "mouth_center_bottom_lip",
    }
  }
}

/// 一次预测得到的 30 个坐标，单位为输入像素 (0-96)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoints {
  coords: [f32; COORD_COUNT],
}

impl Keypoints {
  pub fn new(coords: [f32; COORD_COUNT]) -> Self {
    Self { coords }
  }

  /// 长度不为 30 时返回 None
  pub fn from_slice(values: &[f32]) -> Option<Self> {
    let coords: [f32; COORD_COUNT] = values.try_into().ok()?;
    Some(Self { coords })
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.coords
  }

  pub fn point(&self, landmark: Landmark) -> (f32, f32) {
    let i = landmark.index() * 2;
    (self.coords[i], self.coords[i + 1])
  }

  /// 按模型顺序遍历 15 个 (x, y)
  pub fn points(&self) -> impl Iterator<Item = (f32, f32)> + '_ {
    self.coords.chunks_exact(2).map(|pair| (pair[0], pair[1]))
  }
}

fn distance(a: (f32, f32), b: (f32, f32)) -> f32 {
  ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

/// 从关键点派生的几何指标
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceMetrics {
  /// 两眼中心距离
  pub inter_ocular: f32,
  /// 嘴角间距
  pub mouth_width: f32,
  /// 嘴宽 / 眼距，眼距为 0 时无定义
  pub mouth_to_eye_ratio: Option<f32>,
  /// 鼻尖到嘴部中心（上下唇中点连线的中点）的距离
  pub nose_to_mouth: f32,
}

pub fn compute_metrics(keypoints: &Keypoints) -> FaceMetrics {
  let inter_ocular = distance(
    keypoints.point(Landmark::LeftEyeCenter),
    keypoints.point(Landmark::RightEyeCenter),
  );
  let mouth_width = distance(
    keypoints.point(Landmark::MouthLeftCorner),
    keypoints.point(Landmark::MouthRightCorner),
  );

  let (top_x, top_y) = keypoints.point(Landmark::MouthCenterTopLip);
  let (bottom_x, bottom_y) = keypoints.point(Landmark::MouthCenterBottomLip);
  let mouth_center = ((top_x + bottom_x) / 2.0, (top_y + bottom_y) / 2.0);
  let nose_to_mouth = distance(keypoints.point(Landmark::NoseTip), mouth_center);

  let mouth_to_eye_ratio = (inter_ocular > 0.0).then(|| mouth_width / inter_ocular);

  FaceMetrics {
    inter_ocular,
    mouth_width,
    mouth_to_eye_ratio,
    nose_to_mouth,
  }
}

impl fmt::Display for FaceMetrics {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "{:<20} {:>8.2}", "inter-ocular (px)", self.inter_ocular)?;
    writeln!(f, "{:<20} {:>8.2}", "mouth width (px)", self.mouth_width)?;
    match self.mouth_to_eye_ratio {
      Some(ratio) => writeln!(f, "{:<20} {:>8.3}", "mouth / eyes", ratio)?,
      None => writeln!(f, "{:<20} {:>8}", "mouth / eyes", "n/a")?,
    }
    write!(f, "{:<20} {:>8.2}", "nose to mouth (px)", self.nose_to_mouth)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn face() -> Keypoints {
    let mut coords = [0.0f32; COORD_COUNT];
    let mut set = |landmark: Landmark, x: f32, y: f32| {
      coords[landmark.index() * 2] = x;
      coords[landmark.index() * 2 + 1] = y;
    };
    set(Landmark::LeftEyeCenter, 10.0, 10.0);
    set(Landmark::RightEyeCenter, 20.0, 10.0);
    set(Landmark::NoseTip, 15.0, 20.0);
    set(Landmark::MouthLeftCorner, 9.0, 30.0);
    set(Landmark::MouthRightCorner, 21.0, 35.0);
    set(Landmark::MouthCenterTopLip, 15.0, 28.0);
    set(Landmark::MouthCenterBottomLip, 15.0, 32.0);
    Keypoints::new(coords)
  }

  #[test]
  fn test_metrics_from_hand_built_vector() {
    let metrics = compute_metrics(&face());

    assert_eq!(metrics.inter_ocular, 10.0);
    // (12, 5) -> 13
    assert_eq!(metrics.mouth_width, 13.0);
    assert_eq!(metrics.mouth_to_eye_ratio, Some(1.3));
    // 鼻尖 (15, 20) 到 (15, 30)
    assert_eq!(metrics.nose_to_mouth, 10.0);
  }

  #[test]
  fn test_ratio_undefined_for_coincident_eyes() {
    let metrics = compute_metrics(&Keypoints::new([0.0; COORD_COUNT]));
    assert_eq!(metrics.inter_ocular, 0.0);
    assert_eq!(metrics.mouth_to_eye_ratio, None);
  }

  #[test]
  fn test_points_follow_model_order() {
    let coords: Vec<f32> = (0..COORD_COUNT).map(|i| i as f32).collect();
    let keypoints = Keypoints::from_slice(&coords).unwrap();

    let points: Vec<_> = keypoints.points().collect();
    assert_eq!(points.len(), KEYPOINT_COUNT);
    assert_eq!(points[0], (0.0, 1.0));
    assert_eq!(points[14], (28.0, 29.0));
    assert_eq!(keypoints.point(Landmark::NoseTip), (20.0, 21.0));
  }

  #[test]
  fn test_from_slice_rejects_wrong_length() {
    assert!(Keypoints::from_slice(&[0.0; 29]).is_none());
    assert!(Keypoints::from_slice(&[0.0; 31]).is_none());
  }

  #[test]
  fn test_landmark_order_matches_index() {
    for (i, landmark) in Landmark::ALL.iter().enumerate() {
      assert_eq!(landmark.index(), i);
    }
  }
}
