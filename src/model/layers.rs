// 该文件是 FKD （面部关键点检测） 项目的一部分。
// src/model/layers.rs - 网络层前向计算
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

use ndarray::{Array1, Array2, Array4, ArrayD, Axis, Ix2, Ix4, IxDyn, s};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
  Linear,
  Relu,
  Relu6,
  Sigmoid,
  Tanh,
  Softmax,
}

impl Activation {
  pub fn parse(name: &str) -> Option<Self> {
    match name {
      "linear" => Some(Activation::Linear),
      "relu" => Some(Activation::Relu),
      "relu6" => Some(Activation::Relu6),
      "sigmoid" => Some(Activation::Sigmoid),
      "tanh" => Some(Activation::Tanh),
      "softmax" => Some(Activation::Softmax),
      _ => None,
    }
  }

  pub fn apply(self, x: &mut ArrayD<f32>) {
    match self {
      Activation::Linear => {}
      Activation::Relu => x.mapv_inplace(|v| v.max(0.0)),
      Activation::Relu6 => x.mapv_inplace(|v| v.clamp(0.0, 6.0)),
      Activation::Sigmoid => x.mapv_inplace(|v| 1.0 / (1.0 + (-v).exp())),
      Activation::Tanh => x.mapv_inplace(f32::tanh),
      Activation::Softmax => {
        // 沿最后一维归一化
        let last = Axis(x.ndim().saturating_sub(1));
        for mut lane in x.lanes_mut(last) {
          let max = lane.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
          lane.mapv_inplace(|v| (v - max).exp());
          let sum = lane.sum();
          if sum > 0.0 {
            lane.mapv_inplace(|v| v / sum);
          }
        }
      }
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Padding {
  Same,
  #[default]
  Valid,
}

/// 返回 (输出长度, 前侧填充)
fn window_output(
  input: usize,
  window: usize,
  stride: usize,
  padding: Padding,
) -> Result<(usize, usize), String> {
  if stride == 0 || window == 0 {
    return Err("窗口与步长必须大于 0".to_string());
  }
  match padding {
    Padding::Same => {
      let out = input.div_ceil(stride);
      let total = ((out.saturating_sub(1)) * stride + window).saturating_sub(input);
      Ok((out, total / 2))
    }
    Padding::Valid => {
      if input < window {
        return Err(format!("输入长度 {} 小于窗口 {}", input, window));
      }
      Ok(((input - window) / stride + 1, 0))
    }
  }
}

fn as_4d(x: ArrayD<f32>) -> Result<Array4<f32>, String> {
  let shape = x.shape().to_vec();
  x.into_dimensionality::<Ix4>()
    .map_err(|_| format!("期望 NHWC 四维输入, 实际形状 {:?}", shape))
}

/// channels_last 二维卷积
#[derive(Debug, Clone)]
pub struct Conv2d {
  /// [kh, kw, in, out]
  pub kernel: Array4<f32>,
  pub bias: Option<Array1<f32>>,
  pub strides: (usize, usize),
  pub padding: Padding,
  pub activation: Activation,
}

impl Conv2d {
  pub fn forward(&self, x: ArrayD<f32>) -> Result<ArrayD<f32>, String> {
    let x = as_4d(x)?;
    let (n, h, w, c) = x.dim();
    let (kh, kw, cin, cout) = self.kernel.dim();
    if c != cin {
      return Err(format!("输入通道 {} 与卷积核通道 {} 不一致", c, cin));
    }

    let (oh, pad_top) = window_output(h, kh, self.strides.0, self.padding)?;
    let (ow, pad_left) = window_output(w, kw, self.strides.1, self.padding)?;

    let mut out = Array4::<f32>::zeros((n, oh, ow, cout));
    for b in 0..n {
      for oy in 0..oh {
        for ox in 0..ow {
          let mut acc = out.slice_mut(s![b, oy, ox, ..]);
          if let Some(bias) = &self.bias {
            acc.assign(bias);
          }
          for ky in 0..kh {
            let iy = (oy * self.strides.0 + ky) as isize - pad_top as isize;
            if iy < 0 || iy >= h as isize {
              continue;
            }
            for kx in 0..kw {
              let ix = (ox * self.strides.1 + kx) as isize - pad_left as isize;
              if ix < 0 || ix >= w as isize {
                continue;
              }
              let pixel = x.slice(s![b, iy as usize, ix as usize, ..]);
              let taps = self.kernel.slice(s![ky, kx, .., ..]);
              acc += &pixel.dot(&taps);
            }
          }
        }
      }
    }

    let mut out = out.into_dyn();
    self.activation.apply(&mut out);
    Ok(out)
  }
}

#[derive(Debug, Clone)]
pub struct MaxPool2d {
  pub pool_size: (usize, usize),
  pub strides: (usize, usize),
  pub padding: Padding,
}

impl MaxPool2d {
  pub fn forward(&self, x: ArrayD<f32>) -> Result<ArrayD<f32>, String> {
    let x = as_4d(x)?;
    let (n, h, w, c) = x.dim();
    let (ph, pw) = self.pool_size;

    let (oh, pad_top) = window_output(h, ph, self.strides.0, self.padding)?;
    let (ow, pad_left) = window_output(w, pw, self.strides.1, self.padding)?;

    let mut out = Array4::<f32>::from_elem((n, oh, ow, c), f32::NEG_INFINITY);
    for b in 0..n {
      for oy in 0..oh {
        for ox in 0..ow {
          let y0 = (oy * self.strides.0) as isize - pad_top as isize;
          let x0 = (ox * self.strides.1) as isize - pad_left as isize;
          for iy in y0.max(0)..(y0 + ph as isize).min(h as isize) {
            for ix in x0.max(0)..(x0 + pw as isize).min(w as isize) {
              for ch in 0..c {
                let v = x[[b, iy as usize, ix as usize, ch]];
                let cell = &mut out[[b, oy, ox, ch]];
                if v > *cell {
                  *cell = v;
                }
              }
            }
          }
        }
      }
    }

    Ok(out.into_dyn())
  }
}

#[derive(Debug, Clone)]
pub struct Dense {
  /// [in, units]
  pub kernel: Array2<f32>,
  pub bias: Option<Array1<f32>>,
  pub activation: Activation,
}

impl Dense {
  pub fn forward(&self, x: ArrayD<f32>) -> Result<ArrayD<f32>, String> {
    let shape = x.shape().to_vec();
    let x = x
      .into_dimensionality::<Ix2>()
      .map_err(|_| format!("期望二维输入, 实际形状 {:?}", shape))?;
    if x.ncols() != self.kernel.nrows() {
      return Err(format!(
        "输入特征数 {} 与权重行数 {} 不一致",
        x.ncols(),
        self.kernel.nrows()
      ));
    }

    let mut out = x.dot(&self.kernel);
    if let Some(bias) = &self.bias {
      out += bias;
    }

    let mut out = out.into_dyn();
    self.activation.apply(&mut out);
    Ok(out)
  }
}

fn flatten(x: ArrayD<f32>) -> Result<ArrayD<f32>, String> {
  let batch = x.shape().first().copied().unwrap_or(0);
  if batch == 0 {
    return Err("空批次无法展平".to_string());
  }
  let features = x.len() / batch;
  let x = if x.is_standard_layout() {
    x
  } else {
    x.as_standard_layout().into_owned()
  };
  x.into_shape_with_order(IxDyn(&[batch, features]))
    .map_err(|e| e.to_string())
}

#[derive(Debug, Clone)]
pub enum Layer {
  Input,
  Conv2d(Conv2d),
  MaxPool2d(MaxPool2d),
  Dropout,
  Flatten,
  Dense(Dense),
  Activation(Activation),
}

impl Layer {
  pub fn forward(&self, x: ArrayD<f32>) -> Result<ArrayD<f32>, String> {
    match self {
      // 推理时 Dropout 为恒等映射
      Layer::Input | Layer::Dropout => Ok(x),
      Layer::Conv2d(conv) => conv.forward(x),
      Layer::MaxPool2d(pool) => pool.forward(x),
      Layer::Flatten => flatten(x),
      Layer::Dense(dense) => dense.forward(x),
      Layer::Activation(activation) => {
        let mut x = x;
        activation.apply(&mut x);
        Ok(x)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::{Array, arr1, arr2};

  fn image_4x4() -> ArrayD<f32> {
    Array::from_shape_vec((1, 4, 4, 1), (1..=16).map(|v| v as f32).collect())
      .unwrap()
      .into_dyn()
  }

  #[test]
  fn test_window_output() {
    assert_eq!(window_output(96, 3, 1, Padding::Same).unwrap(), (96, 1));
    assert_eq!(window_output(96, 2, 2, Padding::Valid).unwrap(), (48, 0));
    assert_eq!(window_output(5, 2, 2, Padding::Same).unwrap(), (3, 0));
    assert!(window_output(1, 3, 1, Padding::Valid).is_err());
  }

  #[test]
  fn test_conv_same_padding_sums_neighbourhood() {
    let conv = Conv2d {
      kernel: Array4::ones((3, 3, 1, 1)),
      bias: Some(arr1(&[0.5])),
      strides: (1, 1),
      padding: Padding::Same,
      activation: Activation::Linear,
    };
    let out = conv.forward(image_4x4()).unwrap();

    assert_eq!(out.shape(), &[1, 4, 4, 1]);
    // 左上角: 1 + 2 + 5 + 6
    assert_eq!(out[[0, 0, 0, 0]], 14.5);
    // 中心 (1, 1): 1+2+3+5+6+7+9+10+11
    assert_eq!(out[[0, 1, 1, 0]], 54.5);
  }

  #[test]
  fn test_conv_valid_multi_channel() {
    let mut kernel = Array4::zeros((1, 1, 1, 2));
    kernel[[0, 0, 0, 0]] = 1.0;
    kernel[[0, 0, 0, 1]] = -1.0;
    let conv = Conv2d {
      kernel,
      bias: None,
      strides: (2, 2),
      padding: Padding::Valid,
      activation: Activation::Relu,
    };
    let out = conv.forward(image_4x4()).unwrap();

    assert_eq!(out.shape(), &[1, 2, 2, 2]);
    assert_eq!(out[[0, 1, 1, 0]], 11.0);
    assert_eq!(out[[0, 1, 1, 1]], 0.0);
  }

  #[test]
  fn test_conv_rejects_channel_mismatch() {
    let conv = Conv2d {
      kernel: Array4::ones((3, 3, 2, 1)),
      bias: None,
      strides: (1, 1),
      padding: Padding::Same,
      activation: Activation::Linear,
    };
    assert!(conv.forward(image_4x4()).is_err());
  }

  #[test]
  fn test_max_pool() {
    let pool = MaxPool2d {
      pool_size: (2, 2),
      strides: (2, 2),
      padding: Padding::Valid,
    };
    let out = pool.forward(image_4x4()).unwrap();

    assert_eq!(out.shape(), &[1, 2, 2, 1]);
    let values: Vec<f32> = out.iter().copied().collect();
    assert_eq!(values, vec![6.0, 8.0, 14.0, 16.0]);
  }

  #[test]
  fn test_flatten_then_dense() {
    let flat = Layer::Flatten.forward(image_4x4()).unwrap();
    assert_eq!(flat.shape(), &[1, 16]);

    let dense = Dense {
      kernel: Array2::ones((16, 2)),
      bias: Some(arr1(&[1.0, -200.0])),
      activation: Activation::Relu,
    };
    let out = dense.forward(flat).unwrap();
    assert_eq!(out.shape(), &[1, 2]);
    assert_eq!(out[[0, 0]], 137.0);
    assert_eq!(out[[0, 1]], 0.0);
  }

  #[test]
  fn test_softmax_rows_sum_to_one() {
    let mut x = arr2(&[[1.0f32, 2.0, 3.0], [0.0, 0.0, 0.0]]).into_dyn();
    Activation::Softmax.apply(&mut x);
    for row in x.lanes(Axis(1)) {
      assert!((row.sum() - 1.0).abs() < 1e-6);
    }
    assert!((x[[1, 0]] - 1.0 / 3.0).abs() < 1e-6);
  }

  #[test]
  fn test_activation_names() {
    assert_eq!(Activation::parse("relu"), Some(Activation::Relu));
    assert_eq!(Activation::parse("linear"), Some(Activation::Linear));
    assert_eq!(Activation::parse("gelu"), None);
  }
}
