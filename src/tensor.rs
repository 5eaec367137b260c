// 该文件是 FKD （面部关键点检测） 项目的一部分。
// src/tensor.rs - 带生命周期计数的张量
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

use std::sync::{
  Arc,
  atomic::{AtomicUsize, Ordering},
};

use ndarray::{ArrayD, IxDyn};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TensorError {
  #[error("形状 {shape:?} 需要 {expected} 个元素, 实际为 {actual}")]
  ShapeMismatch {
    shape: Vec<usize>,
    expected: usize,
    actual: usize,
  },
}

/// 张量分配登记表
///
/// 由同一登记表分配的张量在析构时自动注销，`live()` 即当前仍存活的张量数量。
#[derive(Debug, Clone, Default)]
pub struct TensorRegistry {
  live: Arc<AtomicUsize>,
  allocated: Arc<AtomicUsize>,
}

impl TensorRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// 当前存活的张量数量
  pub fn live(&self) -> usize {
    self.live.load(Ordering::Acquire)
  }

  /// 累计分配过的张量数量
  pub fn allocated(&self) -> usize {
    self.allocated.load(Ordering::Acquire)
  }

  pub fn zeros(&self, shape: &[usize]) -> Tensor {
    self.from_array(ArrayD::zeros(IxDyn(shape)))
  }

  pub fn from_vec(&self, shape: &[usize], data: Vec<f32>) -> Result<Tensor, TensorError> {
    let expected = shape.iter().product::<usize>();
    let actual = data.len();
    let array = ArrayD::from_shape_vec(IxDyn(shape), data).map_err(|_| {
      TensorError::ShapeMismatch {
        shape: shape.to_vec(),
        expected,
        actual,
      }
    })?;
    Ok(self.from_array(array))
  }

  pub fn from_array(&self, array: ArrayD<f32>) -> Tensor {
    self.live.fetch_add(1, Ordering::AcqRel);
    self.allocated.fetch_add(1, Ordering::AcqRel);
    Tensor {
      array,
      registry: self.clone(),
    }
  }
}

/// 数值张量，析构即释放
#[derive(Debug)]
pub struct Tensor {
  array: ArrayD<f32>,
  registry: TensorRegistry,
}

impl Tensor {
  pub fn shape(&self) -> &[usize] {
    self.array.shape()
  }

  pub fn len(&self) -> usize {
    self.array.len()
  }

  pub fn is_empty(&self) -> bool {
    self.array.is_empty()
  }

  pub fn array(&self) -> &ArrayD<f32> {
    &self.array
  }

  /// 按逻辑顺序拷贝出全部数值
  pub fn to_vec(&self) -> Vec<f32> {
    self.array.iter().copied().collect()
  }

  pub fn registry(&self) -> &TensorRegistry {
    &self.registry
  }
}

impl Drop for Tensor {
  fn drop(&mut self) {
    self.registry.live.fetch_sub(1, Ordering::AcqRel);
  }
}
