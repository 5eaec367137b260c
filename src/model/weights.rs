// 该文件是 FKD （面部关键点检测） 项目的一部分。
// src/model/weights.rs - 权重分片解析
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

use std::collections::HashMap;

use ndarray::{ArrayD, IxDyn};
use tracing::{debug, warn};
use url::Url;

use super::fetch::AssetFetcher;
use super::layers_model::{WeightSpec, WeightsGroup};
use super::loader::LoadError;

pub type WeightMap = HashMap<String, ArrayD<f32>>;

fn take<'a>(spec: &WeightSpec, bytes: &'a [u8], len: usize) -> Result<&'a [u8], LoadError> {
  bytes.get(..len).ok_or_else(|| {
    LoadError::Weights(format!(
      "权重 {} 数据不足: 需要 {} 字节, 剩余 {} 字节",
      spec.name,
      len,
      bytes.len()
    ))
  })
}

fn read_values(
  spec: &WeightSpec,
  bytes: &[u8],
  count: usize,
) -> Result<(Vec<f32>, usize), LoadError> {
  let need = |width: usize| {
    let len = count
      .checked_mul(width)
      .ok_or_else(|| LoadError::Weights(format!("权重 {} 字节数溢出", spec.name)))?;
    take(spec, bytes, len)
  };

  match &spec.quantization {
    None => match spec.dtype.as_str() {
      "float32" => {
        let raw = need(4)?;
        let values = raw
          .chunks_exact(4)
          .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
          .collect();
        Ok((values, raw.len()))
      }
      "int32" => {
        let raw = need(4)?;
        let values = raw
          .chunks_exact(4)
          .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f32)
          .collect();
        Ok((values, raw.len()))
      }
      other => Err(LoadError::Weights(format!(
        "权重 {} 的数据类型 {} 不受支持",
        spec.name, other
      ))),
    },
    Some(q) => {
      let (min, scale) = match (q.min, q.scale) {
        (Some(min), Some(scale)) => (min, scale),
        _ => {
          return Err(LoadError::Weights(format!(
            "权重 {} 的量化参数缺少 min/scale",
            spec.name
          )));
        }
      };
      match q.dtype.as_str() {
        "uint8" => {
          let raw = need(1)?;
          let values = raw.iter().map(|&v| v as f32 * scale + min).collect();
          Ok((values, raw.len()))
        }
        "uint16" => {
          let raw = need(2)?;
          let values = raw
            .chunks_exact(2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]) as f32 * scale + min)
            .collect();
          Ok((values, raw.len()))
        }
        other => Err(LoadError::Weights(format!(
          "权重 {} 的量化类型 {} 不受支持",
          spec.name, other
        ))),
      }
    }
  }
}

/// 按清单顺序切分一组拼接后的分片数据
pub fn decode_weights(
  specs: &[WeightSpec],
  buffer: &[u8],
  weights: &mut WeightMap,
) -> Result<(), LoadError> {
  let mut offset = 0usize;
  for spec in specs {
    let count = spec
      .shape
      .iter()
      .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
      .ok_or_else(|| {
        LoadError::Weights(format!("权重 {} 元素数溢出: {:?}", spec.name, spec.shape))
      })?;
    let (values, consumed) = read_values(spec, &buffer[offset..], count)?;
    offset += consumed;

    let array = ArrayD::from_shape_vec(IxDyn(&spec.shape), values)
      .map_err(|e| LoadError::Weights(format!("权重 {} 形状错误: {}", spec.name, e)))?;
    debug!("权重 {}: {:?}", spec.name, spec.shape);
    weights.insert(spec.name.clone(), array);
  }

  if offset != buffer.len() {
    warn!("权重分片中有 {} 字节未被使用", buffer.len() - offset);
  }
  Ok(())
}

/// 获取并解析清单中的全部分片，分片路径相对于模型描述文件
pub async fn fetch_weights<F: AssetFetcher + ?Sized>(
  fetcher: &F,
  descriptor_url: &Url,
  manifest: &[WeightsGroup],
) -> Result<WeightMap, LoadError> {
  let mut weights = WeightMap::new();

  for group in manifest {
    let mut buffer = Vec::new();
    for path in &group.paths {
      let url = descriptor_url
        .join(path)
        .map_err(|e| LoadError::Descriptor(format!("无效的分片路径 {}: {}", path, e)))?;
      let shard = fetcher.fetch(&url).await?;
      debug!("权重分片 {}: {} 字节", url, shard.len());
      buffer.extend_from_slice(&shard);
    }
    decode_weights(&group.weights, &buffer, &mut weights)?;
  }

  Ok(weights)
}
