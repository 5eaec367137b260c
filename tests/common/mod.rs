// 该文件是 FKD （面部关键点检测） 项目的一部分。
// tests/common/mod.rs - 测试用模型与资源
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

#![allow(dead_code)]

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use fkd::keypoints::COORD_COUNT;
use fkd::model::{AssetFetcher, FetchError, StaticFetcher};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::Semaphore;
use url::Url;

pub const PAGE_URL: &str = "memory://fkd/app/";
pub const DESCRIPTOR_URL: &str = "memory://fkd/app/model/model.json";
pub const SHARDS: [&str; 2] = ["group1-shard1of2.bin", "group1-shard2of2.bin"];

// 3x3 池化结果展平后的特征数
const FEATURES: usize = 9;
const AUX_UNITS: usize = 2;

pub fn url(s: &str) -> Url {
  Url::parse(s).unwrap()
}

/// 每个关键点的期望坐标，落在 96x96 画布内部
pub fn expected_coords() -> Vec<f32> {
  (0..COORD_COUNT / 2)
    .flat_map(|i| [10.0 + 5.0 * i as f32, 20.0 + 3.0 * i as f32])
    .collect()
}

/// 池化 → 展平 → 全连接的小模型
pub struct Fixture {
  pub kernel: Vec<f32>,
  pub bias: Vec<f32>,
  pub aux_output: bool,
}

impl Fixture {
  /// 权重全零，输出恒等于偏置
  pub fn constant() -> Self {
    Self {
      kernel: vec![0.0; FEATURES * COORD_COUNT],
      bias: expected_coords(),
      aux_output: false,
    }
  }

  /// 输出依赖输入的模型
  pub fn varying() -> Self {
    Self {
      kernel: (0..FEATURES * COORD_COUNT)
        .map(|i| ((i % 7) as f32 - 3.0) * 0.25)
        .collect(),
      bias: expected_coords(),
      aux_output: false,
    }
  }

  pub fn with_aux_output(mut self) -> Self {
    self.aux_output = true;
    self
  }

  pub fn descriptor(&self) -> serde_json::Value {
    let mut layers = vec![
      json!({
        "class_name": "InputLayer",
        "name": "face",
        "config": {"name": "face", "batch_input_shape": [null, 96, 96, 1], "dtype": "float32"},
        "inbound_nodes": []
      }),
      json!({
        "class_name": "MaxPooling2D",
        "name": "pool",
        "config": {"name": "pool", "pool_size": [32, 32], "strides": [32, 32], "padding": "valid", "data_format": "channels_last"},
        "inbound_nodes": [[["face", 0, 0, {}]]]
      }),
      json!({
        "class_name": "Flatten",
        "name": "flatten",
        "config": {"name": "flatten"},
        "inbound_nodes": [[["pool", 0, 0, {}]]]
      }),
      json!({
        "class_name": "Dense",
        "name": "coords",
        "config": {"name": "coords", "units": COORD_COUNT, "activation": "linear", "use_bias": true},
        "inbound_nodes": [[["flatten", 0, 0, {}]]]
      }),
    ];
    let mut outputs = vec![json!(["coords", 0, 0])];
    let mut weights = vec![
      json!({"name": "coords/kernel", "shape": [FEATURES, COORD_COUNT], "dtype": "float32"}),
      json!({"name": "coords/bias", "shape": [COORD_COUNT], "dtype": "float32"}),
    ];

    if self.aux_output {
      layers.push(json!({
        "class_name": "Dense",
        "name": "aux",
        "config": {"name": "aux", "units": AUX_UNITS, "activation": "sigmoid"},
        "inbound_nodes": [[["flatten", 0, 0, {}]]]
      }));
      outputs.push(json!(["aux", 0, 0]));
      weights.push(json!({"name": "aux/kernel", "shape": [FEATURES, AUX_UNITS], "dtype": "float32"}));
      weights.push(json!({"name": "aux/bias", "shape": [AUX_UNITS], "dtype": "float32"}));
    }

    json!({
      "format": "layers-model",
      "generatedBy": "keras v2.15.0",
      "convertedBy": "TensorFlow.js Converter v4.17.0",
      "modelTopology": {
        "class_name": "Functional",
        "keras_version": "2.15.0",
        "model_config": {
          "class_name": "Functional",
          "config": {
            "name": "fkd",
            "layers": layers,
            "input_layers": [["face", 0, 0]],
            "output_layers": outputs
          }
        }
      },
      "weightsManifest": [{"paths": SHARDS, "weights": weights}]
    })
  }

  /// 按清单顺序拼接的权重数据
  pub fn weight_bytes(&self) -> Vec<u8> {
    let mut values = self.kernel.clone();
    values.extend_from_slice(&self.bias);
    if self.aux_output {
      values.extend(std::iter::repeat_n(0.1f32, FEATURES * AUX_UNITS));
      values.extend(std::iter::repeat_n(0.0f32, AUX_UNITS));
    }
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
  }

  /// 描述文件与两个分片，分片在任意字节处切开
  pub fn assets(&self) -> Vec<(String, Vec<u8>)> {
    let weights = self.weight_bytes();
    let (first, second) = weights.split_at(weights.len() / 2 + 1);
    vec![
      ("model/model.json".to_string(), self.descriptor().to_string().into_bytes()),
      (format!("model/{}", SHARDS[0]), first.to_vec()),
      (format!("model/{}", SHARDS[1]), second.to_vec()),
    ]
  }

  pub fn static_fetcher(&self) -> StaticFetcher {
    let base = url(PAGE_URL);
    let mut fetcher = StaticFetcher::new();
    for (path, data) in self.assets() {
      fetcher.insert(&base.join(&path).unwrap(), data);
    }
    fetcher
  }

  /// 写入目录，返回描述文件路径
  pub fn write_to(&self, dir: &std::path::Path) -> std::path::PathBuf {
    for (path, data) in self.assets() {
      let target = dir.join(&path);
      std::fs::create_dir_all(target.parent().unwrap()).unwrap();
      std::fs::write(&target, data).unwrap();
    }
    dir.join("model/model.json")
  }
}

/// 记录请求次数，可阻塞或注入失败的资源获取
pub struct CountingFetcher {
  inner: StaticFetcher,
  descriptor_fetches: AtomicUsize,
  fail_next: AtomicUsize,
  gate: Option<Arc<Semaphore>>,
  delay: Option<Duration>,
  requested: Mutex<Vec<String>>,
}

impl CountingFetcher {
  pub fn new(inner: StaticFetcher) -> Self {
    Self {
      inner,
      descriptor_fetches: AtomicUsize::new(0),
      fail_next: AtomicUsize::new(0),
      gate: None,
      delay: None,
      requested: Mutex::new(Vec::new()),
    }
  }

  /// 获取描述文件前需要取得一个许可
  pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
    self.gate = Some(gate);
    self
  }

  pub fn delayed(mut self, delay: Duration) -> Self {
    self.delay = Some(delay);
    self
  }

  /// 接下来 `n` 次描述文件请求返回 503
  pub fn failing(self, n: usize) -> Self {
    self.fail_next.store(n, Ordering::SeqCst);
    self
  }

  pub fn descriptor_fetches(&self) -> usize {
    self.descriptor_fetches.load(Ordering::SeqCst)
  }

  pub fn requested(&self) -> Vec<String> {
    self.requested.lock().clone()
  }
}

#[async_trait]
impl AssetFetcher for CountingFetcher {
  async fn fetch(&self, url: &Url) -> Result<Bytes, FetchError> {
    self.requested.lock().push(url.to_string());

    if url.path().ends_with(".json") {
      self.descriptor_fetches.fetch_add(1, Ordering::SeqCst);
      if let Some(gate) = &self.gate {
        let permit = gate.acquire().await.map_err(|e| FetchError::Io {
          url: url.to_string(),
          message: e.to_string(),
        })?;
        permit.forget();
      }
      if let Some(delay) = self.delay {
        tokio::time::sleep(delay).await;
      }
      let failing = self
        .fail_next
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
      if failing {
        return Err(FetchError::Status {
          url: url.to_string(),
          status: 503,
        });
      }
    }

    self.inner.fetch(url).await
  }
}

pub fn solid_image(width: u32, height: u32, value: u8) -> DynamicImage {
  DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([value, value, value])))
}

pub fn png_bytes(image: &DynamicImage) -> Vec<u8> {
  let mut buffer = Cursor::new(Vec::new());
  image.write_to(&mut buffer, ImageFormat::Png).unwrap();
  buffer.into_inner()
}

/// 等待其他任务运行到阻塞点
pub async fn settle() {
  for _ in 0..16 {
    tokio::task::yield_now().await;
  }
}
