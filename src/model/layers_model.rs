// 该文件是 FKD （面部关键点检测） 项目的一部分。
// src/model/layers_model.rs - layers-model 格式的模型
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

use ndarray::{ArrayD, Ix1, Ix2, Ix4};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

use super::fetch::AssetFetcher;
use super::layers::{Activation, Conv2d, Dense, Layer, MaxPool2d, Padding};
use super::loader::LoadError;
use super::weights::{WeightMap, fetch_weights};
use super::{InferenceError, Model, Prediction};
use crate::tensor::Tensor;

const LAYERS_MODEL_FORMAT: &str = "layers-model";

/// 模型描述文件 (model.json)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDescriptor {
  #[serde(default)]
  pub format: Option<String>,
  #[serde(default)]
  pub generated_by: Option<String>,
  #[serde(default)]
  pub converted_by: Option<String>,
  pub model_topology: Value,
  #[serde(default)]
  pub weights_manifest: Vec<WeightsGroup>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WeightsGroup {
  pub paths: Vec<String>,
  pub weights: Vec<WeightSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WeightSpec {
  pub name: String,
  pub shape: Vec<usize>,
  #[serde(default = "default_dtype")]
  pub dtype: String,
  #[serde(default)]
  pub quantization: Option<Quantization>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Quantization {
  pub dtype: String,
  #[serde(default)]
  pub min: Option<f32>,
  #[serde(default)]
  pub scale: Option<f32>,
}

fn default_dtype() -> String {
  "float32".to_string()
}

fn default_true() -> bool {
  true
}

#[derive(Debug, Deserialize)]
struct KerasModelConfig {
  class_name: String,
  #[serde(default)]
  config: Value,
}

#[derive(Debug, Deserialize)]
struct KerasLayer {
  class_name: String,
  #[serde(default)]
  config: Value,
  #[serde(default)]
  name: Option<String>,
  #[serde(default)]
  inbound_nodes: Value,
}

impl KerasLayer {
  fn name(&self) -> Result<String, LoadError> {
    self
      .name
      .clone()
      .or_else(|| self.config.get("name")?.as_str().map(String::from))
      .ok_or_else(|| LoadError::Descriptor(format!("{} 层缺少名称", self.class_name)))
  }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IntOrPair {
  One(usize),
  Pair(Vec<usize>),
}

impl IntOrPair {
  fn pair(&self) -> Result<(usize, usize), LoadError> {
    match self {
      IntOrPair::One(v) => Ok((*v, *v)),
      IntOrPair::Pair(v) if v.len() == 2 => Ok((v[0], v[1])),
      IntOrPair::Pair(v) => Err(LoadError::Descriptor(format!("期望二元组, 实际为 {:?}", v))),
    }
  }
}

#[derive(Debug, Deserialize)]
struct ShapeConfig {
  #[serde(default)]
  batch_input_shape: Option<Vec<Option<usize>>>,
  #[serde(default)]
  batch_shape: Option<Vec<Option<usize>>>,
}

impl ShapeConfig {
  /// 去掉批维度后的输入形状
  fn sample_shape(&self) -> Option<Vec<usize>> {
    let shape = self.batch_input_shape.as_ref().or(self.batch_shape.as_ref())?;
    shape.iter().skip(1).copied().collect()
  }
}

#[derive(Debug, Deserialize)]
struct Conv2dConfig {
  filters: usize,
  kernel_size: IntOrPair,
  #[serde(default)]
  strides: Option<IntOrPair>,
  #[serde(default)]
  padding: Padding,
  #[serde(default)]
  activation: Option<String>,
  #[serde(default = "default_true")]
  use_bias: bool,
  #[serde(default)]
  data_format: Option<String>,
  #[serde(default)]
  dilation_rate: Option<IntOrPair>,
}

#[derive(Debug, Deserialize)]
struct PoolConfig {
  #[serde(default)]
  pool_size: Option<IntOrPair>,
  #[serde(default)]
  strides: Option<IntOrPair>,
  #[serde(default)]
  padding: Padding,
  #[serde(default)]
  data_format: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DenseConfig {
  units: usize,
  #[serde(default)]
  activation: Option<String>,
  #[serde(default = "default_true")]
  use_bias: bool,
}

#[derive(Debug, Deserialize)]
struct ActivationConfig {
  activation: String,
}

fn parse_config<T: for<'de> Deserialize<'de>>(name: &str, config: &Value) -> Result<T, LoadError> {
  serde_json::from_value(config.clone())
    .map_err(|e| LoadError::Descriptor(format!("层 {} 配置无效: {}", name, e)))
}

fn parse_activation(name: Option<&str>) -> Result<Activation, LoadError> {
  match name {
    None => Ok(Activation::Linear),
    Some(name) => Activation::parse(name)
      .ok_or_else(|| LoadError::Descriptor(format!("不支持的激活函数: {}", name))),
  }
}

fn check_channels_last(name: &str, data_format: Option<&str>) -> Result<(), LoadError> {
  match data_format {
    None | Some("channels_last") => Ok(()),
    Some(other) => Err(LoadError::Descriptor(format!(
      "层 {} 的数据格式 {} 不受支持",
      name, other
    ))),
  }
}

/// 按 `<layer>/<suffix>` 取出权重，也接受带作用域前缀的名称
fn take_weight(weights: &mut WeightMap, layer: &str, suffix: &str) -> Result<ArrayD<f32>, LoadError> {
  let exact = format!("{}/{}", layer, suffix);
  if let Some(weight) = weights.remove(&exact) {
    return Ok(weight);
  }

  let scoped = format!("/{}", exact);
  let key = weights.keys().find(|k| k.ends_with(&scoped)).cloned();
  key
    .and_then(|k| weights.remove(&k))
    .ok_or_else(|| LoadError::Weights(format!("缺少权重 {}", exact)))
}

fn take_bias(weights: &mut WeightMap, layer: &str, units: usize) -> Result<ndarray::Array1<f32>, LoadError> {
  let bias = take_weight(weights, layer, "bias")?
    .into_dimensionality::<Ix1>()
    .map_err(|e| LoadError::Weights(format!("{}/bias 形状错误: {}", layer, e)))?;
  if bias.len() != units {
    return Err(LoadError::Weights(format!(
      "{}/bias 长度 {} 与输出维度 {} 不一致",
      layer,
      bias.len(),
      units
    )));
  }
  Ok(bias)
}

fn build_layer(
  class_name: &str,
  name: &str,
  config: &Value,
  weights: &mut WeightMap,
) -> Result<Layer, LoadError> {
  match class_name {
    "InputLayer" => Ok(Layer::Input),
    "Conv2D" => {
      let cfg: Conv2dConfig = parse_config(name, config)?;
      check_channels_last(name, cfg.data_format.as_deref())?;
      if let Some(dilation) = &cfg.dilation_rate
        && dilation.pair()? != (1, 1)
      {
        return Err(LoadError::Descriptor(format!("层 {} 的空洞卷积不受支持", name)));
      }

      let (kh, kw) = cfg.kernel_size.pair()?;
      let kernel = take_weight(weights, name, "kernel")?
        .into_dimensionality::<Ix4>()
        .map_err(|e| LoadError::Weights(format!("{}/kernel 形状错误: {}", name, e)))?;
      let (wkh, wkw, _, wout) = kernel.dim();
      if (wkh, wkw, wout) != (kh, kw, cfg.filters) {
        return Err(LoadError::Weights(format!(
          "{}/kernel 形状 {:?} 与配置 ({}, {}, _, {}) 不一致",
          name,
          kernel.shape(),
          kh,
          kw,
          cfg.filters
        )));
      }
      let bias = if cfg.use_bias {
        Some(take_bias(weights, name, cfg.filters)?)
      } else {
        None
      };

      Ok(Layer::Conv2d(Conv2d {
        kernel,
        bias,
        strides: cfg.strides.as_ref().map(IntOrPair::pair).transpose()?.unwrap_or((1, 1)),
        padding: cfg.padding,
        activation: parse_activation(cfg.activation.as_deref())?,
      }))
    }
    "MaxPooling2D" | "MaxPool2D" => {
      let cfg: PoolConfig = parse_config(name, config)?;
      check_channels_last(name, cfg.data_format.as_deref())?;
      let pool_size = cfg.pool_size.as_ref().map(IntOrPair::pair).transpose()?.unwrap_or((2, 2));
      let strides = cfg.strides.as_ref().map(IntOrPair::pair).transpose()?.unwrap_or(pool_size);

      Ok(Layer::MaxPool2d(MaxPool2d {
        pool_size,
        strides,
        padding: cfg.padding,
      }))
    }
    "Dropout" => Ok(Layer::Dropout),
    "Flatten" => Ok(Layer::Flatten),
    "Dense" => {
      let cfg: DenseConfig = parse_config(name, config)?;
      let kernel = take_weight(weights, name, "kernel")?
        .into_dimensionality::<Ix2>()
        .map_err(|e| LoadError::Weights(format!("{}/kernel 形状错误: {}", name, e)))?;
      if kernel.ncols() != cfg.units {
        return Err(LoadError::Weights(format!(
          "{}/kernel 列数 {} 与 units {} 不一致",
          name,
          kernel.ncols(),
          cfg.units
        )));
      }
      let bias = if cfg.use_bias {
        Some(take_bias(weights, name, cfg.units)?)
      } else {
        None
      };

      Ok(Layer::Dense(Dense {
        kernel,
        bias,
        activation: parse_activation(cfg.activation.as_deref())?,
      }))
    }
    "Activation" => {
      let cfg: ActivationConfig = parse_config(name, config)?;
      Ok(Layer::Activation(parse_activation(Some(&cfg.activation))?))
    }
    other => Err(LoadError::Descriptor(format!(
      "不支持的层类型 {} ({})",
      other, name
    ))),
  }
}

/// 收集入站层名称，兼容 `[["name", 0, 0, {}]]` 与 `keras_history` 两种写法
fn collect_inbound(value: &Value, names: &mut Vec<String>) {
  match value {
    Value::Array(items) => {
      if let (Some(Value::String(name)), Some(Value::Number(_))) = (items.first(), items.get(1)) {
        names.push(name.clone());
        return;
      }
      for item in items {
        collect_inbound(item, names);
      }
    }
    Value::Object(map) => {
      if let Some(Value::Array(history)) = map.get("keras_history")
        && let Some(Value::String(name)) = history.first()
      {
        names.push(name.clone());
        return;
      }
      for item in map.values() {
        collect_inbound(item, names);
      }
    }
    _ => {}
  }
}

fn output_names(value: &Value) -> Vec<String> {
  match value {
    Value::Array(items) if matches!(items.first(), Some(Value::String(_))) => items
      .first()
      .and_then(Value::as_str)
      .map(|name| vec![name.to_string()])
      .unwrap_or_default(),
    Value::Array(items) => items
      .iter()
      .filter_map(|item| item.as_array()?.first()?.as_str().map(String::from))
      .collect(),
    _ => Vec::new(),
  }
}

#[derive(Debug)]
struct Node {
  name: String,
  layer: Layer,
  input: Option<usize>,
}

/// 在 CPU 上执行的 layers-model 推理图
#[derive(Debug)]
pub struct LayersModel {
  name: String,
  input_shape: Vec<usize>,
  nodes: Vec<Node>,
  outputs: Vec<usize>,
  // 每个节点的输出被引用的次数
  uses: Vec<usize>,
}

impl LayersModel {
  /// 获取模型描述与全部权重分片并构建模型
  pub async fn load<F: AssetFetcher + ?Sized>(fetcher: &F, url: &Url) -> Result<Self, LoadError> {
    info!("获取模型描述: {}", url);
    let raw = fetcher.fetch(url).await?;
    let descriptor: ModelDescriptor = serde_json::from_slice(&raw)
      .map_err(|e| LoadError::Descriptor(format!("无法解析模型描述: {}", e)))?;

    if let Some(format) = &descriptor.format
      && format != LAYERS_MODEL_FORMAT
    {
      return Err(LoadError::Descriptor(format!("不支持的模型格式: {}", format)));
    }
    if let Some(converted_by) = &descriptor.converted_by {
      debug!("模型转换工具: {}", converted_by);
    }

    let weights = fetch_weights(fetcher, url, &descriptor.weights_manifest).await?;
    Self::from_descriptor(&descriptor, weights)
  }

  pub fn from_descriptor(descriptor: &ModelDescriptor, mut weights: WeightMap) -> Result<Self, LoadError> {
    let topology = &descriptor.model_topology;
    let inner = topology.get("model_config").unwrap_or(topology);
    let model: KerasModelConfig = serde_json::from_value(inner.clone())
      .map_err(|e| LoadError::Descriptor(format!("模型拓扑无效: {}", e)))?;

    let built = match model.class_name.as_str() {
      "Sequential" => Self::build_sequential(&model.config, &mut weights)?,
      "Functional" | "Model" => Self::build_functional(&model.config, &mut weights)?,
      other => return Err(LoadError::Descriptor(format!("不支持的模型类型: {}", other))),
    };

    if !weights.is_empty() {
      debug!("未使用的权重: {:?}", weights.keys().collect::<Vec<_>>());
    }

    info!(
      "模型 {} 构建完成: {} 层, 输入形状 {:?}, {} 个输出",
      built.name,
      built.nodes.len(),
      built.input_shape,
      built.outputs.len()
    );
    Ok(built)
  }

  fn parse_layers(value: &Value) -> Result<Vec<KerasLayer>, LoadError> {
    serde_json::from_value(value.clone())
      .map_err(|e| LoadError::Descriptor(format!("层列表无效: {}", e)))
  }

  fn input_shape_of(name: &str, config: &Value) -> Result<Vec<usize>, LoadError> {
    let shape: ShapeConfig = parse_config(name, config)?;
    shape
      .sample_shape()
      .ok_or_else(|| LoadError::Descriptor(format!("层 {} 未声明完整的输入形状", name)))
  }

  fn build_sequential(config: &Value, weights: &mut WeightMap) -> Result<Self, LoadError> {
    let (name, layers) = match config {
      Value::Array(_) => ("sequential".to_string(), Self::parse_layers(config)?),
      _ => (
        config
          .get("name")
          .and_then(Value::as_str)
          .unwrap_or("sequential")
          .to_string(),
        Self::parse_layers(config.get("layers").unwrap_or(&Value::Null))?,
      ),
    };

    let mut nodes: Vec<Node> = Vec::with_capacity(layers.len() + 1);
    let mut input_shape = None;
    for layer in &layers {
      let layer_name = layer.name()?;
      if nodes.is_empty() {
        input_shape = Some(Self::input_shape_of(&layer_name, &layer.config)?);
        nodes.push(Node {
          name: "input".to_string(),
          layer: Layer::Input,
          input: None,
        });
      }
      if layer.class_name == "InputLayer" {
        continue;
      }

      let built = build_layer(&layer.class_name, &layer_name, &layer.config, weights)?;
      let input = Some(nodes.len() - 1);
      nodes.push(Node {
        name: layer_name,
        layer: built,
        input,
      });
    }

    let input_shape = input_shape.ok_or_else(|| LoadError::Descriptor("模型没有任何层".to_string()))?;
    let outputs = vec![nodes.len() - 1];
    Ok(Self::assemble(name, input_shape, nodes, outputs))
  }

  fn build_functional(config: &Value, weights: &mut WeightMap) -> Result<Self, LoadError> {
    let name = config
      .get("name")
      .and_then(Value::as_str)
      .unwrap_or("model")
      .to_string();
    let layers = Self::parse_layers(config.get("layers").unwrap_or(&Value::Null))?;

    let mut nodes: Vec<Node> = Vec::with_capacity(layers.len());
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut input_shape = None;

    for layer in &layers {
      let layer_name = layer.name()?;
      let input = if layer.class_name == "InputLayer" {
        if input_shape.is_some() {
          return Err(LoadError::Descriptor("只支持单输入模型".to_string()));
        }
        input_shape = Some(Self::input_shape_of(&layer_name, &layer.config)?);
        None
      } else {
        let mut inbound = Vec::new();
        collect_inbound(&layer.inbound_nodes, &mut inbound);
        inbound.dedup();
        match inbound.as_slice() {
          [single] => Some(*index.get(single).ok_or_else(|| {
            LoadError::Descriptor(format!("层 {} 的输入 {} 未定义", layer_name, single))
          })?),
          _ => {
            return Err(LoadError::Descriptor(format!(
              "层 {} 需要恰好一个输入, 实际为 {:?}",
              layer_name, inbound
            )));
          }
        }
      };

      let built = build_layer(&layer.class_name, &layer_name, &layer.config, weights)?;
      index.insert(layer_name.clone(), nodes.len());
      nodes.push(Node {
        name: layer_name,
        layer: built,
        input,
      });
    }

    let input_shape = input_shape.ok_or_else(|| LoadError::Descriptor("模型缺少输入层".to_string()))?;
    let outputs = output_names(config.get("output_layers").unwrap_or(&Value::Null))
      .iter()
      .map(|out| {
        index
          .get(out)
          .copied()
          .ok_or_else(|| LoadError::Descriptor(format!("输出层 {} 未定义", out)))
      })
      .collect::<Result<Vec<_>, _>>()?;
    if outputs.is_empty() {
      return Err(LoadError::Descriptor("模型没有声明输出层".to_string()));
    }

    Ok(Self::assemble(name, input_shape, nodes, outputs))
  }

  fn assemble(name: String, input_shape: Vec<usize>, nodes: Vec<Node>, outputs: Vec<usize>) -> Self {
    let mut uses = vec![0usize; nodes.len()];
    for node in &nodes {
      if let Some(input) = node.input {
        uses[input] += 1;
      }
    }
    for &output in &outputs {
      uses[output] += 1;
    }

    Self {
      name,
      input_shape,
      nodes,
      outputs,
      uses,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn num_outputs(&self) -> usize {
    self.outputs.len()
  }

  pub fn layer_names(&self) -> impl Iterator<Item = &str> {
    self.nodes.iter().map(|node| node.name.as_str())
  }

  fn consume(
    values: &mut [Option<ArrayD<f32>>],
    remaining: &mut [usize],
    index: usize,
    consumer: &str,
  ) -> Result<ArrayD<f32>, InferenceError> {
    remaining[index] = remaining[index].saturating_sub(1);
    let value = if remaining[index] == 0 {
      values[index].take()
    } else {
      values[index].clone()
    };
    value.ok_or_else(|| InferenceError::Layer {
      layer: consumer.to_string(),
      reason: "输入尚未计算".to_string(),
    })
  }
}

impl Model for LayersModel {
  fn input_shape(&self) -> &[usize] {
    &self.input_shape
  }

  fn predict(&self, input: &Tensor) -> Result<Prediction, InferenceError> {
    let shape = input.shape();
    if shape.len() != self.input_shape.len() + 1 || shape[1..] != self.input_shape[..] {
      let mut expected = vec![shape.first().copied().unwrap_or(1)];
      expected.extend_from_slice(&self.input_shape);
      return Err(InferenceError::InputShape {
        expected,
        actual: shape.to_vec(),
      });
    }

    let mut remaining = self.uses.clone();
    let mut values: Vec<Option<ArrayD<f32>>> = vec![None; self.nodes.len()];
    for (i, node) in self.nodes.iter().enumerate() {
      let x = match node.input {
        None => input.array().clone(),
        Some(j) => Self::consume(&mut values, &mut remaining, j, &node.name)?,
      };
      let y = node.layer.forward(x).map_err(|reason| InferenceError::Layer {
        layer: node.name.clone(),
        reason,
      })?;
      values[i] = Some(y);
    }

    let registry = input.registry();
    let mut outputs = Vec::with_capacity(self.outputs.len());
    for &i in &self.outputs {
      let value = Self::consume(&mut values, &mut remaining, i, &self.nodes[i].name)?;
      outputs.push(registry.from_array(value));
    }

    if outputs.len() == 1 {
      Ok(Prediction::Single(outputs.remove(0)))
    } else {
      Ok(Prediction::Multiple(outputs))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::tensor::TensorRegistry;
  use ndarray::{ArrayD, IxDyn};
  use serde_json::json;

  fn weight(shape: &[usize], values: Vec<f32>) -> ArrayD<f32> {
    ArrayD::from_shape_vec(IxDyn(shape), values).unwrap()
  }

  fn descriptor(topology: Value) -> ModelDescriptor {
    serde_json::from_value(json!({
      "format": "layers-model",
      "modelTopology": topology,
      "weightsManifest": []
    }))
    .unwrap()
  }

  #[test]
  fn test_sequential_legacy_topology() {
    let descriptor = descriptor(json!({
      "keras_version": "2.15.0",
      "model_config": {
        "class_name": "Sequential",
        "config": {
          "name": "seq",
          "layers": [
            {"class_name": "Flatten", "config": {"name": "flatten", "batch_input_shape": [null, 2, 2, 1]}},
            {"class_name": "Dense", "config": {"name": "dense", "units": 1, "activation": "linear"}}
          ]
        }
      }
    }));
    let mut weights = WeightMap::new();
    weights.insert("dense/kernel".into(), weight(&[4, 1], vec![1.0, 2.0, 3.0, 4.0]));
    weights.insert("dense/bias".into(), weight(&[1], vec![0.5]));

    let model = LayersModel::from_descriptor(&descriptor, weights).unwrap();
    assert_eq!(model.name(), "seq");
    assert_eq!(model.input_shape(), &[2, 2, 1]);

    let registry = TensorRegistry::new();
    let input = registry.from_vec(&[1, 2, 2, 1], vec![1.0, 1.0, 1.0, 1.0]).unwrap();
    let output = model.predict(&input).unwrap().into_primary().unwrap();
    assert_eq!(output.to_vec(), vec![10.5]);
    drop(output);
    drop(input);
    assert_eq!(registry.live(), 0);
  }

  #[test]
  fn test_functional_keras3_multi_output() {
    let history = |name: &str| {
      json!([{"args": [{"class_name": "__keras_tensor__", "config": {"keras_history": [name, 0, 0]}}], "kwargs": {}}])
    };
    let descriptor = descriptor(json!({
      "class_name": "Functional",
      "config": {
        "name": "fkd",
        "layers": [
          {"class_name": "InputLayer", "name": "input_layer", "config": {"name": "input_layer", "batch_shape": [null, 2, 2, 1]}, "inbound_nodes": []},
          {"class_name": "MaxPooling2D", "name": "pool", "config": {"name": "pool", "pool_size": [2, 2], "padding": "valid"}, "inbound_nodes": history("input_layer")},
          {"class_name": "Flatten", "name": "flat", "config": {"name": "flat"}, "inbound_nodes": history("pool")},
          {"class_name": "Dense", "name": "coords", "config": {"name": "coords", "units": 2, "use_bias": false}, "inbound_nodes": history("flat")},
          {"class_name": "Dense", "name": "aux", "config": {"name": "aux", "units": 1, "use_bias": false, "activation": "relu"}, "inbound_nodes": history("flat")}
        ],
        "input_layers": [["input_layer", 0, 0]],
        "output_layers": [["coords", 0, 0], ["aux", 0, 0]]
      }
    }));
    let mut weights = WeightMap::new();
    weights.insert("coords/kernel".into(), weight(&[1, 2], vec![1.0, -1.0]));
    weights.insert("model/aux/kernel".into(), weight(&[1, 1], vec![-3.0]));

    let model = LayersModel::from_descriptor(&descriptor, weights).unwrap();
    assert_eq!(model.num_outputs(), 2);

    let registry = TensorRegistry::new();
    let input = registry.from_vec(&[1, 2, 2, 1], vec![0.1, 0.7, 0.3, 0.2]).unwrap();
    let prediction = model.predict(&input).unwrap();
    assert_eq!(registry.live(), 3);

    match prediction {
      Prediction::Multiple(outputs) => {
        assert_eq!(outputs[0].to_vec(), vec![0.7, -0.7]);
        assert_eq!(outputs[1].to_vec(), vec![0.0]);
      }
      Prediction::Single(_) => panic!("expected two outputs"),
    }
    assert_eq!(registry.live(), 1);
  }

  #[test]
  fn test_legacy_inbound_nodes() {
    let mut names = Vec::new();
    collect_inbound(&json!([[["conv2d", 0, 0, {}]]]), &mut names);
    assert_eq!(names, vec!["conv2d".to_string()]);
  }

  #[test]
  fn test_unsupported_layer_is_rejected() {
    let descriptor = descriptor(json!({
      "class_name": "Sequential",
      "config": {"layers": [
        {"class_name": "LSTM", "config": {"name": "lstm", "batch_input_shape": [null, 4, 1]}}
      ]}
    }));
    let result = LayersModel::from_descriptor(&descriptor, WeightMap::new());
    assert!(matches!(result, Err(LoadError::Descriptor(_))));
  }

  #[test]
  fn test_missing_weight_is_rejected() {
    let descriptor = descriptor(json!({
      "class_name": "Sequential",
      "config": {"layers": [
        {"class_name": "Dense", "config": {"name": "dense", "units": 2, "batch_input_shape": [null, 3]}}
      ]}
    }));
    let result = LayersModel::from_descriptor(&descriptor, WeightMap::new());
    assert!(matches!(result, Err(LoadError::Weights(_))));
  }

  #[test]
  fn test_wrong_input_shape() {
    let descriptor = descriptor(json!({
      "class_name": "Sequential",
      "config": {"layers": [
        {"class_name": "Flatten", "config": {"name": "flatten", "batch_input_shape": [null, 2, 2, 1]}}
      ]}
    }));
    let model = LayersModel::from_descriptor(&descriptor, WeightMap::new()).unwrap();
    let registry = TensorRegistry::new();
    let input = registry.zeros(&[1, 3, 3, 1]);
    assert!(matches!(
      model.predict(&input),
      Err(InferenceError::InputShape { .. })
    ));
  }
}
