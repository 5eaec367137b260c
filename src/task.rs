// 该文件是 FKD （面部关键点检测） 项目的一部分。
// src/task.rs - 任务
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

use std::fmt::Display;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::{
  frame::FaceFrame,
  input::ImageSource,
  keypoints::{FaceMetrics, Keypoints, compute_metrics},
  model::ModelProvider,
  output::Render,
  pipeline::Pipeline,
};

#[async_trait]
pub trait Task<P, O>: Sized {
  type Output;
  type Error;
  async fn run_task(self, input: ImageSource, pipeline: &Pipeline<P, O>) -> Result<Self::Output, Self::Error>;
}

pub struct OneShotTask;

#[async_trait]
impl<P, O> Task<P, O> for OneShotTask
where
  P: ModelProvider,
  O: Render<FaceFrame, Keypoints> + Send + Sync,
  O::Error: Display,
{
  type Output = (Keypoints, FaceMetrics);
  type Error = anyhow::Error;

  async fn run_task(self, input: ImageSource, pipeline: &Pipeline<P, O>) -> Result<Self::Output, Self::Error> {
    info!("开始任务...");
    let status = pipeline.load_model().await?;
    info!("{}", status);

    let now = Instant::now();
    let keypoints = pipeline.predict(input).await?;
    info!("预测完成，耗时: {:.2?}", now.elapsed());

    let metrics = compute_metrics(&keypoints);
    info!("面部指标:\n{}", metrics);

    Ok((keypoints, metrics))
  }
}

/// 多次预测的统计
#[derive(Debug, Clone)]
pub struct RepeatReport {
  pub runs: usize,
  pub average: Duration,
  pub live_tensors: usize,
}

pub struct RepeatShotTask {
  repeat: usize,
}

impl Default for RepeatShotTask {
  fn default() -> Self {
    Self { repeat: 100 }
  }
}

impl RepeatShotTask {
  pub fn with_repeat(mut self, repeat: usize) -> Self {
    self.repeat = repeat.max(1);
    self
  }
}

#[async_trait]
impl<P, O> Task<P, O> for RepeatShotTask
where
  P: ModelProvider,
  O: Render<FaceFrame, Keypoints> + Send + Sync,
  O::Error: Display,
{
  type Output = RepeatReport;
  type Error = anyhow::Error;

  async fn run_task(self, input: ImageSource, pipeline: &Pipeline<P, O>) -> Result<Self::Output, Self::Error> {
    info!("开始任务...");
    pipeline.load_model().await?;

    let baseline = pipeline.registry().live();
    let mut times = Vec::with_capacity(self.repeat);
    for i in 0..self.repeat {
      let now = Instant::now();
      pipeline.predict(input.clone()).await?;
      let elapsed = now.elapsed();
      info!("({})预测完成，耗时: {:.2?}", i, elapsed);
      times.push(elapsed);

      let live = pipeline.registry().live();
      if live != baseline {
        anyhow::bail!("第 {} 次预测后存活张量数为 {}, 预期 {}", i, live, baseline);
      }
    }

    // 前两次包含缓存预热，不计入平均
    let skip = if times.len() > 2 { 2 } else { 0 };
    let average = times.iter().skip(skip).sum::<Duration>() / (times.len() - skip) as u32;
    warn!("平均预测时间: {:.2?}", average);

    Ok(RepeatReport {
      runs: times.len(),
      average,
      live_tensors: baseline,
    })
  }
}
