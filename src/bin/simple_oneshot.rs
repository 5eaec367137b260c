// 该文件是 FKD （面部关键点检测） 项目的一部分。
// src/bin/simple_oneshot.rs - 单张图像关键点检测
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
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use url::Url;

use fkd::{
  FromUrl,
  input::ImageSource,
  keypoints::Landmark,
  model::{FetcherWrapper, ModelLoaderBuilder},
  output::OutputWrapper,
  pipeline::PipelineBuilder,
  task::{OneShotTask, Task},
};
use tracing::{error, info};

/// FKD 单次检测参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型描述文件或模型所在页面的地址 (http/https/file)
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源 (image:// file:// v4l://)
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出 (image:// overlay://)
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 缓存令牌，`auto` 表示使用当前时间
  #[arg(long, value_name = "TOKEN")]
  pub cache_bust: Option<String>,
  /// 模型加载超时（秒）
  #[arg(long, value_name = "SECS")]
  pub load_timeout: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型地址: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let mut builder = ModelLoaderBuilder::from_url(&args.model)?;
  builder = match args.cache_bust.as_deref() {
    Some("auto") => builder.cache_bust_auto(),
    Some(token) => builder.cache_bust(token),
    None => builder,
  };
  if let Some(secs) = args.load_timeout {
    builder = builder.timeout(Duration::from_secs(secs));
  }
  let loader = Arc::new(builder.build(FetcherWrapper::new()?));

  let input = ImageSource::from_url(&args.input)?;
  let output = OutputWrapper::from_url(&args.output)?;
  let pipeline = PipelineBuilder::new().build(loader, output);

  match OneShotTask.run_task(input, &pipeline).await {
    Ok((keypoints, metrics)) => {
      println!("{}", pipeline.status());
      for landmark in Landmark::ALL {
        let (x, y) = keypoints.point(landmark);
        println!("{:<28} {:>7.2} {:>7.2}", landmark.to_label_str(), x, y);
      }
      println!();
      println!("{}", metrics);
      Ok(())
    }
    Err(e) => {
      error!("{:#}", e);
      println!("{}", pipeline.status());
      Err(e)
    }
  }
}
