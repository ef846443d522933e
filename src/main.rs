// 该文件是 FastSAM Oneshot 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use fastsam_oneshot::{
  model::{FastSamBuilder, PredictOptions, Precision},
  output::SaveImageFileOutput,
  task::{OneShotTask, Task},
  utils::ThreadLimits,
};

fn main() -> Result<()> {
  // 日志写到 stderr，stdout 只保留状态行
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
    .with_writer(std::io::stderr)
    .init();

  let args = args::Args::parse();
  info!("参数: {:?}", args);

  // 必须在加载模型之前限制线程数
  let thread_limits = ThreadLimits::new(args.threads)?.apply();
  println!("Enviroment and torch configuration done.");

  println!("Loading {} model..", args.model);
  let mut model = FastSamBuilder::new(&args.model)
    .thread_limits(thread_limits)
    .build()?;
  println!("{} model loading done.", args.model);

  model.force_precision(Precision::F32)?;
  let overrides = model.overrides_mut();
  overrides.conf = args.conf;
  overrides.iou = args.iou;
  overrides.max_det = args.max_det;
  info!(
    "模型配置: 精度 {:?}, 默认参数 {:?}, 元数据 {:?}",
    model.precision(),
    model.overrides(),
    model.metadata()
  );
  println!("Model configuration done.");

  let options = PredictOptions {
    device: args.device,
    verbose: args.verbose,
    stream: false,
    imgsz: Some(args.imgsz),
    half: false,
    ..Default::default()
  };
  let output = SaveImageFileOutput::new(&args.output)?;

  let report = OneShotTask::new(&args.input, options).run_task(&mut model, &output)?;
  info!("任务完成: {:?}", report);

  Ok(())
}
