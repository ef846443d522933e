// 该文件是 FastSAM Oneshot 项目的一部分。
// src/task.rs - 推理任务
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

use std::{
  path::PathBuf,
  time::{Duration, Instant},
};

use tracing::info;

use crate::{
  model::{Predict, PredictOptions},
  output::Render,
};

pub trait Task<M, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, model: &mut M, output: &O) -> Result<Self::Output, Self::Error>;
}

/// 单次推理的计时结果
#[derive(Debug, Clone, Copy)]
pub struct OneShotReport {
  pub elapsed: Duration,
  pub results: usize,
}

/// 读取一张图像、推理一次、保存第一个结果
pub struct OneShotTask {
  input: PathBuf,
  options: PredictOptions,
}

impl OneShotTask {
  pub fn new(input: impl Into<PathBuf>, options: PredictOptions) -> Self {
    Self {
      input: input.into(),
      options,
    }
  }
}

/// 秒数保留一位小数，例如 `1.3s`
pub fn format_elapsed(elapsed: Duration) -> String {
  format!("{:.1}s", elapsed.as_secs_f64())
}

impl<
  R,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  M: Predict<Output = R, Error = ME>,
  O: Render<R, Error = RE>,
> Task<M, O> for OneShotTask
{
  type Output = OneShotReport;
  type Error = anyhow::Error;

  fn run_task(self, model: &mut M, output: &O) -> Result<Self::Output, Self::Error> {
    info!("开始任务: {}", self.input.display());
    let now = Instant::now();

    println!("Model inference started...");
    let results = model.predict(&self.input, &self.options)?;
    println!("Model inference done.");
    let elapsed = now.elapsed();
    info!("推理完成，耗时: {:.2?}", elapsed);

    let result = results
      .first()
      .ok_or_else(|| anyhow::anyhow!("没有推理结果"))?;
    output.render_result(result)?;

    println!("Output saved to {}", output.destination());
    println!("Model inference took {}", format_elapsed(elapsed));

    Ok(OneShotReport {
      elapsed,
      results: results.len(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::{cell::RefCell, path::Path};
  use thiserror::Error;

  #[derive(Error, Debug)]
  #[error("mock error")]
  struct MockError;

  struct MockModel {
    fail: bool,
  }

  impl Predict for MockModel {
    type Output = u32;
    type Error = MockError;

    fn predict(&mut self, _path: &Path, _options: &PredictOptions) -> Result<Vec<u32>, MockError> {
      if self.fail { Err(MockError) } else { Ok(vec![7]) }
    }
  }

  struct MockOutput {
    rendered: RefCell<Vec<u32>>,
  }

  impl Render<u32> for MockOutput {
    type Error = MockError;

    fn render_result(&self, result: &u32) -> Result<(), MockError> {
      self.rendered.borrow_mut().push(*result);
      Ok(())
    }

    fn destination(&self) -> &str {
      "output.jpg"
    }
  }

  #[test]
  fn elapsed_has_one_decimal() {
    assert_eq!(format_elapsed(Duration::from_millis(0)), "0.0s");
    assert_eq!(format_elapsed(Duration::from_millis(1234)), "1.2s");
    assert_eq!(format_elapsed(Duration::from_millis(15_960)), "16.0s");
  }

  #[test]
  fn first_result_is_rendered() {
    let mut model = MockModel { fail: false };
    let output = MockOutput {
      rendered: RefCell::new(vec![]),
    };

    let report = OneShotTask::new("image.jpg", PredictOptions::default())
      .run_task(&mut model, &output)
      .unwrap();

    assert_eq!(report.results, 1);
    assert_eq!(*output.rendered.borrow(), vec![7]);
  }

  #[test]
  fn inference_failure_skips_rendering() {
    let mut model = MockModel { fail: true };
    let output = MockOutput {
      rendered: RefCell::new(vec![]),
    };

    let result = OneShotTask::new("image.jpg", PredictOptions::default()).run_task(&mut model, &output);

    assert!(result.is_err());
    assert!(output.rendered.borrow().is_empty());
  }
}
