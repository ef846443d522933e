// 该文件是 FastSAM Oneshot 项目的一部分。
// src/utils.rs - 进程级线程数限制
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

use std::num::NonZeroUsize;

use thiserror::Error;
use tracing::debug;

/// 各数值后端各自读取的线程数环境变量
pub const THREAD_ENV_VARS: [&str; 2] = ["OMP_NUM_THREADS", "MKL_NUM_THREADS"];

#[derive(Error, Debug)]
pub enum ThreadLimitError {
  #[error("线程数必须大于 0")]
  ZeroThreads,
}

/// 进程级线程数限制
///
/// 三处设置必须一致：两个环境变量，以及 ONNX Runtime 会话自身的
/// intra/inter 线程数。只设置其中之一并不能限制全部后端。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadLimits {
  threads: NonZeroUsize,
}

impl Default for ThreadLimits {
  fn default() -> Self {
    Self::single()
  }
}

impl ThreadLimits {
  pub fn single() -> Self {
    Self {
      threads: NonZeroUsize::MIN,
    }
  }

  pub fn new(threads: usize) -> Result<Self, ThreadLimitError> {
    NonZeroUsize::new(threads)
      .map(|threads| Self { threads })
      .ok_or(ThreadLimitError::ZeroThreads)
  }

  pub fn threads(&self) -> usize {
    self.threads.get()
  }

  /// 写入环境变量。必须在加载模型之前、进程尚未创建其他线程时调用。
  pub fn apply(self) -> Self {
    let value = self.threads.to_string();
    for key in THREAD_ENV_VARS {
      // SAFETY: 仅在 main 启动阶段调用，此时进程内只有一个线程。
      unsafe { std::env::set_var(key, &value) };
      debug!("设置环境变量 {}={}", key, value);
    }
    self
  }
}
