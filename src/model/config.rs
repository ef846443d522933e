// 该文件是 FastSAM Oneshot 项目的一部分。
// src/model/config.rs - 推理参数与调用选项
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

use std::{fmt, str::FromStr};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("不支持的设备: {0}，仅支持 cpu")]
  UnsupportedDevice(String),
}

/// 模型数值精度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Precision {
  #[default]
  F32,
  F16,
}

/// 推理设备，目前只有 CPU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
  #[default]
  Cpu,
}

impl FromStr for Device {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "cpu" => Ok(Device::Cpu),
      other => Err(ConfigError::UnsupportedDevice(other.to_string())),
    }
  }
}

impl fmt::Display for Device {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Device::Cpu => write!(f, "cpu"),
    }
  }
}

/// 模型级默认推理参数，调用时未显式指定的项使用这里的值
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Overrides {
  /// 置信度阈值
  pub conf: f32,
  /// NMS IoU 阈值
  pub iou: f32,
  /// 最大实例数
  pub max_det: usize,
}

impl Default for Overrides {
  fn default() -> Self {
    Self {
      conf: 0.25,
      iou: 0.7,
      max_det: 300,
    }
  }
}

/// 单次调用的推理选项
#[derive(Debug, Clone, Default)]
pub struct PredictOptions {
  pub device: Device,
  pub verbose: bool,
  /// 单张图像输入时结果总是一次性返回
  pub stream: bool,
  /// 输入边长，`None` 表示使用模型元数据中的尺寸
  pub imgsz: Option<usize>,
  /// CPU 上被忽略
  pub half: bool,
  pub conf: Option<f32>,
  pub iou: Option<f32>,
  pub max_det: Option<usize>,
}

impl PredictOptions {
  pub fn with_imgsz(mut self, imgsz: usize) -> Self {
    self.imgsz = Some(imgsz);
    self
  }

  pub fn with_verbose(mut self, verbose: bool) -> Self {
    self.verbose = verbose;
    self
  }

  /// 合并调用选项与模型默认参数，调用选项优先
  pub fn resolve(&self, overrides: &Overrides) -> Overrides {
    Overrides {
      conf: self.conf.unwrap_or(overrides.conf),
      iou: self.iou.unwrap_or(overrides.iou),
      max_det: self.max_det.unwrap_or(overrides.max_det),
    }
  }
}

/// 将输入边长向上取整为步长的整数倍
pub fn check_imgsz(imgsz: usize, stride: usize) -> usize {
  let stride = stride.max(1);
  imgsz.max(stride).div_ceil(stride) * stride
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn device_parses_cpu_only() {
    assert_eq!("cpu".parse::<Device>().unwrap(), Device::Cpu);
    assert_eq!(" CPU ".parse::<Device>().unwrap(), Device::Cpu);
    assert!(matches!(
      "cuda:0".parse::<Device>(),
      Err(ConfigError::UnsupportedDevice(_))
    ));
  }

  #[test]
  fn call_options_take_priority_over_overrides() {
    let overrides = Overrides {
      conf: 0.5,
      iou: 0.9,
      max_det: 100,
    };

    let resolved = PredictOptions::default().resolve(&overrides);
    assert_eq!(resolved, overrides);

    let options = PredictOptions {
      conf: Some(0.3),
      max_det: Some(5),
      ..Default::default()
    };
    let resolved = options.resolve(&overrides);
    assert_eq!(resolved.conf, 0.3);
    assert_eq!(resolved.iou, 0.9);
    assert_eq!(resolved.max_det, 5);
  }

  #[test]
  fn defaults_are_single_precision_on_cpu() {
    assert_eq!(Precision::default(), Precision::F32);
    let options = PredictOptions::default();
    assert_eq!(options.device, Device::Cpu);
    assert!(!options.half);
    assert_eq!(Overrides::default().max_det, 300);
  }

  #[test]
  fn imgsz_rounds_up_to_stride() {
    assert_eq!(check_imgsz(320, 32), 320);
    assert_eq!(check_imgsz(300, 32), 320);
    assert_eq!(check_imgsz(10, 32), 32);
    assert_eq!(check_imgsz(321, 0), 321);
  }
}
