// 该文件是 FastSAM Oneshot 项目的一部分。
// src/model.rs - 模型
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

use std::{collections::BTreeMap, path::Path};

use image::RgbImage;
use thiserror::Error;

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 以文件路径为输入的完整预测流程：读取、预处理、推理、后处理
pub trait Predict {
  type Output;
  type Error;

  fn predict(
    &mut self,
    path: &Path,
    options: &PredictOptions,
  ) -> Result<Vec<Self::Output>, Self::Error>;
}

#[derive(Error, Debug)]
#[error("掩码数据长度 {actual} 与尺寸 {width}x{height} 不一致")]
pub struct MaskSizeError {
  pub width: u32,
  pub height: u32,
  pub actual: usize,
}

/// 原图坐标下的实例掩码，只存储外接框内的像素
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceMask {
  left: u32,
  top: u32,
  width: u32,
  height: u32,
  data: Box<[bool]>,
}

impl InstanceMask {
  pub fn new(
    left: u32,
    top: u32,
    width: u32,
    height: u32,
    data: Vec<bool>,
  ) -> Result<Self, MaskSizeError> {
    if data.len() != width as usize * height as usize {
      return Err(MaskSizeError {
        width,
        height,
        actual: data.len(),
      });
    }
    Ok(Self {
      left,
      top,
      width,
      height,
      data: data.into_boxed_slice(),
    })
  }

  /// (left, top, width, height)
  pub fn bounds(&self) -> (u32, u32, u32, u32) {
    (self.left, self.top, self.width, self.height)
  }

  pub fn contains(&self, x: u32, y: u32) -> bool {
    if x < self.left || y < self.top {
      return false;
    }
    let (dx, dy) = (x - self.left, y - self.top);
    if dx >= self.width || dy >= self.height {
      return false;
    }
    self.data[(dy * self.width + dx) as usize]
  }

  pub fn area(&self) -> usize {
    self.data.iter().filter(|&&v| v).count()
  }

  /// 遍历所有前景像素的原图坐标
  pub fn pixels(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
    self
      .data
      .iter()
      .enumerate()
      .filter(|(_, v)| **v)
      .map(|(i, _)| {
        let i = i as u32;
        (self.left + i % self.width, self.top + i / self.width)
      })
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentItem {
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4], // 原图像素 [x_min, y_min, x_max, y_max]
  pub mask: InstanceMask,
}

/// 各阶段耗时（毫秒）
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Speed {
  pub preprocess: f64,
  pub inference: f64,
  pub postprocess: f64,
}

/// 单张图像的分割结果
#[derive(Debug, Clone)]
pub struct SegmentResult {
  pub path: String,
  pub image: RgbImage,
  pub items: Box<[SegmentItem]>,
  pub names: BTreeMap<u32, String>,
  /// 模型输入尺寸 (高, 宽)
  pub input_shape: (usize, usize),
  pub speed: Speed,
}

impl SegmentResult {
  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn label(&self, item: &SegmentItem) -> &str {
    self
      .names
      .get(&item.class_id)
      .map(String::as_str)
      .unwrap_or("object")
  }

  /// 单行摘要，例如 `image.jpg: 320x320 12 objects, 85.3ms`
  pub fn summary(&self) -> String {
    let (h, w) = self.input_shape;
    let count = match self.len() {
      0 => "(no detections)".to_string(),
      1 => "1 object".to_string(),
      n => format!("{} objects", n),
    };
    format!(
      "{}: {}x{} {}, {:.1}ms",
      self.path, h, w, count, self.speed.inference
    )
  }
}

pub mod config;
pub mod metadata;
pub mod postprocess;

mod fastsam;
pub use self::config::{Device, Overrides, PredictOptions, Precision};
pub use self::fastsam::{FastSam, FastSamBuilder, FastSamError};
