// 该文件是 FastSAM Oneshot 项目的一部分。
// src/frame.rs - 源图像与 letterbox NCHW 帧定义
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

use image::{RgbImage, imageops::FilterType};
use ndarray::Array4;
use tracing::debug;

const RGB_CHANNELS: usize = 3;
const LETTERBOX_FILL: u8 = 114;

/// 解码后的输入图像
#[derive(Debug, Clone)]
pub struct SourceImage {
  pub path: String,
  pub image: RgbImage,
}

impl SourceImage {
  pub fn new(path: impl Into<String>, image: RgbImage) -> Self {
    Self {
      path: path.into(),
      image,
    }
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }
}

/// 等比缩放并居中填充后的 NCHW 帧，数值范围 [0, 1]
///
/// 同时记录缩放比例与填充量，用于把模型坐标映射回原图。
#[derive(Debug, Clone)]
pub struct LetterboxFrame {
  tensor: Array4<f32>,
  ratio: f32,
  pad_left: f32,
  pad_top: f32,
  original: (u32, u32),
}

impl LetterboxFrame {
  /// `target` 为 (高, 宽)
  pub fn from_image(image: &RgbImage, target: (usize, usize)) -> Self {
    let (width, height) = image.dimensions();
    let (target_h, target_w) = target;

    let ratio = (target_h as f32 / height as f32).min(target_w as f32 / width as f32);
    let new_w = ((width as f32 * ratio).round() as u32).clamp(1, target_w as u32);
    let new_h = ((height as f32 * ratio).round() as u32).clamp(1, target_h as u32);

    let dw = (target_w as f32 - new_w as f32) / 2.0;
    let dh = (target_h as f32 - new_h as f32) / 2.0;
    let pad_left = (dw - 0.1).round().max(0.0);
    let pad_top = (dh - 0.1).round().max(0.0);

    debug!(
      "letterbox: {}x{} -> {}x{}, 比例 {:.4}, 填充 ({}, {})",
      width, height, new_w, new_h, ratio, pad_left, pad_top
    );

    let resized = if (new_w, new_h) == (width, height) {
      image.clone()
    } else {
      image::imageops::resize(image, new_w, new_h, FilterType::Triangle)
    };

    let fill = LETTERBOX_FILL as f32 / 255.0;
    let mut tensor = Array4::<f32>::from_elem((1, RGB_CHANNELS, target_h, target_w), fill);
    let (left, top) = (pad_left as usize, pad_top as usize);
    for (x, y, pixel) in resized.enumerate_pixels() {
      let (tx, ty) = (left + x as usize, top + y as usize);
      if tx >= target_w || ty >= target_h {
        continue;
      }
      for c in 0..RGB_CHANNELS {
        tensor[[0, c, ty, tx]] = pixel[c] as f32 / 255.0;
      }
    }

    Self {
      tensor,
      ratio,
      pad_left,
      pad_top,
      original: (width, height),
    }
  }

  pub fn tensor(&self) -> &Array4<f32> {
    &self.tensor
  }

  /// 模型输入尺寸 (高, 宽)
  pub fn input_shape(&self) -> (usize, usize) {
    let shape = self.tensor.shape();
    (shape[2], shape[3])
  }

  /// 原图尺寸 (宽, 高)
  pub fn original_size(&self) -> (u32, u32) {
    self.original
  }

  pub fn ratio(&self) -> f32 {
    self.ratio
  }

  /// 原图坐标 -> 模型输入坐标
  pub fn to_input(&self, x: f32, y: f32) -> (f32, f32) {
    (x * self.ratio + self.pad_left, y * self.ratio + self.pad_top)
  }

  /// 模型输入坐标 -> 原图坐标（未裁剪）
  pub fn to_original(&self, x: f32, y: f32) -> (f32, f32) {
    (
      (x - self.pad_left) / self.ratio,
      (y - self.pad_top) / self.ratio,
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn landscape_image_is_padded_vertically() {
    let image = RgbImage::from_pixel(640, 480, Rgb([255, 0, 0]));
    let frame = LetterboxFrame::from_image(&image, (320, 320));

    assert_eq!(frame.tensor().shape(), &[1, 3, 320, 320]);
    assert_eq!(frame.input_shape(), (320, 320));
    assert!((frame.ratio() - 0.5).abs() < 1e-6);

    let fill = 114.0 / 255.0;
    assert!((frame.tensor()[[0, 0, 0, 0]] - fill).abs() < 1e-6);
    assert!((frame.tensor()[[0, 0, 319, 160]] - fill).abs() < 1e-6);
    // 有效区域：第 40 行到第 279 行
    assert!(frame.tensor()[[0, 0, 40, 10]] > 0.99);
    assert!(frame.tensor()[[0, 1, 160, 160]] < 0.01);
  }

  #[test]
  fn coordinates_round_trip_through_letterbox() {
    let image = RgbImage::new(640, 480);
    let frame = LetterboxFrame::from_image(&image, (320, 320));

    assert_eq!(frame.to_original(160.0, 160.0), (320.0, 240.0));
    assert_eq!(frame.to_input(320.0, 240.0), (160.0, 160.0));
    assert_eq!(frame.original_size(), (640, 480));
  }

  #[test]
  fn same_size_image_is_copied_without_padding() {
    let image = RgbImage::from_pixel(320, 320, Rgb([0, 255, 0]));
    let frame = LetterboxFrame::from_image(&image, (320, 320));

    assert_eq!(frame.to_original(10.0, 20.0), (10.0, 20.0));
    assert!((frame.tensor()[[0, 1, 0, 0]] - 1.0).abs() < 1e-6);
    assert!(frame.tensor()[[0, 0, 319, 319]].abs() < 1e-6);
  }
}
