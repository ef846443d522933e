// 该文件是 FastSAM Oneshot 项目的一部分。
// src/output/draw.rs - 分割结果可视化
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

use ab_glyph::{FontArc, InvalidFont, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};

use crate::model::{SegmentItem, SegmentResult};

// 渲染常量
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_PADDING: i32 = 2;
const BOX_THICKNESS: i32 = 2;
const MASK_ALPHA: f32 = 0.5;
const PALETTE_SIZE: usize = 20;
const TEXT_COLOR: [u8; 3] = [255, 255, 255]; // 白色

pub struct Draw {
  font: FontArc,
  font_scale: PxScale,
  mask_alpha: f32,
  colors: Vec<Rgb<u8>>,
}

impl Draw {
  pub fn new() -> Result<Self, InvalidFont> {
    let font_data = include_bytes!("../../assets/DejaVuSans.ttf");
    let font = FontArc::try_from_slice(font_data)?;

    // 相邻实例的色相相隔较远，便于区分
    let colors = (0..PALETTE_SIZE)
      .map(|i| {
        let hue = ((i * 7) % PALETTE_SIZE) as f32 / PALETTE_SIZE as f32 * 360.0;
        hsv_to_rgb(hue, 0.8, 0.9)
      })
      .collect();

    Ok(Self {
      font,
      font_scale: PxScale::from(LABEL_FONT_SIZE),
      mask_alpha: MASK_ALPHA,
      colors,
    })
  }

  pub fn color(&self, index: usize) -> Rgb<u8> {
    self.colors[index % self.colors.len()]
  }

  /// 在原图副本上叠加掩码、边框和标签
  pub fn draw_result(&self, result: &SegmentResult) -> RgbImage {
    let mut image = result.image.clone();

    // 先画全部掩码，再画边框，避免边框被后续掩码覆盖
    for (index, item) in result.items.iter().enumerate() {
      self.blend_mask(&mut image, item, self.color(index));
    }
    for (index, item) in result.items.iter().enumerate() {
      let label = format!("{} {:.2}", result.label(item), item.score);
      self.draw_bbox_with_label(&mut image, &item.bbox, &label, self.color(index));
    }

    image
  }

  fn blend_mask(&self, image: &mut RgbImage, item: &SegmentItem, color: Rgb<u8>) {
    let alpha = self.mask_alpha;
    for (x, y) in item.mask.pixels() {
      if x >= image.width() || y >= image.height() {
        continue;
      }
      let pixel = image.get_pixel_mut(x, y);
      for c in 0..3 {
        let blended = pixel[c] as f32 * (1.0 - alpha) + color[c] as f32 * alpha;
        pixel[c] = blended.round().clamp(0.0, 255.0) as u8;
      }
    }
  }

  // bbox 为原图像素坐标 [x_min, y_min, x_max, y_max]
  fn draw_bbox_with_label(&self, image: &mut RgbImage, bbox: &[f32; 4], label: &str, color: Rgb<u8>) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    let x_min = (bbox[0].floor() as i32).clamp(0, w - 1);
    let y_min = (bbox[1].floor() as i32).clamp(0, h - 1);
    let x_max = (bbox[2].ceil() as i32).clamp(0, w - 1);
    let y_max = (bbox[3].ceil() as i32).clamp(0, h - 1);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    // 边框向内加粗
    for t in 0..BOX_THICKNESS {
      let width = x_max - x_min + 1 - 2 * t;
      let height = y_max - y_min + 1 - 2 * t;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, color);
    }

    let (text_w, text_h) = text_size(self.font_scale, &self.font, label);
    let label_w = (text_w as i32 + 2 * LABEL_PADDING).min(w - x_min);
    let label_h = text_h as i32 + 2 * LABEL_PADDING;

    // 优先放在边框上方，空间不足时放在框内顶部
    let label_y = if y_min - label_h >= 0 { y_min - label_h } else { y_min };

    if label_w > 0 && label_h > 0 {
      let rect = Rect::at(x_min, label_y).of_size(label_w as u32, label_h as u32);
      draw_filled_rect_mut(image, rect, color);
      draw_text_mut(
        image,
        Rgb(TEXT_COLOR),
        x_min + LABEL_PADDING,
        label_y + LABEL_PADDING,
        self.font_scale,
        &self.font,
        label,
      );
    }
  }
}

/// HSV 转 RGB
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = if h < 60.0 {
    (c, x, 0.0)
  } else if h < 120.0 {
    (x, c, 0.0)
  } else if h < 180.0 {
    (0.0, c, x)
  } else if h < 240.0 {
    (0.0, x, c)
  } else if h < 300.0 {
    (x, 0.0, c)
  } else {
    (c, 0.0, x)
  };

  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}
