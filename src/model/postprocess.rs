// 该文件是 FastSAM Oneshot 项目的一部分。
// src/model/postprocess.rs - 分割输出解码、NMS 与掩码生成
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

use thiserror::Error;
use tracing::debug;

use crate::{
  frame::LetterboxFrame,
  model::{InstanceMask, MaskSizeError, SegmentItem, config::Overrides},
};

/// 距离图像边缘小于该像素数的框边吸附到边缘
const BORDER_SNAP_THRESHOLD: f32 = 20.0;
/// 与整幅图像 IoU 超过该值的框替换为整幅图像
const FULL_BOX_IOU: f32 = 0.9;

#[derive(Error, Debug)]
pub enum PostprocessError {
  #[error("预测输出形状不符: {0:?}")]
  PredictionShape(Vec<usize>),
  #[error("原型掩码形状不符: {0:?}")]
  ProtoShape(Vec<usize>),
  #[error("预测通道数 {channels} 不足以容纳 4 个框坐标、类别分数和 {nm} 个掩码系数")]
  ChannelMismatch { channels: usize, nm: usize },
  #[error("张量长度 {actual} 与形状要求的 {expected} 不一致")]
  LengthMismatch { expected: usize, actual: usize },
  #[error("掩码错误: {0}")]
  Mask(#[from] MaskSizeError),
}

/// 模型原始输出，两个张量均已拷贝出会话
#[derive(Debug, Clone)]
pub struct RawOutput {
  /// `[1, 4 + nc + nm, N]`
  pub pred: Vec<f32>,
  pub pred_shape: Vec<usize>,
  /// `[1, nm, mh, mw]`
  pub proto: Vec<f32>,
  pub proto_shape: Vec<usize>,
}

/// NMS 之前的候选实例，坐标位于模型输入空间
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4],
  pub coeffs: Vec<f32>,
}

/// 原型掩码视图
pub struct Protos<'a> {
  data: &'a [f32],
  nm: usize,
  height: usize,
  width: usize,
}

impl<'a> Protos<'a> {
  pub fn new(data: &'a [f32], shape: &[usize]) -> Result<Self, PostprocessError> {
    let &[1, nm, height, width] = shape else {
      return Err(PostprocessError::ProtoShape(shape.to_vec()));
    };
    // 双线性采样要求平面非空
    if nm == 0 || height == 0 || width == 0 {
      return Err(PostprocessError::ProtoShape(shape.to_vec()));
    }
    let expected = nm * height * width;
    if data.len() != expected {
      return Err(PostprocessError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }
    Ok(Self {
      data,
      nm,
      height,
      width,
    })
  }

  pub fn channels(&self) -> usize {
    self.nm
  }

  /// 掩码系数与原型的线性组合，结果为原型分辨率下的 logit
  fn combine(&self, coeffs: &[f32]) -> Vec<f32> {
    let plane = self.height * self.width;
    let mut logits = vec![0.0f32; plane];
    for (k, &coeff) in coeffs.iter().enumerate().take(self.nm) {
      let proto = &self.data[k * plane..(k + 1) * plane];
      for (acc, &p) in logits.iter_mut().zip(proto) {
        *acc += coeff * p;
      }
    }
    logits
  }
}

/// 完整后处理：解码、NMS、掩码生成、坐标还原和 FastSAM 的边框修正
pub fn postprocess(
  raw: &RawOutput,
  frame: &LetterboxFrame,
  params: &Overrides,
) -> Result<Vec<SegmentItem>, PostprocessError> {
  let protos = Protos::new(&raw.proto, &raw.proto_shape)?;
  let candidates = decode_candidates(&raw.pred, &raw.pred_shape, protos.channels(), params.conf)?;
  debug!("置信度过滤后剩余 {} 个候选", candidates.len());

  let agnostic = candidates.iter().all(|c| c.class_id == 0);
  let kept = non_max_suppression(candidates, params.iou, params.max_det, agnostic);
  debug!("NMS 后剩余 {} 个实例", kept.len());

  let (orig_w, orig_h) = frame.original_size();
  let (w, h) = (orig_w as f32, orig_h as f32);
  let full = [0.0, 0.0, w, h];

  let items = kept
    .into_iter()
    .map(|candidate| {
      let bbox = scale_box(&candidate.bbox, frame);
      let mask = assemble_mask(&candidate.coeffs, &protos, &bbox, frame)?;

      let mut bbox = adjust_to_border(bbox, (w, h), BORDER_SNAP_THRESHOLD);
      if iou(&full, &bbox) > FULL_BOX_IOU {
        bbox = full;
      }

      Ok(SegmentItem {
        class_id: candidate.class_id,
        score: candidate.score,
        bbox,
        mask,
      })
    })
    .collect::<Result<Vec<_>, PostprocessError>>()?;

  Ok(items)
}

/// 解码 `[1, 4 + nc + nm, N]` 的预测张量，保留分数高于 `conf` 的候选
pub fn decode_candidates(
  pred: &[f32],
  shape: &[usize],
  nm: usize,
  conf: f32,
) -> Result<Vec<Candidate>, PostprocessError> {
  let &[1, channels, anchors] = shape else {
    return Err(PostprocessError::PredictionShape(shape.to_vec()));
  };
  if channels < 4 + 1 + nm {
    return Err(PostprocessError::ChannelMismatch { channels, nm });
  }
  let expected = channels * anchors;
  if pred.len() != expected {
    return Err(PostprocessError::LengthMismatch {
      expected,
      actual: pred.len(),
    });
  }

  let nc = channels - 4 - nm;
  let at = |c: usize, i: usize| pred[c * anchors + i];

  let mut candidates = Vec::new();
  for i in 0..anchors {
    let (class_id, score) = (0..nc)
      .map(|c| (c, at(4 + c, i)))
      .fold((0usize, f32::MIN), |best, cur| {
        if cur.1 > best.1 { cur } else { best }
      });

    if score <= conf {
      continue;
    }

    let (cx, cy, bw, bh) = (at(0, i), at(1, i), at(2, i), at(3, i));
    candidates.push(Candidate {
      class_id: class_id as u32,
      score,
      bbox: [
        cx - bw / 2.0,
        cy - bh / 2.0,
        cx + bw / 2.0,
        cy + bh / 2.0,
      ],
      coeffs: (0..nm).map(|k| at(4 + nc + k, i)).collect(),
    });
  }

  Ok(candidates)
}

/// 贪心非极大值抑制，按分数降序保留至多 `max_det` 个
pub fn non_max_suppression(
  mut candidates: Vec<Candidate>,
  iou_threshold: f32,
  max_det: usize,
  agnostic: bool,
) -> Vec<Candidate> {
  candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut kept: Vec<Candidate> = Vec::new();
  for candidate in candidates {
    if kept.len() >= max_det {
      break;
    }
    let suppressed = kept.iter().any(|k| {
      (agnostic || k.class_id == candidate.class_id) && iou(&k.bbox, &candidate.bbox) > iou_threshold
    });
    if !suppressed {
      kept.push(candidate);
    }
  }
  kept
}

/// 两个 xyxy 框的交并比
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
  let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
  let union = area_a + area_b - intersection;

  if union > 0.0 { intersection / union } else { 0.0 }
}

/// 模型输入坐标的框还原到原图并裁剪
pub fn scale_box(bbox: &[f32; 4], frame: &LetterboxFrame) -> [f32; 4] {
  let (w, h) = frame.original_size();
  let (x1, y1) = frame.to_original(bbox[0], bbox[1]);
  let (x2, y2) = frame.to_original(bbox[2], bbox[3]);
  [
    x1.clamp(0.0, w as f32),
    y1.clamp(0.0, h as f32),
    x2.clamp(0.0, w as f32),
    y2.clamp(0.0, h as f32),
  ]
}

/// 距离边缘小于 `threshold` 的框边吸附到图像边缘，`size` 为 (宽, 高)
pub fn adjust_to_border(mut bbox: [f32; 4], size: (f32, f32), threshold: f32) -> [f32; 4] {
  let (w, h) = size;
  if bbox[0] < threshold {
    bbox[0] = 0.0;
  }
  if bbox[1] < threshold {
    bbox[1] = 0.0;
  }
  if bbox[2] > w - threshold {
    bbox[2] = w;
  }
  if bbox[3] > h - threshold {
    bbox[3] = h;
  }
  bbox
}

/// 生成原图分辨率的实例掩码，仅覆盖 `bbox` 区域
///
/// 像素中心经 letterbox 映射到原型平面后双线性采样；
/// sigmoid(x) > 0.5 等价于 x > 0。
pub fn assemble_mask(
  coeffs: &[f32],
  protos: &Protos,
  bbox: &[f32; 4],
  frame: &LetterboxFrame,
) -> Result<InstanceMask, PostprocessError> {
  let (orig_w, orig_h) = frame.original_size();
  let left = (bbox[0].floor().max(0.0) as u32).min(orig_w);
  let top = (bbox[1].floor().max(0.0) as u32).min(orig_h);
  let right = (bbox[2].ceil().max(0.0) as u32).min(orig_w);
  let bottom = (bbox[3].ceil().max(0.0) as u32).min(orig_h);
  let width = right.saturating_sub(left);
  let height = bottom.saturating_sub(top);

  let mut data = vec![false; (width * height) as usize];
  if data.is_empty() {
    return Ok(InstanceMask::new(left, top, width, height, data)?);
  }

  let logits = protos.combine(coeffs);
  let (in_h, in_w) = frame.input_shape();
  let sx = protos.width as f32 / in_w as f32;
  let sy = protos.height as f32 / in_h as f32;

  for y in top..bottom {
    let cy = y as f32 + 0.5;
    if cy < bbox[1] || cy > bbox[3] {
      continue;
    }
    for x in left..right {
      let cx = x as f32 + 0.5;
      if cx < bbox[0] || cx > bbox[2] {
        continue;
      }
      let (ix, iy) = frame.to_input(cx, cy);
      let value = bilinear(&logits, protos.width, protos.height, ix * sx - 0.5, iy * sy - 0.5);
      data[((y - top) * width + (x - left)) as usize] = value > 0.0;
    }
  }

  Ok(InstanceMask::new(left, top, width, height, data)?)
}

fn bilinear(plane: &[f32], width: usize, height: usize, x: f32, y: f32) -> f32 {
  let x = x.clamp(0.0, (width - 1) as f32);
  let y = y.clamp(0.0, (height - 1) as f32);
  let x0 = x.floor() as usize;
  let y0 = y.floor() as usize;
  let x1 = (x0 + 1).min(width - 1);
  let y1 = (y0 + 1).min(height - 1);
  let fx = x - x0 as f32;
  let fy = y - y0 as f32;

  let top = plane[y0 * width + x0] * (1.0 - fx) + plane[y0 * width + x1] * fx;
  let bottom = plane[y1 * width + x0] * (1.0 - fx) + plane[y1 * width + x1] * fx;
  top * (1.0 - fy) + bottom * fy
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::RgbImage;

  /// 以通道优先布局构造 `[1, C, N]` 预测张量
  fn prediction(anchors: &[[f32; 7]]) -> (Vec<f32>, Vec<usize>) {
    let n = anchors.len();
    let mut data = vec![0.0; 7 * n];
    for (i, anchor) in anchors.iter().enumerate() {
      for (c, &v) in anchor.iter().enumerate() {
        data[c * n + i] = v;
      }
    }
    (data, vec![1, 7, n])
  }

  /// 2 个原型：第一个全为正，第二个全为负
  fn protos() -> (Vec<f32>, Vec<usize>) {
    let mut data = vec![5.0; 16];
    data.extend(std::iter::repeat_n(-5.0, 16));
    (data, vec![1, 2, 4, 4])
  }

  fn params() -> Overrides {
    Overrides {
      conf: 0.5,
      iou: 0.9,
      max_det: 100,
    }
  }

  #[test]
  fn decode_filters_by_confidence() {
    let (pred, shape) = prediction(&[
      [100.0, 100.0, 40.0, 20.0, 0.9, 1.0, 0.0],
      [50.0, 50.0, 10.0, 10.0, 0.5, 1.0, 0.0],
      [10.0, 10.0, 4.0, 4.0, 0.2, 1.0, 0.0],
    ]);
    let candidates = decode_candidates(&pred, &shape, 2, 0.5).unwrap();

    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].bbox, [80.0, 90.0, 120.0, 110.0]);
    assert_eq!(candidates[0].coeffs, vec![1.0, 0.0]);
    assert_eq!(candidates[0].class_id, 0);
  }

  #[test]
  fn decode_rejects_bad_shapes() {
    assert!(matches!(
      decode_candidates(&[0.0; 6], &[1, 6, 1], 2, 0.5),
      Err(PostprocessError::ChannelMismatch { .. })
    ));
    assert!(matches!(
      decode_candidates(&[0.0; 7], &[7, 1], 2, 0.5),
      Err(PostprocessError::PredictionShape(_))
    ));
    assert!(matches!(
      decode_candidates(&[0.0; 6], &[1, 7, 1], 2, 0.5),
      Err(PostprocessError::LengthMismatch { .. })
    ));
  }

  #[test]
  fn nms_keeps_best_of_overlapping_boxes() {
    let make = |score, bbox| Candidate {
      class_id: 0,
      score,
      bbox,
      coeffs: vec![],
    };
    let candidates = vec![
      make(0.6, [0.0, 0.0, 10.0, 10.0]),
      make(0.9, [0.0, 0.0, 10.0, 10.5]),
      make(0.7, [50.0, 50.0, 60.0, 60.0]),
    ];

    let kept = non_max_suppression(candidates.clone(), 0.9, 100, true);
    assert_eq!(kept.len(), 2);
    assert_eq!(kept[0].score, 0.9);
    assert_eq!(kept[1].score, 0.7);

    let kept = non_max_suppression(candidates, 0.9, 1, true);
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].score, 0.9);
  }

  #[test]
  fn nms_per_class_keeps_overlaps_of_other_classes() {
    let candidates = vec![
      Candidate {
        class_id: 0,
        score: 0.9,
        bbox: [0.0, 0.0, 10.0, 10.0],
        coeffs: vec![],
      },
      Candidate {
        class_id: 1,
        score: 0.8,
        bbox: [0.0, 0.0, 10.0, 10.0],
        coeffs: vec![],
      },
    ];
    assert_eq!(non_max_suppression(candidates.clone(), 0.5, 10, false).len(), 2);
    assert_eq!(non_max_suppression(candidates, 0.5, 10, true).len(), 1);
  }

  #[test]
  fn iou_of_disjoint_and_identical_boxes() {
    let a = [0.0, 0.0, 10.0, 10.0];
    assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    assert_eq!(iou(&a, &[20.0, 20.0, 30.0, 30.0]), 0.0);
    assert!((iou(&a, &[5.0, 0.0, 15.0, 10.0]) - 1.0 / 3.0).abs() < 1e-6);
    assert_eq!(iou(&[0.0; 4], &[0.0; 4]), 0.0);
  }

  #[test]
  fn border_snapping() {
    let bbox = adjust_to_border([10.0, 30.0, 305.0, 200.0], (320.0, 240.0), 20.0);
    assert_eq!(bbox, [0.0, 30.0, 320.0, 200.0]);
  }

  #[test]
  fn mask_is_cropped_to_box() {
    let image = RgbImage::new(320, 320);
    let frame = LetterboxFrame::from_image(&image, (320, 320));
    let (proto, proto_shape) = protos();
    let protos = Protos::new(&proto, &proto_shape).unwrap();

    let mask = assemble_mask(&[1.0, 0.0], &protos, &[100.0, 100.0, 140.0, 120.0], &frame).unwrap();
    assert_eq!(mask.bounds(), (100, 100, 40, 20));
    assert_eq!(mask.area(), 40 * 20);
    assert!(mask.contains(100, 100));
    assert!(mask.contains(139, 119));
    assert!(!mask.contains(140, 100));
    assert!(!mask.contains(0, 0));

    let empty = assemble_mask(&[0.0, 1.0], &protos, &[100.0, 100.0, 140.0, 120.0], &frame).unwrap();
    assert_eq!(empty.area(), 0);
  }

  #[test]
  fn full_pipeline_on_synthetic_output() {
    let image = RgbImage::new(640, 480);
    let frame = LetterboxFrame::from_image(&image, (320, 320));
    let (pred, pred_shape) = prediction(&[
      // 几乎覆盖整幅有效区域，应当被替换为整幅图像
      [160.0, 160.0, 318.0, 238.0, 0.95, 1.0, 0.0],
      [100.0, 100.0, 20.0, 20.0, 0.8, 1.0, 0.0],
      [100.0, 100.0, 20.0, 20.5, 0.7, 1.0, 0.0],
      [200.0, 200.0, 10.0, 10.0, 0.3, 1.0, 0.0],
    ]);
    let (proto, proto_shape) = protos();
    let raw = RawOutput {
      pred,
      pred_shape,
      proto,
      proto_shape,
    };

    let items = postprocess(&raw, &frame, &params()).unwrap();
    assert_eq!(items.len(), 2);

    assert_eq!(items[0].bbox, [0.0, 0.0, 640.0, 480.0]);
    assert_eq!(items[0].score, 0.95);

    // 输入空间 [90, 90, 110, 110]，填充 40 像素，比例 0.5
    assert_eq!(items[1].bbox, [180.0, 100.0, 220.0, 140.0]);
    assert_eq!(items[1].mask.area(), 40 * 40);
  }

  #[test]
  fn proto_shape_is_validated() {
    assert!(matches!(
      Protos::new(&[0.0; 8], &[2, 4]),
      Err(PostprocessError::ProtoShape(_))
    ));
    assert!(matches!(
      Protos::new(&[0.0; 8], &[1, 1, 4, 4]),
      Err(PostprocessError::LengthMismatch { .. })
    ));
    assert!(matches!(
      Protos::new(&[], &[1, 2, 0, 0]),
      Err(PostprocessError::ProtoShape(_))
    ));
    assert!(matches!(
      Protos::new(&[], &[1, 0, 4, 4]),
      Err(PostprocessError::ProtoShape(_))
    ));
  }

  #[test]
  fn empty_proto_plane_is_an_error() {
    let image = RgbImage::new(320, 320);
    let frame = LetterboxFrame::from_image(&image, (320, 320));
    let raw = RawOutput {
      pred: vec![100.0, 100.0, 40.0, 40.0, 0.9],
      pred_shape: vec![1, 5, 1],
      proto: vec![],
      proto_shape: vec![1, 0, 0, 0],
    };

    assert!(matches!(
      postprocess(&raw, &frame, &params()),
      Err(PostprocessError::ProtoShape(_))
    ));
  }
}
