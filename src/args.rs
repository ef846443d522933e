// 该文件是 FastSAM Oneshot 项目的一部分。
// src/args.rs - 项目参数配置
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

use clap::Parser;
use fastsam_oneshot::model::Device;

/// FastSAM 单次推理参数配置，默认值即固定流程的取值
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// FastSAM 模型标识，`.pt` 标识加载同名的 `.onnx` 导出文件
  #[arg(long, default_value = "FastSAM-s.pt", value_name = "MODEL")]
  pub model: String,

  /// 输入图像路径
  #[arg(long, default_value = "image.jpg", value_name = "SOURCE")]
  pub input: String,

  /// 输出图像路径，编码格式由扩展名决定
  #[arg(long, default_value = "output.jpg", value_name = "OUTPUT")]
  pub output: String,

  /// 模型输入边长
  #[arg(long, default_value_t = 320, value_name = "PIXELS")]
  pub imgsz: usize,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = 0.5, value_name = "THRESHOLD")]
  pub conf: f32,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = 0.9, value_name = "THRESHOLD")]
  pub iou: f32,

  /// 最大实例数
  #[arg(long, default_value_t = 100, value_name = "COUNT")]
  pub max_det: usize,

  /// 推理设备，仅支持 cpu
  #[arg(long, default_value = "cpu", value_name = "DEVICE")]
  pub device: Device,

  /// 数值后端线程数
  #[arg(long, default_value_t = 1, value_name = "COUNT")]
  pub threads: usize,

  /// 打印每张图像的推理摘要
  #[arg(long)]
  pub verbose: bool,
}
