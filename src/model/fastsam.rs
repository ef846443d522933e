// 该文件是 FastSAM Oneshot 项目的一部分。
// src/model/fastsam.rs - FastSAM 模型定义
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
  fmt::Display,
  path::{Path, PathBuf},
  time::Instant,
};

use ort::{
  session::{Session, builder::GraphOptimizationLevel},
  tensor::TensorElementType,
  value::TensorRef,
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[cfg(feature = "read_image_file")]
use crate::{
  input::{ImageFileInput, ImageFileInputError},
  model::Predict,
};
use crate::{
  frame::{LetterboxFrame, SourceImage},
  model::{
    Model, SegmentResult, Speed,
    config::{Overrides, PredictOptions, Precision, check_imgsz},
    metadata::{MetadataError, ModelMetadata},
    postprocess::{PostprocessError, RawOutput, postprocess},
  },
  utils::ThreadLimits,
};

const FASTSAM_NUM_INPUTS: usize = 1;
const FASTSAM_NUM_OUTPUTS: usize = 2;
const FASTSAM_TASK: &str = "segment";
const TORCH_EXTENSION: &str = "pt";
const ONNX_EXTENSION: &str = "onnx";

#[derive(Error, Debug)]
pub enum FastSamError {
  #[error("模型文件不存在: {0}")]
  ModelNotFound(String),
  #[error("模型加载错误: {0}")]
  ModelLoadError(String),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("不支持的精度: {0:?}，CPU 推理仅支持 F32")]
  UnsupportedPrecision(Precision),
  #[error("推理错误: {0}")]
  InferenceError(String),
  #[error("后处理错误: {0}")]
  PostprocessError(#[from] PostprocessError),
  #[error("模型元数据错误: {0}")]
  MetadataError(#[from] MetadataError),
  #[cfg(feature = "read_image_file")]
  #[error("输入错误: {0}")]
  InputError(#[from] ImageFileInputError),
}

fn load_error<E: Display>(context: &'static str) -> impl FnOnce(E) -> FastSamError {
  move |e| FastSamError::ModelLoadError(format!("{}: {}", context, e))
}

fn inference_error<E: Display>(context: &'static str) -> impl FnOnce(E) -> FastSamError {
  move |e| FastSamError::InferenceError(format!("{}: {}", context, e))
}

/// 模型标识到磁盘文件的映射：`.pt` 标识指向同名的 ONNX 导出文件
fn resolve_checkpoint(model: &str) -> PathBuf {
  let path = Path::new(model);
  match path.extension().and_then(|ext| ext.to_str()) {
    Some(TORCH_EXTENSION) => path.with_extension(ONNX_EXTENSION),
    _ => path.to_path_buf(),
  }
}

fn check_task(metadata: &ModelMetadata) -> Result<(), FastSamError> {
  if metadata.task != FASTSAM_TASK {
    error!("模型任务类型为 {}，需要 {}", metadata.task, FASTSAM_TASK);
    return Err(FastSamError::ModelInvalid(format!(
      "模型任务类型为 {}，需要 {}",
      metadata.task, FASTSAM_TASK
    )));
  }
  Ok(())
}

fn check_io_count(num_inputs: usize, num_outputs: usize) -> Result<(), FastSamError> {
  debug!("模型输入数量: {}", num_inputs);
  debug!("模型输出数量: {}", num_outputs);

  if num_inputs != FASTSAM_NUM_INPUTS || num_outputs != FASTSAM_NUM_OUTPUTS {
    error!(
      "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
      FASTSAM_NUM_INPUTS, FASTSAM_NUM_OUTPUTS, num_inputs, num_outputs
    );
    return Err(FastSamError::ModelInvalid(format!(
      "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
      FASTSAM_NUM_INPUTS, FASTSAM_NUM_OUTPUTS, num_inputs, num_outputs
    )));
  }
  Ok(())
}

fn input_precision(element: Option<TensorElementType>) -> Result<Precision, FastSamError> {
  match element {
    Some(TensorElementType::Float32) => Ok(Precision::F32),
    Some(TensorElementType::Float16) => Ok(Precision::F16),
    other => Err(FastSamError::ModelInvalid(format!(
      "不支持的输入张量类型: {:?}",
      other
    ))),
  }
}

/// CPU 上只接受 F32，且模型必须以 F32 导出
fn check_precision(requested: Precision, exported: Precision) -> Result<(), FastSamError> {
  if requested != Precision::F32 {
    return Err(FastSamError::UnsupportedPrecision(requested));
  }
  if exported != Precision::F32 {
    return Err(FastSamError::ModelInvalid(
      "模型以 F16 导出，请使用 half=False 重新导出".to_string(),
    ));
  }
  Ok(())
}

/// 模型输入尺寸 (高, 宽)，对齐到步长；未指定 imgsz 时使用元数据中的尺寸
fn resolve_input_size(metadata: &ModelMetadata, imgsz: Option<usize>) -> (usize, usize) {
  let stride = metadata.stride;
  match imgsz {
    Some(size) => {
      let size = check_imgsz(size, stride);
      (size, size)
    }
    None => {
      let (h, w) = metadata.imgsz;
      (check_imgsz(h, stride), check_imgsz(w, stride))
    }
  }
}

/// 按维度区分输出：3 维为预测，4 维为原型掩码
fn collect_outputs<I>(outputs: I) -> Result<RawOutput, FastSamError>
where
  I: IntoIterator<Item = (String, Vec<usize>, Vec<f32>)>,
{
  let mut pred = None;
  let mut proto = None;
  for (name, shape, data) in outputs {
    debug!("输出 {}: {:?}", name, shape);
    match shape.len() {
      3 => pred = Some((data, shape)),
      4 => proto = Some((data, shape)),
      _ => {
        return Err(FastSamError::InferenceError(format!(
          "输出 {} 的形状无法识别: {:?}",
          name, shape
        )));
      }
    }
  }

  let ((pred, pred_shape), (proto, proto_shape)) = pred.zip(proto).ok_or_else(|| {
    FastSamError::InferenceError("模型输出缺少预测或原型掩码".to_string())
  })?;

  Ok(RawOutput {
    pred,
    pred_shape,
    proto,
    proto_shape,
  })
}

pub struct FastSamBuilder {
  model_path: String,
  thread_limits: ThreadLimits,
}

impl FastSamBuilder {
  /// `model_path` 为模型标识，`.pt` 标识会解析为同名的 `.onnx` 文件
  pub fn new(model_path: impl Into<String>) -> Self {
    Self {
      model_path: model_path.into(),
      thread_limits: ThreadLimits::default(),
    }
  }

  pub fn thread_limits(mut self, thread_limits: ThreadLimits) -> Self {
    self.thread_limits = thread_limits;
    self
  }

  pub fn build(self) -> Result<FastSam, FastSamError> {
    let checkpoint = resolve_checkpoint(&self.model_path);
    let path = checkpoint.as_path();
    if !path.is_file() {
      error!("模型文件不存在: {}", path.display());
      return Err(FastSamError::ModelNotFound(path.display().to_string()));
    }

    info!("加载模型 {}: {}", self.model_path, path.display());
    let size = std::fs::metadata(path)
      .map_err(load_error("无法读取模型文件"))?
      .len();
    debug!("模型文件大小: {:.2} MB", size as f64 / (1024.0 * 1024.0));

    let threads = self.thread_limits.threads();
    info!("创建 ONNX Runtime 推理会话，线程数 {}", threads);
    let session = Session::builder()
      .map_err(load_error("无法创建会话构建器"))?
      .with_optimization_level(GraphOptimizationLevel::Level3)
      .map_err(load_error("无法设置图优化级别"))?
      .with_intra_threads(threads)
      .map_err(load_error("无法设置 intra 线程数"))?
      .with_inter_threads(threads)
      .map_err(load_error("无法设置 inter 线程数"))?
      .with_parallel_execution(false)
      .map_err(load_error("无法设置顺序执行"))?
      .commit_from_file(path)
      .map_err(load_error("无法加载模型"))?;

    let metadata = {
      let custom = session
        .metadata()
        .map_err(load_error("无法读取模型元数据"))?;
      ModelMetadata::from_lookup(|key| custom.custom(key).ok().flatten())?
    };

    check_task(&metadata)?;
    check_io_count(session.inputs.len(), session.outputs.len())?;

    let input = &session.inputs[0];
    let input_name = input.name.clone();
    let input_precision = input_precision(input.input_type.tensor_type())?;
    let output_names = session.outputs.iter().map(|o| o.name.clone()).collect();

    info!("模型加载完成");
    Ok(FastSam {
      session,
      metadata,
      input_name,
      output_names,
      input_precision,
      precision: input_precision,
      overrides: Overrides::default(),
    })
  }
}

/// FastSAM 模型句柄
///
/// 精度与默认推理参数需要在首次 `predict` 之前设置。
pub struct FastSam {
  session: Session,
  metadata: ModelMetadata,
  input_name: String,
  output_names: Vec<String>,
  input_precision: Precision,
  precision: Precision,
  overrides: Overrides,
}

impl FastSam {
  pub fn metadata(&self) -> &ModelMetadata {
    &self.metadata
  }

  pub fn precision(&self) -> Precision {
    self.precision
  }

  pub fn overrides(&self) -> &Overrides {
    &self.overrides
  }

  pub fn overrides_mut(&mut self) -> &mut Overrides {
    &mut self.overrides
  }

  /// 强制模型使用指定精度
  pub fn force_precision(&mut self, precision: Precision) -> Result<(), FastSamError> {
    check_precision(precision, self.input_precision)?;
    self.precision = precision;
    debug!("模型精度: {:?}", self.precision);
    Ok(())
  }

  pub fn input_size(&self, options: &PredictOptions) -> (usize, usize) {
    resolve_input_size(&self.metadata, options.imgsz)
  }

  pub fn predict_image(
    &mut self,
    source: &SourceImage,
    options: &PredictOptions,
  ) -> Result<SegmentResult, FastSamError> {
    if options.half {
      warn!("CPU 不支持半精度推理，忽略 half=true");
    }
    debug!("推理设备: {}", options.device);

    let params = options.resolve(&self.overrides);
    let imgsz = self.input_size(options);
    debug!("推理参数: {:?}, 输入尺寸: {:?}", params, imgsz);

    let now = Instant::now();
    let frame = LetterboxFrame::from_image(&source.image, imgsz);
    let preprocess = now.elapsed().as_secs_f64() * 1000.0;

    let now = Instant::now();
    let raw = self.infer(&frame)?;
    let inference = now.elapsed().as_secs_f64() * 1000.0;

    let now = Instant::now();
    let items = postprocess(&raw, &frame, &params)?;
    let postprocess = now.elapsed().as_secs_f64() * 1000.0;
    debug!("检测到 {} 个实例", items.len());

    Ok(SegmentResult {
      path: source.path.clone(),
      image: source.image.clone(),
      items: items.into_boxed_slice(),
      names: self.metadata.names.clone(),
      input_shape: imgsz,
      speed: Speed {
        preprocess,
        inference,
        postprocess,
      },
    })
  }
}

impl Model for FastSam {
  type Input = LetterboxFrame;
  type Output = RawOutput;
  type Error = FastSamError;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    debug!("设置模型输入");
    let tensor = input.tensor().as_standard_layout();
    let input_tensor =
      TensorRef::from_array_view(&tensor).map_err(inference_error("无法创建输入张量"))?;

    debug!("执行模型推理");
    let outputs = self
      .session
      .run(ort::inputs![&self.input_name => input_tensor])
      .map_err(inference_error("推理失败"))?;

    debug!("获取模型输出");
    let mut extracted = Vec::with_capacity(self.output_names.len());
    for name in &self.output_names {
      let output = outputs
        .get(name.as_str())
        .ok_or_else(|| FastSamError::InferenceError(format!("缺少输出 {}", name)))?;
      let (shape, data) = output
        .try_extract_tensor::<f32>()
        .map_err(inference_error("无法读取输出张量"))?;
      let shape: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
      extracted.push((name.clone(), shape, data.to_vec()));
    }

    collect_outputs(extracted)
  }
}

#[cfg(feature = "read_image_file")]
impl Predict for FastSam {
  type Output = SegmentResult;
  type Error = FastSamError;

  fn predict(
    &mut self,
    path: &Path,
    options: &PredictOptions,
  ) -> Result<Vec<SegmentResult>, FastSamError> {
    if options.stream {
      debug!("单张图像输入，stream=true 时结果同样一次性返回");
    }

    let input = ImageFileInput::open(path)?;
    let mut results = Vec::with_capacity(1);
    for source in input {
      let result = self.predict_image(&source, options)?;
      if options.verbose {
        println!("image {}/1 {}", results.len() + 1, result.summary());
        println!(
          "Speed: {:.1}ms preprocess, {:.1}ms inference, {:.1}ms postprocess",
          result.speed.preprocess, result.speed.inference, result.speed.postprocess
        );
      }
      results.push(result);
    }

    Ok(results)
  }
}
