// 该文件是 FastSAM Oneshot 项目的一部分。
// src/model/metadata.rs - ONNX 模型元数据解析
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

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::debug;

const DEFAULT_TASK: &str = "segment";
const DEFAULT_STRIDE: usize = 32;
const DEFAULT_IMGSZ: (usize, usize) = (640, 640);
const DEFAULT_LABEL: &str = "object";

#[derive(Error, Debug)]
pub enum MetadataError {
  #[error("无法解析 imgsz: {0}")]
  InvalidImgsz(String),
  #[error("无法解析 stride: {0}")]
  InvalidStride(String),
  #[error("无法解析类别名称: {0}")]
  InvalidNames(String),
}

/// 导出时写入 ONNX 自定义元数据的模型信息
#[derive(Debug, Clone, PartialEq)]
pub struct ModelMetadata {
  pub task: String,
  pub stride: usize,
  /// (高, 宽)
  pub imgsz: (usize, usize),
  pub names: BTreeMap<u32, String>,
}

impl Default for ModelMetadata {
  fn default() -> Self {
    Self {
      task: DEFAULT_TASK.to_string(),
      stride: DEFAULT_STRIDE,
      imgsz: DEFAULT_IMGSZ,
      names: BTreeMap::from([(0, DEFAULT_LABEL.to_string())]),
    }
  }
}

impl ModelMetadata {
  /// `lookup` 按键名读取自定义元数据，缺失的键使用默认值
  pub fn from_lookup<F>(lookup: F) -> Result<Self, MetadataError>
  where
    F: Fn(&str) -> Option<String>,
  {
    let mut metadata = Self::default();

    if let Some(task) = lookup("task") {
      metadata.task = task.trim().to_string();
    }
    if let Some(stride) = lookup("stride") {
      metadata.stride = stride
        .trim()
        .parse()
        .map_err(|_| MetadataError::InvalidStride(stride.clone()))?;
    }
    if let Some(imgsz) = lookup("imgsz") {
      metadata.imgsz = parse_imgsz(&imgsz)?;
    }
    if let Some(names) = lookup("names") {
      let names = parse_names(&names)?;
      if !names.is_empty() {
        metadata.names = names;
      }
    }

    debug!("模型元数据: {:?}", metadata);
    Ok(metadata)
  }

  pub fn label(&self, class_id: u32) -> &str {
    self
      .names
      .get(&class_id)
      .map(String::as_str)
      .unwrap_or(DEFAULT_LABEL)
  }
}

/// 解析 `[640, 640]` 或 `640`
pub fn parse_imgsz(value: &str) -> Result<(usize, usize), MetadataError> {
  let invalid = || MetadataError::InvalidImgsz(value.to_string());
  match serde_json::from_str::<serde_json::Value>(value.trim()).map_err(|_| invalid())? {
    serde_json::Value::Number(n) => {
      let size = n.as_u64().ok_or_else(invalid)? as usize;
      Ok((size, size))
    }
    serde_json::Value::Array(items) => {
      let sizes = items
        .iter()
        .map(|v| v.as_u64().map(|n| n as usize))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(invalid)?;
      match sizes.as_slice() {
        [size] => Ok((*size, *size)),
        [h, w] => Ok((*h, *w)),
        _ => Err(invalid()),
      }
    }
    _ => Err(invalid()),
  }
}

/// 解析 Python 字典形式的类别表，例如 `{0: 'object', 1: "person"}`
pub fn parse_names(value: &str) -> Result<BTreeMap<u32, String>, MetadataError> {
  let invalid = || MetadataError::InvalidNames(value.to_string());
  let body = value
    .trim()
    .strip_prefix('{')
    .and_then(|s| s.strip_suffix('}'))
    .ok_or_else(invalid)?;

  let mut names = BTreeMap::new();
  let mut rest = body.trim();
  while !rest.is_empty() {
    let (key, after_key) = rest.split_once(':').ok_or_else(invalid)?;
    let id: u32 = key.trim().parse().map_err(|_| invalid())?;

    let after_key = after_key.trim_start();
    let quote = after_key.chars().next().ok_or_else(invalid)?;
    if quote != '\'' && quote != '"' {
      return Err(invalid());
    }
    let quoted = &after_key[quote.len_utf8()..];
    let end = quoted.find(quote).ok_or_else(invalid)?;
    names.insert(id, quoted[..end].to_string());

    rest = quoted[end + quote.len_utf8()..].trim_start();
    rest = rest.strip_prefix(',').unwrap_or(rest).trim_start();
  }

  Ok(names)
}
