// 该文件是 FastSAM Oneshot 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use std::path::Path;

use image::ImageReader;
use thiserror::Error;
use tracing::{debug, error};

use crate::frame::SourceImage;

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("输入文件不存在: {0}")]
  NotFound(String),
  #[error("I/O error: {0}")]
  IoError(std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(image::ImageError),
  #[error("图像尺寸为空: {path} ({width}x{height})")]
  EmptyImage {
    path: String,
    width: u32,
    height: u32,
  },
}

impl From<std::io::Error> for ImageFileInputError {
  fn from(err: std::io::Error) -> Self {
    ImageFileInputError::IoError(err)
  }
}

impl From<image::ImageError> for ImageFileInputError {
  fn from(err: image::ImageError) -> Self {
    ImageFileInputError::ImageLoadError(err)
  }
}

/// 单张图像文件输入，迭代一次后耗尽
pub struct ImageFileInput {
  image: Option<SourceImage>,
}

impl ImageFileInput {
  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ImageFileInputError> {
    let path = path.as_ref();
    if !path.exists() {
      error!("输入文件不存在: {}", path.display());
      return Err(ImageFileInputError::NotFound(path.display().to_string()));
    }

    // 统一转换为 3 通道 RGB，丢弃 alpha 通道
    let image = ImageReader::open(path)?
      .with_guessed_format()?
      .decode()?
      .to_rgb8();
    debug!(
      "读取图像 {}: {}x{}",
      path.display(),
      image.width(),
      image.height()
    );

    if image.width() == 0 || image.height() == 0 {
      error!("图像尺寸为空: {}", path.display());
      return Err(ImageFileInputError::EmptyImage {
        path: path.display().to_string(),
        width: image.width(),
        height: image.height(),
      });
    }

    Ok(ImageFileInput {
      image: Some(SourceImage::new(path.display().to_string(), image)),
    })
  }
}

impl Iterator for ImageFileInput {
  type Item = SourceImage;

  fn next(&mut self) -> Option<Self::Item> {
    self.image.take()
  }
}
