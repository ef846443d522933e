// 该文件是 FastSAM Oneshot 项目的一部分。
// src/output/save_image_file.rs - 保存图像文件
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

use thiserror::Error;
use tracing::warn;

use crate::{
  model::SegmentResult,
  output::{Render, draw::Draw},
};

pub struct SaveImageFileOutput {
  path: String,
  draw: Draw,
}

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(image::ImageError),
  #[error("字体错误: {0}")]
  FontError(ab_glyph::InvalidFont),
}

impl SaveImageFileOutput {
  pub fn new(path: impl Into<String>) -> Result<Self, SaveImageFileError> {
    Ok(SaveImageFileOutput {
      path: path.into(),
      draw: Draw::new().map_err(SaveImageFileError::FontError)?,
    })
  }

  fn save_image(&self, image: image::RgbImage) -> Result<(), SaveImageFileError> {
    if let Some(parent) = Path::new(&self.path).parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent).map_err(SaveImageFileError::IoError)?;
    }

    image
      .save(&self.path)
      .map_err(SaveImageFileError::ImageError)?;

    warn!("保存图像到文件: {}", self.path);

    Ok(())
  }
}

impl Render<SegmentResult> for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn render_result(&self, result: &SegmentResult) -> Result<(), Self::Error> {
    let image = self.draw.draw_result(result);
    self.save_image(image)
  }

  fn destination(&self) -> &str {
    &self.path
  }
}

impl SegmentResult {
  /// 绘制叠加结果并保存，编码格式由扩展名决定
  pub fn save(&self, path: impl Into<String>) -> Result<(), SaveImageFileError> {
    SaveImageFileOutput::new(path)?.render_result(self)
  }

  /// 在内存中绘制叠加结果
  pub fn plot(&self) -> Result<image::RgbImage, SaveImageFileError> {
    let draw = Draw::new().map_err(SaveImageFileError::FontError)?;
    Ok(draw.draw_result(self))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::Speed;
  use image::{Rgb, RgbImage};
  use std::collections::BTreeMap;

  fn blank_result() -> SegmentResult {
    SegmentResult {
      path: "image.jpg".to_string(),
      image: RgbImage::from_pixel(64, 48, Rgb([200, 100, 50])),
      items: Box::new([]),
      names: BTreeMap::new(),
      input_shape: (320, 320),
      speed: Speed::default(),
    }
  }

  #[test]
  fn saves_decodable_jpeg() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("output.jpg");

    blank_result().save(path.display().to_string()).unwrap();

    let decoded = image::open(&path).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (64, 48));
    assert_eq!(
      image::ImageFormat::from_path(&path).unwrap(),
      image::ImageFormat::Jpeg
    );
  }

  #[test]
  fn creates_missing_parent_directories() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("runs/segment/output.png");

    let output = SaveImageFileOutput::new(path.display().to_string()).unwrap();
    output.render_result(&blank_result()).unwrap();

    assert!(path.is_file());
    assert_eq!(output.destination(), path.display().to_string());
  }

  #[test]
  fn unwritable_path_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"file, not a directory").unwrap();

    let result = blank_result().save(blocker.join("output.jpg").display().to_string());
    assert!(matches!(result, Err(SaveImageFileError::IoError(_))));
  }

  #[test]
  fn unknown_extension_is_an_image_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = blank_result().save(dir.path().join("output.unknown").display().to_string());
    assert!(matches!(result, Err(SaveImageFileError::ImageError(_))));
  }

  #[test]
  fn plot_matches_input_without_instances() {
    let result = blank_result();
    assert_eq!(result.plot().unwrap(), result.image);
  }
}
