// 该文件是 Tangguan （汤罐） 项目的一部分。
// src/input.rs - 上传图像解码
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

use image::{ImageFormat, RgbImage};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum DecodeError {
  #[error("上传内容为空")]
  Empty,
  #[error("不支持的图像格式: {0}")]
  UnsupportedFormat(String),
  #[error("无法识别的图像数据: {0}")]
  UnknownFormat(image::ImageError),
  #[error("图像解码错误: {0}")]
  ImageDecodeError(image::ImageError),
  #[error("图像尺寸无效: {0}x{1}")]
  InvalidDimensions(u32, u32),
}

/// 上传后解码得到的 RGB 图像，通道顺序固定为 R-G-B。
///
/// 该值只属于一次上传处理，处理结束即释放。
#[derive(Debug, Clone)]
pub struct UploadedImage {
  image: RgbImage,
}

impl UploadedImage {
  /// 从原始字节解码图像，只接受 JPEG 与 PNG。
  ///
  /// 带透明通道或其他通道布局的图像统一转换为三通道 RGB，不做额外处理。
  pub fn decode(raw: &[u8]) -> Result<Self, DecodeError> {
    if raw.is_empty() {
      return Err(DecodeError::Empty);
    }

    let format = image::guess_format(raw).map_err(DecodeError::UnknownFormat)?;
    if !matches!(format, ImageFormat::Jpeg | ImageFormat::Png) {
      warn!("拒绝不支持的上传格式: {:?}", format);
      return Err(DecodeError::UnsupportedFormat(format!("{:?}", format)));
    }

    let decoded =
      image::load_from_memory_with_format(raw, format).map_err(DecodeError::ImageDecodeError)?;
    debug!(
      "解码上传图像: {:?} {}x{} {:?}",
      format,
      decoded.width(),
      decoded.height(),
      decoded.color()
    );

    let image = decoded.to_rgb8();
    if image.width() == 0 || image.height() == 0 {
      return Err(DecodeError::InvalidDimensions(image.width(), image.height()));
    }

    Ok(Self { image })
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub fn as_rgb(&self) -> &RgbImage {
    &self.image
  }

  pub fn into_rgb(self) -> RgbImage {
    self.image
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{DynamicImage, ImageBuffer, Rgba, RgbaImage};
  use std::io::Cursor;

  fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    image.write_to(&mut cursor, format).unwrap();
    cursor.into_inner()
  }

  #[test]
  fn decodes_png_to_rgb() {
    let rgba: RgbaImage = ImageBuffer::from_fn(4, 3, |x, _| Rgba([x as u8 * 10, 20, 30, 128]));
    let bytes = encode(DynamicImage::ImageRgba8(rgba), ImageFormat::Png);

    let uploaded = UploadedImage::decode(&bytes).unwrap();
    assert_eq!((uploaded.width(), uploaded.height()), (4, 3));
    assert_eq!(uploaded.as_rgb().get_pixel(2, 1).0, [20, 20, 30]);
  }

  #[test]
  fn decodes_jpeg() {
    let rgb = RgbImage::from_pixel(8, 8, image::Rgb([200, 10, 10]));
    let bytes = encode(DynamicImage::ImageRgb8(rgb), ImageFormat::Jpeg);

    let uploaded = UploadedImage::decode(&bytes).unwrap();
    assert_eq!((uploaded.width(), uploaded.height()), (8, 8));
  }

  #[test]
  fn rejects_garbage() {
    let err = UploadedImage::decode(b"definitely not an image").unwrap_err();
    assert!(matches!(err, DecodeError::UnknownFormat(_)));
  }

  #[test]
  fn rejects_formats_other_than_jpeg_and_png() {
    let mut gif = b"GIF89a".to_vec();
    gif.extend_from_slice(&[1, 0, 1, 0, 0, 0, 0, b';']);

    let err = UploadedImage::decode(&gif).unwrap_err();
    assert!(matches!(err, DecodeError::UnsupportedFormat(ref name) if name == "Gif"));
  }

  #[test]
  fn rejects_empty() {
    assert!(matches!(UploadedImage::decode(&[]), Err(DecodeError::Empty)));
  }

  #[test]
  fn rejects_truncated_png() {
    let rgb: RgbImage = ImageBuffer::from_fn(64, 64, |x, y| {
      image::Rgb([(x * 4) as u8, (y * 4) as u8, (x ^ y) as u8])
    });
    let bytes = encode(DynamicImage::ImageRgb8(rgb), ImageFormat::Png);

    let err = UploadedImage::decode(&bytes[..bytes.len() / 2]).unwrap_err();
    assert!(matches!(err, DecodeError::ImageDecodeError(_)));
  }
}
