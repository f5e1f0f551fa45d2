// 该文件是 Tangguan （汤罐） 项目的一部分。
// src/output.rs - 输出定义
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

use std::io::Cursor;

use base64::{Engine, prelude::BASE64_STANDARD};
use image::{ImageFormat, RgbImage};
use thiserror::Error;

pub mod draw;
pub mod html;

pub use self::html::{PageBody, PageConfig, render_page};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("图像编码错误: {0}")]
  ImageEncodeError(#[from] image::ImageError),
  #[error("页面生成错误: {0}")]
  FormatError(#[from] std::fmt::Error),
}

/// 把图像编码为 PNG 并包装为 `data:` URI，便于直接嵌入页面
pub fn to_data_uri(image: &RgbImage) -> Result<String, OutputError> {
  let mut buffer = Cursor::new(Vec::new());
  image.write_to(&mut buffer, ImageFormat::Png)?;
  Ok(format!(
    "data:image/png;base64,{}",
    BASE64_STANDARD.encode(buffer.get_ref())
  ))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn data_uri_carries_png_payload() {
    let image = RgbImage::from_pixel(2, 2, image::Rgb([255, 0, 0]));
    let uri = to_data_uri(&image).unwrap();
    let payload = uri.strip_prefix("data:image/png;base64,").unwrap();

    let bytes = BASE64_STANDARD.decode(payload).unwrap();
    let decoded = image::load_from_memory(&bytes).unwrap().to_rgb8();
    assert_eq!(decoded, image);
  }
}
