// 该文件是 Tangguan （汤罐） 项目的一部分。
// tests/common/mod.rs - 测试公共工具
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

#![allow(dead_code)]

use std::io::Cursor;

use image::{ImageFormat, Rgb, RgbImage};
use thiserror::Error;

pub use tangguan::{
  input::UploadedImage,
  model::{Detection, DetectionSet, Detector},
  output::draw::Draw,
};

#[derive(Error, Debug)]
#[error("stub detector failure")]
pub struct StubFailure;

/// 返回固定结果的检测器
pub struct StubDetector {
  detections: Option<DetectionSet>,
  draw: Draw,
}

impl StubDetector {
  pub fn returning(detections: Vec<Detection>) -> Self {
    Self {
      detections: Some(DetectionSet::from(detections)),
      draw: Draw::default(),
    }
  }

  pub fn failing() -> Self {
    Self {
      detections: None,
      draw: Draw::default(),
    }
  }
}

impl Detector for StubDetector {
  type Error = StubFailure;

  fn detect(&self, _image: &UploadedImage) -> Result<DetectionSet, Self::Error> {
    self.detections.clone().ok_or(StubFailure)
  }

  fn plot(&self, image: &UploadedImage, detections: &DetectionSet) -> RgbImage {
    self.draw.plot(image.as_rgb(), detections)
  }
}

/// 两个汤罐：置信度 0.91 与 0.42
pub fn two_cans() -> Vec<Detection> {
  vec![
    Detection {
      class_id: 0,
      confidence: 0.91,
      xywh: [100.0, 120.0, 40.0, 60.0],
    },
    Detection {
      class_id: 0,
      confidence: 0.42,
      xywh: [300.0, 200.0, 35.0, 50.0],
    },
  ]
}

pub fn sample_image(width: u32, height: u32) -> RgbImage {
  RgbImage::from_fn(width, height, |x, y| {
    Rgb([(x % 256) as u8, (y % 256) as u8, 128])
  })
}

pub fn encode(image: &RgbImage, format: ImageFormat) -> Vec<u8> {
  let mut buffer = Cursor::new(Vec::new());
  image.write_to(&mut buffer, format).unwrap();
  buffer.into_inner()
}

pub fn sample_png(width: u32, height: u32) -> Vec<u8> {
  encode(&sample_image(width, height), ImageFormat::Png)
}

pub fn sample_jpeg(width: u32, height: u32) -> Vec<u8> {
  encode(&sample_image(width, height), ImageFormat::Jpeg)
}
