// 该文件是 Tangguan （汤罐） 项目的一部分。
// src/model/yolov8.rs - YOLOv8 ONNX 模型
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

use std::sync::Mutex;

use ab_glyph::FontArc;
use image::{Rgb, RgbImage, imageops::FilterType};
use ndarray::{ArrayView2, ArrayViewD, Axis, IxDyn, s};
use ort::{session::Session, value::Tensor};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::UploadedImage,
  model::{DetectOptions, Detection, DetectionSet, Detector, InvalidOption, painter},
  output::draw::Draw,
};

const YOLOV8_INTRA_THREADS: usize = 4;
const YOLOV8_BOX_CHANNELS: usize = 4;
const LETTERBOX_PAD: u8 = 114;

const YOLOV8_DEFAULTS: DetectOptions = DetectOptions {
  conf_threshold: 0.25,
  iou_threshold: 0.7,
  input_size: 640,
  max_det: 300,
  names: Vec::new(),
};

#[derive(Error, Debug)]
pub enum Yolov8Error {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("{0}")]
  InvalidOption(#[from] InvalidOption),
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(String),
  #[error("模型输出形状无效: {0:?}")]
  InvalidOutputShape(Vec<usize>),
  #[error("张量形状错误: {0}")]
  ShapeError(#[from] ndarray::ShapeError),
  #[error("推理会话不可用")]
  SessionPoisoned,
}

impl Yolov8Error {
  fn ort(err: impl std::fmt::Display) -> Self {
    Yolov8Error::OrtError(err.to_string())
  }
}

pub struct Yolov8Builder {
  model_path: String,
  options: DetectOptions,
  font: Option<FontArc>,
}

impl FromUrlWithScheme for Yolov8Builder {
  const SCHEME: &'static str = "yolov8";
}

impl FromUrl for Yolov8Builder {
  type Error = Yolov8Error;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(Yolov8Error::SchemeMismatch(format!(
        "期望模型方案 '{}', 实际模型方案 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }

    Ok(Yolov8Builder {
      model_path: url.path().to_string(),
      options: DetectOptions::from_query(url, YOLOV8_DEFAULTS)?,
      font: None,
    })
  }
}

impl Yolov8Builder {
  pub fn font(mut self, font: Option<FontArc>) -> Self {
    self.font = font;
    self
  }

  pub fn build(self) -> Result<Yolov8, Yolov8Error> {
    info!("加载模型文件: {}", self.model_path);
    let session = Session::builder()
      .map_err(Yolov8Error::ort)?
      .with_intra_threads(YOLOV8_INTRA_THREADS)
      .map_err(Yolov8Error::ort)?
      .commit_from_file(&self.model_path)
      .map_err(Yolov8Error::ort)?;
    info!("模型加载完成");
    debug!("推理参数: {:?}", self.options);

    let draw = painter(self.font, &self.options.names);
    Ok(Yolov8 {
      session: Mutex::new(session),
      options: self.options,
      draw,
    })
  }
}

/// ONNX Runtime 上的 YOLOv8 检测器
///
/// 会话只在启动时创建一次；`Session::run` 需要独占访问，因此放在互斥锁里，
/// 并发请求会依次等待。
pub struct Yolov8 {
  session: Mutex<Session>,
  options: DetectOptions,
  draw: Draw,
}

impl Detector for Yolov8 {
  type Error = Yolov8Error;

  fn detect(&self, image: &UploadedImage) -> Result<DetectionSet, Self::Error> {
    let rgb = image.as_rgb();
    let letterbox = Letterbox::new(rgb.width(), rgb.height(), self.options.input_size);
    let input = letterbox.apply(rgb);

    let size = self.options.input_size as i64;
    let tensor =
      Tensor::from_array((vec![1i64, 3, size, size], input)).map_err(Yolov8Error::ort)?;

    let mut session = self
      .session
      .lock()
      .map_err(|_| Yolov8Error::SessionPoisoned)?;
    debug!("执行模型推理");
    let outputs = session
      .run(ort::inputs![tensor])
      .map_err(Yolov8Error::ort)?;
    let (shape, data) = outputs[0]
      .try_extract_tensor::<f32>()
      .map_err(Yolov8Error::ort)?;

    let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
    if dims.len() != 3 || dims[0] != 1 || dims[1] <= YOLOV8_BOX_CHANNELS {
      return Err(Yolov8Error::InvalidOutputShape(dims));
    }
    let output = ArrayViewD::from_shape(IxDyn(&dims), data)?;
    let predictions = output
      .index_axis(Axis(0), 0)
      .into_dimensionality::<ndarray::Ix2>()?;

    let detections = postprocess(predictions, &letterbox, &self.options);
    debug!("检测到 {} 个物体", detections.len());
    Ok(DetectionSet::from(detections))
  }

  fn plot(&self, image: &UploadedImage, detections: &DetectionSet) -> RgbImage {
    self.draw.plot(image.as_rgb(), detections)
  }
}

/// 等比缩放并居中填充到方形输入
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
  src_w: u32,
  src_h: u32,
  size: u32,
  scale: f32,
  new_w: u32,
  new_h: u32,
  pad_x: u32,
  pad_y: u32,
}

impl Letterbox {
  fn new(src_w: u32, src_h: u32, size: u32) -> Self {
    let scale = (size as f32 / src_w as f32).min(size as f32 / src_h as f32);
    let new_w = ((src_w as f32 * scale).round() as u32).clamp(1, size);
    let new_h = ((src_h as f32 * scale).round() as u32).clamp(1, size);
    Self {
      src_w,
      src_h,
      size,
      scale,
      new_w,
      new_h,
      pad_x: (size - new_w) / 2,
      pad_y: (size - new_h) / 2,
    }
  }

  /// 返回 NCHW 排列、归一化到 [0, 1] 的输入数据
  fn apply(&self, image: &RgbImage) -> Vec<f32> {
    let resized = image::imageops::resize(image, self.new_w, self.new_h, FilterType::Triangle);
    let mut canvas = RgbImage::from_pixel(self.size, self.size, Rgb([LETTERBOX_PAD; 3]));
    image::imageops::overlay(&mut canvas, &resized, self.pad_x as i64, self.pad_y as i64);

    let plane = (self.size * self.size) as usize;
    let mut data = vec![0f32; 3 * plane];
    for (x, y, pixel) in canvas.enumerate_pixels() {
      let idx = (y * self.size + x) as usize;
      for c in 0..3 {
        data[c * plane + idx] = pixel[c] as f32 / 255.0;
      }
    }
    data
  }

  /// 把模型输入坐标系下的角点映射回原图，并裁剪到图像范围内
  fn restore(&self, corners: [f32; 4]) -> [f32; 4] {
    let [x1, y1, x2, y2] = corners;
    let (pad_x, pad_y) = (self.pad_x as f32, self.pad_y as f32);
    let (w, h) = (self.src_w as f32, self.src_h as f32);
    [
      ((x1 - pad_x) / self.scale).clamp(0.0, w),
      ((y1 - pad_y) / self.scale).clamp(0.0, h),
      ((x2 - pad_x) / self.scale).clamp(0.0, w),
      ((y2 - pad_y) / self.scale).clamp(0.0, h),
    ]
  }
}

/// 解析 `[4 + classes, anchors]` 形式的输出
fn postprocess(
  predictions: ArrayView2<'_, f32>,
  letterbox: &Letterbox,
  options: &DetectOptions,
) -> Vec<Detection> {
  let num_anchors = predictions.shape()[1];
  let mut candidates = Vec::new();

  for i in 0..num_anchors {
    let scores = predictions.slice(s![YOLOV8_BOX_CHANNELS.., i]);
    let Some((class_id, score)) = scores
      .iter()
      .copied()
      .enumerate()
      .max_by(|(_, a), (_, b)| a.total_cmp(b))
    else {
      continue;
    };

    if !(score > options.conf_threshold) {
      continue;
    }

    let cx = predictions[[0, i]];
    let cy = predictions[[1, i]];
    let w = predictions[[2, i]];
    let h = predictions[[3, i]];
    let corners = letterbox.restore([cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0]);

    let detection = Detection::from_corners(class_id as u32, score.min(1.0), corners);
    if detection.area() > 0.0 {
      candidates.push(detection);
    }
  }

  let mut detections = nms(candidates, options.iou_threshold);
  detections.truncate(options.max_det);
  detections
}

/// 按类别的非极大值抑制，结果按置信度降序
fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
  detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

  let mut result: Vec<Detection> = Vec::with_capacity(detections.len());
  for det in detections {
    let suppressed = result
      .iter()
      .any(|kept| kept.class_id == det.class_id && kept.iou(&det) > iou_threshold);
    if !suppressed {
      result.push(det);
    }
  }
  result
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::Array2;

  fn options() -> DetectOptions {
    DetectOptions {
      names: Vec::new(),
      ..YOLOV8_DEFAULTS
    }
  }

  #[test]
  fn letterbox_pads_the_short_side() {
    let letterbox = Letterbox::new(1280, 640, 640);
    assert_eq!(letterbox.scale, 0.5);
    assert_eq!((letterbox.new_w, letterbox.new_h), (640, 320));
    assert_eq!((letterbox.pad_x, letterbox.pad_y), (0, 160));

    let data = letterbox.apply(&RgbImage::from_pixel(1280, 640, Rgb([255, 255, 255])));
    assert_eq!(data.len(), 3 * 640 * 640);
    // 顶部填充区域为 114，中间为原图
    assert!((data[0] - 114.0 / 255.0).abs() < 1e-6);
    assert!((data[320 * 640 + 320] - 1.0).abs() < 1e-6);
  }

  #[test]
  fn restore_maps_back_and_clamps() {
    let letterbox = Letterbox::new(1280, 640, 640);
    let restored = letterbox.restore([100.0, 160.0, 200.0, 480.0]);
    assert_eq!(restored, [200.0, 0.0, 400.0, 640.0]);

    let clamped = letterbox.restore([-10.0, 100.0, 700.0, 500.0]);
    assert_eq!(clamped, [0.0, 0.0, 1280.0, 640.0]);
  }

  #[test]
  fn postprocess_filters_and_suppresses() {
    // 2 个类别，4 个候选框
    let raw = Array2::from_shape_vec(
      (6, 4),
      vec![
        // cx
        100.0, 102.0, 300.0, 500.0, //
        // cy
        100.0, 100.0, 300.0, 500.0, //
        // w
        50.0, 50.0, 40.0, 40.0, //
        // h
        50.0, 50.0, 40.0, 40.0, //
        // class 0
        0.9, 0.8, 0.1, 0.2, //
        // class 1
        0.1, 0.1, 0.6, 0.1,
      ],
    )
    .unwrap();
    let letterbox = Letterbox::new(640, 640, 640);

    let detections = postprocess(raw.view(), &letterbox, &options());
    assert_eq!(detections.len(), 2);
    assert_eq!(detections[0].class_id, 0);
    assert!((detections[0].confidence - 0.9).abs() < 1e-6);
    assert_eq!(detections[0].xywh, [100.0, 100.0, 50.0, 50.0]);
    assert_eq!(detections[1].class_id, 1);
    assert_eq!(detections[1].xywh, [300.0, 300.0, 40.0, 40.0]);
  }

  #[test]
  fn nms_keeps_overlapping_boxes_of_other_classes() {
    let a = Detection::from_corners(0, 0.9, [0.0, 0.0, 10.0, 10.0]);
    let b = Detection::from_corners(1, 0.8, [0.0, 0.0, 10.0, 10.0]);
    let c = Detection::from_corners(0, 0.7, [1.0, 0.0, 11.0, 10.0]);

    let kept = nms(vec![c, b.clone(), a.clone()], 0.5);
    assert_eq!(kept, vec![a, b]);
  }

  #[test]
  fn max_det_truncates() {
    let raw = Array2::from_shape_vec(
      (5, 3),
      vec![
        10.0, 100.0, 200.0, //
        10.0, 100.0, 200.0, //
        5.0, 5.0, 5.0, //
        5.0, 5.0, 5.0, //
        0.5, 0.7, 0.6,
      ],
    )
    .unwrap();
    let options = DetectOptions {
      max_det: 2,
      ..options()
    };

    let detections = postprocess(raw.view(), &Letterbox::new(640, 640, 640), &options);
    let scores: Vec<f32> = detections.iter().map(|d| d.confidence).collect();
    assert_eq!(scores, vec![0.7, 0.6]);
  }
}
