// 该文件是 Tangguan （汤罐） 项目的一部分。
// src/model.rs - 检测模型网关
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

use ab_glyph::FontArc;
use image::RgbImage;
use thiserror::Error;
use url::Url;

use crate::{FromUrl, input::UploadedImage, output::draw::Draw};

#[cfg(feature = "model_yolov8")]
mod yolov8;
#[cfg(feature = "model_yolov8")]
pub use self::yolov8::{Yolov8, Yolov8Builder, Yolov8Error};

#[cfg(feature = "model_yolo26")]
mod yolo26;
#[cfg(feature = "model_yolo26")]
pub use self::yolo26::{Yolo26, Yolo26Builder, Yolo26Error};

/// 检测网关：给定图像，返回检测框集合，并能把检测结果画回图像上。
///
/// 模型实例在启动时加载一次，之后以只读方式被反复调用。
pub trait Detector {
  type Error: std::error::Error + Send + Sync + 'static;

  fn detect(&self, image: &UploadedImage) -> Result<DetectionSet, Self::Error>;
  fn plot(&self, image: &UploadedImage, detections: &DetectionSet) -> RgbImage;
}

/// 单个检测目标
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  pub class_id: u32,
  pub confidence: f32,
  pub xywh: [f32; 4], // [center_x, center_y, width, height]，像素坐标
}

impl Detection {
  /// 由角点坐标 [x_min, y_min, x_max, y_max] 构造
  pub fn from_corners(class_id: u32, confidence: f32, corners: [f32; 4]) -> Self {
    let [x_min, y_min, x_max, y_max] = corners;
    Self {
      class_id,
      confidence,
      xywh: [
        (x_min + x_max) / 2.0,
        (y_min + y_max) / 2.0,
        x_max - x_min,
        y_max - y_min,
      ],
    }
  }

  pub fn corners(&self) -> [f32; 4] {
    let [cx, cy, w, h] = self.xywh;
    [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0]
  }

  pub fn area(&self) -> f32 {
    self.xywh[2] * self.xywh[3]
  }

  pub fn iou(&self, other: &Detection) -> f32 {
    let [ax1, ay1, ax2, ay2] = self.corners();
    let [bx1, by1, bx2, by2] = other.corners();

    let inter_w = (ax2.min(bx2) - ax1.max(bx1)).max(0.0);
    let inter_h = (ay2.min(by2) - ay1.max(by1)).max(0.0);
    let intersection = inter_w * inter_h;
    let union = self.area() + other.area() - intersection;

    if union > 0.0 {
      intersection / union
    } else {
      0.0
    }
  }
}

/// 一次推理的检测结果，保持模型输出顺序
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionSet {
  pub items: Box<[Detection]>,
}

impl DetectionSet {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
    self.items.iter()
  }
}

impl From<Vec<Detection>> for DetectionSet {
  fn from(items: Vec<Detection>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

impl<'a> IntoIterator for &'a DetectionSet {
  type Item = &'a Detection;
  type IntoIter = std::slice::Iter<'a, Detection>;

  fn into_iter(self) -> Self::IntoIter {
    self.items.iter()
  }
}

/// 模型地址中可调的推理参数
///
/// 例如 `yolov8:///models/best.onnx?conf=0.3&iou=0.6&names=soup_can`
#[derive(Debug, Clone, PartialEq)]
pub struct DetectOptions {
  pub conf_threshold: f32,
  pub iou_threshold: f32,
  pub input_size: u32,
  pub max_det: usize,
  pub names: Vec<String>,
}

impl DetectOptions {
  pub fn from_query(url: &Url, defaults: DetectOptions) -> Result<Self, InvalidOption> {
    let mut options = defaults;
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "conf" => options.conf_threshold = parse_unit(&key, &value)?,
        "iou" => options.iou_threshold = parse_unit(&key, &value)?,
        "imgsz" => {
          options.input_size = value
            .parse()
            .ok()
            .filter(|size: &u32| *size > 0 && size % 32 == 0)
            .ok_or_else(|| InvalidOption::new(&key, &value))?
        }
        "max_det" => {
          options.max_det = value
            .parse()
            .map_err(|_| InvalidOption::new(&key, &value))?
        }
        "names" => {
          options.names = value
            .split(',')
            .map(|name| name.trim().to_string())
            .collect()
        }
        _ => tracing::warn!("忽略未知的模型参数: {}={}", key, value),
      }
    }
    Ok(options)
  }
}

fn parse_unit(key: &str, value: &str) -> Result<f32, InvalidOption> {
  value
    .parse::<f32>()
    .ok()
    .filter(|v| (0.0..=1.0).contains(v))
    .ok_or_else(|| InvalidOption::new(key, value))
}

#[derive(Error, Debug)]
#[error("模型参数无效: {0}={1}")]
pub struct InvalidOption(pub String, pub String);

impl InvalidOption {
  pub fn new(key: &str, value: &str) -> Self {
    InvalidOption(key.to_string(), value.to_string())
  }
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[cfg(feature = "model_yolov8")]
  #[error("YOLOv8 模型错误: {0}")]
  Yolov8Error(#[from] Yolov8Error),
  #[cfg(feature = "model_yolo26")]
  #[error("YOLO26 模型错误: {0}")]
  Yolo26Error(#[from] Yolo26Error),
  #[error("不支持的模型方案: {0}")]
  SchemeMismatch(String),
}

pub enum ModelBuilder {
  #[cfg(feature = "model_yolov8")]
  Yolov8(Yolov8Builder),
  #[cfg(feature = "model_yolo26")]
  Yolo26(Yolo26Builder),
}

impl FromUrl for ModelBuilder {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "model_yolov8")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == Yolov8Builder::SCHEME {
        return Ok(ModelBuilder::Yolov8(Yolov8Builder::from_url(url)?));
      }
    }
    #[cfg(feature = "model_yolo26")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == Yolo26Builder::SCHEME {
        return Ok(ModelBuilder::Yolo26(Yolo26Builder::from_url(url)?));
      }
    }
    Err(ModelError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl ModelBuilder {
  /// 设置绘制标签所用的字体
  pub fn font(self, font: Option<FontArc>) -> Self {
    match self {
      #[cfg(feature = "model_yolov8")]
      ModelBuilder::Yolov8(builder) => ModelBuilder::Yolov8(builder.font(font)),
      #[cfg(feature = "model_yolo26")]
      ModelBuilder::Yolo26(builder) => ModelBuilder::Yolo26(builder.font(font)),
    }
  }

  pub fn build(self) -> Result<ModelWrapper, ModelError> {
    match self {
      #[cfg(feature = "model_yolov8")]
      ModelBuilder::Yolov8(builder) => Ok(ModelWrapper::Yolov8(builder.build()?)),
      #[cfg(feature = "model_yolo26")]
      ModelBuilder::Yolo26(builder) => Ok(ModelWrapper::Yolo26(builder.build()?)),
    }
  }
}

pub enum ModelWrapper {
  #[cfg(feature = "model_yolov8")]
  Yolov8(Yolov8),
  #[cfg(feature = "model_yolo26")]
  Yolo26(Yolo26),
}

impl Detector for ModelWrapper {
  type Error = ModelError;

  fn detect(&self, image: &UploadedImage) -> Result<DetectionSet, Self::Error> {
    match self {
      #[cfg(feature = "model_yolov8")]
      ModelWrapper::Yolov8(model) => model.detect(image).map_err(ModelError::from),
      #[cfg(feature = "model_yolo26")]
      ModelWrapper::Yolo26(model) => model.detect(image).map_err(ModelError::from),
    }
  }

  fn plot(&self, image: &UploadedImage, detections: &DetectionSet) -> RgbImage {
    match self {
      #[cfg(feature = "model_yolov8")]
      ModelWrapper::Yolov8(model) => model.plot(image, detections),
      #[cfg(feature = "model_yolo26")]
      ModelWrapper::Yolo26(model) => model.plot(image, detections),
    }
  }
}

/// 各后端共用的绘制器构造
pub(crate) fn painter(font: Option<FontArc>, names: &[String]) -> Draw {
  Draw::default().with_font(font).with_names(names.to_vec())
}
