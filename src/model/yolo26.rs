// 该文件是 Tangguan （汤罐） 项目的一部分。
// src/model/yolo26.rs - YOLO26 RKNN 模型
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
use image::{RgbImage, imageops::FilterType};
use rknpu::{Context, InitFlags, TensorFormat, TensorType};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::UploadedImage,
  model::{DetectOptions, Detection, DetectionSet, Detector, InvalidOption, painter},
  output::draw::Draw,
};

const YOLO26_NUM_INPUTS: u32 = 1;
const YOLO26_NUM_OUTPUTS: u32 = 6;
const YOLO26_CLASS_NUM: usize = 80;
const YOLO26_INPUT_SIZE: u32 = 640;
const YOLO26_HEAD_SIZES: [(usize, usize); 3] = [(80, 80), (40, 40), (20, 20)];
const YOLO26_STRIDES: [f32; 3] = [8.0, 16.0, 32.0];

const YOLO26_DEFAULTS: DetectOptions = DetectOptions {
  conf_threshold: 0.5,
  iou_threshold: 0.45,
  input_size: YOLO26_INPUT_SIZE,
  max_det: 300,
  names: Vec::new(),
};

#[derive(Error, Debug)]
pub enum Yolo26Error {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模型无效: {0}, 错误: {1}")]
  ModelInvalid(String, rknpu::Error),
  #[error("RKNN 错误: {0}")]
  RknnError(rknpu::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("{0}")]
  InvalidOption(#[from] InvalidOption),
  #[error("推理上下文不可用")]
  ContextPoisoned,
  #[error("检测头 {0} 输出大小不匹配: 张量1 {1}, 张量2 {2}")]
  OutputSizeMismatch(usize, usize, usize),
}

impl From<rknpu::Error> for Yolo26Error {
  fn from(err: rknpu::Error) -> Self {
    Yolo26Error::RknnError(err)
  }
}

impl Yolo26Error {
  pub fn invalid(msg: &str, e: rknpu::Error) -> Self {
    Yolo26Error::ModelInvalid(msg.to_string(), e)
  }
}

pub struct Yolo26Builder {
  model_path: String,
  options: DetectOptions,
  font: Option<FontArc>,
}

impl FromUrlWithScheme for Yolo26Builder {
  const SCHEME: &'static str = "yolo26";
}

impl FromUrl for Yolo26Builder {
  type Error = Yolo26Error;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(Yolo26Error::SchemeMismatch(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let options = DetectOptions::from_query(url, YOLO26_DEFAULTS)?;
    if options.input_size != YOLO26_INPUT_SIZE {
      return Err(InvalidOption::new("imgsz", &options.input_size.to_string()).into());
    }
    if ignores_iou(url) {
      warn!("YOLO26 输出不经过 NMS，忽略 iou 参数");
    }

    Ok(Yolo26Builder {
      model_path: url.path().to_string(),
      options,
      font: None,
    })
  }
}

impl Yolo26Builder {
  pub fn font(mut self, font: Option<FontArc>) -> Self {
    self.font = font;
    self
  }

  pub fn build(self) -> Result<Yolo26, Yolo26Error> {
    info!("加载模型文件: {}", self.model_path);
    let model_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 RKNN 推理上下文");
    let context = Context::new(&model_data, InitFlags::default())?;

    let num_inputs = context
      .num_inputs()
      .map_err(|e| Yolo26Error::invalid("无法获取输入数量", e))?;
    let num_outputs = context
      .num_outputs()
      .map_err(|e| Yolo26Error::invalid("无法获取输出数量", e))?;

    if num_inputs != YOLO26_NUM_INPUTS || num_outputs != YOLO26_NUM_OUTPUTS {
      let msg = format!(
        "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
        YOLO26_NUM_INPUTS, YOLO26_NUM_OUTPUTS, num_inputs, num_outputs
      );
      error!("{}", msg);
      return Err(Yolo26Error::invalid(&msg, rknpu::Error::InvalidModel));
    }
    info!("模型加载完成");

    let draw = painter(self.font, &self.options.names);
    Ok(Yolo26 {
      context: Mutex::new(context),
      options: self.options,
      draw,
    })
  }
}

/// RKNN NPU 上的 YOLO26 检测器，输入为 640x640 NHWC RGB
pub struct Yolo26 {
  context: Mutex<Context>,
  options: DetectOptions,
  draw: Draw,
}

impl Detector for Yolo26 {
  type Error = Yolo26Error;

  fn detect(&self, image: &UploadedImage) -> Result<DetectionSet, Self::Error> {
    let rgb = image.as_rgb();
    let input = image::imageops::resize(
      rgb,
      YOLO26_INPUT_SIZE,
      YOLO26_INPUT_SIZE,
      FilterType::Triangle,
    );

    let context = self
      .context
      .lock()
      .map_err(|_| Yolo26Error::ContextPoisoned)?;
    debug!("设置模型输入");
    context.set_input(0, input.as_raw(), TensorFormat::NHWC, TensorType::UInt8)?;
    debug!("执行模型推理");
    context.run()?;
    let output = context.get_outputs()?;

    let mut heads = Vec::with_capacity(YOLO26_HEAD_SIZES.len());
    for head_idx in 0..YOLO26_HEAD_SIZES.len() {
      heads.push((
        output.get_f32(head_idx * 2)?,
        output.get_f32(head_idx * 2 + 1)?,
      ));
    }

    let mut detections = Vec::new();
    for (head_idx, (tensor1, tensor2)) in heads.iter().enumerate() {
      decode_head(head_idx, tensor1, tensor2, &self.options, &mut detections)?;
    }

    // 归一化坐标映射回原图像素
    let (w, h) = (rgb.width() as f32, rgb.height() as f32);
    let detections = detections
      .into_iter()
      .map(|det| {
        let [x1, y1, x2, y2] = det.corners();
        Detection::from_corners(det.class_id, det.confidence, [x1 * w, y1 * h, x2 * w, y2 * h])
      })
      .take(self.options.max_det)
      .collect::<Vec<_>>();
    debug!("检测到 {} 个物体", detections.len());

    Ok(DetectionSet::from(detections))
  }

  fn plot(&self, image: &UploadedImage, detections: &DetectionSet) -> RgbImage {
    self.draw.plot(image.as_rgb(), detections)
  }
}

/// 根据张量大小区分回归和分类输出，RKNN 的输出顺序并不固定
fn match_reg_cls_tensors<'a>(
  tensor1: &'a [f32],
  tensor2: &'a [f32],
  reg_expected: usize,
  cls_expected: usize,
) -> Option<(&'a [f32], &'a [f32])> {
  if tensor1.len() == reg_expected && tensor2.len() == cls_expected {
    Some((tensor1, tensor2))
  } else if tensor1.len() == cls_expected && tensor2.len() == reg_expected {
    Some((tensor2, tensor1))
  } else {
    None
  }
}

/// 解码一个检测头，坐标归一化到 [0, 1]
fn decode_head(
  head_idx: usize,
  tensor1: &[f32],
  tensor2: &[f32],
  options: &DetectOptions,
  detections: &mut Vec<Detection>,
) -> Result<(), Yolo26Error> {
  let (map_h, map_w) = YOLO26_HEAD_SIZES[head_idx];
  let stride = YOLO26_STRIDES[head_idx];
  let spatial = map_h * map_w;
  let size = YOLO26_INPUT_SIZE as f32;

  let Some((reg, cls)) = match_reg_cls_tensors(
    tensor1,
    tensor2,
    4 * spatial,
    YOLO26_CLASS_NUM * spatial,
  ) else {
    error!(
      "检测头 {}: 输出大小不匹配 - 张量1: {}, 张量2: {}",
      head_idx,
      tensor1.len(),
      tensor2.len()
    );
    return Err(Yolo26Error::OutputSizeMismatch(
      head_idx,
      tensor1.len(),
      tensor2.len(),
    ));
  };

  for h in 0..map_h {
    for w in 0..map_w {
      let idx = h * map_w + w;

      let (max_logit, class_id) = (0..YOLO26_CLASS_NUM)
        .map(|c| (cls[c * spatial + idx], c as u32))
        .fold((f32::MIN, 0), |best, cur| if cur.0 > best.0 { cur } else { best });
      let score = sigmoid(max_logit);
      if score <= options.conf_threshold {
        continue;
      }

      let grid_x = (w as f32) + 0.5;
      let grid_y = (h as f32) + 0.5;
      let xmin = ((grid_x - reg[idx]) * stride).clamp(0.0, size);
      let ymin = ((grid_y - reg[spatial + idx]) * stride).clamp(0.0, size);
      let xmax = ((grid_x + reg[2 * spatial + idx]) * stride).clamp(0.0, size);
      let ymax = ((grid_y + reg[3 * spatial + idx]) * stride).clamp(0.0, size);

      if xmax > xmin && ymax > ymin {
        detections.push(Detection::from_corners(
          class_id,
          score,
          [xmin / size, ymin / size, xmax / size, ymax / size],
        ));
      }
    }
  }
  Ok(())
}

/// YOLO26 是无 NMS 的检测头，`iou` 参数不起作用
fn ignores_iou(url: &Url) -> bool {
  url.query_pairs().any(|(key, _)| key == "iou")
}

fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn tensors_are_matched_by_size() {
    let reg = vec![0.0; 8];
    let cls = vec![0.0; 20];
    let (r, c) = match_reg_cls_tensors(&cls, &reg, 8, 20).unwrap();
    assert_eq!((r.len(), c.len()), (8, 20));
    assert!(match_reg_cls_tensors(&reg, &reg, 8, 20).is_none());
  }

  #[test]
  fn decode_head_emits_confident_cells() {
    let (map_h, map_w) = YOLO26_HEAD_SIZES[2];
    let spatial = map_h * map_w;
    let mut reg = vec![0.0f32; 4 * spatial];
    let mut cls = vec![-10.0f32; YOLO26_CLASS_NUM * spatial];

    // 第 0 个网格，类别 5，框向四周各扩展一个网格
    for k in 0..4 {
      reg[k * spatial] = 1.0;
    }
    cls[5 * spatial] = 5.0;

    let mut detections = Vec::new();
    decode_head(2, &reg, &cls, &YOLO26_DEFAULTS, &mut detections).unwrap();

    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].class_id, 5);
    let [x1, y1, x2, y2] = detections[0].corners();
    assert!((x1 - 0.0).abs() < 1e-6 && (y1 - 0.0).abs() < 1e-6);
    assert!((x2 - 48.0 / 640.0).abs() < 1e-6 && (y2 - 48.0 / 640.0).abs() < 1e-6);
  }

  #[test]
  fn iou_option_is_accepted_but_unused() {
    let url = Url::parse("yolo26:///models/yolo26.rknn?iou=0.3&conf=0.4").unwrap();
    assert!(ignores_iou(&url));
    assert!(!ignores_iou(&Url::parse("yolo26:///models/yolo26.rknn?conf=0.4").unwrap()));

    let builder = Yolo26Builder::from_url(&url).unwrap();
    assert_eq!(builder.options.conf_threshold, 0.4);
  }

  #[test]
  fn mismatched_head_outputs_are_an_error() {
    let tensor = vec![0.0f32; 8];
    let mut detections = Vec::new();
    let result = decode_head(2, &tensor, &tensor, &YOLO26_DEFAULTS, &mut detections);

    assert!(matches!(
      result,
      Err(Yolo26Error::OutputSizeMismatch(2, 8, 8))
    ));
    assert!(detections.is_empty());
  }
}
