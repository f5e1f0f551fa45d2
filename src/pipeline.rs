// 该文件是 Tangguan （汤罐） 项目的一部分。
// src/pipeline.rs - 上传到展示的处理流程
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

use image::RgbImage;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  input::{DecodeError, UploadedImage},
  model::{Detection, DetectionSet, Detector},
};

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("图像解码失败: {0}")]
  Decode(#[from] DecodeError),
  #[error("模型推理失败: {0}")]
  Inference(#[source] BoxError),
}

/// 检测器返回了违反约定的结果
#[derive(Error, Debug)]
pub enum InvalidDetection {
  #[error("第 {0} 个检测的置信度超出 [0, 1]: {1}")]
  Confidence(usize, f32),
  #[error("第 {0} 个检测的坐标无效: {1:?}")]
  Geometry(usize, [f32; 4]),
}

/// 单个检测的展示记录
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionRecord {
  /// 从 1 开始的序号
  pub index: usize,
  pub class_id: u32,
  /// 保留两位小数的置信度
  pub confidence: f64,
  /// 两位小数的置信度文本，例如 `0.91`
  pub confidence_text: String,
  /// 置信度百分比，保留一位小数，同时用作置信度条宽度
  pub percent: f64,
  /// [x, y, width, height]，保留两位小数
  pub xywh: [f64; 4],
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordEntry {
  Detection(DetectionRecord),
  NoDetections,
}

/// 一次上传的处理结果
#[derive(Debug, Clone)]
pub struct RenderedResult {
  pub original: RgbImage,
  pub annotated: RgbImage,
  pub records: Vec<RecordEntry>,
}

impl RenderedResult {
  pub fn detection_count(&self) -> usize {
    self
      .records
      .iter()
      .filter(|entry| matches!(entry, RecordEntry::Detection(_)))
      .count()
  }
}

/// 处理一次上传：解码、推理、格式化、绘制。
///
/// 出错即终止本次处理，不重试，也不返回部分结果。
pub fn handle_upload<D>(detector: &D, raw: &[u8]) -> Result<RenderedResult, PipelineError>
where
  D: Detector + ?Sized,
{
  let image = UploadedImage::decode(raw).inspect_err(|e| {
    warn!("上传图像无法解码: {}", e);
  })?;
  info!("收到上传图像: {}x{}", image.width(), image.height());

  let now = std::time::Instant::now();
  let detections = detector.detect(&image).map_err(|e| {
    error!("推理失败: {}", e);
    PipelineError::Inference(Box::new(e))
  })?;
  info!(
    "推理完成，检测到 {} 个目标，耗时: {:.2?}",
    detections.len(),
    now.elapsed()
  );

  let records = format_records(&detections).map_err(|e| {
    error!("检测结果无效: {}", e);
    PipelineError::Inference(Box::new(e))
  })?;
  debug!("检测记录: {:?}", records);

  let annotated = detector.plot(&image, &detections);

  Ok(RenderedResult {
    original: image.into_rgb(),
    annotated,
    records,
  })
}

/// 把检测结果格式化为展示记录，空结果得到唯一的 `NoDetections` 标记
pub fn format_records(detections: &DetectionSet) -> Result<Vec<RecordEntry>, InvalidDetection> {
  if detections.is_empty() {
    return Ok(vec![RecordEntry::NoDetections]);
  }

  detections
    .iter()
    .enumerate()
    .map(|(i, detection)| format_record(i + 1, detection).map(RecordEntry::Detection))
    .collect()
}

fn format_record(index: usize, detection: &Detection) -> Result<DetectionRecord, InvalidDetection> {
  let confidence = detection.confidence;
  if !(0.0..=1.0).contains(&confidence) {
    return Err(InvalidDetection::Confidence(index, confidence));
  }
  if detection.xywh.iter().any(|v| !v.is_finite() || *v < 0.0) {
    return Err(InvalidDetection::Geometry(index, detection.xywh));
  }

  let confidence = confidence as f64;
  let confidence_text = format!("{:.2}", confidence);
  Ok(DetectionRecord {
    index,
    class_id: detection.class_id,
    confidence: round_to(confidence, 2),
    confidence_text,
    percent: round_to(confidence * 100.0, 1),
    xywh: detection.xywh.map(|v| round_to(v as f64, 2)),
  })
}

/// 按十进制文本舍入：与 `{:.N}` 格式化结果一致，恰好一半时取偶数
fn round_to(value: f64, decimals: usize) -> f64 {
  format!("{:.*}", decimals, value).parse().unwrap_or(value)
}
