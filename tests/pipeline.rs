// 该文件是 Tangguan （汤罐） 项目的一部分。
// tests/pipeline.rs - 上传处理流程测试
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

mod common;

use common::*;
use tangguan::{
  input::DecodeError,
  output::{PageBody, PageConfig, render_page},
  pipeline::{PipelineError, RecordEntry, handle_upload},
};

#[test]
fn two_cans_produce_two_records() {
  let detector = StubDetector::returning(two_cans());
  let result = handle_upload(&detector, &sample_png(640, 480)).unwrap();

  assert_eq!(result.detection_count(), 2);
  assert_eq!(result.original.dimensions(), (640, 480));
  assert_eq!(result.annotated.dimensions(), (640, 480));
  assert_ne!(result.original, result.annotated);

  let texts: Vec<_> = result
    .records
    .iter()
    .map(|entry| match entry {
      RecordEntry::Detection(record) => (record.index, record.confidence_text.clone()),
      RecordEntry::NoDetections => panic!("unexpected marker"),
    })
    .collect();
  assert_eq!(
    texts,
    vec![(1, "0.91".to_string()), (2, "0.42".to_string())]
  );
}

#[test]
fn empty_detection_gives_marker_and_clean_image() {
  let detector = StubDetector::returning(Vec::new());
  let result = handle_upload(&detector, &sample_jpeg(64, 48)).unwrap();

  assert_eq!(result.records, vec![RecordEntry::NoDetections]);
  assert_eq!(result.detection_count(), 0);
  assert_eq!(result.original, result.annotated);
}

#[test]
fn garbage_bytes_fail_before_inference() {
  let detector = StubDetector::failing();
  let err = handle_upload(&detector, b"definitely not an image").unwrap_err();
  assert!(matches!(err, PipelineError::Decode(DecodeError::UnknownFormat(_))));
}

#[test]
fn detector_failure_is_reported_as_inference_error() {
  let detector = StubDetector::failing();
  let err = handle_upload(&detector, &sample_png(32, 32)).unwrap_err();
  assert!(matches!(err, PipelineError::Inference(_)));
}

#[test]
fn invalid_detection_is_reported_as_inference_error() {
  let detector = StubDetector::returning(vec![Detection {
    class_id: 0,
    confidence: 1.7,
    xywh: [1.0, 1.0, 1.0, 1.0],
  }]);
  let err = handle_upload(&detector, &sample_png(32, 32)).unwrap_err();
  assert!(matches!(err, PipelineError::Inference(_)));
}

#[test]
fn result_page_shows_confidence_bars() {
  let detector = StubDetector::returning(two_cans());
  let result = handle_upload(&detector, &sample_png(320, 240)).unwrap();
  let html = render_page(&PageConfig::default(), PageBody::Result(&result)).unwrap();

  assert!(html.contains("Detection 1"));
  assert!(html.contains("Detection 2"));
  assert!(html.contains("width: 91%;"));
  assert!(html.contains("width: 42%;"));
  assert!(html.contains("91.0%"));
  assert!(html.contains("42.0%"));
  assert_eq!(html.matches("data:image/png;base64,").count(), 2);
}
