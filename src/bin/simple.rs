// 该文件是 Tangguan （汤罐） 项目的一部分。
// src/bin/simple.rs - 单张图片推理测试
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

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use tangguan::{
  FromUrl,
  model::ModelBuilder,
  output::{PageBody, PageConfig, draw::load_font, render_page},
  pipeline::{RecordEntry, handle_upload},
};

/// Tangguan 单张图片推理
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入图片（JPEG 或 PNG）
  #[arg(long, value_name = "IMAGE")]
  pub input: PathBuf,
  /// 输出路径，以 .html 结尾时输出完整页面，否则保存标注后的图片
  #[arg(long, value_name = "OUTPUT")]
  pub output: PathBuf,
  /// 标签字体文件
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型地址: {}", args.model);
  info!("输入图片: {}", args.input.display());
  info!("输出路径: {}", args.output.display());

  let font = args.font.as_deref().map(load_font).transpose()?;
  let detector = ModelBuilder::from_url(&args.model)?.font(font).build()?;
  let raw = std::fs::read(&args.input)?;

  info!("开始推理...");
  let now = std::time::Instant::now();
  let result = handle_upload(&detector, &raw)?;
  info!("处理完成，耗时: {:.2?}", now.elapsed());

  for entry in &result.records {
    match entry {
      RecordEntry::Detection(record) => info!(
        "检测 {}: 类别 {} 置信度 {} 位置 {:?}",
        record.index, record.class_id, record.confidence_text, record.xywh
      ),
      RecordEntry::NoDetections => info!("没有检测到目标"),
    }
  }

  let is_html = args
    .output
    .extension()
    .is_some_and(|ext| ext.eq_ignore_ascii_case("html"));
  if is_html {
    let page = render_page(&PageConfig::default(), PageBody::Result(&result))?;
    std::fs::write(&args.output, page)?;
  } else {
    result.annotated.save(&args.output)?;
  }
  info!("结果已保存: {}", args.output.display());

  Ok(())
}
