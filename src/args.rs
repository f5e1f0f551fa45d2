// 该文件是 Tangguan （汤罐） 项目的一部分。
// src/args.rs - 项目参数配置
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

use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;
use tangguan::output::PageConfig;
use url::Url;

/// Tangguan 检测演示服务参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址
  /// 支持格式:
  /// - ONNX: yolov8:///path/to/best.onnx?conf=0.25&iou=0.7&names=soup_can
  /// - RKNN: yolo26:///path/to/model.rknn
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 监听地址
  #[arg(long, default_value = "0.0.0.0:8501", value_name = "ADDR")]
  pub listen: SocketAddr,

  /// 标签字体文件（TrueType），不指定时只绘制检测框
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,

  /// 上传文件大小上限（MiB）
  #[arg(long, default_value = "200", value_name = "MIB")]
  pub max_upload_mb: usize,

  /// 页面标题
  #[arg(long)]
  pub title: Option<String>,

  /// 页面副标题
  #[arg(long)]
  pub subtitle: Option<String>,

  /// 页脚文字
  #[arg(long)]
  pub footer: Option<String>,

  /// 没有检测结果时显示的文字
  #[arg(long)]
  pub empty_message: Option<String>,
}

impl Args {
  pub fn page_config(&self) -> PageConfig {
    let defaults = PageConfig::default();
    PageConfig {
      title: self.title.clone().unwrap_or(defaults.title),
      subtitle: self.subtitle.clone().unwrap_or(defaults.subtitle),
      footer: self.footer.clone().unwrap_or(defaults.footer),
      empty_message: self.empty_message.clone().unwrap_or(defaults.empty_message),
    }
  }

  pub fn max_upload_bytes(&self) -> usize {
    self.max_upload_mb.saturating_mul(1024 * 1024)
  }
}
