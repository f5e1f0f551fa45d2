// 该文件是 Tangguan （汤罐） 项目的一部分。
// src/main.rs - 检测演示服务主程序
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

mod args;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use tangguan::{
  FromUrl,
  model::ModelBuilder,
  output::draw::load_font,
  server::{AppState, router},
};

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("Tangguan 检测演示服务");
  info!("模型地址: {}", args.model);
  info!("监听地址: {}", args.listen);
  info!("上传大小上限: {} MiB", args.max_upload_mb);

  let font = args.font.as_deref().map(load_font).transpose()?;
  if font.is_none() {
    info!("未指定标签字体，只绘制检测框");
  }

  // 模型只加载一次，所有请求共享
  info!("正在加载模型...");
  let now = std::time::Instant::now();
  let detector = ModelBuilder::from_url(&args.model)?.font(font).build()?;
  info!("模型加载完成，耗时: {:.2?}", now.elapsed());

  let state = AppState::new(Arc::new(detector), args.page_config());
  let app = router(state, args.max_upload_bytes());

  let listener = tokio::net::TcpListener::bind(args.listen).await?;
  info!("服务已启动: http://{}", listener.local_addr()?);

  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;

  info!("服务已停止");
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    tracing::error!("无法监听退出信号: {}", e);
    std::future::pending::<()>().await;
  }
  info!("收到退出信号，正在关闭服务...");
}
