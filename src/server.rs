// 该文件是 Tangguan （汤罐） 项目的一部分。
// src/server.rs - 网页服务
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

use std::sync::Arc;

use axum::{
  Json, Router,
  body::Bytes,
  extract::{DefaultBodyLimit, Multipart, State, multipart::MultipartError},
  http::StatusCode,
  response::{Html, IntoResponse, Response},
  routing::{get, post},
};
use serde_json::json;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};

use crate::{
  model::Detector,
  output::{PageBody, PageConfig, render_page},
  pipeline::{PipelineError, RenderedResult, handle_upload},
};

/// 上传控件在表单中的字段名
pub const IMAGE_FIELD: &str = "image";

#[derive(Error, Debug)]
pub enum UploadError {
  #[error("读取上传内容失败: {0}")]
  Multipart(#[from] MultipartError),
  #[error("请求中没有 'image' 字段")]
  MissingField,
  #[error("{0}")]
  Pipeline(#[from] PipelineError),
  #[error("处理任务异常退出: {0}")]
  Worker(#[from] tokio::task::JoinError),
}

impl UploadError {
  pub fn status(&self) -> StatusCode {
    match self {
      UploadError::Multipart(e) => e.status(),
      UploadError::MissingField => StatusCode::BAD_REQUEST,
      UploadError::Pipeline(PipelineError::Decode(_)) => StatusCode::BAD_REQUEST,
      UploadError::Pipeline(PipelineError::Inference(_)) => StatusCode::INTERNAL_SERVER_ERROR,
      UploadError::Worker(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

/// HTTP 处理函数共享的状态。检测器在启动时创建，这里只持有引用。
pub struct AppState<D> {
  pub detector: Arc<D>,
  pub page: Arc<PageConfig>,
}

impl<D> Clone for AppState<D> {
  fn clone(&self) -> Self {
    Self {
      detector: Arc::clone(&self.detector),
      page: Arc::clone(&self.page),
    }
  }
}

impl<D> AppState<D> {
  pub fn new(detector: Arc<D>, page: PageConfig) -> Self {
    Self {
      detector,
      page: Arc::new(page),
    }
  }
}

pub fn router<D>(state: AppState<D>, max_upload_bytes: usize) -> Router
where
  D: Detector + Send + Sync + 'static,
{
  Router::new()
    .route("/", get(index::<D>))
    .route("/upload", post(upload::<D>))
    .route("/api/detect", post(api_detect::<D>))
    .route("/healthz", get(healthz))
    .layer(DefaultBodyLimit::max(max_upload_bytes))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

async fn healthz() -> &'static str {
  "ok"
}

async fn index<D>(State(st): State<AppState<D>>) -> Response
where
  D: Send + Sync + 'static,
{
  page_response(&st.page, StatusCode::OK, PageBody::Empty)
}

/// 上传控件的事件处理：运行一次流程并返回刷新后的页面
async fn upload<D>(State(st): State<AppState<D>>, multipart: Multipart) -> Response
where
  D: Detector + Send + Sync + 'static,
{
  match process(&st, multipart).await {
    Ok(result) => page_response(&st.page, StatusCode::OK, PageBody::Result(&result)),
    Err(e) => page_response(&st.page, e.status(), PageBody::Error(&e.to_string())),
  }
}

async fn api_detect<D>(State(st): State<AppState<D>>, multipart: Multipart) -> Response
where
  D: Detector + Send + Sync + 'static,
{
  match process(&st, multipart).await {
    Ok(result) => Json(json!({
      "detections": result.detection_count(),
      "records": result.records,
    }))
    .into_response(),
    Err(e) => (e.status(), Json(json!({ "error": e.to_string() }))).into_response(),
  }
}

async fn process<D>(st: &AppState<D>, multipart: Multipart) -> Result<RenderedResult, UploadError>
where
  D: Detector + Send + Sync + 'static,
{
  let raw = read_image_field(multipart).await.inspect_err(|e| {
    warn!("上传请求无效: {}", e);
  })?;

  // 推理是同步计算，放到阻塞线程里执行
  let detector = Arc::clone(&st.detector);
  let result = tokio::task::spawn_blocking(move || handle_upload(detector.as_ref(), &raw)).await?;

  result.map_err(UploadError::from)
}

async fn read_image_field(mut multipart: Multipart) -> Result<Bytes, UploadError> {
  while let Some(field) = multipart.next_field().await? {
    if field.name() == Some(IMAGE_FIELD) {
      let file_name = field.file_name().map(str::to_string);
      let data = field.bytes().await?;
      debug!("读取上传文件 {:?}: {} 字节", file_name, data.len());
      return Ok(data);
    }
  }
  Err(UploadError::MissingField)
}

fn page_response(config: &PageConfig, status: StatusCode, body: PageBody<'_>) -> Response {
  match render_page(config, body) {
    Ok(html) => (status, Html(html)).into_response(),
    Err(e) => {
      error!("页面渲染失败: {}", e);
      (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
    }
  }
}
