// 该文件是 Tangguan （汤罐） 项目的一部分。
// src/output/html.rs - 页面渲染
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

use std::fmt::{self, Write};

use crate::{
  output::{OutputError, to_data_uri},
  pipeline::{DetectionRecord, RecordEntry, RenderedResult},
};

const STYLE: &str = r#"
  body { font-family: "Source Sans Pro", sans-serif; margin: 0; background-color: #f9f9f9; }
  .main { max-width: 1100px; margin: 0 auto; padding: 40px 20px; }
  .title { font-size: 2.5em; font-weight: bold; color: #d62828; }
  .subtitle { font-size: 1.2em; color: #6c757d; }
  .footer { margin-top: 50px; font-size: 0.9em; color: #999; }
  .uploader { margin: 20px 0; }
  .columns { display: flex; gap: 20px; }
  .columns figure { flex: 1; margin: 0; }
  .columns img { width: 100%; }
  .columns figcaption { text-align: center; color: #6c757d; font-size: 0.9em; }
  .result-box {
    border-radius: 10px;
    padding: 20px;
    background-color: white;
    border: 1px solid #e0e0e0;
    box-shadow: 0 1px 4px rgba(0, 0, 0, 0.05);
    margin: 20px 0;
  }
  .error { color: #d62828; font-weight: bold; }
  .bar { background-color: #f0f0f0; border-radius: 5px; height: 4px; width: 100%; margin: 30px 0 10px 0; position: relative; }
  .bar-fill { background-color: #d62828; height: 100%; border-radius: 5px; }
  .bar-label { position: absolute; top: -25px; right: 0; font-size: 0.9em; color: #000; }
"#;

/// 页面上的固定文字
#[derive(Debug, Clone)]
pub struct PageConfig {
  pub title: String,
  pub subtitle: String,
  pub footer: String,
  pub empty_message: String,
}

impl Default for PageConfig {
  fn default() -> Self {
    Self {
      title: "🍜 Soup Can Detector".to_string(),
      subtitle: "Detect Campbell soup cans using a YOLOv8x model trained on synthetic data."
        .to_string(),
      footer: "Made with ❤️ for the Synthetic 2 Real Challenge".to_string(),
      empty_message: "No soup cans detected".to_string(),
    }
  }
}

/// 页面主体：初始页面、处理结果或错误信息
pub enum PageBody<'a> {
  Empty,
  Result(&'a RenderedResult),
  Error(&'a str),
}

pub fn render_page(config: &PageConfig, body: PageBody<'_>) -> Result<String, OutputError> {
  let mut html = String::with_capacity(4096);

  write!(
    html,
    concat!(
      "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n",
      "<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n",
      "<title>{title}</title>\n<style>{style}</style>\n</head>\n<body>\n<div class=\"main\">\n",
      "<div class=\"title\">{title}</div>\n<div class=\"subtitle\">{subtitle}</div>\n",
      "<div class=\"uploader\">\n",
      "<form action=\"/upload\" method=\"post\" enctype=\"multipart/form-data\">\n",
      "<label for=\"image\">📷 Upload an image (JPG/PNG)</label><br>\n",
      "<input type=\"file\" id=\"image\" name=\"image\" accept=\".jpg,.jpeg,.png,image/jpeg,image/png\" ",
      "required onchange=\"this.form.submit()\">\n",
      "<noscript><button type=\"submit\">Detect</button></noscript>\n",
      "</form>\n</div>\n"
    ),
    title = escape_html(&config.title),
    subtitle = escape_html(&config.subtitle),
    style = STYLE,
  )?;

  match body {
    PageBody::Empty => {}
    PageBody::Error(message) => {
      writeln!(
        html,
        "<div class=\"result-box\"><p class=\"error\">⚠️ {}</p></div>",
        escape_html(message)
      )?;
    }
    PageBody::Result(result) => render_result(&mut html, config, result)?,
  }

  write!(
    html,
    "<div class=\"footer\">{}</div>\n</div>\n</body>\n</html>\n",
    escape_html(&config.footer)
  )?;

  Ok(html)
}

fn render_result(
  html: &mut String,
  config: &PageConfig,
  result: &RenderedResult,
) -> Result<(), OutputError> {
  write!(
    html,
    concat!(
      "<div class=\"columns\">\n",
      "<figure><img src=\"{}\" alt=\"Uploaded Image\"><figcaption>Uploaded Image</figcaption></figure>\n",
      "<figure><img src=\"{}\" alt=\"Detection Result\"><figcaption>Detection Result</figcaption></figure>\n",
      "</div>\n"
    ),
    to_data_uri(&result.original)?,
    to_data_uri(&result.annotated)?,
  )?;

  html.push_str("<div class=\"result-box\">\n<h3>📋 Prediction Details</h3>\n");
  for entry in &result.records {
    match entry {
      RecordEntry::NoDetections => {
        writeln!(
          html,
          "<p class=\"no-detections\">{}</p>",
          escape_html(&config.empty_message)
        )?;
      }
      RecordEntry::Detection(record) => render_record(html, record)?,
    }
  }
  html.push_str("</div>\n");

  Ok(())
}

fn render_record(html: &mut String, record: &DetectionRecord) -> fmt::Result {
  write!(
    html,
    concat!(
      "<div class=\"detection\">\n",
      "<strong>Detection {index}</strong>\n<ul>\n",
      "<li><strong>Class</strong>: <code>{class_id}</code></li>\n",
      "<li><strong>Confidence</strong>: <code>{confidence}</code></li>\n",
      "<li><strong>Box coordinates (x,y,width,height)</strong>: <code>{xywh:?}</code></li>\n",
      "</ul>\n",
      "<div class=\"bar\">",
      "<div class=\"bar-fill\" style=\"width: {percent}%;\"></div>",
      "<span class=\"bar-label\">{percent:.1}%</span>",
      "</div>\n</div>\n"
    ),
    index = record.index,
    class_id = record.class_id,
    confidence = record.confidence_text,
    xywh = record.xywh,
    percent = record.percent,
  )
}

pub fn escape_html(text: &str) -> String {
  let mut escaped = String::with_capacity(text.len());
  for c in text.chars() {
    match c {
      '&' => escaped.push_str("&amp;"),
      '<' => escaped.push_str("&lt;"),
      '>' => escaped.push_str("&gt;"),
      '"' => escaped.push_str("&quot;"),
      '\'' => escaped.push_str("&#39;"),
      _ => escaped.push(c),
    }
  }
  escaped
}
