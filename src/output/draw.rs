// 该文件是 Tangguan （汤罐） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use std::path::Path;

use ab_glyph::{FontArc, InvalidFont, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use thiserror::Error;
use tracing::info;

use crate::model::{Detection, DetectionSet};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const LABEL_TEXT_HORIZONTAL_PADDING: i32 = 4;
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const BOX_THICKNESS: i32 = 2;
const PALETTE_SIZE: usize = 20;

#[derive(Error, Debug)]
pub enum FontError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体文件无效: {0}")]
  InvalidFont(#[from] InvalidFont),
}

/// 读取 TrueType 字体文件
pub fn load_font(path: &Path) -> Result<FontArc, FontError> {
  let data = std::fs::read(path)?;
  let font = FontArc::try_from_vec(data)?;
  info!("加载标签字体: {}", path.display());
  Ok(font)
}

/// 检测框绘制器
///
/// 没有字体时只画边框，不画标签。
#[derive(Clone)]
pub struct Draw {
  font: Option<FontArc>,
  font_size: f32,
  label_text_height: i32,
  names: Vec<String>,
  colors: Vec<Rgb<u8>>,
}

impl Default for Draw {
  fn default() -> Self {
    let colors = (0..PALETTE_SIZE)
      .map(|i| hsv_to_rgb((i as f32 / PALETTE_SIZE as f32) * 360.0, 0.8, 0.9))
      .collect();

    Self {
      font: None,
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      names: Vec::new(),
      colors,
    }
  }
}

impl Draw {
  pub fn with_font(mut self, font: Option<FontArc>) -> Self {
    self.font = font;
    self
  }

  pub fn with_names(mut self, names: Vec<String>) -> Self {
    self.names = names;
    self
  }

  pub fn color_of(&self, class_id: u32) -> Rgb<u8> {
    self.colors[class_id as usize % self.colors.len()]
  }

  /// 标签文本：有类别名时用类别名，否则用类别编号
  pub fn label(&self, detection: &Detection) -> String {
    let name = self
      .names
      .get(detection.class_id as usize)
      .cloned()
      .unwrap_or_else(|| detection.class_id.to_string());
    format!("{} {:.2}", name, detection.confidence)
  }

  /// 在图像副本上绘制检测结果
  pub fn plot(&self, image: &RgbImage, detections: &DetectionSet) -> RgbImage {
    let mut canvas = image.clone();
    self.draw_detections_on_image(&mut canvas, detections);
    canvas
  }

  pub fn draw_detections_on_image(&self, image: &mut RgbImage, detections: &DetectionSet) {
    for detection in detections {
      self.draw_bbox_with_label(image, detection);
    }
  }

  fn draw_bbox_with_label(&self, image: &mut RgbImage, detection: &Detection) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    let color = self.color_of(detection.class_id);
    let [x_min, y_min, x_max, y_max] = detection.corners();

    let x_min = (x_min.floor() as i32).clamp(0, w - 1);
    let y_min = (y_min.floor() as i32).clamp(0, h - 1);
    let x_max = (x_max.ceil() as i32).clamp(0, w - 1);
    let y_max = (y_max.ceil() as i32).clamp(0, h - 1);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    // 边框加粗，向内收缩
    for thickness in 0..BOX_THICKNESS {
      let left = (x_min + thickness).min(x_max);
      let top = (y_min + thickness).min(y_max);
      let right = (x_max - thickness).max(left);
      let bottom = (y_max - thickness).max(top);

      for x in left..=right {
        image.put_pixel(x as u32, top as u32, color);
        image.put_pixel(x as u32, bottom as u32, color);
      }
      for y in top..=bottom {
        image.put_pixel(left as u32, y as u32, color);
        image.put_pixel(right as u32, y as u32, color);
      }
    }

    let Some(font) = &self.font else {
      return;
    };

    let label = self.label(detection);
    let scale = PxScale::from(self.font_size);
    let (text_width, _) = text_size(scale, font, &label);

    // 标签放在边框上方，放不下时贴住图像顶部
    let label_x = x_min;
    let label_y = (y_min - self.label_text_height).max(0);
    let label_width = (text_width as i32 + 2 * LABEL_TEXT_HORIZONTAL_PADDING).min(w - label_x);
    let label_height = self.label_text_height.min(h - label_y);

    if label_width <= 0 || label_height <= 0 {
      return;
    }

    let rect = Rect::at(label_x, label_y).of_size(label_width as u32, label_height as u32);
    draw_filled_rect_mut(image, rect, color);
    draw_text_mut(
      image,
      Rgb([255u8, 255u8, 255u8]),
      label_x + LABEL_TEXT_HORIZONTAL_PADDING,
      label_y + LABEL_TEXT_VERTICAL_PADDING,
      scale,
      font,
      &label,
    );
  }
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = if h < 60.0 {
    (c, x, 0.0)
  } else if h < 120.0 {
    (x, c, 0.0)
  } else if h < 180.0 {
    (0.0, c, x)
  } else if h < 240.0 {
    (0.0, x, c)
  } else if h < 300.0 {
    (x, 0.0, c)
  } else {
    (c, 0.0, x)
  };

  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}
