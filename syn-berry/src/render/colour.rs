//! 标签切片的彩色编码与标记点绘制.

use image::{Rgb, RgbImage, Rgba, RgbaImage};
use imageproc::drawing::draw_filled_circle_mut;
use ndarray::ArrayView2;

use crate::config::{MarkerStyle, PolarityColors};
use crate::consts::polarity::{is_post, is_pre};
use crate::consts::rgb::{self, Rgb as RgbTriple};

/// 极性切片 -> RGB. 突触前后各一种颜色, 背景为黑.
pub fn encode_polarity(slice: ArrayView2<u8>, colors: &PolarityColors) -> RgbImage {
    let (height, width) = slice.dim();
    RgbImage::from_fn(width as u32, height as u32, |x, y| {
        let p = slice[(y as usize, x as usize)];
        Rgb(if is_pre(p) {
            colors.pre
        } else if is_post(p) {
            colors.post
        } else {
            rgb::BLACK
        })
    })
}

/// 一个待绘制的标记点, 坐标为输出切片上的 `(row, col)` 与绝对切片号.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Marker {
    /// 输出切片上的位置 `(row, col)`.
    pub at: (f64, f64),
    /// 所在的绝对切片号.
    pub z: i64,
    /// `[中心切片, 相邻切片]` 两种颜色.
    pub colors: [RgbTriple; 2],
}

impl Marker {
    /// 第 `z` 张切片上应使用的颜色. 超出圆柱深度时返回 `None`.
    pub fn color_at(&self, z: i64, depth: usize) -> Option<RgbTriple> {
        match (z - self.z).unsigned_abs() as usize {
            0 => Some(self.colors[0]),
            d if d <= depth => Some(self.colors[1]),
            _ => None,
        }
    }
}

/// 在第 `z` 张切片上绘制圆柱标记的截面. 越出图像的部分被自动裁掉.
pub fn draw_markers(img: &mut RgbImage, z: i64, markers: &[Marker], style: &MarkerStyle) {
    for m in markers {
        if let Some(c) = m.color_at(z, style.depth) {
            let (row, col) = m.at;
            let center = (col.round() as i32, row.round() as i32);
            draw_filled_circle_mut(img, center, style.radius as i32, Rgb(c));
        }
    }
}

/// RGB -> RGBA. 纯黑像素完全透明, 其余不透明.
pub fn with_alpha(img: &RgbImage) -> RgbaImage {
    RgbaImage::from_fn(img.width(), img.height(), |x, y| {
        let Rgb([r, g, b]) = *img.get_pixel(x, y);
        let alpha = if [r, g, b] == rgb::BLACK { 0 } else { u8::MAX };
        Rgba([r, g, b, alpha])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::polarity::{BACKGROUND, POST, PRE};
    use ndarray::Array2;

    #[test]
    fn test_encode_and_alpha() {
        let a = Array2::from_shape_vec((1, 3), vec![BACKGROUND, PRE, POST]).unwrap();
        let img = encode_polarity(a.view(), &PolarityColors::default());
        assert_eq!(img.get_pixel(1, 0), &Rgb(rgb::MAGENTA));
        assert_eq!(img.get_pixel(2, 0), &Rgb(rgb::CYAN));

        let rgba = with_alpha(&img);
        assert_eq!(rgba.get_pixel(0, 0).0[3], 0);
        assert_eq!(rgba.get_pixel(1, 0), &Rgba([255, 0, 255, 255]));
    }

    #[test]
    fn test_marker_depth() {
        let style = MarkerStyle {
            radius: 1,
            ..Default::default()
        };
        let m = Marker {
            at: (4.0, 2.0),
            z: 10,
            colors: style.pre_colors,
        };
        assert_eq!(m.color_at(10, 1), Some(rgb::PRE_MARKER));
        assert_eq!(m.color_at(9, 1), Some(rgb::PRE_MARKER_DIM));
        assert_eq!(m.color_at(12, 1), None);

        let mut img = RgbImage::new(8, 8);
        draw_markers(&mut img, 10, &[m], &style);
        // 圆心在 (x = 2, y = 4).
        assert_eq!(img.get_pixel(2, 4), &Rgb(rgb::PRE_MARKER));
        assert_eq!(img.get_pixel(2, 5), &Rgb(rgb::PRE_MARKER));
        assert_eq!(img.get_pixel(6, 0), &Rgb(rgb::BLACK));

        let mut far = RgbImage::new(8, 8);
        draw_markers(&mut far, 13, &[m], &style);
        assert!(far.pixels().all(|p| p.0 == rgb::BLACK));
    }
}
