//! 旋转对齐估计.
//!
//! 在中间切片上, 将突触前后两侧分别用 3 x 3 方形结构元膨胀, 取交叠区域 (即突触间隙附近),
//! 对其像素坐标做直线拟合. 拟合 `列 = 斜率 * 行 + 截距`, 角度 `atan(斜率)` 即该直线相对竖直方向的偏转.
//! 将切片按 `-角度` 旋转后, 间隙变为竖直.
//!
//! 角度的约定: 以屏幕上的 **逆时针** 为正 (行坐标向下).

use std::fmt;
use std::str::FromStr;

use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use imageproc::morphology::dilate;
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::consts::polarity::{self, BACKGROUND};
use crate::consts::{MIN_OVERLAP_PIXELS, POLARITY_DILATION_RADIUS};
use crate::data::slice::{binary_gray, from_gray, to_gray};
use crate::error::{ConfigError, GeometryError};
use crate::Idx2d;

pub mod regression;

/// 拟合方式.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegressionMode {
    /// 普通最小二乘.
    #[default]
    Linear,

    /// Siegel 重复中位数.
    Siegel,

    /// Theil-Sen.
    Theil,
}

impl RegressionMode {
    /// 对点集 `(xs, ys)` 拟合斜率. `x` 全相同时返回 `None`.
    pub fn slope(self, xs: &[f64], ys: &[f64]) -> Option<f64> {
        match self {
            RegressionMode::Linear => regression::ols(xs, ys),
            RegressionMode::Siegel => regression::siegel(xs, ys),
            RegressionMode::Theil => regression::theil_sen(xs, ys),
        }
    }
}

impl FromStr for RegressionMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linear" => Ok(RegressionMode::Linear),
            "siegel" => Ok(RegressionMode::Siegel),
            "theil" => Ok(RegressionMode::Theil),
            other => Err(ConfigError::UnknownRegression(other.to_string())),
        }
    }
}

impl fmt::Display for RegressionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RegressionMode::Linear => "linear",
            RegressionMode::Siegel => "siegel",
            RegressionMode::Theil => "theil",
        };
        f.write_str(s)
    }
}

/// 旋转估计结果.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RotationEstimate {
    /// 拟合直线相对竖直方向的角度 (度), 范围 `[-90, 90]`.
    pub angle: f64,

    /// 拟合斜率 `d列 / d行`. 水平直线为无穷大.
    pub slope: f64,

    /// 两侧膨胀后交叠区域的像素数.
    pub overlap: usize,

    /// 是否使用了交叠区域 (否则退化为整个实例掩码).
    pub used_overlap: bool,
}

/// 估计极性切片的旋转角.
///
/// 交叠区域像素数不超过 [`MIN_OVERLAP_PIXELS`] 时, 改用整个非背景区域拟合.
///
/// # 注意
///
/// 1. 只有一个点时斜率为 0, 角度为 0.
/// 2. 所有点位于同一行但跨越多列时, 视为水平直线, 角度为 90.
/// 3. 切片全是背景时返回 [`GeometryError::EmptyMask`].
pub fn estimate(
    polarity: ArrayView2<u8>,
    mode: RegressionMode,
) -> Result<RotationEstimate, GeometryError> {
    let pre = dilate(
        &binary_gray(polarity, polarity::is_pre),
        Norm::LInf,
        POLARITY_DILATION_RADIUS,
    );
    let post = dilate(
        &binary_gray(polarity, polarity::is_post),
        Norm::LInf,
        POLARITY_DILATION_RADIUS,
    );
    let overlap: Vec<Idx2d> = pre
        .enumerate_pixels()
        .filter(|&(x, y, p)| p.0[0] != 0 && post.get_pixel(x, y).0[0] != 0)
        .map(|(x, y, _)| (y as usize, x as usize))
        .collect();

    let used_overlap = overlap.len() > MIN_OVERLAP_PIXELS;
    let points: Vec<Idx2d> = if used_overlap {
        overlap.clone()
    } else {
        polarity
            .indexed_iter()
            .filter(|&(_, &p)| p != BACKGROUND)
            .map(|(pos, _)| pos)
            .collect()
    };
    if points.is_empty() {
        return Err(GeometryError::EmptyMask);
    }

    let rows: Vec<f64> = points.iter().map(|&(h, _)| h as f64).collect();
    let cols: Vec<f64> = points.iter().map(|&(_, w)| w as f64).collect();
    let slope = match mode.slope(&rows, &cols) {
        Some(s) => s,
        None if cols.iter().any(|&c| c != cols[0]) => f64::INFINITY,
        None => 0.0,
    };
    Ok(RotationEstimate {
        angle: slope.atan().to_degrees(),
        slope,
        overlap: overlap.len(),
        used_overlap,
    })
}

/// 以画布中心 `(w / 2, h / 2)` 为轴逆时针旋转灰度切片, 双线性插值, 空白处填 `fill`.
pub fn rotate_image(slice: ArrayView2<u8>, degrees: f64, fill: u8) -> Array2<u8> {
    rotate_with(slice, degrees, Interpolation::Bilinear, fill)
}

/// 以画布中心逆时针旋转标签切片, 最近邻插值以保持类别值不变.
pub fn rotate_labels(slice: ArrayView2<u8>, degrees: f64) -> Array2<u8> {
    rotate_with(slice, degrees, Interpolation::Nearest, BACKGROUND)
}

fn rotate_with(slice: ArrayView2<u8>, degrees: f64, interp: Interpolation, fill: u8) -> Array2<u8> {
    if degrees == 0.0 {
        return slice.to_owned();
    }
    let img: GrayImage = to_gray(slice);
    // `imageproc` 以顺时针为正.
    let theta = -(degrees.to_radians() as f32);
    from_gray(&rotate_about_center(&img, theta, interp, Luma([fill])))
}

/// 旋转后突触前是否位于突触后右侧? 是则需要额外旋转 180 度, 使突触前统一在左.
///
/// 任一侧缺失时不翻转.
pub fn needs_flip(rotated: ArrayView2<u8>) -> bool {
    let mean_col = |pred: fn(u8) -> bool| {
        let (sum, cnt) = rotated
            .indexed_iter()
            .filter(|&(_, &p)| pred(p))
            .fold((0.0f64, 0usize), |(s, c), ((_, w), _)| (s + w as f64, c + 1));
        (cnt != 0).then(|| sum / cnt as f64)
    };
    match (mean_col(polarity::is_pre), mean_col(polarity::is_post)) {
        (Some(pre), Some(post)) => pre > post,
        _ => false,
    }
}

/// 计算实际施加的旋转角: 先按 `-angle` 对齐, 再按极性决定是否追加 180 度.
pub fn canonical_polarity(polarity: ArrayView2<u8>, angle: f64) -> f64 {
    // 避免 `-0.0`.
    let applied = if angle == 0.0 { 0.0 } else { -angle };
    if needs_flip(rotate_labels(polarity, applied).view()) {
        applied + 180.0
    } else {
        applied
    }
}

/// 将 `(h, w)` 画布上的点 `(row, col)` 绕画布中心逆时针旋转 `degrees`.
///
/// 与 [`rotate_image`] 使用同一个中心, 因此可以直接用于标记点.
pub fn rotate_point((row, col): (f64, f64), degrees: f64, (h, w): Idx2d) -> (f64, f64) {
    let (cy, cx) = (h as f64 / 2.0, w as f64 / 2.0);
    let (sin, cos) = degrees.to_radians().sin_cos();
    let (dr, dc) = (row - cy, col - cx);
    (cy + dr * cos - dc * sin, cx + dc * cos + dr * sin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::polarity::{POST, PRE};

    /// 沿直线 `col = c0 + slope * (row - r0)` 两侧分别放置突触前后像素.
    fn cleft(size: usize, slope: f64) -> Array2<u8> {
        let c = size as f64 / 2.0;
        Array2::from_shape_fn((size, size), |(h, w)| {
            let line = c + slope * (h as f64 - c);
            let d = w as f64 - line;
            let r = ((h as f64 - c).powi(2) + (w as f64 - c).powi(2)).sqrt();
            if r > size as f64 / 3.0 {
                BACKGROUND
            } else if (-3.0..0.0).contains(&d) {
                PRE
            } else if (0.0..3.0).contains(&d) {
                POST
            } else {
                BACKGROUND
            }
        })
    }

    #[test]
    fn test_regression_mode_parse() {
        assert_eq!("siegel".parse::<RegressionMode>().unwrap(), RegressionMode::Siegel);
        assert_eq!(RegressionMode::Theil.to_string(), "theil");
        assert!(matches!(
            "median".parse::<RegressionMode>(),
            Err(ConfigError::UnknownRegression(_))
        ));
    }

    #[test]
    fn test_estimate_vertical_cleft() {
        let est = estimate(cleft(40, 0.0).view(), RegressionMode::Linear).unwrap();
        assert!(est.used_overlap);
        assert!(est.angle.abs() < 1.0, "{est:?}");
    }

    #[test]
    fn test_estimate_tilted_cleft() {
        for mode in [
            RegressionMode::Linear,
            RegressionMode::Siegel,
            RegressionMode::Theil,
        ] {
            let est = estimate(cleft(40, 1.0).view(), mode).unwrap();
            assert!((est.angle - 45.0).abs() < 3.0, "{mode}: {est:?}");
        }
    }

    #[test]
    fn test_invariant_under_point_reflection() {
        let a = cleft(41, 0.6);
        let mut b = a.clone();
        b.invert_axis(ndarray::Axis(0));
        b.invert_axis(ndarray::Axis(1));
        for mode in [RegressionMode::Linear, RegressionMode::Theil] {
            let ea = estimate(a.view(), mode).unwrap();
            let eb = estimate(b.view(), mode).unwrap();
            assert!((ea.angle.rem_euclid(180.0) - eb.angle.rem_euclid(180.0)).abs() < 1e-6);
        }
    }

    #[test]
    fn test_degenerate_inputs() {
        let mut a = Array2::<u8>::zeros((5, 5));
        assert_eq!(
            estimate(a.view(), RegressionMode::Linear),
            Err(GeometryError::EmptyMask)
        );

        a[(2, 2)] = PRE;
        let est = estimate(a.view(), RegressionMode::Linear).unwrap();
        assert_eq!(est.angle, 0.0);
        assert!(!est.used_overlap);

        a[(2, 3)] = POST;
        a[(2, 4)] = POST;
        let est = estimate(a.view(), RegressionMode::Theil).unwrap();
        assert!((est.angle - 90.0).abs() < 1e-9);
        assert_eq!(est.slope, f64::INFINITY);
    }

    #[test]
    fn test_alignment_makes_cleft_vertical() {
        let a = cleft(60, -0.8);
        let est = estimate(a.view(), RegressionMode::Linear).unwrap();
        let applied = canonical_polarity(a.view(), est.angle);
        let rotated = rotate_labels(a.view(), applied);
        let again = estimate(rotated.view(), RegressionMode::Linear).unwrap();
        assert!(again.angle.abs() < 3.0, "{again:?}");
        assert!(!needs_flip(rotated.view()));
    }

    #[test]
    fn test_flip_puts_pre_on_left() {
        // 突触前在右.
        let mut a = Array2::<u8>::zeros((20, 20));
        a.slice_mut(ndarray::s![5..15, 11..14]).fill(PRE);
        a.slice_mut(ndarray::s![5..15, 7..10]).fill(POST);
        let applied = canonical_polarity(a.view(), 0.0);
        assert_eq!(applied, 180.0);
        assert!(!needs_flip(rotate_labels(a.view(), applied).view()));
    }

    #[test]
    fn test_rotate_point() {
        // 逆时针 90 度: 中心正下方的点转到正右方.
        let (r, c) = rotate_point((15.0, 10.0), 90.0, (20, 20));
        assert!((r - 10.0).abs() < 1e-9 && (c - 15.0).abs() < 1e-9);
        let (r, c) = rotate_point((3.0, 4.0), 0.0, (20, 20));
        assert_eq!((r, c), (3.0, 4.0));
    }

    #[test]
    fn test_rotate_labels_matches_rotate_point() {
        let mut a = Array2::<u8>::zeros((21, 21));
        a[(15, 10)] = POST;
        let rotated = rotate_labels(a.view(), 90.0);
        let (r, c) = rotate_point((15.0, 10.0), 90.0, (21, 21));
        let (r, c) = (r.round() as usize, c.round() as usize);
        assert_eq!(rotated[(r, c)], POST);
        assert_eq!(rotated.iter().filter(|&&p| p == POST).count(), 1);
    }
}
