//! 标签重采样.
//!
//! 图像与标签来自分辨率不同的存储时, 标签裁剪需要缩放到图像裁剪的形状.
//! 非零掩码做三线性插值后以 0.5 为阈值二值化 (放大与缩小相同), 保证实例边界不会被拉伸或截断.

use ndarray::{Array3, ArrayView3};

use crate::consts::RESAMPLE_THRESHOLD;
use crate::Idx3d;

/// 输出下标 `i` 在输入轴上的连续坐标 (像素中心对齐), 已截断到 `[0, n_in - 1]`.
#[inline]
fn source_coord(i: usize, n_in: usize, n_out: usize) -> f64 {
    let c = (i as f64 + 0.5) * n_in as f64 / n_out as f64 - 0.5;
    c.clamp(0.0, (n_in - 1) as f64)
}

/// 一维线性插值的两个下标与权重 `(lo, hi, t)`.
#[inline]
fn lerp_taps(c: f64, n_in: usize) -> (usize, usize, f64) {
    let lo = c.floor() as usize;
    let hi = (lo + 1).min(n_in - 1);
    (lo, hi, c - lo as f64)
}

/// 非零掩码的三线性重采样, 以 0.5 为阈值二值化.
///
/// # 注意
///
/// 输入或目标形状任意一维为 0 时 panic.
pub fn resample_binary<T>(label: ArrayView3<T>, shape: Idx3d) -> Array3<bool>
where
    T: Copy + PartialEq + Default,
{
    let (iz, iy, ix) = label.dim();
    assert!(iz * iy * ix > 0 && shape.0 * shape.1 * shape.2 > 0);
    if label.dim() == shape {
        return label.mapv(|v| v != T::default());
    }
    let zero = T::default();
    let fg = |z: usize, y: usize, x: usize| -> f64 {
        if label[(z, y, x)] != zero {
            1.0
        } else {
            0.0
        }
    };
    Array3::from_shape_fn(shape, |(z, y, x)| {
        let (z0, z1, tz) = lerp_taps(source_coord(z, iz, shape.0), iz);
        let (y0, y1, ty) = lerp_taps(source_coord(y, iy, shape.1), iy);
        let (x0, x1, tx) = lerp_taps(source_coord(x, ix, shape.2), ix);
        let plane = |z: usize| {
            let top = fg(z, y0, x0) * (1.0 - tx) + fg(z, y0, x1) * tx;
            let bottom = fg(z, y1, x0) * (1.0 - tx) + fg(z, y1, x1) * tx;
            top * (1.0 - ty) + bottom * ty
        };
        let v = plane(z0) * (1.0 - tz) + plane(z1) * tz;
        v > RESAMPLE_THRESHOLD as f64
    })
}

/// 保留标签值的重采样: 前景由 [`resample_binary`] 决定, 每个前景体素取最近邻源体素的值.
///
/// 最近邻源体素恰好为背景时, 取其 26-邻域中第一个非零值, 仍然找不到则视为背景.
pub fn resample_labels(label: ArrayView3<u32>, shape: Idx3d) -> Array3<u32> {
    if label.dim() == shape {
        return label.to_owned();
    }
    let (iz, iy, ix) = label.dim();
    let mask = resample_binary(label, shape);
    let nearest = |i: usize, n_in: usize, n_out: usize| source_coord(i, n_in, n_out).round() as usize;
    Array3::from_shape_fn(shape, |(z, y, x)| {
        if !mask[(z, y, x)] {
            return 0;
        }
        let (sz, sy, sx) = (
            nearest(z, iz, shape.0),
            nearest(y, iy, shape.1),
            nearest(x, ix, shape.2),
        );
        let v = label[(sz, sy, sx)];
        if v != 0 {
            return v;
        }
        let around = |c: usize, n: usize| c.saturating_sub(1)..(c + 2).min(n);
        itertools::iproduct!(around(sz, iz), around(sy, iy), around(sx, ix))
            .map(|p| label[p])
            .find(|&v| v != 0)
            .unwrap_or(0)
    })
}
