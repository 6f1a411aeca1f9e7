//! 裁剪与填充.
//!
//! 按照可能越界的区域从数组中裁剪出子数组, 用可选的实例掩码抹去邻居,
//! 再用常量填充到请求的精确尺寸. 全部是纯变换.

use ndarray::{s, Array2, Array3, ArrayView2, ArrayView3, Axis as NdAxis};

use crate::error::GeometryError;
use crate::geometry::{intersect_and_pad, Padding, Region3};
use crate::{Idx2d, Idx3d};

/// 用常量 `value` 在三个轴的两侧填充 `array`.
pub fn pad_3d<T: Copy>(array: ArrayView3<T>, padding: &Padding, value: T) -> Array3<T> {
    let (z, y, x) = array.dim();
    let mut out = Array3::from_elem(padding.padded_shape((z, y, x)), value);
    let [(z0, _), (y0, _), (x0, _)] = padding.pairs;
    out.slice_mut(s![z0..z0 + z, y0..y0 + y, x0..x0 + x])
        .assign(&array);
    out
}

/// 从 `volume` 中裁剪 `requested` 区域.
///
/// 1. 区域越界的部分以 `value` 填充, 输出形状恰好等于 `requested.shape()`.
/// 2. 若给出 `mask` (形状必须与 `volume` 相同), 掩码为 `false` 的体素被置为 `value`.
///
/// # 返回值
///
/// 裁剪结果以及实际使用的填充量. 区域完全位于体数据内时填充量为 0.
pub fn crop_pad_3d<T: Copy>(
    volume: ArrayView3<T>,
    requested: &Region3,
    value: T,
    mask: Option<ArrayView3<bool>>,
) -> Result<(Array3<T>, Padding), GeometryError> {
    let shape: Idx3d = volume.dim();
    if let Some(m) = mask.as_ref() {
        assert_eq!(m.dim(), shape, "掩码形状与体数据不一致");
    }
    let (clamped, padding) = intersect_and_pad(requested, shape, None)?;
    let [zr, yr, xr] = [0, 1, 2].map(|ax| clamped.lo[ax] as usize..clamped.hi[ax] as usize);

    let mut cropped = volume.slice(s![zr.clone(), yr.clone(), xr.clone()]).to_owned();
    if let Some(m) = mask {
        cropped.zip_mut_with(&m.slice(s![zr, yr, xr]), |v, &keep| {
            if !keep {
                *v = value;
            }
        });
    }
    Ok((pad_3d(cropped.view(), &padding, value), padding))
}

/// 二维版本: 在第 `z` 张切片上裁剪 `(y, x)` 两个半开区间.
///
/// `mask` 若存在则是该切片的二维掩码.
pub fn crop_pad_2d<T: Copy>(
    volume: ArrayView3<T>,
    z: usize,
    box2d: [(i64, i64); 2],
    value: T,
    mask: Option<ArrayView2<bool>>,
) -> Result<(Array2<T>, [(usize, usize); 2]), GeometryError> {
    let [(y0, y1), (x0, x1)] = box2d;
    let slice = volume.slice(s![z..z + 1, .., ..]);
    let requested = Region3::new([0, y0, x0], [1, y1, x1])?;
    let mask = mask.map(|m| m.insert_axis(NdAxis(0)));
    let (out, padding) = crop_pad_3d(slice, &requested, value, mask)?;
    let [_, py, px] = padding.pairs;
    Ok((out.index_axis_move(NdAxis(0), 0), [py, px]))
}

/// 以中心对齐的方式从 `slice` 中裁出 `(h, w)`.
///
/// # 注意
///
/// `slice` 的每一维都必须不小于目标尺寸.
pub fn center_crop<T: Clone>(slice: ArrayView2<T>, (h, w): Idx2d) -> Array2<T> {
    let (big_h, big_w) = slice.dim();
    assert!(big_h >= h && big_w >= w, "中心裁剪尺寸大于原图");
    let (top, left) = ((big_h - h) / 2, (big_w - w) / 2);
    slice.slice(s![top..top + h, left..left + w]).to_owned()
}
