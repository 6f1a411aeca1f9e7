//! 包围盒几何.
//!
//! 本模块全部是纯函数, 不做任何 I/O. 约定:
//!
//! 1. [`tight_bbox`] 返回闭区间 `[min, max]`.
//! 2. [`resize_to`] 与 [`Region3`] 使用半开区间 `[lo, hi)`, 且允许越出体数据范围 (有符号).

use ndarray::{ArrayBase, Axis as NdAxis, Data, RemoveAxis};
use num::Zero;

use crate::error::GeometryError;

mod region;

pub use region::{intersect_and_pad, Padding, Region3};

/// 计算 N 维掩码的紧包围盒.
///
/// 对于每一个轴, 将数组在其余所有轴上做逻辑或归约, 然后取非零投影的首末下标.
///
/// # 返回值
///
/// 每个轴一个闭区间 `(min, max)`. 掩码全零时返回 [`GeometryError::EmptyMask`].
pub fn tight_bbox<A, S, D>(mask: &ArrayBase<S, D>) -> Result<Vec<(usize, usize)>, GeometryError>
where
    A: Zero + PartialEq,
    S: Data<Elem = A>,
    D: RemoveAxis,
{
    tight_bbox_by(mask, |v| !v.is_zero())
}

/// 与 [`tight_bbox`] 相同, 但由 `pred` 决定元素是否属于前景.
pub fn tight_bbox_by<A, S, D, F>(
    mask: &ArrayBase<S, D>,
    pred: F,
) -> Result<Vec<(usize, usize)>, GeometryError>
where
    S: Data<Elem = A>,
    D: RemoveAxis,
    F: Fn(&A) -> bool,
{
    let mut bbox = Vec::with_capacity(mask.ndim());
    for ax in 0..mask.ndim() {
        let mut hits = mask
            .axis_iter(NdAxis(ax))
            .enumerate()
            .filter(|(_, lane)| lane.iter().any(&pred))
            .map(|(i, _)| i);
        let Some(first) = hits.next() else {
            return Err(GeometryError::EmptyMask);
        };
        let last = hits.last().unwrap_or(first);
        bbox.push((first, last));
    }
    Ok(bbox)
}

/// 三维特化: 直接返回 `(z, y, x)` 三个闭区间.
#[inline]
pub fn tight_bbox_3d<A, S>(
    mask: &ArrayBase<S, ndarray::Ix3>,
) -> Result<[(usize, usize); 3], GeometryError>
where
    A: Zero + PartialEq,
    S: Data<Elem = A>,
{
    let b = tight_bbox(mask)?;
    Ok([b[0], b[1], b[2]])
}

/// 将一维区间重新居中为长度恰好为 `target` 的半开区间 `[lo, lo + target)`.
///
/// 跨度按 `high - low` 计. 半差 `|target - span| / 2` 向下取整, 因此整数除法的偏差总是偏向下界.
/// 原跨度不小于 `target` 时对称收缩, 否则对称扩张. 结果可能越出体数据范围,
/// 交由 [`intersect_and_pad`] 处理.
///
/// # 注意
///
/// `high < low` 时返回 [`GeometryError::InvertedSpan`].
pub fn resize_to(low: i64, high: i64, target: usize) -> Result<(i64, i64), GeometryError> {
    if high < low {
        return Err(GeometryError::InvertedSpan { low, high });
    }
    let span = high - low;
    let target = target as i64;
    let diff = (target - span).abs() / 2;
    let lo = if span >= target { low + diff } else { low - diff };
    Ok((lo, lo + target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array3};

    #[test]
    fn test_tight_bbox_single_voxel() {
        let mut mask = Array3::<u8>::zeros((10, 10, 10));
        mask[(5, 5, 5)] = 1;
        assert_eq!(tight_bbox(&mask).unwrap(), vec![(5, 5); 3]);
        assert_eq!(tight_bbox_3d(&mask).unwrap(), [(5, 5); 3]);
    }

    #[test]
    fn test_tight_bbox_2d() {
        let mut mask = Array2::<u32>::zeros((6, 9));
        mask[(1, 7)] = 3;
        mask[(4, 2)] = 8;
        assert_eq!(tight_bbox(&mask).unwrap(), vec![(1, 4), (2, 7)]);
    }

    #[test]
    fn test_tight_bbox_by_bool() {
        let mut mask = Array3::from_elem((4, 4, 4), false);
        mask[(0, 3, 1)] = true;
        mask[(2, 0, 1)] = true;
        assert_eq!(
            tight_bbox_by(&mask, |&b| b).unwrap(),
            vec![(0, 2), (0, 3), (1, 1)]
        );
    }

    #[test]
    fn test_tight_bbox_empty() {
        let mask = Array3::<u8>::zeros((3, 3, 3));
        assert_eq!(tight_bbox(&mask), Err(GeometryError::EmptyMask));
    }

    #[test]
    fn test_resize_to_exact_length_and_center() {
        for low in -5..20i64 {
            for high in low..low + 30 {
                for target in 1..40usize {
                    let (lo, hi) = resize_to(low, high, target).unwrap();
                    assert_eq!(hi - lo, target as i64);
                    // 中心以两倍值比较, 避免小数.
                    let before = low + high;
                    let after = lo + hi;
                    assert!(
                        (before - after).abs() <= 2,
                        "[{low}, {high}] -> [{lo}, {hi}) (target = {target})"
                    );
                }
            }
        }
    }

    #[test]
    fn test_resize_to_examples() {
        // 扩张.
        assert_eq!(resize_to(7, 13, 12), Ok((4, 16)));
        // 收缩.
        assert_eq!(resize_to(0, 20, 10), Ok((5, 15)));
        // 单点.
        assert_eq!(resize_to(5, 5, 1), Ok((5, 6)));
        // 奇偶差向下取整.
        assert_eq!(resize_to(0, 3, 6), Ok((-1, 5)));
        assert_eq!(
            resize_to(3, 1, 4),
            Err(GeometryError::InvertedSpan { low: 3, high: 1 })
        );
    }
}
