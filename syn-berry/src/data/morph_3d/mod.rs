//! 3D 形态学操作.
//!
//! 提供实例分割所需的几个基础操作: 6-邻域二值膨胀, 26-邻域连通分量标记,
//! 小目标删除与质心计算. 所有数组均为 `(z, y, x)` 顺序.

use std::collections::VecDeque;

use itertools::iproduct;
use ndarray::{Array3, ArrayView3, Zip};
use once_cell::sync::Lazy;

use crate::Idx3d;

/// 26-邻域偏移量 (不含自身), 按光栅顺序排列.
static NEIGHBOURS_26: Lazy<Vec<[isize; 3]>> = Lazy::new(|| {
    iproduct!(-1isize..=1, -1isize..=1, -1isize..=1)
        .filter(|&d| d != (0, 0, 0))
        .map(|(dz, dy, dx)| [dz, dy, dx])
        .collect()
});

/// 6-邻域 (钻石型) 偏移量.
const NEIGHBOURS_6: [[isize; 3]; 6] = [
    [-1, 0, 0],
    [1, 0, 0],
    [0, -1, 0],
    [0, 1, 0],
    [0, 0, -1],
    [0, 0, 1],
];

/// 对 `pos` 施加偏移, 越界时返回 `None`.
#[inline]
fn offset((z, y, x): Idx3d, [dz, dy, dx]: [isize; 3], (lz, ly, lx): Idx3d) -> Option<Idx3d> {
    let z = z.checked_add_signed(dz).filter(|&v| v < lz)?;
    let y = y.checked_add_signed(dy).filter(|&v| v < ly)?;
    let x = x.checked_add_signed(dx).filter(|&v| v < lx)?;
    Some((z, y, x))
}

/// 收集 `pos` 在 `offsets` 下不越界的邻居.
#[inline]
fn check_collect<'a>(
    pos: Idx3d,
    offsets: &'a [[isize; 3]],
    shape: Idx3d,
) -> impl Iterator<Item = Idx3d> + 'a {
    offsets.iter().filter_map(move |&d| offset(pos, d, shape))
}

/// 用 6-邻域十字结构元对二值掩码膨胀一次.
pub fn dilate_6(mask: ArrayView3<bool>) -> Array3<bool> {
    let shape = mask.dim();
    let mut out = mask.to_owned();
    for (pos, _) in mask.indexed_iter().filter(|(_, v)| **v) {
        for p in check_collect(pos, &NEIGHBOURS_6, shape) {
            out[p] = true;
        }
    }
    out
}

/// 26-邻域连通分量标记. 值相等且不等于 `T::default()` 的相邻体素属于同一个分量.
///
/// `bool` 掩码与整数标签都可以直接传入.
///
/// # 返回值
///
/// `(labels, n)`. 分量编号从 1 开始连续分配, 按每个分量第一个体素的光栅顺序递增.
/// 背景为 0.
pub fn label_components<T>(volume: ArrayView3<T>) -> (Array3<u32>, u32)
where
    T: Copy + PartialEq + Default,
{
    let shape = volume.dim();
    let mut labels = Array3::<u32>::zeros(shape);
    let mut next = 0u32;
    let mut queue = VecDeque::with_capacity(1024);

    for (seed, &v) in volume.indexed_iter() {
        if v == T::default() || labels[seed] != 0 {
            continue;
        }
        next += 1;
        labels[seed] = next;
        queue.push_back(seed);
        while let Some(pos) = queue.pop_front() {
            for p in check_collect(pos, &NEIGHBOURS_26, shape) {
                if labels[p] == 0 && volume[p] == v {
                    labels[p] = next;
                    queue.push_back(p);
                }
            }
        }
    }
    (labels, next)
}

/// 每个分量的体素个数. 下标 0 对应背景.
pub fn component_sizes(labels: ArrayView3<u32>, n: u32) -> Vec<usize> {
    let mut sizes = vec![0usize; n as usize + 1];
    for &l in labels.iter() {
        sizes[l as usize] += 1;
    }
    sizes
}

/// 将体素个数小于 `threshold` 的分量置为背景. 返回被删除的分量个数.
pub fn remove_small_objects(labels: &mut Array3<u32>, n: u32, threshold: usize) -> usize {
    let sizes = component_sizes(labels.view(), n);
    let small: Vec<bool> = sizes.iter().map(|&s| s < threshold).collect();
    labels.map_inplace(|l| {
        if *l != 0 && small[*l as usize] {
            *l = 0;
        }
    });
    small.iter().skip(1).filter(|&&s| s).count()
}

/// 每个分量的质心 `(z, y, x)`. 下标 `i` 对应分量 `i + 1`, 空分量为 `None`.
pub fn centroids(labels: ArrayView3<u32>, n: u32) -> Vec<Option<[f64; 3]>> {
    let mut acc = vec![([0.0f64; 3], 0usize); n as usize];
    for ((z, y, x), &l) in labels.indexed_iter() {
        if l == 0 {
            continue;
        }
        let (sum, cnt) = &mut acc[l as usize - 1];
        sum[0] += z as f64;
        sum[1] += y as f64;
        sum[2] += x as f64;
        *cnt += 1;
    }
    acc.into_iter()
        .map(|(sum, cnt)| (cnt != 0).then(|| sum.map(|s| s / cnt as f64)))
        .collect()
}

/// 满足 `pred` 的体素的质心. 不存在时返回 `None`.
pub fn centroid_where<T, F>(volume: ArrayView3<T>, pred: F) -> Option<[f64; 3]>
where
    F: Fn(&T) -> bool,
{
    let mut sum = [0.0f64; 3];
    let mut cnt = 0usize;
    for ((z, y, x), v) in volume.indexed_iter() {
        if pred(v) {
            sum[0] += z as f64;
            sum[1] += y as f64;
            sum[2] += x as f64;
            cnt += 1;
        }
    }
    (cnt != 0).then(|| sum.map(|s| s / cnt as f64))
}

/// 逐元素取 `a && b`.
#[inline]
pub fn and(a: ArrayView3<bool>, b: ArrayView3<bool>) -> Array3<bool> {
    Zip::from(&a).and(&b).map_collect(|&x, &y| x && y)
}
