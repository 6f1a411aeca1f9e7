//! 实例分割与中心实例选择.
//!
//! 输入的标签区域可能是两种编码之一:
//!
//! 1. 语义编码: 只包含 `{0, 1, 2}` 三个值, `1` / `2` 分别是突触前后两侧.
//!   此时需要先合成实例编号.
//! 2. 实例编码: 已经为每个突触分配了编号, 奇数为突触前, 偶数为突触后.
//!
//! 在单个裁剪区域内, 最终只保留距离区域中心最近的一个实例, 以免区域跨到邻居上.

use ndarray::{Array3, ArrayView3, Zip};
use num::Integer;

use crate::consts::polarity::{BACKGROUND, POST, PRE};
use crate::data::morph_3d::{centroids, dilate_6, label_components, remove_small_objects};

/// 单个实例的掩码及其极性.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstanceMask {
    /// 体素是否属于该实例.
    pub mask: Array3<bool>,

    /// 极性: [`BACKGROUND`], [`PRE`] 或 [`POST`]. 掩码之外恒为背景.
    pub polarity: Array3<u8>,
}

impl InstanceMask {
    /// 从实例编码的标签中取出满足 `keep` 的体素, 以奇偶性确定极性.
    pub fn from_labels<F>(labels: ArrayView3<u32>, keep: F) -> Self
    where
        F: Fn(u32) -> bool,
    {
        let mask = labels.mapv(|v| v != 0 && keep(v));
        let polarity = Zip::from(&labels)
            .and(&mask)
            .map_collect(|&v, &m| if m { parity_of(v) } else { BACKGROUND });
        Self { mask, polarity }
    }

    /// 区域中没有任何实例体素?
    #[inline]
    pub fn is_empty(&self) -> bool {
        !self.mask.iter().any(|&m| m)
    }

    /// 实例体素个数.
    #[inline]
    pub fn voxel_count(&self) -> usize {
        self.mask.iter().filter(|&&m| m).count()
    }
}

/// 非零标签的极性: 奇数为突触前, 偶数为突触后.
#[inline]
pub fn parity_of(label: u32) -> u8 {
    match label {
        0 => BACKGROUND,
        v if v.is_odd() => PRE,
        _ => POST,
    }
}

/// 标签区域是否恰好由 `{0, 1, 2}` 三个值构成?
pub fn is_semantic(region: ArrayView3<u32>) -> bool {
    let mut seen = [false; 3];
    for &v in region.iter() {
        match seen.get_mut(v as usize) {
            Some(s) => *s = true,
            None => return false,
        }
    }
    seen == [true; 3]
}

/// 合成后的实例编码.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instances {
    /// 带极性的实例编码: 实例 `k` 的突触前体素为 `2k - 1`, 突触后体素为 `2k`.
    pub syn: Array3<u32>,

    /// 实例编号 `k`, 背景为 0. 编号不一定连续.
    pub seg: Array3<u32>,
}

impl Instances {
    /// 全部实例编号, 升序.
    pub fn ids(&self) -> Vec<u32> {
        let mut seen = std::collections::BTreeSet::new();
        seen.extend(self.seg.iter().copied().filter(|&v| v != 0));
        seen.into_iter().collect()
    }
}

/// 由语义编码合成实例编码.
///
/// 非零区域先用 6-邻域十字结构元膨胀一次 (使同一突触两侧连成一体),
/// 再做 26-邻域连通分量标记, 与原非零区域求交, 删除体素数小于 `threshold` 的分量,
/// 最后依据原值 `1` / `2` 生成带极性的 `syn`.
pub fn synthesize_instances(gt: ArrayView3<u32>, threshold: usize) -> Instances {
    let foreground = gt.mapv(|v| v != 0);
    let dilated = dilate_6(foreground.view());
    let (mut seg, n) = label_components(dilated.view());
    Zip::from(&mut seg)
        .and(&foreground)
        .for_each(|s, &fg| if !fg { *s = 0 });
    let removed = remove_small_objects(&mut seg, n, threshold);
    log::debug!("合成实例: {n} 个连通分量, 删除 {removed} 个小目标");

    let syn = Zip::from(&seg).and(&gt).map_collect(|&s, &g| match (s, g) {
        (0, _) => 0,
        (s, 1) => 2 * s - 1,
        (s, 2) => 2 * s,
        _ => 0,
    });
    Instances { syn, seg }
}

/// 整卷路径: 语义编码则合成实例; 否则视为已经是实例编码, `seg = (gt + 1) / 2`.
pub fn instances_from_volume(gt: ArrayView3<u32>, threshold: usize) -> Instances {
    if is_semantic(gt) {
        synthesize_instances(gt, threshold)
    } else {
        Instances {
            syn: gt.to_owned(),
            seg: gt.mapv(|v| (v + 1) / 2),
        }
    }
}

/// 整卷路径: 从带极性的 `syn` 区域中取出实例 `id`.
#[inline]
pub fn isolate_instance(syn: ArrayView3<u32>, id: u32) -> InstanceMask {
    InstanceMask::from_labels(syn, |v| (v + 1) / 2 == id)
}

/// 选出质心距离区域几何中心 (`shape / 2`) 最近的分量.
///
/// `labels` 是 [`label_components`] 的输出, `n` 为分量数.
/// 距离相同时取编号最小者, 即第一个体素在光栅顺序中最靠前的分量.
///
/// # 返回值
///
/// 分量编号. 区域中没有分量时返回 `None`.
pub fn select_center_blob(labels: ArrayView3<u32>, n: u32) -> Option<u32> {
    let (z, y, x) = labels.dim();
    let center = [z as f64 / 2.0, y as f64 / 2.0, x as f64 / 2.0];
    let mut best: Option<(u32, f64)> = None;
    for (i, c) in centroids(labels, n).into_iter().enumerate() {
        let Some(c) = c else {
            continue;
        };
        let d = (0..3).map(|k| (c[k] - center[k]).powi(2)).sum::<f64>();
        if best.map_or(true, |(_, bd)| d < bd) {
            best = Some((i as u32 + 1, d));
        }
    }
    best.map(|(id, _)| id)
}

/// 裁剪路径: 从单个区域中分离出最靠近中心的实例.
///
/// 1. 语义编码: 先合成实例, 再在实例编号上选中心实例.
/// 2. 实例编码: 对相等值做连通分量标记, 选中心分量, 极性取原标签奇偶性.
///
/// 区域全零时返回空掩码, 调用方应视为 "没有检测到实例".
pub fn isolate_center_instance(region: ArrayView3<u32>, threshold: usize) -> InstanceMask {
    if is_semantic(region) {
        let Instances { syn, seg } = synthesize_instances(region, threshold);
        // 合成后的编号可能不连续, 重新标记一遍以便统一选择.
        let (components, n) = label_components(seg.view());
        return match select_center_blob(components.view(), n) {
            Some(id) => {
                let keep = components.mapv(|c| c == id);
                let syn = Zip::from(&syn)
                    .and(&keep)
                    .map_collect(|&s, &k| if k { s } else { 0 });
                InstanceMask::from_labels(syn.view(), |_| true)
            }
            None => InstanceMask::from_labels(syn.view(), |_| false),
        };
    }

    let (components, n) = label_components(region);
    let chosen = select_center_blob(components.view(), n);
    let keep = components.mapv(|c| Some(c) == chosen && c != 0);
    let masked = Zip::from(&region)
        .and(&keep)
        .map_collect(|&v, &k| if k { v } else { 0 });
    InstanceMask::from_labels(masked.view(), |_| true)
}
