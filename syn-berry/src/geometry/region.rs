//! 三维区域与裁剪填充参数.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::axis::Axis;
use crate::error::GeometryError;
use crate::Idx3d;

/// 三维半开区域 `[lo, hi)`, 内部 `(z, y, x)` 顺序, 坐标有符号, 可以越出体数据.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Region3 {
    /// 下界 (含).
    pub lo: [i64; 3],
    /// 上界 (不含).
    pub hi: [i64; 3],
}

impl Region3 {
    /// 构造区域. 任意一轴上界小于下界时返回错误.
    pub fn new(lo: [i64; 3], hi: [i64; 3]) -> Result<Self, GeometryError> {
        for ax in 0..3 {
            if hi[ax] < lo[ax] {
                return Err(GeometryError::InvertedSpan {
                    low: lo[ax],
                    high: hi[ax],
                });
            }
        }
        Ok(Self { lo, hi })
    }

    /// 覆盖整个体数据的区域.
    #[inline]
    pub fn whole((z, y, x): Idx3d) -> Self {
        Self {
            lo: [0; 3],
            hi: [z as i64, y as i64, x as i64],
        }
    }

    /// 由闭区间包围盒 (如 [`super::tight_bbox`] 的结果) 构造.
    #[inline]
    pub fn from_inclusive(bbox: [(usize, usize); 3]) -> Self {
        Self {
            lo: bbox.map(|(l, _)| l as i64),
            hi: bbox.map(|(_, h)| h as i64 + 1),
        }
    }

    /// 每个轴上的长度.
    #[inline]
    pub fn extent(&self) -> [usize; 3] {
        [0, 1, 2].map(|ax| (self.hi[ax] - self.lo[ax]).max(0) as usize)
    }

    /// 区域形状 `(z, y, x)`.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        let [z, y, x] = self.extent();
        (z, y, x)
    }

    /// 体素个数为 0?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.extent().contains(&0)
    }

    /// 按轴取出 `(lo, hi)`.
    #[inline]
    pub fn pairs(&self) -> [(i64, i64); 3] {
        [0, 1, 2].map(|ax| (self.lo[ax], self.hi[ax]))
    }

    /// 整体平移 `by`.
    #[inline]
    pub fn translate(&self, by: [i64; 3]) -> Self {
        Self {
            lo: [0, 1, 2].map(|ax| self.lo[ax] + by[ax]),
            hi: [0, 1, 2].map(|ax| self.hi[ax] + by[ax]),
        }
    }

    /// 以 `origin` 的下界为原点的相对区域.
    #[inline]
    pub fn relative_to(&self, origin: &Region3) -> Self {
        self.translate(origin.lo.map(|v| -v))
    }

    /// 区域是否完全位于 `[0, shape)` 之内?
    pub fn is_within(&self, (z, y, x): Idx3d) -> bool {
        let bound = [z as i64, y as i64, x as i64];
        (0..3).all(|ax| self.lo[ax] >= 0 && self.hi[ax] <= bound[ax])
    }

    /// 在体数据内时, 转换为可直接用于切片的下标范围. 否则返回 `None`.
    pub fn ranges_within(&self, shape: Idx3d) -> Option<[Range<usize>; 3]> {
        self.is_within(shape)
            .then(|| [0, 1, 2].map(|ax| self.lo[ax] as usize..self.hi[ax] as usize))
    }
}

/// 每个轴的 `(前, 后)` 填充量, 内部 `(z, y, x)` 顺序.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Padding {
    /// 三个轴的填充对.
    pub pairs: [(usize, usize); 3],
}

impl Padding {
    /// 零填充.
    pub const ZERO: Padding = Padding {
        pairs: [(0, 0); 3],
    };

    /// 所有填充量之和.
    #[inline]
    pub fn sum(&self) -> usize {
        self.pairs.iter().map(|(a, b)| a + b).sum()
    }

    /// 是否没有任何填充?
    #[inline]
    pub fn is_zero(&self) -> bool {
        self.sum() == 0
    }

    /// 将填充加回裁剪后的区域, 还原请求区域.
    pub fn restore(&self, clamped: &Region3) -> Region3 {
        Region3 {
            lo: [0, 1, 2].map(|ax| clamped.lo[ax] - self.pairs[ax].0 as i64),
            hi: [0, 1, 2].map(|ax| clamped.hi[ax] + self.pairs[ax].1 as i64),
        }
    }

    /// 填充后数组的形状.
    #[inline]
    pub fn padded_shape(&self, (z, y, x): Idx3d) -> Idx3d {
        let [pz, py, px] = self.pairs;
        (z + pz.0 + pz.1, y + py.0 + py.1, x + px.0 + px.1)
    }
}

/// 将请求区域与 `[0, shape)` 求交, 并计算每一侧超出的体素数.
///
/// `exempt` 指定的轴不做填充 (填充量恒为 0), 该轴上的输出长度可能小于请求长度.
/// 其余轴满足 `padding.restore(&clamped)` 与 `requested` 在该轴上一致.
///
/// # 注意
///
/// 交集为空 (包括请求区域本身为空) 时返回 [`GeometryError::OutsideVolume`].
pub fn intersect_and_pad(
    requested: &Region3,
    shape: Idx3d,
    exempt: Option<Axis>,
) -> Result<(Region3, Padding), GeometryError> {
    let bound = [shape.0 as i64, shape.1 as i64, shape.2 as i64];
    let mut clamped = *requested;
    let mut padding = Padding::ZERO;
    for ax in 0..3 {
        let (lo, hi) = (requested.lo[ax], requested.hi[ax]);
        let (c_lo, c_hi) = (lo.clamp(0, bound[ax]), hi.clamp(0, bound[ax]));
        if c_hi <= c_lo {
            return Err(GeometryError::OutsideVolume { shape });
        }
        clamped.lo[ax] = c_lo;
        clamped.hi[ax] = c_hi;
        if exempt.map(Axis::internal_index) != Some(ax) {
            padding.pairs[ax] = ((c_lo - lo) as usize, (hi - c_hi) as usize);
        }
    }
    Ok((clamped, padding))
}
