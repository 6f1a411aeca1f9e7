//! 远端流式体数据源.
//!
//! 远端存储以 "最小角 + 最大角" 的盒子查询取数, 坐标使用存储自身的坐标轴顺序与分辨率.
//! [`RemoteVolume`] 负责在工作坐标系 (内部 `(z, y, x)`, 图像分辨率) 与存储坐标系之间换算.
//! 本 crate 不附带任何网络客户端, 只规定 [`BoxQuery`] 接口.

use ndarray::Array3;

use crate::axis::AxisOrder;
use crate::error::{ConfigError, FetchError};
use crate::geometry::Region3;
use crate::Idx3d;

use super::VolumeSource;

/// 远端存储的盒子查询接口. 所有坐标都是存储自身的坐标轴顺序与分辨率.
pub trait BoxQuery<T>: Send + Sync {
    /// 存储形状.
    fn size(&self) -> [usize; 3];

    /// 下载 `[min, max)` 盒子中的数据, 返回数组形状为 `max - min`.
    fn download(&self, min: [usize; 3], max: [usize; 3]) -> Result<Array3<T>, FetchError>;
}

/// 把 [`BoxQuery`] 适配为 [`VolumeSource`].
#[derive(Debug, Clone)]
pub struct RemoteVolume<Q> {
    query: Q,
    order: AxisOrder,
    scale: [f64; 3],
}

impl<Q> RemoteVolume<Q> {
    /// 创建适配器.
    ///
    /// `scale` 为内部 `(z, y, x)` 顺序的分辨率比: 存储坐标 = 工作坐标 * `scale`.
    /// 与图像同分辨率时为 `[1.0; 3]`.
    ///
    /// # 返回值
    ///
    /// `scale` 的某个分量不是有限正数时返回 [`ConfigError::InvalidScale`].
    pub fn new(query: Q, order: AxisOrder, scale: [f64; 3]) -> Result<Self, ConfigError> {
        if !scale.iter().all(|&s| s > 0.0 && s.is_finite()) {
            return Err(ConfigError::InvalidScale(scale));
        }
        Ok(Self {
            query,
            order,
            scale,
        })
    }

    /// 存储的坐标轴顺序.
    #[inline]
    pub fn order(&self) -> AxisOrder {
        self.order
    }

    /// 工作坐标系区域 -> 存储坐标系下的 `[min, max)` (内部顺序), 已截断到存储范围.
    fn store_box(&self, region: &Region3, store: [usize; 3]) -> ([usize; 3], [usize; 3]) {
        let mut lo = [0usize; 3];
        let mut hi = [0usize; 3];
        for ax in 0..3 {
            let l = (region.lo[ax] as f64 * self.scale[ax]).floor().max(0.0) as usize;
            let h = (region.hi[ax] as f64 * self.scale[ax]).ceil().max(0.0) as usize;
            lo[ax] = l.min(store[ax]);
            hi[ax] = h.min(store[ax]).max(lo[ax]);
        }
        (lo, hi)
    }
}

impl<T, Q> VolumeSource<T> for RemoteVolume<Q>
where
    T: Clone + Send + Sync,
    Q: BoxQuery<T>,
{
    fn shape(&self) -> Idx3d {
        let store = self.order.to_internal(self.query.size());
        let [z, y, x] = [0, 1, 2].map(|ax| (store[ax] as f64 / self.scale[ax]).floor() as usize);
        (z, y, x)
    }

    fn fetch(&self, region: &Region3) -> Result<Array3<T>, FetchError> {
        let shape = VolumeSource::<T>::shape(self);
        if !region.is_within(shape) {
            return Err(FetchError::OutOfBounds {
                region: *region,
                shape,
            });
        }
        let store = self.order.to_internal(self.query.size());
        let (lo, hi) = self.store_box(region, store);
        let (min, max) = (self.order.to_external(lo), self.order.to_external(hi));

        let raw = self.query.download(min, max)?;
        let expected = [0, 1, 2].map(|ax| max[ax] - min[ax]);
        let got = raw.dim();
        if [got.0, got.1, got.2] != expected {
            let [a, b, c] = expected;
            return Err(FetchError::Malformed {
                expected: (a, b, c),
                got,
            });
        }
        let data = raw.permuted_axes(self.order.internal_permutation());
        Ok(data.as_standard_layout().into_owned())
    }
}
