//! 体数据与体数据源.
//!
//! [`Volume`] 是内存中 `(z, y, x)` 顺序的只读三维数组. 所有取数都经过 [`VolumeSource`],
//! 流水线本身不区分数据来自本地文件还是远端存储.

use std::ops::Index;
use std::path::Path;

use log::warn;
use ndarray::{s, Array3, ArrayD, ArrayView2, ArrayView3, Axis, Ix3};
use ndarray_npy::{read_npy, ReadableElement};

use crate::axis::AxisOrder;
use crate::error::FetchError;
use crate::geometry::Region3;
use crate::Idx3d;

pub mod morph_3d;
pub mod remote;
pub mod resample;
pub mod slice;

pub use remote::{BoxQuery, RemoteVolume};
pub use resample::{resample_binary, resample_labels};

/// 体数据源. 实现者必须可以跨线程共享.
pub trait VolumeSource<T>: Send + Sync {
    /// 工作坐标系下的形状 `(z, y, x)`.
    fn shape(&self) -> Idx3d;

    /// 取出 `region` 对应的子数组. `region` 必须完全位于 `[0, shape)` 内.
    ///
    /// 返回数组的形状一般等于 `region.shape()`; 分辨率不同的远端存储可能返回其它形状,
    /// 由调用方负责重采样.
    fn fetch(&self, region: &Region3) -> Result<Array3<T>, FetchError>;
}

/// 内存中的三维体数据, `(z, y, x)` 顺序.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume<T> {
    data: Array3<T>,
}

impl<T> Index<Idx3d> for Volume<T> {
    type Output = T;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl<T> Volume<T> {
    /// 直接包装已经是 `(z, y, x)` 顺序的数组.
    #[inline]
    pub fn from_internal(data: Array3<T>) -> Self {
        Self { data }
    }

    /// 获取数据形状 `(z, y, x)`.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        self.data.dim()
    }

    /// 获取切片个数.
    #[inline]
    pub fn len_z(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    /// 获取第 `z_index` 层切片视图.
    ///
    /// 当 `z_index` 越界时 panic.
    #[inline]
    pub fn slice_at(&self, z_index: usize) -> ArrayView2<'_, T> {
        self.data.index_axis(Axis(0), z_index)
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView3<'_, T> {
        self.data.view()
    }

    /// 取出内部数组.
    #[inline]
    pub fn into_inner(self) -> Array3<T> {
        self.data
    }
}

impl<T: Clone> Volume<T> {
    /// 由外部顺序 `order` 的数组构造, 内部会重排为 `(z, y, x)` 并转为标准内存布局.
    pub fn from_ordered(data: Array3<T>, order: AxisOrder) -> Self {
        let data = data.permuted_axes(order.internal_permutation());
        let data = if data.is_standard_layout() {
            data
        } else {
            data.as_standard_layout().into_owned()
        };
        Self { data }
    }
}

impl<T: Clone + ReadableElement> Volume<T> {
    /// 读取 `.npy` 文件. 文件中的数组按 `order` 解释坐标轴.
    pub fn open_npy<P: AsRef<Path>>(path: P, order: AxisOrder) -> Result<Self, FetchError> {
        let path = path.as_ref();
        let raw: ArrayD<T> = read_npy(path).map_err(|e| FetchError::Npy {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let ndim = raw.ndim();
        let data = raw
            .into_dimensionality::<Ix3>()
            .map_err(|_| FetchError::NotThreeDimensional(ndim))?;
        Ok(Self::from_ordered(data, order))
    }
}

impl<T> VolumeSource<T> for Volume<T>
where
    T: Clone + Send + Sync,
{
    #[inline]
    fn shape(&self) -> Idx3d {
        self.data.dim()
    }

    fn fetch(&self, region: &Region3) -> Result<Array3<T>, FetchError> {
        let shape = self.data.dim();
        let [z, y, x] = region
            .ranges_within(shape)
            .ok_or(FetchError::OutOfBounds {
                region: *region,
                shape,
            })?;
        Ok(self.data.slice(s![z, y, x]).to_owned())
    }
}

/// 两个存储的公共形状 (逐轴取较小值). 形状不一致时记录警告.
pub fn common_shape(a: Idx3d, b: Idx3d) -> Idx3d {
    if a != b {
        warn!("图像形状 {a:?} 与标签形状 {b:?} 不一致, 使用逐轴最小值");
    }
    (a.0.min(b.0), a.1.min(b.1), a.2.min(b.2))
}
