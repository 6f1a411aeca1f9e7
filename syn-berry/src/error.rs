//! 运行时错误.
//!
//! 按关注点划分: 几何, 配置, 取数, 单实例渲染, 审阅.
//! 其中只有 [`RenderError`] 会在批处理层被重试或丢弃, 其它错误要么在启动时直接终止,
//! 要么由调用方处理.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::axis::Axis;
use crate::geometry::Region3;
use crate::Idx3d;

/// 纯几何计算失败. 对单个实例是致命的.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeometryError {
    /// 掩码中没有任何非零元素, 包围盒无定义.
    #[error("掩码为空, 无法计算包围盒")]
    EmptyMask,

    /// 区间上界小于下界.
    #[error("区间倒置: [{low}, {high}]")]
    InvertedSpan {
        /// 下界.
        low: i64,
        /// 上界.
        high: i64,
    },

    /// 请求的盒子与体数据没有任何交集.
    #[error("请求区域与体数据 {shape:?} 不相交")]
    OutsideVolume {
        /// 体数据形状 `(z, y, x)`.
        shape: Idx3d,
    },
}

/// 配置错误. 必须在处理任何实例之前报告.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 不认识的回归模式.
    #[error("未知的回归模式 `{0}`, 可选值为 linear / siegel / theil")]
    UnknownRegression(String),

    /// 不是 `x`, `y`, `z` 的排列.
    #[error("非法的坐标轴顺序 `{0}`")]
    UnknownAxisOrder(String),

    /// 裁剪尺寸某一维为 0.
    #[error("裁剪尺寸不能为 0: {0}")]
    ZeroCropSize(&'static str),

    /// 工作线程数为 0.
    #[error("工作线程数必须大于 0")]
    ZeroWorkers,

    /// 单任务超时为 0.
    #[error("单任务超时必须大于 0 秒")]
    ZeroTimeout,

    /// 单任务超时超出 [`std::time::Duration`] 的表示范围.
    #[error("单任务超时 {0} 秒过大")]
    TimeoutTooLarge(f64),

    /// 远端存储的分辨率比必须为有限正数.
    #[error("非法的分辨率比 {0:?}")]
    InvalidScale([f64; 3]),

    /// 每页实例数为 0.
    #[error("每页实例数必须大于 0")]
    ZeroPerPage,

    /// 突触表筛选条件的某个范围上界小于下界.
    #[error("筛选范围 {0} 的上界小于下界")]
    InvertedFilter(&'static str),

    /// 免填充轴只能是切片轴 `z`.
    #[error("免填充轴只能是 z, 实际为 {0}")]
    LateralExemptAxis(Axis),

    /// 工作线程池创建失败.
    #[error("工作线程池创建失败: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// JSON 解析失败.
    #[error("配置解析失败: {0}")]
    Json(#[from] serde_json::Error),

    /// 读取配置文件失败.
    #[error("读取配置文件 {path:?} 失败: {source}")]
    Io {
        /// 配置文件路径.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: io::Error,
    },
}

/// 从体数据源取数失败.
#[derive(Debug, Error)]
pub enum FetchError {
    /// 远端的临时故障 (网络, 超时等), 可重试.
    #[error("远端取数失败: {0}")]
    Transient(String),

    /// 请求区域超出存储范围.
    #[error("请求区域 {region:?} 超出存储形状 {shape:?}")]
    OutOfBounds {
        /// 请求区域.
        region: Region3,
        /// 存储形状.
        shape: Idx3d,
    },

    /// 远端返回的数组形状与请求不符.
    #[error("远端返回形状 {got:?}, 期望 {expected:?}")]
    Malformed {
        /// 期望形状.
        expected: Idx3d,
        /// 实际形状.
        got: Idx3d,
    },

    /// 读取 `.npy` 失败.
    #[error("读取 {path:?} 失败: {reason}")]
    Npy {
        /// 文件路径.
        path: PathBuf,
        /// 失败原因.
        reason: String,
    },

    /// 数组维度不是 3.
    #[error("期望三维数组, 实际为 {0} 维")]
    NotThreeDimensional(usize),
}

/// 单个实例渲染失败. 批处理层据此决定重试或丢弃.
#[derive(Debug, Error)]
pub enum RenderError {
    /// 几何错误.
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    /// 取数错误.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// 图像编码或写出失败.
    #[error("图像写出失败: {0}")]
    Image(#[from] image::ImageError),

    /// 文件系统错误.
    #[error("文件系统错误: {0}")]
    Io(#[from] io::Error),

    /// 实例区域中没有检测到实例.
    #[error("区域中没有检测到实例")]
    NoInstance,

    /// 重采样之后图像与标签形状仍不一致.
    #[error("图像形状 {image:?} 与标签形状 {label:?} 不一致")]
    ShapeMismatch {
        /// 图像裁剪形状.
        image: Idx3d,
        /// 标签裁剪形状.
        label: Idx3d,
    },

    /// 单次尝试超时.
    #[error("任务 `{name}` 超时 ({secs:.1} 秒)")]
    Timeout {
        /// 任务名.
        name: String,
        /// 超时时长.
        secs: f64,
    },

    /// 尝试已被取消 (通常是因为超时), 剩余工作被放弃.
    #[error("任务已取消")]
    Cancelled,

    /// 单次尝试 panic.
    #[error("任务 `{name}` panic: {message}")]
    Panicked {
        /// 任务名.
        name: String,
        /// panic 信息.
        message: String,
    },
}

impl RenderError {
    /// 是否值得用相同参数再试一次?
    ///
    /// 几何与形状错误是确定性的, 重试不会改变结果.
    pub fn is_retryable(&self) -> bool {
        match self {
            RenderError::Fetch(FetchError::Transient(_))
            | RenderError::Timeout { .. }
            | RenderError::Panicked { .. }
            | RenderError::Io(_) => true,
            RenderError::Fetch(_)
            | RenderError::Geometry(_)
            | RenderError::Image(_)
            | RenderError::NoInstance
            | RenderError::Cancelled
            | RenderError::ShapeMismatch { .. } => false,
        }
    }
}

/// 审阅操作失败.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReviewError {
    /// 表中没有该行.
    #[error("找不到实例 (page = {page}, index = {index})")]
    UnknownRow {
        /// 页码.
        page: usize,
        /// 实例编号.
        index: usize,
    },

    /// 比较并交换失败: 当前值已被其他人修改.
    #[error("实例 (page = {page}, index = {index}) 的标签已被修改")]
    Conflict {
        /// 页码.
        page: usize,
        /// 实例编号.
        index: usize,
    },

    /// 重复插入.
    #[error("实例 (page = {page}, index = {index}) 已存在")]
    Duplicate {
        /// 页码.
        page: usize,
        /// 实例编号.
        index: usize,
    },
}
