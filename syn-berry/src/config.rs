//! 渲染配置.
//!
//! 配置由外部 (命令行或网页层) 以 JSON 形式给出, 所有字段都有默认值.
//! 任何实例被处理之前必须先调用 [`RenderConfig::validate`], [`crate::Session::new`]
//! 会自动做这件事.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::axis::{Axis, AxisOrder};
use crate::consts::rgb::{self, Rgb};
use crate::consts::{
    DEFAULT_IMAGE_PAD, DEFAULT_LABEL_PAD, DEFAULT_PER_PAGE, DEFAULT_SMALL_OBJECT_THRESHOLD,
};
use crate::error::ConfigError;
use crate::rotation::RegressionMode;
use crate::{Idx2d, Pos3d};

/// 输出的裁剪尺寸, 以逻辑轴命名.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct CropSize {
    /// 宽.
    pub x: usize,
    /// 高.
    pub y: usize,
    /// 切片数. 只在以表格给出突触中心的场景下决定请求区域的深度.
    pub z: usize,
}

impl Default for CropSize {
    fn default() -> Self {
        Self {
            x: 148,
            y: 148,
            z: 16,
        }
    }
}

impl CropSize {
    /// 二维输出尺寸 `(h, w)`.
    #[inline]
    pub fn footprint(&self) -> Idx2d {
        (self.y, self.x)
    }

    /// 内部 `(z, y, x)` 顺序的三元组.
    #[inline]
    pub fn internal(&self) -> [usize; 3] {
        [self.z, self.y, self.x]
    }
}

/// 逻辑轴上的闭区间 `[lo, hi]`. 负的界表示该侧不限.
pub type Bound = [i64; 2];

#[inline]
fn bound_contains([lo, hi]: Bound, v: i64) -> bool {
    (lo < 0 || v >= lo) && (hi < 0 || v <= hi)
}

#[inline]
fn bound_inverted([lo, hi]: Bound) -> bool {
    lo >= 0 && hi >= 0 && hi < lo
}

/// 子体积, 以逻辑轴命名.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubVolume {
    #[allow(missing_docs)]
    pub x: Bound,
    #[allow(missing_docs)]
    pub y: Bound,
    #[allow(missing_docs)]
    pub z: Bound,
}

impl Default for SubVolume {
    fn default() -> Self {
        Self {
            x: [-1, -1],
            y: [-1, -1],
            z: [-1, -1],
        }
    }
}

impl SubVolume {
    /// 内部 `(z, y, x)` 坐标是否落在子体积内.
    #[inline]
    pub fn contains(&self, (z, y, x): Pos3d) -> bool {
        bound_contains(self.z, z) && bound_contains(self.y, y) && bound_contains(self.x, x)
    }
}

/// 突触表的筛选条件. 两个条件同时生效, 缺省时保留全部行.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableFilter {
    /// 只保留中心落在该子体积内的行.
    pub subvolume: Option<SubVolume>,
    /// 只保留行号在闭区间 `[first, last]` 内的行.
    pub rows: Option<[usize; 2]>,
}

impl TableFilter {
    /// 第 `row` 行, 中心为 `center` 的记录是否保留.
    pub fn keeps(&self, row: usize, center: Pos3d) -> bool {
        let in_rows = self
            .rows
            .map_or(true, |[first, last]| (first..=last).contains(&row));
        in_rows && self.subvolume.map_or(true, |v| v.contains(center))
    }
}

/// 突触前后标记点的绘制方式.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerStyle {
    /// 圆柱半径 (像素).
    pub radius: u32,

    /// 中心切片两侧各绘制多少张切片.
    pub depth: usize,

    /// 突触前标记颜色: `[中心切片, 相邻切片]`.
    pub pre_colors: [Rgb; 2],

    /// 突触后标记颜色: `[中心切片, 相邻切片]`.
    pub post_colors: [Rgb; 2],
}

impl Default for MarkerStyle {
    fn default() -> Self {
        Self {
            radius: 10,
            depth: 1,
            pre_colors: [rgb::PRE_MARKER, rgb::PRE_MARKER_DIM],
            post_colors: [rgb::POST_MARKER, rgb::POST_MARKER_DIM],
        }
    }
}

/// 图像与标签的填充常量.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PadValues {
    /// EM 图像填充值.
    pub image: u8,
    /// 标签填充值.
    pub label: u8,
}

impl Default for PadValues {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE_PAD,
            label: DEFAULT_LABEL_PAD,
        }
    }
}

/// 两种极性各自的显示颜色.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolarityColors {
    /// 突触前.
    pub pre: Rgb,
    /// 突触后.
    pub post: Rgb,
}

impl Default for PolarityColors {
    fn default() -> Self {
        Self {
            pre: rgb::MAGENTA,
            post: rgb::CYAN,
        }
    }
}

/// 渲染流水线所需的全部配置.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// 外部存储的坐标轴顺序.
    pub axis_order: AxisOrder,

    /// 输出裁剪尺寸.
    pub crop_size: CropSize,

    /// 小于该体素数的连通分量被视为噪声.
    pub small_object_threshold: usize,

    /// 工作线程数.
    pub workers: usize,

    /// 单次尝试的超时 (秒).
    pub task_timeout_secs: f64,

    /// 旋转估计使用的回归方式.
    pub regression: RegressionMode,

    /// 标记点样式.
    pub marker: MarkerStyle,

    /// 填充常量.
    pub pad: PadValues,

    /// 不做填充的坐标轴. `None` 表示所有轴都填充.
    pub exempt_axis: Option<Axis>,

    /// 每页实例数.
    pub per_page: usize,

    /// 切片输出根目录.
    pub output_dir: PathBuf,

    /// 极性颜色.
    pub polarity_colors: PolarityColors,

    /// 突触表筛选条件. 只作用于以表格给出实例的场景.
    pub table_filter: TableFilter,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            axis_order: AxisOrder::default(),
            crop_size: CropSize::default(),
            small_object_threshold: DEFAULT_SMALL_OBJECT_THRESHOLD,
            workers: 8,
            task_timeout_secs: 15.0,
            regression: RegressionMode::default(),
            marker: MarkerStyle::default(),
            pad: PadValues::default(),
            exempt_axis: Some(Axis::Z),
            per_page: DEFAULT_PER_PAGE,
            output_dir: PathBuf::from("synanno_output"),
            polarity_colors: PolarityColors::default(),
            table_filter: TableFilter::default(),
        }
    }
}

impl RenderConfig {
    /// 从 JSON 字符串读取并校验.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// 从 JSON 文件读取并校验.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let s = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&s)
    }

    /// 检查配置是否可用. 任何错误都必须在处理实例前报告.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let CropSize { x, y, z } = self.crop_size;
        for (v, name) in [(x, "x"), (y, "y"), (z, "z")] {
            if v == 0 {
                return Err(ConfigError::ZeroCropSize(name));
            }
        }
        if self.workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if !(self.task_timeout_secs > 0.0) {
            return Err(ConfigError::ZeroTimeout);
        }
        if Duration::try_from_secs_f64(self.task_timeout_secs).is_err() {
            return Err(ConfigError::TimeoutTooLarge(self.task_timeout_secs));
        }
        if self.per_page == 0 {
            return Err(ConfigError::ZeroPerPage);
        }
        if let Some(ax @ (Axis::X | Axis::Y)) = self.exempt_axis {
            return Err(ConfigError::LateralExemptAxis(ax));
        }
        if let Some([first, last]) = self.table_filter.rows {
            if last < first {
                return Err(ConfigError::InvertedFilter("rows"));
            }
        }
        if let Some(v) = self.table_filter.subvolume {
            for (b, name) in [(v.x, "x"), (v.y, "y"), (v.z, "z")] {
                if bound_inverted(b) {
                    return Err(ConfigError::InvertedFilter(name));
                }
            }
        }
        Ok(())
    }

    /// 单次尝试的超时. 未经校验的非法值按 [`Duration::MAX`] 处理.
    #[inline]
    pub fn task_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.task_timeout_secs).unwrap_or(Duration::MAX)
    }
}
