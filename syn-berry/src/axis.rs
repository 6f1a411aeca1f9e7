//! 坐标轴顺序适配.
//!
//! 外部存储 (或配置) 以 `x`, `y`, `z` 的某个排列声明数组各维度的含义.
//! crate 内部统一使用 `(z, y, x)` 顺序, 所有跨越边界的三元组都经过 [`AxisOrder`] 转换.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// 逻辑坐标轴.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    /// 水平方向 (图像宽).
    X,

    /// 垂直方向 (图像高).
    Y,

    /// 切片方向.
    Z,
}

impl Axis {
    /// 该轴在内部 `(z, y, x)` 顺序中的维度下标.
    #[inline]
    pub const fn internal_index(self) -> usize {
        match self {
            Axis::Z => 0,
            Axis::Y => 1,
            Axis::X => 2,
        }
    }

    /// 单字符名称.
    #[inline]
    pub const fn as_char(self) -> char {
        match self {
            Axis::X => 'x',
            Axis::Y => 'y',
            Axis::Z => 'z',
        }
    }

    fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_lowercase() {
            'x' => Some(Axis::X),
            'y' => Some(Axis::Y),
            'z' => Some(Axis::Z),
            _ => None,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// 外部声明的坐标轴顺序. `order[i]` 是外部数组第 `i` 维对应的逻辑轴.
///
/// 该值总是 `{x, y, z}` 的一个合法排列, 因此所有查询都不会失败.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AxisOrder {
    order: [Axis; 3],
}

impl Default for AxisOrder {
    /// 默认与内部顺序一致, 即 `zyx`.
    #[inline]
    fn default() -> Self {
        Self::INTERNAL
    }
}

impl AxisOrder {
    /// 内部使用的 `(z, y, x)` 顺序.
    pub const INTERNAL: AxisOrder = AxisOrder {
        order: [Axis::Z, Axis::Y, Axis::X],
    };

    /// 由三个逻辑轴构造. 若不是排列则返回 `None`.
    pub fn new(order: [Axis; 3]) -> Option<Self> {
        let [a, b, c] = order;
        (a != b && b != c && a != c).then_some(Self { order })
    }

    /// 外部顺序下的三个逻辑轴.
    #[inline]
    pub fn axes(&self) -> [Axis; 3] {
        self.order
    }

    /// 逻辑轴 `axis` 在外部数组中的维度下标.
    #[inline]
    pub fn index_of(&self, axis: Axis) -> usize {
        // 排列保证一定能找到.
        self.order.iter().position(|&a| a == axis).unwrap_or_default()
    }

    /// 用于 `permuted_axes` 的参数: 将外部顺序的数组变换为 `(z, y, x)` 顺序.
    #[inline]
    pub fn internal_permutation(&self) -> [usize; 3] {
        [
            self.index_of(Axis::Z),
            self.index_of(Axis::Y),
            self.index_of(Axis::X),
        ]
    }

    /// 用于 `permuted_axes` 的参数: 将 `(z, y, x)` 顺序的数组变换为外部顺序.
    #[inline]
    pub fn external_permutation(&self) -> [usize; 3] {
        self.order.map(Axis::internal_index)
    }

    /// 外部顺序三元组 -> 内部 `(z, y, x)` 三元组.
    #[inline]
    pub fn to_internal<T: Copy>(&self, external: [T; 3]) -> [T; 3] {
        self.internal_permutation().map(|i| external[i])
    }

    /// 内部 `(z, y, x)` 三元组 -> 外部顺序三元组.
    #[inline]
    pub fn to_external<T: Copy>(&self, internal: [T; 3]) -> [T; 3] {
        self.external_permutation().map(|i| internal[i])
    }

    /// 将以内部顺序给出的 3 个区间 (或填充对) 展开为外部顺序的 6 元组.
    pub fn to_external_pairs<T: Copy>(&self, internal: [(T, T); 3]) -> [T; 6] {
        let [a, b, c] = self.to_external(internal);
        [a.0, a.1, b.0, b.1, c.0, c.1]
    }

    /// 将外部顺序的 6 元组还原为内部顺序的 3 个区间.
    pub fn to_internal_pairs<T: Copy>(&self, external: [T; 6]) -> [(T, T); 3] {
        let pairs = [
            (external[0], external[1]),
            (external[2], external[3]),
            (external[4], external[5]),
        ];
        self.to_internal(pairs)
    }
}

impl FromStr for AxisOrder {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || ConfigError::UnknownAxisOrder(s.to_string());
        let axes: Vec<Axis> = s
            .trim()
            .chars()
            .map(Axis::from_char)
            .collect::<Option<_>>()
            .ok_or_else(unknown)?;
        let order: [Axis; 3] = axes.try_into().map_err(|_| unknown())?;
        Self::new(order).ok_or_else(unknown)
    }
}

impl TryFrom<String> for AxisOrder {
    type Error = ConfigError;

    #[inline]
    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AxisOrder> for String {
    #[inline]
    fn from(value: AxisOrder) -> Self {
        value.to_string()
    }
}

impl fmt::Display for AxisOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for a in self.order {
            write!(f, "{a}")?;
        }
        Ok(())
    }
}
