//! 通用常量.

/// 单通道极性类别.
pub mod polarity {
    /// 背景.
    pub const BACKGROUND: u8 = 0;

    /// 突触前 (pre-synaptic) 一侧. 原始标签为奇数.
    pub const PRE: u8 = 1;

    /// 突触后 (post-synaptic) 一侧. 原始标签为偶数且非零.
    pub const POST: u8 = 2;

    /// 像素是否是背景?
    #[inline]
    pub const fn is_background(p: u8) -> bool {
        matches!(p, BACKGROUND)
    }

    /// 像素是否是突触前?
    #[inline]
    pub const fn is_pre(p: u8) -> bool {
        matches!(p, PRE)
    }

    /// 像素是否是突触后?
    #[inline]
    pub const fn is_post(p: u8) -> bool {
        matches!(p, POST)
    }

    /// 像素是否属于实例 (任一极性)?
    #[inline]
    pub const fn is_foreground(p: u8) -> bool {
        matches!(p, PRE | POST)
    }
}

/// RGB 颜色.
pub mod rgb {
    /// 三通道颜色.
    pub type Rgb = [u8; 3];

    /// 黑色. 渲染时被视为完全透明.
    pub const BLACK: Rgb = [0, 0, 0];

    /// 洋红. 默认的突触前颜色.
    pub const MAGENTA: Rgb = [255, 0, 255];

    /// 青色. 默认的突触后颜色.
    pub const CYAN: Rgb = [0, 255, 255];

    /// 突触前标记点的中心切片颜色.
    pub const PRE_MARKER: Rgb = [0, 255, 0];

    /// 突触前标记点的相邻切片颜色.
    pub const PRE_MARKER_DIM: Rgb = [200, 255, 200];

    /// 突触后标记点的中心切片颜色.
    pub const POST_MARKER: Rgb = [0, 0, 255];

    /// 突触后标记点的相邻切片颜色.
    pub const POST_MARKER_DIM: Rgb = [200, 200, 255];
}

/// 旋转前的裁剪尺寸相对于最终尺寸的放大倍率 (sqrt 2), 保证旋转后角落不被截断.
pub const ROTATION_MARGIN: f64 = std::f64::consts::SQRT_2;

/// 极性交叠区域的最少像素数. 不超过该值时视为 "无交叠", 退化为使用整个实例掩码.
pub const MIN_OVERLAP_PIXELS: usize = 20;

/// 估计旋转角时, 极性掩码的膨胀半径 (3 x 3 方形结构元).
pub const POLARITY_DILATION_RADIUS: u8 = 1;

/// EM 图像默认填充值.
pub const DEFAULT_IMAGE_PAD: u8 = 128;

/// 标签默认填充值.
pub const DEFAULT_LABEL_PAD: u8 = 0;

/// 默认的小目标删除阈值 (体素个数).
pub const DEFAULT_SMALL_OBJECT_THRESHOLD: usize = 16;

/// 每个分页的默认实例个数.
pub const DEFAULT_PER_PAGE: usize = 18;

/// 标签重采样后的二值化阈值.
pub const RESAMPLE_THRESHOLD: f32 = 0.5;
