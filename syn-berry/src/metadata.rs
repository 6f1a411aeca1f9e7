//! 实例元数据与共享元数据表.
//!
//! 每个实例渲染成功后生成一条 [`InstanceRecord`]. 几何字段在创建后不再改变,
//! 只有审阅标签与错误描述可以被修改. 所有记录保存在唯一的 [`MetadataTable`] 中,
//! 以 `(page, index)` 为键.
//!
//! JSON 字段名沿用下游网页层的命名, 因此与 Rust 命名风格不同.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::error::ReviewError;

/// 审阅结论.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ReviewLabel {
    /// 正确 (默认值).
    #[default]
    Correct,
    /// 错误.
    Incorrect,
    /// 不确定.
    Unsure,
}

impl ReviewLabel {
    /// 卡片点击时的切换顺序: 正确 -> 错误 -> 不确定 -> 正确.
    #[inline]
    pub fn next(self) -> Self {
        match self {
            ReviewLabel::Correct => ReviewLabel::Incorrect,
            ReviewLabel::Incorrect => ReviewLabel::Unsure,
            ReviewLabel::Unsure => ReviewLabel::Correct,
        }
    }
}

impl fmt::Display for ReviewLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// 单个实例的元数据.
///
/// 包围盒以外部坐标轴顺序导出为 `[a0, a1, b0, b1, c0, c1]`,
/// 填充量导出为 `[[a0, a1], [b0, b1], [c0, c1]]`.
/// 两个包围盒都是半开区间: `Original_Bbox` 为实例的紧包围盒, `Adjusted_Bbox` 为实际取数的区域.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    /// 页码, 从 1 开始.
    #[serde(rename = "Page")]
    pub page: usize,
    /// 实例编号.
    #[serde(rename = "Image_Index")]
    pub index: usize,
    /// 彩色标签切片目录.
    #[serde(rename = "GT")]
    pub label_dir: PathBuf,
    /// EM 切片目录.
    #[serde(rename = "EM")]
    pub image_dir: PathBuf,
    /// 审阅结论.
    #[serde(rename = "Label")]
    pub label: ReviewLabel,
    /// 是否已人工标注, `"Yes"` / `"No"`.
    #[serde(rename = "Annotated")]
    pub annotated: String,
    /// 错误描述, 默认 `"None"`.
    #[serde(rename = "Error_Description")]
    pub error_description: String,
    /// `x` 轴在外部顺序中的位置.
    #[serde(rename = "X_Index")]
    pub x_index: usize,
    /// `y` 轴在外部顺序中的位置.
    #[serde(rename = "Y_Index")]
    pub y_index: usize,
    /// `z` 轴在外部顺序中的位置.
    #[serde(rename = "Z_Index")]
    pub z_index: usize,
    /// 中间切片的绝对切片号.
    #[serde(rename = "Middle_Slice")]
    pub middle_slice: usize,
    /// 实例紧包围盒.
    #[serde(rename = "Original_Bbox")]
    pub original_bbox: [i64; 6],
    /// 截断到体数据内的请求区域.
    #[serde(rename = "Adjusted_Bbox")]
    pub adjusted_bbox: [i64; 6],
    /// 每个轴两侧的填充量.
    #[serde(rename = "Padding")]
    pub padding: [[usize; 2]; 3],
    /// 突触前点 (绝对坐标).
    pub pre_pt_x: Option<i64>,
    #[allow(missing_docs)]
    pub pre_pt_y: Option<i64>,
    #[allow(missing_docs)]
    pub pre_pt_z: Option<i64>,
    /// 突触后点 (绝对坐标).
    pub post_pt_x: Option<i64>,
    #[allow(missing_docs)]
    pub post_pt_y: Option<i64>,
    #[allow(missing_docs)]
    pub post_pt_z: Option<i64>,
    /// 突触前点在输出切片上的位置, 按外部坐标轴顺序排列.
    /// `z` 分量为切片在栈中的序号, `x` `y` 分量为旋转并裁剪后的像素坐标.
    pub pre_pt_crop: Option<[f64; 3]>,
    /// 突触后点在输出切片上的位置, 顺序同上.
    pub post_pt_crop: Option<[f64; 3]>,
    /// 输出宽.
    pub crop_size_x: usize,
    /// 输出高.
    pub crop_size_y: usize,
    /// 输出切片数.
    pub crop_size_z: usize,
    /// 实际施加的旋转角 (度, 逆时针为正).
    #[serde(rename = "Rotation_Angle")]
    pub rotation_angle: f64,
}

impl InstanceRecord {
    /// 只比较几何字段. 相同输入重复运行时这些字段必须逐位一致.
    pub fn same_geometry(&self, other: &Self) -> bool {
        self.middle_slice == other.middle_slice
            && self.original_bbox == other.original_bbox
            && self.adjusted_bbox == other.adjusted_bbox
            && self.padding == other.padding
            && self.rotation_angle.to_bits() == other.rotation_angle.to_bits()
    }
}

/// 共享元数据表. 内部由互斥锁保护, 可以在线程间共享引用.
#[derive(Debug, Default)]
pub struct MetadataTable {
    rows: Mutex<BTreeMap<(usize, usize), InstanceRecord>>,
}

impl MetadataTable {
    /// 创建空表.
    pub fn new() -> Self {
        Self::default()
    }

    fn rows(&self) -> MutexGuard<'_, BTreeMap<(usize, usize), InstanceRecord>> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 插入一条新记录. 同键记录已存在时返回 [`ReviewError::Duplicate`].
    pub fn insert(&self, record: InstanceRecord) -> Result<(), ReviewError> {
        let key = (record.page, record.index);
        let mut rows = self.rows();
        if rows.contains_key(&key) {
            return Err(ReviewError::Duplicate {
                page: key.0,
                index: key.1,
            });
        }
        rows.insert(key, record);
        Ok(())
    }

    /// 记录条数.
    pub fn len(&self) -> usize {
        self.rows().len()
    }

    /// 表为空?
    pub fn is_empty(&self) -> bool {
        self.rows().is_empty()
    }

    /// 该页是否已经生成过?
    pub fn has_page(&self, page: usize) -> bool {
        self.rows()
            .range((page, 0)..=(page, usize::MAX))
            .next()
            .is_some()
    }

    /// 第 `page` 页的全部记录, 按实例编号升序.
    pub fn page(&self, page: usize) -> Vec<InstanceRecord> {
        self.rows()
            .range((page, 0)..=(page, usize::MAX))
            .map(|(_, r)| r.clone())
            .collect()
    }

    /// 全部审阅结论不是 "正确" 的记录.
    pub fn flagged(&self) -> Vec<InstanceRecord> {
        self.rows()
            .values()
            .filter(|r| r.label != ReviewLabel::Correct)
            .cloned()
            .collect()
    }

    /// 取出一条记录的拷贝.
    pub fn get(&self, page: usize, index: usize) -> Option<InstanceRecord> {
        self.rows().get(&(page, index)).cloned()
    }

    /// 全部记录, 按 `(page, index)` 升序.
    pub fn snapshot(&self) -> Vec<InstanceRecord> {
        self.rows().values().cloned().collect()
    }

    /// 仅当当前标签等于 `expected` 时改为 `new`.
    pub fn compare_and_set_label(
        &self,
        page: usize,
        index: usize,
        expected: ReviewLabel,
        new: ReviewLabel,
    ) -> Result<(), ReviewError> {
        let mut rows = self.rows();
        let row = rows
            .get_mut(&(page, index))
            .ok_or(ReviewError::UnknownRow { page, index })?;
        if row.label != expected {
            return Err(ReviewError::Conflict { page, index });
        }
        row.label = new;
        Ok(())
    }

    /// 将标签切换到下一个状态, 返回新标签.
    pub fn cycle_label(&self, page: usize, index: usize) -> Result<ReviewLabel, ReviewError> {
        let mut rows = self.rows();
        let row = rows
            .get_mut(&(page, index))
            .ok_or(ReviewError::UnknownRow { page, index })?;
        row.label = row.label.next();
        Ok(row.label)
    }

    /// 设置错误描述.
    pub fn set_error_tag(
        &self,
        page: usize,
        index: usize,
        tag: impl Into<String>,
    ) -> Result<(), ReviewError> {
        let mut rows = self.rows();
        let row = rows
            .get_mut(&(page, index))
            .ok_or(ReviewError::UnknownRow { page, index })?;
        row.error_description = tag.into();
        row.annotated = "Yes".to_string();
        Ok(())
    }

    /// 删除一条记录 (例如确认为假阳性), 返回被删除的记录.
    pub fn remove(&self, page: usize, index: usize) -> Result<InstanceRecord, ReviewError> {
        self.rows()
            .remove(&(page, index))
            .ok_or(ReviewError::UnknownRow { page, index })
    }

    /// 导出为 JSON 数组.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.snapshot())
    }

    /// 写出到 JSON 文件.
    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let s = self.to_json().map_err(io::Error::from)?;
        fs::write(path, s)
    }

    /// 从 JSON 文件读入. 出现重复键时以后出现者为准.
    pub fn read_json<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let s = fs::read_to_string(path)?;
        let records: Vec<InstanceRecord> = serde_json::from_str(&s).map_err(io::Error::from)?;
        let rows = records
            .into_iter()
            .map(|r| ((r.page, r.index), r))
            .collect();
        Ok(Self {
            rows: Mutex::new(rows),
        })
    }
}

/// `n` 个实例按每页 `per_page` 个需要的页数.
#[inline]
pub fn page_count(n: usize, per_page: usize) -> usize {
    assert!(per_page > 0);
    n.div_ceil(per_page)
}

/// 第 `page` 页 (从 1 开始) 的元素. 页码越界时返回空切片.
pub fn page_slice<T>(items: &[T], page: usize, per_page: usize) -> &[T] {
    assert!(per_page > 0);
    if page == 0 {
        return &[];
    }
    let start = ((page - 1) * per_page).min(items.len());
    let end = (start + per_page).min(items.len());
    &items[start..end]
}
