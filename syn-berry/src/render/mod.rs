//! 单实例渲染流水线.
//!
//! 每个实例严格按顺序经过以下步骤, 中途不回退:
//!
//! 1. 识别: 从请求区域的标签中分离出单个实例.
//! 2. 定界: 计算三维紧包围盒, 中间切片取 z 范围的向下取整平均.
//! 3. 规划: 取中间切片的二维包围盒, 重新居中到 `ceil(输出尺寸 * √2)` 的画布.
//! 4. 裁剪: 取出画布对应的图像与标签, 越界部分以常量填充, 标签中的邻居被抹去.
//! 5. 旋转: 在中间切片上估计角度, 所有切片按同一角度旋转后中心裁剪到输出尺寸.
//! 6. 着色: 极性编码为颜色, 叠加突触前后标记点, 纯黑像素透明.
//! 7. 落盘: 按绝对切片号把 EM 与标签切片写入本次尝试的暂存目录, 生成元数据记录.
//!
//! 暂存结果由会话在尝试被接受后提交到最终目录.

use std::collections::BTreeMap;

use log::{debug, info, warn};
use ndarray::{s, Array3, Axis as NdAxis, Zip};
use serde::{Deserialize, Serialize};

use crate::axis::Axis;
use crate::batch::{fetch_pair, Attempt};
use crate::config::RenderConfig;
use crate::consts::polarity::{self, BACKGROUND};
use crate::consts::ROTATION_MARGIN;
use crate::crop::{center_crop, crop_pad_3d, pad_3d};
use crate::data::morph_3d::centroid_where;
use crate::data::slice::ImgWriteRaw;
use crate::data::{resample_labels, Volume, VolumeSource};
use crate::error::RenderError;
use crate::geometry::{intersect_and_pad, resize_to, tight_bbox, tight_bbox_3d, Region3};
use crate::metadata::{InstanceRecord, ReviewLabel};
use crate::rotation::{canonical_polarity, estimate, rotate_image, rotate_labels, rotate_point};
use crate::segment::{instances_from_volume, isolate_center_instance, isolate_instance, parity_of};
use crate::session::RenderContext;
use crate::{Idx2d, Idx3d, Pos3d};

pub mod colour;
pub mod layout;

pub use layout::OutputLayout;

use colour::Marker;

/// 在请求区域中识别实例的方式.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Detect {
    /// 标签源已是带极性的实例编码, 取出编号为该值的实例.
    Label(u32),
    /// 选择最靠近请求区域中心的连通分量.
    CenterBlob,
}

/// 一个待渲染实例.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InstanceSeed {
    /// 实例编号, 全局唯一.
    pub index: usize,
    /// 识别实例时取数的区域 (工作坐标, 可以越界).
    pub region: Region3,
    /// 识别方式.
    pub detect: Detect,
    /// 突触前点 `(z, y, x)`.
    pub pre: Option<Pos3d>,
    /// 突触后点 `(z, y, x)`.
    pub post: Option<Pos3d>,
}

/// 整卷发现的结果.
#[derive(Clone, Debug)]
pub struct Discovery {
    /// 带极性的实例编码, 作为渲染时的标签源.
    pub syn: Volume<u32>,
    /// 全部实例, 按实例编号升序.
    pub seeds: Vec<InstanceSeed>,
}

/// 从整卷标签中发现全部实例.
///
/// 每个实例的请求区域就是它的紧包围盒; 突触前后点取对应极性体素的质心 (四舍五入).
pub fn discover_instances(label: &Volume<u32>, config: &RenderConfig) -> Discovery {
    let instances = instances_from_volume(label.data(), config.small_object_threshold);

    let mut boxes: BTreeMap<u32, ([usize; 3], [usize; 3])> = BTreeMap::new();
    for ((z, y, x), &s) in instances.seg.indexed_iter() {
        if s == 0 {
            continue;
        }
        let p = [z, y, x];
        let (lo, hi) = boxes.entry(s).or_insert((p, p));
        for ax in 0..3 {
            lo[ax] = lo[ax].min(p[ax]);
            hi[ax] = hi[ax].max(p[ax]);
        }
    }

    let seeds = boxes
        .into_iter()
        .enumerate()
        .map(|(index, (id, (lo, hi)))| {
            let window = instances
                .syn
                .slice(s![lo[0]..=hi[0], lo[1]..=hi[1], lo[2]..=hi[2]]);
            let point = |class: u8| {
                centroid_where(window, |&v| (v + 1) / 2 == id && parity_of(v) == class).map(|c| {
                    (
                        (c[0] + lo[0] as f64).round() as i64,
                        (c[1] + lo[1] as f64).round() as i64,
                        (c[2] + lo[2] as f64).round() as i64,
                    )
                })
            };
            InstanceSeed {
                index,
                region: Region3::from_inclusive([(lo[0], hi[0]), (lo[1], hi[1]), (lo[2], hi[2])]),
                detect: Detect::Label(id),
                pre: point(polarity::PRE),
                post: point(polarity::POST),
            }
        })
        .collect::<Vec<_>>();
    debug!("发现 {} 个实例", seeds.len());

    Discovery {
        syn: Volume::from_internal(instances.syn),
        seeds,
    }
}

/// 突触表中的一行. 坐标均为逻辑轴, 与存储的坐标轴顺序无关.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SynapseRecord {
    /// 突触中心.
    pub x: i64,
    #[allow(missing_docs)]
    pub y: i64,
    #[allow(missing_docs)]
    pub z: i64,
    /// 突触前点.
    #[serde(default)]
    pub pre_pt_x: Option<i64>,
    #[allow(missing_docs)]
    #[serde(default)]
    pub pre_pt_y: Option<i64>,
    #[allow(missing_docs)]
    #[serde(default)]
    pub pre_pt_z: Option<i64>,
    /// 突触后点.
    #[serde(default)]
    pub post_pt_x: Option<i64>,
    #[allow(missing_docs)]
    #[serde(default)]
    pub post_pt_y: Option<i64>,
    #[allow(missing_docs)]
    #[serde(default)]
    pub post_pt_z: Option<i64>,
}

/// 由突触表生成实例. 请求区域为中心加减输出尺寸的一半.
///
/// 中心不在 `shape` 之内或不满足 [`RenderConfig::table_filter`] 的行被跳过.
/// 实例编号为行号.
pub fn seeds_from_table(
    records: &[SynapseRecord],
    config: &RenderConfig,
    shape: Idx3d,
) -> Vec<InstanceSeed> {
    let size = config.crop_size.internal().map(|v| v as i64);
    let bound = [shape.0 as i64, shape.1 as i64, shape.2 as i64];
    let triple = |z: Option<i64>, y: Option<i64>, x: Option<i64>| Some((z?, y?, x?));
    let filter = &config.table_filter;

    let seeds: Vec<_> = records
        .iter()
        .enumerate()
        .filter_map(|(index, r)| {
            let center = [r.z, r.y, r.x];
            if !filter.keeps(index, (r.z, r.y, r.x)) {
                return None;
            }
            if (0..3).any(|ax| center[ax] < 0 || center[ax] >= bound[ax]) {
                warn!("突触表第 {index} 行的中心 {center:?} 不在体数据内, 跳过");
                return None;
            }
            let lo = [0, 1, 2].map(|ax| center[ax] - size[ax] / 2);
            let hi = [0, 1, 2].map(|ax| lo[ax] + size[ax]);
            Some(InstanceSeed {
                index,
                region: Region3 { lo, hi },
                detect: Detect::CenterBlob,
                pre: triple(r.pre_pt_z, r.pre_pt_y, r.pre_pt_x),
                post: triple(r.post_pt_z, r.post_pt_y, r.post_pt_x),
            })
        })
        .collect();
    if seeds.len() < records.len() {
        info!("突触表共 {} 行, 保留 {} 行", records.len(), seeds.len());
    }
    seeds
}

/// 取出标签区域并重采样到区域形状.
fn fetch_label(source: &dyn VolumeSource<u32>, region: &Region3) -> Result<Array3<u32>, RenderError> {
    let raw = source.fetch(region)?;
    Ok(if raw.dim() == region.shape() {
        raw
    } else {
        resample_labels(raw.view(), region.shape())
    })
}

/// 为抵消旋转裁角而放大的画布边长.
#[inline]
fn inflate(n: usize) -> usize {
    (n as f64 * ROTATION_MARGIN).ceil() as usize
}

/// 截断到体数据内.
fn clamp_point((z, y, x): Pos3d, shape: Idx3d) -> Pos3d {
    let hi = |n: usize| (n as i64 - 1).max(0);
    (z.clamp(0, hi(shape.0)), y.clamp(0, hi(shape.1)), x.clamp(0, hi(shape.2)))
}

/// 渲染单个实例, 把切片写入 `attempt` 的暂存目录并返回元数据记录.
///
/// 记录中的目录是最终目录; 切片要等 [`OutputLayout::commit`] 之后才出现在那里.
///
/// 以表格给出的实例沿 z 轴取请求区域的深度, 因而靠近体数据边界时
/// 是否补齐由 `exempt_axis` 决定. 整卷发现的实例取紧包围盒的深度, 不会越界.
///
/// # 注意
///
/// `attempt` 被取消后不再写任何切片, 已写入的暂存目录会被删除.
///
/// # 返回值
///
/// 1. 区域中没有实例时返回 [`RenderError::NoInstance`].
/// 2. 尝试已被取消时返回 [`RenderError::Cancelled`].
/// 3. 几何, 取数与落盘错误原样向上传递, 由批处理层决定是否重试.
pub fn render_instance(
    ctx: &RenderContext,
    page: usize,
    seed: &InstanceSeed,
    attempt: &Attempt,
) -> Result<InstanceRecord, RenderError> {
    let cfg = &ctx.config;
    let shape = ctx.shape();
    debug!("开始渲染实例 {} (page = {page})", seed.index);

    // 识别
    let (detect_box, _) = intersect_and_pad(&seed.region, shape, None)?;
    let raw = fetch_label(ctx.label.as_ref(), &detect_box)?;
    let instance = match seed.detect {
        Detect::Label(id) => isolate_instance(raw.view(), id),
        Detect::CenterBlob => isolate_center_instance(raw.view(), cfg.small_object_threshold),
    };
    if instance.is_empty() {
        return Err(RenderError::NoInstance);
    }

    // 定界
    let bbox = tight_bbox_3d(&instance.polarity)?;
    let original = Region3::from_inclusive(bbox).translate(detect_box.lo);
    let middle = (original.lo[0] + original.hi[0] - 1) / 2;

    // 规划
    let plane = instance
        .polarity
        .index_axis(NdAxis(0), (middle - detect_box.lo[0]) as usize);
    let [(y0, y1), (x0, x1)] = match tight_bbox(&plane) {
        Ok(b) => [b[0], b[1]],
        Err(_) => [bbox[1], bbox[2]],
    };
    let footprint: Idx2d = cfg.crop_size.footprint();
    let (dy, dx) = (detect_box.lo[1], detect_box.lo[2]);
    let ys = resize_to(y0 as i64 + dy, y1 as i64 + dy, inflate(footprint.0))?;
    let xs = resize_to(x0 as i64 + dx, x1 as i64 + dx, inflate(footprint.1))?;
    let zs = match seed.detect {
        Detect::Label(_) => (original.lo[0], original.hi[0]),
        Detect::CenterBlob => (seed.region.lo[0], seed.region.hi[0]),
    };
    let planned = Region3::new([zs.0, ys.0, xs.0], [zs.1, ys.1, xs.1])?;
    let (clamped, padding) = intersect_and_pad(&planned, shape, cfg.exempt_axis)?;

    // 裁剪
    attempt.check()?;
    let (image, label) = fetch_pair(ctx.image.as_ref(), ctx.label.as_ref(), &clamped)?;
    let (keep, _) = crop_pad_3d(
        instance.mask.view(),
        &clamped.relative_to(&detect_box),
        false,
        None,
    )?;
    let polarity = Zip::from(&label)
        .and(&keep)
        .map_collect(|&v, &k| if k { parity_of(v) } else { BACKGROUND });
    let image = pad_3d(image.view(), &padding, cfg.pad.image);
    let polarity = pad_3d(polarity.view(), &padding, cfg.pad.label);

    // 旋转
    let z_origin = clamped.lo[0] - padding.pairs[0].0 as i64;
    let mid_slice = polarity.index_axis(NdAxis(0), (middle - z_origin) as usize);
    let est = estimate(mid_slice, cfg.regression)?;
    let angle = canonical_polarity(mid_slice, est.angle);
    debug!(
        "实例 {}: 斜率 {:.4}, 交叠 {} 像素, 旋转 {angle:.2} 度",
        seed.index, est.slope, est.overlap
    );

    let (_, canvas_h, canvas_w) = image.dim();
    let canvas = (canvas_h, canvas_w);
    let images: Vec<_> = image
        .outer_iter()
        .map(|s| center_crop(rotate_image(s, angle, cfg.pad.image).view(), footprint))
        .collect();
    let labels: Vec<_> = polarity
        .outer_iter()
        .map(|s| center_crop(rotate_labels(s, angle).view(), footprint))
        .collect();

    // 着色
    let (top, left) = ((canvas_h - footprint.0) / 2, (canvas_w - footprint.1) / 2);
    let to_crop = |p: Pos3d| {
        let (z, y, x) = clamp_point(p, shape);
        let (row, col) = rotate_point(
            ((y - planned.lo[1]) as f64, (x - planned.lo[2]) as f64),
            angle,
            canvas,
        );
        (row - top as f64, col - left as f64, z)
    };
    let pre = seed.pre.map(&to_crop);
    let post = seed.post.map(&to_crop);
    let markers: Vec<Marker> = [(pre, cfg.marker.pre_colors), (post, cfg.marker.post_colors)]
        .into_iter()
        .filter_map(|(p, colors)| {
            p.map(|(row, col, z)| Marker {
                at: (row, col),
                z,
                colors,
            })
        })
        .collect();

    // 落盘
    attempt.check()?;
    let (staged_img, staged_syn) = ctx.layout.stage(seed.index, attempt.id())?;
    let written = images
        .iter()
        .zip(&labels)
        .enumerate()
        .try_for_each(|(k, (img, lbl))| -> Result<(), RenderError> {
            attempt.check()?;
            let z = z_origin + k as i64;
            img.save_raw(OutputLayout::slice_file(&staged_img, z))?;
            let mut rgb = colour::encode_polarity(lbl.view(), &cfg.polarity_colors);
            colour::draw_markers(&mut rgb, z, &markers, &cfg.marker);
            colour::with_alpha(&rgb).save_raw(OutputLayout::slice_file(&staged_syn, z))?;
            Ok(())
        })
        .and_then(|()| attempt.check());
    if let Err(e) = written {
        if let Err(io) = ctx.layout.discard_attempt(seed.index, attempt.id()) {
            warn!("清理实例 {} 的暂存目录失败: {io}", seed.index);
        }
        return Err(e);
    }

    let order = cfg.axis_order;
    let crop_point = |p: Option<(f64, f64, i64)>| {
        p.map(|(row, col, z)| order.to_external([(z - z_origin) as f64, row, col]))
    };
    let record = InstanceRecord {
        page,
        index: seed.index,
        label_dir: ctx.layout.label_dir(seed.index),
        image_dir: ctx.layout.image_dir(seed.index),
        label: ReviewLabel::Correct,
        annotated: "No".to_string(),
        error_description: "None".to_string(),
        x_index: order.index_of(Axis::X),
        y_index: order.index_of(Axis::Y),
        z_index: order.index_of(Axis::Z),
        middle_slice: middle as usize,
        original_bbox: order.to_external_pairs(original.pairs()),
        adjusted_bbox: order.to_external_pairs(clamped.pairs()),
        padding: order.to_external(padding.pairs).map(|(a, b)| [a, b]),
        pre_pt_x: seed.pre.map(|p| p.2),
        pre_pt_y: seed.pre.map(|p| p.1),
        pre_pt_z: seed.pre.map(|p| p.0),
        post_pt_x: seed.post.map(|p| p.2),
        post_pt_y: seed.post.map(|p| p.1),
        post_pt_z: seed.post.map(|p| p.0),
        pre_pt_crop: crop_point(pre),
        post_pt_crop: crop_point(post),
        crop_size_x: footprint.1,
        crop_size_y: footprint.0,
        crop_size_z: images.len(),
        rotation_angle: angle,
    };
    debug!("实例 {} 渲染完成, 共 {} 张切片", seed.index, images.len());
    Ok(record)
}
