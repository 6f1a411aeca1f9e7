//! 渲染上下文与审阅会话.
//!
//! [`RenderContext`] 收拢了一次运行所需的全部只读状态: 配置, 两个体数据源与输出布局.
//! [`Session`] 在此之上持有共享元数据表与工作线程池, 按页驱动渲染.

use std::fmt;
use std::sync::Arc;

use log::{error, info, warn};
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::batch::{retry_once, run_batch, with_timeout, Attempt, RetryPolicy};
use crate::config::RenderConfig;
use crate::data::{common_shape, VolumeSource};
use crate::error::{ConfigError, ReviewError};
use crate::metadata::{page_count, page_slice, InstanceRecord, MetadataTable};
use crate::render::{render_instance, InstanceSeed, OutputLayout};
use crate::Idx3d;

/// 一次运行的只读上下文. 可以在线程间共享.
pub struct RenderContext {
    /// 已校验的配置.
    pub config: RenderConfig,
    /// EM 图像源.
    pub image: Arc<dyn VolumeSource<u8>>,
    /// 标签源.
    pub label: Arc<dyn VolumeSource<u32>>,
    /// 输出布局.
    pub layout: OutputLayout,
    shape: Idx3d,
}

impl RenderContext {
    /// 创建上下文. 两个源的形状不同时以逐轴最小值为工作形状.
    pub fn new(
        config: RenderConfig,
        image: Arc<dyn VolumeSource<u8>>,
        label: Arc<dyn VolumeSource<u32>>,
    ) -> Self {
        let shape = common_shape(image.shape(), label.shape());
        let layout = OutputLayout::new(&config.output_dir);
        Self {
            config,
            image,
            label,
            layout,
            shape,
        }
    }

    /// 工作形状 `(z, y, x)`.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        self.shape
    }
}

impl fmt::Debug for RenderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderContext")
            .field("config", &self.config)
            .field("layout", &self.layout)
            .field("shape", &self.shape)
            .finish_non_exhaustive()
    }
}

/// 单页处理报告.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PageReport {
    /// 页码.
    pub page: usize,
    /// 成功的实例数.
    pub succeeded: usize,
    /// 被丢弃的实例及原因, 按实例编号升序.
    pub dropped: Vec<(usize, String)>,
    /// 该页此前已经生成过, 本次没有重新计算.
    pub cached: bool,
}

impl fmt::Display for PageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Page {}: {} succeeded, {} dropped",
            self.page,
            self.succeeded,
            self.dropped.len()
        )?;
        if self.cached {
            write!(f, " (cached)")?;
        }
        for (index, reason) in &self.dropped {
            write!(f, "\n    #{index}: {reason}")?;
        }
        Ok(())
    }
}

/// 审阅会话.
pub struct Session {
    ctx: Arc<RenderContext>,
    table: MetadataTable,
    pool: ThreadPool,
    policy: RetryPolicy,
}

impl Session {
    /// 校验配置并创建会话. 配置错误在处理任何实例之前报告.
    pub fn new(
        config: RenderConfig,
        image: Arc<dyn VolumeSource<u8>>,
        label: Arc<dyn VolumeSource<u32>>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .thread_name(|i| format!("syn-worker-{i}"))
            .build()?;
        let policy = RetryPolicy::once(config.task_timeout());
        Ok(Self {
            ctx: Arc::new(RenderContext::new(config, image, label)),
            table: MetadataTable::new(),
            pool,
            policy,
        })
    }

    /// 渲染上下文.
    #[inline]
    pub fn context(&self) -> &RenderContext {
        &self.ctx
    }

    /// 共享元数据表.
    #[inline]
    pub fn table(&self) -> &MetadataTable {
        &self.table
    }

    /// 渲染第 `page` 页的全部实例.
    ///
    /// 已经生成过的页不会重新计算. 单个实例失败只会使它被丢弃, 不影响同页其它实例.
    ///
    /// 每次尝试写入各自的暂存目录, 只有被接受的尝试才会提交到 `Img/<index>` 与 `Syn/<index>`.
    /// 超时的尝试被取消, 之后即使仍在运行也不会再产生输出.
    pub fn process_page(&self, page: usize, seeds: &[InstanceSeed]) -> PageReport {
        if self.table.has_page(page) {
            info!("第 {page} 页已存在, 跳过");
            return PageReport {
                page,
                succeeded: self.table.page(page).len(),
                dropped: vec![],
                cached: true,
            };
        }

        let mut outcomes = run_batch(&self.pool, seeds, |seed| {
            let name = format!("instance-{}", seed.index);
            retry_once(&name, &self.policy, |n| {
                let attempt = Attempt::new(n);
                let (ctx, job_seed) = (Arc::clone(&self.ctx), seed.clone());
                let record = with_timeout(&name, self.policy.timeout, &attempt, move |a| {
                    render_instance(&ctx, page, &job_seed, &a)
                })?;
                self.ctx.layout.commit(seed.index, attempt.id())?;
                Ok(record)
            })
        });
        outcomes.sort_by_key(|(i, _)| seeds[*i].index);

        let mut report = PageReport {
            page,
            ..Default::default()
        };
        for (i, outcome) in outcomes {
            let index = seeds[i].index;
            if let Err(e) = self.ctx.layout.discard_staged(index) {
                warn!("清理实例 {index} 的暂存目录失败: {e}");
            }
            let reason = match outcome {
                Ok(record) => match self.table.insert(record) {
                    Ok(()) => {
                        report.succeeded += 1;
                        continue;
                    }
                    Err(e) => e.to_string(),
                },
                Err(e) => e.to_string(),
            };
            error!("实例 {index} 被丢弃: {reason}");
            if let Err(e) = self.ctx.layout.release(index) {
                warn!("清理实例 {index} 的切片失败: {e}");
            }
            report.dropped.push((index, reason));
        }
        info!("{report}");
        report
    }

    /// 按配置的每页实例数依次处理全部页.
    pub fn process_all(&self, seeds: &[InstanceSeed]) -> Vec<PageReport> {
        let per_page = self.ctx.config.per_page;
        (1..=page_count(seeds.len(), per_page))
            .map(|page| self.process_page(page, page_slice(seeds, page, per_page)))
            .collect()
    }

    /// 将实例标记为假阳性并丢弃: 删除元数据记录与全部切片.
    pub fn discard(&self, page: usize, index: usize) -> Result<InstanceRecord, ReviewError> {
        let record = self.table.remove(page, index)?;
        if let Err(e) = self.ctx.layout.release(index) {
            warn!("清理实例 {index} 的切片失败: {e}");
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    use ndarray::Array3;

    use crate::axis::{Axis, AxisOrder};
    use crate::config::{CropSize, MarkerStyle};
    use crate::data::{BoxQuery, RemoteVolume, Volume};
    use crate::error::FetchError;
    use crate::geometry::Region3;
    use crate::render::{discover_instances, seeds_from_table, SynapseRecord};

    fn init_log() {
        let _ = simple_logger::SimpleLogger::new()
            .with_level(log::LevelFilter::Warn)
            .init();
    }

    /// 以 `c` 为中心, 半径 `r` 的球. `x < c.x` 的半球为突触前 (1), 其余为突触后 (2).
    fn semantic_sphere(shape: Idx3d, c: [i64; 3], r: i64) -> Array3<u32> {
        Array3::from_shape_fn(shape, |(z, y, x)| {
            let p = [z as i64, y as i64, x as i64];
            let d: i64 = (0..3).map(|k| (p[k] - c[k]).pow(2)).sum();
            match (d <= r * r, p[2] < c[2]) {
                (false, _) => 0,
                (true, true) => 1,
                (true, false) => 2,
            }
        })
    }

    fn small_config(out: &Path) -> RenderConfig {
        RenderConfig {
            crop_size: CropSize { x: 8, y: 8, z: 4 },
            small_object_threshold: 4,
            workers: 2,
            marker: MarkerStyle {
                radius: 1,
                ..Default::default()
            },
            output_dir: out.to_path_buf(),
            ..Default::default()
        }
    }

    fn ramp_image(shape: Idx3d) -> Volume<u8> {
        Volume::from_internal(Array3::from_shape_fn(shape, |(z, y, x)| {
            (z * 7 + y * 3 + x) as u8
        }))
    }

    fn local_session(label: Array3<u32>, out: &Path) -> (Session, Vec<InstanceSeed>) {
        let cfg = small_config(out);
        let discovery = discover_instances(&Volume::from_internal(label), &cfg);
        let image = ramp_image(discovery.syn.shape());
        let session = Session::new(cfg, Arc::new(image), Arc::new(discovery.syn)).unwrap();
        (session, discovery.seeds)
    }

    fn png_dims(p: &Path) -> (u32, u32) {
        image::open(p).unwrap().into_rgba8().dimensions()
    }

    #[test]
    fn test_sphere_end_to_end() {
        init_log();
        let dir = tempfile::tempdir().unwrap();
        let label = semantic_sphere((20, 20, 20), [10, 10, 10], 3);
        let (session, seeds) = local_session(label, dir.path());
        assert_eq!(seeds.len(), 1);

        let report = session.process_page(1, &seeds);
        assert_eq!(report.succeeded, 1);
        assert!(report.dropped.is_empty());

        let r = session.table().get(1, 0).unwrap();
        assert_eq!(r.middle_slice, 10);
        assert_eq!(r.original_bbox, [7, 14, 7, 14, 7, 14]);
        assert_eq!(r.adjusted_bbox, [7, 14, 4, 16, 4, 16]);
        assert_eq!(r.padding, [[0, 0]; 3]);
        assert_eq!(r.rotation_angle, 0.0);
        assert_eq!((r.crop_size_x, r.crop_size_y, r.crop_size_z), (8, 8, 7));
        assert_eq!((r.x_index, r.y_index, r.z_index), (2, 1, 0));
        assert!(r.pre_pt_x.is_some() && r.post_pt_x.is_some());
        // 外部顺序 (z, y, x): 第一个分量是切片在栈中的序号.
        assert_eq!(r.pre_pt_crop.map(|p| p[0]), Some(3.0));

        // 一个实例目录对, 每张切片 8 x 8, 文件名为绝对切片号.
        let img_dir = dir.path().join("Img").join("0");
        let syn_dir = dir.path().join("Syn").join("0");
        assert_eq!(std::fs::read_dir(dir.path().join("Img")).unwrap().count(), 1);
        assert_eq!(std::fs::read_dir(&img_dir).unwrap().count(), 7);
        assert_eq!(std::fs::read_dir(&syn_dir).unwrap().count(), 7);
        for z in 7..14 {
            assert_eq!(png_dims(&img_dir.join(format!("{z}.png"))), (8, 8));
            assert_eq!(png_dims(&syn_dir.join(format!("{z}.png"))), (8, 8));
        }

        // 中间切片: 突触前在左, 突触后在右, 角落背景透明.
        let mid = image::open(syn_dir.join("10.png")).unwrap().into_rgba8();
        assert_eq!(mid.get_pixel(0, 0).0[3], 0);
        assert_eq!(mid.get_pixel(2, 3).0, [255, 0, 255, 255]);
        assert_eq!(mid.get_pixel(6, 3).0, [0, 255, 255, 255]);

        // 已生成的页不会重新计算.
        let again = session.process_page(1, &seeds);
        assert!(again.cached);
        assert_eq!(again.succeeded, 1);
        assert_eq!(session.table().len(), 1);
    }

    #[test]
    fn test_boundary_sphere_is_padded() {
        init_log();
        let dir = tempfile::tempdir().unwrap();
        let label = semantic_sphere((20, 20, 20), [1, 1, 1], 3);
        let (session, seeds) = local_session(label, dir.path());
        assert_eq!(seeds.len(), 1);

        let report = session.process_page(1, &seeds);
        assert_eq!(report.succeeded, 1, "{report}");
        let r = session.table().get(1, 0).unwrap();
        assert_eq!(r.original_bbox, [0, 5, 0, 5, 0, 5]);
        assert_eq!(r.adjusted_bbox, [0, 5, 0, 8, 0, 8]);
        assert_eq!(r.padding, [[0, 0], [4, 0], [4, 0]]);

        let img_dir = dir.path().join("Img").join("0");
        for z in 0..5 {
            assert_eq!(png_dims(&img_dir.join(format!("{z}.png"))), (8, 8));
        }
        // 中间切片是完整的 4 x 4 方块, 不需要旋转, 左上角正好是填充区域.
        assert_eq!(r.rotation_angle, 0.0);
        let em = image::open(img_dir.join("2.png")).unwrap().into_luma8();
        assert_eq!(em.get_pixel(0, 0).0[0], 128);
        assert_eq!(em.get_pixel(7, 7).0[0], (2 * 7 + 5 * 3 + 5) as u8);
    }

    #[test]
    fn test_rerun_is_deterministic() {
        let label = semantic_sphere((20, 24, 22), [9, 12, 10], 4);
        let run = || {
            let dir = tempfile::tempdir().unwrap();
            let (session, seeds) = local_session(label.clone(), dir.path());
            session.process_all(&seeds);
            session.table().snapshot()
        };
        let (a, b) = (run(), run());
        assert_eq!(a.len(), 1);
        assert_eq!(a.len(), b.len());
        assert!(a.iter().zip(&b).all(|(x, y)| x.same_geometry(y)));
    }

    #[test]
    fn test_pages_and_discard() {
        let dir = tempfile::tempdir().unwrap();
        // 三个互不相邻的小球.
        let mut label = Array3::<u32>::zeros((12, 40, 40));
        for cx in [8, 20, 32] {
            let s = semantic_sphere((12, 40, 40), [6, 20, cx], 2);
            label.zip_mut_with(&s, |a, &b| *a = (*a).max(b));
        }
        let cfg = RenderConfig {
            per_page: 2,
            ..small_config(dir.path())
        };
        let discovery = discover_instances(&Volume::from_internal(label), &cfg);
        assert_eq!(discovery.seeds.len(), 3);
        let image = ramp_image(discovery.syn.shape());
        let session = Session::new(cfg, Arc::new(image), Arc::new(discovery.syn)).unwrap();

        let reports = session.process_all(&discovery.seeds);
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].succeeded, 2);
        assert_eq!(reports[1].succeeded, 1);
        let idx: Vec<usize> = session.table().page(1).iter().map(|r| r.index).collect();
        assert_eq!(idx, [0, 1]);

        session.discard(2, 2).unwrap();
        assert!(!dir.path().join("Img").join("2").exists());
        assert_eq!(
            session.discard(2, 2),
            Err(ReviewError::UnknownRow { page: 2, index: 2 })
        );
    }

    #[test]
    fn test_rejects_bad_config() {
        let cfg = RenderConfig {
            crop_size: CropSize { x: 8, y: 0, z: 4 },
            ..Default::default()
        };
        let v = Arc::new(Volume::from_internal(Array3::<u32>::zeros((2, 2, 2))));
        let img = Arc::new(Volume::from_internal(Array3::<u8>::zeros((2, 2, 2))));
        assert!(matches!(
            Session::new(cfg, img, v),
            Err(ConfigError::ZeroCropSize("y"))
        ));
    }

    /// 以 `(x, y, z)` 顺序保存的标签存储, 前 `failures` 次下载失败.
    struct XyzStore {
        data: Array3<u32>,
        failures: AtomicUsize,
    }

    impl BoxQuery<u32> for XyzStore {
        fn size(&self) -> [usize; 3] {
            let (a, b, c) = self.data.dim();
            [a, b, c]
        }

        fn download(&self, min: [usize; 3], max: [usize; 3]) -> Result<Array3<u32>, FetchError> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(FetchError::Transient("503".into()));
            }
            use ndarray::s;
            Ok(self
                .data
                .slice(s![min[0]..max[0], min[1]..max[1], min[2]..max[2]])
                .to_owned())
        }
    }

    /// 实例编码的标签: 编号 5 的球, 以及请求区域角落里编号 9 的小块.
    fn remote_session(out: &Path, failures: usize) -> Session {
        let order: AxisOrder = "xyz".parse().unwrap();
        let zyx = Array3::from_shape_fn((20, 20, 20), |(z, y, x)| {
            let d = (z as i64 - 10).pow(2) + (y as i64 - 10).pow(2) + (x as i64 - 10).pow(2);
            if d <= 9 {
                5
            } else if z == 8 && y == 6 && (x == 6 || x == 7) {
                9
            } else {
                0
            }
        });
        let xyz = zyx.permuted_axes([2, 1, 0]).as_standard_layout().into_owned();
        let label = RemoteVolume::new(
            XyzStore {
                data: xyz,
                failures: AtomicUsize::new(failures),
            },
            order,
            [1.0; 3],
        )
        .unwrap();
        let image = Volume::from_ordered(Array3::<u8>::from_elem((20, 20, 20), 50), order);
        let cfg = RenderConfig {
            axis_order: order,
            ..small_config(out)
        };
        Session::new(cfg, Arc::new(image), Arc::new(label)).unwrap()
    }

    fn table_rows() -> Vec<SynapseRecord> {
        serde_json::from_str(r#"[{"x": 10, "y": 10, "z": 10, "pre_pt_x": 9, "pre_pt_y": 10, "pre_pt_z": 10}]"#)
            .unwrap()
    }

    #[test]
    fn test_remote_table_path() {
        init_log();
        let dir = tempfile::tempdir().unwrap();
        // 第一次下载失败, 由重试恢复.
        let session = remote_session(dir.path(), 1);
        let seeds = seeds_from_table(&table_rows(), &session.context().config, session.context().shape());
        assert_eq!(seeds[0].region, Region3::new([8, 6, 6], [12, 14, 14]).unwrap());

        let report = session.process_page(1, &seeds);
        assert_eq!(report.succeeded, 1, "{report}");
        let r = session.table().get(1, 0).unwrap();
        // 外部顺序 (x, y, z).
        assert_eq!((r.x_index, r.y_index, r.z_index), (0, 1, 2));
        assert_eq!(r.original_bbox, [7, 14, 7, 14, 8, 12]);
        assert_eq!(r.adjusted_bbox, [4, 16, 4, 16, 8, 12]);
        assert_eq!(r.middle_slice, 9);
        assert_eq!(r.pre_pt_x, Some(9));
        assert_eq!(r.pre_pt_crop.map(|p| p[2]), Some(2.0));
        assert_eq!(std::fs::read_dir(dir.path().join("Img").join("0")).unwrap().count(), 4);
    }

    #[test]
    fn test_persistent_failure_is_dropped() {
        init_log();
        let dir = tempfile::tempdir().unwrap();
        let session = remote_session(dir.path(), usize::MAX);
        let seeds = seeds_from_table(&table_rows(), &session.context().config, session.context().shape());
        let report = session.process_page(1, &seeds);
        assert_eq!(report.succeeded, 0);
        assert_eq!(report.dropped.len(), 1);
        assert!(report.dropped[0].1.contains("503"));
        assert!(session.table().is_empty());
        assert!(!dir.path().join("Img").join("0").exists());
    }

    /// 每次取数前先等待 `delay` 的图像源.
    struct SlowImage {
        inner: Volume<u8>,
        delay: Duration,
    }

    impl VolumeSource<u8> for SlowImage {
        fn shape(&self) -> Idx3d {
            self.inner.shape()
        }

        fn fetch(&self, region: &Region3) -> Result<Array3<u8>, FetchError> {
            thread::sleep(self.delay);
            self.inner.fetch(region)
        }
    }

    #[test]
    fn test_timed_out_attempt_leaves_no_output() {
        init_log();
        let dir = tempfile::tempdir().unwrap();
        let cfg = RenderConfig {
            task_timeout_secs: 0.1,
            ..small_config(dir.path())
        };
        let label = semantic_sphere((20, 20, 20), [10, 10, 10], 3);
        let discovery = discover_instances(&Volume::from_internal(label), &cfg);
        let image = SlowImage {
            inner: ramp_image(discovery.syn.shape()),
            delay: Duration::from_millis(400),
        };
        let session = Session::new(cfg, Arc::new(image), Arc::new(discovery.syn)).unwrap();

        let report = session.process_page(1, &discovery.seeds);
        assert_eq!(report.succeeded, 0);
        assert_eq!(report.dropped.len(), 1);
        assert!(session.table().is_empty());

        // 两次尝试的工作线程在超时后仍在运行, 等它们全部结束.
        thread::sleep(Duration::from_millis(1500));
        assert!(!dir.path().join("Img").join("0").exists());
        assert!(!dir.path().join("Syn").join("0").exists());
        let staged = fs::read_dir(dir.path().join(".staging")).map_or(0, |d| d.count());
        assert_eq!(staged, 0);
    }

    #[test]
    fn test_table_instance_near_first_slice() {
        init_log();
        // 实例编码的球, 中心在第 1 张切片, 请求区域的深度从 -1 开始.
        let label = Array3::from_shape_fn((20, 20, 20), |(z, y, x)| {
            let d = (z as i64 - 1).pow(2) + (y as i64 - 10).pow(2) + (x as i64 - 10).pow(2);
            if d <= 4 {
                5
            } else {
                0
            }
        });
        let rows: Vec<SynapseRecord> =
            serde_json::from_str(r#"[{"x": 10, "y": 10, "z": 1}]"#).unwrap();
        let run = |exempt_axis: Option<Axis>| {
            let dir = tempfile::tempdir().unwrap();
            let cfg = RenderConfig {
                exempt_axis,
                ..small_config(dir.path())
            };
            let session = Session::new(
                cfg,
                Arc::new(ramp_image((20, 20, 20))),
                Arc::new(Volume::from_internal(label.clone())),
            )
            .unwrap();
            let seeds = seeds_from_table(&rows, &session.context().config, session.context().shape());
            assert_eq!(seeds[0].region.lo[0], -1);
            let report = session.process_page(1, &seeds);
            assert_eq!(report.succeeded, 1, "{report}");

            let img_dir = dir.path().join("Img").join("0");
            let mut names: Vec<String> = fs::read_dir(&img_dir)
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            let padded = img_dir.join("-1.png");
            let em = padded
                .is_file()
                .then(|| image::open(&padded).unwrap().into_luma8().get_pixel(4, 4).0[0]);
            (session.table().get(1, 0).unwrap(), names, em)
        };

        // 不免填充: 体数据之外的一张切片以常量补齐, 文件名带负号.
        let (r, names, em) = run(None);
        assert_eq!(r.middle_slice, 1);
        assert_eq!(r.padding, [[1, 0], [0, 0], [0, 0]]);
        assert_eq!(&r.adjusted_bbox[..2], &[0, 3]);
        assert_eq!(r.crop_size_z, 4);
        assert_eq!(names, ["-1.png", "0.png", "1.png", "2.png"]);
        assert_eq!(em, Some(128));

        // 免填充 z: 只保留体数据内的切片.
        let (r, names, em) = run(Some(Axis::Z));
        assert_eq!(r.middle_slice, 1);
        assert_eq!(r.padding, [[0, 0]; 3]);
        assert_eq!(&r.adjusted_bbox[..2], &[0, 3]);
        assert_eq!(r.crop_size_z, 3);
        assert_eq!(names, ["0.png", "1.png", "2.png"]);
        assert_eq!(em, None);
    }
}
