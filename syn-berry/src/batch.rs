//! 并发取数与重试.
//!
//! 每个实例是一个独立的工作单元: 取数, 分辨率对齐, 渲染. 单元之间除结果收集外不共享任何可变状态.
//! 单元失败后以相同参数重试一次, 第二次失败则被丢弃, 不影响同批次其它单元.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use log::{debug, warn};
use ndarray::Array3;
use rayon::ThreadPool;

use crate::data::{resample_labels, VolumeSource};
use crate::error::{FetchError, RenderError};
use crate::geometry::Region3;

/// 重试策略.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// 单次尝试的超时.
    pub timeout: Duration,
    /// 首次失败后的最多重试次数.
    pub retries: usize,
}

impl RetryPolicy {
    /// 只重试一次.
    #[inline]
    pub fn once(timeout: Duration) -> Self {
        Self {
            timeout,
            retries: 1,
        }
    }
}

/// 单次尝试的句柄. 超时后被标记为已取消, 尝试本身应在下一个检查点停下.
#[derive(Clone, Debug, Default)]
pub struct Attempt {
    id: usize,
    cancelled: Arc<AtomicBool>,
}

impl Attempt {
    /// 第 `id` 次尝试 (从 0 开始).
    pub fn new(id: usize) -> Self {
        Self {
            id,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 尝试序号.
    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    /// 标记为已取消. 所有克隆共享同一个标记.
    #[inline]
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// 是否已被取消.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// 检查点: 已取消时返回 [`RenderError::Cancelled`].
    #[inline]
    pub fn check(&self) -> Result<(), RenderError> {
        if self.is_cancelled() {
            Err(RenderError::Cancelled)
        } else {
            Ok(())
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<unknown>".to_string()
    }
}

/// 在独立线程上执行一次 `job`, 最多等待 `timeout`.
///
/// # 注意
///
/// 超时后工作线程不会被强行终止, 只是 `attempt` 被标记为已取消, 结果被丢弃.
/// `job` 应在有副作用的步骤之前调用 [`Attempt::check`].
/// `job` 内部的 panic 被捕获并转换为 [`RenderError::Panicked`].
pub fn with_timeout<T, F>(
    name: &str,
    timeout: Duration,
    attempt: &Attempt,
    job: F,
) -> Result<T, RenderError>
where
    T: Send + 'static,
    F: FnOnce(Attempt) -> Result<T, RenderError> + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(1);
    let handle = attempt.clone();
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let r = panic::catch_unwind(AssertUnwindSafe(move || job(handle)));
            let _ = tx.send(r);
        })?;
    match rx.recv_timeout(timeout) {
        Ok(Ok(r)) => r,
        Ok(Err(payload)) => Err(RenderError::Panicked {
            name: name.to_string(),
            message: panic_message(payload.as_ref()),
        }),
        Err(mpsc::RecvTimeoutError::Timeout) => {
            attempt.cancel();
            Err(RenderError::Timeout {
                name: name.to_string(),
                secs: timeout.as_secs_f64(),
            })
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(RenderError::Panicked {
            name: name.to_string(),
            message: "工作线程意外退出".to_string(),
        }),
    }
}

/// 按 `policy` 反复调用 `attempt`, 直到成功, 遇到不可重试的错误, 或者用完重试次数.
///
/// `attempt` 的参数是尝试序号, 从 0 开始.
pub fn retry_once<T, F>(name: &str, policy: &RetryPolicy, mut attempt: F) -> Result<T, RenderError>
where
    F: FnMut(usize) -> Result<T, RenderError>,
{
    let mut tried = 0;
    loop {
        match attempt(tried) {
            Err(e) if e.is_retryable() && tried < policy.retries => {
                tried += 1;
                warn!("`{name}` 第 {tried} 次失败, 重试: {e}");
            }
            other => return other,
        }
    }
}

/// 在固定大小的线程池上对每个单元执行 `op`.
///
/// # 返回值
///
/// `(单元下标, 结果)` 列表. 顺序与完成顺序一致, 调用方如需确定顺序请自行排序.
pub fn run_batch<U, T, F>(pool: &ThreadPool, units: &[U], op: F) -> Vec<(usize, Result<T, RenderError>)>
where
    U: Sync,
    T: Send,
    F: Fn(&U) -> Result<T, RenderError> + Sync,
{
    let outcomes = Mutex::new(Vec::with_capacity(units.len()));
    pool.scope(|s| {
        for (i, unit) in units.iter().enumerate() {
            let (op, outcomes) = (&op, &outcomes);
            s.spawn(move |_| {
                let r = op(unit);
                outcomes
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push((i, r));
            });
        }
    });
    outcomes.into_inner().unwrap_or_else(PoisonError::into_inner)
}

/// 同时取出图像与标签的 `region`. 两者形状不同时把标签重采样到图像形状.
///
/// # 注意
///
/// 图像裁剪的形状必须等于 `region.shape()`, 否则视为远端回复异常.
pub fn fetch_pair(
    image: &dyn VolumeSource<u8>,
    label: &dyn VolumeSource<u32>,
    region: &Region3,
) -> Result<(Array3<u8>, Array3<u32>), RenderError> {
    let img = image.fetch(region)?;
    if img.dim() != region.shape() {
        return Err(FetchError::Malformed {
            expected: region.shape(),
            got: img.dim(),
        }
        .into());
    }
    let mut lbl = label.fetch(region)?;
    if lbl.dim() != img.dim() {
        debug!("标签 {:?} 重采样到 {:?}", lbl.dim(), img.dim());
        lbl = resample_labels(lbl.view(), img.dim());
    }
    if lbl.dim() != img.dim() {
        return Err(RenderError::ShapeMismatch {
            image: img.dim(),
            label: lbl.dim(),
        });
    }
    Ok((img, lbl))
}
