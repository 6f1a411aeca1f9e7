#![warn(missing_docs)] // <= 合适时移除它.
// #![warn(clippy::missing_docs_in_private_items)]  // <= too strict.

//! 核心库. 从电镜 (EM) 体数据与突触标签中提取突触实例, 完成几何对齐, 并逐切片渲染成审阅用的 PNG.
//!
//! 该 crate 目前仅提供 `safe` 接口.
//!
//! # 注意
//!
//! 1. 内部所有三维数组均为 `(z, y, x)` 顺序. 外部顺序 (例如 `(x, y, z)` 存储) 只在
//!   [`axis`] 与 [`data::remote`] 的边界上转换.
//! 2. 单个实例失败不会导致 panic 扩散, 而是以 [`error::RenderError`] 报告, 该实例被丢弃.
//!
//! # 流水线
//!
//! ### 实例发现 ✅
//!
//! 本地标签体: 语义标签先合成实例 ID, 每个实例得到一个种子 (包围盒与突触前后质心).
//! 远端数据: 由突触坐标表直接生成固定大小的种子.
//!
//! 实现位于 `syn-berry/src/render/mod.rs`, `syn-berry/src/segment.rs`.
//!
//! ### 三维形态学操作 ✅
//!
//! 6-邻域膨胀, 26-邻域连通分量标记, 小目标删除, 质心.
//!
//! 实现位于 `syn-berry/src/data/morph_3d`.
//!
//! ### 包围盒, 区域与填充 ✅
//!
//! 紧致包围盒, 定长化, 与体数据边界求交并计算填充量.
//!
//! 实现位于 `syn-berry/src/geometry`, `syn-berry/src/crop.rs`.
//!
//! ### 旋转对齐 ✅
//!
//! 在中间切片上拟合突触前后分界线, 求出使分界线竖直的旋转角, 并保证突触前在左.
//!
//! 实现位于 `syn-berry/src/rotation`.
//!
//! ### 渲染与落盘 ✅
//!
//! EM 灰度切片写入 `Img/<idx>/<z>.png`, 彩色标签切片 (带标记点, 黑色透明) 写入 `Syn/<idx>/<z>.png`.
//!
//! 实现位于 `syn-berry/src/render`.
//!
//! ### 并发, 重试与会话 ✅
//!
//! 固定大小线程池, 单次超时, 失败重试一次. 元数据表在线程间共享.
//!
//! 实现位于 `syn-berry/src/batch.rs`, `syn-berry/src/session.rs`, `syn-berry/src/metadata.rs`.

/// 二维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx2d = (usize, usize);

/// 三维索引 `(z, y, x)`, 同时也可一定程度上用作非负整数向量.
pub type Idx3d = (usize, usize, usize);

/// 有符号三维坐标 `(z, y, x)`. 可以落在体数据之外.
pub type Pos3d = (i64, i64, i64);

pub mod axis;
pub mod batch;
pub mod config;
pub mod consts;
pub mod crop;
pub mod data;
pub mod error;
pub mod geometry;
pub mod metadata;
pub mod render;
pub mod rotation;
pub mod segment;
pub mod session;

pub mod prelude;

pub use config::RenderConfig;
pub use data::{Volume, VolumeSource};
pub use session::{PageReport, RenderContext, Session};
