//! 程序运行函数.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};
use syn_berry::prelude::*;
use thiserror::Error;
use utils::loader;

use crate::report::RunResult;

/// 元数据表文件名. 写在输出目录旁边.
const METADATA_FILE: &str = "synAnno.json";

/// 运行失败的原因. 单个实例的失败不在此列, 它们记录在页报告中.
#[derive(Debug, Error)]
pub enum RunError {
    /// 配置错误.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// 无法读取体数据.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// 既没有 `$SYN_DATA_DIR`, 也无法确定 home 目录.
    #[error("无法确定数据目录, 请设置 $SYN_DATA_DIR")]
    NoDataDir,

    /// 读写突触表或元数据表失败.
    #[error("{path}: {source}")]
    Io {
        /// 文件路径.
        path: PathBuf,
        /// 底层错误.
        source: io::Error,
    },
}

/// 元数据表的落盘位置: `<output_dir>/../synAnno.json`.
fn metadata_path(output_dir: &Path) -> PathBuf {
    output_dir
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(METADATA_FILE)
}

/// 实际运行.
pub fn run(config_path: &Path, table_path: Option<&Path>) -> Result<RunResult, RunError> {
    let config = RenderConfig::open(config_path)?;
    if config.workers > utils::cpus() {
        warn!(
            "工作线程数 {} 超过可用核心数 {}",
            config.workers,
            utils::cpus()
        );
    }

    let data_dir = loader::data_dir_from_env_or_home().ok_or(RunError::NoDataDir)?;
    info!("从 {} 加载体数据", data_dir.display());
    let (image, label) = loader::load_pair(&data_dir, config.axis_order)?;

    let (label, seeds) = match table_path {
        Some(p) => {
            let records = loader::load_table(p).map_err(|source| RunError::Io {
                path: p.to_path_buf(),
                source,
            })?;
            let shape = syn_berry::data::common_shape(image.shape(), label.shape());
            let seeds = seeds_from_table(&records, &config, shape);
            (label, seeds)
        }
        None => {
            let Discovery { syn, seeds } = discover_instances(&label, &config);
            (syn, seeds)
        }
    };
    info!("共 {} 个实例", seeds.len());

    let output_dir = config.output_dir.clone();
    let session = Session::new(config, Arc::new(image), Arc::new(label))?;
    let reports = session.process_all(&seeds);

    let path = metadata_path(&output_dir);
    session
        .table()
        .write_json(&path)
        .map_err(|source| RunError::Io {
            path: path.clone(),
            source,
        })?;
    info!("元数据写入 {}", path.display());

    Ok(RunResult::new(seeds.len(), reports))
}
