//! 对 `syn-berry::data` 的更一层封装. 提供更直接的数据加载器.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use syn_berry::axis::AxisOrder;
use syn_berry::error::FetchError;
use syn_berry::render::SynapseRecord;
use syn_berry::Volume;

/// EM 图像文件名.
pub const IMAGE_FILE: &str = "image.npy";

/// 标签文件名.
pub const LABEL_FILE: &str = "label.npy";

/// 获取数据基本路径.
///
/// 1. 若环境变量 `$SYN_DATA_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/synanno`. 无法确定 home 目录时返回 `None`.
pub fn data_dir_from_env_or_home() -> Option<PathBuf> {
    match env::var("SYN_DATA_DIR") {
        Ok(d) if !d.is_empty() => Some(PathBuf::from(d)),
        _ => dirs::home_dir().map(|h| h.join("dataset").join("synanno")),
    }
}

/// 从 `dir` 加载 `image.npy` 与 `label.npy`. 两个文件都按 `order` 解释坐标轴.
pub fn load_pair<P: AsRef<Path>>(
    dir: P,
    order: AxisOrder,
) -> Result<(Volume<u8>, Volume<u32>), FetchError> {
    let dir = dir.as_ref();
    let image = Volume::open_npy(dir.join(IMAGE_FILE), order)?;
    let label = Volume::open_npy(dir.join(LABEL_FILE), order)?;
    Ok((image, label))
}

/// 读取 JSON 格式的突触表 (对象数组).
pub fn load_table<P: AsRef<Path>>(path: P) -> io::Result<Vec<SynapseRecord>> {
    let s = fs::read_to_string(path)?;
    serde_json::from_str(&s).map_err(io::Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use ndarray_npy::write_npy;
    use syn_berry::axis::Axis;

    #[test]
    fn test_load_pair_xyz() {
        let dir = tempfile::tempdir().unwrap();
        // 文件中为 (x, y, z) 顺序.
        write_npy(dir.path().join(IMAGE_FILE), &Array3::<u8>::zeros((5, 4, 3))).unwrap();
        write_npy(dir.path().join(LABEL_FILE), &Array3::<u32>::zeros((5, 4, 3))).unwrap();

        let xyz = AxisOrder::new([Axis::X, Axis::Y, Axis::Z]).unwrap();
        let (image, label) = load_pair(dir.path(), xyz).unwrap();
        assert_eq!(image.shape(), (3, 4, 5));
        assert_eq!(label.shape(), (3, 4, 5));
    }

    #[test]
    fn test_load_table() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("synapses.json");
        fs::write(&p, r#"[{"x": 1, "y": 2, "z": 3, "pre_pt_x": 0, "pre_pt_y": 2, "pre_pt_z": 3}]"#)
            .unwrap();
        let t = load_table(&p).unwrap();
        assert_eq!(t.len(), 1);
        assert_eq!((t[0].x, t[0].pre_pt_x, t[0].post_pt_x), (1, Some(0), None));
    }
}
