//! 切片输出目录布局.
//!
//! ```text
//! <root>/Img/<index>/<z>.png   EM 灰度切片
//! <root>/Syn/<index>/<z>.png   彩色标签切片 (RGBA)
//! <root>/.staging/<index>.<attempt>/{Img,Syn}/   单次尝试的暂存目录
//! ```
//!
//! 每次尝试只写自己的暂存目录. 只有被接受的尝试才会被 [`OutputLayout::commit`]
//! 移动到最终位置, 超时或失败的尝试不会留下任何切片.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const IMAGE_DIR: &str = "Img";
const LABEL_DIR: &str = "Syn";
const STAGING_DIR: &str = ".staging";

/// 删除目录树. 目录不存在时什么也不做.
fn remove_tree(dir: &Path) -> io::Result<()> {
    match fs::remove_dir_all(dir) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// 输出根目录及其下的命名规则.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    /// 以 `root` 为根目录. 不会立即创建任何目录.
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// 根目录.
    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 实例 `index` 的 EM 切片目录.
    pub fn image_dir(&self, index: usize) -> PathBuf {
        self.root.join(IMAGE_DIR).join(index.to_string())
    }

    /// 实例 `index` 的标签切片目录.
    pub fn label_dir(&self, index: usize) -> PathBuf {
        self.root.join(LABEL_DIR).join(index.to_string())
    }

    /// 第 `z` 张切片的文件名. 体数据之外的填充切片带负号, 如 `-1.png`.
    #[inline]
    pub fn slice_file(dir: &Path, z: i64) -> PathBuf {
        dir.join(format!("{z}.png"))
    }

    /// 实例 `index` 第 `attempt` 次尝试的暂存目录.
    pub fn staging_dir(&self, index: usize, attempt: usize) -> PathBuf {
        self.root
            .join(STAGING_DIR)
            .join(format!("{index}.{attempt}"))
    }

    /// 创建一次尝试的暂存目录, 返回 `(EM 目录, 标签目录)`.
    ///
    /// 同名暂存目录中的旧内容会被先清空.
    pub fn stage(&self, index: usize, attempt: usize) -> io::Result<(PathBuf, PathBuf)> {
        let staged = self.staging_dir(index, attempt);
        remove_tree(&staged)?;
        let (img, syn) = (staged.join(IMAGE_DIR), staged.join(LABEL_DIR));
        fs::create_dir_all(&img)?;
        fs::create_dir_all(&syn)?;
        Ok((img, syn))
    }

    /// 将第 `attempt` 次尝试的暂存切片移动到实例 `index` 的最终目录.
    ///
    /// 最终目录中的旧切片会被先删除. 返回 `(EM 目录, 标签目录)`.
    pub fn commit(&self, index: usize, attempt: usize) -> io::Result<(PathBuf, PathBuf)> {
        let staged = self.staging_dir(index, attempt);
        let (img, syn) = (self.image_dir(index), self.label_dir(index));
        for (name, target) in [(IMAGE_DIR, &img), (LABEL_DIR, &syn)] {
            remove_tree(target)?;
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::rename(staged.join(name), target)?;
        }
        remove_tree(&staged)?;
        Ok((img, syn))
    }

    /// 删除第 `attempt` 次尝试的暂存目录.
    pub fn discard_attempt(&self, index: usize, attempt: usize) -> io::Result<()> {
        remove_tree(&self.staging_dir(index, attempt))
    }

    /// 删除实例 `index` 所有尝试的暂存目录.
    pub fn discard_staged(&self, index: usize) -> io::Result<()> {
        let entries = match fs::read_dir(self.root.join(STAGING_DIR)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        let prefix = format!("{index}.");
        for entry in entries {
            let entry = entry?;
            if entry.file_name().to_string_lossy().starts_with(&prefix) {
                remove_tree(&entry.path())?;
            }
        }
        Ok(())
    }

    /// 删除实例 `index` 的全部切片, 包括暂存目录. 目录不存在时什么也不做.
    pub fn release(&self, index: usize) -> io::Result<()> {
        remove_tree(&self.image_dir(index))?;
        remove_tree(&self.label_dir(index))?;
        self.discard_staged(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_paths() {
        let l = OutputLayout::new("/tmp/out");
        assert_eq!(l.image_dir(3), PathBuf::from("/tmp/out/Img/3"));
        assert_eq!(l.label_dir(3), PathBuf::from("/tmp/out/Syn/3"));
        assert_eq!(
            OutputLayout::slice_file(&l.label_dir(3), 17),
            PathBuf::from("/tmp/out/Syn/3/17.png")
        );
        assert_eq!(
            OutputLayout::slice_file(&l.image_dir(3), -1),
            PathBuf::from("/tmp/out/Img/3/-1.png")
        );
    }

    #[test]
    fn test_stage_commit_release() {
        let dir = tempfile::tempdir().unwrap();
        let l = OutputLayout::new(dir.path());

        // 旧的最终切片会被提交覆盖.
        fs::create_dir_all(l.image_dir(0)).unwrap();
        fs::write(OutputLayout::slice_file(&l.image_dir(0), 9), b"stale").unwrap();

        let (img, syn) = l.stage(0, 1).unwrap();
        assert!(img.starts_with(l.staging_dir(0, 1)));
        fs::write(OutputLayout::slice_file(&img, 5), b"em").unwrap();
        fs::write(OutputLayout::slice_file(&syn, 5), b"syn").unwrap();

        let (img, syn) = l.commit(0, 1).unwrap();
        assert_eq!(img, l.image_dir(0));
        assert!(OutputLayout::slice_file(&img, 5).is_file());
        assert!(!OutputLayout::slice_file(&img, 9).exists());
        assert!(OutputLayout::slice_file(&syn, 5).is_file());
        assert!(!l.staging_dir(0, 1).exists());

        l.release(0).unwrap();
        assert!(!img.exists() && !syn.exists());
        l.release(0).unwrap();
    }

    #[test]
    fn test_discard_staged_only_touches_one_instance() {
        let dir = tempfile::tempdir().unwrap();
        let l = OutputLayout::new(dir.path());
        l.discard_staged(1).unwrap();

        for (index, attempt) in [(1, 0), (1, 1), (11, 0)] {
            l.stage(index, attempt).unwrap();
        }
        l.discard_staged(1).unwrap();
        assert!(!l.staging_dir(1, 0).exists());
        assert!(!l.staging_dir(1, 1).exists());
        assert!(l.staging_dir(11, 0).is_dir());

        l.discard_attempt(11, 0).unwrap();
        assert!(!l.staging_dir(11, 0).exists());
    }
}
