//! 图像的持久化存储.

use std::path::Path;

use image::{ImageResult, RgbaImage};
use ndarray::{Array2, ArrayView2};

use super::to_gray;

/// 表明一个可以通过 **按原样** 模式持久化存储的图像对象.
///
/// 灰度切片按单通道无损保存, 彩色标签按 RGBA 保存. 格式由扩展名决定, 一般为 `png`.
pub trait ImgWriteRaw {
    /// 按原样将图片保存到 `path` 路径.
    fn save_raw<P: AsRef<Path>>(&self, path: P) -> ImageResult<()>;
}

macro_rules! impl_gray_raw {
    ($($slice: ty),+) => {
        $(
            /// 单通道 8-bit 保存.
            impl ImgWriteRaw for $slice {
                fn save_raw<P: AsRef<Path>>(&self, path: P) -> ImageResult<()> {
                    to_gray(self.view()).save(path)
                }
            }
        )+
    };
}

impl_gray_raw!(Array2<u8>, ArrayView2<'_, u8>);

/// 四通道保存, 保留透明度.
impl ImgWriteRaw for RgbaImage {
    fn save_raw<P: AsRef<Path>>(&self, path: P) -> ImageResult<()> {
        self.save(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_save_gray_and_rgba() {
        let dir = tempfile::tempdir().unwrap();
        let a = Array2::from_shape_fn((4, 5), |(h, w)| (h * 5 + w) as u8);
        let p = dir.path().join("g.png");
        a.save_raw(&p).unwrap();
        let back = image::open(&p).unwrap().into_luma8();
        assert_eq!(back.dimensions(), (5, 4));
        assert_eq!(back.get_pixel(4, 3).0[0], 19);

        let mut rgba = RgbaImage::new(2, 2);
        rgba.put_pixel(1, 0, Rgba([1, 2, 3, 0]));
        let p = dir.path().join("c.png");
        rgba.save_raw(&p).unwrap();
        let back = image::open(&p).unwrap().into_rgba8();
        assert_eq!(back.get_pixel(1, 0), &Rgba([1, 2, 3, 0]));
    }
}
