//! 二维切片与 `image` 缓冲区之间的转换.
//!
//! 切片一律是 `(h, w)` 顺序的 `ndarray` 数组, 而 `image` 的像素坐标是 `(x, y)`,
//! 所有换算都集中在这里.

use image::{GrayImage, Luma};
use ndarray::{Array2, ArrayView2};

mod save;

pub use save::ImgWriteRaw;

/// `(h, w)` 切片 -> 灰度图.
pub fn to_gray(slice: ArrayView2<u8>) -> GrayImage {
    let (height, width) = slice.dim();
    let mut buf = GrayImage::new(width as u32, height as u32);
    for ((h, w), &pix) in slice.indexed_iter() {
        buf.put_pixel(w as u32, h as u32, Luma([pix]));
    }
    buf
}

/// 灰度图 -> `(h, w)` 切片.
pub fn from_gray(img: &GrayImage) -> Array2<u8> {
    let (width, height) = img.dimensions();
    Array2::from_shape_fn((height as usize, width as usize), |(h, w)| {
        img.get_pixel(w as u32, h as u32).0[0]
    })
}

/// 满足 `pred` 的像素为 255, 其余为 0.
pub fn binary_gray<F>(slice: ArrayView2<u8>, pred: F) -> GrayImage
where
    F: Fn(u8) -> bool,
{
    let (height, width) = slice.dim();
    GrayImage::from_fn(width as u32, height as u32, |x, y| {
        Luma([if pred(slice[(y as usize, x as usize)]) {
            u8::MAX
        } else {
            0
        }])
    })
}
