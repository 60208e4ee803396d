//! 图像栈文件读取.
//!
//! 支持两类输入:
//!
//! 1. **TIFF / LSM** — 多页灰度文件, 页按通道交错排列
//!    (第 `i` 页属于第 `i % channels` 个通道), 与显微镜导出软件的
//!    惯用组织方式一致;
//! 2. **NPY** — 按 `(z, h, w)` 组织的 3D 数组, 视为单通道栈.
//!
//! 读取只做 I/O 与形状/位深校验, 不做任何处理; 体素标定由调用方传入.

use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::path::Path;

use ndarray::{s, Array2, Array3, Array4};
use ndarray_npy::ReadNpyExt;
use tiff::decoder::{Decoder, DecodingResult};

use crate::error::{LoadError, ShapeMismatchError};
use crate::{Idx2d, MgStack};

/// 打开一个图像栈文件.
///
/// `channels` 是调用方声明的通道数 (TIFF/LSM 文件自身不携带该信息,
/// 这一点继承自显微镜导出数据的现实); `pix_dim` 为体素标定,
/// 按 `(z, h, w)` 顺序, 以微米为单位.
///
/// # 错误
///
/// 路径不存在、扩展名不受支持、位深不受支持、页形状不一致、
/// 页数无法按通道拆分时, 分别返回对应的 [`LoadError`] 变体.
pub fn open_stack<P: AsRef<Path>>(
    path: P,
    channels: usize,
    pix_dim: [f64; 3],
) -> Result<MgStack, LoadError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(LoadError::NotFound(path.to_path_buf()));
    }
    if channels == 0 {
        return Err(LoadError::BadChannels(channels));
    }

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "tif" | "tiff" | "lsm" => open_paged(path, channels, pix_dim),
        "npy" => {
            // npy 没有页结构, 总是单通道.
            if channels != 1 {
                return Err(LoadError::BadChannels(channels));
            }
            open_npy(path, pix_dim)
        }
        _ => Err(LoadError::UnsupportedExtension(ext)),
    }
}

/// 读取多页 TIFF/LSM, 按通道交错模式拆分.
fn open_paged(path: &Path, channels: usize, pix_dim: [f64; 3]) -> Result<MgStack, LoadError> {
    let file = File::open(path)?;
    let mut decoder =
        Decoder::new(BufReader::new(file)).map_err(|e| LoadError::Decode(e.to_string()))?;

    let mut pages: Vec<Array2<f32>> = Vec::new();
    let mut page_shape: Option<Idx2d> = None;

    loop {
        let (w, h) = decoder
            .dimensions()
            .map_err(|e| LoadError::Decode(e.to_string()))?;
        let shape = (h as usize, w as usize);

        match page_shape {
            None => page_shape = Some(shape),
            Some(expected) if expected != shape => {
                return Err(ShapeMismatchError {
                    expected,
                    found: shape,
                }
                .into());
            }
            Some(_) => {}
        }

        let raw = decoder
            .read_image()
            .map_err(|e| LoadError::Decode(e.to_string()))?;
        pages.push(decode_gray_page(raw, shape)?);

        if !decoder.more_images() {
            break;
        }
        decoder
            .next_image()
            .map_err(|e| LoadError::Decode(e.to_string()))?;
    }

    if pages.is_empty() {
        return Err(LoadError::EmptyStack);
    }
    if pages.len() % channels != 0 {
        return Err(LoadError::PageCount {
            pages: pages.len(),
            channels,
        });
    }

    let (h, w) = page_shape.unwrap();
    let z = pages.len() / channels;
    let mut data = Array4::<f32>::zeros((channels, z, h, w));
    for (i, page) in pages.into_iter().enumerate() {
        // 页 i 属于通道 i % channels, 切片 i / channels.
        data.slice_mut(s![i % channels, i / channels, .., ..])
            .assign(&page);
    }

    Ok(MgStack::from_array(data, pix_dim))
}

/// 将解码结果转换为灰度 `f32` 页. 仅接受 u8/u16/f32 单样本格式.
fn decode_gray_page(raw: DecodingResult, (h, w): Idx2d) -> Result<Array2<f32>, LoadError> {
    let buf: Vec<f32> = match raw {
        DecodingResult::U8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::F32(v) => v,
        _ => return Err(LoadError::UnsupportedBitDepth),
    };

    // RGB 等多样本格式的缓冲区长度是 h * w 的整数倍, 在此一并拒绝.
    if buf.len() != h * w {
        return Err(LoadError::UnsupportedBitDepth);
    }
    Ok(Array2::from_shape_vec((h, w), buf).unwrap())
}

/// 读取 3D npy 数组为单通道栈. 依次尝试 f32/u16/u8 三种元素类型.
fn open_npy(path: &Path, pix_dim: [f64; 3]) -> Result<MgStack, LoadError> {
    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;

    let data: Array3<f32> = if let Ok(arr) = Array3::<f32>::read_npy(Cursor::new(&bytes)) {
        arr
    } else if let Ok(arr) = Array3::<u16>::read_npy(Cursor::new(&bytes)) {
        arr.mapv(f32::from)
    } else if let Ok(arr) = Array3::<u8>::read_npy(Cursor::new(&bytes)) {
        arr.mapv(f32::from)
    } else {
        return Err(LoadError::UnsupportedBitDepth);
    };

    if data.is_empty() {
        return Err(LoadError::EmptyStack);
    }

    let (z, h, w) = data.dim();
    let data = data.into_shape((1, z, h, w)).unwrap();
    Ok(MgStack::from_array(data, pix_dim))
}
