//! 预处理: 通道合成与可选平滑.
//!
//! 预处理把多通道栈变成供分割使用的单通道工作强度体.
//! 两个步骤都与配置一一对应, 输出逐位可复现.
//! 注意: 平滑只影响分割; 形态学量化阶段的强度统计永远读原始栈.

use ndarray::Array3;

use crate::config::{ChannelMix, PipelineConfig, Smoothing};
use crate::error::ConfigError;
use crate::{MgScan, MgStack, StackMeta, VolumeAttr};

/// 依照配置将多通道栈预处理为单通道工作强度体.
///
/// 顺序: 先做通道选取/加权合成, 再做可选平滑.
///
/// # 错误
///
/// 通道下标越界、权重个数不符、平滑半径为 0 时返回 [`ConfigError`],
/// 此时不应继续进入分割阶段.
pub fn preprocess(stack: &MgStack, config: &PipelineConfig) -> Result<MgScan, ConfigError> {
    let combined = combine_channels(stack, &config.channel_mix)?;
    match config.smoothing {
        Some(smoothing) => apply_smoothing(&combined, smoothing),
        None => Ok(combined),
    }
}

/// 对工作强度体施加平滑. 过滤阶段的强度规则刻意绕过本函数,
/// 永远读未平滑的合成强度体.
pub(crate) fn apply_smoothing(scan: &MgScan, smoothing: Smoothing) -> Result<MgScan, ConfigError> {
    let data = match smoothing {
        Smoothing::Gaussian { radius } => {
            check_radius(radius)?;
            smooth_gaussian(scan.data().to_owned(), radius)
        }
        Smoothing::Median { radius } => {
            check_radius(radius)?;
            smooth_median(&scan.data().to_owned(), radius)
        }
    };
    Ok(MgScan::new(scan.meta().clone(), data))
}

/// 通道选取或加权合成.
pub(crate) fn combine_channels(stack: &MgStack, mix: &ChannelMix) -> Result<MgScan, ConfigError> {
    match mix {
        ChannelMix::Single(c) => {
            if *c >= stack.channels() {
                return Err(ConfigError::ChannelOutOfRange {
                    channel: *c,
                    channels: stack.channels(),
                });
            }
            Ok(stack.channel(*c))
        }
        ChannelMix::Weighted(weights) => {
            if weights.len() != stack.channels() {
                return Err(ConfigError::WeightCount {
                    expected: stack.channels(),
                    found: weights.len(),
                });
            }

            let mut acc = Array3::<f32>::zeros(stack.shape());
            for (c, &w) in weights.iter().enumerate() {
                acc.zip_mut_with(&stack.channel_view(c), |a, &v| *a += w * v);
            }
            Ok(MgScan::new(StackMeta::new(1, stack.pix_dim()), acc))
        }
    }
}

#[inline]
fn check_radius(radius: usize) -> Result<(), ConfigError> {
    if radius == 0 {
        return Err(ConfigError::BadSmoothingRadius(radius));
    }
    Ok(())
}

/// 归一化高斯核, 长度 `2 * radius + 1`, σ = radius / 2.
fn gaussian_kernel(radius: usize) -> Vec<f64> {
    let sigma = radius as f64 / 2.0;
    let mut kernel: Vec<f64> = (0..=2 * radius)
        .map(|i| {
            let d = i as f64 - radius as f64;
            (-d * d / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f64 = kernel.iter().sum();
    kernel.iter_mut().for_each(|k| *k /= sum);
    kernel
}

/// 可分离高斯平滑: 依次沿 w, h, z 三个方向做一维卷积.
/// 边界按复制 (clamp) 处理. 累加使用 f64 以保证与求和顺序无关的精度余量.
fn smooth_gaussian(data: Array3<f32>, radius: usize) -> Array3<f32> {
    let kernel = gaussian_kernel(radius);
    let mut out = data;
    for axis in [2usize, 1, 0] {
        out = smooth_axis(&out, &kernel, axis);
    }
    out
}

/// 沿单个轴的一维卷积.
fn smooth_axis(data: &Array3<f32>, kernel: &[f64], axis: usize) -> Array3<f32> {
    let (zs, hs, ws) = data.dim();
    let r = kernel.len() as i64 / 2;
    let hi = [zs, hs, ws][axis] as i64 - 1;

    Array3::from_shape_fn((zs, hs, ws), |(z, h, w)| {
        let mut acc = 0.0f64;
        for (k, &kv) in kernel.iter().enumerate() {
            let off = k as i64 - r;
            let idx = match axis {
                0 => ((z as i64 + off).clamp(0, hi) as usize, h, w),
                1 => (z, (h as i64 + off).clamp(0, hi) as usize, w),
                _ => (z, h, (w as i64 + off).clamp(0, hi) as usize),
            };
            acc += kv * data[idx] as f64;
        }
        acc as f32
    })
}

/// 立方窗中值滤波, 窗口在边界处截断. 排序使用 `f32` 全序, 结果确定.
fn smooth_median(data: &Array3<f32>, radius: usize) -> Array3<f32> {
    let (zs, hs, ws) = data.dim();
    let r = radius as i64;

    Array3::from_shape_fn((zs, hs, ws), |(z, h, w)| {
        let mut window = Vec::with_capacity((2 * radius + 1).pow(3));
        for dz in -r..=r {
            for dh in -r..=r {
                for dw in -r..=r {
                    let (nz, nh, nw) = (z as i64 + dz, h as i64 + dh, w as i64 + dw);
                    if nz < 0 || nh < 0 || nw < 0 {
                        continue;
                    }
                    let (nz, nh, nw) = (nz as usize, nh as usize, nw as usize);
                    if nz >= zs || nh >= hs || nw >= ws {
                        continue;
                    }
                    window.push(data[(nz, nh, nw)]);
                }
            }
        }
        window.sort_unstable_by(f32::total_cmp);
        window[window.len() / 2]
    })
}
