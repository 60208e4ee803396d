//! 前景阈值化.
//!
//! Otsu 方法在强度体的 min-max 区间上建立 256 箱直方图,
//! 取类间方差最大的分箱边界为阈值, 再乘以调整系数并向数据最大值截断
//! (调整系数语义与原型应用一致: 1.0 即原始 Otsu).

use ndarray::{Array3, ArrayView, Dimension};

use crate::config::ThresholdMethod;
use crate::consts::OTSU_BINS;
use crate::error::ConfigError;
use crate::{MgScan, VolumeAttr};

/// 计算 Otsu 阈值, 返回强度单位下的阈值水平.
///
/// 严格大于返回值的体素应视为前景. 对常数数据返回该常数本身
/// (即不存在前景), 这不是错误.
pub fn otsu_level<D: Dimension>(data: ArrayView<'_, f32, D>) -> f32 {
    otsu_with_range(data).0
}

/// Otsu 阈值与数据最大值.
fn otsu_with_range<D: Dimension>(data: ArrayView<'_, f32, D>) -> (f32, f32) {
    let (mut lo, mut hi) = (f32::INFINITY, f32::NEG_INFINITY);
    for &v in data.iter() {
        lo = lo.min(v);
        hi = hi.max(v);
    }
    if !(hi > lo) {
        // 常数或空数据: 没有可分的两类.
        return (hi, hi);
    }

    let bin_width = (hi - lo) / OTSU_BINS as f32;
    let mut hist = [0u64; OTSU_BINS];
    for &v in data.iter() {
        let bin = (((v - lo) / bin_width) as usize).min(OTSU_BINS - 1);
        hist[bin] += 1;
    }

    let total: u64 = hist.iter().sum();
    let weighted_sum: f64 = hist
        .iter()
        .enumerate()
        .map(|(i, &c)| i as f64 * c as f64)
        .sum();

    // 对每个候选分箱边界 t 计算类间方差, 取首个最大者 (与 OpenCV 语义一致).
    let mut cum_count = 0u64;
    let mut cum_sum = 0.0f64;
    let mut best = 0usize;
    let mut best_variance = f64::NEG_INFINITY;
    for (t, &count) in hist.iter().enumerate().take(OTSU_BINS - 1) {
        cum_count += count;
        cum_sum += t as f64 * count as f64;

        let w_b = cum_count as f64;
        let w_f = (total - cum_count) as f64;
        if w_b == 0.0 {
            continue;
        }
        if w_f == 0.0 {
            break;
        }
        let mean_b = cum_sum / w_b;
        let mean_f = (weighted_sum - cum_sum) / w_f;
        let variance = w_b * w_f * (mean_b - mean_f) * (mean_b - mean_f);
        if variance > best_variance {
            best_variance = variance;
            best = t;
        }
    }

    // 阈值取背景箱 best 的上边界: 箱 0..=best 内的体素都不会严格大于它.
    (lo + (best as f32 + 1.0) * bin_width, hi)
}

/// 将 Otsu 阈值乘以调整系数并向数据最大值截断.
#[inline]
fn adjusted_otsu<D: Dimension>(data: ArrayView<'_, f32, D>, adjust: f32) -> f32 {
    let (level, hi) = otsu_with_range(data);
    (level * adjust).min(hi)
}

/// 根据配置的阈值方法计算前景掩码.
pub(crate) fn binary_mask(
    scan: &MgScan,
    method: &ThresholdMethod,
) -> Result<Array3<bool>, ConfigError> {
    match *method {
        ThresholdMethod::Fixed(level) => {
            if !level.is_finite() {
                return Err(ConfigError::BadThresholdLevel(level));
            }
            Ok(scan.data().mapv(|v| v > level))
        }
        ThresholdMethod::Otsu { adjust } => {
            check_adjust(adjust)?;
            let level = adjusted_otsu(scan.data(), adjust);
            Ok(scan.data().mapv(|v| v > level))
        }
        ThresholdMethod::OtsuPerSlice { adjust } => {
            check_adjust(adjust)?;
            let levels = slice_levels(scan, adjust);
            Ok(Array3::from_shape_fn(scan.shape(), |(z, h, w)| {
                scan[(z, h, w)] > levels[z]
            }))
        }
    }
}

#[inline]
fn check_adjust(adjust: f32) -> Result<(), ConfigError> {
    if !adjust.is_finite() || adjust <= 0.0 {
        return Err(ConfigError::BadThresholdAdjust(adjust));
    }
    Ok(())
}

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        /// 逐切片 Otsu 水平. 并行计算, 结果按 z 升序排列.
        fn slice_levels(scan: &MgScan, adjust: f32) -> Vec<f32> {
            scan.par_slice_map(|_, sl| adjusted_otsu(sl, adjust))
        }
    } else {
        /// 逐切片 Otsu 水平.
        fn slice_levels(scan: &MgScan, adjust: f32) -> Vec<f32> {
            scan.slice_map(|_, sl| adjusted_otsu(sl, adjust))
        }
    }
}
