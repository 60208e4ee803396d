//! 候选对象过滤.
//!
//! 规则按固定顺序逐对象判定, 首个不通过的规则即短路:
//!
//! 1. 体素数小于 `min_size` (噪声);
//! 2. 体素数大于 `max_size`;
//! 3. 启用边界剔除时, 对象接触体的任意一个表面;
//! 4. 设置强度下限时, 对象在未平滑合成强度体上的平均强度低于下限.
//!
//! 幸存对象按分割器的发现顺序重映射为稠密的 `1..=kept`.
//! 过滤从不修改输入标签体, 总是产出新的标签体.

use crate::config::PipelineConfig;
use crate::{MgLabel, MgScan, VolumeAttr};

/// 按剔除原因分类的对象计数.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RejectionTally {
    /// 因体素数低于下限被剔除的对象数.
    pub too_small: usize,

    /// 因体素数高于上限被剔除的对象数.
    pub too_large: usize,

    /// 因接触体边界被剔除的对象数.
    pub border: usize,

    /// 因平均强度低于下限被剔除的对象数.
    pub faint: usize,
}

impl RejectionTally {
    /// 被剔除的对象总数.
    #[inline]
    pub fn total(&self) -> usize {
        self.too_small + self.too_large + self.border + self.faint
    }
}

/// 一次过滤的账目.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FilterReport {
    /// 过滤前的候选对象数.
    pub candidates: usize,

    /// 幸存对象数.
    pub kept: usize,

    /// 剔除原因统计.
    pub rejected: RejectionTally,
}

/// 过滤候选对象并做稠密重标号.
///
/// `scan` 应当是未平滑的合成强度体, 以使强度规则不受
/// 为分割选择的去噪方式影响. 两个输入的空间形状必须一致, 否则 panic.
pub fn filter(labels: &MgLabel, scan: &MgScan, config: &PipelineConfig) -> (MgLabel, FilterReport) {
    assert_eq!(labels.shape(), scan.shape(), "标签体与强度体形状不一致");

    let n = labels.len();
    let (zs, hs, ws) = labels.shape();

    // 单遍累积: 尺寸、边界接触、强度和.
    let mut sizes = vec![0usize; n + 1];
    let mut border = vec![false; n + 1];
    let mut intensity_sum = vec![0f64; n + 1];
    for ((z, h, w), &l) in labels.data().indexed_iter() {
        if l == 0 {
            continue;
        }
        let li = l as usize;
        sizes[li] += 1;
        if z == 0 || h == 0 || w == 0 || z == zs - 1 || h == hs - 1 || w == ws - 1 {
            border[li] = true;
        }
        intensity_sum[li] += scan[(z, h, w)] as f64;
    }
    debug_assert!(
        sizes.iter().skip(1).all(|&s| s > 0),
        "输入标签体的标签集不稠密"
    );

    let mut tally = RejectionTally::default();
    let mut remap = vec![0u32; n + 1];
    let mut kept = 0u32;
    for l in 1..=n {
        if sizes[l] < config.min_size {
            tally.too_small += 1;
            continue;
        }
        if sizes[l] > config.max_size {
            tally.too_large += 1;
            continue;
        }
        if config.exclude_border && border[l] {
            tally.border += 1;
            continue;
        }
        if let Some(floor) = config.intensity_floor {
            if intensity_sum[l] / (sizes[l] as f64) < f64::from(floor) {
                tally.faint += 1;
                continue;
            }
        }
        kept += 1;
        remap[l] = kept;
    }

    let out = labels.data().mapv(|l| remap[l as usize]);
    let report = FilterReport {
        candidates: n,
        kept: kept as usize,
        rejected: tally,
    };
    log::debug!(
        "filter: {} 个候选, {} 个幸存, 剔除明细 {:?}",
        report.candidates,
        report.kept,
        report.rejected
    );

    (MgLabel::new(labels.meta().clone(), out, kept), report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThresholdMethod;
    use crate::segment::segment;
    use ndarray::Array3;

    /// 由强度体直接构造标签体: 正值为前景.
    fn segment_fixture(data: Array3<f32>) -> (MgLabel, MgScan) {
        let scan = MgScan::from_array(data, [1.0; 3]);
        let cfg = PipelineConfig {
            threshold: ThresholdMethod::Fixed(0.0),
            ..Default::default()
        };
        (segment(&scan, &cfg).unwrap(), scan)
    }

    /// 一大一小两个对象, min_size 只留下大的, 且重标号后标签稠密.
    #[test]
    fn test_min_size_rule_and_relabel() {
        let mut data = Array3::<f32>::zeros((1, 1, 7));
        data[[0, 0, 0]] = 1.0; // 单体素噪声
        for w in 2..6 {
            data[[0, 0, w]] = 1.0; // 4 体素对象
        }
        let (labels, scan) = segment_fixture(data);
        assert_eq!(labels.len(), 2);

        let cfg = PipelineConfig {
            min_size: 2,
            ..Default::default()
        };
        let (filtered, report) = filter(&labels, &scan, &cfg);

        assert_eq!(report.candidates, 2);
        assert_eq!(report.kept, 1);
        assert_eq!(report.rejected.too_small, 1);
        assert_eq!(report.rejected.total(), 1);
        // 幸存对象取得标签 1.
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[(0, 0, 2)], 1);
        assert_eq!(filtered[(0, 0, 0)], 0);
        // 输入标签体未被修改.
        assert_eq!(labels.len(), 2);
        assert_eq!(labels[(0, 0, 0)], 1);
    }

    /// 大小超限与尺寸达标的两个对象: 恰好区间内的幸存.
    #[test]
    fn test_min_max_window() {
        let mut data = Array3::<f32>::zeros((1, 1, 12));
        data[[0, 0, 0]] = 1.0; // 1 体素
        for w in 2..5 {
            data[[0, 0, w]] = 1.0; // 3 体素
        }
        for w in 6..12 {
            data[[0, 0, w]] = 1.0; // 6 体素
        }
        let (labels, scan) = segment_fixture(data);
        assert_eq!(labels.len(), 3);

        let cfg = PipelineConfig {
            min_size: 2,
            max_size: 5,
            ..Default::default()
        };
        let (filtered, report) = filter(&labels, &scan, &cfg);

        assert_eq!(report.kept, 1);
        assert_eq!(report.rejected.too_small, 1);
        assert_eq!(report.rejected.too_large, 1);
        assert_eq!(filtered[(0, 0, 3)], 1);
    }

    /// 接触边界的对象在启用剔除时被拒绝.
    #[test]
    fn test_border_exclusion() {
        let mut data = Array3::<f32>::zeros((3, 3, 3));
        data[[1, 1, 1]] = 1.0; // 内部对象
        data[[0, 0, 0]] = 1.0; // 角上对象
        let (labels, scan) = segment_fixture(data);
        assert_eq!(labels.len(), 2);

        let cfg = PipelineConfig {
            exclude_border: true,
            ..Default::default()
        };
        let (filtered, report) = filter(&labels, &scan, &cfg);
        assert_eq!(report.kept, 1);
        assert_eq!(report.rejected.border, 1);
        assert_eq!(filtered[(1, 1, 1)], 1);

        // 不启用时两个都保留.
        let (_, report) = filter(&labels, &scan, &PipelineConfig::default());
        assert_eq!(report.kept, 2);
        assert_eq!(report.rejected.total(), 0);
    }

    /// 强度下限规则在未平滑强度体上评估平均强度.
    #[test]
    fn test_intensity_floor() {
        let mut data = Array3::<f32>::zeros((1, 1, 5));
        data[[0, 0, 0]] = 10.0;
        data[[0, 0, 1]] = 20.0; // 对象 1 均值 15
        data[[0, 0, 3]] = 100.0;
        data[[0, 0, 4]] = 200.0; // 对象 2 均值 150
        let (labels, scan) = segment_fixture(data);

        let cfg = PipelineConfig {
            intensity_floor: Some(50.0),
            ..Default::default()
        };
        let (filtered, report) = filter(&labels, &scan, &cfg);
        assert_eq!(report.kept, 1);
        assert_eq!(report.rejected.faint, 1);
        assert_eq!(filtered[(0, 0, 3)], 1);
    }

    /// 规则短路: 尺寸先于边界判定, 同一对象只计入一个原因.
    #[test]
    fn test_rules_short_circuit() {
        let mut data = Array3::<f32>::zeros((1, 1, 4));
        data[[0, 0, 0]] = 1.0; // 单体素, 又接触边界
        let (labels, scan) = segment_fixture(data);

        let cfg = PipelineConfig {
            min_size: 2,
            exclude_border: true,
            ..Default::default()
        };
        let (_, report) = filter(&labels, &scan, &cfg);
        assert_eq!(report.rejected.too_small, 1);
        assert_eq!(report.rejected.border, 0);
        assert_eq!(report.rejected.total(), 1);
    }

    /// 过滤不增加对象, 幸存标签都来自输入.
    #[test]
    fn test_never_increases_objects() {
        let mut data = Array3::<f32>::zeros((2, 3, 3));
        data[[0, 1, 1]] = 1.0;
        data[[1, 0, 0]] = 1.0;
        let (labels, scan) = segment_fixture(data);

        let (filtered, report) = filter(&labels, &scan, &PipelineConfig::default());
        assert!(filtered.len() <= labels.len());
        assert_eq!(report.candidates, labels.len());
        // 每个幸存体素在输入中也属于某个对象.
        for (pos, &l) in filtered.data().indexed_iter() {
            if l != 0 {
                assert_ne!(labels.data()[pos], 0);
            }
        }
    }

    /// 尺寸规则的判定只依赖对象大小: 改动无关配置字段 (如平滑半径)
    /// 不改变同一标签体上的尺寸剔除结果.
    #[test]
    fn test_size_verdict_ignores_unrelated_fields() {
        let mut data = Array3::<f32>::zeros((1, 1, 6));
        data[[0, 0, 0]] = 1.0;
        for w in 2..6 {
            data[[0, 0, w]] = 1.0;
        }
        let (labels, scan) = segment_fixture(data);

        let base = PipelineConfig {
            min_size: 2,
            ..Default::default()
        };
        let tweaked = PipelineConfig {
            smoothing: Some(crate::config::Smoothing::Gaussian { radius: 3 }),
            intensity_floor: None,
            ..base.clone()
        };

        let (a, ra) = filter(&labels, &scan, &base);
        let (b, rb) = filter(&labels, &scan, &tweaked);
        assert_eq!(ra, rb);
        assert_eq!(a.data(), b.data());
    }

    #[test]
    fn test_empty_input_stays_empty() {
        let (labels, scan) = segment_fixture(Array3::zeros((2, 2, 2)));
        let (filtered, report) = filter(&labels, &scan, &PipelineConfig::default());
        assert!(filtered.is_empty());
        assert_eq!(report, FilterReport::default());
    }
}
