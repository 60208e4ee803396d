//! 形态学量化.
//!
//! 对过滤后的每个对象计算几何与强度描述子.
//! 强度统计一律基于原始多通道栈, 与分割所用的平滑无关,
//! 因此测量结果不受去噪参数影响.

use ndarray::Array3;

use crate::config::PipelineConfig;
use crate::error::DegenerateObjectError;
use crate::{Idx3d, MgLabel, MgStack, VolumeAttr};

pub mod erosion;
pub mod skeleton;
pub mod territory;

pub use erosion::Footprint;
pub use skeleton::SkeletonMetrics;
pub use territory::TerritoryMetrics;

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};
    }
}

/// 对象的包围盒, 两端都含.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BoundingBox {
    /// 最小角, `(z, h, w)`.
    pub min: Idx3d,

    /// 最大角, `(z, h, w)`.
    pub max: Idx3d,
}

impl BoundingBox {
    /// 包围盒在三个方向上的体素长度.
    #[inline]
    pub fn extent(&self) -> Idx3d {
        (
            self.max.0 - self.min.0 + 1,
            self.max.1 - self.min.1 + 1,
            self.max.2 - self.min.2 + 1,
        )
    }
}

/// 单通道强度统计.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChannelStats {
    /// 掩码内强度总和.
    pub sum: f64,

    /// 掩码内强度均值.
    pub mean: f64,

    /// 掩码内强度最大值.
    pub max: f32,
}

/// 一个幸存对象的全部描述子. 产出后只读.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ObjectDescriptor {
    /// 对象标签 id (过滤后的稠密标签).
    pub label: u32,

    /// 体素个数.
    pub voxel_count: usize,

    /// 物理体积, 立方微米.
    pub volume_um3: f64,

    /// 包围盒.
    pub bbox: BoundingBox,

    /// 质心, 体素坐标 `(z, h, w)` 的平均值.
    pub centroid: [f64; 3],

    /// 表面积, 平方微米. 按 6-邻域暴露面逐面累加,
    /// 每个面的面积取其朝向对应的物理面积.
    pub surface_um2: f64,

    /// Wadell 球形度: `π^(1/3) * (6V)^(2/3) / A`. 球为 1, 越细长越小.
    pub sphericity: f64,

    /// 每个通道在对象掩码内的强度统计, 基于原始栈.
    pub intensity: Vec<ChannelStats>,

    /// 骨架派生指标. 配置关闭时为 `None`.
    pub skeleton: Option<SkeletonMetrics>,

    /// 细胞核候选个数. 配置关闭或对象不超过 cut_off 时为 `None`.
    pub nuclei: Option<usize>,

    /// 凸包领域体积, 立方微米. 配置关闭时为 `None`.
    pub territory_um3: Option<f64>,
}

/// 对过滤后的标签体做形态学量化.
///
/// 标签体与原始栈的空间形状必须一致, 否则 panic.
///
/// # 错误
///
/// 任何幸存标签不含体素时返回 [`DegenerateObjectError`]:
/// 这是上游破坏稠密标签不变量的致命信号, 不可恢复.
pub fn analyze(
    labels: &MgLabel,
    stack: &MgStack,
    config: &PipelineConfig,
) -> Result<Vec<ObjectDescriptor>, DegenerateObjectError> {
    assert_eq!(labels.shape(), stack.shape(), "标签体与原始栈形状不一致");

    let n = labels.len();
    if n == 0 {
        return Ok(Vec::new());
    }

    // 按对象收集体素索引 (arena 式, 以标签为下标).
    let mut voxels: Vec<Vec<Idx3d>> = vec![Vec::new(); n];
    for (pos, &l) in labels.data().indexed_iter() {
        if l != 0 {
            voxels[(l - 1) as usize].push(pos);
        }
    }
    if let Some(i) = voxels.iter().position(Vec::is_empty) {
        return Err(DegenerateObjectError {
            label: i as u32 + 1,
        });
    }

    let describe = |i: usize| describe_object(i as u32 + 1, &voxels[i], labels, stack, config);

    // 按对象并行; 索引迭代器保持输出顺序, 不影响确定性.
    #[cfg(feature = "rayon")]
    let descriptors: Vec<ObjectDescriptor> = (0..n).into_par_iter().map(describe).collect();
    #[cfg(not(feature = "rayon"))]
    let descriptors: Vec<ObjectDescriptor> = (0..n).map(describe).collect();

    log::debug!("analyze: {} 个对象量化完毕", descriptors.len());
    Ok(descriptors)
}

/// 计算单个对象的描述子.
fn describe_object(
    label: u32,
    voxels: &[Idx3d],
    labels: &MgLabel,
    stack: &MgStack,
    config: &PipelineConfig,
) -> ObjectDescriptor {
    debug_assert!(!voxels.is_empty());
    let count = voxels.len();
    let [dz, dh, dw] = labels.pix_dim();

    // 包围盒与质心.
    let mut bbox = BoundingBox {
        min: voxels[0],
        max: voxels[0],
    };
    let mut centroid = [0.0f64; 3];
    for &(z, h, w) in voxels {
        bbox.min = (bbox.min.0.min(z), bbox.min.1.min(h), bbox.min.2.min(w));
        bbox.max = (bbox.max.0.max(z), bbox.max.1.max(h), bbox.max.2.max(w));
        centroid[0] += z as f64;
        centroid[1] += h as f64;
        centroid[2] += w as f64;
    }
    centroid.iter_mut().for_each(|c| *c /= count as f64);

    // 表面积: 6-邻域中暴露于背景或体外的面, 按朝向取物理面积.
    let (zs, hs, ws) = labels.shape();
    let mut surface_um2 = 0.0f64;
    for &(z, h, w) in voxels {
        let exposed = |nz: i64, nh: i64, nw: i64| -> bool {
            nz < 0
                || nh < 0
                || nw < 0
                || nz as usize >= zs
                || nh as usize >= hs
                || nw as usize >= ws
                || labels[(nz as usize, nh as usize, nw as usize)] != label
        };
        let (zi, hi, wi) = (z as i64, h as i64, w as i64);
        for (nz, nh, nw, area) in [
            (zi - 1, hi, wi, dh * dw),
            (zi + 1, hi, wi, dh * dw),
            (zi, hi - 1, wi, dz * dw),
            (zi, hi + 1, wi, dz * dw),
            (zi, hi, wi - 1, dz * dh),
            (zi, hi, wi + 1, dz * dh),
        ] {
            if exposed(nz, nh, nw) {
                surface_um2 += area;
            }
        }
    }

    let volume_um3 = count as f64 * labels.voxel();
    let sphericity = if surface_um2 > 0.0 {
        std::f64::consts::PI.powf(1.0 / 3.0) * (6.0 * volume_um3).powf(2.0 / 3.0) / surface_um2
    } else {
        0.0
    };

    // 每通道强度统计, 基于原始栈.
    let mut intensity = Vec::with_capacity(stack.channels());
    for c in 0..stack.channels() {
        let view = stack.channel_view(c);
        let mut sum = 0.0f64;
        let mut max = f32::NEG_INFINITY;
        for &(z, h, w) in voxels {
            let v = view[[z, h, w]];
            sum += f64::from(v);
            max = max.max(v);
        }
        intensity.push(ChannelStats {
            sum,
            mean: sum / count as f64,
            max,
        });
    }

    // 可选指标都在包围盒局部掩码上计算, 避免全体积扫描.
    let needs_mask = config.compute_skeleton || config.nucleus.is_some();
    let mask = needs_mask.then(|| local_mask(voxels, &bbox));

    let skeleton = config
        .compute_skeleton
        .then(|| skeleton::skeleton_metrics(mask.as_ref().unwrap()));

    let nuclei = config.nucleus.as_ref().and_then(|params| {
        (count > params.cut_off_size).then(|| {
            erosion::estimate_nuclei(mask.as_ref().unwrap(), params, config.connectivity)
        })
    });

    let territory_um3 = config.compute_territory.then(|| {
        let pts: Vec<[f64; 3]> = voxels
            .iter()
            .map(|&(z, h, w)| [z as f64 * dz, h as f64 * dh, w as f64 * dw])
            .collect();
        territory::hull_volume(&pts)
    });

    ObjectDescriptor {
        label,
        voxel_count: count,
        volume_um3,
        bbox,
        centroid,
        surface_um2,
        sphericity,
        intensity,
        skeleton,
        nuclei,
        territory_um3,
    }
}

/// 把对象体素放进以包围盒为界的局部掩码.
fn local_mask(voxels: &[Idx3d], bbox: &BoundingBox) -> Array3<bool> {
    let mut mask = Array3::from_elem(bbox.extent(), false);
    for &(z, h, w) in voxels {
        mask[(z - bbox.min.0, h - bbox.min.1, w - bbox.min.2)] = true;
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NucleusParams, PipelineConfig, ThresholdMethod};
    use crate::segment::segment;
    use crate::{MgScan, StackMeta};
    use itertools::iproduct;
    use ndarray::{Array3, Array4};

    fn f64_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    /// 由单通道数据构造 (标签体, 原始栈): 正强度为前景.
    fn fixture(data: Array3<f32>, pix_dim: [f64; 3]) -> (MgLabel, MgStack) {
        let scan = MgScan::from_array(data.clone(), pix_dim);
        let cfg = PipelineConfig {
            threshold: ThresholdMethod::Fixed(0.0),
            ..Default::default()
        };
        let labels = segment(&scan, &cfg).unwrap();
        let (z, h, w) = data.dim();
        let stack = MgStack::from_array(data.into_shape((1, z, h, w)).unwrap(), pix_dim);
        (labels, stack)
    }

    /// 居中 2x2x2 立方体: 规格场景的基准几何量.
    #[test]
    fn test_cube_descriptor() {
        let mut data = Array3::<f32>::zeros((4, 4, 4));
        for (z, h, w) in iproduct!(1..3, 1..3, 1..3) {
            data[[z, h, w]] = 5.0;
        }
        let (labels, stack) = fixture(data, [1.0; 3]);
        let descs = analyze(&labels, &stack, &PipelineConfig::default()).unwrap();

        assert_eq!(descs.len(), 1);
        let d = &descs[0];
        assert_eq!(d.label, 1);
        assert_eq!(d.voxel_count, 8);
        assert!(f64_eq(d.volume_um3, 8.0));
        assert_eq!(d.bbox.min, (1, 1, 1));
        assert_eq!(d.bbox.max, (2, 2, 2));
        assert_eq!(d.bbox.extent(), (2, 2, 2));
        assert_eq!(d.centroid, [1.5, 1.5, 1.5]);
        assert!(f64_eq(d.surface_um2, 24.0));
        // 立方体的 Wadell 球形度: π^(1/3) * 48^(2/3) / 24.
        let expected = std::f64::consts::PI.powf(1.0 / 3.0) * 48.0f64.powf(2.0 / 3.0) / 24.0;
        assert!(f64_eq(d.sphericity, expected));
        assert!(d.sphericity < 1.0);

        assert_eq!(d.intensity.len(), 1);
        assert!(f64_eq(d.intensity[0].sum, 40.0));
        assert!(f64_eq(d.intensity[0].mean, 5.0));
        assert_eq!(d.intensity[0].max, 5.0);

        assert_eq!(d.skeleton, None);
        assert_eq!(d.nuclei, None);
        assert_eq!(d.territory_um3, None);
    }

    /// 各向异性标定: 体积与表面积按物理尺寸缩放.
    #[test]
    fn test_anisotropic_calibration() {
        let mut data = Array3::<f32>::zeros((4, 4, 4));
        for (z, h, w) in iproduct!(1..3, 1..3, 1..3) {
            data[[z, h, w]] = 1.0;
        }
        let (labels, stack) = fixture(data, [2.0, 1.0, 1.0]);
        let d = &analyze(&labels, &stack, &PipelineConfig::default()).unwrap()[0];

        assert!(f64_eq(d.volume_um3, 16.0));
        // 8 个 z 朝向面积 1 + 16 个水平朝向面积 2.
        assert!(f64_eq(d.surface_um2, 40.0));
    }

    /// 强度统计基于原始栈的每个通道.
    #[test]
    fn test_per_channel_intensity() {
        let mut data = Array3::<f32>::zeros((1, 1, 3));
        data[[0, 0, 1]] = 1.0;
        let scan = MgScan::from_array(data, [1.0; 3]);
        let cfg = PipelineConfig {
            threshold: ThresholdMethod::Fixed(0.0),
            ..Default::default()
        };
        let labels = segment(&scan, &cfg).unwrap();

        let mut raw = Array4::<f32>::zeros((2, 1, 1, 3));
        raw[[0, 0, 0, 1]] = 3.0;
        raw[[1, 0, 0, 1]] = 30.0;
        let stack = MgStack::from_array(raw, [1.0; 3]);

        let d = &analyze(&labels, &stack, &PipelineConfig::default()).unwrap()[0];
        assert_eq!(d.intensity.len(), 2);
        assert!(f64_eq(d.intensity[0].mean, 3.0));
        assert!(f64_eq(d.intensity[1].mean, 30.0));
        assert_eq!(d.intensity[1].max, 30.0);
    }

    #[test]
    fn test_skeleton_and_territory_switches() {
        let mut data = Array3::<f32>::zeros((3, 3, 7));
        for w in 1..6 {
            data[[1, 1, w]] = 1.0;
        }
        let (labels, stack) = fixture(data, [1.0; 3]);
        let cfg = PipelineConfig {
            compute_skeleton: true,
            compute_territory: true,
            ..Default::default()
        };
        let d = &analyze(&labels, &stack, &cfg).unwrap()[0];

        let sk = d.skeleton.unwrap();
        assert_eq!(sk.endpoints, 2);
        assert_eq!(sk.branch_points, 0);
        assert_eq!(sk.skeleton_voxels, 5);
        // 线状点云的凸包体积为 0.
        assert_eq!(d.territory_um3, Some(0.0));
    }

    #[test]
    fn test_territory_of_cube_point_cloud() {
        let mut data = Array3::<f32>::zeros((4, 4, 4));
        for (z, h, w) in iproduct!(0..3, 0..3, 0..3) {
            data[[z, h, w]] = 1.0;
        }
        let (labels, stack) = fixture(data, [1.0; 3]);
        let cfg = PipelineConfig {
            compute_territory: true,
            ..Default::default()
        };
        let d = &analyze(&labels, &stack, &cfg).unwrap()[0];
        // 体素中心点云跨 2x2x2 个单位.
        assert_eq!(d.territory_um3, Some(8.0));
    }

    /// 核估计: 只有超过 cut_off 的对象才被估计.
    #[test]
    fn test_nucleus_estimate_gating() {
        let mut data = Array3::<f32>::zeros((1, 5, 11));
        for (h, w) in iproduct!(0..5, 0..5) {
            data[[0, h, w]] = 1.0;
        }
        for (h, w) in iproduct!(0..5, 6..11) {
            data[[0, h, w]] = 1.0;
        }
        data[[0, 2, 5]] = 1.0;
        let (labels, stack) = fixture(data, [1.0; 3]);
        assert_eq!(labels.len(), 1);

        let params = NucleusParams {
            cut_off_size: 20,
            min_nucleus_fraction: 5,
            footprint: Footprint::Diamond2d { r: 1 },
        };
        let cfg = PipelineConfig {
            nucleus: Some(params),
            ..Default::default()
        };
        let d = &analyze(&labels, &stack, &cfg).unwrap()[0];
        assert_eq!(d.nuclei, Some(2));

        // cut_off 抬高后不再估计.
        let cfg = PipelineConfig {
            nucleus: Some(NucleusParams {
                cut_off_size: 1000,
                ..params
            }),
            ..Default::default()
        };
        let d = &analyze(&labels, &stack, &cfg).unwrap()[0];
        assert_eq!(d.nuclei, None);
    }

    #[test]
    fn test_empty_label_volume() {
        let (labels, stack) = fixture(Array3::zeros((2, 2, 2)), [1.0; 3]);
        assert!(analyze(&labels, &stack, &PipelineConfig::default())
            .unwrap()
            .is_empty());
    }

    /// 稠密标签中出现空洞是上游 bug, 必须立即失败.
    #[test]
    fn test_degenerate_label_fails_fast() {
        let mut data = Array3::<u32>::zeros((1, 1, 4));
        data[[0, 0, 0]] = 1;
        data[[0, 0, 2]] = 3; // 标签 2 缺失
        let labels = MgLabel::new(StackMeta::new(1, [1.0; 3]), data, 3);
        let stack = MgStack::from_array(Array4::zeros((1, 1, 1, 4)), [1.0; 3]);

        let err = analyze(&labels, &stack, &PipelineConfig::default()).unwrap_err();
        assert_eq!(err, DegenerateObjectError { label: 2 });
    }
}
