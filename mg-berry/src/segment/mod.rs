//! 阈值化与连通域标号.
//!
//! 分割分两步: 先按配置的阈值方法得到二值前景掩码, 再按配置的邻接规则
//! 做连通域标号. 标号严格确定: 临时 id 按 `(z, h, w)` 栅格扫描序发放,
//! 并查集合并时较小的根恒为代表元, 最终标签按首次遇到的栅格序压缩为
//! 稠密的 `1..=n`. 因此相同输入多次运行的标签 id 逐一相同.

use itertools::iproduct;
use ndarray::Array3;

use crate::config::PipelineConfig;
use crate::error::ConfigError;
use crate::{MgLabel, MgScan, VolumeAttr};

pub mod threshold;

mod uf;

use uf::UnionFind;

pub use threshold::otsu_level;

/// 3D 连通域邻接规则.
///
/// 单切片 (z 长度为 1) 的体退化为平面上的 4/8-邻接.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Connectivity {
    /// 6-邻接: 仅面相邻.
    Faces,

    /// 18-邻接: 面与棱相邻.
    Edges,

    /// 26-邻接: 面、棱、角相邻.
    Corners,
}

/// 栅格序前驱偏移: 6-邻接.
const PRIOR_FACES: [(i32, i32, i32); 3] = [(-1, 0, 0), (0, -1, 0), (0, 0, -1)];

/// 栅格序前驱偏移: 18-邻接.
const PRIOR_EDGES: [(i32, i32, i32); 9] = [
    (-1, -1, 0),
    (-1, 0, -1),
    (-1, 0, 0),
    (-1, 0, 1),
    (-1, 1, 0),
    (0, -1, -1),
    (0, -1, 0),
    (0, -1, 1),
    (0, 0, -1),
];

/// 栅格序前驱偏移: 26-邻接.
const PRIOR_CORNERS: [(i32, i32, i32); 13] = [
    (-1, -1, -1),
    (-1, -1, 0),
    (-1, -1, 1),
    (-1, 0, -1),
    (-1, 0, 0),
    (-1, 0, 1),
    (-1, 1, -1),
    (-1, 1, 0),
    (-1, 1, 1),
    (0, -1, -1),
    (0, -1, 0),
    (0, -1, 1),
    (0, 0, -1),
];

impl Connectivity {
    /// 邻接规则包含的邻居个数.
    #[inline]
    pub const fn neighbours(&self) -> usize {
        match self {
            Connectivity::Faces => 6,
            Connectivity::Edges => 18,
            Connectivity::Corners => 26,
        }
    }

    /// 栅格扫描中位于当前体素之前的那一半邻居偏移.
    #[inline]
    pub(crate) fn prior_offsets(&self) -> &'static [(i32, i32, i32)] {
        match self {
            Connectivity::Faces => &PRIOR_FACES,
            Connectivity::Edges => &PRIOR_EDGES,
            Connectivity::Corners => &PRIOR_CORNERS,
        }
    }
}

/// 对工作强度体做阈值化与连通域标号, 得到标签体.
///
/// 全背景掩码会得到不含任何对象的标签体, 这不是错误.
///
/// # 错误
///
/// 阈值参数非法 (非有限固定阈值, 非正调整系数) 时返回 [`ConfigError`].
pub fn segment(scan: &MgScan, config: &PipelineConfig) -> Result<MgLabel, ConfigError> {
    let mask = threshold::binary_mask(scan, &config.threshold)?;
    let (labels, objects) = label_components(&mask, config.connectivity);
    log::debug!(
        "segment: {} 个候选对象 (connectivity = {:?})",
        objects,
        config.connectivity
    );
    Ok(MgLabel::new(scan.meta().clone(), labels, objects))
}

/// 两遍扫描连通域标号.
///
/// 第一遍按栅格序发放临时 id 并在并查集中合并与前驱邻居的等价关系;
/// 第二遍把每个等价类的代表元按首次出现的栅格序重映射为稠密标签.
/// 返回标签数组与对象个数.
pub(crate) fn label_components(mask: &Array3<bool>, conn: Connectivity) -> (Array3<u32>, u32) {
    let (zs, hs, ws) = mask.dim();
    // provisional 中存 "临时 id + 1", 0 仍代表背景.
    let mut provisional = Array3::<u32>::zeros((zs, hs, ws));
    let mut uf = UnionFind::new();

    for (z, h, w) in iproduct!(0..zs, 0..hs, 0..ws) {
        if !mask[[z, h, w]] {
            continue;
        }

        let mut root: Option<u32> = None;
        for &(dz, dh, dw) in conn.prior_offsets() {
            let (nz, nh, nw) = (z as i64 + dz as i64, h as i64 + dh as i64, w as i64 + dw as i64);
            if nz < 0 || nh < 0 || nw < 0 {
                continue;
            }
            let n = (nz as usize, nh as usize, nw as usize);
            if n.0 >= zs || n.1 >= hs || n.2 >= ws || !mask[n] {
                continue;
            }

            let nid = uf.find(provisional[n] - 1);
            root = Some(match root {
                None => nid,
                Some(r) => uf.union(r, nid),
            });
        }

        let id = match root {
            None => uf.make(),
            Some(r) => r,
        };
        provisional[[z, h, w]] = id + 1;
    }

    let mut remap = vec![0u32; uf.len()];
    let mut next = 0u32;
    let mut out = Array3::<u32>::zeros((zs, hs, ws));
    for (pos, &p) in provisional.indexed_iter() {
        if p == 0 {
            continue;
        }
        let r = uf.find(p - 1) as usize;
        if remap[r] == 0 {
            next += 1;
            remap[r] = next;
        }
        out[pos] = remap[r];
    }

    (out, next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThresholdMethod;
    use ndarray::Array3;

    fn scan_from_mask(mask: &Array3<bool>) -> MgScan {
        MgScan::from_array(mask.mapv(|b| if b { 1.0 } else { 0.0 }), [1.0; 3])
    }

    fn config_fixed() -> PipelineConfig {
        PipelineConfig {
            threshold: ThresholdMethod::Fixed(0.5),
            ..Default::default()
        }
    }

    /// 全背景体的标号结果是全零, 没有对象, 也不报错.
    #[test]
    fn test_all_background_yields_zero_objects() {
        let mask = Array3::from_elem((3, 3, 3), false);
        let label = segment(&scan_from_mask(&mask), &config_fixed()).unwrap();
        assert!(label.is_empty());
        assert!(label.data().iter().all(|&v| v == 0));
    }

    #[test]
    fn test_single_cube_is_one_label() {
        let mut mask = Array3::from_elem((3, 3, 3), false);
        for (z, h, w) in iproduct!(0..2, 0..2, 0..2) {
            mask[[z, h, w]] = true;
        }
        let (labels, n) = label_components(&mask, Connectivity::Corners);
        assert_eq!(n, 1);
        assert_eq!(labels.iter().filter(|&&v| v == 1).count(), 8);
    }

    /// 仅角相邻的两个体素: 26-邻接合并, 6-邻接不合并.
    #[test]
    fn test_connectivity_variants() {
        let mut mask = Array3::from_elem((2, 2, 2), false);
        mask[[0, 0, 0]] = true;
        mask[[1, 1, 1]] = true;

        let (_, corners) = label_components(&mask, Connectivity::Corners);
        assert_eq!(corners, 1);

        let (_, faces) = label_components(&mask, Connectivity::Faces);
        assert_eq!(faces, 2);

        // 棱相邻 (两轴各差 1): 18-邻接合并, 6-邻接不合并.
        let mut edge = Array3::from_elem((2, 2, 1), false);
        edge[[0, 0, 0]] = true;
        edge[[1, 1, 0]] = true;
        let (_, n18) = label_components(&edge, Connectivity::Edges);
        assert_eq!(n18, 1);
        let (_, n6) = label_components(&edge, Connectivity::Faces);
        assert_eq!(n6, 2);
    }

    /// 标签按首次遇到的栅格序编号: 先扫到的对象取得较小标签.
    #[test]
    fn test_labels_follow_raster_order() {
        let mut mask = Array3::from_elem((1, 1, 5), false);
        mask[[0, 0, 0]] = true;
        mask[[0, 0, 2]] = true;
        mask[[0, 0, 4]] = true;

        let (labels, n) = label_components(&mask, Connectivity::Faces);
        assert_eq!(n, 3);
        assert_eq!(labels[[0, 0, 0]], 1);
        assert_eq!(labels[[0, 0, 2]], 2);
        assert_eq!(labels[[0, 0, 4]], 3);
    }

    /// U 形对象在扫描中先呈现为两个分支, 合并后必须只剩一个标签,
    /// 且重复运行的结果逐位一致.
    #[test]
    fn test_u_shape_merges_and_is_stable() {
        let mut mask = Array3::from_elem((1, 3, 3), false);
        // 两条竖臂 + 底部连通.
        for h in 0..3 {
            mask[[0, h, 0]] = true;
            mask[[0, h, 2]] = true;
        }
        mask[[0, 2, 1]] = true;

        let (first, n) = label_components(&mask, Connectivity::Faces);
        assert_eq!(n, 1);
        let (second, m) = label_components(&mask, Connectivity::Faces);
        assert_eq!(m, 1);
        assert_eq!(first, second);
    }

    #[test]
    fn test_two_separate_cubes_get_two_labels() {
        let mut mask = Array3::from_elem((2, 2, 5), false);
        for (z, h) in iproduct!(0..2, 0..2) {
            mask[[z, h, 0]] = true;
            mask[[z, h, 4]] = true;
        }
        let (labels, n) = label_components(&mask, Connectivity::Corners);
        assert_eq!(n, 2);
        assert_eq!(labels[[0, 0, 0]], 1);
        assert_eq!(labels[[0, 0, 4]], 2);
    }
}
