//! 二值腐蚀与结构元.
//!
//! 二维结构元 (菱形/圆盘/矩形) 逐切片作用于 3D 掩码,
//! 八面体结构元做真三维腐蚀. 掩码之外的体素一律视为背景,
//! 因此贴边的前景会被腐蚀掉.

use ndarray::Array3;

use crate::config::NucleusParams;
use crate::segment::{label_components, Connectivity};

/// 腐蚀所用结构元.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Footprint {
    /// 平面菱形 (L1 球), 逐切片作用.
    Diamond2d {
        /// 半径.
        r: usize,
    },

    /// 平面圆盘 (L2 球), 逐切片作用.
    Disk2d {
        /// 半径.
        r: usize,
    },

    /// 平面矩形, 逐切片作用. 两个字段为半高与半宽.
    Rect2d {
        /// 半高.
        rh: usize,
        /// 半宽.
        rw: usize,
    },

    /// 三维八面体 (L1 球).
    Octahedron3d {
        /// 半径.
        r: usize,
    },
}

impl Footprint {
    /// 展开为邻域偏移集合, 按 `(dz, dh, dw)` 给出, 含原点.
    fn offsets(&self) -> Vec<(i64, i64, i64)> {
        let mut out = Vec::new();
        match *self {
            Footprint::Diamond2d { r } => {
                let r = r as i64;
                for dh in -r..=r {
                    for dw in -r..=r {
                        if dh.abs() + dw.abs() <= r {
                            out.push((0, dh, dw));
                        }
                    }
                }
            }
            Footprint::Disk2d { r } => {
                let r = r as i64;
                for dh in -r..=r {
                    for dw in -r..=r {
                        if dh * dh + dw * dw <= r * r {
                            out.push((0, dh, dw));
                        }
                    }
                }
            }
            Footprint::Rect2d { rh, rw } => {
                let (rh, rw) = (rh as i64, rw as i64);
                for dh in -rh..=rh {
                    for dw in -rw..=rw {
                        out.push((0, dh, dw));
                    }
                }
            }
            Footprint::Octahedron3d { r } => {
                let r = r as i64;
                for dz in -r..=r {
                    for dh in -r..=r {
                        for dw in -r..=r {
                            if dz.abs() + dh.abs() + dw.abs() <= r {
                                out.push((dz, dh, dw));
                            }
                        }
                    }
                }
            }
        }
        out
    }
}

/// 以 `footprint` 对掩码做二值腐蚀.
///
/// 体素幸存当且仅当结构元平移到该体素后完全落在前景内
/// (掩码边界之外视为背景).
pub fn erode(mask: &Array3<bool>, footprint: &Footprint) -> Array3<bool> {
    let (zs, hs, ws) = mask.dim();
    let offsets = footprint.offsets();

    Array3::from_shape_fn((zs, hs, ws), |(z, h, w)| {
        if !mask[(z, h, w)] {
            return false;
        }
        offsets.iter().all(|&(dz, dh, dw)| {
            let (nz, nh, nw) = (z as i64 + dz, h as i64 + dh, w as i64 + dw);
            nz >= 0
                && nh >= 0
                && nw >= 0
                && (nz as usize) < zs
                && (nh as usize) < hs
                && (nw as usize) < ws
                && mask[(nz as usize, nh as usize, nw as usize)]
        })
    })
}

/// 删除体素数小于 `min_size` 的连通域.
pub fn remove_small(mask: &Array3<bool>, min_size: usize, conn: Connectivity) -> Array3<bool> {
    let (labels, n) = label_components(mask, conn);
    if n == 0 {
        return mask.clone();
    }

    let mut sizes = vec![0usize; n as usize + 1];
    for &l in labels.iter() {
        sizes[l as usize] += 1;
    }
    labels.mapv(|l| l != 0 && sizes[l as usize] >= min_size)
}

/// 估计对象包含的细胞核候选个数.
///
/// 腐蚀切断胞体之间的细桥, 再丢弃小于碎片下限的残渣,
/// 余下连通域个数即核候选数. 0 是合法结果 (对象过细, 腐蚀后无残留).
pub(crate) fn estimate_nuclei(
    mask: &Array3<bool>,
    params: &NucleusParams,
    conn: Connectivity,
) -> usize {
    let eroded = erode(mask, &params.footprint);
    let cleaned = remove_small(&eroded, params.fragment_floor(), conn);
    label_components(&cleaned, conn).1 as usize
}
