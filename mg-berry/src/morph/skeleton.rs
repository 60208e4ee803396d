//! 拓扑骨架化与骨架派生指标.
//!
//! 骨架通过确定性的三维细化得到: 每轮按固定的六个方向子迭代,
//! 以栅格序收集 "该方向暴露于背景的简单点", 再逐个复检后删除.
//! 简单点判定采用 26/6 连通对:
//!
//! 1. 26-邻域内前景恰好构成一个 26-连通域;
//! 2. 18-邻域内与中心面相邻的背景恰好构成一个 6-连通域.
//!
//! 端点 (前景邻居不超过 1 个) 永不删除, 以保留突起末梢.
//! 删除简单点不改变拓扑, 故骨架保持对象的连通结构;
//! 整个过程无随机性, 相同掩码必得相同骨架.

use ndarray::Array3;

use crate::Idx3d;

/// 骨架派生指标: 突起复杂度的数值描述.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SkeletonMetrics {
    /// 端点个数 (骨架上前景邻居不超过 1 个的体素).
    pub endpoints: usize,

    /// 分支点个数.
    ///
    /// 邻居不少于 3 个的骨架体素先按 26-邻接聚成簇, 每簇计一个分支点;
    /// 单体素宽的交叉处在 26-邻接下会出现成片的高度数体素,
    /// 聚簇后才与解剖意义上的分叉一一对应.
    pub branch_points: usize,

    /// 骨架体素总数.
    pub skeleton_voxels: usize,
}

/// 3x3x3 邻域编码: 下标 `(dz + 1) * 9 + (dh + 1) * 3 + (dw + 1)`.
const CENTER: usize = 13;

/// 细化的六个方向子迭代顺序 (上下、前后、左右).
const FACE_DIRS: [(i64, i64, i64); 6] = [
    (-1, 0, 0),
    (1, 0, 0),
    (0, -1, 0),
    (0, 1, 0),
    (0, 0, -1),
    (0, 0, 1),
];

/// 邻域下标对应的偏移.
#[inline]
const fn unpack(idx: usize) -> (i64, i64, i64) {
    (
        idx as i64 / 9 - 1,
        idx as i64 / 3 % 3 - 1,
        idx as i64 % 3 - 1,
    )
}

/// 偏移的 L1 范数.
#[inline]
const fn manhattan(idx: usize) -> i64 {
    let (dz, dh, dw) = unpack(idx);
    dz.abs() + dh.abs() + dw.abs()
}

/// 两个邻域下标是否 26-相邻 (Chebyshev 距离 1).
#[inline]
fn adjacent26(a: usize, b: usize) -> bool {
    let (az, ah, aw) = unpack(a);
    let (bz, bh, bw) = unpack(b);
    let d = (az - bz).abs().max((ah - bh).abs()).max((aw - bw).abs());
    d == 1
}

/// 两个邻域下标是否 6-相邻 (L1 距离 1).
#[inline]
fn adjacent6(a: usize, b: usize) -> bool {
    let (az, ah, aw) = unpack(a);
    let (bz, bh, bw) = unpack(b);
    (az - bz).abs() + (ah - bh).abs() + (aw - bw).abs() == 1
}

/// 收集 `pos` 的 3x3x3 邻域. 越界体素记为背景.
fn gather(mask: &Array3<bool>, (z, h, w): Idx3d) -> [bool; 27] {
    let (zs, hs, ws) = mask.dim();
    let mut nb = [false; 27];
    for (idx, slot) in nb.iter_mut().enumerate() {
        let (dz, dh, dw) = unpack(idx);
        let (nz, nh, nw) = (z as i64 + dz, h as i64 + dh, w as i64 + dw);
        if nz < 0 || nh < 0 || nw < 0 {
            continue;
        }
        let (nz, nh, nw) = (nz as usize, nh as usize, nw as usize);
        if nz < zs && nh < hs && nw < ws {
            *slot = mask[(nz, nh, nw)];
        }
    }
    nb
}

/// 26-邻域内的前景邻居个数 (不含中心).
#[inline]
fn fg_neighbours(nb: &[bool; 27]) -> usize {
    nb.iter()
        .enumerate()
        .filter(|&(idx, &v)| idx != CENTER && v)
        .count()
}

/// 26-邻域内前景的 26-连通域个数.
fn fg_components_26(nb: &[bool; 27]) -> usize {
    let mut visited = [false; 27];
    let mut components = 0;
    for start in 0..27 {
        if start == CENTER || !nb[start] || visited[start] {
            continue;
        }
        components += 1;
        let mut stack = vec![start];
        visited[start] = true;
        while let Some(cur) = stack.pop() {
            for next in 0..27 {
                if next != CENTER && nb[next] && !visited[next] && adjacent26(cur, next) {
                    visited[next] = true;
                    stack.push(next);
                }
            }
        }
    }
    components
}

/// 18-邻域内与中心面相邻的背景 6-连通域个数.
/// 连通路径只允许经过 18-邻域内的背景格.
fn bg_components_6(nb: &[bool; 27]) -> usize {
    let in_n18 = |idx: usize| idx != CENTER && manhattan(idx) <= 2;

    let mut visited = [false; 27];
    let mut components = 0;
    for start in 0..27 {
        // 只从中心的面邻居出发计数, 不面相邻的背景域不参与判定.
        if manhattan(start) != 1 || nb[start] || visited[start] {
            continue;
        }
        components += 1;
        let mut stack = vec![start];
        visited[start] = true;
        while let Some(cur) = stack.pop() {
            for next in 0..27 {
                if in_n18(next) && !nb[next] && !visited[next] && adjacent6(cur, next) {
                    visited[next] = true;
                    stack.push(next);
                }
            }
        }
    }
    components
}

/// 中心体素是否是简单点 (删除后不改变局部拓扑).
#[inline]
fn is_simple(nb: &[bool; 27]) -> bool {
    fg_components_26(nb) == 1 && bg_components_6(nb) == 1
}

/// 对二值掩码做拓扑细化, 返回曲线骨架.
pub fn skeletonize(mask: &Array3<bool>) -> Array3<bool> {
    let (zs, hs, ws) = mask.dim();
    let mut skel = mask.clone();

    loop {
        let mut changed = false;
        for (dz, dh, dw) in FACE_DIRS {
            // 候选: 该方向暴露于背景的简单非端点, 按栅格序.
            let mut candidates: Vec<Idx3d> = Vec::new();
            for ((z, h, w), &v) in skel.indexed_iter() {
                if !v {
                    continue;
                }
                let (nz, nh, nw) = (z as i64 + dz, h as i64 + dh, w as i64 + dw);
                let exposed = nz < 0
                    || nh < 0
                    || nw < 0
                    || nz as usize >= zs
                    || nh as usize >= hs
                    || nw as usize >= ws
                    || !skel[(nz as usize, nh as usize, nw as usize)];
                if !exposed {
                    continue;
                }
                let nb = gather(&skel, (z, h, w));
                if fg_neighbours(&nb) > 1 && is_simple(&nb) {
                    candidates.push((z, h, w));
                }
            }

            // 逐个复检后删除: 前面的删除可能使后面的候选不再简单.
            for pos in candidates {
                let nb = gather(&skel, pos);
                if fg_neighbours(&nb) > 1 && is_simple(&nb) {
                    skel[pos] = false;
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }
    skel
}

/// 细化掩码并统计骨架派生指标.
pub fn skeleton_metrics(mask: &Array3<bool>) -> SkeletonMetrics {
    let skel = skeletonize(mask);

    let mut endpoints = 0;
    let mut skeleton_voxels = 0;
    let mut junction = Array3::from_elem(skel.dim(), false);
    for (pos, &v) in skel.indexed_iter() {
        if !v {
            continue;
        }
        skeleton_voxels += 1;
        let degree = fg_neighbours(&gather(&skel, pos));
        if degree <= 1 {
            endpoints += 1;
        } else if degree >= 3 {
            junction[pos] = true;
        }
    }

    let branch_points =
        crate::segment::label_components(&junction, crate::segment::Connectivity::Corners).1
            as usize;

    SkeletonMetrics {
        endpoints,
        branch_points,
        skeleton_voxels,
    }
}
