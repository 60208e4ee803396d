//! 领域体积: 对象体素点云的凸包体积与全图覆盖率.
//!
//! 凸包用确定性的增量法构造: 种子四面体取字典序极值点,
//! 其余点按固定顺序逐个并入, 可见面集合与地平线边都按既有面序遍历,
//! 因此相同点云必得相同凸包. 退化点云 (共线/共面) 的体积为 0.
//!
//! 点坐标在构造前先按体素标定换算为物理坐标 (微米),
//! 因此各向异性标定下的体积也是正确的立方微米值.

use itertools::Itertools;
use ordered_float::OrderedFloat;

use crate::VolumeAttr;

/// 全图覆盖率统计.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TerritoryMetrics {
    /// 所有对象凸包体积之和, 立方微米.
    pub total_covered_um3: f64,

    /// 整个图像立方体的体积, 立方微米.
    pub image_volume_um3: f64,

    /// 未被覆盖的体积, 立方微米.
    pub empty_um3: f64,

    /// 覆盖百分比.
    pub covered_percentage: f64,
}

/// 汇总每个对象的凸包体积, 计算全图覆盖率.
pub fn coverage<V: VolumeAttr>(per_object_um3: &[f64], volume: &V) -> TerritoryMetrics {
    let total_covered_um3: f64 = per_object_um3.iter().sum();
    let image_volume_um3 = volume.size() as f64 * volume.voxel();
    TerritoryMetrics {
        total_covered_um3,
        image_volume_um3,
        empty_um3: image_volume_um3 - total_covered_um3,
        covered_percentage: total_covered_um3 / image_volume_um3 * 100.0,
    }
}

type P3 = [f64; 3];

#[inline]
fn sub(a: P3, b: P3) -> P3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
fn cross(a: P3, b: P3) -> P3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

#[inline]
fn dot(a: P3, b: P3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline]
fn norm(a: P3) -> f64 {
    dot(a, a).sqrt()
}

/// 面的外法向 (未归一化).
#[inline]
fn face_normal(points: &[P3], [a, b, c]: [usize; 3]) -> P3 {
    cross(sub(points[b], points[a]), sub(points[c], points[a]))
}

/// 点云凸包体积.
///
/// 少于 4 个点或仿射退化 (共线/共面) 的点云体积为 0.
pub fn hull_volume(points: &[P3]) -> f64 {
    if points.len() < 4 {
        return 0.0;
    }

    // 数值容差随点云尺度缩放.
    let lo = [0usize, 1, 2].map(|k| points.iter().map(|p| p[k]).fold(f64::INFINITY, f64::min));
    let hi = [0usize, 1, 2].map(|k| {
        points
            .iter()
            .map(|p| p[k])
            .fold(f64::NEG_INFINITY, f64::max)
    });
    let diag = norm(sub(hi, lo)).max(1.0);
    let tol = 1e-9 * diag;

    // 种子四面体: 字典序最小点, 距其最远点, 距线最远点, 距面最远点.
    let i0 = points
        .iter()
        .position_min_by_key(|p| (OrderedFloat(p[0]), OrderedFloat(p[1]), OrderedFloat(p[2])))
        .unwrap();
    let i1 = points
        .iter()
        .position_max_by_key(|p| OrderedFloat(norm(sub(**p, points[i0]))))
        .unwrap();
    if norm(sub(points[i1], points[i0])) <= tol {
        return 0.0;
    }
    let axis = sub(points[i1], points[i0]);
    let i2 = points
        .iter()
        .position_max_by_key(|p| OrderedFloat(norm(cross(axis, sub(**p, points[i0])))))
        .unwrap();
    if norm(cross(axis, sub(points[i2], points[i0]))) <= tol * norm(axis) {
        return 0.0;
    }
    let plane_normal = face_normal(points, [i0, i1, i2]);
    let i3 = points
        .iter()
        .position_max_by_key(|p| OrderedFloat(dot(plane_normal, sub(**p, points[i0])).abs()))
        .unwrap();
    if dot(plane_normal, sub(points[i3], points[i0])).abs() <= tol * norm(plane_normal) {
        return 0.0;
    }

    // 内部参考点: 种子四面体质心.
    let interior = {
        let mut c = [0.0; 3];
        for &i in &[i0, i1, i2, i3] {
            for k in 0..3 {
                c[k] += points[i][k] / 4.0;
            }
        }
        c
    };

    // 初始面, 统一调整为外法向.
    let mut faces: Vec<[usize; 3]> = [
        [i0, i1, i2],
        [i0, i1, i3],
        [i0, i2, i3],
        [i1, i2, i3],
    ]
    .into_iter()
    .map(|[a, b, c]| {
        if dot(face_normal(points, [a, b, c]), sub(interior, points[a])) > 0.0 {
            [a, c, b]
        } else {
            [a, b, c]
        }
    })
    .collect();

    // 增量并入其余点.
    for (i, &p) in points.iter().enumerate() {
        let visible: Vec<usize> = faces
            .iter()
            .enumerate()
            .filter(|(_, &f)| {
                let n = face_normal(points, f);
                dot(n, sub(p, points[f[0]])) > tol * norm(n)
            })
            .map(|(fi, _)| fi)
            .collect();
        if visible.is_empty() {
            continue;
        }

        // 可见面的有向边集合; 反向边不在集合中的即地平线边.
        let mut edges = std::collections::HashSet::new();
        for &fi in &visible {
            let [a, b, c] = faces[fi];
            edges.extend([(a, b), (b, c), (c, a)]);
        }
        let mut new_faces: Vec<[usize; 3]> = Vec::new();
        for &fi in &visible {
            let [a, b, c] = faces[fi];
            for (ea, eb) in [(a, b), (b, c), (c, a)] {
                if !edges.contains(&(eb, ea)) {
                    // 地平线边保持原面的绕向, 新面自动朝外.
                    new_faces.push([ea, eb, i]);
                }
            }
        }

        let visible_set: std::collections::HashSet<usize> = visible.into_iter().collect();
        let mut kept: Vec<[usize; 3]> = faces
            .into_iter()
            .enumerate()
            .filter(|(fi, _)| !visible_set.contains(fi))
            .map(|(_, f)| f)
            .collect();
        kept.extend(new_faces);
        faces = kept;
    }

    // 以内部参考点为顶点, 对每个外向面求带号四面体体积并求和.
    faces
        .iter()
        .map(|&[a, b, c]| {
            dot(
                sub(points[a], interior),
                cross(sub(points[b], interior), sub(points[c], interior)),
            ) / 6.0
        })
        .sum()
}
