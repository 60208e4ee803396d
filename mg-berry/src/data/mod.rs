//! 显微镜图像栈基础数据结构.
//!
//! 三个核心类型:
//!
//! 1. [`MgStack`] — 加载后的多通道荧光栈, 按 `(c, z, h, w)` 存储;
//! 2. [`MgScan`] — 单通道工作强度体, 按 `(z, h, w)` 存储;
//! 3. [`MgLabel`] — 标签体, 0 为背景, 正整数为对象 id, 标签集稠密.
//!
//! 所有类型都携带 [`StackMeta`] (通道数与体素标定), 并通过 [`VolumeAttr`]
//! 提供统一的几何属性访问.

use std::ops::{Index, IndexMut};

use ndarray::{Array2, Array3, Array4, ArrayView2, ArrayView3, ArrayView4, Axis};

use crate::consts::label::BACKGROUND;
use crate::{Idx2d, Idx3d};

pub mod loader;

/// 图像栈元信息: 通道数与体素标定.
///
/// 体素标定按 `(z, h, w)` 顺序给出, 单位为微米.
/// 标定从不由核心库自行读取, 总是由调用方通过配置传入.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StackMeta {
    channels: usize,
    pix_dim: [f64; 3],
}

impl StackMeta {
    /// 构造元信息. 合法性 (通道数、标定为正) 由流水线配置校验阶段统一检查.
    #[inline]
    pub fn new(channels: usize, pix_dim: [f64; 3]) -> Self {
        Self { channels, pix_dim }
    }

    /// 通道个数.
    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }
}

/// 3D 体数据的共用几何属性.
pub trait VolumeAttr {
    /// 获取元信息.
    fn meta(&self) -> &StackMeta;

    /// 获取空间形状, 按 `(z, h, w)` 顺序.
    fn shape(&self) -> Idx3d;

    /// 获取水平切片形状, 按 `(h, w)` 顺序.
    #[inline]
    fn slice_shape(&self) -> Idx2d {
        let (_, h, w) = self.shape();
        (h, w)
    }

    /// 获取水平切片个数.
    #[inline]
    fn len_z(&self) -> usize {
        self.shape().0
    }

    /// 获取空间体素个数 (不含通道维).
    #[inline]
    fn size(&self) -> usize {
        let (z, h, w) = self.shape();
        z * h * w
    }

    /// 检查空间索引是否合法.
    #[inline]
    fn check(&self, (z0, h0, w0): &Idx3d) -> bool {
        let (z, h, w) = self.shape();
        *z0 < z && *h0 < h && *w0 < w
    }

    /// 获取单个体素分辨率, 按 `(z, h, w)` 顺序, 以微米为单位.
    #[inline]
    fn pix_dim(&self) -> [f64; 3] {
        self.meta().pix_dim
    }

    /// 获取空间方向 (相邻切片方向) 体素分辨率, 以微米为单位.
    #[inline]
    fn z_um(&self) -> f64 {
        self.pix_dim()[0]
    }

    /// 获取 height 方向体素分辨率, 以微米为单位.
    #[inline]
    fn height_um(&self) -> f64 {
        self.pix_dim()[1]
    }

    /// 获取 width 方向体素分辨率, 以微米为单位.
    #[inline]
    fn width_um(&self) -> f64 {
        self.pix_dim()[2]
    }

    /// 体素分辨率在三个维度上是否是各向同的?
    #[inline]
    fn is_isotropic(&self) -> bool {
        let [z, h, w] = self.pix_dim();
        z == h && z == w
    }

    /// 获取体素的实际体积值, 以立方微米为单位.
    #[inline]
    fn voxel(&self) -> f64 {
        self.pix_dim().iter().product()
    }

    /// 获取水平切片方向的像素实际面积值, 以平方微米为单位.
    #[inline]
    fn slice_pixel(&self) -> f64 {
        self.pix_dim().iter().skip(1).product()
    }
}

/// 多通道荧光显微镜 3D 图像栈. 强度值以 `f32` 保存,
/// 数据按 `(c, z, h, w)` 组织. 加载完成后不可变.
#[derive(Debug, Clone)]
pub struct MgStack {
    meta: StackMeta,
    data: Array4<f32>,
}

impl VolumeAttr for MgStack {
    #[inline]
    fn meta(&self) -> &StackMeta {
        &self.meta
    }

    #[inline]
    fn shape(&self) -> Idx3d {
        let &[_, z, h, w] = self.data.shape() else {
            unreachable!()
        };
        (z, h, w)
    }
}

impl Index<(usize, usize, usize, usize)> for MgStack {
    type Output = f32;

    #[inline]
    fn index(&self, index: (usize, usize, usize, usize)) -> &Self::Output {
        &self.data[[index.0, index.1, index.2, index.3]]
    }
}

impl MgStack {
    /// 根据裸数据和体素标定直接创建图像栈.
    ///
    /// `data` 按 `(c, z, h, w)` 组织, 通道数至少为 1 且空间体积非空,
    /// 否则程序 panic. 标定合法性由流水线配置校验统一检查.
    pub fn from_array(data: Array4<f32>, pix_dim: [f64; 3]) -> Self {
        let &[c, z, h, w] = data.shape() else {
            unreachable!()
        };
        assert!(c >= 1, "通道数至少为 1");
        assert!(z * h * w > 0, "图像栈空间体积不能为空");

        Self {
            meta: StackMeta::new(c, pix_dim),
            data,
        }
    }

    /// 通道个数.
    #[inline]
    pub fn channels(&self) -> usize {
        self.meta.channels()
    }

    /// 获取第 `c` 个通道的只读视图. 当 `c` 越界时 panic.
    #[inline]
    pub fn channel_view(&self, c: usize) -> ArrayView3<'_, f32> {
        self.data.index_axis(Axis(0), c)
    }

    /// 将第 `c` 个通道复制为独立的单通道强度体. 当 `c` 越界时 panic.
    pub fn channel(&self, c: usize) -> MgScan {
        MgScan::new(
            StackMeta::new(1, self.meta.pix_dim),
            self.channel_view(c).to_owned(),
        )
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView4<'_, f32> {
        self.data.view()
    }
}

/// 单通道工作强度体. 由预处理器从 [`MgStack`] 合成,
/// 数据按 `(z, h, w)` 组织.
#[derive(Debug, Clone)]
pub struct MgScan {
    meta: StackMeta,
    data: Array3<f32>,
}

impl VolumeAttr for MgScan {
    #[inline]
    fn meta(&self) -> &StackMeta {
        &self.meta
    }

    #[inline]
    fn shape(&self) -> Idx3d {
        self.data.dim()
    }
}

impl Index<Idx3d> for MgScan {
    type Output = f32;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl IndexMut<Idx3d> for MgScan {
    #[inline]
    fn index_mut(&mut self, index: Idx3d) -> &mut Self::Output {
        &mut self.data[index]
    }
}

impl MgScan {
    /// 内部构造函数. 不做合法性检查.
    #[inline]
    pub(crate) fn new(meta: StackMeta, data: Array3<f32>) -> Self {
        Self { meta, data }
    }

    /// 根据裸数据和体素标定直接创建强度体. 数据为空时 panic.
    pub fn from_array(data: Array3<f32>, pix_dim: [f64; 3]) -> Self {
        assert!(!data.is_empty(), "强度体不能为空");
        Self::new(StackMeta::new(1, pix_dim), data)
    }

    /// 获取 z 空间的第 `z_index` 层切片视图. 当 `z_index` 越界时 panic.
    #[inline]
    pub fn slice_at(&self, z_index: usize) -> ArrayView2<'_, f32> {
        self.data.index_axis(Axis(0), z_index)
    }

    /// 获取能按升序迭代水平切片的迭代器.
    #[inline]
    pub fn slice_iter(&self) -> impl ExactSizeIterator<Item = ArrayView2<'_, f32>> {
        self.data.axis_iter(Axis(0))
    }

    /// 对每个水平切片实施 `op`, 并按 z 升序收集结果.
    pub fn slice_map<T, F>(&self, op: F) -> Vec<T>
    where
        F: Fn(usize, ArrayView2<'_, f32>) -> T,
    {
        self.slice_iter()
            .enumerate()
            .map(|(i, v)| op(i, v))
            .collect()
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView3<'_, f32> {
        self.data.view()
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};
    }
}

/// 并发操作部分
#[cfg(feature = "rayon")]
impl MgScan {
    /// 借助 `rayon`, 并行地对每个水平切片实施 `op`, 并按 z 升序收集结果.
    ///
    /// 结果顺序与 [`Self::slice_map`] 完全一致, 确定性标号约定不受影响.
    pub fn par_slice_map<T, F>(&self, op: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize, ArrayView2<'_, f32>) -> T + Sync + Send,
    {
        self.data
            .axis_iter(Axis(0))
            .into_par_iter()
            .enumerate()
            .map(|(i, v)| op(i, v))
            .collect()
    }
}

/// 标签体. 0 为背景, 每个正整数 id 恰好对应一个连通对象.
///
/// 不变量: 标签集在任何时刻都是稠密的 `1..=len()`.
/// 该结构只能由分割器和过滤器构造, 且不提供可变访问,
/// 以防止外部破坏稠密性.
#[derive(Debug, Clone)]
pub struct MgLabel {
    meta: StackMeta,
    data: Array3<u32>,
    objects: u32,
}

impl VolumeAttr for MgLabel {
    #[inline]
    fn meta(&self) -> &StackMeta {
        &self.meta
    }

    #[inline]
    fn shape(&self) -> Idx3d {
        self.data.dim()
    }
}

impl Index<Idx3d> for MgLabel {
    type Output = u32;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl MgLabel {
    /// 内部构造函数. `objects` 必须等于 `data` 中的最大标签值.
    pub(crate) fn new(meta: StackMeta, data: Array3<u32>, objects: u32) -> Self {
        debug_assert_eq!(
            data.iter().copied().max().unwrap_or(BACKGROUND),
            objects,
            "标签体最大值与对象个数不一致"
        );
        Self {
            meta,
            data,
            objects,
        }
    }

    /// 获取对象个数 (不含背景).
    #[inline]
    pub fn len(&self) -> usize {
        self.objects as usize
    }

    /// 标签体是否不含任何对象?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.objects == 0
    }

    /// 统计每个标签的体素个数. 返回值长度为 `len() + 1`,
    /// 下标 0 是背景体素数.
    pub fn sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0usize; self.len() + 1];
        for &v in self.data.iter() {
            sizes[v as usize] += 1;
        }
        sizes
    }

    /// 获取标签 `label` 的二值掩码. 当 `label` 不在 `1..=len()` 内时 panic.
    pub fn mask_of(&self, label: u32) -> Array3<bool> {
        assert!(
            (1..=self.objects).contains(&label),
            "标签 {label} 不在 1..={} 内",
            self.objects
        );
        self.data.mapv(|v| v == label)
    }

    /// 获取 z 空间的第 `z_index` 层切片视图. 当 `z_index` 越界时 panic.
    #[inline]
    pub fn slice_at(&self, z_index: usize) -> ArrayView2<'_, u32> {
        self.data.index_axis(Axis(0), z_index)
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView3<'_, u32> {
        self.data.view()
    }

    /// 沿 z 方向做最大值投影, 得到 2D 标签概览图.
    ///
    /// 重叠处保留较大的标签 id. 供上层展示使用.
    pub fn labels_to_2d(&self) -> Array2<u32> {
        self.data.fold_axis(Axis(0), BACKGROUND, |&acc, &v| acc.max(v))
    }

    /// 将标签 `label` 的掩码沿 z 方向求和投影, 每个像素值为该列中
    /// 属于该对象的体素个数. 当 `label` 不在 `1..=len()` 内时 panic.
    pub fn object_to_2d(&self, label: u32) -> Array2<u32> {
        assert!(
            (1..=self.objects).contains(&label),
            "标签 {label} 不在 1..={} 内",
            self.objects
        );
        self.data
            .fold_axis(Axis(0), 0u32, |&acc, &v| acc + u32::from(v == label))
    }

    /// 所有对象的重叠投影: 每个像素值为该列中前景体素的总个数.
    pub fn overlap_to_2d(&self) -> Array2<u32> {
        self.data
            .fold_axis(Axis(0), 0u32, |&acc, &v| acc + u32::from(v != BACKGROUND))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr3, Array3, Array4};

    fn f64_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn test_volume_attr_geometry() {
        let scan = MgScan::from_array(Array3::zeros((4, 3, 2)), [2.0, 0.5, 0.5]);
        assert_eq!(scan.shape(), (4, 3, 2));
        assert_eq!(scan.slice_shape(), (3, 2));
        assert_eq!(scan.len_z(), 4);
        assert_eq!(scan.size(), 24);
        assert!(scan.check(&(3, 2, 1)));
        assert!(!scan.check(&(4, 0, 0)));
        assert!(!scan.is_isotropic());
        assert!(f64_eq(scan.voxel(), 0.5));
        assert!(f64_eq(scan.slice_pixel(), 0.25));
    }

    #[test]
    fn test_stack_channel_extraction() {
        let mut data = Array4::<f32>::zeros((2, 1, 2, 2));
        data[[0, 0, 0, 0]] = 1.0;
        data[[1, 0, 1, 1]] = 7.0;
        let stack = MgStack::from_array(data, [1.0; 3]);

        assert_eq!(stack.channels(), 2);
        assert_eq!(stack.shape(), (1, 2, 2));
        assert_eq!(stack[(1, 0, 1, 1)], 7.0);

        let ch0 = stack.channel(0);
        assert_eq!(ch0[(0, 0, 0)], 1.0);
        assert_eq!(ch0[(0, 1, 1)], 0.0);
        let ch1 = stack.channel(1);
        assert_eq!(ch1[(0, 1, 1)], 7.0);
    }

    #[test]
    #[should_panic]
    fn test_stack_needs_at_least_one_channel() {
        let _ = MgStack::from_array(Array4::zeros((0, 1, 2, 2)), [1.0; 3]);
    }

    fn label_fixture() -> MgLabel {
        // 两个对象: 标签 1 占据 z=0 平面两个体素, 标签 2 占据 z=1 单体素.
        let data = arr3(&[[[1, 1], [0, 0]], [[0, 0], [0, 2]]]);
        MgLabel::new(StackMeta::new(1, [1.0; 3]), data, 2)
    }

    #[test]
    fn test_label_sizes_and_masks() {
        let label = label_fixture();
        assert_eq!(label.len(), 2);
        assert!(!label.is_empty());
        assert_eq!(label.sizes(), vec![5, 2, 1]);

        let m1 = label.mask_of(1);
        assert_eq!(m1.iter().filter(|&&b| b).count(), 2);
        assert!(m1[[0, 0, 0]] && m1[[0, 0, 1]]);
    }

    #[test]
    #[should_panic]
    fn test_label_mask_out_of_range() {
        let _ = label_fixture().mask_of(3);
    }

    #[test]
    fn test_slice_views() {
        let mut data = Array3::<f32>::zeros((2, 2, 2));
        data[[1, 0, 1]] = 4.0;
        let scan = MgScan::from_array(data, [1.0; 3]);

        assert_eq!(scan.slice_at(1)[[0, 1]], 4.0);
        assert_eq!(scan.slice_iter().count(), 2);
        let sums = scan.slice_map(|_, sl| sl.sum());
        assert_eq!(sums, vec![0.0, 4.0]);

        let label = label_fixture();
        assert_eq!(label.slice_at(0)[[0, 0]], 1);
    }

    #[test]
    fn test_label_projections() {
        let label = label_fixture();

        let flat = label.labels_to_2d();
        assert_eq!(flat[[0, 0]], 1);
        assert_eq!(flat[[0, 1]], 1);
        assert_eq!(flat[[1, 1]], 2);
        assert_eq!(flat[[1, 0]], 0);

        let obj1 = label.object_to_2d(1);
        assert_eq!(obj1[[0, 0]], 1);
        assert_eq!(obj1[[1, 1]], 0);

        let overlap = label.overlap_to_2d();
        assert_eq!(overlap[[0, 0]], 1);
        assert_eq!(overlap[[1, 1]], 1);
        assert_eq!(overlap[[1, 0]], 0);
    }
}
