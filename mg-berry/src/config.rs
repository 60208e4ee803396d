//! 流水线配置.
//!
//! 配置是一个不可变的值对象, 由调用方 (上层控制器) 构造并持有,
//! 核心库从不从环境变量或配置文件读取任何参数.
//! 同一配置 + 同一输入保证逐位一致的输出.

use crate::error::ConfigError;
use crate::morph::erosion::Footprint;
use crate::segment::Connectivity;
use crate::MgStack;

/// 前景阈值方法.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ThresholdMethod {
    /// 固定阈值. 强度严格大于该值的体素为前景.
    Fixed(f32),

    /// 全局 Otsu 阈值, 乘以调整系数后再使用 (系数 1.0 即原始 Otsu).
    Otsu {
        /// 阈值调整系数, 必须为正有限数.
        adjust: f32,
    },

    /// 逐切片 Otsu 阈值: 每个 z 切片独立计算阈值并分别应用.
    /// 适合照明随深度衰减的栈.
    OtsuPerSlice {
        /// 阈值调整系数, 必须为正有限数.
        adjust: f32,
    },
}

/// 分割前的可选平滑方式.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Smoothing {
    /// 可分离高斯平滑, σ = radius / 2, 边界按复制处理.
    Gaussian {
        /// 核半径, 至少为 1.
        radius: usize,
    },

    /// 立方窗中值滤波, 窗口边长为 `2 * radius + 1`, 边界按截断处理.
    Median {
        /// 窗口半径, 至少为 1.
        radius: usize,
    },
}

/// 通道合成方式: 选单个通道, 或按权重加权合并全部通道.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ChannelMix {
    /// 选取单个通道 (0 起下标).
    Single(usize),

    /// 按权重加权合并. 权重个数必须等于栈的通道数.
    Weighted(Vec<f32>),
}

/// 细胞核个数估计的参数.
///
/// 对体素数大于 `cut_off_size` 的对象, 以 `footprint` 腐蚀其掩码,
/// 删除小于 `round(cut_off_size / min_nucleus_fraction)` 的碎片,
/// 余下连通域个数即核候选数.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NucleusParams {
    /// 触发估计的最小对象体素数. 小于等于该值的对象不做估计.
    pub cut_off_size: usize,

    /// 核碎片面积比例分母.
    pub min_nucleus_fraction: usize,

    /// 腐蚀所用结构元.
    pub footprint: Footprint,
}

impl NucleusParams {
    /// 腐蚀后允许保留的最小碎片体素数.
    #[inline]
    pub fn fragment_floor(&self) -> usize {
        (self.cut_off_size as f64 / self.min_nucleus_fraction as f64).round() as usize
    }
}

/// 一次流水线运行的全部可调参数.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PipelineConfig {
    /// 输入文件中的通道数 (TIFF/LSM 页交错拆分依据).
    pub channels: usize,

    /// 通道合成方式.
    pub channel_mix: ChannelMix,

    /// 分割前的可选平滑.
    pub smoothing: Option<Smoothing>,

    /// 前景阈值方法.
    pub threshold: ThresholdMethod,

    /// 连通域标号所用邻接规则.
    pub connectivity: Connectivity,

    /// 对象最小体素数, 小于该值的对象被过滤 (噪声去除).
    pub min_size: usize,

    /// 对象最大体素数, 大于该值的对象被过滤. `usize::MAX` 表示不设上限.
    pub max_size: usize,

    /// 是否剔除接触体边界的对象.
    pub exclude_border: bool,

    /// 平均强度下限. `Some(t)` 时, 在未平滑的合成强度体上
    /// 平均强度低于 `t` 的对象被过滤.
    pub intensity_floor: Option<f32>,

    /// 体素标定, 按 `(z, h, w)` 顺序, 以微米为单位.
    pub voxel_dim: [f64; 3],

    /// 是否计算骨架派生指标 (端点数 / 分支点数).
    pub compute_skeleton: bool,

    /// 细胞核个数估计. `None` 表示不估计.
    pub nucleus: Option<NucleusParams>,

    /// 是否计算凸包领域体积与覆盖率统计.
    pub compute_territory: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channels: 1,
            channel_mix: ChannelMix::Single(0),
            smoothing: None,
            threshold: ThresholdMethod::Otsu { adjust: 1.0 },
            connectivity: Connectivity::Corners,
            min_size: 1,
            max_size: usize::MAX,
            exclude_border: false,
            intensity_floor: None,
            voxel_dim: [1.0; 3],
            compute_skeleton: false,
            nucleus: None,
            compute_territory: false,
        }
    }
}

impl PipelineConfig {
    /// 校验配置与给定图像栈的一致性.
    ///
    /// 校验在预处理阶段入口统一进行, 之后各阶段即可假定配置合法;
    /// 任何一项不合法都会使流水线在预处理阶段终止,
    /// 不会进入分割及其后续阶段.
    pub fn validate(&self, stack: &MgStack) -> Result<(), ConfigError> {
        match &self.channel_mix {
            ChannelMix::Single(c) => {
                if *c >= stack.channels() {
                    return Err(ConfigError::ChannelOutOfRange {
                        channel: *c,
                        channels: stack.channels(),
                    });
                }
            }
            ChannelMix::Weighted(w) => {
                if w.len() != stack.channels() {
                    return Err(ConfigError::WeightCount {
                        expected: stack.channels(),
                        found: w.len(),
                    });
                }
            }
        }

        match self.threshold {
            ThresholdMethod::Fixed(level) => {
                if !level.is_finite() {
                    return Err(ConfigError::BadThresholdLevel(level));
                }
            }
            ThresholdMethod::Otsu { adjust } | ThresholdMethod::OtsuPerSlice { adjust } => {
                if !adjust.is_finite() || adjust <= 0.0 {
                    return Err(ConfigError::BadThresholdAdjust(adjust));
                }
            }
        }

        if let Some(Smoothing::Gaussian { radius } | Smoothing::Median { radius }) = self.smoothing
        {
            if radius == 0 {
                return Err(ConfigError::BadSmoothingRadius(radius));
            }
        }

        if self.min_size > self.max_size {
            return Err(ConfigError::BadSizeRange {
                min: self.min_size,
                max: self.max_size,
            });
        }

        if let Some(floor) = self.intensity_floor {
            if !floor.is_finite() {
                return Err(ConfigError::BadIntensityFloor(floor));
            }
        }

        if self.voxel_dim.iter().any(|&d| !d.is_finite() || d <= 0.0) {
            return Err(ConfigError::BadCalibration(self.voxel_dim));
        }

        if let Some(n) = &self.nucleus {
            if n.cut_off_size == 0 || n.min_nucleus_fraction == 0 {
                return Err(ConfigError::BadNucleusParams {
                    cut_off: n.cut_off_size,
                    fraction: n.min_nucleus_fraction,
                });
            }
        }

        Ok(())
    }
}
