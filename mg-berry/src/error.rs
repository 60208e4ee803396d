//! 运行时错误分类.
//!
//! 核心库从不向终端打印任何内容: 所有异常情况都以本模块中的类型化错误
//! 向调用方 (上层控制器) 返回, 由调用方决定如何呈现.

use crate::Idx2d;
use std::path::PathBuf;
use thiserror::Error;

/// 读取图像栈文件时的错误.
#[derive(Debug, Error)]
pub enum LoadError {
    /// 输入路径不存在.
    #[error("找不到输入文件: {0:?}")]
    NotFound(PathBuf),

    /// 不支持的文件扩展名. 目前支持 tif/tiff/lsm/npy.
    #[error("不支持的文件扩展名: {0:?}")]
    UnsupportedExtension(String),

    /// 不支持的位深或采样格式. 目前支持 u8, u16 和 f32.
    #[error("不支持的位深或采样格式")]
    UnsupportedBitDepth,

    /// 底层解码失败 (文件损坏或格式异常).
    #[error("图像解码失败: {0}")]
    Decode(String),

    /// 文件不包含任何图像页.
    #[error("文件不包含任何图像页")]
    EmptyStack,

    /// 页数不是通道数的正整数倍, 无法按通道交错模式拆分.
    #[error("页数 {pages} 不是通道数 {channels} 的正整数倍")]
    PageCount {
        /// 文件中的图像页总数.
        pages: usize,
        /// 调用方声明的通道数.
        channels: usize,
    },

    /// 声明的通道数无效.
    #[error("声明的通道数 {0} 无效 (npy 栈必须为 1, 其余格式至少为 1)")]
    BadChannels(usize),

    /// 页与页之间空间形状不一致.
    #[error(transparent)]
    Shape(#[from] ShapeMismatchError),

    /// 底层 I/O 错误.
    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),
}

/// 图像页之间 (即通道之间) 空间形状不一致.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("图像页形状不一致: 期望 (h, w) = {expected:?}, 实际 {found:?}")]
pub struct ShapeMismatchError {
    /// 第一页确定的形状.
    pub expected: Idx2d,

    /// 后续页实际读到的形状.
    pub found: Idx2d,
}

/// 配置参数非法.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// 所选通道下标超出图像栈的通道范围.
    #[error("通道下标 {channel} 超出范围 (栈共 {channels} 个通道)")]
    ChannelOutOfRange {
        /// 请求的通道下标 (0 起).
        channel: usize,
        /// 图像栈实际通道数.
        channels: usize,
    },

    /// 通道权重个数与通道数不一致.
    #[error("通道权重个数错误: 期望 {expected}, 实际 {found}")]
    WeightCount {
        /// 图像栈实际通道数.
        expected: usize,
        /// 权重向量长度.
        found: usize,
    },

    /// 固定阈值必须是有限浮点数.
    #[error("固定阈值 {0} 不是有限数")]
    BadThresholdLevel(f32),

    /// Otsu 调整系数必须为正有限数.
    #[error("Otsu 调整系数 {0} 必须为正有限数")]
    BadThresholdAdjust(f32),

    /// 平滑核半径必须至少为 1.
    #[error("平滑核半径 {0} 无效, 至少为 1")]
    BadSmoothingRadius(usize),

    /// 尺寸过滤区间非法.
    #[error("对象尺寸区间非法: min_size = {min}, max_size = {max}")]
    BadSizeRange {
        /// 最小体素数.
        min: usize,
        /// 最大体素数.
        max: usize,
    },

    /// 体素标定必须全部为正有限数.
    #[error("体素标定 {0:?} 非法, 三个分量都必须为正有限数")]
    BadCalibration([f64; 3]),

    /// 细胞核估计参数非法.
    #[error("细胞核估计参数非法: cut_off_size = {cut_off}, min_nucleus_fraction = {fraction}")]
    BadNucleusParams {
        /// 触发估计的最小对象尺寸.
        cut_off: usize,
        /// 核面积比例分母.
        fraction: usize,
    },

    /// 强度下限必须是有限数.
    #[error("强度下限 {0} 不是有限数")]
    BadIntensityFloor(f32),
}

/// 幸存标签不含任何体素.
///
/// 这是上游阶段 (分割或过滤) 破坏稠密标签不变量的信号,
/// 属于编程错误, 永远不应在正常运行中出现, 也不可恢复.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("标签 {label} 不包含任何体素 (上游阶段已破坏稠密标签不变量)")]
pub struct DegenerateObjectError {
    /// 退化的标签 id.
    pub label: u32,
}

/// 协作式取消: 调用方在阶段之间请求中止.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Error)]
#[error("流水线已被调用方取消")]
pub struct CancelledError;

/// 单个阶段内可能发生的全部错误.
#[derive(Debug, Error)]
pub enum StageError {
    /// 读取失败.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// 配置非法.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// 稠密标签不变量被破坏.
    #[error(transparent)]
    Degenerate(#[from] DegenerateObjectError),

    /// 调用方取消.
    #[error(transparent)]
    Cancelled(#[from] CancelledError),
}

/// 流水线阶段标识. 用于在错误与计时信息中定位阶段.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Stage {
    /// 读取图像栈.
    Load,

    /// 通道合成与可选平滑.
    Preprocess,

    /// 阈值化与连通域标号.
    Segment,

    /// 对象过滤与稠密重标号.
    Filter,

    /// 形态学量化.
    Analyze,
}

impl Stage {
    /// 阶段名称.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Stage::Load => "load",
            Stage::Preprocess => "preprocess",
            Stage::Segment => "segment",
            Stage::Filter => "filter",
            Stage::Analyze => "analyze",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 带阶段标记的流水线错误. 这是 orchestrator 对外的唯一错误类型.
#[derive(Debug, Error)]
#[error("流水线在 {stage} 阶段失败: {source}")]
pub struct PipelineError {
    /// 失败的阶段.
    pub stage: Stage,

    /// 阶段内部的原始错误.
    #[source]
    pub source: StageError,
}

impl PipelineError {
    /// 将阶段内错误包装为带阶段标记的流水线错误.
    #[inline]
    pub fn new<E: Into<StageError>>(stage: Stage, source: E) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 阶段名称必须稳定, 上层依赖它做诊断展示.
    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::Load.to_string(), "load");
        assert_eq!(Stage::Analyze.to_string(), "analyze");
    }

    #[test]
    fn test_pipeline_error_wraps_stage() {
        let e = PipelineError::new(
            Stage::Preprocess,
            ConfigError::ChannelOutOfRange {
                channel: 3,
                channels: 2,
            },
        );
        assert_eq!(e.stage, Stage::Preprocess);
        assert!(matches!(
            e.source,
            StageError::Config(ConfigError::ChannelOutOfRange { channel: 3, .. })
        ));
    }
}
