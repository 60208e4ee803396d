//! 流水线编排.
//!
//! 阶段顺序固定: 读取 → 预处理 → 分割 → 过滤 → 量化.
//! 首个失败的阶段以 [`PipelineError`] 携带阶段名向上传播, 绝不静默吞掉;
//! 可恢复的阶段内情况 (如空前景掩码) 记为警告并以零对象结果继续.
//! 每个阶段的墙钟耗时都记入结果.
//!
//! 编排器自身不做任何并发控制: 只要每次调用持有独立的数据,
//! 多个线程可以安全地同时运行各自的流水线 (见并发测试).
//! 取消是协作式的: 只在阶段之间检查取消令牌, 阶段内部从不中断.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::PipelineConfig;
use crate::data::loader;
use crate::error::{CancelledError, PipelineError, Stage};
use crate::filter::{filter, RejectionTally};
use crate::morph::{analyze, territory, ObjectDescriptor, TerritoryMetrics};
use crate::preprocess::{apply_smoothing, combine_channels};
use crate::segment::segment;
use crate::{MgScan, MgStack};

/// 协作式取消令牌. 可廉价克隆后交给其它线程, 任何持有者都可请求取消.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// 创建未触发的令牌.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 请求取消. 流水线在下一个阶段边界终止.
    #[inline]
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// 是否已请求取消?
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// 单个阶段的墙钟耗时.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StageTiming {
    /// 阶段.
    pub stage: Stage,

    /// 耗时.
    pub elapsed: Duration,
}

/// 一次流水线运行的全部产出. 这是返回给调用方的唯一对象.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PipelineResult {
    /// 幸存对象的描述子, 按稠密标签升序排列.
    pub objects: Vec<ObjectDescriptor>,

    /// 过滤前的候选对象数.
    pub candidates: usize,

    /// 幸存对象数. 恒等于 `objects.len()`.
    pub kept: usize,

    /// 剔除原因统计.
    pub rejected: RejectionTally,

    /// 各阶段耗时, 按执行顺序排列.
    pub timings: Vec<StageTiming>,

    /// 非致命警告. 呈现方式由调用方决定.
    pub warnings: Vec<String>,

    /// 凸包领域覆盖率统计. 配置关闭时为 `None`.
    pub territory: Option<TerritoryMetrics>,
}

/// 从文件运行完整流水线.
pub fn run<P: AsRef<Path>>(
    path: P,
    config: &PipelineConfig,
) -> Result<PipelineResult, PipelineError> {
    run_with_cancel(path, config, &CancelToken::new())
}

/// 从文件运行完整流水线, 带取消令牌.
pub fn run_with_cancel<P: AsRef<Path>>(
    path: P,
    config: &PipelineConfig,
    cancel: &CancelToken,
) -> Result<PipelineResult, PipelineError> {
    let started = Instant::now();
    let stack = loader::open_stack(path, config.channels, config.voxel_dim)
        .map_err(|e| PipelineError::new(Stage::Load, e))?;
    let timings = vec![StageTiming {
        stage: Stage::Load,
        elapsed: started.elapsed(),
    }];
    run_stages(&stack, config, cancel, timings)
}

/// 对已在内存中的图像栈运行流水线 (跳过读取阶段).
pub fn run_stack(
    stack: &MgStack,
    config: &PipelineConfig,
) -> Result<PipelineResult, PipelineError> {
    run_stack_with_cancel(stack, config, &CancelToken::new())
}

/// 对已在内存中的图像栈运行流水线, 带取消令牌.
pub fn run_stack_with_cancel(
    stack: &MgStack,
    config: &PipelineConfig,
    cancel: &CancelToken,
) -> Result<PipelineResult, PipelineError> {
    run_stages(stack, config, cancel, Vec::new())
}

/// 检查取消令牌. `stage` 为将要进入的阶段.
#[inline]
fn ensure_not_cancelled(cancel: &CancelToken, stage: Stage) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        return Err(PipelineError::new(stage, CancelledError));
    }
    Ok(())
}

/// 读取之后的四个阶段.
fn run_stages(
    stack: &MgStack,
    config: &PipelineConfig,
    cancel: &CancelToken,
    mut timings: Vec<StageTiming>,
) -> Result<PipelineResult, PipelineError> {
    let mut warnings: Vec<String> = Vec::new();
    let fail = |stage: Stage| move |e: crate::error::ConfigError| PipelineError::new(stage, e);

    // 预处理: 配置校验、通道合成、可选平滑.
    ensure_not_cancelled(cancel, Stage::Preprocess)?;
    let started = Instant::now();
    config
        .validate(stack)
        .map_err(fail(Stage::Preprocess))?;
    let combined = combine_channels(stack, &config.channel_mix).map_err(fail(Stage::Preprocess))?;
    let working: MgScan = match config.smoothing {
        Some(s) => apply_smoothing(&combined, s).map_err(fail(Stage::Preprocess))?,
        None => combined.clone(),
    };
    timings.push(StageTiming {
        stage: Stage::Preprocess,
        elapsed: started.elapsed(),
    });

    // 分割.
    ensure_not_cancelled(cancel, Stage::Segment)?;
    let started = Instant::now();
    let labels = segment(&working, config).map_err(fail(Stage::Segment))?;
    timings.push(StageTiming {
        stage: Stage::Segment,
        elapsed: started.elapsed(),
    });
    if labels.is_empty() {
        warnings.push("前景掩码为空, 未产生任何候选对象".to_string());
    }

    // 过滤. 强度规则读未平滑的合成强度体.
    ensure_not_cancelled(cancel, Stage::Filter)?;
    let started = Instant::now();
    let (filtered, report) = filter(&labels, &combined, config);
    timings.push(StageTiming {
        stage: Stage::Filter,
        elapsed: started.elapsed(),
    });
    push_rejection_warnings(&mut warnings, &report.rejected);

    // 量化.
    ensure_not_cancelled(cancel, Stage::Analyze)?;
    let started = Instant::now();
    let objects = analyze(&filtered, stack, config).map_err(|e| PipelineError::new(Stage::Analyze, e))?;
    let territory = config.compute_territory.then(|| {
        let per_object: Vec<f64> = objects.iter().filter_map(|d| d.territory_um3).collect();
        territory::coverage(&per_object, stack)
    });
    timings.push(StageTiming {
        stage: Stage::Analyze,
        elapsed: started.elapsed(),
    });

    log::debug!(
        "pipeline: {} 候选 -> {} 幸存, {} 条警告",
        report.candidates,
        report.kept,
        warnings.len()
    );

    Ok(PipelineResult {
        objects,
        candidates: report.candidates,
        kept: report.kept,
        rejected: report.rejected,
        timings,
        warnings,
        territory,
    })
}

/// 把剔除账目翻译成诊断警告.
fn push_rejection_warnings(warnings: &mut Vec<String>, tally: &RejectionTally) {
    for (count, reason) in [
        (tally.too_small, "体素数低于下限"),
        (tally.too_large, "体素数高于上限"),
        (tally.border, "接触体边界"),
        (tally.faint, "平均强度低于下限"),
    ] {
        if count > 0 {
            warnings.push(format!("{count} 个对象因{reason}被剔除"));
        }
    }
}
