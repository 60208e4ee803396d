//! 一揽子导出本 crate 的常用功能.

pub use crate::{Idx2d, Idx3d};

pub use crate::data::loader::open_stack;
pub use crate::{MgLabel, MgScan, MgStack, StackMeta, VolumeAttr};

pub use crate::config::{ChannelMix, NucleusParams, PipelineConfig, Smoothing, ThresholdMethod};

pub use crate::error::{
    CancelledError, ConfigError, DegenerateObjectError, LoadError, PipelineError,
    ShapeMismatchError, Stage, StageError,
};

pub use crate::preprocess::preprocess;
pub use crate::segment::{otsu_level, segment, Connectivity};

pub use crate::filter::{filter, FilterReport, RejectionTally};

pub use crate::morph::{
    analyze, BoundingBox, ChannelStats, Footprint, ObjectDescriptor, SkeletonMetrics,
    TerritoryMetrics,
};

pub use crate::pipeline::{
    run, run_stack, run_stack_with_cancel, run_with_cancel, CancelToken, PipelineResult,
    StageTiming,
};
