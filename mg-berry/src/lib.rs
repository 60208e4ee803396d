#![warn(missing_docs)] // <= 合适时移除它.

//! 核心库. 提供多通道荧光显微镜 3D 图像栈的小胶质细胞分割流水线
//! 与逐对象形态学量化.
//!
//! 流水线固定为五个阶段:
//!
//! 1. **读取** ([`loader`]) — TIFF/LSM (页按通道交错) 或 npy 栈;
//! 2. **预处理** ([`preprocess`]) — 通道选取/加权合成, 可选平滑;
//! 3. **分割** ([`segment`]) — 阈值化 (固定值或 Otsu) + 连通域标号;
//! 4. **过滤** ([`filter`]) — 尺寸/边界/强度规则与稠密重标号;
//! 5. **量化** ([`morph`]) — 体积、表面积、球形度、强度统计,
//!    以及可选的骨架、细胞核估计与凸包领域指标.
//!
//! 上层控制器只需调用 [`pipeline::run`] (或对已加载栈调用
//! [`pipeline::run_stack`]), 得到一个 [`pipeline::PipelineResult`].
//!
//! # 注意
//!
//! 1. 整条流水线是确定性的: 相同输入 + 相同配置必得相同标签 id
//!    与相同度量 (开启 `rayon` feature 也不例外, 并行只按序收集).
//! 2. 核心库从不打印、从不写盘; 诊断信息要么进结果的警告列表,
//!    要么作为类型化错误返回.
//! 3. 违反内部不变量 (如索引越界) 时, 程序会直接 panic,
//!    而不会导致内存错误. As what Rust promises.

/// 二维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx2d = (usize, usize);

/// 三维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx3d = (usize, usize, usize);

/// 显微镜图像栈基础数据结构.
mod data;

pub use data::{loader, MgLabel, MgScan, MgStack, StackMeta, VolumeAttr};

pub mod config;

pub mod consts;

pub mod error;

pub mod preprocess;

pub mod segment;

pub mod filter;

pub mod morph;

pub mod pipeline;

pub mod prelude;

pub use config::PipelineConfig;
pub use pipeline::{run, run_stack, PipelineResult};
