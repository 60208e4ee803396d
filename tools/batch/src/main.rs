//! 批处理运行器.
//!
//! 把若干图像栈文件散到工作线程池上, 每个文件一条独立流水线,
//! 运行之间不共享任何可变状态. 核心库自身不打印; 所有呈现在这里完成.

use std::sync::mpsc;
use std::time::Duration;

use mg_berry::prelude::*;

const SEP: &str = "--------------------------------------------------------";

/// 简单分隔线.
#[inline]
fn sep() {
    println!("{SEP}");
}

/// 获得可并行核心数.
fn cpus() -> usize {
    std::thread::available_parallelism().map_or_else(|_| num_cpus::get(), usize::from)
}

fn usage() -> ! {
    eprintln!("用法: batch <通道数> <文件>...");
    eprintln!("支持 tif/tiff/lsm (页按通道交错) 与 npy (单通道).");
    std::process::exit(2);
}

fn total_ms(timings: &[StageTiming]) -> u128 {
    timings
        .iter()
        .map(|t| t.elapsed)
        .sum::<Duration>()
        .as_millis()
}

fn describe(path: &str, outcome: &Result<PipelineResult, PipelineError>) {
    match outcome {
        Ok(result) => {
            println!("{path}:");
            println!("    候选对象: {}", result.candidates);
            println!("    幸存对象: {}", result.kept);
            println!("    剔除: {:?}", result.rejected);
            println!("    总耗时: {} ms", total_ms(&result.timings));
            for t in &result.timings {
                println!("        {}: {} us", t.stage, t.elapsed.as_micros());
            }
            for w in &result.warnings {
                println!("    警告: {w}");
            }
        }
        Err(e) => println!("{path}: 失败: {e}"),
    }
}

fn main() {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Debug)
        .init()
        .unwrap();

    let mut args = std::env::args().skip(1);
    let Some(channels) = args.next().and_then(|s| s.parse::<usize>().ok()) else {
        usage();
    };
    let files: Vec<String> = args.collect();
    if files.is_empty() {
        usage();
    }

    let config = PipelineConfig {
        channels,
        ..Default::default()
    };

    println!("在 {} 个工作线程上处理 {} 个文件...", cpus(), files.len());
    let pool = threadpool::ThreadPool::new(cpus());
    let (tx, rx) = mpsc::channel();
    for path in files {
        let (config, tx) = (config.clone(), tx.clone());
        pool.execute(move || {
            let outcome = run(&path, &config);
            tx.send((path, outcome)).unwrap();
        });
    }
    drop(tx);

    sep();
    let mut failures = 0usize;
    for (path, outcome) in rx.iter() {
        describe(&path, &outcome);
        sep();
        failures += usize::from(outcome.is_err());
    }
    pool.join();

    if failures > 0 {
        std::process::exit(1);
    }
}
