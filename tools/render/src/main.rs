//! 批量渲染入口.
//!
//! 用法: `syn-render <config.json> [synapses.json]`.
//!
//! 不给出突触表时, 从 `label.npy` 中发现实例; 否则按表中坐标生成实例.

mod report;
mod runner;

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use log::error;

fn main() -> ExitCode {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .env()
        .init()
        .ok();

    let mut args = env::args_os().skip(1).map(PathBuf::from);
    let Some(config) = args.next() else {
        eprintln!("usage: syn-render <config.json> [synapses.json]");
        return ExitCode::from(2);
    };
    let table = args.next();

    match runner::run(&config, table.as_deref()) {
        Ok(result) => {
            result.analyze();
            if result.all_dropped() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
