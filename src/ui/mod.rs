//! 交互层入口。
//!
//! 只有命令行一种形态：打印资源列表、清单拉取结果与下载汇总。

pub mod noui;
