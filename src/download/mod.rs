//! 下载流程模块入口。
//!
//! 子模块：
//! - `models`：下载状态、单个结果与整批汇总
//! - `progress`：进度文本与 CLI 进度条
//! - `engine`：单个资源的下载状态机

pub mod engine;
pub mod models;
pub mod progress;
