//! 进程级中断标记。
//!
//! Ctrl+C 第一次只置位，下载循环在当前块写完后自行收尾；第二次直接退出。

use std::sync::atomic::{AtomicBool, Ordering};

static STOP_REQUESTED: AtomicBool = AtomicBool::new(false);

/// 置位中断标记，返回此前是否已经置位。
pub fn request_stop() -> bool {
    STOP_REQUESTED.swap(true, Ordering::SeqCst)
}

pub fn stop_requested() -> bool {
    STOP_REQUESTED.load(Ordering::SeqCst)
}
