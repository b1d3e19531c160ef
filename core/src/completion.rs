//! 完成量
//!
//! 单槽、边沿触发的等待/通知原语。中断路径只负责 [`Completion::signal`]，
//! 请求路径在 [`Completion::wait`] 处挂起直到被唤醒。

use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;

use event_listener::{Event, Listener};

/// 单方向或会话级的完成量
pub struct Completion {
    done: AtomicBool,
    event: Event,
}

impl Completion {
    /// 创建未完成的完成量
    pub fn new() -> Self {
        Self {
            done: AtomicBool::new(false),
            event: Event::new(),
        }
    }

    /// 复位为未完成状态
    ///
    /// 必须在对应的就绪位置位之前调用。
    pub fn arm(&self) {
        self.done.store(false, Ordering::SeqCst);
    }

    /// 通知完成
    ///
    /// 一个周期内只有第一次调用有效，直到下一次 [`arm`](Self::arm)。
    /// 返回本次调用是否真正改变了状态。
    pub fn signal(&self) -> bool {
        if self.done.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.event.notify(usize::MAX);
        true
    }

    /// 是否已完成
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// 阻塞直到完成，没有超时
    pub fn wait(&self) {
        loop {
            if self.is_done() {
                return;
            }
            let listener = self.event.listen();
            // 注册监听后再检查一次，避免丢失唤醒
            if self.is_done() {
                return;
            }
            listener.wait();
        }
    }

    /// 带超时的等待，返回是否在超时前完成
    ///
    /// 截止时间无法表示时退化为无限等待。
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let Some(deadline) = std::time::Instant::now().checked_add(timeout) else {
            self.wait();
            return true;
        };
        loop {
            if self.is_done() {
                return true;
            }
            let listener = self.event.listen();
            if self.is_done() {
                return true;
            }
            if listener.wait_deadline(deadline).is_none() {
                return self.is_done();
            }
        }
    }

    /// 按可选超时等待，`None` 表示无限等待
    pub fn wait_for(&self, timeout: Option<Duration>) -> bool {
        match timeout {
            Some(t) => self.wait_timeout(t),
            None => {
                self.wait();
                true
            }
        }
    }
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for Completion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Completion")
            .field("done", &self.is_done())
            .finish()
    }
}
