use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::ffi::{c_int, c_void};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// 协作式停止令牌
///
/// 解封装线程、视频/音频解码线程共享同一个令牌。`cancel()` 之后：
/// - `is_cancelled()` 永远返回 true（单调，不可复位）
/// - 所有阻塞在 `waiter()` 上的 select 立即被唤醒
/// - FFmpeg 的 I/O 中断回调返回 1，打断阻塞中的读包
#[derive(Clone)]
pub struct StopToken {
    inner: Arc<StopInner>,
}

struct StopInner {
    stopped: AtomicBool,
    // 持有唯一的发送端，cancel 时 drop 掉，接收端随即断开
    trigger: Mutex<Option<Sender<()>>>,
    waiter: Receiver<()>,
}

impl StopToken {
    pub fn new() -> Self {
        let (trigger, waiter) = bounded(0);
        Self {
            inner: Arc::new(StopInner {
                stopped: AtomicBool::new(false),
                trigger: Mutex::new(Some(trigger)),
                waiter,
            }),
        }
    }

    /// 设置停止标志并唤醒所有等待者，重复调用无副作用
    pub fn cancel(&self) {
        self.inner.stopped.store(true, Ordering::Release);
        self.inner.trigger.lock().take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// 用于 `crossbeam_channel::select!` 的停止信号，取消后该接收端立即就绪（断开）
    pub fn waiter(&self) -> &Receiver<()> {
        &self.inner.waiter
    }

    /// 交给 `AVIOInterruptCB.opaque` 的指针，令牌（任一克隆）存活期间有效
    pub(crate) fn interrupt_opaque(&self) -> *mut c_void {
        &self.inner.stopped as *const AtomicBool as *mut c_void
    }
}

impl Default for StopToken {
    fn default() -> Self {
        Self::new()
    }
}

/// FFmpeg I/O 中断回调：返回非 0 表示中止阻塞中的读操作
pub(crate) unsafe extern "C" fn interrupt_blocking_io(opaque: *mut c_void) -> c_int {
    if opaque.is_null() {
        return 0;
    }
    let stopped = &*(opaque as *const AtomicBool);
    stopped.load(Ordering::Acquire) as c_int
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::select;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_cancel_is_monotonic_and_shared() {
        let token = StopToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());

        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_waiter_wakes_blocked_select() {
        let token = StopToken::new();
        let (_tx, rx) = bounded::<u32>(1);

        let waiting = token.clone();
        let handle = thread::spawn(move || {
            select! {
                recv(rx) -> _ => false,
                recv(waiting.waiter()) -> _ => true,
            }
        });

        thread::sleep(Duration::from_millis(20));
        token.cancel();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_interrupt_callback_follows_flag() {
        let token = StopToken::new();
        let opaque = token.interrupt_opaque();
        assert_eq!(unsafe { interrupt_blocking_io(opaque) }, 0);
        token.cancel();
        assert_eq!(unsafe { interrupt_blocking_io(opaque) }, 1);
        assert_eq!(unsafe { interrupt_blocking_io(std::ptr::null_mut()) }, 0);
    }
}
