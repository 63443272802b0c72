/// One-shot, multi-waiter signal used for cooperative cancellation.
///
/// CPU-bound map loops poll `is_set`; async tasks `wait().await`. The scoped
/// guard guarantees the signal fires on any exit path so that everything
/// blocked on it terminates.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Clone, Default)]
pub struct SafeEvent {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    set: AtomicBool,
    notify: Notify,
}

impl SafeEvent {
    pub fn new() -> SafeEvent {
        SafeEvent::default()
    }

    pub fn set(&self) {
        self.inner.set.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_set(&self) -> bool {
        self.inner.set.load(Ordering::SeqCst)
    }

    pub async fn wait(&self) {
        loop {
            if self.is_set() {
                return;
            }
            let notified = self.inner.notify.notified();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }

    /// Guard that sets the signal when dropped, whatever the exit path.
    pub fn set_on_drop(&self) -> SetOnDrop {
        SetOnDrop {
            event: self.clone(),
        }
    }

    /// Runs `cb` once if the signal fires before the returned guard is
    /// dropped. Used to wire client cancellation into a running job.
    pub fn call_on_set(&self, cb: impl FnOnce() + Send + 'static) -> WatchGuard {
        let stop = SafeEvent::new();
        let event = self.clone();
        let stop_clone = stop.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = event.wait() => cb(),
                _ = stop_clone.wait() => {}
            }
        });
        WatchGuard {
            stop,
            _handle: handle,
        }
    }
}

pub struct SetOnDrop {
    event: SafeEvent,
}

impl Drop for SetOnDrop {
    fn drop(&mut self) {
        self.event.set();
    }
}

pub struct WatchGuard {
    stop: SafeEvent,
    _handle: tokio::task::JoinHandle<()>,
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        self.stop.set();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn set_wakes_all_waiters() {
        let ev = SafeEvent::new();
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let ev = ev.clone();
                tokio::spawn(async move { ev.wait().await })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(10)).await;
        ev.set();
        for w in waiters {
            tokio::time::timeout(Duration::from_secs(1), w)
                .await
                .unwrap()
                .unwrap();
        }
    }

    #[tokio::test]
    async fn wait_after_set_returns_immediately() {
        let ev = SafeEvent::new();
        ev.set();
        tokio::time::timeout(Duration::from_millis(100), ev.wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn guard_sets_on_drop() {
        let ev = SafeEvent::new();
        {
            let _guard = ev.set_on_drop();
            assert!(!ev.is_set());
        }
        assert!(ev.is_set());
    }

    #[tokio::test]
    async fn callback_fires_once_inside_scope() {
        let ev = SafeEvent::new();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let guard = ev.call_on_set(move || flag.store(true, Ordering::SeqCst));
        ev.set();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(fired.load(Ordering::SeqCst));
        drop(guard);
    }

    #[tokio::test]
    async fn callback_does_not_fire_after_scope_exit() {
        let ev = SafeEvent::new();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        {
            let _guard = ev.call_on_set(move || flag.store(true, Ordering::SeqCst));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        ev.set();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }
}
