//! Single-flight：同一个 key 同时只存在一个进行中的任务，后来者加入而不是重复发起
//!
//! 任务以 `tokio::spawn` 独立运行，调用方放弃等待不会中断任务；
//! 完成后由任务自己从表中移除（按 flight id 比对，避免误删后续任务）。

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type SharedOutput<T> = Shared<BoxFuture<'static, T>>;

struct Flight<T: Clone> {
    id: u64,
    future: SharedOutput<T>,
}

/// 任务结束（含 panic）时移除表项
struct FlightGuard<K: Eq + Hash, T: Clone> {
    table: Arc<Mutex<HashMap<K, Flight<T>>>>,
    key: K,
    id: u64,
}

impl<K: Eq + Hash, T: Clone> Drop for FlightGuard<K, T> {
    fn drop(&mut self) {
        let mut inflight = self.table.lock();
        if inflight.get(&self.key).map(|f| f.id) == Some(self.id) {
            inflight.remove(&self.key);
        }
    }
}

/// 按 key 去重的任务表
pub struct SingleFlight<K, T: Clone> {
    inflight: Arc<Mutex<HashMap<K, Flight<T>>>>,
    next_id: AtomicU64,
}

/// 加入（或发起）一次任务的句柄
#[derive(Clone)]
pub struct FlightHandle<T: Clone> {
    future: SharedOutput<T>,
    /// 是否加入了已存在的任务
    pub joined: bool,
}

impl<T: Clone> FlightHandle<T> {
    pub async fn wait(self) -> T {
        self.future.await
    }
}

impl<K, T> SingleFlight<K, T>
where
    K: Eq + Hash + Clone + Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// 若 key 已有进行中的任务则加入，否则用 `make` 创建并发起
    ///
    /// `on_panic` 在任务 panic 时提供结果，保证等待方总能拿到值。
    pub fn run<F, Fut>(&self, key: K, make: F, on_panic: fn() -> T) -> FlightHandle<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let mut inflight = self.inflight.lock();
        if let Some(flight) = inflight.get(&key) {
            return FlightHandle {
                future: flight.future.clone(),
                joined: true,
            };
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let table = self.inflight.clone();
        let task_key = key.clone();
        let fut = make();
        let join = tokio::spawn(async move {
            let _guard = FlightGuard {
                table,
                key: task_key,
                id,
            };
            fut.await
        });

        let future = async move { join.await.unwrap_or_else(|_| on_panic()) }
            .boxed()
            .shared();
        inflight.insert(
            key,
            Flight {
                id,
                future: future.clone(),
            },
        );

        FlightHandle {
            future,
            joined: false,
        }
    }

    pub fn is_inflight(&self, key: &K) -> bool {
        self.inflight.lock().contains_key(key)
    }
}

impl<K, T> Default for SingleFlight<K, T>
where
    K: Eq + Hash + Clone + Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn concurrent_callers_join_one_task() {
        let flights: SingleFlight<&'static str, u32> = SingleFlight::new();
        let started = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let make = |started: Arc<AtomicUsize>, gate: Arc<Notify>| {
            move || async move {
                started.fetch_add(1, Ordering::SeqCst);
                gate.notified().await;
                7
            }
        };

        let first = flights.run("pantry", make(started.clone(), gate.clone()), || 0);
        let second = flights.run("pantry", make(started.clone(), gate.clone()), || 0);
        assert!(!first.joined);
        assert!(second.joined);
        assert!(flights.is_inflight(&"pantry"));

        // 等任务开始等待后再放行
        while started.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        gate.notify_one();

        assert_eq!(first.wait().await, 7);
        assert_eq!(second.wait().await, 7);
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert!(!flights.is_inflight(&"pantry"));
    }

    #[tokio::test]
    async fn finished_flight_allows_new_one() {
        let flights: SingleFlight<u8, u32> = SingleFlight::new();
        assert_eq!(flights.run(1, || async { 1 }, || 0).wait().await, 1);
        let again = flights.run(1, || async { 2 }, || 0);
        assert!(!again.joined);
        assert_eq!(again.wait().await, 2);
    }

    #[tokio::test]
    async fn panicking_task_yields_fallback() {
        let flights: SingleFlight<u8, u32> = SingleFlight::new();
        let handle = flights.run(1, || async { panic!("boom") }, || 99);
        assert_eq!(handle.wait().await, 99);
        assert!(!flights.is_inflight(&1));
    }
}
