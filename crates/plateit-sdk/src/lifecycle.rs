//! SDK 生命周期管理
//!
//! 管理 App 前后台切换等一级生命周期事件，统一触发各模块的状态切换。
//! Hook 随登录注册、随登出清空。

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::Result;

/// 生命周期回调 Hook
///
/// 各模块通过实现此 trait 来响应生命周期变化
#[async_trait]
pub trait LifecycleHook: Send + Sync {
    fn name(&self) -> &'static str;

    /// App 切换到后台时调用
    async fn on_background(&self) -> Result<()>;

    /// App 切换到前台时调用
    async fn on_foreground(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
enum Transition {
    Background,
    Foreground,
}

impl Transition {
    fn label(self) -> &'static str {
        match self {
            Transition::Background => "后台",
            Transition::Foreground => "前台",
        }
    }
}

/// 生命周期管理器
#[derive(Default)]
pub struct LifecycleManager {
    hooks: RwLock<Vec<Arc<dyn LifecycleHook>>>,
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("hooks", &self.hook_count())
            .finish()
    }
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.read().len()
    }

    /// 注册生命周期回调 Hook
    pub fn register_hook(&self, hook: Arc<dyn LifecycleHook>) {
        let mut hooks = self.hooks.write();
        hooks.push(hook);
        info!("✅ 生命周期 Hook 已注册: 当前共 {} 个", hooks.len());
    }

    /// 清空全部 Hook（登出时）
    pub fn clear_hooks(&self) {
        self.hooks.write().clear();
    }

    /// 通知所有 Hook：App 切换到后台
    pub async fn notify_background(&self) -> Result<()> {
        self.notify(Transition::Background).await
    }

    /// 通知所有 Hook：App 切换到前台
    pub async fn notify_foreground(&self) -> Result<()> {
        self.notify(Transition::Foreground).await
    }

    /// 按注册顺序执行；某个 Hook 失败时记录错误并继续，最后返回第一个错误
    async fn notify(&self, transition: Transition) -> Result<()> {
        info!("🔄 通知所有模块：App 切换到{}", transition.label());
        let hooks: Vec<_> = self.hooks.read().clone();

        let mut first_error = None;
        let mut failed = 0;
        for hook in &hooks {
            let result = match transition {
                Transition::Background => hook.on_background().await,
                Transition::Foreground => hook.on_foreground().await,
            };
            if let Err(e) = result {
                warn!("⚠️ Hook {} {}切换失败: {}", hook.name(), transition.label(), e);
                failed += 1;
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => {
                warn!("⚠️ {} 个模块{}切换失败，其余模块已执行", failed, transition.label());
                Err(e)
            }
            None => {
                info!("✅ 所有模块{}切换完成", transition.label());
                Ok(())
            }
        }
    }
}

mod ledger_hook;
pub use ledger_hook::LedgerReconcileHook;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlateitSDKError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHook {
        name: &'static str,
        fail: bool,
        foreground: AtomicUsize,
        background: AtomicUsize,
    }

    impl CountingHook {
        fn new(name: &'static str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                fail,
                foreground: AtomicUsize::new(0),
                background: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl LifecycleHook for CountingHook {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn on_background(&self) -> Result<()> {
            self.background.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn on_foreground(&self) -> Result<()> {
            self.foreground.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(PlateitSDKError::Other(format!("{} failed", self.name)));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn failing_hook_does_not_stop_others() {
        let manager = LifecycleManager::new();
        let broken = CountingHook::new("broken", true);
        let healthy = CountingHook::new("healthy", false);
        manager.register_hook(broken.clone());
        manager.register_hook(healthy.clone());

        let err = manager.notify_foreground().await.unwrap_err();
        assert!(err.to_string().contains("broken"));
        assert_eq!(healthy.foreground.load(Ordering::SeqCst), 1);

        manager.notify_background().await.unwrap();
        assert_eq!(broken.background.load(Ordering::SeqCst), 1);

        manager.clear_hooks();
        assert_eq!(manager.hook_count(), 0);
        manager.notify_foreground().await.unwrap();
        assert_eq!(healthy.foreground.load(Ordering::SeqCst), 1);
    }
}
