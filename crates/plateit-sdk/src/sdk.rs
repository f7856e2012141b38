//! SDK 主接口
//!
//! 采用分层架构：
//! - 业务逻辑层：PlateitSDK（当前类）+ 每个登录用户一个 UserSession
//! - 存储管理层：StorageManager（DB Actor + 每用户 KV）
//! - 同步层：SyncCoordinator
//! - 账本层：TokenLedger / EntitlementGate
//! - 事件系统层：EventManager

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PlateitConfig;
use crate::error::{PlateitSDKError, Result};
use crate::events::{EventManager, SDKEvent};
use crate::ledger::{EntitlementGate, PurchaseProvider, TokenLedger};
use crate::lifecycle::{LedgerReconcileHook, LifecycleManager};
use crate::pantry::PantryManager;
use crate::storage::{StorageManager, UserStorage};
use crate::sync::{Collection, LoadOutcome, RemoteGateway, SyncCoordinator, SyncMetadataStore};
use crate::utils::time::{Clock, SystemClock};

/// 登录用户的会话：持有该用户的同步、账本与食材库
pub struct UserSession {
    uid: String,
    storage: UserStorage,
    coordinator: SyncCoordinator,
    ledger: TokenLedger,
    gate: EntitlementGate,
    pantry: PantryManager,
    /// 登出时取消，进行中的刷新与权益校验不再写入
    cancel: CancellationToken,
}

impl std::fmt::Debug for UserSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserSession")
            .field("uid", &self.uid)
            .field("storage", &self.storage)
            .field("active", &self.is_active())
            .finish()
    }
}

impl UserSession {
    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn coordinator(&self) -> &SyncCoordinator {
        &self.coordinator
    }

    pub fn ledger(&self) -> &TokenLedger {
        &self.ledger
    }

    pub fn gate(&self) -> &EntitlementGate {
        &self.gate
    }

    pub fn pantry(&self) -> &PantryManager {
        &self.pantry
    }

    /// 会话级取消令牌
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// 缓存优先加载某个集合
    pub async fn load(&self, collection: Collection, force_refresh: bool) -> Result<LoadOutcome> {
        if !self.is_active() {
            return Err(PlateitSDKError::Cancelled(format!("会话已结束: {}", self.uid)));
        }
        Ok(self.coordinator.load(collection, force_refresh).await)
    }
}

/// SDK 主接口
pub struct PlateitSDK {
    config: PlateitConfig,
    storage: Arc<StorageManager>,
    event_manager: Arc<EventManager>,
    lifecycle_manager: Arc<LifecycleManager>,
    gateway: Arc<dyn RemoteGateway>,
    provider: Arc<dyn PurchaseProvider>,
    clock: Arc<dyn Clock>,
    session: RwLock<Option<Arc<UserSession>>>,
    shutting_down: AtomicBool,
}

impl std::fmt::Debug for PlateitSDK {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlateitSDK")
            .field("data_dir", &self.config.data_dir)
            .field("shutting_down", &self.shutting_down.load(Ordering::SeqCst))
            .finish()
    }
}

impl PlateitSDK {
    /// 初始化 SDK
    pub async fn initialize(
        config: PlateitConfig,
        gateway: Arc<dyn RemoteGateway>,
        provider: Arc<dyn PurchaseProvider>,
    ) -> Result<Arc<Self>> {
        Self::initialize_with_clock(config, gateway, provider, Arc::new(SystemClock)).await
    }

    /// 使用指定时钟初始化（测试中推进时间）
    pub async fn initialize_with_clock(
        config: PlateitConfig,
        gateway: Arc<dyn RemoteGateway>,
        provider: Arc<dyn PurchaseProvider>,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        if config.debug_mode {
            crate::init_tracing();
        }
        info!("正在初始化 PlateitSDK: {}", crate::version::version_line());

        // === 第1层：存储管理器 ===
        let storage = Arc::new(StorageManager::new(&config.data_dir).await?);

        // === 第2层：事件管理器 ===
        let event_manager = Arc::new(EventManager::new(config.event_config.buffer_size));

        // === 第3层：生命周期管理器（Hook 随登录注册）===
        let lifecycle_manager = Arc::new(LifecycleManager::new());

        info!("✅ PlateitSDK 初始化完成: {}", config.data_dir.display());
        Ok(Arc::new(Self {
            config,
            storage,
            event_manager,
            lifecycle_manager,
            gateway,
            provider,
            clock,
            session: RwLock::new(None),
            shutting_down: AtomicBool::new(false),
        }))
    }

    pub fn config(&self) -> &PlateitConfig {
        &self.config
    }

    pub fn events(&self) -> Arc<EventManager> {
        self.event_manager.clone()
    }

    /// 订阅全部 SDK 事件
    pub fn subscribe_events(&self) -> broadcast::Receiver<SDKEvent> {
        self.event_manager.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_shutting_down() {
            return Err(PlateitSDKError::ShuttingDown("SDK 正在关闭".to_string()));
        }
        Ok(())
    }

    /// 登录：打开用户存储并构建会话（同一用户重复登录返回现有会话）
    ///
    /// 已有其他用户登录时先将其登出。
    pub async fn login(&self, uid: &str) -> Result<Arc<UserSession>> {
        self.ensure_running()?;
        let mut slot = self.session.write().await;

        if let Some(existing) = slot.as_ref() {
            if existing.uid == uid {
                debug!("用户已登录: {}", uid);
                return Ok(existing.clone());
            }
        }
        if let Some(previous) = slot.take() {
            info!("切换用户，先登出: {} -> {}", previous.uid, uid);
            self.teardown(&previous).await?;
        }

        let storage = self.storage.init_user(uid).await?;
        let cancel = CancellationToken::new();

        let coordinator = SyncCoordinator::new(
            uid,
            self.config.sync_config.clone(),
            storage.cache.clone(),
            SyncMetadataStore::new(storage.kv.clone()),
            self.gateway.clone(),
            self.clock.clone(),
            self.event_manager.clone(),
            cancel.clone(),
        );
        let ledger = TokenLedger::new(
            storage.kv.clone(),
            self.config.ledger_config.clone(),
            self.clock.clone(),
            self.provider.clone(),
            self.event_manager.clone(),
            cancel.clone(),
        );
        let gate = EntitlementGate::new(ledger.clone());
        let pantry = PantryManager::new(
            uid,
            storage.cache.clone(),
            self.gateway.clone(),
            coordinator.clone(),
            self.clock.clone(),
        );

        self.lifecycle_manager
            .register_hook(Arc::new(LedgerReconcileHook::new(ledger.clone())));

        let session = Arc::new(UserSession {
            uid: uid.to_string(),
            storage,
            coordinator,
            ledger,
            gate,
            pantry,
            cancel,
        });
        *slot = Some(session.clone());

        info!("✅ 用户已登录: {}", uid);
        Ok(session)
    }

    /// 当前会话
    pub async fn session(&self) -> Result<Arc<UserSession>> {
        self.session
            .read()
            .await
            .clone()
            .ok_or(PlateitSDKError::NotLoggedIn)
    }

    pub async fn current_uid(&self) -> Option<String> {
        self.session.read().await.as_ref().map(|s| s.uid.clone())
    }

    /// 登出：取消会话任务，清空该用户的全部本地数据
    pub async fn logout(&self) -> Result<()> {
        let previous = self.session.write().await.take();
        match previous {
            Some(session) => self.teardown(&session).await,
            None => {
                debug!("没有已登录的用户，忽略登出");
                Ok(())
            }
        }
    }

    async fn teardown(&self, session: &UserSession) -> Result<()> {
        // 先取消，保证进行中的刷新不会在清理之后写入
        session.cancel.cancel();
        self.lifecycle_manager.clear_hooks();
        self.storage.cleanup_user(&session.uid).await?;
        info!("👋 用户已登出: {}", session.uid);
        Ok(())
    }

    /// 关闭 SDK：登出当前用户并停止 DB Actor
    pub async fn shutdown(&self) -> Result<()> {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            debug!("PlateitSDK 已在关闭中");
            return Ok(());
        }
        info!("正在关闭 PlateitSDK...");

        if let Err(e) = self.logout().await {
            warn!("⚠️ 关闭时登出失败: {}", e);
        }
        self.storage.shutdown();

        info!("PlateitSDK 关闭完成");
        Ok(())
    }

    /// App 回到前台
    pub async fn on_app_foreground(&self) -> Result<()> {
        self.ensure_running()?;
        self.lifecycle_manager.notify_foreground().await
    }

    /// App 切到后台
    pub async fn on_app_background(&self) -> Result<()> {
        self.ensure_running()?;
        self.lifecycle_manager.notify_background().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::testing::{FakeProvider, START};
    use crate::storage::entities::NewPantryItem;
    use crate::sync::testing::FakeGateway;
    use crate::sync::RefreshOutcome;
    use crate::utils::time::ManualClock;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    struct Fixture {
        _dir: TempDir,
        sdk: Arc<PlateitSDK>,
        gateway: Arc<FakeGateway>,
        clock: Arc<ManualClock>,
    }

    impl Fixture {
        async fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let config = PlateitConfig::builder().data_dir(dir.path()).build();
            let gateway = Arc::new(FakeGateway::default());
            let clock = ManualClock::new(START);
            let sdk = PlateitSDK::initialize_with_clock(
                config,
                gateway.clone(),
                FakeProvider::free(),
                clock.clone(),
            )
            .await
            .unwrap();
            Self {
                _dir: dir,
                sdk,
                gateway,
                clock,
            }
        }
    }

    #[tokio::test]
    async fn initialize_rejects_invalid_config() {
        let dir = TempDir::new().unwrap();
        let config = PlateitConfig::builder()
            .data_dir(dir.path())
            .reset_period(Duration::ZERO)
            .build();
        let result = PlateitSDK::initialize(
            config,
            Arc::new(FakeGateway::default()),
            FakeProvider::free(),
        )
        .await;
        assert!(matches!(result, Err(PlateitSDKError::Config(_))));
    }

    #[tokio::test]
    async fn login_builds_session() {
        let fx = Fixture::new().await;
        assert!(matches!(
            fx.sdk.session().await,
            Err(PlateitSDKError::NotLoggedIn)
        ));

        let session = fx.sdk.login("alice").await.unwrap();
        assert_eq!(session.uid(), "alice");
        assert!(Arc::ptr_eq(&session, &fx.sdk.login("alice").await.unwrap()));
        assert_eq!(session.ledger().get_balance().await.unwrap(), 10);

        let outcome = session.load(Collection::Pantry, false).await.unwrap();
        assert!(outcome.cached.is_empty());
        assert!(outcome.refreshed().await.unwrap().is_refreshed());
        assert_eq!(fx.gateway.calls(Collection::Pantry), 1);

        fx.sdk.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn logout_clears_user_state() {
        let fx = Fixture::new().await;
        let session = fx.sdk.login("bob").await.unwrap();
        session.ledger().debit(4).await.unwrap();
        session
            .pantry()
            .add_item(NewPantryItem::new("garlic", "3 cloves"))
            .await
            .unwrap()
            .refresh
            .await
            .unwrap();
        assert!(session
            .coordinator()
            .last_fetch(Collection::Pantry)
            .await
            .is_some());

        fx.sdk.logout().await.unwrap();
        assert!(!session.is_active());
        assert!(fx.sdk.current_uid().await.is_none());
        fx.gateway.pantry.lock().clear();
        drop(session);

        let session = fx.sdk.login("bob").await.unwrap();
        assert_eq!(session.ledger().get_balance().await.unwrap(), 10);
        assert!(session
            .coordinator()
            .last_fetch(Collection::Pantry)
            .await
            .is_none());
        let outcome = session.load(Collection::Pantry, false).await.unwrap();
        assert!(outcome.cached.is_empty());

        fx.sdk.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn logout_cancels_inflight_refresh() {
        let fx = Fixture::new().await;
        let gate = Arc::new(Notify::new());
        *fx.gateway.gate.lock() = Some(gate.clone());
        fx.gateway
            .pantry
            .lock()
            .push(crate::storage::entities::RemotePantryItem {
                id: 1,
                name: "cumin".into(),
                amount: "1 jar".into(),
                image_url: None,
                created_at: None,
            });

        let session = fx.sdk.login("carol").await.unwrap();
        let handle = session.coordinator().refresh(Collection::Pantry);
        tokio::task::yield_now().await;

        fx.sdk.logout().await.unwrap();
        assert_eq!(handle.wait().await, RefreshOutcome::Cancelled);
        gate.notify_waiters();
        assert!(matches!(
            session.load(Collection::Pantry, false).await,
            Err(PlateitSDKError::Cancelled(_))
        ));

        fx.sdk.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn switching_user_logs_out_previous() {
        let fx = Fixture::new().await;
        let first = fx.sdk.login("dave").await.unwrap();
        let second = fx.sdk.login("erin").await.unwrap();
        assert!(!first.is_active());
        assert!(second.is_active());
        assert_eq!(fx.sdk.current_uid().await.as_deref(), Some("erin"));
        fx.sdk.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn foreground_runs_monthly_reset() {
        let fx = Fixture::new().await;
        let session = fx.sdk.login("frank").await.unwrap();
        session.ledger().debit(9).await.unwrap();

        fx.clock.advance(Duration::from_secs(31 * 24 * 60 * 60));
        fx.sdk.on_app_foreground().await.unwrap();
        fx.sdk.on_app_background().await.unwrap();

        let state = session.ledger().state().await.unwrap();
        assert_eq!(state.balance, 10);
        assert_eq!(state.last_reset_at, fx.clock.now_millis());

        fx.sdk.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_rejects_new_work() {
        let fx = Fixture::new().await;
        fx.sdk.login("grace").await.unwrap();
        fx.sdk.shutdown().await.unwrap();
        fx.sdk.shutdown().await.unwrap();

        assert!(fx.sdk.current_uid().await.is_none());
        assert!(matches!(
            fx.sdk.login("grace").await,
            Err(PlateitSDKError::ShuttingDown(_))
        ));
        assert!(fx.sdk.on_app_foreground().await.is_err());
    }
}
