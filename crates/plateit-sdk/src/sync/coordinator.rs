//! 同步协调器 - 缓存优先读取 + 节流刷新 + 整表替换
//!
//! 一次 `load` 的顺序固定：先读缓存（立即可渲染），再根据同步元数据决定是否刷新。
//! 刷新按 (用户, 集合) 单飞：进行中的刷新被加入而不是重复发起，避免旧响应覆盖新响应。
//!
//! 被动刷新失败只记日志并发事件，缓存与元数据保持不变。

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::events::{EventManager, SDKEvent};
use crate::storage::PersistedStore;
use crate::utils::time::Clock;

use super::gateway::RemoteGateway;
use super::metadata_store::SyncMetadataStore;
use super::single_flight::{FlightHandle, SingleFlight};
use super::{Collection, CollectionRows, SyncState};

/// 为什么发起刷新
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshReason {
    /// 调用方强制刷新
    Forced,
    /// 本地缓存为空
    CacheEmpty,
    /// 从未成功拉取过
    NeverFetched,
    /// 超过节流阈值
    Stale { elapsed_ms: i64 },
}

/// 节流决策
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshDecision {
    /// 不刷新（在节流窗口内，属于正常的请求抑制）
    Skip { elapsed_ms: i64 },
    Refresh(RefreshReason),
}

impl RefreshDecision {
    /// 节流决策：强制 / 缓存为空 / 无元数据 / 超过阈值 时刷新
    pub fn decide(
        force_refresh: bool,
        cache_empty: bool,
        last_fetch: Option<i64>,
        now: i64,
        threshold_ms: i64,
    ) -> Self {
        if force_refresh {
            return RefreshDecision::Refresh(RefreshReason::Forced);
        }
        if cache_empty {
            return RefreshDecision::Refresh(RefreshReason::CacheEmpty);
        }
        let Some(last) = last_fetch else {
            return RefreshDecision::Refresh(RefreshReason::NeverFetched);
        };
        // 时钟回拨时视为刚拉取过
        let elapsed_ms = (now - last).max(0);
        if elapsed_ms > threshold_ms {
            RefreshDecision::Refresh(RefreshReason::Stale { elapsed_ms })
        } else {
            RefreshDecision::Skip { elapsed_ms }
        }
    }

    pub fn should_refresh(&self) -> bool {
        matches!(self, RefreshDecision::Refresh(_))
    }
}

/// 一次刷新的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// 缓存已整表替换
    Refreshed { count: usize, fetched_at: i64 },
    /// 远端失败，缓存与元数据未动
    Failed { reason: String, transient: bool },
    /// 写缓存失败，旧缓存保留，元数据未动
    StorageFailed { reason: String },
    /// 会话已取消（登出），未写入任何数据
    Cancelled,
}

impl RefreshOutcome {
    pub fn is_refreshed(&self) -> bool {
        matches!(self, RefreshOutcome::Refreshed { .. })
    }
}

/// 进行中刷新的句柄
#[derive(Clone)]
pub struct RefreshHandle {
    inner: FlightHandle<RefreshOutcome>,
}

impl RefreshHandle {
    /// 是否加入了已有的刷新
    pub fn joined(&self) -> bool {
        self.inner.joined
    }

    pub async fn wait(self) -> RefreshOutcome {
        self.inner.wait().await
    }

    /// 等待结果，视图销毁（token 取消）时提前返回 None
    ///
    /// 只放弃本视图的等待，刷新本身继续进行，其他加入者不受影响。
    pub async fn wait_or_cancel(self, view_token: &CancellationToken) -> Option<RefreshOutcome> {
        tokio::select! {
            _ = view_token.cancelled() => None,
            outcome = self.inner.wait() => Some(outcome),
        }
    }
}

impl std::fmt::Debug for RefreshHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshHandle")
            .field("joined", &self.inner.joined)
            .finish()
    }
}

/// `load` 的结果：缓存行立即可用，刷新（如有）在后台进行
#[derive(Debug)]
pub struct LoadOutcome {
    pub collection: Collection,
    pub cached: CollectionRows,
    pub decision: RefreshDecision,
    pub refresh: Option<RefreshHandle>,
}

impl LoadOutcome {
    /// 等待刷新完成（若有）
    pub async fn refreshed(self) -> Option<RefreshOutcome> {
        match self.refresh {
            Some(handle) => Some(handle.wait().await),
            None => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CollectionStatus {
    state: SyncState,
    /// 视图当前可见的行数
    displayed: usize,
}

struct CoordinatorInner {
    user_id: String,
    config: SyncConfig,
    store: Arc<dyn PersistedStore>,
    metadata: SyncMetadataStore,
    gateway: Arc<dyn RemoteGateway>,
    clock: Arc<dyn Clock>,
    events: Arc<EventManager>,
    status: RwLock<HashMap<Collection, CollectionStatus>>,
    session: CancellationToken,
}

/// 同步协调器（每个登录用户一个）
#[derive(Clone)]
pub struct SyncCoordinator {
    inner: Arc<CoordinatorInner>,
    flights: Arc<SingleFlight<(String, Collection), RefreshOutcome>>,
}

impl SyncCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user_id: impl Into<String>,
        config: SyncConfig,
        store: Arc<dyn PersistedStore>,
        metadata: SyncMetadataStore,
        gateway: Arc<dyn RemoteGateway>,
        clock: Arc<dyn Clock>,
        events: Arc<EventManager>,
        session: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                user_id: user_id.into(),
                config,
                store,
                metadata,
                gateway,
                clock,
                events,
                status: RwLock::new(HashMap::new()),
                session,
            }),
            flights: Arc::new(SingleFlight::new()),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.inner.user_id
    }

    /// 当前状态机状态
    pub fn state(&self, collection: Collection) -> SyncState {
        self.inner.state(collection)
    }

    /// 是否有进行中的刷新
    pub fn is_refreshing(&self, collection: Collection) -> bool {
        self.flights
            .is_inflight(&(self.inner.user_id.clone(), collection))
    }

    /// 最后一次成功拉取时间
    pub async fn last_fetch(&self, collection: Collection) -> Option<i64> {
        self.inner.last_fetch(collection).await
    }

    /// 缓存优先加载
    ///
    /// 1. 读缓存并立即通知视图（非空时）
    /// 2. 依据节流策略决定是否刷新
    /// 3. 需要刷新时发起（或加入）后台刷新，句柄随结果返回
    pub async fn load(&self, collection: Collection, force_refresh: bool) -> LoadOutcome {
        let inner = &self.inner;
        // 加入进行中的刷新时只更新可见行数，状态由刷新任务推进
        let inflight = self.is_refreshing(collection);
        if !inflight {
            inner.set_state(collection, SyncState::CacheLoading).await;
        }

        let cached = match inner.store.get_all(collection).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("⚠️ 读取 {} 缓存失败，按无缓存处理: {}", collection, e);
                CollectionRows::empty(collection)
            }
        };

        let display_state = if cached.is_empty() {
            SyncState::CacheEmpty
        } else {
            SyncState::CacheHitDisplayed
        };
        inner.set_display(collection, cached.len(), (!inflight).then_some(display_state)).await;
        if !cached.is_empty() {
            inner
                .events
                .emit(SDKEvent::CacheLoaded {
                    collection,
                    count: cached.len(),
                    timestamp: inner.clock.now_millis(),
                })
                .await;
        }

        let last_fetch = inner.last_fetch(collection).await;
        let threshold_ms = inner.config.staleness(collection).as_millis() as i64;
        let decision = RefreshDecision::decide(
            force_refresh,
            cached.is_empty(),
            last_fetch,
            inner.clock.now_millis(),
            threshold_ms,
        );

        let refresh = match decision {
            RefreshDecision::Skip { elapsed_ms } => {
                debug!(
                    "{} 在节流窗口内（{}ms <= {}ms），跳过刷新",
                    collection, elapsed_ms, threshold_ms
                );
                if !self.is_refreshing(collection) {
                    inner.set_state(collection, SyncState::Idle).await;
                }
                None
            }
            RefreshDecision::Refresh(reason) => {
                debug!("🔄 {} 需要刷新: {:?}", collection, reason);
                Some(self.refresh(collection))
            }
        };

        LoadOutcome {
            collection,
            cached,
            decision,
            refresh,
        }
    }

    /// 发起（或加入）一次刷新，不读缓存也不看节流
    pub fn refresh(&self, collection: Collection) -> RefreshHandle {
        let key = (self.inner.user_id.clone(), collection);
        let inner = self.inner.clone();
        let handle = self.flights.run(
            key,
            move || async move { inner.run_refresh(collection).await },
            || RefreshOutcome::Failed {
                reason: "刷新任务异常退出".to_string(),
                transient: true,
            },
        );

        if handle.joined {
            debug!("{} 已有进行中的刷新，加入等待", collection);
        }

        RefreshHandle { inner: handle }
    }
}

impl CoordinatorInner {
    fn state(&self, collection: Collection) -> SyncState {
        self.status
            .read()
            .get(&collection)
            .map(|s| s.state)
            .unwrap_or(SyncState::Uninitialized)
    }

    fn displayed(&self, collection: Collection) -> usize {
        self.status
            .read()
            .get(&collection)
            .map(|s| s.displayed)
            .unwrap_or(0)
    }

    async fn set_state(&self, collection: Collection, state: SyncState) {
        {
            let mut status = self.status.write();
            let entry = status.entry(collection).or_insert(CollectionStatus {
                state: SyncState::Uninitialized,
                displayed: 0,
            });
            if entry.state == state {
                return;
            }
            entry.state = state;
        }
        self.events
            .emit(SDKEvent::SyncStateChanged {
                collection,
                state,
                timestamp: self.clock.now_millis(),
            })
            .await;
    }

    async fn set_display(&self, collection: Collection, displayed: usize, state: Option<SyncState>) {
        {
            let mut status = self.status.write();
            let entry = status.entry(collection).or_insert(CollectionStatus {
                state: SyncState::Uninitialized,
                displayed: 0,
            });
            entry.displayed = displayed;
        }
        if let Some(state) = state {
            self.set_state(collection, state).await;
        }
    }

    /// 刷新结束后回到展示态
    async fn settle(&self, collection: Collection) {
        let state = if self.displayed(collection) > 0 {
            SyncState::CacheHitDisplayed
        } else {
            SyncState::CacheEmpty
        };
        self.set_state(collection, state).await;
    }

    async fn last_fetch(&self, collection: Collection) -> Option<i64> {
        match self.metadata.last_fetch(collection).await {
            Ok(ts) => ts,
            Err(e) => {
                warn!("⚠️ 读取 {} 同步元数据失败，按从未拉取处理: {}", collection, e);
                None
            }
        }
    }

    async fn fetch(&self, collection: Collection) -> Result<CollectionRows, crate::error::GatewayError> {
        match collection {
            Collection::Pantry => {
                let items = self.gateway.fetch_pantry_items(&self.user_id).await?;
                let fetched_at = self.clock.now_millis();
                let mut rows: Vec<_> = items
                    .into_iter()
                    .map(|item| item.into_cached(fetched_at))
                    .collect();
                rows.sort_by(|a, b| b.added_at.cmp(&a.added_at));
                Ok(CollectionRows::Pantry(rows))
            }
            Collection::Recommendations => self
                .gateway
                .fetch_recommendations(&self.user_id)
                .await
                .map(CollectionRows::Recommendations),
        }
    }

    async fn run_refresh(&self, collection: Collection) -> RefreshOutcome {
        if self.session.is_cancelled() {
            return RefreshOutcome::Cancelled;
        }
        self.set_state(collection, SyncState::Refreshing).await;

        let fetched = tokio::select! {
            _ = self.session.cancelled() => {
                info!("🛑 {} 刷新已取消（会话结束）", collection);
                return RefreshOutcome::Cancelled;
            }
            result = self.fetch(collection) => result,
        };

        let rows = match fetched {
            Ok(rows) => rows,
            Err(e) => {
                warn!("⚠️ {} 远端拉取失败，保留现有缓存: {}", collection, e);
                self.set_state(collection, SyncState::RefreshFailed).await;
                self.events
                    .emit(SDKEvent::RefreshFailed {
                        collection,
                        reason: e.to_string(),
                        timestamp: self.clock.now_millis(),
                    })
                    .await;
                self.settle(collection).await;
                return RefreshOutcome::Failed {
                    reason: e.to_string(),
                    transient: e.is_transient(),
                };
            }
        };

        // 登出后不再写入
        if self.session.is_cancelled() {
            return RefreshOutcome::Cancelled;
        }

        let count = rows.len();
        if let Err(e) = self.store.replace_all(rows).await {
            warn!("⚠️ {} 写入缓存失败，旧缓存保留: {}", collection, e);
            self.set_state(collection, SyncState::RefreshFailed).await;
            self.events
                .emit(SDKEvent::RefreshFailed {
                    collection,
                    reason: e.to_string(),
                    timestamp: self.clock.now_millis(),
                })
                .await;
            self.settle(collection).await;
            return RefreshOutcome::StorageFailed {
                reason: e.to_string(),
            };
        }

        let fetched_at = self.clock.now_millis();
        if let Err(e) = self.metadata.advance(collection, fetched_at).await {
            // 缓存已是新数据，元数据未推进只会导致下次多拉一次
            warn!("⚠️ {} 更新同步元数据失败: {}", collection, e);
        }

        info!("✅ {} 刷新完成: {} 条", collection, count);
        {
            let mut status = self.status.write();
            if let Some(entry) = status.get_mut(&collection) {
                entry.displayed = count;
            }
        }
        self.set_state(collection, SyncState::RefreshSucceeded).await;
        self.events
            .emit(SDKEvent::CollectionRefreshed {
                collection,
                count,
                timestamp: fetched_at,
            })
            .await;
        self.settle(collection).await;

        RefreshOutcome::Refreshed { count, fetched_at }
    }
}
