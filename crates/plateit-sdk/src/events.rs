//! 事件系统 - 视图层通过订阅事件得知缓存与账本变化
//!
//! - 同步状态机变化、缓存命中、刷新成功/失败
//! - 余额变化、Pro 状态变化、付费墙路由
//! - 基于 tokio broadcast 的广播订阅 + 同步监听器

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::sync::{Collection, SyncState};

/// 余额变化原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceChangeReason {
    Debit,
    Credit,
    MonthlyReset,
    ProTopUp,
    ReservationHeld,
    ReservationReleased,
}

/// SDK 事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SDKEvent {
    /// 集合同步状态变化
    SyncStateChanged {
        collection: Collection,
        state: SyncState,
        timestamp: i64,
    },
    /// 缓存读取完成且非空，视图可立即渲染
    CacheLoaded {
        collection: Collection,
        count: usize,
        timestamp: i64,
    },
    /// 远端刷新成功，缓存已整表替换，视图应重新渲染
    CollectionRefreshed {
        collection: Collection,
        count: usize,
        timestamp: i64,
    },
    /// 被动刷新失败（缓存保持不变，不阻塞视图）
    RefreshFailed {
        collection: Collection,
        reason: String,
        timestamp: i64,
    },
    /// 余额变化
    BalanceChanged {
        old: u32,
        new: u32,
        reason: BalanceChangeReason,
        timestamp: i64,
    },
    /// Pro 状态变化
    ProStatusChanged { is_pro: bool, timestamp: i64 },
    /// 付费操作被拒，应展示付费墙
    PaywallRequired {
        action: String,
        cost: u32,
        balance: u32,
        timestamp: i64,
    },
    /// 一次性免费操作已使用
    FreeActionConsumed { action: String, timestamp: i64 },
}

impl SDKEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            SDKEvent::SyncStateChanged { .. } => "sync_state_changed",
            SDKEvent::CacheLoaded { .. } => "cache_loaded",
            SDKEvent::CollectionRefreshed { .. } => "collection_refreshed",
            SDKEvent::RefreshFailed { .. } => "refresh_failed",
            SDKEvent::BalanceChanged { .. } => "balance_changed",
            SDKEvent::ProStatusChanged { .. } => "pro_status_changed",
            SDKEvent::PaywallRequired { .. } => "paywall_required",
            SDKEvent::FreeActionConsumed { .. } => "free_action_consumed",
        }
    }

    pub fn collection(&self) -> Option<Collection> {
        match self {
            SDKEvent::SyncStateChanged { collection, .. }
            | SDKEvent::CacheLoaded { collection, .. }
            | SDKEvent::CollectionRefreshed { collection, .. }
            | SDKEvent::RefreshFailed { collection, .. } => Some(*collection),
            _ => None,
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            SDKEvent::SyncStateChanged { timestamp, .. }
            | SDKEvent::CacheLoaded { timestamp, .. }
            | SDKEvent::CollectionRefreshed { timestamp, .. }
            | SDKEvent::RefreshFailed { timestamp, .. }
            | SDKEvent::BalanceChanged { timestamp, .. }
            | SDKEvent::ProStatusChanged { timestamp, .. }
            | SDKEvent::PaywallRequired { timestamp, .. }
            | SDKEvent::FreeActionConsumed { timestamp, .. } => *timestamp,
        }
    }
}

/// 事件监听器类型
pub type EventListener = Box<dyn Fn(&SDKEvent) + Send + Sync>;

/// 事件统计信息
#[derive(Debug, Clone, Default)]
pub struct EventStats {
    pub total_events: u64,
    pub events_by_type: HashMap<String, u64>,
    pub listener_count: usize,
    pub last_event_time: Option<i64>,
}

/// 事件管理器
pub struct EventManager {
    sender: broadcast::Sender<SDKEvent>,
    /// 按事件类型注册的监听器，"*" 表示全部
    listeners: Arc<tokio::sync::RwLock<HashMap<String, Vec<EventListener>>>>,
    stats: Arc<tokio::sync::RwLock<EventStats>>,
}

impl std::fmt::Debug for EventManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventManager")
            .field("receivers", &self.sender.receiver_count())
            .finish()
    }
}

impl EventManager {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);

        Self {
            sender,
            listeners: Arc::new(tokio::sync::RwLock::new(HashMap::new())),
            stats: Arc::new(tokio::sync::RwLock::new(EventStats::default())),
        }
    }

    /// 发布事件
    pub async fn emit(&self, event: SDKEvent) {
        debug!("Emitting event: {}", event.event_type());

        {
            let mut stats = self.stats.write().await;
            stats.total_events += 1;
            *stats
                .events_by_type
                .entry(event.event_type().to_string())
                .or_insert(0) += 1;
            stats.last_event_time = Some(event.timestamp());
        }

        // 无订阅者时 send 失败属正常场景
        if let Err(e) = self.sender.send(event.clone()) {
            debug!("Failed to broadcast event (no active receivers): {}", e);
        }

        let listeners = self.listeners.read().await;
        for key in [event.event_type(), "*"] {
            if let Some(event_listeners) = listeners.get(key) {
                for listener in event_listeners {
                    listener(&event);
                }
            }
        }
    }

    /// 订阅全部事件
    pub fn subscribe(&self) -> broadcast::Receiver<SDKEvent> {
        self.sender.subscribe()
    }

    /// 添加事件监听器（event_type 为 "*" 时监听全部）
    pub async fn add_listener<F>(&self, event_type: &str, listener: F)
    where
        F: Fn(&SDKEvent) + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.write().await;
        listeners
            .entry(event_type.to_string())
            .or_insert_with(Vec::new)
            .push(Box::new(listener));

        let mut stats = self.stats.write().await;
        stats.listener_count = listeners.values().map(|v| v.len()).sum();

        info!("Added listener for event type: {}", event_type);
    }

    /// 移除某类事件的全部监听器
    pub async fn remove_listeners(&self, event_type: &str) {
        let mut listeners = self.listeners.write().await;
        listeners.remove(event_type);
        self.stats.write().await.listener_count = listeners.values().map(|v| v.len()).sum();
    }

    pub async fn get_stats(&self) -> EventStats {
        self.stats.read().await.clone()
    }
}
