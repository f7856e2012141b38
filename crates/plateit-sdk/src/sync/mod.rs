//! 本地优先同步
//!
//! 职责：
//! - 缓存优先读取（PersistedStore）
//! - 按集合节流的被动刷新（SyncMetadata）
//! - 整表替换写入，(用户, 集合) 单飞

pub mod collection;
pub mod coordinator;
pub mod gateway;
pub mod metadata_store;
pub mod single_flight;

#[cfg(test)]
pub(crate) mod testing;

pub use collection::{Collection, CollectionRows};
pub use coordinator::{
    LoadOutcome, RefreshDecision, RefreshHandle, RefreshOutcome, RefreshReason, SyncCoordinator,
};
pub use gateway::{GatewayResult, RemoteGateway};
pub use metadata_store::SyncMetadataStore;
pub use single_flight::{FlightHandle, SingleFlight};

/// 每个 (用户, 集合) 的同步状态机
///
/// `Uninitialized → CacheLoading → {CacheEmpty, CacheHitDisplayed} → (Idle | Refreshing)
///  → (RefreshSucceeded → CacheHitDisplayed | RefreshFailed → CacheHitDisplayed)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Uninitialized,
    /// 正在读本地缓存
    CacheLoading,
    /// 缓存为空，视图无内容
    CacheEmpty,
    /// 缓存已交给视图展示
    CacheHitDisplayed,
    /// 节流窗口内，不刷新
    Idle,
    /// 远端刷新进行中
    Refreshing,
    /// 刷新成功（缓存已替换，随后回到展示态）
    RefreshSucceeded,
    /// 刷新失败（缓存不变，随后回到展示态）
    RefreshFailed,
}
