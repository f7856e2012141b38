//! PlateIt SDK - 本地优先的客户端状态层
//!
//! 本 SDK 提供了：
//! - 🗄️ 本地优先缓存：食材库、推荐视频先读缓存立即渲染，再按节流策略后台刷新
//! - 🔁 单飞刷新：同一 (用户, 集合) 的并发刷新合并为一次
//! - 🪙 令牌账本：持久化余额、惰性月度重置、乐观扣费与预留确认
//! - 👑 权益闸门：本地 Pro 近似 + 购买服务商权威校验，决定付费操作放行或转付费墙
//! - ⚙️ 事件系统：视图通过订阅事件得知缓存与余额变化
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use plateit_sdk::{Collection, PaidAction, PlateitConfig, PlateitSDK, PurchaseProvider, RemoteGateway};
//!
//! async fn run(
//!     gateway: Arc<dyn RemoteGateway>,
//!     provider: Arc<dyn PurchaseProvider>,
//! ) -> plateit_sdk::Result<()> {
//!     let config = PlateitConfig::builder()
//!         .data_dir("/path/to/data")
//!         .build();
//!     let sdk = PlateitSDK::initialize(config, gateway, provider).await?;
//!
//!     let session = sdk.login("user123").await?;
//!
//!     // 缓存立即可渲染，刷新在后台进行
//!     let outcome = session.load(Collection::Pantry, false).await?;
//!     println!("缓存 {} 条", outcome.cached.len());
//!
//!     // 付费操作
//!     let decision = session.gate().authorize_action(&PaidAction::PantryScan).await?;
//!     if !decision.is_allowed() {
//!         println!("展示付费墙");
//!     }
//!
//!     sdk.logout().await?;
//!     sdk.shutdown().await?;
//!     Ok(())
//! }
//! ```

// 导出核心模块
pub mod config;
pub mod error;
pub mod events;
pub mod ledger;
pub mod lifecycle;
pub mod pantry;
pub mod sdk;
pub mod storage;
pub mod sync;
pub mod utils;
pub mod version;

// 重新导出核心类型，方便使用
pub use config::{EventConfig, LedgerConfig, PlateitConfig, PlateitConfigBuilder, SyncConfig};
pub use error::{GatewayError, PlateitSDKError, Result};
pub use events::{BalanceChangeReason, EventManager, SDKEvent};
pub use ledger::{
    EntitlementGate, EntitlementInfo, EntitlementSnapshot, GateDecision, Gated, PaidAction,
    ProviderError, PurchaseOutcome, PurchaseProvider, PurchaseResult, Reconciliation,
    Reservation, TokenLedger, TokenState,
};
pub use lifecycle::{LedgerReconcileHook, LifecycleHook, LifecycleManager};
pub use pantry::{BatchAdd, PantryManager, PantryUpdate};
pub use sdk::{PlateitSDK, UserSession};
pub use storage::entities::{NewPantryItem, PantryItem, RecommendedVideo, RemotePantryItem};
pub use sync::{
    Collection, CollectionRows, GatewayResult, LoadOutcome, RefreshDecision, RefreshHandle,
    RefreshOutcome, RefreshReason, RemoteGateway, SyncCoordinator, SyncState,
};
pub use utils::time::{Clock, ManualClock, SystemClock};

/// 初始化 tracing 输出（`debug_mode` 开启时由 SDK 调用；已有全局 subscriber 时忽略）
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .try_init();
}
