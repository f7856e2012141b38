//! 食材库变更 - 本地乐观写入 + 远端确认 + 强制刷新
//!
//! 新增：先插入本地乐观行，远端失败则删除该行；成功后强制刷新，由整表替换带回服务端行。
//! 删除：先删本地行，远端失败则原样恢复。
//! 成功的变更不回退同步元数据（只前进），而是直接强制刷新。

use futures::future::join_all;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{PlateitSDKError, Result};
use crate::storage::entities::{NewPantryItem, PantryItem, RemotePantryItem};
use crate::storage::PersistedStore;
use crate::sync::{Collection, RefreshOutcome, RemoteGateway, SyncCoordinator};
use crate::utils::time::Clock;

/// 一次变更的结果，附带变更后的强制刷新
#[derive(Debug)]
pub struct PantryUpdate<T> {
    pub value: T,
    pub refresh: JoinHandle<RefreshOutcome>,
}

/// 批量新增的结果
#[derive(Debug)]
pub struct BatchAdd {
    pub added: Vec<RemotePantryItem>,
    pub failed: Vec<(NewPantryItem, PlateitSDKError)>,
    /// 至少一条成功时才会刷新
    pub refresh: Option<JoinHandle<RefreshOutcome>>,
}

/// 食材库管理器（每个登录用户一个）
#[derive(Clone)]
pub struct PantryManager {
    user_id: String,
    store: Arc<dyn PersistedStore>,
    gateway: Arc<dyn RemoteGateway>,
    coordinator: SyncCoordinator,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for PantryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PantryManager")
            .field("user_id", &self.user_id)
            .finish()
    }
}

impl PantryManager {
    pub fn new(
        user_id: impl Into<String>,
        store: Arc<dyn PersistedStore>,
        gateway: Arc<dyn RemoteGateway>,
        coordinator: SyncCoordinator,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            store,
            gateway,
            coordinator,
            clock,
        }
    }

    /// 新增一条食材
    pub async fn add_item(&self, item: NewPantryItem) -> Result<PantryUpdate<RemotePantryItem>> {
        let remote = self.add_one(item).await?;
        Ok(PantryUpdate {
            value: remote,
            refresh: self.spawn_refresh(),
        })
    }

    /// 并发新增多条，全部结束后只刷新一次
    pub async fn add_items(&self, items: Vec<NewPantryItem>) -> BatchAdd {
        let results = join_all(items.into_iter().map(|item| {
            let pending = item.clone();
            async move { (pending, self.add_one(item).await) }
        }))
        .await;

        let mut added = Vec::new();
        let mut failed = Vec::new();
        for (item, result) in results {
            match result {
                Ok(remote) => added.push(remote),
                Err(e) => failed.push((item, e)),
            }
        }

        info!(
            "📦 批量新增食材完成: 成功 {}, 失败 {}",
            added.len(),
            failed.len()
        );
        let refresh = (!added.is_empty()).then(|| self.spawn_refresh());
        BatchAdd {
            added,
            failed,
            refresh,
        }
    }

    async fn add_one(&self, item: NewPantryItem) -> Result<RemotePantryItem> {
        if item.name.trim().is_empty() {
            return Err(PlateitSDKError::InvalidArgument("食材名称不能为空".to_string()));
        }

        let local_id = self
            .store
            .insert_pantry_item(item.clone(), self.clock.now_millis())
            .await?;
        debug!("乐观插入食材: local_id={}, name={}", local_id, item.name);

        match self.gateway.add_pantry_item(&self.user_id, &item).await {
            Ok(remote) => {
                info!("✅ 食材已保存到服务端: remote_id={}, name={}", remote.id, remote.name);
                match self.store.set_pantry_remote_id(local_id, remote.id).await {
                    Ok(true) => {}
                    Ok(false) => debug!("乐观行已被刷新替换: local_id={}", local_id),
                    Err(e) => warn!(
                        "⚠️ 回写服务端 id 失败: local_id={}, remote_id={}, error={}",
                        local_id, remote.id, e
                    ),
                }
                Ok(remote)
            }
            Err(e) => {
                warn!("❌ 新增食材失败，回滚本地乐观行: local_id={}, error={}", local_id, e);
                if let Err(rollback_err) = self.store.delete_pantry_item(local_id).await {
                    warn!("⚠️ 回滚乐观行失败: local_id={}, error={}", local_id, rollback_err);
                }
                Err(e.into())
            }
        }
    }

    /// 按本地 id 删除；本地行带有服务端 id 时同步删除远端
    pub async fn delete_item(&self, local_id: i64) -> Result<PantryUpdate<PantryItem>> {
        let removed = self
            .store
            .delete_pantry_item(local_id)
            .await?
            .ok_or_else(|| PlateitSDKError::NotFound(format!("食材不存在: {}", local_id)))?;

        let Some(remote_id) = removed.remote_id else {
            // 尚未同步到服务端的乐观行
            debug!("删除未同步的本地食材: local_id={}", local_id);
            return Ok(PantryUpdate {
                value: removed,
                refresh: self.spawn_refresh(),
            });
        };

        match self.gateway.delete_pantry_item(&self.user_id, remote_id).await {
            Ok(()) => {
                info!("🗑️ 食材已删除: remote_id={}", remote_id);
                Ok(PantryUpdate {
                    value: removed,
                    refresh: self.spawn_refresh(),
                })
            }
            Err(e) => {
                warn!("❌ 远端删除失败，恢复本地行: remote_id={}, error={}", remote_id, e);
                if let Err(restore_err) = self.store.restore_pantry_item(removed).await {
                    warn!("⚠️ 恢复本地行失败: local_id={}, error={}", local_id, restore_err);
                }
                drop(self.spawn_refresh());
                Err(e.into())
            }
        }
    }

    /// 变更后的强制刷新。已有进行中的刷新可能在变更前就拉取了，等它结束后再发起一次
    fn spawn_refresh(&self) -> JoinHandle<RefreshOutcome> {
        let coordinator = self.coordinator.clone();
        tokio::spawn(async move {
            let handle = coordinator.refresh(Collection::Pantry);
            if !handle.joined() {
                return handle.wait().await;
            }
            handle.wait().await;
            coordinator.refresh(Collection::Pantry).wait().await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::error::GatewayError;
    use crate::events::EventManager;
    use crate::storage::StorageManager;
    use crate::sync::testing::FakeGateway;
    use crate::sync::SyncMetadataStore;
    use crate::utils::time::ManualClock;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    struct Fixture {
        _dir: TempDir,
        storage: StorageManager,
        store: Arc<dyn PersistedStore>,
        gateway: Arc<FakeGateway>,
        pantry: PantryManager,
    }

    impl Fixture {
        async fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let storage = StorageManager::new(dir.path()).await.unwrap();
            let user = storage.init_user("u1").await.unwrap();
            let gateway = Arc::new(FakeGateway::default());
            let clock = ManualClock::new(1_700_000_000_000);
            let coordinator = SyncCoordinator::new(
                "u1",
                SyncConfig::default(),
                user.cache.clone(),
                SyncMetadataStore::new(user.kv.clone()),
                gateway.clone(),
                clock.clone(),
                Arc::new(EventManager::new(64)),
                CancellationToken::new(),
            );
            let pantry = PantryManager::new(
                "u1",
                user.cache.clone(),
                gateway.clone(),
                coordinator,
                clock,
            );
            Self {
                _dir: dir,
                storage,
                store: user.cache,
                gateway,
                pantry,
            }
        }

        async fn rows(&self) -> Vec<PantryItem> {
            self.store
                .get_all(Collection::Pantry)
                .await
                .unwrap()
                .as_pantry()
                .map(|items| items.to_vec())
                .unwrap_or_default()
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            self.storage.shutdown();
        }
    }

    #[tokio::test]
    async fn add_item_refreshes_with_server_row() {
        let fx = Fixture::new().await;
        let update = fx
            .pantry
            .add_item(NewPantryItem::new("eggs", "12"))
            .await
            .unwrap();
        assert_eq!(update.value.name, "eggs");

        let outcome = update.refresh.await.unwrap();
        assert!(matches!(outcome, RefreshOutcome::Refreshed { count: 1, .. }));

        let rows = fx.rows().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].remote_id, Some(update.value.id));
    }

    #[tokio::test]
    async fn optimistic_row_survives_failed_refresh() {
        let fx = Fixture::new().await;
        *fx.gateway.fail.lock() = Some(GatewayError::Timeout("5s".into()));

        let update = fx
            .pantry
            .add_item(NewPantryItem::new("milk", "1L"))
            .await
            .unwrap();
        assert!(matches!(
            update.refresh.await.unwrap(),
            RefreshOutcome::Failed { .. }
        ));

        let rows = fx.rows().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "milk");
        assert_eq!(rows[0].remote_id, Some(update.value.id));
    }

    #[tokio::test]
    async fn confirmed_row_deletes_remotely_after_failed_refresh() {
        let fx = Fixture::new().await;
        *fx.gateway.fail.lock() = Some(GatewayError::Timeout("5s".into()));
        let update = fx
            .pantry
            .add_item(NewPantryItem::new("oats", "500g"))
            .await
            .unwrap();
        update.refresh.await.unwrap();
        let local = fx.rows().await.remove(0);

        *fx.gateway.fail.lock() = None;
        let deleted = fx.pantry.delete_item(local.id).await.unwrap();
        assert_eq!(deleted.value.remote_id, Some(update.value.id));
        deleted.refresh.await.unwrap();

        assert_eq!(fx.gateway.delete_calls.load(Ordering::SeqCst), 1);
        assert!(fx.gateway.pantry.lock().is_empty());
        assert!(fx.rows().await.is_empty());
    }

    #[tokio::test]
    async fn unconfirmed_row_deletes_locally_only() {
        let fx = Fixture::new().await;
        let local_id = fx
            .store
            .insert_pantry_item(NewPantryItem::new("tea", "20 bags"), 1)
            .await
            .unwrap();

        let update = fx.pantry.delete_item(local_id).await.unwrap();
        assert_eq!(update.value.remote_id, None);
        update.refresh.await.unwrap();
        assert_eq!(fx.gateway.delete_calls.load(Ordering::SeqCst), 0);
        assert!(fx.rows().await.is_empty());
    }

    #[tokio::test]
    async fn failed_add_rolls_back_local_row() {
        let fx = Fixture::new().await;
        *fx.gateway.mutation_fail.lock() = Some(GatewayError::Unavailable("offline".into()));

        let err = fx
            .pantry
            .add_item(NewPantryItem::new("rice", "2kg"))
            .await
            .unwrap_err();
        assert!(err.is_recoverable());
        assert!(fx.rows().await.is_empty());
        assert_eq!(fx.gateway.add_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fx.gateway.calls(Collection::Pantry), 0);
    }

    #[tokio::test]
    async fn rejects_blank_name() {
        let fx = Fixture::new().await;
        let err = fx
            .pantry
            .add_item(NewPantryItem::new("  ", "1"))
            .await
            .unwrap_err();
        assert!(matches!(err, PlateitSDKError::InvalidArgument(_)));
        assert_eq!(fx.gateway.add_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn batch_add_refreshes_once() {
        let fx = Fixture::new().await;
        let batch = fx
            .pantry
            .add_items(vec![
                NewPantryItem::new("salt", "1 box"),
                NewPantryItem::new("pepper", "1 jar"),
                NewPantryItem::new("", "nothing"),
            ])
            .await;

        assert_eq!(batch.added.len(), 2);
        assert_eq!(batch.failed.len(), 1);
        assert_eq!(batch.failed[0].0.amount, "nothing");

        let outcome = batch.refresh.expect("refresh").await.unwrap();
        assert!(matches!(outcome, RefreshOutcome::Refreshed { count: 2, .. }));
        assert_eq!(fx.gateway.calls(Collection::Pantry), 1);
        assert_eq!(fx.rows().await.len(), 2);
    }

    #[tokio::test]
    async fn batch_add_all_failed_skips_refresh() {
        let fx = Fixture::new().await;
        *fx.gateway.mutation_fail.lock() = Some(GatewayError::Unavailable("offline".into()));
        let batch = fx
            .pantry
            .add_items(vec![NewPantryItem::new("salt", "1 box")])
            .await;
        assert!(batch.added.is_empty());
        assert!(batch.refresh.is_none());
        assert!(fx.rows().await.is_empty());
    }

    #[tokio::test]
    async fn delete_item_removes_remotely() {
        let fx = Fixture::new().await;
        for name in ["flour", "sugar"] {
            fx.pantry
                .add_item(NewPantryItem::new(name, "1kg"))
                .await
                .unwrap()
                .refresh
                .await
                .unwrap();
        }
        let target = fx
            .rows()
            .await
            .into_iter()
            .find(|item| item.name == "flour")
            .unwrap();

        let update = fx.pantry.delete_item(target.id).await.unwrap();
        assert_eq!(update.value.name, "flour");
        update.refresh.await.unwrap();

        let rows = fx.rows().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "sugar");
        assert_eq!(fx.gateway.delete_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_delete_restores_row() {
        let fx = Fixture::new().await;
        fx.pantry
            .add_item(NewPantryItem::new("butter", "250g"))
            .await
            .unwrap()
            .refresh
            .await
            .unwrap();
        let target = fx.rows().await.remove(0);

        *fx.gateway.mutation_fail.lock() = Some(GatewayError::Timeout("5s".into()));
        let err = fx.pantry.delete_item(target.id).await.unwrap_err();
        assert!(matches!(err, PlateitSDKError::Gateway(_)));

        let rows = fx.rows().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "butter");
    }

    #[tokio::test]
    async fn delete_unknown_item_is_not_found() {
        let fx = Fixture::new().await;
        let err = fx.pantry.delete_item(42).await.unwrap_err();
        assert!(matches!(err, PlateitSDKError::NotFound(_)));
        assert_eq!(fx.gateway.delete_calls.load(Ordering::SeqCst), 0);
    }
}
