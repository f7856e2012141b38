//! 本地缓存表 - 每个同步集合一张表
//!
//! 所有操作在 DB Actor 线程执行；`replace_all` 为单事务，要么整表替换成功，要么保留旧数据。

use async_trait::async_trait;

use crate::error::Result;
use crate::storage::db_actor::DbActorHandle;
use crate::storage::entities::{NewPantryItem, PantryItem};
use crate::sync::{Collection, CollectionRows};

/// 持久化缓存
#[async_trait]
pub trait PersistedStore: Send + Sync {
    /// 读取集合全部缓存行（有序）
    async fn get_all(&self, collection: Collection) -> Result<CollectionRows>;

    /// 整表替换（先删后插，原子）
    async fn replace_all(&self, rows: CollectionRows) -> Result<()>;

    /// 插入一条食材，返回本地 id
    async fn insert_pantry_item(&self, item: NewPantryItem, added_at: i64) -> Result<i64>;

    /// 删除一条食材，返回被删除的行
    async fn delete_pantry_item(&self, id: i64) -> Result<Option<PantryItem>>;

    /// 恢复一条被删除的食材
    async fn restore_pantry_item(&self, item: PantryItem) -> Result<()>;

    /// 乐观行被服务端确认后记录其服务端 id；行已不存在时返回 false
    async fn set_pantry_remote_id(&self, id: i64, remote_id: i64) -> Result<bool>;
}

/// 基于 DB Actor 的用户缓存
#[derive(Debug, Clone)]
pub struct SqlitePersistedStore {
    uid: String,
    db_actor: DbActorHandle,
}

impl SqlitePersistedStore {
    pub fn new(uid: impl Into<String>, db_actor: DbActorHandle) -> Self {
        Self {
            uid: uid.into(),
            db_actor,
        }
    }
}

#[async_trait]
impl PersistedStore for SqlitePersistedStore {
    async fn get_all(&self, collection: Collection) -> Result<CollectionRows> {
        match collection {
            Collection::Pantry => self
                .db_actor
                .get_pantry_items(self.uid.clone())
                .await
                .map(CollectionRows::Pantry),
            Collection::Recommendations => self
                .db_actor
                .get_recommended_videos(self.uid.clone())
                .await
                .map(CollectionRows::Recommendations),
        }
    }

    async fn replace_all(&self, rows: CollectionRows) -> Result<()> {
        match rows {
            CollectionRows::Pantry(items) => {
                self.db_actor.replace_pantry_items(self.uid.clone(), items).await
            }
            CollectionRows::Recommendations(videos) => {
                self.db_actor
                    .replace_recommended_videos(self.uid.clone(), videos)
                    .await
            }
        }
    }

    async fn insert_pantry_item(&self, item: NewPantryItem, added_at: i64) -> Result<i64> {
        self.db_actor
            .insert_pantry_item(self.uid.clone(), item, added_at)
            .await
    }

    async fn delete_pantry_item(&self, id: i64) -> Result<Option<PantryItem>> {
        self.db_actor.delete_pantry_item(self.uid.clone(), id).await
    }

    async fn restore_pantry_item(&self, item: PantryItem) -> Result<()> {
        self.db_actor.restore_pantry_item(self.uid.clone(), item).await
    }

    async fn set_pantry_remote_id(&self, id: i64, remote_id: i64) -> Result<bool> {
        self.db_actor
            .set_pantry_remote_id(self.uid.clone(), id, remote_id)
            .await
    }
}
