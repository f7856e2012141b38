//! 同步元数据存储
//!
//! 键格式：sync_meta:{collection}，值为最后一次成功拉取的毫秒时间戳。
//! 时间戳只前进不后退；拉取失败不写入。

use std::sync::Arc;

use crate::error::Result;
use crate::storage::kv::{keys, KvStore};
use super::Collection;

/// 每个 (用户, 集合) 一行的最后成功拉取时间
pub struct SyncMetadataStore {
    kv: Arc<KvStore>,
}

impl SyncMetadataStore {
    pub fn new(kv: Arc<KvStore>) -> Self {
        Self { kv }
    }

    fn key(collection: Collection) -> String {
        format!("{}:{}", keys::SYNC_META, collection.as_str())
    }

    /// 最后成功拉取时间；从未成功过返回 None
    pub async fn last_fetch(&self, collection: Collection) -> Result<Option<i64>> {
        let key = Self::key(collection);
        self.kv.get::<&str, i64>(key.as_str()).await
    }

    /// 记录一次成功拉取；若已有更新的时间戳则保持不变，返回最终生效值
    pub async fn advance(&self, collection: Collection, fetched_at: i64) -> Result<i64> {
        let key = Self::key(collection);
        self.kv
            .update(key.as_str(), |current: Option<i64>| {
                let next = current.map_or(fetched_at, |c| c.max(fetched_at));
                Ok((next, next))
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn metadata_key_format() {
        assert_eq!(SyncMetadataStore::key(Collection::Pantry), "sync_meta:pantry");
        assert_eq!(
            SyncMetadataStore::key(Collection::Recommendations),
            "sync_meta:recommendations"
        );
    }

    #[tokio::test]
    async fn timestamp_only_advances() {
        let dir = TempDir::new().unwrap();
        let kv = Arc::new(KvStore::open(dir.path(), "u").await.unwrap());
        let store = SyncMetadataStore::new(kv);

        assert_eq!(store.last_fetch(Collection::Pantry).await.unwrap(), None);
        assert_eq!(store.advance(Collection::Pantry, 2_000).await.unwrap(), 2_000);
        assert_eq!(store.advance(Collection::Pantry, 1_000).await.unwrap(), 2_000);
        assert_eq!(store.last_fetch(Collection::Pantry).await.unwrap(), Some(2_000));
        assert_eq!(store.last_fetch(Collection::Recommendations).await.unwrap(), None);
    }
}
