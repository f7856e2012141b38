//! KV 存储模块 - 基于 sled 的每用户键值存储
//!
//! 存放标量状态：同步元数据（每个集合的最后成功拉取时间）与令牌账本状态。
//! 每个用户一个独立的 sled 实例（users/{uid}/kv），内部再按 `user_{uid}` 分 Tree。

use serde::{Deserialize, Serialize};
use sled::{Db, Tree};
use std::path::{Path, PathBuf};

use crate::error::{PlateitSDKError, Result};

/// KV 键
pub mod keys {
    /// 同步元数据前缀：sync_meta:{collection}
    pub const SYNC_META: &str = "sync_meta";
    /// 令牌账本状态
    pub const TOKEN_STATE: &str = "token_state";
}

/// 单用户 KV 存储
#[derive(Debug)]
pub struct KvStore {
    path: PathBuf,
    uid: String,
    db: Db,
    tree: Tree,
}

impl KvStore {
    /// 打开用户 KV 存储（{user_dir}/kv）
    pub async fn open(user_dir: &Path, uid: &str) -> Result<Self> {
        let path = user_dir.join("kv");
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| PlateitSDKError::IO(format!("创建 KV 存储目录失败: {}", e)))?;

        // 重新登录同一账号时旧实例可能刚释放文件锁，退避重试
        const MAX_OPEN_RETRIES: u32 = 6;
        const RETRY_DELAY_MS: u64 = 100;
        let mut attempt = 0;
        let db = loop {
            match sled::open(&path) {
                Ok(db) => break db,
                Err(e) => {
                    let msg = e.to_string();
                    let is_lock = msg.contains("could not acquire lock")
                        || msg.contains("Resource temporarily unavailable")
                        || msg.contains("WouldBlock");
                    attempt += 1;
                    if !is_lock || attempt >= MAX_OPEN_RETRIES {
                        return Err(PlateitSDKError::KvStore(format!("打开 sled 数据库失败: {}", e)));
                    }
                    let delay_ms = RETRY_DELAY_MS * (1 << attempt);
                    tracing::warn!("⚠️ sled 被占用，{}ms 后重试 ({}/{})", delay_ms, attempt, MAX_OPEN_RETRIES);
                    tokio::time::sleep(tokio::time::Duration::from_millis(delay_ms)).await;
                }
            }
        };

        let tree = db
            .open_tree(Self::tree_name(uid))
            .map_err(|e| PlateitSDKError::KvStore(format!("打开用户 Tree 失败: {}", e)))?;

        tracing::info!("用户 KV Tree 初始化完成: {}", uid);

        Ok(Self {
            path,
            uid: uid.to_string(),
            db,
            tree,
        })
    }

    fn tree_name(uid: &str) -> String {
        format!("user_{}", uid)
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 设置键值对
    pub async fn set<K, V>(&self, key: K, value: &V) -> Result<()>
    where
        K: AsRef<[u8]>,
        V: Serialize,
    {
        let value_bytes = serde_json::to_vec(value)
            .map_err(|e| PlateitSDKError::Serialization(format!("序列化值失败: {}", e)))?;

        self.tree
            .insert(key, value_bytes)
            .map_err(|e| PlateitSDKError::KvStore(format!("设置键值对失败: {}", e)))?;

        Ok(())
    }

    /// 获取键值对
    pub async fn get<K, V>(&self, key: K) -> Result<Option<V>>
    where
        K: AsRef<[u8]>,
        V: for<'de> Deserialize<'de>,
    {
        let result = self
            .tree
            .get(key)
            .map_err(|e| PlateitSDKError::KvStore(format!("获取键值对失败: {}", e)))?;

        match result {
            Some(value_bytes) => {
                let value = serde_json::from_slice(&value_bytes)
                    .map_err(|e| PlateitSDKError::Serialization(format!("反序列化值失败: {}", e)))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// 原子读改写（compare_and_swap 循环）
    ///
    /// `f` 拿到当前值（不存在为 None），返回新值与附带结果；返回 Err 时放弃写入。
    /// 并发写冲突时以最新值重新调用 `f`，所以 `f` 必须无副作用。
    pub async fn update<K, V, R, F>(&self, key: K, mut f: F) -> Result<R>
    where
        K: AsRef<[u8]>,
        V: Serialize + for<'de> Deserialize<'de>,
        F: FnMut(Option<V>) -> Result<(V, R)>,
    {
        let key = key.as_ref();
        loop {
            let current_bytes = self
                .tree
                .get(key)
                .map_err(|e| PlateitSDKError::KvStore(format!("读取键值失败: {}", e)))?;

            let current = match &current_bytes {
                Some(bytes) => Some(serde_json::from_slice::<V>(bytes).map_err(|e| {
                    PlateitSDKError::Serialization(format!("反序列化值失败: {}", e))
                })?),
                None => None,
            };

            let (new_value, output) = f(current)?;
            let new_bytes = serde_json::to_vec(&new_value)
                .map_err(|e| PlateitSDKError::Serialization(format!("序列化值失败: {}", e)))?;

            if current_bytes.as_deref() == Some(new_bytes.as_slice()) {
                return Ok(output);
            }

            let swapped = self
                .tree
                .compare_and_swap(key, current_bytes, Some(new_bytes))
                .map_err(|e| PlateitSDKError::KvStore(format!("原子更新失败: {}", e)))?;

            match swapped {
                Ok(()) => return Ok(output),
                Err(_) => {
                    tracing::debug!("KV CAS 冲突，重试: {}", String::from_utf8_lossy(key));
                    tokio::task::yield_now().await;
                }
            }
        }
    }

    /// 落盘
    pub async fn flush(&self) -> Result<()> {
        self.db
            .flush_async()
            .await
            .map_err(|e| PlateitSDKError::KvStore(format!("KV 落盘失败: {}", e)))?;
        Ok(())
    }

    /// 清理用户数据（登出）
    pub async fn cleanup_user_data(&self) -> Result<()> {
        self.tree
            .clear()
            .map_err(|e| PlateitSDKError::KvStore(format!("清空用户 Tree 失败: {}", e)))?;
        self.db
            .drop_tree(Self::tree_name(&self.uid))
            .map_err(|e| PlateitSDKError::KvStore(format!("删除用户 Tree 失败: {}", e)))?;
        self.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Counter {
        value: u32,
    }

    #[tokio::test]
    async fn basic_operations() {
        let temp_dir = TempDir::new().unwrap();
        let store = KvStore::open(temp_dir.path(), "alice").await.unwrap();

        store.set("sync_meta:pantry", &123i64).await.unwrap();
        store.set("sync_meta:recommendations", &456i64).await.unwrap();
        assert_eq!(store.get::<_, i64>("sync_meta:pantry").await.unwrap(), Some(123));
        assert_eq!(
            store.get::<_, i64>("sync_meta:recommendations").await.unwrap(),
            Some(456)
        );

        assert_eq!(store.get::<_, i64>("sync_meta:missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn update_aborts_without_writing_on_error() {
        let temp_dir = TempDir::new().unwrap();
        let store = KvStore::open(temp_dir.path(), "bob").await.unwrap();
        store.set("c", &Counter { value: 1 }).await.unwrap();

        let result: Result<()> = store
            .update("c", |_: Option<Counter>| Err(PlateitSDKError::Other("abort".into())))
            .await;
        assert!(result.is_err());
        assert_eq!(store.get::<_, Counter>("c").await.unwrap(), Some(Counter { value: 1 }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_updates_do_not_lose_writes() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(KvStore::open(temp_dir.path(), "carol").await.unwrap());

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .update("c", |cur: Option<Counter>| {
                        let value = cur.map(|c| c.value).unwrap_or(0) + 1;
                        Ok((Counter { value }, ()))
                    })
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(store.get::<_, Counter>("c").await.unwrap(), Some(Counter { value: 20 }));
    }

    #[tokio::test]
    async fn cleanup_removes_user_values() {
        let temp_dir = TempDir::new().unwrap();
        let store = KvStore::open(temp_dir.path(), "dave").await.unwrap();
        store.set(keys::TOKEN_STATE, &Counter { value: 9 }).await.unwrap();
        store.cleanup_user_data().await.unwrap();
        drop(store);

        let reopened = KvStore::open(temp_dir.path(), "dave").await.unwrap();
        assert_eq!(reopened.get::<_, Counter>(keys::TOKEN_STATE).await.unwrap(), None);
    }
}
