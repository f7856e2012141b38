//! 存储层
//!
//! - `db_actor`：SQLite 单线程 Actor，承载各集合的缓存表
//! - `kv`：sled 键值存储，承载同步元数据与令牌账本
//! - 每个用户独立目录 {data_dir}/users/{uid}/（cache.db + kv/），登出时整目录删除

pub mod cache_store;
pub mod dao;
pub mod db_actor;
pub mod entities;
pub mod kv;
pub mod migrate;

pub use cache_store::{PersistedStore, SqlitePersistedStore};
pub use db_actor::DbActorHandle;
pub use kv::KvStore;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{PlateitSDKError, Result};

/// 单个用户的存储句柄
#[derive(Clone)]
pub struct UserStorage {
    pub uid: String,
    pub kv: Arc<KvStore>,
    pub cache: Arc<dyn PersistedStore>,
}

impl std::fmt::Debug for UserStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserStorage")
            .field("uid", &self.uid)
            .field("kv", &self.kv.path())
            .finish()
    }
}

/// 存储管理器
///
/// 进程内唯一的 DB Actor，加上按用户打开的 KV 存储。
#[derive(Debug)]
pub struct StorageManager {
    base_path: PathBuf,
    db_actor: DbActorHandle,
    user_kv_stores: RwLock<HashMap<String, Arc<KvStore>>>,
}

impl StorageManager {
    pub async fn new(base_path: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(base_path)
            .await
            .map_err(|e| PlateitSDKError::IO(format!("创建存储目录失败: {}", e)))?;

        let db_actor = DbActorHandle::spawn()?;
        tracing::info!("✅ DB Actor 已启动（单线程模型）: {}", base_path.display());

        Ok(Self {
            base_path: base_path.to_path_buf(),
            db_actor,
            user_kv_stores: RwLock::new(HashMap::new()),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn user_dir(&self, uid: &str) -> PathBuf {
        self.base_path.join("users").join(uid)
    }

    /// 打开用户存储（幂等）
    pub async fn init_user(&self, uid: &str) -> Result<UserStorage> {
        if uid.trim().is_empty() || uid.contains(['/', '\\']) || uid == "." || uid == ".." {
            return Err(PlateitSDKError::InvalidArgument(format!("非法用户 ID: {:?}", uid)));
        }

        let existing = self.user_kv_stores.read().await.get(uid).cloned();
        let kv = match existing {
            Some(kv) => {
                tracing::debug!("用户存储已打开: {}", uid);
                kv
            }
            None => {
                let user_dir = self.user_dir(uid);
                tokio::fs::create_dir_all(&user_dir)
                    .await
                    .map_err(|e| PlateitSDKError::IO(format!("创建用户目录失败: {}", e)))?;

                self.db_actor
                    .init_user(uid.to_string(), user_dir.join("cache.db"))
                    .await?;

                let kv = Arc::new(KvStore::open(&user_dir, uid).await?);
                self.user_kv_stores
                    .write()
                    .await
                    .insert(uid.to_string(), kv.clone());
                tracing::info!("✅ 用户存储初始化完成: {}", uid);
                kv
            }
        };

        Ok(UserStorage {
            uid: uid.to_string(),
            kv,
            cache: Arc::new(SqlitePersistedStore::new(uid, self.db_actor.clone())),
        })
    }

    /// 清理用户全部本地数据：缓存表、同步元数据、令牌账本
    pub async fn cleanup_user(&self, uid: &str) -> Result<()> {
        self.db_actor.close_user(uid.to_string()).await?;

        let kv = self.user_kv_stores.write().await.remove(uid);
        if let Some(kv) = kv {
            kv.cleanup_user_data().await?;
        }

        let user_dir = self.user_dir(uid);
        if tokio::fs::try_exists(&user_dir).await.unwrap_or(false) {
            if let Err(e) = tokio::fs::remove_dir_all(&user_dir).await {
                // sled 后台线程可能仍持有文件句柄，数据已清空，目录残留不影响下次登录
                tracing::warn!("⚠️ 删除用户目录失败: {}, error={}", user_dir.display(), e);
            }
        }

        tracing::info!("🧹 用户本地数据已清理: {}", uid);
        Ok(())
    }

    /// 停止 DB Actor
    pub fn shutdown(&self) {
        self.db_actor.shutdown();
    }
}
