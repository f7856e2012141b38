//! 数据库 Actor - 单线程数据库访问模型
//!
//! - SQLite Connection 只存在于一个专用线程
//! - 所有读写通过 channel 发送命令，结果经 oneshot 异步返回
//! - 调用方（UI/业务任务）永不阻塞在磁盘 IO 上

use crossbeam_channel::{unbounded, Receiver, Sender};
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::PathBuf;
use std::thread;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::error::{PlateitSDKError, Result};
use crate::storage::dao::DaoFactory;
use crate::storage::entities::{NewPantryItem, PantryItem, RecommendedVideo};

/// 数据库命令
pub enum DbCommand {
    /// 打开并迁移用户缓存库
    InitUser {
        uid: String,
        db_path: PathBuf,
        respond_to: oneshot::Sender<Result<()>>,
    },

    GetPantryItems {
        uid: String,
        respond_to: oneshot::Sender<Result<Vec<PantryItem>>>,
    },

    /// 整表替换食材库（事务）
    ReplacePantryItems {
        uid: String,
        items: Vec<PantryItem>,
        respond_to: oneshot::Sender<Result<()>>,
    },

    /// 插入一条食材，返回本地 id
    InsertPantryItem {
        uid: String,
        item: NewPantryItem,
        added_at: i64,
        respond_to: oneshot::Sender<Result<i64>>,
    },

    /// 删除一条食材，返回被删除的行（用于失败回滚）
    DeletePantryItem {
        uid: String,
        id: i64,
        respond_to: oneshot::Sender<Result<Option<PantryItem>>>,
    },

    /// 恢复一条被删除的食材
    RestorePantryItem {
        uid: String,
        item: PantryItem,
        respond_to: oneshot::Sender<Result<()>>,
    },

    /// 回写服务端 id
    SetPantryRemoteId {
        uid: String,
        id: i64,
        remote_id: i64,
        respond_to: oneshot::Sender<Result<bool>>,
    },

    GetRecommendedVideos {
        uid: String,
        respond_to: oneshot::Sender<Result<Vec<RecommendedVideo>>>,
    },

    /// 整表替换推荐视频（事务）
    ReplaceRecommendedVideos {
        uid: String,
        videos: Vec<RecommendedVideo>,
        respond_to: oneshot::Sender<Result<()>>,
    },

    /// 关闭特定用户的数据库
    CloseUser {
        uid: String,
        respond_to: oneshot::Sender<Result<()>>,
    },

    /// 停止 Actor
    Shutdown,
}

impl DbCommand {
    fn name(&self) -> &'static str {
        match self {
            DbCommand::InitUser { .. } => "InitUser",
            DbCommand::GetPantryItems { .. } => "GetPantryItems",
            DbCommand::ReplacePantryItems { .. } => "ReplacePantryItems",
            DbCommand::InsertPantryItem { .. } => "InsertPantryItem",
            DbCommand::DeletePantryItem { .. } => "DeletePantryItem",
            DbCommand::RestorePantryItem { .. } => "RestorePantryItem",
            DbCommand::SetPantryRemoteId { .. } => "SetPantryRemoteId",
            DbCommand::GetRecommendedVideos { .. } => "GetRecommendedVideos",
            DbCommand::ReplaceRecommendedVideos { .. } => "ReplaceRecommendedVideos",
            DbCommand::CloseUser { .. } => "CloseUser",
            DbCommand::Shutdown => "Shutdown",
        }
    }
}

/// 数据库 Actor（运行在独立线程）
struct DbActor {
    /// 每个用户一个连接
    connections: HashMap<String, Connection>,
    receiver: Receiver<DbCommand>,
    thread_id: thread::ThreadId,
}

impl DbActor {
    fn new(receiver: Receiver<DbCommand>) -> Self {
        let thread_id = thread::current().id();
        info!("🚀 [Thread {:?}] DbActor 已启动", thread_id);
        Self {
            connections: HashMap::new(),
            receiver,
            thread_id,
        }
    }

    fn run(mut self) {
        info!("🔄 [Thread {:?}] DbActor 开始处理命令", self.thread_id);

        while let Ok(command) = self.receiver.recv() {
            debug!(
                "📥 [DbActor Thread {:?}] 接收命令: {}",
                self.thread_id,
                command.name()
            );
            match command {
                DbCommand::Shutdown => {
                    info!("🛑 [Thread {:?}] DbActor 收到停止信号", self.thread_id);
                    break;
                }

                DbCommand::InitUser {
                    uid,
                    db_path,
                    respond_to,
                } => {
                    let result = self.handle_init_user(&uid, &db_path);
                    let _ = respond_to.send(result);
                }

                DbCommand::GetPantryItems { uid, respond_to } => {
                    let result = self.with_conn(&uid, |conn| DaoFactory::pantry_item_dao(conn).list_all());
                    let _ = respond_to.send(result);
                }

                DbCommand::ReplacePantryItems {
                    uid,
                    items,
                    respond_to,
                } => {
                    let result = self.with_conn(&uid, |conn| {
                        DaoFactory::pantry_item_dao(conn).replace_all(&items)
                    });
                    let _ = respond_to.send(result);
                }

                DbCommand::InsertPantryItem {
                    uid,
                    item,
                    added_at,
                    respond_to,
                } => {
                    let result = self.with_conn(&uid, |conn| {
                        DaoFactory::pantry_item_dao(conn).insert(&item, added_at)
                    });
                    let _ = respond_to.send(result);
                }

                DbCommand::DeletePantryItem { uid, id, respond_to } => {
                    let result = self.with_conn(&uid, |conn| {
                        let dao = DaoFactory::pantry_item_dao(conn);
                        let existing = dao.get_by_id(id)?;
                        if existing.is_some() {
                            dao.delete_by_id(id)?;
                        }
                        Ok(existing)
                    });
                    let _ = respond_to.send(result);
                }

                DbCommand::RestorePantryItem {
                    uid,
                    item,
                    respond_to,
                } => {
                    let result = self.with_conn(&uid, |conn| DaoFactory::pantry_item_dao(conn).restore(&item));
                    let _ = respond_to.send(result);
                }

                DbCommand::SetPantryRemoteId {
                    uid,
                    id,
                    remote_id,
                    respond_to,
                } => {
                    let result = self.with_conn(&uid, |conn| {
                        DaoFactory::pantry_item_dao(conn).set_remote_id(id, remote_id)
                    });
                    let _ = respond_to.send(result);
                }

                DbCommand::GetRecommendedVideos { uid, respond_to } => {
                    let result = self.with_conn(&uid, |conn| {
                        DaoFactory::recommended_video_dao(conn).list_all()
                    });
                    let _ = respond_to.send(result);
                }

                DbCommand::ReplaceRecommendedVideos {
                    uid,
                    videos,
                    respond_to,
                } => {
                    let result = self.with_conn(&uid, |conn| {
                        DaoFactory::recommended_video_dao(conn).replace_all(&videos)
                    });
                    let _ = respond_to.send(result);
                }

                DbCommand::CloseUser { uid, respond_to } => {
                    let result = self.handle_close_user(&uid);
                    let _ = respond_to.send(result);
                }
            }
        }

        info!("✅ [Thread {:?}] DbActor 已停止", self.thread_id);
    }

    fn with_conn<T>(&self, uid: &str, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.connections.get(uid).ok_or_else(|| {
            warn!(
                "⚠️  [DbActor Thread {:?}] 用户数据库未初始化: uid={}",
                self.thread_id, uid
            );
            PlateitSDKError::Database(format!("用户数据库未初始化: {}", uid))
        })?;
        f(conn)
    }

    fn handle_init_user(&mut self, uid: &str, db_path: &PathBuf) -> Result<()> {
        if self.connections.contains_key(uid) {
            info!(
                "⚠️  [DbActor Thread {:?}] 用户已初始化，跳过: uid={}",
                self.thread_id, uid
            );
            return Ok(());
        }

        let mut conn = Connection::open(db_path).map_err(|e| {
            error!(
                "❌ [DbActor Thread {:?}] 打开数据库失败: uid={}, error={}",
                self.thread_id, uid, e
            );
            PlateitSDKError::Database(format!("打开数据库失败: {}", e))
        })?;

        crate::storage::migrate::init_db(&mut conn)?;

        info!(
            "✅ [DbActor Thread {:?}] 缓存库就绪: uid={}, path={}",
            self.thread_id,
            uid,
            db_path.display()
        );
        self.connections.insert(uid.to_string(), conn);
        Ok(())
    }

    fn handle_close_user(&mut self, uid: &str) -> Result<()> {
        match self.connections.remove(uid) {
            Some(conn) => {
                conn.close().map_err(|(_, e)| {
                    PlateitSDKError::Database(format!("关闭数据库失败: {}", e))
                })?;
                info!("🔒 [DbActor Thread {:?}] 已关闭用户数据库: uid={}", self.thread_id, uid);
            }
            None => {
                debug!("[DbActor Thread {:?}] 用户数据库未打开: uid={}", self.thread_id, uid);
            }
        }
        Ok(())
    }
}

/// 数据库 Actor 句柄（用于异步调用）
#[derive(Clone)]
pub struct DbActorHandle {
    sender: Sender<DbCommand>,
}

impl std::fmt::Debug for DbActorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbActorHandle")
            .field("sender", &"<channel>")
            .finish()
    }
}

impl DbActorHandle {
    /// 启动 DB Actor 专用线程
    pub fn spawn() -> Result<Self> {
        let (sender, receiver) = unbounded();

        thread::Builder::new()
            .name("db-actor".to_string())
            .spawn(move || DbActor::new(receiver).run())
            .map_err(|e| PlateitSDKError::Other(format!("无法启动 DB Actor 线程: {}", e)))?;

        Ok(Self { sender })
    }

    /// 发送命令并等待结果
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> DbCommand,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        let command = build(tx);
        let name = command.name();

        self.sender.send(command).map_err(|_| {
            error!("❌ [DbActorHandle] 发送命令失败: {}", name);
            PlateitSDKError::Other("DB Actor 已停止".to_string())
        })?;

        rx.await
            .map_err(|_| PlateitSDKError::Other("DB Actor 响应失败".to_string()))?
    }

    pub async fn init_user(&self, uid: String, db_path: PathBuf) -> Result<()> {
        self.request(|respond_to| DbCommand::InitUser {
            uid,
            db_path,
            respond_to,
        })
        .await
    }

    pub async fn get_pantry_items(&self, uid: String) -> Result<Vec<PantryItem>> {
        self.request(|respond_to| DbCommand::GetPantryItems { uid, respond_to })
            .await
    }

    pub async fn replace_pantry_items(&self, uid: String, items: Vec<PantryItem>) -> Result<()> {
        self.request(|respond_to| DbCommand::ReplacePantryItems {
            uid,
            items,
            respond_to,
        })
        .await
    }

    pub async fn insert_pantry_item(
        &self,
        uid: String,
        item: NewPantryItem,
        added_at: i64,
    ) -> Result<i64> {
        self.request(|respond_to| DbCommand::InsertPantryItem {
            uid,
            item,
            added_at,
            respond_to,
        })
        .await
    }

    pub async fn delete_pantry_item(&self, uid: String, id: i64) -> Result<Option<PantryItem>> {
        self.request(|respond_to| DbCommand::DeletePantryItem { uid, id, respond_to })
            .await
    }

    pub async fn restore_pantry_item(&self, uid: String, item: PantryItem) -> Result<()> {
        self.request(|respond_to| DbCommand::RestorePantryItem {
            uid,
            item,
            respond_to,
        })
        .await
    }

    pub async fn set_pantry_remote_id(&self, uid: String, id: i64, remote_id: i64) -> Result<bool> {
        self.request(|respond_to| DbCommand::SetPantryRemoteId {
            uid,
            id,
            remote_id,
            respond_to,
        })
        .await
    }

    pub async fn get_recommended_videos(&self, uid: String) -> Result<Vec<RecommendedVideo>> {
        self.request(|respond_to| DbCommand::GetRecommendedVideos { uid, respond_to })
            .await
    }

    pub async fn replace_recommended_videos(
        &self,
        uid: String,
        videos: Vec<RecommendedVideo>,
    ) -> Result<()> {
        self.request(|respond_to| DbCommand::ReplaceRecommendedVideos {
            uid,
            videos,
            respond_to,
        })
        .await
    }

    pub async fn close_user(&self, uid: String) -> Result<()> {
        self.request(|respond_to| DbCommand::CloseUser { uid, respond_to })
            .await
    }

    /// 停止 DB Actor
    pub fn shutdown(&self) {
        let _ = self.sender.send(DbCommand::Shutdown);
    }
}
