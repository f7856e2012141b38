//! 缓存库初始化
//!
//! 表结构在 migrations/V{n}__{name}.sql，由 refinery 编译期嵌入。

mod embedded {
    use refinery::embed_migrations;

    embed_migrations!("./migrations");
}

use rusqlite::Connection;
use tracing::debug;

use crate::error::{PlateitSDKError, Result};
use crate::version::SDK_DB_VERSION;

/// 缓存可由远端重建，NORMAL 同步即可
const CACHE_PRAGMAS: &str = "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;";

fn migration_error(e: refinery::Error) -> PlateitSDKError {
    PlateitSDKError::Migration(e.to_string())
}

/// 打开缓存库后调用：拒绝由更新版本 SDK 写过的库，再补齐未执行的迁移
pub fn init_db(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(CACHE_PRAGMAS)
        .map_err(|e| PlateitSDKError::Database(format!("设置 PRAGMA 失败: {}", e)))?;

    let runner = embedded::migrations::runner();
    if let Some(last) = runner
        .get_last_applied_migration(conn)
        .map_err(migration_error)?
    {
        if last.version() > SDK_DB_VERSION {
            return Err(PlateitSDKError::Migration(format!(
                "缓存库版本 {} 高于当前 SDK 支持的最高版本 {}",
                last.version(),
                SDK_DB_VERSION
            )));
        }
    }

    let report = runner.run(conn).map_err(migration_error)?;
    for migration in report.applied_migrations() {
        debug!("📐 缓存库迁移: V{}__{}", migration.version(), migration.name());
    }
    Ok(())
}
