//! 食材库 DAO - pantry_item 表

use rusqlite::{params, Connection};

use crate::error::Result;
use crate::storage::entities::{NewPantryItem, PantryItem};

pub struct PantryItemDao<'a> {
    conn: &'a Connection,
}

impl<'a> PantryItemDao<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// 全部条目，按加入时间倒序
    pub fn list_all(&self) -> Result<Vec<PantryItem>> {
        let sql = r#"
            SELECT id, remote_id, name, amount, image_url, added_at, created_at
            FROM pantry_item
            ORDER BY added_at DESC, id DESC
        "#;
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| row_to_pantry_item(row))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// 整表替换：单个事务内先清空再插入，失败则保留旧数据
    pub fn replace_all(&self, items: &[PantryItem]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM pantry_item", [])?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO pantry_item (remote_id, name, amount, image_url, added_at, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )?;
            for item in items {
                stmt.execute(params![
                    item.remote_id,
                    item.name,
                    item.amount,
                    item.image_url,
                    item.added_at,
                    item.created_at,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// 插入单条（乐观插入），返回本地 id
    pub fn insert(&self, item: &NewPantryItem, added_at: i64) -> Result<i64> {
        self.conn.execute(
            r#"
            INSERT INTO pantry_item (remote_id, name, amount, image_url, added_at, created_at)
            VALUES (NULL, ?1, ?2, ?3, ?4, NULL)
            "#,
            params![item.name, item.amount, item.image_url, added_at],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// 按原样恢复一条（删除失败回滚用）
    pub fn restore(&self, item: &PantryItem) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO pantry_item (id, remote_id, name, amount, image_url, added_at, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                item.id,
                item.remote_id,
                item.name,
                item.amount,
                item.image_url,
                item.added_at,
                item.created_at,
            ],
        )?;
        Ok(())
    }

    /// 服务端确认新增后回写 remote_id；行已被整表替换掉时返回 false
    pub fn set_remote_id(&self, id: i64, remote_id: i64) -> Result<bool> {
        let n = self.conn.execute(
            "UPDATE pantry_item SET remote_id = ?2 WHERE id = ?1",
            params![id, remote_id],
        )?;
        Ok(n > 0)
    }

    pub fn get_by_id(&self, id: i64) -> Result<Option<PantryItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, remote_id, name, amount, image_url, added_at, created_at FROM pantry_item WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], |row| row_to_pantry_item(row))?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// 删除单条，返回是否存在
    pub fn delete_by_id(&self, id: i64) -> Result<bool> {
        let n = self.conn.execute("DELETE FROM pantry_item WHERE id = ?1", params![id])?;
        Ok(n > 0)
    }
}

fn row_to_pantry_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<PantryItem> {
    Ok(PantryItem {
        id: row.get(0)?,
        remote_id: row.get(1)?,
        name: row.get(2)?,
        amount: row.get(3)?,
        image_url: row.get(4)?,
        added_at: row.get(5)?,
        created_at: row.get(6)?,
    })
}
