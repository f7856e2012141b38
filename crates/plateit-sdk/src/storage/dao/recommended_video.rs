//! 推荐视频 DAO - recommended_video 表（position 保存服务端顺序）

use rusqlite::{params, Connection};

use crate::error::Result;
use crate::storage::entities::RecommendedVideo;

pub struct RecommendedVideoDao<'a> {
    conn: &'a Connection,
}

impl<'a> RecommendedVideoDao<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn list_all(&self) -> Result<Vec<RecommendedVideo>> {
        let sql = r#"
            SELECT title, link, thumbnail, channel, views, length
            FROM recommended_video
            ORDER BY position ASC
        "#;
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| row_to_video(row))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn replace_all(&self, videos: &[RecommendedVideo]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM recommended_video", [])?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO recommended_video (position, title, link, thumbnail, channel, views, length)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )?;
            for (position, v) in videos.iter().enumerate() {
                stmt.execute(params![
                    position as i64,
                    v.title,
                    v.link,
                    v.thumbnail,
                    v.channel,
                    v.views,
                    v.length,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

fn row_to_video(row: &rusqlite::Row<'_>) -> rusqlite::Result<RecommendedVideo> {
    Ok(RecommendedVideo {
        title: row.get(0)?,
        link: row.get(1)?,
        thumbnail: row.get(2)?,
        channel: row.get(3)?,
        views: row.get(4)?,
        length: row.get(5)?,
    })
}
