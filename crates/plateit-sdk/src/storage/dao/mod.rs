//! 数据访问层 (DAO) - 每张缓存表一个 DAO
//!
//! DAO 只在 DB Actor 线程内使用，借用 Actor 持有的 Connection。

pub mod pantry_item;
pub mod recommended_video;

pub use pantry_item::PantryItemDao;
pub use recommended_video::RecommendedVideoDao;

use rusqlite::Connection;

/// DAO 工厂
pub struct DaoFactory;

impl DaoFactory {
    pub fn pantry_item_dao(conn: &Connection) -> PantryItemDao<'_> {
        PantryItemDao::new(conn)
    }

    pub fn recommended_video_dao(conn: &Connection) -> RecommendedVideoDao<'_> {
        RecommendedVideoDao::new(conn)
    }
}
