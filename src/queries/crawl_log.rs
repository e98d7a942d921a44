use sea_query::{Expr, OnConflict, Query, SqliteQueryBuilder};

use crate::schema::CrawlLog;

/// INSERT OR REPLACE INTO crawl_log (url, crawled_at, status_code) VALUES (?, ?, ?)
pub fn upsert(url: &str, crawled_at: &str, status_code: u16) -> String {
    Query::insert()
        .into_table(CrawlLog::Table)
        .columns([CrawlLog::Url, CrawlLog::CrawledAt, CrawlLog::StatusCode])
        .values_panic([url.into(), crawled_at.into(), (status_code as i32).into()])
        .on_conflict(
            OnConflict::column(CrawlLog::Url)
                .update_columns([CrawlLog::CrawledAt, CrawlLog::StatusCode])
                .to_owned(),
        )
        .to_string(SqliteQueryBuilder)
}

/// SELECT status_code FROM crawl_log WHERE url = ?
pub fn select_status(url: &str) -> String {
    Query::select()
        .column(CrawlLog::StatusCode)
        .from(CrawlLog::Table)
        .and_where(Expr::col(CrawlLog::Url).eq(url))
        .to_string(SqliteQueryBuilder)
}
