pub mod app;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod feed;
pub mod models;
pub mod paging;

#[cfg(test)]
mod test_support;

/// Wall clock in ms since the epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
