//! Component A — Clock.
//!
//! Authoritative wall-clock time in the configured civil zone, cached for a
//! TTL in the hot store so repeated reads within the window are cheap and
//! every caller observes the same "now". Reads the cache first, falls back
//! to the OS clock, and writes the cache on fallback.

use crate::store::hot::HotStore;
use chrono::{DateTime, FixedOffset, Utc};
use std::sync::Arc;
use std::time::Duration;

const CLOCK_KEY: &str = "beijing_time";

pub struct Clock {
    hot: Arc<HotStore>,
    offset: FixedOffset,
    ttl: Duration,
}

impl Clock {
    pub fn new(hot: Arc<HotStore>, zone_offset_minutes: i32, ttl: Duration) -> Self {
        let offset = FixedOffset::east_opt(zone_offset_minutes * 60)
            .expect("zone offset must be within +-24h");
        Self { hot, offset, ttl }
    }

    /// Returns "now" in the configured civil zone, consulting the hot cache
    /// first and falling back to the OS clock.
    pub async fn now(&self) -> DateTime<FixedOffset> {
        if let Some(cached) = self.hot.get_string(CLOCK_KEY).await {
            if let Ok(parsed) = DateTime::parse_from_rfc3339(&cached) {
                return parsed.with_timezone(&self.offset);
            }
        }

        let now = Utc::now().with_timezone(&self.offset);
        self.hot
            .set_string(CLOCK_KEY, &now.to_rfc3339(), self.ttl)
            .await;
        now
    }
}
