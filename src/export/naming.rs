//! Segment object keys
//!
//! Keys look like `<prefix><db>/<YYYY-MM-DD_HH:MM:SS>_<seq>-<run>.<ext>`.
//! The timestamp is local time at seal, `seq` counts segments within the run
//! and `run` is a short random id, so two segments sealed in the same second
//! (or by two runs started in the same second) never collide.

use chrono::{DateTime, Local};
use uuid::Uuid;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H:%M:%S";

/// Generates unique, sortable keys for the segments of one export run
#[derive(Debug, Clone)]
pub struct SegmentNamer {
    prefix: String,
    database: String,
    extension: &'static str,
    run_id: String,
    sequence: u32,
}

impl SegmentNamer {
    /// Create a namer for one run
    ///
    /// # Arguments
    /// * `prefix` - Key prefix, empty or ending in `/`
    /// * `database` - Database name, used as the key "directory"
    /// * `extension` - Extension of the chunk format
    pub fn new(prefix: &str, database: &str, extension: &'static str) -> Self {
        let run_id = Uuid::new_v4().simple().to_string()[..8].to_string();
        Self {
            prefix: prefix.to_string(),
            database: database.to_string(),
            extension,
            run_id,
            sequence: 0,
        }
    }

    /// Key for the next segment, stamped with the current local time
    pub fn next_name(&mut self) -> String {
        self.next_name_at(Local::now())
    }

    /// Key for the next segment, stamped with `now`
    pub fn next_name_at(&mut self, now: DateTime<Local>) -> String {
        let key = format!(
            "{}{}/{}_{:05}-{}.{}",
            self.prefix,
            self.database,
            now.format(TIMESTAMP_FORMAT),
            self.sequence,
            self.run_id,
            self.extension
        );
        self.sequence += 1;
        key
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Number of keys handed out so far
    pub fn issued(&self) -> u32 {
        self.sequence
    }
}
