use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Time in seconds since midnight. Values may run past 86,400 when a course
/// crosses midnight.
pub type Seconds = f64;

/// Which stops, and in what order, a line variant serves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantStops {
    pub variant_id: String,
    pub ordered_stop_ids: Vec<i64>,
}

/// One timetabled vehicle run on a variant, with its arrival time at each
/// stop it serves.
#[derive(Debug, Clone)]
pub struct SingleCourse {
    pub course_id: String,
    pub variant: Arc<VariantStops>,
    pub arrival_by_stop: HashMap<i64, Seconds>,
}

impl SingleCourse {
    pub fn arrival_at(&self, stop_id: i64) -> Option<Seconds> {
        self.arrival_by_stop.get(&stop_id).copied()
    }
}
