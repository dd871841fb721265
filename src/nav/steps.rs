use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::layers::stops::Stop;
use crate::layers::timetable::Seconds;

/// One leg of an itinerary; also the predecessor record while the search is
/// running.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind")]
pub enum NavStep {
    /// Marker seeding the search origin.
    Start { at: Arc<Stop>, time: Seconds },
    Walk {
        from: Arc<Stop>,
        to: Arc<Stop>,
        time_start: Seconds,
        time_end: Seconds,
    },
    Board {
        from: Arc<Stop>,
        to: Arc<Stop>,
        time_start: Seconds,
        time_end: Seconds,
        variant_id: String,
    },
}

impl NavStep {
    pub fn time_start(&self) -> Seconds {
        match self {
            NavStep::Start { time, .. } => *time,
            NavStep::Walk { time_start, .. } | NavStep::Board { time_start, .. } => *time_start,
        }
    }

    pub fn time_end(&self) -> Seconds {
        match self {
            NavStep::Start { time, .. } => *time,
            NavStep::Walk { time_end, .. } | NavStep::Board { time_end, .. } => *time_end,
        }
    }

    pub fn end_stop(&self) -> &Arc<Stop> {
        match self {
            NavStep::Start { at, .. } => at,
            NavStep::Walk { to, .. } | NavStep::Board { to, .. } => to,
        }
    }
}

impl fmt::Display for NavStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NavStep::Start { at, time } => {
                write!(f, "Start at {} ({})", at.readable_identifier(), clock(*time))
            }
            NavStep::Walk {
                from,
                to,
                time_start,
                time_end,
            } => write!(
                f,
                "Walk from {} to {} ({} -> {})",
                from.readable_identifier(),
                to.readable_identifier(),
                clock(*time_start),
                clock(*time_end)
            ),
            NavStep::Board {
                from,
                to,
                time_start,
                time_end,
                variant_id,
            } => write!(
                f,
                "Take line {} from {} to {} ({} -> {})",
                variant_id,
                from.readable_identifier(),
                to.readable_identifier(),
                clock(*time_start),
                clock(*time_end)
            ),
        }
    }
}

/// HH:MM:SS from seconds since midnight; hours keep counting past 24 when a
/// journey crosses midnight.
fn clock(time: Seconds) -> String {
    let total = time.round() as i64;
    format!("{:02}:{:02}:{:02}", total / 3600, total / 60 % 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::Point;

    #[test]
    fn steps_render_with_clock_times() {
        let from = Arc::new(Stop::synthetic(1, "Origin", Point::new(20.5, 52.0)));
        let to = Arc::new(Stop::synthetic(2, "Target", Point::new(20.51, 52.01)));
        let step = NavStep::Board {
            from,
            to,
            time_start: 3600.0,
            time_end: 3725.0,
            variant_id: "L1".to_string(),
        };
        let text = format!("{}", step);
        assert!(text.contains("Take line L1"));
        assert!(text.contains("01:00:00"));
        assert!(text.contains("01:02:05"));
    }
}
