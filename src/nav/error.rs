use thiserror::Error;

use super::router::Endpoint;

#[derive(Error, Debug)]
pub enum Error {
    #[error("start and destination resolve to the same place: {0:?}")]
    SameEndpoints(Endpoint),
    #[error("no route between the requested endpoints")]
    NoRoute,
    #[error("starting time {0} s is outside the 0..1777 minute timetable window")]
    StartOutsideTimetable(f64),
    #[error(transparent)]
    StoreUnavailable(#[from] crate::store::error::Error),
}
