pub mod chunks;
pub mod geo_util;
pub mod stops;
pub mod timetable;
pub mod transit_graph;
