use std::collections::HashMap;
use std::sync::Arc;

use geo_types::Point;
use rstar::{Envelope, PointDistance, RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};

use super::geo_util::{self, LATITUDE_DEGREE_METERS, LONGITUDE_DEGREE_METERS};

/// A single physical stop post. Stops without coordinates occur in the feed
/// (timetable labels) and never act as routing nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    pub stop_id: i64,
    pub stop_number: String,
    pub complex_id: i64,
    pub complex_name: String,
    pub town: String,
    pub street: String,
    pub direction: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl Stop {
    pub fn location(&self) -> Option<Point<f64>> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lng)) => Some(Point::new(lng, lat)),
            _ => None,
        }
    }

    pub fn has_location(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some()
    }

    pub fn readable_identifier(&self) -> String {
        format!(
            "STOP: {} {} - {} in {} ({})",
            self.complex_name, self.stop_number, self.street, self.town, self.stop_id
        )
    }

    /// Stop record backing a synthetic endpoint node.
    pub fn synthetic(stop_id: i64, name: &str, location: Point<f64>) -> Stop {
        Stop {
            stop_id,
            stop_number: String::new(),
            complex_id: 0,
            complex_name: name.to_string(),
            town: String::new(),
            street: String::new(),
            direction: String::new(),
            latitude: Some(location.y()),
            longitude: Some(location.x()),
        }
    }
}

/// All stops of the network, by id and spatially indexed for nearest-stop
/// lookups around free geopoints.
#[derive(Clone)]
pub struct StopRegistry {
    stops_by_id: HashMap<i64, Arc<Stop>>,
    rtree: RTree<StopRTreeNode>,
}

impl StopRegistry {
    pub fn from_stops(stops: Vec<Stop>) -> StopRegistry {
        let mut stops_by_id = HashMap::new();
        let mut rtree = RTree::new();
        for stop in stops {
            let stop = Arc::new(stop);
            if let Some(location) = stop.location() {
                rtree.insert(StopRTreeNode {
                    envelope: AABB::from_point(project(location)),
                    stop: Arc::clone(&stop),
                });
            }
            stops_by_id.insert(stop.stop_id, stop);
        }
        StopRegistry { stops_by_id, rtree }
    }

    pub fn len(&self) -> usize {
        self.stops_by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stops_by_id.is_empty()
    }

    pub fn stop_by_id(&self, stop_id: i64) -> Option<Arc<Stop>> {
        self.stops_by_id.get(&stop_id).cloned()
    }

    /// The `n` stops nearest to `location`, as (ground distance in meters,
    /// stop id) pairs, closest first. Only stops with coordinates qualify.
    pub fn closest_stops(&self, n: usize, location: Point<f64>) -> Vec<(f64, i64)> {
        let mut nearest: Vec<(f64, i64)> = self
            .rtree
            .nearest_neighbor_iter(&project(location))
            .take(n)
            .map(|node| {
                let stop_location = Point::new(
                    node.stop.longitude.unwrap_or_default(),
                    node.stop.latitude.unwrap_or_default(),
                );
                (
                    geo_util::ground_distance(location, stop_location),
                    node.stop.stop_id,
                )
            })
            .collect();
        nearest.sort_by(|a, b| a.0.total_cmp(&b.0));
        nearest
    }
}

/// Approximate metric projection so R-tree distances rank like ground
/// distances.
fn project(location: Point<f64>) -> [f64; 2] {
    [
        location.x() * LONGITUDE_DEGREE_METERS * location.y().to_radians().cos(),
        location.y() * LATITUDE_DEGREE_METERS,
    ]
}

#[derive(Clone)]
struct StopRTreeNode {
    envelope: AABB<[f64; 2]>,
    stop: Arc<Stop>,
}

impl RTreeObject for StopRTreeNode {
    type Envelope = AABB<[f64; 2]>;
    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

impl PointDistance for StopRTreeNode {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        self.envelope.distance_2(point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn located(stop_id: i64, lat: f64, lng: f64) -> Stop {
        Stop {
            stop_id,
            stop_number: format!("{:02}", stop_id),
            complex_id: stop_id,
            complex_name: format!("Stop {}", stop_id),
            town: "Town".to_string(),
            street: "Street".to_string(),
            direction: String::new(),
            latitude: Some(lat),
            longitude: Some(lng),
        }
    }

    #[test]
    fn closest_stops_come_back_sorted_by_ground_distance() {
        let registry = StopRegistry::from_stops(vec![
            located(1, 52.00, 20.50),
            located(2, 52.01, 20.50),
            located(3, 52.10, 20.50),
            located(4, 52.00, 20.51),
        ]);
        let nearest = registry.closest_stops(3, Point::new(20.50, 52.0001));
        assert_eq!(nearest.len(), 3);
        let ids: Vec<i64> = nearest.iter().map(|&(_, stop_id)| stop_id).collect();
        assert_eq!(ids[0], 1);
        assert!(nearest.windows(2).all(|w| w[0].0 <= w[1].0));
        assert!(!ids.contains(&3));
    }

    #[test]
    fn stops_without_coordinates_are_never_candidates() {
        let mut label_only = located(7, 0.0, 0.0);
        label_only.latitude = None;
        label_only.longitude = None;
        let registry = StopRegistry::from_stops(vec![located(1, 52.0, 20.5), label_only]);
        assert_eq!(registry.len(), 2);
        let nearest = registry.closest_stops(5, Point::new(20.5, 52.0));
        assert_eq!(nearest.len(), 1);
        assert_eq!(nearest[0].1, 1);
    }
}
