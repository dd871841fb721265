use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use geo_types::Point;

use super::stops::{Stop, StopRegistry};
use super::timetable::{Seconds, SingleCourse};

/// Reserved ids of the synthetic endpoint nodes injected for free-geopoint
/// queries. They only ever live for the duration of one query.
pub const FAKE_START_ID: i64 = -1;
pub const FAKE_DESTINATION_ID: i64 = -2;

/// Search vertex: one stop, the courses of every variant calling there, and
/// the stops within walking range.
#[derive(Debug, Clone)]
pub struct TransitNode {
    pub stop: Arc<Stop>,
    variant_courses: HashMap<String, Vec<Arc<SingleCourse>>>,
    /// Walking edges as (distance in meters, neighbour stop id).
    pub neighbours: Vec<(f64, i64)>,
    /// Course lists must be re-sealed after insertions before any lookup.
    ordered: bool,
}

impl TransitNode {
    pub fn new(stop: Arc<Stop>) -> TransitNode {
        TransitNode {
            stop,
            variant_courses: HashMap::new(),
            neighbours: Vec::new(),
            ordered: true,
        }
    }

    /// Node standing in for a free-geopoint endpoint. It carries outgoing
    /// walk edges only and never any courses.
    pub fn fake(
        fake_id: i64,
        name: &str,
        location: Point<f64>,
        neighbours: Vec<(f64, i64)>,
    ) -> TransitNode {
        TransitNode {
            stop: Arc::new(Stop::synthetic(fake_id, name, location)),
            variant_courses: HashMap::new(),
            neighbours,
            ordered: true,
        }
    }

    pub fn variant_ids(&self) -> impl Iterator<Item = &String> {
        self.variant_courses.keys()
    }

    pub fn courses_of_variant(&self, variant_id: &str) -> Option<&[Arc<SingleCourse>]> {
        self.variant_courses.get(variant_id).map(Vec::as_slice)
    }

    pub fn add_course(&mut self, course: Arc<SingleCourse>) {
        self.ordered = false;
        self.variant_courses
            .entry(course.variant.variant_id.clone())
            .or_default()
            .push(course);
    }

    /// Re-sort every variant bucket by the course's arrival at this stop.
    /// Courses with no entry for this stop sort last.
    pub fn seal(&mut self) {
        let stop_id = self.stop.stop_id;
        for courses in self.variant_courses.values_mut() {
            courses.sort_by(|a, b| sort_key(a, stop_id).total_cmp(&sort_key(b, stop_id)));
        }
        self.ordered = true;
    }

    /// First course of `variant_id` leaving this stop strictly after
    /// `after`, or nothing if every course has already sailed.
    pub fn soonest_course(&self, variant_id: &str, after: Seconds) -> Option<&Arc<SingleCourse>> {
        assert!(self.ordered, "binary search over an unsealed course list");
        let courses = self.variant_courses.get(variant_id)?;
        let stop_id = self.stop.stop_id;
        let index = courses.partition_point(|course| sort_key(course, stop_id) <= after);
        let course = courses.get(index)?;
        if course.arrival_at(stop_id).is_none() {
            log::info!(
                "course {} has no departure at stop {}",
                course.course_id,
                stop_id
            );
            return None;
        }
        Some(course)
    }
}

fn sort_key(course: &SingleCourse, stop_id: i64) -> f64 {
    course.arrival_at(stop_id).unwrap_or(f64::INFINITY)
}

/// Mutable stop-id -> node mapping that grows as chunks stream in. Nodes are
/// created on first reference as ghosts and filled in by later loads.
pub struct NavGraph {
    registry: Arc<StopRegistry>,
    nodes: HashMap<i64, TransitNode>,
    courses_present: HashSet<String>,
}

impl NavGraph {
    pub fn new(registry: Arc<StopRegistry>) -> NavGraph {
        NavGraph {
            registry,
            nodes: HashMap::new(),
            courses_present: HashSet::new(),
        }
    }

    pub fn registry(&self) -> &Arc<StopRegistry> {
        &self.registry
    }

    pub fn has_stop(&self, stop_id: i64) -> bool {
        self.nodes.contains_key(&stop_id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn course_count(&self) -> usize {
        self.courses_present.len()
    }

    pub fn add_node(&mut self, node: TransitNode) {
        self.nodes.insert(node.stop.stop_id, node);
    }

    pub fn remove_node(&mut self, stop_id: i64) -> Option<TransitNode> {
        self.nodes.remove(&stop_id)
    }

    pub fn get(&self, stop_id: i64) -> Option<&TransitNode> {
        self.nodes.get(&stop_id)
    }

    pub fn get_mut(&mut self, stop_id: i64) -> Option<&mut TransitNode> {
        self.nodes.get_mut(&stop_id)
    }

    /// Node for `stop_id`, creating an empty ghost from the stop registry if
    /// this is the first reference. Asking for an id the registry does not
    /// know is a caller bug.
    pub fn nav_node(&mut self, stop_id: i64) -> &mut TransitNode {
        let registry = &self.registry;
        self.nodes.entry(stop_id).or_insert_with(|| {
            let stop = registry
                .stop_by_id(stop_id)
                .unwrap_or_else(|| panic!("stop {} is not in the stop registry", stop_id));
            TransitNode::new(stop)
        })
    }

    /// Insert a course at every stop of its variant, then re-seal the
    /// touched nodes. A course id already present is skipped wholesale, so
    /// overlapping chunks can replay the same course safely.
    pub fn add_course(&mut self, course: Arc<SingleCourse>) {
        if !self.courses_present.insert(course.course_id.clone()) {
            return;
        }
        let mut touched = HashSet::new();
        for &stop_id in &course.variant.ordered_stop_ids {
            self.nav_node(stop_id).add_course(Arc::clone(&course));
            touched.insert(stop_id);
        }
        for stop_id in touched {
            self.nav_node(stop_id).seal();
        }
    }
}
