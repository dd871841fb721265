use std::collections::HashMap;
use std::sync::Arc;

use crate::layers::chunks::{self, ChunkId};
use crate::layers::timetable::{SingleCourse, VariantStops};
use crate::layers::transit_graph::NavGraph;
use crate::store::db::{CourseDeparture, NavStore, WalkNeighbour};
use crate::store::error::Error;

/// Pulls the courses and walking edges of one space-time chunk out of the
/// store and folds them into the graph.
pub struct ChunkLoader {
    store: NavStore,
    variants: HashMap<String, Arc<VariantStops>>,
}

impl ChunkLoader {
    pub fn new(store: NavStore) -> ChunkLoader {
        ChunkLoader {
            store,
            variants: HashMap::new(),
        }
    }

    /// Download one chunk and apply it to the graph. `excluded_chunks` lists
    /// recently loaded chunks whose courses the store must not send again.
    pub fn load(
        &mut self,
        graph: &mut NavGraph,
        chunk: ChunkId,
        excluded_chunks: &[ChunkId],
    ) -> Result<(), Error> {
        let (lat_chunk, lng_chunk, time_chunk) = chunks::unpack(chunk);
        log::info!(
            "downloading space-time chunk {} x {} @ {}",
            lat_chunk,
            lng_chunk,
            time_chunk
        );

        let departures = match self.store.course_departures_in_chunk(chunk, excluded_chunks) {
            Ok(rows) => rows,
            Err(err) => {
                log::warn!("course query failed, retrying once: {}", err);
                self.store.course_departures_in_chunk(chunk, excluded_chunks)?
            }
        };
        let row_count = departures.len();
        let courses = self.assemble_courses(departures)?;
        log::info!(
            "downloaded {} departure rows in {} courses",
            row_count,
            courses.len()
        );

        for course in courses {
            // A partially covered course can miss its own first departure;
            // such a course would order wrong on every node it touches.
            let has_first_stop = course
                .variant
                .ordered_stop_ids
                .first()
                .is_some_and(|&stop_id| course.arrival_at(stop_id).is_some());
            if has_first_stop {
                graph.add_course(Arc::new(course));
            } else {
                log::warn!(
                    "course {} variant does not match its departures",
                    course.course_id
                );
            }
        }

        let neighbours = match self.store.walk_neighbours_in_cell(lat_chunk, lng_chunk) {
            Ok(rows) => rows,
            Err(err) => {
                log::warn!("neighbour query failed, retrying once: {}", err);
                self.store.walk_neighbours_in_cell(lat_chunk, lng_chunk)?
            }
        };
        for WalkNeighbour {
            stop_id,
            neighbour_id,
            distance,
        } in neighbours
        {
            graph.nav_node(stop_id).neighbours.push((distance, neighbour_id));
        }
        log::info!(
            "{} x {} @ {} chunk data inserted",
            lat_chunk,
            lng_chunk,
            time_chunk
        );
        Ok(())
    }

    /// Group departure rows by course id into course instances, with
    /// departures converted from timetable minutes to seconds.
    fn assemble_courses(
        &mut self,
        departures: Vec<CourseDeparture>,
    ) -> Result<Vec<SingleCourse>, Error> {
        let mut courses: Vec<SingleCourse> = Vec::new();
        let mut index_by_id: HashMap<String, usize> = HashMap::new();
        for row in departures {
            let index = match index_by_id.get(&row.course_id) {
                Some(&index) => index,
                None => {
                    let variant = self.variant_stops(&row.variant_id)?;
                    courses.push(SingleCourse {
                        course_id: row.course_id.clone(),
                        variant,
                        arrival_by_stop: HashMap::new(),
                    });
                    index_by_id.insert(row.course_id.clone(), courses.len() - 1);
                    courses.len() - 1
                }
            };
            courses[index]
                .arrival_by_stop
                .insert(row.stop_id, row.departure_minute as f64 * 60.0);
        }
        Ok(courses)
    }

    fn variant_stops(&mut self, variant_id: &str) -> Result<Arc<VariantStops>, Error> {
        if let Some(variant) = self.variants.get(variant_id) {
            return Ok(Arc::clone(variant));
        }
        let ordered_stop_ids = self.store.variant_stops(variant_id)?;
        let variant = Arc::new(VariantStops {
            variant_id: variant_id.to_string(),
            ordered_stop_ids,
        });
        self.variants
            .insert(variant_id.to_string(), Arc::clone(&variant));
        Ok(variant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::chunks::pack;
    use crate::layers::stops::{Stop, StopRegistry};
    use rusqlite::{params, Connection};

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

    /// Two stops in cell (4, 1); course C1 calls at both, course CX lacks
    /// its first-stop departure, and one walk edge links the stops.
    fn fixture() -> (ChunkLoader, NavGraph) {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE STOP (
                 stop_id INTEGER PRIMARY KEY,
                 stop_number TEXT,
                 complex_id INTEGER,
                 complex_name TEXT,
                 town TEXT,
                 street TEXT,
                 direction TEXT,
                 latitude REAL,
                 longitude REAL
             );
             CREATE TABLE COURSE (course_id TEXT PRIMARY KEY, variant_id TEXT NOT NULL);
             CREATE TABLE STOP_COURSE (
                 stop_id INTEGER NOT NULL,
                 course_id TEXT NOT NULL,
                 departure_time INTEGER NOT NULL,
                 chunk INTEGER NOT NULL
             );
             CREATE TABLE STOP_VARIANT (
                 variant_id TEXT NOT NULL,
                 stop_id INTEGER NOT NULL,
                 stop_sequence INTEGER NOT NULL
             );
             CREATE TABLE STOP_NEIGHBOUR (
                 stop_id INTEGER NOT NULL,
                 neighbour_id INTEGER NOT NULL,
                 distance REAL NOT NULL
             );
             INSERT INTO STOP VALUES (1, '01', 1, 'Alpha', 'Town', 'Street', '', 52.0, 20.5);
             INSERT INTO STOP VALUES (2, '02', 2, 'Beta', 'Town', 'Street', '', 52.001, 20.5);
             INSERT INTO COURSE VALUES ('C1', 'V1');
             INSERT INTO COURSE VALUES ('CX', 'V1');
             INSERT INTO STOP_VARIANT VALUES ('V1', 1, 0);
             INSERT INTO STOP_VARIANT VALUES ('V1', 2, 1);
             INSERT INTO STOP_NEIGHBOUR VALUES (1, 2, 120.0);",
        )
        .unwrap();
        let chunk = pack(4, 1, 1);
        for (stop_id, course_id, minute) in [(1, "C1", 100), (2, "C1", 104), (2, "CX", 105)] {
            conn.execute(
                "INSERT INTO STOP_COURSE VALUES (?, ?, ?, ?)",
                params![stop_id, course_id, minute, chunk],
            )
            .unwrap();
        }
        let registry = Arc::new(StopRegistry::from_stops(vec![
            located(1, 52.0, 20.5),
            located(2, 52.001, 20.5),
        ]));
        (
            ChunkLoader::new(NavStore::from_connection(conn)),
            NavGraph::new(registry),
        )
    }

    #[test]
    fn loading_a_chunk_fills_the_graph() {
        let (mut loader, mut graph) = fixture();
        loader.load(&mut graph, pack(4, 1, 1), &[]).unwrap();

        // C1 lands on both of its stops, converted to seconds.
        let node = graph.nav_node(1);
        let courses = node.courses_of_variant("V1").unwrap();
        assert_eq!(courses.len(), 1);
        assert_eq!(courses[0].course_id, "C1");
        assert_eq!(courses[0].arrival_at(1), Some(6000.0));
        assert_eq!(courses[0].arrival_at(2), Some(6240.0));
        assert_eq!(node.soonest_course("V1", 0.0).unwrap().course_id, "C1");

        // CX is missing its departure at the variant's first stop.
        assert_eq!(graph.course_count(), 1);

        // The walk edge of the cell landed on stop 1.
        assert_eq!(graph.nav_node(1).neighbours, vec![(120.0, 2)]);
    }

    #[test]
    fn replaying_an_overlapping_chunk_does_not_duplicate_courses() {
        let (mut loader, mut graph) = fixture();
        loader.load(&mut graph, pack(4, 1, 1), &[]).unwrap();
        loader.load(&mut graph, pack(4, 1, 1), &[]).unwrap();
        assert_eq!(graph.course_count(), 1);
        assert_eq!(
            graph.nav_node(2).courses_of_variant("V1").unwrap().len(),
            1
        );
    }

    #[test]
    fn excluded_chunks_suppress_the_download() {
        let (mut loader, mut graph) = fixture();
        loader
            .load(&mut graph, pack(4, 1, 1), &[pack(4, 1, 1)])
            .unwrap();
        assert_eq!(graph.course_count(), 0);
    }
}
