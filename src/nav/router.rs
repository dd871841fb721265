use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use geo_types::Point;
use ordered_float::OrderedFloat;

use super::error::Error;
use super::loader::ChunkLoader;
use super::steps::NavStep;
use crate::layers::chunks::{self, ChunkId, TIMETABLE_HORIZON_MINUTES};
use crate::layers::geo_util::ground_distance;
use crate::layers::stops::{Stop, StopRegistry};
use crate::layers::timetable::Seconds;
use crate::layers::transit_graph::{
    NavGraph, TransitNode, FAKE_DESTINATION_ID, FAKE_START_ID,
};
use crate::store::db::NavStore;

/// Variant sentinel carried after a walk edge so the next expansion
/// reconsiders every line, including the one just stepped off of.
const WALKED_LINE_VARIANT: &str = "walked";

const FAKE_START_NAME: &str = "Starting point";
const FAKE_DESTINATION_NAME: &str = "Your destination";

/// Where a query begins or ends: a known stop or a free geographic point
/// (latitude, longitude in degrees).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Endpoint {
    StopId(i64),
    Geopoint(f64, f64),
}

/// Tuning knobs of the search. Defaults match the production timetable.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Average walking speed, m/s.
    pub walking_speed: f64,
    /// Straight-line speed bounding the heuristic, m/s. Rail legs can beat
    /// 5 m/s on average, so the estimate is not strictly admissible; the
    /// fine-tune phase is what keeps answers near-optimal regardless.
    pub heuristic_speed: f64,
    /// Fixed cost added to every walk edge, seconds.
    pub base_walk_time: Seconds,
    /// Minimum time needed to change lines within a stop, seconds.
    pub variant_switch_time: Seconds,
    /// How many nearby stops a free-geopoint endpoint is wired to.
    pub closest_stops_per_endpoint: usize,
    /// Destination reaches allowed while chunk downloads are still on.
    pub download_path_finds: u32,
    /// Base iteration budget of the download phase.
    pub download_patience: f64,
    /// Destination reaches allowed once the search runs on loaded data only.
    pub fine_tune_path_finds: u32,
    /// Base iteration budget of the fine-tune phase.
    pub fine_tune_patience: f64,
    /// Size of the recently-loaded chunk window excluded from re-download.
    pub chunk_exclusion_window: usize,
}

impl Default for RouterConfig {
    fn default() -> RouterConfig {
        RouterConfig {
            walking_speed: 1.0,
            heuristic_speed: 5.0,
            base_walk_time: 5.0,
            variant_switch_time: 15.0,
            closest_stops_per_endpoint: 6,
            download_path_finds: 3,
            download_patience: 2000.0,
            fine_tune_path_finds: 15,
            fine_tune_patience: 50000.0,
            chunk_exclusion_window: 500,
        }
    }
}

/// Queue key; field order is the comparison order, which keeps expansion
/// deterministic for equal heuristic times.
#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct QueueEntry {
    heuristic_time: OrderedFloat<Seconds>,
    arrival_time: OrderedFloat<Seconds>,
    last_variant: Option<String>,
    stop_id: i64,
}

/// A resolved query endpoint.
struct SearchEndpoint {
    stop_id: i64,
    stop: Arc<Stop>,
    location: Point<f64>,
}

/// Earliest-arrival search over the transit graph. The graph starts empty
/// and fills up as queries pull in the chunks they touch; it persists for
/// the lifetime of the router.
pub struct AStarRouter {
    config: RouterConfig,
    graph: NavGraph,
    loader: Option<ChunkLoader>,
    /// Chunks applied to the graph over the router's lifetime.
    loaded_chunks: HashSet<ChunkId>,
    /// Recently loaded chunks, rotated per query; sent to the store as the
    /// exclusion list so overlap re-downloads stay cheap.
    recent_chunks: VecDeque<ChunkId>,
    /// When will I optimally get here?
    min_arrival_time: HashMap<i64, Seconds>,
    /// How will I optimally get here?
    min_path_taken: HashMap<i64, NavStep>,
    /// Back-edges installed on real nodes for a fake destination, so the
    /// cleanup can erase each one exactly once.
    fake_destination_links: Vec<(f64, i64)>,
}

impl AStarRouter {
    pub fn new(registry: Arc<StopRegistry>, loader: Option<ChunkLoader>) -> AStarRouter {
        AStarRouter::with_config(registry, loader, RouterConfig::default())
    }

    pub fn with_config(
        registry: Arc<StopRegistry>,
        loader: Option<ChunkLoader>,
        config: RouterConfig,
    ) -> AStarRouter {
        AStarRouter {
            config,
            graph: NavGraph::new(registry),
            loader,
            loaded_chunks: HashSet::new(),
            recent_chunks: VecDeque::new(),
            min_arrival_time: HashMap::new(),
            min_path_taken: HashMap::new(),
            fake_destination_links: Vec::new(),
        }
    }

    /// Build the stop registry from the store and attach a loader for
    /// on-demand chunk downloads.
    pub fn from_store(store: NavStore) -> Result<AStarRouter, Error> {
        let registry = Arc::new(StopRegistry::from_stops(store.all_stops()?));
        Ok(AStarRouter::new(registry, Some(ChunkLoader::new(store))))
    }

    pub fn graph(&self) -> &NavGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut NavGraph {
        &mut self.graph
    }

    /// Earliest-arrival itinerary from `start` to `destination`, leaving at
    /// `starting_time` seconds after midnight.
    pub fn route(
        &mut self,
        starting_time: Seconds,
        start: Endpoint,
        destination: Endpoint,
    ) -> Result<Vec<NavStep>, Error> {
        if start == destination {
            return Err(Error::SameEndpoints(start));
        }
        if !(0.0..TIMETABLE_HORIZON_MINUTES * 60.0).contains(&starting_time) {
            return Err(Error::StartOutsideTimetable(starting_time));
        }
        let result = self.route_inner(starting_time, start, destination);
        self.detach_fake_nodes();
        result
    }

    fn route_inner(
        &mut self,
        starting_time: Seconds,
        start: Endpoint,
        destination: Endpoint,
    ) -> Result<Vec<NavStep>, Error> {
        let start = self.resolve_endpoint(start, FAKE_START_ID)?;
        let destination = self.resolve_endpoint(destination, FAKE_DESTINATION_ID)?;
        self.run_search(starting_time, &start, &destination);
        self.reconstruct(start.stop_id, destination.stop_id)
    }

    /// Turn a query endpoint into a graph node. A stop id resolves through
    /// the graph (materialising a ghost if needed); a free geopoint gets a
    /// synthetic node wired to the nearest stops, and for the destination
    /// also back-edges from those stops.
    fn resolve_endpoint(
        &mut self,
        endpoint: Endpoint,
        fake_id: i64,
    ) -> Result<SearchEndpoint, Error> {
        let stop_id = match endpoint {
            Endpoint::StopId(stop_id) => {
                if self.graph.nav_node(stop_id).stop.location().is_none() {
                    // Locationless stops are timetable labels, not places
                    // the search can move through.
                    log::warn!("stop {} has no location, cannot route", stop_id);
                    return Err(Error::NoRoute);
                }
                stop_id
            }
            Endpoint::Geopoint(lat, lng) => {
                let location = Point::new(lng, lat);
                let closest = self
                    .graph
                    .registry()
                    .closest_stops(self.config.closest_stops_per_endpoint, location);
                let name = if fake_id == FAKE_START_ID {
                    FAKE_START_NAME
                } else {
                    FAKE_DESTINATION_NAME
                };
                self.graph
                    .add_node(TransitNode::fake(fake_id, name, location, closest.clone()));
                if fake_id == FAKE_DESTINATION_ID {
                    for &(distance, stop_id) in &closest {
                        self.graph
                            .nav_node(stop_id)
                            .neighbours
                            .push((distance, FAKE_DESTINATION_ID));
                    }
                    self.fake_destination_links = closest;
                }
                fake_id
            }
        };
        let node = self.graph.nav_node(stop_id);
        let stop = Arc::clone(&node.stop);
        log::info!("{:?} -> {}", endpoint, stop.readable_identifier());
        let location = match stop.location() {
            Some(location) => location,
            None => return Err(Error::NoRoute),
        };
        Ok(SearchEndpoint {
            stop_id,
            stop,
            location,
        })
    }

    fn run_search(
        &mut self,
        starting_time: Seconds,
        start: &SearchEndpoint,
        destination: &SearchEndpoint,
    ) {
        let cfg = self.config.clone();
        let total_path_finds = cfg.download_path_finds + cfg.fine_tune_path_finds;

        self.min_arrival_time.clear();
        self.min_path_taken.clear();
        self.recent_chunks.clear();

        self.min_path_taken.insert(
            start.stop_id,
            NavStep::Start {
                at: Arc::clone(&start.stop),
                time: starting_time,
            },
        );
        self.min_arrival_time.insert(start.stop_id, starting_time);

        // Pure-walking fallback any transit itinerary has to beat.
        let walked_straight =
            ground_distance(start.location, destination.location) / cfg.walking_speed;
        self.min_path_taken.insert(
            destination.stop_id,
            NavStep::Walk {
                from: Arc::clone(&start.stop),
                to: Arc::clone(&destination.stop),
                time_start: starting_time,
                time_end: starting_time + walked_straight,
            },
        );
        self.min_arrival_time
            .insert(destination.stop_id, starting_time + walked_straight);

        let mut queue: BinaryHeap<Reverse<QueueEntry>> = BinaryHeap::new();
        queue.push(Reverse(QueueEntry {
            heuristic_time: OrderedFloat(self.heuristic(start.location, destination.location, 0.0)),
            arrival_time: OrderedFloat(starting_time),
            last_variant: None,
            stop_id: start.stop_id,
        }));

        let mut total_iterations: u64 = 0;
        let mut iteration_limit: u64 = 1_000_000;
        let mut path_finds: u32 = 0;
        let mut iterations_per_reach: Vec<u64> = Vec::new();
        let mut destination_seen_not_entered: u64 = 0;

        while total_iterations < iteration_limit && path_finds < total_path_finds {
            let Some(Reverse(entry)) = queue.pop() else {
                break;
            };
            total_iterations += 1;

            // Download budget gone before the download-phase reaches were
            // used up: stop loading, keep searching on what is in memory.
            if total_iterations >= iteration_limit && path_finds < cfg.download_path_finds {
                log::info!("downloads ended prematurely, fine-tuning on loaded data");
                path_finds = cfg.download_path_finds;
                iteration_limit =
                    patience_drop_off(cfg.fine_tune_patience, cfg.fine_tune_path_finds, 0);
            }

            let arrival_time = entry.arrival_time.0;
            let current_id = entry.stop_id;

            // Some other path to this node was better? Ignore this one.
            let best_known = *self
                .min_arrival_time
                .entry(current_id)
                .or_insert(f64::INFINITY);
            if best_known < arrival_time
                || arrival_time > self.min_arrival_time[&destination.stop_id]
            {
                continue;
            }

            // The first reach rarely rides on complete data; allow a few
            // more with shrinking patience instead of stopping here.
            if current_id == destination.stop_id {
                iterations_per_reach.push(total_iterations);
                total_iterations = 0;
                iteration_limit = if path_finds + 1 < cfg.download_path_finds {
                    patience_drop_off(cfg.download_patience, cfg.download_path_finds, path_finds as i32)
                } else {
                    patience_drop_off(
                        cfg.fine_tune_patience,
                        cfg.fine_tune_path_finds,
                        path_finds as i32 - cfg.download_path_finds as i32,
                    )
                };
                if path_finds + 1 == cfg.download_path_finds {
                    log::info!("fine tuning shortest path");
                }
                path_finds += 1;
                log::info!("destination reached {} times", path_finds);
                continue;
            }

            // Pull in the chunk around this node plus the chronologically
            // next one, so waiting out a slice boundary stays representable.
            if path_finds < cfg.download_path_finds {
                self.extend_graph(current_id, arrival_time);
            }

            let (current_stop, variant_ids, neighbours) = {
                let node = self.graph.nav_node(current_id);
                (
                    Arc::clone(&node.stop),
                    node.variant_ids().cloned().collect::<Vec<_>>(),
                    node.neighbours.clone(),
                )
            };

            // Ride out on every variant other than the one just left.
            let board_time = arrival_time + cfg.variant_switch_time;
            for variant_id in variant_ids {
                if entry.last_variant.as_deref() == Some(variant_id.as_str()) {
                    continue;
                }
                let next_course = match self
                    .graph
                    .nav_node(current_id)
                    .soonest_course(&variant_id, board_time)
                {
                    Some(course) => Arc::clone(course),
                    None => continue,
                };
                let Some(course_departure_time) = next_course.arrival_at(current_id) else {
                    continue;
                };
                // Walk the variant from its terminus backwards until the
                // iteration falls onto the current stop.
                for &next_stop_id in next_course.variant.ordered_stop_ids[1..].iter().rev() {
                    if next_stop_id == current_id {
                        break;
                    }
                    let Some(next_arrival) = next_course.arrival_at(next_stop_id) else {
                        continue;
                    };
                    let next_node = self.graph.nav_node(next_stop_id);
                    let Some(next_location) = next_node.stop.location() else {
                        continue;
                    };
                    let next_stop = Arc::clone(&next_node.stop);
                    let heuristic_time = self.heuristic(
                        destination.location,
                        next_location,
                        next_arrival - board_time,
                    );
                    if next_arrival
                        < *self
                            .min_arrival_time
                            .get(&next_stop_id)
                            .unwrap_or(&f64::INFINITY)
                    {
                        self.min_arrival_time.insert(next_stop_id, next_arrival);
                        self.min_path_taken.insert(
                            next_stop_id,
                            NavStep::Board {
                                from: Arc::clone(&current_stop),
                                to: next_stop,
                                time_start: course_departure_time,
                                time_end: next_arrival,
                                variant_id: variant_id.clone(),
                            },
                        );
                        queue.push(Reverse(QueueEntry {
                            heuristic_time: OrderedFloat(heuristic_time),
                            arrival_time: OrderedFloat(next_arrival),
                            last_variant: Some(variant_id.clone()),
                            stop_id: next_stop_id,
                        }));
                    } else if next_stop_id == destination.stop_id {
                        destination_seen_not_entered += 1;
                    }
                }
            }

            // Walk to everything in range.
            for (distance, neighbour_id) in neighbours {
                let next_node = self.graph.nav_node(neighbour_id);
                let Some(next_location) = next_node.stop.location() else {
                    continue;
                };
                let next_stop = Arc::clone(&next_node.stop);
                let time_walked = distance / cfg.walking_speed + cfg.base_walk_time;
                let next_arrival = arrival_time + time_walked;
                let heuristic_time =
                    self.heuristic(destination.location, next_location, time_walked);
                if next_arrival
                    < *self
                        .min_arrival_time
                        .get(&neighbour_id)
                        .unwrap_or(&f64::INFINITY)
                {
                    self.min_arrival_time.insert(neighbour_id, next_arrival);
                    self.min_path_taken.insert(
                        neighbour_id,
                        NavStep::Walk {
                            from: Arc::clone(&current_stop),
                            to: next_stop,
                            time_start: arrival_time,
                            time_end: next_arrival,
                        },
                    );
                    queue.push(Reverse(QueueEntry {
                        heuristic_time: OrderedFloat(heuristic_time),
                        arrival_time: OrderedFloat(next_arrival),
                        last_variant: Some(WALKED_LINE_VARIANT.to_string()),
                        stop_id: neighbour_id,
                    }));
                } else if neighbour_id == destination.stop_id {
                    destination_seen_not_entered += 1;
                }
            }
        }

        log::info!("----------");
        log::info!("A* search ended:");
        if total_iterations >= iteration_limit {
            log::info!("> hit the iteration limit: {}", iteration_limit);
        } else if path_finds >= total_path_finds {
            log::info!("> hit the path finding limit");
        } else if queue.is_empty() {
            log::info!("> queue empty");
        }
        log::info!(
            "destination reached but not entered {} times",
            destination_seen_not_entered
        );
        log::info!("iterations per reach: {:?}", iterations_per_reach);
        log::info!("remaining queue entries: {}", queue.len());
        log::info!("chunks in memory: {}", self.loaded_chunks.len());
    }

    /// Heuristic total time to get between two points, given the time
    /// already spent getting to the first one.
    fn heuristic(&self, p: Point<f64>, q: Point<f64>, time_taken_so_far: Seconds) -> Seconds {
        ground_distance(p, q) / self.config.heuristic_speed + time_taken_so_far
    }

    /// Load the chunk covering this node at this time, and its successor
    /// time slice, unless they were already pulled in.
    fn extend_graph(&mut self, stop_id: i64, arrival_time: Seconds) {
        if self.loader.is_none() {
            return;
        }
        let Some(location) = self.graph.nav_node(stop_id).stop.location() else {
            return;
        };
        let chunk = chunks::chunk_of(location, arrival_time);
        self.load_chunk(chunk);
        self.load_chunk(chunks::next_chronological(chunk));
    }

    fn load_chunk(&mut self, chunk: ChunkId) {
        if self.loaded_chunks.contains(&chunk) {
            return;
        }
        let Some(loader) = self.loader.as_mut() else {
            return;
        };
        let excluded: Vec<ChunkId> = self.recent_chunks.iter().copied().collect();
        if let Err(err) = loader.load(&mut self.graph, chunk, &excluded) {
            // The search carries on with whatever made it into the graph;
            // the chunk still counts as attempted so this query does not
            // hammer an unhealthy store.
            log::error!("failed to load chunk {}: {}", chunk, err);
        }
        self.recent_chunks.push_back(chunk);
        if self.recent_chunks.len() > self.config.chunk_exclusion_window {
            self.recent_chunks.pop_front();
        }
        self.loaded_chunks.insert(chunk);
    }

    /// Walk the predecessor chain backwards from the destination. A chain
    /// that never connects back to the start is a dead end, not a route.
    fn reconstruct(&self, start_id: i64, destination_id: i64) -> Result<Vec<NavStep>, Error> {
        let mut path = Vec::new();
        let mut current_id = destination_id;
        while current_id != start_id {
            let step = match self.min_path_taken.get(&current_id) {
                Some(step) => step,
                None => return Err(Error::NoRoute),
            };
            let from = match step {
                NavStep::Walk { from, .. } | NavStep::Board { from, .. } => Arc::clone(from),
                NavStep::Start { .. } => return Err(Error::NoRoute),
            };
            path.push(step.clone());
            current_id = from.stop_id;
            if path.len() > self.min_path_taken.len() {
                return Err(Error::NoRoute);
            }
        }
        path.reverse();
        Ok(path)
    }

    /// Fake endpoint nodes and their back-edges never outlive the query.
    fn detach_fake_nodes(&mut self) {
        self.graph.remove_node(FAKE_START_ID);
        self.graph.remove_node(FAKE_DESTINATION_ID);
        for (distance, stop_id) in std::mem::take(&mut self.fake_destination_links) {
            if let Some(node) = self.graph.get_mut(stop_id) {
                if let Some(position) = node
                    .neighbours
                    .iter()
                    .position(|&(d, id)| id == FAKE_DESTINATION_ID && d == distance)
                {
                    node.neighbours.remove(position);
                }
            }
        }
    }
}

/// Iteration budget granted for the x-th destination reach within a phase.
fn patience_drop_off(base: f64, horizon: u32, x: i32) -> u64 {
    (base * (1.0 - 1.0 / horizon as f64).powi(x)).floor() as u64
}
