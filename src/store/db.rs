use rusqlite::{params, params_from_iter, Connection};

use super::error::Error;
use crate::layers::chunks::{
    ChunkId, GRID_ORIGIN_LAT, GRID_ORIGIN_LNG, GRID_SPAN_LAT, GRID_SPAN_LNG, SPACE_CHUNK_COUNT,
};
use crate::layers::stops::Stop;

/// One departure row of the course query.
#[derive(Debug, Clone)]
pub struct CourseDeparture {
    pub stop_id: i64,
    pub course_id: String,
    /// Departure at this stop, in timetable minutes.
    pub departure_minute: i64,
    pub variant_id: String,
}

/// One walking-edge row of the neighbour query.
#[derive(Debug, Clone)]
pub struct WalkNeighbour {
    pub stop_id: i64,
    pub neighbour_id: i64,
    /// Walking distance in meters.
    pub distance: f64,
}

/// Read-only access to the prepared timetable database.
///
/// Expected tables:
/// - `STOP(stop_id, stop_number, complex_id, complex_name, town, street, direction, latitude, longitude)`
/// - `COURSE(course_id, variant_id)`
/// - `STOP_COURSE(stop_id, course_id, departure_time, chunk)` with departures in minutes
/// - `STOP_VARIANT(variant_id, stop_id, stop_sequence)`
/// - `STOP_NEIGHBOUR(stop_id, neighbour_id, distance)` with distances in meters
pub struct NavStore {
    conn: Connection,
}

impl NavStore {
    const STOP_COLUMNS: &'static str =
        "stop_id, stop_number, complex_id, complex_name, town, street, direction, latitude, longitude";

    pub fn open(dbname: &str) -> Result<NavStore, Error> {
        let conn = Connection::open(dbname)?;
        Ok(NavStore { conn })
    }

    pub fn from_connection(conn: Connection) -> NavStore {
        NavStore { conn }
    }

    /// Every departure of every course that has at least one departure in
    /// `chunk`, minus courses already covered by `excluded_chunks`.
    ///
    /// Membership is computed on course ids first, so a course straddling
    /// several chunks is either fetched whole or not at all.
    pub fn course_departures_in_chunk(
        &self,
        chunk: ChunkId,
        excluded_chunks: &[ChunkId],
    ) -> Result<Vec<CourseDeparture>, Error> {
        let placeholders = if excluded_chunks.is_empty() {
            "-1".to_string()
        } else {
            vec!["?"; excluded_chunks.len()].join(",")
        };
        let sql = format!(
            "SELECT sc.stop_id, sc.course_id, sc.departure_time, co.variant_id \
             FROM STOP_COURSE sc \
             INNER JOIN ( \
                 SELECT course_id FROM STOP_COURSE WHERE chunk = ? \
                 EXCEPT \
                 SELECT course_id FROM STOP_COURSE WHERE chunk IN ({placeholders}) \
             ) sub ON sub.course_id = sc.course_id \
             INNER JOIN COURSE co ON co.course_id = sc.course_id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut bound: Vec<i64> = vec![i64::from(chunk)];
        bound.extend(excluded_chunks.iter().map(|&c| i64::from(c)));
        let rows = stmt.query_map(params_from_iter(bound), |row| {
            Ok(CourseDeparture {
                stop_id: row.get(0)?,
                course_id: row.get(1)?,
                departure_minute: row.get(2)?,
                variant_id: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Walking edges whose source stop lies in the given spatial cell.
    pub fn walk_neighbours_in_cell(
        &self,
        lat_chunk: u16,
        lng_chunk: u16,
    ) -> Result<Vec<WalkNeighbour>, Error> {
        // CAST truncates toward zero; inside the 0..=31 grid that is the
        // same cell assignment the chunker makes.
        let sql = format!(
            "SELECT sn.stop_id, sn.neighbour_id, sn.distance \
             FROM STOP_NEIGHBOUR sn \
             WHERE sn.stop_id IN ( \
                 SELECT s.stop_id FROM STOP s \
                 WHERE s.latitude IS NOT NULL AND s.longitude IS NOT NULL \
                   AND CAST((s.latitude - {GRID_ORIGIN_LAT}) / {GRID_SPAN_LAT} * {SPACE_CHUNK_COUNT} AS INTEGER) = ? \
                   AND CAST((s.longitude - {GRID_ORIGIN_LNG}) / {GRID_SPAN_LNG} * {SPACE_CHUNK_COUNT} AS INTEGER) = ? \
             )"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![lat_chunk, lng_chunk], |row| {
            Ok(WalkNeighbour {
                stop_id: row.get(0)?,
                neighbour_id: row.get(1)?,
                distance: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Ordered stop ids of one variant.
    pub fn variant_stops(&self, variant_id: &str) -> Result<Vec<i64>, Error> {
        let mut stmt = self.conn.prepare(
            "SELECT stop_id FROM STOP_VARIANT WHERE variant_id = ? ORDER BY stop_sequence",
        )?;
        let rows = stmt.query_map(params![variant_id], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// One stop record.
    pub fn stop_by_id(&self, stop_id: i64) -> Result<Stop, Error> {
        let sql = format!("SELECT {} FROM STOP WHERE stop_id = ?", Self::STOP_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        Ok(stmt.query_row(params![stop_id], row_to_stop)?)
    }

    /// Every stop of the network, for the registry and nearest-stop lookups.
    pub fn all_stops(&self) -> Result<Vec<Stop>, Error> {
        let sql = format!("SELECT {} FROM STOP", Self::STOP_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![], row_to_stop)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

fn row_to_stop(row: &rusqlite::Row<'_>) -> rusqlite::Result<Stop> {
    Ok(Stop {
        stop_id: row.get(0)?,
        stop_number: row.get(1)?,
        complex_id: row.get(2)?,
        complex_name: row.get(3)?,
        town: row.get(4)?,
        street: row.get(5)?,
        direction: row.get(6)?,
        latitude: row.get(7)?,
        longitude: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::chunks::pack;

    fn test_store() -> NavStore {
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
             );",
        )
        .unwrap();
        NavStore::from_connection(conn)
    }

    /// Stops 1 and 2 sit in spatial cells (4, 1) and (4, 2); course C1 has a
    /// departure in each cell's minute-100 chunk, course C2 only in the
    /// first.
    fn seed(store: &NavStore) {
        let conn = &store.conn;
        conn.execute_batch(
            "INSERT INTO STOP VALUES (1, '01', 10, 'Alpha', 'Town', 'Street', 'N', 52.0, 20.5);
             INSERT INTO STOP VALUES (2, '02', 20, 'Beta', 'Town', 'Street', 'S', 52.0, 20.55);
             INSERT INTO STOP VALUES (9, '09', 90, 'Ghost', 'Town', 'Street', '', NULL, NULL);
             INSERT INTO COURSE VALUES ('C1', 'V1');
             INSERT INTO COURSE VALUES ('C2', 'V1');
             INSERT INTO STOP_VARIANT VALUES ('V1', 2, 1);
             INSERT INTO STOP_VARIANT VALUES ('V1', 1, 0);
             INSERT INTO STOP_NEIGHBOUR VALUES (1, 2, 150.0);
             INSERT INTO STOP_NEIGHBOUR VALUES (2, 1, 150.0);",
        )
        .unwrap();
        let chunk_a = pack(4, 1, 1);
        let chunk_b = pack(4, 2, 1);
        for (stop_id, course_id, minute, chunk) in [
            (1, "C1", 100, chunk_a),
            (2, "C1", 110, chunk_b),
            (1, "C2", 200, chunk_a),
        ] {
            conn.execute(
                "INSERT INTO STOP_COURSE VALUES (?, ?, ?, ?)",
                params![stop_id, course_id, minute, chunk],
            )
            .unwrap();
        }
    }

    #[test]
    fn courses_come_back_whole() {
        let store = test_store();
        seed(&store);
        let mut rows = store
            .course_departures_in_chunk(pack(4, 1, 1), &[])
            .unwrap();
        rows.sort_by(|a, b| (a.course_id.clone(), a.stop_id).cmp(&(b.course_id.clone(), b.stop_id)));
        // C1 contributes both of its rows even though only one lies in the
        // queried chunk.
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].course_id, "C1");
        assert_eq!(rows[0].stop_id, 1);
        assert_eq!(rows[1].course_id, "C1");
        assert_eq!(rows[1].stop_id, 2);
        assert_eq!(rows[2].course_id, "C2");
        assert_eq!(rows[2].variant_id, "V1");
        assert_eq!(rows[2].departure_minute, 200);
    }

    #[test]
    fn excluded_chunks_subtract_whole_courses() {
        let store = test_store();
        seed(&store);
        // C1 also touches chunk (4, 2, 1), so excluding it removes C1 here.
        let rows = store
            .course_departures_in_chunk(pack(4, 1, 1), &[pack(4, 2, 1)])
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].course_id, "C2");
        let rows = store
            .course_departures_in_chunk(pack(4, 2, 1), &[pack(4, 1, 1)])
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn neighbours_filter_by_spatial_cell() {
        let store = test_store();
        seed(&store);
        let rows = store.walk_neighbours_in_cell(4, 1).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].stop_id, 1);
        assert_eq!(rows[0].neighbour_id, 2);
        assert_eq!(rows[0].distance, 150.0);
        let rows = store.walk_neighbours_in_cell(4, 2).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].stop_id, 2);
        assert!(store.walk_neighbours_in_cell(30, 30).unwrap().is_empty());
    }

    #[test]
    fn variant_stops_respect_the_stored_sequence() {
        let store = test_store();
        seed(&store);
        assert_eq!(store.variant_stops("V1").unwrap(), vec![1, 2]);
        assert!(store.variant_stops("V9").unwrap().is_empty());
    }

    #[test]
    fn stop_lookups() {
        let store = test_store();
        seed(&store);
        let stop = store.stop_by_id(1).unwrap();
        assert_eq!(stop.complex_name, "Alpha");
        assert_eq!(stop.latitude, Some(52.0));
        let ghost = store.stop_by_id(9).unwrap();
        assert!(!ghost.has_location());
        assert_eq!(store.all_stops().unwrap().len(), 3);
        assert!(store.stop_by_id(404).is_err());
    }
}
