use geo_types::Point;

use super::timetable::Seconds;

pub const SPACE_CHUNK_COUNT: u16 = 32;
pub const TIME_CHUNK_COUNT: u16 = 32;

/// Grid anchor and spans covering the service area.
pub const GRID_ORIGIN_LAT: f64 = 51.921869;
pub const GRID_ORIGIN_LNG: f64 = 20.462591;
pub const GRID_SPAN_LAT: f64 = 0.561141;
pub const GRID_SPAN_LNG: f64 = 1.001192;

/// The vendor timetable places all departures on a 0..1777 minute timeline.
pub const TIMETABLE_HORIZON_MINUTES: f64 = 1777.0;

/// 15-bit space-time cell id: `lat_chunk << 10 | lng_chunk << 5 | time_chunk`,
/// each field in 0..32.
pub type ChunkId = u16;

pub fn pack(lat_chunk: u16, lng_chunk: u16, time_chunk: u16) -> ChunkId {
    lat_chunk << 10 | lng_chunk << 5 | time_chunk
}

pub fn unpack(chunk: ChunkId) -> (u16, u16, u16) {
    (chunk >> 10, (chunk >> 5) & 0b11111, chunk & 0b11111)
}

/// The chunk containing `location` at `time`. Coordinates outside the grid
/// clamp to the border cells so the id always stays within 15 bits.
pub fn chunk_of(location: Point<f64>, time: Seconds) -> ChunkId {
    let lat_chunk = axis_chunk(
        (location.y() - GRID_ORIGIN_LAT) / GRID_SPAN_LAT,
        SPACE_CHUNK_COUNT,
    );
    let lng_chunk = axis_chunk(
        (location.x() - GRID_ORIGIN_LNG) / GRID_SPAN_LNG,
        SPACE_CHUNK_COUNT,
    );
    let time_chunk = axis_chunk(time / 60.0 / TIMETABLE_HORIZON_MINUTES, TIME_CHUNK_COUNT);
    pack(lat_chunk, lng_chunk, time_chunk)
}

fn axis_chunk(fraction: f64, count: u16) -> u16 {
    (fraction * count as f64)
        .floor()
        .clamp(0.0, (count - 1) as f64) as u16
}

/// Advance the time slice, wrapping modulo 32 within the same spatial cell.
pub fn next_chronological(chunk: ChunkId) -> ChunkId {
    (chunk & !0b11111) | ((chunk + 1) & 0b11111)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_round_trips_the_whole_domain() {
        for lat_chunk in 0..SPACE_CHUNK_COUNT {
            for lng_chunk in 0..SPACE_CHUNK_COUNT {
                for time_chunk in 0..TIME_CHUNK_COUNT {
                    let chunk = pack(lat_chunk, lng_chunk, time_chunk);
                    assert_eq!(unpack(chunk), (lat_chunk, lng_chunk, time_chunk));
                }
            }
        }
    }

    #[test]
    fn bit_layout_of_a_known_point() {
        // 15:00 is minute 900 of the timetable window.
        let chunk = chunk_of(Point::new(20.5, 52.0), 15.0 * 3600.0);
        let (lat_chunk, lng_chunk, time_chunk) = unpack(chunk);
        assert_eq!(lat_chunk, 4);
        assert_eq!(lng_chunk, 1);
        assert_eq!(time_chunk, (900.0 / TIMETABLE_HORIZON_MINUTES * 32.0) as u16);
        assert_eq!(chunk, pack(4, 1, time_chunk));
    }

    #[test]
    fn next_chronological_only_touches_the_time_bits() {
        assert_eq!(next_chronological(pack(4, 1, 16)), pack(4, 1, 17));
        assert_eq!(next_chronological(pack(4, 1, 31)), pack(4, 1, 0));
        assert_eq!(next_chronological(pack(0, 0, 31)), pack(0, 0, 0));
    }

    #[test]
    fn coordinates_off_the_grid_clamp_to_border_cells() {
        let far_south_west = chunk_of(Point::new(0.0, 0.0), 0.0);
        assert_eq!(unpack(far_south_west), (0, 0, 0));
        let far_north_east = chunk_of(Point::new(179.0, 89.0), 48.0 * 3600.0);
        assert_eq!(unpack(far_north_east), (31, 31, 31));
    }
}
