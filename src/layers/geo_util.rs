use std::num::NonZeroUsize;
use std::sync::{Mutex, OnceLock};

use geo_types::Point;
use lru::LruCache;

pub const LATITUDE_DEGREE_METERS: f64 = 110574.0;
pub const LONGITUDE_DEGREE_METERS: f64 = 111320.0;

pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

const DISTANCE_CACHE_ENTRIES: usize = 2000;

/// Cache key is the raw bit pattern of both coordinates, so only
/// bit-identical point pairs share an entry.
type PairKey = [u64; 4];

fn distance_cache() -> &'static Mutex<LruCache<PairKey, f64>> {
    static CACHE: OnceLock<Mutex<LruCache<PairKey, f64>>> = OnceLock::new();
    CACHE.get_or_init(|| {
        Mutex::new(LruCache::new(
            NonZeroUsize::new(DISTANCE_CACHE_ENTRIES).unwrap(),
        ))
    })
}

/// Ground distance between two points, in meters.
///
/// # Parameters
/// - `a`: first point (x = longitude, y = latitude, in degrees)
/// - `b`: second point
///
/// # Returns
/// Great-circle distance on the spherical Earth approximation. Identical
/// points are exactly 0.
pub fn ground_distance(a: Point<f64>, b: Point<f64>) -> f64 {
    if a == b {
        return 0.0;
    }
    let key: PairKey = [
        a.y().to_bits(),
        a.x().to_bits(),
        b.y().to_bits(),
        b.x().to_bits(),
    ];
    let mut cache = distance_cache().lock().unwrap();
    if let Some(&distance) = cache.get(&key) {
        return distance;
    }
    let distance = great_circle(a, b);
    cache.put(key, distance);
    distance
}

fn great_circle(a: Point<f64>, b: Point<f64>) -> f64 {
    let (lat_a, lng_a) = (a.y().to_radians(), a.x().to_radians());
    let (lat_b, lng_b) = (b.y().to_radians(), b.x().to_radians());
    // Spherical law of cosines; the dot product can drift just past 1.0.
    let cos_angle =
        lat_a.sin() * lat_b.sin() + lat_a.cos() * lat_b.cos() * (lng_b - lng_a).cos();
    EARTH_RADIUS_METERS * cos_angle.clamp(-1.0, 1.0).acos()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equator_to_pole_is_a_quarter_circle() {
        let equator = Point::new(0.0, 0.0);
        let pole = Point::new(0.0, 90.0);
        let expected = EARTH_RADIUS_METERS * std::f64::consts::FRAC_PI_2;
        assert!((ground_distance(equator, pole) - expected).abs() < 1e-6);
    }

    #[test]
    fn known_shoreline_distance() {
        let a = Point::new(18.548508112507978, 54.51907482244072);
        let b = Point::new(18.43647339400119, 54.49382215753887);
        let distance = ground_distance(a, b);
        assert!((distance - 7.76e3).abs() / 7.76e3 < 0.002);
    }

    #[test]
    fn identical_points_are_exactly_zero() {
        let p = Point::new(10.0, 10.0);
        assert_eq!(ground_distance(p, p), 0.0);
    }

    #[test]
    fn symmetric_and_bounded_by_half_the_sphere() {
        let a = Point::new(20.9, 52.2);
        let b = Point::new(21.0, 52.3);
        assert_eq!(ground_distance(a, b), ground_distance(b, a));
        assert!(ground_distance(a, b) <= EARTH_RADIUS_METERS * std::f64::consts::PI);
    }

    #[test]
    fn repeated_lookups_hit_the_cache() {
        let a = Point::new(20.0, 51.5);
        let b = Point::new(20.1, 51.6);
        let first = ground_distance(a, b);
        let second = ground_distance(a, b);
        assert_eq!(first, second);
    }
}
