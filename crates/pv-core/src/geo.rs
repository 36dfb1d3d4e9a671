//! Straight-line Haversine distance between caller-supplied coordinates.

use crate::GeoPoint;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two points, in meters.
pub fn haversine_distance_m(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat_a = a.lat.to_radians();
    let lat_b = b.lat.to_radians();
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_distance_for_identical_points() {
        let p = GeoPoint::new(52.5200, 13.4050);
        assert_eq!(haversine_distance_m(&p, &p), 0.0);
    }

    #[test]
    fn known_city_pair() {
        // Berlin -> Hamburg, roughly 255 km as the crow flies.
        let berlin = GeoPoint::new(52.5200, 13.4050);
        let hamburg = GeoPoint::new(53.5511, 9.9937);
        let d = haversine_distance_m(&berlin, &hamburg);
        assert!((250_000.0..260_000.0).contains(&d), "got {d}");
    }

    #[test]
    fn short_distance_is_meter_scale() {
        // Two points ~111m apart along a meridian (0.001 deg latitude).
        let a = GeoPoint::new(48.0, 11.0);
        let b = GeoPoint::new(48.001, 11.0);
        let d = haversine_distance_m(&a, &b);
        assert!((100.0..125.0).contains(&d), "got {d}");
    }

    #[test]
    fn symmetric() {
        let a = GeoPoint::new(40.7128, -74.0060);
        let b = GeoPoint::new(34.0522, -118.2437);
        let ab = haversine_distance_m(&a, &b);
        let ba = haversine_distance_m(&b, &a);
        assert!((ab - ba).abs() < 1e-6);
    }
}
