//! 球面距离计算

use shared::types::GeoPoint;

/// 地球半径 (km)，球面模型
const EARTH_RADIUS_KM: f64 = 6371.0;

/// 两坐标间的 haversine 大圆距离 (km)
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lon1) = (a.lat.to_radians(), a.lng.to_radians());
    let (lat2, lon2) = (b.lat.to_radians(), b.lng.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let sin_dlat = (dlat * 0.5).sin();
    let sin_dlon = (dlon * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_distance() {
        let p = GeoPoint::new(12.9, 77.6);
        assert!(haversine_km(p, p) < 1e-9);
    }

    #[test]
    fn test_known_short_distance() {
        // 班加罗尔市区两点，约 0.64 km
        let a = GeoPoint::new(12.90, 77.60);
        let b = GeoPoint::new(12.905, 77.605);
        let d = haversine_km(a, b);
        assert!(d > 0.5 && d < 0.8, "expected ~0.64 km, got {}", d);
    }

    #[test]
    fn test_known_long_distance() {
        // 班加罗尔 → 金奈，约 290 km
        let blr = GeoPoint::new(12.9716, 77.5946);
        let maa = GeoPoint::new(13.0827, 80.2707);
        let d = haversine_km(blr, maa);
        assert!(d > 280.0 && d < 300.0, "expected ~290 km, got {}", d);
    }

    #[test]
    fn test_symmetry() {
        let a = GeoPoint::new(12.90, 77.60);
        let b = GeoPoint::new(12.95, 77.65);
        assert!((haversine_km(a, b) - haversine_km(b, a)).abs() < 1e-12);
    }
}
