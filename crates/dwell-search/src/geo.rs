//! Distance math and place-name resolution.

use crate::types::{GeoPoint, Location};

const EARTH_RADIUS_KM: f64 = 6371.0;

/// City centres used to resolve a place name to coordinates.
/// Aliases map to the same point.
const GAZETTEER: &[(&str, f64, f64)] = &[
    ("mumbai", 19.0760, 72.8777),
    ("bombay", 19.0760, 72.8777),
    ("navi mumbai", 19.0330, 73.0297),
    ("thane", 19.2183, 72.9781),
    ("delhi", 28.6139, 77.2090),
    ("new delhi", 28.6139, 77.2090),
    ("gurgaon", 28.4595, 77.0266),
    ("gurugram", 28.4595, 77.0266),
    ("noida", 28.5355, 77.3910),
    ("bangalore", 12.9716, 77.5946),
    ("bengaluru", 12.9716, 77.5946),
    ("hyderabad", 17.3850, 78.4867),
    ("chennai", 13.0827, 80.2707),
    ("madras", 13.0827, 80.2707),
    ("kolkata", 22.5726, 88.3639),
    ("calcutta", 22.5726, 88.3639),
    ("pune", 18.5204, 73.8567),
    ("ahmedabad", 23.0225, 72.5714),
    ("jaipur", 26.9124, 75.7873),
    ("chandigarh", 30.7333, 76.7794),
    ("kochi", 9.9312, 76.2673),
    ("indore", 22.7196, 75.8577),
    ("lucknow", 26.8467, 80.9462),
];

/// Great-circle distance in kilometres.
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

/// Closer listings score higher; 0 km scores 1.0.
pub fn proximity_score(distance_km: f64) -> f64 {
    1.0 / (1.0 + distance_km.max(0.0))
}

/// Look up a city by name, case-insensitively. Also matches when the name
/// contains a known city, e.g. "Koramangala, Bangalore".
pub fn lookup_place(name: &str) -> Option<GeoPoint> {
    let needle = name.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }
    if let Some((_, lat, lon)) = GAZETTEER.iter().find(|(city, _, _)| *city == needle) {
        return Some(GeoPoint::new(*lat, *lon));
    }
    // Longest alias first so "navi mumbai" beats "mumbai".
    let mut matches: Vec<_> = GAZETTEER
        .iter()
        .filter(|(city, _, _)| {
            needle
                .split(|c: char| !c.is_alphanumeric() && c != ' ')
                .any(|part| part.trim() == *city)
                || needle.split_whitespace().any(|word| word == *city)
        })
        .collect();
    matches.sort_by_key(|(city, _, _)| std::cmp::Reverse(city.len()));
    matches
        .first()
        .map(|(_, lat, lon)| GeoPoint::new(*lat, *lon))
}

/// Canonical city name for a place, if it names a known city.
pub fn canonical_city(name: &str) -> Option<&'static str> {
    let point = lookup_place(name)?;
    GAZETTEER
        .iter()
        .find(|(_, lat, lon)| *lat == point.lat && *lon == point.lon)
        .map(|(city, _, _)| *city)
}

/// Whether two place names denote the same city, e.g. "Gurugram" and
/// "gurgaon". Unknown names fall back to a case-insensitive comparison.
pub fn same_city(a: &str, b: &str) -> bool {
    match (canonical_city(a), canonical_city(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a.trim().eq_ignore_ascii_case(b.trim()),
    }
}

/// Every gazetteer spelling of the city `name` names, canonical first.
/// An unknown name yields itself, lowercased.
pub fn city_aliases(name: &str) -> Vec<String> {
    let Some(point) = lookup_place(name) else {
        return vec![name.trim().to_lowercase()];
    };
    GAZETTEER
        .iter()
        .filter(|(_, lat, lon)| *lat == point.lat && *lon == point.lon)
        .map(|(city, _, _)| city.to_string())
        .collect()
}

/// Coordinates for a location, when they can be resolved.
pub fn resolve(location: &Location) -> Option<GeoPoint> {
    match location {
        Location::Point(point) if point.is_valid() => Some(*point),
        Location::Point(_) => None,
        Location::Place(name) => lookup_place(name),
    }
}
