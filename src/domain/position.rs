//! Latest position and heading, as supplied by the platform location provider.
//!
//! Updates are last-write-wins and independent of the link context. Readers
//! always get a copy.

use std::sync::{Arc, RwLock};
use std::time::SystemTime;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PositionSample {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Meters above sea level
    pub altitude: Option<f64>,
    /// Magnetic heading in degrees
    pub heading_degrees: Option<f64>,
    /// Time of the most recent update of any field
    pub timestamp: Option<SystemTime>,
}

/// What a position provider can report
#[derive(Debug, Clone, PartialEq)]
pub enum PositionUpdate {
    Location {
        latitude: f64,
        longitude: f64,
        altitude: f64,
    },
    Heading(f64),
    Failed(String),
}

#[derive(Debug, Clone, Default)]
pub struct PositionStore {
    sample: Arc<RwLock<PositionSample>>,
}

impl PositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_location(&self, latitude: f64, longitude: f64, altitude: f64) {
        debug!(latitude, longitude, altitude, "Location update");
        let mut sample = self.sample.write().unwrap_or_else(|e| e.into_inner());
        sample.latitude = Some(latitude);
        sample.longitude = Some(longitude);
        sample.altitude = Some(altitude);
        sample.timestamp = Some(SystemTime::now());
    }

    pub fn update_heading(&self, degrees: f64) {
        debug!(degrees, "Heading update");
        let mut sample = self.sample.write().unwrap_or_else(|e| e.into_inner());
        sample.heading_degrees = Some(degrees);
        sample.timestamp = Some(SystemTime::now());
    }

    pub fn apply(&self, update: PositionUpdate) {
        match update {
            PositionUpdate::Location {
                latitude,
                longitude,
                altitude,
            } => self.update_location(latitude, longitude, altitude),
            PositionUpdate::Heading(degrees) => self.update_heading(degrees),
            PositionUpdate::Failed(reason) => warn!("Location provider error: {}", reason),
        }
    }

    pub fn current_sample(&self) -> PositionSample {
        *self.sample.read().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_until_first_update() {
        let store = PositionStore::new();
        assert_eq!(store.current_sample(), PositionSample::default());
    }

    #[test]
    fn test_location_then_heading() {
        let store = PositionStore::new();
        store.update_location(10.0, 20.0, 5.0);
        store.update_heading(90.0);

        let sample = store.current_sample();
        assert_eq!(sample.latitude, Some(10.0));
        assert_eq!(sample.longitude, Some(20.0));
        assert_eq!(sample.altitude, Some(5.0));
        assert_eq!(sample.heading_degrees, Some(90.0));
        assert!(sample.timestamp.is_some());
    }

    #[test]
    fn test_updates_only_touch_their_fields() {
        let store = PositionStore::new();
        store.update_heading(45.0);
        store.update_location(1.0, 2.0, 3.0);
        store.update_location(4.0, 5.0, 6.0);

        let sample = store.current_sample();
        assert_eq!(sample.latitude, Some(4.0));
        assert_eq!(sample.heading_degrees, Some(45.0));
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let store = PositionStore::new();
        store.update_heading(10.0);
        let before = store.current_sample();
        store.update_heading(20.0);
        assert_eq!(before.heading_degrees, Some(10.0));
        assert_eq!(store.current_sample().heading_degrees, Some(20.0));
    }

    #[test]
    fn test_failure_leaves_sample_untouched() {
        let store = PositionStore::new();
        store.apply(PositionUpdate::Heading(180.0));
        let before = store.current_sample();
        store.apply(PositionUpdate::Failed("denied".to_string()));
        assert_eq!(store.current_sample(), before);
    }

    #[test]
    fn test_clones_share_the_sample() {
        let store = PositionStore::new();
        let provider_side = store.clone();
        provider_side.apply(PositionUpdate::Location {
            latitude: 41.7,
            longitude: -86.2,
            altitude: 220.0,
        });
        assert_eq!(store.current_sample().latitude, Some(41.7));
    }
}
