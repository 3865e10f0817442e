//! Shared state between the acquisition task and the FastCGI handlers.
//!
//! `SensorStore` owns two aligned [`ReadingBuffer`]s (values and millisecond
//! timestamps), the last reading, the nominal sample rate and any pending
//! override. It is wrapped in [`SharedStore`] so the sampling task can write while
//! request handlers take consistent snapshots.

use crate::data::ring_buffer::ReadingBuffer;
use crate::error::AppResult;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Store handle shared across tasks.
pub type SharedStore = Arc<RwLock<SensorStore>>;

/// Pending "force the next N samples" override.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForcedValue {
    /// Value reported instead of the measurement
    pub value: f32,
    /// Number of samples still to replace
    pub remaining: u32,
}

/// JSON document returned for `GET`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Unix time in seconds when the snapshot was taken
    pub epoch: i64,
    /// Nominal sampling rate in Hz
    pub fs: f32,
    /// Most recent reading, `null` before the first sample
    #[serde(rename = "lastvalue")]
    pub last_value: Option<f32>,
    /// Buffered readings, oldest first
    pub values: Vec<f32>,
    /// Unix time in milliseconds for each entry of `values`
    pub time: Vec<i64>,
    /// Driver name
    pub sensor: String,
    /// Physical unit of `values`
    pub unit: String,
    /// Copy of `values` for temperature sensors, the key older front-ends read
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<Vec<f32>>,
}

/// Recent readings plus override state.
#[derive(Debug)]
pub struct SensorStore {
    values: ReadingBuffer<f32>,
    timestamps: ReadingBuffer<i64>,
    last_value: Option<f32>,
    sample_rate_hz: f32,
    forced: Option<ForcedValue>,
    sample_count: u64,
    sensor: String,
    unit: String,
}

impl SensorStore {
    /// Create a store keeping `capacity` readings.
    pub fn new(capacity: usize, sample_rate_hz: f32) -> AppResult<Self> {
        Ok(Self {
            values: ReadingBuffer::new(capacity)?,
            timestamps: ReadingBuffer::new(capacity)?,
            last_value: None,
            sample_rate_hz,
            forced: None,
            sample_count: 0,
            sensor: String::new(),
            unit: String::new(),
        })
    }

    /// Attach driver name and unit for the JSON output.
    pub fn with_sensor(mut self, sensor: impl Into<String>, unit: impl Into<String>) -> Self {
        self.sensor = sensor.into();
        self.unit = unit.into();
        self
    }

    /// Wrap the store for sharing between tasks.
    pub fn into_shared(self) -> SharedStore {
        Arc::new(RwLock::new(self))
    }

    /// Record a sample taken now. Returns the value actually stored.
    pub fn record(&mut self, sample: f32) -> f32 {
        self.record_at(sample, Utc::now().timestamp_millis())
    }

    /// Record a sample with an explicit millisecond timestamp.
    ///
    /// A pending [`ForcedValue`] replaces the sample and counts down.
    pub fn record_at(&mut self, sample: f32, timestamp_ms: i64) -> f32 {
        let value = match self.forced.as_mut() {
            Some(forced) if forced.remaining > 0 => {
                forced.remaining -= 1;
                forced.value
            }
            _ => sample,
        };
        if matches!(self.forced, Some(f) if f.remaining == 0) {
            self.forced = None;
        }

        self.values.push(value);
        self.timestamps.push(timestamp_ms);
        self.last_value = Some(value);
        self.sample_count += 1;
        value
    }

    /// Overwrite every buffered value with `value`.
    pub fn force_buffer(&mut self, value: f32) {
        self.values.fill(value);
        if self.last_value.is_some() {
            self.last_value = Some(value);
        }
    }

    /// Report `value` for the next `steps` samples. `steps == 0` cancels an override.
    pub fn force_next(&mut self, value: f32, steps: u32) {
        self.forced = (steps > 0).then_some(ForcedValue {
            value,
            remaining: steps,
        });
    }

    /// Pending override, if any.
    pub fn forced(&self) -> Option<ForcedValue> {
        self.forced
    }

    /// Nominal sample rate in Hz.
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate_hz
    }

    /// Most recent stored value.
    pub fn last_value(&self) -> Option<f32> {
        self.last_value
    }

    /// Total number of samples recorded since start.
    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    /// Number of buffered readings.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True before the first sample.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Maximum number of buffered readings.
    pub fn capacity(&self) -> usize {
        self.values.capacity()
    }

    /// Consistent copy of the store for serialization.
    pub fn snapshot(&self) -> Snapshot {
        let values = self.values.to_vec();
        Snapshot {
            epoch: Utc::now().timestamp(),
            fs: self.sample_rate_hz,
            last_value: self.last_value,
            temperature: (self.unit == "C").then(|| values.clone()),
            values,
            time: self.timestamps.to_vec(),
            sensor: self.sensor.clone(),
            unit: self.unit.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_keeps_buffers_aligned() {
        let mut store = SensorStore::new(3, 10.0).unwrap();
        for i in 0..5 {
            store.record_at(i as f32, 1000 + i);
        }

        let snap = store.snapshot();
        assert_eq!(snap.values, vec![2.0, 3.0, 4.0]);
        assert_eq!(snap.time, vec![1002, 1003, 1004]);
        assert_eq!(snap.last_value, Some(4.0));
        assert_eq!(store.sample_count(), 5);
        assert_eq!(store.len(), store.capacity());
    }

    #[test]
    fn test_force_next_counts_down() {
        let mut store = SensorStore::new(10, 1.0).unwrap();
        store.force_next(20.0, 2);

        assert_eq!(store.record_at(1.0, 0), 20.0);
        assert_eq!(store.forced().map(|f| f.remaining), Some(1));
        assert_eq!(store.record_at(2.0, 1), 20.0);
        assert_eq!(store.forced(), None);
        assert_eq!(store.record_at(3.0, 2), 3.0);

        assert_eq!(store.snapshot().values, vec![20.0, 20.0, 3.0]);
    }

    #[test]
    fn test_force_next_zero_cancels() {
        let mut store = SensorStore::new(10, 1.0).unwrap();
        store.force_next(20.0, 5);
        store.force_next(0.0, 0);
        assert_eq!(store.forced(), None);
        assert_eq!(store.record_at(1.5, 0), 1.5);
    }

    #[test]
    fn test_force_buffer_overwrites_values_only() {
        let mut store = SensorStore::new(4, 8.0).unwrap();
        store.record_at(1.0, 10);
        store.record_at(2.0, 20);
        store.force_buffer(0.5);

        let snap = store.snapshot();
        assert_eq!(snap.values, vec![0.5, 0.5]);
        assert_eq!(snap.time, vec![10, 20]);
        assert_eq!(snap.last_value, Some(0.5));

        // subsequent samples are real again
        store.record_at(3.0, 30);
        assert_eq!(store.snapshot().values, vec![0.5, 0.5, 3.0]);
    }

    #[test]
    fn test_snapshot_json_shape() {
        let mut store = SensorStore::new(2, 8.0)
            .unwrap()
            .with_sensor("iio", "mV");
        store.record_at(1.25, 1_700_000_000_000);

        let json = serde_json::to_value(store.snapshot()).unwrap();
        assert!(json["epoch"].is_i64());
        assert_eq!(json["fs"], 8.0);
        assert_eq!(json["lastvalue"], 1.25);
        assert_eq!(json["values"][0], 1.25);
        assert_eq!(json["time"][0], 1_700_000_000_000i64);
        assert_eq!(json["sensor"], "iio");
        assert_eq!(json["unit"], "mV");
        assert!(json.get("temperature").is_none());
    }

    #[test]
    fn test_temperature_key_for_celsius_sensors() {
        let mut store = SensorStore::new(2, 0.1)
            .unwrap()
            .with_sensor("ds18b20", "C");
        store.record_at(21.5, 1);

        let json = serde_json::to_value(store.snapshot()).unwrap();
        assert_eq!(json["temperature"], serde_json::json!([21.5]));
        assert_eq!(json["values"], json["temperature"]);
    }

    #[test]
    fn test_empty_snapshot_has_null_lastvalue() {
        let store = SensorStore::new(2, 1.0).unwrap();
        let json = serde_json::to_value(store.snapshot()).unwrap();
        assert!(json["lastvalue"].is_null());
        assert_eq!(json["values"].as_array().map(Vec::len), Some(0));
    }

    #[tokio::test]
    async fn test_shared_store_access() {
        let shared = SensorStore::new(5, 1.0).unwrap().into_shared();
        shared.write().await.record(42.0);
        assert_eq!(shared.read().await.last_value(), Some(42.0));
    }
}
