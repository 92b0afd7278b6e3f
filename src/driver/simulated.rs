//! Simulated drivers.
//!
//! These exist so the daemon can run on hosts without phone hardware. Each
//! driver produces a smooth synthetic signal shaped like its real
//! counterpart.

use super::{DriverError, DriverFactory, SensorDriver};
use crate::channel::{ChannelKind, Fields, SubSensor};
use crate::config::SensorConfig;
use crate::rate::SamplingPlan;
use serde_json::json;

/// Factory producing [`SimulatedDriver`]s for the configured sub-sensors.
#[derive(Debug, Clone, Default)]
pub struct SimulatedFactory {
    sensors: SensorConfig,
}

impl SimulatedFactory {
    pub fn new(sensors: SensorConfig) -> Self {
        Self { sensors }
    }
}

impl DriverFactory for SimulatedFactory {
    fn sensors_for(&self, kind: ChannelKind) -> Vec<SubSensor> {
        self.sensors.sensors_for(kind)
    }

    fn create(&self, sensor: SubSensor) -> Result<Box<dyn SensorDriver>, DriverError> {
        if !self.sensors.allows(sensor) {
            return Err(DriverError::Unavailable(sensor));
        }
        Ok(Box::new(SimulatedDriver::new(sensor)))
    }
}

/// A driver that synthesizes readings.
#[derive(Debug)]
pub struct SimulatedDriver {
    sensor: SubSensor,
    running: bool,
    ticks: u64,
    min_distance: f32,
    last_fix: Option<(f64, f64)>,
}

impl SimulatedDriver {
    pub fn new(sensor: SubSensor) -> Self {
        Self {
            sensor,
            running: false,
            ticks: 0,
            min_distance: 0.0,
            last_fix: None,
        }
    }

    fn phase(&self) -> f64 {
        self.ticks as f64 / 10.0
    }

    fn synthesize(&mut self) -> Option<Fields> {
        let t = self.phase();
        let value = match self.sensor {
            SubSensor::CallState => json!({ "state": "idle", "service": "in service" }),
            SubSensor::Proximity => json!({ "distance": if self.ticks % 20 < 2 { 0.0 } else { 5.0 } }),
            SubSensor::Battery => json!({
                "level": 100 - (self.ticks % 100),
                "status": "discharging",
            }),
            SubSensor::Pressure => json!({ "newton": 1013.25 + 2.0 * t.sin() }),
            SubSensor::PhoneActivity => json!({ "screen": if self.ticks % 30 < 20 { "on" } else { "off" } }),
            SubSensor::Location => return self.next_fix(t),
            SubSensor::Motion => json!({
                "x-axis": 0.3 * t.sin(),
                "y-axis": 0.3 * t.cos(),
                "z-axis": 9.81 + 0.1 * (2.0 * t).sin(),
            }),
            SubSensor::Noise => json!({ "db": 40.0 + 10.0 * (t / 3.0).sin().abs() }),
            SubSensor::Light => json!({ "lux": 300.0 + 250.0 * (t / 7.0).sin() }),
            SubSensor::EnvironmentScan => json!({ "bluetooth_devices": self.ticks % 5, "wifi_networks": 3 }),
            SubSensor::BioHarness => json!({
                "heart_rate": 70.0 + 5.0 * t.sin(),
                "respiration": 14.0 + t.cos(),
            }),
            SubSensor::Hxm => json!({ "heart_rate": 72.0 + 4.0 * t.cos() }),
        };

        match value {
            serde_json::Value::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Walk slowly around a fixed point and honour the minimum distance.
    fn next_fix(&mut self, t: f64) -> Option<Fields> {
        let latitude = 51.9225 + 0.001 * t.sin();
        let longitude = 4.4792 + 0.001 * t.cos();

        if let Some((lat, lon)) = self.last_fix {
            // ~111 km per degree is plenty for a simulation.
            let moved = ((latitude - lat).powi(2) + (longitude - lon).powi(2)).sqrt() * 111_000.0;
            if moved < f64::from(self.min_distance) {
                return None;
            }
        }
        self.last_fix = Some((latitude, longitude));

        match json!({ "latitude": latitude, "longitude": longitude, "accuracy": 12.0 }) {
            serde_json::Value::Object(map) => Some(map),
            _ => None,
        }
    }
}

impl SensorDriver for SimulatedDriver {
    fn sensor(&self) -> SubSensor {
        self.sensor
    }

    fn start(&mut self, plan: &SamplingPlan) -> Result<(), DriverError> {
        self.min_distance = plan.min_distance_meters.unwrap_or(0.0);
        self.last_fix = None;
        self.running = true;
        Ok(())
    }

    fn sample(&mut self) -> Result<Option<Fields>, DriverError> {
        if !self.running {
            return Err(DriverError::Read {
                sensor: self.sensor,
                reason: "driver is not started".to_string(),
            });
        }
        self.ticks += 1;
        Ok(self.synthesize())
    }

    fn stop(&mut self) {
        self.running = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_sensor_produces_fields() {
        let factory = SimulatedFactory::new(SensorConfig::from_csv("all"));
        for kind in ChannelKind::ALL {
            for sensor in factory.sensors_for(kind) {
                let mut driver = factory.create(sensor).unwrap();
                driver.start(&SamplingPlan::every(1_000)).unwrap();
                let fields = driver.sample().unwrap();
                assert!(fields.is_some_and(|f| !f.is_empty()), "{sensor} produced nothing");
                driver.stop();
            }
        }
    }

    #[test]
    fn test_disabled_sensor_is_unavailable() {
        let factory = SimulatedFactory::default();
        assert!(matches!(
            factory.create(SubSensor::Hxm),
            Err(DriverError::Unavailable(SubSensor::Hxm))
        ));
        assert!(factory.create(SubSensor::Light).is_ok());
    }

    #[test]
    fn test_sampling_requires_start() {
        let mut driver = SimulatedDriver::new(SubSensor::Battery);
        assert!(driver.sample().is_err());
        driver.start(&SamplingPlan::every(1_000)).unwrap();
        assert!(driver.sample().is_ok());
        driver.stop();
        driver.stop();
        assert!(driver.sample().is_err());
    }

    #[test]
    fn test_location_respects_min_distance() {
        let mut driver = SimulatedDriver::new(SubSensor::Location);
        driver
            .start(&SamplingPlan::every(1_000).with_min_distance(10_000.0))
            .unwrap();
        assert!(driver.sample().unwrap().is_some());
        // The simulated walk never strays 10 km from its first fix.
        for _ in 0..20 {
            assert!(driver.sample().unwrap().is_none());
        }
    }
}
