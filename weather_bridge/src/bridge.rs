use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::info;

/// Raw connection queries can flicker under load; status is cached for this
/// window before the underlying bridge is asked again.
const CONNECTION_CACHE_WINDOW: Duration = Duration::from_secs(5);

/// Aircraft pose as delivered by the simulator bridge. The bridge hides all
/// offset bit-packing; this is plain engineering units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AircraftState {
    pub lat: f64,
    pub lon: f64,
    pub alt_ft: f64,
    pub gs_kt: f64,
    pub vs_fpm: f64,
    pub heading_deg: f64,
    pub on_ground: bool,
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("simulator bridge is not connected")]
    Disconnected,
    #[error("simulator bridge rejected the write: {0}")]
    WriteRejected(String),
}

/// Capability set of a simulator attachment: pose reads and METAR writes.
/// `write_metars` is the preferred batched form; bridges that lack it leave
/// `supports_multi_write` false and the controller paces single writes.
pub trait SimulatorBridge: Send {
    fn is_connected(&mut self) -> bool;
    fn reconnect(&mut self) -> bool;
    fn aircraft_state(&mut self) -> Option<AircraftState>;
    fn write_metar(&mut self, metar: &str) -> Result<(), BridgeError>;

    fn supports_multi_write(&self) -> bool {
        false
    }

    fn write_metars(&mut self, metars: &[String]) -> Result<(), BridgeError> {
        for metar in metars {
            self.write_metar(metar)?;
        }
        Ok(())
    }
}

/// Development sink: a fixed pose aloft near the default station set, and
/// METAR writes that only land in the log.
pub struct DevBridge {
    connected: bool,
    state: AircraftState,
    writes: Vec<String>,
}

impl DevBridge {
    pub fn new() -> Self {
        Self {
            connected: true,
            state: AircraftState {
                lat: 40.6398,
                lon: -73.7789,
                alt_ft: 5000.0,
                gs_kt: 250.0,
                vs_fpm: 0.0,
                heading_deg: 90.0,
                on_ground: false,
            },
            writes: Vec::new(),
        }
    }

    #[allow(dead_code)] // used in tests
    pub fn written(&self) -> &[String] {
        &self.writes
    }
}

impl Default for DevBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatorBridge for DevBridge {
    fn is_connected(&mut self) -> bool {
        self.connected
    }

    fn reconnect(&mut self) -> bool {
        self.connected = true;
        true
    }

    fn aircraft_state(&mut self) -> Option<AircraftState> {
        self.connected.then_some(self.state)
    }

    fn write_metar(&mut self, metar: &str) -> Result<(), BridgeError> {
        info!(%metar, "DEV bridge write");
        self.writes.push(metar.to_string());
        Ok(())
    }
}

/// Placeholder attachment when no simulator bridge is configured: always
/// disconnected, so the engine runs its degraded paths.
pub struct OfflineBridge;

impl SimulatorBridge for OfflineBridge {
    fn is_connected(&mut self) -> bool {
        false
    }

    fn reconnect(&mut self) -> bool {
        false
    }

    fn aircraft_state(&mut self) -> Option<AircraftState> {
        None
    }

    fn write_metar(&mut self, _metar: &str) -> Result<(), BridgeError> {
        Err(BridgeError::Disconnected)
    }
}

/// The engine's one bridge handle, adding the debounced connection cache on
/// top of whatever attachment is configured.
pub struct BridgeHandle {
    inner: Box<dyn SimulatorBridge>,
    cached_connected: Option<(bool, Instant)>,
}

impl BridgeHandle {
    pub fn new(inner: Box<dyn SimulatorBridge>) -> Self {
        Self {
            inner,
            cached_connected: None,
        }
    }

    pub fn is_connected(&mut self) -> bool {
        if let Some((status, queried_at)) = self.cached_connected
            && queried_at.elapsed() < CONNECTION_CACHE_WINDOW
        {
            return status;
        }
        let status = self.inner.is_connected();
        self.cached_connected = Some((status, Instant::now()));
        status
    }

    pub fn reconnect(&mut self) -> bool {
        let connected = self.inner.reconnect();
        self.cached_connected = Some((connected, Instant::now()));
        connected
    }

    pub fn aircraft_state(&mut self) -> Option<AircraftState> {
        self.inner.aircraft_state()
    }

    pub fn write_metar(&mut self, metar: &str) -> Result<(), BridgeError> {
        self.inner.write_metar(metar)
    }

    pub fn supports_multi_write(&self) -> bool {
        self.inner.supports_multi_write()
    }

    pub fn write_metars(&mut self, metars: &[String]) -> Result<(), BridgeError> {
        self.inner.write_metars(metars)
    }
}
