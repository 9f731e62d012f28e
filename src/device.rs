//! Device types, handles, and the lazy device registry.
//!
//! A `DeviceHandle` bundles the connection parameters for one managed device
//! plus whatever session state a capability attaches. Handles are created on
//! first use, cached per `(device_type, device_id)`, and closed during engine
//! teardown. Closing is best-effort: errors are logged and swallowed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::{Configuration, ConnectionConfig};
use crate::errors::EngineError;
use crate::logging::LogSet;

/// Device categories managed by the orchestrator.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Compute,
    Switch,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Compute => "compute",
            DeviceType::Switch => "switch",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "compute" => Some(DeviceType::Compute),
            "switch" => Some(DeviceType::Switch),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cached connection to one device instance.
///
/// Capabilities own their I/O; the handle carries the transport descriptor
/// they need to open sessions, and tracks whether it has been closed.
#[derive(Debug)]
pub struct DeviceHandle {
    pub device_type: DeviceType,
    pub device_id: String,
    pub connection: ConnectionConfig,
    closed: AtomicBool,
}

impl DeviceHandle {
    pub fn new(device_type: DeviceType, device_id: &str, connection: ConnectionConfig) -> Self {
        Self {
            device_type,
            device_id: device_id.to_string(),
            connection,
            closed: AtomicBool::new(false),
        }
    }

    /// Release any session state. Idempotent.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Lazy cache of device handles, keyed by `(device_type, device_id)`.
///
/// The lock protects only the map; handle construction is cheap (no I/O), so
/// it is done under the lock without a double-check dance.
pub struct DeviceRegistry {
    config: Arc<Configuration>,
    logs: Arc<LogSet>,
    handles: Mutex<BTreeMap<(DeviceType, String), Arc<DeviceHandle>>>,
}

impl DeviceRegistry {
    pub fn new(config: Arc<Configuration>, logs: Arc<LogSet>) -> Self {
        Self {
            config,
            logs,
            handles: Mutex::new(BTreeMap::new()),
        }
    }

    /// Get or create the handle for a device.
    ///
    /// The loader has already verified that every referenced device has a
    /// connection entry, so a miss here means the flow graph and the
    /// configuration went out of sync.
    pub fn get(
        &self,
        device_type: DeviceType,
        device_id: &str,
    ) -> Result<Arc<DeviceHandle>, EngineError> {
        let mut handles = self.handles.lock().expect("device registry lock poisoned");
        if let Some(handle) = handles.get(&(device_type, device_id.to_string())) {
            return Ok(Arc::clone(handle));
        }

        let connection = self
            .config
            .connection_for(device_type, device_id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownDevice {
                device_type: device_type.to_string(),
                device_id: device_id.to_string(),
            })?;

        let handle = Arc::new(DeviceHandle::new(device_type, device_id, connection));
        handles.insert((device_type, device_id.to_string()), Arc::clone(&handle));
        self.logs
            .engine
            .info(&format!("{device_id} - opened {device_type} device handle"));
        Ok(handle)
    }

    /// Devices touched so far, with their connection parameters. Used to
    /// build error-handler context.
    pub fn touched(&self) -> Vec<(DeviceType, String, ConnectionConfig)> {
        let handles = self.handles.lock().expect("device registry lock poisoned");
        handles
            .values()
            .map(|h| (h.device_type, h.device_id.clone(), h.connection.clone()))
            .collect()
    }

    /// Close every cached handle. Called from engine teardown on all exit
    /// paths; `Drop` repeats it as a backstop for panics.
    pub fn close_all(&self) {
        let handles = self.handles.lock().expect("device registry lock poisoned");
        for handle in handles.values() {
            if !handle.is_closed() {
                handle.close();
                self.logs.engine.info(&format!(
                    "{} - closed {} device handle",
                    handle.device_id, handle.device_type
                ));
            }
        }
    }
}

impl Drop for DeviceRegistry {
    fn drop(&mut self) {
        if let Ok(handles) = self.handles.lock() {
            for handle in handles.values() {
                handle.close();
            }
        }
    }
}
