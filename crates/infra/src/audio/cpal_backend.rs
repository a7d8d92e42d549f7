//! CPAL-based audio device implementation
//!
//! Provides a cross-platform interface to output devices using the CPAL
//! library. The engine only plays back, so input devices are not surfaced.

use cpal::traits::{DeviceTrait, HostTrait};
use std::fmt;
use tandem_core::domain::audio::{
    AudioEnumerator, AudioError, DeviceId, DeviceInfo, Result, SampleRate,
};
use tracing::{debug, info, warn};

/// CPAL-based output device wrapper
pub struct CpalDevice {
    info: DeviceInfo,
    cpal_device: cpal::Device,
}

impl CpalDevice {
    pub fn new(cpal_device: cpal::Device) -> Result<Self> {
        let name = cpal_device
            .name()
            .unwrap_or_else(|_| "Unknown Device".to_string());

        let mut sample_rates = Vec::new();
        if let Ok(configs) = cpal_device.supported_output_configs() {
            for config in configs {
                let rate_hz = config.min_sample_rate();
                if !sample_rates.iter().any(|sr: &SampleRate| sr.hz() == rate_hz) {
                    sample_rates.push(SampleRate::from_hz(rate_hz));
                }
            }
        }
        sample_rates.sort_by_key(|sr| sr.hz());
        sample_rates.dedup_by_key(|sr| sr.hz());

        let default_sample_rate = cpal_device
            .default_output_config()
            .ok()
            .map(|config| SampleRate::from_hz(config.sample_rate()));

        // Use the device name as its ID
        let id = DeviceId::new(name.clone());

        let info = DeviceInfo {
            id,
            name,
            sample_rates,
            default_sample_rate,
        };

        debug!("Created device: {}", info.name);

        Ok(Self { info, cpal_device })
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn inner(&self) -> &cpal::Device {
        &self.cpal_device
    }
}

impl fmt::Debug for CpalDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpalDevice")
            .field("info", &self.info)
            .finish()
    }
}

/// CPAL-based output device enumerator
pub struct CpalEnumerator {
    host: cpal::Host,
}

impl Default for CpalEnumerator {
    fn default() -> Self {
        info!("Initializing CPAL enumerator");
        Self::new()
    }
}

impl CpalEnumerator {
    pub fn new() -> Self {
        let host = cpal::default_host();
        debug!("Using audio host: {:?}", host.id());
        Self { host }
    }

    /// Open a device handle by ID, or the default output when empty
    pub fn open_output(&self, id: &str) -> Result<CpalDevice> {
        if id.is_empty() {
            let device = self
                .host
                .default_output_device()
                .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string()))?;
            return CpalDevice::new(device);
        }

        let devices = self
            .host
            .output_devices()
            .map_err(|e| AudioError::OsError(e.to_string()))?;
        for device in devices {
            if device.name().as_deref() == Ok(id) {
                return CpalDevice::new(device);
            }
        }
        Err(AudioError::DeviceNotFound(id.to_string()))
    }
}

impl AudioEnumerator for CpalEnumerator {
    fn output_devices(&self) -> Result<Vec<DeviceInfo>> {
        info!("Enumerating output devices");
        let mut devices = Vec::new();

        let cpal_devices = self
            .host
            .output_devices()
            .map_err(|e| AudioError::OsError(e.to_string()))?;

        for device in cpal_devices {
            match CpalDevice::new(device) {
                Ok(cp_device) => {
                    debug!("Found device: {}", cp_device.info().name);
                    devices.push(cp_device.info().clone());
                }
                Err(e) => {
                    warn!("Skipping device due to error: {}", e);
                }
            }
        }

        info!("Found {} output devices", devices.len());
        Ok(devices)
    }

    fn default_output_device(&self) -> Result<DeviceInfo> {
        let cpal_device = self
            .host
            .default_output_device()
            .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string()))?;

        CpalDevice::new(cpal_device).map(|d| d.info().clone())
    }

    fn device_by_id(&self, id: &DeviceId) -> Result<DeviceInfo> {
        let devices = self.output_devices()?;
        devices
            .into_iter()
            .find(|d| d.id == *id)
            .ok_or_else(|| AudioError::DeviceNotFound(id.as_str().to_string()))
    }
}
