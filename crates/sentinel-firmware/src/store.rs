//! Flash-backed config store.
//!
//! Persists the postcard-encoded [`DeviceConfig`] in a dedicated flash
//! region, framed with a magic word and a length so a blank or torn region
//! reads back as "no config" instead of garbage.

use embedded_storage::{ReadStorage, Storage};
use esp_storage::FlashStorage;
use log::{info, warn};

use sentinel_core::capabilities::{ConfigStore, StoreError};
use sentinel_core::config::DeviceConfig;

/// Flash offset of the config region. Must match an unused range in the
/// partition table.
const CONFIG_OFFSET: u32 = 0x9000;

/// Identifies a valid config frame.
const MAGIC: u32 = 0x53_4E_54_4C; // "SNTL"

/// Frame header plus payload ceiling.
const MAX_FRAME: usize = 8 + 1024;

pub struct FlashStore {
    flash: FlashStorage,
}

impl FlashStore {
    pub fn new() -> Self {
        Self {
            flash: FlashStorage::new(),
        }
    }
}

impl Default for FlashStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore for FlashStore {
    fn load(&mut self) -> DeviceConfig {
        let mut frame = [0u8; MAX_FRAME];
        if self.flash.read(CONFIG_OFFSET, &mut frame).is_err() {
            warn!("flash read failed, using default config");
            return DeviceConfig::default();
        }

        let magic = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]);
        if magic != MAGIC {
            info!("no stored config found");
            return DeviceConfig::default();
        }

        let len = u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]) as usize;
        if len > MAX_FRAME - 8 {
            warn!("stored config length {len} out of range, using defaults");
            return DeviceConfig::default();
        }

        match DeviceConfig::from_postcard(&frame[8..8 + len]) {
            Ok(config) => config,
            Err(err) => {
                warn!("stored config corrupt ({err}), using defaults");
                DeviceConfig::default()
            }
        }
    }

    fn save(&mut self, config: &DeviceConfig) -> Result<(), StoreError> {
        let payload = config.to_postcard().map_err(|_| StoreError::WriteFailed)?;
        if payload.len() > MAX_FRAME - 8 {
            return Err(StoreError::WriteFailed);
        }

        let mut frame = [0xFFu8; MAX_FRAME];
        frame[0..4].copy_from_slice(&MAGIC.to_le_bytes());
        frame[4..8].copy_from_slice(&(payload.len() as u32).to_le_bytes());
        frame[8..8 + payload.len()].copy_from_slice(&payload);

        self.flash
            .write(CONFIG_OFFSET, &frame)
            .map_err(|_| StoreError::WriteFailed)?;
        info!("config persisted to flash ({} bytes)", payload.len());
        Ok(())
    }
}
