//! Ambient light sensor on a digital input.
//!
//! The sensor output is active-high for "dark". The board wiring provides
//! the pull-up.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};

/// Boolean light reading.
pub trait LightSensor: Send + Sync {
    /// `true` when the room is dark.
    fn is_dark(&self) -> MediaResult<bool>;

    /// Release the input. Idempotent.
    fn release(&self) -> MediaResult<()>;
}

/// Light sensor read through the sysfs GPIO interface.
#[derive(Debug)]
pub struct SysfsLightSensor {
    root: PathBuf,
    pin: u32,
    exported: AtomicBool,
}

impl SysfsLightSensor {
    /// Default sysfs GPIO root.
    pub const DEFAULT_ROOT: &'static str = "/sys/class/gpio";

    /// Export `pin` if needed and configure it as an input.
    pub fn open(root: impl AsRef<Path>, pin: u32) -> MediaResult<Self> {
        let root = root.as_ref().to_path_buf();
        let sensor = Self {
            root,
            pin,
            exported: AtomicBool::new(false),
        };

        if !sensor.pin_dir().exists() {
            write_attr(&sensor.root.join("export"), &pin.to_string())?;
            sensor.exported.store(true, Ordering::SeqCst);
            debug!(pin, "Exported GPIO pin");
        }

        write_attr(&sensor.pin_dir().join("direction"), "in")?;
        info!(pin, root = %sensor.root.display(), "Light sensor initialized");

        Ok(sensor)
    }

    pub fn pin(&self) -> u32 {
        self.pin
    }

    fn pin_dir(&self) -> PathBuf {
        self.root.join(format!("gpio{}", self.pin))
    }
}

impl LightSensor for SysfsLightSensor {
    fn is_dark(&self) -> MediaResult<bool> {
        let path = self.pin_dir().join("value");
        let raw = fs::read_to_string(&path)
            .map_err(|e| MediaError::sensor(format!("{}: {}", path.display(), e)))?;

        match raw.trim() {
            "1" => Ok(true),
            "0" => Ok(false),
            other => Err(MediaError::sensor(format!("unexpected GPIO value {:?}", other))),
        }
    }

    fn release(&self) -> MediaResult<()> {
        if self.exported.swap(false, Ordering::SeqCst) {
            if let Err(e) = write_attr(&self.root.join("unexport"), &self.pin.to_string()) {
                warn!(pin = self.pin, "Failed to unexport GPIO pin: {}", e);
                return Err(e);
            }
            info!(pin = self.pin, "Light sensor released");
        }
        Ok(())
    }
}

fn write_attr(path: &Path, value: &str) -> MediaResult<()> {
    fs::write(path, value).map_err(|e| MediaError::sensor(format!("{}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_gpio(value: &str) -> tempfile::TempDir {
        let root = tempfile::tempdir().unwrap();
        let pin_dir = root.path().join("gpio18");
        fs::create_dir_all(&pin_dir).unwrap();
        fs::write(pin_dir.join("value"), value).unwrap();
        fs::write(pin_dir.join("direction"), "out").unwrap();
        root
    }

    #[test]
    fn test_high_reads_as_dark() {
        let root = fake_gpio("1\n");
        let sensor = SysfsLightSensor::open(root.path(), 18).unwrap();
        assert!(sensor.is_dark().unwrap());

        let direction = fs::read_to_string(root.path().join("gpio18/direction")).unwrap();
        assert_eq!(direction, "in");
    }

    #[test]
    fn test_low_reads_as_bright() {
        let root = fake_gpio("0\n");
        let sensor = SysfsLightSensor::open(root.path(), 18).unwrap();
        assert!(!sensor.is_dark().unwrap());
    }

    #[test]
    fn test_garbage_value_is_an_error() {
        let root = fake_gpio("x");
        let sensor = SysfsLightSensor::open(root.path(), 18).unwrap();
        assert!(matches!(sensor.is_dark(), Err(MediaError::Sensor(_))));
    }

    #[test]
    fn test_release_leaves_preexisting_pin_exported() {
        let root = fake_gpio("0");
        let sensor = SysfsLightSensor::open(root.path(), 18).unwrap();
        sensor.release().unwrap();
        sensor.release().unwrap();
        assert!(!root.path().join("unexport").exists());
    }

    #[test]
    fn test_missing_root_fails_to_open() {
        let root = tempfile::tempdir().unwrap();
        let missing = root.path().join("nope");
        assert!(SysfsLightSensor::open(&missing, 18).is_err());
    }
}
