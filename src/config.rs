//! Operational configuration and the settings collaborator.
//!
//! The flight core never holds on to a [`PibConfig`] across sequence steps.
//! Handlers take a fresh [`Settings::snapshot`] each time they need a value,
//! so a telecommand that changes a parameter mid-flight is picked up at the
//! next step that reads it.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Bump whenever the layout of [`PibConfig`] changes.
pub const CONFIG_VERSION: u32 = 0xAC6F_0004;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PibConfig {
    pub version: u32,
    pub sza_minimum: f32,
    pub profile_size: f32,
    pub dock_amount: f32,
    pub dock_overshoot: f32,
    pub deploy_velocity: f32,
    pub retract_velocity: f32,
    pub dock_velocity: f32,
    pub time_trigger: u32,
    pub dwell_time: u16,
    pub profile_period: u16,
    pub num_profiles: u8,
    pub sza_trigger: bool,
    pub pu_docked: bool,
    pub redock_out: f32,
    pub redock_in: f32,
    pub num_redock: u8,
    pub puwarmup_time: u16,
    pub preprofile_time: u16,
    pub motion_timeout: u16,
    pub dock_wait_time: u16,
    pub flash_temp: f32,
    pub heater1_temp: f32,
    pub heater2_temp: f32,
    pub flash_power: u8,
    pub tsen_power: u8,
    pub profile_rate: u16,
    pub dwell_rate: u16,
    pub profile_tsen: bool,
    pub profile_ropc: bool,
    pub profile_flash: bool,
}

impl Default for PibConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            sza_minimum: 108.0, // start of night after astronomical twilight
            profile_size: 8000.0,
            dock_amount: 200.0,
            dock_overshoot: 100.0,
            deploy_velocity: 250.0,
            retract_velocity: 250.0,
            dock_velocity: 80.0,
            time_trigger: u32::MAX,
            dwell_time: 900,
            profile_period: 7200,
            num_profiles: 3,
            sza_trigger: false,
            pu_docked: false,
            redock_out: 5.0,
            redock_in: 10.0,
            num_redock: 3,
            puwarmup_time: 900,
            preprofile_time: 180,
            motion_timeout: 30,
            dock_wait_time: 10,
            flash_temp: -20.0,
            heater1_temp: 0.0,
            heater2_temp: -15.0,
            flash_power: 1,
            tsen_power: 1,
            profile_rate: 1,
            dwell_rate: 10,
            profile_tsen: true,
            profile_ropc: true,
            profile_flash: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConfigField {
    SzaMinimum,
    ProfileSize,
    DockAmount,
    DockOvershoot,
    DeployVelocity,
    RetractVelocity,
    DockVelocity,
    TimeTrigger,
    DwellTime,
    ProfilePeriod,
    NumProfiles,
    SzaTrigger,
    PuDocked,
    RedockOut,
    RedockIn,
    NumRedock,
    PuWarmupTime,
    PreprofileTime,
    MotionTimeout,
    DockWaitTime,
    FlashTemp,
    Heater1Temp,
    Heater2Temp,
    FlashPower,
    TsenPower,
    ProfileRate,
    DwellRate,
    ProfileTsen,
    ProfileRopc,
    ProfileFlash,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ConfigValue {
    F32(f32),
    U32(u32),
    U16(u16),
    U8(u8),
    Bool(bool),
}

impl core::fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ConfigValue::F32(v) => write!(f, "{:.2}", v),
            ConfigValue::U32(v) => write!(f, "{}", v),
            ConfigValue::U16(v) => write!(f, "{}", v),
            ConfigValue::U8(v) => write!(f, "{}", v),
            ConfigValue::Bool(v) => write!(f, "{}", v),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field:?} expects a different value type than {value:?}")]
    TypeMismatch { field: ConfigField, value: ConfigValue },
    #[error("{field:?} value {value} is out of range")]
    OutOfRange { field: ConfigField, value: ConfigValue },
    #[error("{field:?} value {value} would leave the reel lengths inconsistent")]
    Inconsistent { field: ConfigField, value: ConfigValue },
    #[error("settings storage error: {0}")]
    Storage(#[from] std::io::Error),
    #[error("settings encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl PibConfig {
    pub fn get(&self, field: ConfigField) -> ConfigValue {
        use ConfigField as F;
        use ConfigValue as V;
        match field {
            F::SzaMinimum => V::F32(self.sza_minimum),
            F::ProfileSize => V::F32(self.profile_size),
            F::DockAmount => V::F32(self.dock_amount),
            F::DockOvershoot => V::F32(self.dock_overshoot),
            F::DeployVelocity => V::F32(self.deploy_velocity),
            F::RetractVelocity => V::F32(self.retract_velocity),
            F::DockVelocity => V::F32(self.dock_velocity),
            F::TimeTrigger => V::U32(self.time_trigger),
            F::DwellTime => V::U16(self.dwell_time),
            F::ProfilePeriod => V::U16(self.profile_period),
            F::NumProfiles => V::U8(self.num_profiles),
            F::SzaTrigger => V::Bool(self.sza_trigger),
            F::PuDocked => V::Bool(self.pu_docked),
            F::RedockOut => V::F32(self.redock_out),
            F::RedockIn => V::F32(self.redock_in),
            F::NumRedock => V::U8(self.num_redock),
            F::PuWarmupTime => V::U16(self.puwarmup_time),
            F::PreprofileTime => V::U16(self.preprofile_time),
            F::MotionTimeout => V::U16(self.motion_timeout),
            F::DockWaitTime => V::U16(self.dock_wait_time),
            F::FlashTemp => V::F32(self.flash_temp),
            F::Heater1Temp => V::F32(self.heater1_temp),
            F::Heater2Temp => V::F32(self.heater2_temp),
            F::FlashPower => V::U8(self.flash_power),
            F::TsenPower => V::U8(self.tsen_power),
            F::ProfileRate => V::U16(self.profile_rate),
            F::DwellRate => V::U16(self.dwell_rate),
            F::ProfileTsen => V::Bool(self.profile_tsen),
            F::ProfileRopc => V::Bool(self.profile_ropc),
            F::ProfileFlash => V::Bool(self.profile_flash),
        }
    }

    /// Type-checked, range-checked field update. The record is unchanged on error.
    ///
    /// Besides the per-field range, the update must keep every motion derived
    /// from the record valid: a positive profile, a reel-in shorter than the
    /// reel-out, a non-empty dock and positive re-dock legs.
    pub fn set(&mut self, field: ConfigField, value: ConfigValue) -> Result<(), ConfigError> {
        let mut updated = *self;
        updated.apply(field, value)?;
        if !updated.reel_lengths_valid() {
            return Err(ConfigError::Inconsistent { field, value });
        }
        *self = updated;
        Ok(())
    }

    pub fn reel_lengths_valid(&self) -> bool {
        self.profile_size > 0.0
            && self.dock_amount < self.profile_size
            && self.dock_amount + self.dock_overshoot > 0.0
            && self.redock_out > 0.0
            && self.redock_in > 0.0
    }

    fn apply(&mut self, field: ConfigField, value: ConfigValue) -> Result<(), ConfigError> {
        use ConfigField as F;
        use ConfigValue as V;

        let out_of_range = || ConfigError::OutOfRange { field, value };
        let mismatch = || ConfigError::TypeMismatch { field, value };

        match (field, value) {
            (F::DeployVelocity | F::RetractVelocity | F::DockVelocity, V::F32(v)) => {
                if !(v.is_finite() && v > 0.0) {
                    return Err(out_of_range());
                }
                match field {
                    F::DeployVelocity => self.deploy_velocity = v,
                    F::RetractVelocity => self.retract_velocity = v,
                    _ => self.dock_velocity = v,
                }
            }
            (
                F::ProfileSize | F::DockAmount | F::DockOvershoot | F::RedockOut | F::RedockIn,
                V::F32(v),
            ) => {
                if !(v.is_finite() && v >= 0.0) {
                    return Err(out_of_range());
                }
                match field {
                    F::ProfileSize => self.profile_size = v,
                    F::DockAmount => self.dock_amount = v,
                    F::DockOvershoot => self.dock_overshoot = v,
                    F::RedockOut => self.redock_out = v,
                    _ => self.redock_in = v,
                }
            }
            (F::SzaMinimum, V::F32(v)) => {
                if !(0.0..=180.0).contains(&v) {
                    return Err(out_of_range());
                }
                self.sza_minimum = v;
            }
            (F::FlashTemp | F::Heater1Temp | F::Heater2Temp, V::F32(v)) => {
                if !v.is_finite() {
                    return Err(out_of_range());
                }
                match field {
                    F::FlashTemp => self.flash_temp = v,
                    F::Heater1Temp => self.heater1_temp = v,
                    _ => self.heater2_temp = v,
                }
            }
            (F::TimeTrigger, V::U32(v)) => self.time_trigger = v,
            (F::ProfilePeriod | F::MotionTimeout, V::U16(0)) => return Err(out_of_range()),
            (
                F::DwellTime
                | F::ProfilePeriod
                | F::PuWarmupTime
                | F::PreprofileTime
                | F::MotionTimeout
                | F::DockWaitTime
                | F::ProfileRate
                | F::DwellRate,
                V::U16(v),
            ) => match field {
                F::DwellTime => self.dwell_time = v,
                F::ProfilePeriod => self.profile_period = v,
                F::PuWarmupTime => self.puwarmup_time = v,
                F::PreprofileTime => self.preprofile_time = v,
                F::MotionTimeout => self.motion_timeout = v,
                F::DockWaitTime => self.dock_wait_time = v,
                F::ProfileRate => self.profile_rate = v,
                _ => self.dwell_rate = v,
            },
            (F::NumProfiles | F::NumRedock, V::U8(0)) => return Err(out_of_range()),
            (F::NumProfiles, V::U8(v)) => self.num_profiles = v,
            (F::NumRedock, V::U8(v)) => self.num_redock = v,
            (F::FlashPower | F::TsenPower, V::U8(v)) => {
                if v > 1 {
                    return Err(out_of_range());
                }
                match field {
                    F::FlashPower => self.flash_power = v,
                    _ => self.tsen_power = v,
                }
            }
            (
                F::SzaTrigger | F::PuDocked | F::ProfileTsen | F::ProfileRopc | F::ProfileFlash,
                V::Bool(v),
            ) => match field {
                F::SzaTrigger => self.sza_trigger = v,
                F::PuDocked => self.pu_docked = v,
                F::ProfileTsen => self.profile_tsen = v,
                F::ProfileRopc => self.profile_ropc = v,
                _ => self.profile_flash = v,
            },
            _ => return Err(mismatch()),
        }

        Ok(())
    }
}

/// External key-value settings service.
pub trait Settings {
    fn snapshot(&self) -> PibConfig;

    fn write(&mut self, field: ConfigField, value: ConfigValue) -> Result<(), ConfigError>;

    fn read(&self, field: ConfigField) -> ConfigValue {
        self.snapshot().get(field)
    }
}

/// Volatile settings, used for tests and ground runs without a store.
#[derive(Debug, Clone, Default)]
pub struct MemorySettings {
    config: PibConfig,
    writes: u32,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: PibConfig) -> Self {
        Self { config, writes: 0 }
    }

    pub fn write_count(&self) -> u32 {
        self.writes
    }
}

impl Settings for MemorySettings {
    fn snapshot(&self) -> PibConfig {
        self.config
    }

    fn write(&mut self, field: ConfigField, value: ConfigValue) -> Result<(), ConfigError> {
        self.config.set(field, value)?;
        self.writes = self.writes.saturating_add(1);
        Ok(())
    }
}

/// Settings persisted as a JSON document, written through on every change.
#[derive(Debug)]
pub struct JsonFileSettings {
    path: PathBuf,
    config: PibConfig,
}

impl JsonFileSettings {
    /// Load the store, resetting it to defaults when it is missing, unreadable
    /// or from another layout version. The flag is `false` after a reset.
    pub fn open(path: impl AsRef<Path>) -> Result<(Self, bool), ConfigError> {
        let path = path.as_ref().to_path_buf();

        let loaded = std::fs::read_to_string(&path)
            .ok()
            .and_then(|text| serde_json::from_str::<PibConfig>(&text).ok())
            .filter(|config| config.version == CONFIG_VERSION && config.reel_lengths_valid());

        match loaded {
            Some(config) => Ok((Self { path, config }, true)),
            None => {
                let store = Self {
                    path,
                    config: PibConfig::default(),
                };
                store.persist()?;
                Ok((store, false))
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<(), ConfigError> {
        let text = serde_json::to_string_pretty(&self.config)?;
        std::fs::write(&self.path, text)?;
        Ok(())
    }
}

impl Settings for JsonFileSettings {
    fn snapshot(&self) -> PibConfig {
        self.config
    }

    fn write(&mut self, field: ConfigField, value: ConfigValue) -> Result<(), ConfigError> {
        let mut updated = self.config;
        updated.set(field, value)?;
        if updated == self.config {
            return Ok(());
        }
        self.config = updated;
        self.persist()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PibConfig::default();
        assert_eq!(config.version, CONFIG_VERSION);
        assert_eq!(config.time_trigger, u32::MAX);
        assert_eq!(config.num_redock, 3);
        assert_eq!(config.profile_period, 7200);
    }

    #[test]
    fn test_set_and_get_round_trip_single_field() {
        let mut config = PibConfig::default();
        config.set(ConfigField::DwellTime, ConfigValue::U16(600)).unwrap();
        assert_eq!(config.get(ConfigField::DwellTime), ConfigValue::U16(600));
    }

    #[test]
    fn test_type_mismatch_leaves_record_unchanged() {
        let mut config = PibConfig::default();
        let before = config;
        let result = config.set(ConfigField::DwellTime, ConfigValue::F32(1.0));
        assert!(matches!(result, Err(ConfigError::TypeMismatch { .. })));
        assert_eq!(config, before);
    }

    #[test]
    fn test_rejects_non_positive_velocity() {
        let mut config = PibConfig::default();
        assert!(config.set(ConfigField::DeployVelocity, ConfigValue::F32(0.0)).is_err());
        assert!(config.set(ConfigField::DockVelocity, ConfigValue::F32(-3.0)).is_err());
        assert!(config.set(ConfigField::DockVelocity, ConfigValue::F32(f32::NAN)).is_err());
        assert_eq!(config.dock_velocity, 80.0);
    }

    #[test]
    fn test_rejects_zero_counts() {
        let mut config = PibConfig::default();
        assert!(config.set(ConfigField::NumProfiles, ConfigValue::U8(0)).is_err());
        assert!(config.set(ConfigField::NumRedock, ConfigValue::U8(0)).is_err());
        assert!(config.set(ConfigField::ProfilePeriod, ConfigValue::U16(0)).is_err());
    }

    #[test]
    fn test_rejects_inconsistent_reel_lengths() {
        let mut config = PibConfig::default();
        let before = config;

        for (field, value) in [
            (ConfigField::ProfileSize, 0.0),
            (ConfigField::ProfileSize, 150.0),
            (ConfigField::DockAmount, 8000.0),
            (ConfigField::RedockOut, 0.0),
            (ConfigField::RedockIn, 0.0),
        ] {
            let result = config.set(field, ConfigValue::F32(value));
            assert!(matches!(result, Err(ConfigError::Inconsistent { .. })), "{:?} {}", field, value);
        }
        assert_eq!(config, before);

        // a dock with no overshoot is still a dock
        config.set(ConfigField::DockOvershoot, ConfigValue::F32(0.0)).unwrap();
        assert!(config.set(ConfigField::DockAmount, ConfigValue::F32(0.0)).is_err());
        config.set(ConfigField::ProfileSize, ConfigValue::F32(300.0)).unwrap();
        assert!(config.reel_lengths_valid());
    }

    #[test]
    fn test_memory_settings_counts_writes() {
        let mut settings = MemorySettings::new();
        settings.write(ConfigField::SzaTrigger, ConfigValue::Bool(true)).unwrap();
        assert_eq!(settings.read(ConfigField::SzaTrigger), ConfigValue::Bool(true));
        assert_eq!(settings.write_count(), 1);
    }

    #[test]
    fn test_json_store_reconfigures_on_version_mismatch() {
        let path = std::env::temp_dir().join(format!("stratopib-config-{}.json", std::process::id()));
        let mut stale = PibConfig::default();
        stale.version = 1;
        stale.num_profiles = 9;
        std::fs::write(&path, serde_json::to_string(&stale).unwrap()).unwrap();

        let (mut store, valid) = JsonFileSettings::open(&path).unwrap();
        assert!(!valid);
        assert_eq!(store.snapshot().num_profiles, 3);

        store.write(ConfigField::NumProfiles, ConfigValue::U8(5)).unwrap();
        let (reopened, valid) = JsonFileSettings::open(&path).unwrap();
        assert!(valid);
        assert_eq!(reopened.snapshot().num_profiles, 5);

        let _ = std::fs::remove_file(&path);
    }
}
