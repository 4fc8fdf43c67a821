//! Acquisition settings and their translation into feature writes.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamValue {
    Float(f64),
    Int(i64),
    Bool(bool),
    /// Raw enumeration entry value.
    Enum(u32),
}

/// One named feature write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSetting {
    pub name: String,
    pub value: ParamValue,
}

impl ParamSetting {
    pub fn new(name: impl Into<String>, value: ParamValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerMode {
    Off = 0,
    On = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerSource {
    Line0 = 0,
    Line1 = 1,
    Line2 = 2,
    Line3 = 3,
    Counter0 = 4,
    Software = 7,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerActivation {
    RisingEdge = 0,
    FallingEdge = 1,
    LevelHigh = 2,
    LevelLow = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcquisitionMode {
    SingleFrame = 0,
    MultiFrame = 1,
    Continuous = 2,
}

/// Acquisition settings applied when a session is created.
///
/// `None` leaves the device's current value untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    pub exposure_us: Option<f64>,
    pub gain: Option<f64>,
    pub frame_rate: Option<f64>,
    pub trigger_mode: Option<TriggerMode>,
    pub trigger_source: Option<TriggerSource>,
    pub trigger_activation: Option<TriggerActivation>,
    pub acquisition_mode: Option<AcquisitionMode>,
    /// Frames captured per trigger pulse.
    pub burst_count: Option<i64>,
    pub frame_rate_enable: Option<bool>,
    /// Written after the built-in settings, in order.
    pub extra: Vec<ParamSetting>,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            exposure_us: Some(20_000.0),
            gain: Some(5.0),
            frame_rate: Some(5.0),
            trigger_mode: Some(TriggerMode::On),
            trigger_source: Some(TriggerSource::Line0),
            trigger_activation: Some(TriggerActivation::RisingEdge),
            acquisition_mode: Some(AcquisitionMode::Continuous),
            burst_count: None,
            frame_rate_enable: Some(true),
            extra: Vec::new(),
        }
    }
}

impl AcquisitionConfig {
    /// Ordered feature writes: floats, trigger enums, integers, booleans,
    /// then `extra`.
    pub fn parameters(&self) -> Vec<ParamSetting> {
        let floats = [
            ("ExposureTime", self.exposure_us),
            ("Gain", self.gain),
            ("AcquisitionFrameRate", self.frame_rate),
        ]
        .into_iter()
        .filter_map(|(name, v)| v.map(|v| ParamSetting::new(name, ParamValue::Float(v))));

        let enums = [
            ("TriggerMode", self.trigger_mode.map(|m| m as u32)),
            ("TriggerSource", self.trigger_source.map(|s| s as u32)),
            ("TriggerActivation", self.trigger_activation.map(|a| a as u32)),
            ("AcquisitionMode", self.acquisition_mode.map(|m| m as u32)),
        ]
        .into_iter()
        .filter_map(|(name, v)| v.map(|v| ParamSetting::new(name, ParamValue::Enum(v))));

        let ints = self
            .burst_count
            .map(|n| ParamSetting::new("AcquisitionBurstFrameCount", ParamValue::Int(n)));

        let bools = self
            .frame_rate_enable
            .map(|b| ParamSetting::new("AcquisitionFrameRateEnable", ParamValue::Bool(b)));

        floats
            .chain(enums)
            .chain(ints)
            .chain(bools)
            .chain(self.extra.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_ordered_by_kind() {
        let names: Vec<_> = AcquisitionConfig::default()
            .parameters()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(
            names,
            [
                "ExposureTime",
                "Gain",
                "AcquisitionFrameRate",
                "TriggerMode",
                "TriggerSource",
                "TriggerActivation",
                "AcquisitionMode",
                "AcquisitionFrameRateEnable",
            ]
        );
    }

    #[test]
    fn unset_values_are_skipped_and_extra_comes_last() {
        let config = AcquisitionConfig {
            exposure_us: None,
            gain: None,
            frame_rate: None,
            trigger_mode: Some(TriggerMode::On),
            trigger_source: None,
            trigger_activation: None,
            acquisition_mode: None,
            burst_count: Some(4),
            frame_rate_enable: None,
            extra: vec![ParamSetting::new("GevSCPD", ParamValue::Int(1000))],
        };
        assert_eq!(
            config.parameters(),
            vec![
                ParamSetting::new("TriggerMode", ParamValue::Enum(1)),
                ParamSetting::new("AcquisitionBurstFrameCount", ParamValue::Int(4)),
                ParamSetting::new("GevSCPD", ParamValue::Int(1000)),
            ]
        );
    }
}
