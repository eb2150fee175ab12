use crate::error::{Dcm1Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Zone identifier (1..=8)
pub type ZoneId = u8;

/// Source (line input) identifier (1..=8)
pub type SourceId = u8;

/// Attenuation level in dB below maximum; 0 is loudest
pub type VolumeLevel = u8;

/// Number of zones on a DCM1
pub const ZONE_COUNT: u8 = 8;

/// Number of line inputs on a DCM1
pub const SOURCE_COUNT: u8 = 8;

/// Quietest level that can be requested directly
pub const MAX_VOLUME_LEVEL: VolumeLevel = 61;

/// Level the device reports for a muted zone
pub const MUTE_LEVEL: VolumeLevel = 62;

/// EQ bounds in dB
pub const EQ_MIN: i8 = -14;
pub const EQ_MAX: i8 = 14;

/// Iterate over all zone ids
pub fn zone_ids() -> impl Iterator<Item = ZoneId> {
    1..=ZONE_COUNT
}

/// Iterate over all source ids
pub fn source_ids() -> impl Iterator<Item = SourceId> {
    1..=SOURCE_COUNT
}

pub(crate) fn check_zone(zone: ZoneId) -> Result<()> {
    if (1..=ZONE_COUNT).contains(&zone) {
        Ok(())
    } else {
        Err(Dcm1Error::validation(format!(
            "zone {} out of range 1..={}",
            zone, ZONE_COUNT
        )))
    }
}

pub(crate) fn check_source(source: SourceId) -> Result<()> {
    if (1..=SOURCE_COUNT).contains(&source) {
        Ok(())
    } else {
        Err(Dcm1Error::validation(format!(
            "source {} out of range 1..={}",
            source, SOURCE_COUNT
        )))
    }
}

pub(crate) fn check_volume(level: VolumeLevel) -> Result<()> {
    if level <= MAX_VOLUME_LEVEL {
        Ok(())
    } else {
        Err(Dcm1Error::validation(format!(
            "volume level {} out of range 0..={} (use set_zone_mute to mute)",
            level, MAX_VOLUME_LEVEL
        )))
    }
}

/// The device only accepts even EQ steps; odd values are rejected, not rounded.
pub(crate) fn check_eq(value: i8) -> Result<()> {
    if !(EQ_MIN..=EQ_MAX).contains(&value) {
        return Err(Dcm1Error::validation(format!(
            "EQ value {} out of range {}..={}",
            value, EQ_MIN, EQ_MAX
        )));
    }
    if value % 2 != 0 {
        return Err(Dcm1Error::validation(format!(
            "EQ value {} must be even",
            value
        )));
    }
    Ok(())
}

/// Tone control band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EqParameter {
    Treble,
    Mid,
    Bass,
}

impl EqParameter {
    pub const ALL: [EqParameter; 3] = [EqParameter::Treble, EqParameter::Mid, EqParameter::Bass];

    /// Single-letter key used on the wire
    pub fn key(self) -> char {
        match self {
            EqParameter::Treble => 't',
            EqParameter::Mid => 'm',
            EqParameter::Bass => 'b',
        }
    }

    pub(crate) fn from_key(key: &str) -> Option<Self> {
        if key.eq_ignore_ascii_case("t") {
            Some(EqParameter::Treble)
        } else if key.eq_ignore_ascii_case("m") {
            Some(EqParameter::Mid)
        } else if key.eq_ignore_ascii_case("b") {
            Some(EqParameter::Bass)
        } else {
            None
        }
    }
}

impl fmt::Display for EqParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EqParameter::Treble => "treble",
            EqParameter::Mid => "mid",
            EqParameter::Bass => "bass",
        };
        f.write_str(name)
    }
}

/// Tone control settings for a zone
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EqSettings {
    pub treble: i8,
    pub mid: i8,
    pub bass: i8,
}

impl EqSettings {
    pub fn get(&self, parameter: EqParameter) -> i8 {
        match parameter {
            EqParameter::Treble => self.treble,
            EqParameter::Mid => self.mid,
            EqParameter::Bass => self.bass,
        }
    }

    pub fn set(&mut self, parameter: EqParameter, value: i8) {
        match parameter {
            EqParameter::Treble => self.treble = value,
            EqParameter::Mid => self.mid = value,
            EqParameter::Bass => self.bass = value,
        }
    }
}

/// Mirrored state of one output zone
///
/// Fields stay `None` until the device has reported them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub id: ZoneId,
    pub label: Option<String>,
    pub current_source: Option<SourceId>,

    /// Sources the installer enabled for this zone
    pub enabled_inputs: BTreeSet<SourceId>,

    /// Sources the device has answered an enable query for, enabled or not
    #[serde(skip)]
    pub(crate) inputs_reported: BTreeSet<SourceId>,

    pub volume_level: Option<VolumeLevel>,
    pub muted: bool,
    pub eq: EqSettings,
}

impl Zone {
    pub fn new(id: ZoneId) -> Self {
        Self {
            id,
            label: None,
            current_source: None,
            enabled_inputs: BTreeSet::new(),
            inputs_reported: BTreeSet::new(),
            volume_level: None,
            muted: false,
            eq: EqSettings::default(),
        }
    }

    /// Device label, or a generic "Zone N"
    pub fn display_name(&self) -> String {
        self.label
            .clone()
            .unwrap_or_else(|| format!("Zone {}", self.id))
    }

    /// True once every per-input enable query has been answered
    pub fn enabled_inputs_complete(&self) -> bool {
        self.inputs_reported.len() == SOURCE_COUNT as usize
    }

    pub(crate) fn has_full_data(&self) -> bool {
        self.label.is_some()
            && self.current_source.is_some()
            && self.volume_level.is_some()
            && self.enabled_inputs_complete()
    }
}

/// Mirrored state of one line input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub id: SourceId,
    pub label: Option<String>,
}

impl Source {
    pub fn new(id: SourceId) -> Self {
        Self { id, label: None }
    }

    pub fn display_name(&self) -> String {
        self.label
            .clone()
            .unwrap_or_else(|| format!("Source {}", self.id))
    }
}

/// Session state of the connection manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    /// Entities should only be shown as available while connected
    pub fn is_available(self) -> bool {
        self == ConnectionState::Connected
    }
}

/// Dispatch lane of a queued command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    User,
    Poll,
}
