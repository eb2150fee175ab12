use crate::client::Dcm1Mixer;
use crate::error::{Dcm1Error, Result};
use crate::types::{EqParameter, EqSettings, Source, SourceId, VolumeLevel, Zone, ZoneId};
use std::collections::BTreeSet;

/// Interface for controlling one zone
///
/// Getters read the mirror; setters go through the mixer's command queue.
///
/// # Example
///
/// ```no_run
/// # use cloud_dcm1::Dcm1Mixer;
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// # let mixer = Dcm1Mixer::connect_to("192.168.1.50", 4999).await?;
/// if let Some(zone) = mixer.zone(2) {
///     zone.set_volume(18)?;
///     println!("{} is on {:?}", zone.name(), zone.source());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ZoneControl {
    mixer: Dcm1Mixer,
    id: ZoneId,
}

impl ZoneControl {
    pub(crate) fn new(mixer: Dcm1Mixer, id: ZoneId) -> Self {
        Self { mixer, id }
    }

    pub fn id(&self) -> ZoneId {
        self.id
    }

    /// Copy of the mirrored zone state
    pub fn state_snapshot(&self) -> Zone {
        self.mixer
            .read_state(|state| state.zone(self.id).cloned())
            .unwrap_or_else(|| Zone::new(self.id))
    }

    /// Device label, or "Zone N" until it is known
    pub fn name(&self) -> String {
        self.state_snapshot().display_name()
    }

    pub fn volume_level(&self) -> Option<VolumeLevel> {
        self.state_snapshot().volume_level
    }

    pub fn is_muted(&self) -> bool {
        self.state_snapshot().muted
    }

    pub fn source(&self) -> Option<SourceId> {
        self.state_snapshot().current_source
    }

    pub fn eq(&self) -> EqSettings {
        self.state_snapshot().eq
    }

    pub fn enabled_inputs(&self) -> BTreeSet<SourceId> {
        self.state_snapshot().enabled_inputs
    }

    /// Sources selectable for this zone, in id order
    ///
    /// Falls back to every source until the enable map is complete.
    pub fn selectable_sources(&self) -> Vec<Source> {
        self.mixer.read_state(|state| {
            let Some(zone) = state.zone(self.id) else {
                return Vec::new();
            };
            state
                .sources
                .values()
                .filter(|s| !zone.enabled_inputs_complete() || zone.enabled_inputs.contains(&s.id))
                .cloned()
                .collect()
        })
    }

    pub fn set_volume(&self, level: VolumeLevel) -> Result<()> {
        self.mixer.set_zone_volume(self.id, level)
    }

    pub fn set_mute(&self, muted: bool) -> Result<()> {
        self.mixer.set_zone_mute(self.id, muted)
    }

    pub fn set_source(&self, source: SourceId) -> Result<()> {
        self.mixer.set_zone_source(self.id, source)
    }

    /// Select a source by its device label
    pub fn select_source(&self, label: &str) -> Result<()> {
        let source = self
            .mixer
            .read_state(|state| state.source_by_label(label).map(|s| s.id))
            .ok_or_else(|| Dcm1Error::Validation(format!("unknown source {:?}", label)))?;
        self.set_source(source)
    }

    pub fn set_eq(&self, parameter: EqParameter, value: i8) -> Result<()> {
        self.mixer.set_zone_eq(self.id, parameter, value)
    }
}
