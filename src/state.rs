use crate::protocol::Response;
use crate::subscription::MixerEvent;
use crate::types::{source_ids, zone_ids, Source, SourceId, Zone, ZoneId, MUTE_LEVEL};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// In-memory mirror of the device
///
/// Only confirmed device responses mutate it; commands never do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixerState {
    pub zones: BTreeMap<ZoneId, Zone>,
    pub sources: BTreeMap<SourceId, Source>,
}

impl Default for MixerState {
    fn default() -> Self {
        Self::new()
    }
}

impl MixerState {
    pub fn new() -> Self {
        Self {
            zones: zone_ids().map(|id| (id, Zone::new(id))).collect(),
            sources: source_ids().map(|id| (id, Source::new(id))).collect(),
        }
    }

    pub fn zone(&self, id: ZoneId) -> Option<&Zone> {
        self.zones.get(&id)
    }

    pub fn source(&self, id: SourceId) -> Option<&Source> {
        self.sources.get(&id)
    }

    /// Look up a source by its device label
    pub fn source_by_label(&self, label: &str) -> Option<&Source> {
        self.sources
            .values()
            .find(|s| s.label.as_deref() == Some(label))
    }

    pub fn all_source_labels_known(&self) -> bool {
        self.sources.values().all(|s| s.label.is_some())
    }

    pub fn all_zone_data_known(&self) -> bool {
        self.zones.values().all(Zone::has_full_data)
    }

    /// Apply a decoded response and return the events to fan out
    ///
    /// Every accepted response yields at least one event, even when the value
    /// is unchanged. Responses for unknown ids yield nothing.
    pub fn apply(&mut self, response: &Response) -> Vec<MixerEvent> {
        match response {
            Response::SourceLabel(id, label) => {
                let Some(source) = self.sources.get_mut(id) else {
                    tracing::debug!("Ignoring label for unknown source {}", id);
                    return Vec::new();
                };
                source.label = Some(label.clone());
                vec![MixerEvent::SourceLabelChanged {
                    source: *id,
                    label: label.clone(),
                }]
            }
            Response::ZoneLabel(id, label) => self.with_zone(*id, |zone| {
                zone.label = Some(label.clone());
                vec![MixerEvent::ZoneLabelChanged {
                    zone: zone.id,
                    label: label.clone(),
                }]
            }),
            Response::ZoneVolume(id, level) => self.with_zone(*id, |zone| {
                zone.volume_level = Some(*level);
                let mut events = vec![MixerEvent::ZoneVolumeChanged {
                    zone: zone.id,
                    level: *level,
                }];
                if *level == MUTE_LEVEL && !zone.muted {
                    zone.muted = true;
                    events.push(MixerEvent::ZoneMuteChanged {
                        zone: zone.id,
                        muted: true,
                    });
                }
                events
            }),
            Response::ZoneMute(id, muted) => self.with_zone(*id, |zone| {
                zone.muted = *muted;
                vec![MixerEvent::ZoneMuteChanged {
                    zone: zone.id,
                    muted: *muted,
                }]
            }),
            Response::ZoneSource(id, source) => {
                if !self.sources.contains_key(source) {
                    tracing::debug!("Ignoring unknown source {} for zone {}", source, id);
                    return Vec::new();
                }
                self.with_zone(*id, |zone| {
                    zone.current_source = Some(*source);
                    vec![MixerEvent::ZoneSourceChanged {
                        zone: zone.id,
                        source: *source,
                    }]
                })
            }
            Response::ZoneInputEnabled(id, source, enabled) => {
                if !self.sources.contains_key(source) {
                    tracing::debug!("Ignoring enable flag for unknown source {}", source);
                    return Vec::new();
                }
                self.with_zone(*id, |zone| {
                    zone.inputs_reported.insert(*source);
                    if *enabled {
                        zone.enabled_inputs.insert(*source);
                    } else {
                        zone.enabled_inputs.remove(source);
                    }
                    vec![MixerEvent::ZoneEnabledInputsChanged {
                        zone: zone.id,
                        inputs: zone.enabled_inputs.clone(),
                    }]
                })
            }
            Response::ZoneEq(id, eq) => self.with_zone(*id, |zone| {
                zone.eq = *eq;
                vec![MixerEvent::ZoneEqChanged {
                    zone: zone.id,
                    eq: *eq,
                }]
            }),
            Response::ZoneEqParameter(id, parameter, value) => self.with_zone(*id, |zone| {
                zone.eq.set(*parameter, *value);
                vec![MixerEvent::ZoneEqChanged {
                    zone: zone.id,
                    eq: zone.eq,
                }]
            }),
        }
    }

    fn with_zone(
        &mut self,
        id: ZoneId,
        update: impl FnOnce(&mut Zone) -> Vec<MixerEvent>,
    ) -> Vec<MixerEvent> {
        match self.zones.get_mut(&id) {
            Some(zone) => update(zone),
            None => {
                tracing::debug!("Ignoring response for unknown zone {}", id);
                Vec::new()
            }
        }
    }
}
