use crate::error::{Dcm1Error, Result};
use crate::types::{ConnectionState, EqSettings, SourceId, VolumeLevel, ZoneId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tokio::sync::broadcast;

/// Confirmed change to the mirrored mixer state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MixerEvent {
    ConnectionStateChanged { state: ConnectionState },
    ZoneLabelChanged { zone: ZoneId, label: String },
    ZoneSourceChanged { zone: ZoneId, source: SourceId },
    ZoneVolumeChanged { zone: ZoneId, level: VolumeLevel },
    ZoneMuteChanged { zone: ZoneId, muted: bool },
    ZoneEqChanged { zone: ZoneId, eq: EqSettings },
    ZoneEnabledInputsChanged { zone: ZoneId, inputs: BTreeSet<SourceId> },
    SourceLabelChanged { source: SourceId, label: String },
}

/// Receiver for mixer events
pub struct StateReceiver {
    rx: broadcast::Receiver<MixerEvent>,
}

impl StateReceiver {
    pub(crate) fn new(rx: broadcast::Receiver<MixerEvent>) -> Self {
        Self { rx }
    }

    /// Receive the next event
    ///
    /// Fails with `NotRunning` once the mixer has been dropped.
    pub async fn recv(&mut self) -> Result<MixerEvent> {
        self.rx.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => Dcm1Error::NotRunning,
            broadcast::error::RecvError::Lagged(n) => {
                Dcm1Error::ChannelError(format!("Lagged by {} messages", n))
            }
        })
    }

    /// Try to receive an event without waiting
    ///
    /// Returns `None` if no event is available.
    pub fn try_recv(&mut self) -> Result<Option<MixerEvent>> {
        match self.rx.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Closed) => Err(Dcm1Error::NotRunning),
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                Err(Dcm1Error::ChannelError(format!("Lagged by {} messages", n)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag() {
        let event = MixerEvent::ZoneVolumeChanged { zone: 2, level: 30 };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "zone_volume_changed");
        assert_eq!(json["level"], 30);
    }

    #[tokio::test]
    async fn receiver_reports_lag() {
        let (tx, rx) = broadcast::channel(1);
        let mut receiver = StateReceiver::new(rx);
        tx.send(MixerEvent::ZoneMuteChanged { zone: 1, muted: true }).unwrap();
        tx.send(MixerEvent::ZoneMuteChanged { zone: 1, muted: false }).unwrap();
        assert!(matches!(receiver.try_recv(), Err(Dcm1Error::ChannelError(_))));
        assert_eq!(
            receiver.try_recv().unwrap(),
            Some(MixerEvent::ZoneMuteChanged { zone: 1, muted: false })
        );
        assert_eq!(receiver.try_recv().unwrap(), None);
    }
}
