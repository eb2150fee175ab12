use crate::subscription::MixerEvent;
use crate::types::{ConnectionState, EqSettings, SourceId, VolumeLevel, ZoneId};
use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// Handle returned by [`register_listener`](crate::Dcm1Mixer::register_listener)
pub type ListenerId = Uuid;

/// Observer of confirmed device state
///
/// Callbacks run synchronously on the reader task, in registration order.
/// Keep them short; a panicking callback is logged and skipped.
#[allow(unused_variables)]
pub trait MixerListener: Send + Sync {
    fn connection_state_changed(&self, state: ConnectionState) {}
    fn zone_label_changed(&self, zone: ZoneId, label: &str) {}
    fn zone_source_changed(&self, zone: ZoneId, source: SourceId) {}
    fn zone_volume_changed(&self, zone: ZoneId, level: VolumeLevel) {}
    fn zone_mute_changed(&self, zone: ZoneId, muted: bool) {}
    fn zone_eq_changed(&self, zone: ZoneId, eq: EqSettings) {}
    fn zone_enabled_inputs_changed(&self, zone: ZoneId, inputs: &BTreeSet<SourceId>) {}
    fn source_label_changed(&self, source: SourceId, label: &str) {}
}

/// Logs every event at info level
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingListener;

impl MixerListener for LoggingListener {
    fn connection_state_changed(&self, state: ConnectionState) {
        tracing::info!("Connection state: {:?}", state);
    }

    fn zone_label_changed(&self, zone: ZoneId, label: &str) {
        tracing::info!("Zone {} label: {}", zone, label);
    }

    fn zone_source_changed(&self, zone: ZoneId, source: SourceId) {
        tracing::info!("Zone {} source: {}", zone, source);
    }

    fn zone_volume_changed(&self, zone: ZoneId, level: VolumeLevel) {
        tracing::info!("Zone {} volume level: {}", zone, level);
    }

    fn zone_mute_changed(&self, zone: ZoneId, muted: bool) {
        tracing::info!("Zone {} muted: {}", zone, muted);
    }

    fn zone_eq_changed(&self, zone: ZoneId, eq: EqSettings) {
        tracing::info!(
            "Zone {} EQ: treble {:+}, mid {:+}, bass {:+}",
            zone,
            eq.treble,
            eq.mid,
            eq.bass
        );
    }

    fn zone_enabled_inputs_changed(&self, zone: ZoneId, inputs: &BTreeSet<SourceId>) {
        tracing::info!("Zone {} enabled inputs: {:?}", zone, inputs);
    }

    fn source_label_changed(&self, source: SourceId, label: &str) {
        tracing::info!("Source {} label: {}", source, label);
    }
}

/// Ordered set of registered listeners
#[derive(Clone, Default)]
pub(crate) struct ListenerRegistry {
    listeners: Arc<RwLock<Vec<(ListenerId, Arc<dyn MixerListener>)>>>,
}

impl ListenerRegistry {
    pub fn register(&self, listener: Arc<dyn MixerListener>) -> ListenerId {
        let id = Uuid::new_v4();
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, listener));
        id
    }

    pub fn unregister(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Deliver an event to every listener
    pub fn dispatch(&self, event: &MixerEvent) {
        // Snapshot so callbacks may (un)register without deadlocking
        let listeners: Vec<_> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        for (id, listener) in listeners {
            let result = catch_unwind(AssertUnwindSafe(|| deliver(listener.as_ref(), event)));
            if result.is_err() {
                tracing::error!("Listener {} panicked handling {:?}", id, event);
            }
        }
    }
}

fn deliver(listener: &dyn MixerListener, event: &MixerEvent) {
    match event {
        MixerEvent::ConnectionStateChanged { state } => listener.connection_state_changed(*state),
        MixerEvent::ZoneLabelChanged { zone, label } => listener.zone_label_changed(*zone, label),
        MixerEvent::ZoneSourceChanged { zone, source } => {
            listener.zone_source_changed(*zone, *source)
        }
        MixerEvent::ZoneVolumeChanged { zone, level } => {
            listener.zone_volume_changed(*zone, *level)
        }
        MixerEvent::ZoneMuteChanged { zone, muted } => listener.zone_mute_changed(*zone, *muted),
        MixerEvent::ZoneEqChanged { zone, eq } => listener.zone_eq_changed(*zone, *eq),
        MixerEvent::ZoneEnabledInputsChanged { zone, inputs } => {
            listener.zone_enabled_inputs_changed(*zone, inputs)
        }
        MixerEvent::SourceLabelChanged { source, label } => {
            listener.source_label_changed(*source, label)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl MixerListener for Recorder {
        fn zone_volume_changed(&self, zone: ZoneId, level: VolumeLevel) {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{}:{}", self.name, zone, level));
        }
    }

    struct Panicker;

    impl MixerListener for Panicker {
        fn zone_volume_changed(&self, _zone: ZoneId, _level: VolumeLevel) {
            panic!("listener bug");
        }
    }

    #[test]
    fn dispatch_runs_in_registration_order_past_panics() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = ListenerRegistry::default();
        registry.register(Arc::new(Recorder { name: "a", log: log.clone() }));
        registry.register(Arc::new(Panicker));
        registry.register(Arc::new(Recorder { name: "b", log: log.clone() }));

        registry.dispatch(&MixerEvent::ZoneVolumeChanged { zone: 1, level: 20 });

        assert_eq!(*log.lock().unwrap(), vec!["a:1:20", "b:1:20"]);
    }

    #[test]
    fn unregister_removes_listener() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = ListenerRegistry::default();
        let id = registry.register(Arc::new(Recorder { name: "a", log: log.clone() }));
        assert_eq!(registry.len(), 1);
        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));

        registry.dispatch(&MixerEvent::ZoneVolumeChanged { zone: 1, level: 20 });
        assert!(log.lock().unwrap().is_empty());
    }
}
