use crate::config::MixerConfig;
use crate::connection::{self, Shared};
use crate::debounce::EqDebouncer;
use crate::error::{Dcm1Error, Result};
use crate::heartbeat;
use crate::listener::{ListenerId, MixerListener};
use crate::protocol::Command;
use crate::state::MixerState;
use crate::subscription::StateReceiver;
use crate::types::{
    check_eq, check_source, check_volume, check_zone, zone_ids, ConnectionState, EqParameter,
    Priority, Source, SourceId, VolumeLevel, Zone, ZoneId,
};
use crate::zone::ZoneControl;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Client for a Cloud DCM1 zone mixer
///
/// Setters validate their arguments, enqueue the command followed by a
/// confirmation query, and return immediately. The mirrored state only
/// changes once the device answers.
#[derive(Clone)]
pub struct Dcm1Mixer {
    inner: Arc<MixerInner>,
}

struct MixerInner {
    shared: Arc<Shared>,
    debouncer: EqDebouncer,
    stop_tx: broadcast::Sender<()>,
    /// Serialises `connect` calls
    connecting: tokio::sync::Mutex<()>,
    /// Checked together with `shut_down` before spawning the session
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl Drop for MixerInner {
    fn drop(&mut self) {
        self.debouncer.cancel_all();
        let _ = self.stop_tx.send(());
    }
}

impl Dcm1Mixer {
    /// Create a client without touching the network
    ///
    /// Register listeners before calling [`connect`](Self::connect) to see
    /// the initial state arrive.
    pub fn new(config: MixerConfig) -> Self {
        let shared = Arc::new(Shared::new(config));
        let debouncer = EqDebouncer::new(shared.queue.clone(), shared.config.eq_debounce());
        let (stop_tx, _) = broadcast::channel(1);
        Self {
            inner: Arc::new(MixerInner {
                shared,
                debouncer,
                stop_tx,
                connecting: tokio::sync::Mutex::new(()),
                tasks: Mutex::new(Vec::new()),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    /// Create a client and connect to `host:port`
    ///
    /// # Example
    ///
    /// ```no_run
    /// use cloud_dcm1::Dcm1Mixer;
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let mixer = Dcm1Mixer::connect_to("192.168.1.50", 4999).await?;
    ///     mixer.set_zone_volume(1, 20)?;
    ///     Ok(())
    /// }
    /// ```
    pub async fn connect_to(host: impl Into<String>, port: u16) -> Result<Self> {
        let mixer = Self::new(MixerConfig::new(host, port));
        mixer.connect().await?;
        Ok(mixer)
    }

    /// Open the first connection and start the background session
    ///
    /// A failure here is returned to the caller. Once connected, later
    /// losses are recovered in the background. Calling this while a session
    /// is running does nothing. A concurrent [`disconnect`](Self::disconnect)
    /// wins: the connection is abandoned and `NotRunning` is returned.
    pub async fn connect(&self) -> Result<()> {
        let _connecting = self.inner.connecting.lock().await;
        self.ensure_running()?;
        if !self.tasks().is_empty() {
            return Ok(());
        }

        // Subscribe before opening so a disconnect during the open is seen
        let mut open_stop = self.inner.stop_tx.subscribe();
        let session_stop = self.inner.stop_tx.subscribe();
        let heartbeat_stop = self.inner.stop_tx.subscribe();

        let shared = &self.inner.shared;
        shared.set_connection_state(ConnectionState::Connecting);
        let opened = tokio::select! {
            _ = open_stop.recv() => Err(Dcm1Error::NotRunning),
            opened = connection::open(&shared.config) => opened,
        };
        let stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                if !matches!(e, Dcm1Error::NotRunning) {
                    tracing::error!("Failed to connect to {}: {}", shared.config.address(), e);
                }
                shared.set_connection_state(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        let mut tasks = self.tasks();
        if self.inner.shut_down.load(Ordering::SeqCst) {
            drop(stream);
            shared.set_connection_state(ConnectionState::Disconnected);
            return Err(Dcm1Error::NotRunning);
        }
        tasks.push(tokio::spawn(connection::run_session(
            shared.clone(),
            stream,
            session_stop,
        )));
        if shared.config.heartbeat_enabled {
            tasks.push(heartbeat::spawn(
                shared.queue.clone(),
                shared.connection.subscribe(),
                shared.config.heartbeat_interval(),
                heartbeat_stop,
            ));
        }
        Ok(())
    }

    /// Stop the session, drop pending work and close the socket
    ///
    /// The client cannot be reconnected afterwards.
    pub async fn disconnect(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Disconnecting from {}", self.inner.shared.config.address());

        self.inner.debouncer.cancel_all();
        let _ = self.inner.stop_tx.send(());

        // Taken after the flag is set, so a racing connect either sees the
        // flag or has already pushed its handles here
        let handles: Vec<_> = self.tasks().drain(..).collect();
        for handle in handles {
            // Give it a moment to stop gracefully
            let _ = tokio::time::timeout(Duration::from_millis(500), handle).await;
        }

        self.inner.shared.queue.clear();
        self.inner
            .shared
            .set_connection_state(ConnectionState::Disconnected);
    }

    fn tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.inner.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_running(&self) -> Result<()> {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            Err(Dcm1Error::NotRunning)
        } else {
            Ok(())
        }
    }

    /// Enqueue a set command and the query that confirms it
    fn send_user(&self, command: Command) {
        let confirmation = command.confirmation();
        self.inner
            .shared
            .queue
            .push(Priority::User, std::iter::once(command).chain(confirmation));
    }

    // ========== Commands ==========

    /// Select the line input feeding a zone
    pub fn set_zone_source(&self, zone: ZoneId, source: SourceId) -> Result<()> {
        self.ensure_running()?;
        check_zone(zone)?;
        check_source(source)?;
        self.send_user(Command::SetSource(zone, source));
        Ok(())
    }

    /// Set zone attenuation, 0 (loudest) to 61
    pub fn set_zone_volume(&self, zone: ZoneId, level: VolumeLevel) -> Result<()> {
        self.ensure_running()?;
        check_zone(zone)?;
        check_volume(level)?;
        self.send_user(Command::SetVolume(zone, level));
        Ok(())
    }

    pub fn set_zone_mute(&self, zone: ZoneId, muted: bool) -> Result<()> {
        self.ensure_running()?;
        check_zone(zone)?;
        self.send_user(Command::SetMute(zone, muted));
        Ok(())
    }

    /// Set one EQ band, -14..=14 in even steps
    ///
    /// Rapid calls for the same zone and band are coalesced; only the last
    /// value is sent once the quiet interval passes. The quiet timer runs on
    /// the current Tokio runtime, or the one the mixer was created on; with
    /// neither available this fails with `NoRuntime`.
    pub fn set_zone_eq(&self, zone: ZoneId, parameter: EqParameter, value: i8) -> Result<()> {
        self.ensure_running()?;
        check_zone(zone)?;
        check_eq(value)?;
        self.inner.debouncer.submit(zone, parameter, value)
    }

    /// Re-query the complete device state at poll priority
    pub fn query_status(&self) -> Result<()> {
        self.ensure_running()?;
        self.inner
            .shared
            .queue
            .push(Priority::Poll, connection::startup_queries());
        Ok(())
    }

    /// Number of commands waiting to be written
    pub fn pending_commands(&self) -> usize {
        self.inner.shared.queue.len()
    }

    // ========== Listeners ==========

    pub fn register_listener(&self, listener: Arc<dyn MixerListener>) -> ListenerId {
        self.inner.shared.listeners.register(listener)
    }

    pub fn unregister_listener(&self, id: ListenerId) -> bool {
        self.inner.shared.listeners.unregister(id)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.shared.listeners.len()
    }

    /// Subscribe to confirmed state changes
    pub fn subscribe(&self) -> StateReceiver {
        StateReceiver::new(self.inner.shared.events.subscribe())
    }

    // ========== Mirrored state ==========

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.shared.connection_state()
    }

    /// Consistent copy of every zone and source
    pub fn snapshot(&self) -> MixerState {
        self.inner.shared.snapshot()
    }

    pub fn zone_state(&self, zone: ZoneId) -> Option<Zone> {
        self.read_state(|state| state.zone(zone).cloned())
    }

    pub fn source_state(&self, source: SourceId) -> Option<Source> {
        self.read_state(|state| state.source(source).cloned())
    }

    /// Handle bound to a single zone
    pub fn zone(&self, zone: ZoneId) -> Option<ZoneControl> {
        check_zone(zone).ok()?;
        Some(ZoneControl::new(self.clone(), zone))
    }

    pub fn zones(&self) -> Vec<ZoneControl> {
        zone_ids()
            .map(|id| ZoneControl::new(self.clone(), id))
            .collect()
    }

    pub(crate) fn read_state<T>(&self, read: impl FnOnce(&MixerState) -> T) -> T {
        let state = self
            .inner
            .shared
            .state
            .read()
            .unwrap_or_else(|e| e.into_inner());
        read(&state)
    }

    #[cfg(test)]
    pub(crate) fn apply_for_test(&self, response: &crate::protocol::Response) {
        self.inner.shared.apply(response);
    }

    // ========== Waiting ==========

    /// True once all source labels have arrived
    pub async fn wait_for_source_labels(&self, timeout: Duration) -> bool {
        self.wait_until(timeout, MixerState::all_source_labels_known).await
    }

    /// True once every zone has a label, source, level and input map
    pub async fn wait_for_zone_data(&self, timeout: Duration) -> bool {
        self.wait_until(timeout, MixerState::all_zone_data_known).await
    }

    pub async fn wait_for_state(&self, state: ConnectionState, timeout: Duration) -> bool {
        let mut rx = self.inner.shared.connection.subscribe();
        let reached = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|current| *current == state)).await,
            Ok(Ok(_))
        );
        reached
    }

    async fn wait_until(&self, timeout: Duration, done: impl Fn(&MixerState) -> bool) -> bool {
        let mut revision = self.inner.shared.revision.subscribe();
        let wait = async {
            loop {
                if self.read_state(&done) {
                    return true;
                }
                if revision.changed().await.is_err() {
                    return false;
                }
            }
        };
        tokio::time::timeout(timeout, wait).await.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mixer() -> Dcm1Mixer {
        Dcm1Mixer::new(MixerConfig::new("127.0.0.1", 4999))
    }

    #[tokio::test]
    async fn volume_62_is_rejected() {
        let mixer = mixer();
        assert!(matches!(
            mixer.set_zone_volume(1, 62),
            Err(Dcm1Error::Validation(_))
        ));
        assert_eq!(mixer.pending_commands(), 0);
    }

    #[tokio::test]
    async fn odd_eq_never_reaches_queue() {
        let mixer = mixer();
        assert!(matches!(
            mixer.set_zone_eq(2, EqParameter::Treble, 3),
            Err(Dcm1Error::Validation(_))
        ));
        assert!(mixer.inner.debouncer.pending_value(2, EqParameter::Treble).is_none());
        assert_eq!(mixer.pending_commands(), 0);
    }

    #[test]
    fn eq_outside_runtime_fails_without_panicking() {
        let mixer = mixer();
        assert!(mixer.set_zone_volume(1, 10).is_ok());
        assert!(matches!(
            mixer.set_zone_eq(1, EqParameter::Bass, 2),
            Err(Dcm1Error::NoRuntime)
        ));
        assert_eq!(mixer.pending_commands(), 2);
    }

    #[tokio::test]
    async fn bad_ids_are_rejected() {
        let mixer = mixer();
        assert!(mixer.set_zone_source(0, 1).is_err());
        assert!(mixer.set_zone_source(1, 9).is_err());
        assert!(mixer.set_zone_mute(9, true).is_err());
        assert!(mixer.zone(9).is_none());
        assert_eq!(mixer.pending_commands(), 0);
    }

    #[tokio::test]
    async fn set_commands_queue_confirmation_queries() {
        let mixer = mixer();
        mixer.set_zone_volume(3, 25).unwrap();
        mixer.set_zone_mute(3, true).unwrap();
        assert_eq!(
            mixer.inner.shared.queue.user_commands(),
            vec![
                Command::SetVolume(3, 25),
                Command::QueryVolume(3),
                Command::SetMute(3, true),
                Command::QueryMute(3),
            ]
        );
        // Nothing is mirrored until the device answers
        assert_eq!(mixer.zone_state(3).unwrap().volume_level, None);
    }

    #[tokio::test]
    async fn commands_fail_after_disconnect() {
        let mixer = mixer();
        mixer.set_zone_volume(1, 10).unwrap();
        mixer.disconnect().await;
        assert_eq!(mixer.pending_commands(), 0);
        assert!(matches!(mixer.set_zone_volume(1, 10), Err(Dcm1Error::NotRunning)));
        assert!(matches!(mixer.connect().await, Err(Dcm1Error::NotRunning)));
        assert_eq!(mixer.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn wait_for_state_sees_current_state_and_times_out() {
        let mixer = mixer();
        assert!(
            mixer
                .wait_for_state(ConnectionState::Disconnected, Duration::from_millis(10))
                .await
        );
        assert!(
            !mixer
                .wait_for_state(ConnectionState::Connected, Duration::from_millis(10))
                .await
        );
    }

    #[tokio::test]
    async fn wait_for_source_labels_times_out_then_succeeds() {
        let mixer = mixer();
        assert!(!mixer.wait_for_source_labels(Duration::from_millis(20)).await);

        for source in 1..=8 {
            mixer.apply_for_test(&crate::protocol::Response::SourceLabel(
                source,
                format!("S{}", source),
            ));
        }
        assert!(mixer.wait_for_source_labels(Duration::from_millis(20)).await);
    }
}
