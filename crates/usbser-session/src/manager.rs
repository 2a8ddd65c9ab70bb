//! Session manager
//!
//! Front door of the subsystem: enumerates devices, opens sessions, and
//! keeps a registry of live sessions by port key so that hosts can address
//! them without holding the handle.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex as StdMutex, MutexGuard};

use tracing::{info, warn};
use usbser_detect::{DeviceDescriptor, DeviceScanner, DeviceSource};
use usbser_transport::{Connector, DeviceError, SerialConfig, SerialConnector, SerialSettings};

use crate::error::SessionError;
use crate::events::{Observer, SessionEvent};
use crate::options::SessionOptions;
use crate::session::Session;
use crate::state::SessionState;

struct Registry<T> {
    sessions: HashMap<String, Session<T>>,
    /// Keys with an open in progress
    connecting: HashSet<String>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            sessions: HashMap::new(),
            connecting: HashSet::new(),
        }
    }
}

fn lock<T>(registry: &StdMutex<Registry<T>>) -> MutexGuard<'_, Registry<T>> {
    registry.lock().unwrap_or_else(|e| e.into_inner())
}

/// Claim on a port key while its connect is in flight
///
/// Dropping it releases the key, so a cancelled connect does not leave the
/// device looking busy.
struct Reservation<'a, T> {
    registry: &'a StdMutex<Registry<T>>,
    key: String,
}

impl<T> Reservation<'_, T> {
    fn register(self, session: Session<T>) {
        lock(self.registry)
            .sessions
            .insert(self.key.clone(), session);
    }
}

impl<T> Drop for Reservation<'_, T> {
    fn drop(&mut self) {
        lock(self.registry).connecting.remove(&self.key);
    }
}

async fn notify_failure(observer: &Observer, key: &str, error: &SessionError) {
    let _ = observer
        .send(SessionEvent::Error {
            key: key.to_string(),
            kind: error.kind(),
            message: error.to_string(),
            fatal: true,
        })
        .await;
}

async fn notify_state(observer: &Observer, key: &str, from: SessionState, to: SessionState) {
    let _ = observer
        .send(SessionEvent::StateChanged {
            key: key.to_string(),
            from,
            to,
        })
        .await;
}

fn aggregate(failures: Vec<String>) -> Result<(), SessionError> {
    if failures.is_empty() {
        Ok(())
    } else {
        Err(SessionError::Multiple(failures))
    }
}

/// Opens and tracks sessions
///
/// `S` lists devices, `C` opens them. One active session per port key.
pub struct SessionManager<S, C: Connector> {
    source: S,
    connector: C,
    options: SessionOptions,
    registry: StdMutex<Registry<C::Io>>,
}

impl SessionManager<DeviceScanner, SerialConnector> {
    /// Manager over the host's real serial ports
    pub fn system() -> Self {
        Self::new(DeviceScanner::new(), SerialConnector::new())
    }
}

impl<S: DeviceSource, C: Connector> SessionManager<S, C> {
    pub fn new(source: S, connector: C) -> Self {
        Self {
            source,
            connector,
            options: SessionOptions::default(),
            registry: StdMutex::new(Registry::default()),
        }
    }

    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    fn registry(&self) -> MutexGuard<'_, Registry<C::Io>> {
        lock(&self.registry)
    }

    /// Attached devices; an empty list is not an error
    pub fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, SessionError> {
        Ok(self.source.list_devices()?)
    }

    /// Open a session on `device`
    ///
    /// Every event of the session, including a failure to open, goes to
    /// `observer`. Fails with `AlreadyConnected` while another session holds
    /// the same port key.
    pub async fn connect(
        &self,
        device: &DeviceDescriptor,
        config: SerialConfig,
        observer: Observer,
    ) -> Result<Session<C::Io>, SessionError> {
        let reservation = match self.reserve(&device.key, &config) {
            Ok(reservation) => reservation,
            Err(e) => {
                warn!("Connect to {} refused: {}", device.key, e);
                notify_failure(&observer, &device.key, &e).await;
                return Err(e);
            }
        };

        let session = self.open_session(device, config, observer).await?;
        reservation.register(session.clone());
        Ok(session)
    }

    /// Open a session on the device with enumeration id `device_id`
    pub async fn connect_by_id(
        &self,
        device_id: u32,
        settings: &SerialSettings,
        observer: Observer,
    ) -> Result<Session<C::Io>, SessionError> {
        let lookup = settings
            .to_config()
            .map_err(SessionError::from)
            .and_then(|config| {
                let device = self
                    .list_devices()?
                    .into_iter()
                    .find(|d| d.device_id == device_id)
                    .ok_or_else(|| DeviceError::NotFound(format!("device id {}", device_id)))?;
                Ok((device, config))
            });

        match lookup {
            Ok((device, config)) => self.connect(&device, config, observer).await,
            Err(e) => {
                warn!("Connect to device id {} refused: {}", device_id, e);
                notify_failure(&observer, &device_id.to_string(), &e).await;
                Err(e)
            }
        }
    }

    /// Validate and claim `key` for a new connection
    fn reserve(
        &self,
        key: &str,
        config: &SerialConfig,
    ) -> Result<Reservation<'_, C::Io>, SessionError> {
        config.validate()?;
        self.options.validate()?;

        let mut registry = self.registry();
        let busy = registry.connecting.contains(key)
            || registry
                .sessions
                .get(key)
                .is_some_and(|s| s.state().is_active());
        if busy {
            return Err(SessionError::AlreadyConnected(key.to_string()));
        }
        // Whatever is left under this key has ended
        registry.sessions.remove(key);
        registry.connecting.insert(key.to_string());
        Ok(Reservation {
            registry: &self.registry,
            key: key.to_string(),
        })
    }

    async fn open_session(
        &self,
        device: &DeviceDescriptor,
        config: SerialConfig,
        observer: Observer,
    ) -> Result<Session<C::Io>, SessionError> {
        let key = device.key.as_str();
        notify_state(&observer, key, SessionState::Disconnected, SessionState::Connecting).await;
        info!("Connecting to {} @ {}", device.path, config);

        let timeout = self.options.connect_timeout();
        let opened = tokio::time::timeout(timeout, self.connector.open(&device.path, &config)).await;

        let error = match opened {
            Ok(Ok(transport)) => {
                match Session::start(device.clone(), transport, &self.options, observer.clone())
                    .await
                {
                    Ok(session) => return Ok(session),
                    Err(e) => e,
                }
            }
            Ok(Err(e)) => SessionError::Device(e),
            Err(_) => SessionError::Timeout {
                key: key.to_string(),
                timeout_ms: self.options.connect_timeout_ms,
            },
        };

        warn!("Connect to {} failed: {}", key, error);
        notify_failure(&observer, key, &error).await;
        notify_state(&observer, key, SessionState::Connecting, SessionState::Error).await;
        notify_state(&observer, key, SessionState::Error, SessionState::Disconnected).await;
        Err(error)
    }

    /// Close `session` and drop it from the registry
    pub async fn disconnect(&self, session: &Session<C::Io>) -> Result<(), SessionError> {
        let result = session.disconnect().await;
        let mut registry = self.registry();
        if registry
            .sessions
            .get(session.key())
            .is_some_and(|s| s.same_session(session))
        {
            registry.sessions.remove(session.key());
        }
        result
    }

    /// Close the session registered under `key`
    pub async fn disconnect_key(&self, key: &str) -> Result<(), SessionError> {
        let session = self
            .session(key)
            .ok_or_else(|| SessionError::NotConnected(key.to_string()))?;
        self.disconnect(&session).await
    }

    /// Close each listed session, carrying on past failures
    ///
    /// Every failure, unknown keys included, is reported in one
    /// [`SessionError::Multiple`].
    pub async fn disconnect_many<I, K>(&self, keys: I) -> Result<(), SessionError>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let mut failures = Vec::new();
        for key in keys {
            let key = key.as_ref();
            if let Err(e) = self.disconnect_key(key).await {
                warn!("Disconnect of {} failed: {}", key, e);
                failures.push(format!("{}: {}", key, e));
            }
        }
        aggregate(failures)
    }

    /// Close every registered session
    pub async fn disconnect_all(&self) -> Result<(), SessionError> {
        let sessions: Vec<_> = self.registry().sessions.values().cloned().collect();
        info!("Disconnecting {} session(s)", sessions.len());

        let mut failures = Vec::new();
        for session in &sessions {
            if let Err(e) = self.disconnect(session).await {
                warn!("Disconnect of {} failed: {}", session.key(), e);
                failures.push(format!("{}: {}", session.key(), e));
            }
        }
        aggregate(failures)
    }

    pub async fn write(&self, session: &Session<C::Io>, data: &[u8]) -> Result<usize, SessionError> {
        session.write(data).await
    }

    /// Write to the session registered under `key`
    pub async fn write_to(&self, key: &str, data: &[u8]) -> Result<usize, SessionError> {
        let session = self
            .session(key)
            .ok_or_else(|| SessionError::NotConnected(key.to_string()))?;
        session.write(data).await
    }

    /// Live session registered under `key`
    ///
    /// Sessions that have fully ended are pruned and yield `None`.
    pub fn session(&self, key: &str) -> Option<Session<C::Io>> {
        let mut registry = self.registry();
        match registry.sessions.get(key) {
            Some(session) if session.state() == SessionState::Disconnected => {
                registry.sessions.remove(key);
                None
            }
            Some(session) => Some(session.clone()),
            None => None,
        }
    }

    /// Keys of the sessions currently connected, sorted
    pub fn active_keys(&self) -> Vec<String> {
        let registry = self.registry();
        let mut keys: Vec<_> = registry
            .sessions
            .iter()
            .filter(|(_, s)| s.is_connected())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tokio::sync::mpsc;
    use usbser_sim::{DeviceBehavior, VirtualConnector};

    fn manager() -> SessionManager<VirtualConnector, VirtualConnector> {
        let sim = VirtualConnector::new();
        sim.add_device("/dev/ttySIM0", DeviceBehavior::Echo);
        SessionManager::new(sim.clone(), sim)
    }

    #[tokio::test]
    async fn test_invalid_config_is_reported_to_observer() {
        let manager = manager();
        let device = manager.list_devices().unwrap().remove(0);
        let (tx, mut rx) = mpsc::channel(16);

        let err = manager
            .connect(&device, SerialConfig::new(0), tx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);

        match rx.recv().await.unwrap() {
            SessionEvent::Error { kind, fatal, .. } => {
                assert_eq!(kind, ErrorKind::Config);
                assert!(fatal);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(manager.active_keys().is_empty());
        assert_eq!(manager.connector().open_count("/dev/ttySIM0"), 0);
    }

    #[tokio::test]
    async fn test_second_connect_to_same_key_is_refused() {
        let manager = manager();
        let device = manager.list_devices().unwrap().remove(0);
        let (tx, _rx) = mpsc::channel(16);

        let session = manager
            .connect(&device, SerialConfig::default(), tx.clone())
            .await
            .unwrap();
        let err = manager
            .connect(&device, SerialConfig::default(), tx)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::AlreadyConnected(_)));
        assert_eq!(manager.active_keys(), vec![session.key().to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_key_is_not_connected() {
        let manager = manager();
        assert!(matches!(
            manager.disconnect_key("/dev/ttyNOPE_1").await,
            Err(SessionError::NotConnected(_))
        ));
        assert!(matches!(
            manager.write_to("/dev/ttyNOPE_1", b"x").await,
            Err(SessionError::NotConnected(_))
        ));
        assert!(manager.session("/dev/ttyNOPE_1").is_none());
    }

    #[tokio::test]
    async fn test_cancelled_connect_releases_key() {
        let manager = manager();
        manager
            .connector()
            .set_open_delay("/dev/ttySIM0", std::time::Duration::from_millis(500));
        let device = manager.list_devices().unwrap().remove(0);
        let (tx, _rx) = mpsc::channel(16);

        let cancelled = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            manager.connect(&device, SerialConfig::default(), tx.clone()),
        )
        .await;
        assert!(cancelled.is_err());

        manager
            .connector()
            .set_open_delay("/dev/ttySIM0", std::time::Duration::ZERO);
        let session = manager
            .connect(&device, SerialConfig::default(), tx)
            .await
            .unwrap();
        assert!(session.is_connected());
        assert_eq!(manager.active_keys(), vec![device.key.clone()]);
    }

    #[tokio::test]
    async fn test_disconnect_all_with_nothing_open() {
        assert!(manager().disconnect_all().await.is_ok());
    }
}
