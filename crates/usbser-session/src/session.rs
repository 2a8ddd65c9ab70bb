//! A live connection to one device
//!
//! Each [`Session`] owns one open transport, split in two: the read half is
//! driven by a spawned read-loop task that frames incoming bytes and sends
//! them to the observer, the write half sits behind an async mutex so that
//! concurrent writers never interleave.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use usbser_detect::DeviceDescriptor;
use usbser_framing::Framer;
use usbser_transport::{
    SerialConfig, SerialIo, SerialTransport, TransportError, TransportReader, TransportWriter,
};

use crate::error::{ErrorKind, SessionError};
use crate::events::{DisconnectReason, Observer, SessionEvent};
use crate::options::{ReadErrorPolicy, SessionOptions};
use crate::state::SessionState;

/// Traffic counters for one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub frames: u64,
    pub read_errors: u64,
}

#[derive(Default)]
struct Counters {
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    frames: AtomicU64,
    read_errors: AtomicU64,
}

impl Counters {
    fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SessionStats {
        SessionStats {
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
        }
    }
}

struct Inner<T> {
    key: String,
    descriptor: DeviceDescriptor,
    config: SerialConfig,
    state_tx: watch::Sender<SessionState>,
    writer: Mutex<Option<TransportWriter<T>>>,
    shutdown_tx: watch::Sender<bool>,
    /// Yields the read half back when the loop was asked to stop
    read_task: StdMutex<Option<JoinHandle<Option<TransportReader<T>>>>>,
    observer: Observer,
    counters: Counters,
}

impl<T: SerialIo> Inner<T> {
    fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    fn read_task(&self) -> MutexGuard<'_, Option<JoinHandle<Option<TransportReader<T>>>>> {
        self.read_task.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn emit(&self, event: SessionEvent) {
        if self.observer.send(event).await.is_err() {
            debug!("Observer for {} is gone, event dropped", self.key);
        }
    }

    /// Hand events to the observer without waiting for room
    ///
    /// Whatever does not fit right now goes to a task that delivers it in
    /// order, so teardown never stalls behind a slow observer.
    fn post(&self, events: Vec<SessionEvent>) {
        let mut events = events.into_iter();
        while let Some(event) = events.next() {
            match self.observer.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Closed(_)) => {
                    debug!("Observer for {} is gone, events dropped", self.key);
                    return;
                }
                Err(TrySendError::Full(event)) => {
                    let backlog: Vec<_> = std::iter::once(event).chain(events).collect();
                    warn!(
                        "Observer for {} is full, {} event(s) left to deliver",
                        self.key,
                        backlog.len()
                    );
                    let observer = self.observer.clone();
                    tokio::spawn(async move {
                        for event in backlog {
                            if observer.send(event).await.is_err() {
                                break;
                            }
                        }
                    });
                    return;
                }
            }
        }
    }

    fn error_event(&self, kind: ErrorKind, message: String, fatal: bool) -> SessionEvent {
        SessionEvent::Error {
            key: self.key.clone(),
            kind,
            message,
            fatal,
        }
    }

    fn state_event(&self, from: SessionState, to: SessionState) -> SessionEvent {
        debug!("{}: {} -> {}", self.key, from, to);
        SessionEvent::StateChanged {
            key: self.key.clone(),
            from,
            to,
        }
    }

    /// Move to `to` if that is legal from the current state
    ///
    /// Returns the previous state, or `None` (and changes nothing) if the
    /// transition is not allowed.
    fn try_set(&self, to: SessionState) -> Option<SessionState> {
        let mut from = None;
        self.state_tx.send_if_modified(|state| {
            if state.can_transition_to(to) {
                from = Some(*state);
                *state = to;
                true
            } else {
                false
            }
        });
        from
    }

    async fn transition(&self, to: SessionState) -> bool {
        match self.try_set(to) {
            Some(from) => {
                self.emit(self.state_event(from, to)).await;
                true
            }
            None => false,
        }
    }

    /// Release the transport: waits for an in-flight write, then purges,
    /// drops DTR/RTS and closes
    async fn teardown(&self, reader: Option<TransportReader<T>>) -> Result<(), TransportError> {
        let writer = self.writer.lock().await.take();
        match (reader, writer) {
            (Some(reader), Some(writer)) => reader.unsplit(writer).close(),
            // A half went missing with a panicked task; dropping the other releases the port
            _ => Ok(()),
        }
    }

    /// Settle in `Disconnected`; returns the closing events to post
    fn finish(&self, reason: DisconnectReason) -> Vec<SessionEvent> {
        let mut events = Vec::with_capacity(2);
        if let Some(from) = self.try_set(SessionState::Disconnected) {
            events.push(self.state_event(from, SessionState::Disconnected));
        }
        info!("{} disconnected ({:?})", self.key, reason);
        events.push(SessionEvent::Disconnected {
            key: self.key.clone(),
            reason,
        });
        events
    }
}

/// Handle to one open connection
///
/// Cheap to clone; every clone refers to the same connection.
pub struct Session<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Session<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: SerialIo> fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("key", &self.inner.key)
            .field("state", &self.inner.state())
            .finish()
    }
}

impl<T: SerialIo> Session<T> {
    /// Take over an open transport and start the read loop
    pub async fn start(
        descriptor: DeviceDescriptor,
        mut transport: SerialTransport<T>,
        options: &SessionOptions,
        observer: Observer,
    ) -> Result<Self, SessionError> {
        let framer = match Framer::with_capacity(options.framing.clone(), options.buffer_capacity) {
            Ok(framer) => framer,
            Err(e) => {
                let _ = transport.close();
                return Err(e.into());
            }
        };
        let config = transport.config().clone();
        let (reader, writer) = transport.into_split()?;

        let (state_tx, _) = watch::channel(SessionState::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let inner = Arc::new(Inner {
            key: descriptor.key.clone(),
            descriptor,
            config,
            state_tx,
            writer: Mutex::new(Some(writer)),
            shutdown_tx,
            read_task: StdMutex::new(None),
            observer,
            counters: Counters::default(),
        });

        inner.transition(SessionState::Connected).await;
        info!("{} connected @ {}", inner.key, inner.config);

        let read_loop = ReadLoop {
            inner: Arc::clone(&inner),
            reader,
            framer,
            shutdown_rx,
            policy: options.read_errors,
        };
        let handle = tokio::spawn(read_loop.run());
        *inner.read_task() = Some(handle);

        Ok(Self { inner })
    }

    /// Port key (`<path>_<device_id>`)
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.inner.descriptor
    }

    pub fn config(&self) -> &SerialConfig {
        &self.inner.config
    }

    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Receiver that sees every state change
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn stats(&self) -> SessionStats {
        self.inner.counters.snapshot()
    }

    /// Whether both handles refer to the same connection
    pub fn same_session(&self, other: &Session<T>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Write the whole buffer to the device
    ///
    /// Concurrent calls are serialized: each call's bytes reach the device
    /// contiguously. Fails with an I/O error once the session is closing or
    /// closed.
    pub async fn write(&self, data: &[u8]) -> Result<usize, SessionError> {
        let result = {
            let mut writer = self.inner.writer.lock().await;
            match writer.as_mut() {
                Some(writer) if self.is_connected() => writer.write(data).await,
                _ => Err(TransportError::Closed(self.inner.key.clone())),
            }
        };

        match result {
            Ok(n) => {
                Counters::add(&self.inner.counters.bytes_written, n as u64);
                Ok(n)
            }
            Err(e) => {
                if self.is_connected() {
                    warn!("Write to {} failed: {}", self.inner.key, e);
                    let event = self.inner.error_event(ErrorKind::Io, e.to_string(), false);
                    self.inner.post(vec![event]);
                }
                Err(e.into())
            }
        }
    }

    /// Stop the read loop, wait for in-flight writes, and release the device
    ///
    /// Calling this on a session that is already closed (or closing) waits
    /// for it to settle and succeeds. A failure while tearing down the line
    /// is reported, but the device is released regardless. Never waits on
    /// the observer: the closing events are posted after the device is free.
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        let inner = &self.inner;
        let Some(from) = inner.try_set(SessionState::Closing) else {
            let mut state_rx = inner.state_tx.subscribe();
            let _ = state_rx
                .wait_for(|state| *state == SessionState::Disconnected)
                .await;
            return Ok(());
        };

        info!("Disconnecting {}", inner.key);
        inner.shutdown_tx.send_replace(true);

        let task = inner.read_task().take();
        let reader = match task {
            Some(task) => task.await.unwrap_or_else(|e| {
                error!("Read loop for {} panicked: {}", inner.key, e);
                None
            }),
            None => None,
        };

        let closed = inner.teardown(reader).await;
        let mut events = vec![inner.state_event(from, SessionState::Closing)];
        if let Err(e) = &closed {
            warn!("Closing {} failed: {}", inner.key, e);
            events.push(inner.error_event(ErrorKind::Io, format!("close failed: {}", e), false));
        }
        events.extend(inner.finish(DisconnectReason::Requested));
        inner.post(events);
        closed.map_err(SessionError::from)
    }
}

/// Why the read loop stopped
enum LoopExit {
    Shutdown,
    Detached,
    Failed(TransportError),
}

struct ReadLoop<T> {
    inner: Arc<Inner<T>>,
    reader: TransportReader<T>,
    framer: Framer,
    shutdown_rx: watch::Receiver<bool>,
    policy: ReadErrorPolicy,
}

impl<T: SerialIo> ReadLoop<T> {
    /// Task body: returns the read half when `disconnect` owns the teardown
    async fn run(mut self) -> Option<TransportReader<T>> {
        info!("Starting read loop for {}", self.inner.key);

        let exit = self.read_until_exit().await;
        self.flush_trailing(&exit).await;

        let ReadLoop { inner, reader, .. } = self;
        let (reason, message) = match exit {
            LoopExit::Shutdown => {
                info!("Read loop ended for {}", inner.key);
                return Some(reader);
            }
            LoopExit::Detached => (
                DisconnectReason::DeviceDetached,
                format!("device {} was detached", inner.descriptor.path),
            ),
            LoopExit::Failed(e) => (DisconnectReason::Failed, e.to_string()),
        };

        let Some(from) = inner.try_set(SessionState::Error) else {
            debug!("{} ended while closing: {}", inner.key, message);
            return Some(reader);
        };
        error!("Read loop for {} failed: {}", inner.key, message);

        if let Err(e) = inner.teardown(Some(reader)).await {
            warn!("Closing {} after failure: {}", inner.key, e);
        }
        let mut events = vec![
            inner.state_event(from, SessionState::Error),
            inner.error_event(ErrorKind::Io, message, true),
        ];
        events.extend(inner.finish(reason));
        inner.post(events);
        None
    }

    async fn read_until_exit(&mut self) -> LoopExit {
        let mut consecutive = 0u32;

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => return LoopExit::Shutdown,

                result = self.reader.read_chunk() => match result {
                    Ok(bytes) => {
                        consecutive = 0;
                        if !self.deliver(&bytes).await {
                            return LoopExit::Shutdown;
                        }
                    }
                    Err(TransportError::Disconnected(_)) => return LoopExit::Detached,
                    Err(e) => {
                        Counters::add(&self.inner.counters.read_errors, 1);
                        consecutive += 1;
                        if !e.is_transient() || consecutive >= self.policy.max_consecutive {
                            return LoopExit::Failed(e);
                        }
                        warn!(
                            "Read error on {} ({}/{}): {}",
                            self.inner.key, consecutive, self.policy.max_consecutive, e
                        );
                        let event = SessionEvent::Error {
                            key: self.inner.key.clone(),
                            kind: ErrorKind::Io,
                            message: e.to_string(),
                            fatal: false,
                        };
                        if !self.emit(event).await {
                            return LoopExit::Shutdown;
                        }
                    }
                }
            }
        }
    }

    /// Frame a chunk and send out every frame it completes
    ///
    /// A chunk larger than the free buffer space is fed in pieces, draining
    /// in between; a full buffer always yields a frame, so nothing is lost.
    /// Returns false if shutdown was requested while the observer was full.
    async fn deliver(&mut self, bytes: &[u8]) -> bool {
        Counters::add(&self.inner.counters.bytes_read, bytes.len() as u64);
        let mut rest = bytes;

        loop {
            let accepted = self.framer.feed(rest);
            rest = &rest[accepted..];

            let mut drained = 0;
            while let Some(frame) = self.framer.next_frame() {
                drained += 1;
                Counters::add(&self.inner.counters.frames, 1);
                if !frame.complete {
                    debug!("{}: {}-byte frame split without terminator", self.inner.key, frame.len());
                }
                let event = SessionEvent::Data {
                    key: self.inner.key.clone(),
                    frame,
                };
                if !self.emit(event).await {
                    return false;
                }
            }

            if rest.is_empty() {
                return true;
            }
            if accepted == 0 && drained == 0 {
                error!(
                    "{}: framer made no progress, discarding {} byte(s)",
                    self.inner.key,
                    rest.len()
                );
                return true;
            }
        }
    }

    /// Send an event, unless shutdown is requested first
    async fn emit(&mut self, event: SessionEvent) -> bool {
        let stopping = *self.shutdown_rx.borrow();
        if stopping {
            return false;
        }
        tokio::select! {
            _ = self.shutdown_rx.changed() => false,
            sent = self.inner.observer.send(event) => {
                if sent.is_err() {
                    debug!("Observer for {} is gone, event dropped", self.inner.key);
                }
                true
            }
        }
    }

    /// Hand leftover bytes (a partial frame) to the observer
    async fn flush_trailing(&mut self, exit: &LoopExit) {
        let Some(frame) = self.framer.flush() else {
            return;
        };
        let len = frame.len();
        debug!("Flushing {} trailing byte(s) from {}", len, self.inner.key);
        let event = SessionEvent::Data {
            key: self.inner.key.clone(),
            frame,
        };
        match exit {
            LoopExit::Shutdown => {
                if self.inner.observer.try_send(event).is_err() {
                    warn!(
                        "Dropped {} trailing byte(s) from {}: observer not accepting",
                        len, self.inner.key
                    );
                }
            }
            LoopExit::Detached | LoopExit::Failed(_) => {
                self.emit(event).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio::sync::mpsc;
    use usbser_framing::FramingPolicy;

    fn start_pair(
        options: SessionOptions,
    ) -> (
        impl std::future::Future<Output = Result<Session<DuplexStream>, SessionError>>,
        DuplexStream,
        mpsc::Receiver<SessionEvent>,
    ) {
        let (host, device) = duplex(1024);
        let (tx, rx) = mpsc::channel(64);
        let descriptor = DeviceDescriptor::new("/dev/ttyTEST0", 0x0403, 0x6001);
        let transport = SerialTransport::new("/dev/ttyTEST0", host, SerialConfig::default());
        let fut = async move { Session::start(descriptor, transport, &options, tx).await };
        (fut, device, rx)
    }

    async fn next_event(rx: &mut mpsc::Receiver<SessionEvent>) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("observer channel closed")
    }

    #[tokio::test]
    async fn test_start_reports_connected() {
        let (start, _device, mut rx) = start_pair(SessionOptions::default());
        let session = start.await.unwrap();

        assert_eq!(session.state(), SessionState::Connected);
        match next_event(&mut rx).await {
            SessionEvent::StateChanged { from, to, .. } => {
                assert_eq!(from, SessionState::Connecting);
                assert_eq!(to, SessionState::Connected);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_frames_are_delivered_in_order() {
        let options = SessionOptions::default().with_framing(FramingPolicy::lines());
        let (start, mut device, mut rx) = start_pair(options);
        let session = start.await.unwrap();
        next_event(&mut rx).await;

        device.write_all(b"ab").await.unwrap();
        device.write_all(b"cd\nef\n").await.unwrap();

        assert_eq!(next_event(&mut rx).await.data(), Some(&b"abcd"[..]));
        assert_eq!(next_event(&mut rx).await.data(), Some(&b"ef"[..]));
        assert_eq!(session.stats().frames, 2);
        assert_eq!(session.stats().bytes_read, 8);
    }

    #[tokio::test]
    async fn test_write_reaches_device() {
        let (start, mut device, _rx) = start_pair(SessionOptions::default());
        let session = start.await.unwrap();

        assert_eq!(session.write(b"AT\r\n").await.unwrap(), 4);
        let mut buf = [0u8; 8];
        let n = device.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"AT\r\n");
        assert_eq!(session.stats().bytes_written, 4);
    }

    #[tokio::test]
    async fn test_disconnect_then_write_fails() {
        let (start, _device, mut rx) = start_pair(SessionOptions::default());
        let session = start.await.unwrap();

        session.disconnect().await.unwrap();
        assert_eq!(session.state(), SessionState::Disconnected);

        let err = session.write(b"late").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(matches!(err, SessionError::Io(TransportError::Closed(_))));

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(events.last().is_some_and(SessionEvent::is_terminal));
        assert!(!events.iter().any(SessionEvent::is_error));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (start, _device, _rx) = start_pair(SessionOptions::default());
        let session = start.await.unwrap();

        session.disconnect().await.unwrap();
        session.disconnect().await.unwrap();
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_device_eof_is_fatal() {
        let (start, device, mut rx) = start_pair(SessionOptions::default());
        let session = start.await.unwrap();
        next_event(&mut rx).await;

        drop(device);

        let mut saw_error = false;
        loop {
            match next_event(&mut rx).await {
                SessionEvent::Error { fatal, kind, .. } => {
                    assert!(fatal);
                    assert_eq!(kind, ErrorKind::Io);
                    saw_error = true;
                }
                SessionEvent::Disconnected { reason, .. } => {
                    assert_eq!(reason, DisconnectReason::DeviceDetached);
                    break;
                }
                SessionEvent::StateChanged { .. } => {}
                other => panic!("unexpected event: {:?}", other),
            }
        }
        assert!(saw_error);
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_trailing_bytes_flushed_on_detach() {
        let options = SessionOptions::default().with_framing(FramingPolicy::lines());
        let (start, mut device, mut rx) = start_pair(options);
        let _session = start.await.unwrap();
        next_event(&mut rx).await;

        device.write_all(b"partial").await.unwrap();
        drop(device);

        loop {
            if let SessionEvent::Data { frame, .. } = next_event(&mut rx).await {
                assert_eq!(frame.bytes, b"partial");
                assert!(!frame.complete);
                break;
            }
        }
    }
}
