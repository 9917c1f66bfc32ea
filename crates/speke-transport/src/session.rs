//! SPEKE session state machine and frame dispatch.
//!
//! A [`SpekeSession`] owns a connected stream and a
//! [`SpekeEngine`](speke_crypto::SpekeEngine) and drives the protocol over
//! them. [`SpekeSession::run`] starts two tasks on the current runtime: a
//! reader that processes inbound frames strictly in arrival order, and a
//! writer that serializes all outbound frames through one channel. The
//! engine and session internals are not reentrant, so the reader keeps at
//! most one read outstanding and finishes dispatching each frame before
//! starting the next.
//!
//! Peer-induced failures never unwind into the caller: each one is
//! classified into a terminal [`SessionState`] and the session closes
//! itself. The message handler only ever sees payloads whose HMAC
//! verified.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use speke_core::envelope::{Envelope, FRAME_LEN_BYTES, MAX_ENVELOPE_LEN};
use speke_crypto::SpekeEngine;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, watch};

use crate::{Error, Result};

/// Number of bad HMAC signatures tolerated before the session closes with
/// [`SessionState::StoppedPeerBadBehavior`].
pub const BAD_BEHAVIOR_LIMIT: u32 = 3;

/// Session lifecycle states.
///
/// `Idle` and `Running` are live; every `Stopped*` state is terminal and
/// latched by the first close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Constructed but not yet running.
    Idle,
    /// Handshake or authenticated messaging in progress.
    Running,
    /// Closed locally.
    Stopped,
    /// Closed on a transport or envelope error.
    StoppedError,
    /// Closed because the peer disconnected.
    StoppedPeerDisconnected,
    /// Closed because the peer's public key or id failed validation.
    StoppedPeerPublicKeyOrIdInvalid,
    /// Closed because the peer's key confirmation did not match.
    StoppedKeyConfirmationFailed,
    /// Closed because the peer exceeded the bad-behavior limit.
    StoppedPeerBadBehavior,
}

impl SessionState {
    /// Whether this state is terminal.
    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionState::Idle | SessionState::Running)
    }
}

/// Callback invoked once per authenticated inbound payload.
///
/// The handler may use the [`SessionHandle`] to send, swap itself out via
/// `set_message_handler`, or close the session. It must return promptly;
/// long work belongs on a separate task.
pub type MessageHandler = Box<dyn FnMut(Vec<u8>, &SessionHandle) + Send + 'static>;

/// State shared between the session owner, its handle and its tasks.
struct Shared {
    cell: Mutex<StateCell>,
    /// Released (set to `None`) when the session reaches a terminal state.
    engine: Mutex<Option<SpekeEngine>>,
    handler: Mutex<Option<MessageHandler>>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    shutdown: watch::Sender<bool>,
}

/// Current state plus the close latch, updated together under one lock.
struct StateCell {
    state: SessionState,
    closed: bool,
}

/// A SPEKE-authenticated session over a connected stream.
///
/// Construct with a connected stream and an engine, then call
/// [`SpekeSession::run`]. Dropping the session closes it with
/// [`SessionState::Stopped`].
///
/// # Example
///
/// ```no_run
/// use num_bigint::BigUint;
/// use speke_crypto::SpekeEngine;
/// use speke_transport::{tcp::TcpEndpoint, SpekeSession};
///
/// # async fn example(safe_prime: BigUint) -> Result<(), Box<dyn std::error::Error>> {
/// let endpoint = TcpEndpoint::client();
/// let stream = endpoint.connect("192.0.2.10:4433").await?;
///
/// let engine = SpekeEngine::new("alice", b"hunter2", safe_prime)?;
/// let mut session = SpekeSession::new(stream, engine);
///
/// session.run(Box::new(|payload, handle| {
///     println!("{} byte message", payload.len());
///     let _ = handle.send(b"ack");
/// }))?;
/// # Ok(())
/// # }
/// ```
pub struct SpekeSession<S> {
    shared: Arc<Shared>,
    stream: Option<S>,
    outbound_rx: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl<S> SpekeSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Bind a connected stream and an engine into a session.
    ///
    /// The stream must already be connected; the session takes exclusive
    /// ownership of both it and the engine for its lifetime.
    pub fn new(stream: S, engine: SpekeEngine) -> Self {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);

        Self {
            shared: Arc::new(Shared {
                cell: Mutex::new(StateCell {
                    state: SessionState::Idle,
                    closed: false,
                }),
                engine: Mutex::new(Some(engine)),
                handler: Mutex::new(None),
                outbound,
                shutdown,
            }),
            stream: Some(stream),
            outbound_rx: Some(outbound_rx),
        }
    }

    /// Start the session: begin reading frames and send our init data.
    ///
    /// Spawns the reader before the first write, so a peer answering on a
    /// fast local transport cannot race the read registration. On return
    /// the session is in [`SessionState::Running`].
    ///
    /// # Errors
    ///
    /// [`Error::BadState`] unless the session is in [`SessionState::Idle`].
    pub fn run(&mut self, handler: MessageHandler) -> Result<()> {
        {
            let cell = self.shared.cell.lock().unwrap();
            if cell.state != SessionState::Idle {
                return Err(Error::BadState(format!(
                    "run requires an idle session, state is {:?}",
                    cell.state
                )));
            }
        }

        let stream = self
            .stream
            .take()
            .ok_or_else(|| Error::BadState("session stream already consumed".into()))?;
        let outbound_rx = self
            .outbound_rx
            .take()
            .ok_or_else(|| Error::BadState("session already started".into()))?;

        set_handler(&self.shared, handler);

        let (reader, writer) = tokio::io::split(stream);
        tokio::spawn(read_loop(
            reader,
            Arc::clone(&self.shared),
            self.shared.shutdown.subscribe(),
        ));
        tokio::spawn(write_loop(
            writer,
            outbound_rx,
            Arc::clone(&self.shared),
            self.shared.shutdown.subscribe(),
        ));

        let init = {
            let guard = self.shared.engine.lock().unwrap();
            let engine = guard
                .as_ref()
                .ok_or_else(|| Error::BadState("session engine already released".into()))?;
            Envelope::InitData {
                id: engine.id().to_string(),
                public_key: engine.public_key(),
            }
        };
        self.shared
            .outbound
            .send(init.encode_framed())
            .map_err(|_| Error::ConnectionFailed("session writer is gone".into()))?;

        let mut cell = self.shared.cell.lock().unwrap();
        if !cell.closed {
            cell.state = SessionState::Running;
        }
        Ok(())
    }

    /// Sign `payload` and send it as authenticated data.
    ///
    /// # Errors
    ///
    /// - [`Error::BadState`] unless the session is running.
    /// - [`Error::Crypto`] if the handshake has not yet produced a key.
    pub fn send(&self, payload: &[u8]) -> Result<()> {
        send_signed(&self.shared, payload)
    }

    /// Replace the message handler.
    ///
    /// Permitted in any state; the swap is mutex-guarded so an in-flight
    /// dispatch keeps a coherent handler.
    pub fn set_message_handler(&self, handler: MessageHandler) {
        set_handler(&self.shared, handler);
    }

    /// Current session state.
    ///
    /// The value may be stale by the time the caller inspects it; the
    /// reader task can close the session at any moment.
    pub fn state(&self) -> SessionState {
        self.shared.cell.lock().unwrap().state
    }

    /// Close the session locally with [`SessionState::Stopped`].
    ///
    /// Idempotent: the first close (from any source) latches the terminal
    /// state, cancels the reader and writer, shuts the stream down and
    /// releases the engine. Later calls do nothing.
    pub fn close(&self) {
        close_with(&self.shared, SessionState::Stopped);
    }

    /// A cloneable control handle for this session.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S> Drop for SpekeSession<S> {
    fn drop(&mut self) {
        close_with(&self.shared, SessionState::Stopped);
    }
}

/// Control surface passed to message handlers.
///
/// Offers the same operations as the owning [`SpekeSession`] minus `run`,
/// so a handler can answer, rotate handlers or terminate the session from
/// inside a dispatch.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl SessionHandle {
    /// Sign `payload` and send it as authenticated data.
    ///
    /// # Errors
    ///
    /// Same as [`SpekeSession::send`].
    pub fn send(&self, payload: &[u8]) -> Result<()> {
        send_signed(&self.shared, payload)
    }

    /// Replace the message handler.
    pub fn set_message_handler(&self, handler: MessageHandler) {
        set_handler(&self.shared, handler);
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.shared.cell.lock().unwrap().state
    }

    /// Close the session locally with [`SessionState::Stopped`].
    pub fn close(&self) {
        close_with(&self.shared, SessionState::Stopped);
    }
}

// === Shared operations ===

fn send_signed(shared: &Arc<Shared>, payload: &[u8]) -> Result<()> {
    {
        let cell = shared.cell.lock().unwrap();
        if cell.state != SessionState::Running {
            return Err(Error::BadState(format!(
                "send requires a running session, state is {:?}",
                cell.state
            )));
        }
    }

    let signature = {
        let guard = shared.engine.lock().unwrap();
        let engine = guard
            .as_ref()
            .ok_or_else(|| Error::BadState("session engine already released".into()))?;
        engine.hmac_sign(payload)?
    };

    let frame = Envelope::SignedData {
        hmac_signature: signature,
        data: payload.to_vec(),
    }
    .encode_framed();

    shared
        .outbound
        .send(frame)
        .map_err(|_| Error::PeerDisconnected)?;
    Ok(())
}

fn set_handler(shared: &Arc<Shared>, handler: MessageHandler) {
    *shared.handler.lock().unwrap() = Some(handler);
}

/// Latch the terminal state, stop both tasks and release the engine.
/// Every close path funnels through here; only the first call wins.
fn close_with(shared: &Arc<Shared>, state: SessionState) {
    {
        let mut cell = shared.cell.lock().unwrap();
        if cell.closed {
            return;
        }
        cell.closed = true;
        cell.state = state;
    }

    let _ = shared.shutdown.send(true);
    *shared.engine.lock().unwrap() = None;

    tracing::debug!(?state, "session closed");
}

// === Reader ===

async fn read_loop<S>(
    mut reader: ReadHalf<S>,
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let handle = SessionHandle {
        shared: Arc::clone(&shared),
    };
    let mut bad_behavior_count: u32 = 0;

    loop {
        if shared.cell.lock().unwrap().closed {
            return;
        }

        let received = tokio::select! {
            received = read_envelope(&mut reader) => received,
            _ = shutdown.changed() => return,
        };

        match received {
            Ok(envelope) => {
                if !dispatch(envelope, &shared, &handle, &mut bad_behavior_count) {
                    return;
                }
            }
            Err(err) => {
                close_with(&shared, classify_error(&err));
                return;
            }
        }
    }
}

async fn read_envelope<R>(reader: &mut R) -> Result<Envelope>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; FRAME_LEN_BYTES];
    reader.read_exact(&mut len_bytes).await?;

    let len = u64::from_le_bytes(len_bytes);
    if len > MAX_ENVELOPE_LEN {
        return Err(Error::Envelope(speke_core::Error::OversizedEnvelope(len)));
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;

    Ok(Envelope::parse(&body)?)
}

/// Handle one inbound envelope. Returns `false` when the reader should
/// stop, either because the session closed or the engine is gone.
fn dispatch(
    envelope: Envelope,
    shared: &Arc<Shared>,
    handle: &SessionHandle,
    bad_behavior_count: &mut u32,
) -> bool {
    match envelope {
        Envelope::InitData { id, public_key } => handle_init_data(shared, &id, &public_key),
        Envelope::KeyConfirmation { data } => handle_key_confirmation(shared, &data),
        Envelope::SignedData {
            hmac_signature,
            data,
        } => handle_signed_data(shared, handle, &hmac_signature, data, bad_behavior_count),
    }
}

fn handle_init_data(shared: &Arc<Shared>, id: &str, public_key: &[u8]) -> bool {
    let result = {
        let mut guard = shared.engine.lock().unwrap();
        let Some(engine) = guard.as_mut() else {
            return false;
        };
        engine
            .provide_remote_pair(public_key, id)
            .and_then(|()| engine.key_confirmation_data().map(|kcd| kcd.to_vec()))
    };

    match result {
        Ok(kcd) => {
            let frame = Envelope::KeyConfirmation { data: kcd }.encode_framed();
            if shared.outbound.send(frame).is_err() {
                close_with(shared, SessionState::StoppedError);
                return false;
            }
            true
        }
        Err(speke_crypto::Error::AlreadyInitialized) => {
            // Benign duplicate; does not count toward bad behavior.
            tracing::debug!(peer = id, "ignoring duplicate init data");
            true
        }
        Err(err) => {
            tracing::warn!(%err, "rejecting peer public key and id");
            close_with(shared, SessionState::StoppedPeerPublicKeyOrIdInvalid);
            false
        }
    }
}

fn handle_key_confirmation(shared: &Arc<Shared>, data: &[u8]) -> bool {
    let (confirmed, peer) = {
        let guard = shared.engine.lock().unwrap();
        let Some(engine) = guard.as_ref() else {
            return false;
        };
        // Confirmation before init data is a protocol violation; treat it
        // the same as a digest mismatch.
        (
            engine.confirm_key(data).unwrap_or(false),
            engine.remote_id().map(str::to_string).ok(),
        )
    };

    if confirmed {
        true
    } else {
        tracing::warn!(peer = peer.as_deref(), "peer key confirmation failed");
        close_with(shared, SessionState::StoppedKeyConfirmationFailed);
        false
    }
}

fn handle_signed_data(
    shared: &Arc<Shared>,
    handle: &SessionHandle,
    hmac_signature: &[u8],
    data: Vec<u8>,
    bad_behavior_count: &mut u32,
) -> bool {
    let verified = {
        let guard = shared.engine.lock().unwrap();
        let Some(engine) = guard.as_ref() else {
            return false;
        };
        engine.confirm_hmac(hmac_signature, &data).unwrap_or(false)
    };

    if verified {
        invoke_handler(shared, handle, data);
        // The handler may have closed the session; stop reading if so.
        !shared.cell.lock().unwrap().closed
    } else {
        *bad_behavior_count += 1;
        tracing::warn!(
            count = *bad_behavior_count,
            limit = BAD_BEHAVIOR_LIMIT,
            "bad HMAC signature on signed data"
        );
        if *bad_behavior_count >= BAD_BEHAVIOR_LIMIT {
            close_with(shared, SessionState::StoppedPeerBadBehavior);
            return false;
        }
        true
    }
}

/// Run the handler outside the handler lock so it can swap itself out.
/// The old handler is restored only if no replacement was installed
/// during the dispatch.
fn invoke_handler(shared: &Arc<Shared>, handle: &SessionHandle, payload: Vec<u8>) {
    let taken = shared.handler.lock().unwrap().take();
    let Some(mut handler) = taken else {
        tracing::warn!("authenticated data arrived with no message handler installed");
        return;
    };

    handler(payload, handle);

    let mut slot = shared.handler.lock().unwrap();
    if slot.is_none() {
        *slot = Some(handler);
    }
}

// === Writer ===

async fn write_loop<S>(
    mut writer: WriteHalf<S>,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    loop {
        if shared.cell.lock().unwrap().closed {
            break;
        }

        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if let Err(err) = writer.write_all(&frame).await {
                    close_with(&shared, classify_io(&err));
                    break;
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    // Frames enqueued before the close (our key confirmation, for one)
    // must still reach the peer; flush them with a bounded grace period.
    let flush = async {
        while let Ok(frame) = outbound.try_recv() {
            if writer.write_all(&frame).await.is_err() {
                break;
            }
        }
    };
    let _ = tokio::time::timeout(Duration::from_millis(200), flush).await;

    // Shut our direction down so the peer observes EOF; errors here are
    // expected when the peer already vanished.
    if let Err(err) = writer.shutdown().await {
        tracing::debug!(%err, "error shutting down the stream");
    }
}

// === Error classification ===

fn classify_error(err: &Error) -> SessionState {
    match err {
        Error::Io(io_err) => classify_io(io_err),
        _ => SessionState::StoppedError,
    }
}

fn classify_io(err: &std::io::Error) -> SessionState {
    if is_disconnect(err) {
        SessionState::StoppedPeerDisconnected
    } else {
        SessionState::StoppedError
    }
}

/// The disconnect family: end-of-stream, broken pipe and friends. Every
/// other I/O failure counts as a transport error.
fn is_disconnect(err: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(
        err.kind(),
        ErrorKind::UnexpectedEof
            | ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!SessionState::Idle.is_terminal());
        assert!(!SessionState::Running.is_terminal());

        for state in [
            SessionState::Stopped,
            SessionState::StoppedError,
            SessionState::StoppedPeerDisconnected,
            SessionState::StoppedPeerPublicKeyOrIdInvalid,
            SessionState::StoppedKeyConfirmationFailed,
            SessionState::StoppedPeerBadBehavior,
        ] {
            assert!(state.is_terminal());
        }
    }

    #[test]
    fn test_disconnect_classification() {
        use std::io::{Error as IoError, ErrorKind};

        let eof = IoError::new(ErrorKind::UnexpectedEof, "eof");
        assert_eq!(
            classify_io(&eof),
            SessionState::StoppedPeerDisconnected
        );

        let pipe = IoError::new(ErrorKind::BrokenPipe, "pipe");
        assert_eq!(
            classify_io(&pipe),
            SessionState::StoppedPeerDisconnected
        );

        let other = IoError::new(ErrorKind::PermissionDenied, "denied");
        assert_eq!(classify_io(&other), SessionState::StoppedError);
    }

    #[test]
    fn test_parse_failures_classify_as_error() {
        let err = Error::Envelope(speke_core::Error::InvalidEnvelope("bad tag".into()));
        assert_eq!(classify_error(&err), SessionState::StoppedError);
    }
}
