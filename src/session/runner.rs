//! Session lane.
//!
//! Each session runs as one task on the I/O context. The task owns the
//! capability stack's [`Link`] outright and is the only code that touches
//! it, so every transition, write and read of a session is serialized
//! without locks.
//!
//! # Event Loop
//!
//! While running, the link is split and the lane waits on whichever comes
//! first:
//!
//! - completion of the write in flight
//! - a queued command (send, stop, drain marker), in submission order
//! - data from the link
//! - the idle deadline
//!
//! Writes never block the loop. Sends queue behind the one in flight and
//! go out one at a time in order, while receives, stop requests and the
//! idle deadline keep being served.
//!
//! # Establishing
//!
//! Before the session is running, commands that arrive are kept in a
//! backlog and replayed in order once it is; a stop request aborts the
//! current step instead. A failed step short-circuits straight to
//! teardown without starting later layers.
//!
//! # Teardown
//!
//! All exits funnel into one close routine. A write still in flight is
//! dropped; an idle writer closes the link top to bottom under the
//! handshake timeout. Unsent data and queued commands are then failed, the
//! close event fires once, pending notifications are drained and only then
//! is the session removed from its registry.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::future::{Future, pending};
use std::sync::Arc;
use std::sync::atomic::Ordering;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::buffer::{BufferPool, Payload};
use crate::capability::{
    BoxedIo, CapabilityStack, Link, LinkReader, LinkWriter, Role, StreamLink, UpgradeTarget,
    stream,
};
use crate::config::Options;
use crate::error::{Error, Result};
use crate::listener::{Dispatcher, Event, EventKind};
use crate::runtime::timer::{millis, sleep_until_opt};
use crate::runtime::{ExecutionContexts, Lane, SilenceTimer, with_timeout};

use super::{Registry, SessionCommand, SessionHandle, SessionShared, SessionState};

// ============================================================================
// Types
// ============================================================================

/// Everything a session needs from its endpoint.
pub(crate) struct SessionContext {
    pub(crate) stack: CapabilityStack,
    pub(crate) pool: BufferPool,
    pub(crate) options: Arc<Options>,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) registry: Arc<Registry>,
    pub(crate) contexts: Arc<ExecutionContexts>,
    /// `host:port` of the server.
    pub(crate) authority: String,
    /// Request target for upgrade layers.
    pub(crate) path: String,
}

/// How the transport comes about.
pub(crate) enum Origin {
    /// Accepted by a server.
    Accepted(TcpStream),
    /// To be connected to the context's authority.
    Connect,
}

/// Close cause. `None` for a requested stop.
type Cause = Option<Arc<Error>>;

/// One wake-up of the running loop.
enum Step {
    Received(Result<Option<Payload>>),
    Written(Bytes, Box<dyn LinkWriter>, Result<()>),
    Command(Option<SessionCommand>),
    Idle,
}

/// Whether the running loop continues.
enum Flow {
    Continue,
    Stop(Cause),
}

/// What a running session hands to teardown.
type Running = (Box<dyn LinkReader>, Outbound);

/// A write in progress. Resolves to the writer and the outcome.
type PendingWrite = BoxFuture<'static, (Box<dyn LinkWriter>, Result<()>)>;

/// Outbound work in acceptance order.
enum Queued {
    Send(Bytes),
    Drain(oneshot::Sender<()>),
}

/// Send side of a running session.
///
/// At most one write is in flight; later sends wait behind it in order.
struct Outbound {
    /// Present while no write is in flight.
    writer: Option<Box<dyn LinkWriter>>,
    in_flight: Option<(Bytes, PendingWrite)>,
    queue: VecDeque<Queued>,
}

impl Outbound {
    fn new(writer: Box<dyn LinkWriter>) -> Self {
        Self {
            writer: Some(writer),
            in_flight: None,
            queue: VecDeque::new(),
        }
    }

    fn is_idle(&self) -> bool {
        self.in_flight.is_none() && self.writer.is_some()
    }

    /// Hands `data` to the writer.
    fn start(&mut self, data: Bytes) {
        let Some(mut writer) = self.writer.take() else {
            self.queue.push_front(Queued::Send(data));
            return;
        };
        let payload = data.clone();
        let write: PendingWrite = Box::pin(async move {
            let result = writer.send(&payload).await;
            (writer, result)
        });
        self.in_flight = Some((data, write));
    }

    /// Waits for the in-flight write. Never resolves when there is none.
    ///
    /// Cancel-safe: the write stays in place until it completes.
    async fn written(&mut self) -> (Bytes, Box<dyn LinkWriter>, Result<()>) {
        let Some((_, write)) = &mut self.in_flight else {
            return pending().await;
        };
        let (writer, result) = write.await;
        let data = self.in_flight.take().map(|(data, _)| data).unwrap_or_default();
        (data, writer, result)
    }
}

// ============================================================================
// Spawn
// ============================================================================

/// Registers a session and starts its lane.
///
/// # Errors
///
/// Returns [`Error::RegistryShutdown`] if the registry is draining.
pub(crate) fn spawn(ctx: &Arc<SessionContext>, origin: Origin) -> Result<SessionHandle> {
    let role = match origin {
        Origin::Accepted(_) => Role::Server,
        Origin::Connect => Role::Client,
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let shared = ctx
        .registry
        .insert(|id| Arc::new(SessionShared::new(id, role, tx)))?;
    let handle = SessionHandle::new(&shared);

    let runner = Runner {
        notify_lane: ctx.dispatcher.lane_for(ctx.contexts.notify()),
        shared,
        ctx: Arc::clone(ctx),
        commands: rx,
        backlog: VecDeque::new(),
    };
    ctx.contexts.io().spawn(runner.run(origin));

    Ok(handle)
}

// ============================================================================
// Runner
// ============================================================================

struct Runner {
    shared: Arc<SessionShared>,
    ctx: Arc<SessionContext>,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    /// Present in async notify mode.
    notify_lane: Option<Lane>,
    /// Commands received before running.
    backlog: VecDeque<SessionCommand>,
}

impl Runner {
    async fn run(mut self, origin: Origin) {
        let id = self.shared.id;
        trace!(session_id = %id, role = ?self.shared.role, "Session lane started");

        let (running, cause) = match self.establish(origin).await {
            Ok(link) => {
                let (running, cause) = self.serve(link).await;
                (Some(running), cause)
            }
            Err(cause) => (None, cause),
        };

        self.finish(running, cause).await;
        trace!(session_id = %id, "Session lane finished");
    }

    // ------------------------------------------------------------------------
    // Establishing
    // ------------------------------------------------------------------------

    /// Brings the stack up layer by layer.
    async fn establish(&mut self, origin: Origin) -> std::result::Result<Box<dyn Link>, Cause> {
        let ctx = Arc::clone(&self.ctx);
        let role = self.shared.role;
        self.transition(SessionState::Connecting);

        let tcp = match origin {
            Origin::Accepted(tcp) => {
                self.emit(EventKind::Accept, None);
                tcp
            }
            Origin::Connect => {
                let timeout = ctx.options.connect_timeout;
                let connect = async {
                    tokio::time::timeout(timeout, stream::connect(&ctx.authority, &ctx.options))
                        .await
                        .map_err(|_| Error::connection_timeout(millis(timeout)))?
                };
                let tcp = self.step(EventKind::Connect, connect).await?;
                self.emit(EventKind::Connect, None);
                tcp
            }
        };

        let addrs = tcp.local_addr().ok().zip(tcp.peer_addr().ok());
        let mut io: BoxedIo = stream::start(tcp).map_err(|e| Some(Arc::new(e)))?;

        if let Some(secure) = ctx.stack.secure() {
            self.transition(SessionState::Handshaking);
            let handshake = with_timeout(
                ctx.options.handshake_timeout,
                "handshake",
                secure.handshake(io, role),
            );
            io = self.step(EventKind::Handshake, handshake).await?;
            debug!(session_id = %self.shared.id, layer = secure.name(), "Handshake completed");
            self.emit(EventKind::Handshake, None);
        }

        let link: Box<dyn Link> = match ctx.stack.upgrade() {
            Some(upgrade) => {
                self.transition(SessionState::Upgrading);
                let target = UpgradeTarget {
                    role,
                    authority: ctx.authority.clone(),
                    path: ctx.path.clone(),
                };
                let negotiate = with_timeout(
                    ctx.options.handshake_timeout,
                    "upgrade",
                    upgrade.handshake(io, &target),
                );
                let link = self.step(EventKind::Upgrade, negotiate).await?;
                self.emit(EventKind::Upgrade, None);
                link
            }
            None => Box::new(StreamLink::new(io, ctx.pool.clone())),
        };

        *self.shared.addrs.lock() = addrs;
        Ok(link)
    }

    /// Runs one establishing step, reporting its failure as a `kind` event.
    async fn step<T>(
        &mut self,
        kind: EventKind,
        step: impl Future<Output = Result<T>>,
    ) -> std::result::Result<T, Cause> {
        match self.guard(step).await {
            Ok(value) => Ok(value),
            Err(Some(e)) => {
                warn!(session_id = %self.shared.id, %kind, error = %e, "Session step failed");
                let cause = Arc::new(e);
                self.emit(kind, Some(Arc::clone(&cause)));
                Err(Some(cause))
            }
            Err(None) => Err(None),
        }
    }

    /// Drives `step` while honoring stop requests.
    ///
    /// `Err(None)` means a stop arrived first; the step is dropped, which
    /// releases whatever transport it held.
    async fn guard<T>(
        &mut self,
        step: impl Future<Output = Result<T>>,
    ) -> std::result::Result<T, Option<Error>> {
        tokio::pin!(step);

        loop {
            tokio::select! {
                result = &mut step => return result.map_err(Some),
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Stop(reason)) => {
                        debug!(session_id = %self.shared.id, ?reason, "Stopped while establishing");
                        return Err(None);
                    }
                    Some(command) => self.backlog.push_back(command),
                    None => return Err(None),
                },
            }
        }
    }

    // ------------------------------------------------------------------------
    // Running
    // ------------------------------------------------------------------------

    /// Moves data until something ends the session.
    async fn serve(&mut self, link: Box<dyn Link>) -> (Running, Cause) {
        self.transition(SessionState::Running);

        let (mut reader, writer) = link.split();
        let mut outbound = Outbound::new(writer);

        while let Some(command) = self.backlog.pop_front() {
            if let Flow::Stop(cause) = self.accept(&mut outbound, command).await {
                return ((reader, outbound), cause);
            }
        }

        let mut timer = SilenceTimer::new(self.ctx.options.idle_timeout);

        loop {
            // Finished writes before commands, commands before receives.
            let step = tokio::select! {
                biased;
                (data, writer, result) = outbound.written() => Step::Written(data, writer, result),
                command = self.commands.recv() => Step::Command(command),
                received = reader.recv() => Step::Received(received),
                () = sleep_until_opt(timer.deadline()) => Step::Idle,
            };

            let flow = match step {
                Step::Received(Ok(Some(payload))) => {
                    timer.reset();
                    self.shared.touch();
                    trace!(session_id = %self.shared.id, len = payload.len(), "Received");
                    self.notify(self.event(EventKind::Recv).with_received(payload));
                    Flow::Continue
                }
                Step::Received(Ok(None)) => {
                    debug!(session_id = %self.shared.id, "Closed by peer");
                    Flow::Stop(Some(Arc::new(Error::connection("closed by peer"))))
                }
                Step::Received(Err(e)) => {
                    debug!(session_id = %self.shared.id, error = %e, "Receive failed");
                    Flow::Stop(Some(Arc::new(e)))
                }
                Step::Written(data, writer, result) => {
                    outbound.writer = Some(writer);
                    self.finish_write(&mut outbound, data, result).await
                }
                Step::Command(Some(command)) => self.accept(&mut outbound, command).await,
                Step::Command(None) => Flow::Stop(None),
                Step::Idle => {
                    debug!(session_id = %self.shared.id, "Idle timeout");
                    Flow::Stop(Some(Arc::new(Error::idle_timeout(timer.duration_ms()))))
                }
            };

            if let Flow::Stop(cause) = flow {
                return ((reader, outbound), cause);
            }
        }
    }

    /// Takes one command off the session's queue.
    ///
    /// Sends and drain markers join the outbound queue; a stop ends the
    /// session at once, abandoning any write still in flight.
    async fn accept(&mut self, outbound: &mut Outbound, command: SessionCommand) -> Flow {
        match command {
            SessionCommand::Send(data) => outbound.queue.push_back(Queued::Send(data)),
            SessionCommand::Drain(done) => outbound.queue.push_back(Queued::Drain(done)),
            SessionCommand::Stop(reason) => {
                debug!(
                    session_id = %self.shared.id,
                    ?reason,
                    writing = outbound.in_flight.is_some(),
                    queued = outbound.queue.len(),
                    "Stop requested"
                );
                return Flow::Stop(None);
            }
        }
        self.pump(outbound).await;
        Flow::Continue
    }

    /// Reports a finished write and starts the next one.
    async fn finish_write(
        &mut self,
        outbound: &mut Outbound,
        data: Bytes,
        result: Result<()>,
    ) -> Flow {
        match result {
            Ok(()) => {
                trace!(session_id = %self.shared.id, len = data.len(), "Sent");
                self.emit_sent(data, None);
                self.pump(outbound).await;
                Flow::Continue
            }
            Err(e) => {
                debug!(session_id = %self.shared.id, error = %e, "Send failed");
                let cause = Arc::new(e);
                self.emit_sent(data, Some(Arc::clone(&cause)));
                Flow::Stop(Some(cause))
            }
        }
    }

    /// Works through the outbound queue until a write is in flight.
    async fn pump(&mut self, outbound: &mut Outbound) {
        while outbound.is_idle() {
            match outbound.queue.pop_front() {
                Some(Queued::Send(data)) => outbound.start(data),
                Some(Queued::Drain(done)) => {
                    self.drain_notifications().await;
                    let _ = done.send(());
                }
                None => break,
            }
        }
    }

    // ------------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------------

    /// The one close routine.
    async fn finish(mut self, running: Option<Running>, cause: Cause) {
        let id = self.shared.id;
        if let Some(cause) = &cause {
            *self.shared.last_error.lock() = Some(Arc::clone(cause));
        }
        self.transition(SessionState::Disconnecting);

        let mut unsent = Vec::new();
        if let Some((reader, outbound)) = running {
            let Outbound {
                writer,
                in_flight,
                queue,
            } = outbound;

            // Dropping a pending write releases the writer it holds.
            if let Some((data, _write)) = in_flight {
                trace!(session_id = %id, len = data.len(), "Abandoned pending write");
                unsent.push(Queued::Send(data));
            }
            unsent.extend(queue);

            if let Some(mut writer) = writer {
                let close = with_timeout(self.ctx.options.handshake_timeout, "close", writer.close());
                if let Err(e) = close.await {
                    trace!(session_id = %id, error = %e, "Link close failed");
                }
            }
            drop(reader);
        }
        *self.shared.addrs.lock() = None;

        // Nothing queued from here on is written.
        self.commands.close();
        let mut pending: Vec<_> = self.backlog.drain(..).collect();
        while let Ok(command) = self.commands.try_recv() {
            pending.push(command);
        }
        unsent.extend(pending.into_iter().filter_map(|command| match command {
            SessionCommand::Send(data) => Some(Queued::Send(data)),
            SessionCommand::Drain(done) => Some(Queued::Drain(done)),
            SessionCommand::Stop(_) => None,
        }));
        for queued in unsent {
            match queued {
                Queued::Send(data) => {
                    self.emit_sent(data, Some(Arc::new(Error::SessionClosed)));
                }
                Queued::Drain(done) => {
                    let _ = done.send(());
                }
            }
        }

        if !self.shared.closed.swap(true, Ordering::AcqRel) {
            self.transition(SessionState::Closed);
            debug!(session_id = %id, error = ?cause, "Session closed");
            self.emit(EventKind::Close, cause);
        }

        self.drain_notifications().await;
        self.ctx.registry.remove(id);
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn transition(&self, next: SessionState) {
        let previous = self.shared.state.send_replace(next);
        debug_assert!(
            previous.can_transition_to(next),
            "invalid transition {previous} -> {next}"
        );
        trace!(session_id = %self.shared.id, from = %previous, to = %next, "State transition");
    }

    fn event(&self, kind: EventKind) -> Event {
        Event::for_session(kind, SessionHandle::new(&self.shared))
    }

    fn notify(&self, event: Event) {
        self.ctx.dispatcher.notify(self.notify_lane.as_ref(), event);
    }

    fn emit(&self, kind: EventKind, error: Cause) {
        self.notify(self.event(kind).with_error(error));
    }

    fn emit_sent(&self, data: Bytes, error: Cause) {
        self.notify(self.event(EventKind::Send).with_sent(data).with_error(error));
    }

    async fn drain_notifications(&self) {
        if let Some(lane) = &self.notify_lane
            && let Err(e) = lane.drain().await
        {
            trace!(session_id = %self.shared.id, error = %e, "Notification lane already stopped");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use parking_lot::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use crate::config::NotifyMode;
    use crate::listener::Listeners;

    struct Fixture {
        ctx: Arc<SessionContext>,
        listeners: Arc<Listeners>,
        events: Arc<Mutex<Vec<(EventKind, bool)>>>,
    }

    fn fixture(options: Options, authority: String) -> Fixture {
        let listeners = Arc::new(Listeners::new());
        let events = Arc::new(Mutex::new(Vec::new()));
        for kind in [
            EventKind::Accept,
            EventKind::Connect,
            EventKind::Recv,
            EventKind::Send,
            EventKind::Close,
        ] {
            let log = Arc::clone(&events);
            listeners.bind(kind, move |e| log.lock().push((e.kind(), e.is_error())));
        }

        let ctx = Arc::new(SessionContext {
            stack: CapabilityStack::stream(),
            pool: BufferPool::new(options.pool_buffer_size, options.max_pooled_buffers),
            dispatcher: Dispatcher::new(Arc::clone(&listeners), NotifyMode::Sync),
            options: Arc::new(options),
            registry: Arc::new(Registry::new()),
            contexts: Arc::new(ExecutionContexts::ambient().expect("runtime")),
            authority,
            path: "/".to_string(),
        });

        Fixture {
            ctx,
            listeners,
            events,
        }
    }

    #[tokio::test]
    async fn test_client_session_sends_and_stops() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let fx = fixture(Options::new(), listener.local_addr().unwrap().to_string());

        let handle = spawn(&fx.ctx, Origin::Connect).expect("spawn");
        handle.send("hello").expect("queued before running");

        let (mut peer, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 5];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        handle.flush().await.expect("flush");
        handle.stop_and_wait().await;
        assert_eq!(handle.state(), SessionState::Closed);

        let events = fx.events.lock().clone();
        assert_eq!(
            events,
            vec![
                (EventKind::Connect, false),
                (EventKind::Send, false),
                (EventKind::Close, false),
            ]
        );
    }

    #[tokio::test]
    async fn test_peer_close_reports_error_once() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let fx = fixture(Options::new(), listener.local_addr().unwrap().to_string());

        let handle = spawn(&fx.ctx, Origin::Connect).expect("spawn");
        let (mut peer, _) = listener.accept().await.unwrap();
        peer.write_all(b"bye").await.unwrap();
        drop(peer);

        handle.closed().await;
        handle.stop();

        let events = fx.events.lock().clone();
        let closes: Vec<_> = events.iter().filter(|(k, _)| *k == EventKind::Close).collect();
        assert_eq!(closes, vec![&(EventKind::Close, true)]);
        assert!(events.contains(&(EventKind::Recv, false)));
    }

    #[tokio::test]
    async fn test_connect_failure_short_circuits() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let authority = listener.local_addr().unwrap().to_string();
        drop(listener);

        let fx = fixture(Options::new(), authority);
        let handle = spawn(&fx.ctx, Origin::Connect).expect("spawn");
        handle.closed().await;

        let events = fx.events.lock().clone();
        assert_eq!(
            events,
            vec![(EventKind::Connect, true), (EventKind::Close, true)]
        );
        assert!(fx.ctx.registry.is_empty());
    }

    #[tokio::test]
    async fn test_idle_timeout_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let options = Options::new().with_idle_timeout(Duration::from_millis(100));
        let fx = fixture(options, listener.local_addr().unwrap().to_string());

        let timed_out = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&timed_out);
        fx.listeners
            .bind_close(move |_, error| *slot.lock() = Some(error.is_some_and(Error::is_timeout)));

        let handle = spawn(&fx.ctx, Origin::Connect).expect("spawn");
        let (_peer, _) = listener.accept().await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle.closed())
            .await
            .expect("idle session closes");
        assert_eq!(*timed_out.lock(), Some(true));
    }

    #[tokio::test]
    async fn test_sends_after_close_are_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let fx = fixture(Options::new(), listener.local_addr().unwrap().to_string());

        let handle = spawn(&fx.ctx, Origin::Connect).expect("spawn");
        let _peer = listener.accept().await.unwrap();
        handle.stop_and_wait().await;

        assert!(handle.send("late").is_err());
        assert!(handle.flush().await.is_err());
    }

    #[tokio::test]
    async fn test_blocked_write_does_not_stall_lane() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let fx = fixture(Options::new(), listener.local_addr().unwrap().to_string());

        let handle = spawn(&fx.ctx, Origin::Connect).expect("spawn");
        let (mut peer, _) = listener.accept().await.unwrap();
        handle.established().await.expect("running");

        // The peer never reads, so this cannot complete.
        handle.send(vec![0u8; 64 * 1024 * 1024]).expect("send");
        handle.send("queued").expect("send");

        let received = Arc::new(Mutex::new(Vec::new()));
        {
            let received = Arc::clone(&received);
            fx.listeners
                .bind_recv(move |_, data| received.lock().extend_from_slice(data));
        }
        peer.write_all(b"still here").await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while received.lock().as_slice() != b"still here" {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("receive while writing");

        tokio::time::timeout(Duration::from_secs(5), handle.stop_and_wait())
            .await
            .expect("stop while writing");

        let events = fx.events.lock().clone();
        let sends: Vec<_> = events.iter().filter(|(k, _)| *k == EventKind::Send).collect();
        assert_eq!(sends, vec![&(EventKind::Send, true), &(EventKind::Send, true)]);
        assert_eq!(events.last(), Some(&(EventKind::Close, false)));
        assert!(fx.ctx.registry.is_empty());
    }
}
