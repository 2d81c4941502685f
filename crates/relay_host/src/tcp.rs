//! TCP development transport.
//!
//! Stands in for the relay network during local play-testing. Each client
//! opens a TCP connection and sends a hello frame holding its 8-byte
//! big-endian peer identity; every later frame carries one gateway envelope.
//! Frames are length-prefixed with a big-endian `u32` and capped at 10 MB.
//!
//! Socket I/O runs on tokio tasks. The tasks never touch gateway state: they
//! push [`WireEvent`]s into a bounded single-consumer channel, and the
//! transport turns those into [`TransportEvent`]s and inbound frames when the
//! tick thread polls it. The transport stops draining that channel while its
//! inbox is full, so a flooding client stalls its own socket reader instead
//! of growing host memory.

use relay_gateway::transport::drain_group;
use relay_gateway::{
    ConnectionHandle, PeerIdentity, PollGroup, QuickStats, RawMessage, TransportAdapter,
    TransportError, TransportEvent,
};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Frames larger than this are refused.
pub const MAX_FRAME_SIZE: usize = 10_000_000;

/// How long a fresh socket may take to identify itself.
const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of the channel between socket tasks and the transport.
const WIRE_QUEUE_DEPTH: usize = 1024;

/// Default cap on frames buffered for the gateway across all connections.
pub const DEFAULT_INBOUND_LIMIT: usize = 4096;

/// Frames a connection may send before the gateway accepts it.
const MAX_EARLY_FRAMES: usize = 64;

/// Reads one length-prefixed frame. `Ok(None)` on a clean end of stream.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "Message too large"));
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).await?;
    Ok(Some(data))
}

/// Writes one length-prefixed frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, data: &[u8]) -> io::Result<()> {
    if data.len() > MAX_FRAME_SIZE {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "Message too large"));
    }
    writer.write_all(&(data.len() as u32).to_be_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await
}

/// The hello frame a client sends first.
#[cfg(test)]
pub fn hello_frame(peer: PeerIdentity) -> [u8; 8] {
    peer.0.to_be_bytes()
}

/// Messages from the socket tasks to the transport.
#[derive(Debug)]
enum WireEvent {
    Arrived {
        handle: ConnectionHandle,
        peer: PeerIdentity,
        addr: SocketAddr,
        outbound: mpsc::UnboundedSender<Vec<u8>>,
        shutdown: oneshot::Sender<()>,
    },
    Frame {
        handle: ConnectionHandle,
        bytes: Vec<u8>,
    },
    Hangup {
        handle: ConnectionHandle,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkState {
    Connecting,
    Open,
}

#[derive(Debug)]
struct TcpLink {
    peer: PeerIdentity,
    addr: SocketAddr,
    state: LinkState,
    group: Option<PollGroup>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    shutdown: Option<oneshot::Sender<()>>,
    /// Frames that arrived before the gateway accepted the link.
    early: Vec<Vec<u8>>,
}

/// [`TransportAdapter`] over plain TCP sockets.
pub struct TcpRelayTransport {
    local_addr: SocketAddr,
    listener: JoinHandle<()>,
    wire: mpsc::Receiver<WireEvent>,
    links: HashMap<ConnectionHandle, TcpLink>,
    events: VecDeque<TransportEvent>,
    inbox: Vec<RawMessage>,
    inbound_limit: usize,
    backend_reported: bool,
}

impl TcpRelayTransport {
    /// Binds the listener and starts accepting sockets in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn bind(address: &str) -> io::Result<Self> {
        let listener = TcpListener::bind(address).await?;
        let local_addr = listener.local_addr()?;
        let (wire_tx, wire_rx) = mpsc::channel(WIRE_QUEUE_DEPTH);

        info!("🔌 TCP transport listening on {}", local_addr);
        let listener = tokio::spawn(accept_loop(listener, wire_tx));

        Ok(Self {
            local_addr,
            listener,
            wire: wire_rx,
            links: HashMap::new(),
            events: VecDeque::new(),
            inbox: Vec::new(),
            inbound_limit: DEFAULT_INBOUND_LIMIT,
            backend_reported: false,
        })
    }

    /// Caps how many inbound frames wait for the gateway at once.
    pub fn with_inbound_limit(mut self, limit: usize) -> Self {
        self.inbound_limit = limit.max(1);
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Forgets a link and reports it closed to the gateway.
    fn drop_link(&mut self, handle: ConnectionHandle, reason: &str) {
        if let Some(mut link) = self.links.remove(&handle) {
            if let Some(shutdown) = link.shutdown.take() {
                let _ = shutdown.send(());
            }
            self.events.push_back(TransportEvent::Closed {
                handle,
                reason: reason.to_string(),
            });
        }
        self.inbox.retain(|message| message.handle != handle);
    }

    fn apply_wire_event(&mut self, event: WireEvent) {
        match event {
            WireEvent::Arrived {
                handle,
                peer,
                addr,
                outbound,
                shutdown,
            } => {
                trace!("Socket {} identified as peer {} ({})", handle, peer, addr);
                self.links.insert(
                    handle,
                    TcpLink {
                        peer,
                        addr,
                        state: LinkState::Connecting,
                        group: None,
                        outbound,
                        shutdown: Some(shutdown),
                        early: Vec::new(),
                    },
                );
                self.events
                    .push_back(TransportEvent::Connecting { handle, peer });
            }
            WireEvent::Frame { handle, bytes } => {
                let Some(link) = self.links.get_mut(&handle) else {
                    trace!("Dropping frame for closed connection {}", handle);
                    return;
                };
                if link.state == LinkState::Open {
                    self.inbox.push(RawMessage { handle, bytes });
                } else if link.early.len() < MAX_EARLY_FRAMES {
                    link.early.push(bytes);
                } else {
                    warn!("Connection {} flooded frames before being accepted", handle);
                    self.drop_link(handle, "too many frames before accept");
                }
            }
            WireEvent::Hangup { handle, reason } => {
                if self.links.remove(&handle).is_some() {
                    self.events
                        .push_back(TransportEvent::Closed { handle, reason });
                }
            }
        }
    }
}

impl TransportAdapter for TcpRelayTransport {
    fn poll_events(&mut self) -> Vec<TransportEvent> {
        while self.inbox.len() < self.inbound_limit {
            match self.wire.try_recv() {
                Ok(event) => self.apply_wire_event(event),
                Err(_) => break,
            }
        }

        if self.listener.is_finished() && !self.backend_reported {
            self.backend_reported = true;
            self.events.push_back(TransportEvent::BackendLost {
                reason: format!("listener on {} stopped", self.local_addr),
            });
        }

        self.events.drain(..).collect()
    }

    fn accept(&mut self, handle: ConnectionHandle) -> Result<(), TransportError> {
        let link = self
            .links
            .get_mut(&handle)
            .ok_or(TransportError::UnknownHandle(handle))?;
        if link.state != LinkState::Connecting {
            return Err(TransportError::ConnectionClosed(handle));
        }

        link.state = LinkState::Open;
        for bytes in link.early.drain(..) {
            self.inbox.push(RawMessage { handle, bytes });
        }
        self.events.push_back(TransportEvent::Connected {
            handle,
            peer: link.peer,
        });
        Ok(())
    }

    fn send(&mut self, handle: ConnectionHandle, bytes: &[u8]) -> Result<(), TransportError> {
        let link = self
            .links
            .get(&handle)
            .filter(|link| link.state == LinkState::Open)
            .ok_or(TransportError::ConnectionClosed(handle))?;
        link.outbound
            .send(bytes.to_vec())
            .map_err(|_| TransportError::SendFailed {
                handle,
                reason: "socket writer stopped".to_string(),
            })
    }

    fn receive(&mut self, group: PollGroup, max_messages: usize) -> Vec<RawMessage> {
        let links = &self.links;
        drain_group(
            &mut self.inbox,
            max_messages,
            |handle| links.get(&handle).and_then(|link| link.group),
            group,
        )
    }

    fn close(&mut self, handle: ConnectionHandle, reason: &str) {
        if let Some(mut link) = self.links.remove(&handle) {
            debug!("Closing socket {} ({}): {}", handle, link.addr, reason);
            if let Some(shutdown) = link.shutdown.take() {
                let _ = shutdown.send(());
            }
        }
        self.inbox.retain(|message| message.handle != handle);
    }

    fn set_poll_group(
        &mut self,
        handle: ConnectionHandle,
        group: PollGroup,
    ) -> Result<(), TransportError> {
        let link = self
            .links
            .get_mut(&handle)
            .ok_or(TransportError::UnknownHandle(handle))?;
        link.group = Some(group);
        Ok(())
    }

    fn quick_stats(&self, _handle: ConnectionHandle) -> Option<QuickStats> {
        None
    }

    fn display_name(&self, handle: ConnectionHandle) -> Option<String> {
        self.links.get(&handle).map(|link| link.addr.to_string())
    }
}

impl Drop for TcpRelayTransport {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

async fn accept_loop(listener: TcpListener, wire: mpsc::Sender<WireEvent>) {
    let mut next_handle: u32 = 0;
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                next_handle = next_handle.wrapping_add(1);
                let handle = ConnectionHandle(next_handle);
                trace!("Socket {} accepted from {}", handle, addr);
                tokio::spawn(serve_connection(stream, addr, handle, wire.clone()));
            }
            Err(e) => {
                if wire.is_closed() {
                    return;
                }
                warn!("TCP accept failed: {}", e);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

async fn read_hello(reader: &mut OwnedReadHalf) -> io::Result<PeerIdentity> {
    let frame = tokio::time::timeout(HELLO_TIMEOUT, read_frame(reader))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "no hello received"))??
        .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "closed before hello"))?;

    let bytes: [u8; 8] = frame
        .as_slice()
        .try_into()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "hello must be 8 bytes"))?;
    Ok(PeerIdentity(u64::from_be_bytes(bytes)))
}

async fn serve_connection(
    stream: TcpStream,
    addr: SocketAddr,
    handle: ConnectionHandle,
    wire: mpsc::Sender<WireEvent>,
) {
    let (mut reader, writer) = stream.into_split();

    let peer = match read_hello(&mut reader).await {
        Ok(peer) => peer,
        Err(e) => {
            debug!("Dropping socket from {} without hello: {}", addr, e);
            return;
        }
    };

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
    let arrived = WireEvent::Arrived {
        handle,
        peer,
        addr,
        outbound: outbound_tx,
        shutdown: shutdown_tx,
    };
    if wire.send(arrived).await.is_err() {
        return;
    }

    tokio::spawn(write_frames(writer, outbound_rx));

    let hangup = loop {
        tokio::select! {
            _ = &mut shutdown_rx => break None,
            frame = read_frame(&mut reader) => match frame {
                Ok(Some(bytes)) => {
                    if wire.send(WireEvent::Frame { handle, bytes }).await.is_err() {
                        break None;
                    }
                }
                Ok(None) => break Some("peer disconnected".to_string()),
                Err(e) => break Some(format!("read error: {}", e)),
            },
        }
    };

    if let Some(reason) = hangup {
        let _ = wire.send(WireEvent::Hangup { handle, reason }).await;
    }
}

/// Writes queued frames until the transport drops the sending side, then
/// shuts the socket down so queued notices still reach the peer.
async fn write_frames(mut writer: OwnedWriteHalf, mut outbound: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(frame) = outbound.recv().await {
        if let Err(e) = write_frame(&mut writer, &frame).await {
            debug!("Socket write failed: {}", e);
            return;
        }
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, timeout};

    async fn wait_for_events(transport: &mut TcpRelayTransport) -> Vec<TransportEvent> {
        timeout(Duration::from_secs(5), async {
            loop {
                let events = transport.poll_events();
                if !events.is_empty() {
                    return events;
                }
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap()
    }

    async fn wait_for_frames(transport: &mut TcpRelayTransport, group: PollGroup) -> Vec<RawMessage> {
        timeout(Duration::from_secs(5), async {
            loop {
                transport.poll_events();
                let frames = transport.receive(group, 16);
                if !frames.is_empty() {
                    return frames;
                }
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_frame_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        write_frame(&mut client, b"hello relay").await.unwrap();
        assert_eq!(read_frame(&mut server).await.unwrap(), Some(b"hello relay".to_vec()));

        drop(client);
        assert_eq!(read_frame(&mut server).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_oversized_frame_refused() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client
            .write_all(&((MAX_FRAME_SIZE as u32) + 1).to_be_bytes())
            .await
            .unwrap();

        let err = read_frame(&mut server).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_socket_lifecycle() {
        let mut transport = TcpRelayTransport::bind("127.0.0.1:0").await.unwrap();
        let mut client = TcpStream::connect(transport.local_addr()).await.unwrap();
        write_frame(&mut client, &hello_frame(PeerIdentity(42))).await.unwrap();

        let events = wait_for_events(&mut transport).await;
        let handle = match events.as_slice() {
            [TransportEvent::Connecting { handle, peer }] => {
                assert_eq!(*peer, PeerIdentity(42));
                *handle
            }
            other => panic!("unexpected events: {other:?}"),
        };
        assert!(transport.display_name(handle).unwrap().starts_with("127.0.0.1:"));

        transport.accept(handle).unwrap();
        assert_eq!(
            transport.poll_events(),
            vec![TransportEvent::Connected {
                handle,
                peer: PeerIdentity(42)
            }]
        );
        transport.set_poll_group(handle, PollGroup::Joining).unwrap();

        transport.send(handle, b"welcome").unwrap();
        assert_eq!(read_frame(&mut client).await.unwrap(), Some(b"welcome".to_vec()));

        write_frame(&mut client, b"ping").await.unwrap();
        let frames = wait_for_frames(&mut transport, PollGroup::Joining).await;
        assert_eq!(frames, vec![RawMessage { handle, bytes: b"ping".to_vec() }]);
        assert!(transport.receive(PollGroup::Active, 16).is_empty());

        drop(client);
        let events = wait_for_events(&mut transport).await;
        assert!(matches!(
            events.as_slice(),
            [TransportEvent::Closed { handle: closed, .. }] if *closed == handle
        ));
        assert!(transport.send(handle, b"late").is_err());
    }

    #[tokio::test]
    async fn test_local_close_flushes_and_hangs_up() {
        let mut transport = TcpRelayTransport::bind("127.0.0.1:0").await.unwrap();
        let mut client = TcpStream::connect(transport.local_addr()).await.unwrap();
        write_frame(&mut client, &hello_frame(PeerIdentity(7))).await.unwrap();

        let handle = match wait_for_events(&mut transport).await.as_slice() {
            [TransportEvent::Connecting { handle, .. }] => *handle,
            other => panic!("unexpected events: {other:?}"),
        };
        transport.accept(handle).unwrap();
        transport.send(handle, b"goodbye").unwrap();
        transport.close(handle, "kicked");
        transport.close(handle, "kicked again");

        assert_eq!(read_frame(&mut client).await.unwrap(), Some(b"goodbye".to_vec()));
        assert_eq!(read_frame(&mut client).await.unwrap(), None);
        assert!(transport.poll_events().iter().all(|event| !matches!(
            event,
            TransportEvent::Closed { .. }
        )));
    }

    #[tokio::test]
    async fn test_inbound_buffer_is_capped() {
        let mut transport = TcpRelayTransport::bind("127.0.0.1:0")
            .await
            .unwrap()
            .with_inbound_limit(4);
        let mut client = TcpStream::connect(transport.local_addr()).await.unwrap();
        write_frame(&mut client, &hello_frame(PeerIdentity(3))).await.unwrap();

        let handle = match wait_for_events(&mut transport).await.as_slice() {
            [TransportEvent::Connecting { handle, .. }] => *handle,
            other => panic!("unexpected events: {other:?}"),
        };
        transport.accept(handle).unwrap();
        transport.set_poll_group(handle, PollGroup::Joining).unwrap();

        for n in 0u8..10 {
            write_frame(&mut client, &[n]).await.unwrap();
        }

        let received = timeout(Duration::from_secs(5), async {
            let mut received = Vec::new();
            while received.len() < 10 {
                transport.poll_events();
                let batch = transport.receive(PollGroup::Joining, 100);
                assert!(batch.len() <= 4, "buffered {} frames", batch.len());
                received.extend(batch.into_iter().map(|frame| frame.bytes[0]));
                sleep(Duration::from_millis(10)).await;
            }
            received
        })
        .await
        .unwrap();
        assert_eq!(received, (0u8..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_flood_before_accept_closes_link() {
        let mut transport = TcpRelayTransport::bind("127.0.0.1:0").await.unwrap();
        let mut client = TcpStream::connect(transport.local_addr()).await.unwrap();
        write_frame(&mut client, &hello_frame(PeerIdentity(5))).await.unwrap();
        for _ in 0..=MAX_EARLY_FRAMES {
            write_frame(&mut client, b"spam").await.unwrap();
        }

        let events = timeout(Duration::from_secs(5), async {
            let mut events = Vec::new();
            while !events
                .iter()
                .any(|event| matches!(event, TransportEvent::Closed { .. }))
            {
                events.extend(transport.poll_events());
                sleep(Duration::from_millis(10)).await;
            }
            events
        })
        .await
        .unwrap();

        let handle = match events.as_slice() {
            [TransportEvent::Connecting { handle, .. }, TransportEvent::Closed { handle: closed, reason }] => {
                assert_eq!(handle, closed);
                assert_eq!(reason, "too many frames before accept");
                *handle
            }
            other => panic!("unexpected events: {other:?}"),
        };
        assert!(transport.accept(handle).is_err());
    }

    #[tokio::test]
    async fn test_socket_without_hello_is_ignored() {
        let mut transport = TcpRelayTransport::bind("127.0.0.1:0").await.unwrap();
        let mut client = TcpStream::connect(transport.local_addr()).await.unwrap();
        write_frame(&mut client, b"short").await.unwrap();

        assert_eq!(read_frame(&mut client).await.unwrap(), None);
        assert!(transport.poll_events().is_empty());
    }
}
