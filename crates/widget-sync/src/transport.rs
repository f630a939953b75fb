//! Frame transports: the [`Transport`] seam plus two in-memory
//! implementations.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use widget_sync_core::Frame;

use crate::error::TransportError;

/// A bidirectional, ordered, frame-oriented connection.
///
/// Implementations never block: `transmit` hands the frame off and
/// `receive` returns `Ok(None)` when nothing is waiting.
pub trait Transport {
    fn open(&mut self) -> Result<(), TransportError>;
    fn transmit(&mut self, frame: Frame) -> Result<(), TransportError>;
    fn receive(&mut self) -> Result<Option<Frame>, TransportError>;
    fn close(&mut self);
}

// ── Loopback ──────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Link {
    up: bool,
    queues: [VecDeque<Frame>; 2],
    faults: [Faults; 2],
}

#[derive(Debug, Default, Clone, Copy)]
struct Faults {
    fail_next_send: bool,
    refuse_opens: u32,
    reverse_delivery: bool,
}

/// One end of an in-memory duplex link created by [`LoopbackTransport::pair`].
///
/// Faults can be injected per end to simulate an unreliable host
/// connection: a failing send, a dropped link, refused reconnects and
/// out-of-order delivery.
#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    link: Rc<RefCell<Link>>,
    side: usize,
    closed: bool,
}

impl LoopbackTransport {
    /// Returns `(host, browser)` ends of a fresh link. The link comes up
    /// when either end opens.
    pub fn pair() -> (LoopbackTransport, LoopbackTransport) {
        let link = Rc::new(RefCell::new(Link::default()));
        (
            LoopbackTransport {
                link: Rc::clone(&link),
                side: 0,
                closed: false,
            },
            LoopbackTransport {
                link,
                side: 1,
                closed: false,
            },
        )
    }

    fn peer(&self) -> usize {
        1 - self.side
    }

    /// The next `transmit` from this end fails and takes the link down.
    pub fn fail_next_send(&self) {
        self.link.borrow_mut().faults[self.side].fail_next_send = true;
    }

    /// Takes the link down; frames in flight are lost.
    pub fn drop_connection(&self) {
        let mut link = self.link.borrow_mut();
        link.up = false;
        link.queues.iter_mut().for_each(VecDeque::clear);
    }

    /// The next `count` opens from this end are refused.
    pub fn refuse_opens(&self, count: u32) {
        self.link.borrow_mut().faults[self.side].refuse_opens = count;
    }

    /// Frames arriving at this end are received newest first.
    pub fn deliver_in_reverse(&self, enabled: bool) {
        self.link.borrow_mut().faults[self.side].reverse_delivery = enabled;
    }

    pub fn is_up(&self) -> bool {
        self.link.borrow().up
    }

    /// Frames waiting to be received by this end.
    pub fn pending(&self) -> usize {
        self.link.borrow().queues[self.side].len()
    }

    /// Receives everything currently waiting at this end.
    pub fn drain(&mut self) -> Result<Vec<Frame>, TransportError> {
        let mut out = Vec::new();
        while let Some(frame) = self.receive()? {
            out.push(frame);
        }
        Ok(out)
    }
}

impl Transport for LoopbackTransport {
    fn open(&mut self) -> Result<(), TransportError> {
        let mut link = self.link.borrow_mut();
        let faults = &mut link.faults[self.side];
        if faults.refuse_opens > 0 {
            faults.refuse_opens -= 1;
            return Err(TransportError::Refused("loopback refused the connection".into()));
        }
        link.up = true;
        self.closed = false;
        Ok(())
    }

    fn transmit(&mut self, frame: Frame) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let peer = self.peer();
        let mut link = self.link.borrow_mut();
        if std::mem::take(&mut link.faults[self.side].fail_next_send) {
            link.up = false;
            return Err(TransportError::Disconnected("send failed".into()));
        }
        if !link.up {
            return Err(TransportError::Disconnected("link is down".into()));
        }
        link.queues[peer].push_back(frame);
        Ok(())
    }

    fn receive(&mut self) -> Result<Option<Frame>, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let mut link = self.link.borrow_mut();
        if !link.up {
            return Err(TransportError::Disconnected("link is down".into()));
        }
        let reverse = link.faults[self.side].reverse_delivery;
        let queue = &mut link.queues[self.side];
        Ok(if reverse { queue.pop_back() } else { queue.pop_front() })
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let mut link = self.link.borrow_mut();
        link.up = false;
        let side = self.side;
        link.queues[side].clear();
    }
}

// ── Shared queues ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Queues {
    connected: bool,
    inbound: VecDeque<Frame>,
    outbound: VecDeque<Frame>,
}

/// Transport over queues shared with a [`QueueHandle`], for embedders that
/// own the real socket (a browser `WebSocket`, for instance) and move frames
/// across themselves.
#[derive(Debug)]
pub struct QueueTransport {
    queues: Rc<RefCell<Queues>>,
}

/// The embedder's side of a [`QueueTransport`].
#[derive(Debug, Clone)]
pub struct QueueHandle {
    queues: Rc<RefCell<Queues>>,
}

impl QueueTransport {
    /// Creates a connected transport and the handle feeding it.
    pub fn pair() -> (QueueTransport, QueueHandle) {
        let queues = Rc::new(RefCell::new(Queues {
            connected: true,
            ..Queues::default()
        }));
        (
            QueueTransport {
                queues: Rc::clone(&queues),
            },
            QueueHandle { queues },
        )
    }
}

impl QueueHandle {
    pub fn push_inbound(&self, frame: Frame) {
        self.queues.borrow_mut().inbound.push_back(frame);
    }

    pub fn drain_outbound(&self) -> Vec<Frame> {
        self.queues.borrow_mut().outbound.drain(..).collect()
    }

    /// Reports the state of the underlying connection. While disconnected
    /// the transport fails, which the channel treats as a disconnect.
    pub fn set_connected(&self, connected: bool) {
        self.queues.borrow_mut().connected = connected;
    }
}

impl Transport for QueueTransport {
    fn open(&mut self) -> Result<(), TransportError> {
        if self.queues.borrow().connected {
            Ok(())
        } else {
            Err(TransportError::Refused("embedder reports no connection".into()))
        }
    }

    fn transmit(&mut self, frame: Frame) -> Result<(), TransportError> {
        let mut queues = self.queues.borrow_mut();
        if !queues.connected {
            return Err(TransportError::Disconnected("embedder reports no connection".into()));
        }
        queues.outbound.push_back(frame);
        Ok(())
    }

    fn receive(&mut self) -> Result<Option<Frame>, TransportError> {
        let mut queues = self.queues.borrow_mut();
        if !queues.connected {
            return Err(TransportError::Disconnected("embedder reports no connection".into()));
        }
        Ok(queues.inbound.pop_front())
    }

    fn close(&mut self) {
        let mut queues = self.queues.borrow_mut();
        queues.inbound.clear();
        queues.outbound.clear();
    }
}
