//! Per-connection frame pump with connection state tracking.

use std::collections::{BTreeMap, VecDeque};

use tracing::{debug, trace, warn};
use widget_sync_core::Frame;

use crate::error::{ChannelError, TransportError};
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    Connecting,
    Open,
    Closed,
}

/// Observed by whoever polls the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Opened,
    Message(Frame),
    Disconnected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

type MessageHandler = Box<dyn FnMut(&Frame)>;

/// Object-safe view of a channel, as held by the comm manager.
pub trait Channel {
    fn state(&self) -> ChannelState;
    /// Queues `frame` for delivery. Never blocks; while connecting the frame
    /// waits for the connection to come back.
    fn send(&mut self, frame: Frame) -> Result<(), ChannelError>;
    /// Flushes queued frames, then drains inbound ones.
    fn poll(&mut self) -> Vec<ChannelEvent>;
    /// Flushes queued frames without receiving.
    fn flush(&mut self) -> Vec<ChannelEvent>;
    /// Attempts to re-open a connecting channel.
    fn reconnect(&mut self) -> Result<(), ChannelError>;
    /// Releases the transport. Idempotent.
    fn close(&mut self);
    /// Frames queued and not yet handed to the transport.
    fn queued(&self) -> usize;
}

/// A [`Channel`] over any [`Transport`].
///
/// States move `Connecting -> Open` on a successful open,
/// `Open -> Connecting` when the transport fails, and to `Closed` on
/// [`Channel::close`]; nothing leaves `Closed`.
pub struct CommChannel<T: Transport> {
    transport: T,
    state: ChannelState,
    outbox: VecDeque<Frame>,
    events: Vec<ChannelEvent>,
    next_handler_id: u64,
    handlers: BTreeMap<u64, MessageHandler>,
}

impl<T: Transport> std::fmt::Debug for CommChannel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommChannel")
            .field("state", &self.state)
            .field("queued", &self.outbox.len())
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl<T: Transport> CommChannel<T> {
    /// Wraps `transport` and tries to open it. A refused open leaves the
    /// channel connecting.
    pub fn open(transport: T) -> Self {
        let mut channel = Self {
            transport,
            state: ChannelState::Connecting,
            outbox: VecDeque::new(),
            events: Vec::new(),
            next_handler_id: 1,
            handlers: BTreeMap::new(),
        };
        if let Err(err) = channel.try_open() {
            debug!(%err, "channel starts disconnected");
        }
        channel
    }

    /// Registers a listener called with every inbound frame, in arrival
    /// order, during [`Channel::poll`].
    pub fn on_message<F>(&mut self, handler: F) -> HandlerId
    where
        F: FnMut(&Frame) + 'static,
    {
        let id = self.next_handler_id;
        self.next_handler_id = self.next_handler_id.saturating_add(1);
        self.handlers.insert(id, Box::new(handler));
        HandlerId(id)
    }

    pub fn off_message(&mut self, id: HandlerId) -> bool {
        self.handlers.remove(&id.0).is_some()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn try_open(&mut self) -> Result<(), TransportError> {
        self.transport.open()?;
        self.state = ChannelState::Open;
        self.events.push(ChannelEvent::Opened);
        debug!(queued = self.outbox.len(), "channel open");
        Ok(())
    }

    /// Hands the outbox to the transport. Returns `false` if the
    /// connection was lost on the way.
    fn transmit_queued(&mut self, events: &mut Vec<ChannelEvent>) -> bool {
        while let Some(frame) = self.outbox.pop_front() {
            trace!(bytes = frame.len(), "transmit");
            if let Err(err) = self.transport.transmit(frame.clone()) {
                // Kept at the head so order survives the reconnect.
                self.outbox.push_front(frame);
                self.lose_connection(&err, events);
                return false;
            }
        }
        true
    }

    fn lose_connection(&mut self, err: &TransportError, events: &mut Vec<ChannelEvent>) {
        warn!(%err, queued = self.outbox.len(), "channel disconnected");
        self.state = ChannelState::Connecting;
        events.push(ChannelEvent::Disconnected(err.to_string()));
    }
}

impl<T: Transport> Channel for CommChannel<T> {
    fn state(&self) -> ChannelState {
        self.state
    }

    fn send(&mut self, frame: Frame) -> Result<(), ChannelError> {
        if self.state == ChannelState::Closed {
            return Err(ChannelError::Closed);
        }
        self.outbox.push_back(frame);
        Ok(())
    }

    fn poll(&mut self) -> Vec<ChannelEvent> {
        let mut events = std::mem::take(&mut self.events);
        if self.state != ChannelState::Open || !self.transmit_queued(&mut events) {
            return events;
        }
        loop {
            match self.transport.receive() {
                Ok(Some(frame)) => {
                    trace!(bytes = frame.len(), "receive");
                    for handler in self.handlers.values_mut() {
                        handler(&frame);
                    }
                    events.push(ChannelEvent::Message(frame));
                }
                Ok(None) => break,
                Err(err) => {
                    self.lose_connection(&err, &mut events);
                    break;
                }
            }
        }
        events
    }

    fn flush(&mut self) -> Vec<ChannelEvent> {
        let mut events = std::mem::take(&mut self.events);
        if self.state == ChannelState::Open {
            self.transmit_queued(&mut events);
        }
        events
    }

    fn reconnect(&mut self) -> Result<(), ChannelError> {
        match self.state {
            ChannelState::Closed => Err(ChannelError::Closed),
            ChannelState::Open => Ok(()),
            ChannelState::Connecting => Ok(self.try_open()?),
        }
    }

    fn close(&mut self) {
        if self.state == ChannelState::Closed {
            return;
        }
        self.transport.close();
        self.state = ChannelState::Closed;
        self.outbox.clear();
        self.events.clear();
        self.handlers.clear();
        debug!("channel closed");
    }

    fn queued(&self) -> usize {
        self.outbox.len()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::transport::LoopbackTransport;

    fn text(s: &str) -> Frame {
        Frame::Text(s.to_string())
    }

    #[test]
    fn opens_and_pumps_frames() {
        let (mut host, browser) = LoopbackTransport::pair();
        let mut channel = CommChannel::open(browser);
        assert_eq!(channel.state(), ChannelState::Open);
        assert_eq!(channel.poll(), vec![ChannelEvent::Opened]);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        channel.on_message(move |f| sink.borrow_mut().push(f.clone()));

        host.transmit(text("1")).unwrap();
        host.transmit(text("2")).unwrap();
        channel.send(text("up")).unwrap();
        let events = channel.poll();
        assert_eq!(
            events,
            vec![ChannelEvent::Message(text("1")), ChannelEvent::Message(text("2"))]
        );
        assert_eq!(*seen.borrow(), vec![text("1"), text("2")]);
        assert_eq!(host.receive().unwrap(), Some(text("up")));

        host.transmit(text("3")).unwrap();
        channel.send(text("again")).unwrap();
        assert!(channel.flush().is_empty());
        assert_eq!(host.receive().unwrap(), Some(text("again")));
        assert_eq!(seen.borrow().len(), 2);
    }

    #[test]
    fn failed_send_keeps_order_across_reconnect() {
        let (mut host, browser) = LoopbackTransport::pair();
        let faults = browser.clone();
        let mut channel = CommChannel::open(browser);
        channel.poll();

        faults.fail_next_send();
        channel.send(text("a")).unwrap();
        channel.send(text("b")).unwrap();
        let events = channel.poll();
        assert!(matches!(events.as_slice(), [ChannelEvent::Disconnected(_)]));
        assert_eq!(channel.state(), ChannelState::Connecting);
        assert_eq!(channel.queued(), 2);

        channel.reconnect().unwrap();
        assert_eq!(channel.poll(), vec![ChannelEvent::Opened]);
        assert_eq!(host.drain().unwrap(), vec![text("a"), text("b")]);
    }

    #[test]
    fn refused_open_starts_connecting() {
        let (_host, browser) = LoopbackTransport::pair();
        browser.refuse_opens(1);
        let mut channel = CommChannel::open(browser);
        assert_eq!(channel.state(), ChannelState::Connecting);
        channel.send(text("early")).unwrap();
        assert!(channel.poll().is_empty());
        channel.reconnect().unwrap();
        assert_eq!(channel.state(), ChannelState::Open);
    }

    #[test]
    fn closed_is_terminal() {
        let (_host, browser) = LoopbackTransport::pair();
        let mut channel = CommChannel::open(browser);
        channel.close();
        channel.close();
        assert_eq!(channel.state(), ChannelState::Closed);
        assert_eq!(channel.send(text("x")), Err(ChannelError::Closed));
        assert_eq!(channel.reconnect(), Err(ChannelError::Closed));
        assert!(channel.poll().is_empty());
    }
}
