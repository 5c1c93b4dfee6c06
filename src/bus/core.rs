// the channel state machine and the wakeup protocol.
//
// everything here runs under the bus handle's RefCell, so each method is one
// indivisible step of the cooperative schedule: a try-form observes state and
// mutates it with no suspension point in between.

use std::collections::VecDeque;
use std::rc::Rc;
use std::task::Waker;

use crate::bus::error::{fail, NoChannelError, TryError, WouldBlockError};
use crate::bus::table::{ChannelId, ChannelTable};
use crate::bus::waiter_queue::{WaiterQueue, WaiterSlot};

/// Payload carried by the bus: fixed-width unsigned messages.
pub type Message = u32;

/// One bounded channel: its message queue plus the two waiter queues.
pub(crate) struct Channel {
    /// strictly positive bound on the message queue length
    capacity: usize,
    messages: VecDeque<Message>,
    /// tasks parked because the channel was full when they tried to send
    send_waiters: WaiterQueue,
    /// tasks parked because the channel was empty when they tried to receive
    recv_waiters: WaiterQueue,
}

impl Channel {
    pub(crate) fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "channel capacity must be positive");
        Channel {
            capacity,
            messages: VecDeque::new(),
            send_waiters: WaiterQueue::new(),
            recv_waiters: WaiterQueue::new(),
        }
    }

    fn has_space(&self) -> bool {
        self.messages.len() < self.capacity
    }

    fn has_message(&self) -> bool {
        !self.messages.is_empty()
    }

    /// Append a message and hand one wakeup to the first parked receiver.
    fn push_and_notify(&mut self, msg: Message) {
        debug_assert!(self.has_space());
        self.messages.push_back(msg);
        self.recv_waiters.wake_one();
    }
}

/// Mutable bus state behind the handle's `RefCell`: the slot table, the
/// bus-level broadcast waiter queue, and the live handle count.
pub(crate) struct BusCore {
    table: ChannelTable,
    /// tasks parked on a broadcast that saw at least one full channel
    broadcast_waiters: WaiterQueue,
    /// number of live `Bus` handles; in-flight operation futures do not count
    handles: usize,
}

impl BusCore {
    pub(crate) fn new() -> Self {
        BusCore {
            table: ChannelTable::new(),
            broadcast_waiters: WaiterQueue::new(),
            handles: 1,
        }
    }

    /// Pop the head message and hand one wakeup to the first parked sender,
    /// or failing that to the first parked broadcaster. A pop is the only
    /// event that frees space a blocked broadcast could be waiting on.
    fn pop_and_notify(channel: &mut Channel, broadcast_waiters: &mut WaiterQueue) -> Message {
        debug_assert!(channel.has_message());
        let msg = channel.messages.pop_front().expect("pop from empty channel");
        if !channel.send_waiters.wake_one() {
            broadcast_waiters.wake_one();
        }
        msg
    }

    // ==== lifecycle ====

    pub(crate) fn open(&mut self, capacity: usize) -> ChannelId {
        let id = self.table.insert(Channel::new(capacity));
        trace!(channel = id.index(), capacity, "channel opened");
        id
    }

    /// Wake everything parked on the channel and empty its slot. Returns
    /// whether the descriptor named an open channel. The waiter queues are
    /// drained before the channel is dropped; woken waiters re-enter through
    /// the bus by descriptor, find the slot empty, and resolve `NoChannel`.
    pub(crate) fn close(&mut self, id: ChannelId) -> bool {
        let Some(mut channel) = self.table.remove(id) else {
            return false;
        };
        trace!(channel = id.index(), queued = channel.messages.len(), "channel closed");
        channel.send_waiters.wake_all();
        channel.recv_waiters.wake_all();
        true
    }

    /// Bus teardown: close every still-open channel, then release the
    /// broadcasters so no task stays parked on a dead bus.
    pub(crate) fn close_all(&mut self) {
        for mut channel in self.table.take_all() {
            channel.send_waiters.wake_all();
            channel.recv_waiters.wake_all();
        }
        self.broadcast_waiters.wake_all();
        trace!("bus torn down");
    }

    pub(crate) fn add_handle(&mut self) {
        self.handles += 1;
    }

    /// Drop one bus handle; returns true when it was the last one.
    pub(crate) fn release_handle(&mut self) -> bool {
        debug_assert!(self.handles > 0);
        self.handles -= 1;
        self.handles == 0
    }

    // ==== unicast ====

    pub(crate) fn try_send(&mut self, id: ChannelId, msg: Message) -> Result<(), TryError> {
        let Some(channel) = self.table.get_mut(id) else {
            return Err(fail(NoChannelError).into());
        };
        if !channel.has_space() {
            return Err(fail(WouldBlockError).into());
        }
        channel.push_and_notify(msg);
        Ok(())
    }

    pub(crate) fn try_recv(&mut self, id: ChannelId) -> Result<Message, TryError> {
        let Some(channel) = self.table.get_mut(id) else {
            return Err(fail(NoChannelError).into());
        };
        if !channel.has_message() {
            return Err(fail(WouldBlockError).into());
        }
        Ok(Self::pop_and_notify(channel, &mut self.broadcast_waiters))
    }

    // ==== broadcast ====

    /// All-or-nothing within this single step: either every open channel
    /// receives the message exactly once, or none does.
    #[cfg(feature = "broadcast")]
    pub(crate) fn try_broadcast(&mut self, msg: Message) -> Result<(), TryError> {
        let mut any_open = false;
        for channel in self.table.iter_open() {
            any_open = true;
            if !channel.has_space() {
                return Err(fail(WouldBlockError).into());
            }
        }
        if !any_open {
            return Err(fail(NoChannelError).into());
        }
        for channel in self.table.iter_open_mut() {
            channel.push_and_notify(msg);
        }
        Ok(())
    }

    // ==== vectorised ====

    #[cfg(feature = "batch")]
    pub(crate) fn try_send_many(
        &mut self,
        id: ChannelId,
        msgs: &[Message],
    ) -> Result<usize, TryError> {
        let Some(channel) = self.table.get_mut(id) else {
            return Err(fail(NoChannelError).into());
        };
        // empty input is a no-op, not a would-block
        if msgs.is_empty() {
            return Ok(0);
        }
        let mut sent = 0;
        while sent < msgs.len() && channel.has_space() {
            channel.push_and_notify(msgs[sent]);
            sent += 1;
        }
        if sent == 0 {
            return Err(fail(WouldBlockError).into());
        }
        Ok(sent)
    }

    #[cfg(feature = "batch")]
    pub(crate) fn try_recv_many(
        &mut self,
        id: ChannelId,
        buf: &mut Vec<Message>,
        limit: usize,
    ) -> Result<usize, TryError> {
        let Some(channel) = self.table.get_mut(id) else {
            return Err(fail(NoChannelError).into());
        };
        if limit == 0 {
            return Ok(0);
        }
        let mut received = 0;
        while received < limit && channel.has_message() {
            buf.push(Self::pop_and_notify(channel, &mut self.broadcast_waiters));
            received += 1;
        }
        if received == 0 {
            return Err(fail(WouldBlockError).into());
        }
        Ok(received)
    }

    // ==== parking ====
    //
    // called by a blocking form right after its try-form reported WouldBlock.
    // nothing can have run in between, so the channel still exists; the
    // Option is only there to spare the caller an unwrap.

    pub(crate) fn park_sender(&mut self, id: ChannelId, waker: &Waker) -> Option<Rc<WaiterSlot>> {
        self.table.get_mut(id).map(|channel| channel.send_waiters.park(waker))
    }

    pub(crate) fn park_receiver(&mut self, id: ChannelId, waker: &Waker) -> Option<Rc<WaiterSlot>> {
        self.table.get_mut(id).map(|channel| channel.recv_waiters.park(waker))
    }

    #[cfg(feature = "broadcast")]
    pub(crate) fn park_broadcaster(&mut self, waker: &Waker) -> Rc<WaiterSlot> {
        self.broadcast_waiters.park(waker)
    }

    // ==== dropped-wakeup forwarding ====
    //
    // a parked future that was woken and then dropped before re-polling has
    // absorbed a wakeup that belongs to the next waiter in line.

    pub(crate) fn forward_send_wake(&mut self, id: ChannelId) {
        if let Some(channel) = self.table.get_mut(id) {
            if channel.send_waiters.wake_one() {
                return;
            }
        }
        self.broadcast_waiters.wake_one();
    }

    pub(crate) fn forward_recv_wake(&mut self, id: ChannelId) {
        if let Some(channel) = self.table.get_mut(id) {
            channel.recv_waiters.wake_one();
        }
    }

    #[cfg(feature = "broadcast")]
    pub(crate) fn forward_broadcast_wake(&mut self) {
        self.broadcast_waiters.wake_one();
    }

    // ==== introspection ====

    pub(crate) fn is_open(&self, id: ChannelId) -> bool {
        self.table.get(id).is_some()
    }

    pub(crate) fn len(&self, id: ChannelId) -> Option<usize> {
        self.table.get(id).map(|channel| channel.messages.len())
    }

    pub(crate) fn capacity(&self, id: ChannelId) -> Option<usize> {
        self.table.get(id).map(|channel| channel.capacity)
    }
}
