// exposed API of the bus.

use std::cell::RefCell;
use std::rc::Rc;

use crate::bus::core::{BusCore, Message};
use crate::bus::error::TryError;
use crate::bus::table::ChannelId;

use self::future::*;

/// Handle to a message bus: a single-threaded multiplexer of bounded FIFO
/// channels for cooperatively scheduled tasks
///
/// Cloning a `Bus` produces another handle to the same bus; tasks on one
/// local executor share the bus by cloning it. When the last handle is
/// dropped the bus closes every still-open channel, and every task parked on
/// one of its operations resolves with [`NoChannelError`].
///
/// All operations come in two forms. The `try_` form never suspends: it
/// either completes immediately or reports [`TryError`]. The blocking form
/// returns a future that parks the calling task on `WouldBlock` and retries
/// when the wakeup protocol (or a close) says the situation changed.
///
/// [`NoChannelError`]: crate::error::NoChannelError
pub struct Bus {
    core: Rc<RefCell<BusCore>>,
}

impl Bus {
    /// Create an empty bus with no channels.
    pub fn new() -> Self {
        Bus { core: Rc::new(RefCell::new(BusCore::new())) }
    }

    /// Open a channel holding at most `capacity` messages and return its
    /// descriptor
    ///
    /// The lowest free descriptor is reused; opening never suspends and never
    /// fails for positive capacities.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero. A zero-capacity channel could never
    /// deliver a message: every send would park until the channel is closed.
    pub fn open(&self, capacity: usize) -> ChannelId {
        self.core.borrow_mut().open(capacity)
    }

    /// Close the channel, waking every task parked on it
    ///
    /// Idempotent and tolerant of stale descriptors: closing a channel that
    /// is not open does nothing. Otherwise all parked senders and receivers
    /// are woken, the slot is freed together with any buffered messages, and
    /// the closing task yields once so the woken tasks can observe the empty
    /// slot before it continues. Their pending operations resolve with
    /// [`NoChannelError`](crate::error::NoChannelError).
    pub async fn close(&self, id: ChannelId) {
        let closed = self.core.borrow_mut().close(id);
        if closed {
            tokio::task::yield_now().await;
        }
    }

    /// Send a message if the channel has space, without suspending
    ///
    /// Fails with `NoChannel` for a stale descriptor and `WouldBlock` for a
    /// full channel. On success the first parked receiver, if any, is woken.
    pub fn try_send(&self, id: ChannelId, msg: Message) -> Result<(), TryError> {
        self.core.borrow_mut().try_send(id, msg)
    }

    /// Send a message, parking until the channel has space
    ///
    /// Parked senders are served strictly in the order they parked.
    pub fn send(&self, id: ChannelId, msg: Message) -> SendFut {
        SendFut {
            msg,
            channel: id,
            parked: Parked::new(&self.core, Park::Senders(id)),
            done: false,
        }
    }

    /// Receive a message if one is queued, without suspending
    ///
    /// On success the freed slot wakes the first parked sender, or failing
    /// that the first parked broadcaster.
    pub fn try_recv(&self, id: ChannelId) -> Result<Message, TryError> {
        self.core.borrow_mut().try_recv(id)
    }

    /// Receive a message, parking until one is available
    pub fn recv(&self, id: ChannelId) -> RecvFut {
        RecvFut {
            channel: id,
            parked: Parked::new(&self.core, Park::Receivers(id)),
            done: false,
        }
    }

    /// Publish one message into every open channel, without suspending
    ///
    /// All-or-nothing: if any open channel is full, fails with `WouldBlock`
    /// and no channel is touched; if no channel is open, fails with
    /// `NoChannel`. Otherwise every open channel receives the message exactly
    /// once, in descriptor order.
    #[cfg(feature = "broadcast")]
    pub fn try_broadcast(&self, msg: Message) -> Result<(), TryError> {
        self.core.borrow_mut().try_broadcast(msg)
    }

    /// Publish one message into every open channel, parking until all of
    /// them have space
    ///
    /// A parked broadcaster is woken whenever a pop frees space in a channel
    /// with no parked sender of its own; it then re-checks the whole bus.
    /// The set of channels delivered to is the set open at the moment the
    /// attempt finally succeeds.
    #[cfg(feature = "broadcast")]
    pub fn broadcast(&self, msg: Message) -> BroadcastFut {
        BroadcastFut {
            msg,
            parked: Parked::new(&self.core, Park::Broadcast),
            done: false,
        }
    }

    /// Send as many messages from `msgs` as fit, without suspending
    ///
    /// Returns how many were sent (each one waking a parked receiver as with
    /// [`try_send`](Bus::try_send)). Fails with `WouldBlock` only when the
    /// input was non-empty and nothing could be sent; an empty `msgs` is a
    /// no-op returning `Ok(0)`.
    #[cfg(feature = "batch")]
    pub fn try_send_many(&self, id: ChannelId, msgs: &[Message]) -> Result<usize, TryError> {
        self.core.borrow_mut().try_send_many(id, msgs)
    }

    /// Send at least one message from `msgs`, parking until that is possible
    ///
    /// Resolves with the count moved by the first successful attempt, between
    /// 1 and `msgs.len()`; the remainder stays with the caller. An empty
    /// `msgs` resolves `Ok(0)` immediately.
    #[cfg(feature = "batch")]
    pub fn send_many<'a>(&self, id: ChannelId, msgs: &'a [Message]) -> SendManyFut<'a> {
        SendManyFut {
            msgs,
            channel: id,
            parked: Parked::new(&self.core, Park::Senders(id)),
            done: false,
        }
    }

    /// Drain up to `limit` queued messages into `buf`, without suspending
    ///
    /// Returns how many were appended. Fails with `WouldBlock` only when
    /// `limit` was non-zero and the channel was empty; `limit == 0` is a
    /// no-op returning `Ok(0)`.
    #[cfg(feature = "batch")]
    pub fn try_recv_many(
        &self,
        id: ChannelId,
        buf: &mut Vec<Message>,
        limit: usize,
    ) -> Result<usize, TryError> {
        self.core.borrow_mut().try_recv_many(id, buf, limit)
    }

    /// Receive between 1 and `limit` messages into `buf`, parking until at
    /// least one is available
    ///
    /// Resolves with the count appended by the first successful attempt. A
    /// `limit` of zero resolves `Ok(0)` immediately.
    #[cfg(feature = "batch")]
    pub fn recv_many<'a>(
        &self,
        id: ChannelId,
        buf: &'a mut Vec<Message>,
        limit: usize,
    ) -> RecvManyFut<'a> {
        RecvManyFut {
            buf,
            limit,
            channel: id,
            parked: Parked::new(&self.core, Park::Receivers(id)),
            done: false,
        }
    }

    /// Whether the descriptor currently names an open channel.
    pub fn is_open(&self, id: ChannelId) -> bool {
        self.core.borrow().is_open(id)
    }

    /// Number of queued messages, or `None` for a stale descriptor.
    pub fn len(&self, id: ChannelId) -> Option<usize> {
        self.core.borrow().len(id)
    }

    /// Capacity the channel was opened with, or `None` for a stale descriptor.
    pub fn capacity(&self, id: ChannelId) -> Option<usize> {
        self.core.borrow().capacity(id)
    }
}

impl Clone for Bus {
    fn clone(&self) -> Self {
        self.core.borrow_mut().add_handle();
        Bus { core: Rc::clone(&self.core) }
    }
}

impl Default for Bus {
    fn default() -> Self {
        Bus::new()
    }
}

impl Drop for Bus {
    fn drop(&mut self) {
        let mut core = self.core.borrow_mut();
        if core.release_handle() {
            core.close_all();
        }
    }
}

// future types for the bus.
pub(crate) mod future {
    use std::future::Future;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use super::*;
    use crate::bus::error::NoChannelError;
    use crate::bus::waiter_queue::{SlotState, WaiterSlot};

    /// which waiter queue a blocking form parks in; also tells a dropped
    /// future where an unconsumed wakeup must be forwarded
    #[derive(Debug, Copy, Clone)]
    pub(super) enum Park {
        Senders(ChannelId),
        Receivers(ChannelId),
        #[cfg(feature = "broadcast")]
        Broadcast,
    }

    /// the park-and-retry engine shared by all blocking forms
    pub(super) struct Parked {
        core: Rc<RefCell<BusCore>>,
        park: Park,
        slot: Option<Rc<WaiterSlot>>,
    }

    impl Parked {
        pub(super) fn new(core: &Rc<RefCell<BusCore>>, park: Park) -> Self {
            Parked { core: Rc::clone(core), park, slot: None }
        }

        pub(super) fn core(&self) -> &Rc<RefCell<BusCore>> {
            &self.core
        }

        /// Whether the owning future should (re)attempt its try-form now.
        /// While the slot is still waiting, only the waker is refreshed.
        pub(super) fn ready_to_try(&mut self, cx: &mut Context<'_>) -> bool {
            match &self.slot {
                None => true,
                Some(slot) => match slot.state() {
                    SlotState::Waiting => {
                        slot.set_waker(cx.waker());
                        false
                    }
                    SlotState::Woken | SlotState::Cancelled => {
                        self.slot = None;
                        true
                    }
                },
            }
        }

        /// Park in the right waiter queue after the try-form reported
        /// `WouldBlock`.
        pub(super) fn park(&mut self, cx: &mut Context<'_>) {
            let mut core = self.core.borrow_mut();
            let slot = match self.park {
                Park::Senders(id) => core.park_sender(id, cx.waker()),
                Park::Receivers(id) => core.park_receiver(id, cx.waker()),
                #[cfg(feature = "broadcast")]
                Park::Broadcast => Some(core.park_broadcaster(cx.waker())),
            };
            if slot.is_none() {
                // the channel vanished before we could park; retry straight
                // away so the next attempt reports NoChannel
                cx.waker().wake_by_ref();
            }
            self.slot = slot;
        }
    }

    impl Drop for Parked {
        fn drop(&mut self) {
            let Some(slot) = self.slot.take() else { return };
            match slot.state() {
                SlotState::Waiting => slot.cancel(),
                // the wakeup this future absorbed belongs to the next waiter
                SlotState::Woken => {
                    let mut core = self.core.borrow_mut();
                    match self.park {
                        Park::Senders(id) => core.forward_send_wake(id),
                        Park::Receivers(id) => core.forward_recv_wake(id),
                        #[cfg(feature = "broadcast")]
                        Park::Broadcast => core.forward_broadcast_wake(),
                    }
                }
                SlotState::Cancelled => {}
            }
        }
    }

    /// Future for [`Bus::send`]
    ///
    /// Resolves `Ok(())` once the message is queued, or
    /// [`NoChannelError`] if the channel is closed before then. Parked send
    /// futures on one channel are woken strictly in the order they parked.
    /// Dropping the future before it resolves leaves the channel untouched
    /// and passes any wakeup it had absorbed to the next parked sender.
    pub struct SendFut {
        pub(super) msg: Message,
        pub(super) channel: ChannelId,
        pub(super) parked: Parked,
        pub(super) done: bool,
    }

    impl Future for SendFut {
        type Output = Result<(), NoChannelError>;

        fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
            let this = self.get_mut();
            assert!(!this.done, "SendFut polled after already resolved");
            if !this.parked.ready_to_try(cx) {
                return Poll::Pending;
            }
            let attempt = this.parked.core().borrow_mut().try_send(this.channel, this.msg);
            match attempt {
                Ok(()) => {
                    this.done = true;
                    Poll::Ready(Ok(()))
                }
                Err(TryError::NoChannel(e)) => {
                    this.done = true;
                    Poll::Ready(Err(e))
                }
                Err(TryError::WouldBlock(_)) => {
                    this.parked.park(cx);
                    Poll::Pending
                }
            }
        }
    }

    /// Future for [`Bus::recv`]
    ///
    /// Resolves with the received message, or [`NoChannelError`] if the
    /// channel is closed first. Parked recv futures on one channel are woken
    /// strictly in the order they parked.
    pub struct RecvFut {
        pub(super) channel: ChannelId,
        pub(super) parked: Parked,
        pub(super) done: bool,
    }

    impl Future for RecvFut {
        type Output = Result<Message, NoChannelError>;

        fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
            let this = self.get_mut();
            assert!(!this.done, "RecvFut polled after already resolved");
            if !this.parked.ready_to_try(cx) {
                return Poll::Pending;
            }
            let attempt = this.parked.core().borrow_mut().try_recv(this.channel);
            match attempt {
                Ok(msg) => {
                    this.done = true;
                    Poll::Ready(Ok(msg))
                }
                Err(TryError::NoChannel(e)) => {
                    this.done = true;
                    Poll::Ready(Err(e))
                }
                Err(TryError::WouldBlock(_)) => {
                    this.parked.park(cx);
                    Poll::Pending
                }
            }
        }
    }

    /// Future for [`Bus::broadcast`]
    ///
    /// Resolves `Ok(())` once every open channel has accepted the message in
    /// a single attempt, or [`NoChannelError`] once an attempt finds no open
    /// channel at all.
    #[cfg(feature = "broadcast")]
    pub struct BroadcastFut {
        pub(super) msg: Message,
        pub(super) parked: Parked,
        pub(super) done: bool,
    }

    #[cfg(feature = "broadcast")]
    impl Future for BroadcastFut {
        type Output = Result<(), NoChannelError>;

        fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
            let this = self.get_mut();
            assert!(!this.done, "BroadcastFut polled after already resolved");
            if !this.parked.ready_to_try(cx) {
                return Poll::Pending;
            }
            let attempt = this.parked.core().borrow_mut().try_broadcast(this.msg);
            match attempt {
                Ok(()) => {
                    this.done = true;
                    Poll::Ready(Ok(()))
                }
                Err(TryError::NoChannel(e)) => {
                    this.done = true;
                    Poll::Ready(Err(e))
                }
                Err(TryError::WouldBlock(_)) => {
                    this.parked.park(cx);
                    Poll::Pending
                }
            }
        }
    }

    /// Future for [`Bus::send_many`]
    ///
    /// Resolves with the number of messages moved by the first successful
    /// attempt, or [`NoChannelError`] if the channel closes first.
    #[cfg(feature = "batch")]
    pub struct SendManyFut<'a> {
        pub(super) msgs: &'a [Message],
        pub(super) channel: ChannelId,
        pub(super) parked: Parked,
        pub(super) done: bool,
    }

    #[cfg(feature = "batch")]
    impl Future for SendManyFut<'_> {
        type Output = Result<usize, NoChannelError>;

        fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
            let this = self.get_mut();
            assert!(!this.done, "SendManyFut polled after already resolved");
            if !this.parked.ready_to_try(cx) {
                return Poll::Pending;
            }
            let attempt = this.parked.core().borrow_mut().try_send_many(this.channel, this.msgs);
            match attempt {
                Ok(sent) => {
                    this.done = true;
                    Poll::Ready(Ok(sent))
                }
                Err(TryError::NoChannel(e)) => {
                    this.done = true;
                    Poll::Ready(Err(e))
                }
                Err(TryError::WouldBlock(_)) => {
                    this.parked.park(cx);
                    Poll::Pending
                }
            }
        }
    }

    /// Future for [`Bus::recv_many`]
    ///
    /// Resolves with the number of messages appended to the caller's buffer
    /// by the first successful attempt, or [`NoChannelError`] if the channel
    /// closes first.
    #[cfg(feature = "batch")]
    pub struct RecvManyFut<'a> {
        pub(super) buf: &'a mut Vec<Message>,
        pub(super) limit: usize,
        pub(super) channel: ChannelId,
        pub(super) parked: Parked,
        pub(super) done: bool,
    }

    #[cfg(feature = "batch")]
    impl Future for RecvManyFut<'_> {
        type Output = Result<usize, NoChannelError>;

        fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
            let this = self.get_mut();
            assert!(!this.done, "RecvManyFut polled after already resolved");
            if !this.parked.ready_to_try(cx) {
                return Poll::Pending;
            }
            let attempt =
                this.parked.core().borrow_mut().try_recv_many(this.channel, this.buf, this.limit);
            match attempt {
                Ok(received) => {
                    this.done = true;
                    Poll::Ready(Ok(received))
                }
                Err(TryError::NoChannel(e)) => {
                    this.done = true;
                    Poll::Ready(Err(e))
                }
                Err(TryError::WouldBlock(_)) => {
                    this.parked.park(cx);
                    Poll::Pending
                }
            }
        }
    }
}
