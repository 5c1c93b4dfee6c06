//! # Penstock: a bounded message bus for cooperatively scheduled tasks
//!
//! A penstock is the gated channel that feeds a waterwheel exactly as much
//! water as it can take. This crate is the same thing for messages: an
//! in-process, single-threaded multiplexer of bounded FIFO channels that
//! lightweight tasks use to exchange `u32` messages with backpressure.
//!
//! #### The model
//!
//! A [`Bus`] owns a table of channels addressed by small integer descriptors
//! ([`ChannelId`]). Each channel is a bounded queue with two waiter lists:
//! senders parked because the channel was full, and receivers parked because
//! it was empty. Waiters are always woken in the order they parked, one
//! wakeup per delivered or consumed message.
//!
//! Every operation has a non-suspending `try_` form that reports
//! [`TryError::WouldBlock`](error::TryError) instead of waiting, and a
//! blocking form that parks the task and retries once the protocol wakes it.
//! "Blocking" here never blocks a thread: the blocking forms are futures,
//! and the whole bus is deliberately `!Send` (`Rc`/`RefCell` inside), meant
//! to be driven by a local executor such as `tokio::task::LocalSet`.
//!
//! ```
//! use penstock::Bus;
//!
//! let bus = Bus::new();
//! let ch = bus.open(2);
//! bus.try_send(ch, 7).unwrap();
//! bus.try_send(ch, 8).unwrap();
//! assert!(bus.try_send(ch, 9).unwrap_err().is_would_block());
//! assert_eq!(bus.try_recv(ch).unwrap(), 7);
//! ```
//!
//! #### Backpressure between tasks
//!
//! ```
//! use penstock::Bus;
//! use tokio::task::LocalSet;
//!
//! let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
//! let local = LocalSet::new();
//! local.block_on(&rt, async {
//!     let bus = Bus::new();
//!     let ch = bus.open(1);
//!     let sender = bus.clone();
//!     tokio::task::spawn_local(async move {
//!         sender.send(ch, 7).await.unwrap();
//!         sender.send(ch, 8).await.unwrap(); // parks until 7 is consumed
//!     });
//!     assert_eq!(bus.recv(ch).await.unwrap(), 7);
//!     assert_eq!(bus.recv(ch).await.unwrap(), 8);
//! });
//! ```
//!
//! #### Broadcast and vectorised transfers
//!
//! With the `broadcast` feature (default), [`Bus::broadcast`] publishes one
//! message into every open channel atomically: either all of them accept it
//! in a single cooperative turn, or none does and the broadcaster parks.
//! With the `batch` feature (default), [`Bus::send_many`] and
//! [`Bus::recv_many`] move as many messages as fit in one turn.
//!
//! #### Closing
//!
//! [`Bus::close`] wakes every task parked on the channel, frees the slot,
//! and yields once; the woken tasks then observe the empty slot and their
//! operations resolve with [`NoChannelError`](error::NoChannelError). The
//! descriptor is recycled by the next `open`. Dropping the last [`Bus`]
//! handle closes every remaining channel the same way.
//!
//! Failing operations additionally record an [`error::ErrorCode`] in a
//! thread-local last-error slot readable through [`error::last_error`],
//! for callers that funnel results through a unified errno-style check.

#[allow(unused_imports)]
#[macro_use]
extern crate tracing;

mod bus;

pub use crate::bus::api::Bus;
pub use crate::bus::core::Message;
pub use crate::bus::ChannelId;

/// Error types and the thread-local last-error slot
pub mod error {
    pub use crate::bus::error::{
        last_error, set_last_error, ErrorCode, NoChannelError, TryError, WouldBlockError,
    };
}

/// Future types returned by the blocking forms
pub mod future {
    #[cfg(feature = "broadcast")]
    pub use crate::bus::api::future::BroadcastFut;
    #[cfg(feature = "batch")]
    pub use crate::bus::api::future::{RecvManyFut, SendManyFut};
    pub use crate::bus::api::future::{RecvFut, SendFut};
}
