// bus error types and the thread-local last-error slot.

use std::cell::Cell;

use thiserror::Error;

// ==== base error types ====

/// Error for operating on a descriptor that does not name an open channel
///
/// Returned when the descriptor is out of range or its slot has been closed.
/// This error is terminal for the operation: the blocking forms propagate it
/// to the caller unchanged instead of parking.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Error)]
#[error("no such channel")]
pub struct NoChannelError;

/// Error for a try-form that cannot make progress without suspending
///
/// A full channel for senders, an empty channel for receivers, or any full
/// open channel for a broadcast. The blocking forms consume this case by
/// parking in the matching waiter queue instead of returning it.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Error)]
#[error("operation would block")]
pub struct WouldBlockError;

// ==== compound error type ====

/// Error for the non-suspending (`try_`) forms of bus operations
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Error)]
pub enum TryError {
    /// The descriptor does not name an open channel
    #[error(transparent)]
    NoChannel(#[from] NoChannelError),
    /// The operation could not be resolved immediately
    #[error(transparent)]
    WouldBlock(#[from] WouldBlockError),
}

impl TryError {
    /// Whether this is the `WouldBlock` case, i.e. retrying later may succeed
    pub fn is_would_block(self) -> bool {
        matches!(self, TryError::WouldBlock(_))
    }
}

// ==== last-error slot ====

/// Code mirror of the error taxonomy, kept in the thread-local last-error slot
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ErrorCode {
    /// No error recorded; meaningless after a successful operation
    #[default]
    None,
    /// Descriptor out of range or slot empty
    NoChannel,
    /// Try-form could not make progress
    WouldBlock,
    /// Reserved for conditions not otherwise specified; never produced by the
    /// bus itself, but accepted by [`set_last_error`]
    NotImplemented,
}

impl From<NoChannelError> for ErrorCode {
    fn from(_: NoChannelError) -> Self {
        ErrorCode::NoChannel
    }
}

impl From<WouldBlockError> for ErrorCode {
    fn from(_: WouldBlockError) -> Self {
        ErrorCode::WouldBlock
    }
}

impl From<TryError> for ErrorCode {
    fn from(e: TryError) -> Self {
        match e {
            TryError::NoChannel(e) => e.into(),
            TryError::WouldBlock(e) => e.into(),
        }
    }
}

thread_local! {
    static LAST_ERROR: Cell<ErrorCode> = const { Cell::new(ErrorCode::None) };
}

/// Read the error code recorded by the most recent failing bus operation on
/// this thread
///
/// Only meaningful immediately after an operation returned `Err`; the next
/// failing operation overwrites it, and a successful operation leaves it
/// untouched.
pub fn last_error() -> ErrorCode {
    LAST_ERROR.get()
}

/// Overwrite the last-error slot on this thread
pub fn set_last_error(code: ErrorCode) {
    LAST_ERROR.set(code);
}

/// record the error in the last-error slot and hand it back, so failing
/// try-forms report through both channels with one expression
pub(crate) fn fail<E: Into<ErrorCode> + Copy>(err: E) -> E {
    set_last_error(err.into());
    err
}
