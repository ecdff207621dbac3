//! Callback bridges between the engine's C ABI and Rust streams.
//!
//! Each stream-backed session owns one bridge, allocated once at a fixed address
//! ([`Pinned`]). Its raw pointer is the client token the engine hands back on
//! every callback. Nothing raised by the stream crosses the native frame: errors
//! and panics are parked in the bridge as a [`Failure`] and the callback returns
//! the fatal sentinel. The session raises the parked failure as soon as the
//! engine call returns.

use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::ptr::NonNull;

use libc::c_void;

use crate::engine::status;
use crate::error::Error;

pub(crate) mod reader;
pub(crate) mod writer;

pub(crate) use self::reader::ReadBridge;
pub(crate) use self::writer::WriteBridge;

/// Sentinel handed back to the engine when a data callback fails.
pub(crate) const CALLBACK_FAILED: isize = status::FATAL as isize;

/// Lifecycle of a bridge within one native session.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum BridgeState {
    Unopened,
    Open,
    /// Terminal. Callbacks arriving in this state never touch the stream.
    Closed,
}

/// Something the stream raised while the engine was on the stack.
pub(crate) enum Failure {
    Io(io::Error),
    Panic(Box<dyn Any + Send + 'static>),
}

impl std::fmt::Debug for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Failure::Io(err) => f.debug_tuple("Io").field(err).finish(),
            Failure::Panic(_) => f.write_str("Panic(..)"),
        }
    }
}

impl Failure {
    /// Re-raises the failure on the caller's frame. Panics resume unwinding here.
    pub(crate) fn raise(self) -> Error {
        match self {
            Failure::Io(err) => Error::Io(err),
            Failure::Panic(payload) => panic::resume_unwind(payload),
        }
    }
}

/// Runs stream code, parking any error or panic in `failure`.
pub(crate) fn guard<T>(
    failure: &mut Option<Failure>,
    f: impl FnOnce() -> io::Result<T>,
) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Some(value),
        Ok(Err(err)) => {
            tracing::trace!(error = %err, "stream callback failed");
            // Keep the first failure; later ones are usually fallout from it.
            failure.get_or_insert(Failure::Io(err));
            None
        }
        Err(payload) => {
            tracing::trace!("stream callback panicked");
            failure.get_or_insert(Failure::Panic(payload));
            None
        }
    }
}

/// Retries `f` while it reports `Interrupted`.
#[inline(always)]
pub(crate) fn retry_interrupted<T>(mut f: impl FnMut() -> io::Result<T>) -> io::Result<T> {
    loop {
        match f() {
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            result => return result,
        }
    }
}

/// Operations every bridge offers to the session that owns it.
pub(crate) trait Bridge {
    fn state(&self) -> BridgeState;

    /// Moves the bridge to `Closed` so late callbacks become inert.
    fn detach(&mut self);

    fn take_failure(&mut self) -> Option<Failure>;
}

/// Heap allocation with a stable address for the lifetime of a session.
///
/// The engine keeps the raw pointer between calls, so the value is never moved
/// and is freed only when the `Pinned` itself is dropped during teardown.
pub(crate) struct Pinned<T> {
    ptr: NonNull<T>,
}

// A `Pinned<T>` owns its `T` exactly like a `Box<T>`.
unsafe impl<T: Send> Send for Pinned<T> {}

impl<T> Pinned<T> {
    pub(crate) fn new(value: T) -> Pinned<T> {
        Pinned {
            ptr: NonNull::from(Box::leak(Box::new(value))),
        }
    }

    /// The client token handed to the engine.
    #[inline(always)]
    pub(crate) fn token(&self) -> *mut c_void {
        self.ptr.as_ptr().cast()
    }

    /// # Safety
    /// No engine call that may run a callback on this state can be in progress.
    #[inline(always)]
    pub(crate) unsafe fn get(&self) -> &T {
        self.ptr.as_ref()
    }

    /// # Safety
    /// No engine call that may run a callback on this state can be in progress.
    #[inline(always)]
    pub(crate) unsafe fn get_mut(&mut self) -> &mut T {
        self.ptr.as_mut()
    }

    /// # Safety
    /// The engine must no longer hold the token.
    pub(crate) unsafe fn into_inner(self) -> T {
        let ptr = self.ptr;
        std::mem::forget(self);
        *Box::from_raw(ptr.as_ptr())
    }
}

impl<T> Drop for Pinned<T> {
    fn drop(&mut self) {
        // SAFETY: allocated by `Box::leak` in `new` and never freed elsewhere.
        unsafe { drop(Box::from_raw(self.ptr.as_ptr())) }
    }
}
