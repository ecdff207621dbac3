use std::io::{self, Write};

use libc::{c_int, c_void, size_t};

use super::{guard, retry_interrupted, Bridge, BridgeState, Failure, Pinned, CALLBACK_FAILED};
use crate::engine::{status, Engine, RawArchive};

/// Drains engine output into a [`Write`] sink.
///
/// A write relays exactly what the sink accepted in one call. Retrying a short
/// write is the engine's job.
pub(crate) struct WriteBridge<W> {
    sink: W,
    state: BridgeState,
    failure: Option<Failure>,
    writes: u64,
    bytes: u64,
}

impl<W: Write> WriteBridge<W> {
    pub(crate) fn new(sink: W) -> WriteBridge<W> {
        WriteBridge {
            sink,
            state: BridgeState::Unopened,
            failure: None,
            writes: 0,
            bytes: 0,
        }
    }

    /// Registers the callbacks on `a` and opens it.
    ///
    /// # Safety
    /// `a` must be a live write session, and `pinned` must outlive it.
    pub(crate) unsafe fn install<E: Engine>(pinned: &Pinned<Self>, a: *mut RawArchive) -> c_int {
        E::write_open(
            a,
            pinned.token(),
            Some(open::<W>),
            Some(write::<W>),
            Some(close::<W>),
        )
    }

    pub(crate) fn bytes_written(&self) -> u64 {
        self.bytes
    }

    pub(crate) fn into_sink(self) -> W {
        tracing::debug!(writes = self.writes, bytes = self.bytes, "write bridge retired");
        self.sink
    }
}

impl<W> Bridge for WriteBridge<W> {
    fn state(&self) -> BridgeState {
        self.state
    }

    fn detach(&mut self) {
        self.state = BridgeState::Closed;
    }

    fn take_failure(&mut self) -> Option<Failure> {
        self.failure.take()
    }
}

/// # Safety
/// `token` must be the pointer produced by `Pinned<WriteBridge<W>>::token`.
#[inline(always)]
unsafe fn bridge<'a, W>(token: *mut c_void) -> &'a mut WriteBridge<W> {
    &mut *token.cast::<WriteBridge<W>>()
}

unsafe extern "C" fn open<W: Write>(_a: *mut RawArchive, token: *mut c_void) -> c_int {
    let bridge = bridge::<W>(token);
    if bridge.state == BridgeState::Closed {
        return status::FATAL;
    }
    bridge.state = BridgeState::Open;
    status::OK
}

unsafe extern "C" fn write<W: Write>(
    _a: *mut RawArchive,
    token: *mut c_void,
    buf: *const c_void,
    len: size_t,
) -> isize {
    let bridge = bridge::<W>(token);
    if bridge.state == BridgeState::Closed {
        return CALLBACK_FAILED;
    }
    if len == 0 {
        return 0;
    }

    // Only valid for this call; the sink must not keep it.
    let data = std::slice::from_raw_parts(buf.cast::<u8>(), len);

    let sink = &mut bridge.sink;
    let accepted = guard(&mut bridge.failure, || {
        match retry_interrupted(|| sink.write(data))? {
            0 => Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "sink accepted no bytes",
            )),
            n => Ok(n),
        }
    });

    match accepted {
        Some(n) => {
            bridge.writes += 1;
            bridge.bytes += n as u64;
            tracing::trace!(offered = len, accepted = n, "write callback");
            n as isize
        }
        None => CALLBACK_FAILED,
    }
}

unsafe extern "C" fn close<W: Write>(_a: *mut RawArchive, token: *mut c_void) -> c_int {
    let bridge = bridge::<W>(token);
    if bridge.state == BridgeState::Closed {
        return status::OK;
    }
    bridge.state = BridgeState::Closed;

    let sink = &mut bridge.sink;
    match guard(&mut bridge.failure, || retry_interrupted(|| sink.flush())) {
        Some(()) => status::OK,
        None => status::FATAL,
    }
}
