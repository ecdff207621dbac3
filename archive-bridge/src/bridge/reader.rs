use std::io::SeekFrom;

use libc::{c_int, c_void};

use super::{guard, retry_interrupted, Bridge, BridgeState, Failure, Pinned, CALLBACK_FAILED};
use crate::engine::{status, Engine, RawArchive};
use crate::stream::ByteSource;

/// Feeds the engine from a [`ByteSource`] through one pinned buffer.
pub(crate) struct ReadBridge<S> {
    source: S,
    buffer: Box<[u8]>,
    state: BridgeState,
    failure: Option<Failure>,
    reads: u64,
    bytes: u64,
}

impl<S: ByteSource> ReadBridge<S> {
    pub(crate) fn new(source: S, block_size: usize) -> ReadBridge<S> {
        ReadBridge {
            source,
            buffer: vec![0u8; block_size.max(1)].into_boxed_slice(),
            state: BridgeState::Unopened,
            failure: None,
            reads: 0,
            bytes: 0,
        }
    }

    /// Registers the callbacks on `a` and opens it.
    ///
    /// # Safety
    /// `a` must be a live read session, and `pinned` must outlive it.
    pub(crate) unsafe fn install<E: Engine>(pinned: &Pinned<Self>, a: *mut RawArchive) -> c_int {
        if pinned.get().source.can_seek() {
            let status = E::read_set_seek_callback(a, Some(seek::<S>));
            if status != status::OK {
                return status;
            }
        }

        E::read_open(
            a,
            pinned.token(),
            Some(open::<S>),
            Some(read::<S>),
            Some(close::<S>),
        )
    }

    #[inline(always)]
    pub(crate) fn can_seek(&self) -> bool {
        self.source.can_seek()
    }

    /// Address of the pinned buffer handed to the engine on every read.
    #[allow(dead_code)]
    pub(crate) fn buffer_addr(&self) -> usize {
        self.buffer.as_ptr() as usize
    }

    /// Seeks the source back to its start and readies the bridge for a new
    /// session. The previous session must already be freed.
    pub(crate) fn rewind(&mut self) -> std::io::Result<()> {
        retry_interrupted(|| self.source.rewind_source())?;
        self.state = BridgeState::Unopened;
        self.failure = None;
        tracing::debug!(reads = self.reads, bytes = self.bytes, "read bridge rewound");
        self.reads = 0;
        self.bytes = 0;
        Ok(())
    }

    /// Parks a failure as if a callback had caught it.
    #[cfg(test)]
    pub(crate) fn park_failure(&mut self, failure: Failure) {
        self.failure = Some(failure);
    }

    pub(crate) fn into_source(self) -> S {
        tracing::debug!(reads = self.reads, bytes = self.bytes, "read bridge retired");
        self.source
    }
}

impl<S> Bridge for ReadBridge<S> {
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
/// `token` must be the pointer produced by `Pinned<ReadBridge<S>>::token`.
#[inline(always)]
unsafe fn bridge<'a, S>(token: *mut c_void) -> &'a mut ReadBridge<S> {
    &mut *token.cast::<ReadBridge<S>>()
}

unsafe extern "C" fn open<S: ByteSource>(_a: *mut RawArchive, token: *mut c_void) -> c_int {
    let bridge = bridge::<S>(token);
    if bridge.state == BridgeState::Closed {
        return status::FATAL;
    }
    bridge.state = BridgeState::Open;
    status::OK
}

unsafe extern "C" fn read<S: ByteSource>(
    _a: *mut RawArchive,
    token: *mut c_void,
    out: *mut *const c_void,
) -> isize {
    let bridge = bridge::<S>(token);
    if bridge.state == BridgeState::Closed {
        return CALLBACK_FAILED;
    }

    let source = &mut bridge.source;
    let buffer = &mut bridge.buffer[..];
    let count = match guard(&mut bridge.failure, || retry_interrupted(|| source.read(buffer))) {
        Some(count) => count,
        None => return CALLBACK_FAILED,
    };

    *out = bridge.buffer.as_ptr().cast();
    bridge.reads += 1;
    bridge.bytes += count as u64;
    tracing::trace!(count, total = bridge.bytes, "read callback");
    count as isize
}

unsafe extern "C" fn close<S: ByteSource>(_a: *mut RawArchive, token: *mut c_void) -> c_int {
    bridge::<S>(token).state = BridgeState::Closed;
    status::OK
}

unsafe extern "C" fn seek<S: ByteSource>(
    _a: *mut RawArchive,
    token: *mut c_void,
    offset: i64,
    whence: c_int,
) -> i64 {
    let bridge = bridge::<S>(token);
    if bridge.state == BridgeState::Closed {
        return status::FATAL as i64;
    }

    let pos = match whence {
        libc::SEEK_SET if offset >= 0 => SeekFrom::Start(offset as u64),
        libc::SEEK_CUR => SeekFrom::Current(offset),
        libc::SEEK_END => SeekFrom::End(offset),
        _ => return status::FATAL as i64,
    };

    let source = &mut bridge.source;
    match guard(&mut bridge.failure, || retry_interrupted(|| source.seek_source(pos))) {
        Some(position) => {
            tracing::trace!(?pos, position, "seek callback");
            position as i64
        }
        None => status::FATAL as i64,
    }
}
