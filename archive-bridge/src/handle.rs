use std::marker::PhantomData;
use std::ptr::NonNull;

use libc::c_int;

use crate::engine::{status, Engine, RawArchive};
use crate::error::{self, Error, Result};

/// Direction of a native session.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Mode {
    Read,
    Write,
}

/// Sole owner of one native session handle.
///
/// The handle is freed exactly once: [`SessionHandle::release`] flips an
/// internal flag before calling into the engine, so later calls (including the
/// one from `Drop`) are no-ops.
pub struct SessionHandle<E: Engine> {
    raw: NonNull<RawArchive>,
    mode: Mode,
    released: bool,
    _engine: PhantomData<fn() -> E>,
}

// The engine keeps no thread affinity for a session; it only forbids concurrent use,
// which `&mut self` on every operation already rules out.
unsafe impl<E: Engine> Send for SessionHandle<E> {}

impl<E: Engine> std::fmt::Debug for SessionHandle<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("raw", &self.raw)
            .field("mode", &self.mode)
            .field("released", &self.released)
            .finish()
    }
}

impl<E: Engine> SessionHandle<E> {
    pub fn acquire(mode: Mode) -> Result<SessionHandle<E>> {
        // SAFETY: constructors take no arguments and return null on failure.
        let raw = unsafe {
            match mode {
                Mode::Read => E::read_new(),
                Mode::Write => E::write_new(),
            }
        };

        let raw = NonNull::new(raw).ok_or(Error::HandleCreation)?;
        tracing::debug!(?mode, handle = ?raw, "acquired archive session");

        Ok(SessionHandle {
            raw,
            mode,
            released: false,
            _engine: PhantomData,
        })
    }

    #[inline(always)]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    #[inline(always)]
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// The live native pointer, or [`Error::Released`] once the handle is gone.
    #[inline(always)]
    pub fn raw(&self) -> Result<*mut RawArchive> {
        if self.released {
            return Err(Error::Released);
        }
        Ok(self.raw.as_ptr())
    }

    /// The engine's errno and message for the most recent failure, if any.
    pub fn last_error(&self) -> Option<(c_int, String)> {
        let raw = self.raw().ok()?;
        // SAFETY: `raw` is live until release.
        let (errno, message) = unsafe { error::last_error::<E>(raw) };
        message.map(|message| (errno, message))
    }

    pub(crate) fn protocol_error(&self, status: c_int) -> Error {
        match self.raw() {
            // SAFETY: `raw` is live until release.
            Ok(raw) => unsafe { error::protocol_error::<E>(raw, status) },
            Err(err) => err,
        }
    }

    /// Accepts `OK`, `EOF` and `WARN`; every other status becomes a protocol error.
    pub(crate) fn check(&self, status: c_int) -> Result<c_int> {
        match status {
            status::OK | status::EOF => Ok(status),
            status::WARN => {
                if let Some((errno, message)) = self.last_error() {
                    tracing::warn!(errno, %message, "archive engine warning");
                }
                Ok(status)
            }
            status => Err(self.protocol_error(status)),
        }
    }

    /// Frees the native session. Safe to call any number of times.
    pub fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let raw = self.raw.as_ptr();
        // SAFETY: the flag above guarantees this runs once for a live handle.
        let status = unsafe {
            match self.mode {
                Mode::Read => E::read_free(raw),
                Mode::Write => E::write_free(raw),
            }
        };
        tracing::debug!(mode = ?self.mode, handle = ?self.raw, status, "released archive session");

        if status != status::OK {
            return Err(Error::Protocol {
                status,
                errno: 0,
                message: "engine reported a failure while freeing the session".into(),
            });
        }
        Ok(())
    }
}

impl<E: Engine> Drop for SessionHandle<E> {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            tracing::warn!(error = %err, "failed to release archive session");
        }
    }
}
