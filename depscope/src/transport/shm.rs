//! Shared memory regions backing the event ring
//!
//! A region is either a named POSIX shared memory object (the usual case:
//! the instrumented program and the consumer are unrelated processes) or an
//! anonymous `MAP_SHARED` mapping for threads of one process and for children
//! created with `fork`.

#![allow(unsafe_code)] // shm_open/mmap/munmap

use std::ffi::CString;
use std::ptr::NonNull;

use log::{debug, warn};

use crate::domain::TransportError;

/// A mapped, readable and writable shared memory region
pub struct SharedRegion {
    ptr: NonNull<u8>,
    len: usize,
    /// Set when this handle created a named object and must unlink it
    owned_name: Option<CString>,
}

// SAFETY: the region is plain shared memory; all concurrent access to it goes
// through the ring's atomics.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Create (or truncate) the named object and map `len` bytes of it.
    ///
    /// The object is unlinked when this handle is dropped.
    ///
    /// # Errors
    /// Returns an error if the name is invalid or any system call fails
    pub fn create(name: &str, len: usize) -> Result<Self, TransportError> {
        let cname = shm_name(name)?;
        // SAFETY: `cname` is a valid NUL-terminated string.
        let fd = unsafe {
            libc::shm_open(cname.as_ptr(), libc::O_CREAT | libc::O_RDWR | libc::O_CLOEXEC, 0o600)
        };
        if fd < 0 {
            return Err(TransportError::ShmCreateFailed {
                name: name.to_string(),
                source: std::io::Error::last_os_error(),
            });
        }

        let sized = libc::off_t::try_from(len).map_err(|_| TransportError::MapFailed {
            len,
            source: std::io::Error::from_raw_os_error(libc::EOVERFLOW),
        });
        // SAFETY: `fd` is the descriptor just opened.
        let truncated = sized.and_then(|off| {
            if unsafe { libc::ftruncate(fd, off) } == 0 {
                Ok(())
            } else {
                Err(TransportError::ShmCreateFailed {
                    name: name.to_string(),
                    source: std::io::Error::last_os_error(),
                })
            }
        });
        let mapped = truncated.and_then(|()| map_fd(fd, len));
        // SAFETY: the mapping (if any) keeps the object alive without the fd.
        unsafe { libc::close(fd) };

        match mapped {
            Ok(ptr) => {
                debug!("Created shared memory {name} ({len} bytes)");
                Ok(Self { ptr, len, owned_name: Some(cname) })
            }
            Err(e) => {
                // SAFETY: `cname` names the object created above.
                unsafe { libc::shm_unlink(cname.as_ptr()) };
                Err(e)
            }
        }
    }

    /// Map an existing named object in full. The object is not unlinked on drop.
    ///
    /// # Errors
    /// Returns an error if the object does not exist or cannot be mapped
    pub fn open(name: &str) -> Result<Self, TransportError> {
        let cname = shm_name(name)?;
        let open_failed = || TransportError::ShmOpenFailed {
            name: name.to_string(),
            source: std::io::Error::last_os_error(),
        };
        // SAFETY: `cname` is a valid NUL-terminated string.
        let fd = unsafe { libc::shm_open(cname.as_ptr(), libc::O_RDWR | libc::O_CLOEXEC, 0) };
        if fd < 0 {
            return Err(open_failed());
        }

        // SAFETY: zeroed `stat` is a valid out-parameter.
        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        // SAFETY: `fd` is open and `st` is writable.
        let mapped = if unsafe { libc::fstat(fd, &mut st) } == 0 {
            usize::try_from(st.st_size)
                .map_err(|_| open_failed())
                .and_then(|len| map_fd(fd, len).map(|ptr| (ptr, len)))
        } else {
            Err(open_failed())
        };
        // SAFETY: the mapping (if any) keeps the object alive without the fd.
        unsafe { libc::close(fd) };

        let (ptr, len) = mapped?;
        debug!("Opened shared memory {name} ({len} bytes)");
        Ok(Self { ptr, len, owned_name: None })
    }

    /// Anonymous shared mapping, visible to threads and forked children
    ///
    /// # Errors
    /// Returns an error if `mmap` fails
    pub fn anonymous(len: usize) -> Result<Self, TransportError> {
        let ptr = map_fd(-1, len)?;
        Ok(Self { ptr, len, owned_name: None })
    }

    #[must_use]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        // SAFETY: `ptr`/`len` describe the mapping created in the constructor.
        if unsafe { libc::munmap(self.ptr.as_ptr().cast(), self.len) } != 0 {
            warn!("munmap of shared region failed: {}", std::io::Error::last_os_error());
        }
        if let Some(name) = &self.owned_name {
            // SAFETY: `name` is the object this handle created.
            unsafe { libc::shm_unlink(name.as_ptr()) };
        }
    }
}

/// POSIX requires a leading '/' and no other '/'
fn shm_name(name: &str) -> Result<CString, TransportError> {
    let valid = name.len() > 1 && name.starts_with('/') && !name[1..].contains('/');
    if !valid {
        return Err(TransportError::InvalidName(name.to_string()));
    }
    CString::new(name).map_err(|_| TransportError::InvalidName(name.to_string()))
}

/// Map `len` bytes of `fd` shared, or anonymous memory when `fd` is -1
fn map_fd(fd: libc::c_int, len: usize) -> Result<NonNull<u8>, TransportError> {
    if len == 0 {
        return Err(TransportError::MapFailed {
            len,
            source: std::io::Error::from_raw_os_error(libc::EINVAL),
        });
    }
    let flags = if fd < 0 { libc::MAP_SHARED | libc::MAP_ANONYMOUS } else { libc::MAP_SHARED };
    // SAFETY: a fresh mapping chosen by the kernel; no existing memory is touched.
    let ptr = unsafe {
        libc::mmap(std::ptr::null_mut(), len, libc::PROT_READ | libc::PROT_WRITE, flags, fd, 0)
    };
    if ptr == libc::MAP_FAILED {
        return Err(TransportError::MapFailed { len, source: std::io::Error::last_os_error() });
    }
    NonNull::new(ptr.cast::<u8>()).ok_or_else(|| TransportError::MapFailed {
        len,
        source: std::io::Error::from_raw_os_error(libc::ENOMEM),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_name(tag: &str) -> String {
        format!("/depscope-test-{tag}-{}", std::process::id())
    }

    #[test]
    fn test_invalid_names() {
        for name in ["", "/", "no-slash", "/a/b"] {
            assert!(
                matches!(SharedRegion::create(name, 4096), Err(TransportError::InvalidName(_))),
                "{name:?} accepted"
            );
        }
    }

    #[test]
    fn test_anonymous_is_zeroed_and_writable() {
        let region = SharedRegion::anonymous(8192).unwrap();
        assert_eq!(region.len(), 8192);
        unsafe {
            assert_eq!(*region.as_ptr().add(100), 0);
            *region.as_ptr().add(100) = 7;
            assert_eq!(*region.as_ptr().add(100), 7);
        }
    }

    #[test]
    fn test_named_create_then_open_share_bytes() {
        let name = unique_name("share");
        let creator = SharedRegion::create(&name, 4096).unwrap();
        let opener = SharedRegion::open(&name).unwrap();
        assert_eq!(opener.len(), 4096);

        unsafe { *creator.as_ptr().add(10) = 42 };
        assert_eq!(unsafe { *opener.as_ptr().add(10) }, 42);
    }

    #[test]
    fn test_creator_unlinks_on_drop() {
        let name = unique_name("unlink");
        drop(SharedRegion::create(&name, 4096).unwrap());
        assert!(matches!(SharedRegion::open(&name), Err(TransportError::ShmOpenFailed { .. })));
    }

    #[test]
    fn test_zero_length_rejected() {
        assert!(matches!(SharedRegion::anonymous(0), Err(TransportError::MapFailed { .. })));
    }
}
