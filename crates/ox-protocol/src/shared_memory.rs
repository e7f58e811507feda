//! Cross-platform named shared memory.
//!
//! Backed by POSIX shared-memory objects (`shm_open`, owner-only 0600) on
//! Unix and named file mappings on Windows. The service creates the region;
//! the client only maps an existing one. Regions are zero-initialized on
//! creation by the OS.

#[cfg(unix)]
pub use self::posix::SharedMemory;

#[cfg(windows)]
pub use self::win::SharedMemory;

#[cfg(unix)]
mod posix {
    use std::num::NonZeroUsize;
    use std::os::fd::OwnedFd;
    use std::ptr::NonNull;

    use nix::errno::Errno;
    use nix::fcntl::OFlag;
    use nix::sys::mman::{mmap, munmap, shm_open, shm_unlink, MapFlags, ProtFlags};
    use nix::sys::stat::Mode;
    use nix::unistd::ftruncate;

    use crate::{Error, Result};

    fn shm_name(name: &str) -> String {
        format!("/{name}")
    }

    fn map_errno(err: Errno, name: &str) -> Error {
        match err {
            Errno::ENOENT => Error::RegionMissing(name.to_owned()),
            Errno::EEXIST => Error::RegionExists(name.to_owned()),
            Errno::EACCES | Errno::EPERM => Error::PermissionDenied(name.to_owned()),
            other => Error::MapFailed(other.to_string()),
        }
    }

    /// A mapped named shared-memory region.
    #[derive(Debug)]
    pub struct SharedMemory {
        ptr: NonNull<std::ffi::c_void>,
        len: usize,
    }

    // The mapping is plain memory; all concurrent access goes through
    // atomics in the structures laid on top of it.
    unsafe impl Send for SharedMemory {}
    unsafe impl Sync for SharedMemory {}

    impl SharedMemory {
        /// Create a fresh region. Fails if a region of this name already
        /// exists; callers that own the name should `unlink` first.
        pub fn create(name: &str, len: usize) -> Result<Self> {
            let fd = shm_open(
                shm_name(name).as_str(),
                OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
                Mode::S_IRUSR | Mode::S_IWUSR,
            )
            .map_err(|e| map_errno(e, name))?;

            ftruncate(&fd, len as nix::libc::off_t).map_err(|e| {
                let _ = shm_unlink(shm_name(name).as_str());
                map_errno(e, name)
            })?;

            Self::map_fd(fd, len)
        }

        /// Map an existing region. The caller is responsible for validating
        /// whatever versioning lives inside it.
        pub fn open(name: &str, len: usize) -> Result<Self> {
            let fd = shm_open(
                shm_name(name).as_str(),
                OFlag::O_RDWR,
                Mode::from_bits_truncate(0),
            )
            .map_err(|e| map_errno(e, name))?;
            Self::map_fd(fd, len)
        }

        fn map_fd(fd: OwnedFd, len: usize) -> Result<Self> {
            let length = NonZeroUsize::new(len)
                .ok_or(Error::MapFailed("zero-length region".to_owned()))?;
            let ptr = unsafe {
                mmap(
                    None,
                    length,
                    ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                    MapFlags::MAP_SHARED,
                    &fd,
                    0,
                )
            }
            .map_err(|e| Error::MapFailed(e.to_string()))?;
            // fd can be dropped once the mapping exists
            Ok(Self { ptr, len })
        }

        /// Remove the name so the next `create` starts clean. Missing
        /// regions are not an error.
        pub fn unlink(name: &str) {
            let _ = shm_unlink(shm_name(name).as_str());
        }

        pub fn as_ptr(&self) -> *mut u8 {
            self.ptr.as_ptr().cast()
        }

        pub fn len(&self) -> usize {
            self.len
        }

        pub fn is_empty(&self) -> bool {
            self.len == 0
        }
    }

    impl Drop for SharedMemory {
        fn drop(&mut self) {
            unsafe {
                let _ = munmap(self.ptr, self.len);
            }
        }
    }
}

#[cfg(windows)]
mod win {
    use std::ffi::c_void;
    use std::ptr::NonNull;

    use windows::core::HSTRING;
    use windows::Win32::Foundation::{
        CloseHandle, ERROR_ALREADY_EXISTS, ERROR_FILE_NOT_FOUND, HANDLE, INVALID_HANDLE_VALUE,
    };
    use windows::Win32::System::Memory::{
        CreateFileMappingW, MapViewOfFile, OpenFileMappingW, UnmapViewOfFile, FILE_MAP_ALL_ACCESS,
        MEMORY_MAPPED_VIEW_ADDRESS, PAGE_READWRITE,
    };

    use crate::{Error, Result};

    /// A mapped named file mapping. Mappings live in the session-local
    /// object namespace, which isolates them per logon session.
    #[derive(Debug)]
    pub struct SharedMemory {
        handle: HANDLE,
        view: MEMORY_MAPPED_VIEW_ADDRESS,
        len: usize,
    }

    unsafe impl Send for SharedMemory {}
    unsafe impl Sync for SharedMemory {}

    impl SharedMemory {
        pub fn create(name: &str, len: usize) -> Result<Self> {
            let handle = unsafe {
                CreateFileMappingW(
                    INVALID_HANDLE_VALUE,
                    None,
                    PAGE_READWRITE,
                    (len as u64 >> 32) as u32,
                    len as u32,
                    &HSTRING::from(name),
                )
            }
            .map_err(|e| Error::MapFailed(e.to_string()))?;
            if unsafe { windows::Win32::Foundation::GetLastError() } == ERROR_ALREADY_EXISTS {
                unsafe {
                    let _ = CloseHandle(handle);
                }
                return Err(Error::RegionExists(name.to_owned()));
            }
            Self::map_handle(handle, len)
        }

        pub fn open(name: &str, len: usize) -> Result<Self> {
            let handle =
                unsafe { OpenFileMappingW(FILE_MAP_ALL_ACCESS.0, false, &HSTRING::from(name)) }
                    .map_err(|e| {
                        if e.code() == ERROR_FILE_NOT_FOUND.to_hresult() {
                            Error::RegionMissing(name.to_owned())
                        } else {
                            Error::MapFailed(e.to_string())
                        }
                    })?;
            Self::map_handle(handle, len)
        }

        fn map_handle(handle: HANDLE, len: usize) -> Result<Self> {
            let view = unsafe { MapViewOfFile(handle, FILE_MAP_ALL_ACCESS, 0, 0, len) };
            if view.Value.is_null() {
                unsafe {
                    let _ = CloseHandle(handle);
                }
                return Err(Error::MapFailed("MapViewOfFile failed".to_owned()));
            }
            Ok(Self { handle, view, len })
        }

        /// Windows mappings vanish with their last handle; nothing to do.
        pub fn unlink(_name: &str) {}

        pub fn as_ptr(&self) -> *mut u8 {
            self.view.Value.cast()
        }

        pub fn len(&self) -> usize {
            self.len
        }

        pub fn is_empty(&self) -> bool {
            self.len == 0
        }

        #[allow(dead_code)]
        fn view_ptr(&self) -> NonNull<c_void> {
            NonNull::new(self.view.Value).expect("validated at map time")
        }
    }

    impl Drop for SharedMemory {
        fn drop(&mut self) {
            unsafe {
                let _ = UnmapViewOfFile(self.view);
                let _ = CloseHandle(self.handle);
            }
        }
    }
}
