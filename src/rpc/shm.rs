/// Status shared memory and change notification.
///
/// The daemon publishes a single versioned status record in a POSIX
/// shared memory segment and posts a named counting semaphore on every
/// state change; clients block on the semaphore and re-read the record.
/// The segment is world-readable, writing is reserved to the daemon.
use crate::{EsdmError, EsdmResult};
use std::ffi::CString;
use std::sync::atomic::{AtomicBool, Ordering};

pub const ESDM_SHM_STATUS_MAGIC: u32 = 1_122_334_455;
pub const SHM_STATUS_VERSION: u32 = 1;
pub const SHM_INFO_LEN: usize = 1024;

pub const SHM_NAME: &str = "esdm";
pub const SEM_NAME: &str = "esdm-shm-status-semaphore";

#[repr(C)]
pub struct StatusShm {
    pub magic: u32,
    pub version: u32,
    pub info: [u8; SHM_INFO_LEN],
    pub infolen: u64,
    pub unpriv_threads: u32,
    pub operational: AtomicBool,
    pub need_entropy: AtomicBool,
}

fn posix_name(base: &str, test_mode: bool) -> CString {
    let name = if test_mode {
        format!("/{base}-testmode")
    } else {
        format!("/{base}")
    };
    CString::new(name).expect("static name contains no NUL")
}

fn last_os_error() -> EsdmError {
    EsdmError::Io(std::io::Error::last_os_error())
}

unsafe fn map_segment(fd: libc::c_int, prot: libc::c_int) -> EsdmResult<*mut StatusShm> {
    let size = std::mem::size_of::<StatusShm>();
    let ptr = libc::mmap(
        std::ptr::null_mut(),
        size,
        prot,
        libc::MAP_SHARED,
        fd,
        0,
    );
    libc::close(fd);
    if ptr == libc::MAP_FAILED {
        return Err(last_os_error());
    }
    Ok(ptr as *mut StatusShm)
}

/// Daemon-side owner of the status segment and semaphore. Unlinks both on
/// drop.
pub struct StatusPublisher {
    shm: *mut StatusShm,
    sem: *mut libc::sem_t,
    shm_name: CString,
    sem_name: CString,
}

// The raw pointers target process-shared memory whose concurrent fields
// are atomics; the info record is guarded by the semaphore protocol.
unsafe impl Send for StatusPublisher {}
unsafe impl Sync for StatusPublisher {}

impl StatusPublisher {
    pub fn create(test_mode: bool, unpriv_threads: u32) -> EsdmResult<Self> {
        let shm_name = posix_name(SHM_NAME, test_mode);
        let sem_name = posix_name(SEM_NAME, test_mode);
        let size = std::mem::size_of::<StatusShm>();

        let shm = unsafe {
            let fd = libc::shm_open(
                shm_name.as_ptr(),
                libc::O_CREAT | libc::O_RDWR,
                0o644 as libc::mode_t,
            );
            if fd < 0 {
                return Err(last_os_error());
            }
            if libc::ftruncate(fd, size as libc::off_t) < 0 {
                let err = last_os_error();
                libc::close(fd);
                return Err(err);
            }
            map_segment(fd, libc::PROT_READ | libc::PROT_WRITE)?
        };

        unsafe {
            std::ptr::write_bytes(shm as *mut u8, 0, size);
            std::ptr::addr_of_mut!((*shm).magic).write(ESDM_SHM_STATUS_MAGIC);
            std::ptr::addr_of_mut!((*shm).version).write(SHM_STATUS_VERSION);
            std::ptr::addr_of_mut!((*shm).unpriv_threads).write(unpriv_threads);
        }

        let sem = unsafe {
            libc::sem_open(
                sem_name.as_ptr(),
                libc::O_CREAT,
                0o644 as libc::mode_t,
                0,
            )
        };
        if sem == libc::SEM_FAILED {
            let err = last_os_error();
            unsafe {
                libc::munmap(shm as *mut libc::c_void, size);
                libc::shm_unlink(shm_name.as_ptr());
            }
            return Err(err);
        }

        tracing::info!(
            shm = shm_name.to_string_lossy().as_ref(),
            sem = sem_name.to_string_lossy().as_ref(),
            "status shared memory created"
        );
        Ok(Self {
            shm,
            sem,
            shm_name,
            sem_name,
        })
    }

    /// Rewrite the status record and post the change semaphore once.
    pub fn publish(&self, info: &str, operational: bool, need_entropy: bool) {
        let bytes = info.as_bytes();
        let len = bytes.len().min(SHM_INFO_LEN);
        unsafe {
            let info_ptr = std::ptr::addr_of_mut!((*self.shm).info) as *mut u8;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), info_ptr, len);
            std::ptr::addr_of_mut!((*self.shm).infolen).write(len as u64);
            (*self.shm).operational.store(operational, Ordering::Release);
            (*self.shm)
                .need_entropy
                .store(need_entropy, Ordering::Release);
            libc::sem_post(self.sem);
        }
    }
}

impl Drop for StatusPublisher {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(
                self.shm as *mut libc::c_void,
                std::mem::size_of::<StatusShm>(),
            );
            libc::shm_unlink(self.shm_name.as_ptr());
            libc::sem_close(self.sem);
            libc::sem_unlink(self.sem_name.as_ptr());
        }
    }
}

/// Client-side read-only attachment.
pub struct StatusReader {
    shm: *const StatusShm,
    sem: *mut libc::sem_t,
}

unsafe impl Send for StatusReader {}

impl StatusReader {
    pub fn attach(test_mode: bool) -> EsdmResult<Self> {
        let shm_name = posix_name(SHM_NAME, test_mode);
        let sem_name = posix_name(SEM_NAME, test_mode);

        let shm = unsafe {
            let fd = libc::shm_open(shm_name.as_ptr(), libc::O_RDONLY, 0);
            if fd < 0 {
                return Err(last_os_error());
            }
            map_segment(fd, libc::PROT_READ)?
        };

        let sem = unsafe { libc::sem_open(sem_name.as_ptr(), 0) };
        if sem == libc::SEM_FAILED {
            let err = last_os_error();
            unsafe {
                libc::munmap(shm as *mut libc::c_void, std::mem::size_of::<StatusShm>());
            }
            return Err(err);
        }

        let reader = Self { shm, sem };
        if unsafe { (*reader.shm).magic } != ESDM_SHM_STATUS_MAGIC {
            return Err(EsdmError::InvalidArgument(
                "status segment carries the wrong magic".into(),
            ));
        }
        Ok(reader)
    }

    pub fn version(&self) -> u32 {
        unsafe { (*self.shm).version }
    }

    pub fn unpriv_threads(&self) -> u32 {
        unsafe { (*self.shm).unpriv_threads }
    }

    pub fn operational(&self) -> bool {
        unsafe { (*self.shm).operational.load(Ordering::Acquire) }
    }

    pub fn need_entropy(&self) -> bool {
        unsafe { (*self.shm).need_entropy.load(Ordering::Acquire) }
    }

    pub fn info(&self) -> String {
        unsafe {
            let len = ((*self.shm).infolen as usize).min(SHM_INFO_LEN);
            let info_ptr = std::ptr::addr_of!((*self.shm).info) as *const u8;
            let slice = std::slice::from_raw_parts(info_ptr, len);
            String::from_utf8_lossy(slice).into_owned()
        }
    }

    /// Consume one pending change signal without blocking.
    pub fn try_take_signal(&self) -> bool {
        unsafe { libc::sem_trywait(self.sem) == 0 }
    }

    /// Block up to `timeout` for the next change signal.
    pub fn wait_signal(&self, timeout: std::time::Duration) -> bool {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        unsafe {
            libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts);
        }
        ts.tv_sec += timeout.as_secs() as libc::time_t;
        ts.tv_nsec += timeout.subsec_nanos() as libc::c_long;
        if ts.tv_nsec >= 1_000_000_000 {
            ts.tv_sec += 1;
            ts.tv_nsec -= 1_000_000_000;
        }
        unsafe { libc::sem_timedwait(self.sem, &ts) == 0 }
    }
}

impl Drop for StatusReader {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(
                self.shm as *mut libc::c_void,
                std::mem::size_of::<StatusShm>(),
            );
            libc::sem_close(self.sem);
        }
    }
}
