//! Thread priority for real-time I/O threads.

use log::debug;

/// Raise the calling thread to real-time priority where the OS allows it.
///
/// Failure (e.g. missing privileges) is logged and otherwise ignored.
pub fn raise_thread_priority() {
    #[cfg(windows)]
    unsafe {
        use windows_sys::Win32::System::Threading::{
            GetCurrentThread, SetThreadPriority, THREAD_PRIORITY_TIME_CRITICAL,
        };
        if SetThreadPriority(GetCurrentThread(), THREAD_PRIORITY_TIME_CRITICAL) == 0 {
            debug!(
                "SetThreadPriority failed: {}",
                std::io::Error::last_os_error()
            );
        }
    }

    #[cfg(unix)]
    unsafe {
        if libc::nice(-20) == -1 {
            debug!("nice(-20) failed: {}", std::io::Error::last_os_error());
        }
    }
}
