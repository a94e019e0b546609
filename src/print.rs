//! Console and structured-log macros.
//!
//! `hvprintln!` writes straight to the UART; `hvlog!` additionally records
//! the message in the circular log buffer (`log_service`). Both are no-ops
//! on host test builds, where there is no UART to write to.

#[cfg(all(target_arch = "arm", target_os = "none"))]
#[macro_export]
macro_rules! hvprint {
    ($($arg:tt)*) => ($crate::serial::_print(format_args!($($arg)*)));
}

#[cfg(all(target_arch = "arm", target_os = "none"))]
#[macro_export]
macro_rules! hvprintln {
    () => ($crate::hvprint!("\n"));
    ($($arg:tt)*) => ($crate::hvprint!("{}\n", format_args!($($arg)*)));
}

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
#[macro_export]
macro_rules! hvprint {
    ($($arg:tt)*) => {};
}

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
#[macro_export]
macro_rules! hvprintln {
    ($($arg:tt)*) => {};
}

/// Log at a given severity through the structured log service, and echo the
/// same line to the console.
#[macro_export]
macro_rules! hvlog {
    ($level:expr, $subsystem:expr, $($arg:tt)*) => {{
        $crate::log_service::klog($level, $subsystem, &$crate::hvlog_format!($($arg)*));
        $crate::hvprintln!("[{}] {}", $subsystem, $crate::hvlog_format!($($arg)*));
    }};
}

/// Formats to a small stack buffer so logging never allocates; truncates
/// silently on overflow, matching `log_service`'s own fixed-size entries.
#[macro_export]
macro_rules! hvlog_format {
    ($($arg:tt)*) => {{
        use core::fmt::Write as _;
        let mut buf = $crate::print::FixedBuf::new();
        let _ = write!(buf, $($arg)*);
        buf
    }};
}

/// Stack-allocated formatting target for [`hvlog_format`].
pub struct FixedBuf {
    data: [u8; 96],
    len: usize,
}

impl FixedBuf {
    pub const fn new() -> Self {
        Self {
            data: [0u8; 96],
            len: 0,
        }
    }
}

impl Default for FixedBuf {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Write for FixedBuf {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let remaining = self.data.len() - self.len;
        let n = s.len().min(remaining);
        self.data[self.len..self.len + n].copy_from_slice(&s.as_bytes()[..n]);
        self.len += n;
        Ok(())
    }
}

impl core::ops::Deref for FixedBuf {
    type Target = str;

    fn deref(&self) -> &str {
        core::str::from_utf8(&self.data[..self.len]).unwrap_or("")
    }
}
