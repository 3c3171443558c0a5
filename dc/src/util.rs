use core::fmt;
use spin::Mutex;

/// Sink used when there is no serial console (host tools, unit tests).
static LOG_HOOK: Mutex<Option<fn(fmt::Arguments)>> = Mutex::new(None);

/// Bring up the console backend. No-op off bare metal.
pub fn init_console() {
    #[cfg(all(target_arch = "x86_64", target_os = "none"))]
    crate::serial::init();
}

/// Route log output to `hook` in addition to the serial console.
pub fn set_log_hook(hook: fn(fmt::Arguments)) {
    *LOG_HOOK.lock() = Some(hook);
}

pub fn clear_log_hook() {
    *LOG_HOOK.lock() = None;
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    #[cfg(all(target_arch = "x86_64", target_os = "none"))]
    crate::serial::print(args);

    // Copy the pointer out so the hook may log recursively.
    let hook = *LOG_HOOK.lock();
    if let Some(hook) = hook {
        hook(args);
    }
}

#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => ({
        $crate::util::_print(format_args!($($arg)*));
    });
}

#[macro_export]
macro_rules! kprintln {
    () => ($crate::kprint!("\n"));
    ($fmt:expr) => ($crate::kprint!(concat!($fmt, "\n")));
    ($fmt:expr, $($arg:tt)*) => ($crate::kprint!(concat!($fmt, "\n"), $($arg)*));
}

/// Verbose tracing, compiled in only with the `dc-trace` feature.
#[macro_export]
macro_rules! dc_trace {
    ($($arg:tt)*) => ({
        if cfg!(feature = "dc-trace") {
            $crate::kprintln!($($arg)*);
        }
    });
}

pub use crate::kprintln;
