use log::debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// Cooperative shutdown flag polled by the accept loop.
#[derive(Clone, Debug, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

static SIGNAL_FLAG: OnceLock<ShutdownFlag> = OnceLock::new();

extern "C" fn on_signal(_signal: libc::c_int) {
    // Only the atomic store is async-signal-safe here.
    if let Some(flag) = SIGNAL_FLAG.get() {
        flag.request();
    }
}

/// Routes SIGINT and SIGTERM into the given flag. The first flag passed
/// stays registered for the lifetime of the process.
pub fn install(flag: &ShutdownFlag) {
    let _ = SIGNAL_FLAG.set(flag.clone());

    let handler = on_signal as extern "C" fn(libc::c_int);
    unsafe {
        libc::signal(libc::SIGINT, handler as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handler as libc::sighandler_t);
    }
    debug!("Signal handlers installed");
}
