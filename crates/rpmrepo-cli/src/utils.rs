use std::{
    fmt::Display,
    sync::atomic::{AtomicBool, Ordering},
};

use nu_ansi_term::Color;
use rpmrepo_core::ErrorKind;

pub static COLOR: AtomicBool = AtomicBool::new(true);

/// Everything done, or only terminal per-package outcomes.
pub const EXIT_OK: i32 = 0;
/// Something failed and redelivery is pointless.
pub const EXIT_FAILURE: i32 = 1;
/// `EX_TEMPFAIL`: something failed transiently, redeliver the trigger.
pub const EXIT_TEMPFAIL: i32 = 75;

pub fn set_color(enabled: bool) {
    COLOR.store(enabled, Ordering::Relaxed);
}

pub struct Colored<T: Display>(pub Color, pub T);

impl<T: Display> Display for Colored<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if COLOR.load(Ordering::Relaxed) {
            write!(f, "{}", self.0.prefix())?;
            self.1.fmt(f)?;
            write!(f, "{}", self.0.suffix())
        } else {
            self.1.fmt(f)
        }
    }
}

/// Exit status for a run whose failures have the given kinds.
pub fn exit_code(kinds: impl IntoIterator<Item = ErrorKind>) -> i32 {
    let mut code = EXIT_OK;
    for kind in kinds {
        match kind {
            ErrorKind::Retryable => return EXIT_TEMPFAIL,
            ErrorKind::Terminal | ErrorKind::Fatal => code = EXIT_FAILURE,
        }
    }
    code
}

/// Repository prefix as shown to users; the flat root has no prefix.
pub fn display_prefix(prefix: &str) -> &str {
    if prefix.is_empty() {
        "/"
    } else {
        prefix
    }
}
