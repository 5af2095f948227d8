//! Process-wide overlay state.
//!
//! A single [`OverlayRuntime`] lives for the whole process. The hook thunks
//! are plain `extern` functions, so they reach it through [`runtime()`];
//! everything else takes it by reference.

use core::sync::atomic::{AtomicU8, Ordering};

use once_cell::sync::OnceCell;

use crate::frame::FrameCallbacks;
use crate::icons::IconCache;

#[cfg(windows)]
use crate::gui::OverlayGui;
#[cfg(windows)]
use core::sync::atomic::{AtomicU64, AtomicUsize};
#[cfg(windows)]
use parking_lot::Mutex;

const UNINITIALIZED: u8 = 0;
const INITIALIZING: u8 = 1;
const READY: u8 = 2;

/// Bootstrap progress, observable from any thread.
///
/// Transitions `Uninitialized -> Initializing -> Ready` at most once per
/// process lifetime. A failed bootstrap stays in `Initializing` forever;
/// there is no retry and no reset.
pub struct Readiness(AtomicU8);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessState {
    Uninitialized,
    Initializing,
    Ready,
}

impl Readiness {
    pub const fn new() -> Self {
        Self(AtomicU8::new(UNINITIALIZED))
    }

    /// Claim the one bootstrap attempt. Returns `false` for every caller
    /// but the first; losers must not run bootstrap again.
    pub fn begin_init(&self) -> bool {
        self.0
            .compare_exchange(
                UNINITIALIZED,
                INITIALIZING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Publish bootstrap completion. Single release-store; everything
    /// written before it is visible to any thread that observes `Ready`.
    pub fn mark_ready(&self) {
        self.0.store(READY, Ordering::Release);
    }

    /// Per-frame gate read.
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::Acquire) == READY
    }

    pub fn state(&self) -> ReadinessState {
        match self.0.load(Ordering::Acquire) {
            UNINITIALIZED => ReadinessState::Uninitialized,
            INITIALIZING => ReadinessState::Initializing,
            _ => ReadinessState::Ready,
        }
    }
}

pub struct OverlayRuntime {
    readiness: Readiness,
    icons: OnceCell<IconCache>,
    pub(crate) callbacks: FrameCallbacks,

    /// GUI context and renderer, live once bootstrap step 3 succeeds.
    #[cfg(windows)]
    pub(crate) gui: Mutex<Option<OverlayGui>>,

    /// Previous window procedure, written once during bootstrap. Zero while
    /// unset or when the swap failed (degraded mode).
    #[cfg(windows)]
    pub(crate) original_wndproc: AtomicUsize,

    /// Latest WM_SIZE client size, `width << 32 | height`, applied on the
    /// next frame. Zero when no resize is pending.
    #[cfg(windows)]
    pub(crate) pending_size: AtomicU64,
}

impl OverlayRuntime {
    pub const fn new() -> Self {
        Self {
            readiness: Readiness::new(),
            icons: OnceCell::new(),
            callbacks: FrameCallbacks::new(),
            #[cfg(windows)]
            gui: Mutex::new(None),
            #[cfg(windows)]
            original_wndproc: AtomicUsize::new(0),
            #[cfg(windows)]
            pending_size: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn readiness(&self) -> &Readiness {
        &self.readiness
    }

    pub fn icons(&self) -> Option<&IconCache> {
        self.icons.get()
    }

    /// Install the icon cache built during the data-loaded phase. The cache
    /// is immutable afterwards; a second install is rejected.
    pub fn set_icons(&self, cache: IconCache) -> Result<(), IconCache> {
        self.icons.set(cache)
    }
}

static RUNTIME: OverlayRuntime = OverlayRuntime::new();

/// The process-wide runtime instance.
pub fn runtime() -> &'static OverlayRuntime {
    &RUNTIME
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_starts_uninitialized() {
        let r = Readiness::new();
        assert_eq!(r.state(), ReadinessState::Uninitialized);
        assert!(!r.is_ready());
    }

    #[test]
    fn begin_init_has_a_single_winner() {
        let r = Readiness::new();
        assert!(r.begin_init());
        assert!(!r.begin_init());
        assert_eq!(r.state(), ReadinessState::Initializing);
        // An aborted bootstrap never becomes ready.
        assert!(!r.is_ready());
    }

    #[test]
    fn ready_only_after_mark() {
        let r = Readiness::new();
        assert!(r.begin_init());
        r.mark_ready();
        assert!(r.is_ready());
        assert_eq!(r.state(), ReadinessState::Ready);
        // Still no second bootstrap once ready.
        assert!(!r.begin_init());
    }

    #[test]
    fn readiness_is_observable_across_threads() {
        use std::sync::Arc;

        let r = Arc::new(Readiness::new());
        assert!(r.begin_init());

        let writer = {
            let r = Arc::clone(&r);
            std::thread::spawn(move || r.mark_ready())
        };
        writer.join().unwrap();
        assert!(r.is_ready());
    }
}
