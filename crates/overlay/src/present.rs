//! Per-frame presentation hook.

use runehud_hook::{AddressResolver, CallsiteHook, HookError, HookSite, Trampoline};
use tracing::error;

use crate::runtime::runtime;

static PRESENT_HOOK: CallsiteHook<unsafe extern "C" fn(u32)> = CallsiteHook::new();

pub(crate) unsafe fn install(
    resolver: &dyn AddressResolver,
    site: HookSite,
    trampoline: &mut Trampoline,
) -> Result<(), HookError> {
    unsafe { PRESENT_HOOK.install(resolver, site, present_thunk, trampoline) }
}

/// Runs on the host's render thread every presented frame.
///
/// The host presents first on every path; the overlay draws over the
/// completed frame, and only once bootstrap has published readiness.
unsafe extern "C" fn present_thunk(p1: u32) {
    unsafe { PRESENT_HOOK.original()(p1) };

    let rt = runtime();
    if !rt.readiness().is_ready() {
        return;
    }

    let mut gui = rt.gui.lock();
    if let Some(active) = gui.as_mut() {
        if let Err(err) = active.render_frame(rt) {
            // A failing renderer would fail every frame; shut the overlay
            // down instead of spamming the log.
            error!(
                err = format!("{err:#}").as_str(),
                "overlay frame render failed, overlay disabled"
            );
            *gui = None;
        }
    }
}
