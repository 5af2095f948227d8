//! Window-procedure interception.
//!
//! The overlay swaps itself in front of the host's window procedure during
//! bootstrap. Every message is forwarded; the overlay only observes focus
//! loss and client resizes.

use core::mem;
use core::sync::atomic::Ordering;

use tracing::{debug, warn};
use windows::Win32::{
    Foundation::{HWND, LPARAM, LRESULT, WPARAM},
    UI::WindowsAndMessaging::{
        CallWindowProcA, DefWindowProcA, GWLP_WNDPROC, SetWindowLongPtrA, WM_KILLFOCUS, WM_SIZE,
        WNDPROC,
    },
};

use crate::runtime::runtime;

/// Replace the window procedure of `hwnd` with the overlay's. Returns
/// `false` when the swap fails; the overlay then runs without input
/// handling but keeps rendering.
pub(crate) unsafe fn install(hwnd: HWND) -> bool {
    let previous =
        unsafe { SetWindowLongPtrA(hwnd, GWLP_WNDPROC, hooked_wnd_proc as usize as isize) };
    if previous == 0 {
        warn!("window procedure swap failed, overlay input disabled");
        return false;
    }
    runtime()
        .original_wndproc
        .store(previous as usize, Ordering::Release);
    debug!(original = format_args!("{previous:#x}"), "window procedure installed");
    true
}

extern "system" fn hooked_wnd_proc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    let rt = runtime();
    match msg {
        WM_KILLFOCUS => {
            // try_lock: the render thread may hold the gui while this
            // message arrives. Skipping the clear is harmless; the next
            // focus loss retries.
            if let Some(mut gui) = rt.gui.try_lock() {
                if let Some(gui) = gui.as_mut() {
                    gui.clear_input();
                }
            }
        }
        WM_SIZE => {
            let width = (lparam.0 as u64) & 0xffff;
            let height = ((lparam.0 as u64) >> 16) & 0xffff;
            if width != 0 && height != 0 {
                rt.pending_size
                    .store(width << 32 | height, Ordering::Release);
            }
        }
        _ => {}
    }

    let original = rt.original_wndproc.load(Ordering::Acquire);
    if original != 0 {
        let original: WNDPROC = unsafe { mem::transmute(original) };
        unsafe { CallWindowProcA(original, hwnd, msg, wparam, lparam) }
    } else {
        unsafe { DefWindowProcA(hwnd, msg, wparam, lparam) }
    }
}
