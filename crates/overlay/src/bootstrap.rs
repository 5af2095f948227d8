//! Overlay bootstrap, driven from the hooked device-initialization call.
//!
//! The host's one-shot device/window setup is the earliest moment the
//! graphics objects exist, so the overlay builds itself right after it
//! returns. Exactly one caller wins the [`Readiness`] claim; a failed
//! bootstrap logs and leaves the overlay permanently disabled while the
//! host keeps running untouched.
//!
//! [`Readiness`]: crate::runtime::Readiness

use core::ffi::c_void;
use core::ptr::NonNull;

use anyhow::Context as _;
use runehud_hook::{AddressResolver, CallsiteHook, HookError, Trampoline};
use tracing::{error, info};
use windows::{
    Win32::Graphics::{
        Direct3D11::{ID3D11Device, ID3D11DeviceContext},
        Dxgi::IDXGISwapChain,
    },
    core::Interface,
};

use crate::font::FontSelection;
use crate::gui::OverlayGui;
use crate::host::{HookTargets, collaborators};
use crate::present;
use crate::runtime::{OverlayRuntime, runtime};
use crate::wndproc;

static DEVICE_INIT_HOOK: CallsiteHook<unsafe extern "C" fn()> = CallsiteHook::new();

/// Patch both call sites. Called once from [`crate::install`] after the
/// collaborators are in place, before the host can reach either site.
#[tracing::instrument(skip(resolver))]
pub(crate) unsafe fn install_hooks(
    resolver: &dyn AddressResolver,
    targets: HookTargets,
) -> Result<(), HookError> {
    let hint = resolver
        .resolve(targets.device_init.id)
        .ok_or(HookError::UnresolvedTarget(targets.device_init.id))?;
    let mut trampoline = Trampoline::allocate_near(hint + targets.device_init.offset, 2)?;

    // Present first: a patched present site is inert until readiness is
    // published, so a failure on the second install leaves no live overlay.
    unsafe {
        present::install(resolver, targets.present, &mut trampoline)?;
        DEVICE_INIT_HOOK.install(resolver, targets.device_init, device_init_thunk, &mut trampoline)?;
    }
    info!("render hooks installed");
    Ok(())
}

unsafe extern "C" fn device_init_thunk() {
    // Host first: the device and window do not exist until it runs.
    unsafe { DEVICE_INIT_HOOK.original()() };

    let rt = runtime();
    if !rt.readiness().begin_init() {
        return;
    }

    match bootstrap(rt) {
        Ok(()) => {
            rt.readiness().mark_ready();
            info!("overlay ready");
        }
        Err(err) => {
            // No retry. The overlay stays dark; the host is unaffected.
            error!(
                err = format!("{err:#}").as_str(),
                "overlay bootstrap failed, overlay disabled"
            );
        }
    }
}

fn bootstrap(rt: &OverlayRuntime) -> anyhow::Result<()> {
    let collab = collaborators().context("overlay collaborators not installed")?;

    let device: ID3D11Device = unsafe {
        borrow_interface(collab.renderer.device().context("host exposed no d3d11 device")?)
    };
    let context: ID3D11DeviceContext = unsafe {
        borrow_interface(
            collab
                .renderer
                .context()
                .context("host exposed no device context")?,
        )
    };
    let swapchain: IDXGISwapChain = unsafe {
        borrow_interface(collab.renderer.swapchain().context("host exposed no swap chain")?)
    };

    let desc = unsafe { swapchain.GetDesc() }.context("swap chain description unavailable")?;

    let font = FontSelection::discover(&collab.paths.font_config, &collab.paths.fonts_root);
    let gui = OverlayGui::new(
        device,
        context,
        desc.BufferDesc.Width,
        desc.BufferDesc.Height,
        &font,
    )?;

    // Input interception is best effort; rendering works without it.
    unsafe { wndproc::install(desc.OutputWindow) };

    *rt.gui.lock() = Some(gui);
    Ok(())
}

/// Borrow a COM interface from a raw pointer the host keeps alive, taking
/// our own reference.
unsafe fn borrow_interface<T: Interface + Clone>(ptr: NonNull<c_void>) -> T {
    let raw: *mut c_void = ptr.as_ptr();
    // Non-null by construction; `from_raw_borrowed` only fails on null.
    unsafe { T::from_raw_borrowed(&raw) }.unwrap().clone()
}
