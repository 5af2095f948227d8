//! runehud: an in-process game overlay.
//!
//! The overlay injects itself between the host's renderer and its swap
//! chain by patching two `call rel32` sites: the one-shot device/window
//! initialization, where the overlay bootstraps, and the per-frame
//! presentation call, where it draws. Icons come from an SVG cache built
//! once after the host's data load, resolved per entity through an exact-id,
//! keyword, then per-category fallback chain.
//!
//! The embedder (the plugin shim loaded into the host process) supplies
//! three collaborators at install time: an address resolver for the hook
//! sites, an accessor for the live graphics objects, and an entity lookup
//! for custom icon filenames. Everything else is internal.
//!
//! ```ignore
//! runehud::install(collaborators, runehud::HookTargets::default())?;
//! // later, once the host reports its data loaded:
//! runehud::on_data_loaded()?;
//! ```

pub mod font;
pub mod frame;
pub mod host;
pub mod icons;
pub mod logging;
pub mod runtime;

#[cfg(windows)]
mod bootstrap;
#[cfg(windows)]
mod gui;
#[cfg(windows)]
mod present;
#[cfg(windows)]
mod renderer;
#[cfg(windows)]
mod wndproc;

pub use font::{FontSelection, GlyphRange};
pub use host::{Collaborators, HookTargets, HostRenderer, ResourcePaths};
pub use icons::{
    EntityProvider, IconAsset, IconDirs, IconQuery, IconType, TextureHandle, TextureUploader,
};
pub use logging::init_file_logging;
pub use runehud_hook as hook;
pub use runtime::ReadinessState;

#[cfg(windows)]
use anyhow::Context as _;
#[cfg(windows)]
use tracing::info;

use crate::runtime::runtime;

/// Install the overlay into the current process.
///
/// Must run before the host reaches its device initialization, typically
/// from the plugin load entry point. The call sites are patched here; all
/// remaining setup happens lazily when the host initializes its device.
///
/// Fails when either call site cannot be patched or when called twice. On
/// failure the overlay never activates: the device-init site is patched
/// last, so the only site that can be left patched is the present one,
/// which forwards and returns while readiness stays unpublished. The host
/// runs as if the overlay were absent.
#[cfg(windows)]
pub fn install(collaborators: Collaborators, targets: HookTargets) -> anyhow::Result<()> {
    if host::set_collaborators(collaborators).is_err() {
        anyhow::bail!("overlay already installed");
    }
    let collab = host::collaborators().expect("collaborators were just installed");

    unsafe { bootstrap::install_hooks(collab.resolver.as_ref(), targets) }
        .context("render hook installation failed")?;
    Ok(())
}

/// Build the icon cache. Called once the host's forms and keywords are
/// queryable, which is after install but independent of device readiness.
///
/// Fails when the built-in icon set is incomplete or the GPU rejects an
/// upload; custom icons are skipped per file, never fatally.
#[cfg(windows)]
pub fn on_data_loaded() -> anyhow::Result<()> {
    use crate::icons::{IconCache, IconDirs, dx11::Dx11Uploader};

    let collab = host::collaborators().context("overlay not installed")?;
    let device = collab
        .renderer
        .device()
        .context("host exposed no d3d11 device")?;

    let device = {
        use windows::{Win32::Graphics::Direct3D11::ID3D11Device, core::Interface};
        let raw = device.as_ptr();
        unsafe { ID3D11Device::from_raw_borrowed(&raw) }.unwrap().clone()
    };

    let dirs = IconDirs {
        builtin: collab.paths.builtin_icons.clone(),
        custom: collab.paths.custom_icons.clone(),
    };
    let cache = IconCache::load(&dirs, collab.entities.as_ref(), &mut Dx11Uploader::new(device))?;
    runtime()
        .set_icons(cache)
        .map_err(|_| anyhow::anyhow!("icon cache already built"))?;
    info!("icon cache ready");
    Ok(())
}

/// Resolve the icon for an entity, or the bare category default. `None`
/// only before [`on_data_loaded`] has completed.
pub fn resolve_icon(ty: IconType, entity: Option<&dyn IconQuery>) -> Option<IconAsset> {
    runtime().icons().map(|cache| cache.resolve(ty, entity))
}

/// Register a per-frame callback, run on the host's render thread with the
/// imgui frame and the measured delta in seconds. Callbacks are permanent.
pub fn register_frame_callback(callback: impl FnMut(&imgui::Ui, f32) + Send + 'static) {
    runtime().callbacks.register(callback);
}

/// Whether bootstrap has completed and frames are being drawn.
pub fn overlay_ready() -> bool {
    runtime().readiness().is_ready()
}
