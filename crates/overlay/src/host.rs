//! Collaborator seams the embedder fills in.
//!
//! The overlay never talks to the host build directly: addresses come from
//! an [`AddressResolver`], graphics handles from a [`HostRenderer`], and
//! entity lookups from an [`EntityProvider`]. All three are injected once
//! at install time.

use core::ffi::c_void;
use core::ptr::NonNull;
use std::path::PathBuf;

use once_cell::sync::OnceCell;
use runehud_hook::{AddressResolver, HookSite};

use crate::icons::EntityProvider;

/// Accessor for the host's live graphics objects. Queried once, from the
/// hooked device-initialization call; `None` aborts bootstrap.
pub trait HostRenderer: Send + Sync {
    /// Raw `ID3D11Device*`.
    fn device(&self) -> Option<NonNull<c_void>>;
    /// Raw `ID3D11DeviceContext*`.
    fn context(&self) -> Option<NonNull<c_void>>;
    /// Raw `IDXGISwapChain*` of the presentation surface.
    fn swapchain(&self) -> Option<NonNull<c_void>>;
}

/// Call sites to patch, as resolver id plus version-specific offset.
#[derive(Debug, Clone, Copy)]
pub struct HookTargets {
    /// The host's one-shot device/window initialization.
    pub device_init: HookSite,
    /// The host's per-frame presentation call.
    pub present: HookSite,
}

impl Default for HookTargets {
    fn default() -> Self {
        Self {
            device_init: HookSite::new(75_595, 0x9),
            present: HookSite::new(75_461, 0x9),
        }
    }
}

/// Where overlay resources live on disk.
#[derive(Debug, Clone)]
pub struct ResourcePaths {
    pub font_config: PathBuf,
    pub fonts_root: PathBuf,
    pub builtin_icons: PathBuf,
    pub custom_icons: PathBuf,
}

impl Default for ResourcePaths {
    fn default() -> Self {
        let resources: PathBuf = ["Data", "SKSE", "Plugins", "runehud", "resources"]
            .iter()
            .collect();
        Self {
            font_config: resources.join("fonts").join("FontConfig.ini"),
            fonts_root: resources.join("fonts"),
            builtin_icons: resources.join("icons"),
            custom_icons: resources.join("icons_custom"),
        }
    }
}

/// Everything the embedder injects at install time.
pub struct Collaborators {
    pub resolver: Box<dyn AddressResolver>,
    pub renderer: Box<dyn HostRenderer>,
    pub entities: Box<dyn EntityProvider>,
    pub paths: ResourcePaths,
}

static COLLABORATORS: OnceCell<Collaborators> = OnceCell::new();

pub(crate) fn set_collaborators(collaborators: Collaborators) -> Result<(), Collaborators> {
    COLLABORATORS.set(collaborators)
}

pub(crate) fn collaborators() -> Option<&'static Collaborators> {
    COLLABORATORS.get()
}
