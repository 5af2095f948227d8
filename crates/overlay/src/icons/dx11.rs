use windows::{Win32::Graphics::Direct3D11::ID3D11Device, core::Interface};

use super::{TextureHandle, TextureUploader};
use crate::renderer::dx11::upload_texture;

/// Uploads icons as immutable D3D11 textures. Handles are raw
/// shader-resource-view pointers, ready to use as imgui texture ids.
///
/// Views are intentionally leaked: icons live for the whole process.
pub struct Dx11Uploader {
    device: ID3D11Device,
}

impl Dx11Uploader {
    pub fn new(device: ID3D11Device) -> Self {
        Self { device }
    }
}

impl TextureUploader for Dx11Uploader {
    fn upload_rgba(&mut self, width: u32, height: u32, rgba: &[u8]) -> anyhow::Result<TextureHandle> {
        let srv = upload_texture(&self.device, width, height, rgba)?;
        Ok(TextureHandle(srv.into_raw() as usize))
    }
}
