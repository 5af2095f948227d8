//! Owned imgui context plus the D3D11 renderer behind it.

use std::fs;
use std::sync::atomic::Ordering;

use anyhow::Context as _;
use imgui::{Context, FontConfig, FontSource};
use tracing::{info, warn};
use windows::Win32::Graphics::Direct3D11::{ID3D11Device, ID3D11DeviceContext};

use crate::font::FontSelection;
use crate::frame::{FrameTimer, frame_delta};
use crate::renderer::dx11::Dx11Renderer;
use crate::runtime::OverlayRuntime;

const FONT_SIZE: f32 = 64.0;

/// Everything needed to draw one overlay frame. Owned by the runtime, used
/// only on the host's render thread, behind a mutex so the window procedure
/// can reach the imgui io state.
pub struct OverlayGui {
    imgui: Context,
    renderer: Dx11Renderer,
    timer: FrameTimer,
    device: ID3D11Device,
    context: ID3D11DeviceContext,
}

impl OverlayGui {
    pub fn new(
        device: ID3D11Device,
        context: ID3D11DeviceContext,
        width: u32,
        height: u32,
        font: &FontSelection,
    ) -> anyhow::Result<Self> {
        let mut imgui = Context::create();
        imgui.set_ini_filename(None);
        imgui.set_log_filename(None);
        imgui.io_mut().display_size = [width as f32, height as f32];

        load_font(&mut imgui, font);

        let renderer = Dx11Renderer::new(&device, imgui.fonts())
            .context("imgui renderer initialization failed")?;
        info!(width, height, "overlay gui initialized");

        Ok(Self {
            imgui,
            renderer,
            timer: FrameTimer::new(),
            device,
            context,
        })
    }

    /// Drop all held keys and queued characters. Called when the host
    /// window loses focus so keys do not stick down across the gap.
    pub fn clear_input(&mut self) {
        use imgui::internal::RawCast;
        let io = self.imgui.io_mut();
        unsafe {
            imgui::sys::ImGuiIO_ClearInputKeys(io.raw_mut());
        }
    }

    /// Draw one overlay frame over the host's already-rendered frame.
    pub fn render_frame(&mut self, runtime: &OverlayRuntime) -> anyhow::Result<()> {
        let Some(delta) = frame_delta(runtime.readiness().is_ready(), &mut self.timer) else {
            return Ok(());
        };

        let packed = runtime.pending_size.swap(0, Ordering::AcqRel);
        if packed != 0 {
            let (width, height) = ((packed >> 32) as u32, packed as u32);
            self.imgui.io_mut().display_size = [width as f32, height as f32];
        }

        // imgui asserts on a zero delta after the first frame.
        self.imgui.io_mut().delta_time = delta.max(1e-6);

        let ui = self.imgui.new_frame();
        runtime.callbacks.run(ui, delta);

        let draw_data = self.imgui.render();
        self.renderer.render(&self.device, &self.context, draw_data)
    }
}

/// Add the configured font to the atlas, or leave the built-in default in
/// place. A font file that fails to read is a warn, never an error.
fn load_font(imgui: &mut Context, font: &FontSelection) {
    let Some(path) = &font.path else {
        return;
    };
    match fs::read(path) {
        Ok(data) => {
            imgui.fonts().add_font(&[FontSource::TtfData {
                data: &data,
                size_pixels: FONT_SIZE,
                config: Some(FontConfig {
                    glyph_ranges: font.range.to_imgui(),
                    ..Default::default()
                }),
            }]);
        }
        Err(err) => {
            warn!(
                path = %path.display(),
                err = err.to_string().as_str(),
                "failed to read overlay font, using built-in font"
            );
        }
    }
}
