use core::{ffi::c_void, mem, ptr, slice};

use anyhow::Context;
use imgui::{DrawCmd, DrawData, DrawIdx, DrawVert, TextureId};
use tracing::trace;
use windows::{
    Win32::{
        Foundation::RECT,
        Graphics::{
            Direct3D::{
                D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST,
                Fxc::{D3DCOMPILE_OPTIMIZATION_LEVEL3, D3DCompile},
            },
            Direct3D11::*,
            Dxgi::Common::{
                DXGI_FORMAT_R8G8B8A8_UNORM, DXGI_FORMAT_R16_UINT, DXGI_FORMAT_R32G32_FLOAT,
                DXGI_SAMPLE_DESC,
            },
        },
    },
    core::{BOOL, Interface, s},
};

/// Dear ImGui draw pipeline, vs_4_0/ps_4_0.
const DRAW_SHADER: &str = r"
cbuffer vertexBuffer : register(b0) {
    float4x4 ProjectionMatrix;
};

struct VS_INPUT {
    float2 pos : POSITION;
    float2 uv  : TEXCOORD0;
    float4 col : COLOR0;
};

struct PS_INPUT {
    float4 pos : SV_POSITION;
    float4 col : COLOR0;
    float2 uv  : TEXCOORD0;
};

PS_INPUT vs_main(VS_INPUT input) {
    PS_INPUT output;
    output.pos = mul(ProjectionMatrix, float4(input.pos.xy, 0.0f, 1.0f));
    output.col = input.col;
    output.uv = input.uv;
    return output;
}

sampler sampler0 : register(s0);
Texture2D texture0 : register(t0);

float4 ps_main(PS_INPUT input) : SV_Target {
    return input.col * texture0.Sample(sampler0, input.uv);
}
";

const INPUT_DESC: [D3D11_INPUT_ELEMENT_DESC; 3] = [
    D3D11_INPUT_ELEMENT_DESC {
        SemanticName: s!("POSITION"),
        SemanticIndex: 0,
        Format: DXGI_FORMAT_R32G32_FLOAT,
        InputSlot: 0,
        AlignedByteOffset: 0,
        InputSlotClass: D3D11_INPUT_PER_VERTEX_DATA,
        InstanceDataStepRate: 0,
    },
    D3D11_INPUT_ELEMENT_DESC {
        SemanticName: s!("TEXCOORD"),
        SemanticIndex: 0,
        Format: DXGI_FORMAT_R32G32_FLOAT,
        InputSlot: 0,
        AlignedByteOffset: 8,
        InputSlotClass: D3D11_INPUT_PER_VERTEX_DATA,
        InstanceDataStepRate: 0,
    },
    D3D11_INPUT_ELEMENT_DESC {
        SemanticName: s!("COLOR"),
        SemanticIndex: 0,
        Format: DXGI_FORMAT_R8G8B8A8_UNORM,
        InputSlot: 0,
        AlignedByteOffset: 16,
        InputSlotClass: D3D11_INPUT_PER_VERTEX_DATA,
        InstanceDataStepRate: 0,
    },
];

struct GrowableBuffer {
    buffer: ID3D11Buffer,
    capacity: usize,
}

/// Renders imgui draw data into whatever render target is bound.
///
/// Texture ids are raw `ID3D11ShaderResourceView` pointers, which is also
/// what the icon cache uploader hands out.
pub struct Dx11Renderer {
    vertex_shader: ID3D11VertexShader,
    pixel_shader: ID3D11PixelShader,
    input_layout: ID3D11InputLayout,
    constant_buffer: ID3D11Buffer,
    blend_state: ID3D11BlendState,
    rasterizer_state: ID3D11RasterizerState,
    depth_stencil_state: ID3D11DepthStencilState,
    sampler: ID3D11SamplerState,
    // Keeps the font atlas texture alive for the renderer's lifetime.
    _font_srv: ID3D11ShaderResourceView,

    vertex_buffer: Option<GrowableBuffer>,
    index_buffer: Option<GrowableBuffer>,
}

impl Dx11Renderer {
    /// Build pipeline state and upload the already-built font atlas,
    /// assigning its texture id.
    pub fn new(device: &ID3D11Device, fonts: &mut imgui::FontAtlas) -> anyhow::Result<Self> {
        unsafe {
            let mut vs_blob = None;
            D3DCompile(
                DRAW_SHADER.as_ptr() as _,
                DRAW_SHADER.len(),
                None,
                None,
                None,
                s!("vs_main"),
                s!("vs_4_0"),
                D3DCOMPILE_OPTIMIZATION_LEVEL3,
                0,
                &mut vs_blob,
                None,
            )?;
            let vs_blob = vs_blob.context("vertex shader failed to build")?;
            let vs_bytes = slice::from_raw_parts::<u8>(
                vs_blob.GetBufferPointer() as _,
                vs_blob.GetBufferSize(),
            );

            let mut ps_blob = None;
            D3DCompile(
                DRAW_SHADER.as_ptr() as _,
                DRAW_SHADER.len(),
                None,
                None,
                None,
                s!("ps_main"),
                s!("ps_4_0"),
                D3DCOMPILE_OPTIMIZATION_LEVEL3,
                0,
                &mut ps_blob,
                None,
            )?;
            let ps_blob = ps_blob.context("pixel shader failed to build")?;
            let ps_bytes = slice::from_raw_parts::<u8>(
                ps_blob.GetBufferPointer() as _,
                ps_blob.GetBufferSize(),
            );

            let mut vertex_shader = None;
            device.CreateVertexShader(vs_bytes, None, Some(&mut vertex_shader))?;
            let mut pixel_shader = None;
            device.CreatePixelShader(ps_bytes, None, Some(&mut pixel_shader))?;

            let mut input_layout = None;
            device.CreateInputLayout(&INPUT_DESC, vs_bytes, Some(&mut input_layout))?;

            let mut constant_buffer = None;
            device.CreateBuffer(
                &D3D11_BUFFER_DESC {
                    ByteWidth: mem::size_of::<[[f32; 4]; 4]>() as u32,
                    Usage: D3D11_USAGE_DYNAMIC,
                    BindFlags: D3D11_BIND_CONSTANT_BUFFER.0 as u32,
                    CPUAccessFlags: D3D11_CPU_ACCESS_WRITE.0 as u32,
                    ..Default::default()
                },
                None,
                Some(&mut constant_buffer),
            )?;

            let mut blend_state = None;
            device.CreateBlendState(
                &D3D11_BLEND_DESC {
                    AlphaToCoverageEnable: BOOL(0),
                    IndependentBlendEnable: BOOL(0),
                    RenderTarget: [D3D11_RENDER_TARGET_BLEND_DESC {
                        BlendEnable: BOOL(1),
                        SrcBlend: D3D11_BLEND_SRC_ALPHA,
                        DestBlend: D3D11_BLEND_INV_SRC_ALPHA,
                        BlendOp: D3D11_BLEND_OP_ADD,
                        SrcBlendAlpha: D3D11_BLEND_ONE,
                        DestBlendAlpha: D3D11_BLEND_INV_SRC_ALPHA,
                        BlendOpAlpha: D3D11_BLEND_OP_ADD,
                        RenderTargetWriteMask: D3D11_COLOR_WRITE_ENABLE_ALL.0 as u8,
                    }; 8],
                },
                Some(&mut blend_state),
            )?;

            let mut rasterizer_state = None;
            device.CreateRasterizerState(
                &D3D11_RASTERIZER_DESC {
                    FillMode: D3D11_FILL_SOLID,
                    CullMode: D3D11_CULL_NONE,
                    ScissorEnable: BOOL(1),
                    DepthClipEnable: BOOL(1),
                    ..Default::default()
                },
                Some(&mut rasterizer_state),
            )?;

            let mut depth_stencil_state = None;
            device.CreateDepthStencilState(
                &D3D11_DEPTH_STENCIL_DESC {
                    DepthEnable: BOOL(0),
                    DepthWriteMask: D3D11_DEPTH_WRITE_MASK_ALL,
                    DepthFunc: D3D11_COMPARISON_ALWAYS,
                    StencilEnable: BOOL(0),
                    ..Default::default()
                },
                Some(&mut depth_stencil_state),
            )?;

            let mut sampler = None;
            device.CreateSamplerState(
                &D3D11_SAMPLER_DESC {
                    Filter: D3D11_FILTER_MIN_MAG_MIP_LINEAR,
                    AddressU: D3D11_TEXTURE_ADDRESS_WRAP,
                    AddressV: D3D11_TEXTURE_ADDRESS_WRAP,
                    AddressW: D3D11_TEXTURE_ADDRESS_WRAP,
                    ComparisonFunc: D3D11_COMPARISON_ALWAYS,
                    ..Default::default()
                },
                Some(&mut sampler),
            )?;

            let atlas = fonts.build_rgba32_texture();
            let font_srv = upload_texture(device, atlas.width, atlas.height, atlas.data)
                .context("font atlas upload failed")?;
            fonts.tex_id = TextureId::from(font_srv.as_raw() as usize);

            Ok(Self {
                vertex_shader: vertex_shader.context("failed to create vertex shader")?,
                pixel_shader: pixel_shader.context("failed to create pixel shader")?,
                input_layout: input_layout.context("failed to create input layout")?,
                constant_buffer: constant_buffer.context("failed to create constant buffer")?,
                blend_state: blend_state.context("failed to create blend state")?,
                rasterizer_state: rasterizer_state.context("failed to create rasterizer state")?,
                depth_stencil_state: depth_stencil_state
                    .context("failed to create depth stencil state")?,
                sampler: sampler.context("failed to create sampler")?,
                _font_srv: font_srv,
                vertex_buffer: None,
                index_buffer: None,
            })
        }
    }

    pub fn render(
        &mut self,
        device: &ID3D11Device,
        cx: &ID3D11DeviceContext,
        draw_data: &DrawData,
    ) -> anyhow::Result<()> {
        if draw_data.total_vtx_count == 0 || draw_data.display_size[0] <= 0.0 {
            return Ok(());
        }

        let vertex_buffer = ensure_capacity(
            device,
            &mut self.vertex_buffer,
            draw_data.total_vtx_count as usize,
            mem::size_of::<DrawVert>(),
            D3D11_BIND_VERTEX_BUFFER,
        )?;
        let index_buffer = ensure_capacity(
            device,
            &mut self.index_buffer,
            draw_data.total_idx_count as usize,
            mem::size_of::<DrawIdx>(),
            D3D11_BIND_INDEX_BUFFER,
        )?;

        unsafe {
            // Upload all draw lists back to back.
            let mut vtx_map = D3D11_MAPPED_SUBRESOURCE::default();
            cx.Map(&vertex_buffer, 0, D3D11_MAP_WRITE_DISCARD, 0, Some(&mut vtx_map))?;
            let mut idx_map = D3D11_MAPPED_SUBRESOURCE::default();
            cx.Map(&index_buffer, 0, D3D11_MAP_WRITE_DISCARD, 0, Some(&mut idx_map))?;

            let mut vtx_dst = vtx_map.pData as *mut DrawVert;
            let mut idx_dst = idx_map.pData as *mut DrawIdx;
            for draw_list in draw_data.draw_lists() {
                let vtx = draw_list.vtx_buffer();
                let idx = draw_list.idx_buffer();
                ptr::copy_nonoverlapping(vtx.as_ptr(), vtx_dst, vtx.len());
                ptr::copy_nonoverlapping(idx.as_ptr(), idx_dst, idx.len());
                vtx_dst = vtx_dst.add(vtx.len());
                idx_dst = idx_dst.add(idx.len());
            }

            cx.Unmap(&index_buffer, 0);
            cx.Unmap(&vertex_buffer, 0);

            let mut cb_map = D3D11_MAPPED_SUBRESOURCE::default();
            cx.Map(
                &self.constant_buffer,
                0,
                D3D11_MAP_WRITE_DISCARD,
                0,
                Some(&mut cb_map),
            )?;
            (cb_map.pData as *mut [[f32; 4]; 4]).write(ortho_projection(draw_data));
            cx.Unmap(&self.constant_buffer, 0);

            self.setup_render_state(cx, draw_data, &vertex_buffer, &index_buffer);

            let mut global_vtx_offset = 0i32;
            let mut global_idx_offset = 0u32;
            let clip_off = draw_data.display_pos;
            for draw_list in draw_data.draw_lists() {
                for cmd in draw_list.commands() {
                    match cmd {
                        DrawCmd::Elements { count, cmd_params } => {
                            let [cx0, cy0, cx1, cy1] = cmd_params.clip_rect;
                            let scissor = RECT {
                                left: (cx0 - clip_off[0]) as i32,
                                top: (cy0 - clip_off[1]) as i32,
                                right: (cx1 - clip_off[0]) as i32,
                                bottom: (cy1 - clip_off[1]) as i32,
                            };
                            if scissor.right <= scissor.left || scissor.bottom <= scissor.top {
                                continue;
                            }
                            cx.RSSetScissorRects(Some(&[scissor]));

                            bind_texture(cx, cmd_params.texture_id);
                            cx.DrawIndexed(
                                count as u32,
                                global_idx_offset + cmd_params.idx_offset as u32,
                                global_vtx_offset + cmd_params.vtx_offset as i32,
                            );
                        }
                        DrawCmd::ResetRenderState => {
                            self.setup_render_state(cx, draw_data, &vertex_buffer, &index_buffer);
                        }
                        DrawCmd::RawCallback { .. } => {
                            trace!("ignoring raw imgui draw callback");
                        }
                    }
                }
                global_idx_offset += draw_list.idx_buffer().len() as u32;
                global_vtx_offset += draw_list.vtx_buffer().len() as i32;
            }
        }

        Ok(())
    }

    unsafe fn setup_render_state(
        &self,
        cx: &ID3D11DeviceContext,
        draw_data: &DrawData,
        vertex_buffer: &ID3D11Buffer,
        index_buffer: &ID3D11Buffer,
    ) {
        unsafe {
            cx.RSSetViewports(Some(&[D3D11_VIEWPORT {
                TopLeftX: 0.0,
                TopLeftY: 0.0,
                Width: draw_data.display_size[0],
                Height: draw_data.display_size[1],
                MinDepth: 0.0,
                MaxDepth: 1.0,
            }]));

            cx.IASetInputLayout(&self.input_layout);
            cx.IASetVertexBuffers(
                0,
                1,
                Some(&Some(vertex_buffer.clone())),
                Some(&(mem::size_of::<DrawVert>() as u32)),
                Some(&0),
            );
            cx.IASetIndexBuffer(index_buffer, DXGI_FORMAT_R16_UINT, 0);
            cx.IASetPrimitiveTopology(D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST);
            cx.VSSetShader(&self.vertex_shader, None);
            cx.VSSetConstantBuffers(0, Some(&[Some(self.constant_buffer.clone())]));
            cx.PSSetShader(&self.pixel_shader, None);
            cx.PSSetSamplers(0, Some(&[Some(self.sampler.clone())]));
            cx.OMSetBlendState(&self.blend_state, Some(&[0.0; 4]), u32::MAX);
            cx.OMSetDepthStencilState(&self.depth_stencil_state, 0);
            cx.RSSetState(&self.rasterizer_state);
        }
    }
}

fn ortho_projection(draw_data: &DrawData) -> [[f32; 4]; 4] {
    let l = draw_data.display_pos[0];
    let r = draw_data.display_pos[0] + draw_data.display_size[0];
    let t = draw_data.display_pos[1];
    let b = draw_data.display_pos[1] + draw_data.display_size[1];
    [
        [2.0 / (r - l), 0.0, 0.0, 0.0],
        [0.0, 2.0 / (t - b), 0.0, 0.0],
        [0.0, 0.0, 0.5, 0.0],
        [(r + l) / (l - r), (t + b) / (b - t), 0.5, 1.0],
    ]
}

unsafe fn bind_texture(cx: &ID3D11DeviceContext, texture_id: TextureId) {
    let ptr = texture_id.id() as *mut c_void;
    let srv = unsafe { ID3D11ShaderResourceView::from_raw_borrowed(&ptr) };
    unsafe {
        cx.PSSetShaderResources(0, Some(&[srv.cloned()]));
    }
}

fn ensure_capacity(
    device: &ID3D11Device,
    slot: &mut Option<GrowableBuffer>,
    needed: usize,
    stride: usize,
    bind: D3D11_BIND_FLAG,
) -> anyhow::Result<ID3D11Buffer> {
    const GROW: usize = 4096;

    if let Some(existing) = slot {
        if existing.capacity >= needed {
            return Ok(existing.buffer.clone());
        }
    }

    let capacity = needed + GROW;
    let mut buffer = None;
    unsafe {
        device.CreateBuffer(
            &D3D11_BUFFER_DESC {
                ByteWidth: (capacity * stride) as u32,
                Usage: D3D11_USAGE_DYNAMIC,
                BindFlags: bind.0 as u32,
                CPUAccessFlags: D3D11_CPU_ACCESS_WRITE.0 as u32,
                ..Default::default()
            },
            None,
            Some(&mut buffer),
        )?;
    }
    let buffer = buffer.context("failed to create imgui draw buffer")?;
    *slot = Some(GrowableBuffer {
        buffer: buffer.clone(),
        capacity,
    });
    Ok(buffer)
}

/// Upload a straight-alpha RGBA8 buffer as an immutable texture and return
/// its shader-resource view.
pub(crate) fn upload_texture(
    device: &ID3D11Device,
    width: u32,
    height: u32,
    rgba: &[u8],
) -> anyhow::Result<ID3D11ShaderResourceView> {
    anyhow::ensure!(
        rgba.len() as u32 == width * height * 4,
        "rgba buffer size mismatch"
    );

    unsafe {
        let mut texture = None;
        device.CreateTexture2D(
            &D3D11_TEXTURE2D_DESC {
                Width: width,
                Height: height,
                MipLevels: 1,
                ArraySize: 1,
                Format: DXGI_FORMAT_R8G8B8A8_UNORM,
                SampleDesc: DXGI_SAMPLE_DESC {
                    Count: 1,
                    Quality: 0,
                },
                Usage: D3D11_USAGE_IMMUTABLE,
                BindFlags: D3D11_BIND_SHADER_RESOURCE.0 as u32,
                ..Default::default()
            },
            Some(&D3D11_SUBRESOURCE_DATA {
                pSysMem: rgba.as_ptr() as *const c_void,
                SysMemPitch: width * 4,
                SysMemSlicePitch: 0,
            }),
            Some(&mut texture),
        )?;
        let texture = texture.context("failed to create icon texture")?;

        let mut srv = None;
        device.CreateShaderResourceView(&texture, None, Some(&mut srv))?;
        srv.context("failed to create shader resource view")
    }
}
