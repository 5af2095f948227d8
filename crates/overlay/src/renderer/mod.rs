pub mod dx11;
