use crate::device::{Kernel, Pass};

/// WGSL sources of the packing kernels, compiled into the binary.
#[derive(Debug, Clone, Copy)]
pub struct KernelBundle {
    pub encoder: &'static str,
    pub decoder: &'static str,
    /// Scaling copy between images of different sizes.
    pub blit: &'static str,
}

/// Entry point of the blit program.
pub const BLIT_ENTRY_POINT: &str = "blit_bilinear";

impl KernelBundle {
    pub const fn builtin() -> Self {
        Self {
            encoder: include_str!("shaders/encode.wgsl"),
            decoder: include_str!("shaders/decode.wgsl"),
            blit: include_str!("shaders/blit.wgsl"),
        }
    }

    pub fn source(&self, kernel: Kernel) -> &'static str {
        match kernel {
            Kernel::Encoder => self.encoder,
            Kernel::Decoder => self.decoder,
        }
    }

    pub fn entry_point(kernel: Kernel, pass: Pass) -> &'static str {
        match (kernel, pass) {
            (Kernel::Encoder, Pass::Opaque) => "encode_opaque",
            (Kernel::Encoder, Pass::Alpha) => "encode_alpha",
            (Kernel::Decoder, Pass::Opaque) => "decode_opaque",
            (Kernel::Decoder, Pass::Alpha) => "decode_alpha",
        }
    }
}

impl Default for KernelBundle {
    fn default() -> Self {
        Self::builtin()
    }
}
