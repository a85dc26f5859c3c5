//! BT.709 limited-range packing math on the CPU.
//!
//! Mirrors `shaders/encode.wgsl` and `shaders/decode.wgsl`. A UYVY element
//! holds two horizontal pixels as `U | Y0 << 8 | V << 16 | Y1 << 24`; the
//! UYVA layout appends a plane of one alpha byte per pixel, four pixels per
//! element, starting at element `width * height / 2`.

use rayon::prelude::*;
use vidlink_core::FrameBuffer;

const KR: f32 = 0.2126;
const KB: f32 = 0.0722;
const KG: f32 = 1.0 - KR - KB;
/// 2 * (1 - KB)
const PB_SCALE: f32 = 1.8556;
/// 2 * (1 - KR)
const PR_SCALE: f32 = 1.5748;

fn to_byte(v: f32) -> u32 {
    v.round().clamp(0.0, 255.0) as u32
}

fn linear_to_srgb(c: f32) -> f32 {
    if c <= 0.003_130_8 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

fn load(px: &[u8], linear: bool) -> [f32; 3] {
    let mut rgb = [
        px[0] as f32 / 255.0,
        px[1] as f32 / 255.0,
        px[2] as f32 / 255.0,
    ];
    if linear {
        for c in &mut rgb {
            *c = linear_to_srgb(*c);
        }
    }
    rgb
}

fn luma(rgb: [f32; 3]) -> f32 {
    KR * rgb[0] + KG * rgb[1] + KB * rgb[2]
}

/// Pack two RGBA pixels into one UYVY element.
pub fn pack_pair(p0: &[u8], p1: &[u8], linear: bool) -> u32 {
    let c0 = load(p0, linear);
    let c1 = load(p1, linear);
    let y0 = luma(c0);
    let y1 = luma(c1);
    let ya = (y0 + y1) * 0.5;
    let pb = ((c0[2] + c1[2]) * 0.5 - ya) / PB_SCALE;
    let pr = ((c0[0] + c1[0]) * 0.5 - ya) / PR_SCALE;

    let u = to_byte(128.0 + 224.0 * pb);
    let v = to_byte(128.0 + 224.0 * pr);
    let y0 = to_byte(16.0 + 219.0 * y0);
    let y1 = to_byte(16.0 + 219.0 * y1);
    u | (y0 << 8) | (v << 16) | (y1 << 24)
}

/// Unpack one UYVY element into two RGB triples.
pub fn unpack_pair(element: u32) -> [[u8; 3]; 2] {
    let u = (element & 0xff) as f32;
    let y0 = ((element >> 8) & 0xff) as f32;
    let v = ((element >> 16) & 0xff) as f32;
    let y1 = ((element >> 24) & 0xff) as f32;

    let pb = (u - 128.0) / 224.0;
    let pr = (v - 128.0) / 224.0;
    let rgb = |y: f32| {
        let y = (y - 16.0) / 219.0;
        let r = y + PR_SCALE * pr;
        let g = y - (KB * PB_SCALE / KG) * pb - (KR * PR_SCALE / KG) * pr;
        let b = y + PB_SCALE * pb;
        [to_byte(r * 255.0) as u8, to_byte(g * 255.0) as u8, to_byte(b * 255.0) as u8]
    };
    [rgb(y0), rgb(y1)]
}

/// Encode the top-left `width x height` region of `frame` into `out`.
///
/// `width` must be a multiple of 4 and `out` must hold at least
/// `frame_element_count(width, height, alpha)` elements.
pub fn encode_frame(
    frame: &FrameBuffer,
    width: u32,
    height: u32,
    alpha: bool,
    linear: bool,
    out: &mut [u32],
) {
    let w = width as usize;
    let h = height as usize;
    let src_stride = frame.width as usize * 4;
    let (luma_plane, rest) = out.split_at_mut(w * h / 2);

    luma_plane
        .par_chunks_mut(w / 2)
        .enumerate()
        .for_each(|(y, row)| {
            let src = &frame.data[y * src_stride..y * src_stride + w * 4];
            for (i, element) in row.iter_mut().enumerate() {
                let p = i * 8;
                *element = pack_pair(&src[p..p + 4], &src[p + 4..p + 8], linear);
            }
        });

    if alpha {
        rest[..w * h / 4]
            .par_chunks_mut(w / 4)
            .enumerate()
            .for_each(|(y, row)| {
                let src = &frame.data[y * src_stride..y * src_stride + w * 4];
                for (i, element) in row.iter_mut().enumerate() {
                    let p = i * 16;
                    *element = src[p + 3] as u32
                        | (src[p + 7] as u32) << 8
                        | (src[p + 11] as u32) << 16
                        | (src[p + 15] as u32) << 24;
                }
            });
    }
}

/// Decode packed elements into the top-left `width x height` region of `out`.
pub fn decode_frame(packed: &[u32], width: u32, height: u32, alpha: bool, out: &mut FrameBuffer) {
    let w = width as usize;
    let h = height as usize;
    let dst_stride = out.width as usize * 4;
    let (luma_plane, alpha_plane) = packed.split_at(w * h / 2);

    out.data
        .par_chunks_mut(dst_stride)
        .take(h)
        .enumerate()
        .for_each(|(y, row)| {
            let elements = &luma_plane[y * w / 2..(y + 1) * w / 2];
            for (i, element) in elements.iter().enumerate() {
                let pair = unpack_pair(*element);
                for (k, rgb) in pair.iter().enumerate() {
                    let x = i * 2 + k;
                    let a = if alpha {
                        let word = alpha_plane[(y * w + x) / 4];
                        ((word >> ((x % 4) * 8)) & 0xff) as u8
                    } else {
                        255
                    };
                    row[x * 4..x * 4 + 4].copy_from_slice(&[rgb[0], rgb[1], rgb[2], a]);
                }
            }
        });
}
