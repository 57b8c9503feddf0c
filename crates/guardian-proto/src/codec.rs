//! Spectrogram payload codec: 4-bit quantization + run-length encoding.
//!
//! ## Payload format
//!
//! ```text
//! [0x53 0x50]   magic ('S' 'P')
//! [W] [H]       grid dimensions (32, 32)
//! tokens...
//! ```
//!
//! Pixels are quantized to 4 bits (`v >> 4`) and packed in pairs: the high
//! nibble holds the even pixel, the low nibble the odd pixel. Tokens over
//! the packed pair stream:
//!
//! - `[len, value]` with `1 <= len <= 127`: a run of `len` pairs equal to
//!   `value`.
//! - `0x80 | v`: a single pair whose value is `v` (only possible for
//!   `v < 0x80`; pairs with the top bit set are always emitted as runs,
//!   which keeps the codec lossless for every 4-bit grid).
//!
//! Decoding restores exactly 32*32 pixels, scaling nibbles back to 0..255
//! by x17.

use guardian_types::{Grid, SPEC_HEIGHT, SPEC_SIZE, SPEC_WIDTH};

use crate::{ProtoError, Result};

/// Payload magic bytes.
pub const PAYLOAD_MAGIC: [u8; 2] = [0x53, 0x50];

/// Payload header length: magic + width + height.
pub const PAYLOAD_HEADER_LEN: usize = 4;

/// Packed pair count for a full grid.
const PAIR_COUNT: usize = SPEC_SIZE / 2;

/// Longest representable run.
const MAX_RUN: usize = 127;

/// Minimum run length worth an RLE token for values below 0x80.
const MIN_RUN: usize = 3;

/// Outcome of decoding a payload.
#[derive(Debug)]
pub struct DecodeOutcome {
    pub grid: Grid,
    /// False when the token stream produced more or fewer pairs than the
    /// grid holds; the grid is then truncated or zero-padded to size.
    pub exact: bool,
}

/// Encode a grid into its wire payload.
pub fn encode(grid: &Grid) -> Vec<u8> {
    let pixels = grid.as_slice();

    // Quantize to 4 bits and pack pairs.
    let mut packed = [0u8; PAIR_COUNT];
    for (pair, chunk) in packed.iter_mut().zip(pixels.chunks_exact(2)) {
        let high = chunk[0] >> 4;
        let low = chunk[1] >> 4;
        *pair = (high << 4) | low;
    }

    let mut out = Vec::with_capacity(PAYLOAD_HEADER_LEN + PAIR_COUNT);
    out.push(PAYLOAD_MAGIC[0]);
    out.push(PAYLOAD_MAGIC[1]);
    out.push(SPEC_WIDTH as u8);
    out.push(SPEC_HEIGHT as u8);

    let mut i = 0;
    while i < PAIR_COUNT {
        let value = packed[i];
        let mut run = 1;
        while i + run < PAIR_COUNT && packed[i + run] == value && run < MAX_RUN {
            run += 1;
        }
        if run >= MIN_RUN || value & 0x80 != 0 {
            // A pair with the top bit set cannot be a raw token, so short
            // runs of such values still go out as [len, value].
            out.push(run as u8);
            out.push(value);
            i += run;
        } else {
            out.push(0x80 | value);
            i += 1;
        }
    }
    out
}

/// Decode a wire payload back into a grid.
pub fn decode(payload: &[u8]) -> Result<DecodeOutcome> {
    if payload.len() < PAYLOAD_HEADER_LEN || payload[0..2] != PAYLOAD_MAGIC {
        return Err(ProtoError::BadHeader);
    }
    let width = payload[2];
    let height = payload[3];
    if width as usize != SPEC_WIDTH || height as usize != SPEC_HEIGHT {
        return Err(ProtoError::DimensionMismatch { width, height });
    }

    let mut pairs = Vec::with_capacity(PAIR_COUNT);
    let mut idx = PAYLOAD_HEADER_LEN;
    while idx < payload.len() {
        let byte = payload[idx];
        idx += 1;
        if byte & 0x80 != 0 {
            pairs.push(byte & 0x7F);
        } else {
            if byte == 0 {
                return Err(ProtoError::BadRun(idx - 1));
            }
            if idx >= payload.len() {
                return Err(ProtoError::Truncated("run value"));
            }
            let value = payload[idx];
            idx += 1;
            pairs.extend(std::iter::repeat(value).take(byte as usize));
        }
    }

    let exact = pairs.len() == PAIR_COUNT;
    pairs.resize(PAIR_COUNT, 0);

    let mut grid = Grid::new();
    let out = grid.as_mut_slice();
    for (i, pair) in pairs.iter().enumerate() {
        out[i * 2] = ((pair >> 4) & 0x0F) * 17;
        out[i * 2 + 1] = (pair & 0x0F) * 17;
    }

    Ok(DecodeOutcome { grid, exact })
}

/// Round a full-range pixel value to what survives the 4-bit quantization.
pub fn quantize_pixel(v: u8) -> u8 {
    (v >> 4) * 17
}
