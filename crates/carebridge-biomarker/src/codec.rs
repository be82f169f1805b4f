//! G.711 μ-law.

const BIAS: i32 = 0x84;
const CLIP: i32 = 32_635;

/// Decodes μ-law bytes to samples in `[-1, 1]`.
pub fn decode_mulaw(bytes: &[u8]) -> Vec<f32> {
    bytes
        .iter()
        .map(|&byte| f32::from(decode_sample(byte)) / 32_768.0)
        .collect()
}

/// Decodes one μ-law byte to a 16-bit linear sample.
pub fn decode_sample(byte: u8) -> i16 {
    let byte = !byte;
    let exponent = (byte >> 4) & 0x07;
    let mantissa = i32::from(byte & 0x0F);
    let magnitude = (((mantissa << 3) + BIAS) << exponent) - BIAS;
    let sample = if byte & 0x80 != 0 { -magnitude } else { magnitude };
    sample as i16
}

/// Encodes one 16-bit linear sample as μ-law.
pub fn encode_sample(sample: i16) -> u8 {
    let mut magnitude = i32::from(sample);
    let sign = if magnitude < 0 {
        magnitude = -magnitude;
        0x80
    } else {
        0x00
    };
    magnitude = magnitude.min(CLIP) + BIAS;

    let mut exponent = 7;
    let mut mask = 0x4000;
    while exponent > 0 && magnitude & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = (magnitude >> (exponent + 3)) & 0x0F;
    !(sign | (exponent << 4) as u8 | mantissa as u8)
}
