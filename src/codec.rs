// Copyright (c) 2023 The TQUIC Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Wire encoding of ACK delays.
//!
//! The ACK delay is carried as a 16-bit unsigned float with 11 explicit bits
//! of mantissa and 5 bits of exponent, expressed in microseconds. With an
//! explicit exponent of zero the mantissa is the literal value, so 1
//! microsecond is encoded as 0x0001. With a non-zero explicit exponent an
//! implicit 12th mantissa bit is set and the effective exponent is one less
//! than the explicit one: 0x0800 has an effective mantissa of 4096 and stands
//! for 4096 microseconds. Values beyond the representable range saturate to
//! 0xFFFF.

use bytes::Buf;
use bytes::BufMut;

use crate::error::Error;
use crate::Result;

/// The largest reduced mantissa, including the implicit bit.
const FLOAT16_MANTISSA_MAX: u64 = 0x0FFF;

/// The implicit 12th bit of the mantissa.
const FLOAT16_IMPLICIT_BIT: u64 = 0x0800;

/// The 11 explicit bits of the mantissa.
const FLOAT16_MANTISSA_MASK: u64 = 0x07FF;

/// The largest number of right shifts that is still representable.
const FLOAT16_EXPONENT_MAX: u64 = 30;

/// Encoded value for durations that can not be represented.
pub const FLOAT16_SATURATED: u16 = 0xFFFF;

/// Convert a duration in microseconds to the 16-bit float encoding.
pub fn encode_float16(delta_t: u64) -> u16 {
    let mut exponent = 0_u64;
    let mut mantissa = delta_t;

    while mantissa > FLOAT16_MANTISSA_MAX {
        exponent += 1;
        mantissa >>= 1;
    }

    if exponent > FLOAT16_EXPONENT_MAX {
        FLOAT16_SATURATED
    } else if mantissa & FLOAT16_IMPLICIT_BIT != 0 {
        ((mantissa & FLOAT16_MANTISSA_MASK) | ((exponent + 1) << 11)) as u16
    } else {
        mantissa as u16
    }
}

/// Convert a 16-bit float back to a duration in microseconds.
///
/// The encoding is logarithmic, so for large values the result may be lower
/// than the duration that was encoded, by less than one quantization step.
pub fn decode_float16(v: u16) -> u64 {
    let exponent = (v >> 11) as u32;
    let mut delta_t = v as u64 & FLOAT16_MANTISSA_MASK;

    if exponent != 0 {
        delta_t |= FLOAT16_IMPLICIT_BIT;
        delta_t <<= exponent - 1;
    }
    delta_t
}

/// Return the quantization step of `delta_t`, i.e. the largest possible
/// difference between `delta_t` and `decode_float16(encode_float16(delta_t))`
/// plus one.
pub fn float16_quantum(delta_t: u64) -> u64 {
    let mut step = 1_u64;
    let mut mantissa = delta_t;
    while mantissa > FLOAT16_MANTISSA_MAX {
        mantissa >>= 1;
        step = step.saturating_mul(2);
    }
    step
}

/// Encoder for the ACK delay field.
pub trait Encoder {
    /// Write a duration in microseconds to self as a 16-bit float in
    /// big-endian byte order.
    fn write_float16(&mut self, delta_t: u64) -> Result<usize>;
}

/// Decoder for the ACK delay field.
pub trait Decoder {
    /// Read a 16-bit float in big-endian byte order from self and return the
    /// duration in microseconds.
    fn read_float16(&mut self) -> Result<u64>;
}

impl Encoder for &mut [u8] {
    fn write_float16(&mut self, delta_t: u64) -> Result<usize> {
        if self.remaining_mut() < 2 {
            return Err(Error::BufferTooShort);
        }
        self.put_u16(encode_float16(delta_t));
        Ok(2)
    }
}

impl Decoder for &[u8] {
    fn read_float16(&mut self) -> Result<u64> {
        if self.remaining() < 2 {
            return Err(Error::BufferTooShort);
        }
        Ok(decode_float16(self.get_u16()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Result;

    #[test]
    fn float16_known_values() {
        let data = [
            (0_u64, 0x0000_u16),
            (1, 0x0001),
            (0x07FF, 0x07FF),
            (0x0800, 0x0800),
            (0x0FFF, 0x0FFF),
            (0x1000, 0x1000),
            (0x1FFF, 0x17FF),
            (1_000_000, 0x4F42),
        ];

        for (delta_t, encoded) in data {
            assert_eq!(encode_float16(delta_t), encoded, "encode {:#x}", delta_t);
        }
        assert_eq!(decode_float16(0x0800), 0x0800);
        assert_eq!(decode_float16(0x1000), 4096);
        assert_eq!(decode_float16(0x4F42), 999_936);
    }

    #[test]
    fn float16_round_trip_within_quantum() {
        let data = [0_u64, 1, 0x0800, 0x0FFF, 0x1000, 4096, 1_000_000];

        for delta_t in data {
            let encoded = encode_float16(delta_t);
            assert_ne!(encoded, FLOAT16_SATURATED);

            let decoded = decode_float16(encoded);
            assert!(decoded <= delta_t);
            assert!(delta_t - decoded < float16_quantum(delta_t));
        }
    }

    #[test]
    fn float16_saturation() {
        // 2^42 needs 31 shifts to fit in 12 bits.
        let first_saturated = (FLOAT16_MANTISSA_MAX + 1) << 30;
        assert_eq!(encode_float16(first_saturated), FLOAT16_SATURATED);
        assert_eq!(encode_float16(u64::MAX), FLOAT16_SATURATED);

        // The largest value still representable with 30 shifts.
        let last_exact = FLOAT16_MANTISSA_MAX << 30;
        assert_eq!(encode_float16(last_exact), FLOAT16_SATURATED);
        assert_eq!(decode_float16(FLOAT16_SATURATED), last_exact);

        let below = (FLOAT16_MANTISSA_MAX - 1) << 30;
        assert_ne!(encode_float16(below), FLOAT16_SATURATED);
    }

    #[test]
    fn float16_monotonic() {
        let mut last = 0;
        let mut delta_t = 1_u64;
        while delta_t < 1 << 40 {
            let encoded = encode_float16(delta_t);
            assert!(encoded >= last);
            last = encoded;
            delta_t = delta_t * 3 / 2 + 1;
        }
    }

    #[test]
    fn codec_float16() -> Result<()> {
        let mut buf = [0_u8; 4];

        let mut bw = &mut buf[..];
        assert_eq!(bw.write_float16(25_000)?, 2);
        assert_eq!(bw.write_float16(1)?, 2);
        assert_eq!(buf, [0x24, 0x35, 0x00, 0x01]);

        let mut br = &buf[..];
        assert_eq!(br.read_float16()?, 25_000);
        assert_eq!(br.read_float16()?, 1);
        Ok(())
    }

    #[test]
    fn buffer_too_short() {
        let mut buf = [0xFF; 2];
        let mut br = &buf[0..1];
        assert_eq!(br.read_float16(), Err(Error::BufferTooShort));

        let mut bw = &mut buf[0..1];
        assert_eq!(bw.write_float16(1), Err(Error::BufferTooShort));
    }
}
