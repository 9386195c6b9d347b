//! # Sequential Read/Write Primitives
//!
//! The field codec surface of the cursor. Every primitive advances the
//! position and is bounds-checked against the record limit; running off the
//! end is a capacity error, never silent truncation.
//!
//! ## Compact Integers
//!
//! Signed compact encodings store a narrower fixed width plus three
//! sentinel values reserved at the low end of the narrow type's range:
//! `MIN` and `MIN + 2` map to the wide type's `MIN`/`MAX`, and `MIN + 1`
//! escapes to the full wide width. The same pattern recurses: `i64`
//! compacts through `i32`, `i32` through `i16`, `i16` through `i8`.
//!
//! Unsigned compact encodings reserve only the top value of the narrow
//! unsigned range as the escape, since unsigned has no two-sided extremes.
//!
//! ## 24/48-bit Integers
//!
//! Stored as byte+short and short+int pairs; decoding reassembles with a
//! final arithmetic right shift to restore the sign, with the configured
//! byte order deciding which part holds the high bits.

use eyre::{ensure, Result, WrapErr};
use smallvec::SmallVec;

use crate::encoding::stopbit::{decode_stop_bit, encode_stop_bit, stop_bit_len};
use crate::encoding::utf8::{parse_utf8_delimited, read_utf8_body, utf8_len, write_utf8_body};
use crate::excerpt::Excerpt;
use crate::log::{ByteOrder, RecordLog};

// Sentinels for the compact signed encodings.
const BYTE_MIN_VALUE: i8 = i8::MIN;
const BYTE_EXTENDED: i8 = i8::MIN + 1;
const BYTE_MAX_VALUE: i8 = i8::MIN + 2;
const UBYTE_EXTENDED: u8 = 0xff;
const SHORT_MIN_VALUE: i16 = i16::MIN;
const SHORT_EXTENDED: i16 = i16::MIN + 1;
const SHORT_MAX_VALUE: i16 = i16::MIN + 2;
const USHORT_EXTENDED: u16 = 0xffff;
const INT_MIN_VALUE: i32 = i32::MIN;
const INT_EXTENDED: i32 = i32::MIN + 1;
const INT_MAX_VALUE: i32 = i32::MIN + 2;

impl Excerpt {
    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let slice = self.read_slice(N)?;
        // INVARIANT: read_slice returned exactly N bytes.
        Ok(slice.try_into().unwrap())
    }

    fn read_array_at<const N: usize>(&self, offset: usize) -> Result<[u8; N]> {
        ensure!(
            offset + N <= self.capacity(),
            "read of {} bytes at offset {} exceeds record capacity {}",
            N,
            offset,
            self.capacity()
        );
        let region = self.region()?;
        let mut bytes = [0u8; N];
        // SAFETY: offset + N <= capacity checked above.
        unsafe {
            std::ptr::copy_nonoverlapping(region.as_ptr().add(offset), bytes.as_mut_ptr(), N)
        };
        Ok(bytes)
    }

    fn write_array_at(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        ensure!(
            offset + bytes.len() <= self.capacity(),
            "write of {} bytes at offset {} exceeds record capacity {}",
            bytes.len(),
            offset,
            self.capacity()
        );
        let region = self.region()?;
        // SAFETY: bounds checked above; single-writer discipline.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), region.as_ptr().add(offset), bytes.len())
        };
        Ok(())
    }

    // ---- fixed width ----

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_slice(1)?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        let bytes = self.read_array::<2>()?;
        Ok(match self.log().byte_order() {
            ByteOrder::Little => i16::from_le_bytes(bytes),
            ByteOrder::Big => i16::from_be_bytes(bytes),
        })
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(self.read_i16()? as u16)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        let bytes = self.read_array::<4>()?;
        Ok(match self.log().byte_order() {
            ByteOrder::Little => i32::from_le_bytes(bytes),
            ByteOrder::Big => i32::from_be_bytes(bytes),
        })
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(self.read_i32()? as u32)
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        let bytes = self.read_array::<8>()?;
        Ok(match self.log().byte_order() {
            ByteOrder::Little => i64::from_le_bytes(bytes),
            ByteOrder::Big => i64::from_be_bytes(bytes),
        })
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_i32()? as u32))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_i64()? as u64))
    }

    pub fn write_u8(&mut self, v: u8) -> Result<()> {
        self.write_slice(&[v])
    }

    pub fn write_i8(&mut self, v: i8) -> Result<()> {
        self.write_u8(v as u8)
    }

    /// Truth is written as all-ones, matching the on-wire convention that
    /// any non-zero byte reads back as true.
    pub fn write_bool(&mut self, v: bool) -> Result<()> {
        self.write_u8(if v { 0xff } else { 0 })
    }

    pub fn write_i16(&mut self, v: i16) -> Result<()> {
        let bytes = match self.log().byte_order() {
            ByteOrder::Little => v.to_le_bytes(),
            ByteOrder::Big => v.to_be_bytes(),
        };
        self.write_slice(&bytes)
    }

    pub fn write_u16(&mut self, v: u16) -> Result<()> {
        self.write_i16(v as i16)
    }

    pub fn write_i32(&mut self, v: i32) -> Result<()> {
        let bytes = match self.log().byte_order() {
            ByteOrder::Little => v.to_le_bytes(),
            ByteOrder::Big => v.to_be_bytes(),
        };
        self.write_slice(&bytes)
    }

    pub fn write_u32(&mut self, v: u32) -> Result<()> {
        self.write_i32(v as i32)
    }

    pub fn write_i64(&mut self, v: i64) -> Result<()> {
        let bytes = match self.log().byte_order() {
            ByteOrder::Little => v.to_le_bytes(),
            ByteOrder::Big => v.to_be_bytes(),
        };
        self.write_slice(&bytes)
    }

    pub fn write_f32(&mut self, v: f32) -> Result<()> {
        self.write_i32(v.to_bits() as i32)
    }

    pub fn write_f64(&mut self, v: f64) -> Result<()> {
        self.write_i64(v.to_bits() as i64)
    }

    // ---- absolute-offset variants ----

    pub fn read_u8_at(&self, offset: usize) -> Result<u8> {
        Ok(self.read_array_at::<1>(offset)?[0])
    }

    pub fn read_i32_at(&self, offset: usize) -> Result<i32> {
        let bytes = self.read_array_at::<4>(offset)?;
        Ok(match self.log().byte_order() {
            ByteOrder::Little => i32::from_le_bytes(bytes),
            ByteOrder::Big => i32::from_be_bytes(bytes),
        })
    }

    pub fn read_i64_at(&self, offset: usize) -> Result<i64> {
        let bytes = self.read_array_at::<8>(offset)?;
        Ok(match self.log().byte_order() {
            ByteOrder::Little => i64::from_le_bytes(bytes),
            ByteOrder::Big => i64::from_be_bytes(bytes),
        })
    }

    pub fn write_u8_at(&mut self, offset: usize, v: u8) -> Result<()> {
        self.write_array_at(offset, &[v])
    }

    pub fn write_i32_at(&mut self, offset: usize, v: i32) -> Result<()> {
        let bytes = match self.log().byte_order() {
            ByteOrder::Little => v.to_le_bytes(),
            ByteOrder::Big => v.to_be_bytes(),
        };
        self.write_array_at(offset, &bytes)
    }

    // ---- bulk bytes ----

    /// Writes `bytes` verbatim at the position.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_slice(bytes)
    }

    /// Fills `buf` from the position; errors if the record has fewer bytes
    /// left.
    pub fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        let slice = self.read_slice(buf.len())?;
        buf.copy_from_slice(slice);
        Ok(())
    }

    // ---- compact integers ----

    pub fn write_compact_i16(&mut self, v: i16) -> Result<()> {
        if v > BYTE_MAX_VALUE as i16 && v <= i8::MAX as i16 {
            self.write_i8(v as i8)
        } else if v == i16::MIN {
            self.write_i8(BYTE_MIN_VALUE)
        } else if v == i16::MAX {
            self.write_i8(BYTE_MAX_VALUE)
        } else {
            self.write_i8(BYTE_EXTENDED)?;
            self.write_i16(v)
        }
    }

    pub fn read_compact_i16(&mut self) -> Result<i16> {
        let b = self.read_i8()?;
        match b {
            BYTE_MIN_VALUE => Ok(i16::MIN),
            BYTE_MAX_VALUE => Ok(i16::MAX),
            BYTE_EXTENDED => self.read_i16(),
            _ => Ok(b as i16),
        }
    }

    pub fn write_compact_u16(&mut self, v: u16) -> Result<()> {
        if v < UBYTE_EXTENDED as u16 {
            self.write_u8(v as u8)
        } else {
            self.write_u8(UBYTE_EXTENDED)?;
            self.write_u16(v)
        }
    }

    pub fn read_compact_u16(&mut self) -> Result<u16> {
        let b = self.read_u8()?;
        if b == UBYTE_EXTENDED {
            self.read_u16()
        } else {
            Ok(b as u16)
        }
    }

    pub fn write_compact_i32(&mut self, v: i32) -> Result<()> {
        if v > SHORT_MAX_VALUE as i32 && v <= i16::MAX as i32 {
            self.write_i16(v as i16)
        } else if v == i32::MIN {
            self.write_i16(SHORT_MIN_VALUE)
        } else if v == i32::MAX {
            self.write_i16(SHORT_MAX_VALUE)
        } else {
            self.write_i16(SHORT_EXTENDED)?;
            self.write_i32(v)
        }
    }

    pub fn read_compact_i32(&mut self) -> Result<i32> {
        let b = self.read_i16()?;
        match b {
            SHORT_MIN_VALUE => Ok(i32::MIN),
            SHORT_MAX_VALUE => Ok(i32::MAX),
            SHORT_EXTENDED => self.read_i32(),
            _ => Ok(b as i32),
        }
    }

    pub fn write_compact_u32(&mut self, v: u32) -> Result<()> {
        if v < USHORT_EXTENDED as u32 {
            self.write_u16(v as u16)
        } else {
            self.write_u16(USHORT_EXTENDED)?;
            self.write_u32(v)
        }
    }

    pub fn read_compact_u32(&mut self) -> Result<u32> {
        let b = self.read_u16()?;
        if b == USHORT_EXTENDED {
            self.read_u32()
        } else {
            Ok(b as u32)
        }
    }

    pub fn write_compact_i64(&mut self, v: i64) -> Result<()> {
        if v > INT_MAX_VALUE as i64 && v <= i32::MAX as i64 {
            self.write_i32(v as i32)
        } else if v == i64::MIN {
            self.write_i32(INT_MIN_VALUE)
        } else if v == i64::MAX {
            self.write_i32(INT_MAX_VALUE)
        } else {
            self.write_i32(INT_EXTENDED)?;
            self.write_i64(v)
        }
    }

    pub fn read_compact_i64(&mut self) -> Result<i64> {
        let b = self.read_i32()?;
        match b {
            INT_MIN_VALUE => Ok(i64::MIN),
            INT_MAX_VALUE => Ok(i64::MAX),
            INT_EXTENDED => self.read_i64(),
            _ => Ok(b as i64),
        }
    }

    /// A double as its `f32` form when that is exact, else an `f32::NAN`
    /// marker followed by the full double.
    pub fn write_compact_f64(&mut self, v: f64) -> Result<()> {
        let f = v as f32;
        if f as f64 == v {
            self.write_f32(f)
        } else {
            self.write_f32(f32::NAN)?;
            self.write_f64(v)
        }
    }

    pub fn read_compact_f64(&mut self) -> Result<f64> {
        let f = self.read_f32()?;
        if f.is_nan() {
            self.read_f64()
        } else {
            Ok(f as f64)
        }
    }

    // ---- 24/48-bit integers ----

    pub fn write_i24(&mut self, v: i32) -> Result<()> {
        match self.log().byte_order() {
            ByteOrder::Big => {
                self.write_u8((v >> 16) as u8)?;
                self.write_u16(v as u16)
            }
            ByteOrder::Little => {
                self.write_u8(v as u8)?;
                self.write_u16((v >> 8) as u16)
            }
        }
    }

    pub fn read_i24(&mut self) -> Result<i32> {
        let b = self.read_u8()? as i32;
        let s = self.read_u16()? as i32;
        Ok(match self.log().byte_order() {
            // The extra shifting restores sign extension.
            ByteOrder::Big => ((b << 24) + (s << 8)) >> 8,
            ByteOrder::Little => ((b << 8) + (s << 16)) >> 8,
        })
    }

    pub fn write_i48(&mut self, v: i64) -> Result<()> {
        match self.log().byte_order() {
            ByteOrder::Big => {
                self.write_u16((v >> 32) as u16)?;
                self.write_u32(v as u32)
            }
            ByteOrder::Little => {
                self.write_u16(v as u16)?;
                self.write_u32((v >> 16) as u32)
            }
        }
    }

    pub fn read_i48(&mut self) -> Result<i64> {
        let s = self.read_u16()? as i64;
        let l = self.read_u32()? as i64;
        Ok(match self.log().byte_order() {
            ByteOrder::Big => ((s << 48) + (l << 16)) >> 16,
            ByteOrder::Little => ((s << 16) + (l << 32)) >> 16,
        })
    }

    // ---- stop-bit ----

    pub fn write_stop_bit(&mut self, v: i64) -> Result<()> {
        let len = stop_bit_len(v);
        ensure!(
            len <= self.remaining(),
            "stop-bit value needs {} bytes, {} remaining",
            len,
            self.remaining()
        );
        {
            let mut buf = self.remaining_slice_mut()?;
            encode_stop_bit(&mut buf, v);
        }
        self.advance(len);
        Ok(())
    }

    pub fn read_stop_bit(&mut self) -> Result<i64> {
        let mut slice = self.remaining_slice()?;
        let before = slice.len();
        let v = decode_stop_bit(&mut slice)?;
        let consumed = before - slice.len();
        self.advance(consumed);
        Ok(v)
    }

    // ---- UTF-8 text ----

    /// Writes a nullable text field: a stop-bit byte length (`-1` encodes
    /// null, distinct from 0 for empty) followed by the modified UTF-8
    /// body.
    pub fn write_utf8(&mut self, s: Option<&str>) -> Result<()> {
        let Some(s) = s else {
            return self.write_stop_bit(-1);
        };
        let utflen = utf8_len(s);
        ensure!(
            stop_bit_len(utflen as i64) + utflen <= self.remaining(),
            "encoded string too long: {} bytes, remaining={}",
            utflen,
            self.remaining()
        );
        self.write_stop_bit(utflen as i64)?;
        {
            let mut buf = self.remaining_slice_mut()?;
            write_utf8_body(&mut buf, s);
        }
        self.advance(utflen);
        Ok(())
    }

    /// Reads a nullable text field; `None` for the null encoding. Use
    /// [`Excerpt::read_utf8_into`] to reuse a caller-side buffer instead.
    pub fn read_utf8(&mut self) -> Result<Option<String>> {
        let mut out = String::new();
        if self.read_utf8_into(&mut out)? {
            Ok(Some(out))
        } else {
            Ok(None)
        }
    }

    /// Reads a nullable text field into `out` without allocating on the
    /// cursor side; returns false (and leaves `out` empty) for null.
    pub fn read_utf8_into(&mut self, out: &mut String) -> Result<bool> {
        out.clear();
        let len = self.read_stop_bit()?;
        if len == -1 {
            return Ok(false);
        }
        ensure!(
            (0..=i32::MAX as i64).contains(&len),
            "utf-8 length invalid: {}",
            len
        );
        let consumed = {
            let data = self.remaining_slice()?;
            read_utf8_body(data, len as usize, out)?
        };
        self.advance(consumed);
        Ok(true)
    }

    /// Reads text until `stop` accepts a character, for separator-delimited
    /// fields with no length prefix. The stop character is consumed. A
    /// partial trailing sequence is left unconsumed so the read can be
    /// retried once more data is available.
    pub fn parse_utf8(&mut self, stop: impl FnMut(char) -> bool) -> Result<String> {
        let mut out = String::new();
        self.parse_utf8_into(&mut out, stop)?;
        Ok(out)
    }

    pub fn parse_utf8_into(
        &mut self,
        out: &mut String,
        stop: impl FnMut(char) -> bool,
    ) -> Result<()> {
        out.clear();
        let (consumed, _stopped) = {
            let data = self.remaining_slice()?;
            parse_utf8_delimited(data, stop, out)?
        };
        self.advance(consumed);
        Ok(())
    }

    /// Skips bytes until `stop` accepts one; false if the record ends
    /// first.
    pub fn skip_to(&mut self, mut stop: impl FnMut(char) -> bool) -> Result<bool> {
        while self.remaining() > 0 {
            let b = self.read_u8()?;
            if stop(b as char) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Backs up one byte (if possible) before skipping, so a separator just
    /// consumed by a parse can be re-tested.
    pub fn step_back_and_skip_to(&mut self, stop: impl FnMut(char) -> bool) -> Result<bool> {
        if self.position() > 0 {
            let back = self.position() - 1;
            self.set_position(back)?;
        }
        self.skip_to(stop)
    }

    // ---- length-prefixed strings ----

    /// Raw bytes behind a 1-byte length prefix; at most 255 bytes.
    pub fn write_byte_string(&mut self, s: &[u8]) -> Result<()> {
        ensure!(s.len() <= 255, "length cannot be {} > 255", s.len());
        self.write_u8(s.len() as u8)?;
        self.write_slice(s)
    }

    pub fn read_byte_string(&mut self) -> Result<Vec<u8>> {
        let len = self.read_u8()? as usize;
        Ok(self.read_slice(len)?.to_vec())
    }

    /// UTF-16 code units behind a 2-byte unit-count prefix; at most 65535
    /// units.
    pub fn write_char_string(&mut self, s: &str) -> Result<()> {
        let units: SmallVec<[u16; 32]> = s.encode_utf16().collect();
        ensure!(
            units.len() <= 65535,
            "length cannot be {} > 65535",
            units.len()
        );
        self.write_u16(units.len() as u16)?;
        for unit in units {
            self.write_u16(unit)?;
        }
        Ok(())
    }

    pub fn read_char_string(&mut self) -> Result<String> {
        let len = self.read_u16()? as usize;
        let mut units: SmallVec<[u16; 32]> = SmallVec::with_capacity(len);
        for _ in 0..len {
            units.push(self.read_u16()?);
        }
        String::from_utf16(&units).wrap_err("malformed utf-16 in char string")
    }
}
