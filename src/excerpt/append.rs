//! # Text Append & Parse
//!
//! Number-to-text and text-to-number directly against the record bytes.
//! Integer digits go through the cursor-owned 20-byte scratch buffer, so
//! appending never allocates.
//!
//! ## Shortest Round-Trip Doubles
//!
//! `append_f64` prints the shortest decimal string that parses back to
//! exactly the same bits, without arbitrary-precision arithmetic. The
//! double is split into sign, biased exponent and 52-bit mantissa, then one
//! of three regimes applies:
//!
//! - **Integer and fraction** (`0 < shift < 53`): the mantissa yields the
//!   integer part directly; the fractional remainder is expanded one
//!   decimal digit at a time by multiplying by 5 (x10 once the binary
//!   shift is accounted for), re-parsing the digits emitted so far after
//!   each step and stopping as soon as they reconstruct the original.
//! - **Pure fraction** (`shift >= 53`): the same x5 expansion starting
//!   below the decimal point, with the working value renormalized downward
//!   whenever it approaches 64-bit overflow.
//! - **Large magnitude** (`shift <= 0`): the mantissa is reduced by
//!   repeated /5 with compensating left shifts, peeling off trailing
//!   decimal zeros that carry no precision; the remainder is printed
//!   followed by the peeled zero count.
//!
//! Signed zero prints as `0` (with its sign), the non-finite encodings as
//! `Infinity`/`NaN`. The fixed-precision variant rounds half-up through a
//! power-of-ten pre-multiplication and falls back to the exact form when
//! the scaled value overflows 64 bits.

use eyre::{ensure, Result};

use crate::encoding::float::{as_f64, Decimal, MAX_VALUE_DIVIDE_10, MAX_VALUE_DIVIDE_5, TENS};
use crate::excerpt::{Excerpt, MAX_NUMBER_LENGTH};

const MIN_VALUE_TEXT: &[u8] = b"-9223372036854775808";
const INFINITY_TEXT: &[u8] = b"Infinity";
const NAN_TEXT: &[u8] = b"NaN";

impl Excerpt {
    /// Appends the decimal digits of `num`.
    pub fn append_i64(&mut self, num: i64) -> Result<()> {
        if num < 0 {
            if num == i64::MIN {
                // -num would overflow; the text is a constant anyway.
                return self.write_bytes(MIN_VALUE_TEXT);
            }
            self.write_u8(b'-')?;
            return self.append_digits(num.unsigned_abs());
        }
        self.append_digits(num as u64)
    }

    /// Digits of `num` via the cursor scratch, least significant first from
    /// the back of the buffer.
    fn append_digits(&mut self, mut num: u64) -> Result<()> {
        let mut end = MAX_NUMBER_LENGTH;
        loop {
            end -= 1;
            self.number_buffer[end] = b'0' + (num % 10) as u8;
            num /= 10;
            if num == 0 {
                break;
            }
        }
        let buffer = self.number_buffer;
        self.write_bytes(&buffer[end..])
    }

    /// Digits of `num` with a decimal point placed `precision` digits from
    /// the right, zero-padded so at least one digit precedes the point.
    fn append_decimal_digits(&mut self, mut num: u64, precision: usize) -> Result<()> {
        let mut end = MAX_NUMBER_LENGTH;
        let max_end = MAX_NUMBER_LENGTH - precision - 2;
        let mut emitted = 0;
        loop {
            end -= 1;
            self.number_buffer[end] = b'0' + (num % 10) as u8;
            num /= 10;
            emitted += 1;
            if num == 0 && end <= max_end {
                break;
            }
            if emitted == precision {
                end -= 1;
                self.number_buffer[end] = b'.';
            }
        }
        let buffer = self.number_buffer;
        self.write_bytes(&buffer[end..])
    }

    /// Appends the shortest decimal text that parses back to exactly `d`.
    pub fn append_f64(&mut self, d: f64) -> Result<()> {
        let bits = d.to_bits();
        let negative = bits >> 63 != 0;
        let exp = ((bits >> 52) & 2047) as i32;
        let mut mantissa = bits & ((1u64 << 52) - 1);

        if negative {
            self.write_u8(b'-')?;
        }
        if exp == 0 && mantissa == 0 {
            return self.write_u8(b'0');
        }
        if exp == 2047 {
            return self.write_bytes(if mantissa == 0 { INFINITY_TEXT } else { NAN_TEXT });
        }
        if exp > 0 {
            mantissa += 1u64 << 52;
        }

        let shift = (1023 + 52) - exp;
        if shift > 0 {
            if shift < 53 {
                // Integer part straight off the mantissa, then the
                // fractional remainder digit by digit.
                let int_value = mantissa >> shift;
                self.append_digits(int_value)?;
                mantissa -= int_value << shift;
                if mantissa > 0 {
                    self.write_u8(b'.')?;
                    mantissa = (mantissa << 1) + 1;
                    let mut precision = shift + 1;
                    let mut error: u64 = 1;
                    let mut value = int_value;
                    let mut decimal_places = 0;
                    while mantissa > error {
                        // times 5 * 2 = 10
                        mantissa *= 5;
                        error *= 5;
                        precision -= 1;
                        let digit = mantissa >> precision as u32;
                        value = value.wrapping_mul(10).wrapping_add(digit);
                        self.write_u8(b'0' + digit as u8)?;
                        mantissa -= digit << precision as u32;
                        decimal_places += 1;
                        if as_f64(value, 0, negative, decimal_places) == d {
                            break;
                        }
                    }
                }
                return Ok(());
            }

            // Pure fraction.
            self.write_u8(b'0')?;
            self.write_u8(b'.')?;
            mantissa = (mantissa << 6) + (1 << 5);
            let mut precision = shift + 6;
            let mut error: u64 = 1 << 5;
            let mut value: u64 = 0;
            let mut decimal_places = 0;
            while mantissa > error {
                while mantissa > MAX_VALUE_DIVIDE_5 {
                    mantissa >>= 1;
                    error = (error + 1) >> 1;
                    precision -= 1;
                }
                // times 5 * 2 = 10
                mantissa *= 5;
                error *= 5;
                precision -= 1;
                if precision >= 64 {
                    decimal_places += 1;
                    self.write_u8(b'0')?;
                    continue;
                }
                let digit = mantissa >> precision as u32;
                value = value.wrapping_mul(10).wrapping_add(digit);
                self.write_u8(b'0' + digit as u8)?;
                mantissa -= digit << precision as u32;
                decimal_places += 1;
                if as_f64(value, 0, negative, decimal_places) == d {
                    break;
                }
            }
            return Ok(());
        }

        // Large magnitude: peel trailing decimal zeros that carry no
        // precision, then print what remains.
        mantissa <<= 10;
        let mut precision = -10 - shift;
        let mut zeros = 0;
        while precision > 0
            && (precision > 53 || mantissa > (i64::MAX as u64) >> precision as u32)
        {
            zeros += 1;
            precision -= 1;
            let rem = mantissa % 5;
            mantissa /= 5;
            let mut rem_div: u64 = 1;
            while mantissa < MAX_VALUE_DIVIDE_5 && precision > 1 {
                precision -= 1;
                mantissa <<= 1;
                rem_div <<= 1;
            }
            mantissa += rem_div * rem / 5;
        }
        let value = if precision > 0 {
            mantissa << precision as u32
        } else {
            mantissa >> (-precision) as u32
        };
        self.append_digits(value)?;
        for _ in 0..zeros {
            self.write_u8(b'0')?;
        }
        Ok(())
    }

    /// Appends `d` rounded half-up to `precision` decimal places, dropping
    /// trailing zeros. Falls back to the exact form when `d * 10^precision`
    /// does not fit an i64.
    pub fn append_f64_precision(&mut self, mut d: f64, precision: usize) -> Result<()> {
        let precision = precision.min(TENS.len() - 1);
        let power10 = TENS[precision];
        if d < 0.0 {
            d = -d;
            self.write_u8(b'-')?;
        }
        let scaled = d * power10 as f64;
        if scaled > i64::MAX as f64 || scaled < (i64::MIN + 1) as f64 {
            return self.append_f64(d);
        }
        let mut value = (scaled + 0.5) as i64;
        let mut precision = precision;
        while precision > 1 && value % 10 == 0 {
            value /= 10;
            precision -= 1;
        }
        if precision > 0 && value % 10 == 0 {
            value = (value + 5) / 10;
            precision -= 1;
        }
        if precision > 0 {
            self.append_decimal_digits(value as u64, precision)
        } else {
            self.append_digits(value as u64)
        }
    }

    /// Parses decimal digits (with optional sign) into an i64, consuming
    /// the terminating non-digit byte if one is present.
    pub fn parse_i64(&mut self) -> Result<i64> {
        let mut num: u64 = 0;
        let mut negative = false;
        while self.remaining() > 0 {
            let b = self.read_u8()?;
            if b.is_ascii_digit() {
                num = num.wrapping_mul(10).wrapping_add((b - b'0') as u64);
            } else if b == b'-' {
                negative = true;
            } else {
                break;
            }
        }
        Ok(if negative {
            (num as i64).wrapping_neg()
        } else {
            num as i64
        })
    }

    /// Parses decimal text (including `Infinity`/`NaN`) back to the exact
    /// double, consuming the terminating non-numeric byte if present.
    pub fn parse_f64(&mut self) -> Result<f64> {
        let mut value: u64 = 0;
        let mut exp = 0i32;
        let mut negative = false;
        let mut decimal_places = i32::MIN;
        while self.remaining() > 0 {
            let b = self.read_u8()?;
            if b.is_ascii_digit() {
                while value >= MAX_VALUE_DIVIDE_10 {
                    value >>= 1;
                    exp += 1;
                }
                value = value * 10 + (b - b'0') as u64;
                decimal_places += 1;
            } else if b == b'-' {
                negative = true;
            } else if b == b'.' {
                decimal_places = 0;
            } else if b == b'I' {
                self.expect_text(&INFINITY_TEXT[1..])?;
                return Ok(if negative {
                    f64::NEG_INFINITY
                } else {
                    f64::INFINITY
                });
            } else if b == b'N' {
                self.expect_text(&NAN_TEXT[1..])?;
                return Ok(f64::NAN);
            } else {
                break;
            }
        }
        Ok(as_f64(value, exp, negative, decimal_places))
    }

    /// Parses decimal text into a value/scale pair without reconstructing a
    /// double.
    pub fn parse_decimal(&mut self) -> Result<Decimal> {
        let mut num: i64 = 0;
        let mut scale: i64 = i64::MIN;
        let mut negative = false;
        while self.remaining() > 0 {
            let b = self.read_u8()?;
            if b.is_ascii_digit() {
                num = num.wrapping_mul(10).wrapping_add((b - b'0') as i64);
                scale += 1;
            } else if b == b'.' {
                scale = 0;
            } else if b == b'-' {
                negative = true;
            } else {
                break;
            }
        }
        if negative {
            num = -num;
        }
        Ok(Decimal::new(num, if scale > 0 { scale as u32 } else { 0 }))
    }

    fn expect_text(&mut self, rest: &[u8]) -> Result<()> {
        for &expected in rest {
            let b = self.read_u8()?;
            ensure!(
                b == expected,
                "invalid numeric text: expected {:?}, found {:?}",
                expected as char,
                b as char
            );
        }
        Ok(())
    }
}
