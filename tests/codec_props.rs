//! Property-based round-trip suites for the codec layer: stop-bit and
//! compact integers, UTF-8 text, and the shortest-form decimal-exact double
//! encoder, each driven through a real cursor over an on-disk log.

use std::cell::RefCell;

use logbook::encoding::stopbit::{decode_stop_bit, encode_stop_bit, stop_bit_len};
use logbook::IndexedLog;
use proptest::prelude::*;
use proptest::test_runner::{Config, TestRunner};
use tempfile::tempdir;

fn runner() -> TestRunner {
    TestRunner::new(Config::with_cases(512))
}

#[test]
fn stop_bit_roundtrip_all_magnitudes() {
    let mut runner = runner();
    runner
        .run(&any::<i64>(), |v| {
            let mut buf = Vec::new();
            encode_stop_bit(&mut buf, v);
            prop_assert_eq!(buf.len(), stop_bit_len(v));
            let mut slice = buf.as_slice();
            prop_assert_eq!(decode_stop_bit(&mut slice).unwrap(), v);
            prop_assert!(slice.is_empty());
            Ok(())
        })
        .unwrap();
}

#[test]
fn stop_bit_length_grows_with_magnitude() {
    let mut runner = runner();
    runner
        .run(&(any::<i64>(), any::<i64>()), |(a, b)| {
            let (small, large) = if a.unsigned_abs() <= b.unsigned_abs() {
                (a, b)
            } else {
                (b, a)
            };
            // Within one sign, length is monotone in magnitude; across
            // signs a negative costs at most one extra terminal byte.
            prop_assert!(stop_bit_len(small) <= stop_bit_len(large) + 1);
            Ok(())
        })
        .unwrap();
}

#[test]
fn stop_bit_roundtrip_through_cursor() {
    let dir = tempdir().unwrap();
    let log = IndexedLog::builder(dir.path())
        .data_bits(23)
        .index_bits(14)
        .build()
        .unwrap();
    let cell = RefCell::new(log.excerpt());
    let mut runner = runner();
    runner
        .run(&proptest::collection::vec(any::<i64>(), 1..16), |values| {
            let mut e = cell.borrow_mut();
            e.start_excerpt(256).unwrap();
            for &v in &values {
                e.write_stop_bit(v).unwrap();
            }
            e.set_position(0).unwrap();
            for &v in &values {
                prop_assert_eq!(e.read_stop_bit().unwrap(), v);
            }
            Ok(())
        })
        .unwrap();
}

#[test]
fn compact_integers_roundtrip() {
    let dir = tempdir().unwrap();
    let log = IndexedLog::builder(dir.path())
        .data_bits(23)
        .index_bits(14)
        .build()
        .unwrap();
    let cell = RefCell::new(log.excerpt());
    let mut runner = runner();
    runner
        .run(
            &(any::<i16>(), any::<i32>(), any::<i64>(), any::<u16>(), any::<u32>()),
            |(a, b, c, d, f)| {
                let mut e = cell.borrow_mut();
                e.start_excerpt(64).unwrap();
                e.write_compact_i16(a).unwrap();
                e.write_compact_i32(b).unwrap();
                e.write_compact_i64(c).unwrap();
                e.write_compact_u16(d).unwrap();
                e.write_compact_u32(f).unwrap();
                e.set_position(0).unwrap();
                prop_assert_eq!(e.read_compact_i16().unwrap(), a);
                prop_assert_eq!(e.read_compact_i32().unwrap(), b);
                prop_assert_eq!(e.read_compact_i64().unwrap(), c);
                prop_assert_eq!(e.read_compact_u16().unwrap(), d);
                prop_assert_eq!(e.read_compact_u32().unwrap(), f);
                Ok(())
            },
        )
        .unwrap();
}

#[test]
fn utf8_roundtrip_bmp_and_beyond() {
    let dir = tempdir().unwrap();
    let log = IndexedLog::builder(dir.path())
        .data_bits(23)
        .index_bits(14)
        .build()
        .unwrap();
    let cell = RefCell::new(log.excerpt());
    let mut runner = runner();
    runner
        .run(&"\\PC{0,64}", |text| {
            let mut e = cell.borrow_mut();
            e.start_excerpt(1024).unwrap();
            e.write_u8(1).unwrap();
            e.write_utf8(Some(&text)).unwrap();
            e.set_position(1).unwrap();
            let decoded = e.read_utf8().unwrap();
            prop_assert_eq!(decoded.as_deref(), Some(text.as_str()));
            Ok(())
        })
        .unwrap();
}

#[test]
fn f64_text_roundtrips_bit_for_bit() {
    let dir = tempdir().unwrap();
    let log = IndexedLog::builder(dir.path())
        .data_bits(23)
        .index_bits(14)
        .build()
        .unwrap();
    let cell = RefCell::new(log.excerpt());
    let mut runner = TestRunner::new(Config::with_cases(1024));
    runner
        .run(&any::<u64>(), |bits| {
            let d = f64::from_bits(bits);
            let mut e = cell.borrow_mut();
            e.start_excerpt(2048).unwrap();
            e.append_f64(d).unwrap();
            e.set_position(0).unwrap();
            let parsed = e.parse_f64().unwrap();
            if d.is_nan() {
                prop_assert!(parsed.is_nan());
            } else {
                prop_assert_eq!(parsed.to_bits(), d.to_bits());
            }
            Ok(())
        })
        .unwrap();
}

#[test]
fn f64_subnormals_and_extremes_roundtrip() {
    let dir = tempdir().unwrap();
    let log = IndexedLog::builder(dir.path())
        .data_bits(23)
        .index_bits(14)
        .build()
        .unwrap();
    let cell = RefCell::new(log.excerpt());
    // Exhaust the interesting exponent boundaries with random mantissas.
    let strategy = (0u64..=2046, any::<u64>()).prop_map(|(exp, mantissa)| {
        f64::from_bits((exp << 52) | (mantissa & ((1u64 << 52) - 1)))
    });
    let mut runner = runner();
    runner
        .run(&strategy, |d| {
            let mut e = cell.borrow_mut();
            e.start_excerpt(2048).unwrap();
            e.append_f64(d).unwrap();
            e.set_position(0).unwrap();
            prop_assert_eq!(e.parse_f64().unwrap().to_bits(), d.to_bits());
            Ok(())
        })
        .unwrap();
}
