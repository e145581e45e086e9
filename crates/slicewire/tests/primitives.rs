// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::missing_panics_doc)] // Tests panic on failure
#![allow(clippy::cast_possible_truncation)] // Test data conversions

//! Primitive codec integration tests
//!
//! `Size` widths around the 254/255 boundary and transcoded strings whose
//! encoded length crosses it, driven by seeded random inputs.

use std::sync::Arc;

use slicewire::{FactoryRegistry, InputStream, Latin1Converter, OutputStream};

const SEED: u64 = 0x5EED_CAFE;

#[test]
fn test_size_width_boundary() {
    let registry = FactoryRegistry::new();
    let mut rng = fastrand::Rng::with_seed(SEED);
    let mut sizes = vec![0usize, 1, 253, 254, 255, 256, i32::MAX as usize];
    sizes.extend((0..64).map(|_| rng.usize(200..320)));

    for size in sizes {
        let mut out = OutputStream::new();
        out.write_size(size).expect("write size");
        let bytes = out.into_bytes();
        if size <= 254 {
            assert_eq!(bytes, vec![size as u8]);
        } else {
            assert_eq!(bytes.len(), 5);
            assert_eq!(bytes[0], 255);
            assert_eq!(&bytes[1..], &(size as i32).to_le_bytes());
        }
        let mut input = InputStream::new(bytes, &registry);
        assert_eq!(input.read_size().expect("read size"), size);
    }
}

#[test]
fn test_oversized_size_rejected() {
    let mut out = OutputStream::new();
    assert!(out.write_size(i32::MAX as usize + 1).is_err());
}

#[test]
fn test_strings_straddling_boundary() {
    let registry = FactoryRegistry::new();
    let mut rng = fastrand::Rng::with_seed(SEED);

    for len in 250..260 {
        let text: String = (0..len).map(|_| rng.alphanumeric()).collect();
        let mut out = OutputStream::new();
        out.write_string(&text).expect("write string");
        let bytes = out.into_bytes();
        assert_eq!(bytes.len(), len + if len > 254 { 5 } else { 1 });

        let mut input = InputStream::new(bytes, &registry);
        assert_eq!(input.read_string().expect("read string"), text);
        assert_eq!(input.remaining(), 0);
    }
}

#[test]
fn test_latin1_growth_moves_payload() {
    let registry = FactoryRegistry::new();
    let mut rng = fastrand::Rng::with_seed(SEED);

    // Every high byte doubles in UTF-8, so native lengths near 127 cross 254.
    for len in 120..136 {
        let native: Vec<u8> = (0..len)
            .map(|_| if rng.bool() { rng.u8(0xC0..=0xFF) } else { rng.u8(b'a'..=b'z') })
            .collect();
        let utf8_len = native.iter().map(|&b| if b < 0x80 { 1 } else { 2 }).sum::<usize>();

        let mut out = OutputStream::new().with_string_converter(Arc::new(Latin1Converter));
        out.write_native_string(&native).expect("write native");
        let bytes = out.into_bytes();
        assert_eq!(bytes.len(), utf8_len + if utf8_len > 254 { 5 } else { 1 });

        let mut input =
            InputStream::new(bytes, &registry).with_string_converter(Arc::new(Latin1Converter));
        assert_eq!(input.read_native_string().expect("read native"), native);
    }
}

#[test]
fn test_wide_strings_with_multibyte_units() {
    let registry = FactoryRegistry::new();
    let mut rng = fastrand::Rng::with_seed(SEED);

    for len in [0usize, 1, 84, 85, 127, 128, 300] {
        let units: Vec<u16> = (0..len).map(|_| rng.u16(0x0800..0xD800)).collect();
        let mut out = OutputStream::new();
        out.write_wstring(&units).expect("write wstring");
        let bytes = out.into_bytes();
        let utf8_len = len * 3;
        assert_eq!(bytes.len(), utf8_len + if utf8_len > 254 { 5 } else { 1 });

        let mut input = InputStream::new(bytes, &registry);
        assert_eq!(input.read_wstring().expect("read wstring"), units);
    }
}

#[test]
fn test_scalars_are_little_endian() {
    let mut out = OutputStream::new();
    out.write_bool(true);
    out.write_short(-2);
    out.write_int(0x0102_0304);
    out.write_long(-1);
    out.write_float(1.5);
    out.write_double(-0.25);
    let bytes = out.into_bytes();

    let mut expected = vec![1u8];
    expected.extend_from_slice(&(-2i16).to_le_bytes());
    expected.extend_from_slice(&[4, 3, 2, 1]);
    expected.extend_from_slice(&[0xFF; 8]);
    expected.extend_from_slice(&1.5f32.to_le_bytes());
    expected.extend_from_slice(&(-0.25f64).to_le_bytes());
    assert_eq!(bytes, expected);

    let registry = FactoryRegistry::new();
    let mut input = InputStream::new(bytes, &registry);
    assert!(input.read_bool().expect("bool"));
    assert_eq!(input.read_short().expect("short"), -2);
    assert_eq!(input.read_int().expect("int"), 0x0102_0304);
    assert_eq!(input.read_long().expect("long"), -1);
    assert_eq!(input.read_float().expect("float"), 1.5);
    assert_eq!(input.read_double().expect("double"), -0.25);
    assert!(input.read_byte().is_err());
}
