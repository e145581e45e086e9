// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::missing_panics_doc)] // Tests panic on failure

//! User exception integration tests
//!
//! Known, sliced-to-base and wholly unknown exceptions under both encodings,
//! plus exceptions carrying class members.

mod common;

use std::sync::Arc;

use common::{
    base_only_registry, full_registry, BaseError, DerivedError, Node, NodeError, DERIVED_ERROR_ID,
    NODE_ERROR_ID,
};
use slicewire::{
    DecodedException, EncodingVersion, Error, ExceptionFactory, FactoryRegistry, FormatType,
    InputStream, OutputStream, UserException, ValueGraph, ENCODING_1_0, ENCODING_1_1,
};

/// Layouts whose slices carry their size.
const SKIPPABLE: [(EncodingVersion, FormatType); 2] = [
    (ENCODING_1_0, FormatType::Default),
    (ENCODING_1_1, FormatType::Sliced),
];

fn derived_error() -> DerivedError {
    DerivedError {
        reason: "disk full".to_string(),
        code: 28,
    }
}

fn encode_exception(
    ex: &dyn UserException,
    graph: Option<&ValueGraph>,
    encoding: EncodingVersion,
    format: FormatType,
) -> Vec<u8> {
    let mut out = OutputStream::new();
    if let Some(graph) = graph {
        out = out.with_graph(graph);
    }
    out.start_write_encaps(encoding, format).expect("start encaps");
    out.write_exception(ex).expect("write exception");
    out.end_write_encaps().expect("end encaps");
    out.into_bytes()
}

fn decode_exception(bytes: Vec<u8>, registry: &FactoryRegistry) -> DecodedException {
    let mut input = InputStream::new(bytes, registry);
    input.start_read_encaps().expect("start encaps");
    let decoded = input.read_exception().expect("read exception");
    input.end_read_encaps().expect("end encaps");
    assert_eq!(input.remaining(), 0);
    decoded
}

#[test]
fn test_known_exception_all_layouts() {
    let registry = full_registry();
    let layouts = [
        (ENCODING_1_0, FormatType::Default),
        (ENCODING_1_1, FormatType::Compact),
        (ENCODING_1_1, FormatType::Sliced),
    ];
    for (encoding, format) in layouts {
        let bytes = encode_exception(&derived_error(), None, encoding, format);
        let decoded = decode_exception(bytes, &registry);
        let ex = decoded
            .downcast_ref::<DerivedError>()
            .expect("DerivedError should be known");
        assert_eq!(ex.code, 28);
        assert_eq!(ex.reason, "disk full");
        assert_eq!(decoded.ice_id(), DERIVED_ERROR_ID);
    }
}

#[test]
fn test_exception_sliced_to_known_base() {
    let registry = base_only_registry();
    for (encoding, format) in SKIPPABLE {
        let bytes = encode_exception(&derived_error(), None, encoding, format);
        let decoded = decode_exception(bytes, &registry);
        let base = decoded
            .downcast_ref::<BaseError>()
            .unwrap_or_else(|| panic!("{} {:?}: expected BaseError", encoding, format));
        assert_eq!(base.reason, "disk full");
    }
}

#[test]
fn test_wholly_unknown_exception() {
    let registry = FactoryRegistry::new();
    for (encoding, format) in SKIPPABLE {
        let bytes = encode_exception(&derived_error(), None, encoding, format);
        match decode_exception(bytes, &registry) {
            DecodedException::Unknown(unknown) => assert_eq!(unknown.unknown, "Demo::DerivedError"),
            DecodedException::Known(ex) => panic!("unexpected {:?}", ex),
        }
    }
}

#[test]
fn test_compact_exception_stops_at_first_unknown_slice() {
    let registry = base_only_registry();
    let bytes = encode_exception(&derived_error(), None, ENCODING_1_1, FormatType::Compact);

    let mut input = InputStream::new(bytes, &registry);
    input.start_read_encaps().expect("start encaps");
    let decoded = input.read_exception().expect("read exception");
    assert!(matches!(
        decoded,
        DecodedException::Unknown(ref unknown) if unknown.unknown == "Demo::DerivedError"
    ));
    input.end_read_encaps().expect("end encaps skips the rest");
}

#[test]
fn test_caller_factory_tried_first() {
    let registry = FactoryRegistry::new();
    let factory: ExceptionFactory = Arc::new(|type_id: &str| -> Option<Box<dyn UserException>> {
        (type_id == common::BASE_ERROR_ID)
            .then(|| Box::new(BaseError::default()) as Box<dyn UserException>)
    });

    let bytes = encode_exception(&derived_error(), None, ENCODING_1_1, FormatType::Sliced);
    let mut input = InputStream::new(bytes, &registry);
    input.start_read_encaps().expect("start encaps");
    let decoded = input.read_exception_with(Some(factory)).expect("read exception");
    input.end_read_encaps().expect("end encaps");
    assert_eq!(
        decoded.downcast_ref::<BaseError>().map(|e| e.reason.as_str()),
        Some("disk full")
    );
}

#[test]
fn test_exception_with_class_member() {
    let registry = full_registry();
    let mut graph = ValueGraph::new();
    let node = graph.insert(Node::new(5));
    let ex = NodeError { node: Some(node) };

    let layouts = [
        (ENCODING_1_0, FormatType::Default),
        (ENCODING_1_1, FormatType::Compact),
        (ENCODING_1_1, FormatType::Sliced),
    ];
    for (encoding, format) in layouts {
        let bytes = encode_exception(&ex, Some(&graph), encoding, format);
        let mut input = InputStream::new(bytes, &registry);
        input.start_read_encaps().expect("start encaps");
        let decoded = input.read_exception().expect("read exception");
        input.end_read_encaps().expect("end encaps");

        let handle = decoded
            .downcast_ref::<NodeError>()
            .and_then(|e| e.node)
            .unwrap_or_else(|| panic!("{} {:?}: node member not patched", encoding, format));
        let node = input.graph().get::<Node>(handle).expect("member is a Node");
        assert_eq!(node.id, 5);
    }
}

#[test]
fn test_1_0_uses_classes_flag_leads() {
    let bytes = encode_exception(&derived_error(), None, ENCODING_1_0, FormatType::Default);
    assert_eq!(bytes[6], 0, "no class members");

    let mut graph = ValueGraph::new();
    let node = graph.insert(Node::new(1));
    let bytes = encode_exception(
        &NodeError { node: Some(node) },
        Some(&graph),
        ENCODING_1_0,
        FormatType::Default,
    );
    assert_eq!(bytes[6], 1, "class members follow as pending values");
}

#[test]
fn test_exception_member_with_missing_instance_fails() {
    // Compact 1.1 exception whose class member refers back to id 5, never sent.
    let mut out = OutputStream::new();
    out.start_write_encaps(ENCODING_1_1, FormatType::Compact).expect("start encaps");
    out.write_byte(0x20);
    out.write_string(NODE_ERROR_ID).expect("type id");
    out.write_size(5).expect("reference");
    out.end_write_encaps().expect("end encaps");

    let registry = full_registry();
    let mut input = InputStream::new(out.into_bytes(), &registry);
    input.start_read_encaps().expect("start encaps");
    match input.read_exception() {
        Err(Error::Marshal(reason)) => assert!(reason.contains("no instance"), "{}", reason),
        other => panic!("unexpected result {:?}", other),
    }
}
