use super::decode::*;
use super::value::{Tagged, Value, Width};
use hex_literal::hex;

fn val(data: &[u8]) -> Value {
    decode(data).unwrap().0
}

#[test]
fn rfc_integers() {
    // RFC 7049, Appendix A:
    // https://www.rfc-editor.org/rfc/rfc7049.html#appendix-A

    assert_eq!(val(&hex!("00")), Value::UInt(0));
    assert_eq!(val(&hex!("01")), Value::UInt(1));
    assert_eq!(val(&hex!("0a")), Value::UInt(10));
    assert_eq!(val(&hex!("17")), Value::UInt(23));
    assert_eq!(val(&hex!("1818")), Value::UInt(24));
    assert_eq!(val(&hex!("1819")), Value::UInt(25));
    assert_eq!(val(&hex!("1864")), Value::UInt(100));
    assert_eq!(val(&hex!("1903e8")), Value::UInt(1000));
    assert_eq!(decode(&hex!("1a000f4240")).unwrap(), (Value::UInt(1000000), 5));
    assert_eq!(val(&hex!("1b000000e8d4a51000")), Value::UInt(1000000000000));
    assert_eq!(
        val(&hex!("1bffffffffffffffff")),
        Value::UInt(18446744073709551615)
    );
    assert_eq!(val(&hex!("20")), Value::NInt(0));
    assert_eq!(val(&hex!("29")), Value::NInt(9));
    assert_eq!(val(&hex!("3863")), Value::NInt(99));
    assert_eq!(decode(&hex!("3903e7")).unwrap(), (Value::NInt(999), 3));
    assert_eq!(val(&hex!("3903e7")).as_int(), Some(-1000));
}

#[test]
fn rfc_floats() {
    let float = |data: &[u8], width| {
        match val(data) {
            Value::Float { width: w, value } => {
                assert_eq!(w, width, "width of {data:02x?}");
                value
            }
            v => panic!("expected float, got {v:?}"),
        }
    };

    assert_eq!(float(&hex!("f90000"), Width::Half), 0.0);
    assert_eq!(float(&hex!("f98000"), Width::Half).to_bits(), (-0.0f64).to_bits());
    assert_eq!(float(&hex!("f93c00"), Width::Half), 1.0);
    assert_eq!(float(&hex!("fb3ff199999999999a"), Width::Double), 1.1);
    assert_eq!(float(&hex!("f93e00"), Width::Half), 1.5);
    assert_eq!(float(&hex!("f97bff"), Width::Half), 65504.0);
    assert_eq!(float(&hex!("fa47c35000"), Width::Single), 100000.0);
    assert_eq!(
        float(&hex!("fa7f7fffff"), Width::Single),
        3.4028234663852886e+38
    );
    assert_eq!(float(&hex!("fb7e37e43c8800759c"), Width::Double), 1.0e+300);
    assert_eq!(float(&hex!("f90001"), Width::Half), 5.960464477539063e-8);
    assert_eq!(float(&hex!("f90400"), Width::Half), 0.00006103515625);
    assert_eq!(float(&hex!("f9c400"), Width::Half), -4.0);
    assert_eq!(float(&hex!("fbc010666666666666"), Width::Double), -4.1);
    assert_eq!(float(&hex!("f97c00"), Width::Half), f64::INFINITY);
    assert!(float(&hex!("f97e00"), Width::Half).is_nan());
    assert_eq!(float(&hex!("f9fc00"), Width::Half), f64::NEG_INFINITY);
    assert_eq!(float(&hex!("fa7f800000"), Width::Single), f64::INFINITY);
    assert!(float(&hex!("fa7fc00000"), Width::Single).is_nan());
    assert_eq!(float(&hex!("faff800000"), Width::Single), f64::NEG_INFINITY);
    assert_eq!(float(&hex!("fb7ff0000000000000"), Width::Double), f64::INFINITY);
}

#[test]
fn rfc_simple_values() {
    assert_eq!(val(&hex!("f4")), Value::Bool(false));
    assert_eq!(val(&hex!("f5")), Value::Bool(true));
    assert_eq!(val(&hex!("f6")), Value::Null);
    assert_eq!(val(&hex!("f7")), Value::Undefined);
    assert_eq!(val(&hex!("f0")), Value::Simple(16));
    assert_eq!(decode(&hex!("f8ff")).unwrap(), (Value::Simple(255), 2));
    assert_eq!(val(&hex!("f820")), Value::Simple(32));

    // The two-byte form may not shadow the one-byte values
    assert_eq!(
        decode(&hex!("f818")),
        Err(Error::MalformedHeader { offset: 0 })
    );
}

#[test]
fn rfc_strings() {
    assert_eq!(val(&hex!("40")), Value::Bytes(vec![]));
    assert_eq!(val(&hex!("4401020304")), Value::Bytes(vec![1, 2, 3, 4]));
    assert_eq!(val(&hex!("60")), Value::Text(String::new()));
    assert_eq!(val(&hex!("6161")), Value::Text("a".into()));
    assert_eq!(val(&hex!("6449455446")), Value::Text("IETF".into()));
    assert_eq!(val(&hex!("62c3bc")), Value::Text("\u{fc}".into()));
    assert_eq!(val(&hex!("63e6b0b4")), Value::Text("\u{6c34}".into()));
}

#[test]
fn indefinite_strings() {
    assert_eq!(
        decode(&hex!("7f657374726561646d696e67ff")).unwrap(),
        (Value::Text("streaming".into()), 13)
    );
    assert_eq!(
        val(&hex!("5f42010243030405ff")),
        Value::Bytes(vec![1, 2, 3, 4, 5])
    );
    assert_eq!(val(&hex!("7fff")), Value::Text(String::new()));

    // A chunk of the wrong sub-type
    assert_eq!(
        decode(&hex!("5f41016161ff")),
        Err(Error::ChunkTypeMismatch {
            offset: 3,
            expected: "byte string"
        })
    );
    // Chunks must themselves be definite
    assert_eq!(
        decode(&hex!("5f5f4101ffff")),
        Err(Error::ChunkTypeMismatch {
            offset: 1,
            expected: "byte string"
        })
    );
}

#[test]
fn rfc_arrays() {
    let items = |data: &[u8]| match val(data) {
        Value::Array(a) => a.items().clone(),
        v => panic!("expected array, got {v:?}"),
    };

    assert_eq!(items(&hex!("80")), vec![]);
    assert_eq!(
        items(&hex!("83010203")),
        vec![Value::UInt(1), Value::UInt(2), Value::UInt(3)]
    );
    assert_eq!(
        val(&hex!("8301820203820405")),
        val(&hex!("9f018202039f0405ffff"))
    );
    assert_eq!(
        val(&hex!("83018202039f0405ff")),
        val(&hex!("8301820203820405"))
    );

    let long = items(&hex!(
        "98190102030405060708090a0b0c0d0e0f101112131415161718181819"
    ));
    assert_eq!(long.len(), 25);
    assert_eq!(long[24], Value::UInt(25));

    // A Break inside a definite count ends the array early
    assert_eq!(items(&hex!("830102ff")), vec![Value::UInt(1), Value::UInt(2)]);
}

#[test]
fn rfc_maps() {
    let entries = |data: &[u8]| match val(data) {
        Value::Map(m) => m.entries().clone(),
        v => panic!("expected map, got {v:?}"),
    };

    assert_eq!(entries(&hex!("a0")), vec![]);
    assert_eq!(
        entries(&hex!("a201020304")),
        vec![
            (Value::UInt(1), Value::UInt(2)),
            (Value::UInt(3), Value::UInt(4))
        ]
    );
    assert_eq!(
        val(&hex!("a26161016162820203")),
        val(&hex!("bf61610161629f0203ffff"))
    );
    assert_eq!(
        val(&hex!("826161a161626163")),
        Value::from(vec![
            Value::from("a"),
            Value::Map(vec![(Value::from("b"), Value::from("c"))].into())
        ])
    );

    // Dangling key
    assert_eq!(
        decode(&hex!("a16161ff")),
        Err(Error::UnexpectedBreak { offset: 3 })
    );
}

#[test]
fn semantic_tags() {
    assert_eq!(
        decode(&hex!("c074323031332d30332d32315432303a30343a30305a")).unwrap(),
        (
            Tagged::DateTime("2013-03-21T20:04:00Z".into()).into(),
            22
        )
    );
    assert_eq!(
        val(&hex!("c11a514b67b0")),
        Tagged::Epoch(1363896240.0).into()
    );
    assert_eq!(
        val(&hex!("c1fb41d452d9ec200000")),
        Tagged::Epoch(1363896240.5).into()
    );
    assert_eq!(
        val(&hex!("c249010000000000000000")),
        Tagged::PosBignum(hex!("010000000000000000").to_vec()).into()
    );
    assert_eq!(
        val(&hex!("c349010000000000000000")),
        Tagged::NegBignum(hex!("010000000000000000").to_vec()).into()
    );
    assert_eq!(
        val(&hex!("c48221196ab3")),
        Tagged::DecimalFraction {
            exponent: -2,
            mantissa: 27315
        }
        .into()
    );
    assert_eq!(
        val(&hex!("c5822003")),
        Tagged::BigFloat {
            exponent: -1,
            mantissa: 3
        }
        .into()
    );
    assert_eq!(
        val(&hex!("d74401020304")),
        Tagged::ToBase16(Value::Bytes(vec![1, 2, 3, 4])).into()
    );
    assert_eq!(
        val(&hex!("d818456449455446")),
        Tagged::EmbeddedCbor(hex!("6449455446").to_vec()).into()
    );
    assert_eq!(
        val(&hex!("d82076687474703a2f2f7777772e6578616d706c652e636f6d")),
        Tagged::Url("http://www.example.com".into()).into()
    );
    assert_eq!(
        val(&hex!("d82550c6a1b2c3d4e5f6a7b8c9d0e1f2a3b4c5")),
        Tagged::Uuid(hex!("c6a1b2c3d4e5f6a7b8c9d0e1f2a3b4c5")).into()
    );
    assert_eq!(
        val(&hex!("d9d9f700")),
        Tagged::MagicCbor(Value::UInt(0)).into()
    );
    assert_eq!(
        val(&hex!("d9010444c0a80001")),
        Tagged::IpAddress(vec![192, 168, 0, 1]).into()
    );
    assert_eq!(
        val(&hex!("d81a826568656c6c6f01")),
        Tagged::PerlObj(vec![Value::from("hello"), Value::UInt(1)].into()).into()
    );
    assert_eq!(
        val(&hex!("d81e820203")),
        Tagged::Rational {
            numerator: Value::UInt(2),
            denominator: Value::UInt(3)
        }
        .into()
    );
}

#[test]
fn unknown_tags_pass_through() {
    assert_eq!(
        val(&hex!("da499602d200")),
        Tagged::Unknown {
            id: 1234567890,
            inner: Value::UInt(0)
        }
        .into()
    );
}

#[test]
fn tag_contract_violations() {
    // datetime wants text
    assert_eq!(
        decode(&hex!("c000")),
        Err(Error::TagMismatch {
            offset: 0,
            tag: 0,
            expected: "text string",
            actual: "unsigned integer"
        })
    );
    // bignum wants bytes
    assert!(matches!(
        decode(&hex!("c26161")),
        Err(Error::TagMismatch { offset: 0, tag: 2, .. })
    ));
    // decimal fraction wants exactly two integers
    assert!(matches!(
        decode(&hex!("c48101")),
        Err(Error::TagMismatch { offset: 0, tag: 4, .. })
    ));
    assert!(matches!(
        decode(&hex!("c482016161")),
        Err(Error::TagMismatch { offset: 0, tag: 4, .. })
    ));
    // uuid is length-checked
    assert!(matches!(
        decode(&hex!("d82543010203")),
        Err(Error::TagMismatch { offset: 0, tag: 37, .. })
    ));
    // rational refuses a zero denominator
    assert!(matches!(
        decode(&hex!("d81e820200")),
        Err(Error::TagMismatch { offset: 0, tag: 30, .. })
    ));
    // the error offset tracks the failing tag, not the document start
    assert!(matches!(
        decode(&hex!("82c00000")),
        Err(Error::TagMismatch { offset: 1, tag: 0, .. })
    ));
}

#[test]
fn shared_containers() {
    let (value, end) = decode(&hex!("d81c81d81d00")).unwrap();
    assert_eq!(end, 6);
    let Value::Array(outer) = value else {
        panic!("expected array");
    };
    assert_eq!(outer.len(), 1);
    let Some(Value::Array(inner)) = outer.get(0) else {
        panic!("expected nested array");
    };
    // True self-reference, not a structural copy
    assert_eq!(inner.id(), outer.id());

    // Two references to one shared child
    let (value, _) = decode(&hex!("82d81c8101d81d00")).unwrap();
    let Value::Array(pair) = value else {
        panic!("expected array");
    };
    let (Some(Value::Array(a)), Some(Value::Array(b))) = (pair.get(0), pair.get(1)) else {
        panic!("expected two arrays");
    };
    assert_eq!(a.id(), b.id());
    assert_eq!(a.get(0), Some(Value::UInt(1)));

    // Out-of-range index
    assert_eq!(
        decode(&hex!("d81d00")),
        Err(Error::BadReference { offset: 0, index: 0 })
    );
    // Shareable must wrap a container
    assert!(matches!(
        decode(&hex!("d81c00")),
        Err(Error::TagMismatch { offset: 0, tag: 28, .. })
    ));
}

#[test]
fn string_references() {
    // All-literal repeats decode fine even when the encoder missed a dedup
    // opportunity
    let (value, _) =
        decode(&hex!("d9010083656161616161656161616161656161616161")).unwrap();
    let Value::Array(_) = value else {
        panic!("expected array");
    };

    let (value, _) = decode(&hex!("d9010083656161616161d81900d81900")).unwrap();
    let Value::Array(a) = value else {
        panic!("expected array");
    };
    let items = a.items();
    assert_eq!(items.len(), 3);
    assert_eq!(items[0], Value::Text("aaaaa".into()));
    assert_eq!(items[0], items[1]);
    assert_eq!(items[0], items[2]);

    // An index past the table
    assert_eq!(
        decode(&hex!("d90100d81900")),
        Err(Error::BadReference { offset: 3, index: 0 })
    );
    // nthstring outside any stringref scope
    assert_eq!(
        decode(&hex!("d81900")),
        Err(Error::BadReference { offset: 0, index: 0 })
    );
}

#[test]
fn nested_stringref_scopes_shadow() {
    // Outer scope records "aaaaa"; the inner scope starts empty, records its
    // own copy, and references inside it resolve against the inner table.
    // 256([ "aaaaa", 256([ "aaaaa", "aaaaa" ]), "aaaaa" ])
    let data = hex!("d9010083656161616161d9010082656161616161656161616161656161616161");
    let (value, _) = decode(&data).unwrap();
    let Value::Array(a) = value else {
        panic!("expected array");
    };
    assert_eq!(a.len(), 3);
}

#[test]
fn truncation_and_garbage() {
    assert_eq!(decode(&[]), Err(Error::MalformedHeader { offset: 0 }));
    assert_eq!(decode(&hex!("1c")), Err(Error::MalformedHeader { offset: 0 }));
    assert_eq!(decode(&hex!("1d")), Err(Error::MalformedHeader { offset: 0 }));
    assert_eq!(decode(&hex!("1e")), Err(Error::MalformedHeader { offset: 0 }));
    assert_eq!(decode(&hex!("1901")), Err(Error::MalformedHeader { offset: 0 }));
    assert_eq!(decode(&hex!("5a00010000")), Err(Error::TruncatedBody { offset: 0 }));
    assert_eq!(decode(&hex!("62ffff")), Err(Error::InvalidUtf8 { offset: 0 }));
    assert_eq!(decode(&hex!("3f")), Err(Error::MalformedHeader { offset: 0 }));
    // Inner failures surface their own position
    assert_eq!(
        decode(&hex!("820162ffff")),
        Err(Error::InvalidUtf8 { offset: 2 })
    );
    // A bare break is a value; the caller decides what it means
    assert_eq!(decode(&hex!("ff")).unwrap(), (Value::Break, 1));
}

#[test]
fn depth_limit() {
    let mut data = vec![0x81u8; 200];
    data.push(0x00);
    assert!(matches!(
        decode(&data),
        Err(Error::MaxDepth { limit: 128, .. })
    ));

    let shallow = Options { max_depth: 4 };
    assert!(matches!(
        decode_in(
            &hex!("8181818100"),
            0,
            super::tags::Registry::global(),
            &shallow
        ),
        Err(Error::MaxDepth { limit: 4, .. })
    ));
    assert!(decode_in(
        &hex!("81818100"),
        0,
        super::tags::Registry::global(),
        &shallow
    )
    .is_ok());
}

#[test]
fn trailing_data_is_left_alone() {
    let (value, end) = decode(&hex!("016161")).unwrap();
    assert_eq!(value, Value::UInt(1));
    assert_eq!(end, 1);
    let (value, end) = decode_from(&hex!("016161"), 1).unwrap();
    assert_eq!(value, Value::Text("a".into()));
    assert_eq!(end, 3);
}
