use crate::value::{Value, ValueKind};

#[test]
fn test_primitive_constants_are_distinct() {
    let none = Value::none().to_bits();
    let t = Value::boolean(true).to_bits();
    let f = Value::boolean(false).to_bits();
    assert_ne!(none, t);
    assert_ne!(none, f);
    assert_ne!(t, f);

    assert!(!Value::NONE.is_number());
    assert!(!Value::TRUE.is_number());
    assert!(!Value::FALSE.is_number());
    assert!(!Value::NONE.is_object());
    assert!(!Value::INTERRUPT.is_object());
    assert!(!Value::INTERRUPT.is_number());
}

#[test]
fn test_number_round_trip_is_bit_exact() {
    let samples = [
        0.0,
        -0.0,
        1.0,
        -1.5,
        3.141592653589793,
        f64::MAX,
        f64::MIN,
        f64::MIN_POSITIVE,
        f64::EPSILON,
        5e-324,
        -5e-324,
        1e300,
        123456789.125,
    ];
    for d in samples {
        let v = Value::number(d);
        assert!(v.is_number(), "{} should decode as a number", d);
        assert_eq!(v.as_f64_unchecked().to_bits(), d.to_bits());
    }
}

#[test]
fn test_infinities_round_trip() {
    for d in [f64::INFINITY, f64::NEG_INFINITY] {
        let v = Value::number(d);
        assert!(v.is_number());
        assert_eq!(v.as_f64_unchecked(), d);
    }
}

#[test]
fn test_canonical_nan_round_trips() {
    let v = Value::number(f64::NAN);
    assert!(v.is_number());
    assert_eq!(v.as_f64_unchecked().to_bits(), f64::NAN.to_bits());
}

#[test]
fn test_colliding_nan_payload_is_canonicalized() {
    // quiet NaN with the discriminator bits set
    let colliding = f64::from_bits(0x7FFC_0000_0000_0001);
    let v = Value::number(colliding);
    assert!(v.is_number());
    assert!(v.as_f64_unchecked().is_nan());
    assert!(!v.is_object());

    let negative = f64::from_bits(0xFFFF_0000_0000_0000);
    let v = Value::number(negative);
    assert!(v.is_number());
    assert!(!v.is_object());
}

#[test]
fn test_kind_decoding() {
    assert_eq!(Value::NONE.kind(), ValueKind::None);
    assert_eq!(Value::TRUE.kind(), ValueKind::Bool(true));
    assert_eq!(Value::FALSE.kind(), ValueKind::Bool(false));
    assert_eq!(Value::number(2.5).kind(), ValueKind::Number(2.5));
    assert_eq!(Value::INTERRUPT.kind(), ValueKind::Interrupt);

    assert_eq!(Value::TRUE.as_bool(), Some(true));
    assert_eq!(Value::NONE.as_bool(), None);
    assert_eq!(Value::number(7.0).as_number(), Some(7.0));
    assert_eq!(Value::TRUE.as_number(), None);
}

#[test]
fn test_truthiness() {
    assert!(!Value::NONE.is_truthy());
    assert!(!Value::FALSE.is_truthy());
    assert!(Value::TRUE.is_truthy());
    assert!(Value::number(0.0).is_truthy());
    assert!(Value::number(f64::NAN).is_truthy());
}

#[test]
fn test_conversions() {
    assert_eq!(Value::from(true), Value::TRUE);
    assert_eq!(Value::from(4.0), Value::number(4.0));
    assert_eq!(Value::default(), Value::NONE);
    assert_eq!(Value::from_bits(Value::FALSE.to_bits()), Value::FALSE);
}
