//! Unit tests for the NaN-boxed value encoding

use core_types::{CellId, Decoded, Value};

#[cfg(test)]
mod value_creation_tests {
    use super::*;

    #[test]
    fn test_value_undefined() {
        let val = Value::undefined();
        assert!(val.is_undefined());
        assert!(val.is_nullish());
        assert!(matches!(val.decode(), Decoded::Undefined));
    }

    #[test]
    fn test_value_null() {
        let val = Value::null();
        assert!(val.is_null());
        assert!(!val.is_undefined());
    }

    #[test]
    fn test_value_boolean() {
        assert_eq!(Value::boolean(true).as_bool(), Some(true));
        assert_eq!(Value::boolean(false).as_bool(), Some(false));
        assert_eq!(Value::number(1.0).as_bool(), None);
    }

    #[test]
    fn test_value_default_is_undefined() {
        assert_eq!(Value::default(), Value::undefined());
    }

    #[test]
    fn test_value_from_conversions() {
        assert_eq!(Value::from(3), Value::number(3.0));
        assert_eq!(Value::from(true), Value::boolean(true));
        let id = CellId::new(2, 5);
        assert_eq!(Value::from(id).as_cell(), Some(id));
    }
}

#[cfg(test)]
mod number_round_trip_tests {
    use super::*;

    fn assert_round_trips(n: f64) {
        let decoded = Value::number(n).as_number().expect("number");
        if n.is_nan() {
            assert!(decoded.is_nan());
        } else {
            assert_eq!(decoded.to_bits(), n.to_bits(), "value {n:e}");
        }
    }

    #[test]
    fn test_signed_zero_round_trips() {
        assert_round_trips(0.0);
        assert_round_trips(-0.0);
        assert!(Value::number(-0.0).as_number().unwrap().is_sign_negative());
    }

    #[test]
    fn test_extremes_round_trip() {
        for n in [
            f64::MAX,
            f64::MIN,
            f64::MIN_POSITIVE,
            f64::EPSILON,
            f64::INFINITY,
            f64::NEG_INFINITY,
            f64::from_bits(1),
            -f64::from_bits(1),
        ] {
            assert_round_trips(n);
        }
    }

    #[test]
    fn test_bit_pattern_sweep_round_trips() {
        // Walk the whole exponent range with assorted mantissas and both signs.
        let mut bits: u64 = 0x0123_4567_89AB_CDEF;
        for _ in 0..20_000 {
            bits = bits
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            assert_round_trips(f64::from_bits(bits));
        }
    }

    #[test]
    fn test_every_nan_payload_stays_nan() {
        for payload in [1u64, 0x8_0000_0000_0000, 0xF_FFFF_FFFF_FFFF, 0x1234] {
            for sign in [0u64, 1 << 63] {
                let nan = f64::from_bits(sign | 0x7FF0_0000_0000_0000 | payload);
                assert!(nan.is_nan());
                let value = Value::number(nan);
                assert!(value.is_number());
                assert!(!value.is_cell());
                assert!(value.as_number().unwrap().is_nan());
            }
        }
    }
}

#[cfg(test)]
mod value_display_tests {
    use super::*;

    #[test]
    fn test_display_primitives() {
        assert_eq!(Value::undefined().to_string(), "undefined");
        assert_eq!(Value::null().to_string(), "null");
        assert_eq!(Value::boolean(true).to_string(), "true");
        assert_eq!(Value::number(2.5).to_string(), "2.5");
        assert_eq!(Value::number(f64::NAN).to_string(), "NaN");
    }

    #[test]
    fn test_debug_shows_kind() {
        assert_eq!(format!("{:?}", Value::number(1.0)), "Number(1.0)");
        assert_eq!(format!("{:?}", Value::null()), "Null");
    }
}
