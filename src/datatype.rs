//! Typed access to dynamically typed wire values.
//!
//! [`SignalDatatype`] ties a Rust type to the [`ExpectedType`] checked at
//! connect time and to conversions from and into [`DevValue`].

use crate::client::{DevState, DevValue};
use crate::descriptor::ExpectedType;

/// A Rust type a transport value can be read as and written from.
pub trait SignalDatatype: Sized + Send + 'static {
    /// Expectation checked against the server metadata.
    fn expected_type() -> ExpectedType;

    /// Convert a wire value, `None` if it has another type.
    fn from_value(value: &DevValue) -> Option<Self>;

    /// Convert into a wire value.
    fn into_value(self) -> DevValue;
}

impl SignalDatatype for i64 {
    fn expected_type() -> ExpectedType {
        ExpectedType::Integer
    }

    fn from_value(value: &DevValue) -> Option<Self> {
        value.as_i64()
    }

    fn into_value(self) -> DevValue {
        DevValue::Int(self)
    }
}

impl SignalDatatype for f64 {
    fn expected_type() -> ExpectedType {
        ExpectedType::Float
    }

    fn from_value(value: &DevValue) -> Option<Self> {
        match value {
            DevValue::Float(x) => Some(*x),
            DevValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    fn into_value(self) -> DevValue {
        DevValue::Float(self)
    }
}

impl SignalDatatype for bool {
    fn expected_type() -> ExpectedType {
        ExpectedType::Bool
    }

    fn from_value(value: &DevValue) -> Option<Self> {
        match value {
            DevValue::Bool(b) => Some(*b),
            DevValue::Int(0) => Some(false),
            DevValue::Int(1) => Some(true),
            _ => None,
        }
    }

    fn into_value(self) -> DevValue {
        DevValue::Bool(self)
    }
}

impl SignalDatatype for String {
    fn expected_type() -> ExpectedType {
        ExpectedType::String
    }

    fn from_value(value: &DevValue) -> Option<Self> {
        match value {
            DevValue::String(s) => Some(s.clone()),
            _ => None,
        }
    }

    fn into_value(self) -> DevValue {
        DevValue::String(self)
    }
}

impl SignalDatatype for DevState {
    fn expected_type() -> ExpectedType {
        ExpectedType::State
    }

    fn from_value(value: &DevValue) -> Option<Self> {
        match value {
            DevValue::State(state) => Some(*state),
            DevValue::String(name) => DevState::from_name(name),
            _ => None,
        }
    }

    fn into_value(self) -> DevValue {
        DevValue::State(self)
    }
}

impl<T: SignalDatatype> SignalDatatype for Vec<T> {
    fn expected_type() -> ExpectedType {
        ExpectedType::array_of(T::expected_type())
    }

    fn from_value(value: &DevValue) -> Option<Self> {
        value.as_array()?.iter().map(T::from_value).collect()
    }

    fn into_value(self) -> DevValue {
        DevValue::Array(self.into_iter().map(T::into_value).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_types() {
        assert_eq!(i64::expected_type(), ExpectedType::Integer);
        assert_eq!(
            <Vec<Vec<f64>>>::expected_type(),
            ExpectedType::array_of(ExpectedType::array_of(ExpectedType::Float))
        );
        assert_eq!(<Vec<String>>::expected_type().depth(), 1);
    }

    #[test]
    fn test_conversions() {
        assert_eq!(i64::from_value(&DevValue::Bool(true)), Some(1));
        assert_eq!(f64::from_value(&DevValue::Int(2)), Some(2.0));
        assert_eq!(bool::from_value(&DevValue::Int(3)), None);
        assert_eq!(String::from_value(&DevValue::Int(3)), None);
        assert_eq!(DevState::from_value(&DevValue::from("moving")), Some(DevState::Moving));

        let image = DevValue::from(vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        assert_eq!(
            <Vec<Vec<f64>>>::from_value(&image),
            Some(vec![vec![1.0, 2.0], vec![3.0, 4.0]])
        );
        assert_eq!(<Vec<i64>>::from_value(&image), None);
        assert_eq!(vec![true, false].into_value(), DevValue::from(vec![true, false]));
    }
}
