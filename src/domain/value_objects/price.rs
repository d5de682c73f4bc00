use crate::domain::errors::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Price(f64);

impl Price {
    pub fn new(value: f64) -> Result<Self, ValidationError> {
        if !value.is_finite() {
            return Err(ValidationError::MustBeFinite);
        }
        if value < 0.0 {
            return Err(ValidationError::NegativePrice);
        }
        Ok(Price(value))
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    pub fn multiply(&self, factor: f64) -> Result<Price, ValidationError> {
        if !factor.is_finite() {
            return Err(ValidationError::MustBeFinite);
        }
        Price::new(self.0 * factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_new_valid() {
        let price = Price::new(100.0);
        assert!(price.is_ok());
        assert_eq!(price.unwrap().value(), 100.0);
    }

    #[test]
    fn test_price_new_negative() {
        assert!(Price::new(-10.0).is_err());
    }

    #[test]
    fn test_price_new_zero() {
        let price = Price::new(0.0);
        assert!(price.is_ok());
        assert_eq!(price.unwrap().value(), 0.0);
    }

    #[test]
    fn test_price_new_nan() {
        assert!(Price::new(f64::NAN).is_err());
    }

    #[test]
    fn test_price_multiply() {
        let price = Price::new(10.0).unwrap();
        assert_eq!(price.multiply(2.5).unwrap().value(), 25.0);
    }

    #[test]
    fn test_price_multiply_negative_factor() {
        let price = Price::new(10.0).unwrap();
        assert!(price.multiply(-2.0).is_err());
    }
}
