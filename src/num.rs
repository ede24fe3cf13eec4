use alloy::primitives::U256;
use fastnum::{
    bint,
    decimal::{Context, RoundingMode, UnsignedDecimal},
};

/// Converts token amounts between base units, as stored on chain, and unit
/// amounts given the token's number of decimals.
#[derive(Clone, Copy, Debug, Default)]
pub struct Converter {
    decimals: u8,
}

impl Converter {
    pub fn new(decimals: u8) -> Self {
        Self { decimals }
    }

    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    /// Unit amount of `value` base units, `None` if it does not fit `N` words.
    pub fn to_unit_amount<const N: usize>(&self, value: U256) -> Option<UnsignedDecimal<N>> {
        let unscaled = bint::UInt::<N>::from_le_slice(value.as_le_slice())?;
        Some(UnsignedDecimal::<N>::from_parts(
            unscaled,
            -i32::from(self.decimals),
            Context::default().with_rounding_mode(RoundingMode::Floor),
        ))
    }

    /// Base units of a unit amount, truncating digits beyond the token's
    /// precision. `None` if the result does not fit `U256`.
    pub fn to_base_unit_amount<const N: usize>(&self, value: UnsignedDecimal<N>) -> Option<U256> {
        let rescaled = value
            .with_rounding_mode(RoundingMode::Floor)
            .rescale(i16::from(self.decimals));
        U256::try_from_le_slice(rescaled.digits().to_radix_le(256).as_slice())
    }
}

#[cfg(test)]
mod tests {
    use fastnum::{udec128, udec256};

    use super::*;

    #[test]
    fn test_to_unit_amount() {
        assert_eq!(
            Converter::new(0).to_unit_amount(U256::from(1234567890)),
            Some(udec256!(1234567890))
        );
        assert_eq!(
            Converter::new(6).to_unit_amount(U256::from(1234567890)),
            Some(udec256!(1234.56789))
        );
        assert_eq!(
            Converter::new(18).to_unit_amount(U256::from(1_500_000_000_000_000_000u64)),
            Some(udec256!(1.5))
        );
    }

    #[test]
    fn test_to_unit_amount_does_not_fit() {
        assert_eq!(Converter::new(18).to_unit_amount::<2>(U256::MAX), None);
        assert!(Converter::new(18).to_unit_amount::<4>(U256::MAX).is_some());
    }

    #[test]
    fn test_to_base_unit_amount() {
        assert_eq!(
            Converter::new(0).to_base_unit_amount(udec256!(1234567890)),
            Some(U256::from(1234567890))
        );
        assert_eq!(
            Converter::new(6).to_base_unit_amount(udec256!(1234.56789)),
            Some(U256::from(1234567890))
        );
        assert_eq!(
            Converter::new(18).to_base_unit_amount(udec128!(0.25)),
            Some(U256::from(250_000_000_000_000_000u64))
        );
    }
}
