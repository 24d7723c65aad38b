use crate::{CrcCalculatorConfig, CrcError};

/// Reverse all 32 bits of `value`.
#[inline(always)]
pub const fn bit_reverse32(value: u32) -> u32 {
    value.reverse_bits()
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Parameters for one CRC calculation.
///
/// These are copied into the transaction at submission, so the caller is free to reuse them
/// right away.
pub struct CrcParams {
    /// The width of the CRC in bits.
    ///
    /// Only 8, 16 and 32 are supported and the bus of the DMA channel may limit this further.
    pub width: u8,
    pub polynomial: u32,
    pub init_value: u32,
    /// Applied to the result after the optional output reversal.
    pub final_xor_value: u32,
    /// Reverse the bits of every input byte before feeding it to the calculator.
    pub reverse_input: bool,
    /// Reverse the bits of the calculated CRC.
    pub reverse_output: bool,
}
impl CrcParams {
    /// CRC-8 with polynomial 0x07 and no reflection.
    pub const CRC8: Self = Self::new(8, 0x07);
    /// CRC-16/CCITT-FALSE.
    pub const CRC16_CCITT_FALSE: Self = Self::new(16, 0x1021).with_init_value(0xffff);
    /// CRC-32/MPEG-2.
    pub const CRC32_MPEG2: Self = Self::new(32, 0x04c1_1db7).with_init_value(0xffff_ffff);

    /// Parameters with the specified width and polynomial, a zero init value, no final XOR and
    /// no reflection.
    pub const fn new(width: u8, polynomial: u32) -> Self {
        Self {
            width,
            polynomial,
            init_value: 0,
            final_xor_value: 0,
            reverse_input: false,
            reverse_output: false,
        }
    }
    pub const fn with_init_value(mut self, init_value: u32) -> Self {
        self.init_value = init_value;
        self
    }
    pub const fn with_final_xor_value(mut self, final_xor_value: u32) -> Self {
        self.final_xor_value = final_xor_value;
        self
    }
    pub const fn with_reverse_input(mut self, reverse_input: bool) -> Self {
        self.reverse_input = reverse_input;
        self
    }
    pub const fn with_reverse_output(mut self, reverse_output: bool) -> Self {
        self.reverse_output = reverse_output;
        self
    }
    /// Check the width against the widths we know how to post process and the hardware limit.
    pub(crate) fn validate(&self, max_width: u8) -> Result<(), CrcError> {
        if matches!(self.width, 8 | 16 | 32) && self.width <= max_width {
            Ok(())
        } else {
            Err(CrcError::UnsupportedWidth(self.width))
        }
    }
    /// The part of the parameters, that is handled by the calculator itself.
    pub(crate) const fn calculator_config(&self) -> CrcCalculatorConfig {
        CrcCalculatorConfig {
            bit_width: self.width,
            polynomial: self.polynomial,
            init_value: self.init_value,
            reverse_data_mask: self.reverse_input,
        }
    }
    /// Turn the raw value of the result register into the CRC.
    ///
    /// The calculator leaves the CRC right aligned. For the output reversal, all 32 bits are
    /// reversed first and the result is then shifted back down, which is not the same as
    /// reversing the right aligned value.
    pub const fn finalize(&self, raw_result: u32) -> u32 {
        let mut crc_result = raw_result;
        if self.reverse_output {
            crc_result = bit_reverse32(crc_result);
            match self.width {
                8 => crc_result >>= 24,
                16 => crc_result >>= 16,
                _ => {}
            }
        }
        if self.final_xor_value != 0 {
            crc_result ^= self.final_xor_value;
        }
        crc_result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_reversal_reverses_before_shifting() {
        let params = CrcParams::new(8, 0x07).with_reverse_output(true);
        let raw = 0x1234_56b1;
        assert_eq!(params.finalize(raw), bit_reverse32(raw) >> 24);
        assert_eq!(params.finalize(raw), 0x8d);
        assert_ne!(params.finalize(raw), bit_reverse32(raw & 0xff));

        let params = CrcParams::new(16, 0x8005).with_reverse_output(true);
        assert_eq!(params.finalize(0x0000_0001), 0x8000);

        let params = CrcParams::new(32, 0x04c1_1db7).with_reverse_output(true);
        assert_eq!(params.finalize(0x0000_0001), 0x8000_0000);
    }

    #[test]
    fn final_xor_is_applied_after_reversal() {
        let params = CrcParams::new(8, 0x23)
            .with_reverse_output(true)
            .with_final_xor_value(0x1f);
        assert_eq!(params.finalize(0x01), 0x80 ^ 0x1f);

        let params = CrcParams::new(16, 0x1021).with_final_xor_value(0xffff);
        assert_eq!(params.finalize(0x1234), 0xedcb);
        assert_eq!(CrcParams::CRC16_CCITT_FALSE.finalize(0x1234), 0x1234);
    }

    #[test]
    fn width_validation() {
        for width in [8, 16, 32] {
            assert_eq!(CrcParams::new(width, 1).validate(32), Ok(()));
        }
        assert_eq!(
            CrcParams::new(32, 1).validate(16),
            Err(CrcError::UnsupportedWidth(32))
        );
        for width in [0, 1, 7, 12, 24, 33] {
            assert_eq!(
                CrcParams::new(width, 1).validate(32),
                Err(CrcError::UnsupportedWidth(width))
            );
        }
    }

    #[test]
    fn calculator_config_carries_hardware_fields() {
        let params = CrcParams::new(16, 0x8005)
            .with_init_value(0x1234)
            .with_reverse_input(true)
            .with_reverse_output(true)
            .with_final_xor_value(0xabcd);
        let config = params.calculator_config();
        assert_eq!(config.bit_width, 16);
        assert_eq!(config.polynomial, 0x8005);
        assert_eq!(config.init_value, 0x1234);
        assert!(config.reverse_data_mask);
    }
}
