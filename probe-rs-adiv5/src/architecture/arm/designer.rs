//! Designer codes as used throughout the debug port and ROM table code.
//!
//! A JEP-106 identity is stored as one 16 bit value: the continuation code in
//! bits `[11:8]` and the 7 bit identity code in bits `[6:0]`. Legacy
//! components which carry an ASCII vendor code instead have
//! [`ASCII_CODE_FLAG`] set.

use jep106::JEP106Code;

/// Marks a designer code as a legacy ASCII code instead of a JEP-106 identity.
pub const ASCII_CODE_FLAG: u16 = 1 << 15;

/// ARM Ltd.
pub const ARM: u16 = 0x43b;
/// STMicroelectronics.
pub const STM: u16 = 0x020;
/// Atmel, now Microchip.
pub const ATMEL: u16 = 0x01f;
/// Raspberry Pi.
pub const RASPBERRY: u16 = 0x913;

/// Some STM32WX parts report this instead of [`STM`].
pub const ERRATA_STM32WX: u16 = 0x420;
/// Some CS32 clones of STM32F1 report this instead of [`STM`].
pub const ERRATA_CS: u16 = 0x555;

/// Packs the 11 bit designer field of DPIDR and TARGETID.
///
/// The field holds the continuation code in bits `[10:7]` and the identity
/// code in bits `[6:0]`.
pub fn from_designer_field(designer: u16) -> u16 {
    ((designer & 0x780) << 1) | (designer & 0x7f)
}

/// Combine a continuation and identity code.
pub fn from_jep106(continuation: u8, identity: u8) -> u16 {
    (u16::from(continuation & 0xf) << 8) | u16::from(identity & 0x7f)
}

/// The JEP-106 code behind a designer code, `None` for legacy ASCII codes.
pub fn jep106(code: u16) -> Option<JEP106Code> {
    if code & ASCII_CODE_FLAG != 0 {
        return None;
    }
    Some(JEP106Code::new(((code >> 8) & 0xf) as u8, (code & 0x7f) as u8))
}

/// Human readable name for logging.
pub fn name(code: u16) -> &'static str {
    jep106(code).and_then(|c| c.get()).unwrap_or("<unknown>")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn designer_field_repacking() {
        // DPIDR designer field of ARM: continuation 4, identity 0x3b.
        assert_eq!(from_designer_field(0x23b), ARM);
        assert_eq!(from_designer_field(0x493), RASPBERRY);
        assert_eq!(from_jep106(4, 0x3b), ARM);
    }

    #[test]
    fn ascii_codes_have_no_jep106() {
        assert!(jep106(0x41 | ASCII_CODE_FLAG).is_none());
        assert_eq!(jep106(ARM), Some(JEP106Code::new(4, 0x3b)));
    }

    #[test]
    fn names_resolve() {
        assert_ne!(name(ARM), "<unknown>");
        assert_eq!(name(0x41 | ASCII_CODE_FLAG), "<unknown>");
    }
}
