use std::fmt::Debug;

/// A register of the debug port or an access port.
pub trait Register: Clone + From<u32> + Into<u32> + Sized + Debug {
    /// The address of the register, relative to the bank it lives in.
    const ADDRESS: u8;
    /// The name used in logs and errors.
    const NAME: &'static str;
}

/// Implements the raw value conversions and [`Register`] for a register newtype.
macro_rules! impl_register {
    ($name:ident, $address:expr, $register_name:expr) => {
        impl From<u32> for $name {
            fn from(raw: u32) -> Self {
                $name(raw)
            }
        }

        impl From<$name> for u32 {
            fn from(raw: $name) -> Self {
                raw.0
            }
        }

        impl $crate::architecture::arm::communication_interface::Register for $name {
            const ADDRESS: u8 = $address;
            const NAME: &'static str = $register_name;
        }
    };
}

pub(crate) use impl_register;
