//! Typed access to stored strings.
//!
//! The store only ever holds strings. [`Stringable`] is the conversion used by
//! [`Store::get_as`](crate::Store::get_as) and
//! [`Store::set_as`](crate::Store::set_as).

use crate::{Error, Result};

/// A type that can be written as a stored value and parsed back.
pub trait Stringable: Sized {
    /// Renders the value for storage.
    fn to_stored(&self) -> String;

    /// Parses a stored value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conversion`] if `s` is not a valid representation.
    fn from_stored(s: &str) -> Result<Self>;
}

impl Stringable for String {
    fn to_stored(&self) -> String {
        self.clone()
    }

    fn from_stored(s: &str) -> Result<Self> {
        Ok(s.to_string())
    }
}

macro_rules! impl_stringable_via_from_str {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Stringable for $ty {
                fn to_stored(&self) -> String {
                    self.to_string()
                }

                fn from_stored(s: &str) -> Result<Self> {
                    s.trim().parse().map_err(|_| Error::Conversion {
                        value: s.to_string(),
                        target: stringify!($ty),
                    })
                }
            }
        )*
    };
}

impl_stringable_via_from_str!(
    bool, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64,
);
