//! Leaf codecs
//!
//! A codec owns the complete byte representation of a leaf class. The
//! default [`SerdeCodec`] stores values with bincode (fixed-width integers,
//! selectable endianness) and renders them as JSON for text round trips.

use core::marker::PhantomData;

use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::class::{Class, Reflected};
use crate::error::{ReflectError, Result};

/// Byte-level storage contract of a leaf class
pub trait Codec: Send + Sync {
    /// Append the binary form of `value` to `out`, returning the bytes written
    fn save(&self, value: &dyn Reflected, out: &mut Vec<u8>, big_endian: bool) -> Result<usize>;

    /// Overwrite `value` from binary data stored at `version`
    fn load(
        &self,
        value: &mut dyn Reflected,
        input: &[u8],
        version: u32,
        big_endian: bool,
    ) -> Result<()>;

    /// Render binary data as human-readable text
    fn data_to_text(&self, input: &[u8], big_endian: bool) -> Result<String>;

    /// Parse human-readable text into binary data
    fn text_to_data(&self, text: &str, big_endian: bool) -> Result<Vec<u8>>;

    /// Value equality used when diffing
    fn compare_value_data(&self, a: &dyn Reflected, b: &dyn Reflected) -> bool;

    /// In-memory assignment `dst = src`
    fn copy(&self, src: &dyn Reflected, dst: &mut dyn Reflected) -> Result<()>;
}

/// Encode a value with the stream's bincode options
pub fn encode<T: Serialize + ?Sized>(value: &T, big_endian: bool) -> Result<Vec<u8>> {
    let options = bincode::DefaultOptions::new().with_fixint_encoding();
    let bytes = if big_endian {
        options.with_big_endian().serialize(value)?
    } else {
        options.with_little_endian().serialize(value)?
    };
    Ok(bytes)
}

/// Decode a value with the stream's bincode options
pub fn decode<T: DeserializeOwned>(input: &[u8], big_endian: bool) -> Result<T> {
    let options = bincode::DefaultOptions::new().with_fixint_encoding();
    let value = if big_endian {
        options.with_big_endian().deserialize(input)?
    } else {
        options.with_little_endian().deserialize(input)?
    };
    Ok(value)
}

/// Codec for any serde-capable leaf class
pub struct SerdeCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> SerdeCodec<T> {
    pub const fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for SerdeCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SerdeCodec<T>
where
    T: Class,
{
    fn typed<'a>(&self, value: &'a dyn Reflected) -> Result<&'a T> {
        value.downcast_ref::<T>().ok_or_else(|| ReflectError::ClassMismatch {
            expected: T::CLASS_ID,
            found: value.class_id(),
        })
    }

    fn typed_mut<'a>(&self, value: &'a mut dyn Reflected) -> Result<&'a mut T> {
        let found = value.class_id();
        value.downcast_mut::<T>().ok_or(ReflectError::ClassMismatch {
            expected: T::CLASS_ID,
            found,
        })
    }
}

impl<T> Codec for SerdeCodec<T>
where
    T: Class + Clone + PartialEq + Serialize + DeserializeOwned,
{
    fn save(&self, value: &dyn Reflected, out: &mut Vec<u8>, big_endian: bool) -> Result<usize> {
        let bytes = encode(self.typed(value)?, big_endian)?;
        out.extend_from_slice(&bytes);
        Ok(bytes.len())
    }

    fn load(
        &self,
        value: &mut dyn Reflected,
        input: &[u8],
        _version: u32,
        big_endian: bool,
    ) -> Result<()> {
        *self.typed_mut(value)? = decode::<T>(input, big_endian)?;
        Ok(())
    }

    fn data_to_text(&self, input: &[u8], big_endian: bool) -> Result<String> {
        let value = decode::<T>(input, big_endian)?;
        Ok(serde_json::to_string(&value)?)
    }

    fn text_to_data(&self, text: &str, big_endian: bool) -> Result<Vec<u8>> {
        let value: T = serde_json::from_str(text)?;
        encode(&value, big_endian)
    }

    fn compare_value_data(&self, a: &dyn Reflected, b: &dyn Reflected) -> bool {
        match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    fn copy(&self, src: &dyn Reflected, dst: &mut dyn Reflected) -> Result<()> {
        let value = self.typed(src)?.clone();
        *self.typed_mut(dst)? = value;
        Ok(())
    }
}
