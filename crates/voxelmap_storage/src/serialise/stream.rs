//! Little-endian primitive readers and writers for the map stream.

use std::io::{self, Read, Write};

use crate::error::SerialiseError;

macro_rules! impl_primitive {
    ($write:ident, $read:ident, $t:ty) => {
        pub fn $write(writer: &mut impl Write, value: $t) -> io::Result<()> {
            writer.write_all(&value.to_le_bytes())
        }

        pub fn $read(reader: &mut impl Read) -> io::Result<$t> {
            let mut bytes = [0u8; core::mem::size_of::<$t>()];
            reader.read_exact(&mut bytes)?;
            Ok(<$t>::from_le_bytes(bytes))
        }
    };
}

impl_primitive!(write_u8, read_u8, u8);
impl_primitive!(write_u16, read_u16, u16);
impl_primitive!(write_u32, read_u32, u32);
impl_primitive!(write_u64, read_u64, u64);
impl_primitive!(write_i32, read_i32, i32);
impl_primitive!(write_i64, read_i64, i64);
impl_primitive!(write_f32, read_f32, f32);
impl_primitive!(write_f64, read_f64, f64);

/// Strings are a `u32` byte length followed by UTF-8 bytes.
pub fn write_string(writer: &mut impl Write, value: &str) -> Result<(), SerialiseError> {
    let length = u32::try_from(value.len()).map_err(|_| SerialiseError::ValueOverflow)?;
    write_u32(writer, length)?;
    writer.write_all(value.as_bytes())?;
    Ok(())
}

pub fn read_string(reader: &mut impl Read) -> Result<String, SerialiseError> {
    // A generous cap; anything larger is a corrupt stream, not a real name.
    const MAX_STRING_BYTES: u32 = 1 << 20;

    let length = read_u32(reader)?;
    if length > MAX_STRING_BYTES {
        return Err(SerialiseError::FormatMismatch(format!(
            "string length {} exceeds the stream limit",
            length
        )));
    }
    let mut bytes = vec![0u8; length as usize];
    reader.read_exact(&mut bytes)?;
    String::from_utf8(bytes)
        .map_err(|_| SerialiseError::FormatMismatch("string is not valid UTF-8".to_owned()))
}

// ████████╗███████╗███████╗████████╗███████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝
//    ██║   █████╗  ███████╗   ██║   ███████╗
//    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║
//    ██║   ███████╗███████║   ██║   ███████║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_round_trip() {
        let mut bytes = Vec::new();
        write_u32(&mut bytes, 0xDEAD_BEEF).unwrap();
        write_f64(&mut bytes, -0.125).unwrap();
        write_i32(&mut bytes, -42).unwrap();

        let mut reader = bytes.as_slice();
        assert_eq!(read_u32(&mut reader).unwrap(), 0xDEAD_BEEF);
        assert_eq!(read_f64(&mut reader).unwrap(), -0.125);
        assert_eq!(read_i32(&mut reader).unwrap(), -42);
    }

    #[test]
    fn strings_round_trip() {
        let mut bytes = Vec::new();
        write_string(&mut bytes, "occupancy").unwrap();
        let mut reader = bytes.as_slice();
        assert_eq!(read_string(&mut reader).unwrap(), "occupancy");
    }

    #[test]
    fn oversized_strings_are_rejected() {
        let mut bytes = Vec::new();
        write_u32(&mut bytes, u32::MAX).unwrap();
        assert!(matches!(
            read_string(&mut bytes.as_slice()),
            Err(SerialiseError::FormatMismatch(_))
        ));
    }
}
