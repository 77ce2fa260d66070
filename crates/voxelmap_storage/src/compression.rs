//! Byte-stream compression backends for voxel blocks.
//!
//! Compression is opaque to everything above the block layer: a compress/decompress round trip
//! preserves the buffer bytes exactly.

use std::io;

/// A compression algorithm that reads a stream of bytes.
pub trait BytesCompression {
    fn compress_bytes(
        &self,
        bytes: impl io::Read,
        compressed_bytes: impl io::Write,
    ) -> io::Result<()>;

    fn decompress_bytes(
        &self,
        compressed_bytes: impl io::Read,
        bytes: impl io::Write,
    ) -> io::Result<()>;
}

/// The [LZ4 compression algorithm](https://en.wikipedia.org/wiki/LZ4_(compression_algorithm)).
#[cfg(feature = "lz4")]
#[derive(Clone, Copy, Debug)]
pub struct Lz4 {
    /// The compression level, from 0 to 10. 0 is fastest and least aggressive. 10 is slowest and
    /// most aggressive.
    pub level: u32,
}

#[cfg(feature = "lz4")]
impl Default for Lz4 {
    fn default() -> Self {
        Self { level: 4 }
    }
}

#[cfg(feature = "lz4")]
impl BytesCompression for Lz4 {
    fn compress_bytes(
        &self,
        mut bytes: impl io::Read,
        compressed_bytes: impl io::Write,
    ) -> io::Result<()> {
        let mut encoder = lz4::EncoderBuilder::new()
            .level(self.level)
            .build(compressed_bytes)?;
        io::copy(&mut bytes, &mut encoder)?;
        let (_output, result) = encoder.finish();

        result
    }

    fn decompress_bytes(
        &self,
        compressed_bytes: impl io::Read,
        mut bytes: impl io::Write,
    ) -> io::Result<()> {
        let mut decoder = lz4::Decoder::new(compressed_bytes)?;
        io::copy(&mut decoder, &mut bytes)?;
        Ok(())
    }
}

/// The [Snappy compression algorithm](https://en.wikipedia.org/wiki/Snappy_(compression)).
/// Uses the framed format.
#[cfg(feature = "snap")]
#[derive(Clone, Copy, Debug, Default)]
pub struct Snappy;

#[cfg(feature = "snap")]
impl BytesCompression for Snappy {
    fn compress_bytes(
        &self,
        mut bytes: impl io::Read,
        compressed_bytes: impl io::Write,
    ) -> io::Result<()> {
        let mut encoder = snap::write::FrameEncoder::new(compressed_bytes);
        io::copy(&mut bytes, &mut encoder)?;
        encoder.into_inner().expect("failed to flush the frame encoder");
        Ok(())
    }

    fn decompress_bytes(
        &self,
        compressed_bytes: impl io::Read,
        mut bytes: impl io::Write,
    ) -> io::Result<()> {
        let mut decoder = snap::read::FrameDecoder::new(compressed_bytes);
        io::copy(&mut decoder, &mut bytes)?;
        Ok(())
    }
}

/// The backend a map's voxel blocks compress with. Dispatches to whichever algorithms are
/// compiled in.
#[derive(Clone, Copy, Debug)]
pub enum CompressionBackend {
    #[cfg(feature = "lz4")]
    Lz4(Lz4),
    #[cfg(feature = "snap")]
    Snappy(Snappy),
}

impl CompressionBackend {
    /// The preferred backend for this build, or `None` when no compression feature is enabled.
    pub fn preferred() -> Option<Self> {
        #[cfg(feature = "lz4")]
        {
            return Some(Self::Lz4(Lz4::default()));
        }
        #[cfg(all(not(feature = "lz4"), feature = "snap"))]
        {
            return Some(Self::Snappy(Snappy));
        }
        #[allow(unreachable_code)]
        None
    }
}

impl BytesCompression for CompressionBackend {
    fn compress_bytes(
        &self,
        bytes: impl io::Read,
        compressed_bytes: impl io::Write,
    ) -> io::Result<()> {
        match self {
            #[cfg(feature = "lz4")]
            Self::Lz4(lz4) => lz4.compress_bytes(bytes, compressed_bytes),
            #[cfg(feature = "snap")]
            Self::Snappy(snappy) => snappy.compress_bytes(bytes, compressed_bytes),
            #[allow(unreachable_patterns)]
            _ => Ok(()),
        }
    }

    fn decompress_bytes(
        &self,
        compressed_bytes: impl io::Read,
        bytes: impl io::Write,
    ) -> io::Result<()> {
        match self {
            #[cfg(feature = "lz4")]
            Self::Lz4(lz4) => lz4.decompress_bytes(compressed_bytes, bytes),
            #[cfg(feature = "snap")]
            Self::Snappy(snappy) => snappy.decompress_bytes(compressed_bytes, bytes),
            #[allow(unreachable_patterns)]
            _ => Ok(()),
        }
    }
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

    #[cfg(feature = "lz4")]
    #[test]
    fn lz4_round_trip_preserves_bytes() {
        let bytes: Vec<u8> = (0u8..=255).cycle().take(4096).collect();

        let mut compressed_bytes = Vec::new();
        Lz4 { level: 10 }
            .compress_bytes(bytes.as_slice(), &mut compressed_bytes)
            .unwrap();
        let mut decompressed_bytes = Vec::new();
        Lz4 { level: 10 }
            .decompress_bytes(compressed_bytes.as_slice(), &mut decompressed_bytes)
            .unwrap();

        assert_eq!(bytes, decompressed_bytes);
    }

    #[cfg(feature = "snap")]
    #[test]
    fn snappy_round_trip_preserves_bytes() {
        let bytes: Vec<u8> = (0u8..100).collect();

        let mut compressed_bytes = Vec::new();
        Snappy
            .compress_bytes(bytes.as_slice(), &mut compressed_bytes)
            .unwrap();
        let mut decompressed_bytes = Vec::new();
        Snappy
            .decompress_bytes(compressed_bytes.as_slice(), &mut decompressed_bytes)
            .unwrap();

        assert_eq!(bytes, decompressed_bytes);
    }
}
