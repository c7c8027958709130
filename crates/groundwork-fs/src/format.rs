use crate::{io_at, FsError};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use xz2::read::XzDecoder;

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const XZ_MAGIC: &[u8] = &[0xfd, b'7', b'z', b'X', b'Z', 0x00];
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const ZIP_EMPTY_MAGIC: &[u8] = b"PK\x05\x06";
const BZIP2_MAGIC: &[u8] = b"BZh";
const ZSTD_MAGIC: &[u8] = &[0x28, 0xb5, 0x2f, 0xfd];
const USTAR_OFFSET: usize = 257;
const USTAR_MAGIC: &[u8] = b"ustar";

/// Container formats the extractor can unpack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Tar,
    TarGz,
    TarXz,
}

impl ArchiveFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tar => "tar",
            Self::TarGz => "tar+gzip",
            Self::TarXz => "tar+xz",
        }
    }

    /// Wrap `file` in the decompressor this format needs.
    pub fn reader(self, file: File) -> Box<dyn Read> {
        let buffered = BufReader::new(file);
        match self {
            Self::Tar => Box::new(buffered),
            Self::TarGz => Box::new(GzDecoder::new(buffered)),
            Self::TarXz => Box::new(XzDecoder::new(buffered)),
        }
    }
}

/// Identify an archive by its leading bytes. The file name is never consulted.
pub fn sniff_format(path: &Path) -> Result<ArchiveFormat, FsError> {
    let file = File::open(path).map_err(io_at(path))?;
    let mut header = Vec::with_capacity(512);
    file.take(512)
        .read_to_end(&mut header)
        .map_err(io_at(path))?;
    classify(&header)
}

pub fn classify(header: &[u8]) -> Result<ArchiveFormat, FsError> {
    if header.starts_with(GZIP_MAGIC) {
        return Ok(ArchiveFormat::TarGz);
    }
    if header.starts_with(XZ_MAGIC) {
        return Ok(ArchiveFormat::TarXz);
    }
    if header.len() >= USTAR_OFFSET + USTAR_MAGIC.len()
        && &header[USTAR_OFFSET..USTAR_OFFSET + USTAR_MAGIC.len()] == USTAR_MAGIC
    {
        return Ok(ArchiveFormat::Tar);
    }
    let detected = if header.starts_with(ZIP_MAGIC) || header.starts_with(ZIP_EMPTY_MAGIC) {
        "zip"
    } else if header.starts_with(BZIP2_MAGIC) {
        "bzip2"
    } else if header.starts_with(ZSTD_MAGIC) {
        "zstd"
    } else if header.is_empty() {
        "empty file"
    } else {
        "unrecognized content"
    };
    Err(FsError::UnsupportedFormat(detected.to_owned()))
}
