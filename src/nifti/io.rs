//! NIfTI I/O for the batch statistics engine.
//!
//! - Memory-mapped reading for uncompressed `.nii`
//! - Single-shot libdeflate decode for `.nii.gz`, sized from the gzip ISIZE
//!   trailer, with a streaming flate2 fallback for multi-member streams
//! - A typed "missing" outcome ([`load_if_present`]) so absent maps are
//!   distinguishable from corrupt ones
//!
//! Every load is self-contained: no decompression cache is kept across calls,
//! so repeated invocations are reproducible from on-disk state alone.

use super::header::{Endianness, NiftiHeader};
use super::image::NiftiImage;
use crate::error::{Error, Result};
use flate2::bufread::{GzDecoder, MultiGzDecoder};
use libdeflater::{DecompressionError, Decompressor};
use memmap2::Mmap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;

thread_local! {
    static DECOMPRESSOR: std::cell::RefCell<Decompressor> =
        std::cell::RefCell::new(Decompressor::new());
}

const GZIP_BUFFER_SIZE: usize = 256 * 1024;

#[cfg(target_os = "linux")]
#[allow(unsafe_code)]
fn read_file_with_readahead(path: &Path) -> Result<Vec<u8>> {
    use std::os::unix::io::AsRawFd;

    let file = File::open(path)?;
    let fd = file.as_raw_fd();
    let metadata = file.metadata()?;
    let len = metadata.len() as usize;

    // POSIX_FADV_SEQUENTIAL = 2, hint that we'll read sequentially
    unsafe {
        libc::posix_fadvise(fd, 0, len as libc::off_t, libc::POSIX_FADV_SEQUENTIAL);
    }

    let mut buffer = Vec::with_capacity(len);
    let mut reader = BufReader::with_capacity(GZIP_BUFFER_SIZE, file);
    reader.read_to_end(&mut buffer)?;
    Ok(buffer)
}

#[cfg(not(target_os = "linux"))]
fn read_file_with_readahead(path: &Path) -> Result<Vec<u8>> {
    Ok(std::fs::read(path)?)
}

fn is_gzipped(path: &Path) -> bool {
    path.extension().is_some_and(|e| e == "gz")
}

fn estimate_gzip_uncompressed_size(compressed: &[u8]) -> usize {
    // ISIZE per RFC 1952: "original input size modulo 2^32"
    // This is only reliable for single-member gzip < 4GB.
    if compressed.len() >= 4 {
        let trailer = &compressed[compressed.len() - 4..];
        u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]) as usize
    } else {
        compressed.len() * 4
    }
}

fn decompress_gzip_streaming(compressed: &[u8]) -> Result<Vec<u8>> {
    let cursor = std::io::Cursor::new(compressed);
    let mut decoder = MultiGzDecoder::new(BufReader::with_capacity(GZIP_BUFFER_SIZE, cursor));

    let estimated = estimate_gzip_uncompressed_size(compressed);
    let mut output = Vec::with_capacity(estimated);

    decoder
        .read_to_end(&mut output)
        .map_err(|e| Error::Decompression(format!("gzip stream decode failed: {e}")))?;
    Ok(output)
}

fn decompress_gzip_with_fallback(compressed: &[u8]) -> Result<(Vec<u8>, bool)> {
    let estimated_size = estimate_gzip_uncompressed_size(compressed);
    let buffer_size = estimated_size.max(NiftiHeader::SIZE);

    let mut output = vec![0u8; buffer_size];
    let result = DECOMPRESSOR.with(|d| d.borrow_mut().gzip_decompress(compressed, &mut output));

    match result {
        Ok(written) => {
            output.truncate(written);
            Ok((output, false))
        }
        Err(DecompressionError::InsufficientSpace) => {
            drop(output);
            let output = decompress_gzip_streaming(compressed)?;
            Ok((output, true))
        }
        Err(e) => Err(Error::Decompression(format!("{e}"))),
    }
}

fn ensure_no_extensions(bytes: &[u8], header: &NiftiHeader) -> Result<()> {
    let header_size = header.header_size();
    let vox_offset = header.vox_offset as usize;
    if vox_offset >= header_size + 4 && bytes.len() >= header_size + 4 {
        let extension_flag = bytes[header_size];
        if extension_flag != 0 {
            return Err(Error::InvalidFileFormat(
                "NIfTI extensions are not supported".to_string(),
            ));
        }
    }
    Ok(())
}

fn parse_decompressed_nifti(bytes: &[u8]) -> Result<(NiftiHeader, usize, usize)> {
    if bytes.len() < NiftiHeader::SIZE {
        return Err(Error::Decompression(format!(
            "decompressed data too small for NIfTI header: {} bytes (need at least {})",
            bytes.len(),
            NiftiHeader::SIZE
        )));
    }
    let header = NiftiHeader::from_bytes(bytes)?;
    ensure_no_extensions(bytes, &header)?;
    let offset = header.vox_offset as usize;
    let data_size = header.data_size();
    Ok((header, offset, data_size))
}

/// Load a volumetric map from file.
///
/// Supports `.nii` and `.nii.gz` with automatic detection. All failures,
/// including a missing file, are errors; batch callers that want to treat
/// absence as a recoverable outcome use [`load_if_present`].
#[must_use = "this function returns a loaded image that should be used"]
pub fn load<P: AsRef<Path>>(path: P) -> Result<NiftiImage> {
    let path = path.as_ref();
    if is_gzipped(path) {
        load_gzipped(path)
    } else {
        load_uncompressed(path)
    }
}

/// Load a map, mapping a nonexistent path to `Ok(None)`.
///
/// Only `io::ErrorKind::NotFound` is treated as "missing"; corrupt or
/// unreadable files still fail, so genuine damage is never downgraded to
/// absence.
pub fn load_if_present<P: AsRef<Path>>(path: P) -> Result<Option<NiftiImage>> {
    match load(path) {
        Ok(img) => Ok(Some(img)),
        Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Load uncompressed .nii file using memory mapping for speed.
#[allow(unsafe_code)]
fn load_uncompressed(path: &Path) -> Result<NiftiImage> {
    let file = File::open(path)?;
    // SAFETY: Memory mapping is safe because:
    // 1. The file was just opened successfully
    // 2. The mmap is read-only and won't be modified
    // 3. If the file is modified externally, data may become inconsistent but no UB
    let mmap = unsafe { Mmap::map(&file)? };

    let header = NiftiHeader::from_bytes(&mmap)?;
    ensure_no_extensions(&mmap[..], &header)?;
    let offset = header.vox_offset as usize;
    let data_size = header.data_size();

    if mmap.len() < offset + data_size {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "file truncated",
        )));
    }

    let arc = Arc::new(mmap);
    Ok(NiftiImage::from_shared_mmap(header, arc, offset, data_size))
}

/// Load gzipped .nii.gz file with single-pass decompression.
///
/// Reads the uncompressed size from the gzip trailer, allocates once,
/// decompresses with libdeflate, then parses the header from the decompressed
/// buffer. Falls back to streaming decode if ISIZE is insufficient
/// (multi-member gzip or payloads > 4GB).
fn load_gzipped(path: &Path) -> Result<NiftiImage> {
    let compressed = read_file_with_readahead(path)?;
    let (mut output, used_streaming) = decompress_gzip_with_fallback(&compressed)?;
    let mut written = output.len();

    let (mut header, mut offset, mut data_size) = parse_decompressed_nifti(&output)?;
    let mut expected_size = offset + data_size;

    if written != expected_size {
        if used_streaming {
            return Err(Error::Decompression(format!(
                "decompressed size {} did not match expected {} (header offset {} + data size {})",
                written, expected_size, offset, data_size
            )));
        }

        output = decompress_gzip_streaming(&compressed)?;
        written = output.len();
        let parsed = parse_decompressed_nifti(&output)?;
        header = parsed.0;
        offset = parsed.1;
        data_size = parsed.2;
        expected_size = offset + data_size;

        if written != expected_size {
            return Err(Error::Decompression(format!(
                "decompressed size {} did not match expected {} (header offset {} + data size {})",
                written, expected_size, offset, data_size
            )));
        }
    }

    let bytes = Arc::new(output);
    Ok(NiftiImage::from_shared_bytes(
        header, bytes, offset, data_size,
    ))
}

/// Load only the header from a NIfTI file (fast metadata inspection).
#[allow(unsafe_code)]
pub fn load_header<P: AsRef<Path>>(path: P) -> Result<NiftiHeader> {
    let path = path.as_ref();

    if is_gzipped(path) {
        let file = File::open(path)?;
        let buf_reader = BufReader::new(file);
        let decoder = GzDecoder::new(buf_reader);
        // 540 bytes covers the larger NIfTI-2 header; version detection
        // happens inside from_bytes
        let mut header_buf = Vec::with_capacity(540);
        decoder
            .take(540)
            .read_to_end(&mut header_buf)
            .map_err(|e| Error::Decompression(format!("gzip header decode failed: {e}")))?;
        NiftiHeader::from_bytes(&header_buf)
    } else {
        let file = File::open(path)?;
        // SAFETY: Memory mapping is safe - file just opened, read-only access
        let mmap = unsafe { Mmap::map(&file)? };
        NiftiHeader::from_bytes(&mmap)
    }
}

/// Save a volumetric map to file.
///
/// Format is determined by the extension (`.nii` or `.nii.gz`). This is the
/// fixture/round-trip writer; it only emits little-endian NIfTI-1.
pub fn save<P: AsRef<Path>>(image: &NiftiImage, path: P) -> Result<()> {
    image.header().validate()?;
    if image.header().endianness != Endianness::Little {
        return Err(Error::InvalidFileFormat(
            "only little-endian images can be written".to_string(),
        ));
    }

    let path = path.as_ref();
    if is_gzipped(path) {
        save_gzipped(image, path)
    } else {
        save_uncompressed(image, path)
    }
}

fn serialize_nifti(image: &NiftiImage) -> Result<Vec<u8>> {
    let header_bytes = image.header().to_bytes();
    let padding = image.header().vox_offset as usize - NiftiHeader::SIZE;
    let data = image.data_to_bytes()?;

    let mut out = Vec::with_capacity(header_bytes.len() + padding + data.len());
    out.extend_from_slice(&header_bytes);
    out.resize(out.len() + padding, 0u8);
    out.extend_from_slice(&data);
    Ok(out)
}

fn save_uncompressed(image: &NiftiImage, path: &Path) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::with_capacity(1024 * 1024, file);
    writer.write_all(&serialize_nifti(image)?)?;
    writer.flush()?;
    Ok(())
}

fn save_gzipped(image: &NiftiImage, path: &Path) -> Result<()> {
    let uncompressed = serialize_nifti(image)?;

    // Level 1 = fastest, good balance of speed vs compression ratio
    let mut compressor = libdeflater::Compressor::new(libdeflater::CompressionLvl::fastest());
    let max_compressed_size = compressor.gzip_compress_bound(uncompressed.len());
    let mut compressed = vec![0u8; max_compressed_size];

    let actual_size = compressor
        .gzip_compress(&uncompressed, &mut compressed)
        .map_err(|e| Error::Io(std::io::Error::other(format!("compression failed: {e:?}"))))?;
    compressed.truncate(actual_size);

    let mut file = File::create(path)?;
    file.write_all(&compressed)?;
    Ok(())
}
