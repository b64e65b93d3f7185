//! `NIfTI` header parsing and representation.
//!
//! Supports both NIfTI-1 (348-byte header) and NIfTI-2 (540-byte header)
//! formats with automatic version detection and endianness handling. Only the
//! fields the statistics engine consumes are materialized: dimensions,
//! datatype, voxel spacing, data offset, and intensity scaling.

use crate::error::{Error, Result};
use byteorder::{BigEndian, ByteOrder, LittleEndian};

/// NIfTI format version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NiftiVersion {
    /// NIfTI-1 format (348-byte header, 16-bit dimensions)
    #[default]
    Nifti1,
    /// NIfTI-2 format (540-byte header, 64-bit dimensions)
    Nifti2,
}

impl NiftiVersion {
    /// Header size in bytes for this version.
    pub const fn header_size(self) -> usize {
        match self {
            Self::Nifti1 => 348,
            Self::Nifti2 => 540,
        }
    }

    /// Default vox_offset for this version (header size + padding).
    pub const fn default_vox_offset(self) -> i64 {
        match self {
            Self::Nifti1 => 352,
            Self::Nifti2 => 544,
        }
    }
}

/// Byte order of the on-disk header and voxel data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endianness {
    /// Little-endian encoding
    #[default]
    Little,
    /// Big-endian encoding
    Big,
}

/// NIfTI-1 header field byte offsets.
mod offsets_v1 {
    pub const SIZEOF_HDR: usize = 0;
    pub const DIM: usize = 40;
    pub const DATATYPE: usize = 70;
    pub const BITPIX: usize = 72;
    pub const PIXDIM: usize = 76;
    pub const VOX_OFFSET: usize = 108;
    pub const SCL_SLOPE: usize = 112;
    pub const SCL_INTER: usize = 116;
    pub const MAGIC: usize = 344;
}

/// NIfTI-2 header field byte offsets.
mod offsets_v2 {
    pub const MAGIC: usize = 4;
    pub const DATATYPE: usize = 12;
    pub const DIM: usize = 16;
    pub const PIXDIM: usize = 104;
    pub const VOX_OFFSET: usize = 168;
    pub const SCL_SLOPE: usize = 176;
    pub const SCL_INTER: usize = 184;
}

/// `NIfTI` data type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum DataType {
    /// Unsigned 8-bit integer
    UInt8 = 2,
    /// Signed 16-bit integer
    Int16 = 4,
    /// Signed 32-bit integer
    Int32 = 8,
    /// 32-bit floating point
    Float32 = 16,
    /// 64-bit floating point
    Float64 = 64,
    /// Signed 8-bit integer
    Int8 = 256,
    /// Unsigned 16-bit integer
    UInt16 = 512,
    /// Unsigned 32-bit integer
    UInt32 = 768,
    /// Signed 64-bit integer
    Int64 = 1024,
    /// Unsigned 64-bit integer
    UInt64 = 1280,
    /// IEEE 754 16-bit floating point (half precision)
    Float16 = 16384,
    /// Brain floating point 16-bit (bfloat16)
    BFloat16 = 16385,
}

impl DataType {
    /// Parse from `NIfTI` datatype code.
    pub fn from_code(code: i16) -> Result<Self> {
        match code {
            2 => Ok(Self::UInt8),
            4 => Ok(Self::Int16),
            8 => Ok(Self::Int32),
            16 => Ok(Self::Float32),
            64 => Ok(Self::Float64),
            256 => Ok(Self::Int8),
            512 => Ok(Self::UInt16),
            768 => Ok(Self::UInt32),
            1024 => Ok(Self::Int64),
            1280 => Ok(Self::UInt64),
            16384 => Ok(Self::Float16),
            16385 => Ok(Self::BFloat16),
            _ => Err(Error::UnsupportedDataType(code)),
        }
    }

    /// The on-disk datatype code.
    pub const fn code(self) -> i16 {
        self as i16
    }

    /// Size of each element in bytes.
    pub const fn byte_size(self) -> usize {
        match self {
            Self::UInt8 | Self::Int8 => 1,
            Self::Int16 | Self::UInt16 | Self::Float16 | Self::BFloat16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Int64 | Self::UInt64 | Self::Float64 => 8,
        }
    }

    /// Size of each element in bytes (alias for consistency).
    pub const fn size(self) -> usize {
        self.byte_size()
    }
}

/// Parsed NIfTI header.
///
/// Dimensions are stored squeezed to `ndim` entries; [`NiftiHeader::shape`]
/// reports them in on-disk (F-order) axis order, so for a 4D series the 4th
/// axis is the series axis.
#[derive(Debug, Clone, PartialEq)]
pub struct NiftiHeader {
    /// Format version the header was read as.
    pub version: NiftiVersion,
    /// Byte order of header and voxel data.
    pub endianness: Endianness,
    /// Number of used dimensions (1-7).
    pub ndim: usize,
    /// Extent of each used dimension.
    pub dim: [u64; 7],
    /// Voxel element type.
    pub datatype: DataType,
    /// Grid spacing per used dimension.
    pub pixdim: [f32; 7],
    /// Byte offset of the voxel data within the file.
    pub vox_offset: i64,
    /// Intensity scaling slope (0 means "no scaling stored").
    pub scl_slope: f32,
    /// Intensity scaling intercept.
    pub scl_inter: f32,
}

impl NiftiHeader {
    /// Size of a NIfTI-1 header in bytes.
    pub const SIZE: usize = 348;

    /// Size in bytes of this header's on-disk representation.
    pub fn header_size(&self) -> usize {
        self.version.header_size()
    }

    /// Shape of the voxel grid, one entry per used dimension.
    pub fn shape(&self) -> Vec<usize> {
        self.dim[..self.ndim].iter().map(|&d| d as usize).collect()
    }

    /// Voxel spacing, one entry per used dimension.
    pub fn spacing(&self) -> Vec<f32> {
        self.pixdim[..self.ndim].to_vec()
    }

    /// Total number of voxels.
    pub fn num_elements(&self) -> usize {
        self.dim[..self.ndim].iter().product::<u64>() as usize
    }

    /// Size of the voxel data block in bytes.
    pub fn data_size(&self) -> usize {
        self.num_elements() * self.datatype.size()
    }

    /// Build a header describing an in-memory little-endian volume.
    pub(crate) fn for_shape(shape: &[usize], datatype: DataType) -> Result<Self> {
        if shape.is_empty() || shape.len() > 7 {
            return Err(Error::InvalidDimensions(format!(
                "NIfTI supports 1-7 dimensions, got {}",
                shape.len()
            )));
        }
        let mut dim = [1u64; 7];
        for (i, &d) in shape.iter().enumerate() {
            dim[i] = d as u64;
        }
        Ok(Self {
            version: NiftiVersion::Nifti1,
            endianness: Endianness::Little,
            ndim: shape.len(),
            dim,
            datatype,
            pixdim: [1.0; 7],
            vox_offset: NiftiVersion::Nifti1.default_vox_offset(),
            scl_slope: 1.0,
            scl_inter: 0.0,
        })
    }

    /// Parse a header from the start of `bytes`, detecting version and
    /// endianness from the `sizeof_hdr` field.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 4 {
            return Err(Error::InvalidFileFormat(format!(
                "file too small for NIfTI header: {} bytes",
                bytes.len()
            )));
        }
        let sizeof_le = LittleEndian::read_i32(&bytes[..4]);
        let sizeof_be = BigEndian::read_i32(&bytes[..4]);

        let (version, endianness) = match (sizeof_le, sizeof_be) {
            (348, _) => (NiftiVersion::Nifti1, Endianness::Little),
            (_, 348) => (NiftiVersion::Nifti1, Endianness::Big),
            (540, _) => (NiftiVersion::Nifti2, Endianness::Little),
            (_, 540) => (NiftiVersion::Nifti2, Endianness::Big),
            _ => {
                return Err(Error::InvalidFileFormat(format!(
                    "unrecognized sizeof_hdr {sizeof_le} (not a NIfTI file?)"
                )))
            }
        };

        if bytes.len() < version.header_size() {
            return Err(Error::InvalidFileFormat(format!(
                "truncated NIfTI header: {} bytes, need {}",
                bytes.len(),
                version.header_size()
            )));
        }

        match (version, endianness) {
            (NiftiVersion::Nifti1, Endianness::Little) => {
                Self::parse_v1::<LittleEndian>(bytes, endianness)
            }
            (NiftiVersion::Nifti1, Endianness::Big) => {
                Self::parse_v1::<BigEndian>(bytes, endianness)
            }
            (NiftiVersion::Nifti2, Endianness::Little) => {
                Self::parse_v2::<LittleEndian>(bytes, endianness)
            }
            (NiftiVersion::Nifti2, Endianness::Big) => {
                Self::parse_v2::<BigEndian>(bytes, endianness)
            }
        }
    }

    fn parse_v1<B: ByteOrder>(bytes: &[u8], endianness: Endianness) -> Result<Self> {
        let magic = &bytes[offsets_v1::MAGIC..offsets_v1::MAGIC + 4];
        if magic != b"n+1\0" && magic != b"ni1\0" {
            return Err(Error::InvalidFileFormat(format!(
                "invalid NIfTI magic: {magic:?}"
            )));
        }

        let ndim = B::read_i16(&bytes[offsets_v1::DIM..]);
        if !(1..=7).contains(&ndim) {
            return Err(Error::InvalidFileFormat(format!(
                "invalid dimension count {ndim}"
            )));
        }
        let ndim = ndim as usize;

        let mut dim = [1u64; 7];
        let mut pixdim = [1.0f32; 7];
        for i in 0..ndim {
            let d = B::read_i16(&bytes[offsets_v1::DIM + 2 * (i + 1)..]);
            if d < 1 {
                return Err(Error::InvalidFileFormat(format!(
                    "non-positive extent {d} in dimension {i}"
                )));
            }
            dim[i] = d as u64;
            pixdim[i] = B::read_f32(&bytes[offsets_v1::PIXDIM + 4 * (i + 1)..]);
        }

        let datatype = DataType::from_code(B::read_i16(&bytes[offsets_v1::DATATYPE..]))?;
        let vox_offset = B::read_f32(&bytes[offsets_v1::VOX_OFFSET..]) as i64;
        let scl_slope = B::read_f32(&bytes[offsets_v1::SCL_SLOPE..]);
        let scl_inter = B::read_f32(&bytes[offsets_v1::SCL_INTER..]);

        let header = Self {
            version: NiftiVersion::Nifti1,
            endianness,
            ndim,
            dim,
            datatype,
            pixdim,
            vox_offset,
            scl_slope,
            scl_inter,
        };
        header.validate()?;
        Ok(header)
    }

    fn parse_v2<B: ByteOrder>(bytes: &[u8], endianness: Endianness) -> Result<Self> {
        let magic = &bytes[offsets_v2::MAGIC..offsets_v2::MAGIC + 4];
        if magic != b"n+2\0" && magic != b"ni2\0" {
            return Err(Error::InvalidFileFormat(format!(
                "invalid NIfTI magic: {magic:?}"
            )));
        }

        let ndim = B::read_i64(&bytes[offsets_v2::DIM..]);
        if !(1..=7).contains(&ndim) {
            return Err(Error::InvalidFileFormat(format!(
                "invalid dimension count {ndim}"
            )));
        }
        let ndim = ndim as usize;

        let mut dim = [1u64; 7];
        let mut pixdim = [1.0f32; 7];
        for i in 0..ndim {
            let d = B::read_i64(&bytes[offsets_v2::DIM + 8 * (i + 1)..]);
            if d < 1 {
                return Err(Error::InvalidFileFormat(format!(
                    "non-positive extent {d} in dimension {i}"
                )));
            }
            dim[i] = d as u64;
            pixdim[i] = B::read_f64(&bytes[offsets_v2::PIXDIM + 8 * (i + 1)..]) as f32;
        }

        let datatype = DataType::from_code(B::read_i16(&bytes[offsets_v2::DATATYPE..]))?;
        let vox_offset = B::read_i64(&bytes[offsets_v2::VOX_OFFSET..]);
        let scl_slope = B::read_f64(&bytes[offsets_v2::SCL_SLOPE..]) as f32;
        let scl_inter = B::read_f64(&bytes[offsets_v2::SCL_INTER..]) as f32;

        let header = Self {
            version: NiftiVersion::Nifti2,
            endianness,
            ndim,
            dim,
            datatype,
            pixdim,
            vox_offset,
            scl_slope,
            scl_inter,
        };
        header.validate()?;
        Ok(header)
    }

    /// Internal consistency checks shared by the read and write paths.
    pub fn validate(&self) -> Result<()> {
        if self.vox_offset < self.header_size() as i64 {
            return Err(Error::InvalidFileFormat(format!(
                "vox_offset {} precedes end of header",
                self.vox_offset
            )));
        }
        let numel = self.dim[..self.ndim]
            .iter()
            .try_fold(1u64, |acc, &d| acc.checked_mul(d));
        if numel.is_none() {
            return Err(Error::InvalidDimensions(format!(
                "volume extents {:?} overflow",
                &self.dim[..self.ndim]
            )));
        }
        Ok(())
    }

    /// Serialize as a little-endian NIfTI-1 header (the write path only
    /// produces NIfTI-1).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::SIZE];
        LittleEndian::write_i32(&mut buf[offsets_v1::SIZEOF_HDR..], Self::SIZE as i32);
        LittleEndian::write_i16(&mut buf[offsets_v1::DIM..], self.ndim as i16);
        for i in 0..7 {
            LittleEndian::write_i16(
                &mut buf[offsets_v1::DIM + 2 * (i + 1)..],
                self.dim[i] as i16,
            );
            LittleEndian::write_f32(&mut buf[offsets_v1::PIXDIM + 4 * (i + 1)..], self.pixdim[i]);
        }
        // pixdim[0] is the qfac slot
        LittleEndian::write_f32(&mut buf[offsets_v1::PIXDIM..], 1.0);
        LittleEndian::write_i16(&mut buf[offsets_v1::DATATYPE..], self.datatype.code());
        LittleEndian::write_i16(
            &mut buf[offsets_v1::BITPIX..],
            (self.datatype.byte_size() * 8) as i16,
        );
        LittleEndian::write_f32(&mut buf[offsets_v1::VOX_OFFSET..], self.vox_offset as f32);
        LittleEndian::write_f32(&mut buf[offsets_v1::SCL_SLOPE..], self.scl_slope);
        LittleEndian::write_f32(&mut buf[offsets_v1::SCL_INTER..], self.scl_inter);
        buf[offsets_v1::MAGIC..offsets_v1::MAGIC + 4].copy_from_slice(b"n+1\0");
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_v1_header() {
        let header = NiftiHeader::for_shape(&[4, 5, 6], DataType::Float32).unwrap();
        let bytes = header.to_bytes();
        let parsed = NiftiHeader::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.shape(), vec![4, 5, 6]);
        assert_eq!(parsed.datatype, DataType::Float32);
        assert_eq!(parsed.vox_offset, 352);
        assert_eq!(parsed.endianness, Endianness::Little);
    }

    #[test]
    fn rejects_garbage_sizeof_hdr() {
        let bytes = vec![0xABu8; 348];
        assert!(matches!(
            NiftiHeader::from_bytes(&bytes),
            Err(Error::InvalidFileFormat(_))
        ));
    }

    #[test]
    fn rejects_unknown_datatype_code() {
        let header = NiftiHeader::for_shape(&[2, 2], DataType::Float32).unwrap();
        let mut bytes = header.to_bytes();
        LittleEndian::write_i16(&mut bytes[70..], 9999);
        match NiftiHeader::from_bytes(&bytes) {
            Err(Error::UnsupportedDataType(code)) => assert_eq!(code, 9999),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
