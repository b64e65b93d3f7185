//! In-memory representation of a loaded NIfTI volume.
//!
//! A [`NiftiImage`] keeps the parsed header plus the raw voxel bytes, either
//! mmap-backed (uncompressed files) or owned (decompressed / in-memory
//! volumes). Voxels are materialized on demand into an F-order
//! `ndarray::ArrayD<f32>` with intensity scaling applied.

use crate::error::{Error, Result};
use crate::nifti::header::{DataType, Endianness, NiftiHeader};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use half::{bf16, f16};
use memmap2::Mmap;
use ndarray::{ArrayD, IxDyn, ShapeBuilder};
use std::sync::Arc;

enum DataSource {
    Owned(Arc<Vec<u8>>),
    Mapped(Arc<Mmap>),
}

/// A loaded volumetric map.
pub struct NiftiImage {
    header: NiftiHeader,
    source: DataSource,
    offset: usize,
    len: usize,
}

impl NiftiImage {
    pub(crate) fn from_shared_bytes(
        header: NiftiHeader,
        bytes: Arc<Vec<u8>>,
        offset: usize,
        len: usize,
    ) -> Self {
        Self {
            header,
            source: DataSource::Owned(bytes),
            offset,
            len,
        }
    }

    pub(crate) fn from_shared_mmap(
        header: NiftiHeader,
        mmap: Arc<Mmap>,
        offset: usize,
        len: usize,
    ) -> Self {
        Self {
            header,
            source: DataSource::Mapped(mmap),
            offset,
            len,
        }
    }

    /// Wrap an in-memory f32 volume, e.g. for fixtures and round-trip tests.
    ///
    /// The array is converted to F-order (the NIfTI memory layout) if it is
    /// not already.
    pub fn from_array(data: ArrayD<f32>) -> Result<Self> {
        let shape: Vec<usize> = data.shape().to_vec();
        let header = NiftiHeader::for_shape(&shape, DataType::Float32)?;

        let mut f_order = ArrayD::<f32>::zeros(IxDyn(&shape).f());
        f_order.assign(&data);
        let slice = f_order.as_slice_memory_order().ok_or_else(|| {
            Error::InvalidDimensions("array is not contiguous after F-order copy".to_string())
        })?;

        let mut bytes = Vec::with_capacity(slice.len() * 4);
        for v in slice {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let len = bytes.len();
        Ok(Self::from_shared_bytes(header, Arc::new(bytes), 0, len))
    }

    /// The parsed header.
    pub fn header(&self) -> &NiftiHeader {
        &self.header
    }

    /// Shape of the voxel grid.
    pub fn shape(&self) -> Vec<usize> {
        self.header.shape()
    }

    /// Number of dimensions.
    pub fn ndim(&self) -> usize {
        self.header.ndim
    }

    /// Element type of the on-disk voxels.
    pub fn dtype(&self) -> DataType {
        self.header.datatype
    }

    fn data_bytes(&self) -> &[u8] {
        match &self.source {
            DataSource::Owned(v) => &v[self.offset..self.offset + self.len],
            DataSource::Mapped(m) => &m[self.offset..self.offset + self.len],
        }
    }

    /// Materialize the voxels as an F-order f32 array.
    ///
    /// Applies `scl_slope`/`scl_inter` intensity scaling when the header
    /// stores a non-trivial transform.
    pub fn to_f32(&self) -> Result<ArrayD<f32>> {
        let expected = self.header.data_size();
        let bytes = self.data_bytes();
        if bytes.len() < expected {
            return Err(Error::InvalidFileFormat(format!(
                "voxel data truncated: {} bytes, need {}",
                bytes.len(),
                expected
            )));
        }
        let bytes = &bytes[..expected];

        let mut values = match self.header.endianness {
            Endianness::Little => decode::<LittleEndian>(bytes, self.header.datatype),
            Endianness::Big => decode::<BigEndian>(bytes, self.header.datatype),
        };

        let slope = self.header.scl_slope;
        let inter = self.header.scl_inter;
        if slope != 0.0 && (slope != 1.0 || inter != 0.0) {
            for v in &mut values {
                *v = *v * slope + inter;
            }
        }

        let shape = self.header.shape();
        ArrayD::from_shape_vec(IxDyn(&shape).f(), values)
            .map_err(|e| Error::InvalidDimensions(e.to_string()))
    }

    /// Copy of the raw voxel byte region, for the write path.
    pub(crate) fn data_to_bytes(&self) -> Result<Vec<u8>> {
        let expected = self.header.data_size();
        let bytes = self.data_bytes();
        if bytes.len() < expected {
            return Err(Error::InvalidFileFormat(format!(
                "voxel data truncated: {} bytes, need {}",
                bytes.len(),
                expected
            )));
        }
        Ok(bytes[..expected].to_vec())
    }
}

fn decode<B: ByteOrder>(bytes: &[u8], dtype: DataType) -> Vec<f32> {
    match dtype {
        DataType::UInt8 => bytes.iter().map(|&b| f32::from(b)).collect(),
        DataType::Int8 => bytes.iter().map(|&b| f32::from(b as i8)).collect(),
        DataType::Int16 => bytes
            .chunks_exact(2)
            .map(|c| f32::from(B::read_i16(c)))
            .collect(),
        DataType::UInt16 => bytes
            .chunks_exact(2)
            .map(|c| f32::from(B::read_u16(c)))
            .collect(),
        DataType::Int32 => bytes
            .chunks_exact(4)
            .map(|c| B::read_i32(c) as f32)
            .collect(),
        DataType::UInt32 => bytes
            .chunks_exact(4)
            .map(|c| B::read_u32(c) as f32)
            .collect(),
        DataType::Int64 => bytes
            .chunks_exact(8)
            .map(|c| B::read_i64(c) as f32)
            .collect(),
        DataType::UInt64 => bytes
            .chunks_exact(8)
            .map(|c| B::read_u64(c) as f32)
            .collect(),
        DataType::Float16 => bytes
            .chunks_exact(2)
            .map(|c| f16::from_bits(B::read_u16(c)).to_f32())
            .collect(),
        DataType::BFloat16 => bytes
            .chunks_exact(2)
            .map(|c| bf16::from_bits(B::read_u16(c)).to_f32())
            .collect(),
        DataType::Float32 => bytes.chunks_exact(4).map(|c| B::read_f32(c)).collect(),
        DataType::Float64 => bytes
            .chunks_exact(8)
            .map(|c| B::read_f64(c) as f32)
            .collect(),
    }
}
