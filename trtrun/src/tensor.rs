//! Tensor metadata types shared by engines and execution contexts

use crate::error::{Error, Result};
use std::fmt;
use trtrun_sys::TrtDims;

/// Tensor dimensions. Axes not yet resolved are reported as `-1`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Dims(Vec<i64>);

impl Dims {
    pub fn new(dims: Vec<i64>) -> Self {
        Dims(dims)
    }

    /// Extent of each axis, outermost first
    pub fn as_slice(&self) -> &[i64] {
        &self.0
    }

    /// Number of axes
    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// True while at least one axis is unresolved
    pub fn is_dynamic(&self) -> bool {
        self.0.iter().any(|&d| d < 0)
    }

    /// Number of elements, or `None` for dynamic shapes
    pub fn volume(&self) -> Option<usize> {
        self.0.iter().try_fold(1usize, |acc, &d| {
            usize::try_from(d).ok().and_then(|d| acc.checked_mul(d))
        })
    }

    pub(crate) fn from_raw(raw: &TrtDims) -> Self {
        let rank = usize::try_from(raw.nb_dims).unwrap_or(0).min(raw.d.len());
        Dims(raw.d[..rank].to_vec())
    }

    pub(crate) fn to_raw(&self) -> Result<TrtDims> {
        let mut raw = TrtDims::default();
        if self.0.len() > raw.d.len() {
            return Err(Error::InvalidArgument(format!(
                "rank {} exceeds the maximum of {}",
                self.0.len(),
                raw.d.len()
            )));
        }
        raw.nb_dims = self.0.len() as i32;
        raw.d[..self.0.len()].copy_from_slice(&self.0);
        Ok(raw)
    }
}

impl fmt::Display for Dims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("scalar");
        }
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("x")?;
            }
            write!(f, "{d}")?;
        }
        Ok(())
    }
}

impl From<Vec<i64>> for Dims {
    fn from(dims: Vec<i64>) -> Self {
        Dims(dims)
    }
}

impl From<&[i64]> for Dims {
    fn from(dims: &[i64]) -> Self {
        Dims(dims.to_vec())
    }
}

impl<const N: usize> From<[i64; N]> for Dims {
    fn from(dims: [i64; N]) -> Self {
        Dims(dims.to_vec())
    }
}

impl PartialEq<[i64]> for Dims {
    fn eq(&self, other: &[i64]) -> bool {
        self.0 == other
    }
}

impl<const N: usize> PartialEq<[i64; N]> for Dims {
    fn eq(&self, other: &[i64; N]) -> bool {
        self.0 == other
    }
}

/// Element type of a tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum DataType {
    Float = 0,
    Half = 1,
    Int8 = 2,
    Int32 = 3,
    Bool = 4,
    Uint8 = 5,
    Fp8 = 6,
    Bf16 = 7,
    Int64 = 8,
    Int4 = 9,
    Fp4 = 10,
}

impl DataType {
    pub(crate) fn from_raw(raw: i32) -> Result<Self> {
        Ok(match raw {
            0 => DataType::Float,
            1 => DataType::Half,
            2 => DataType::Int8,
            3 => DataType::Int32,
            4 => DataType::Bool,
            5 => DataType::Uint8,
            6 => DataType::Fp8,
            7 => DataType::Bf16,
            8 => DataType::Int64,
            9 => DataType::Int4,
            10 => DataType::Fp4,
            other => return Err(Error::Unknown(format!("data type {other}"))),
        })
    }

    /// Size of one element in bytes; `None` for sub-byte types
    pub fn size_in_bytes(self) -> Option<usize> {
        match self {
            DataType::Float | DataType::Int32 => Some(4),
            DataType::Half | DataType::Bf16 => Some(2),
            DataType::Int64 => Some(8),
            DataType::Int8 | DataType::Bool | DataType::Uint8 | DataType::Fp8 => Some(1),
            DataType::Int4 | DataType::Fp4 => None,
        }
    }
}

/// Direction of an engine IO tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TensorIoMode {
    /// Tensor is not an input or output
    None,
    /// Tensor is input to the engine
    Input,
    /// Tensor is output by the engine
    Output,
}

impl TensorIoMode {
    pub(crate) fn from_raw(raw: i32) -> Result<Self> {
        match raw {
            trtrun_sys::TRT_TENSOR_IO_MODE_NONE => Ok(TensorIoMode::None),
            trtrun_sys::TRT_TENSOR_IO_MODE_INPUT => Ok(TensorIoMode::Input),
            trtrun_sys::TRT_TENSOR_IO_MODE_OUTPUT => Ok(TensorIoMode::Output),
            other => Err(Error::Unknown(format!("tensor io mode {other}"))),
        }
    }

    pub fn is_input(self) -> bool {
        self == TensorIoMode::Input
    }

    pub fn is_output(self) -> bool {
        self == TensorIoMode::Output
    }
}

/// Memory layout of a tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum TensorFormat {
    Linear = 0,
    Chw2 = 1,
    Hwc8 = 2,
    Chw4 = 3,
    Chw16 = 4,
    Chw32 = 5,
    Dhwc8 = 6,
    Cdhw32 = 7,
    Hwc = 8,
    DlaLinear = 9,
    DlaHwc4 = 10,
    Hwc16 = 11,
    Dhwc = 12,
}

impl TensorFormat {
    pub(crate) fn from_raw(raw: i32) -> Result<Self> {
        Ok(match raw {
            0 => TensorFormat::Linear,
            1 => TensorFormat::Chw2,
            2 => TensorFormat::Hwc8,
            3 => TensorFormat::Chw4,
            4 => TensorFormat::Chw16,
            5 => TensorFormat::Chw32,
            6 => TensorFormat::Dhwc8,
            7 => TensorFormat::Cdhw32,
            8 => TensorFormat::Hwc,
            9 => TensorFormat::DlaLinear,
            10 => TensorFormat::DlaHwc4,
            11 => TensorFormat::Hwc16,
            12 => TensorFormat::Dhwc,
            other => return Err(Error::Unknown(format!("tensor format {other}"))),
        })
    }
}

/// Which bound of an optimization profile to query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileSelector {
    Min,
    Opt,
    Max,
}

impl ProfileSelector {
    pub(crate) fn as_raw(self) -> i32 {
        match self {
            ProfileSelector::Min => trtrun_sys::TRT_PROFILE_SELECTOR_MIN,
            ProfileSelector::Opt => trtrun_sys::TRT_PROFILE_SELECTOR_OPT,
            ProfileSelector::Max => trtrun_sys::TRT_PROFILE_SELECTOR_MAX,
        }
    }
}

/// Snapshot of everything the engine reports about one IO tensor
#[derive(Debug, Clone, PartialEq)]
pub struct TensorDesc {
    pub name: String,
    pub io_mode: TensorIoMode,
    pub dtype: DataType,
    pub shape: Dims,
    pub format: TensorFormat,
    pub bytes_per_component: i32,
    pub components_per_element: i32,
    /// `None` for scalar (non-vectorized) formats
    pub vectorized_dim: Option<i32>,
    pub shape_inference_io: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dims_display() {
        assert_eq!(Dims::from([1, 3, 224, 224]).to_string(), "1x3x224x224");
        assert_eq!(Dims::from([-1, 1000]).to_string(), "-1x1000");
        assert_eq!(Dims::default().to_string(), "scalar");
    }

    #[test]
    fn test_dims_volume() {
        assert_eq!(Dims::from([2, 3, 4]).volume(), Some(24));
        assert_eq!(Dims::from([-1, 3]).volume(), None);
        assert_eq!(Dims::default().volume(), Some(1));
        assert!(Dims::from([-1, 3]).is_dynamic());
        assert!(!Dims::from([1, 3]).is_dynamic());
    }

    #[test]
    fn test_dims_raw_conversion() {
        let dims = Dims::from([4, 3, 224, 224]);
        let raw = dims.to_raw().unwrap();
        assert_eq!(raw.nb_dims, 4);
        assert_eq!(Dims::from_raw(&raw), dims);

        let too_deep = Dims::new(vec![1; 9]);
        assert!(matches!(too_deep.to_raw(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_negative_rank_reads_as_empty() {
        let raw = TrtDims {
            nb_dims: -1,
            ..TrtDims::default()
        };
        assert_eq!(Dims::from_raw(&raw).rank(), 0);
    }

    #[test]
    fn test_data_type_sizes() {
        assert_eq!(DataType::from_raw(0).unwrap(), DataType::Float);
        assert_eq!(DataType::Half.size_in_bytes(), Some(2));
        assert_eq!(DataType::Int4.size_in_bytes(), None);
        assert!(DataType::from_raw(42).is_err());
    }

    #[test]
    fn test_io_mode_from_raw() {
        assert_eq!(TensorIoMode::from_raw(1).unwrap(), TensorIoMode::Input);
        assert!(TensorIoMode::from_raw(2).unwrap().is_output());
        assert!(TensorIoMode::from_raw(7).is_err());
    }
}
