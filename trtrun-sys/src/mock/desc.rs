//! Text description that stands in for a serialized engine in mock builds.

use std::ffi::{CStr, CString};

pub(crate) const MAGIC: &str = "trtrun-mock-engine 1";

/// One axis of a tensor as declared by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dim {
    Fixed(i64),
    /// Resolved by `set_input_shape`.
    Dynamic,
    /// Output axis that follows an input axis.
    Linked { input: usize, axis: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ProfileRange {
    pub min: Vec<i64>,
    pub opt: Vec<i64>,
    pub max: Vec<i64>,
}

#[derive(Debug, Clone)]
pub(crate) struct TensorDesc {
    pub name: CString,
    pub mode: i32,
    pub dtype: i32,
    pub dims: Vec<Dim>,
    pub shape_io: bool,
    /// One slot per optimization profile.
    pub ranges: Vec<Option<ProfileRange>>,
}

impl TensorDesc {
    pub fn is_input(&self) -> bool {
        self.mode == super::ffi::TRT_TENSOR_IO_MODE_INPUT
    }

    /// Engine-level shape, `-1` for every axis not known before binding.
    pub fn engine_dims(&self) -> Vec<i64> {
        self.dims
            .iter()
            .map(|dim| match dim {
                Dim::Fixed(v) => *v,
                Dim::Dynamic | Dim::Linked { .. } => -1,
            })
            .collect()
    }

    pub fn bytes_per_component(&self) -> usize {
        dtype_size(self.dtype)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct EngineDesc {
    pub name: CString,
    pub layers: i32,
    pub device_memory: usize,
    pub profiles: i32,
    pub refittable: bool,
    pub hardware_compat: i32,
    pub aux_streams: i32,
    pub host_code: bool,
    pub tensors: Vec<TensorDesc>,
}

impl EngineDesc {
    /// Binding index of a tensor name.
    pub fn index_of(&self, name: &CStr) -> Option<usize> {
        self.tensors.iter().position(|t| t.name.as_c_str() == name)
    }

    /// Parses the text produced by `MockEngine::build`.
    pub fn parse(data: &[u8]) -> Result<Self, String> {
        let text = std::str::from_utf8(data).map_err(|_| "engine data is not a mock engine")?;
        let mut lines = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'));

        if lines.next() != Some(MAGIC) {
            return Err("magic tag mismatch, engine was not serialized for this runtime".into());
        }

        let mut desc = EngineDesc {
            name: CString::default(),
            layers: 0,
            device_memory: 0,
            profiles: 1,
            refittable: false,
            hardware_compat: 0,
            aux_streams: 0,
            host_code: false,
            tensors: Vec::new(),
        };
        let mut pending_ranges = Vec::new();

        for line in lines {
            let fields: Vec<&str> = line.split_whitespace().collect();
            match fields.as_slice() {
                ["name", name] => {
                    desc.name = CString::new(*name).map_err(|e| e.to_string())?;
                }
                ["layers", n] => desc.layers = parse_num(n)?,
                ["device_memory", n] => desc.device_memory = parse_num(n)?,
                ["profiles", n] => desc.profiles = parse_num(n)?,
                ["refittable", flag] => desc.refittable = parse_flag(flag)?,
                ["hardware_compat", n] => desc.hardware_compat = parse_num(n)?,
                ["aux_streams", n] => desc.aux_streams = parse_num(n)?,
                ["host_code", flag] => desc.host_code = parse_flag(flag)?,
                ["tensor", mode, name, dtype, dims, rest @ ..] => {
                    let tensor = desc.parse_tensor(mode, name, dtype, dims, rest)?;
                    desc.tensors.push(tensor);
                }
                ["profile", tensor, index, min, opt, max] => {
                    pending_ranges.push((
                        tensor.to_string(),
                        parse_num::<usize>(index)?,
                        ProfileRange {
                            min: parse_static_dims(min)?,
                            opt: parse_static_dims(opt)?,
                            max: parse_static_dims(max)?,
                        },
                    ));
                }
                _ => return Err(format!("unrecognized record: {line}")),
            }
        }

        if desc.profiles < 1 {
            return Err("engine must declare at least one optimization profile".into());
        }
        for tensor in &mut desc.tensors {
            tensor.ranges = vec![None; desc.profiles as usize];
        }
        for (name, index, range) in pending_ranges {
            desc.attach_range(&name, index, range)?;
        }

        Ok(desc)
    }

    fn parse_tensor(
        &self,
        mode: &str,
        name: &str,
        dtype: &str,
        dims: &str,
        rest: &[&str],
    ) -> Result<TensorDesc, String> {
        let mode = match mode {
            "input" => super::ffi::TRT_TENSOR_IO_MODE_INPUT,
            "output" => super::ffi::TRT_TENSOR_IO_MODE_OUTPUT,
            other => return Err(format!("unknown tensor mode: {other}")),
        };
        if self.tensors.iter().any(|t| t.name.as_bytes() == name.as_bytes()) {
            return Err(format!("duplicate tensor name: {name}"));
        }
        let shape_io = match rest {
            [] => false,
            ["shape_io"] => true,
            other => return Err(format!("unexpected tensor attributes: {other:?}")),
        };

        let dims = split_dims(dims)
            .into_iter()
            .map(|token| self.parse_dim(token, mode))
            .collect::<Result<Vec<_>, _>>()?;
        if dims.len() > super::ffi::TRT_MAX_DIMS as usize {
            return Err(format!("tensor {name} exceeds the maximum rank"));
        }

        Ok(TensorDesc {
            name: CString::new(name).map_err(|e| e.to_string())?,
            mode,
            dtype: parse_dtype(dtype)?,
            dims,
            shape_io,
            ranges: Vec::new(),
        })
    }

    fn parse_dim(&self, token: &str, mode: i32) -> Result<Dim, String> {
        if token == "-1" {
            return Ok(Dim::Dynamic);
        }
        if let Some((input, axis)) = token.split_once('.') {
            if mode != super::ffi::TRT_TENSOR_IO_MODE_OUTPUT {
                return Err(format!("only outputs may link dimensions: {token}"));
            }
            let input = self
                .tensors
                .iter()
                .position(|t| t.is_input() && t.name.as_bytes() == input.as_bytes())
                .ok_or_else(|| format!("linked input not declared: {input}"))?;
            let axis: usize = parse_num(axis)?;
            if axis >= self.tensors[input].dims.len() {
                return Err(format!("linked axis out of range: {token}"));
            }
            return Ok(Dim::Linked { input, axis });
        }
        let value: i64 = parse_num(token)?;
        if value < 0 {
            return Err(format!("invalid dimension: {token}"));
        }
        Ok(Dim::Fixed(value))
    }

    fn attach_range(&mut self, name: &str, index: usize, range: ProfileRange) -> Result<(), String> {
        let tensor = self
            .tensors
            .iter_mut()
            .find(|t| t.name.as_bytes() == name.as_bytes())
            .ok_or_else(|| format!("profile references unknown tensor: {name}"))?;
        if !tensor.is_input() {
            return Err(format!("profile ranges apply to inputs only: {name}"));
        }
        let rank = tensor.dims.len();
        if range.min.len() != rank || range.opt.len() != rank || range.max.len() != rank {
            return Err(format!("profile rank mismatch for {name}"));
        }
        let ordered = (0..rank)
            .all(|i| range.min[i] <= range.opt[i] && range.opt[i] <= range.max[i]);
        if !ordered {
            return Err(format!("profile for {name} is not ordered min <= opt <= max"));
        }
        let slot = tensor
            .ranges
            .get_mut(index)
            .ok_or_else(|| format!("profile index {index} out of range"))?;
        *slot = Some(range);
        Ok(())
    }
}

/// Size in bytes of one component of a TensorRT `DataType`.
pub(crate) fn dtype_size(dtype: i32) -> usize {
    match dtype {
        0 | 3 => 4,
        1 | 7 => 2,
        8 => 8,
        _ => 1,
    }
}

fn parse_dtype(name: &str) -> Result<i32, String> {
    Ok(match name {
        "float" => 0,
        "half" => 1,
        "int8" => 2,
        "int32" => 3,
        "bool" => 4,
        "uint8" => 5,
        "fp8" => 6,
        "bf16" => 7,
        "int64" => 8,
        "int4" => 9,
        other => return Err(format!("unknown data type: {other}")),
    })
}

fn split_dims(dims: &str) -> Vec<&str> {
    if dims == "scalar" {
        Vec::new()
    } else {
        dims.split('x').collect()
    }
}

fn parse_static_dims(dims: &str) -> Result<Vec<i64>, String> {
    split_dims(dims).into_iter().map(parse_num).collect()
}

fn parse_num<T: std::str::FromStr>(value: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("invalid number: {value}"))
}

fn parse_flag(value: &str) -> Result<bool, String> {
    match value {
        "0" => Ok(false),
        "1" => Ok(true),
        other => Err(format!("invalid flag: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
trtrun-mock-engine 1
name classifier
layers 12
device_memory 4096
profiles 2
tensor input images float -1x3x224x224
tensor output logits float images.0x1000
profile images 0 1x3x224x224 4x3x224x224 8x3x224x224
profile images 1 16x3x224x224 16x3x224x224 32x3x224x224
";

    #[test]
    fn test_parse_sample() {
        let desc = EngineDesc::parse(SAMPLE.as_bytes()).unwrap();
        assert_eq!(desc.name.to_str().unwrap(), "classifier");
        assert_eq!(desc.layers, 12);
        assert_eq!(desc.profiles, 2);
        assert_eq!(desc.tensors.len(), 2);
        assert_eq!(desc.tensors[0].engine_dims(), vec![-1, 3, 224, 224]);
        assert_eq!(desc.tensors[1].dims[0], Dim::Linked { input: 0, axis: 0 });
        assert_eq!(desc.tensors[1].engine_dims(), vec![-1, 1000]);
        assert!(desc.tensors[0].ranges[1].is_some());
    }

    #[test]
    fn test_rejects_foreign_data() {
        assert!(EngineDesc::parse(b"\x7fELF garbage").is_err());
        assert!(EngineDesc::parse(b"").is_err());
    }

    #[test]
    fn test_rejects_bad_profile() {
        let text = format!("{MAGIC}\ntensor input x float -1x4\nprofile x 0 8x4 4x4 2x4\n");
        let err = EngineDesc::parse(text.as_bytes()).unwrap_err();
        assert!(err.contains("not ordered"));
    }

    #[test]
    fn test_rejects_duplicate_tensor() {
        let text = format!("{MAGIC}\ntensor input x float 4\ntensor output x float 4\n");
        assert!(EngineDesc::parse(text.as_bytes()).is_err());
    }

    #[test]
    fn test_scalar_tensor() {
        let text = format!("{MAGIC}\ntensor input s int32 scalar\n");
        let desc = EngineDesc::parse(text.as_bytes()).unwrap();
        assert!(desc.tensors[0].dims.is_empty());
    }
}
