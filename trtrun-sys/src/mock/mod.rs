//! Mock runtime for development without TensorRT installed.
//!
//! The mock serves the same C ABI as the real shim. A "serialized engine" is a
//! small text description; [`MockEngine`] writes one:
//!
//! ```text
//! trtrun-mock-engine 1
//! name classifier
//! device_memory 4096
//! profiles 1
//! tensor input images float -1x3x224x224
//! tensor output logits float images.0x1000
//! profile images 0 1x3x224x224 4x3x224x224 8x3x224x224
//! ```
//!
//! `-1` marks a dynamic input axis; `images.0` makes an output axis follow
//! axis 0 of input `images`.

mod desc;
pub mod ffi;

use std::fmt::Write as _;

/// Builder for mock engine blobs accepted by `trt_runtime_deserialize_cuda_engine`.
#[derive(Debug, Clone)]
pub struct MockEngine {
    name: String,
    layers: i32,
    device_memory: usize,
    profiles: i32,
    refittable: bool,
    hardware_compat: i32,
    aux_streams: i32,
    host_code: bool,
    tensors: Vec<String>,
    ranges: Vec<String>,
}

impl MockEngine {
    /// A single-profile engine with no tensors.
    pub fn new(name: &str) -> Self {
        MockEngine {
            name: name.to_string(),
            layers: 1,
            device_memory: 0,
            profiles: 1,
            refittable: false,
            hardware_compat: 0,
            aux_streams: 0,
            host_code: false,
            tensors: Vec::new(),
            ranges: Vec::new(),
        }
    }

    pub fn layers(mut self, layers: i32) -> Self {
        self.layers = layers;
        self
    }

    /// Scratch memory the engine reports as required.
    pub fn device_memory(mut self, bytes: usize) -> Self {
        self.device_memory = bytes;
        self
    }

    /// Number of optimization profiles; ranges are attached with [`profile`](Self::profile).
    pub fn profiles(mut self, count: i32) -> Self {
        self.profiles = count;
        self
    }

    pub fn refittable(mut self, refittable: bool) -> Self {
        self.refittable = refittable;
        self
    }

    /// Raw hardware compatibility level.
    pub fn hardware_compat(mut self, level: i32) -> Self {
        self.hardware_compat = level;
        self
    }

    /// Auxiliary streams the engine reports using.
    pub fn aux_streams(mut self, count: i32) -> Self {
        self.aux_streams = count;
        self
    }

    /// Marks the engine as carrying embedded host code.
    pub fn host_code(mut self, host_code: bool) -> Self {
        self.host_code = host_code;
        self
    }

    /// Declares an input; `-1` axes are dynamic.
    pub fn input(mut self, name: &str, dtype: &str, dims: &[i64]) -> Self {
        self.tensors
            .push(format!("tensor input {name} {dtype} {}", join_dims(dims)));
        self
    }

    /// Declares a shape-inference input (a shape tensor).
    pub fn shape_input(mut self, name: &str, dtype: &str, dims: &[i64]) -> Self {
        self.tensors
            .push(format!("tensor input {name} {dtype} {} shape_io", join_dims(dims)));
        self
    }

    /// Declares an output. `dims` uses the text syntax, e.g. `images.0x1000`.
    pub fn output(mut self, name: &str, dtype: &str, dims: &str) -> Self {
        self.tensors.push(format!("tensor output {name} {dtype} {dims}"));
        self
    }

    /// Sets the `[min, max]` range (and optimum) of an input for one profile.
    pub fn profile(mut self, tensor: &str, index: usize, min: &[i64], opt: &[i64], max: &[i64]) -> Self {
        self.ranges.push(format!(
            "profile {tensor} {index} {} {} {}",
            join_dims(min),
            join_dims(opt),
            join_dims(max)
        ));
        self
    }

    /// Serialized engine bytes, accepted by the mock runtime only.
    pub fn build(&self) -> Vec<u8> {
        let mut text = String::new();
        let _ = writeln!(text, "{}", desc::MAGIC);
        let _ = writeln!(text, "name {}", self.name);
        let _ = writeln!(text, "layers {}", self.layers);
        let _ = writeln!(text, "device_memory {}", self.device_memory);
        let _ = writeln!(text, "profiles {}", self.profiles);
        let _ = writeln!(text, "refittable {}", u8::from(self.refittable));
        let _ = writeln!(text, "hardware_compat {}", self.hardware_compat);
        let _ = writeln!(text, "aux_streams {}", self.aux_streams);
        let _ = writeln!(text, "host_code {}", u8::from(self.host_code));
        for line in self.tensors.iter().chain(&self.ranges) {
            let _ = writeln!(text, "{line}");
        }
        text.into_bytes()
    }
}

fn join_dims(dims: &[i64]) -> String {
    if dims.is_empty() {
        return "scalar".to_string();
    }
    dims.iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join("x")
}
