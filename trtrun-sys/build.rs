use std::env;
use std::path::PathBuf;

fn main() {
    println!("cargo::rustc-check-cfg=cfg(trtrun_mock)");
    println!("cargo:rerun-if-env-changed=TENSORRT_INCLUDE_PATH");
    println!("cargo:rerun-if-env-changed=TENSORRT_LIBRARY_PATH");
    println!("cargo:rerun-if-env-changed=CUDA_INCLUDE_PATH");
    println!("cargo:rerun-if-env-changed=CUDA_LIBRARY_PATH");

    // Check if we're in mock mode
    if env::var("CARGO_FEATURE_MOCK").is_ok() {
        println!("cargo:warning=Building in MOCK mode - no TensorRT required");
        enable_mock();
        return;
    }

    let Some(tensorrt_include_dir) = find_dir(
        "TENSORRT_INCLUDE_PATH",
        &["/usr/local/tensorrt/include", "/usr/local/include", "/usr/include/x86_64-linux-gnu"],
        "NvInferRuntime.h",
    ) else {
        println!("cargo:warning=NvInferRuntime.h not found - falling back to MOCK mode");
        enable_mock();
        return;
    };

    let cuda_include_dir = find_dir(
        "CUDA_INCLUDE_PATH",
        &["/usr/local/cuda/include", "/opt/cuda/include"],
        "cuda_runtime_api.h",
    )
    .expect("Could not find CUDA include path (set CUDA_INCLUDE_PATH)");

    let tensorrt_library_dir = find_dir(
        "TENSORRT_LIBRARY_PATH",
        &["/usr/local/tensorrt/lib", "/usr/local/lib", "/usr/lib/x86_64-linux-gnu"],
        "libnvinfer.so",
    )
    .expect("Could not find TensorRT library path (set TENSORRT_LIBRARY_PATH)");

    let cuda_library_dir = find_dir(
        "CUDA_LIBRARY_PATH",
        &["/usr/local/cuda/lib64", "/opt/cuda/lib64"],
        "libcudart.so",
    )
    .expect("Could not find CUDA library path (set CUDA_LIBRARY_PATH)");

    println!("cargo:rerun-if-changed=wrapper.hpp");
    println!("cargo:rerun-if-changed=wrapper.cpp");
    println!("cargo:mock=0");

    println!("cargo:rustc-link-search=native={}", tensorrt_library_dir.display());
    println!("cargo:rustc-link-search=native={}", cuda_library_dir.display());
    println!("cargo:rustc-link-lib=dylib=nvinfer");
    println!("cargo:rustc-link-lib=dylib=cudart");

    // Build C++ wrapper
    cc::Build::new()
        .cpp(true)
        .file("wrapper.cpp")
        .include(&tensorrt_include_dir)
        .include(&cuda_include_dir)
        .flag("-std=c++17")
        .compile("trtrun_wrapper");

    // Generate bindings
    let out_path = PathBuf::from(env::var("OUT_DIR").unwrap());
    let bindings = bindgen::Builder::default()
        .header("wrapper.hpp")
        .allowlist_function("trt_.*")
        .allowlist_type("Trt.*")
        .allowlist_var("TRT_.*")
        .derive_debug(true)
        .derive_default(true)
        .parse_callbacks(Box::new(bindgen::CargoCallbacks::new()))
        .generate()
        .expect("Unable to generate bindings");

    bindings
        .write_to_file(out_path.join("bindings.rs"))
        .expect("Couldn't write bindings!");
}

/// The mock backend is pure Rust (`src/mock/`); dependents learn about it
/// through `DEP_NVINFER_MOCK`.
fn enable_mock() {
    println!("cargo:rustc-cfg=trtrun_mock");
    println!("cargo:mock=1");
}

fn find_dir(env_key: &str, candidates: &[&str], file_to_find: &str) -> Option<PathBuf> {
    if let Some(val) = env::var_os(env_key) {
        return Some(PathBuf::from(val));
    }

    candidates
        .iter()
        .map(PathBuf::from)
        .find(|path| path.join(file_to_find).exists())
}
