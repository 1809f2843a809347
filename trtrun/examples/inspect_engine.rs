//! Inspect a serialized engine and walk one context through the binding protocol
//!
//! ```text
//! cargo run --example inspect_engine -- model.engine
//! ```
//!
//! Without an argument, a mock build inspects a generated demo engine.
//! Addresses bound here are placeholders: the example never enqueues.

use std::error::Error;
use trtrun::{
    DevicePtr, Logger, ProfileSelector, Runtime, RuntimeConfig, TensorIoMode,
};

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("info,trtrun=debug")
        .init();

    let engine_data = match std::env::args().nth(1) {
        Some(path) => std::fs::read(&path)?,
        None => demo_engine()?,
    };

    let logger = Logger::tracing()?;
    let config = RuntimeConfig::from_env()?;
    let runtime = Runtime::with_config(&logger, &config)?;
    let engine = runtime.deserialize_cuda_engine(&engine_data)?;

    println!("Engine: {}", engine.name());
    println!("  layers:               {}", engine.num_layers());
    println!("  device memory:        {} bytes", engine.device_memory_size());
    println!("  optimization profiles: {}", engine.num_optimization_profiles());
    println!("  aux streams:          {}", engine.num_aux_streams());
    println!("  refittable:           {}", engine.is_refittable());
    println!("  hardware compat:      {:?}", engine.hardware_compatibility_level());
    println!();

    for desc in engine.tensor_descs()? {
        println!(
            "  {:<6} {:<16} {:<8} {}",
            format!("{:?}", desc.io_mode),
            desc.name,
            format!("{:?}", desc.dtype),
            desc.shape
        );
    }
    println!();

    let mut context = engine.create_execution_context()?;
    context.set_name("inspect")?;

    // Bind every dynamic input at the optimum shape of profile 0
    let mut next_address = 0x1000_0000usize;
    for name in engine.io_tensor_names() {
        if engine.tensor_io_mode(name)? == TensorIoMode::Input
            && engine.tensor_shape(name)?.is_dynamic()
        {
            let opt = engine.profile_shape(name, 0, ProfileSelector::Opt)?;
            context.set_input_shape(name, opt.as_slice())?;
            println!("  bound {name} to {opt}");
        }
        context.set_tensor_address(name, DevicePtr::from_raw(next_address))?;
        next_address += 0x100_0000;
    }

    for name in engine.io_tensor_names() {
        println!("  {name}: {}", context.tensor_shape(name)?);
    }
    println!();
    println!("Context state: {:?}", context.state());
    println!(
        "All input shapes specified: {}",
        context.all_input_shapes_specified()
    );

    Ok(())
}

#[cfg(trtrun_mock)]
fn demo_engine() -> Result<Vec<u8>, Box<dyn Error>> {
    Ok(trtrun::MockEngine::new("demo-classifier")
        .layers(53)
        .device_memory(8 << 20)
        .input("images", "float", &[-1, 3, 224, 224])
        .output("logits", "float", "images.0x1000")
        .profile("images", 0, &[1, 3, 224, 224], &[4, 3, 224, 224], &[16, 3, 224, 224])
        .build())
}

#[cfg(not(trtrun_mock))]
fn demo_engine() -> Result<Vec<u8>, Box<dyn Error>> {
    Err("usage: inspect_engine <path/to/model.engine>".into())
}
