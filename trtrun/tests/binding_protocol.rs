//! End-to-end checks of the binding protocol against the mock runtime

#![cfg(trtrun_mock)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use trtrun::{
    ContextState, CudaEngine, CudaStream, DevicePtr, Error, LogHandler, Logger, MockEngine,
    PluginHandle, PluginRegistry, Runtime, Severity,
};

#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Vec<(Severity, String)>>>);

impl Recorder {
    fn severities(&self) -> Vec<Severity> {
        self.0.lock().unwrap().iter().map(|(s, _)| *s).collect()
    }
}

impl LogHandler for Recorder {
    fn log(&self, severity: Severity, message: &str) {
        self.0.lock().unwrap().push((severity, message.to_string()));
    }
}

fn detector_blob() -> Vec<u8> {
    MockEngine::new("detector")
        .layers(120)
        .device_memory(64 << 10)
        .input("X", "float", &[-1, 3, 224, 224])
        .input("Y", "float", &[-1, 3, 224, 224])
        .input("scale", "float", &[1])
        .output("boxes", "float", "X.0x100x4")
        .output("scores", "float", "Y.0x100")
        .profile("X", 0, &[1, 3, 224, 224], &[4, 3, 224, 224], &[8, 3, 224, 224])
        .profile("Y", 0, &[1, 3, 224, 224], &[4, 3, 224, 224], &[8, 3, 224, 224])
        .build()
}

fn load(logger: &Logger) -> CudaEngine {
    let runtime = Runtime::new(logger).unwrap();
    runtime.deserialize_cuda_engine(&detector_blob()).unwrap()
}

fn bind_all(context: &mut trtrun::ExecutionContext<'_>, engine: &CudaEngine, batch: i64) {
    context.set_input_shape("X", &[batch, 3, 224, 224]).unwrap();
    context.set_input_shape("Y", &[batch, 3, 224, 224]).unwrap();
    for (i, name) in engine.io_tensor_names().iter().enumerate() {
        let address = DevicePtr::from_raw(0x100_0000 * (i + 1));
        context.set_tensor_address(name, address).unwrap();
    }
}

#[test]
fn io_tensor_names_are_unique_and_counted() {
    let engine = load(&Logger::tracing().unwrap());
    let names: HashSet<&str> = (0..engine.num_io_tensors())
        .map(|i| engine.io_tensor_name(i).unwrap())
        .collect();
    assert_eq!(names.len(), engine.num_io_tensors() as usize);
    assert_eq!(engine.num_io_tensors(), 5);
}

#[test]
fn static_tensor_shape_matches_fresh_context() {
    let engine = load(&Logger::tracing().unwrap());
    let context = engine.create_execution_context().unwrap();
    assert_eq!(
        engine.tensor_shape("scale").unwrap(),
        context.tensor_shape("scale").unwrap()
    );
    assert!(!engine.tensor_shape("scale").unwrap().is_dynamic());
}

#[test]
fn dynamic_inputs_resolve_after_binding() {
    let engine = load(&Logger::tracing().unwrap());
    let mut context = engine.create_execution_context().unwrap();

    assert!(engine.tensor_shape("X").unwrap().as_slice().contains(&-1));
    assert!(!context.all_input_shapes_specified());

    context.set_input_shape("X", &[2, 3, 224, 224]).unwrap();
    assert_eq!(context.tensor_shape("X").unwrap(), [2, 3, 224, 224]);
    assert_eq!(context.tensor_shape("boxes").unwrap(), [2, 100, 4]);
    // Y is still dynamic
    assert!(!context.all_input_shapes_specified());

    context.set_input_shape("Y", &[3, 3, 224, 224]).unwrap();
    assert!(context.all_input_shapes_specified());
    assert_eq!(context.tensor_shape("scores").unwrap(), [3, 100]);

    // the engine itself is never changed by a context
    assert_eq!(engine.tensor_shape("X").unwrap(), [-1, 3, 224, 224]);
}

#[test]
fn rank_mismatch_leaves_state_unchanged() {
    let engine = load(&Logger::tracing().unwrap());
    let mut context = engine.create_execution_context().unwrap();
    context.set_input_shape("X", &[2, 3, 224, 224]).unwrap();

    let err = context.set_input_shape("X", &[2, 3, 224]).unwrap_err();
    assert!(matches!(err, Error::Shape { .. }));
    assert_eq!(context.tensor_shape("X").unwrap(), [2, 3, 224, 224]);
}

#[test]
fn enqueue_without_device_memory_fails() {
    let engine = load(&Logger::tracing().unwrap());
    let mut context = engine
        .create_execution_context_without_device_memory()
        .unwrap();
    bind_all(&mut context, &engine, 1);

    let result = unsafe { context.enqueue_v3(CudaStream::DEFAULT) };
    assert!(matches!(result, Err(Error::DeviceMemoryRequired)));

    let memory = DevicePtr::from_raw(0x4000_0000);
    context
        .set_device_memory(memory, engine.device_memory_size())
        .unwrap();
    unsafe { context.enqueue_v3(CudaStream::DEFAULT) }.unwrap();
    assert_eq!(context.state(), ContextState::Enqueued);
}

#[test]
fn contexts_bind_independently() {
    let engine = load(&Logger::tracing().unwrap());
    let mut first = engine.create_execution_context().unwrap();
    let mut second = engine.create_execution_context().unwrap();

    first.set_input_shape("X", &[1, 3, 224, 224]).unwrap();
    second.set_input_shape("Y", &[4, 3, 224, 224]).unwrap();

    assert_eq!(first.tensor_shape("X").unwrap(), [1, 3, 224, 224]);
    assert_eq!(first.tensor_shape("Y").unwrap(), [-1, 3, 224, 224]);
    assert_eq!(second.tensor_shape("Y").unwrap(), [4, 3, 224, 224]);
    assert_eq!(second.tensor_shape("X").unwrap(), [-1, 3, 224, 224]);

    first
        .set_tensor_address("boxes", DevicePtr::from_raw(0x1000))
        .unwrap();
    assert!(second.get_tensor_address("boxes").unwrap().is_null());
}

#[test]
fn contexts_keep_their_own_binding_of_the_same_tensor() {
    let engine = load(&Logger::tracing().unwrap());
    let mut a = engine.create_execution_context().unwrap();
    let mut b = engine.create_execution_context().unwrap();

    a.set_input_shape("X", &[1, 3, 224, 224]).unwrap();
    a.set_tensor_address("X", DevicePtr::from_raw(0x1000)).unwrap();
    b.set_input_shape("X", &[4, 3, 224, 224]).unwrap();
    b.set_tensor_address("X", DevicePtr::from_raw(0x2000)).unwrap();

    assert_eq!(a.tensor_shape("X").unwrap(), [1, 3, 224, 224]);
    assert_eq!(a.get_tensor_address("X").unwrap(), DevicePtr::from_raw(0x1000));
    assert_eq!(b.tensor_shape("X").unwrap(), [4, 3, 224, 224]);
    assert_eq!(b.get_tensor_address("X").unwrap(), DevicePtr::from_raw(0x2000));

    // outputs follow each context's own input shape
    assert_eq!(a.tensor_shape("boxes").unwrap(), [1, 100, 4]);
    assert_eq!(b.tensor_shape("boxes").unwrap(), [4, 100, 4]);
}

#[test]
fn shape_map_binds_every_input() {
    let engine = load(&Logger::tracing().unwrap());
    let mut context = engine.create_execution_context().unwrap();

    let shapes: HashMap<&str, Vec<i64>> = HashMap::from([
        ("X", vec![2, 3, 224, 224]),
        ("Y", vec![3, 3, 224, 224]),
    ]);
    context.set_input_shapes(&shapes).unwrap();
    assert!(context.all_input_shapes_specified());
    assert_eq!(context.tensor_shape("boxes").unwrap(), [2, 100, 4]);
    assert_eq!(context.tensor_shape("scores").unwrap(), [3, 100]);

    for (i, name) in engine.io_tensor_names().iter().enumerate() {
        let address = DevicePtr::from_raw(0x100_0000 * (i + 1));
        context.set_tensor_address(name, address).unwrap();
    }
    unsafe { context.enqueue_v3(CudaStream::DEFAULT) }.unwrap();

    // unchanged shapes are not a rebinding
    context.set_input_shapes(&shapes).unwrap();
    assert_eq!(context.state(), ContextState::Enqueued);

    context
        .set_input_shapes([("X", [4i64, 3, 224, 224])])
        .unwrap();
    assert_eq!(context.state(), ContextState::Ready);
    assert_eq!(context.tensor_shape("boxes").unwrap(), [4, 100, 4]);
}

#[test]
fn contexts_submit_from_separate_threads() {
    let engine = load(&Logger::tracing().unwrap());

    std::thread::scope(|scope| {
        for batch in 1..=4 {
            let engine = &engine;
            scope.spawn(move || {
                let mut context = engine.create_execution_context().unwrap();
                bind_all(&mut context, engine, batch);
                let stream = CudaStream::from_raw(0x100 + batch as usize);
                unsafe { context.enqueue_v3(stream) }.unwrap();
                assert_eq!(context.tensor_shape("scores").unwrap(), [batch, 100]);
            });
        }
    });
}

#[test]
fn plugin_registry_rejects_bad_input() {
    let registry = PluginRegistry::new();
    assert!(matches!(
        registry.load_library("/does/not/exist/libplugin.so"),
        Err(Error::PluginLoad { .. })
    ));
    assert!(matches!(
        registry.unload_library(PluginHandle::from_raw(0x1234)),
        Err(Error::UnknownPluginHandle(0x1234))
    ));
}

#[test]
fn warning_threshold_filters_messages() {
    let recorder = Recorder::default();
    let logger = Logger::new(recorder.clone()).unwrap();
    logger.set_min_severity(Severity::Warning);

    logger.verbose("verbose");
    logger.info("info");
    logger.warning("warning");
    logger.error("error");
    logger.log(Severity::InternalError, "internal");

    assert_eq!(
        recorder.severities(),
        vec![Severity::Warning, Severity::Error, Severity::InternalError]
    );
}

#[test]
fn native_messages_pass_through_threshold() {
    let recorder = Recorder::default();
    let logger = Logger::new(recorder.clone()).unwrap();
    let runtime = Runtime::new(&logger).unwrap();

    logger.set_min_severity(Severity::InternalError);
    assert!(runtime.deserialize_cuda_engine(b"junk").is_err());
    assert!(recorder.severities().is_empty());

    logger.set_min_severity(Severity::Error);
    assert!(runtime.deserialize_cuda_engine(b"junk").is_err());
    assert_eq!(recorder.severities(), vec![Severity::Error]);
}
