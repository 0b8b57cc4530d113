//! Facade, registry and backend selection on the software device

use std::sync::Arc;

use lastlayer_chip::abi::AbiGeneration;
use lastlayer_chip::regs::{stream, stream_layout};
use lastlayer_driver::registry::ops;
use lastlayer_driver::{
    select_backend, Access, BackendSelection, BackendType, BurstRegion, DeviceAbi, DriverConfig, LastLayer,
    LastLayerError, OperationRegistry, ReluKernel, SoftwareDevice, Value,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[test]
fn instances_are_isolated() {
    let mut ll = LastLayer::new(SoftwareDevice::stream_default().unwrap());
    let a = ll.alloc().unwrap();
    let b = ll.alloc().unwrap();
    assert_ne!(a.raw(), b.raw());

    ll.write_reg(&a, stream::RADDR, 0, 17).unwrap();
    ll.write_mem(&a, stream::INPUT_MEM, BurstRegion::at(0), &[9, 9, 9, 9]).unwrap();
    ll.run(&a, 5).unwrap();

    assert_eq!(ll.read_reg(&b, stream::RADDR, 0).unwrap(), 0);
    assert_eq!(ll.read_mem_word(&b, stream::INPUT_MEM, 0, 0).unwrap(), 0);
    assert_eq!(ll.backend().instance(b.raw()).unwrap().run_cycles(), 0);
    assert_eq!(ll.backend().instance(a.raw()).unwrap().run_cycles(), 5);

    ll.dealloc(a).unwrap();
    assert_eq!(ll.read_reg(&b, stream::RADDR, 0).unwrap(), 0);
    ll.dealloc(b).unwrap();
    assert_eq!(ll.backend().live_instances(), 0);
}

#[test]
fn reset_clears_registers_but_not_memory() {
    let mut ll = LastLayer::new(SoftwareDevice::stream_default().unwrap());
    let h = ll.alloc().unwrap();
    ll.write_reg(&h, stream::LENGTH, 0, 12).unwrap();
    ll.write_mem_word(&h, stream::INPUT_MEM, 5, 0, 0xCAFE).unwrap();
    ll.reset(&h, 3).unwrap();
    assert_eq!(ll.read_reg(&h, stream::LENGTH, 0).unwrap(), 0);
    assert_eq!(ll.read_mem_word(&h, stream::INPUT_MEM, 5, 0).unwrap(), 0xCAFE);
    ll.dealloc(h).unwrap();
}

#[test]
fn byte_lane_generation_reads_back_bytes() {
    let config = DriverConfig::for_generation(AbiGeneration::ByteLane);
    let mut ll = LastLayer::with_config(SoftwareDevice::stream_default().unwrap(), config);
    let h = ll.alloc().unwrap();
    let region = BurstRegion::at(100);
    assert_eq!(ll.write_mem(&h, stream::INPUT_MEM, region, &[0x7F, 0x80, 0x01]).unwrap(), 3);
    assert_eq!(ll.read_mem_word(&h, stream::INPUT_MEM, 100, 0).unwrap(), 0x7F);
    assert_eq!(ll.read_mem(&h, stream::INPUT_MEM, region, 3).unwrap(), vec![0x7F, 0x80, 0x01]);
    ll.dealloc(h).unwrap();
}

#[test]
fn leaked_handles_released_on_drop() {
    let mut dev = SoftwareDevice::stream_default().unwrap().with_journal();
    let leaked = {
        let mut ll = LastLayer::new(&mut dev);
        let kept = ll.alloc().unwrap();
        let lost = ll.alloc().unwrap();
        let leaked = lost.raw();
        ll.dealloc(kept).unwrap();
        drop(lost);
        // Handle dropped without dealloc; the facade still tracks the instance
        assert_eq!(ll.live_handles(), 1);
        assert_eq!(ll.backend().live_instances(), 1);
        leaked
    };

    assert_eq!(dev.live_instances(), 0);
    let releases: Vec<_> = dev
        .journal()
        .iter()
        .filter_map(|a| match a {
            Access::Dealloc { handle } => Some(*handle),
            _ => None,
        })
        .collect();
    assert_eq!(releases.len(), 2);
    assert_eq!(releases.iter().filter(|&&h| h == leaked).count(), 1);
    assert_eq!(releases.last(), Some(&leaked));
}

#[test]
fn software_selection() {
    let backend = select_backend(BackendSelection::Software).unwrap();
    assert_eq!(backend.backend_type(), BackendType::Software);
    let mut ll = LastLayer::new(backend);
    let h = ll.alloc().unwrap();
    ll.run(&h, 1).unwrap();
    ll.dealloc(h).unwrap();
}

#[test]
fn missing_library_selection_fails() {
    let err = select_backend(BackendSelection::Library("/nonexistent/libnone.so".into())).unwrap_err();
    assert!(matches!(err, LastLayerError::LibraryLoad { .. }));
}

#[test]
fn relu_through_registry() {
    init_tracing();
    let dev = SoftwareDevice::new(stream_layout(256, 1).unwrap()).with_kernel(Arc::new(ReluKernel::new(1)));
    let mut reg = OperationRegistry::new(LastLayer::new(dev));

    let token = reg.invoke(ops::ALLOC, &[]).unwrap();
    let t = token.as_int().unwrap();
    let call = |reg: &mut OperationRegistry<SoftwareDevice>, op: &str, args: &[i64]| {
        let mut values = vec![Value::Int(t)];
        values.extend(args.iter().copied().map(Value::Int));
        reg.invoke(op, &values).unwrap()
    };

    call(&mut reg, ops::RESET, &[3]);
    call(&mut reg, ops::WRITE_REG, &[i64::from(stream::RADDR), 0, 0]);
    call(&mut reg, ops::WRITE_REG, &[i64::from(stream::WADDR), 0, 128]);
    call(&mut reg, ops::WRITE_REG, &[i64::from(stream::LENGTH), 0, 2]);

    let input: Vec<u8> = vec![0xFD, 5, 0x80, 127, 0, 0xFF, 9, 10];
    reg.invoke(
        ops::WRITE_MEM,
        &[
            Value::Int(t),
            Value::Int(i64::from(stream::INPUT_MEM)),
            Value::Int(0),
            Value::Int(1),
            Value::Int(4),
            Value::Bytes(input.clone()),
        ],
    )
    .unwrap();

    call(&mut reg, ops::WRITE_REG, &[i64::from(stream::LAUNCH), 0, 1]);
    call(&mut reg, ops::RUN, &[1000]);
    assert_eq!(call(&mut reg, ops::READ_REG, &[i64::from(stream::FINISH), 0]), Value::Int(1));
    assert_eq!(call(&mut reg, ops::READ_REG, &[i64::from(stream::CYCLES), 0]), Value::Int(2));

    let out = call(&mut reg, ops::READ_MEM, &[i64::from(stream::OUTPUT_MEM), 128, 1, 4, 8]);
    assert_eq!(out, Value::Bytes(vec![0, 5, 0, 127, 0, 0, 9, 10]));
    assert_eq!(
        call(&mut reg, ops::READ_MEM_WORD, &[i64::from(stream::OUTPUT_MEM), 128, 0]),
        Value::Int(0x7F00_0500)
    );

    assert!(matches!(
        reg.invoke(ops::RUN, &[Value::Int(t), Value::Int(-1)]),
        Err(LastLayerError::InvalidCycleCount { cycles: -1 })
    ));

    reg.invoke(ops::DEALLOC, &[token.clone()]).unwrap();
    assert!(matches!(
        reg.invoke(ops::RUN, &[token, Value::Int(1)]),
        Err(LastLayerError::UnknownHandle { .. })
    ));
    assert_eq!(reg.device().live_handles(), 0);
}

#[test]
fn registry_rejects_bad_parameters_before_transfer() {
    init_tracing();
    let dev = SoftwareDevice::stream_default().unwrap().with_journal();
    let mut reg = OperationRegistry::new(LastLayer::new(dev));
    let token = reg.invoke(ops::ALLOC, &[]).unwrap();

    let write = |burst: i64, word_bytes: i64, bytes: Vec<u8>| {
        vec![
            token.clone(),
            Value::Int(0),
            Value::Int(0),
            Value::Int(burst),
            Value::Int(word_bytes),
            Value::Bytes(bytes),
        ]
    };
    assert!(matches!(
        reg.invoke(ops::WRITE_MEM, &write(1, 5, vec![0; 5])),
        Err(LastLayerError::InvalidParameter { .. })
    ));
    assert!(matches!(
        reg.invoke(ops::WRITE_MEM, &write(0, 4, vec![0; 4])),
        Err(LastLayerError::InvalidParameter { .. })
    ));
    assert!(matches!(
        reg.invoke(ops::WRITE_MEM, &write(1, 4, vec![0; 3])),
        Err(LastLayerError::InvalidBufferLength { len: 3, word_bytes: 4 })
    ));
    assert!(matches!(
        reg.invoke(ops::WRITE_MEM, &write(-1, 4, vec![0; 4])),
        Err(LastLayerError::InvalidArguments { .. })
    ));

    let writes = reg
        .device()
        .backend()
        .journal()
        .iter()
        .filter(|a| matches!(a, lastlayer_driver::Access::WriteMem { .. }))
        .count();
    assert_eq!(writes, 0);
}

#[test]
#[ignore = "requires a compiled LastLayer model in LASTLAYER_LIB"]
fn compiled_model_smoke() {
    let backend = select_backend(BackendSelection::Auto).unwrap();
    assert_eq!(backend.backend_type(), BackendType::Library);
    let mut ll = LastLayer::new(backend);
    let h = ll.alloc().unwrap();
    ll.reset(&h, 10).unwrap();
    ll.run(&h, 20).unwrap();
    ll.dealloc(h).unwrap();
}
