use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use udp_frame_bridge::managed::simulated::{FrameStore, SimulatedVm};
use udp_frame_bridge::{install, BridgeConfig, GlobalScope, JsValue};

/// Install from a runtime-owned thread so the bench thread stays native
fn installed(frame_sizes: &'static [usize]) -> (SimulatedVm, GlobalScope) {
    std::thread::spawn(move || {
        let vm = SimulatedVm::new();
        let env = vm.enter_managed_thread();
        let store = Arc::new(FrameStore::new());
        for (frame_no, &len) in frame_sizes.iter().enumerate() {
            store.insert_frame(frame_no as i32, vec![0xa5u8; len]);
        }
        let this = vm.new_object(store);

        let mut scope = GlobalScope::new();
        install(&*env, &this, Some(&mut scope), "", BridgeConfig::default()).expect("install");
        env.delete_local_ref(this);
        vm.leave_managed_thread();
        (vm, scope)
    })
    .join()
    .expect("install thread panicked")
}

fn marshal_benchmarks(c: &mut Criterion) {
    static SIZES: [usize; 3] = [64, 1500, 65_507];
    let (_vm, scope) = installed(&SIZES);

    let mut group = c.benchmark_group("get_frame_data");
    for (frame_no, &len) in SIZES.iter().enumerate() {
        let args = [JsValue::from(frame_no as i32)];
        group.throughput(Throughput::Bytes(len as u64));
        group.bench_with_input(BenchmarkId::from_parameter(len), &args, |b, args| {
            b.iter(|| scope.call("JSI_RN_UDP_getFrameDataByFrameNo", args))
        });
    }
    group.finish();

    c.bench_function("get_count_of_memorised_frames", |b| {
        b.iter(|| scope.call("JSI_RN_UDP_getCountOfMemorisedFrames", &[]))
    });
}

criterion_group!(benches, marshal_benchmarks);
criterion_main!(benches);
