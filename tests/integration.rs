//! Integration tests driving a filter through a complete host.
//!
//! These tests verify that:
//! 1. Attachment is idempotent, bounded in retries and clamped in enumeration
//! 2. The fast path declines whatever the lower table cannot serve
//! 3. Query-open redirection is undone on every outcome
//! 4. Unload converges and waits for in-flight completions

use stackfilter::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// =============================================================================
// Mock Drivers
// =============================================================================

/// A file system whose volumes publish a configurable fast-path table and
/// answer every supported fast-path call with a fixed result.
struct MockFs {
    table: Option<FastIoTable>,
    answer: bool,
    fast_calls: Mutex<Vec<(FastIoKind, Option<NodeId>)>>,
}

impl MockFs {
    fn new(table: Option<FastIoTable>, answer: bool) -> Arc<Self> {
        Arc::new(Self {
            table,
            answer,
            fast_calls: Mutex::new(Vec::new()),
        })
    }
}

impl Driver for MockFs {
    fn dispatch(&self, _: &dyn DeviceHost, _: NodeId, mut request: Request) -> Status {
        request.complete(Status::Success, 0)
    }

    fn fast_io_table(&self) -> Option<FastIoTable> {
        self.table
    }

    fn fast_io(&self, _: &dyn DeviceHost, _: NodeId, call: FastIoCall<'_>) -> bool {
        let addressed = match &call {
            FastIoCall::QueryOpen { request, .. } => request.addressed(),
            _ => None,
        };
        self.fast_calls.lock().unwrap().push((call.kind(), addressed));
        if let FastIoCall::QueryOpen { info, .. } = call {
            info.end_of_file = 4096;
        }
        self.answer
    }
}

/// A keyboard that parks reads until the test completes them.
#[derive(Default)]
struct ParkingKeyboard {
    parked: Mutex<Option<Request>>,
}

impl Driver for ParkingKeyboard {
    fn dispatch(&self, _: &dyn DeviceHost, _: NodeId, request: Request) -> Status {
        *self.parked.lock().unwrap() = Some(request);
        Status::Pending
    }
}

struct World {
    host: MemoryHost,
    filter: Arc<StackFilter>,
    fs: DriverId,
}

impl World {
    fn new(driver: Arc<dyn Driver>, config: FilterConfig) -> Self {
        init_logging();
        let host = MemoryHost::new();
        let fs = DriverId::new("MockFs");
        host.register_driver(fs.clone(), driver).unwrap();
        let filter = StackFilter::new(config).unwrap();
        filter.load(&host).unwrap();
        Self { host, filter, fs }
    }

    fn with_terminal_fs() -> Self {
        init_logging();
        let host = MemoryHost::new();
        let fs = DriverId::new("TerminalFs");
        host.add_terminal_driver(&fs);
        let filter = StackFilter::new(FilterConfig::default()).unwrap();
        filter.load(&host).unwrap();
        Self { host, filter, fs }
    }

    fn node(&self, device_type: DeviceType) -> NodeId {
        self.host
            .create_node(&self.fs, device_type, NodeFlags::BUFFERED_IO, Characteristics::empty())
            .unwrap()
    }

    fn volume(&self) -> NodeId {
        self.node(DeviceType::DiskFileSystem)
    }
}

// =============================================================================
// Tests: Attachment
// =============================================================================

#[test]
fn attach_twice_leaves_one_filter_node() {
    let world = World::with_terminal_fs();
    let vol = world.volume();

    let first = world.filter.attach_to_resource(&world.host, vol).unwrap();
    let second = world.filter.attach_to_resource(&world.host, vol).unwrap();

    assert_eq!(first, second);
    assert_eq!(world.host.stack_of(vol), vec![first, vol]);
    assert_eq!(world.host.node_count(world.filter.id()), 1);
}

#[test]
fn attach_to_never_ready_target_stops_after_eight_attempts() {
    let world = World::with_terminal_fs();
    let vol = world.volume();
    world.host.keep_initializing(vol, None).unwrap();

    let err = world.filter.attach_to_resource(&world.host, vol).unwrap_err();

    assert_eq!(err, FilterError::AttachFailed { target: vol, attempts: 8 });
    assert_eq!(world.host.attach_attempts(), 8);
    assert!(world.host.elapsed() >= Duration::from_millis(4000));
    assert_eq!(world.host.node_count(world.filter.id()), 0);
    assert!(!world.filter.is_attached(&world.host, vol));
}

#[test]
fn retry_bound_follows_configuration() {
    let world = World::new(
        MockFs::new(None, false),
        FilterConfig::default()
            .with_attach_attempts(3)
            .with_attach_retry_delay(Duration::from_millis(20)),
    );
    let vol = world.volume();
    world.host.keep_initializing(vol, None).unwrap();

    let err = world.filter.attach_to_resource(&world.host, vol).unwrap_err();

    assert_eq!(err, FilterError::AttachFailed { target: vol, attempts: 3 });
    assert_eq!(world.host.elapsed(), Duration::from_millis(60));
}

#[test]
fn class_enumeration_is_clamped_to_capacity() {
    let world = World::with_terminal_fs();
    let control = world.volume();
    for _ in 0..100 {
        world.volume();
    }

    let report = world.filter.attach_to_class(&world.host, control).unwrap();

    assert_eq!(report.total, 101);
    assert_eq!(report.examined, ENUMERATION_CAPACITY);
    assert_eq!(report.attached, ENUMERATION_CAPACITY - 1);
    assert_eq!(report.skipped, 1);
    // control node plus the members that fit
    assert_eq!(world.host.node_count(world.filter.id()), ENUMERATION_CAPACITY);
    assert_eq!(world.host.outstanding_references(), 0);
}

#[test]
fn class_notifications_attach_and_detach() {
    let world = World::with_terminal_fs();
    let control = world.volume();
    let vol = world.volume();

    assert!(world.host.activate_class(control).is_empty());
    assert!(world.filter.is_attached(&world.host, control));
    assert!(world.filter.is_attached(&world.host, vol));

    assert!(world.host.deactivate_class(control).is_empty());
    assert!(!world.filter.is_attached(&world.host, control));
    // volumes keep their filter until unload
    assert!(world.filter.is_attached(&world.host, vol));
}

#[test]
fn classes_active_before_load_are_picked_up() {
    init_logging();
    let host = MemoryHost::new();
    let fs = DriverId::new("EarlyFs");
    host.add_terminal_driver(&fs);
    let control = host
        .create_node(&fs, DeviceType::CdRomFileSystem, NodeFlags::empty(), Characteristics::empty())
        .unwrap();
    let vol = host
        .create_node(&fs, DeviceType::CdRomFileSystem, NodeFlags::empty(), Characteristics::empty())
        .unwrap();
    host.activate_class(control);

    let filter = StackFilter::new(FilterConfig::default()).unwrap();
    filter.load(&host).unwrap();

    assert!(filter.is_attached(&host, vol));
}

#[test]
fn class_attach_failure_surfaces_to_notifier() {
    let world = World::with_terminal_fs();
    let control = world.volume();
    world.volume();
    world.host.fail_enumeration(&world.fs, true);

    let errors = world.host.activate_class(control);

    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], FilterError::EnumerationFailed { .. }));
    assert!(!world.filter.is_attached(&world.host, control));
}

// =============================================================================
// Tests: Fast Path
// =============================================================================

#[test]
fn short_table_declines_lock_even_though_populated() {
    let short = FastIoTable::with_declared_size(FastIoSet::all(), FastIoTable::size_for_slots(5));
    let fs = MockFs::new(Some(short), true);
    let world = World::new(fs.clone(), FilterConfig::default());
    let vol = world.volume();
    let node = world.filter.attach_to_resource(&world.host, vol).unwrap();
    let file = FileObject::new("\\pagefile.sys");

    let mut status = IoStatus::default();
    let lock = FastIoCall::Lock {
        file: &file,
        offset: 0,
        length: 512,
        process: ProcessId(8),
        key: 1,
        fail_immediately: false,
        exclusive: true,
        status: &mut status,
    };
    assert!(!world.filter.fast_io(&world.host, node, lock));

    let mut info = FileStandardInformation::default();
    let mut status = IoStatus::default();
    let query = FastIoCall::QueryStandardInfo {
        file: &file,
        wait: true,
        info: &mut info,
        status: &mut status,
    };
    assert!(world.filter.fast_io(&world.host, node, query));

    let calls = fs.fast_calls.lock().unwrap();
    assert_eq!(calls.as_slice(), &[(FastIoKind::QueryStandardInfo, None)]);
}

#[test]
fn query_open_restores_addressed_node_on_both_outcomes() {
    for answer in [true, false] {
        let fs = MockFs::new(Some(FastIoTable::full(FastIoSet::QUERY_OPEN)), answer);
        let world = World::new(fs.clone(), FilterConfig::default());
        let vol = world.volume();
        let node = world.filter.attach_to_resource(&world.host, vol).unwrap();

        let mut request = Request::new(MajorFunction::Create).with_file(FileObject::new("\\x"));
        request.enter(node);
        let mut info = FileNetworkOpenInformation::default();
        let handled = world.filter.fast_io(
            &world.host,
            node,
            FastIoCall::QueryOpen {
                request: &mut request,
                info: &mut info,
            },
        );

        assert_eq!(handled, answer);
        assert_eq!(request.addressed(), Some(node));
        assert_eq!(info.end_of_file, 4096);
        assert_eq!(
            fs.fast_calls.lock().unwrap().as_slice(),
            &[(FastIoKind::QueryOpen, Some(vol))]
        );
    }
}

#[test]
fn vanishing_volume_takes_filter_node_with_it() {
    let world = World::with_terminal_fs();
    let vol = world.volume();
    let node = world.filter.attach_to_resource(&world.host, vol).unwrap();

    world.host.release(vol);

    assert!(world.filter.attached_nodes().is_empty());
    assert!(world.host.node_info(node).is_err());
    let report = world.filter.unload(&world.host).unwrap();
    assert_eq!(report, TeardownReport { passes: 1, detached: 0 });
}

// =============================================================================
// Tests: Quiesce and Teardown
// =============================================================================

#[test]
fn unload_waits_for_parked_keyboard_read() {
    let keyboard = Arc::new(ParkingKeyboard::default());
    let world = World::new(
        keyboard.clone(),
        FilterConfig::default()
            .with_name("KbdSpy")
            .with_quiesce_poll_interval(Duration::from_millis(10)),
    );
    let kbd = world.node(DeviceType::Keyboard);
    let node = world.filter.attach_to_resource(&world.host, kbd).unwrap();

    let status = world.host.call(node, Request::new(MajorFunction::Read));
    assert_eq!(status, Status::Pending);
    assert_eq!(world.filter.pending(), 1);

    let completed = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&completed);
    let parked = Arc::clone(&keyboard);
    let completer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        let mut request = parked.parked.lock().unwrap().take().unwrap();
        let key = KeyboardInputData {
            make_code: 0x2a,
            flags: KeyFlags::E0,
            ..KeyboardInputData::default()
        };
        request.buffer_mut().extend_from_slice(&key.encode());
        flag.store(true, Ordering::SeqCst);
        request.complete(Status::Success, KeyboardInputData::SIZE);
    });

    let report = world.filter.unload(&world.host).unwrap();

    assert!(completed.load(Ordering::SeqCst));
    assert_eq!(world.filter.pending(), 0);
    assert_eq!(report.detached, 1);
    assert_eq!(world.filter.state(), FilterState::Released);
    completer.join().unwrap();
}

#[test]
fn teardown_converges_within_bounded_passes() {
    let world = World::with_terminal_fs();
    let count = 150;
    for _ in 0..count {
        let vol = world.volume();
        world.filter.attach_to_resource(&world.host, vol).unwrap();
    }

    let report = world.filter.unload(&world.host).unwrap();

    assert_eq!(report.detached, count);
    assert!(report.passes <= count.div_ceil(ENUMERATION_CAPACITY) + 1);
    assert_eq!(world.host.node_count(world.filter.id()), 0);
    assert_eq!(world.host.outstanding_references(), 0);
}

#[test]
fn no_notifications_reach_an_unloaded_filter() {
    let world = World::with_terminal_fs();
    world.filter.unload(&world.host).unwrap();
    let control = world.volume();

    assert!(world.host.activate_class(control).is_empty());
    assert_eq!(world.host.node_count(world.filter.id()), 0);
}

// =============================================================================
// Tests: Real Workflows
// =============================================================================

#[test]
fn attach_enumerate_detach_roundtrip() {
    let world = World::with_terminal_fs();
    let resource = world.volume();

    let n1 = world.filter.attach_to_resource(&world.host, resource).unwrap();
    assert_eq!(world.host.stack_of(resource), vec![n1, resource]);
    assert!(world.filter.is_attached(&world.host, resource));

    assert!(world.filter.detach_from_resource(&world.host, resource));
    assert!(!world.filter.is_attached(&world.host, resource));
    assert_eq!(world.host.stack_of(resource), vec![resource]);
    assert_eq!(world.host.outstanding_references(), 0);
}

#[test]
fn requests_flow_through_the_filter() {
    let world = World::with_terminal_fs();
    let vol = world.volume();
    let node = world.filter.attach_to_resource(&world.host, vol).unwrap();

    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    let request = Request::new(MajorFunction::Create)
        .with_file(FileObject::new("\\Windows\\notepad.exe"))
        .on_completion(move |r| *sink.lock().unwrap() = Some(r.io_status()));

    assert_eq!(world.host.call(node, request), Status::Success);
    assert_eq!(seen.lock().unwrap().map(|s| s.status), Some(Status::Success));
}

#[test]
fn filter_is_shareable_across_threads() {
    let world = Arc::new(World::with_terminal_fs());
    let vols: Vec<NodeId> = (0..8).map(|_| world.volume()).collect();

    let handles: Vec<_> = vols
        .iter()
        .map(|&vol| {
            let world = Arc::clone(&world);
            thread::spawn(move || {
                let node = world.filter.attach_to_resource(&world.host, vol).unwrap();
                world.host.call(node, Request::new(MajorFunction::Write))
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), Status::Success);
    }

    assert_eq!(world.filter.attached_nodes().len(), vols.len());
}
