//! A volume and keyboard filter running against the in-memory host.
//!
//! This example walks through a full filter lifetime: a file system
//! announces itself, the filter attaches to it and its volumes, requests and
//! fast-path calls pass through, a keystroke is logged and everything is
//! unloaded again.
//!
//! Run with: `RUST_LOG=debug cargo run --example volume_filter`

use stackfilter::*;
use std::sync::Arc;

// =============================================================================
// Step 1: A lower driver
// =============================================================================

/// A file system that services reads on the fast path and answers keyboard
/// reads with one key press.
struct DemoFs;

impl Driver for DemoFs {
    fn dispatch(&self, host: &dyn DeviceHost, node: NodeId, mut request: Request) -> Status {
        let is_keyboard = host
            .node_info(node)
            .is_ok_and(|info| info.device_type == DeviceType::Keyboard);
        if is_keyboard && request.major() == MajorFunction::Read {
            let key = KeyboardInputData {
                make_code: 0x1c,
                ..KeyboardInputData::default()
            };
            request.buffer_mut().extend_from_slice(&key.encode());
            return request.complete(Status::Success, KeyboardInputData::SIZE);
        }
        request.complete(Status::Success, 0)
    }

    fn fast_io_table(&self) -> Option<FastIoTable> {
        Some(FastIoTable::full(FastIoSet::READ | FastIoSet::QUERY_OPEN))
    }

    fn fast_io(&self, _: &dyn DeviceHost, _: NodeId, call: FastIoCall<'_>) -> bool {
        matches!(call, FastIoCall::Read { .. } | FastIoCall::QueryOpen { .. })
    }
}

fn main() -> Result<(), FilterError> {
    env_logger::init();

    // =========================================================================
    // Step 2: Build the host and its devices
    // =========================================================================
    let host = MemoryHost::new();
    let fs = DriverId::new("DemoFs");
    host.register_driver(fs.clone(), Arc::new(DemoFs))?;

    let control = host.create_node(
        &fs,
        DeviceType::DiskFileSystem,
        NodeFlags::empty(),
        Characteristics::empty(),
    )?;
    let volumes = (0..3)
        .map(|_| {
            host.create_node(
                &fs,
                DeviceType::DiskFileSystem,
                NodeFlags::DIRECT_IO,
                Characteristics::SECURE_OPEN,
            )
        })
        .collect::<Result<Vec<_>, _>>()?;
    let keyboard = host.create_node(
        &fs,
        DeviceType::Keyboard,
        NodeFlags::BUFFERED_IO,
        Characteristics::empty(),
    )?;

    // =========================================================================
    // Step 3: Load the filter and let the file system announce itself
    // =========================================================================
    let filter = StackFilter::new(FilterConfig::default().with_name("DemoFilter"))?;
    filter.load(&host)?;
    for err in host.activate_class(control) {
        println!("class activation failed: {err}");
    }
    let kbd_node = filter.attach_to_resource(&host, keyboard)?;
    println!("filter nodes: {:?}", filter.attached_nodes());

    // =========================================================================
    // Step 4: Traffic
    // =========================================================================
    let volume = volumes[0];
    let top = host.reference_top(volume)?;
    let top = NodeRef::adopt(&host, top);
    println!("stack of {volume}: {:?}", host.stack_of(volume));

    let open = Request::new(MajorFunction::Create).with_file(FileObject::new("\\report.txt"));
    println!("open: {:?}", host.call(top.id(), open));

    let file = FileObject::new("\\report.txt");
    let mut buffer = [0u8; 64];
    let mut status = IoStatus::default();
    let read = FastIoCall::Read {
        file: &file,
        offset: 0,
        length: 64,
        wait: true,
        lock_key: 0,
        buffer: &mut buffer,
        status: &mut status,
    };
    println!("fast read handled: {}", filter.fast_io(&host, top.id(), read));

    let mut info = FileStandardInformation::default();
    let mut status = IoStatus::default();
    let query = FastIoCall::QueryStandardInfo {
        file: &file,
        wait: true,
        info: &mut info,
        status: &mut status,
    };
    println!("fast query handled: {}", filter.fast_io(&host, top.id(), query));
    drop(top);

    println!("key read: {:?}", host.call(kbd_node, Request::new(MajorFunction::Read)));
    println!("in flight: {}", filter.pending());

    // =========================================================================
    // Step 5: Unload
    // =========================================================================
    let report = filter.unload(&host)?;
    println!(
        "unloaded: {} nodes in {} passes, state {}",
        report.detached,
        report.passes,
        filter.state()
    );
    Ok(())
}
