//! Simulated virtio-gpu device for host-side tests.
//!
//! [`SimWindow`] is a 4 KiB chunk of ordinary memory standing in for one
//! virtio-mmio register window; the driver's volatile register accesses
//! land in it directly, so the whole handshake works without a device
//! behind it. [`DeviceModel`] then plays the device side of the
//! virtqueue: it locates the rings through the addresses the driver
//! programmed into the window, parses each published descriptor chain,
//! writes the response header and the used ring, raises the interrupt
//! bit, and invokes the driver's interrupt handler from its own thread --
//! the same asynchronous shape a real device has.

use core::cell::UnsafeCell;
use core::mem::size_of;
use core::ptr;
use core::sync::atomic::{fence, AtomicBool, Ordering};

use std::boxed::Box;
use std::sync::{Mutex as StdMutex, MutexGuard as StdMutexGuard, OnceLock, PoisonError};
use std::vec::Vec;

use super::protocol::{CtrlHeader, VIRTIO_GPU_RESP_OK_NODATA};
use super::GpuDevice;
use crate::drivers::virtio::mmio::regs;
use crate::drivers::virtio::queue::{
    VirtqDesc, QUEUE_DEPTH, VIRTQ_DESC_F_NEXT, VIRTQ_DESC_F_WRITE,
};
use crate::drivers::virtio::{DEVICE_ID_GPU, VIRTIO_MAGIC};

/// One fake 4 KiB register window.
#[repr(C, align(4096))]
pub struct SimWindow {
    mem: UnsafeCell<[u32; 1024]>,
}

// SAFETY: the window is plain memory poked from the driver thread and the
// device-model thread; every access on both sides is volatile and the
// protocol's fences order the ones that matter.
unsafe impl Sync for SimWindow {}

impl SimWindow {
    /// A window with nothing behind it (magic reads as zero).
    pub fn new_blank() -> Box<Self> {
        Box::new(Self {
            mem: UnsafeCell::new([0; 1024]),
        })
    }

    /// A window advertising a modern virtio GPU with an 8-deep queue.
    pub fn new_gpu() -> Box<Self> {
        Self::new_device(DEVICE_ID_GPU, 2, QUEUE_DEPTH as u32)
    }

    /// A window advertising an arbitrary virtio device.
    pub fn new_device(device_id: u32, version: u32, queue_num_max: u32) -> Box<Self> {
        let window = Self::new_blank();
        window.set_reg(regs::MAGIC, VIRTIO_MAGIC);
        window.set_reg(regs::VERSION, version);
        window.set_reg(regs::DEVICE_ID, device_id);
        window.set_reg(regs::QUEUE_NUM_MAX, queue_num_max);
        window
    }

    /// Base address handed to the driver.
    pub fn base(&self) -> usize {
        self.mem.get() as usize
    }

    /// Read a register the way the device would.
    pub fn reg(&self, offset: usize) -> u32 {
        // SAFETY: offset is a register offset inside the 4 KiB window.
        unsafe { ptr::read_volatile((self.base() + offset) as *const u32) }
    }

    /// Poke a register the way the device would.
    pub fn set_reg(&self, offset: usize, value: u32) {
        // SAFETY: offset is a register offset inside the 4 KiB window.
        unsafe { ptr::write_volatile((self.base() + offset) as *mut u32, value) }
    }

    fn ring_phys(&self, low: usize, high: usize) -> u64 {
        self.reg(low) as u64 | (self.reg(high) as u64) << 32
    }

    fn desc_base(&self) -> u64 {
        self.ring_phys(regs::QUEUE_DESC_LOW, regs::QUEUE_DESC_HIGH)
    }

    fn avail_base(&self) -> u64 {
        self.ring_phys(regs::DRIVER_DESC_LOW, regs::DRIVER_DESC_HIGH)
    }

    fn used_base(&self) -> u64 {
        self.ring_phys(regs::DEVICE_DESC_LOW, regs::DEVICE_DESC_HIGH)
    }

    fn avail_idx(&self) -> u16 {
        // SAFETY: the driver programmed avail_base with the address of a
        // live available ring; idx sits at offset 2.
        unsafe { ptr::read_volatile((self.avail_base() as usize + 2) as *const u16) }
    }

    fn used_idx(&self) -> u16 {
        // SAFETY: as avail_idx, for the used ring.
        unsafe { ptr::read_volatile((self.used_base() as usize + 2) as *const u16) }
    }
}

/// What the device saw for one served command.
#[derive(Debug, Clone, Copy)]
pub struct ServedCommand {
    /// Command type word read from the request buffer
    pub cmd_type: u32,
    /// Head index taken from the available ring
    pub head: u16,
    /// Snapshot of the two chain descriptors
    pub desc0: VirtqDesc,
    pub desc1: VirtqDesc,
    /// avail.idx - used.idx at service time (1 unless the driver broke
    /// the single-in-flight rule)
    pub outstanding: u16,
    /// Driver's in-flight flag at service time
    pub busy: bool,
}

/// Serve the oldest unserved available-ring entry: validate the chain,
/// write `response` into the response slot, fill the used ring, and raise
/// the interrupt bit. Does NOT invoke the driver's interrupt handler.
pub fn complete_next(window: &SimWindow, response: u32) -> ServedCommand {
    serve_raw(window, response, None, None)
}

/// Like [`complete_next`] but reports `head` in the used ring regardless
/// of what the driver published. For protocol-violation tests.
pub fn complete_next_with_head(window: &SimWindow, response: u32, head: u32) -> ServedCommand {
    serve_raw(window, response, Some(head), None)
}

fn serve_raw(
    window: &SimWindow,
    response: u32,
    head_override: Option<u32>,
    busy_probe: Option<&GpuDevice>,
) -> ServedCommand {
    let served = window.used_idx();
    let pending = window.avail_idx();
    assert_ne!(served, pending, "device model: nothing published");
    let outstanding = pending.wrapping_sub(served);

    // Pull the head out of the available ring.
    let avail_slot = window.avail_base() as usize + 4 + 2 * (served as usize % QUEUE_DEPTH);
    // SAFETY: the driver's rings are live pages in this process; the
    // slot address is in bounds by construction.
    let head = unsafe { ptr::read_volatile(avail_slot as *const u16) };

    fence(Ordering::SeqCst);

    // Walk the two-descriptor chain.
    let desc_at = |index: u16| -> VirtqDesc {
        let addr = window.desc_base() as usize + size_of::<VirtqDesc>() * index as usize;
        // SAFETY: index is a descriptor slot inside the table page.
        unsafe { ptr::read_volatile(addr as *const VirtqDesc) }
    };
    let desc0 = desc_at(head);
    assert_ne!(desc0.flags & VIRTQ_DESC_F_NEXT, 0, "request not chained");
    assert_eq!(desc0.flags & VIRTQ_DESC_F_WRITE, 0, "request marked writable");
    let desc1 = desc_at(desc0.next);
    assert_ne!(desc1.flags & VIRTQ_DESC_F_WRITE, 0, "response not writable");
    assert_eq!(desc1.flags & VIRTQ_DESC_F_NEXT, 0, "response has a successor");
    assert!(desc1.len as usize >= size_of::<CtrlHeader>());

    // SAFETY: desc0.addr points at a request buffer in this process.
    let cmd_type = unsafe { ptr::read_volatile(desc0.addr as usize as *const u32) };

    let busy = busy_probe.map_or(true, |dev| dev.inflight.load(Ordering::SeqCst) == 1);

    // Write the response the driver will inspect.
    // SAFETY: desc1 points at the driver's response slot.
    unsafe {
        ptr::write_volatile(desc1.addr as usize as *mut CtrlHeader, CtrlHeader::new(response));
    }
    fence(Ordering::SeqCst);

    // Publish the completion on the used ring.
    let used_base = window.used_base() as usize;
    let elem_addr = used_base + 4 + 8 * (served as usize % QUEUE_DEPTH);
    // SAFETY: elem_addr/idx are inside the live used ring page.
    unsafe {
        ptr::write_volatile(elem_addr as *mut u32, head_override.unwrap_or(head as u32));
        ptr::write_volatile((elem_addr + 4) as *mut u32, size_of::<CtrlHeader>() as u32);
        fence(Ordering::SeqCst);
        ptr::write_volatile((used_base + 2) as *mut u16, served.wrapping_add(1));
    }
    fence(Ordering::SeqCst);

    window.set_reg(regs::INTERRUPT_STATUS, window.reg(regs::INTERRUPT_STATUS) | 1);

    ServedCommand {
        cmd_type,
        head,
        desc0,
        desc1,
        outstanding,
        busy,
    }
}

/// The asynchronous device: serves published chains from its own thread
/// and delivers the interrupt by calling the driver's handler.
pub struct DeviceModel<'w> {
    window: &'w SimWindow,
    served: StdMutex<Vec<ServedCommand>>,
    stopped: AtomicBool,
}

impl<'w> DeviceModel<'w> {
    pub fn new(window: &'w SimWindow) -> Self {
        Self {
            window,
            served: StdMutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        }
    }

    /// Ask the service loop to exit once the rings are drained.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Everything served so far.
    pub fn served(&self) -> Vec<ServedCommand> {
        self.served
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Command type words served so far, in order.
    pub fn served_types(&self) -> Vec<u32> {
        self.served().iter().map(|record| record.cmd_type).collect()
    }

    /// Service loop. Runs until [`stop`](Self::stop) with the rings
    /// drained; delivers each completion through `device`'s interrupt
    /// handler, exactly as the trap dispatcher would.
    pub fn run(&self, device: &GpuDevice) {
        loop {
            if self.window.reg(regs::QUEUE_READY) == 0
                || self.window.avail_idx() == self.window.used_idx()
            {
                if self.stopped.load(Ordering::SeqCst) {
                    return;
                }
                std::thread::yield_now();
                continue;
            }

            let record = serve_raw(self.window, VIRTIO_GPU_RESP_OK_NODATA, None, Some(device));
            self.served
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(record);

            device.handle_interrupt();
        }
    }
}

/// The process-wide device used by syscall-layer tests: one GPU global,
/// one simulated device thread serving it forever.
pub fn shared_gpu() -> (&'static GpuDevice, &'static DeviceModel<'static>) {
    static SHARED: OnceLock<(&'static GpuDevice, &'static DeviceModel<'static>)> = OnceLock::new();

    *SHARED.get_or_init(|| {
        let probe: &'static SimWindow = Box::leak(SimWindow::new_blank());
        let active: &'static SimWindow = Box::leak(SimWindow::new_gpu());

        let device: &'static GpuDevice =
            super::GPU.call_once(|| GpuDevice::bring_up(probe.base(), active.base()));
        let model: &'static DeviceModel<'static> = Box::leak(Box::new(DeviceModel::new(active)));

        std::thread::spawn(move || model.run(device));
        device.init_display();

        (device, model)
    })
}

/// Serializes tests that go through the shared global device, since they
/// share one ownership gate and one command stream.
pub fn shared_gpu_lock() -> StdMutexGuard<'static, ()> {
    static LOCK: StdMutex<()> = StdMutex::new(());
    LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}
