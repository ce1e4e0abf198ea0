//! Virtio GPU driver.
//!
//! Drives the paravirtualized GPU behind the second virtio-mmio window of
//! the virt machine: device handshake, control-queue setup, and the five
//! 2D commands that create the framebuffer resource, back it with kernel
//! memory, bind it to scanout 0, and push pixels to the host.
//!
//! Exactly one command is ever in flight. Submission comes in two
//! flavors sharing a publish-and-notify core:
//!
//! - the **kernel-init** path runs single-threaded during bring-up; it
//!   releases the driver lock, enables interrupts, and spins on the
//!   in-flight flag until the interrupt handler clears it;
//! - the **user-syscall** path sleeps the calling process on the driver's
//!   wait queue and is woken by the interrupt handler.
//!
//! The driver lock serializes all device interaction; the interrupt
//! handler takes it too, which is why both wait styles release it first.
//!
//! The framebuffer is handed to at most one process at a time through the
//! ownership gate (`acquire`/`release`/`holds`); the syscall layer
//! enforces the gate before transfer and flush.

pub mod protocol;

#[cfg(all(test, not(target_os = "none")))]
pub(crate) mod sim;

use core::mem::size_of;
use core::ptr;
use core::sync::atomic::{AtomicU32, Ordering};

use spin::{Mutex, MutexGuard, Once};

use crate::arch;
use crate::arch::barriers::memory_fence;
use crate::drivers::virtio::{
    self,
    mmio::VirtioMmioTransport,
    queue::{ControlQueue, QUEUE_DEPTH, VIRTQ_DESC_F_NEXT, VIRTQ_DESC_F_WRITE},
    status, ProbedDevice, DEVICE_ID_GPU, MMIO_WINDOWS, VIRTIO_MAGIC, VIRTIO_VERSION,
};
use crate::graphics::framebuffer::{self, FB_HEIGHT, FB_WIDTH};
use crate::mm;
use crate::process::{self, ProcessId};
use crate::sync::WaitQueue;

use self::protocol::*;

/// The control queue is queue 0. The cursor queue (1) is never configured.
const CONTROL_QUEUE: u32 = 0;

/// Request buffers, one per command kind, plus the response slot the
/// device writes. Packed into a single device-shared frame; descriptor
/// addresses point at the individual fields.
#[repr(C)]
struct CommandBuffers {
    create: ResourceCreate2d,
    attach: AttachBackingSingle,
    scanout: SetScanout,
    transfer: TransferToHost2d,
    flush: ResourceFlush,
    response: CtrlHeader,
}

/// The frame holding [`CommandBuffers`].
///
/// Reached only through raw pointers: the device reads the request
/// buffers and writes the response slot while no lock is held, so no
/// reference to this memory may exist.
struct CommandPage {
    buf: *mut CommandBuffers,
}

// SAFETY: the page is owned by the driver state inside the driver lock;
// device-side access is ordered by the queue's fences.
unsafe impl Send for CommandPage {}

impl CommandPage {
    fn new() -> Result<Self, crate::error::KernelError> {
        let frame = mm::alloc_zeroed_frame()?;
        Ok(Self {
            buf: frame as *mut CommandBuffers,
        })
    }

    /// Store a request into its buffer; returns (physical address, length)
    /// for descriptor 0.
    ///
    /// # Safety
    ///
    /// `slot` must point into the command page.
    unsafe fn store<T>(slot: *mut T, request: T) -> (u64, u32) {
        ptr::write_volatile(slot, request);
        (mm::phys_addr(slot), size_of::<T>() as u32)
    }

    fn write_create(&mut self, req: ResourceCreate2d) -> (u64, u32) {
        // SAFETY: field of the command page.
        unsafe { Self::store(ptr::addr_of_mut!((*self.buf).create), req) }
    }

    fn write_attach(&mut self, req: AttachBackingSingle) -> (u64, u32) {
        // SAFETY: field of the command page.
        unsafe { Self::store(ptr::addr_of_mut!((*self.buf).attach), req) }
    }

    fn write_scanout(&mut self, req: SetScanout) -> (u64, u32) {
        // SAFETY: field of the command page.
        unsafe { Self::store(ptr::addr_of_mut!((*self.buf).scanout), req) }
    }

    fn write_transfer(&mut self, req: TransferToHost2d) -> (u64, u32) {
        // SAFETY: field of the command page.
        unsafe { Self::store(ptr::addr_of_mut!((*self.buf).transfer), req) }
    }

    fn write_flush(&mut self, req: ResourceFlush) -> (u64, u32) {
        // SAFETY: field of the command page.
        unsafe { Self::store(ptr::addr_of_mut!((*self.buf).flush), req) }
    }

    fn response_ptr(&self) -> *mut CtrlHeader {
        // SAFETY: field of the command page.
        unsafe { ptr::addr_of_mut!((*self.buf).response) }
    }

    /// Type word of the response the device last wrote.
    fn response_type(&self) -> u32 {
        // SAFETY: the response slot is valid; volatile because the device
        // writes it.
        unsafe { ptr::read_volatile(ptr::addr_of!((*self.buf).response.cmd_type)) }
    }
}

/// Mutable driver state behind the driver lock.
struct GpuState {
    queue: ControlQueue,
    cmd: CommandPage,
    /// Monotonic count of used-ring entries consumed; compared against
    /// the device's free-running 16-bit index by truncation.
    cursor: u32,
    /// Process holding exclusive framebuffer access.
    owner: Option<ProcessId>,
}

/// The virtio GPU device.
///
/// The sole instance is created at bring-up and lives for the kernel's
/// lifetime; all shared statics of the driver (rings, request buffers,
/// response slot, cursor, owner) live inside it, gated by the driver
/// lock. Only the in-flight flag is outside the lock, because the
/// kernel-init path must spin on it after letting go of the lock.
pub struct GpuDevice {
    regs: VirtioMmioTransport,
    state: Mutex<GpuState>,
    /// 1 while a command has been notified but not yet completed.
    inflight: AtomicU32,
    /// Syscall submitters park here; the interrupt handler wakes them.
    dormant: WaitQueue,
}

impl GpuDevice {
    /// Probe the virtio windows and take the GPU through the virtio
    /// initialization sequence: reset, ACKNOWLEDGE, DRIVER, feature
    /// negotiation (no optional features), FEATURES_OK readback, control
    /// queue installation, DRIVER_OK.
    ///
    /// Runs once on the boot hart with the GPU's interrupt line still
    /// masked. Every mismatch is fatal: the GPU is the only path to the
    /// display, so there is nothing to degrade to.
    pub fn bring_up(probe_base: usize, active_base: usize) -> Self {
        let first = virtio::probe_window(probe_base);
        let second = virtio::probe_window(active_base);

        // The GPU is expected behind the second window; accept it behind
        // the first if the machine is wired differently. Validation below
        // catches the case where neither window has one.
        let base = if second == ProbedDevice::Gpu {
            active_base
        } else if first == ProbedDevice::Gpu {
            probe_base
        } else {
            active_base
        };
        let regs = VirtioMmioTransport::new(base);

        if regs.magic() != VIRTIO_MAGIC {
            panic!("virtio-gpu: no virtio device at {:#x}", base);
        }
        if regs.version() != VIRTIO_VERSION {
            panic!(
                "virtio-gpu: wrong virtio version {} (want {})",
                regs.version(),
                VIRTIO_VERSION
            );
        }
        if regs.device_id() != DEVICE_ID_GPU {
            panic!("virtio-gpu: device at {:#x} is not a GPU", base);
        }

        regs.reset();
        regs.set_status_bits(status::ACKNOWLEDGE);
        regs.set_status_bits(status::DRIVER);

        // The GPU's optional features (virgl, EDID) are all out of scope;
        // accept none of them.
        let _features = regs.read_device_features();
        regs.write_driver_features(0);

        regs.set_status_bits(status::FEATURES_OK);
        if (regs.read_status() & status::FEATURES_OK) == 0 {
            panic!("virtio-gpu: device balked at FEATURES_OK");
        }

        regs.select_queue(CONTROL_QUEUE);
        if regs.queue_ready() {
            panic!("virtio-gpu: queue 0 unexpectedly ready");
        }
        let max = regs.queue_num_max();
        if max == 0 {
            panic!("virtio-gpu: device has no queue 0");
        }
        if (max as usize) < QUEUE_DEPTH {
            panic!(
                "virtio-gpu: queue 0 supports only {} descriptors, need {}",
                max, QUEUE_DEPTH
            );
        }

        let queue = match ControlQueue::new() {
            Ok(queue) => queue,
            Err(e) => panic!("virtio-gpu: ring allocation failed: {}", e),
        };
        let cmd = match CommandPage::new() {
            Ok(cmd) => cmd,
            Err(e) => panic!("virtio-gpu: command page allocation failed: {}", e),
        };

        regs.set_queue_num(QUEUE_DEPTH as u32);
        regs.write_queue_phys(queue.phys_desc(), queue.phys_avail(), queue.phys_used());
        regs.set_queue_ready();

        regs.set_status_bits(status::DRIVER_OK);
        println!("[VIRTIO-GPU] device status: {}", regs.read_status());

        Self {
            regs,
            state: Mutex::new(GpuState {
                queue,
                cmd,
                cursor: 0,
                owner: None,
            }),
            inflight: AtomicU32::new(0),
            dormant: WaitQueue::new(),
        }
    }

    /// Issue the ceremonial commands that put the framebuffer on screen:
    /// create the 2D resource, attach the framebuffer as its backing,
    /// bind it to scanout 0, then transfer and flush once.
    ///
    /// Kernel-init submission path; interrupts must be routed to
    /// [`handle_irq`] before this is called.
    pub fn init_display(&self) {
        println!("[VIRTIO-GPU] framebuffer at {:#x}", framebuffer::phys_addr());
        framebuffer::fill_boot_pattern();

        self.create_framebuffer_resource();
        self.attach_framebuffer_backing();
        self.configure_scanout();
        self.transfer_kernel();
        self.flush_kernel();

        println!(
            "[VIRTIO-GPU] display initialized ({}x{})",
            FB_WIDTH, FB_HEIGHT
        );
    }

    // ---- Request construction ----

    fn full_screen() -> GpuRect {
        GpuRect::new(0, 0, FB_WIDTH, FB_HEIGHT)
    }

    fn transfer_request() -> TransferToHost2d {
        TransferToHost2d {
            hdr: CtrlHeader::new(VIRTIO_GPU_CMD_TRANSFER_TO_HOST_2D),
            rect: Self::full_screen(),
            offset: 0,
            resource_id: FRAMEBUFFER_RESOURCE_ID,
            padding: 0,
        }
    }

    fn flush_request() -> ResourceFlush {
        ResourceFlush {
            hdr: CtrlHeader::new(VIRTIO_GPU_CMD_RESOURCE_FLUSH),
            rect: Self::full_screen(),
            resource_id: FRAMEBUFFER_RESOURCE_ID,
            padding: 0,
        }
    }

    // ---- Kernel-init commands ----

    fn create_framebuffer_resource(&self) {
        let mut state = self.begin_kernel();
        let (phys, len) = state.cmd.write_create(ResourceCreate2d {
            hdr: CtrlHeader::new(VIRTIO_GPU_CMD_RESOURCE_CREATE_2D),
            resource_id: FRAMEBUFFER_RESOURCE_ID,
            format: VIRTIO_GPU_FORMAT_B8G8R8A8_UNORM,
            width: FB_WIDTH,
            height: FB_HEIGHT,
        });
        self.fire_and_spin(state, phys, len);
    }

    fn attach_framebuffer_backing(&self) {
        let mut state = self.begin_kernel();
        let (phys, len) = state.cmd.write_attach(AttachBackingSingle {
            hdr: CtrlHeader::new(VIRTIO_GPU_CMD_RESOURCE_ATTACH_BACKING),
            resource_id: FRAMEBUFFER_RESOURCE_ID,
            nr_entries: 1,
            entry: GpuMemEntry {
                addr: framebuffer::phys_addr(),
                length: framebuffer::size_bytes(),
                padding: 0,
            },
        });
        self.fire_and_spin(state, phys, len);
    }

    fn configure_scanout(&self) {
        let mut state = self.begin_kernel();
        let (phys, len) = state.cmd.write_scanout(SetScanout {
            hdr: CtrlHeader::new(VIRTIO_GPU_CMD_SET_SCANOUT),
            rect: Self::full_screen(),
            scanout_id: 0,
            resource_id: FRAMEBUFFER_RESOURCE_ID,
        });
        self.fire_and_spin(state, phys, len);
    }

    /// Push the framebuffer to the host resource (kernel-init path).
    pub fn transfer_kernel(&self) {
        let mut state = self.begin_kernel();
        let (phys, len) = state.cmd.write_transfer(Self::transfer_request());
        self.fire_and_spin(state, phys, len);
    }

    /// Make the resource visible on the scanout (kernel-init path).
    pub fn flush_kernel(&self) {
        let mut state = self.begin_kernel();
        let (phys, len) = state.cmd.write_flush(Self::flush_request());
        self.fire_and_spin(state, phys, len);
    }

    // ---- User-syscall commands ----

    /// Push the framebuffer to the host resource, sleeping the calling
    /// process until the device completes.
    pub fn transfer_user(&self) {
        let mut state = self.begin_user();
        let (phys, len) = state.cmd.write_transfer(Self::transfer_request());
        self.fire_and_sleep(state, phys, len);
    }

    /// Make the resource visible on the scanout, sleeping the calling
    /// process until the device completes.
    pub fn flush_user(&self) {
        let mut state = self.begin_user();
        let (phys, len) = state.cmd.write_flush(Self::flush_request());
        self.fire_and_sleep(state, phys, len);
    }

    // ---- Submission engine ----

    /// Kernel-init prologue: take the driver lock and mark the device
    /// busy. Bring-up is single-threaded, so a busy device here is a
    /// driver bug, not a condition to wait out.
    fn begin_kernel(&self) -> MutexGuard<'_, GpuState> {
        let state = self.state.lock();
        assert_eq!(
            self.inflight.load(Ordering::SeqCst),
            0,
            "virtio-gpu: init command while device busy"
        );
        self.inflight.store(1, Ordering::SeqCst);
        state
    }

    /// Syscall prologue: take the driver lock, sleep until the device is
    /// dormant, then mark it busy.
    fn begin_user(&self) -> MutexGuard<'_, GpuState> {
        let mut state = self.state.lock();
        while self.inflight.load(Ordering::SeqCst) == 1 {
            state = self.dormant.sleep(state, &self.state);
        }
        self.inflight.store(1, Ordering::SeqCst);
        state
    }

    /// Bind the two-descriptor chain and kick the device.
    ///
    /// Descriptor 0 is always the request (device-read, chained);
    /// descriptor 1 is always the response slot (device-write). The
    /// response is pre-set to a sentinel so a completion that never wrote
    /// the slot shows up as a protocol violation instead of a stale OK.
    fn publish_request(&self, state: &mut GpuState, req_phys: u64, req_len: u32) {
        let resp = state.cmd.response_ptr();
        // SAFETY: resp points at the response slot in the command page.
        unsafe {
            ptr::write_volatile(resp, CtrlHeader::new(RESPONSE_SENTINEL));
        }

        // SAFETY: req_phys/req_len describe a request buffer in the
        // command page; both buffers outlive the command (kernel
        // lifetime).
        unsafe {
            state
                .queue
                .write_desc(0, req_phys, req_len, VIRTQ_DESC_F_NEXT, 1);
            state.queue.write_desc(
                1,
                mm::phys_addr(resp),
                size_of::<CtrlHeader>() as u32,
                VIRTQ_DESC_F_WRITE,
                0,
            );
        }

        state.queue.publish(0);
        self.regs.notify_queue(CONTROL_QUEUE);
    }

    /// Publish, then busy-wait for completion (kernel-init path).
    ///
    /// The lock is dropped before interrupts are enabled because the
    /// interrupt handler takes the same lock; the spin then watches the
    /// in-flight flag with a full fence per iteration so the handler's
    /// store is observed.
    fn fire_and_spin(&self, mut state: MutexGuard<'_, GpuState>, req_phys: u64, req_len: u32) {
        self.publish_request(&mut state, req_phys, req_len);
        drop(state);

        arch::enable_interrupts();
        while self.inflight.load(Ordering::SeqCst) == 1 {
            memory_fence();
            core::hint::spin_loop();
        }
        arch::disable_interrupts();
    }

    /// Publish, then sleep for completion (user-syscall path).
    fn fire_and_sleep<'a>(&'a self, mut state: MutexGuard<'a, GpuState>, req_phys: u64, req_len: u32) {
        self.publish_request(&mut state, req_phys, req_len);
        while self.inflight.load(Ordering::SeqCst) == 1 {
            state = self.dormant.sleep(state, &self.state);
        }
        drop(state);
    }

    // ---- Interrupt service ----

    /// Service a GPU interrupt: acknowledge it, drain the used ring, and
    /// wake the submitter.
    ///
    /// With one command in flight the drain loop runs exactly once, but
    /// it consumes any backlog. A spurious interrupt (nothing in the used
    /// ring) is acknowledged and otherwise ignored -- in particular the
    /// in-flight flag is left alone.
    ///
    /// Every completion must name descriptor 0 (the only head this driver
    /// publishes) and carry RESP_OK_NODATA; anything else is fatal.
    pub fn handle_interrupt(&self) {
        let mut state = self.state.lock();

        let pending = self.regs.read_interrupt_status();
        self.regs.ack_interrupt(pending & 0x3);

        let mut drained = 0u32;
        while state.cursor as u16 != state.queue.used_idx() {
            let elem = state.queue.used_elem(state.cursor);
            if elem.id != 0 {
                panic!(
                    "virtio-gpu: used ring returned descriptor {}, expected 0",
                    elem.id
                );
            }
            let response = state.cmd.response_type();
            if response != VIRTIO_GPU_RESP_OK_NODATA {
                println!("[VIRTIO-GPU] response {:#x}", response);
                panic!("virtio-gpu: did not get OK_NODATA");
            }
            state.cursor += 1;
            drained += 1;
        }

        if drained > 0 {
            self.inflight.store(0, Ordering::SeqCst);
            memory_fence();
        }
        drop(state);
        if drained > 0 {
            self.dormant.wake_all();
        }
    }

    // ---- Ownership gate ----

    /// Grant the current process exclusive framebuffer access.
    ///
    /// Idempotent for the owner; denied while another process holds it.
    pub fn acquire_framebuffer(&self) -> bool {
        let pid = Self::current_pid_or_die("acquire");
        let mut state = self.state.lock();
        match state.owner {
            None => {
                state.owner = Some(pid);
                true
            }
            Some(owner) => owner == pid,
        }
    }

    /// Give up framebuffer ownership. No-op when the current process is
    /// not the owner.
    pub fn release_framebuffer(&self) {
        let pid = Self::current_pid_or_die("release");
        let mut state = self.state.lock();
        if state.owner == Some(pid) {
            state.owner = None;
        }
    }

    /// Does the current process hold the framebuffer?
    pub fn holds_framebuffer(&self) -> bool {
        let pid = Self::current_pid_or_die("holds");
        self.state.lock().owner == Some(pid)
    }

    fn current_pid_or_die(op: &str) -> ProcessId {
        match process::current_pid() {
            Some(pid) => pid,
            None => panic!("virtio-gpu: framebuffer {} with no current process", op),
        }
    }

    // ---- Introspection ----

    /// Is a command currently in flight?
    pub fn is_busy(&self) -> bool {
        self.inflight.load(Ordering::SeqCst) == 1
    }

    /// Commands published to the device since bring-up (free-running).
    pub fn submitted(&self) -> u16 {
        self.state.lock().queue.avail_idx()
    }

    /// Completions consumed from the used ring since bring-up.
    pub fn completed(&self) -> u32 {
        self.state.lock().cursor
    }
}

static GPU: Once<GpuDevice> = Once::new();

/// Bring up the GPU behind the machine's virtio windows and put the
/// framebuffer on screen. Called once from kernel init, after the trap
/// dispatcher routes the GPU's interrupt line to [`handle_irq`].
pub fn init() {
    let device = GPU.call_once(|| GpuDevice::bring_up(MMIO_WINDOWS[0], MMIO_WINDOWS[1]));
    device.init_display();
}

/// The GPU device. Panics before [`init`].
pub fn gpu() -> &'static GpuDevice {
    match GPU.get() {
        Some(device) => device,
        None => panic!(
            "{}",
            crate::error::KernelError::NotInitialized {
                subsystem: "virtio-gpu"
            }
        ),
    }
}

/// Interrupt entry point for the trap dispatcher.
pub fn handle_irq() {
    if let Some(device) = GPU.get() {
        device.handle_interrupt();
    }
}
