//! Virtio-gpu command marshalling.
//!
//! Fixed-layout request structures for the five control-queue commands
//! this driver issues, plus the shared response slot. Byte layout, type
//! codes, and field order are fixed by the virtio-gpu specification and
//! emitted verbatim; everything is `#[repr(C)]` little-endian.

// --- Command type codes ---

/// Create a 2D resource (host-side image)
pub const VIRTIO_GPU_CMD_RESOURCE_CREATE_2D: u32 = 0x101;
/// Set scanout (bind resource to display output)
pub const VIRTIO_GPU_CMD_SET_SCANOUT: u32 = 0x103;
/// Flush resource to display
pub const VIRTIO_GPU_CMD_RESOURCE_FLUSH: u32 = 0x104;
/// Transfer data from guest memory to host resource
pub const VIRTIO_GPU_CMD_TRANSFER_TO_HOST_2D: u32 = 0x105;
/// Attach backing store pages to a resource
pub const VIRTIO_GPU_CMD_RESOURCE_ATTACH_BACKING: u32 = 0x106;

// --- Response type codes ---

/// Success, no data payload. The only response this driver accepts.
pub const VIRTIO_GPU_RESP_OK_NODATA: u32 = 0x1100;

/// Written into the response slot before each submission so a completion
/// that never touched the slot is caught instead of silently accepted.
/// Not a valid command or response code.
pub const RESPONSE_SENTINEL: u32 = 0xffff_ffff;

// --- Pixel formats ---

/// B8G8R8A8 (BGRA byte order)
pub const VIRTIO_GPU_FORMAT_B8G8R8A8_UNORM: u32 = 1;

/// Resource id used for the framebuffer. Any positive value works as long
/// as every command names the same one.
pub const FRAMEBUFFER_RESOURCE_ID: u32 = 666;

/// Control header -- common 24-byte prefix of every command and response.
///
/// Only `cmd_type` is ever nonzero in this driver: no fencing, no 3D
/// contexts.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CtrlHeader {
    /// Command or response type
    pub cmd_type: u32,
    /// Flags (VIRTIO_GPU_FLAG_FENCE and friends; unused here)
    pub flags: u32,
    /// Fence id for synchronization (unused here)
    pub fence_id: u64,
    /// 3D rendering context (0 for 2D)
    pub ctx_id: u32,
    /// Padding to 24 bytes
    pub padding: u32,
}

impl CtrlHeader {
    pub const fn new(cmd_type: u32) -> Self {
        Self {
            cmd_type,
            flags: 0,
            fence_id: 0,
            ctx_id: 0,
            padding: 0,
        }
    }
}

/// Rectangle, ordered {x, y, width, height}.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct GpuRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl GpuRect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// RESOURCE_CREATE_2D request.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ResourceCreate2d {
    pub hdr: CtrlHeader,
    pub resource_id: u32,
    pub format: u32,
    pub width: u32,
    pub height: u32,
}

/// One guest memory entry for RESOURCE_ATTACH_BACKING.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct GpuMemEntry {
    /// Physical address of the backing memory
    pub addr: u64,
    /// Length in bytes
    pub length: u32,
    pub padding: u32,
}

/// RESOURCE_ATTACH_BACKING request with its single backing entry inline.
///
/// The framebuffer is one physically contiguous region, so nr_entries is
/// always 1 and the entry follows the request in the same buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct AttachBackingSingle {
    pub hdr: CtrlHeader,
    pub resource_id: u32,
    pub nr_entries: u32,
    pub entry: GpuMemEntry,
}

/// SET_SCANOUT request.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SetScanout {
    pub hdr: CtrlHeader,
    pub rect: GpuRect,
    pub scanout_id: u32,
    pub resource_id: u32,
}

/// TRANSFER_TO_HOST_2D request.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct TransferToHost2d {
    pub hdr: CtrlHeader,
    pub rect: GpuRect,
    /// Byte offset into the resource backing store
    pub offset: u64,
    pub resource_id: u32,
    pub padding: u32,
}

/// RESOURCE_FLUSH request.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ResourceFlush {
    pub hdr: CtrlHeader,
    pub rect: GpuRect,
    pub resource_id: u32,
    pub padding: u32,
}
