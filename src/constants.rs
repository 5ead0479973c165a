/// Shared constants for the two-party computation library
/// Protocol version exchanged during session setup
pub const PROTOCOL_VERSION: u32 = 1;

/// Garbling variant byte exchanged in the session header (half-gates, 2 rows per AND/OR)
pub const GARBLING_VARIANT_HALF_GATES: u8 = 1;

/// Number of base OTs consumed by one IKNP extension setup
pub const BASE_OT_COUNT: usize = 128;

/// Evaluator input bit count at which input-label transfer switches from
/// per-wire base OT to the IKNP extension
pub const IKNP_THRESHOLD: usize = 128;

/// Write buffer size handed to the connection writer thread (64 KiB)
pub const WRITE_BUFFER_SIZE: usize = 64 * 1024;

/// Read buffer size for the connection (1 MiB)
pub const READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Number of write buffers circulating between the connection and its writer thread
pub const WRITER_POOL_BUFFERS: usize = 3;

/// Largest data frame a connection will accept before assuming corruption (1 GiB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024 * 1024;

/// Default gate interval between garbage-collection markers in the gate stream
pub const GC_INTERVAL: u32 = 1000;

/// Progress update interval - update progress bar/spinner every N operations
pub const PROGRESS_UPDATE_INTERVAL: u64 = 1000;
