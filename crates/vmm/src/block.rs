//! Block device interface for the swap partition.

/// Errors reported by a block device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BlockError {
    /// The sector lies past the end of the device.
    #[error("sector {0} is out of range")]
    OutOfRange(u64),
    /// The buffer is not exactly one sector long.
    #[error("buffer is {actual} bytes, expected one {expected}-byte sector")]
    BufferSize { expected: usize, actual: usize },
    /// The device failed the transfer.
    #[error("device I/O error")]
    Device,
}

/// A device addressed in fixed-size sectors.
///
/// Transfers are always exactly one sector. Implementations must be safe to call from
/// several threads at once.
pub trait BlockDevice: Send + Sync {
    /// Size of one sector in bytes.
    fn sector_size(&self) -> usize;

    /// Number of sectors on the device.
    fn sector_count(&self) -> u64;

    /// Reads sector `sector` into `buf`.
    fn read(&self, sector: u64, buf: &mut [u8]) -> Result<(), BlockError>;

    /// Writes `buf` to sector `sector`.
    fn write(&self, sector: u64, buf: &[u8]) -> Result<(), BlockError>;
}
