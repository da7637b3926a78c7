/// # Constants with reserved meanings in sluice

/// In a given tensor shape, sluice reserves the `0th` dimension for batching
pub const BATCH_DIM: usize = 0;

/// Batch-axis value declaring that a tensor has no batch dimension
pub const NO_BATCH_AXIS: i64 = -1;
