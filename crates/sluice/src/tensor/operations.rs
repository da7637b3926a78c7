use bytes::BytesMut;
use crate::error::{PipelineError, Result};
use super::{OutputTensor, Tensor};
use super::constant::BATCH_DIM;

/// Bytes per row along the batch dimension of a tensor of `shape`
/// holding `byte_len` bytes.
///
/// Fails if the tensor has no batch dimension.
pub(crate) fn row_bytes(shape: &[usize], byte_len: usize) -> Result<usize> {
    match shape.get(BATCH_DIM) {
        None => Err(PipelineError::Internal(format!(
            "cannot slice rows of rank-0 tensor with shape {:?}", shape
        ))),
        Some(0) => Ok(0),
        Some(rows) => Ok(byte_len / rows),
    }
}

/// Returns a zero-copy view over rows `[start, start + len)` of `tensor`.
///
/// # Parameters
///
/// * `tensor` - Tensor of shape `(batch, ...)`
/// * `start` - First row of the view
/// * `len` - Number of rows in the view
pub(crate) fn slice_rows(tensor: &Tensor, start: usize, len: usize) -> Result<Tensor> {
    let rows = tensor.batch_dim().unwrap_or(0);
    if start + len > rows {
        return Err(PipelineError::Internal(format!(
            "row range [{}, {}) out of bounds for shape {:?}", start, start + len, tensor.shape()
        )));
    }
    let row = row_bytes(tensor.shape(), tensor.byte_len())?;
    let mut shape = tensor.shape().to_vec();
    shape[BATCH_DIM] = len;
    let data = tensor.data().slice(start * row..(start + len) * row);
    Ok(Tensor::from_parts(tensor.dtype(), shape, data))
}

/// Materializes the ragged tail of `tensor` as a fresh `hardware_rows`-row
/// tensor: rows `[start, batch)` are copied into its head, the rest is zero.
///
/// The device only accepts buffers of exactly the hardware batch size, so the
/// short tail cannot be passed as a view.
pub(crate) fn pad_rows(tensor: &Tensor, start: usize, hardware_rows: usize) -> Result<Tensor> {
    let rows = tensor.batch_dim().unwrap_or(0);
    if start > rows || rows - start > hardware_rows {
        return Err(PipelineError::Internal(format!(
            "cannot pad rows [{}, {}) of shape {:?} to {} rows",
            start, rows, tensor.shape(), hardware_rows
        )));
    }
    let row = row_bytes(tensor.shape(), tensor.byte_len())?;
    let mut padded = BytesMut::zeroed(hardware_rows * row);
    let valid = &tensor.data()[start * row..];
    padded[..valid.len()].copy_from_slice(valid);

    let mut shape = tensor.shape().to_vec();
    shape[BATCH_DIM] = hardware_rows;
    Ok(Tensor::from_parts(tensor.dtype(), shape, padded.freeze()))
}

/// Splits the next `len` rows off the front of `remaining`, returning them as
/// an output view that aliases the same allocation.
pub(crate) fn split_rows(remaining: &mut OutputTensor, len: usize) -> Result<OutputTensor> {
    let rows = remaining.shape().get(BATCH_DIM).copied().unwrap_or(0);
    if len > rows {
        return Err(PipelineError::Internal(format!(
            "cannot split {} rows off output with shape {:?}", len, remaining.shape()
        )));
    }
    let row = row_bytes(remaining.shape(), remaining.byte_len())?;
    let placeholder = OutputTensor::from_parts(remaining.dtype(), vec![0], BytesMut::new());
    let (dtype, mut shape, mut data) = std::mem::replace(remaining, placeholder).into_parts();

    let head = data.split_to(len * row);
    let mut head_shape = shape.clone();
    head_shape[BATCH_DIM] = len;
    shape[BATCH_DIM] = rows - len;

    *remaining = OutputTensor::from_parts(dtype, shape, data);
    Ok(OutputTensor::from_parts(dtype, head_shape, head))
}

/// Stitches row views back together in the order given.
///
/// Views split off one allocation and rejoined in order are merged without
/// copying; anything else is appended.
pub(crate) fn join_rows(views: Vec<OutputTensor>) -> Result<Option<OutputTensor>> {
    let mut iter = views.into_iter();
    let Some(first) = iter.next() else {
        return Ok(None);
    };
    let (dtype, mut shape, mut data) = first.into_parts();
    if shape.is_empty() {
        return Err(PipelineError::Internal("cannot join rank-0 output views".to_string()));
    }
    for view in iter {
        let (view_dtype, view_shape, view_data) = view.into_parts();
        if view_dtype != dtype || view_shape.get(1..) != shape.get(1..) || view_shape.is_empty() {
            return Err(PipelineError::Internal(format!(
                "cannot join output view {:?} onto {:?}", view_shape, shape
            )));
        }
        shape[BATCH_DIM] += view_shape[BATCH_DIM];
        data.unsplit(view_data);
    }
    Ok(Some(OutputTensor::from_parts(dtype, shape, data)))
}
