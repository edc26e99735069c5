use crate::error::SkyError;

/// Splits `items` into consecutive batches of at most `limit` entries. Order
/// is preserved and only the last batch may be partial.
pub fn batch<T: Clone>(items: &[T], limit: usize) -> Result<Vec<Vec<T>>, SkyError> {
    if limit == 0 {
        return Err(SkyError::InvalidBatchLimit(limit));
    }
    Ok(items.chunks(limit).map(<[T]>::to_vec).collect())
}
