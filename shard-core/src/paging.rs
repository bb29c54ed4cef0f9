//! Deterministic pagination over ordered collections.

use shard_types::{ApiError, PagedResponse};

/// Slice one zero-based page out of `source`.
///
/// The ordering of `source` is the caller's responsibility. Requesting a page
/// past the end yields empty `data` with the correct totals.
///
/// # Errors
///
/// Returns `BadRequest` if `limit` is zero.
pub fn page<T>(source: Vec<T>, page: usize, limit: usize) -> Result<PagedResponse<T>, ApiError> {
    if limit == 0 {
        return Err(ApiError::bad_request(
            "INVALID_LIMIT",
            "limit must be greater than zero",
        ));
    }

    let total = source.len();
    let number_of_pages = total.div_ceil(limit);
    let offset = page.saturating_mul(limit);

    let data = source.into_iter().skip(offset).take(limit).collect();

    Ok(PagedResponse {
        data,
        page,
        limit,
        total,
        number_of_pages,
    })
}
