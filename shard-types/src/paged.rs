//! Paged read projection.

use serde::{Deserialize, Serialize};

/// One page of an ordered collection.
///
/// Computed on demand and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagedResponse<T> {
    /// Items on this page.
    pub data: Vec<T>,
    /// Zero-based page number.
    pub page: usize,
    /// Maximum items per page.
    pub limit: usize,
    /// Items in the whole collection.
    pub total: usize,
    /// `ceil(total / limit)`.
    pub number_of_pages: usize,
}
