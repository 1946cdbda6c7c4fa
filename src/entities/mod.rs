//! Pipeline workflows: pagination, per-row enrichment, table assembly, headers snapshot.

pub(crate) mod enrich;
pub(crate) mod headers;
pub(crate) mod paginate;
pub(crate) mod table;

#[derive(Debug, Clone)]
pub struct SearchPage<T> {
    pub results: Vec<T>,
    pub total: Option<usize>,
}

impl<T> SearchPage<T> {
    pub fn offset(results: Vec<T>, total: Option<usize>) -> Self {
        Self { results, total }
    }
}
