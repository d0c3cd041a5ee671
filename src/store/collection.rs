//! In-memory state of one collection: options, document locations in insert
//! order, and its index catalog.

use crate::store::index::IndexCatalog;
use crate::types::{CollectionOptions, DiskLoc};

#[derive(Debug)]
pub struct Collection {
    ns: String,
    options: CollectionOptions,
    docs: Vec<DiskLoc>,
    indexes: IndexCatalog,
}

impl Collection {
    pub(crate) fn new<S: Into<String>>(ns: S, options: CollectionOptions) -> Self {
        Self {
            ns: ns.into(),
            options,
            docs: Vec::new(),
            indexes: IndexCatalog::default(),
        }
    }

    #[must_use]
    pub fn ns(&self) -> &str {
        &self.ns
    }

    #[must_use]
    pub fn options(&self) -> &CollectionOptions {
        &self.options
    }

    #[must_use]
    pub fn index_catalog(&self) -> &IndexCatalog {
        &self.indexes
    }

    pub(crate) fn index_catalog_mut(&mut self) -> &mut IndexCatalog {
        &mut self.indexes
    }

    /// Document locations in forward (insertion) order.
    pub fn locs(&self) -> impl Iterator<Item = DiskLoc> + '_ {
        self.docs.iter().copied()
    }

    #[must_use]
    pub fn doc_count(&self) -> usize {
        self.docs.len()
    }

    /// Record a newly inserted location, trimming the oldest entries past a
    /// capped collection's document budget.
    pub(crate) fn push_loc(&mut self, loc: DiskLoc) {
        self.docs.push(loc);
        if self.options.capped {
            if let Some(max) = self.options.max {
                let max = usize::try_from(max.max(1)).unwrap_or(usize::MAX);
                while self.docs.len() > max {
                    let trimmed = self.docs.remove(0);
                    self.indexes.remove_loc(trimmed);
                }
            }
        }
    }

    /// Restore a location from the catalog without capped-trim side effects.
    pub(crate) fn push_loc_unchecked(&mut self, loc: DiskLoc) {
        self.docs.push(loc);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capped_collection_trims_oldest() {
        let options = CollectionOptions {
            capped: true,
            max: Some(2),
            ..CollectionOptions::default()
        };
        let mut coll = Collection::new("app.events", options);
        for i in 0..4u64 {
            coll.push_loc(DiskLoc::new(0, i * 64));
        }
        let remaining: Vec<DiskLoc> = coll.locs().collect();
        assert_eq!(remaining, vec![DiskLoc::new(0, 128), DiskLoc::new(0, 192)]);
    }

    #[test]
    fn uncapped_collection_keeps_everything() {
        let mut coll = Collection::new("app.events", CollectionOptions::default());
        for i in 0..4u64 {
            coll.push_loc(DiskLoc::new(0, i * 64));
        }
        assert_eq!(coll.doc_count(), 4);
    }
}
