//! Typed identifiers for elements.
//!
//! `ElementId` is assigned by an `ElementStore` and is only meaningful inside
//! it. `ElementRef` is minted once per call site (typically held in a
//! `static` or a long-lived struct) and resolved through the store's
//! reference table, so unrelated callers asking for "their" element never
//! collide.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(pub(crate) u64);

impl ElementId {
    pub fn get(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementRef(u64);

static NEXT_REF: AtomicU64 = AtomicU64::new(1);

impl ElementRef {
    pub fn mint() -> Self {
        Self(NEXT_REF.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_refs_increase() {
        let a = ElementRef::mint();
        let b = ElementRef::mint();
        assert!(b > a);
        assert_ne!(a.get(), b.get());
    }
}
