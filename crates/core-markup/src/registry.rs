//! Tag Registry: tag name -> handlers registered under that name, one per
//! delimiter style.
//!
//! Built once at startup from a declarative list and read-only afterwards;
//! parsers share it behind an `Arc`.

use ahash::AHashMap;
use smallvec::SmallVec;
use tracing::warn;

use crate::tags::{RichTextTag, TagKind, TagStyle};

#[derive(Debug, Clone, Default)]
pub struct TagRegistry {
    tags: AHashMap<&'static str, SmallVec<[TagKind; 2]>>,
}

impl TagRegistry {
    /// Registry holding every built-in handler.
    pub fn builtin() -> Self {
        TagRegistryBuilder::new().with_all(TagKind::BUILTIN).build()
    }

    pub fn builder() -> TagRegistryBuilder {
        TagRegistryBuilder::new()
    }

    /// Handler registered for `name` invoked with `style`. Names match
    /// case-insensitively.
    pub fn lookup(&self, name: &str, style: TagStyle) -> Option<TagKind> {
        let found = match self.tags.get(name) {
            Some(list) => list,
            None => self.tags.get(name.to_ascii_lowercase().as_str())?,
        };
        found.iter().copied().find(|t| t.style() == style)
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.tags.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tags.values().map(|v| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct TagRegistryBuilder {
    registry: TagRegistry,
}

impl TagRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `tag` under each of its names. A later handler with the same
    /// name and style replaces the earlier one.
    pub fn with(mut self, tag: TagKind) -> Self {
        for &name in tag.names() {
            let list = self.registry.tags.entry(name).or_default();
            if let Some(existing) = list.iter_mut().find(|t| t.style() == tag.style()) {
                warn!(target: "markup.registry", name, ?existing, replacement = ?tag, "tag_handler_replaced");
                *existing = tag;
            } else {
                list.push(tag);
            }
        }
        self
    }

    pub fn with_all(self, tags: &[TagKind]) -> Self {
        tags.iter().fold(self, |b, t| b.with(*t))
    }

    pub fn build(self) -> TagRegistry {
        self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CaseStyle;

    #[test]
    fn builtin_lookup_by_style() {
        let reg = TagRegistry::builtin();
        assert_eq!(reg.lookup("size", TagStyle::ValueParam), Some(TagKind::Size));
        assert_eq!(reg.lookup("size", TagStyle::NoParams), None);
        assert_eq!(reg.lookup("/size", TagStyle::NoParams), Some(TagKind::CloseSize));
        assert_eq!(reg.lookup("sprite", TagStyle::Attributes), Some(TagKind::Sprite));
    }

    #[test]
    fn aliases_share_handler() {
        let reg = TagRegistry::builtin();
        let upper = Some(TagKind::Case(CaseStyle::Upper));
        assert_eq!(reg.lookup("uppercase", TagStyle::NoParams), upper);
        assert_eq!(reg.lookup("allcaps", TagStyle::NoParams), upper);
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let reg = TagRegistry::builtin();
        assert_eq!(reg.lookup("B", TagStyle::NoParams), Some(TagKind::Bold));
        assert_eq!(reg.lookup("SiZe", TagStyle::ValueParam), Some(TagKind::Size));
    }

    #[test]
    fn unknown_names_miss() {
        let reg = TagRegistry::builtin();
        assert_eq!(reg.lookup("unknown", TagStyle::NoParams), None);
        assert_eq!(reg.lookup("", TagStyle::Attributes), None);
    }

    #[test]
    fn subset_registry() {
        let reg = TagRegistry::builder()
            .with(TagKind::Bold)
            .with(TagKind::CloseBold)
            .build();
        assert_eq!(reg.len(), 2);
        assert!(reg.contains_name("b"));
        assert!(!reg.contains_name("size"));
    }
}
