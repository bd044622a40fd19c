//! Elements and the registration-ordered store that owns them.

use std::borrow::Cow;
use std::fmt;

use ahash::AHashMap;
use core_markup::{ParsedResult, Parser};
use tracing::trace;

use crate::combiner;
use crate::reference::{ElementId, ElementRef};

pub type Generator = Box<dyn Fn() -> String + Send>;

pub enum Content {
    /// Text parsed once; the cache is refreshed only by an explicit set.
    Fixed { text: String, parsed: ParsedResult },
    /// Text produced and parsed again on every composite pass.
    Generated(Generator),
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Content::Fixed { text, parsed } => f
                .debug_struct("Fixed")
                .field("text", text)
                .field("offset", &parsed.offset)
                .finish(),
            Content::Generated(_) => f.write_str("Generated(..)"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ElementOptions {
    /// Blank lines appended after the element's content. Each adds one
    /// default line height to the element's offset.
    pub additional_line_breaks: u32,
}

#[derive(Debug)]
pub struct Element {
    content: Content,
    /// Scaled position, 0 (bottom) to 1000 (top).
    pub position: f32,
    /// Higher paints first (on top); ties keep registration order.
    pub z_index: i32,
    pub enabled: bool,
    pub options: ElementOptions,
}

impl Element {
    pub fn fixed(parser: &Parser, text: impl Into<String>, position: f32) -> Self {
        let text = text.into();
        let parsed = parser.parse(&text);
        Self::with_content(Content::Fixed { text, parsed }, position)
    }

    pub fn generated<F>(generator: F, position: f32) -> Self
    where
        F: Fn() -> String + Send + 'static,
    {
        Self::with_content(Content::Generated(Box::new(generator)), position)
    }

    fn with_content(content: Content, position: f32) -> Self {
        Self {
            content,
            position,
            z_index: 1,
            enabled: true,
            options: ElementOptions::default(),
        }
    }

    pub fn with_z_index(mut self, z_index: i32) -> Self {
        self.z_index = z_index;
        self
    }

    pub fn with_options(mut self, options: ElementOptions) -> Self {
        self.options = options;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn content(&self) -> &Content {
        &self.content
    }

    /// Replace the content with fixed `text`, reparsing immediately.
    pub fn set_text(&mut self, parser: &Parser, text: impl Into<String>) {
        let text = text.into();
        let parsed = parser.parse(&text);
        self.content = Content::Fixed { text, parsed };
    }

    /// Source text as the caller supplied it (generated content is produced
    /// on demand).
    pub fn text(&self) -> Cow<'_, str> {
        match &self.content {
            Content::Fixed { text, .. } => Cow::Borrowed(text),
            Content::Generated(generate) => Cow::Owned(generate()),
        }
    }

    pub fn parsed(&self, parser: &Parser) -> Cow<'_, ParsedResult> {
        match &self.content {
            Content::Fixed { parsed, .. } => Cow::Borrowed(parsed),
            Content::Generated(generate) => Cow::Owned(parser.parse(&generate())),
        }
    }
}

/// Elements of one pipeline, iterated in registration order, plus the
/// reference table resolving call-site tokens to elements.
#[derive(Debug, Default)]
pub struct ElementStore {
    parser: Parser,
    next_id: u64,
    elements: Vec<(ElementId, Element)>,
    refs: AHashMap<ElementRef, ElementId>,
}

impl ElementStore {
    pub fn new(parser: Parser) -> Self {
        Self {
            parser,
            next_id: 0,
            elements: Vec::new(),
            refs: AHashMap::new(),
        }
    }

    pub fn parser(&self) -> &Parser {
        &self.parser
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn add(&mut self, element: Element) -> ElementId {
        let id = ElementId(self.next_id);
        self.next_id += 1;
        trace!(target: "compose.store", id = id.get(), position = element.position, z = element.z_index, "element_added");
        self.elements.push((id, element));
        id
    }

    /// Remove `id`, forgetting every reference that resolved to it.
    pub fn remove(&mut self, id: ElementId) -> Option<Element> {
        let index = self.index_of(id)?;
        let (_, element) = self.elements.remove(index);
        self.refs.retain(|_, target| *target != id);
        trace!(target: "compose.store", id = id.get(), "element_removed");
        Some(element)
    }

    pub fn get(&self, id: ElementId) -> Option<&Element> {
        self.index_of(id).map(|i| &self.elements[i].1)
    }

    pub fn get_mut(&mut self, id: ElementId) -> Option<&mut Element> {
        let index = self.index_of(id)?;
        Some(&mut self.elements[index].1)
    }

    pub fn contains(&self, id: ElementId) -> bool {
        self.index_of(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ElementId, &Element)> {
        self.elements.iter().map(|(id, e)| (*id, e))
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.elements.iter().map(|(_, e)| e)
    }

    /// Set fixed text on `id` and refresh its parse cache.
    pub fn set_content(&mut self, id: ElementId, text: impl Into<String>) -> bool {
        let Some(index) = self.index_of(id) else {
            return false;
        };
        let element = &mut self.elements[index].1;
        element.set_text(&self.parser, text);
        true
    }

    pub fn set_enabled(&mut self, id: ElementId, enabled: bool) -> bool {
        match self.get_mut(id) {
            Some(element) => {
                element.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn id_for_ref(&self, reference: ElementRef) -> Option<ElementId> {
        self.refs.get(&reference).copied()
    }

    pub fn get_by_ref(&self, reference: ElementRef) -> Option<&Element> {
        self.get(self.id_for_ref(reference)?)
    }

    pub fn get_by_ref_mut(&mut self, reference: ElementRef) -> Option<&mut Element> {
        let id = self.id_for_ref(reference)?;
        self.get_mut(id)
    }

    /// Resolve `reference`, creating and registering an element with
    /// `factory` on a miss (or when the referenced element was removed).
    pub fn get_or_create_by_ref<F>(&mut self, reference: ElementRef, factory: F) -> ElementId
    where
        F: FnOnce(&Parser) -> Element,
    {
        if let Some(id) = self.id_for_ref(reference).filter(|id| self.contains(*id)) {
            return id;
        }
        let element = factory(&self.parser);
        let id = self.add(element);
        self.refs.insert(reference, id);
        trace!(target: "compose.store", reference = reference.get(), id = id.get(), "reference_created");
        id
    }

    /// Point `reference` at `id`, returning the previous target.
    pub fn insert_ref(&mut self, reference: ElementRef, id: ElementId) -> Option<ElementId> {
        self.refs.insert(reference, id)
    }

    pub fn remove_ref(&mut self, reference: ElementRef) -> Option<ElementId> {
        self.refs.remove(&reference)
    }

    /// Composite every enabled element into one markup block.
    pub fn compose(&self) -> String {
        combiner::combine(&self.parser, self.elements())
    }

    fn index_of(&self, id: ElementId) -> Option<usize> {
        // Ids are assigned in increasing order and never reused.
        self.elements.binary_search_by_key(&id, |(i, _)| *i).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn fixed_element_caches_parse() {
        let parser = Parser::default();
        let e = Element::fixed(&parser, "<b>hi", 500.0);
        assert_eq!(e.parsed(&parser).content, "<b>hi</b>");
        assert_eq!(e.text(), "<b>hi");
        assert!(matches!(e.parsed(&parser), Cow::Borrowed(_)));
    }

    #[test]
    fn generated_element_reparses_each_time() {
        let parser = Parser::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let e = Element::generated(
            move || format!("n={}", counter.fetch_add(1, Ordering::Relaxed)),
            0.0,
        );
        assert_eq!(e.parsed(&parser).content, "n=0");
        assert_eq!(e.parsed(&parser).content, "n=1");
        assert_eq!(calls.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn store_add_remove_keeps_order() {
        let mut store = ElementStore::default();
        let p = store.parser().clone();
        let a = store.add(Element::fixed(&p, "a", 0.0));
        let b = store.add(Element::fixed(&p, "b", 0.0));
        let c = store.add(Element::fixed(&p, "c", 0.0));
        assert!(store.remove(b).is_some());
        assert!(store.remove(b).is_none());
        let ids: Vec<_> = store.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![a, c]);
    }

    #[test]
    fn set_content_refreshes_cache() {
        let mut store = ElementStore::default();
        let id = store.add(Element::generated(|| "gen".to_string(), 0.0));
        assert!(store.set_content(id, "a\nb"));
        let parsed = store.get(id).unwrap().parsed(store.parser()).into_owned();
        assert_eq!(parsed.content, "a\nb");
        assert!(parsed.offset > 0.0);
        assert!(matches!(store.get(id).unwrap().content(), Content::Fixed { .. }));
        store.remove(id);
        assert!(!store.set_content(id, "x"));
    }

    #[test]
    fn get_or_create_hits_after_first_call() {
        let mut store = ElementStore::default();
        let r = ElementRef::mint();
        let mut created = 0;
        let first = store.get_or_create_by_ref(r, |p| {
            created += 1;
            Element::fixed(p, "x", 100.0)
        });
        let second = store.get_or_create_by_ref(r, |p| {
            created += 1;
            Element::fixed(p, "y", 100.0)
        });
        assert_eq!(first, second);
        assert_eq!(created, 1);
        assert_eq!(store.get_by_ref(r).unwrap().text(), "x");
    }

    #[test]
    fn removed_element_drops_its_refs() {
        let mut store = ElementStore::default();
        let r = ElementRef::mint();
        let id = store.get_or_create_by_ref(r, |p| Element::fixed(p, "x", 0.0));
        store.remove(id);
        assert!(store.get_by_ref(r).is_none());
        let again = store.get_or_create_by_ref(r, |p| Element::fixed(p, "z", 0.0));
        assert_ne!(again, id);
    }

    #[test]
    fn explicit_ref_table() {
        let mut store = ElementStore::default();
        let p = store.parser().clone();
        let id = store.add(Element::fixed(&p, "x", 0.0));
        let r = ElementRef::mint();
        assert_eq!(store.insert_ref(r, id), None);
        assert_eq!(store.id_for_ref(r), Some(id));
        assert_eq!(store.remove_ref(r), Some(id));
        assert!(store.get_by_ref(r).is_none());
    }

    #[test]
    fn set_enabled_toggles() {
        let mut store = ElementStore::default();
        let p = store.parser().clone();
        let id = store.add(Element::fixed(&p, "x", 0.0));
        assert!(store.set_enabled(id, false));
        assert!(!store.get(id).unwrap().enabled);
        assert_eq!(store.compose(), "");
    }
}
