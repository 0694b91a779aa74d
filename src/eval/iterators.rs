use std::collections::HashMap;

use crate::data::Element;
use crate::error::PanError;

/// Position of a `first`/`next` walk over one collection.
#[derive(Debug, Clone)]
pub struct ResourceIterator {
    // Keeps the collection alive so its identity cannot be reused.
    collection: Element,
    position: usize,
}

impl ResourceIterator {
    pub fn new(collection: Element) -> Self {
        ResourceIterator {
            collection,
            position: 0,
        }
    }

    /// Next `(key, value)` pair, keys being longs for lists and strings for
    /// dicts.
    pub fn advance(&mut self) -> Option<(Element, Element)> {
        let entry = match &self.collection {
            Element::List(list) => list
                .get(self.position)
                .map(|value| (Element::Long(self.position as i64), value.clone())),
            Element::Dict(dict) => dict
                .iter()
                .nth(self.position)
                .map(|(key, value)| (Element::String(key.clone()), value.clone())),
            _ => None,
        };
        if entry.is_some() {
            self.position += 1;
        }
        entry
    }
}

/// Iterators keyed by the runtime identity of the collection.
#[derive(Debug, Default)]
pub struct IteratorMap {
    iterators: HashMap<usize, ResourceIterator>,
}

impl IteratorMap {
    pub fn get_mut(&mut self, collection: &Element) -> Option<&mut ResourceIterator> {
        let id = collection.identity()?;
        self.iterators.get_mut(&id)
    }

    pub fn put(
        &mut self,
        collection: &Element,
        iterator: Option<ResourceIterator>,
    ) -> Result<(), PanError> {
        let id = collection.identity().ok_or_else(|| {
            PanError::evaluation(format!(
                "cannot iterate over element of type {}",
                collection.type_name()
            ))
        })?;
        match iterator {
            Some(iterator) => {
                self.iterators.insert(id, iterator);
            }
            None => {
                self.iterators.remove(&id);
            }
        }
        Ok(())
    }
}
