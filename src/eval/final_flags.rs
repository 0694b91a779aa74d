use std::collections::BTreeMap;

use crate::data::Term;
use crate::error::PanError;

#[derive(Debug, Default)]
struct Node {
    is_final: bool,
    children: BTreeMap<Term, Node>,
}

impl Node {
    fn create_child(&mut self, term: &Term) -> Result<&mut Node, PanError> {
        if self.children.contains_key(term) {
            return Err(PanError::compiler(format!(
                "final flag node for '{term}' already exists"
            )));
        }
        Ok(self.children.entry(term.clone()).or_default())
    }
}

/// Tree of immutability markers, keyed by path terms.
///
/// A path is final when it, one of its ancestors or one of its descendants
/// has been marked. Marks are never removed.
#[derive(Debug, Default)]
pub struct FinalFlags {
    root: Node,
}

impl FinalFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_final(&self, terms: &[Term]) -> bool {
        let mut node = &self.root;
        for term in terms {
            if node.is_final {
                return true;
            }
            match node.children.get(term) {
                Some(child) => node = child,
                None => return false,
            }
        }
        node.is_final || !node.children.is_empty()
    }

    pub fn set_final(&mut self, terms: &[Term]) -> Result<(), PanError> {
        let mut node = &mut self.root;
        for term in terms {
            node = if node.children.contains_key(term) {
                node.children
                    .get_mut(term)
                    .ok_or_else(|| PanError::compiler("final flag node vanished"))?
            } else {
                node.create_child(term)?
            };
        }
        node.is_final = true;
        Ok(())
    }

    /// Explanation of why `terms` cannot be modified, or `None` if it can.
    pub fn final_reason(&self, terms: &[Term]) -> Option<String> {
        let target = render(terms);
        let mut node = &self.root;
        let mut walked: Vec<Term> = Vec::new();

        for term in terms {
            if node.is_final {
                return Some(reason(&target, &walked));
            }
            node = node.children.get(term)?;
            walked.push(term.clone());
        }

        while !node.is_final {
            let (term, child) = node.children.iter().next()?;
            walked.push(term.clone());
            node = child;
        }
        Some(reason(&target, &walked))
    }
}

fn render(terms: &[Term]) -> String {
    let mut out = String::from("/");
    for (i, term) in terms.iter().enumerate() {
        if i > 0 {
            out.push('/');
        }
        out.push_str(&term.to_string());
    }
    out
}

fn reason(target: &str, final_terms: &[Term]) -> String {
    format!(
        "{target} cannot be modified; {} is marked as final",
        render(final_terms)
    )
}
