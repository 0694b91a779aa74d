use crate::ArcStr;
use crate::data::{Element, Path};
use crate::error::PanError;

/// Where a write to SELF has to be stored.
#[derive(Debug, Clone, PartialEq)]
pub enum SelfTarget {
    Path(Path),
    Variable(ArcStr),
}

/// The value `SELF` refers to while a statement's expression runs.
#[derive(Debug, Clone)]
pub enum SelfHolder {
    /// Validation code: SELF may be read but not changed.
    ReadOnly(Element),
    /// Assignment statements.
    Path { path: Path, element: Element },
    /// Variable statements.
    Variable { name: ArcStr, element: Element },
    /// Include statements, where SELF has no meaning.
    Invalid,
}

impl SelfHolder {
    pub fn read(&self) -> Result<&Element, PanError> {
        match self {
            SelfHolder::ReadOnly(element)
            | SelfHolder::Path { element, .. }
            | SelfHolder::Variable { element, .. } => Ok(element),
            SelfHolder::Invalid => Err(invalid()),
        }
    }

    /// Records the new value and reports where the caller must store it.
    /// A read-only holder accepts only its own value back.
    pub fn write(&mut self, value: Element) -> Result<Option<SelfTarget>, PanError> {
        match self {
            SelfHolder::ReadOnly(element) => {
                let same = match (element.identity(), value.identity()) {
                    (Some(a), Some(b)) => a == b,
                    _ => *element == value,
                };
                if same {
                    Ok(None)
                } else {
                    Err(PanError::evaluation("cannot modify SELF"))
                }
            }
            SelfHolder::Path { path, element } => {
                *element = value;
                Ok(Some(SelfTarget::Path(path.clone())))
            }
            SelfHolder::Variable { name, element } => {
                *element = value;
                Ok(Some(SelfTarget::Variable(name.clone())))
            }
            SelfHolder::Invalid => Err(invalid()),
        }
    }
}

fn invalid() -> PanError {
    PanError::evaluation("invalid SELF reference in include")
}
