use crate::error::PanError;

/// Named configuration value for a source repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    name: String,
    value: String,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Result<Self, PanError> {
        let name = name.into();
        if name.is_empty() {
            return Err(PanError::configuration("parameter name cannot be empty"));
        }
        Ok(Parameter {
            name,
            value: value.into(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

/// Ordered list of parameters; a name may repeat.
#[derive(Debug, Clone, Default)]
pub struct ParameterList {
    params: Vec<Parameter>,
}

impl ParameterList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, name: &str, value: &str) -> Result<&mut Self, PanError> {
        self.params.push(Parameter::new(name, value)?);
        Ok(self)
    }

    /// All values given for `name`, in insertion order.
    pub fn values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.params
            .iter()
            .filter(move |p| p.name == name)
            .map(|p| p.value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.params.iter()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_names() {
        let mut list = ParameterList::new();
        list.append("includeDirectory", "/a")
            .unwrap()
            .append("includeDirectory", "/b")
            .unwrap()
            .append("sessionDirectory", "/s")
            .unwrap();

        let includes: Vec<_> = list.values("includeDirectory").collect();
        assert_eq!(includes, ["/a", "/b"]);
        assert_eq!(list.len(), 3);
        assert!(Parameter::new("", "x").is_err());
    }
}
