use std::io::Write;

use crate::dependency::DependencyInfo;
use crate::engine::{FinalResult, ResultType};
use crate::output::Formatter;

/// Lists every file an object depends on, one `name TYPE [parentURI]` line
/// each, for later rebuild checks.
#[derive(Debug, Clone, Copy)]
pub struct DepFormatter;

impl Formatter for DepFormatter {
    fn key(&self) -> &'static str {
        "dep"
    }

    fn suffix(&self) -> &'static str {
        "xml.dep"
    }

    fn result_type(&self) -> ResultType {
        ResultType::Dependency
    }

    fn write(&self, result: &FinalResult, writer: &mut dyn Write) -> anyhow::Result<()> {
        for file in &result.dependencies {
            writeln!(writer, "{}", DependencyInfo::from_source(file))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::time::SystemTime;

    use camino::Utf8PathBuf;

    use super::*;
    use crate::data::Element;
    use crate::source::{SourceFile, SourceType};

    #[test]
    fn test_dependency_lines() {
        let dependencies: BTreeSet<_> = [
            SourceFile::new("node", SourceType::Pan, Some(Utf8PathBuf::from("/tpl/node.pan")))
                .unwrap(),
            SourceFile::absent("site/missing", SourceType::Tpl),
        ]
        .into_iter()
        .collect();
        let result = FinalResult::new("node", Element::Null, SystemTime::now(), dependencies);

        let mut bytes = Vec::new();
        DepFormatter.write(&result, &mut bytes).unwrap();
        let text = String::from_utf8(bytes).unwrap();

        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines.contains(&"node PAN file:///tpl/"));
        assert!(lines.contains(&"site/missing ABSENT_SOURCE"));
    }
}
