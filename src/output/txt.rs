use std::io::Write;

use crate::data::Element;
use crate::engine::FinalResult;
use crate::output::Formatter;

/// Indented, line oriented dump of the tree.
///
/// ```text
/// +-profile
/// 	$ name : (string) 'node1'
/// ```
#[derive(Debug, Clone, Copy)]
pub struct TxtFormatter;

impl Formatter for TxtFormatter {
    fn key(&self) -> &'static str {
        "text"
    }

    fn suffix(&self) -> &'static str {
        "txt"
    }

    fn write(&self, result: &FinalResult, writer: &mut dyn Write) -> anyhow::Result<()> {
        write_child(writer, 0, "profile", &result.root)
    }
}

fn write_child(w: &mut dyn Write, level: usize, name: &str, element: &Element) -> anyhow::Result<()> {
    let tabs = "\t".repeat(level);
    match element {
        Element::List(items) => {
            writeln!(w, "{tabs}+-{name}")?;
            for (i, item) in items.iter().enumerate() {
                write_child(w, level + 1, &i.to_string(), item)?;
            }
        }
        Element::Dict(items) => {
            writeln!(w, "{tabs}+-{name}")?;
            for (key, item) in items.iter() {
                write_child(w, level + 1, key, item)?;
            }
        }
        property => {
            writeln!(w, "{tabs}$ {name} : ({}) '{property}'", property.type_name())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let root = Element::list(vec![Element::Long(1), Element::string("a")]);
        let mut out = Vec::new();
        write_child(&mut out, 0, "profile", &root).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "+-profile\n\t$ 0 : (long) '1'\n\t$ 1 : (string) 'a'\n"
        );
    }
}
