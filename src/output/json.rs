use std::io::Write;

use crate::engine::FinalResult;
use crate::output::{Formatter, maybe_compressed};

/// The object tree as pretty printed JSON.
#[derive(Debug, Clone, Copy)]
pub struct JsonFormatter {
    pub gzip: bool,
}

impl Formatter for JsonFormatter {
    fn key(&self) -> &'static str {
        if self.gzip { "json.gz" } else { "json" }
    }

    fn suffix(&self) -> &'static str {
        self.key()
    }

    fn write(&self, result: &FinalResult, writer: &mut dyn Write) -> anyhow::Result<()> {
        maybe_compressed(self.gzip, writer, |w| {
            serde_json::to_writer_pretty(&mut *w, &result.root)?;
            writeln!(w)?;
            Ok(())
        })
    }
}
