use std::fmt;

/// Writes nested `{ .. }` blocks, two spaces per nesting level.
pub(crate) struct IndentedWriter<'a, 'b> {
    depth: usize,
    output: &'a mut fmt::Formatter<'b>,
}

impl<'a, 'b> IndentedWriter<'a, 'b> {
    pub(crate) fn new(output: &'a mut fmt::Formatter<'b>) -> Self {
        Self { depth: 0, output }
    }

    pub(crate) fn write(&mut self, value: impl fmt::Display) -> fmt::Result {
        write!(self.output, "{value}")
    }

    fn new_line(&mut self) -> fmt::Result {
        writeln!(self.output)?;
        write!(self.output, "{:width$}", "", width = self.depth * 2)
    }

    /// Writes `{`, one indented line per item and a closing `}` on its own line. Without items
    /// this is just `{}`.
    pub(crate) fn block<T>(
        &mut self,
        items: impl IntoIterator<Item = T>,
        mut write_item: impl FnMut(&mut Self, T) -> fmt::Result,
    ) -> fmt::Result {
        self.write("{")?;
        self.depth += 1;
        let mut is_empty = true;
        for item in items {
            is_empty = false;
            self.new_line()?;
            write_item(self, item)?;
        }
        self.depth -= 1;
        if !is_empty {
            self.new_line()?;
        }
        self.write("}")
    }
}
