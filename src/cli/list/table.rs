use std::fmt::{self, Write};

/// One line of a [`Table`].
pub(crate) struct Row {
    cells: Vec<String>,
}

impl Row {
    fn columns(&self) -> usize {
        self.cells.len()
    }
}

impl From<Vec<String>> for Row {
    fn from(value: Vec<String>) -> Self {
        Row { cells: value }
    }
}

impl From<Vec<&str>> for Row {
    fn from(value: Vec<&str>) -> Self {
        Row {
            cells: value.into_iter().map(str::to_owned).collect(),
        }
    }
}

/// Whitespace aligned columns, suitable for `awk` when cells hold no spaces.
pub(crate) struct Table {
    header: Row,
    body: Vec<Row>,
    print_header: bool,
}

fn width(cell: &str) -> usize {
    cell.chars().count()
}

impl Table {
    pub(crate) fn new<R: Into<Row>>(header: R) -> Table {
        Table {
            header: header.into(),
            body: Vec::new(),
            print_header: true,
        }
    }

    pub(crate) fn print_header(&mut self, print_header: bool) {
        self.print_header = print_header;
    }

    /// Rows shorter than the header are padded with empty cells, longer
    /// rows are cut.
    pub(crate) fn add_row<R: Into<Row>>(&mut self, row: R) {
        let mut row = row.into();

        row.cells.resize(self.header.columns(), String::new());

        self.body.push(row);
    }

    fn rows(&self) -> impl Iterator<Item = &Row> {
        let header = match self.print_header {
            true => Some(&self.header),
            false => None,
        };

        header.into_iter().chain(self.body.iter())
    }

    fn column_widths(&self) -> Vec<usize> {
        let mut widths = vec![0usize; self.header.columns()];

        for row in self.rows() {
            for (i, cell) in row.cells.iter().enumerate() {
                widths[i] = widths[i].max(width(cell));
            }
        }

        widths
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let widths = self.column_widths();

        for row in self.rows() {
            let last = row.cells.len().saturating_sub(1);

            for (i, cell) in row.cells.iter().enumerate() {
                if i == last {
                    // No trailing padding
                    f.write_str(cell)?;
                } else {
                    write!(f, "{}{}  ", cell, " ".repeat(widths[i] - width(cell)))?;
                }
            }

            f.write_char('\n')?;
        }

        Ok(())
    }
}
