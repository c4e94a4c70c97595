//! Plain text table rendering for the stats command.

pub struct ConsoleTable {
    title: String,
    rows: Vec<Vec<String>>,
}

impl ConsoleTable {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            rows: Vec::new(),
        }
    }

    pub fn add_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    pub fn render(&self) -> String {
        let columns = self.rows.iter().map(Vec::len).max().unwrap_or(0);
        let mut widths = vec![0usize; columns];
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }
        let mut out = String::new();
        out.push_str(&self.title);
        out.push('\n');
        for row in &self.rows {
            let mut line = String::new();
            for (i, cell) in row.iter().enumerate() {
                line.push_str(cell);
                if i + 1 < row.len() {
                    line.push_str(&" ".repeat(widths[i] - cell.chars().count() + 2));
                }
            }
            out.push_str(line.trim_end());
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_aligned_columns() {
        let mut t = ConsoleTable::new("Feeds");
        t.add_row(vec!["Name".into(), "Count".into()]);
        t.add_row(vec!["longer-name".into(), "1".into()]);
        let s = t.render();
        let lines: Vec<&str> = s.lines().collect();
        assert_eq!(lines[0], "Feeds");
        assert!(lines[1].starts_with("Name"));
        assert!(lines[2].starts_with("longer-name"));
        // Both value columns start at the same offset.
        assert_eq!(
            lines[1].find("Count").unwrap(),
            lines[2].find('1').unwrap()
        );
    }
}
