use similar::{ChangeTag, TextDiff};

pub const DEFAULT_CONTEXT_LINES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffTag {
    Context,
    Added,
    Removed,
}

/// One rendered diff row. Context and removed rows carry the original line
/// number; context and added rows carry the proposed line number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffLine {
    pub tag: DiffTag,
    pub old_line: Option<usize>,
    pub new_line: Option<usize>,
    pub text: String,
}

/// Line diff between current and proposed content, limited to hunks with a
/// fixed context window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDiff {
    lines: Vec<DiffLine>,
    changed: usize,
}

impl FileDiff {
    #[must_use]
    pub fn compute(old: &str, new: &str, context_lines: usize) -> Self {
        let diff = TextDiff::from_lines(old, new);
        let mut lines = Vec::new();
        let mut changed = 0usize;

        for group in diff.grouped_ops(context_lines) {
            for op in group {
                for change in diff.iter_changes(&op) {
                    let tag = match change.tag() {
                        ChangeTag::Equal => DiffTag::Context,
                        ChangeTag::Insert => DiffTag::Added,
                        ChangeTag::Delete => DiffTag::Removed,
                    };
                    if tag != DiffTag::Context {
                        changed += 1;
                    }

                    lines.push(DiffLine {
                        tag,
                        old_line: change.old_index().map(|index| index + 1),
                        new_line: change.new_index().map(|index| index + 1),
                        text: change.value().trim_end_matches('\n').to_string(),
                    });
                }
            }
        }

        Self { lines, changed }
    }

    #[must_use]
    pub fn lines(&self) -> &[DiffLine] {
        &self.lines
    }

    /// Number of added plus removed lines.
    #[must_use]
    pub fn changed_lines(&self) -> usize {
        self.changed
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changed == 0
    }

    /// Renders the diff with original line numbers for operator review.
    #[must_use]
    pub fn render(&self, label: &str) -> String {
        let mut out = format!("--- {label}\n+++ {label} (proposed)\n");
        for line in &self.lines {
            let (marker, number) = match line.tag {
                DiffTag::Context => (' ', line.old_line),
                DiffTag::Added => ('+', line.new_line),
                DiffTag::Removed => ('-', line.old_line),
            };
            let number = number.map_or_else(|| "?".to_string(), |n| n.to_string());
            out.push_str(&format!("{number:>5} {marker}{}\n", line.text));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::{DiffTag, FileDiff, DEFAULT_CONTEXT_LINES};

    #[test]
    fn identical_content_yields_empty_diff() {
        let diff = FileDiff::compute("a\nb\n", "a\nb\n", DEFAULT_CONTEXT_LINES);
        assert!(diff.is_empty());
        assert_eq!(diff.changed_lines(), 0);
        assert!(diff.lines().is_empty());
    }

    #[test]
    fn new_file_diff_numbers_added_lines_from_one() {
        let diff = FileDiff::compute("", "line1\nline2\n", DEFAULT_CONTEXT_LINES);

        let added: Vec<_> = diff
            .lines()
            .iter()
            .filter(|line| line.tag == DiffTag::Added)
            .collect();
        assert_eq!(added.len(), 2);
        assert_eq!(added[0].new_line, Some(1));
        assert_eq!(added[0].text, "line1");
        assert_eq!(added[1].new_line, Some(2));
        assert_eq!(added[1].text, "line2");
        assert_eq!(diff.changed_lines(), 2);
    }

    #[test]
    fn changed_line_keeps_original_numbering_on_removal() {
        let old = "one\ntwo\nthree\n";
        let new = "one\nTWO\nthree\n";
        let diff = FileDiff::compute(old, new, DEFAULT_CONTEXT_LINES);

        let removed: Vec<_> = diff
            .lines()
            .iter()
            .filter(|line| line.tag == DiffTag::Removed)
            .collect();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].old_line, Some(2));
        assert_eq!(removed[0].text, "two");
        assert_eq!(diff.changed_lines(), 2);
    }

    #[test]
    fn context_window_limits_distant_unchanged_lines() {
        let old: String = (1..=40).map(|n| format!("line {n}\n")).collect();
        let new = old.replace("line 20\n", "line twenty\n");
        let diff = FileDiff::compute(&old, &new, 2);

        // 2 context above + removed + added + 2 context below.
        assert_eq!(diff.lines().len(), 6);
        assert_eq!(diff.changed_lines(), 2);
    }

    #[test]
    fn render_carries_line_numbers_and_markers() {
        let diff = FileDiff::compute("old\n", "new\n", DEFAULT_CONTEXT_LINES);
        let rendered = diff.render("notes.txt");

        assert!(rendered.contains("--- notes.txt"));
        assert!(rendered.contains("-old"));
        assert!(rendered.contains("+new"));
    }
}
