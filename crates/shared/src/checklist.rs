//! Checklist markup embedded in task notes.
//!
//! Subtasks are stored inline as `- [ ] text` / `- [x] text` lines, mixed
//! with arbitrary free text. Free-text lines are preserved verbatim and
//! skipped by the parser, so decode→encode of unmodified notes is a no-op.
//! Subtasks are addressed positionally: the Nth matching line (zero-indexed,
//! counting only checklist lines) is subtask N.

const UNCHECKED_PREFIX: &str = "- [ ] ";
const CHECKED_PREFIX: &str = "- [x] ";
/// Byte offset of the marker character inside a checklist line (`- [?] `).
const MARKER_OFFSET: usize = 3;

/// One decoded checklist item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subtask {
    pub checked: bool,
    pub text: String,
}

fn parse_line(line: &str) -> Option<Subtask> {
    if let Some(text) = line.strip_prefix(UNCHECKED_PREFIX) {
        return Some(Subtask {
            checked: false,
            text: text.to_string(),
        });
    }
    if let Some(text) = line.strip_prefix(CHECKED_PREFIX) {
        return Some(Subtask {
            checked: true,
            text: text.to_string(),
        });
    }
    None
}

fn is_checklist_line(line: &str) -> bool {
    line.starts_with(UNCHECKED_PREFIX) || line.starts_with(CHECKED_PREFIX)
}

/// Decode all checklist items from notes, in document order.
pub fn decode(notes: &str) -> Vec<Subtask> {
    notes.lines().filter_map(parse_line).collect()
}

/// `(completed, total)` counts over the checklist items in notes.
pub fn counts(notes: &str) -> (usize, usize) {
    let items = decode(notes);
    let completed = items.iter().filter(|s| s.checked).count();
    (completed, items.len())
}

/// Serialize items as checklist lines joined with `\n`.
pub fn encode(items: &[Subtask]) -> String {
    items
        .iter()
        .map(|s| {
            let prefix = if s.checked {
                CHECKED_PREFIX
            } else {
                UNCHECKED_PREFIX
            };
            format!("{prefix}{}", s.text)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Serialize fresh (unchecked) items from plain titles.
pub fn encode_unchecked(titles: &[String]) -> String {
    let items: Vec<Subtask> = titles
        .iter()
        .map(|t| Subtask {
            checked: false,
            text: t.clone(),
        })
        .collect();
    encode(&items)
}

/// Flip the marker of checklist item `index`, leaving every other byte of
/// the notes untouched. Returns `None` when no such item exists.
pub fn toggle(notes: &str, index: usize) -> Option<String> {
    let mut ordinal = 0;
    let mut offset = 0;
    for raw_line in notes.split_inclusive('\n') {
        let line = raw_line.strip_suffix('\n').unwrap_or(raw_line);
        if is_checklist_line(line) {
            if ordinal == index {
                let marker_at = offset + MARKER_OFFSET;
                let flipped = if &notes[marker_at..marker_at + 1] == "x" {
                    " "
                } else {
                    "x"
                };
                let mut out = String::with_capacity(notes.len());
                out.push_str(&notes[..marker_at]);
                out.push_str(flipped);
                out.push_str(&notes[marker_at + 1..]);
                return Some(out);
            }
            ordinal += 1;
        }
        offset += raw_line.len();
    }
    None
}
