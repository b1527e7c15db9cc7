use crate::dump::paths::is_junk_name;

/// Columns in front of the name in a Unix-style LIST line:
/// mode, links, owner, group, size, month, day, time-or-year.
const METADATA_COLUMNS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub name: String,
    pub is_dir: bool,
}

/// Parse one line of a verbose listing.
///
/// Returns `None` for short lines, `.`/`..` and junk folders. Names keep their
/// inner spaces and brackets; runs of whitespace collapse to one space.
pub fn parse_list_line(line: &str) -> Option<ListEntry> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() <= METADATA_COLUMNS {
        return None;
    }

    let name = tokens[METADATA_COLUMNS..].join(" ");
    if is_junk_name(&name) {
        return None;
    }

    Some(ListEntry {
        name,
        is_dir: tokens[0].starts_with('d'),
    })
}
