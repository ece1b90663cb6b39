//! Line-range patches for sandboxed drafts.

use serde::{Deserialize, Serialize};

/// Replace lines `start_line..=end_line` (1-based) with `content`.
///
/// An empty `content` deletes the range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    pub start_line: usize,
    pub end_line: usize,
    #[serde(default)]
    pub content: String,
}

/// Apply `patches` to `text`, highest `start_line` first so earlier
/// replacements never shift the line numbers of later ones.
pub fn apply_patches_to_text(text: &str, patches: &[Patch]) -> Result<String, String> {
    let trailing_newline = text.ends_with('\n');
    let mut lines: Vec<String> = text.lines().map(str::to_string).collect();

    let mut ordered: Vec<&Patch> = patches.iter().collect();
    ordered.sort_by(|a, b| b.start_line.cmp(&a.start_line));

    for pair in ordered.windows(2) {
        let (later, earlier) = (pair[0], pair[1]);
        if earlier.end_line >= later.start_line {
            return Err(format!(
                "patches {}-{} and {}-{} overlap",
                earlier.start_line, earlier.end_line, later.start_line, later.end_line
            ));
        }
    }

    for patch in ordered {
        if patch.start_line == 0 || patch.end_line < patch.start_line {
            return Err(format!(
                "invalid line range {}-{}",
                patch.start_line, patch.end_line
            ));
        }
        if patch.end_line > lines.len() {
            return Err(format!(
                "line range {}-{} exceeds file length {}",
                patch.start_line,
                patch.end_line,
                lines.len()
            ));
        }
        let replacement = patch.content.lines().map(str::to_string);
        lines.splice(patch.start_line - 1..patch.end_line, replacement);
    }

    let mut out = lines.join("\n");
    if trailing_newline && !out.is_empty() {
        out.push('\n');
    }
    Ok(out)
}
