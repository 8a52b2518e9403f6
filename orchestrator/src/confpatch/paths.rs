use std::collections::BTreeSet;

use super::stanza::header_words;
use super::{indent_of, join_lines, split_lines};

const PATH_ROOTS: [&str; 4] = ["/var", "/opt", "/etc", "/tmp"];

/// Directories that must exist on a node before the service can start.
///
/// Looks at path-like tokens under `/var`, `/opt`, `/etc` and `/tmp` on
/// non-comment lines. File-valued directives contribute their parent
/// directory; anything else is taken as a directory itself.
pub fn referenced_directories(text: &str) -> Vec<String> {
    let mut dirs = BTreeSet::new();
    for line in split_lines(text) {
        let trimmed = line.trim();
        if trimmed.starts_with('#') {
            continue;
        }
        let file_valued = trimmed.contains("file /")
            || trimmed.contains("xdr-digestlog-path /")
            || trimmed.contains("file:/");

        for token in trimmed.split_whitespace() {
            let token = token.trim_start_matches("file:").trim_end_matches(['{', ';']);
            if !token.starts_with('/') || !PATH_ROOTS.iter().any(|root| token.starts_with(root)) {
                continue;
            }
            let last = token.rsplit('/').next().unwrap_or_default();
            let dir = if file_valued || last.contains('.') {
                match token.rfind('/') {
                    Some(0) | None => continue,
                    Some(idx) => &token[..idx],
                }
            } else {
                token
            };
            dirs.insert(dir.trim_end_matches('/').to_string());
        }
    }
    dirs.into_iter().filter(|d| !d.is_empty()).collect()
}

/// Send the console log sink to a file instead
pub fn redirect_console_log(text: &str, path: &str) -> String {
    let mut lines = split_lines(text);
    if let Some(line) = lines
        .iter_mut()
        .find(|l| header_words(l).is_some_and(|w| w == ["console"]))
    {
        *line = format!("{}file {} {{", indent_of(line), path);
    }
    join_lines(&lines, text.ends_with('\n'))
}
