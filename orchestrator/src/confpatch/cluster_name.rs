use super::stanza::find_stanza;
use super::{indent_of, join_lines, split_lines};

/// Set `cluster-name` in the top-level `service` stanza.
///
/// An existing directive is overwritten, a missing one is inserted after the
/// stanza header, and a missing stanza is appended. A one-line `service {}`
/// is expanded into a block.
pub fn set_cluster_name(text: &str, name: &str) -> String {
    let mut lines = split_lines(text);
    let trailing = text.ends_with('\n') || text.is_empty();

    let Some(span) = find_stanza(&lines, None, |w| w == ["service"]) else {
        lines.push("service {".to_string());
        lines.push(format!("    cluster-name {}", name));
        lines.push("}".to_string());
        return join_lines(&lines, trailing);
    };

    if span.start == span.end {
        let indent = indent_of(&lines[span.start]).to_string();
        let header = &lines[span.start];
        let open = header.find('{').unwrap_or(header.len());
        let close = header.rfind('}').unwrap_or(header.len());
        let inner = if close > open + 1 {
            header[open + 1..close].trim().to_string()
        } else {
            String::new()
        };

        let mut block = vec![format!("{}service {{", indent)];
        block.push(format!("{}    cluster-name {}", indent, name));
        if !inner.is_empty() && !inner.starts_with("cluster-name") {
            block.push(format!("{}    {}", indent, inner));
        }
        block.push(format!("{}}}", indent));
        lines.splice(span.start..=span.end, block);
        return join_lines(&lines, trailing);
    }

    let mut depth = 0;
    for i in span.body() {
        let line = &lines[i];
        if depth == 0 && line.split_whitespace().next() == Some("cluster-name") {
            lines[i] = format!("{}cluster-name {}", indent_of(line), name);
            return join_lines(&lines, trailing);
        }
        depth += line.matches('{').count() as i32 - line.matches('}').count() as i32;
    }

    let child_indent = match span.body().find(|i| !lines[*i].trim().is_empty()) {
        Some(i) => indent_of(&lines[i]).to_string(),
        None => format!("{}    ", indent_of(&lines[span.start])),
    };
    lines.insert(
        span.start + 1,
        format!("{}cluster-name {}", child_indent, name),
    );
    join_lines(&lines, trailing)
}
