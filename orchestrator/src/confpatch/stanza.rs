/// Inclusive line range of a stanza: the header line through its closing brace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StanzaSpan {
    pub start: usize,
    pub end: usize,
}

impl StanzaSpan {
    /// Lines strictly between the header and the closing brace
    pub fn body(&self) -> std::ops::Range<usize> {
        if self.end > self.start {
            self.start + 1..self.end
        } else {
            self.start..self.start
        }
    }
}

fn code_part(line: &str) -> &str {
    match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

fn brace_delta(line: &str) -> i32 {
    code_part(line).chars().fold(0, |acc, c| match c {
        '{' => acc + 1,
        '}' => acc - 1,
        _ => acc,
    })
}

/// Words before the opening brace, if the line opens a stanza
pub fn header_words(line: &str) -> Option<Vec<&str>> {
    let code = code_part(line);
    let idx = code.find('{')?;
    Some(code[..idx].split_whitespace().collect())
}

/// Find the first stanza whose header words satisfy `pred`.
///
/// With `within == None` only top-level stanzas are considered; otherwise
/// only direct children of the given stanza. Returns `None` when no header
/// matches or the matching stanza is never closed.
pub fn find_stanza<F>(lines: &[String], within: Option<StanzaSpan>, pred: F) -> Option<StanzaSpan>
where
    F: Fn(&[&str]) -> bool,
{
    let range = match within {
        Some(span) => span.body(),
        None => 0..lines.len(),
    };

    let mut depth = 0;
    for i in range.clone() {
        let line = &lines[i];
        if depth == 0 {
            if let Some(words) = header_words(line) {
                if !words.is_empty() && pred(&words) {
                    return close_of(lines, i, range.end).map(|end| StanzaSpan { start: i, end });
                }
            }
        }
        depth += brace_delta(line);
        if depth < 0 {
            depth = 0;
        }
    }
    None
}

/// All direct children of `parent` (or top-level stanzas) whose header matches
pub fn find_all<F>(lines: &[String], within: Option<StanzaSpan>, pred: F) -> Vec<StanzaSpan>
where
    F: Fn(&[&str]) -> bool,
{
    let range = match within {
        Some(span) => span.body(),
        None => 0..lines.len(),
    };

    let mut spans = Vec::new();
    let mut i = range.start;
    while i < range.end {
        let line = &lines[i];
        if let Some(words) = header_words(line) {
            if let Some(end) = close_of(lines, i, range.end) {
                if !words.is_empty() && pred(&words) {
                    spans.push(StanzaSpan { start: i, end });
                }
                i = end + 1;
                continue;
            }
        }
        i += 1;
    }
    spans
}

/// Rewrite a stanza written on one line (`dc a {}`) as header, body and
/// closing brace lines, returning the new span
pub fn open_one_line(lines: &mut Vec<String>, span: StanzaSpan) -> StanzaSpan {
    if span.end > span.start {
        return span;
    }
    let line = lines[span.start].clone();
    let indent = super::indent_of(&line);
    let code = code_part(&line);
    let open = code.find('{').unwrap_or(code.len());
    let close = code.rfind('}').unwrap_or(code.len());
    let inner = if close > open + 1 {
        code[open + 1..close].trim()
    } else {
        ""
    };

    let mut block = vec![format!("{} {{", code[..open].trim_end())];
    if !inner.is_empty() {
        block.push(format!("{}    {}", indent, inner));
    }
    block.push(format!("{}}}", indent));
    let end = span.start + block.len() - 1;
    lines.splice(span.start..=span.end, block);
    StanzaSpan {
        start: span.start,
        end,
    }
}

fn close_of(lines: &[String], start: usize, limit: usize) -> Option<usize> {
    let mut depth = 0;
    for (i, line) in lines.iter().enumerate().take(limit).skip(start) {
        depth += brace_delta(line);
        if depth <= 0 {
            return Some(i);
        }
    }
    None
}
