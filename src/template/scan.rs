use super::TemplateError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Segment {
    Text { text: String, start: usize, end: usize },
    Tag(Tag),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Tag {
    pub kind: TagKind,
    pub code: String,
    /// Offset of `code` in the template source.
    pub code_start: usize,
    /// Offset of the opening `<%`.
    pub start: usize,
    /// Offset just past the closing `%>`.
    pub end: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TagKind {
    Output,
    RawOutput,
    Statement,
    Comment,
}

/// Splits a template into literal text and `<% ... %>` tags.
///
/// `<%%` is a literal `<%`. A tag closed by `-%>` swallows one newline that directly follows it.
pub(crate) fn scan(source: &str) -> Result<Vec<Segment>, TemplateError> {
    let bytes = source.as_bytes();
    let mut segments = Vec::new();
    let mut text = String::new();
    let mut text_start = 0;
    let mut pos = 0;
    while let Some(found) = source[pos..].find("<%") {
        let open = pos + found;
        text.push_str(&source[pos..open]);
        if bytes.get(open + 2) == Some(&b'%') {
            text.push_str("<%");
            pos = open + 3;
            continue;
        }
        if !text.is_empty() {
            segments.push(Segment::Text {
                text: std::mem::take(&mut text),
                start: text_start,
                end: open,
            });
        }
        let (kind, prefix) = match &source[open + 2..] {
            s if s.starts_with('#') => (TagKind::Comment, 1),
            s if s.starts_with("==") => (TagKind::RawOutput, 2),
            s if s.starts_with('=') => (TagKind::Output, 1),
            _ => (TagKind::Statement, 0),
        };
        let inner = open + 2 + prefix;
        let close = if kind == TagKind::Comment {
            source[inner..].find("%>").map(|i| inner + i)
        } else {
            find_close(bytes, inner)
        }
        .ok_or_else(|| TemplateError::at(source, open, "unclosed tag"))?;
        let trim = close > inner && bytes[close - 1] == b'-';
        let code_end = if trim { close - 1 } else { close };
        let raw_code = &source[inner..code_end];
        let code = raw_code.trim();
        let code_start = inner + (raw_code.len() - raw_code.trim_start().len());
        let mut end = close + 2;
        segments.push(Segment::Tag(Tag {
            kind,
            code: code.to_string(),
            code_start,
            start: open,
            end,
        }));
        if trim {
            if source[end..].starts_with("\r\n") {
                end += 2;
            } else if source[end..].starts_with('\n') {
                end += 1;
            }
        }
        pos = end;
        text_start = end;
    }
    text.push_str(&source[pos..]);
    if !text.is_empty() {
        segments.push(Segment::Text {
            text,
            start: text_start,
            end: source.len(),
        });
    }
    Ok(segments)
}

/// Finds the `%>` closing a tag, ignoring occurrences inside string literals.
fn find_close(bytes: &[u8], from: usize) -> Option<usize> {
    let mut quote = None;
    let mut i = from;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == b'\\' {
                    i += 1;
                } else if b == q {
                    quote = None;
                }
            }
            None => {
                if b == b'"' || b == b'\'' {
                    quote = Some(b);
                } else if b == b'%' && bytes.get(i + 1) == Some(&b'>') {
                    return Some(i);
                }
            }
        }
        i += 1;
    }
    None
}
