//! Action marker parser.
//!
//! Model responses embed instructions as bracketed markers:
//!
//! ````text
//! [CREATE FILE: src/main.py]
//! ```python
//! print("hi")
//! ```
//! [RUN: python src/main.py]
//! ````
//!
//! Parsing is split into a lexer that emits only the tokens the grammar cares
//! about (prose is discarded) and a recursive-descent parser over those tokens:
//!
//! ```text
//! response := item*
//! item     := marker | block
//! marker   := MarkerOpen Path
//! block    := FenceStart Code FenceEnd
//! ```
//!
//! A file marker takes the next block that follows it. A second marker seen
//! before any block supersedes the first. Fenced blocks are opaque, so marker
//! text quoted inside a block is never executed.

use crate::types::{ActionKind, ActionRequest};

/// Result of scanning one response. There is no error state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    NoActions,
    Actions(Vec<ActionRequest>),
}

impl ParseOutcome {
    pub fn is_empty(&self) -> bool {
        matches!(self, ParseOutcome::NoActions)
    }

    pub fn len(&self) -> usize {
        match self {
            ParseOutcome::NoActions => 0,
            ParseOutcome::Actions(a) => a.len(),
        }
    }

    pub fn actions(&self) -> &[ActionRequest] {
        match self {
            ParseOutcome::NoActions => &[],
            ParseOutcome::Actions(a) => a,
        }
    }

    pub fn into_actions(self) -> Vec<ActionRequest> {
        match self {
            ParseOutcome::NoActions => Vec::new(),
            ParseOutcome::Actions(a) => a,
        }
    }
}

/// Lexical tokens of the marker grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token<'a> {
    /// `[KEYWORD:`, carrying the action kind the keyword names.
    MarkerOpen(ActionKind),
    /// The trimmed payload between `:` and the closing `]` (path or command).
    Path(&'a str),
    /// An opening fence of `ticks` backticks and its info string.
    FenceStart { ticks: usize, info: &'a str },
    /// The raw body of a fenced block.
    Code(&'a str),
    FenceEnd,
}

const KEYWORDS: &[(&str, ActionKind)] = &[
    ("CREATE FILE", ActionKind::CreateFile),
    ("MODIFY FILE", ActionKind::ModifyFile),
    ("DELETE FILE", ActionKind::DeleteFile),
    ("RUN", ActionKind::RunCommand),
];

/// Extract the ordered list of actions from a model response.
pub fn parse(text: &str) -> ParseOutcome {
    let tokens = tokenize(text);
    let actions = Parser::new(&tokens).parse_response();
    tracing::debug!(
        tokens = tokens.len(),
        actions = actions.len(),
        "Parsed model response"
    );
    if actions.is_empty() {
        ParseOutcome::NoActions
    } else {
        ParseOutcome::Actions(actions)
    }
}

/// Lex a response into marker and fence tokens.
pub fn tokenize(text: &str) -> Vec<Token<'_>> {
    Lexer::new(text).run()
}

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    line_start: bool,
    tokens: Vec<Token<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            line_start: true,
            tokens: Vec::new(),
        }
    }

    fn run(mut self) -> Vec<Token<'a>> {
        let src = self.src;
        let bytes = src.as_bytes();
        while self.pos < bytes.len() {
            if self.line_start {
                let indent = count_while(&bytes[self.pos..], |b| b == b' ' || b == b'\t');
                let ticks = count_while(&bytes[self.pos + indent..], |b| b == b'`');
                if ticks >= 3 {
                    self.pos += indent;
                    self.lex_fence(ticks);
                    continue;
                }
            }
            match bytes[self.pos] {
                b'\n' => {
                    self.line_start = true;
                    self.pos += 1;
                }
                b'[' => {
                    if let Some(end) = self.lex_marker() {
                        self.pos = end;
                        // A fence may open on the same line as its marker.
                        self.line_start = true;
                    } else {
                        self.line_start = false;
                        self.pos += 1;
                    }
                }
                b' ' | b'\t' | b'\r' => self.pos += 1,
                _ => {
                    self.line_start = false;
                    self.pos += 1;
                }
            }
        }
        self.tokens
    }

    /// Try to read a marker starting at `self.pos` (which holds `[`).
    /// Returns the byte offset just past the closing `]` on success.
    fn lex_marker(&mut self) -> Option<usize> {
        let src = self.src;
        let bytes = src.as_bytes();
        let mut cursor = self.pos + 1;
        cursor += count_while(&bytes[cursor..], |b| b == b' ' || b == b'\t');

        let (kind, after_kw) = KEYWORDS
            .iter()
            .find_map(|(kw, kind)| match_keyword(bytes, cursor, kw).map(|end| (*kind, end)))?;
        cursor = after_kw;
        cursor += count_while(&bytes[cursor..], |b| b == b' ' || b == b'\t');
        if bytes.get(cursor) != Some(&b':') {
            return None;
        }
        cursor += 1;

        // Payload runs to the `]` that balances the marker, on the same line.
        let payload_start = cursor;
        let mut depth = 0usize;
        while cursor < bytes.len() {
            match bytes[cursor] {
                b'\n' => return None,
                b'[' => depth += 1,
                b']' if depth == 0 => {
                    let payload = src[payload_start..cursor].trim();
                    self.tokens.push(Token::MarkerOpen(kind));
                    self.tokens.push(Token::Path(payload));
                    return Some(cursor + 1);
                }
                b']' => depth -= 1,
                _ => {}
            }
            cursor += 1;
        }
        None
    }

    /// Read a fenced block whose opening run of `ticks` backticks starts at `self.pos`.
    fn lex_fence(&mut self, ticks: usize) {
        let src = self.src;
        let bytes = src.as_bytes();
        let info_start = self.pos + ticks;
        let info_end = find_byte(bytes, info_start, b'\n').unwrap_or(bytes.len());
        let info = src[info_start..info_end].trim();
        self.tokens.push(Token::FenceStart { ticks, info });

        let body_start = (info_end + 1).min(bytes.len());
        let mut line = body_start;
        while line < bytes.len() {
            let line_end = find_byte(bytes, line, b'\n').unwrap_or(bytes.len());
            if is_closing_fence(&src[line..line_end], ticks) {
                let body = trim_final_newline(&src[body_start..line]);
                self.tokens.push(Token::Code(body));
                self.tokens.push(Token::FenceEnd);
                self.pos = line_end;
                self.line_start = false;
                return;
            }
            line = line_end + 1;
        }

        // Unterminated: the body runs to the end and no FenceEnd is emitted.
        self.tokens.push(Token::Code(&src[body_start..]));
        self.pos = bytes.len();
    }
}

struct Parser<'t, 'a> {
    tokens: &'t [Token<'a>],
    pos: usize,
}

impl<'t, 'a> Parser<'t, 'a> {
    fn new(tokens: &'t [Token<'a>]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&'t Token<'a>> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<&'t Token<'a>> {
        let tok = self.tokens.get(self.pos);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn parse_response(&mut self) -> Vec<ActionRequest> {
        let mut actions = Vec::new();
        while let Some(tok) = self.peek() {
            match tok {
                Token::MarkerOpen(_) => {
                    if let Some(action) = self.parse_marker() {
                        actions.push(action);
                    }
                }
                Token::FenceStart { .. } => {
                    // A block with no marker in front of it is plain prose.
                    let _ = self.parse_block();
                }
                _ => {
                    self.bump();
                }
            }
        }
        actions
    }

    fn parse_marker(&mut self) -> Option<ActionRequest> {
        let kind = match self.bump() {
            Some(Token::MarkerOpen(kind)) => *kind,
            _ => return None,
        };
        let payload = match self.peek() {
            Some(Token::Path(p)) => {
                self.bump();
                *p
            }
            _ => return None,
        };

        match kind {
            ActionKind::RunCommand => {
                (!payload.is_empty()).then(|| ActionRequest::run(payload))
            }
            ActionKind::DeleteFile => {
                (!payload.is_empty()).then(|| ActionRequest::delete_file(payload))
            }
            ActionKind::CreateFile | ActionKind::ModifyFile => {
                if !matches!(self.peek(), Some(Token::FenceStart { .. })) {
                    // No block before the next marker or the end of input.
                    return None;
                }
                let code = self.parse_block()?;
                if payload.is_empty() {
                    return None;
                }
                Some(match kind {
                    ActionKind::CreateFile => ActionRequest::create_file(payload, code),
                    _ => ActionRequest::modify_file(payload, code),
                })
            }
        }
    }

    fn parse_block(&mut self) -> Option<&'a str> {
        match self.bump() {
            Some(Token::FenceStart { .. }) => {}
            _ => return None,
        }
        let code = match self.peek() {
            Some(Token::Code(c)) => {
                self.bump();
                *c
            }
            _ => return None,
        };
        match self.peek() {
            Some(Token::FenceEnd) => {
                self.bump();
                Some(code)
            }
            _ => None,
        }
    }
}

fn count_while(bytes: &[u8], pred: impl Fn(u8) -> bool) -> usize {
    bytes.iter().take_while(|b| pred(**b)).count()
}

fn find_byte(bytes: &[u8], from: usize, needle: u8) -> Option<usize> {
    bytes
        .get(from..)?
        .iter()
        .position(|b| *b == needle)
        .map(|i| from + i)
}

/// Case-insensitive keyword match where any run of spaces matches one space.
fn match_keyword(bytes: &[u8], start: usize, keyword: &str) -> Option<usize> {
    let mut cursor = start;
    for (i, word) in keyword.split(' ').enumerate() {
        if i > 0 {
            let gap = count_while(bytes.get(cursor..)?, |b| b == b' ' || b == b'\t');
            if gap == 0 {
                return None;
            }
            cursor += gap;
        }
        let end = cursor + word.len();
        if !bytes.get(cursor..end)?.eq_ignore_ascii_case(word.as_bytes()) {
            return None;
        }
        cursor = end;
    }
    // Reject prefixes of longer words, e.g. `[RUNNER: ...]`.
    match bytes.get(cursor) {
        Some(b) if b.is_ascii_alphanumeric() || *b == b'_' => None,
        _ => Some(cursor),
    }
}

/// A closing fence is at least `ticks` backticks, optionally indented, then only whitespace.
fn is_closing_fence(line: &str, ticks: usize) -> bool {
    let trimmed = line.trim_start_matches([' ', '\t']);
    let run = trimmed.bytes().take_while(|b| *b == b'`').count();
    run >= ticks && trimmed[run..].trim().is_empty()
}

fn trim_final_newline(body: &str) -> &str {
    let body = body.strip_suffix('\n').unwrap_or(body);
    body.strip_suffix('\r').unwrap_or(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_no_actions() {
        assert_eq!(parse("Just some prose, nothing to do."), ParseOutcome::NoActions);
        assert_eq!(parse(""), ParseOutcome::NoActions);
    }

    #[test]
    fn test_create_and_run_scenario() {
        let text = "[CREATE FILE: src/a.txt]\n```\nhello\n```\n[RUN: echo hi]";
        assert_eq!(
            parse(text).into_actions(),
            vec![
                ActionRequest::create_file("src/a.txt", "hello"),
                ActionRequest::run("echo hi"),
            ]
        );
    }

    #[test]
    fn test_tokens_for_scenario() {
        let text = "[CREATE FILE: a.py]\n```python\nx = 1\n```";
        assert_eq!(
            tokenize(text),
            vec![
                Token::MarkerOpen(ActionKind::CreateFile),
                Token::Path("a.py"),
                Token::FenceStart {
                    ticks: 3,
                    info: "python"
                },
                Token::Code("x = 1"),
                Token::FenceEnd,
            ]
        );
    }

    #[test]
    fn test_order_preserved_across_kinds() {
        let text = "\
First I'll update the config.
[MODIFY FILE: config.toml]
```toml
debug = true
```
Then run it:
[RUN: cargo run]
And clean up:
[DELETE FILE: old.txt]
[CREATE FILE: new.txt]
```
fresh
```";
        let kinds: Vec<_> = parse(text).into_actions().into_iter().map(|a| a.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ActionKind::ModifyFile,
                ActionKind::RunCommand,
                ActionKind::DeleteFile,
                ActionKind::CreateFile,
            ]
        );
    }

    #[test]
    fn test_marker_without_block_is_dropped() {
        let text = "[CREATE FILE: lonely.txt]\nno block here\n[RUN: ls]";
        assert_eq!(parse(text).into_actions(), vec![ActionRequest::run("ls")]);
    }

    #[test]
    fn test_later_marker_supersedes_blockless_one() {
        let text = "[CREATE FILE: a.txt]\n[CREATE FILE: b.txt]\n```\nB\n```";
        assert_eq!(
            parse(text).into_actions(),
            vec![ActionRequest::create_file("b.txt", "B")]
        );
    }

    #[test]
    fn test_prose_between_marker_and_block() {
        let text = "[CREATE FILE: a.txt]\nHere is the file:\n\n```\nA\n```";
        assert_eq!(
            parse(text).into_actions(),
            vec![ActionRequest::create_file("a.txt", "A")]
        );
    }

    #[test]
    fn test_case_insensitive_keywords_and_trim() {
        let text = "[create file:   notes.md  ]\n```\nx\n```\n[Run:  npm test ]";
        assert_eq!(
            parse(text).into_actions(),
            vec![
                ActionRequest::create_file("notes.md", "x"),
                ActionRequest::run("npm test"),
            ]
        );
    }

    #[test]
    fn test_empty_payload_dropped() {
        let text = "[RUN:   ]\n[CREATE FILE: ]\n```\nx\n```\n[DELETE FILE:]";
        assert_eq!(parse(text), ParseOutcome::NoActions);
    }

    #[test]
    fn test_path_with_brackets() {
        let text = "[CREATE FILE: pages/[id].tsx]\n```tsx\nexport default 1\n```";
        assert_eq!(
            parse(text).into_actions(),
            vec![ActionRequest::create_file("pages/[id].tsx", "export default 1")]
        );
    }

    #[test]
    fn test_longer_fence_wraps_inner_fence() {
        let text = "[CREATE FILE: README.md]\n````markdown\n# T\n```sh\nls\n```\n````\n";
        assert_eq!(
            parse(text).into_actions(),
            vec![ActionRequest::create_file(
                "README.md",
                "# T\n```sh\nls\n```"
            )]
        );
    }

    #[test]
    fn test_markers_inside_blocks_are_content() {
        let text = "[CREATE FILE: doc.txt]\n```\n[RUN: rm -rf /]\n```";
        assert_eq!(
            parse(text).into_actions(),
            vec![ActionRequest::create_file("doc.txt", "[RUN: rm -rf /]")]
        );
    }

    #[test]
    fn test_unterminated_block_dropped() {
        let text = "[CREATE FILE: a.txt]\n```\nnever closed";
        assert_eq!(parse(text), ParseOutcome::NoActions);
    }

    #[test]
    fn test_multiline_content_and_empty_block() {
        let text = "[CREATE FILE: a.txt]\n```\nline1\nline2\n```\n[CREATE FILE: .gitkeep]\n```\n```";
        assert_eq!(
            parse(text).into_actions(),
            vec![
                ActionRequest::create_file("a.txt", "line1\nline2"),
                ActionRequest::create_file(".gitkeep", ""),
            ]
        );
    }

    #[test]
    fn test_crlf_line_endings() {
        let text = "[CREATE FILE: a.txt]\r\n```\r\nhello\r\n```\r\n";
        assert_eq!(
            parse(text).into_actions(),
            vec![ActionRequest::create_file("a.txt", "hello")]
        );
    }

    #[test]
    fn test_unknown_bracket_text_ignored() {
        let text = "See [the docs](http://x) and [RUNNER: nope] and [RUN echo]";
        assert_eq!(parse(text), ParseOutcome::NoActions);
    }

    #[test]
    fn test_fence_on_marker_line() {
        let text = "[CREATE FILE: a.txt] ```\nA\n```";
        assert_eq!(
            parse(text).into_actions(),
            vec![ActionRequest::create_file("a.txt", "A")]
        );
    }
}
