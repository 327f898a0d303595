//! Placeholder parser.
//!
//! Splits a string into literal text and `${...}` placeholders. Placeholders
//! nest, so `${environments.${environment}.db.host}` parses as one placeholder
//! whose children are the text `environments.`, an inner placeholder, and the
//! text `.db.host`. A `${` with no matching `}` is literal text.
//!
//! Parsing is a single left-to-right pass over an explicit stack of open
//! placeholders. Nesting is capped at [`MAX_NESTING`]; a `${` opened deeper
//! than that, and its matching `}`, are kept as literal text.
//!
//! Parsing is lossless: [`render`] on the parsed segments returns the input.

/// Deepest placeholder nesting that is parsed as structure
pub const MAX_NESTING: usize = 32;

/// One piece of a parsed string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    /// `${ ... }`, holding the segments between the braces
    Placeholder(Vec<Segment>),
}

impl Segment {
    /// The source text this segment was parsed from.
    pub fn source(&self) -> String {
        let mut out = String::new();
        self.write_source(&mut out);
        out
    }

    fn write_source(&self, out: &mut String) {
        match self {
            Segment::Text(text) => out.push_str(text),
            Segment::Placeholder(children) => {
                out.push_str("${");
                for child in children {
                    child.write_source(out);
                }
                out.push('}');
            }
        }
    }
}

/// Reassemble parsed segments into their source text.
pub fn render(segments: &[Segment]) -> String {
    segments.iter().map(Segment::source).collect()
}

/// Segments collected for one nesting level
#[derive(Default)]
struct Frame {
    segments: Vec<Segment>,
    text: String,
}

impl Frame {
    fn flush(&mut self) {
        if !self.text.is_empty() {
            self.segments.push(Segment::Text(std::mem::take(&mut self.text)));
        }
    }

    fn push_text(&mut self, text: &str) {
        self.text.push_str(text);
    }

    fn push_segment(&mut self, segment: Segment) {
        match segment {
            Segment::Text(text) => self.text.push_str(&text),
            placeholder => {
                self.flush();
                self.segments.push(placeholder);
            }
        }
    }

    fn finish(mut self) -> Vec<Segment> {
        self.flush();
        self.segments
    }
}

/// Parse `input` into text and placeholder segments.
pub fn parse(input: &str) -> Vec<Segment> {
    // stack[0] is the top level; every further frame is an open `${`
    let mut stack = vec![Frame::default()];
    // `${` openings past MAX_NESTING that are still waiting for their `}`
    let mut literal_depth = 0usize;
    let mut rest = input;

    while let Some(ch) = rest.chars().next() {
        if rest.starts_with("${") {
            rest = &rest[2..];
            if stack.len() > MAX_NESTING {
                literal_depth += 1;
                current(&mut stack).push_text("${");
            } else {
                stack.push(Frame::default());
            }
            continue;
        }

        rest = &rest[ch.len_utf8()..];
        if ch == '}' && literal_depth > 0 {
            literal_depth -= 1;
            current(&mut stack).push_text("}");
        } else if ch == '}' && stack.len() > 1 {
            if let Some(frame) = stack.pop() {
                let placeholder = Segment::Placeholder(frame.finish());
                current(&mut stack).push_segment(placeholder);
            }
        } else {
            current(&mut stack).text.push(ch);
        }
    }

    // Unclosed placeholders fold back into their parent as literal text
    while stack.len() > 1 {
        let Some(frame) = stack.pop() else { break };
        let parent = current(&mut stack);
        parent.push_text("${");
        for segment in frame.finish() {
            parent.push_segment(segment);
        }
    }

    stack.pop().map(Frame::finish).unwrap_or_default()
}

fn current(stack: &mut [Frame]) -> &mut Frame {
    let last = stack.len() - 1;
    &mut stack[last]
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn text(s: &str) -> Segment {
        Segment::Text(s.to_string())
    }

    #[test]
    fn test_plain_text() {
        assert_eq!(parse("no placeholders here"), vec![text("no placeholders here")]);
        assert!(parse("").is_empty());
    }

    #[test]
    fn test_simple_placeholder() {
        assert_eq!(
            parse("prefix-${VAR}-suffix"),
            vec![text("prefix-"), Segment::Placeholder(vec![text("VAR")]), text("-suffix")]
        );
    }

    #[test]
    fn test_nested_placeholder() {
        assert_eq!(
            parse("${environments.${environment}.secrets.k}"),
            vec![Segment::Placeholder(vec![
                text("environments."),
                Segment::Placeholder(vec![text("environment")]),
                text(".secrets.k"),
            ])]
        );
    }

    #[test]
    fn test_unterminated_is_text() {
        assert_eq!(parse("${VAR"), vec![text("${VAR")]);
        assert_eq!(
            parse("${a ${B}"),
            vec![text("${a "), Segment::Placeholder(vec![text("B")])]
        );
    }

    #[test]
    fn test_stray_closing_brace_is_text() {
        assert_eq!(parse("a}b"), vec![text("a}b")]);
        assert_eq!(parse("$ {x}"), vec![text("$ {x}")]);
    }

    #[test]
    fn test_empty_placeholder() {
        assert_eq!(parse("${}"), vec![Segment::Placeholder(vec![])]);
    }

    #[test]
    fn test_source_reproduces_placeholder() {
        let segments = parse("x${environments.${environment}.a}y");
        assert_eq!(segments[1].source(), "${environments.${environment}.a}");
    }

    #[test]
    fn test_deeply_unterminated_input_stays_literal() {
        let input = "${".repeat(20_000);
        let segments = parse(&input);
        assert_eq!(segments, vec![text(&input)]);
    }

    #[test]
    fn test_nesting_past_limit_is_literal() {
        let depth = 20_000;
        let input = format!("{}x{}", "${".repeat(depth), "}".repeat(depth));
        let segments = parse(&input);
        assert_eq!(render(&segments), input);

        let mut levels = 0;
        let mut current = &segments;
        while let [Segment::Placeholder(children)] = current.as_slice() {
            levels += 1;
            current = children;
        }
        assert_eq!(levels, MAX_NESTING);
        let expected_inner = format!(
            "{}x{}",
            "${".repeat(depth - MAX_NESTING),
            "}".repeat(depth - MAX_NESTING)
        );
        assert_eq!(current, &vec![text(&expected_inner)]);
    }

    #[test]
    fn test_unclosed_outer_keeps_closed_inner() {
        assert_eq!(
            parse("${x ${a} ${b"),
            vec![text("${x "), Segment::Placeholder(vec![text("a")]), text(" ${b")]
        );
    }

    proptest! {
        #[test]
        fn prop_render_is_lossless(input in "[a-zA-Z0-9_.${} -]{0,64}") {
            prop_assert_eq!(render(&parse(&input)), input);
        }
    }
}
