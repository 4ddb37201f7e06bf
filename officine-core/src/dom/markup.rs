//! Markup parser and serialisation helpers.
//!
//! The parser targets the fragments the views actually ship: well-formed
//! enough HTML with void elements, boolean and unquoted attributes, inline
//! `script`/`style` blocks and the odd stray close tag. It never fails; what
//! it cannot make sense of is kept as text or dropped.

use std::borrow::Cow;

use compact_str::CompactString;

/// Elements that never have children or a close tag.
pub const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

/// Elements whose content is taken verbatim up to the matching close tag.
pub const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style", "textarea"];

#[inline]
pub fn is_void(tag: &str) -> bool {
    VOID_ELEMENTS.contains(&tag)
}

#[inline]
pub fn is_raw_text(tag: &str) -> bool {
    RAW_TEXT_ELEMENTS.contains(&tag)
}

/// Owned parse result, inserted into the arena afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedNode {
    Element {
        tag: CompactString,
        attrs: Vec<(CompactString, String)>,
        children: Vec<ParsedNode>,
    },
    Text(String),
}

struct OpenElement {
    tag: CompactString,
    attrs: Vec<(CompactString, String)>,
    children: Vec<ParsedNode>,
}

impl OpenElement {
    fn finish(self) -> ParsedNode {
        ParsedNode::Element {
            tag: self.tag,
            attrs: self.attrs,
            children: self.children,
        }
    }
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    stack: Vec<OpenElement>,
    roots: Vec<ParsedNode>,
}

/// Parses a markup fragment into a forest of nodes.
pub fn parse_fragment(src: &str) -> Vec<ParsedNode> {
    let mut parser = Parser {
        src,
        pos: 0,
        stack: Vec::new(),
        roots: Vec::new(),
    };
    parser.run();
    parser.roots
}

impl<'a> Parser<'a> {
    fn run(&mut self) {
        while self.pos < self.src.len() {
            let rest: &str = &self.src[self.pos..];

            if rest.starts_with("<!--") {
                self.pos = rest
                    .find("-->")
                    .map_or(self.src.len(), |end| self.pos + end + 3);
            } else if rest.starts_with("<!") || rest.starts_with("<?") {
                self.skip_past('>');
            } else if rest.starts_with("</") {
                self.close_tag();
            } else if rest.starts_with('<')
                && rest[1..].starts_with(|c: char| c.is_ascii_alphabetic())
            {
                self.open_tag();
            } else {
                self.text();
            }
        }

        while let Some(open) = self.stack.pop() {
            let node: ParsedNode = open.finish();
            self.push(node);
        }
    }

    fn push(&mut self, node: ParsedNode) {
        match self.stack.last_mut() {
            Some(parent) => parent.children.push(node),
            None => self.roots.push(node),
        }
    }

    fn skip_past(&mut self, delimiter: char) {
        let rest: &str = &self.src[self.pos..];
        self.pos = rest
            .find(delimiter)
            .map_or(self.src.len(), |end| self.pos + end + delimiter.len_utf8());
    }

    fn text(&mut self) {
        let rest: &str = &self.src[self.pos..];
        // a '<' that does not open a tag is literal text
        let first: usize = rest.chars().next().map_or(1, char::len_utf8);
        let end: usize = rest[first..].find('<').map_or(rest.len(), |i| i + first);
        let raw: &str = &rest[..end];
        self.pos += end;
        self.push(ParsedNode::Text(decode_entities(raw).into_owned()));
    }

    fn close_tag(&mut self) {
        let start: usize = self.pos + 2;
        self.skip_past('>');
        let end: usize = if self.src[..self.pos].ends_with('>') {
            self.pos - 1
        } else {
            self.pos
        };
        let name: String = self.src[start..end].trim().to_ascii_lowercase();

        // Stray close tags are ignored; a match closes everything above it.
        let Some(depth) = self.stack.iter().rposition(|open| open.tag == name) else {
            return;
        };
        while self.stack.len() > depth {
            if let Some(open) = self.stack.pop() {
                let node: ParsedNode = open.finish();
                self.push(node);
            }
        }
    }

    fn open_tag(&mut self) {
        let bytes: &[u8] = self.src.as_bytes();
        let mut i: usize = self.pos + 1;
        while i < bytes.len() && is_name_byte(bytes[i]) {
            i += 1;
        }
        let tag: CompactString =
            CompactString::new(self.src[self.pos + 1..i].to_ascii_lowercase());

        let mut attrs: Vec<(CompactString, String)> = Vec::new();
        let mut self_closing: bool = false;

        loop {
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            if i >= bytes.len() {
                break;
            }
            match bytes[i] {
                b'>' => {
                    i += 1;
                    break;
                }
                b'/' => {
                    self_closing = bytes.get(i + 1) == Some(&b'>');
                    i += 1;
                    continue;
                }
                _ => {}
            }

            let name_start: usize = i;
            while i < bytes.len()
                && !bytes[i].is_ascii_whitespace()
                && !matches!(bytes[i], b'=' | b'>' | b'/')
            {
                i += 1;
            }
            let name: CompactString =
                CompactString::new(self.src[name_start..i].to_ascii_lowercase());

            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }

            let mut value: String = String::new();
            if i < bytes.len() && bytes[i] == b'=' {
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                    i += 1;
                }
                if i < bytes.len() && (bytes[i] == b'"' || bytes[i] == b'\'') {
                    let quote: u8 = bytes[i];
                    let value_start: usize = i + 1;
                    i = value_start;
                    while i < bytes.len() && bytes[i] != quote {
                        i += 1;
                    }
                    value = decode_entities(&self.src[value_start..i]).into_owned();
                    i = (i + 1).min(bytes.len());
                } else {
                    let value_start: usize = i;
                    while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'>'
                    {
                        i += 1;
                    }
                    value = decode_entities(&self.src[value_start..i]).into_owned();
                }
            }

            if !name.is_empty() && !attrs.iter().any(|(existing, _)| *existing == name) {
                attrs.push((name, value));
            }
        }
        self.pos = i;

        if is_void(&tag) || self_closing {
            self.push(ParsedNode::Element {
                tag,
                attrs,
                children: Vec::new(),
            });
            return;
        }

        if is_raw_text(&tag) {
            let rest: &str = &self.src[self.pos..];
            let closing: String = format!("</{tag}");
            let end: usize = rest
                .to_ascii_lowercase()
                .find(&closing)
                .unwrap_or(rest.len());
            let body: &str = &rest[..end];
            self.pos += end;
            self.skip_past('>');

            let children: Vec<ParsedNode> = if body.is_empty() {
                Vec::new()
            } else if tag == "textarea" {
                vec![ParsedNode::Text(decode_entities(body).into_owned())]
            } else {
                vec![ParsedNode::Text(body.to_string())]
            };
            self.push(ParsedNode::Element {
                tag,
                attrs,
                children,
            });
            return;
        }

        self.stack.push(OpenElement {
            tag,
            attrs,
            children: Vec::new(),
        });
    }
}

#[inline]
fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b':' || b == b'_'
}

/// Decodes the character references the views use.
pub fn decode_entities(input: &str) -> Cow<'_, str> {
    if !input.contains('&') {
        return Cow::Borrowed(input);
    }

    let mut out: String = String::with_capacity(input.len());
    let mut rest: &str = input;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];

        let decoded: Option<(char, usize)> = rest.find(';').and_then(|semi| {
            let entity: &str = &rest[1..semi];
            let ch: Option<char> = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some('\u{a0}'),
                _ if entity.starts_with("#x") || entity.starts_with("#X") => {
                    u32::from_str_radix(&entity[2..], 16)
                        .ok()
                        .and_then(char::from_u32)
                }
                _ if entity.starts_with('#') => {
                    entity[1..].parse::<u32>().ok().and_then(char::from_u32)
                }
                _ => None,
            };
            ch.map(|c| (c, semi + 1))
        });

        match decoded {
            Some((ch, consumed)) => {
                out.push(ch);
                rest = &rest[consumed..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

/// Escapes text content for serialisation.
pub fn escape_text(input: &str) -> Cow<'_, str> {
    if !input.contains(['&', '<', '>']) {
        return Cow::Borrowed(input);
    }
    let mut out: String = String::with_capacity(input.len() + 8);
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    Cow::Owned(out)
}

/// Escapes an attribute value for serialisation inside double quotes.
pub fn escape_attr(input: &str) -> Cow<'_, str> {
    if !input.contains(['&', '"', '<']) {
        return Cow::Borrowed(input);
    }
    let mut out: String = String::with_capacity(input.len() + 8);
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            _ => out.push(ch),
        }
    }
    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(node: &ParsedNode) -> (&str, &[(CompactString, String)], &[ParsedNode]) {
        match node {
            ParsedNode::Element {
                tag,
                attrs,
                children,
            } => (tag.as_str(), attrs.as_slice(), children.as_slice()),
            ParsedNode::Text(text) => panic!("expected element, got text {text:?}"),
        }
    }

    #[test]
    fn test_nested_elements_and_attributes() {
        let nodes = parse_fragment(r#"<div data-load-key="moduleA" class=view><p>Hi</p></div>"#);
        assert_eq!(nodes.len(), 1);

        let (tag, attrs, children) = element(&nodes[0]);
        assert_eq!(tag, "div");
        assert_eq!(attrs[0], ("data-load-key".into(), "moduleA".to_string()));
        assert_eq!(attrs[1], ("class".into(), "view".to_string()));

        let (inner, _, text) = element(&children[0]);
        assert_eq!(inner, "p");
        assert_eq!(text[0], ParsedNode::Text("Hi".into()));
    }

    #[test]
    fn test_void_and_boolean_attributes() {
        let nodes = parse_fragment(r#"<form id="f"><input name="qte" required><br></form>"#);
        let (_, _, children) = element(&nodes[0]);
        assert_eq!(children.len(), 2);

        let (tag, attrs, grandchildren) = element(&children[0]);
        assert_eq!(tag, "input");
        assert!(attrs.iter().any(|(name, value)| name == "required" && value.is_empty()));
        assert!(grandchildren.is_empty());
    }

    #[test]
    fn test_raw_text_is_not_parsed() {
        let nodes = parse_fragment("<script>if (a < b) { x = '<p>'; }</script><p>after</p>");
        assert_eq!(nodes.len(), 2);
        let (_, _, children) = element(&nodes[0]);
        assert_eq!(
            children[0],
            ParsedNode::Text("if (a < b) { x = '<p>'; }".into())
        );
    }

    #[test]
    fn test_comments_doctype_and_stray_close_tags() {
        let nodes = parse_fragment("<!DOCTYPE html><!-- note --><div>a</span>b</div>");
        assert_eq!(nodes.len(), 1);
        let (_, _, children) = element(&nodes[0]);
        assert_eq!(
            children,
            &[ParsedNode::Text("a".into()), ParsedNode::Text("b".into())]
        );
    }

    #[test]
    fn test_unclosed_elements_are_closed_at_end() {
        let nodes = parse_fragment("<ul><li>one<li>two");
        let (tag, _, children) = element(&nodes[0]);
        assert_eq!(tag, "ul");
        assert_eq!(children.len(), 1);
    }

    #[test]
    fn test_entities_round_trip_through_escape() {
        assert_eq!(decode_entities("a &amp; b &lt;c&gt; &#233;&#x41;"), "a & b <c> éA");
        assert_eq!(decode_entities("AT&T"), "AT&T");
        assert_eq!(escape_text("a < b & c"), "a &lt; b &amp; c");
        assert_eq!(escape_attr(r#"say "hi""#), "say &quot;hi&quot;");
    }
}
