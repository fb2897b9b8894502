//! Parser for the expansion mini-grammar embedded in every word of the
//! build language: plain text, variable references `$(name[idx]:mods)` and
//! response-file constructs `@(name:E=contents)`.
//!
//! Structural errors are reported through the diagnostics collaborator and
//! recovered from locally; parsing is best-effort and never aborts a
//! compile.

pub mod edit;

use crate::atom::{Atom, Interner};
use crate::host::Diagnostics;

/// One parse node of a word's expansion.
#[derive(Clone, Debug)]
pub enum Node {
    Literal(Atom),
    Variable(Box<VarRef>),
    File(Box<FileRef>),
}

/// An ordered run of nodes forming one concatenation unit. Expansion takes
/// the cartesian product across the nodes of a group.
#[derive(Clone, Debug, Default)]
pub struct NodeGroup(pub Vec<Node>);

impl NodeGroup {
    /// The group's text when it is one plain literal, else `None`.
    pub fn as_literal(&self) -> Option<&Atom> {
        match self.0.as_slice() {
            [Node::Literal(atom)] => Some(atom),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct VarRef {
    pub name: NodeGroup,
    pub subscript: Option<NodeGroup>,
    pub modifiers: Vec<NodeGroup>,
}

#[derive(Clone, Debug)]
pub struct FileRef {
    pub filename: NodeGroup,
    pub contents: NodeGroup,
}

/// Scans words left to right. The scanner only ever stops on ASCII marker
/// bytes, so multibyte text passes through literals untouched.
pub struct ExpandParser<'a> {
    interner: &'a mut Interner,
    diag: &'a mut dyn Diagnostics,
    file: &'a str,
    line: u32,
}

struct Cursor<'s> {
    src: &'s str,
    pos: usize,
}

impl<'s> Cursor<'s> {
    fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    fn peek2(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos + 1).copied()
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }
}

impl<'a> ExpandParser<'a> {
    pub fn new(
        interner: &'a mut Interner,
        diag: &'a mut dyn Diagnostics,
        file: &'a str,
        line: u32,
    ) -> Self {
        ExpandParser {
            interner,
            diag,
            file,
            line,
        }
    }

    /// Parses one word as a single concatenation unit.
    pub fn parse(&mut self, text: &str) -> NodeGroup {
        let mut cursor = Cursor { src: text, pos: 0 };
        let group = self.group(&mut cursor, b"");
        debug_assert!(cursor.at_end());
        group
    }

    /// Parses action text in whitespace-tokenized mode: whitespace runs
    /// become verbatim literal groups, tokens are parsed like words.
    /// Whitespace inside a balanced `$(…)` or `@(…)` stays in its token.
    pub fn parse_action_text(&mut self, text: &str) -> Vec<NodeGroup> {
        let bytes = text.as_bytes();
        let mut groups = Vec::new();
        let mut pos = 0;
        while pos < bytes.len() {
            let start = pos;
            if bytes[pos].is_ascii_whitespace() {
                while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
                    if bytes[pos] == b'\n' {
                        self.line += 1;
                    }
                    pos += 1;
                }
                let ws = self.interner.intern(&text[start..pos]);
                groups.push(NodeGroup(vec![Node::Literal(ws)]));
            } else {
                let mut depth = 0usize;
                while pos < bytes.len() {
                    let c = bytes[pos];
                    if depth == 0 && c.is_ascii_whitespace() {
                        break;
                    }
                    if (c == b'$' || c == b'@') && bytes.get(pos + 1) == Some(&b'(') {
                        depth += 1;
                        pos += 2;
                        continue;
                    }
                    if depth > 0 {
                        if c == b'(' {
                            depth += 1;
                        } else if c == b')' {
                            depth -= 1;
                        }
                    }
                    pos += 1;
                }
                groups.push(self.parse(&text[start..pos]));
            }
        }
        groups
    }

    fn report(&mut self, message: &str) {
        self.diag.report(self.file, self.line, message);
    }

    /// Scans nodes until end of input or a byte from `stops` at this
    /// nesting level. The stop byte is left for the caller.
    fn group(&mut self, cursor: &mut Cursor<'_>, stops: &[u8]) -> NodeGroup {
        let mut nodes = Vec::new();
        loop {
            let start = cursor.pos;
            while let Some(c) = cursor.peek() {
                if stops.contains(&c) {
                    break;
                }
                if (c == b'$' || c == b'@') && cursor.peek2() == Some(b'(') {
                    break;
                }
                cursor.pos += 1;
            }
            if cursor.pos > start {
                let literal = self.interner.intern(&cursor.src[start..cursor.pos]);
                nodes.push(Node::Literal(literal));
            }
            match cursor.peek() {
                None => break,
                Some(c) if stops.contains(&c) => break,
                Some(b'$') => {
                    cursor.pos += 2;
                    nodes.push(self.variable(cursor));
                }
                Some(b'@') => {
                    cursor.pos += 2;
                    nodes.push(self.file_construct(cursor));
                }
                Some(_) => unreachable!("scan stopped on a non-marker byte"),
            }
        }
        NodeGroup(nodes)
    }

    /// Called just past `$(`.
    fn variable(&mut self, cursor: &mut Cursor<'_>) -> Node {
        let name = self.group(cursor, b":[)");
        let mut subscript = None;
        if cursor.peek() == Some(b'[') {
            cursor.pos += 1;
            subscript = Some(self.group(cursor, b"])"));
            if cursor.peek() == Some(b']') {
                cursor.pos += 1;
            } else {
                self.report("unterminated subscript in variable reference");
            }
            if !matches!(cursor.peek(), None | Some(b':') | Some(b')')) {
                self.report("text between subscript and modifiers ignored");
                while !matches!(cursor.peek(), None | Some(b':') | Some(b')')) {
                    cursor.pos += 1;
                }
            }
        }
        let mut modifiers = Vec::new();
        while cursor.peek() == Some(b':') {
            cursor.pos += 1;
            modifiers.push(self.group(cursor, b":)"));
        }
        if cursor.peek() == Some(b')') {
            cursor.pos += 1;
        } else {
            self.report("unbalanced parentheses in variable reference");
        }
        Node::Variable(Box::new(VarRef {
            name,
            subscript,
            modifiers,
        }))
    }

    /// Called just past `@(`. The `E=` clause supplies the contents; the
    /// whole construct expands to the file name.
    fn file_construct(&mut self, cursor: &mut Cursor<'_>) -> Node {
        let filename = self.group(cursor, b":)");
        let mut contents = None;
        while cursor.peek() == Some(b':') {
            cursor.pos += 1;
            let clause = self.group(cursor, b":)");
            match strip_contents_marker(self.interner, clause) {
                Ok(body) => contents = Some(body),
                Err(_) => self.report("response file construct clause is not E=; ignored"),
            }
        }
        if cursor.peek() == Some(b')') {
            cursor.pos += 1;
        } else {
            self.report("unbalanced parentheses in response file construct");
        }
        if contents.is_none() {
            self.report("response file construct has no E= contents");
        }
        Node::File(Box::new(FileRef {
            filename,
            contents: contents.unwrap_or_default(),
        }))
    }
}

/// Strips the leading `E=` from a contents clause, or returns the clause
/// unchanged when it is not a contents clause.
fn strip_contents_marker(
    interner: &mut Interner,
    mut clause: NodeGroup,
) -> Result<NodeGroup, NodeGroup> {
    match clause.0.first() {
        Some(Node::Literal(atom)) if atom.as_str().starts_with("E=") => {
            let rest = atom.as_str()["E=".len()..].to_owned();
            if rest.is_empty() {
                clause.0.remove(0);
            } else {
                clause.0[0] = Node::Literal(interner.intern(&rest));
            }
            Ok(clause)
        }
        _ => Err(clause),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryDiagnostics;

    fn parse(text: &str) -> (NodeGroup, Vec<String>) {
        let mut interner = Interner::new();
        let mut diag = MemoryDiagnostics::default();
        let group = ExpandParser::new(&mut interner, &mut diag, "test", 1).parse(text);
        (group, diag.messages())
    }

    #[test]
    fn plain_text_is_one_literal() {
        let (group, errs) = parse("hello.c");
        assert!(errs.is_empty());
        assert_eq!(group.as_literal().unwrap().as_str(), "hello.c");
    }

    #[test]
    fn variable_with_subscript_and_modifiers() {
        let (group, errs) = parse("$(SOURCES[2-4]:S=.o:U)");
        assert!(errs.is_empty());
        assert_eq!(group.0.len(), 1);
        let Node::Variable(var) = &group.0[0] else {
            panic!("expected a variable node");
        };
        assert_eq!(var.name.as_literal().unwrap().as_str(), "SOURCES");
        assert_eq!(
            var.subscript.as_ref().unwrap().as_literal().unwrap().as_str(),
            "2-4"
        );
        assert_eq!(var.modifiers.len(), 2);
        assert_eq!(var.modifiers[0].as_literal().unwrap().as_str(), "S=.o");
        assert_eq!(var.modifiers[1].as_literal().unwrap().as_str(), "U");
    }

    #[test]
    fn adjacency_needs_no_separator() {
        let (group, errs) = parse("lib$(NAME)$(SUFFIX)");
        assert!(errs.is_empty());
        assert_eq!(group.0.len(), 3);
        assert!(matches!(&group.0[0], Node::Literal(l) if l.as_str() == "lib"));
        assert!(matches!(&group.0[1], Node::Variable(_)));
        assert!(matches!(&group.0[2], Node::Variable(_)));
    }

    #[test]
    fn nested_reference_in_name() {
        let (group, errs) = parse("$($(indirect))");
        assert!(errs.is_empty());
        let Node::Variable(var) = &group.0[0] else {
            panic!("expected a variable node");
        };
        assert_eq!(var.name.0.len(), 1);
        assert!(matches!(&var.name.0[0], Node::Variable(_)));
    }

    #[test]
    fn dollar_without_paren_is_literal() {
        let (group, errs) = parse("US$99");
        assert!(errs.is_empty());
        assert_eq!(group.as_literal().unwrap().as_str(), "US$99");
    }

    #[test]
    fn unbalanced_reference_is_reported_not_fatal() {
        let (group, errs) = parse("$(OPEN");
        assert_eq!(errs.len(), 1);
        assert!(errs[0].contains("unbalanced"));
        assert!(matches!(&group.0[0], Node::Variable(var)
            if var.name.as_literal().unwrap().as_str() == "OPEN"));
    }

    #[test]
    fn response_file_construct() {
        let (group, errs) = parse("@($(out).rsp:E=--flag $(in))");
        assert!(errs.is_empty());
        let Node::File(file) = &group.0[0] else {
            panic!("expected a file node");
        };
        assert_eq!(file.filename.0.len(), 2);
        assert_eq!(file.contents.0.len(), 2);
        assert!(matches!(&file.contents.0[0], Node::Literal(l)
            if l.as_str() == "--flag "));
    }

    #[test]
    fn action_text_keeps_whitespace_runs() {
        let mut interner = Interner::new();
        let mut diag = MemoryDiagnostics::default();
        let groups = ExpandParser::new(&mut interner, &mut diag, "test", 1)
            .parse_action_text("cc -o $(out)  $(in:J= )");
        assert!(diag.messages().is_empty());
        // "cc", " ", "-o", " ", "$(out)", "  ", "$(in:J= )"
        assert_eq!(groups.len(), 7);
        assert_eq!(groups[5].as_literal().unwrap().as_str(), "  ");
        // the join modifier's space survives tokenization
        let Node::Variable(var) = &groups[6].0[0] else {
            panic!("expected a variable token");
        };
        assert_eq!(var.modifiers[0].as_literal().unwrap().as_str(), "J= ");
    }
}
