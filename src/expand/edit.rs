//! Modifier and subscript application for expanded values.
//!
//! A modifier clause is a run of edit letters: `G R D B S M` select (or,
//! with `=value`, replace) a path component, `U`/`L` case-fold, `T`
//! normalizes backslashes, `P` takes the parent directory, `E=` supplies a
//! default for an empty expansion and `J=` joins the elements. Unknown
//! letters are ignored, never errors.

use crate::atom::Interner;
use crate::list::StringList;
use crate::pathspec::{PathParts, Paths};

const SEL_GRIST: u8 = 1 << 0;
const SEL_ROOT: u8 = 1 << 1;
const SEL_DIR: u8 = 1 << 2;
const SEL_BASE: u8 = 1 << 3;
const SEL_SUFFIX: u8 = 1 << 4;
const SEL_MEMBER: u8 = 1 << 5;

/// The accumulated effect of a variable reference's modifier clauses.
#[derive(Clone, Debug, Default)]
pub struct VarEdit {
    select: u8,
    replace: PathParts,
    replace_mask: u8,
    upper: bool,
    lower: bool,
    parent: bool,
    to_slashes: bool,
    empty_default: Option<String>,
    join: Option<String>,
}

impl VarEdit {
    /// Parses modifier clauses in order; later clauses accumulate onto
    /// earlier ones.
    pub fn parse<'a>(clauses: impl IntoIterator<Item = &'a str>) -> VarEdit {
        let mut edit = VarEdit::default();
        for clause in clauses {
            edit.parse_clause(clause);
        }
        edit
    }

    fn parse_clause(&mut self, clause: &str) {
        let bytes = clause.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            let has_value = bytes.get(i + 1) == Some(&b'=');
            // A value runs to the end of its clause.
            let value = || clause[i + 2..].to_owned();
            match bytes[i] {
                b'G' if has_value => return self.replace_component(SEL_GRIST, value()),
                b'R' if has_value => return self.replace_component(SEL_ROOT, value()),
                b'D' if has_value => return self.replace_component(SEL_DIR, value()),
                b'B' if has_value => return self.replace_component(SEL_BASE, value()),
                b'S' if has_value => return self.replace_component(SEL_SUFFIX, value()),
                b'M' if has_value => return self.replace_component(SEL_MEMBER, value()),
                b'E' => {
                    self.empty_default = Some(if has_value { value() } else { String::new() });
                    return;
                }
                b'J' => {
                    self.join = Some(if has_value { value() } else { String::new() });
                    return;
                }
                b'G' => self.select |= SEL_GRIST,
                b'R' => self.select |= SEL_ROOT,
                b'D' => self.select |= SEL_DIR,
                b'B' => self.select |= SEL_BASE,
                b'S' => self.select |= SEL_SUFFIX,
                b'M' => self.select |= SEL_MEMBER,
                b'U' => self.upper = true,
                b'L' => self.lower = true,
                b'P' => self.parent = true,
                b'T' => self.to_slashes = true,
                _ => {}
            }
            i += 1;
        }
    }

    /// An empty replacement value clears the component (`:G=` strips
    /// grist), so replacements are tracked by mask, not by presence.
    fn replace_component(&mut self, which: u8, value: String) {
        self.replace_mask |= which;
        let slot = Some(value).filter(|v| !v.is_empty());
        match which {
            SEL_GRIST => self.replace.grist = slot,
            SEL_ROOT => self.replace.root = slot,
            SEL_DIR => self.replace.dir = slot,
            SEL_BASE => self.replace.base = slot.unwrap_or_default(),
            SEL_SUFFIX => self.replace.suffix = slot,
            SEL_MEMBER => self.replace.member = slot,
            _ => unreachable!(),
        }
    }

    fn edits_path(&self) -> bool {
        self.select != 0 || self.replace_mask != 0 || self.parent
    }

    /// Applies the edit to every element, then the list-level `E=` and
    /// `J=` effects.
    pub fn apply(
        &self,
        paths: &dyn Paths,
        interner: &mut Interner,
        list: &StringList,
    ) -> StringList {
        let mut out = Vec::with_capacity(list.len());
        for atom in list.iter() {
            let mut text = if self.edits_path() {
                let mut parts = paths.split(atom.as_str());
                if self.parent {
                    parts.to_parent();
                }
                self.apply_replacements(&mut parts);
                if self.select != 0 {
                    self.apply_selection(&mut parts);
                }
                paths.render(&parts)
            } else {
                atom.as_str().to_owned()
            };
            if self.upper {
                text = text.to_uppercase();
            }
            if self.lower {
                text = text.to_lowercase();
            }
            if self.to_slashes {
                text = text.replace('\\', "/");
            }
            out.push(interner.intern(&text));
        }
        if out.is_empty() {
            if let Some(default) = &self.empty_default {
                out.push(interner.intern(default));
            }
        }
        if let Some(separator) = &self.join {
            if out.len() > 1 {
                let joined = StringList::from_vec(out).join(separator);
                return StringList::single(interner.intern(&joined));
            }
        }
        StringList::from_vec(out)
    }

    fn apply_replacements(&self, parts: &mut PathParts) {
        if self.replace_mask & SEL_GRIST != 0 {
            parts.grist = self.replace.grist.clone();
        }
        if self.replace_mask & SEL_ROOT != 0 {
            parts.root = self.replace.root.clone();
        }
        if self.replace_mask & SEL_DIR != 0 {
            parts.dir = self.replace.dir.clone();
        }
        if self.replace_mask & SEL_BASE != 0 {
            parts.base = self.replace.base.clone();
        }
        if self.replace_mask & SEL_SUFFIX != 0 {
            parts.suffix = self.replace.suffix.clone();
        }
        if self.replace_mask & SEL_MEMBER != 0 {
            parts.member = self.replace.member.clone();
        }
    }

    fn apply_selection(&self, parts: &mut PathParts) {
        if self.select & SEL_GRIST == 0 {
            parts.grist = None;
        }
        if self.select & SEL_ROOT == 0 {
            parts.root = None;
        }
        if self.select & SEL_DIR == 0 {
            parts.dir = None;
        }
        if self.select & SEL_BASE == 0 {
            parts.base.clear();
        }
        if self.select & SEL_SUFFIX == 0 {
            parts.suffix = None;
        }
        if self.select & SEL_MEMBER == 0 {
            parts.member = None;
        }
    }
}

/// A parsed subscript: 1-based, inclusive on both ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Subscript {
    start: i32,
    end: SubscriptEnd,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SubscriptEnd {
    /// `[n]`: the single element at `n`.
    Single,
    /// `[n-]`: from `n` to the end.
    Open,
    /// `[n-m]`: from `n` through `m`.
    At(i32),
}

impl Subscript {
    /// Accepts `n`, `n-`, `n-m`, with either bound negative to count from
    /// the end. Anything else is malformed.
    pub fn parse(text: &str) -> Option<Subscript> {
        let (start, rest) = parse_index(text)?;
        if rest.is_empty() {
            return Some(Subscript {
                start,
                end: SubscriptEnd::Single,
            });
        }
        let rest = rest.strip_prefix('-')?;
        if rest.is_empty() {
            return Some(Subscript {
                start,
                end: SubscriptEnd::Open,
            });
        }
        let (end, leftover) = parse_index(rest)?;
        leftover.is_empty().then_some(Subscript {
            start,
            end: SubscriptEnd::At(end),
        })
    }

    /// Selects the addressed range. A start before the beginning clamps to
    /// the first element, a legacy quirk call sites depend on, preserved
    /// exactly. A start past the end, or a high bound below the low bound,
    /// selects nothing.
    pub fn select(&self, list: &StringList) -> StringList {
        let len = list.len() as i64;
        let resolve = |index: i32| {
            let index = i64::from(index);
            if index < 0 {
                len + index + 1
            } else {
                index
            }
        };
        let mut start = resolve(self.start);
        if start < 1 {
            start = 1;
        }
        let end = match self.end {
            SubscriptEnd::Single => start,
            SubscriptEnd::Open => len,
            SubscriptEnd::At(end) => resolve(end).min(len),
        };
        if start > len || end < start {
            return StringList::new();
        }
        list.iter()
            .skip(start as usize - 1)
            .take((end - start + 1) as usize)
            .cloned()
            .collect()
    }
}

fn parse_index(text: &str) -> Option<(i32, &str)> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let split = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    if split == 0 {
        return None;
    }
    let value: i32 = digits[..split].parse().ok()?;
    Some((if negative { -value } else { value }, &digits[split..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::Interner;
    use crate::pathspec::DefaultPaths;

    fn list(interner: &mut Interner, items: &[&str]) -> StringList {
        items.iter().map(|s| interner.intern(s)).collect()
    }

    fn pick(spec: &str, items: &[&str]) -> String {
        let mut interner = Interner::new();
        let source = list(&mut interner, items);
        Subscript::parse(spec).unwrap().select(&source).join(" ")
    }

    #[test]
    fn subscript_ranges() {
        let five = &["a", "b", "c", "d", "e"];
        assert_eq!(pick("2-4", five), "b c d");
        assert_eq!(pick("-1", five), "e");
        assert_eq!(pick("7-9", five), "");
        assert_eq!(pick("-2-", five), "d e");
        assert_eq!(pick("3", five), "c");
        assert_eq!(pick("3-", five), "c d e");
        assert_eq!(pick("4-2", five), "");
    }

    #[test]
    fn subscript_start_clamp_quirk() {
        // Legacy quirk: a start before the beginning silently clamps to the
        // first element instead of erroring or clamping symmetrically.
        let five = &["a", "b", "c", "d", "e"];
        assert_eq!(pick("0", five), "a");
        assert_eq!(pick("-9", five), "a");
        assert_eq!(pick("0-2", five), "a b");
        assert_eq!(pick("-1", &[]), "");
    }

    #[test]
    fn subscript_rejects_garbage() {
        assert!(Subscript::parse("x").is_none());
        assert!(Subscript::parse("1x").is_none());
        assert!(Subscript::parse("").is_none());
        assert!(Subscript::parse("1-2-3").is_none());
    }

    fn edit(clauses: &[&str], items: &[&str]) -> String {
        let mut interner = Interner::new();
        let source = list(&mut interner, items);
        VarEdit::parse(clauses.iter().copied())
            .apply(&DefaultPaths, &mut interner, &source)
            .join(" ")
    }

    #[test]
    fn component_selection() {
        assert_eq!(edit(&["B"], &["lib/util.cpp"]), "util");
        assert_eq!(edit(&["S"], &["lib/util.cpp"]), ".cpp");
        assert_eq!(edit(&["D"], &["lib/util.cpp"]), "lib");
        assert_eq!(edit(&["BS"], &["lib/util.cpp"]), "util.cpp");
        assert_eq!(edit(&["G"], &["<app>main.o", "plain"]), "<app> ");
    }

    #[test]
    fn component_replacement() {
        assert_eq!(edit(&["S=.o"], &["lib/util.cpp"]), "lib/util.o");
        assert_eq!(edit(&["B=other"], &["lib/util.cpp"]), "lib/other.cpp");
        assert_eq!(edit(&["G=pic"], &["main.o"]), "<pic>main.o");
        assert_eq!(edit(&["R=/top"], &["src/a.c"]), "/top/src/a.c");
        // empty replacement clears the component
        assert_eq!(edit(&["G="], &["<app>main.o"]), "main.o");
        assert_eq!(edit(&["S="], &["util.cpp"]), "util");
    }

    #[test]
    fn case_and_slash_edits() {
        assert_eq!(edit(&["U"], &["abc"]), "ABC");
        assert_eq!(edit(&["L"], &["ABC"]), "abc");
        assert_eq!(edit(&["T"], &["a\\b\\c"]), "a/b/c");
    }

    #[test]
    fn parent_directory() {
        assert_eq!(edit(&["P"], &["a/b/c.h"]), "a/b");
    }

    #[test]
    fn empty_default_and_join() {
        assert_eq!(edit(&["E=fallback"], &[]), "fallback");
        assert_eq!(edit(&["E=fallback"], &["present"]), "present");
        assert_eq!(edit(&["J=,"], &["a", "b", "c"]), "a,b,c");
        assert_eq!(edit(&["J=,"], &[]), "");
    }

    #[test]
    fn unknown_letters_are_ignored() {
        assert_eq!(edit(&["Q"], &["x"]), "x");
        assert_eq!(edit(&["QU"], &["x"]), "X");
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            // every selection is a contiguous window of the source list
            #[test]
            fn subscript_selects_a_contiguous_window(
                len in 0usize..6,
                start in -7i32..8,
                end in proptest::option::of(-7i32..8),
                open in proptest::bool::ANY,
            ) {
                let mut interner = Interner::new();
                let items: Vec<String> = (0..len).map(|i| format!("e{i}")).collect();
                let source: StringList =
                    items.iter().map(|s| interner.intern(s)).collect();

                let spec = match (open, end) {
                    (true, _) => format!("{start}-"),
                    (false, Some(end)) => format!("{start}-{end}"),
                    (false, None) => format!("{start}"),
                };
                let subscript = Subscript::parse(&spec).expect("spec is well-formed");
                let selected = subscript.select(&source);

                prop_assert!(selected.len() <= source.len());
                if let Some(first) = selected.first() {
                    // elements are unique, so the window position is exact
                    let at = items
                        .iter()
                        .position(|i| i.as_str() == first.as_str())
                        .expect("selected element comes from the source");
                    for (offset, atom) in selected.iter().enumerate() {
                        prop_assert_eq!(atom.as_str(), items[at + offset].as_str());
                    }
                }
            }
        }
    }
}
