use std::borrow::Borrow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use fxhash::FxHashSet;

/// An interned, immutable string. Every value the engine touches is built
/// from atoms, and the interner guarantees that two equal strings share
/// storage, so cloning an atom is a pointer copy.
#[derive(Clone, Eq)]
pub struct Atom(Rc<str>);

impl Atom {
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl PartialEq for Atom {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0) || self.0 == other.0
    }
}

impl Hash for Atom {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state)
    }
}

impl PartialOrd for Atom {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Atom {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl Borrow<str> for Atom {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Atom {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

/// The interning table. Stands in for the host's atom service; hosts that
/// already intern names can wrap their own table behind the same two calls.
#[derive(Default)]
pub struct Interner {
    table: FxHashSet<Rc<str>>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, text: &str) -> Atom {
        if let Some(existing) = self.table.get(text) {
            return Atom(existing.clone());
        }
        let entry: Rc<str> = Rc::from(text);
        self.table.insert(entry.clone());
        Atom(entry)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_shares_storage() {
        let mut interner = Interner::new();
        let a = interner.intern("grist");
        let b = interner.intern("grist");
        assert!(Rc::ptr_eq(&a.0, &b.0));
        assert_eq!(interner.len(), 1);
    }

    #[test]
    fn atoms_order_as_strings() {
        let mut interner = Interner::new();
        let a = interner.intern("abc");
        let b = interner.intern("abd");
        assert!(a < b);
        assert_eq!(a, interner.intern("abc"));
    }
}
