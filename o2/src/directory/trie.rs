//! The local address-path trie (§3 "Address Trie Node", §4.3).

use o2_proto::{Arg, Message};

use super::pattern;
use crate::outbox::Outbox;

/// A handler bound to a specific address path and optional typespec (§3
/// "Method").
///
/// The source's `void *user_data` is dropped entirely: a Rust closure
/// captures whatever state it needs directly, which is the idiomatic
/// replacement the redesign notes (§9) call for when retiring C-style
/// sentinel/opaque-pointer plumbing.
pub struct Method {
    /// Required argument typetag (characters only, no leading `,`), or
    /// `None` for "no check" (§4.3 step 4).
    pub typespec: Option<Box<str>>,
    /// Whether a typetag mismatch should be resolved by per-argument
    /// coercion (§4.1) rather than rejecting the method outright.
    pub coerce: bool,
    /// Whether the handler wants a materialized `ArgView`, or will pull
    /// arguments itself via [`o2_proto::MessageExtractor`] (§4.3 step 5).
    pub parse: bool,
    pub handler: Box<dyn FnMut(&Message<'_>, Option<&[Arg<'_>]>, &mut Outbox<'_>)>,
}

impl std::fmt::Debug for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Method")
            .field("typespec", &self.typespec)
            .field("coerce", &self.coerce)
            .field("parse", &self.parse)
            .finish_non_exhaustive()
    }
}

/// One level of the address trie. Children are kept in insertion order (a
/// `Vec`, not a `HashMap`) because §4.3's tie-break for multiple pattern
/// matches is "deterministic insertion order at each trie node".
#[derive(Debug, Default)]
pub struct Node {
    children: Vec<(Box<str>, Node)>,
    methods: Vec<Method>,
}

impl Node {
    pub fn new() -> Self {
        Self::default()
    }

    fn child_mut(&mut self, segment: &str) -> &mut Node {
        if let Some(idx) = self.children.iter().position(|(k, _)| k.as_ref() == segment) {
            &mut self.children[idx].1
        } else {
            self.children.push((segment.into(), Node::default()));
            &mut self.children.last_mut().unwrap().1
        }
    }

    /// Installs `method` at `path` (the address segments after the service
    /// name), creating intermediate nodes as needed.
    pub fn install(&mut self, path: &[&str], method: Method) {
        match path.split_first() {
            None => self.methods.push(method),
            Some((head, rest)) => self.child_mut(head).install(rest, method),
        }
    }

    /// Removes every method at `path`'s exact node, if any (used when a
    /// service is torn down wholesale; no partial-path removal is exposed,
    /// matching the source's lack of a per-method remove API).
    pub fn clear_path(&mut self, path: &[&str]) {
        match path.split_first() {
            None => self.methods.clear(),
            Some((head, rest)) => {
                if let Some((_, child)) = self.children.iter_mut().find(|(k, _)| k.as_ref() == *head) {
                    child.clear_path(rest);
                }
            }
        }
    }

    /// Descends `segments`, collecting every matching method's mutable
    /// reference into `out`, in the deterministic order §4.3 requires.
    ///
    /// `pattern_free`, once true for a lookup (the `!`-prefix hint, §4.1),
    /// stays true for every remaining level: no wildcard expansion is
    /// attempted anywhere below a pattern-free lookup, only direct child
    /// lookup.
    pub fn collect_matches<'n>(&'n mut self, segments: &[&str], pattern_free: bool, out: &mut Vec<&'n mut Method>) {
        match segments.split_first() {
            None => out.extend(self.methods.iter_mut()),
            Some((seg, rest)) => {
                if pattern_free || !pattern::is_pattern(seg) {
                    if let Some((_, child)) = self.children.iter_mut().find(|(k, _)| k.as_ref() == *seg) {
                        child.collect_matches(rest, pattern_free, out);
                    }
                } else {
                    for (key, child) in self.children.iter_mut() {
                        if pattern::matches(seg, key) {
                            child.collect_matches(rest, pattern_free, out);
                        }
                    }
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty() && self.methods.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn counting_method(typespec: Option<&str>, coerce: bool, parse: bool, counter: Rc<RefCell<Vec<i32>>>) -> Method {
        Method {
            typespec: typespec.map(Into::into),
            coerce,
            parse,
            handler: Box::new(move |_msg, argv, _outbox| {
                let v = match argv.and_then(|a| a.first()) {
                    Some(Arg::Int32(i)) => *i,
                    _ => -1,
                };
                counter.borrow_mut().push(v);
            }),
        }
    }

    #[test]
    fn pattern_match_invokes_each_child_once_in_insertion_order() {
        let mut root = Node::new();
        let hits = Rc::new(RefCell::new(Vec::new()));
        root.install(&["a"], counting_method(None, false, true, hits.clone()));
        root.install(&["b"], counting_method(None, false, true, hits.clone()));

        let msg = Message {
            timestamp: 0.0,
            address: "/s/*".into(),
            typetag: ",i".into(),
            args: alloc_vec(Arg::Int32(7)),
        };
        let mut out = Vec::new();
        root.collect_matches(&["*"], false, &mut out);
        let mut queue = std::collections::VecDeque::new();
        for m in &mut out {
            let mut outbox = Outbox::new(&mut queue);
            (m.handler)(&msg, Some(&[Arg::Int32(7)]), &mut outbox);
        }
        assert_eq!(*hits.borrow(), vec![7, 7]);
    }

    fn alloc_vec(a: Arg<'static>) -> Vec<Arg<'static>> {
        vec![a]
    }
}
