//! The service directory (component C3, §4.3).

pub mod pattern;
pub mod trie;

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};

use o2_proto::{Arg, Message};

use crate::outbox::Outbox;
use crate::peer::{PeerId, ServiceKind};
use trie::{Method, Node};

/// One entry in the directory: a service name plus what it actually is.
#[derive(Debug)]
pub struct ServiceEntry {
    pub kind: ServiceKind,
}

/// The outcome of routing one incoming/outgoing message (§4.3 steps 1-2).
#[derive(Debug)]
pub enum Route {
    /// Dispatched locally; carries the number of methods invoked (0 means
    /// the address matched no installed method — still a successful route,
    /// just a silent no-op, matching the source's lack of a "no such
    /// method" error).
    Dispatched(usize),
    /// Must be forwarded to this peer's transport, unchanged, preserving
    /// the timestamp (§4.3 step 2).
    Forward(PeerId),
    /// No service owns the leading address segment (§6 `FAIL`).
    UnknownService,
}

/// The local service table plus per-service method tries (§3, §4.3).
#[derive(Debug, Default)]
pub struct Directory {
    services: HashMap<Box<str>, ServiceEntry>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_local_service(&mut self, name: &str) {
        self.services.insert(
            name.into(),
            ServiceEntry {
                kind: ServiceKind::Local(Node::new()),
            },
        );
    }

    pub fn add_remote_service(&mut self, name: &str, peer: PeerId) {
        self.services.insert(
            name.into(),
            ServiceEntry {
                kind: ServiceKind::Remote(peer),
            },
        );
    }

    pub fn remove_service(&mut self, name: &str) -> Option<ServiceEntry> {
        self.services.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&ServiceEntry> {
        self.services.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(|s| s.as_ref())
    }

    /// Removes every remote service that routes through `peer`, returning
    /// their names (§4.4: peer teardown removes its owned services).
    pub fn remove_services_of(&mut self, peer: &PeerId) -> Vec<Box<str>> {
        let dead: Vec<Box<str>> = self
            .services
            .iter()
            .filter(|(_, entry)| matches!(&entry.kind, ServiceKind::Remote(p) if p == peer))
            .map(|(name, _)| name.clone())
            .collect();
        for name in &dead {
            self.services.remove(name);
        }
        dead
    }

    /// Installs a method at `address` (service name + path) on a local
    /// service. Returns `false` if `address`'s service is not local (or
    /// does not exist).
    pub fn add_method(&mut self, address: &str, method: Method) -> bool {
        let mut segs = split_address(address);
        let Some(service) = segs.next() else {
            return false;
        };
        let Some(entry) = self.services.get_mut(service) else {
            return false;
        };
        let ServiceKind::Local(root) = &mut entry.kind else {
            return false;
        };
        let rest: Vec<&str> = segs.collect();
        root.install(&rest, method);
        true
    }

    /// Routes and, if local, dispatches `msg` (§4.3 steps 1-6).
    ///
    /// `scratch` is the per-poll `ArgView` arena (§4.3 step 5): cleared and
    /// refilled for each method that asked for a materialized view, reused
    /// across the whole dispatch call to avoid a fresh allocation per
    /// method. The directory never panics out of a misbehaving handler:
    /// each invocation runs under `catch_unwind` (§7's "no exceptions cross
    /// a handler boundary" policy, a deliberate addition over the source —
    /// see DESIGN.md).
    pub fn dispatch(&mut self, msg: &Message<'_>, scratch: &mut Vec<Arg<'static>>, outbox: &mut Outbox<'_>) -> Route {
        let normalized = msg.normalized_address();
        let mut segs = split_address(&normalized);
        let Some(service) = segs.next() else {
            return Route::UnknownService;
        };
        let Some(entry) = self.services.get_mut(service) else {
            return Route::UnknownService;
        };

        match &mut entry.kind {
            ServiceKind::Remote(peer) => Route::Forward(peer.clone()),
            ServiceKind::Bridge | ServiceKind::ToOsc => Route::UnknownService,
            ServiceKind::Local(root) => {
                let rest: Vec<&str> = segs.collect();
                let pattern_free = msg.is_pattern_free_hint();
                let mut matches = Vec::new();
                root.collect_matches(&rest, pattern_free, &mut matches);

                let msg_types = &msg.typetag[1..];
                let mut invoked = 0usize;
                for method in matches {
                    let Some(args) = resolve_args(method, msg_types, &msg.args) else {
                        continue;
                    };

                    let argv: Option<&[Arg<'static>]> = if method.parse {
                        scratch.clear();
                        scratch.extend(args);
                        Some(scratch.as_slice())
                    } else {
                        None
                    };

                    let handler = &mut method.handler;
                    let result = panic::catch_unwind(AssertUnwindSafe(|| handler(msg, argv, outbox)));
                    if result.is_err() {
                        log::warn!("method handler for {service:?} panicked; message dropped");
                    }
                    invoked += 1;
                }
                Route::Dispatched(invoked)
            }
        }
    }
}

/// Resolves the argument list a method should actually receive: `None` typespec
/// means no check at all (pass through verbatim); an exact typetag match
/// skips coercion; otherwise, if `coerce` is set, every argument is coerced
/// and the method is skipped entirely if any single one fails (§4.1, §4.3
/// step 4).
fn resolve_args(method: &Method, msg_types: &str, args: &[Arg<'_>]) -> Option<Vec<Arg<'static>>> {
    match &method.typespec {
        None => Some(args.iter().cloned().map(Arg::into_owned).collect()),
        Some(spec) if spec.as_ref() == msg_types => {
            Some(args.iter().cloned().map(Arg::into_owned).collect())
        }
        Some(spec) if method.coerce => {
            if spec.len() != args.len() {
                return None;
            }
            let mut out = Vec::with_capacity(args.len());
            for (arg, want) in args.iter().zip(spec.bytes()) {
                out.push(o2_proto::coerce(arg, want)?.into_owned());
            }
            Some(out)
        }
        Some(_) => None,
    }
}

fn split_address(address: &str) -> impl Iterator<Item = &str> {
    address.trim_start_matches('/').split('/').filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn make_method(typespec: Option<&str>, coerce: bool, hits: Rc<RefCell<Vec<Arg<'static>>>>) -> Method {
        Method {
            typespec: typespec.map(Into::into),
            coerce,
            parse: true,
            handler: Box::new(move |_msg, argv, _outbox| {
                if let Some(a) = argv.and_then(|a| a.first()) {
                    hits.borrow_mut().push(a.clone());
                }
            }),
        }
    }

    fn msg<'a>(addr: &'a str, typetag: &'a str, args: Vec<Arg<'a>>) -> Message<'a> {
        Message {
            timestamp: 0.0,
            address: addr.into(),
            typetag: typetag.into(),
            args,
        }
    }

    fn dispatch_test(dir: &mut Directory, m: &Message<'_>, scratch: &mut Vec<Arg<'static>>) -> Route {
        let mut queue = std::collections::VecDeque::new();
        let mut outbox = Outbox::new(&mut queue);
        dir.dispatch(m, scratch, &mut outbox)
    }

    #[test]
    fn unknown_service_is_reported() {
        let mut dir = Directory::new();
        let m = msg("/nope/x", ",", vec![]);
        let mut scratch = Vec::new();
        assert!(matches!(dispatch_test(&mut dir, &m, &mut scratch), Route::UnknownService));
    }

    #[test]
    fn local_dispatch_with_matching_typespec() {
        let mut dir = Directory::new();
        dir.add_local_service("synth");
        let hits = Rc::new(RefCell::new(Vec::new()));
        dir.add_method("/synth/vol", make_method(Some("f"), false, hits.clone()));

        let m = msg("/synth/vol", ",f", vec![Arg::Float32(0.5)]);
        let mut scratch = Vec::new();
        let route = dispatch_test(&mut dir, &m, &mut scratch);
        assert!(matches!(route, Route::Dispatched(1)));
        assert_eq!(*hits.borrow(), vec![Arg::Float32(0.5)]);
    }

    #[test]
    fn coercion_failure_skips_method_without_partial_invoke() {
        let mut dir = Directory::new();
        dir.add_local_service("synth");
        let hits = Rc::new(RefCell::new(Vec::new()));
        dir.add_method("/synth/vol", make_method(Some("i"), true, hits.clone()));

        let m = msg("/synth/vol", ",s", vec![Arg::Str("nope".into())]);
        let mut scratch = Vec::new();
        let route = dispatch_test(&mut dir, &m, &mut scratch);
        assert!(matches!(route, Route::Dispatched(0)));
        assert!(hits.borrow().is_empty());
    }

    #[test]
    fn wildcard_address_invokes_both_installed_methods_in_order() {
        let mut dir = Directory::new();
        dir.add_local_service("s");
        let hits = Rc::new(RefCell::new(Vec::new()));
        dir.add_method("/s/a", make_method(None, false, hits.clone()));
        dir.add_method("/s/b", make_method(None, false, hits.clone()));

        let m = msg("/s/*", ",i", vec![Arg::Int32(7)]);
        let mut scratch = Vec::new();
        let route = dispatch_test(&mut dir, &m, &mut scratch);
        assert!(matches!(route, Route::Dispatched(2)));
        assert_eq!(hits.borrow().len(), 2);
    }

    #[test]
    fn remote_service_routes_to_forward() {
        let mut dir = Directory::new();
        let peer = PeerId::generate("ens", "h", 1, 1);
        dir.add_remote_service("svc", peer.clone());
        let m = msg("/svc/x", ",", vec![]);
        let mut scratch = Vec::new();
        match dispatch_test(&mut dir, &m, &mut scratch) {
            Route::Forward(p) => assert_eq!(p, peer),
            other => panic!("expected Forward, got {other:?}"),
        }
    }
}
