use std::collections::BTreeMap;

use crate::error::{CoreError, Domain, ErrorKind, Payload, Result};

use super::{EventKind, EventSpec};

/// A declared event with every combinator reference replaced by the
/// referenced event's own tree.
///
/// Built once by [`resolve_events`]; the runtime instantiates checkers from
/// it without any id lookups.
#[derive(Debug, Clone, PartialEq)]
pub enum EventTree {
    /// A concrete condition. `kind` is never `And` or `Not`.
    Leaf { id: String, kind: EventKind },
    And { id: String, children: Vec<EventTree> },
    Not { id: String, child: Box<EventTree> },
}

impl EventTree {
    pub fn id(&self) -> &str {
        match self {
            EventTree::Leaf { id, .. } | EventTree::And { id, .. } | EventTree::Not { id, .. } => {
                id
            }
        }
    }

    /// Number of nodes in the tree (useful for diagnostics).
    pub fn size(&self) -> usize {
        match self {
            EventTree::Leaf { .. } => 1,
            EventTree::And { children, .. } => 1 + children.iter().map(EventTree::size).sum::<usize>(),
            EventTree::Not { child, .. } => 1 + child.size(),
        }
    }

    /// True if any leaf in the tree is an `external` event.
    pub fn has_external(&self) -> bool {
        match self {
            EventTree::Leaf { kind, .. } => matches!(kind, EventKind::External),
            EventTree::And { children, .. } => children.iter().any(EventTree::has_external),
            EventTree::Not { child, .. } => child.has_external(),
        }
    }
}

/// Resolve every declared event into its tree.
///
/// Fails on references to undeclared events and on reference cycles
/// (including self references).
pub fn resolve_events(specs: &BTreeMap<String, EventSpec>) -> Result<BTreeMap<String, EventTree>> {
    let mut resolved = BTreeMap::new();
    for id in specs.keys() {
        let mut path = Vec::new();
        resolve_one(id, specs, &mut path, &mut resolved)?;
    }
    Ok(resolved)
}

fn resolve_one(
    id: &str,
    specs: &BTreeMap<String, EventSpec>,
    path: &mut Vec<String>,
    resolved: &mut BTreeMap<String, EventTree>,
) -> Result<EventTree> {
    if let Some(tree) = resolved.get(id) {
        return Ok(tree.clone());
    }
    if path.iter().any(|p| p == id) {
        path.push(id.to_string());
        return Err(CoreError::error()
            .domain(Domain::Mission)
            .kind(ErrorKind::ValidationFailed)
            .msg("cyclic event reference")
            .payload(Payload::Context {
                key: "cycle",
                value: path.join(" -> ").into(),
            })
            .build());
    }

    let spec = specs.get(id).ok_or_else(|| {
        let referrer = path.last().cloned().unwrap_or_default();
        CoreError::error()
            .domain(Domain::Mission)
            .kind(ErrorKind::ValidationFailed)
            .msgf(format_args!("event '{referrer}' references undeclared event '{id}'"))
            .payload(Payload::Context {
                key: "id",
                value: id.to_string().into(),
            })
            .build()
    })?;

    path.push(id.to_string());
    let tree = match &spec.kind {
        EventKind::And { refs } => {
            let children = refs
                .iter()
                .map(|r| resolve_one(r, specs, path, resolved))
                .collect::<Result<Vec<_>>>()?;
            EventTree::And {
                id: id.to_string(),
                children,
            }
        }
        EventKind::Not { reference } => EventTree::Not {
            id: id.to_string(),
            child: Box::new(resolve_one(reference, specs, path, resolved)?),
        },
        leaf => EventTree::Leaf {
            id: id.to_string(),
            kind: leaf.clone(),
        },
    };
    path.pop();

    resolved.insert(id.to_string(), tree.clone());
    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: &str, kind: EventKind) -> (String, EventSpec) {
        (
            id.to_string(),
            EventSpec {
                id: id.to_string(),
                kind,
            },
        )
    }

    fn timer(s: f64) -> EventKind {
        EventKind::Timer { seconds: s }
    }

    #[test]
    fn nested_combinators_resolve_into_trees() {
        let specs: BTreeMap<_, _> = [
            spec("t1", timer(1.0)),
            spec("t2", timer(2.0)),
            spec("not_t2", EventKind::Not { reference: "t2".into() }),
            spec(
                "window",
                EventKind::And {
                    refs: vec!["t1".into(), "not_t2".into()],
                },
            ),
        ]
        .into_iter()
        .collect();

        let trees = resolve_events(&specs).unwrap();
        let window = &trees["window"];
        assert_eq!(window.size(), 4);
        match window {
            EventTree::And { children, .. } => {
                assert_eq!(children[0].id(), "t1");
                assert!(matches!(&children[1], EventTree::Not { child, .. } if child.id() == "t2"));
            }
            other => panic!("expected And, got {other:?}"),
        }
    }

    #[test]
    fn cycles_are_rejected() {
        let specs: BTreeMap<_, _> = [
            spec("a", EventKind::Not { reference: "b".into() }),
            spec("b", EventKind::And { refs: vec!["a".into()] }),
        ]
        .into_iter()
        .collect();

        let e = resolve_events(&specs).unwrap_err();
        assert_eq!(e.kind, ErrorKind::ValidationFailed);
        assert!(matches!(e.payload, Payload::Context { key: "cycle", .. }));
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let specs: BTreeMap<_, _> = [spec("a", EventKind::Not { reference: "a".into() })]
            .into_iter()
            .collect();
        assert!(resolve_events(&specs).is_err());
    }

    #[test]
    fn undeclared_reference_is_rejected() {
        let specs: BTreeMap<_, _> = [spec("a", EventKind::Not { reference: "ghost".into() })]
            .into_iter()
            .collect();
        let e = resolve_events(&specs).unwrap_err();
        assert!(e.message.contains("ghost"));
    }

    #[test]
    fn shared_subevents_are_not_cycles() {
        let specs: BTreeMap<_, _> = [
            spec("t", timer(1.0)),
            spec("x", EventKind::And { refs: vec!["t".into(), "t".into()] }),
        ]
        .into_iter()
        .collect();
        let trees = resolve_events(&specs).unwrap();
        assert_eq!(trees["x"].size(), 3);
    }
}
