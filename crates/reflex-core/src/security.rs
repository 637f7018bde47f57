//! Access control for Reflex members
//!
//! Visibility is enforced in two places with the same rules:
//! - the compiler, when a member reference crosses a type boundary
//! - the invoker binder, when a caller asks for a handle to a member
//!
//! `private` members are reachable from their declaring type only;
//! `protected` members from the declaring type and its subtypes.

use crate::ast::{TypeIdentity, Visibility};

/// Upper bound on superclass walks; longer chains are treated as cyclic
pub const MAX_HIERARCHY_DEPTH: usize = 256;

/// Anything that can answer "what is the declared parent of this type"
pub trait Ancestry {
    fn superclass_of(&self, identity: &TypeIdentity) -> Option<TypeIdentity>;

    /// Ancestors nearest first, stopping at a cycle or the depth bound
    fn ancestors(&self, identity: &TypeIdentity) -> Vec<TypeIdentity> {
        let mut chain = Vec::new();
        let mut cursor = self.superclass_of(identity);
        while let Some(parent) = cursor {
            if parent == *identity || chain.contains(&parent) || chain.len() >= MAX_HIERARCHY_DEPTH {
                break;
            }
            cursor = self.superclass_of(&parent);
            chain.push(parent);
        }
        chain
    }

    /// True when `identity` is `ancestor` or inherits from it
    fn is_subtype_of(&self, identity: &TypeIdentity, ancestor: &TypeIdentity) -> bool {
        identity == ancestor || self.ancestors(identity).contains(ancestor)
    }
}

/// Where a member reference originates
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AccessContext {
    /// Type whose code contains the reference; `None` for outside callers
    pub caller: Option<TypeIdentity>,
}

impl AccessContext {
    /// Code outside every type family (eval expressions, host callers)
    pub fn external() -> Self {
        Self { caller: None }
    }

    pub fn within(caller: TypeIdentity) -> Self {
        Self {
            caller: Some(caller),
        }
    }

    /// Check whether a member declared on `declaring` with `visibility` is
    /// reachable from this context
    pub fn permits(
        &self,
        visibility: Visibility,
        declaring: &TypeIdentity,
        ancestry: &dyn Ancestry,
    ) -> bool {
        match visibility {
            Visibility::Public => true,
            Visibility::Private => self.caller.as_ref() == Some(declaring),
            Visibility::Protected => match &self.caller {
                Some(caller) => ancestry.is_subtype_of(caller, declaring),
                None => false,
            },
        }
    }

    /// Human-readable description used in diagnostics
    pub fn describe(&self) -> String {
        match &self.caller {
            Some(caller) => format!("code in {caller}"),
            None => "external code".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Edges(HashMap<TypeIdentity, TypeIdentity>);

    impl Ancestry for Edges {
        fn superclass_of(&self, identity: &TypeIdentity) -> Option<TypeIdentity> {
            self.0.get(identity).cloned()
        }
    }

    fn hierarchy() -> Edges {
        let mut edges = HashMap::new();
        edges.insert(TypeIdentity::from("demo.Child"), TypeIdentity::from("demo.Parent"));
        edges.insert(TypeIdentity::from("demo.Grandchild"), TypeIdentity::from("demo.Child"));
        Edges(edges)
    }

    #[test]
    fn test_private_only_from_declaring_type() {
        let edges = hierarchy();
        let parent = TypeIdentity::from("demo.Parent");
        assert!(AccessContext::within(parent.clone()).permits(Visibility::Private, &parent, &edges));
        assert!(!AccessContext::within("demo.Child".into()).permits(
            Visibility::Private,
            &parent,
            &edges
        ));
        assert!(!AccessContext::external().permits(Visibility::Private, &parent, &edges));
    }

    #[test]
    fn test_protected_reaches_the_family() {
        let edges = hierarchy();
        let parent = TypeIdentity::from("demo.Parent");
        assert!(AccessContext::within("demo.Grandchild".into()).permits(
            Visibility::Protected,
            &parent,
            &edges
        ));
        assert!(!AccessContext::within("demo.Other".into()).permits(
            Visibility::Protected,
            &parent,
            &edges
        ));
        assert!(!AccessContext::external().permits(Visibility::Protected, &parent, &edges));
    }

    #[test]
    fn test_ancestors_stop_at_cycles() {
        let mut edges = HashMap::new();
        edges.insert(TypeIdentity::from("A"), TypeIdentity::from("B"));
        edges.insert(TypeIdentity::from("B"), TypeIdentity::from("A"));
        let edges = Edges(edges);
        assert_eq!(edges.ancestors(&"A".into()), vec![TypeIdentity::from("B")]);
    }
}
