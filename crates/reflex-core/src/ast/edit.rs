//! Tree-to-tree edits
//!
//! Every structural mutation is one of these edits applied to a tree value.
//! Callers hold their own copy; an edit never reaches a tree somebody else
//! can observe.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{
    Annotation, Member, MemberKey, MemberSelector, MetadataTarget, Param, Stmt, StructuralTree,
    TypeRef,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EditError {
    #[error("Member '{member}' already exists")]
    DuplicateMember { member: String },

    #[error("Member '{member}' not found")]
    UnknownMember { member: String },

    #[error("Member selector '{selector}' matches {candidates:?}; add parameter types")]
    AmbiguousMember {
        selector: String,
        candidates: Vec<String>,
    },

    #[error("Member '{member}' is not a method")]
    NotAMethod { member: String },

    #[error("Method '{member}' takes {expected} parameter(s), {actual} name(s) supplied")]
    ParameterCount {
        member: String,
        expected: usize,
        actual: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StructuralEdit {
    AddMember(Member),
    RemoveMember(MemberSelector),
    /// New body for a method; optional parameter names rename the
    /// parameters while keeping their types
    ReplaceBody {
        selector: MemberSelector,
        body: Vec<Stmt>,
        parameter_names: Option<Vec<String>>,
    },
    SetAnnotation {
        target: MetadataTarget,
        annotation: Annotation,
    },
    SetImports(Vec<String>),
    AddImport(String),
    SetSuperclass(Option<TypeRef>),
}

impl StructuralEdit {
    /// Edits that change the shape other types compile against. Body
    /// replacement does not.
    pub fn is_structural(&self) -> bool {
        !matches!(self, StructuralEdit::ReplaceBody { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StructuralEdit::AddMember(Member::Field(_)) => "add_field",
            StructuralEdit::AddMember(Member::Method(_)) => "add_method",
            StructuralEdit::RemoveMember(_) => "remove_member",
            StructuralEdit::ReplaceBody { .. } => "replace_implementation",
            StructuralEdit::SetAnnotation { .. } => "set_annotation",
            StructuralEdit::SetImports(_) => "set_imports",
            StructuralEdit::AddImport(_) => "add_import",
            StructuralEdit::SetSuperclass(_) => "set_superclass",
        }
    }

    /// Apply this edit to `tree`. On error the tree is left as it was.
    pub fn apply(&self, tree: &mut StructuralTree) -> Result<(), EditError> {
        match self {
            StructuralEdit::AddMember(member) => {
                let key = member.key();
                let collides = match &key {
                    MemberKey::Field(name) => tree.field(name).is_some(),
                    MemberKey::Method { .. } => tree.members.contains_key(&key),
                };
                if collides {
                    return Err(EditError::DuplicateMember {
                        member: key.to_string(),
                    });
                }
                tree.push_member(member.clone());
            }
            StructuralEdit::RemoveMember(selector) => {
                let key = unique_key(tree, selector)?;
                tree.members.shift_remove(&key);
            }
            StructuralEdit::ReplaceBody {
                selector,
                body,
                parameter_names,
            } => {
                let key = unique_key(tree, selector)?;
                let Some(Member::Method(method)) = tree.members.get_mut(&key) else {
                    return Err(EditError::NotAMethod {
                        member: key.to_string(),
                    });
                };
                if let Some(names) = parameter_names {
                    if names.len() != method.params.len() {
                        return Err(EditError::ParameterCount {
                            member: key.to_string(),
                            expected: method.params.len(),
                            actual: names.len(),
                        });
                    }
                    method.params = method
                        .params
                        .iter()
                        .zip(names)
                        .map(|(param, name)| Param {
                            name: name.clone(),
                            ty: param.ty.clone(),
                        })
                        .collect();
                }
                method.body = Some(body.clone());
            }
            StructuralEdit::SetAnnotation { target, annotation } => {
                let annotations = match target {
                    MetadataTarget::Type => &mut tree.annotations,
                    MetadataTarget::Member(selector) => {
                        let key = unique_key(tree, selector)?;
                        match tree.members.get_mut(&key) {
                            Some(member) => member.annotations_mut(),
                            None => {
                                return Err(EditError::UnknownMember {
                                    member: selector.to_string(),
                                })
                            }
                        }
                    }
                };
                match annotations.iter_mut().find(|a| a.name == annotation.name) {
                    Some(existing) => *existing = annotation.clone(),
                    None => annotations.push(annotation.clone()),
                }
            }
            StructuralEdit::SetImports(imports) => {
                tree.imports = imports.clone();
            }
            StructuralEdit::AddImport(import) => {
                if !tree.imports.contains(import) {
                    tree.imports.push(import.clone());
                }
            }
            StructuralEdit::SetSuperclass(parent) => {
                tree.superclass = parent.clone();
            }
        }
        Ok(())
    }
}

fn unique_key(tree: &StructuralTree, selector: &MemberSelector) -> Result<MemberKey, EditError> {
    let mut keys = tree.select(selector);
    match keys.len() {
        0 => Err(EditError::UnknownMember {
            member: selector.to_string(),
        }),
        1 => Ok(keys.remove(0)),
        _ => Err(EditError::AmbiguousMember {
            selector: selector.to_string(),
            candidates: keys.iter().map(|k| k.to_string()).collect(),
        }),
    }
}
