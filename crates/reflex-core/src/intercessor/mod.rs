// Mutation API
// Immediate operations are single-mutation transactions committed on the
// calling thread; `create_transaction` hands out the multi-mutation builder.

pub mod transaction;
pub mod validation;

#[cfg(test)]
mod tests;

pub use transaction::{MutationRecord, Transaction, TransactionState};
pub use validation::{AnnotationRegistry, AnnotationScope};

use std::sync::Arc;

use crate::ast::{Annotation, MemberDescriptor, MemberSelector, MetadataTarget, TypeIdentity};
use crate::driver::CommitReport;
use crate::engine::EngineContext;
use crate::error::ReflexError;

#[derive(Clone)]
pub struct Intercessor {
    context: Arc<EngineContext>,
}

impl Intercessor {
    pub fn new(context: Arc<EngineContext>) -> Self {
        Self { context }
    }

    pub fn create_transaction(&self) -> Transaction {
        Transaction::new(self.context.clone())
    }

    fn immediate(
        &self,
        build: impl FnOnce(&mut Transaction) -> Result<&mut Transaction, ReflexError>,
    ) -> Result<CommitReport, ReflexError> {
        let mut transaction = self.create_transaction();
        build(&mut transaction)?;
        transaction.commit()
    }

    pub fn add_field(&self, target: &TypeIdentity, field: MemberDescriptor) -> Result<CommitReport, ReflexError> {
        self.immediate(|tx| tx.add_field(target, field))
    }

    pub fn add_method(&self, target: &TypeIdentity, method: MemberDescriptor) -> Result<CommitReport, ReflexError> {
        self.immediate(|tx| tx.add_method(target, method))
    }

    pub fn replace_implementation(
        &self,
        target: &TypeIdentity,
        selector: MemberSelector,
        body: &str,
        parameter_names: Option<Vec<String>>,
    ) -> Result<CommitReport, ReflexError> {
        self.immediate(|tx| tx.replace_implementation(target, selector, body, parameter_names))
    }

    pub fn set_annotation(
        &self,
        target: &TypeIdentity,
        on: MetadataTarget,
        annotation: Annotation,
    ) -> Result<CommitReport, ReflexError> {
        self.immediate(|tx| tx.set_annotation(target, on, annotation))
    }

    pub fn set_imports(&self, target: &TypeIdentity, imports: Vec<String>) -> Result<CommitReport, ReflexError> {
        self.immediate(|tx| tx.set_imports(target, imports))
    }

    pub fn add_import(&self, target: &TypeIdentity, import: &str) -> Result<CommitReport, ReflexError> {
        self.immediate(|tx| tx.add_import(target, import))
    }

    pub fn remove_member(&self, target: &TypeIdentity, selector: MemberSelector) -> Result<CommitReport, ReflexError> {
        self.immediate(|tx| tx.remove_member(target, selector))
    }

    pub fn set_superclass(&self, target: &TypeIdentity, superclass: Option<&str>) -> Result<CommitReport, ReflexError> {
        self.immediate(|tx| tx.set_superclass(target, superclass))
    }
}
