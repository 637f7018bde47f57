//! REPL (Read-Eval-Print Loop) over a running Reflex program
//!
//! Wraps an [`Engine`] with:
//! - inspection of types, sources and version history
//! - session variables bound to instances or evaluation results
//! - expressions compiled into eval invokers
//! - immediate mutations, or mutations recorded in a session transaction

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use anyhow::{anyhow, Result};
use reflex_core::ast::{MemberKind, MetadataTarget};
use reflex_core::intercessor::validation::check_identifier;
use reflex_core::parser::reflex_parser::{parse_annotation, parse_member};
use reflex_core::pipeline::PassStats;
use reflex_core::{
    CommitReport, Engine, EngineConfig, EvalRequest, MemberDescriptor, MemberSelector, ReflexError,
    SourceProvider, Transaction, TypeIdentity, Value,
};
use serde::Serialize;
use tracing::debug;

pub mod commands;
pub mod multiline;
pub mod notifier;

pub use commands::ReplCommand;
pub use multiline::{LineProcessResult, MultiLineCollector};
pub use notifier::{DefaultNotifier, ReplNotifier};

/// Snapshot printed by `.stats`
#[derive(Debug, Serialize)]
pub struct SessionStats {
    pub types: usize,
    pub versions: usize,
    pub cached_bindings: usize,
    pub variables: usize,
    pub pending_mutations: usize,
    pub passes: Vec<PassStats>,
}

/// Interactive shell over one engine
pub struct Repl {
    engine: Engine,
    notifier: Box<dyn ReplNotifier>,
    running: bool,
    /// Suppress timing info
    quiet: bool,
    variables: BTreeMap<String, Value>,
    /// Open session transaction, if any
    transaction: Option<Transaction>,
}

impl Repl {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            notifier: Box::new(DefaultNotifier::new()),
            running: true,
            quiet: false,
            variables: BTreeMap::new(),
            transaction: None,
        }
    }

    /// Bootstrap an engine from `provider` and wrap it
    pub fn from_sources(config: EngineConfig, provider: &dyn SourceProvider) -> Result<Self> {
        Ok(Self::new(Engine::from_sources(config, provider)?))
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn set_notifier(&mut self, notifier: Box<dyn ReplNotifier>) {
        self.notifier = notifier;
    }

    pub fn notifier(&self) -> &dyn ReplNotifier {
        self.notifier.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    pub fn set_quiet(&mut self, quiet: bool) {
        self.quiet = quiet;
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn parse_input(&self, input: &str) -> Result<ReplCommand> {
        commands::parse_command(input)
    }

    pub fn handle_command(&mut self, command: ReplCommand) -> Result<String> {
        debug!("REPL command {:?}", command);
        match command {
            ReplCommand::Help => Ok(self.get_help_text()),
            ReplCommand::Quit => {
                self.running = false;
                if let Some(mut transaction) = self.transaction.take() {
                    transaction.discard();
                }
                Ok("Goodbye!".to_string())
            }
            ReplCommand::Quiet => {
                self.quiet = !self.quiet;
                Ok(format!("Quiet mode: {}", if self.quiet { "on" } else { "off" }))
            }
            ReplCommand::Types => Ok(self.list_types()),
            ReplCommand::Source(ty) => Ok(self.engine.source(&TypeIdentity::new(ty))?),
            ReplCommand::History(ty) => self.show_history(&TypeIdentity::new(ty)),
            ReplCommand::Stats { json } => self.show_stats(json),
            ReplCommand::New { name, ty } => {
                check_identifier(&name)?;
                let instance = self.engine.instantiate(&TypeIdentity::new(ty), Vec::new())?;
                let shown = instance.to_string();
                self.variables.insert(name.clone(), instance);
                Ok(format!("{name} = {shown}"))
            }
            ReplCommand::Vars => Ok(self.list_variables()),
            ReplCommand::Begin => {
                if self.transaction.is_some() {
                    return Err(anyhow!("A transaction is already open; .commit or .discard it first"));
                }
                let transaction = self.engine.create_transaction();
                let id = transaction.id();
                self.transaction = Some(transaction);
                Ok(format!("Transaction {id} open"))
            }
            ReplCommand::Commit => {
                let mut transaction = self
                    .transaction
                    .take()
                    .ok_or_else(|| anyhow!("No open transaction"))?;
                let report = transaction.commit()?;
                Ok(Self::format_report(&report))
            }
            ReplCommand::Discard => {
                let mut transaction = self
                    .transaction
                    .take()
                    .ok_or_else(|| anyhow!("No open transaction"))?;
                let discarded = transaction.records().len();
                transaction.discard();
                Ok(format!("Discarded {discarded} mutation(s)"))
            }
            ReplCommand::Pending => Ok(self.list_pending()),
            ReplCommand::Add { target, member } => self.add_member(&TypeIdentity::new(target), &member),
            ReplCommand::Replace { target, member, body } => {
                let target = TypeIdentity::new(target);
                self.mutate(|tx| tx.replace_implementation(&target, MemberSelector::named(member), &body, None))
            }
            ReplCommand::Remove { target, member } => {
                let target = TypeIdentity::new(target);
                self.mutate(|tx| tx.remove_member(&target, MemberSelector::named(member)))
            }
            ReplCommand::Annotate {
                target,
                member,
                annotation,
            } => {
                let target = TypeIdentity::new(target);
                let annotation = parse_annotation(&annotation)?;
                let on = match member {
                    Some(member) => MetadataTarget::Member(MemberSelector::named(member)),
                    None => MetadataTarget::Type,
                };
                self.mutate(|tx| tx.set_annotation(&target, on, annotation))
            }
            ReplCommand::Import { target, import } => {
                let target = TypeIdentity::new(target);
                self.mutate(|tx| tx.add_import(&target, import))
            }
            ReplCommand::Extends { target, parent } => {
                let target = TypeIdentity::new(target);
                self.mutate(|tx| tx.set_superclass(&target, parent.as_deref()))
            }
        }
    }

    /// Evaluate an expression, or `let name = expression` to keep the result
    pub fn execute(&mut self, code: &str) -> Result<(String, u64)> {
        let start = Instant::now();
        let code = code.trim().trim_end_matches(';');
        let (binding, expression) = match code.strip_prefix("let ") {
            Some(rest) => {
                let (name, expression) = rest
                    .split_once('=')
                    .ok_or_else(|| anyhow!("Usage: let <name> = <expression>"))?;
                let name = name.trim();
                check_identifier(name)?;
                (Some(name.to_string()), expression.trim())
            }
            None => (None, code),
        };

        let value = self.evaluate(expression)?;
        let output = value.to_string();
        if let Some(name) = binding {
            self.variables.insert(name, value);
        }
        Ok((output, start.elapsed().as_millis() as u64))
    }

    /// Session variables become untyped parameters; every loaded package is
    /// imported so simple type names resolve
    fn evaluate(&self, expression: &str) -> Result<Value> {
        let mut request = EvalRequest::new(expression);
        for name in self.variables.keys() {
            request = request.untyped_parameter(name.clone());
        }
        let packages: BTreeSet<String> = self
            .engine
            .types()
            .iter()
            .map(|ty| ty.package().to_string())
            .filter(|package| !package.is_empty())
            .collect();
        for package in packages {
            request = request.import(format!("{package}.*"));
        }
        let invoker = self.engine.generate_eval_invoker(&request)?;
        let args = self.variables.values().cloned().collect();
        Ok(invoker.invoke(args)?)
    }

    fn add_member(&mut self, target: &TypeIdentity, source: &str) -> Result<String> {
        let member = parse_member(source)?;
        let descriptor = MemberDescriptor::from(&member);
        let kind = descriptor.kind;
        match kind {
            MemberKind::Field => self.mutate(|tx| tx.add_field(target, descriptor)),
            MemberKind::Method => self.mutate(|tx| tx.add_method(target, descriptor)),
        }
    }

    /// Record into the session transaction when one is open, otherwise
    /// commit right away
    fn mutate<F>(&mut self, build: F) -> Result<String>
    where
        F: FnOnce(&mut Transaction) -> Result<&mut Transaction, ReflexError>,
    {
        match self.transaction.as_mut() {
            Some(transaction) => {
                build(transaction)?;
                Ok(format!("Recorded ({} pending mutation(s))", transaction.records().len()))
            }
            None => {
                let mut transaction = self.engine.create_transaction();
                build(&mut transaction)?;
                let report = transaction.commit()?;
                Ok(Self::format_report(&report))
            }
        }
    }

    fn format_report(report: &CommitReport) -> String {
        if report.is_empty() {
            return "Nothing to install".to_string();
        }
        let installed: Vec<String> = report
            .installed
            .iter()
            .map(|(identity, generation)| format!("{identity}@{generation}"))
            .collect();
        format!("Installed {}", installed.join(", "))
    }

    fn list_types(&self) -> String {
        let types = self.engine.types();
        if types.is_empty() {
            return "No types loaded.".to_string();
        }
        let lines: Vec<String> = types
            .iter()
            .map(|identity| {
                let generation = self.engine.generation(identity).unwrap_or_default();
                format!("  {identity} (generation {generation})")
            })
            .collect();
        format!("Types:\n{}", lines.join("\n"))
    }

    fn show_history(&self, identity: &TypeIdentity) -> Result<String> {
        let history = self.engine.history(identity);
        if history.is_empty() {
            return Err(anyhow!("Unknown type {identity}"));
        }
        let lines: Vec<String> = history
            .iter()
            .map(|version| {
                format!(
                    "  generation {} at {} ({} method(s), {} field(s))",
                    version.generation,
                    version.created_at.format("%H:%M:%S%.3f"),
                    version.artifact.artifact.methods.len(),
                    version.artifact.artifact.fields.len(),
                )
            })
            .collect();
        Ok(format!("History of {identity}:\n{}", lines.join("\n")))
    }

    fn list_variables(&self) -> String {
        if self.variables.is_empty() {
            return "No variables.".to_string();
        }
        self.variables
            .iter()
            .map(|(name, value)| format!("  {name} = {value}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn list_pending(&self) -> String {
        match &self.transaction {
            None => "No open transaction.".to_string(),
            Some(transaction) if transaction.records().is_empty() => {
                format!("Transaction {} has no mutations.", transaction.id())
            }
            Some(transaction) => {
                let lines: Vec<String> = transaction
                    .records()
                    .iter()
                    .map(|record| format!("  {} on {}", record.operation, record.target))
                    .collect();
                format!("Transaction {}:\n{}", transaction.id(), lines.join("\n"))
            }
        }
    }

    pub fn stats(&self) -> SessionStats {
        let types = self.engine.types();
        SessionStats {
            versions: types.iter().map(|ty| self.engine.history(ty).len()).sum(),
            types: types.len(),
            cached_bindings: self.engine.binder().cached_bindings(),
            variables: self.variables.len(),
            pending_mutations: self.transaction.as_ref().map_or(0, |tx| tx.records().len()),
            passes: self.engine.pipeline_stats(),
        }
    }

    fn show_stats(&self, json: bool) -> Result<String> {
        let stats = self.stats();
        if json {
            return Ok(serde_json::to_string_pretty(&stats)?);
        }
        let mut out = format!(
            "Engine Statistics:\n  Types: {}\n  Versions: {}\n  Cached bindings: {}\n  Variables: {}\n  Pending mutations: {}\n  Passes:",
            stats.types, stats.versions, stats.cached_bindings, stats.variables, stats.pending_mutations
        );
        for pass in &stats.passes {
            out.push_str(&format!(
                "\n    {:<24} {} run(s), {} rewrite(s), {:.0}% ok, {:.2}ms avg\n      {}",
                pass.pass_name,
                pass.applications,
                pass.rewrites,
                pass.success_rate() * 100.0,
                pass.average_time_ms(),
                pass.description
            ));
        }
        Ok(out)
    }

    fn get_help_text(&self) -> String {
        r#"Reflex REPL Commands:
  .help                         - Show this help message
  .quit                         - Exit the REPL
  .quiet                        - Toggle quiet mode (hide timing info)
  .types                        - List loaded types and their generations
  .source <type>                - Show the current source of a type
  .history <type>               - Show every published version of a type
  .stats [json]                 - Show engine statistics

Session:
  .new <var> <type>             - Instantiate a type into a variable
  .vars                         - List variables
  <expression>                  - Evaluate, e.g. c.add(1.0, 2.0)
  let <var> = <expression>      - Evaluate and keep the result

Mutation (immediate, or recorded while a transaction is open):
  .begin / .commit / .discard   - Manage the session transaction
  .pending                      - Show recorded mutations
  .add <type> <member source>   - e.g. .add demo.A fn f(): int { return 1; }
  .replace <type> <method> <body>
  .remove <type> <member>
  .annotate <type> [member] @Name[("value")]
  .import <type> <package.Type | package.*>
  .extends <type> <parent | none>"#
            .to_string()
    }

    pub fn show_exit_stats(&self) {
        if !self.quiet {
            let stats = self.stats();
            println!("\nSession complete: {} type(s), {} version(s).", stats.types, stats.versions);
        }
    }
}
