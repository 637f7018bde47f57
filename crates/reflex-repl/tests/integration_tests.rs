use pretty_assertions::assert_eq;
use reflex_core::{DirectorySources, EngineConfig, InMemorySources, TypeIdentity, Value};
use reflex_repl::repl::{Repl, ReplCommand};

const PROGRAM: &str = r#"
package demo;

class Calculator {
    fn add(a: float, b: float): float { return a + b; }
}
"#;

fn repl() -> Repl {
    Repl::from_sources(
        EngineConfig::default(),
        &InMemorySources::new().with_unit("demo.rfx", PROGRAM),
    )
    .unwrap()
}

fn run(repl: &mut Repl, line: &str) -> anyhow::Result<String> {
    let command = repl.parse_input(line)?;
    repl.handle_command(command)
}

#[test]
fn test_types_and_source() {
    let mut repl = repl();
    let types = run(&mut repl, ".types").unwrap();
    assert!(types.contains("demo.Calculator (generation 0)"));

    let source = run(&mut repl, ".source demo.Calculator").unwrap();
    assert!(source.contains("class Calculator"));
    assert!(run(&mut repl, ".source demo.Nope").is_err());
}

#[test]
fn test_expressions_and_variables() {
    let mut repl = repl();
    assert_eq!(
        run(&mut repl, ".new c demo.Calculator").unwrap(),
        "c = <demo.Calculator>"
    );

    let (output, _duration) = repl.execute("c.add(1.5, 2.0)").unwrap();
    assert_eq!(output, "3.5");

    repl.execute("let total = c.add(1.0, 1.0)").unwrap();
    assert_eq!(repl.variable("total"), Some(&Value::Float(2.0)));
    let (output, _) = repl.execute("total * 2.0").unwrap();
    assert_eq!(output, "4.0");

    assert!(repl.execute("let while = 1").is_err());
    assert!(repl.execute("nobody + 1").is_err());
}

#[test]
fn test_immediate_mutation() {
    let mut repl = repl();
    let output = run(
        &mut repl,
        ".add demo.Calculator fn twice(x: int): int { return x * 2; }",
    )
    .unwrap();
    assert_eq!(output, "Installed demo.Calculator@1");

    let (output, _) = repl.execute("Calculator.twice(21)").unwrap_or_else(|e| panic!("{e:#}"));
    assert_eq!(output, "42");

    run(&mut repl, ".replace demo.Calculator add return a * b;").unwrap();
    run(&mut repl, ".new c demo.Calculator").unwrap();
    let (output, _) = repl.execute("c.add(3.0, 4.0)").unwrap();
    assert_eq!(output, "12.0");

    let history = run(&mut repl, ".history demo.Calculator").unwrap();
    assert!(history.contains("generation 0"));
    assert!(history.contains("generation 2"));
}

#[test]
fn test_session_transaction() {
    let mut repl = repl();
    run(&mut repl, ".begin").unwrap();
    assert!(run(&mut repl, ".begin").is_err());

    assert_eq!(
        run(&mut repl, ".add demo.Calculator private field last: float = 0.0;").unwrap(),
        "Recorded (1 pending mutation(s))"
    );
    run(&mut repl, ".annotate demo.Calculator @Audited").unwrap();
    let pending = run(&mut repl, ".pending").unwrap();
    assert!(pending.contains("add_field on demo.Calculator"));
    assert!(pending.contains("set_annotation on demo.Calculator"));

    let calc = TypeIdentity::from("demo.Calculator");
    assert_eq!(repl.engine().generation(&calc), Some(0));
    assert_eq!(run(&mut repl, ".commit").unwrap(), "Installed demo.Calculator@1");
    assert!(repl.engine().source(&calc).unwrap().contains("@Audited"));

    run(&mut repl, ".begin").unwrap();
    run(&mut repl, ".remove demo.Calculator add").unwrap();
    assert_eq!(run(&mut repl, ".discard").unwrap(), "Discarded 1 mutation(s)");
    assert!(run(&mut repl, ".commit").is_err());
    assert_eq!(repl.engine().generation(&calc), Some(1));
}

#[test]
fn test_stats_as_json() {
    let mut repl = repl();
    let json = run(&mut repl, ".stats json").unwrap();
    let stats: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(stats["types"], 1);
    assert_eq!(stats["versions"], 1);
    assert!(stats["passes"].as_array().is_some_and(|passes| !passes.is_empty()));
    assert!(stats["passes"][0]["description"].as_str().is_some_and(|d| !d.is_empty()));
}

#[test]
fn test_stats_as_text() {
    let mut repl = repl();
    let text = run(&mut repl, ".stats").unwrap();
    assert!(text.contains("Types: 1"));
    assert!(text.contains("original-tag"));
    assert!(text.contains("100% ok"));
    assert!(text.contains("Writes the installed artifact"));
}

#[test]
fn test_quit_discards_open_transaction() {
    let mut repl = repl();
    run(&mut repl, ".begin").unwrap();
    run(&mut repl, ".import demo.Calculator demo.*").unwrap();
    assert_eq!(repl.handle_command(ReplCommand::Quit).unwrap(), "Goodbye!");
    assert!(!repl.is_running());
    assert_eq!(
        repl.engine().generation(&TypeIdentity::from("demo.Calculator")),
        Some(0)
    );
}

#[test]
fn test_loads_sources_from_a_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("nested")).unwrap();
    std::fs::write(dir.path().join("calc.rfx"), PROGRAM).unwrap();
    std::fs::write(
        dir.path().join("nested/other.rfx"),
        "package other;\nclass Point { field x: int = 3; }\n",
    )
    .unwrap();
    std::fs::write(dir.path().join("notes.txt"), "not a source").unwrap();

    let repl = Repl::from_sources(EngineConfig::default(), &DirectorySources::new(dir.path())).unwrap();
    assert_eq!(
        repl.engine().types(),
        vec![
            TypeIdentity::from("demo.Calculator"),
            TypeIdentity::from("other.Point")
        ]
    );
}
