//! End to end properties of a compile
//!
//! These drive whole documents through `compile_str` / `compile_file` and
//! check the observable output: element lines and diagnostics.

use adoc_engine::adoc::reader::Source;
use adoc_engine::adoc::settings::EngineConfig;
use adoc_engine::adoc::testing::{compile, compile_with, context_with};
use adoc_engine::adoc::translate::Kind;
use adoc_engine::{compile_file, Compilation};
use proptest::prelude::*;
use rstest::rstest;
use std::fs;
use tempfile::TempDir;

fn lines(text: &str) -> Vec<String> {
    compile(text).expect("compile").lines()
}

fn count(compilation: &Compilation, needle: &str) -> usize {
    compilation
        .diagnostics
        .iter()
        .filter(|d| d.message.contains(needle))
        .count()
}

/// Lines of lower case words: nothing any substitution reacts to.
fn plain_line() -> impl Strategy<Value = String> {
    "[a-z]{1,8}( [a-z]{1,8}){0,5}"
}

proptest! {
    #[test]
    fn plain_text_round_trips(input in prop::collection::vec(plain_line(), 1..6)) {
        let text = input.join("\n");
        prop_assert_eq!(lines(&text), input);
    }

    #[test]
    fn passthrough_text_survives(inner in "[a-z<>*{}#_^~ ]{1,12}") {
        let inner = inner.trim().to_string();
        prop_assume!(!inner.is_empty());
        let text = format!("start pass:[{}] end", inner);
        prop_assert_eq!(lines(&text), vec![format!("start {} end", inner)]);
    }
}

#[rstest]
#[case("see {undefined} here\nkept", &["kept"])]
#[case("{undefined=fallback} value", &["fallback value"])]
#[case("a {amp} b", &["a & b"])]
#[case("\\{undefined} escaped", &["{undefined} escaped"])]
fn undefined_references_drop_the_line(#[case] input: &str, #[case] expected: &[&str]) {
    assert_eq!(lines(input), expected);
}

#[rstest]
#[case(&["a=1"], "x [{a,b?any}] [{a+b?all}]", "x [any] []")]
#[case(&["a=1", "b=2"], "x [{a,b?any}] [{a+b?all}]", "x [any] [all]")]
#[case(&[], "x [{a,b?any}] [{a+b?all}]", "x [] []")]
fn or_and_conditional_references(#[case] attrs: &[&str], #[case] input: &str, #[case] expected: &str) {
    let mut ctx = context_with(attrs);
    let elements = ctx.compile(Source::text("doc.txt", input)).unwrap();
    assert_eq!(elements[0].lines, vec![expected]);
}

#[rstest]
#[case(&["a=1"], "ifdef::a,b[]\nshown\nendif::a,b[]\nafter", &["shown", "after"])]
#[case(&["a=1"], "ifdef::a+b[]\nhidden\nendif::a+b[]\nafter", &["after"])]
#[case(&[], "ifndef::a[]\nshown\nendif::a[]", &["shown"])]
fn ifdef_regions(#[case] attrs: &[&str], #[case] input: &str, #[case] expected: &[&str]) {
    let mut ctx = context_with(attrs);
    let elements = ctx.compile(Source::text("doc.txt", input)).unwrap();
    let output: Vec<String> = elements.iter().flat_map(|e| e.lines.clone()).collect();
    assert_eq!(output, expected);
}

#[test]
fn mismatched_endif_aborts_the_compile() {
    let err = compile("ifdef::a[]\ntext\nendif::b[]").unwrap_err();
    assert!(err.to_string().contains("mismatched macro"));
}

#[test]
fn counters_advance_left_to_right() {
    assert_eq!(
        lines("{counter:n} {counter:n} {counter:c:a} {counter:c}"),
        vec!["1 2 a b"]
    );
}

#[test]
fn counters_persist_across_lines() {
    assert_eq!(lines("{counter:n}\n\n{counter:n}\n\n{n}"), vec!["1", "2", "2"]);
}

#[test]
fn include_depth_is_limited() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("self.txt");
    fs::write(&path, "line\ninclude::self.txt[]\n").unwrap();
    let mut config = EngineConfig::default();
    config.settings.max_include_depth = 2;
    let compilation = compile_file(&path, config).unwrap();
    let output = compilation.lines();
    assert_eq!(output.iter().filter(|l| *l == "line").count(), 3);
    assert_eq!(count(&compilation, "maximum include depth exceeded"), 1);
}

#[test]
fn self_include_stops_at_the_default_depth() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("self.txt");
    fs::write(&path, "line\ninclude::self.txt[]\n").unwrap();
    let compilation = compile_file(&path, EngineConfig::default()).unwrap();
    let output = compilation.lines();
    assert_eq!(output.iter().filter(|l| *l == "line").count(), 11);
    assert_eq!(count(&compilation, "maximum include depth exceeded"), 1);
}

#[test]
fn included_files_resolve_relative_to_the_including_file() {
    let dir = TempDir::new().unwrap();
    fs::create_dir(dir.path().join("parts")).unwrap();
    fs::write(dir.path().join("parts/a.txt"), "from a\n\ninclude::b.txt[]\n").unwrap();
    fs::write(dir.path().join("parts/b.txt"), "from b\n").unwrap();
    let main = dir.path().join("main.txt");
    fs::write(&main, "include::parts/a.txt[]\n").unwrap();
    let compilation = compile_file(&main, EngineConfig::default()).unwrap();
    assert_eq!(compilation.lines(), vec!["from a", "from b"]);
    assert!(compilation.diagnostics.is_empty());
}

#[rstest]
#[case(":name: value", None)]
#[case(".Title\ntext", Some(Kind::Paragraph))]
#[case("== Section", Some(Kind::Section))]
#[case("image::logo.png[]", Some(Kind::BlockMacro))]
#[case("- item", Some(Kind::List))]
#[case("----\ncode\n----", Some(Kind::Block))]
#[case("|===\n|a\n|===", Some(Kind::Table))]
#[case("plain words", Some(Kind::Paragraph))]
fn classification_priority(#[case] input: &str, #[case] kind: Option<Kind>) {
    let compilation = compile(input).unwrap();
    assert_eq!(compilation.elements.first().map(|e| e.kind), kind);
}

#[test]
fn block_title_wins_over_labeled_list() {
    let compilation = compile(".Term:: text\nbody").unwrap();
    assert_eq!(compilation.elements.len(), 1);
    let paragraph = &compilation.elements[0];
    assert_eq!(paragraph.kind, Kind::Paragraph);
    assert_eq!(paragraph.attribute("title"), Some("Term:: text"));
    assert_eq!(paragraph.lines, vec!["body"]);
}

#[test]
fn block_title_attaches_to_list() {
    let compilation = compile(".Steps\n. one\n. two").unwrap();
    let list = &compilation.elements[0];
    assert_eq!(list.kind, Kind::List);
    assert_eq!(list.attribute("title"), Some("Steps"));
    assert_eq!(list.children.len(), 2);
}

#[test]
fn safe_mode_refuses_shell_references() {
    let mut config = EngineConfig::default();
    config.settings.safe = true;
    let compilation = compile_with("{sys:echo hi}\nkept", config).unwrap();
    assert_eq!(compilation.lines(), vec!["kept"]);
    assert_eq!(count(&compilation, "unsafe: {sys:echo hi}"), 1);
}

#[test]
fn document_output_snapshot() {
    let output = lines("== Intro\n\nHello *world* -- ok.\n\n- one\n- two");
    insta::assert_snapshot!(output.join("\n"), @r"
    Intro
    Hello <strong>world</strong>&#8201;&#8212;&#8201;ok.
    one
    two
    ");
}
