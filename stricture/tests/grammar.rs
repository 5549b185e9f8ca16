use serde_json::json;
use stricture::json as grammars;
use stricture::{Acceptor, Engine, EngineConfig, TokenId};

fn engine() -> Engine {
    // tiny vocabulary; these tests drive raw text, not token ids
    Engine::new(
        ["a", "b", "1"]
            .iter()
            .enumerate()
            .map(|(i, t)| (t.to_string(), i as TokenId)),
    )
}

fn accepts(acceptor: Acceptor, text: &str) -> bool {
    let mut eng = engine();
    eng.configure(acceptor, EngineConfig::default()).unwrap();
    match eng.consume_text(text) {
        Ok(()) => eng.has_reached_accept_state(),
        Err(_) => false,
    }
}

#[test]
fn number_literals() {
    assert!(accepts(grammars::number(), "42"));
    assert!(accepts(grammars::number(), "-7"));
    assert!(accepts(grammars::number(), "3.14"));
    assert!(accepts(grammars::number(), "-12.5e+3"));
    assert!(accepts(grammars::number(), "2E8"));
    assert!(!accepts(grammars::number(), "abc"));
    assert!(!accepts(grammars::number(), "-"));
    assert!(!accepts(grammars::number(), "1."));
}

#[test]
fn string_literals() {
    assert!(accepts(grammars::string(), "\"hello\""));
    assert!(accepts(grammars::string(), "\"a\\nb\""));
    assert!(accepts(grammars::string(), "\"\\u00e9\""));
    assert!(accepts(grammars::string(), "\"\""));
    // consumable but incomplete
    assert!(!accepts(grammars::string(), "\"unterminated"));
    assert!(!accepts(grammars::string(), "bare"));
}

#[test]
fn primitives() {
    assert!(accepts(grammars::boolean(), "true"));
    assert!(accepts(grammars::boolean(), "false"));
    assert!(!accepts(grammars::boolean(), "maybe"));
    assert!(accepts(grammars::null(), "null"));
}

#[test]
fn case_insensitive_phrase() {
    let mut eng = engine();
    eng.configure(
        Acceptor::phrase("NULL").case_insensitive(),
        EngineConfig::default(),
    )
    .unwrap();
    eng.consume_text("null").unwrap();
    assert!(eng.has_reached_accept_state());
    // the accumulated value keeps the grammar's spelling
    assert_eq!(eng.raw_value().as_deref(), Some("NULL"));
}

#[test]
fn whole_document_through_object_grammar() {
    let mut eng = engine();
    eng.configure(grammars::object(), EngineConfig::default())
        .unwrap();
    eng.consume_text("{\"a\": [1, true], \"b\": null}").unwrap();
    assert!(eng.has_reached_accept_state());
    assert_eq!(
        eng.parsed_value(),
        Some(json!({"a": [1, true], "b": null}))
    );
}

#[test]
fn empty_containers() {
    assert!(accepts(grammars::object(), "{}"));
    assert!(accepts(grammars::array(), "[]"));
    assert!(accepts(grammars::array(), "[ 1 ]"));
}

#[test]
fn bounded_character_runs() {
    // at most three digits
    let digits = Acceptor::chars_bounded("0123456789", 1, 3);
    assert!(accepts(digits, "123"));
    let digits = Acceptor::chars_bounded("0123456789", 1, 3);
    let mut eng = engine();
    eng.configure(digits, EngineConfig::default()).unwrap();
    assert!(eng.consume_text("1234").is_err());
}
