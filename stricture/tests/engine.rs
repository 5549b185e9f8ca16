use serde_json::json;
use stricture::json as grammars;
use stricture::State::{Done, Id};
use stricture::{Acceptor, Edge, Engine, EngineConfig, Exhausted, GrammarError, TokenId};

fn engine(vocab: &[&str]) -> Engine {
    Engine::new(
        vocab
            .iter()
            .enumerate()
            .map(|(i, t)| (t.to_string(), i as TokenId)),
    )
}

fn tid(vocab: &[&str], text: &str) -> TokenId {
    vocab.iter().position(|t| *t == text).unwrap() as TokenId
}

#[test]
fn object_token_stream() {
    let vocab = &["{", "}", "\"value\"", ":", " 9", ".11", "\"", "value"];
    let mut eng = engine(vocab);
    eng.configure(grammars::object(), EngineConfig::default())
        .unwrap();

    for tok in ["{", "\"value\"", ":", " 9", ".11"] {
        let committed = eng.commit_token(tid(vocab, tok)).unwrap();
        assert!(!committed.healed, "unexpected heal on {tok:?}");
        assert_eq!(committed.token_id, tid(vocab, tok));
    }
    assert!(!eng.has_reached_accept_state());

    let committed = eng.commit_token(tid(vocab, "}")).unwrap();
    assert!(committed.done);
    assert_eq!(eng.parsed_value(), Some(json!({"value": 9.11})));
}

#[test]
fn token_healing_commits_the_prefix() {
    let vocab = &["truely", "true", "false", "x"];
    let mut eng = engine(vocab);
    eng.configure(grammars::boolean(), EngineConfig::default())
        .unwrap();

    let committed = eng.commit_token(tid(vocab, "truely")).unwrap();
    assert!(committed.healed);
    assert_eq!(committed.token_id, tid(vocab, "true"));
    assert!(committed.done);
    assert_eq!(eng.raw_value().as_deref(), Some("true"));
}

fn bounded_array() -> Acceptor {
    // one to three integers
    Acceptor::compose(
        [
            (Id(0), vec![Edge::new(Acceptor::phrase("["), Id(1))]),
            (Id(1), vec![Edge::new(grammars::integer(), Id(2))]),
            (
                Id(2),
                vec![
                    Edge::new(Acceptor::phrase(","), Id(3)),
                    Edge::new(Acceptor::phrase("]"), Done),
                ],
            ),
            (Id(3), vec![Edge::new(grammars::integer(), Id(4))]),
            (
                Id(4),
                vec![
                    Edge::new(Acceptor::phrase(","), Id(5)),
                    Edge::new(Acceptor::phrase("]"), Done),
                ],
            ),
            (Id(5), vec![Edge::new(grammars::integer(), Id(6))]),
            (Id(6), vec![Edge::new(Acceptor::phrase("]"), Done)]),
        ],
        vec![Done],
    )
}

#[test]
fn bounded_array_rejects_a_fourth_item() {
    let vocab = &["[", "]", ",", "1", "2", "3", "4"];
    let mut eng = engine(vocab);
    eng.configure(bounded_array(), EngineConfig::default())
        .unwrap();

    for tok in ["[", "1", ",", "2", ",", "3"] {
        eng.commit_token(tid(vocab, tok)).unwrap();
    }

    let mask = eng.compute_mask();
    assert!(mask.is_allowed(tid(vocab, "]")));
    // the third integer may still grow
    assert!(mask.is_allowed(tid(vocab, "4")));
    assert!(!mask.is_allowed(tid(vocab, ",")));
    assert!(!mask.is_allowed(tid(vocab, "[")));

    let err = eng.commit_token(tid(vocab, ",")).unwrap_err();
    assert!(err.downcast_ref::<Exhausted>().is_some());

    let committed = eng.commit_token(tid(vocab, "]")).unwrap();
    assert!(committed.done);
}

#[test]
fn pick_token_rank_order_and_best_effort() {
    let vocab = &["xx", "yy", "hel", "lo", "hello"];
    let mut eng = engine(vocab);
    eng.configure(Acceptor::phrase("hello"), EngineConfig::default())
        .unwrap();

    // ranked candidate that fully matches wins untouched
    let committed = eng
        .pick_token(&[tid(vocab, "xx"), tid(vocab, "hel")])
        .unwrap();
    assert!(!committed.healed);
    assert_eq!(committed.token_id, tid(vocab, "hel"));
    assert!(!committed.done);

    // nothing ranked matches; best effort finds the longest valid token
    let committed = eng
        .pick_token(&[tid(vocab, "xx"), tid(vocab, "yy")])
        .unwrap();
    assert!(committed.healed);
    assert_eq!(committed.token_id, tid(vocab, "lo"));
    assert!(committed.done);
    assert_eq!(eng.raw_value().as_deref(), Some("hello"));
}

#[test]
fn best_effort_prefers_the_longest_token() {
    let vocab = &["zz", "hel", "hello", "he"];
    let mut eng = engine(vocab);
    eng.configure(Acceptor::phrase("hello world"), EngineConfig::default())
        .unwrap();

    let committed = eng.pick_token(&[tid(vocab, "zz")]).unwrap();
    assert!(committed.healed);
    assert_eq!(committed.token_id, tid(vocab, "hello"));
}

#[test]
fn shared_prefix_keeps_every_viable_branch() {
    let vocab = &["ca", "t", "r", "cow", "cat", "car"];
    let graph = Acceptor::compose(
        [(
            Id(0),
            vec![
                Edge::new(Acceptor::phrase("cat"), Done),
                Edge::new(Acceptor::phrase("car"), Done),
                Edge::new(Acceptor::phrase("cow"), Done),
            ],
        )],
        vec![Done],
    );
    let mut eng = engine(vocab);
    eng.configure(graph, EngineConfig::default()).unwrap();

    eng.commit_token(tid(vocab, "ca")).unwrap();
    assert_eq!(eng.walkers().len(), 2);

    let mask = eng.compute_mask();
    assert!(mask.is_allowed(tid(vocab, "t")));
    assert!(mask.is_allowed(tid(vocab, "r")));
    assert!(!mask.is_allowed(tid(vocab, "cow")));

    let committed = eng.commit_token(tid(vocab, "t")).unwrap();
    assert!(committed.done);
    assert_eq!(eng.raw_value().as_deref(), Some("cat"));
}

#[test]
fn nested_arrays_terminate() {
    let vocab = &["[", "]", "1"];
    let mut eng = engine(vocab);
    eng.configure(grammars::value(), EngineConfig::default())
        .unwrap();

    for tok in ["[", "[", "1", "]", "]"] {
        eng.commit_token(tid(vocab, tok)).unwrap();
    }
    assert!(eng.has_reached_accept_state());
    assert_eq!(eng.parsed_value(), Some(json!([[1]])));
}

#[test]
fn completion_is_idempotent() {
    let vocab = &["true", "false"];
    let mut eng = engine(vocab);
    eng.configure(grammars::boolean(), EngineConfig::default())
        .unwrap();

    assert!(eng.commit_token(tid(vocab, "true")).unwrap().done);
    assert_eq!(eng.raw_value().as_deref(), Some("true"));

    // a completed population rejects further input and stays unchanged
    let err = eng.commit_token(tid(vocab, "false")).unwrap_err();
    assert!(err.downcast_ref::<Exhausted>().is_some());
    assert!(eng.has_reached_accept_state());
    assert_eq!(eng.raw_value().as_deref(), Some("true"));
}

#[test]
fn mask_agrees_with_commit() {
    let vocab = &["true", "truely", "t", "tr", "false", "fa", "x", "{"];
    let mut eng = engine(vocab);
    eng.configure(grammars::boolean(), EngineConfig::default())
        .unwrap();

    let mask = eng.compute_mask();
    for (i, _) in vocab.iter().enumerate() {
        let id = i as TokenId;
        eng.reset();
        let outcome = eng.commit_token(id);
        assert_eq!(
            mask.is_allowed(id),
            outcome.is_ok(),
            "mask and commit disagree on {:?}",
            vocab[i]
        );
    }
}

#[test]
fn mask_denies_extensions_that_cannot_heal() {
    // "1a" outruns the digit run and its consumed prefix "1" is not in the
    // vocabulary, so commit has nothing to heal it down to
    let vocab = &["1a", "x"];
    let mut eng = engine(vocab);
    eng.configure(grammars::integer(), EngineConfig::default())
        .unwrap();
    let mask = eng.compute_mask();
    assert!(!mask.is_allowed(tid(vocab, "1a")));
    let err = eng.commit_token(tid(vocab, "1a")).unwrap_err();
    assert!(err.downcast_ref::<Exhausted>().is_some());

    // same shape over a phrase grammar: "truely" consumes "true", which is
    // absent, while "tru" is consumed whole and stays allowed
    let vocab = &["truely", "tru", "x"];
    let mut eng = engine(vocab);
    eng.configure(grammars::boolean(), EngineConfig::default())
        .unwrap();
    let mask = eng.compute_mask();
    assert!(mask.is_allowed(tid(vocab, "tru")));
    assert!(!mask.is_allowed(tid(vocab, "truely")));
    assert!(!mask.is_allowed(tid(vocab, "x")));
    for (i, _) in vocab.iter().enumerate() {
        let id = i as TokenId;
        eng.reset();
        assert_eq!(
            mask.is_allowed(id),
            eng.commit_token(id).is_ok(),
            "mask and commit disagree on {:?}",
            vocab[i]
        );
    }
}

#[test]
fn logits_masking() {
    let vocab = &["true", "false", "x"];
    let mut eng = engine(vocab);
    eng.configure(grammars::boolean(), EngineConfig::default())
        .unwrap();

    let mut logits = vec![0.5f32; vocab.len()];
    eng.mask_logits(&mut logits);
    assert_eq!(logits[tid(vocab, "true") as usize], 0.5);
    assert_eq!(logits[tid(vocab, "false") as usize], 0.5);
    assert_eq!(logits[tid(vocab, "x") as usize], f32::NEG_INFINITY);
}

#[test]
fn dead_end_grammar_is_rejected_at_configure_time() {
    let graph = Acceptor::compose(
        [(Id(0), vec![Edge::new(Acceptor::phrase("a"), Id(1))])],
        vec![Done],
    );
    let mut eng = engine(&["a"]);
    let err = eng.configure(graph, EngineConfig::default()).unwrap_err();
    assert!(err.downcast_ref::<GrammarError>().is_some());
    assert!(!eng.is_configured());
}

#[test]
fn delimited_session_waits_for_the_opener() {
    let vocab = &["bla", "<out>", "</out>", "true", "false"];
    let mut eng = engine(vocab);
    let config = EngineConfig {
        delimiters: Some(("<out>".to_string(), "</out>".to_string())),
        ..EngineConfig::default()
    };
    eng.configure(grammars::boolean(), config).unwrap();

    // anything goes before the opening delimiter
    let mask = eng.compute_mask();
    assert_eq!(mask.num_allowed(), eng.vocab_size());
    eng.commit_token(tid(vocab, "bla")).unwrap();

    eng.commit_token(tid(vocab, "<out>")).unwrap();
    let mask = eng.compute_mask();
    assert!(mask.is_allowed(tid(vocab, "true")));
    assert!(mask.is_allowed(tid(vocab, "false")));
    assert!(!mask.is_allowed(tid(vocab, "bla")));

    eng.commit_token(tid(vocab, "true")).unwrap();
    let committed = eng.commit_token(tid(vocab, "</out>")).unwrap();
    assert!(committed.done);
    assert_eq!(eng.raw_value().as_deref(), Some("<out>true</out>"));
    assert_eq!(eng.parsed_value(), Some(json!(true)));
}

#[test]
fn config_deserializes_with_defaults() {
    let config: EngineConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(config.top_k, 8);
    assert!(config.delimiters.is_none());

    let config: EngineConfig =
        serde_json::from_str("{\"top_k\": 3, \"delimiters\": [\"<a>\", \"</a>\"]}").unwrap();
    assert_eq!(config.top_k, 3);
    assert_eq!(
        config.delimiters,
        Some(("<a>".to_string(), "</a>".to_string()))
    );
}
