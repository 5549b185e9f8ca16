//! Ready-made grammar graphs for JSON values, plus the generic
//! `chain`/`encapsulated` combinators. These are plain graph builders; any
//! schema-to-graph compilation happens upstream of this crate.

use std::sync::Arc;

use crate::acceptor::State::{Done, Id};
use crate::acceptor::{Acceptor, Edge, State};

const MAX_WHITESPACE: usize = 40;

/// Optional run of JSON whitespace, capped so generation cannot stall on
/// padding forever.
pub fn whitespace() -> Acceptor {
    Acceptor::chars_bounded(" \t\n\r", 0, MAX_WHITESPACE)
}

/// One or more decimal digits.
pub fn integer() -> Acceptor {
    Acceptor::chars("0123456789")
}

fn exponent() -> Acceptor {
    Acceptor::compose(
        [
            (Id(0), vec![Edge::new(Acceptor::chars_bounded("eE", 1, 1), Id(1))]),
            (
                Id(1),
                vec![Edge::new(Acceptor::chars_bounded("+-", 0, 1), Id(2))],
            ),
            (Id(2), vec![Edge::new(integer(), Done)]),
        ],
        vec![Done],
    )
}

fn fraction() -> Acceptor {
    chain(vec![Acceptor::phrase("."), integer()])
}

/// JSON number: optional sign, integer part, optional fraction, optional
/// exponent.
pub fn number() -> Acceptor {
    Acceptor::compose(
        [
            (Id(0), vec![Edge::new(Acceptor::phrase("-").optional(), Id(1))]),
            (Id(1), vec![Edge::new(integer(), Id(2))]),
            (
                Id(2),
                vec![Edge::new(fraction(), Id(3)), Edge::new(exponent(), Done)],
            ),
            (Id(3), vec![Edge::new(exponent(), Done)]),
        ],
        vec![Id(2), Id(3), Done],
    )
}

/// JSON string with escapes and \uXXXX sequences.
pub fn string() -> Acceptor {
    let hex = chain(vec![
        Acceptor::phrase("u"),
        Acceptor::chars_bounded("0123456789abcdefABCDEF", 4, 4),
    ]);
    Acceptor::compose(
        [
            (Id(0), vec![Edge::new(Acceptor::phrase("\""), Id(1))]),
            (
                Id(1),
                vec![
                    Edge::new(Acceptor::not_chars("\"\\"), Id(1)),
                    Edge::new(Acceptor::phrase("\\"), Id(2)),
                    Edge::new(Acceptor::phrase("\""), Done),
                ],
            ),
            (
                Id(2),
                vec![
                    Edge::new(Acceptor::chars_bounded("\"\\/bfnrt", 1, 1), Id(1)),
                    Edge::new(hex, Id(1)),
                ],
            ),
        ],
        vec![Done],
    )
}

pub fn boolean() -> Acceptor {
    Acceptor::compose(
        [(
            Id(0),
            vec![
                Edge::new(Acceptor::phrase("true"), Done),
                Edge::new(Acceptor::phrase("false"), Done),
            ],
        )],
        vec![Done],
    )
}

pub fn null() -> Acceptor {
    Acceptor::phrase("null")
}

fn key_value() -> Acceptor {
    chain(vec![
        string(),
        whitespace(),
        Acceptor::phrase(":"),
        whitespace(),
        value(),
    ])
}

/// JSON object; the member loop is what exercises the explored-edge guard.
pub fn object() -> Acceptor {
    Acceptor::compose(
        [
            (Id(0), vec![Edge::new(Acceptor::phrase("{"), Id(1))]),
            (
                Id(1),
                vec![
                    Edge::new(whitespace(), Id(2)),
                    Edge::new(Acceptor::phrase("}"), Done),
                ],
            ),
            (Id(2), vec![Edge::new(key_value(), Id(3))]),
            (Id(3), vec![Edge::new(whitespace(), Id(4))]),
            (
                Id(4),
                vec![
                    Edge::new(chain(vec![Acceptor::phrase(","), whitespace()]), Id(2)),
                    Edge::new(Acceptor::phrase("}"), Done),
                ],
            ),
        ],
        vec![Done],
    )
}

pub fn array() -> Acceptor {
    Acceptor::compose(
        [
            (Id(0), vec![Edge::new(Acceptor::phrase("["), Id(1))]),
            (
                Id(1),
                vec![
                    Edge::new(whitespace(), Id(2)),
                    Edge::new(Acceptor::phrase("]"), Done),
                ],
            ),
            (Id(2), vec![Edge::new(value(), Id(3))]),
            (Id(3), vec![Edge::new(whitespace(), Id(4))]),
            (
                Id(4),
                vec![
                    Edge::new(chain(vec![Acceptor::phrase(","), whitespace()]), Id(2)),
                    Edge::new(Acceptor::phrase("]"), Done),
                ],
            ),
        ],
        vec![Done],
    )
}

/// Any JSON value. Edge expansion is lazy, which keeps the recursive
/// grammar finite to construct; nesting depth is bounded only by input.
pub fn value() -> Acceptor {
    Acceptor::lazy_json_value()
}

pub(crate) fn value_edges() -> Vec<Edge> {
    vec![
        Edge::new(object(), Done),
        Edge::new(array(), Done),
        Edge::new(string(), Done),
        Edge::new(null(), Done),
        Edge::new(boolean(), Done),
        Edge::new(number(), Done),
    ]
}

/// Acceptors in sequence, each edge feeding the next.
pub fn chain(parts: Vec<Acceptor>) -> Acceptor {
    let last = parts.len().saturating_sub(1);
    let graph: Vec<(State, Vec<Edge>)> = parts
        .into_iter()
        .enumerate()
        .map(|(i, part)| {
            let target = if i == last { Done } else { Id(i as u32 + 1) };
            (Id(i as u32), vec![Edge::new(part, target)])
        })
        .collect();
    Acceptor::compose(graph, vec![Done])
}

/// Free text until `open` appears, then `inner`, then `close`. This is how
/// a structured section is embedded in an unconstrained stream.
pub fn encapsulated(inner: impl Into<Arc<Acceptor>>, open: &str, close: &str) -> Acceptor {
    Acceptor::compose(
        [
            (
                Id(0),
                vec![Edge::new(
                    Acceptor::wait_for(Acceptor::phrase(open)),
                    Id(1),
                )],
            ),
            (Id(1), vec![Edge::new(inner.into(), Id(2))]),
            (Id(2), vec![Edge::new(Acceptor::phrase(close), Done)]),
        ],
        vec![Done],
    )
}
