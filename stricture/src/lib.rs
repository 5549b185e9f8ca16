//! Grammar-constrained token generation. An immutable graph of composable
//! acceptors describes the allowed output; a population of cheap-to-clone
//! walkers tracks every viable position in it; the engine drives the two
//! per-step hooks of a decoding loop: mask the logits, then commit the
//! sampled token (healing it down to a valid prefix when the tokenizer
//! over-shot the grammar).

pub mod acceptor;
pub mod engine;
#[cfg(feature = "hf")]
pub mod hf;
pub mod json;
pub mod mask;
pub mod trie;
pub mod walker;

pub type TokenId = u32;

pub use acceptor::{Acceptor, Edge, State};
pub use engine::{Committed, Engine, EngineConfig, Exhausted, GrammarError};
pub use mask::TokenSet;
pub use trie::PrefixIndex;
pub use walker::Walker;
