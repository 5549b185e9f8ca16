//! Vocabulary extraction from a HuggingFace tokenizer, for feeding
//! `Engine::new`. Handles sentencepiece-style byte-fallback vocabularies:
//! `<0xNN>` tokens for ASCII bytes become their character, non-ASCII byte
//! tokens are skipped (they carry no standalone text), and the `\u{2581}`
//! space marker is replaced with a plain space.

use anyhow::{bail, Result};
use tokenizers::Tokenizer;

use crate::TokenId;

const SPACE_MARKER: char = '\u{2581}';

pub fn vocab_from_tokenizer(tokenizer: &Tokenizer) -> Result<Vec<(String, TokenId)>> {
    let vocab_size = tokenizer.get_vocab_size(true) as TokenId;
    let added = tokenizer.get_added_tokens_decoder();
    let mut out = Vec::new();
    for id in 0..vocab_size {
        if let Some(info) = added.get(&id) {
            if !info.special {
                out.push((info.content.clone(), id));
            }
            continue;
        }
        let Some(name) = tokenizer.id_to_token(id) else {
            continue;
        };
        if name.len() == 6 && name.starts_with("<0x") && name.ends_with('>') {
            let Ok(byte) = u8::from_str_radix(&name[3..5], 16) else {
                bail!("malformed byte token {name:?}");
            };
            if byte < 0x80 {
                out.push(((byte as char).to_string(), id));
            }
        } else {
            out.push((name.replace(SPACE_MARKER, " "), id));
        }
    }
    Ok(out)
}

pub fn vocab_from_file(path: &str) -> Result<Vec<(String, TokenId)>> {
    let tokenizer = Tokenizer::from_file(path)
        .map_err(|e| anyhow::anyhow!("loading tokenizer from {path}: {e}"))?;
    vocab_from_tokenizer(&tokenizer)
}
