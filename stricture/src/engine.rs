use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{bail, Result};
use fxhash::FxHashMap;
use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::acceptor::Acceptor;
use crate::json;
use crate::mask::TokenSet;
use crate::trie::PrefixIndex;
use crate::walker::Walker;
use crate::TokenId;

/// Unsatisfiable grammar, reported at configure time.
#[derive(Debug, Clone)]
pub struct GrammarError(String);

impl GrammarError {
    pub fn new(msg: impl Into<String>) -> Self {
        GrammarError(msg.into())
    }
}

impl std::fmt::Display for GrammarError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "grammar error: {}", self.0)
    }
}

impl std::error::Error for GrammarError {}

/// No structurally valid continuation exists for the walker population.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exhausted;

impl std::fmt::Display for Exhausted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "no structurally valid continuation")
    }
}

impl std::error::Error for Exhausted {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How many ranked candidates `pick_token` inspects before falling back
    /// to best-effort matching.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Optional (open, close) delimiters; when set, the structured section
    /// is awaited inside free text and closed explicitly.
    #[serde(default)]
    pub delimiters: Option<(String, String)>,
}

fn default_top_k() -> usize {
    8
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            top_k: default_top_k(),
            delimiters: None,
        }
    }
}

/// Outcome of committing a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committed {
    /// The token id actually committed. Under healing this differs from the
    /// candidate: it names the vocabulary token for the accepted prefix.
    pub token_id: TokenId,
    pub healed: bool,
    /// At least one walker has a complete value.
    pub done: bool,
}

/// Per-step driver. Owns the vocabulary index (session-scoped) and the live
/// walker population (one structured-output session at a time; `configure`
/// starts a new one).
pub struct Engine {
    tokens: Vec<String>,
    token_ids: FxHashMap<String, TokenId>,
    index: PrefixIndex,
    alphabet: Vec<char>,
    config: EngineConfig,
    acceptor: Option<Arc<Acceptor>>,
    walkers: Vec<Walker>,
}

/// Exact-consumption walkers, and the best healed-prefix group
/// (byte length, replacement token id, walkers).
struct StepResults {
    exact: Vec<Walker>,
    healed: Option<(usize, TokenId, Vec<Walker>)>,
}

impl Engine {
    /// Build the vocabulary index once. `vocab` pairs token text with its
    /// id; special tokens should be left out by the caller.
    pub fn new(vocab: impl IntoIterator<Item = (String, TokenId)>) -> Self {
        let pairs: Vec<(String, TokenId)> = vocab.into_iter().collect();
        let size = pairs
            .iter()
            .map(|&(_, id)| id as usize + 1)
            .max()
            .unwrap_or(0);
        let mut tokens = vec![String::new(); size];
        let mut token_ids = FxHashMap::default();
        let mut alphabet = BTreeSet::new();
        for (text, id) in &pairs {
            tokens[*id as usize] = text.clone();
            token_ids.entry(text.clone()).or_insert(*id);
            if let Some(c) = text.chars().next() {
                alphabet.insert(c);
            }
        }
        let index = PrefixIndex::new(pairs.iter().map(|(t, id)| (t.as_str(), *id)));
        Engine {
            tokens,
            token_ids,
            index,
            alphabet: alphabet.into_iter().collect(),
            config: EngineConfig::default(),
            acceptor: None,
            walkers: Vec::new(),
        }
    }

    pub fn vocab_size(&self) -> usize {
        self.tokens.len()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn walkers(&self) -> &[Walker] {
        &self.walkers
    }

    /// Install a grammar and seed the walker population. Fails with
    /// `GrammarError` if the graph cannot accept anything.
    pub fn configure(
        &mut self,
        acceptor: impl Into<Arc<Acceptor>>,
        config: EngineConfig,
    ) -> Result<()> {
        let inner = acceptor.into();
        let acceptor = match &config.delimiters {
            Some((open, close)) => Arc::new(json::encapsulated(inner, open, close)),
            None => inner,
        };
        acceptor.validate()?;
        self.walkers = acceptor.walkers(None);
        self.acceptor = Some(acceptor);
        self.config = config;
        Ok(())
    }

    /// Restart the current grammar from its start state.
    pub fn reset(&mut self) {
        if let Some(acceptor) = &self.acceptor {
            self.walkers = acceptor.walkers(None);
        }
    }

    pub fn is_configured(&self) -> bool {
        self.acceptor.is_some()
    }

    pub fn has_reached_accept_state(&self) -> bool {
        self.walkers.iter().any(|w| w.has_reached_accept_state())
    }

    /// Accumulated text of an accepted walker, if any.
    pub fn raw_value(&self) -> Option<String> {
        self.walkers
            .iter()
            .find(|w| w.has_reached_accept_state())
            .and_then(|w| w.raw_value())
    }

    /// Accepted text with delimiters stripped, parsed as JSON when it is
    /// JSON, else returned as a string value.
    pub fn parsed_value(&self) -> Option<serde_json::Value> {
        let mut raw = self.raw_value()?;
        if let Some((open, close)) = &self.config.delimiters {
            if let Some(i) = raw.find(open.as_str()) {
                raw = raw[i + open.len()..].to_string();
            }
            if let Some(i) = raw.rfind(close.as_str()) {
                raw.truncate(i);
            }
        }
        match serde_json::from_str(&raw) {
            Ok(v) => Some(v),
            Err(_) => Some(serde_json::Value::String(raw)),
        }
    }

    /// Logits-filtering hook: union of tokens some walker could make
    /// progress on, applied as a hard mask.
    pub fn mask_logits(&self, logits: &mut [f32]) {
        self.compute_mask().apply(logits);
    }

    pub fn compute_mask(&self) -> TokenSet {
        let mut set = TokenSet::new(self.tokens.len());
        if self.acceptor.is_none() {
            set.set_all(true);
            return set;
        }
        let mut extensions = TokenSet::new(self.tokens.len());
        for walker in &self.walkers {
            if walker.accepts_any_token() {
                set.set_all(true);
                return set;
            }
            for cont in walker.valid_continuations(&self.alphabet, 0) {
                if !cont.is_empty() {
                    self.index.allow_prefixes_of(&cont, &mut set);
                    self.index.tokens_extending(&cont, &mut extensions);
                }
            }
        }
        // a token outrunning its continuation is allowed only when the
        // commit-time advance would actually take it: exact consumption
        // deeper into the graph, or a heal down to a vocabulary prefix
        for id in extensions.iter_allowed() {
            if !set.is_allowed(id)
                && !advance_all(&self.walkers, &self.tokens[id as usize], &self.index).is_empty()
            {
                set.allow(id);
            }
        }
        set
    }

    /// Token-commit hook. Exact consumption wins; otherwise the longest
    /// accepted prefix that is itself a vocabulary token is committed in the
    /// candidate's place (token healing); otherwise `Exhausted`, leaving the
    /// population untouched.
    pub fn commit_token(&mut self, token_id: TokenId) -> Result<Committed> {
        let token = self.token_text(token_id)?.to_string();
        if self.acceptor.is_none() {
            return Ok(Committed {
                token_id,
                healed: false,
                done: false,
            });
        }
        let step = self.step(&token);
        if !step.exact.is_empty() {
            self.walkers = step.exact;
            return Ok(Committed {
                token_id,
                healed: false,
                done: self.has_reached_accept_state(),
            });
        }
        if let Some((_, id, walkers)) = step.healed {
            debug!("healed {:?} -> {:?}", token, self.tokens[id as usize]);
            self.walkers = walkers;
            return Ok(Committed {
                token_id: id,
                healed: true,
                done: self.has_reached_accept_state(),
            });
        }
        debug!("rejected token {token:?}");
        Err(Exhausted.into())
    }

    /// Ranked-candidate loop: scan the top candidates in rank order,
    /// fast-path on a full match, keep the longest healed prefix as a
    /// fallback, then try best-effort matching over the whole vocabulary.
    pub fn pick_token(&mut self, ranked: &[TokenId]) -> Result<Committed> {
        if self.acceptor.is_none() {
            match ranked.first() {
                Some(&id) => {
                    return Ok(Committed {
                        token_id: id,
                        healed: false,
                        done: false,
                    })
                }
                None => bail!(Exhausted),
            }
        }
        let k = self.config.top_k.min(ranked.len());
        let mut fallback: Option<(usize, TokenId, Vec<Walker>)> = None;
        for &candidate in &ranked[..k] {
            let Ok(token) = self.token_text(candidate) else {
                continue;
            };
            let token = token.to_string();
            let step = self.step(&token);
            if !step.exact.is_empty() {
                self.walkers = step.exact;
                return Ok(Committed {
                    token_id: candidate,
                    healed: false,
                    done: self.has_reached_accept_state(),
                });
            }
            if let Some((len, id, walkers)) = step.healed {
                // longest prefix wins; earlier rank breaks ties
                if fallback.as_ref().map_or(true, |(best, ..)| len > *best) {
                    fallback = Some((len, id, walkers));
                }
            }
        }
        if let Some((_, id, walkers)) = fallback {
            debug!("healed ranked candidate to {:?}", self.tokens[id as usize]);
            self.walkers = walkers;
            return Ok(Committed {
                token_id: id,
                healed: true,
                done: self.has_reached_accept_state(),
            });
        }
        self.best_effort()
    }

    /// No ranked candidate worked: pick the longest vocabulary token that is
    /// a legal continuation from any walker.
    fn best_effort(&mut self) -> Result<Committed> {
        let mut candidates: Vec<(usize, TokenId, String)> = Vec::new();
        let add = |candidates: &mut Vec<(usize, TokenId, String)>, id: TokenId, text: String| {
            if !candidates.iter().any(|(_, seen, _)| *seen == id) {
                candidates.push((text.len(), id, text));
            }
        };
        for walker in &self.walkers {
            for cont in walker.valid_continuations(&self.alphabet, 0) {
                if cont.is_empty() {
                    continue;
                }
                if let Some((id, len)) = self.index.longest_token_prefix(&cont) {
                    add(&mut candidates, id, cont[..len].to_string());
                }
                if let Some((id, _)) = self.index.longest_token_with_prefix(&cont) {
                    add(&mut candidates, id, self.tokens[id as usize].clone());
                }
            }
        }
        // stable sort: longest first, discovery order breaks ties
        candidates.sort_by(|a, b| b.0.cmp(&a.0));
        for (_, id, text) in candidates {
            let step = self.step(&text);
            if !step.exact.is_empty() {
                debug!("best-effort pick {text:?}");
                self.walkers = step.exact;
                return Ok(Committed {
                    token_id: id,
                    healed: true,
                    done: self.has_reached_accept_state(),
                });
            }
        }
        Err(Exhausted.into())
    }

    /// Feed raw text through the population, e.g. to prime a session with
    /// already-decoded prompt text. The whole string must be consumed.
    pub fn consume_text(&mut self, text: &str) -> Result<()> {
        if self.acceptor.is_none() || text.is_empty() {
            return Ok(());
        }
        let exact: Vec<Walker> = advance_all(&self.walkers, text, &self.index)
            .into_iter()
            .filter_map(|(matched, walker)| (matched == text).then_some(walker))
            .collect();
        if exact.is_empty() {
            bail!(Exhausted);
        }
        self.walkers = exact;
        Ok(())
    }

    fn step(&self, token: &str) -> StepResults {
        let mut exact = Vec::new();
        let mut healed: Option<(usize, TokenId, Vec<Walker>)> = None;
        for (matched, walker) in advance_all(&self.walkers, token, &self.index) {
            if matched == token {
                exact.push(walker);
            } else if let Some(&id) = self.token_ids.get(&matched) {
                let len = matched.len();
                match &mut healed {
                    Some((best, bid, walkers)) if *best == len && *bid == id => {
                        walkers.push(walker)
                    }
                    Some((best, ..)) if *best >= len => {}
                    _ => healed = Some((len, id, vec![walker])),
                }
            }
        }
        StepResults { exact, healed }
    }

    fn token_text(&self, id: TokenId) -> Result<&str> {
        match self.tokens.get(id as usize) {
            Some(t) if !t.is_empty() => Ok(t),
            _ => bail!("unknown token id {id}"),
        }
    }
}

/// Advance every walker with `token` in parallel. Results pair the text
/// actually matched with the successor walker: the full token on exact
/// consumption, or a shorter prefix when the walker stopped early and the
/// prefix exists in the vocabulary (token healing).
pub(crate) fn advance_all(
    walkers: &[Walker],
    token: &str,
    index: &PrefixIndex,
) -> Vec<(String, Walker)> {
    let raw: Vec<(String, Walker)> = walkers
        .par_iter()
        .flat_map_iter(|walker| {
            walker
                .consume_token(token)
                .into_iter()
                .filter_map(|mut advanced| match advanced.remaining_input.take() {
                    None => Some((token.to_string(), advanced)),
                    Some(rem) => {
                        // the remainder is always a tail of the token; what
                        // was consumed is the candidate healing prefix
                        let prefix_len = token.len().checked_sub(rem.len())?;
                        if prefix_len == 0 {
                            return None;
                        }
                        let prefix = &token[..prefix_len];
                        if index.token_id(prefix).is_some() {
                            Some((prefix.to_string(), advanced))
                        } else {
                            None
                        }
                    }
                })
                .collect::<Vec<_>>()
        })
        .collect();
    let mut out: Vec<(String, Walker)> = Vec::new();
    for (text, walker) in raw {
        if !out.iter().any(|(t, w)| *t == text && *w == walker) {
            out.push((text, walker));
        }
    }
    out
}
