use std::sync::Arc;

use fxhash::FxHashSet;

use crate::acceptor::{Acceptor, CharClass, Kind, State};

/// Cycle guard record: (source state, target state, accumulated raw value).
/// Retaking an edge is allowed only if consumption made progress since the
/// last visit.
pub(crate) type VisitedEdge = (State, Option<State>, Option<String>);

const MAX_CONTINUATION_DEPTH: usize = 64;

/// A cursor over an acceptor graph. Cheap to clone; the population of live
/// walkers is the engine's entire notion of "position in the grammar".
#[derive(Debug, Clone)]
pub struct Walker {
    pub(crate) acceptor: Arc<Acceptor>,
    pub(crate) current_state: State,
    pub(crate) target_state: Option<State>,
    pub(crate) transition: Option<Box<Walker>>,
    pub(crate) consumed: usize,
    pub(crate) remaining_input: Option<String>,
    pub(crate) explored: FxHashSet<VisitedEdge>,
    pub(crate) history: Vec<Walker>,
    pub(crate) raw: Option<String>,
    pub(crate) accepts_more: bool,
    pub(crate) accepted: bool,
}

impl Walker {
    pub(crate) fn new(acceptor: Arc<Acceptor>, state: Option<State>) -> Self {
        let current_state = state.unwrap_or(acceptor.start_state);
        let accepts_more = matches!(acceptor.kind, Kind::Chars { .. });
        Walker {
            acceptor,
            current_state,
            target_state: None,
            transition: None,
            consumed: 0,
            remaining_input: None,
            explored: FxHashSet::default(),
            history: Vec::new(),
            raw: None,
            accepts_more,
            accepted: false,
        }
    }

    pub fn current_state(&self) -> State {
        self.current_state
    }

    /// Complete value reached; further input may still extend it if the
    /// grammar allows.
    pub fn has_reached_accept_state(&self) -> bool {
        self.accepted
    }

    pub fn remaining_input(&self) -> Option<&str> {
        self.remaining_input.as_deref()
    }

    /// Text accumulated so far: accepted history, then the pending
    /// transition.
    pub fn raw_value(&self) -> Option<String> {
        if let Some(raw) = &self.raw {
            return Some(raw.clone());
        }
        if self.history.is_empty() && self.transition.is_none() {
            return None;
        }
        let mut buf = String::new();
        let mut any = false;
        for w in &self.history {
            if let Some(v) = w.raw_value() {
                buf.push_str(&v);
                any = true;
            }
        }
        if let Some(t) = self.transition.as_deref() {
            if let Some(v) = t.raw_value() {
                buf.push_str(&v);
                any = true;
            }
        }
        any.then_some(buf)
    }

    /// Could this walker's pending position consume a token starting with
    /// `token`'s first characters?
    pub(crate) fn should_start_transition(&self, token: &str) -> bool {
        if token.is_empty() {
            return false;
        }
        match &self.acceptor.kind {
            Kind::Phrase(text) => {
                let rest = &text[self.consumed.min(text.len())..];
                !rest.is_empty()
                    && prefix_compatible(rest, token, self.acceptor.is_case_sensitive)
            }
            Kind::Chars { class, limit, .. } => {
                if *limit > 0 && self.consumed >= *limit {
                    return false;
                }
                token
                    .chars()
                    .next()
                    .map_or(false, |c| class.allows(c, self.acceptor.is_case_sensitive))
            }
            Kind::WaitFor { .. } => {
                if let Some(t) = self.transition.as_deref() {
                    if t.is_within_value() {
                        return t.should_start_transition(token);
                    }
                }
                true
            }
            Kind::Graph | Kind::JsonValue => match self.transition.as_deref() {
                Some(t) => t.should_start_transition(token),
                None => true,
            },
        }
    }

    fn should_complete_transition(&self) -> bool {
        self.transition
            .as_deref()
            .map_or(true, |t| t.should_complete_transition())
    }

    /// Begin traversing an edge. Returns None when the same edge was already
    /// explored with no progress since, or when the pending transition still
    /// has a claim on the same target.
    pub(crate) fn start_transition(
        &self,
        transition: Walker,
        source: State,
        target: State,
    ) -> Option<Walker> {
        let edge = (source, Some(target), self.raw_value());
        if self.explored.contains(&edge) {
            return None;
        }
        if let Some(t) = self.transition.as_deref() {
            if self.target_state == Some(target) && t.can_accept_more_input() {
                return None;
            }
        }
        let mut next = self.clone();
        if let Some(t) = next.transition.take() {
            if t.accepted {
                let mut done = *t;
                done.remaining_input = None;
                next.history.push(done);
            }
        }
        next.current_state = source;
        next.target_state = Some(target);
        next.transition = Some(Box::new(transition));
        next.accepted = false;
        Some(next)
    }

    /// Fold the post-consumption transition walker back in: record the
    /// explored edge, account only the newly consumed characters, move to
    /// the target state if the sub-value is complete, and retire the
    /// transition once it cannot grow further.
    pub(crate) fn complete_transition(&self, transition: Walker) -> Option<Walker> {
        let mut next = self.clone();
        let prev = next.transition.as_deref().map_or(0, |t| t.consumed);
        next.remaining_input = transition.remaining_input.clone();
        next.consumed += transition.consumed.saturating_sub(prev);
        let mut held = transition.clone();
        held.remaining_input = None;
        next.transition = Some(Box::new(held));
        let edge = (next.current_state, next.target_state, next.raw_value());
        next.explored.insert(edge);
        if !next.should_complete_transition() {
            return Some(next);
        }
        if let Some(target) = next.target_state {
            if transition.accepted {
                next.current_state = target;
                if !transition.can_accept_more_input() {
                    let mut done = transition;
                    done.remaining_input = None;
                    next.history.push(done);
                    next.transition = None;
                    next.target_state = None;
                }
                if next.acceptor.is_end(next.current_state) {
                    next.accepted = true;
                }
            }
        }
        Some(next)
    }

    /// Fan out into alternative positions: extend the pending transition
    /// while it still wants input; once it can only conclude, explore the
    /// graph's outgoing edges instead.
    pub(crate) fn branch(&self, token: Option<&str>) -> Vec<Walker> {
        if let Some(t) = self.transition.as_deref() {
            let mut wrapped = Vec::new();
            if t.can_accept_more_input() {
                for tb in t.branch(token) {
                    let mut next = self.clone();
                    next.transition = Some(Box::new(tb));
                    wrapped.push(next);
                }
            }
            if !wrapped.is_empty() || !t.accepted {
                return wrapped;
            }
        }
        self.acceptor.branch_walker(self, token)
    }

    /// Consume a token (or token fragment), yielding every distinct
    /// successor position.
    pub(crate) fn consume_token(&self, token: &str) -> Vec<Walker> {
        match &self.acceptor.kind {
            Kind::Phrase(text) => self.consume_phrase(text, token),
            Kind::Chars { class, min, limit } => self.consume_chars(class, *min, *limit, token),
            Kind::WaitFor { .. } => self.consume_wait_for(token),
            Kind::Graph | Kind::JsonValue => self.acceptor.advance(self, token),
        }
    }

    fn consume_phrase(&self, text: &str, token: &str) -> Vec<Walker> {
        let rest = &text[self.consumed.min(text.len())..];
        if rest.is_empty() || token.is_empty() {
            return Vec::new();
        }
        let cs = self.acceptor.is_case_sensitive;
        let mut matched = 0usize;
        for (rc, tc) in rest.chars().zip(token.chars()) {
            if !chars_eq(rc, tc, cs) {
                return Vec::new();
            }
            matched += rc.len_utf8();
        }
        let mut next = self.clone();
        next.consumed += matched;
        next.raw = Some(text[..next.consumed].to_string());
        next.remaining_input = if matched < token.len() {
            Some(token[matched..].to_string())
        } else {
            None
        };
        next.accepts_more = next.consumed < text.len();
        next.accepted = next.consumed == text.len();
        vec![next]
    }

    fn consume_chars(&self, class: &CharClass, min: usize, limit: usize, token: &str) -> Vec<Walker> {
        let cs = self.acceptor.is_case_sensitive;
        let mut count = self.consumed;
        let mut bytes = 0usize;
        for c in token.chars() {
            if limit > 0 && count >= limit {
                break;
            }
            if !class.allows(c, cs) {
                break;
            }
            count += 1;
            bytes += c.len_utf8();
        }
        if bytes == 0 {
            // run already satisfied; hand the token back to the parent
            if self.consumed >= min {
                let mut next = self.clone();
                next.remaining_input = Some(token.to_string());
                next.accepts_more = false;
                next.accepted = true;
                return vec![next];
            }
            return Vec::new();
        }
        let mut next = self.clone();
        next.raw = Some(format!(
            "{}{}",
            self.raw.as_deref().unwrap_or(""),
            &token[..bytes]
        ));
        next.consumed = count;
        next.remaining_input = (bytes < token.len()).then(|| token[bytes..].to_string());
        next.accepts_more = next.remaining_input.is_none() && (limit == 0 || count < limit);
        next.accepted = count >= min;
        vec![next]
    }

    fn consume_wait_for(&self, token: &str) -> Vec<Walker> {
        let can_match = self
            .transition
            .as_deref()
            .map_or(false, |t| t.should_start_transition(token));
        if !can_match {
            // swallow the token and re-arm the trigger
            let mut reset = self.clone();
            reset.transition = None;
            reset.target_state = None;
            return reset.branch(None);
        }
        self.acceptor.advance(self, token)
    }

    /// Would this position accept literally any token? True in the
    /// free-text span of a WaitFor wrapper.
    pub(crate) fn accepts_any_token(&self) -> bool {
        match &self.acceptor.kind {
            Kind::WaitFor { .. } => !self
                .transition
                .as_deref()
                .map_or(false, |t| t.is_within_value()),
            Kind::Graph | Kind::JsonValue => self
                .transition
                .as_deref()
                .map_or(false, |t| t.accepts_any_token()),
            _ => false,
        }
    }

    /// Consumption started but the value is not complete yet.
    pub(crate) fn is_within_value(&self) -> bool {
        match &self.acceptor.kind {
            Kind::Graph | Kind::JsonValue => match self.transition.as_deref() {
                Some(t) => t.is_within_value(),
                None => self.consumed > 0,
            },
            Kind::WaitFor { .. } => self
                .transition
                .as_deref()
                .map_or(false, |t| t.is_within_value()),
            Kind::Phrase(text) => self.consumed > 0 && self.consumed < text.len(),
            Kind::Chars { .. } => self.consumed > 0,
        }
    }

    pub(crate) fn can_accept_more_input(&self) -> bool {
        match &self.acceptor.kind {
            Kind::Phrase(text) => self.consumed < text.len(),
            Kind::Chars { limit, .. } => {
                self.accepts_more && (*limit == 0 || self.consumed < *limit)
            }
            Kind::WaitFor { .. } => false,
            Kind::Graph | Kind::JsonValue => {
                if let Some(t) = self.transition.as_deref() {
                    if t.can_accept_more_input() {
                        return true;
                    }
                }
                self.accepts_more || !self.acceptor.edges(self.current_state).is_empty()
            }
        }
    }

    /// Strings that could legally extend the text from this position, used
    /// to seed the prefix-index sweep when building a mask. `alphabet` is
    /// the set of first characters appearing in the vocabulary.
    pub(crate) fn valid_continuations(&self, alphabet: &[char], depth: usize) -> Vec<String> {
        if depth > MAX_CONTINUATION_DEPTH {
            return Vec::new();
        }
        match &self.acceptor.kind {
            Kind::Phrase(text) => {
                let rest = &text[self.consumed.min(text.len())..];
                if rest.is_empty() {
                    Vec::new()
                } else {
                    vec![rest.to_string()]
                }
            }
            Kind::Chars { class, limit, .. } => {
                if *limit > 0 && self.consumed >= *limit {
                    return Vec::new();
                }
                alphabet
                    .iter()
                    .filter(|c| class.allows(**c, self.acceptor.is_case_sensitive))
                    .map(|c| c.to_string())
                    .collect()
            }
            Kind::WaitFor { .. } | Kind::Graph | Kind::JsonValue => {
                match self.transition.as_deref() {
                    Some(t) => {
                        let mut out = t.valid_continuations(alphabet, depth + 1);
                        if t.accepted {
                            // the sub-value could also conclude here; offer
                            // whatever the next edges want
                            for w in self.acceptor.branch_walker(self, None) {
                                out.extend(w.valid_continuations(alphabet, depth + 1));
                            }
                        }
                        out
                    }
                    None => self
                        .acceptor
                        .branch_walker(self, None)
                        .iter()
                        .flat_map(|w| w.valid_continuations(alphabet, depth + 1))
                        .collect(),
                }
            }
        }
    }
}

impl PartialEq for Walker {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.acceptor, &other.acceptor)
            && self.current_state == other.current_state
            && self.target_state == other.target_state
            && self.transition == other.transition
            && self.raw_value() == other.raw_value()
    }
}

fn chars_eq(a: char, b: char, case_sensitive: bool) -> bool {
    if case_sensitive {
        a == b
    } else {
        a.eq_ignore_ascii_case(&b)
    }
}

/// Every overlapping character matches; one side is a prefix of the other.
fn prefix_compatible(rest: &str, token: &str, case_sensitive: bool) -> bool {
    rest.chars()
        .zip(token.chars())
        .all(|(a, b)| chars_eq(a, b, case_sensitive))
}
