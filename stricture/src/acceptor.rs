use std::collections::VecDeque;
use std::sync::{Arc, OnceLock};

use anyhow::{bail, ensure, Result};
use fxhash::{FxHashMap, FxHashSet};
use log::debug;

use crate::engine::GrammarError;
use crate::walker::Walker;

/// Graph vertex. `Done` is the designated terminal; a walker whose current
/// state lands on it (or on any listed end state) has produced a complete
/// value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum State {
    Id(u32),
    Done,
}

/// Labeled graph edge: consuming text accepted by `acceptor` moves the
/// walker to `target`.
#[derive(Debug, Clone)]
pub struct Edge {
    pub acceptor: Arc<Acceptor>,
    pub target: State,
}

impl Edge {
    pub fn new(acceptor: impl Into<Arc<Acceptor>>, target: State) -> Self {
        Edge {
            acceptor: acceptor.into(),
            target,
        }
    }
}

/// Character-class membership test for `Kind::Chars`.
#[derive(Debug, Clone)]
pub(crate) struct CharClass {
    chars: Vec<char>,
    negated: bool,
}

impl CharClass {
    fn new(set: &str, negated: bool) -> Self {
        CharClass {
            chars: set.chars().collect(),
            negated,
        }
    }

    pub(crate) fn allows(&self, c: char, case_sensitive: bool) -> bool {
        let hit = if case_sensitive {
            self.chars.contains(&c)
        } else {
            self.chars.iter().any(|k| k.eq_ignore_ascii_case(&c))
        };
        hit != self.negated
    }

    fn is_satisfiable(&self) -> bool {
        self.negated || !self.chars.is_empty()
    }
}

/// Closed set of fragment behaviors. Composite grammars are `Graph`; the
/// leaves consume text directly; `JsonValue` expands its edges lazily so the
/// recursive JSON grammar stays finite to construct.
#[derive(Debug)]
pub(crate) enum Kind {
    Graph,
    Phrase(String),
    Chars {
        class: CharClass,
        min: usize,
        limit: usize,
    },
    WaitFor {
        trigger: Arc<Acceptor>,
    },
    JsonValue,
}

/// Immutable grammar fragment. Construction-time data only; all traversal
/// state lives in walkers, so one acceptor serves any number of concurrent
/// cursors.
#[derive(Debug)]
pub struct Acceptor {
    pub(crate) kind: Kind,
    pub(crate) graph: FxHashMap<State, Vec<Edge>>,
    pub(crate) start_state: State,
    pub(crate) end_states: Vec<State>,
    pub(crate) is_optional: bool,
    pub(crate) is_case_sensitive: bool,
    pub(crate) lazy_edges: OnceLock<Vec<Edge>>,
}

impl Acceptor {
    fn leaf(kind: Kind) -> Self {
        Acceptor {
            kind,
            graph: FxHashMap::default(),
            start_state: State::Id(0),
            end_states: vec![State::Done],
            is_optional: false,
            is_case_sensitive: true,
            lazy_edges: OnceLock::new(),
        }
    }

    /// Fixed literal text.
    pub fn phrase(text: &str) -> Self {
        Self::leaf(Kind::Phrase(text.to_string()))
    }

    /// One or more characters drawn from `set`.
    pub fn chars(set: &str) -> Self {
        Self::chars_bounded(set, 1, 0)
    }

    /// A run of characters from `set`, at least `min` long and, when
    /// `limit` is nonzero, at most `limit`. A zero `min` makes the run
    /// optional.
    pub fn chars_bounded(set: &str, min: usize, limit: usize) -> Self {
        let mut a = Self::leaf(Kind::Chars {
            class: CharClass::new(set, false),
            min,
            limit,
        });
        a.is_optional = min == 0;
        a
    }

    /// One or more characters *not* in `set`.
    pub fn not_chars(set: &str) -> Self {
        Self::leaf(Kind::Chars {
            class: CharClass::new(set, true),
            min: 1,
            limit: 0,
        })
    }

    /// Accept arbitrary text until `trigger` starts matching, then require
    /// the trigger to complete.
    pub fn wait_for(trigger: impl Into<Arc<Acceptor>>) -> Self {
        Self::leaf(Kind::WaitFor {
            trigger: trigger.into(),
        })
    }

    /// Composite grammar from an explicit state graph.
    pub fn compose(
        graph: impl IntoIterator<Item = (State, Vec<Edge>)>,
        end_states: Vec<State>,
    ) -> Self {
        Acceptor {
            kind: Kind::Graph,
            graph: graph.into_iter().collect(),
            start_state: State::Id(0),
            end_states,
            is_optional: false,
            is_case_sensitive: true,
            lazy_edges: OnceLock::new(),
        }
    }

    pub(crate) fn lazy_json_value() -> Self {
        let mut a = Self::leaf(Kind::JsonValue);
        a.end_states = vec![State::Done];
        a
    }

    pub fn optional(mut self) -> Self {
        self.is_optional = true;
        self
    }

    pub fn case_insensitive(mut self) -> Self {
        self.is_case_sensitive = false;
        self
    }

    pub fn start_state(&self) -> State {
        self.start_state
    }

    pub(crate) fn is_end(&self, state: State) -> bool {
        state == State::Done || self.end_states.contains(&state)
    }

    pub(crate) fn edges(&self, state: State) -> &[Edge] {
        match self.kind {
            Kind::JsonValue if state == self.start_state => {
                self.lazy_edges.get_or_init(crate::json::value_edges)
            }
            _ => self
                .graph
                .get(&state)
                .map(|v| v.as_slice())
                .unwrap_or(&[]),
        }
    }

    /// Reject unsatisfiable grammars before any token is processed: every
    /// reachable non-accepting state needs an outgoing edge, recursively
    /// through sub-acceptors.
    pub fn validate(self: &Arc<Self>) -> Result<()> {
        let mut seen = FxHashSet::default();
        self.validate_inner(&mut seen)
    }

    fn validate_inner(&self, seen: &mut FxHashSet<usize>) -> Result<()> {
        if !seen.insert(self as *const Self as usize) {
            return Ok(());
        }
        match &self.kind {
            Kind::Phrase(text) => {
                ensure!(!text.is_empty(), GrammarError::new("empty phrase"));
            }
            Kind::Chars { class, min, limit } => {
                ensure!(
                    class.is_satisfiable(),
                    GrammarError::new("empty character class")
                );
                ensure!(
                    *limit == 0 || limit >= min,
                    GrammarError::new("character run limit below its minimum")
                );
            }
            Kind::WaitFor { trigger } => trigger.validate_inner(seen)?,
            // built-in edge set, known well-formed
            Kind::JsonValue => {}
            Kind::Graph => {
                let mut visited = FxHashSet::default();
                let mut stack = vec![self.start_state];
                visited.insert(self.start_state);
                while let Some(state) = stack.pop() {
                    let edges = self.edges(state);
                    if edges.is_empty() && !self.is_end(state) {
                        bail!(GrammarError::new(format!(
                            "state {state:?} has no outgoing edges and does not accept"
                        )));
                    }
                    for edge in edges {
                        edge.acceptor.validate_inner(seen)?;
                        if visited.insert(edge.target) {
                            stack.push(edge.target);
                        }
                    }
                }
                ensure!(
                    visited.iter().any(|s| self.is_end(*s)),
                    GrammarError::new("no accepting state is reachable")
                );
            }
        }
        Ok(())
    }

    /// Initial walker population for this acceptor, pre-branched into every
    /// edge leaving the start state.
    pub fn walkers(self: &Arc<Self>, state: Option<State>) -> Vec<Walker> {
        let walker = Walker::new(self.clone(), state);
        match &self.kind {
            Kind::Phrase(_) | Kind::Chars { .. } => vec![walker],
            Kind::WaitFor { .. } => self.branch_walker(&walker, None),
            Kind::Graph | Kind::JsonValue => {
                if self.edges(walker.current_state).is_empty() {
                    vec![walker]
                } else {
                    self.branch_walker(&walker, None)
                }
            }
        }
    }

    /// Candidate transitions from the walker's current state: a fresh
    /// sub-walker per outgoing edge, plus the edges reachable by skipping
    /// optional fragments into later (non-accepting) states.
    pub(crate) fn transitions(&self, walker: &Walker) -> Vec<(Walker, State, State)> {
        if let Kind::WaitFor { trigger } = &self.kind {
            return trigger
                .walkers(None)
                .into_iter()
                .map(|tw| (tw, walker.current_state, State::Done))
                .collect();
        }
        let mut out = Vec::new();
        let mut visited = FxHashSet::default();
        self.collect_transitions(walker, walker.current_state, &mut visited, &mut out);
        out
    }

    fn collect_transitions(
        &self,
        walker: &Walker,
        state: State,
        visited: &mut FxHashSet<State>,
        out: &mut Vec<(Walker, State, State)>,
    ) {
        // optional edges must not form a cycle; fail closed if they do
        if !visited.insert(state) {
            return;
        }
        for edge in self.edges(state) {
            for tw in edge.acceptor.walkers(None) {
                out.push((tw, state, edge.target));
            }
            if edge.acceptor.is_optional
                && !self.is_end(edge.target)
                && walker.can_accept_more_input()
            {
                self.collect_transitions(walker, edge.target, visited, out);
            }
        }
    }

    /// Split a walker into one successor per viable transition. With a token
    /// in hand, transitions that could not consume it are dropped, except
    /// that an optional edge into an accepting state yields an accepted
    /// walker carrying the token as unconsumed input.
    pub(crate) fn branch_walker(&self, walker: &Walker, token: Option<&str>) -> Vec<Walker> {
        let input: Option<String> = token
            .map(str::to_string)
            .or_else(|| walker.remaining_input.clone());
        let mut out = Vec::new();
        for (tw, source, target) in self.transitions(walker) {
            if let Some(tok) = input.as_deref() {
                if !tw.should_start_transition(tok) {
                    if tw.acceptor.is_optional && self.is_end(target) {
                        let mut through = walker.clone();
                        match through.transition.take() {
                            Some(t) if t.accepted => {
                                let mut done = *t;
                                done.remaining_input = None;
                                through.history.push(done);
                            }
                            Some(_) => continue,
                            None => {}
                        }
                        through.current_state = target;
                        through.target_state = None;
                        through.remaining_input = Some(tok.to_string());
                        through.accepted = true;
                        out.push(through);
                    }
                    continue;
                }
            }
            if let Some(next) = walker.start_transition(tw, source, target) {
                out.push(next);
            }
        }
        out
    }

    /// Drive `walker` through this graph with `token`, yielding every
    /// distinct successor. Successors left holding unconsumed input are the
    /// raw material for token healing upstream.
    pub(crate) fn advance(&self, walker: &Walker, token: &str) -> Vec<Walker> {
        let mut results: Vec<Walker> = Vec::new();
        let mut queue: VecDeque<(Walker, String)> = VecDeque::new();
        queue.push_back((walker.clone(), token.to_string()));

        while let Some((cur, tok)) = queue.pop_front() {
            if cur.transition.is_none() {
                let mut branched = false;
                for next in self.branch_walker(&cur, Some(&tok)) {
                    branched = true;
                    if next.accepted && next.remaining_input.is_some() {
                        push_unique(&mut results, next);
                    } else {
                        queue.push_back((next, tok.clone()));
                    }
                }
                if !branched && cur.remaining_input.is_some() {
                    push_unique(&mut results, cur);
                }
                continue;
            }

            if !cur.should_start_transition(&tok) {
                debug!(
                    "walker at {:?} blocked on {:?}",
                    cur.current_state, tok
                );
                let mut recovered = false;
                if let Some(t) = cur.transition.as_deref() {
                    if t.can_accept_more_input() {
                        for tb in t.branch(None) {
                            if tb.should_start_transition(&tok) {
                                let mut nw = cur.clone();
                                nw.transition = Some(Box::new(tb));
                                queue.push_back((nw, tok.clone()));
                                recovered = true;
                            }
                        }
                    }
                }
                if !recovered {
                    let transition_accepted =
                        cur.transition.as_deref().map_or(false, |t| t.accepted);
                    if transition_accepted {
                        let mut rebranched = false;
                        for next in self.branch_walker(&cur, Some(&tok)) {
                            rebranched = true;
                            if next.accepted && next.remaining_input.is_some() {
                                push_unique(&mut results, next);
                            } else {
                                queue.push_back((next, tok.clone()));
                            }
                        }
                        if !rebranched && cur.remaining_input.is_some() {
                            push_unique(&mut results, cur);
                        }
                    } else if cur.remaining_input.is_some() {
                        push_unique(&mut results, cur);
                    }
                }
                continue;
            }

            let Some(transition) = cur.transition.as_deref() else {
                continue;
            };
            for sub in transition.consume_token(&tok) {
                if let Some(next) = cur.complete_transition(sub) {
                    match next.remaining_input.clone() {
                        Some(rem) => queue.push_back((next, rem)),
                        None => push_unique(&mut results, next),
                    }
                }
            }
        }
        results
    }
}

fn push_unique(results: &mut Vec<Walker>, walker: Walker) {
    if !results.contains(&walker) {
        results.push(walker);
    }
}
