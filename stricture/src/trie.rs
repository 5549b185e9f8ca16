use crate::{mask::TokenSet, TokenId};

/// Byte-trie over the vocabulary, built once per session. Answers the
/// prefix-structure questions the engine needs at every step: exact lookup,
/// longest vocabulary token that is a prefix of a string, and the set of
/// tokens compatible with a continuation.
pub struct PrefixIndex {
    nodes: Vec<Node>,
}

struct Node {
    token: Option<TokenId>,
    // sorted by byte so lookup is a binary search
    children: Vec<(u8, u32)>,
}

impl Node {
    fn new() -> Self {
        Node {
            token: None,
            children: Vec::new(),
        }
    }

    fn child(&self, byte: u8) -> Option<u32> {
        self.children
            .binary_search_by_key(&byte, |&(b, _)| b)
            .ok()
            .map(|i| self.children[i].1)
    }
}

impl PrefixIndex {
    pub fn new<'a>(tokens: impl IntoIterator<Item = (&'a str, TokenId)>) -> Self {
        let mut idx = PrefixIndex {
            nodes: vec![Node::new()],
        };
        for (text, id) in tokens {
            if !text.is_empty() {
                idx.insert(text.as_bytes(), id);
            }
        }
        idx
    }

    fn insert(&mut self, bytes: &[u8], id: TokenId) {
        let mut cur = 0usize;
        for &b in bytes {
            cur = match self.nodes[cur].child(b) {
                Some(n) => n as usize,
                None => {
                    let n = self.nodes.len() as u32;
                    self.nodes.push(Node::new());
                    let node = &mut self.nodes[cur];
                    let pos = node
                        .children
                        .binary_search_by_key(&b, |&(c, _)| c)
                        .unwrap_err();
                    node.children.insert(pos, (b, n));
                    n as usize
                }
            };
        }
        // first writer wins; duplicate texts keep the lowest-numbered id the
        // caller fed in first
        if self.nodes[cur].token.is_none() {
            self.nodes[cur].token = Some(id);
        }
    }

    fn find(&self, bytes: &[u8]) -> Option<usize> {
        let mut cur = 0usize;
        for &b in bytes {
            cur = self.nodes[cur].child(b)? as usize;
        }
        Some(cur)
    }

    /// Exact vocabulary lookup.
    pub fn token_id(&self, text: &str) -> Option<TokenId> {
        self.find(text.as_bytes()).and_then(|n| self.nodes[n].token)
    }

    /// Is `text` a prefix of at least one vocabulary token?
    pub fn has_prefix(&self, text: &str) -> bool {
        self.find(text.as_bytes()).is_some()
    }

    /// Longest vocabulary token that is a prefix of `text`, with its byte
    /// length.
    pub fn longest_token_prefix(&self, text: &str) -> Option<(TokenId, usize)> {
        let mut cur = 0usize;
        let mut best = None;
        for (i, &b) in text.as_bytes().iter().enumerate() {
            cur = match self.nodes[cur].child(b) {
                Some(n) => n as usize,
                None => break,
            };
            if let Some(id) = self.nodes[cur].token {
                best = Some((id, i + 1));
            }
        }
        best
    }

    /// Longest vocabulary token that has `text` as a prefix, with its byte
    /// length. Depth-first over the subtree rooted at `text`.
    pub fn longest_token_with_prefix(&self, text: &str) -> Option<(TokenId, usize)> {
        let root = self.find(text.as_bytes())?;
        let mut best: Option<(TokenId, usize)> = None;
        let mut stack = vec![(root, text.len())];
        while let Some((n, depth)) = stack.pop() {
            if let Some(id) = self.nodes[n].token {
                if best.map_or(true, |(_, d)| depth > d) {
                    best = Some((id, depth));
                }
            }
            for &(_, c) in &self.nodes[n].children {
                stack.push((c as usize, depth + 1));
            }
        }
        best
    }

    /// Mark every vocabulary token that is a prefix of `text` (including
    /// `text` itself) into `set`. Commit consumes such a token whole, so
    /// these are always safe to allow.
    pub fn allow_prefixes_of(&self, text: &str, set: &mut TokenSet) {
        let mut cur = 0usize;
        for &b in text.as_bytes() {
            cur = match self.nodes[cur].child(b) {
                Some(n) => n as usize,
                None => return,
            };
            if let Some(id) = self.nodes[cur].token {
                set.allow(id);
            }
        }
    }

    /// Mark every vocabulary token that strictly extends `text` into `set`.
    /// Such a token outruns the continuation; whether commit accepts it
    /// depends on the grammar and the heal check, so callers must validate
    /// these before allowing them.
    pub fn tokens_extending(&self, text: &str, set: &mut TokenSet) {
        let Some(root) = self.find(text.as_bytes()) else {
            return;
        };
        let mut stack: Vec<usize> = self.nodes[root]
            .children
            .iter()
            .map(|&(_, c)| c as usize)
            .collect();
        while let Some(n) = stack.pop() {
            if let Some(id) = self.nodes[n].token {
                set.allow(id);
            }
            stack.extend(self.nodes[n].children.iter().map(|&(_, c)| c as usize));
        }
    }
}
