use crate::TokenId;

/// Bitmask over the vocabulary. Disallowed tokens get their logit pushed to
/// negative infinity, so sampling can never pick them.
#[derive(Clone)]
pub struct TokenSet {
    data: Vec<u64>,
    size: usize,
}

const BITS: usize = 64;

impl TokenSet {
    pub fn new(size: usize) -> Self {
        TokenSet {
            data: vec![0; (size + BITS - 1) / BITS],
            size,
        }
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn allow(&mut self, tok: TokenId) {
        let tok = tok as usize;
        if tok < self.size {
            self.data[tok / BITS] |= 1 << (tok % BITS);
        }
    }

    pub fn disallow(&mut self, tok: TokenId) {
        let tok = tok as usize;
        if tok < self.size {
            self.data[tok / BITS] &= !(1 << (tok % BITS));
        }
    }

    pub fn is_allowed(&self, tok: TokenId) -> bool {
        let tok = tok as usize;
        tok < self.size && (self.data[tok / BITS] >> (tok % BITS)) & 1 == 1
    }

    pub fn set_all(&mut self, allowed: bool) {
        let val = if allowed { !0 } else { 0 };
        for v in self.data.iter_mut() {
            *v = val;
        }
        if allowed {
            self.clear_excessive_bits();
        }
    }

    fn clear_excessive_bits(&mut self) {
        for i in self.size..self.data.len() * BITS {
            self.data[i / BITS] &= !(1 << (i % BITS));
        }
    }

    pub fn num_allowed(&self) -> usize {
        self.data.iter().map(|v| v.count_ones() as usize).sum()
    }

    pub fn iter_allowed(&self) -> impl Iterator<Item = TokenId> + '_ {
        (0..self.size as TokenId).filter(move |&t| self.is_allowed(t))
    }

    /// Apply the mask to a logits slice; entries beyond `len()` are left
    /// untouched.
    pub fn apply(&self, logits: &mut [f32]) {
        for (tok, logit) in logits.iter_mut().enumerate().take(self.size) {
            if (self.data[tok / BITS] >> (tok % BITS)) & 1 == 0 {
                *logit = f32::NEG_INFINITY;
            }
        }
    }
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "TokenSet({}/{})",
            self.num_allowed(),
            self.size
        )
    }
}
