use parley_types::is_chunk_boundary;

/// Coalesces partial tokens into speakable fragments.
///
/// Tokens are buffered until one ends on a word or sentence boundary, at
/// which point the whole buffer is released as a single fragment. A fragment
/// therefore never ends in the middle of a word. Buffers holding only
/// whitespace are kept until real text arrives.
#[derive(Debug, Default)]
pub struct FragmentAssembler {
    buffer: String,
}

impl FragmentAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one token and returns a fragment if the token closed one.
    pub fn push(&mut self, token: &str) -> Option<String> {
        self.buffer.push_str(token);

        let closes = token.chars().next_back().is_some_and(is_chunk_boundary);
        if closes && !self.buffer.trim().is_empty() {
            Some(std::mem::take(&mut self.buffer))
        } else {
            None
        }
    }

    /// Releases whatever is left once the token stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        (!rest.trim().is_empty()).then_some(rest)
    }

    /// Drops buffered text without emitting it.
    pub fn discard(&mut self) {
        self.buffer.clear();
    }
}

/// Runs a complete token sequence through a fresh assembler.
pub fn assemble<'a>(tokens: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut assembler = FragmentAssembler::new();
    let mut fragments: Vec<String> = tokens
        .into_iter()
        .filter_map(|token| assembler.push(token))
        .collect();
    fragments.extend(assembler.finish());
    fragments
}
