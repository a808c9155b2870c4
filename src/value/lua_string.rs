use crate::lexer::TokenKind;

/// Immutable interned byte sequence. The lexer attaches `keyword` so a
/// reserved word is recognized without a second table lookup once it
/// has been interned once (spec §4.5).
pub struct LuaString {
    pub bytes: Box<[u8]>,
    pub hash: u64,
    pub keyword: Option<TokenKind>,
}

impl LuaString {
    pub fn new(bytes: Vec<u8>, hash: u64) -> Self {
        LuaString {
            bytes: bytes.into_boxed_slice(),
            hash,
            keyword: None,
        }
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes).unwrap_or("<invalid utf8>")
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
