/// Tri-color mark used by the collector. Every collectable object is
/// exactly one of these at any instant (invariant I2 in spec: no
/// object is simultaneously white and black).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    White,
    Gray,
    Black,
}

/// Header every collectable payload carries. `fixed` objects (interned
/// keywords, the pre-allocated out-of-memory string) are never swept.
#[derive(Debug, Clone, Copy)]
pub struct GcHeader {
    pub color: Color,
    pub fixed: bool,
}

impl GcHeader {
    pub fn new() -> Self {
        GcHeader {
            color: Color::White,
            fixed: false,
        }
    }

    pub fn fixed() -> Self {
        GcHeader {
            color: Color::White,
            fixed: true,
        }
    }
}

impl Default for GcHeader {
    fn default() -> Self {
        Self::new()
    }
}
