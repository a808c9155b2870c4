use crate::lexer::{Lexer, TokenKind};

fn kinds(source: &str) -> Vec<TokenKind> {
    let mut lexer = Lexer::new(source, "test");
    let mut out = Vec::new();
    loop {
        let tok = lexer.next_token().unwrap();
        let eof = tok.kind == TokenKind::Eof;
        out.push(tok.kind);
        if eof {
            break;
        }
    }
    out
}

#[test]
fn keywords_and_names_are_distinguished() {
    let k = kinds("local x = nil");
    assert_eq!(
        k,
        vec![
            TokenKind::Local,
            TokenKind::Name,
            TokenKind::Assign,
            TokenKind::Nil,
            TokenKind::Eof,
        ]
    );
}

#[test]
fn longest_match_wins_on_operators() {
    // `~=` must not lex as two separate tokens, and `..` must not
    // swallow into `...` unless a third dot is actually present.
    let k = kinds("a ~= b..c");
    assert_eq!(
        k,
        vec![
            TokenKind::Name,
            TokenKind::Ne,
            TokenKind::Name,
            TokenKind::Concat,
            TokenKind::Name,
            TokenKind::Eof,
        ]
    );
    assert_eq!(kinds("..."), vec![TokenKind::Ellipsis, TokenKind::Eof]);
}

#[test]
fn number_literals_carry_their_value() {
    let mut lexer = Lexer::new("3.5 0x1A 10", "test");
    let a = lexer.next_token().unwrap();
    assert_eq!(a.kind, TokenKind::Number);
    assert_eq!(a.number, 3.5);
    let b = lexer.next_token().unwrap();
    assert_eq!(b.kind, TokenKind::Number);
    assert_eq!(b.number, 26.0);
    let c = lexer.next_token().unwrap();
    assert_eq!(c.kind, TokenKind::Number);
    assert_eq!(c.number, 10.0);
}

#[test]
fn short_string_escapes_decode() {
    let mut lexer = Lexer::new(r#""a\tb\n""#, "test");
    let tok = lexer.next_token().unwrap();
    assert_eq!(tok.kind, TokenKind::String);
    assert_eq!(tok.text, "a\tb\n");
}

#[test]
fn long_bracket_strings_skip_escapes() {
    let mut lexer = Lexer::new("[[a\\tb]]", "test");
    let tok = lexer.next_token().unwrap();
    assert_eq!(tok.kind, TokenKind::String);
    assert_eq!(tok.text, "a\\tb");
}

#[test]
fn comments_are_skipped_and_lines_tracked() {
    let mut lexer = Lexer::new("-- comment\nlocal", "test");
    let tok = lexer.next_token().unwrap();
    assert_eq!(tok.kind, TokenKind::Local);
    assert_eq!(tok.line, 2);
}

#[test]
fn unterminated_string_is_a_lex_error() {
    let mut lexer = Lexer::new("\"unterminated", "test");
    assert!(lexer.next_token().is_err());
}
