//=====================================================
// File: tokenizer/tables.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Per-level classification tables
// Objective: Keyword, type-keyword and phrase lookups for each syntax level
//=====================================================

use std::collections::HashMap;

use once_cell::sync::Lazy;

use super::token::{SyntaxLevel, TokenKind};

static MEDIUM_KEYWORDS: Lazy<HashMap<&'static str, TokenKind>> = Lazy::new(|| {
    let mut keywords = HashMap::new();
    keywords.insert("var", TokenKind::Var);
    keywords.insert("let", TokenKind::Let);
    keywords.insert("const", TokenKind::Const);
    keywords.insert("function", TokenKind::Function);
    keywords.insert("class", TokenKind::Class);
    keywords.insert("struct", TokenKind::Class);
    keywords.insert("interface", TokenKind::Interface);
    keywords.insert("enum", TokenKind::Enum);
    keywords.insert("module", TokenKind::Module);
    keywords.insert("namespace", TokenKind::Module);
    keywords.insert("if", TokenKind::If);
    keywords.insert("else", TokenKind::Else);
    keywords.insert("while", TokenKind::While);
    keywords.insert("do", TokenKind::Do);
    keywords.insert("for", TokenKind::For);
    keywords.insert("foreach", TokenKind::Foreach);
    keywords.insert("in", TokenKind::In);
    keywords.insert("switch", TokenKind::Switch);
    keywords.insert("match", TokenKind::Match);
    keywords.insert("case", TokenKind::Case);
    keywords.insert("default", TokenKind::Default);
    keywords.insert("try", TokenKind::Try);
    keywords.insert("catch", TokenKind::Catch);
    keywords.insert("finally", TokenKind::Finally);
    keywords.insert("throw", TokenKind::Throw);
    keywords.insert("return", TokenKind::Return);
    keywords.insert("break", TokenKind::Break);
    keywords.insert("continue", TokenKind::Continue);
    keywords.insert("new", TokenKind::New);
    keywords.insert("this", TokenKind::This);
    keywords.insert("base", TokenKind::Base);
    keywords.insert("is", TokenKind::Is);
    keywords.insert("as", TokenKind::As);
    keywords.insert("where", TokenKind::Where);
    keywords.insert("when", TokenKind::When);
    keywords.insert("params", TokenKind::Params);
    keywords.insert("static", TokenKind::Static);
    keywords.insert("abstract", TokenKind::Abstract);
    keywords.insert("virtual", TokenKind::Virtual);
    keywords.insert("override", TokenKind::Override);
    keywords.insert("public", TokenKind::Public);
    keywords.insert("private", TokenKind::Private);
    keywords.insert("protected", TokenKind::Protected);
    keywords.insert("readonly", TokenKind::Readonly);
    keywords.insert("async", TokenKind::Async);
    keywords.insert("await", TokenKind::Await);
    keywords.insert("operator", TokenKind::Operator);
    keywords.insert("repeat", TokenKind::Repeat);
    keywords.insert("times", TokenKind::Times);
    keywords.insert("iterate", TokenKind::Iterate);
    keywords.insert("forever", TokenKind::Forever);
    keywords.insert("parallel", TokenKind::Parallel);
    keywords.insert("true", TokenKind::True);
    keywords.insert("false", TokenKind::False);
    keywords.insert("null", TokenKind::Null);
    keywords
});

static LOW_KEYWORDS: Lazy<HashMap<&'static str, TokenKind>> = Lazy::new(|| {
    let mut keywords = HashMap::new();
    keywords.insert("fn", TokenKind::Fn);
    keywords.insert("mut", TokenKind::Mut);
    keywords
});

static HIGH_KEYWORDS: Lazy<HashMap<&'static str, TokenKind>> = Lazy::new(|| {
    let mut keywords = HashMap::new();
    keywords.insert("set", TokenKind::Set);
    keywords.insert("to", TokenKind::To);
    keywords.insert("display", TokenKind::Display);
    keywords.insert("then", TokenKind::Then);
    keywords.insert("otherwise", TokenKind::Otherwise);
    keywords.insert("end", TokenKind::End);
    keywords
});

/// Type keywords and the canonical type each one names.
static TYPE_KEYWORDS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("int", "int"),
        ("long", "int"),
        ("short", "int"),
        ("byte", "int"),
        ("double", "double"),
        ("float", "double"),
        ("decimal", "decimal"),
        ("string", "string"),
        ("char", "char"),
        ("bool", "bool"),
        ("void", "void"),
        ("object", "object"),
    ])
});

static LOW_TYPE_KEYWORDS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("i8", "int"),
        ("i16", "int"),
        ("i32", "int"),
        ("i64", "int"),
        ("u8", "int"),
        ("u16", "int"),
        ("u32", "int"),
        ("u64", "int"),
        ("usize", "int"),
        ("f32", "double"),
        ("f64", "double"),
    ])
});

/// Multi-word operators of the natural-language level, longest first.
pub static HIGH_PHRASES: Lazy<Vec<(Vec<&'static str>, TokenKind)>> = Lazy::new(|| {
    let mut phrases = vec![
        (vec!["is", "greater", "than", "or", "equal", "to"], TokenKind::GreaterEqual),
        (vec!["is", "less", "than", "or", "equal", "to"], TokenKind::LessEqual),
        (vec!["is", "not", "equal", "to"], TokenKind::NotEqual),
        (vec!["is", "greater", "than"], TokenKind::Greater),
        (vec!["is", "less", "than"], TokenKind::Less),
        (vec!["is", "equal", "to"], TokenKind::EqualEqual),
        (vec!["multiplied", "by"], TokenKind::Star),
        (vec!["divided", "by"], TokenKind::Slash),
        (vec!["equals"], TokenKind::EqualEqual),
        (vec!["plus"], TokenKind::Plus),
        (vec!["minus"], TokenKind::Minus),
        (vec!["modulo"], TokenKind::Percent),
        (vec!["and"], TokenKind::AndAnd),
        (vec!["or"], TokenKind::OrOr),
        (vec!["not"], TokenKind::Bang),
    ];
    phrases.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    phrases
});

/// Classifies a word for `level`; `None` means it is an identifier.
pub fn classify_word(level: SyntaxLevel, word: &str) -> Option<TokenKind> {
    if level == SyntaxLevel::High {
        if let Some(kind) = HIGH_KEYWORDS.get(word) {
            return Some(kind.clone());
        }
    }
    if level == SyntaxLevel::Low {
        if let Some(kind) = LOW_KEYWORDS.get(word) {
            return Some(kind.clone());
        }
        if let Some(name) = LOW_TYPE_KEYWORDS.get(word) {
            return Some(TokenKind::PrimitiveType((*name).to_string()));
        }
    }
    if let Some(name) = TYPE_KEYWORDS.get(word) {
        return Some(TokenKind::PrimitiveType((*name).to_string()));
    }
    MEDIUM_KEYWORDS.get(word).cloned()
}

pub fn level_from_marker(name: &str) -> Option<SyntaxLevel> {
    match name {
        "high" => Some(SyntaxLevel::High),
        "medium" => Some(SyntaxLevel::Medium),
        "low" => Some(SyntaxLevel::Low),
        "asm" => Some(SyntaxLevel::Asm),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_level_adds_fn_and_sized_types() {
        assert_eq!(classify_word(SyntaxLevel::Low, "fn"), Some(TokenKind::Fn));
        assert_eq!(classify_word(SyntaxLevel::Medium, "fn"), None);
        assert_eq!(
            classify_word(SyntaxLevel::Low, "i32"),
            Some(TokenKind::PrimitiveType("int".into()))
        );
    }

    #[test]
    fn high_keywords_only_in_high_level() {
        assert_eq!(classify_word(SyntaxLevel::High, "display"), Some(TokenKind::Display));
        assert_eq!(classify_word(SyntaxLevel::Medium, "display"), None);
    }

    #[test]
    fn phrases_are_longest_first() {
        let lengths: Vec<usize> = HIGH_PHRASES.iter().map(|(words, _)| words.len()).collect();
        assert!(lengths.windows(2).all(|pair| pair[0] >= pair[1]));
    }
}
