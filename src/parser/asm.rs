//=============================================
// strata/parser/asm.rs
//=============================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Inline assembly parsing
// Objective: Split `@asm` regions into labelled instruction lines
//=============================================

use super::{ParseResult, Parser};
use crate::ast::{AsmBlock, AsmLine, AsmOperand, Stmt, StmtKind};
use crate::tokenizer::{Position, SyntaxLevel, TokenKind};

impl Parser {
    /// Assembly region after its marker: a braced block, or the remaining
    /// lines up to the next marker or closing brace.
    pub(super) fn parse_asm_block(&mut self, level: SyntaxLevel, position: Position) -> ParseResult<Stmt> {
        let braced = self.match_token(&TokenKind::LeftBrace);
        let mut lines = Vec::new();
        loop {
            while self.match_token(&TokenKind::Newline) {}
            match self.peek().kind {
                TokenKind::Eof | TokenKind::LevelMarker(_) => break,
                TokenKind::RightBrace => {
                    if braced {
                        self.advance();
                    }
                    break;
                }
                _ => {}
            }
            if let Some(line) = self.parse_asm_line(level)? {
                lines.push(line);
            }
        }
        Ok(Stmt {
            kind: StmtKind::Asm(AsmBlock { level, lines }),
            position,
        })
    }

    fn at_asm_line_end(&self) -> bool {
        matches!(
            self.peek().kind,
            TokenKind::Newline | TokenKind::RightBrace | TokenKind::Eof | TokenKind::LevelMarker(_)
        )
    }

    fn parse_asm_line(&mut self, level: SyntaxLevel) -> ParseResult<Option<AsmLine>> {
        let position = self.current_position();
        let mut label = None;
        if let TokenKind::AsmText(word) = &self.peek().kind {
            if self.check_at(1, &TokenKind::Colon) {
                label = Some(word.clone());
                self.advance();
                self.advance();
            }
        }
        let mut mnemonic = None;
        let mut operands = Vec::new();
        if !self.at_asm_line_end() {
            if self.check(&TokenKind::Semicolon) {
                self.skip_asm_comment();
            } else if let TokenKind::AsmText(word) = &self.peek().kind {
                mnemonic = Some(word.clone());
                self.advance();
            } else if level == SyntaxLevel::Asm {
                return Err(self.error_here("assembly mnemonic"));
            }
        }
        while !self.at_asm_line_end() {
            let token = self.advance().clone();
            let operand = match token.kind {
                TokenKind::Comma => continue,
                TokenKind::Semicolon => {
                    self.skip_asm_comment();
                    break;
                }
                TokenKind::Number(number) => AsmOperand::Number(number.value),
                TokenKind::Minus => match self.peek().kind {
                    TokenKind::Number(number) => {
                        self.advance();
                        AsmOperand::Number(-number.value)
                    }
                    _ => AsmOperand::Name(token.lexeme),
                },
                TokenKind::Str(text) => AsmOperand::Str(text),
                TokenKind::AsmText(word) => AsmOperand::Name(word),
                _ if level == SyntaxLevel::AsmSpirv => AsmOperand::Name(token.lexeme),
                _ => {
                    return Err(super::ParseError::new(
                        token.lexeme,
                        "assembly operand",
                        token.position,
                    ));
                }
            };
            operands.push(operand);
        }
        if label.is_none() && mnemonic.is_none() && operands.is_empty() {
            return Ok(None);
        }
        Ok(Some(AsmLine {
            label,
            mnemonic,
            operands,
            position,
        }))
    }

    /// `;` starts a comment running to the end of the line.
    fn skip_asm_comment(&mut self) {
        while !self.at_asm_line_end() {
            self.advance();
        }
    }
}
