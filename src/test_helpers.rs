//! Test support: a miniature interpreted language
//!
//! A tiny statement language (`print(expr)`, `include(expr)`,
//! `def name expr`) with integer arithmetic, single-quoted strings and
//! variables from the context, enough to exercise segmentation, collapsing,
//! includes and entry points end to end without a real language engine.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::adapter::{LanguageAdapter, Program, ProgramInfo};
use crate::context::{ExecutionContext, SharedBuffer};
use crate::document::MemoryDocumentSource;
use crate::error::{
    ExecutionError, ExecutionErrorKind, ParsingError, ParsingErrorKind, StackFrame,
};
use crate::parser::ParsingContext;
use crate::registry::LanguageRegistry;
use crate::service::DocumentService;

const ENTRY_POINTS_ATTRIBUTE: &str = "script.entry_points";

/* ===================== Helpers ===================== */

pub fn registry_with_tags(tags: &[&str]) -> LanguageRegistry {
    let mut registry = LanguageRegistry::new();
    for tag in tags {
        registry.register(Arc::new(ScriptAdapter::with_tag(*tag, true)));
    }
    registry
}

/// A parsing context with `js` and `py` script adapters, `js` default, and
/// an in-memory document source for in-flow registration.
pub fn parsing_context() -> ParsingContext {
    ParsingContext::new(Arc::new(registry_with_tags(&["js", "py"])), "js")
        .with_document_source(MemoryDocumentSource::new("test"))
}

pub fn parsing_context_with_adapter(thread_safe: bool) -> ParsingContext {
    let mut registry = LanguageRegistry::new();
    registry.register(Arc::new(ScriptAdapter::with_tag("js", thread_safe)));
    ParsingContext::new(Arc::new(registry), "js")
}

pub fn buffer_context(buffer: &SharedBuffer) -> ExecutionContext {
    ExecutionContext::with_writers(Box::new(buffer.clone()), Box::new(buffer.clone()))
}

/* ===================== Adapter ===================== */

pub struct ScriptAdapter {
    tag: String,
    thread_safe: bool,
}

impl ScriptAdapter {
    pub fn with_tag(tag: impl Into<String>, thread_safe: bool) -> Self {
        Self {
            tag: tag.into(),
            thread_safe,
        }
    }
}

impl LanguageAdapter for ScriptAdapter {
    fn name(&self) -> &str {
        &self.tag
    }

    fn tags(&self) -> Vec<String> {
        vec![self.tag.clone()]
    }

    fn default_tag(&self) -> String {
        self.tag.clone()
    }

    fn extensions(&self) -> Vec<String> {
        vec![self.tag.clone()]
    }

    fn is_thread_safe(&self) -> bool {
        self.thread_safe
    }

    fn source_code_for_literal_output(&self, literal: &str) -> String {
        format!("print('{}');", escape(literal))
    }

    fn source_code_for_expression_output(&self, expression: &str) -> String {
        format!("print({});", expression.trim())
    }

    fn source_code_for_expression_include(&self, expression: &str) -> String {
        format!("include({});", expression.trim())
    }

    fn create_program(
        &self,
        source_code: String,
        info: &ProgramInfo<'_>,
    ) -> Result<Box<dyn Program>, ParsingError> {
        Ok(Box::new(ScriptProgram {
            source_code,
            document_name: info.document_name.to_string(),
        }))
    }

    fn enter(
        &self,
        entry_point: &str,
        context: &mut ExecutionContext,
        _args: &[JsonValue],
    ) -> Result<JsonValue, ExecutionError> {
        context
            .attribute(ENTRY_POINTS_ATTRIBUTE)
            .and_then(|attribute| attribute.downcast_ref::<HashMap<String, JsonValue>>())
            .and_then(|entry_points| entry_points.get(entry_point).cloned())
            .ok_or_else(|| ExecutionError::entry_point_not_found(entry_point))
    }
}

/* ===================== Program ===================== */

struct ScriptProgram {
    source_code: String,
    document_name: String,
}

impl Program for ScriptProgram {
    fn source_code(&self) -> &str {
        &self.source_code
    }

    fn prepare(&self) -> Result<(), ParsingError> {
        for statement in split_statements(&self.source_code) {
            parse_statement(&statement).map_err(|message| {
                ParsingError::with_frame(
                    ParsingErrorKind::Preparation { message },
                    StackFrame::new(&self.document_name),
                )
            })?;
        }
        Ok(())
    }

    fn execute(&self, context: &mut ExecutionContext) -> Result<(), ExecutionError> {
        for statement in split_statements(&self.source_code) {
            let parsed = parse_statement(&statement).map_err(|message| {
                ExecutionError::adapter(message, StackFrame::new(&self.document_name))
            })?;
            match parsed {
                Statement::Print(expression) => {
                    let value = eval(&expression, context).map_err(|message| {
                        ExecutionError::adapter(message, StackFrame::new(&self.document_name))
                    })?;
                    context.write(&stringify(&value)).map_err(|error| {
                        ExecutionError::new(ExecutionErrorKind::Io {
                            message: error.to_string(),
                        })
                    })?;
                }
                Statement::Include(expression) => {
                    let value = eval(&expression, context).map_err(|message| {
                        ExecutionError::adapter(message, StackFrame::new(&self.document_name))
                    })?;
                    let name = stringify(&value);
                    let service = context
                        .service(&service_name(context))
                        .and_then(|service| service.downcast::<DocumentService>().ok())
                        .ok_or_else(|| {
                            ExecutionError::adapter(
                                "no container service exposed",
                                StackFrame::new(&self.document_name),
                            )
                        })?;
                    service
                        .include(&name, context)
                        .map_err(ExecutionError::from)?;
                }
                Statement::Def(name, expression) => {
                    let value = eval(&expression, context).map_err(|message| {
                        ExecutionError::adapter(message, StackFrame::new(&self.document_name))
                    })?;
                    let entry_points = context
                        .attributes_mut()
                        .entry(ENTRY_POINTS_ATTRIBUTE.to_string())
                        .or_insert_with(|| Box::new(HashMap::<String, JsonValue>::new()));
                    if let Some(entry_points) =
                        entry_points.downcast_mut::<HashMap<String, JsonValue>>()
                    {
                        entry_points.insert(name, value);
                    }
                }
            }
        }
        Ok(())
    }
}

// The service is exposed under the parsing context's configured name; every
// helper in this module uses the default.
fn service_name(_context: &ExecutionContext) -> String {
    "document".to_string()
}

/* ===================== Statements ===================== */

enum Statement {
    Print(String),
    Include(String),
    Def(String, String),
}

fn parse_statement(statement: &str) -> Result<Statement, String> {
    let statement = statement.trim();
    if let Some(inner) = statement
        .strip_prefix("print(")
        .and_then(|rest| rest.strip_suffix(')'))
    {
        return Ok(Statement::Print(inner.to_string()));
    }
    if let Some(inner) = statement
        .strip_prefix("include(")
        .and_then(|rest| rest.strip_suffix(')'))
    {
        return Ok(Statement::Include(inner.to_string()));
    }
    if let Some(rest) = statement.strip_prefix("def ") {
        let mut parts = rest.trim().splitn(2, char::is_whitespace);
        let name = parts.next().unwrap_or_default().to_string();
        let expression = parts.next().unwrap_or_default().to_string();
        if name.is_empty() || expression.is_empty() {
            return Err(format!("malformed def: {}", statement));
        }
        return Ok(Statement::Def(name, expression));
    }
    Err(format!("unknown statement: {}", statement))
}

/// Splits on `;` outside single-quoted strings; empty pieces are dropped.
fn split_statements(source: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_string = false;
    let mut escaped = false;
    for c in source.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => {
                current.push(c);
                escaped = true;
            }
            '\'' => {
                current.push(c);
                in_string = !in_string;
            }
            ';' if !in_string => {
                if !current.trim().is_empty() {
                    statements.push(current.trim().to_string());
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        statements.push(current.trim().to_string());
    }
    statements
}

/* ===================== Expressions ===================== */

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(i64),
    Text(String),
    Identifier(String),
    Operator(char),
}

fn tokenize(expression: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = expression.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '0'..='9' => {
                let mut number = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() {
                        number.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Number(
                    number.parse().map_err(|_| format!("bad number: {}", number))?,
                ));
            }
            '\'' => {
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some('\\') => match chars.next() {
                            Some(escaped) => text.push(escaped),
                            None => return Err("unterminated escape".into()),
                        },
                        Some('\'') => break,
                        Some(other) => text.push(other),
                        None => return Err("unterminated string".into()),
                    }
                }
                tokens.push(Token::Text(text));
            }
            '+' | '-' | '*' | '/' => {
                tokens.push(Token::Operator(c));
                chars.next();
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut identifier = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_alphanumeric() || d == '_' {
                        identifier.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Identifier(identifier));
            }
            other => return Err(format!("unexpected character: {}", other)),
        }
    }
    Ok(tokens)
}

fn eval(expression: &str, context: &ExecutionContext) -> Result<JsonValue, String> {
    let tokens = tokenize(expression)?;
    let mut position = 0;
    let value = parse_additive(&tokens, &mut position, context)?;
    if position != tokens.len() {
        return Err(format!("trailing tokens in: {}", expression));
    }
    Ok(value)
}

fn parse_additive(
    tokens: &[Token],
    position: &mut usize,
    context: &ExecutionContext,
) -> Result<JsonValue, String> {
    let mut left = parse_multiplicative(tokens, position, context)?;
    while let Some(Token::Operator(op @ ('+' | '-'))) = tokens.get(*position) {
        let op = *op;
        *position += 1;
        let right = parse_multiplicative(tokens, position, context)?;
        left = if op == '+' && (left.is_string() || right.is_string()) {
            JsonValue::String(format!("{}{}", stringify(&left), stringify(&right)))
        } else {
            let (l, r) = (as_number(&left)?, as_number(&right)?);
            JsonValue::from(if op == '+' { l + r } else { l - r })
        };
    }
    Ok(left)
}

fn parse_multiplicative(
    tokens: &[Token],
    position: &mut usize,
    context: &ExecutionContext,
) -> Result<JsonValue, String> {
    let mut left = parse_primary(tokens, position, context)?;
    while let Some(Token::Operator(op @ ('*' | '/'))) = tokens.get(*position) {
        let op = *op;
        *position += 1;
        let right = parse_primary(tokens, position, context)?;
        let (l, r) = (as_number(&left)?, as_number(&right)?);
        left = if op == '*' {
            JsonValue::from(l * r)
        } else if r == 0 {
            return Err("division by zero".into());
        } else {
            JsonValue::from(l / r)
        };
    }
    Ok(left)
}

fn parse_primary(
    tokens: &[Token],
    position: &mut usize,
    context: &ExecutionContext,
) -> Result<JsonValue, String> {
    let token = tokens
        .get(*position)
        .ok_or_else(|| "unexpected end of expression".to_string())?;
    *position += 1;
    match token {
        Token::Number(n) => Ok(JsonValue::from(*n)),
        Token::Text(s) => Ok(JsonValue::String(s.clone())),
        Token::Identifier(name) => context
            .exposed_variables()
            .get(name)
            .cloned()
            .ok_or_else(|| format!("unknown variable: {}", name)),
        Token::Operator(op) => Err(format!("unexpected operator: {}", op)),
    }
}

fn as_number(value: &JsonValue) -> Result<i64, String> {
    value
        .as_i64()
        .ok_or_else(|| format!("not a number: {}", value))
}

fn stringify(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('\'', "\\'")
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::hashmap;

    #[test]
    fn expressions_evaluate_with_precedence_and_variables() {
        let mut context = ExecutionContext::new();
        *context.exposed_variables_mut() = hashmap! {
            "x".to_string() => JsonValue::from(10),
        };
        assert_eq!(eval("2+3*4", &context).unwrap(), JsonValue::from(14));
        assert_eq!(eval("x-1", &context).unwrap(), JsonValue::from(9));
        assert_eq!(
            eval("'a'+1", &context).unwrap(),
            JsonValue::String("a1".into())
        );
        assert!(eval("y", &context).is_err());
    }

    #[test]
    fn statements_split_outside_strings_only() {
        assert_eq!(
            split_statements("print('a;b');print('c');"),
            vec!["print('a;b')", "print('c')"]
        );
    }

    #[test]
    fn literal_escaping_round_trips_through_the_tokenizer() {
        let literal = "it's a \\ test";
        let statement = ScriptAdapter::with_tag("js", true).source_code_for_literal_output(literal);
        let split = split_statements(&statement);
        assert_eq!(split.len(), 1);
        let context = ExecutionContext::new();
        let Statement::Print(expression) = parse_statement(&split[0]).unwrap() else {
            panic!("expected print");
        };
        assert_eq!(
            eval(&expression, &context).unwrap(),
            JsonValue::String(literal.into())
        );
    }
}
