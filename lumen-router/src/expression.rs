//! Route expression AST
//!
//! A hand-written recursive-descent parser turning a URL-like path string into
//! a structured expression tree, and the conversion from that tree into
//! [`ViewportInstruction`]s.
//!
//! # Grammar
//!
//! ```text
//! route      = '/'? composite ('?' query)? ('#' fragment)?
//! composite  = '+'? scoped ('+' scoped)*          ; leading '+' marks append
//! scoped     = group-or-segment ('/' scoped)?
//! group      = '(' composite ')'
//! segment    = component ('.' action)? ('@' viewport)? '!'?
//! component  = '..' | '.' | name params?
//! action     = name params?
//! params     = '(' param (',' param)* ')'
//! param      = (key '=')? value
//! ```
//!
//! Component names, action names, viewport names, parameter keys and values
//! are percent-decoded. A trailing `!` marks a segment unscoped; `.` and `..`
//! are directory-style relative markers resolved during route-tree building.

use crate::error::{RouterError, RouterResult};
use crate::instruction::{
    NavigationInstruction, Params, ViewportInstruction, ViewportInstructionTree,
};
use crate::options::NavigationOptions;

// =============================================================================
// AST
// =============================================================================

/// A parsed route string.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteExpression {
    /// The original input.
    pub raw: String,
    /// Whether the path started with `/`.
    pub is_absolute: bool,
    /// The expression body; `None` for an empty path.
    pub root: Option<Expression>,
    /// Parameters parsed from the `?query` part.
    pub query_params: Params,
    /// The `#fragment` part, percent-decoded.
    pub fragment: Option<String>,
}

/// One node of the expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Sibling segments composed with `+`.
    Composite(CompositeSegment),
    /// Parent/child segments composed with `/`.
    Scoped(ScopedSegment),
    /// A parenthesized group, carrying precedence into instruction flags.
    Group(Box<Expression>),
    /// A single segment.
    Segment(Segment),
}

/// Siblings at one level: `a+b+c`.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeSegment {
    /// The sibling expressions, in source order.
    pub siblings: Vec<Expression>,
    /// Whether the composite was introduced with a leading `+`.
    pub append: bool,
}

/// A `left/right` pair; `right` resolves in `left`'s scope.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopedSegment {
    /// The owning expression.
    pub left: Box<Expression>,
    /// The expression resolved inside `left`'s scope.
    pub right: Box<Expression>,
}

/// A single `component.action@viewport!` segment.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// The component part (name + parameters).
    pub component: ComponentPart,
    /// The optional `.action` suffix.
    pub action: Option<ActionPart>,
    /// The optional `@viewport` suffix.
    pub viewport: Option<String>,
    /// `false` when the segment carried a trailing `!`.
    pub scoped: bool,
}

/// Component name and parameter list.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentPart {
    /// Percent-decoded component name (`"."`/`".."` for relative markers).
    pub name: String,
    /// Parameters in source order.
    pub params: Vec<Parameter>,
}

/// Action name and parameter list.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionPart {
    /// Percent-decoded action name.
    pub name: String,
    /// Parameters in source order.
    pub params: Vec<Parameter>,
}

/// One parameter: named (`key=value`) or positional (`value`).
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    /// The key; `None` for positional parameters.
    pub key: Option<String>,
    /// The value.
    pub value: String,
}

// =============================================================================
// Parsing
// =============================================================================

const TERMINATORS: &[char] = &[
    '/', '+', '(', ')', '.', '@', '!', '?', '#', '=', ',', '&',
];

struct ParserState {
    raw: String,
    chars: Vec<char>,
    index: usize,
}

impl ParserState {
    fn new(raw: &str, input: &str) -> Self {
        Self {
            raw: raw.to_string(),
            chars: input.chars().collect(),
            index: 0,
        }
    }

    fn done(&self) -> bool {
        self.index >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.index).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.index + offset).copied()
    }

    fn consume_optional(&mut self, ch: char) -> bool {
        if self.peek() == Some(ch) {
            self.index += 1;
            true
        } else {
            false
        }
    }

    fn consume(&mut self, ch: char) -> RouterResult<()> {
        if self.consume_optional(ch) {
            Ok(())
        } else {
            Err(RouterError::parse_error(
                &self.raw,
                self.index,
                format!("expected '{ch}'"),
            ))
        }
    }

    fn consume_name(&mut self) -> RouterResult<String> {
        let start = self.index;
        while let Some(ch) = self.peek() {
            if TERMINATORS.contains(&ch) {
                break;
            }
            self.index += 1;
        }
        if self.index == start {
            return Err(RouterError::parse_error(&self.raw, start, "expected a name"));
        }
        let raw: String = self.chars[start..self.index].iter().collect();
        Ok(percent_decode(&raw, false))
    }
}

impl RouteExpression {
    /// Parse a route string.
    pub fn parse(path: &str) -> RouterResult<Self> {
        let (without_fragment, fragment) = match path.split_once('#') {
            Some((head, frag)) => (head, Some(percent_decode(frag, false))),
            None => (path, None),
        };
        let (body, query_params) = match without_fragment.split_once('?') {
            Some((head, query)) => (head, parse_query(query)),
            None => (without_fragment, Params::new()),
        };

        let is_absolute = body.starts_with('/');
        let body = body.strip_prefix('/').unwrap_or(body);

        let root = if body.is_empty() {
            None
        } else {
            let mut state = ParserState::new(path, body);
            let expression = parse_composite(&mut state)?;
            if !state.done() {
                return Err(RouterError::parse_error(
                    path,
                    state.index,
                    "unexpected trailing input",
                ));
            }
            Some(expression)
        };

        Ok(Self {
            raw: path.to_string(),
            is_absolute,
            root,
            query_params,
            fragment,
        })
    }

    /// Convert the expression into a normalized instruction tree.
    pub fn to_instruction_tree(&self, options: NavigationOptions) -> ViewportInstructionTree {
        let children = match &self.root {
            None => Vec::new(),
            Some(expression) => expression.to_instructions(options.append, 0, 0),
        };
        let query_params = options.query_params.merged_with(&self.query_params);
        let fragment = self.fragment.clone().or_else(|| options.fragment.clone());
        ViewportInstructionTree {
            is_absolute: self.is_absolute,
            children,
            query_params,
            fragment,
            options,
        }
    }
}

fn parse_composite(state: &mut ParserState) -> RouterResult<Expression> {
    let append = state.consume_optional('+');
    let mut siblings = vec![parse_scoped(state)?];
    while state.consume_optional('+') {
        siblings.push(parse_scoped(state)?);
    }
    if siblings.len() == 1 && !append {
        return Ok(siblings.remove(0));
    }
    Ok(Expression::Composite(CompositeSegment { siblings, append }))
}

fn parse_scoped(state: &mut ParserState) -> RouterResult<Expression> {
    let left = parse_group_or_segment(state)?;
    if state.consume_optional('/') {
        let right = parse_scoped(state)?;
        return Ok(Expression::Scoped(ScopedSegment {
            left: Box::new(left),
            right: Box::new(right),
        }));
    }
    Ok(left)
}

fn parse_group_or_segment(state: &mut ParserState) -> RouterResult<Expression> {
    if state.consume_optional('(') {
        let expression = parse_composite(state)?;
        state.consume(')')?;
        return Ok(Expression::Group(Box::new(expression)));
    }
    parse_segment(state)
}

fn parse_segment(state: &mut ParserState) -> RouterResult<Expression> {
    // Relative markers stand alone: no params, action or viewport.
    if state.peek() == Some('.') {
        let name = if state.peek_at(1) == Some('.') {
            state.index += 2;
            ".."
        } else {
            state.index += 1;
            "."
        };
        return Ok(Expression::Segment(Segment {
            component: ComponentPart {
                name: name.to_string(),
                params: Vec::new(),
            },
            action: None,
            viewport: None,
            scoped: true,
        }));
    }

    let name = state.consume_name()?;
    let params = if state.peek() == Some('(') {
        parse_params(state)?
    } else {
        Vec::new()
    };
    let component = ComponentPart { name, params };

    let action = if state.consume_optional('.') {
        let name = state.consume_name()?;
        let params = if state.peek() == Some('(') {
            parse_params(state)?
        } else {
            Vec::new()
        };
        Some(ActionPart { name, params })
    } else {
        None
    };

    let viewport = if state.consume_optional('@') {
        Some(state.consume_name()?)
    } else {
        None
    };

    let scoped = !state.consume_optional('!');

    Ok(Expression::Segment(Segment {
        component,
        action,
        viewport,
        scoped,
    }))
}

fn parse_params(state: &mut ParserState) -> RouterResult<Vec<Parameter>> {
    state.consume('(')?;
    let mut entries = Vec::new();
    if state.consume_optional(')') {
        return Ok(entries);
    }
    loop {
        let first = state.consume_name()?;
        if state.consume_optional('=') {
            let value = state.consume_name()?;
            entries.push(Parameter {
                key: Some(first),
                value,
            });
        } else {
            entries.push(Parameter {
                key: None,
                value: first,
            });
        }
        if state.consume_optional(',') {
            continue;
        }
        state.consume(')')?;
        break;
    }
    Ok(entries)
}

fn parse_query(query: &str) -> Params {
    let mut params = Params::new();
    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        match pair.split_once('=') {
            Some((key, value)) => {
                params.insert(percent_decode(key, true), percent_decode(value, true));
            }
            None => params.insert(percent_decode(pair, true), String::new()),
        }
    }
    params
}

/// Decode percent-escapes; malformed sequences keep the literal `%`.
/// In query strings (`plus_as_space`), `+` decodes to a space.
fn percent_decode(input: &str, plus_as_space: bool) -> String {
    fn hex_val(byte: u8) -> Option<u8> {
        (byte as char).to_digit(16).map(|v| v as u8)
    }
    let bytes = input.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                match (hex_val(bytes[i + 1]), hex_val(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push(hi * 16 + lo);
                        i += 3;
                    }
                    _ => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' if plus_as_space => {
                out.push(b' ');
                i += 1;
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

// =============================================================================
// Instruction conversion
// =============================================================================

impl Expression {
    /// Convert into instructions, distributing append and grouping-depth
    /// flags: the first sibling receives `open`, the last receives `close`,
    /// and groups increase both by one.
    pub fn to_instructions(&self, append: bool, open: usize, close: usize) -> Vec<ViewportInstruction> {
        match self {
            Expression::Segment(segment) => {
                let mut vi =
                    ViewportInstruction::new(NavigationInstruction::Path(segment.component.name.clone()));
                vi.params = params_from(&segment.component.params);
                vi.viewport = segment.viewport.clone();
                vi.append = append;
                vi.open = open;
                vi.close = close;
                vec![vi]
            }
            Expression::Group(inner) => inner.to_instructions(append, open + 1, close + 1),
            Expression::Scoped(scoped) => {
                let mut left = scoped.left.to_instructions(append, open, 0);
                let right = scoped.right.to_instructions(false, 0, close);
                if let Some(last) = left.last_mut() {
                    let mut target = last;
                    while !target.children.is_empty() {
                        target = target
                            .children
                            .last_mut()
                            .expect("non-empty children have a last element");
                    }
                    target.children.extend(right);
                }
                left
            }
            Expression::Composite(composite) => {
                let append = append || composite.append;
                let count = composite.siblings.len();
                let mut out = Vec::new();
                for (i, sibling) in composite.siblings.iter().enumerate() {
                    let sib_open = if i == 0 { open } else { 0 };
                    let sib_close = if i == count - 1 { close } else { 0 };
                    out.extend(sibling.to_instructions(append, sib_open, sib_close));
                }
                out
            }
        }
    }
}

fn params_from(entries: &[Parameter]) -> Params {
    let mut params = Params::new();
    let mut position = 0usize;
    for entry in entries {
        match &entry.key {
            Some(key) => params.insert(key.clone(), entry.value.clone()),
            None => {
                params.insert(position.to_string(), entry.value.clone());
                position += 1;
            }
        }
    }
    params
}

// =============================================================================
// Tests
// =============================================================================
