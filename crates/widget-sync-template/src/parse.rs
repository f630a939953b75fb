//! Template parser: markup with `${expr}` interpolation and `{% %}` blocks.

use widget_sync_dom::is_void_element;

use crate::expr::Expr;
use crate::CompileError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Segment {
    Literal(String),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Attr {
    Static { name: String, value: String },
    Dynamic { name: String, parts: Vec<Segment> },
    Event { event: String, handler: String },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Node {
    Element {
        tag: String,
        attrs: Vec<Attr>,
        children: Vec<Node>,
    },
    Text(Vec<Segment>),
    For {
        var: String,
        source: Expr,
        body: Vec<Node>,
    },
    If {
        cond: Expr,
        then_branch: Vec<Node>,
        else_branch: Vec<Node>,
    },
}

#[derive(Debug, PartialEq)]
enum Stop {
    Eof,
    Close(String, usize),
    EndFor(usize),
    Else(usize),
    EndIf(usize),
}

enum Block {
    For { var: String, source: Expr },
    If(Expr),
    EndFor,
    Else,
    EndIf,
}

pub(crate) fn parse(src: &str) -> Result<Vec<Node>, CompileError> {
    let mut parser = Parser { src, pos: 0 };
    let (nodes, stop) = parser.children()?;
    match stop {
        Stop::Eof => Ok(nodes),
        Stop::Close(tag, offset) => Err(CompileError::Unexpected {
            what: format!("</{tag}>"),
            offset,
        }),
        Stop::EndFor(offset) => Err(CompileError::Unexpected {
            what: "endfor".into(),
            offset,
        }),
        Stop::Else(offset) => Err(CompileError::Unexpected {
            what: "else".into(),
            offset,
        }),
        Stop::EndIf(offset) => Err(CompileError::Unexpected {
            what: "endif".into(),
            offset,
        }),
    }
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn eof(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn children(&mut self) -> Result<(Vec<Node>, Stop), CompileError> {
        let mut nodes = Vec::new();
        loop {
            if self.eof() {
                return Ok((nodes, Stop::Eof));
            }
            let start = self.pos;
            let rest = self.rest();
            if rest.starts_with("<!--") {
                let end = rest.find("-->").ok_or(CompileError::Unclosed {
                    what: "comment".into(),
                    offset: start,
                })?;
                self.pos += end + 3;
            } else if rest.starts_with("{%") {
                match self.block_tag()? {
                    Block::For { var, source } => {
                        let (body, stop) = self.children()?;
                        if !matches!(stop, Stop::EndFor(_)) {
                            return Err(unclosed_block("for", start, stop));
                        }
                        nodes.push(Node::For {
                            var,
                            source,
                            body,
                        });
                    }
                    Block::If(cond) => {
                        let (then_branch, stop) = self.children()?;
                        let (else_branch, stop) = match stop {
                            Stop::Else(_) => self.children()?,
                            other => (Vec::new(), other),
                        };
                        if !matches!(stop, Stop::EndIf(_)) {
                            return Err(unclosed_block("if", start, stop));
                        }
                        nodes.push(Node::If {
                            cond,
                            then_branch,
                            else_branch,
                        });
                    }
                    Block::EndFor => return Ok((nodes, Stop::EndFor(start))),
                    Block::Else => return Ok((nodes, Stop::Else(start))),
                    Block::EndIf => return Ok((nodes, Stop::EndIf(start))),
                }
            } else if rest.starts_with("</") {
                self.pos += 2;
                let tag = self.name();
                self.skip_ws();
                if self.bump() != Some('>') {
                    return Err(CompileError::Unclosed {
                        what: format!("</{tag}"),
                        offset: start,
                    });
                }
                return Ok((nodes, Stop::Close(tag, start)));
            } else if rest.starts_with('<') && rest[1..].starts_with(|c: char| c.is_ascii_alphabetic()) {
                nodes.push(self.element()?);
            } else {
                let text = self.text_run();
                let parts = segments(text, start)?;
                if !parts.is_empty() {
                    nodes.push(Node::Text(parts));
                }
            }
        }
    }

    fn element(&mut self) -> Result<Node, CompileError> {
        let start = self.pos;
        self.bump();
        let tag = self.name().to_ascii_lowercase();
        let mut attrs = Vec::new();
        let self_closing = loop {
            self.skip_ws();
            let attr_start = self.pos;
            match self.peek() {
                None => {
                    return Err(CompileError::Unclosed {
                        what: format!("<{tag}"),
                        offset: start,
                    })
                }
                Some('>') => {
                    self.bump();
                    break false;
                }
                Some('/') if self.rest().starts_with("/>") => {
                    self.pos += 2;
                    break true;
                }
                Some(_) => {
                    let name = self.attr_name();
                    if name.is_empty() {
                        return Err(CompileError::Unexpected {
                            what: self.peek().map(String::from).unwrap_or_default(),
                            offset: self.pos,
                        });
                    }
                    self.skip_ws();
                    let (raw, value_offset) = if self.peek() == Some('=') {
                        self.bump();
                        self.skip_ws();
                        self.attr_value(attr_start)?
                    } else {
                        (String::new(), self.pos)
                    };
                    attrs.push(attribute(name, &raw, value_offset, attr_start)?);
                }
            }
        };
        if self_closing || is_void_element(&tag) {
            return Ok(Node::Element {
                tag,
                attrs,
                children: Vec::new(),
            });
        }
        let (children, stop) = self.children()?;
        match stop {
            Stop::Close(found, _) if found.eq_ignore_ascii_case(&tag) => Ok(Node::Element {
                tag,
                attrs,
                children,
            }),
            Stop::Close(found, offset) => Err(CompileError::MismatchedTag {
                expected: tag,
                found,
                offset,
            }),
            _ => Err(CompileError::Unclosed {
                what: format!("<{tag}>"),
                offset: start,
            }),
        }
    }

    fn name(&mut self) -> String {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            self.bump();
        }
        self.src[start..self.pos].to_string()
    }

    fn attr_name(&mut self) -> String {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| !c.is_whitespace() && !matches!(c, '=' | '>' | '/' | '"' | '\''))
        {
            self.bump();
        }
        self.src[start..self.pos].to_string()
    }

    fn attr_value(&mut self, attr_start: usize) -> Result<(String, usize), CompileError> {
        match self.peek() {
            Some(q @ ('"' | '\'')) => {
                self.bump();
                let value_start = self.pos;
                let len = self.rest().find(q).ok_or(CompileError::Unclosed {
                    what: "attribute value".into(),
                    offset: attr_start,
                })?;
                self.pos += len + 1;
                Ok((self.src[value_start..value_start + len].to_string(), value_start))
            }
            _ => {
                let value_start = self.pos;
                while self.peek().is_some_and(|c| !c.is_whitespace() && c != '>') {
                    self.bump();
                }
                Ok((self.src[value_start..self.pos].to_string(), value_start))
            }
        }
    }

    /// Consumes text up to the next tag, comment or block tag.
    fn text_run(&mut self) -> &'a str {
        let start = self.pos;
        // Always make progress, even on a stray '<'.
        self.bump();
        while !self.eof() {
            let rest = self.rest();
            let tag_like = rest.starts_with('<')
                && rest[1..].starts_with(|c: char| c.is_ascii_alphabetic() || c == '/' || c == '!');
            if tag_like || rest.starts_with("{%") {
                break;
            }
            self.bump();
        }
        &self.src[start..self.pos]
    }

    fn block_tag(&mut self) -> Result<Block, CompileError> {
        let start = self.pos;
        let end = self.rest().find("%}").ok_or(CompileError::Unclosed {
            what: "{%".into(),
            offset: start,
        })?;
        let inner = &self.src[start + 2..start + end];
        self.pos = start + end + 2;
        let words: Vec<&str> = inner.split_whitespace().collect();
        let invalid = || CompileError::InvalidBlock {
            tag: inner.trim().to_string(),
            offset: start,
        };
        match words.as_slice() {
            ["for", var, "in", source] => {
                let var_expr = Expr::parse(var, start)?;
                if !var_expr.steps.is_empty() {
                    return Err(invalid());
                }
                Ok(Block::For {
                    var: var_expr.root,
                    source: Expr::parse(source, start)?,
                })
            }
            ["if", cond] => Ok(Block::If(Expr::parse(cond, start)?)),
            ["endfor"] => Ok(Block::EndFor),
            ["else"] => Ok(Block::Else),
            ["endif"] => Ok(Block::EndIf),
            _ => Err(invalid()),
        }
    }
}

fn unclosed_block(what: &str, offset: usize, stop: Stop) -> CompileError {
    match stop {
        Stop::Eof => CompileError::Unclosed {
            what: format!("{{% {what} %}}"),
            offset,
        },
        Stop::Close(tag, at) => CompileError::Unexpected {
            what: format!("</{tag}>"),
            offset: at,
        },
        Stop::EndFor(at) => CompileError::Unexpected {
            what: "endfor".into(),
            offset: at,
        },
        Stop::Else(at) => CompileError::Unexpected {
            what: "else".into(),
            offset: at,
        },
        Stop::EndIf(at) => CompileError::Unexpected {
            what: "endif".into(),
            offset: at,
        },
    }
}

fn attribute(name: String, raw: &str, value_offset: usize, attr_start: usize) -> Result<Attr, CompileError> {
    if let Some(event) = name.strip_prefix("on:") {
        let handler = raw.trim();
        let plain = !handler.is_empty()
            && handler
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !plain || event.is_empty() {
            return Err(CompileError::InvalidHandler {
                attr: name.clone(),
                offset: attr_start,
            });
        }
        return Ok(Attr::Event {
            event: event.to_string(),
            handler: handler.to_string(),
        });
    }
    let parts = segments(raw, value_offset)?;
    if parts.iter().all(|p| matches!(p, Segment::Literal(_))) {
        return Ok(Attr::Static {
            name,
            value: decode_entities(raw),
        });
    }
    Ok(Attr::Dynamic { name, parts })
}

/// Splits text into literal runs and `${expr}` interpolations. A run that
/// is only whitespace between tags is dropped.
fn segments(text: &str, offset: usize) -> Result<Vec<Segment>, CompileError> {
    let mut parts = Vec::new();
    let mut rest = text;
    let mut at = offset;
    while let Some(open) = rest.find("${") {
        if open > 0 {
            parts.push(Segment::Literal(decode_entities(&rest[..open])));
        }
        let close = rest[open..].find('}').ok_or(CompileError::Unclosed {
            what: "${".into(),
            offset: at + open,
        })?;
        let inner = &rest[open + 2..open + close];
        parts.push(Segment::Expr(Expr::parse(inner, at + open)?));
        at += open + close + 1;
        rest = &rest[open + close + 1..];
    }
    if !rest.is_empty() {
        parts.push(Segment::Literal(decode_entities(rest)));
    }
    let blank = parts
        .iter()
        .all(|p| matches!(p, Segment::Literal(s) if s.trim().is_empty()));
    if blank {
        parts.clear();
    }
    Ok(parts)
}

fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
