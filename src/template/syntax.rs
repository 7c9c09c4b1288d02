use super::{
    expr::{parse_expr, parse_statement, Expr, Statement},
    scan::{Segment, Tag, TagKind},
    TemplateError,
};

/// Statement tree of a template.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Text(String),
    Output {
        expr: Expr,
        raw: bool,
    },
    If {
        branches: Vec<(Expr, Vec<Node>)>,
        otherwise: Vec<Node>,
    },
    For {
        item: String,
        /// Index for lists, value for maps.
        second: Option<String>,
        iterable: Expr,
        body: Vec<Node>,
    },
    Let {
        name: String,
        expr: Expr,
    },
}

/// A top-level node together with the source range it was parsed from.
#[derive(Debug, Clone)]
pub(crate) struct Spanned {
    pub node: Node,
    pub start: usize,
    pub end: usize,
}

enum Stop {
    Eof,
    End(usize),
    Elsif(Expr),
    Else,
}

pub(crate) fn parse(source: &str, segments: Vec<Segment>) -> Result<Vec<Spanned>, TemplateError> {
    let mut parser = TreeParser {
        source,
        segments: segments.into_iter(),
    };
    let mut nodes = Vec::new();
    while let Some(segment) = parser.segments.next() {
        let start = match &segment {
            Segment::Text { start, .. } => *start,
            Segment::Tag(tag) => tag.start,
        };
        match parser.node(segment)? {
            Parsed::Node(node, end) => nodes.push(Spanned { node, start, end }),
            Parsed::Skip => {}
            Parsed::Stop(Stop::Eof) => {}
            Parsed::Stop(_) => {
                return Err(TemplateError::at(source, start, "unexpected `end`, `elsif` or `else`"));
            }
        }
    }
    Ok(nodes)
}

struct TreeParser<'a> {
    source: &'a str,
    segments: std::vec::IntoIter<Segment>,
}

enum Parsed {
    Node(Node, usize),
    Skip,
    Stop(Stop),
}

impl TreeParser<'_> {
    fn node(&mut self, segment: Segment) -> Result<Parsed, TemplateError> {
        let tag = match segment {
            Segment::Text { text, end, .. } => return Ok(Parsed::Node(Node::Text(text), end)),
            Segment::Tag(tag) => tag,
        };
        match tag.kind {
            TagKind::Comment => Ok(Parsed::Skip),
            TagKind::Output | TagKind::RawOutput => {
                let expr = parse_expr(&tag.code, self.source, tag.code_start)?;
                Ok(Parsed::Node(
                    Node::Output {
                        expr,
                        raw: tag.kind == TagKind::RawOutput,
                    },
                    tag.end,
                ))
            }
            TagKind::Statement => self.statement(&tag),
        }
    }

    fn statement(&mut self, tag: &Tag) -> Result<Parsed, TemplateError> {
        if tag.code.is_empty() {
            return Ok(Parsed::Skip);
        }
        match parse_statement(&tag.code, self.source, tag.code_start)? {
            Statement::If(cond) => self.if_chain(cond, tag),
            Statement::Elsif(cond) => Ok(Parsed::Stop(Stop::Elsif(cond))),
            Statement::Else => Ok(Parsed::Stop(Stop::Else)),
            Statement::End => Ok(Parsed::Stop(Stop::End(tag.end))),
            Statement::Let { name, expr } => Ok(Parsed::Node(Node::Let { name, expr }, tag.end)),
            Statement::For {
                item,
                second,
                iterable,
            } => {
                let (body, stop) = self.block()?;
                match stop {
                    Stop::End(end) => Ok(Parsed::Node(
                        Node::For {
                            item,
                            second,
                            iterable,
                            body,
                        },
                        end,
                    )),
                    Stop::Eof => Err(self.unclosed(tag, "for")),
                    Stop::Elsif(_) | Stop::Else => Err(TemplateError::at(
                        self.source,
                        tag.start,
                        "`for` cannot have `elsif` or `else`",
                    )),
                }
            }
        }
    }

    fn if_chain(&mut self, cond: Expr, tag: &Tag) -> Result<Parsed, TemplateError> {
        let mut branches = Vec::new();
        let mut cond = cond;
        loop {
            let (body, stop) = self.block()?;
            branches.push((cond, body));
            match stop {
                Stop::Elsif(next) => cond = next,
                Stop::Else => {
                    let (otherwise, stop) = self.block()?;
                    return match stop {
                        Stop::End(end) => Ok(Parsed::Node(
                            Node::If {
                                branches,
                                otherwise,
                            },
                            end,
                        )),
                        Stop::Eof => Err(self.unclosed(tag, "if")),
                        Stop::Elsif(_) | Stop::Else => Err(TemplateError::at(
                            self.source,
                            tag.start,
                            "`else` must be the last branch of `if`",
                        )),
                    };
                }
                Stop::End(end) => {
                    return Ok(Parsed::Node(
                        Node::If {
                            branches,
                            otherwise: Vec::new(),
                        },
                        end,
                    ))
                }
                Stop::Eof => return Err(self.unclosed(tag, "if")),
            }
        }
    }

    fn block(&mut self) -> Result<(Vec<Node>, Stop), TemplateError> {
        let mut nodes = Vec::new();
        while let Some(segment) = self.segments.next() {
            match self.node(segment)? {
                Parsed::Node(node, _) => nodes.push(node),
                Parsed::Skip => {}
                Parsed::Stop(stop) => return Ok((nodes, stop)),
            }
        }
        Ok((nodes, Stop::Eof))
    }

    fn unclosed(&self, tag: &Tag, keyword: &str) -> TemplateError {
        TemplateError::at(self.source, tag.start, format!("`{keyword}` without `end`"))
    }
}
