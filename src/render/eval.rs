use std::fmt::Write;

use indexmap::IndexMap;

use super::Scope;
use crate::{
    template::{BinaryOp, Expr, Literal, Node, UnaryOp},
    tracked::{List, Map},
    Config, Error, Result, Value,
};

/// Methods that mutate their receiver. Templates only read state.
const MUTATING_METHODS: &[&str] = &[
    "push", "pop", "insert", "remove", "set", "clear", "truncate", "extend", "concat", "retain",
    "sort", "sort_by", "reverse", "merge", "sort_keys", "delete",
];

pub fn escape_html(s: &str) -> String {
    v_htmlescape::escape(s).to_string()
}

#[derive(Default)]
pub(super) struct Children {
    /// Ids passed to `child(...)` directly by this template.
    pub direct: Vec<String>,
    pub rendered: Vec<String>,
}

pub(super) struct Evaluator<'a> {
    scope: &'a mut dyn Scope,
    strict: bool,
    max_output_len: usize,
    max_iterations: usize,
    iterations: usize,
    frames: Vec<IndexMap<String, Value>>,
    render_children: bool,
    children: Children,
}

impl<'a> Evaluator<'a> {
    pub fn new(scope: &'a mut dyn Scope, config: &Config) -> Self {
        Self {
            scope,
            strict: config.strict_variables,
            max_output_len: config.max_output_len,
            max_iterations: config.max_iterations,
            iterations: 0,
            frames: vec![IndexMap::new()],
            render_children: true,
            children: Children::default(),
        }
    }

    /// When `false`, `child(...)` yields nothing and leaves the child untouched.
    pub fn set_render_children(&mut self, value: bool) {
        self.render_children = value;
    }
    pub fn take_children(&mut self) -> Children {
        std::mem::take(&mut self.children)
    }

    pub fn render(&mut self, node: &Node) -> Result<String> {
        let mut out = String::new();
        self.node(node, &mut out)?;
        Ok(out)
    }

    fn nodes(&mut self, nodes: &[Node], out: &mut String) -> Result<()> {
        for node in nodes {
            self.node(node, out)?;
        }
        Ok(())
    }

    fn node(&mut self, node: &Node, out: &mut String) -> Result<()> {
        match node {
            Node::Text(text) => self.push(out, text)?,
            Node::Output { expr, raw } => {
                let text = self.output(expr)?;
                self.push(out, &text.into_html(*raw))?;
            }
            Node::If {
                branches,
                otherwise,
            } => {
                for (cond, body) in branches {
                    if self.expr(cond)?.is_truthy() {
                        return self.nodes(body, out);
                    }
                }
                self.nodes(otherwise, out)?;
            }
            Node::For {
                item,
                second,
                iterable,
                body,
            } => {
                let pairs: Box<dyn Iterator<Item = (Value, Value)>> = match self.expr(iterable)? {
                    Value::Nil => Box::new(std::iter::empty()),
                    Value::List(list) => Box::new(
                        list.iter()
                            .enumerate()
                            .map(|(i, v)| (v, Value::from(i))),
                    ),
                    Value::Map(map) => Box::new(map.iter().map(|(k, v)| (Value::from(k), v))),
                    Value::Int(n) => Box::new((0..n.max(0)).map(|i| (Value::Int(i), Value::Int(i)))),
                    other => {
                        return Err(Error::eval(format!(
                            "cannot iterate over {}",
                            other.type_name()
                        )))
                    }
                };
                for (first, rest) in pairs {
                    self.iterations += 1;
                    if self.iterations > self.max_iterations {
                        return Err(Error::eval(format!(
                            "loop too large: more than {} iterations",
                            self.max_iterations
                        )));
                    }
                    let mut frame = IndexMap::new();
                    frame.insert(item.clone(), first);
                    if let Some(second) = second {
                        frame.insert(second.clone(), rest);
                    }
                    self.frames.push(frame);
                    let result = self.nodes(body, out);
                    self.frames.pop();
                    result?;
                }
            }
            Node::Let { name, expr } => {
                let value = self.expr(expr)?;
                if let Some(frame) = self.frames.last_mut() {
                    frame.insert(name.clone(), value);
                }
            }
        }
        Ok(())
    }

    fn push(&self, out: &mut String, text: &str) -> Result<()> {
        if out.len().saturating_add(text.len()) > self.max_output_len {
            return Err(Error::eval(format!(
                "output too large: more than {} bytes",
                self.max_output_len
            )));
        }
        out.push_str(text);
        Ok(())
    }

    /// Evaluates an output tag, keeping markup produced by `raw` and `child` unescaped.
    fn output(&mut self, expr: &Expr) -> Result<Output> {
        match expr {
            Expr::Call { name, args } if name == "raw" => {
                let [arg] = args.as_slice() else {
                    return Err(Error::eval("`raw` takes one argument"));
                };
                Ok(Output::Safe(self.expr(arg)?.to_text()))
            }
            Expr::Call { name, args } if name == "child" => Ok(Output::Safe(self.child(args)?)),
            Expr::Conditional {
                cond,
                then,
                otherwise,
            } => {
                if self.expr(cond)?.is_truthy() {
                    self.output(then)
                } else {
                    self.output(otherwise)
                }
            }
            _ => Ok(Output::Text(self.expr(expr)?.to_text())),
        }
    }

    fn child(&mut self, args: &[Expr]) -> Result<String> {
        let [class, id] = args else {
            return Err(Error::eval("`child` takes a class and an id"));
        };
        let class = self.expr(class)?.to_text();
        let id = self.expr(id)?.to_text();
        if !self.render_children {
            return Ok(String::new());
        }
        let child = self.scope.render_child(&class, &id)?;
        self.children.direct.push(id);
        self.children.rendered.extend(child.rendered);
        Ok(child.html)
    }

    fn lookup(&mut self, name: &str) -> Result<Value> {
        for frame in self.frames.iter().rev() {
            if let Some(value) = frame.get(name) {
                return Ok(value.clone());
            }
        }
        match self.scope.lookup(name)? {
            Some(value) => Ok(value),
            None if self.strict => Err(Error::UndefinedVariable {
                name: name.to_string(),
            }),
            None => Ok(Value::Nil),
        }
    }

    fn exprs(&mut self, exprs: &[Expr]) -> Result<Vec<Value>> {
        exprs.iter().map(|e| self.expr(e)).collect()
    }

    pub fn expr(&mut self, expr: &Expr) -> Result<Value> {
        Ok(match expr {
            Expr::Literal(literal) => match literal {
                Literal::Nil => Value::Nil,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Int(i) => Value::Int(*i),
                Literal::Float(x) => Value::Float(*x),
                Literal::Str(s) => Value::str(s),
            },
            Expr::List(items) => Value::List(List::from_vec(self.exprs(items)?)),
            Expr::Var(name) => self.lookup(name)?,
            Expr::Field(target, name) => {
                let target = self.expr(target)?;
                field(&target, name)?
            }
            Expr::Index(target, index) => {
                let target = self.expr(target)?;
                let index = self.expr(index)?;
                index_value(&target, &index)?
            }
            Expr::Method {
                receiver,
                name,
                args,
            } => {
                let receiver = self.expr(receiver)?;
                let args = self.exprs(args)?;
                method(&receiver, name, &args)?
            }
            Expr::Call { name, args } => match name.as_str() {
                "raw" => match self.exprs(args)?.as_slice() {
                    [value] => Value::str(value.to_text()),
                    _ => return Err(Error::eval("`raw` takes one argument")),
                },
                "child" => Value::str(self.child(args)?),
                _ => {
                    let args = self.exprs(args)?;
                    match self.scope.call(name, args)? {
                        Some(value) => value,
                        None => return Err(Error::eval(format!("unknown helper `{name}`"))),
                    }
                }
            },
            Expr::Unary(op, operand) => {
                let value = self.expr(operand)?;
                match op {
                    UnaryOp::Not => Value::Bool(!value.is_truthy()),
                    UnaryOp::Neg => match value {
                        Value::Int(i) => Value::Int(
                            i.checked_neg()
                                .ok_or_else(|| Error::eval("integer overflow"))?,
                        ),
                        Value::Float(x) => Value::Float(-x),
                        other => {
                            return Err(Error::eval(format!(
                                "cannot negate {}",
                                other.type_name()
                            )))
                        }
                    },
                }
            }
            Expr::Binary(BinaryOp::And, lhs, rhs) => {
                let lhs = self.expr(lhs)?;
                if lhs.is_truthy() {
                    self.expr(rhs)?
                } else {
                    lhs
                }
            }
            Expr::Binary(BinaryOp::Or, lhs, rhs) => {
                let lhs = self.expr(lhs)?;
                if lhs.is_truthy() {
                    lhs
                } else {
                    self.expr(rhs)?
                }
            }
            Expr::Binary(op, lhs, rhs) => {
                let lhs = self.expr(lhs)?;
                let rhs = self.expr(rhs)?;
                binary(*op, &lhs, &rhs, self.max_output_len)?
            }
            Expr::Conditional {
                cond,
                then,
                otherwise,
            } => {
                if self.expr(cond)?.is_truthy() {
                    self.expr(then)?
                } else {
                    self.expr(otherwise)?
                }
            }
        })
    }
}

enum Output {
    Text(String),
    Safe(String),
}
impl Output {
    fn into_html(self, raw: bool) -> String {
        match self {
            Output::Text(text) if !raw => escape_html(&text),
            Output::Text(text) | Output::Safe(text) => text,
        }
    }
}

fn field(target: &Value, name: &str) -> Result<Value> {
    match target {
        Value::Nil => Ok(Value::Nil),
        Value::Map(map) => match map.get(name) {
            Some(value) => Ok(value),
            None => method(target, name, &[]).or(Ok(Value::Nil)),
        },
        Value::Record(record) => match record.get(name) {
            Some(value) => Ok(value),
            None => method(target, name, &[]).map_err(|_| Error::UnknownField {
                record: record.type_name(),
                field: name.to_string(),
            }),
        },
        _ => method(target, name, &[]),
    }
}

fn index_value(target: &Value, index: &Value) -> Result<Value> {
    match (target, index) {
        (Value::Nil, _) => Ok(Value::Nil),
        (Value::List(list), Value::Int(i)) => Ok(list.at(*i).unwrap_or_default()),
        (Value::Map(map), key) => Ok(map.get(&key.to_text()).unwrap_or_default()),
        (Value::Record(record), key) => Ok(record.get(&key.to_text()).unwrap_or_default()),
        (Value::Str(s), Value::Int(i)) => {
            let len = s.chars().count() as i64;
            let i = if *i < 0 { len + i } else { *i };
            Ok(if (0..len).contains(&i) {
                s.chars().nth(i as usize).map(|c| Value::str(c.to_string())).unwrap_or_default()
            } else {
                Value::Nil
            })
        }
        (target, index) => Err(Error::eval(format!(
            "cannot index {} with {}",
            target.type_name(),
            index.type_name()
        ))),
    }
}

fn arg<'v>(args: &'v [Value], i: usize, method: &str) -> Result<&'v Value> {
    args.get(i)
        .ok_or_else(|| Error::eval(format!("`{method}` expects at least {} argument(s)", i + 1)))
}
fn int_arg(args: &[Value], i: usize, method: &str) -> Result<i64> {
    arg(args, i, method)?
        .as_int()
        .ok_or_else(|| Error::eval(format!("`{method}` expects an integer")))
}

/// Read-only methods callable from templates, forwarded to the tracked value.
fn method(receiver: &Value, name: &str, args: &[Value]) -> Result<Value> {
    if MUTATING_METHODS.contains(&name) {
        return Err(Error::eval(format!(
            "`{name}` modifies its receiver and cannot be called from a template"
        )));
    }
    let value = match (receiver, name) {
        (_, "to_s") => Value::str(receiver.to_text()),
        (_, "type") => Value::str(receiver.type_name()),
        (_, "is_nil") => Value::Bool(receiver.is_nil()),
        (Value::Nil, "len" | "size") => Value::Int(0),
        (Value::Nil, "is_empty") => Value::Bool(true),

        (Value::List(list), "len" | "size" | "length") => list.len().into(),
        (Value::List(list), "is_empty") => list.is_empty().into(),
        (Value::List(list), "first") => list.first().unwrap_or_default(),
        (Value::List(list), "last") => list.last().unwrap_or_default(),
        (Value::List(list), "get" | "at") => list.at(int_arg(args, 0, name)?).unwrap_or_default(),
        (Value::List(list), "contains" | "include") => list.contains(arg(args, 0, name)?).into(),
        (Value::List(list), "index_of") => list.position(arg(args, 0, name)?).into(),
        (Value::List(list), "join") => {
            let sep = args.first().map(Value::to_text).unwrap_or_default();
            Value::str(list.join(&sep))
        }
        (Value::List(list), "slice") => {
            let start = int_arg(args, 0, name)?.max(0) as usize;
            match args.get(1) {
                Some(end) => {
                    let end = end
                        .as_int()
                        .ok_or_else(|| Error::eval("`slice` expects an integer"))?
                        .max(0) as usize;
                    list.slice(start..end).into()
                }
                None => list.slice(start..).into(),
            }
        }
        (Value::List(list), "reversed") => list.reversed().into(),
        (Value::List(list), "sorted") => list.sorted().into(),
        (Value::List(list), "compact") => list.filter(|v| !v.is_nil()).into(),

        (Value::Map(map), "len" | "size" | "length") => map.len().into(),
        (Value::Map(map), "is_empty") => map.is_empty().into(),
        (Value::Map(map), "get") => map.get(&arg(args, 0, name)?.to_text()).unwrap_or_default(),
        (Value::Map(map), "contains_key" | "has_key") => {
            map.contains_key(&arg(args, 0, name)?.to_text()).into()
        }
        (Value::Map(map), "keys") => Value::list(map.keys()),
        (Value::Map(map), "values") => map.values().into_iter().collect::<List>().into(),

        (Value::Record(record), "type_name") => Value::str(record.type_name()),
        (Value::Record(record), "to_map") => record.to_map().into(),
        (Value::Record(record), "fields") => Value::list(record.field_names()),

        (Value::Str(s), "len" | "size" | "length") => s.chars().count().into(),
        (Value::Str(s), "is_empty") => s.is_empty().into(),
        (Value::Str(s), "upcase" | "upper") => Value::str(s.to_uppercase()),
        (Value::Str(s), "downcase" | "lower") => Value::str(s.to_lowercase()),
        (Value::Str(s), "strip" | "trim") => Value::str(s.trim()),
        (Value::Str(s), "capitalize") => {
            let mut chars = s.chars();
            let text: String = match chars.next() {
                Some(c) => c.to_uppercase().chain(chars).collect(),
                None => String::new(),
            };
            Value::str(text)
        }
        (Value::Str(s), "contains" | "include") => s.contains(&*arg(args, 0, name)?.to_text()).into(),
        (Value::Str(s), "starts_with") => s.starts_with(&*arg(args, 0, name)?.to_text()).into(),
        (Value::Str(s), "ends_with") => s.ends_with(&*arg(args, 0, name)?.to_text()).into(),
        (Value::Str(s), "split") => {
            let sep = arg(args, 0, name)?.to_text();
            Value::list(s.split(sep.as_str()))
        }
        (Value::Str(s), "replace") => {
            let from = arg(args, 0, name)?.to_text();
            let to = arg(args, 1, name)?.to_text();
            Value::str(s.replace(&from, &to))
        }

        (Value::Int(i), "abs") => Value::Int(i.saturating_abs()),
        (Value::Float(x), "abs") => Value::Float(x.abs()),
        (Value::Float(x), "round") => Value::Int(x.round() as i64),
        (Value::Float(x), "floor") => Value::Int(x.floor() as i64),
        (Value::Float(x), "ceil") => Value::Int(x.ceil() as i64),
        (Value::Int(_), "round" | "floor" | "ceil") => receiver.clone(),
        (Value::Float(x), "format") => {
            let digits = int_arg(args, 0, name)?.clamp(0, 17) as usize;
            Value::str(format!("{x:.digits$}"))
        }
        (Value::Int(i), "format") => {
            let digits = int_arg(args, 0, name)?.clamp(0, 17) as usize;
            Value::str(format!("{:.digits$}", *i as f64))
        }

        (receiver, name) => {
            return Err(Error::eval(format!(
                "{} has no method `{name}`",
                receiver.type_name()
            )))
        }
    };
    Ok(value)
}

fn binary(op: BinaryOp, lhs: &Value, rhs: &Value, max_len: usize) -> Result<Value> {
    use Value::{Float, Int, Str};
    let mismatch = || {
        Error::eval(format!(
            "unsupported operand types for `{op}`: {} and {}",
            lhs.type_name(),
            rhs.type_name()
        ))
    };
    let overflow = || Error::eval("integer overflow");
    let too_large = || Error::eval(format!("string too large: more than {max_len} bytes"));
    Ok(match op {
        BinaryOp::Eq => Value::Bool(lhs == rhs),
        BinaryOp::Ne => Value::Bool(lhs != rhs),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ord = lhs.compare(rhs).ok_or_else(mismatch)?;
            Value::Bool(match op {
                BinaryOp::Lt => ord.is_lt(),
                BinaryOp::Le => ord.is_le(),
                BinaryOp::Gt => ord.is_gt(),
                _ => ord.is_ge(),
            })
        }
        BinaryOp::Add => match (lhs, rhs) {
            (Int(a), Int(b)) => Int(a.checked_add(*b).ok_or_else(overflow)?),
            (Str(_), _) | (_, Str(_)) => {
                let mut s = lhs.to_text();
                let _ = write!(s, "{}", rhs.to_text());
                if s.len() > max_len {
                    return Err(too_large());
                }
                Value::str(s)
            }
            (Value::List(a), Value::List(b)) => {
                let mut items = a.to_vec();
                items.extend(b.to_vec());
                Value::List(List::from_vec(items))
            }
            (Value::Map(a), Value::Map(b)) => {
                let entries: IndexMap<String, Value> = a.iter().chain(b.iter()).collect();
                Value::Map(Map::from_index_map(entries))
            }
            _ => Float(number(lhs).ok_or_else(mismatch)? + number(rhs).ok_or_else(mismatch)?),
        },
        BinaryOp::Sub => match (lhs, rhs) {
            (Int(a), Int(b)) => Int(a.checked_sub(*b).ok_or_else(overflow)?),
            _ => Float(number(lhs).ok_or_else(mismatch)? - number(rhs).ok_or_else(mismatch)?),
        },
        BinaryOp::Mul => match (lhs, rhs) {
            (Int(a), Int(b)) => Int(a.checked_mul(*b).ok_or_else(overflow)?),
            (Str(s), Int(n)) => {
                let count = usize::try_from(*n).unwrap_or(0);
                match s.len().checked_mul(count) {
                    Some(len) if len <= max_len => Value::str(s.repeat(count)),
                    _ => return Err(too_large()),
                }
            }
            _ => Float(number(lhs).ok_or_else(mismatch)? * number(rhs).ok_or_else(mismatch)?),
        },
        BinaryOp::Div => match (lhs, rhs) {
            (Int(_), Int(0)) => return Err(Error::eval("division by zero")),
            (Int(a), Int(b)) => Int(a.checked_div_euclid(*b).ok_or_else(overflow)?),
            _ => Float(number(lhs).ok_or_else(mismatch)? / number(rhs).ok_or_else(mismatch)?),
        },
        BinaryOp::Rem => match (lhs, rhs) {
            (Int(_), Int(0)) => return Err(Error::eval("division by zero")),
            (Int(a), Int(b)) => Int(a.checked_rem_euclid(*b).ok_or_else(overflow)?),
            _ => Float(number(lhs).ok_or_else(mismatch)? % number(rhs).ok_or_else(mismatch)?),
        },
        BinaryOp::And if lhs.is_truthy() => rhs.clone(),
        BinaryOp::Or if !lhs.is_truthy() => rhs.clone(),
        BinaryOp::And | BinaryOp::Or => lhs.clone(),
    })
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Int(_) | Value::Float(_) => value.as_float(),
        _ => None,
    }
}
