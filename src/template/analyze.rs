use std::collections::BTreeSet;

use super::{expr::Expr, syntax::Node, BUILTINS, COMPONENT};

/// Names a fragment reads from its environment and the locals it binds for later fragments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Analysis {
    pub dependencies: BTreeSet<String>,
    pub defined_locals: BTreeSet<String>,
}

pub(crate) fn analyze(node: &Node) -> Analysis {
    let mut a = Analyzer {
        scopes: vec![BTreeSet::new()],
        dependencies: BTreeSet::new(),
    };
    a.node(node);
    let defined_locals = a.scopes.pop().unwrap_or_default();
    Analysis {
        dependencies: a.dependencies,
        defined_locals,
    }
}

struct Analyzer {
    scopes: Vec<BTreeSet<String>>,
    dependencies: BTreeSet<String>,
}

impl Analyzer {
    fn is_local(&self, name: &str) -> bool {
        self.scopes.iter().any(|s| s.contains(name))
    }
    fn bind(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string());
        }
    }
    fn free(&mut self, name: &str) {
        if !self.is_local(name) {
            self.dependencies.insert(name.to_string());
        }
    }

    fn nodes(&mut self, nodes: &[Node]) {
        for node in nodes {
            self.node(node);
        }
    }

    fn node(&mut self, node: &Node) {
        match node {
            Node::Text(_) => {}
            Node::Output { expr, .. } => self.expr(expr),
            Node::If {
                branches,
                otherwise,
            } => {
                for (cond, body) in branches {
                    self.expr(cond);
                    self.nodes(body);
                }
                self.nodes(otherwise);
            }
            Node::For {
                item,
                second,
                iterable,
                body,
            } => {
                self.expr(iterable);
                self.scopes.push(BTreeSet::new());
                self.bind(item);
                if let Some(second) = second {
                    self.bind(second);
                }
                self.nodes(body);
                self.scopes.pop();
            }
            Node::Let { name, expr } => {
                self.expr(expr);
                self.bind(name);
            }
        }
    }

    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Literal(_) => {}
            Expr::List(items) => items.iter().for_each(|e| self.expr(e)),
            Expr::Var(name) => self.free(name),
            Expr::Field(target, _) => self.expr(target),
            Expr::Index(target, index) => {
                self.expr(target);
                self.expr(index);
            }
            Expr::Method { receiver, args, .. } => {
                self.expr(receiver);
                args.iter().for_each(|e| self.expr(e));
            }
            Expr::Call { name, args } => {
                if !BUILTINS.contains(&name.as_str()) {
                    self.dependencies.insert(COMPONENT.to_string());
                    if args.is_empty() {
                        self.free(name);
                    }
                }
                args.iter().for_each(|e| self.expr(e));
            }
            Expr::Unary(_, e) => self.expr(e),
            Expr::Binary(_, lhs, rhs) => {
                self.expr(lhs);
                self.expr(rhs);
            }
            Expr::Conditional {
                cond,
                then,
                otherwise,
            } => {
                self.expr(cond);
                self.expr(then);
                self.expr(otherwise);
            }
        }
    }
}
