//! Function boundary classification and display-name recovery
//!
//! Anonymous functions are named from their immediate syntactic parent,
//! looking through parentheses:
//!
//! 1. assignment target: `f = function () {}` gives the left-hand side text
//! 2. variable binding: `var f = function () {}` gives `f`
//! 3. immediately invoked callee: `(function () {})()` gives `[Anonymous]`
//! 4. call argument: `foo(function () {})` gives `[Anonymous]`
//! 5. object or class member with an identifier key gives the key
//! 6. anything else gives `[Anonymous]`

use crate::ast::{Ast, NodeId, NodeKind};

/// Display name for functions without a recoverable name
pub const ANONYMOUS: &str = "[Anonymous]";

/// Syntactic form of a function boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionForm {
    Declaration,
    Expression,
    Arrow,
    Method,
}

/// Why a function boundary could not be named
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamingFailure {
    /// A function declaration without an identifier
    UnnamedDeclaration,
    /// A variable binding with no identifier to take the name from
    NoBinding { parent: String },
}

impl std::fmt::Display for NamingFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NamingFailure::UnnamedDeclaration => write!(f, "function declaration has no identifier"),
            NamingFailure::NoBinding { parent } => {
                write!(f, "could not find a name for a function expression bound by {parent:?}")
            }
        }
    }
}

pub fn function_form(kind: NodeKind) -> Option<FunctionForm> {
    match kind {
        NodeKind::FunctionDeclaration | NodeKind::GeneratorFunctionDeclaration => {
            Some(FunctionForm::Declaration)
        }
        NodeKind::FunctionExpression | NodeKind::GeneratorFunction => Some(FunctionForm::Expression),
        NodeKind::ArrowFunction => Some(FunctionForm::Arrow),
        NodeKind::MethodDefinition => Some(FunctionForm::Method),
        _ => None,
    }
}

/// A node is a function boundary iff it is a function form with a non-empty
/// source range and a body
pub fn is_function_boundary(ast: &Ast<'_>, id: NodeId) -> bool {
    function_form(ast.kind(id)).is_some()
        && !ast.node(id).range.is_empty()
        && ast.child_by_field(id, "body").is_some()
}

/// Lambda bodies that are a bare expression rather than a block
pub fn is_expression_body(ast: &Ast<'_>, id: NodeId) -> bool {
    ast.kind(id) == NodeKind::ArrowFunction
        && ast
            .child_by_field(id, "body")
            .is_some_and(|body| ast.kind(body) != NodeKind::StatementBlock)
}

/// Resolve the display name of a function boundary
pub fn resolve_name(ast: &Ast<'_>, id: NodeId) -> Result<String, NamingFailure> {
    let form = function_form(ast.kind(id));

    if form == Some(FunctionForm::Method) {
        return Ok(ast
            .child_by_field(id, "name")
            .and_then(|key| key_name(ast, key))
            .unwrap_or_else(|| ANONYMOUS.to_string()));
    }

    if let Some(name) = ast.child_by_field(id, "name") {
        return Ok(ast.source(name).to_string());
    }

    if form == Some(FunctionForm::Declaration) {
        return Err(NamingFailure::UnnamedDeclaration);
    }

    let (via, parent) = syntactic_parent(ast, id);
    let Some(parent) = parent else {
        return Ok(ANONYMOUS.to_string());
    };
    let via_field = ast.node(via).field;

    match ast.kind(parent) {
        NodeKind::AssignmentExpression if via_field == Some("right") => Ok(ast
            .child_by_field(parent, "left")
            .map(|left| ast.source(left).to_string())
            .unwrap_or_else(|| ANONYMOUS.to_string())),
        NodeKind::VariableDeclarator if via_field == Some("value") => {
            match ast.child_by_field(parent, "name") {
                Some(binding) if ast.kind(binding) == NodeKind::Identifier => {
                    Ok(ast.source(binding).to_string())
                }
                _ => Err(NamingFailure::NoBinding {
                    parent: ast.source(parent).lines().next().unwrap_or_default().to_string(),
                }),
            }
        }
        // The callee is this very function, which has no name of its own here
        NodeKind::CallExpression | NodeKind::NewExpression => Ok(ANONYMOUS.to_string()),
        // Call expressions carry no name of their own
        NodeKind::Arguments => Ok(ANONYMOUS.to_string()),
        NodeKind::Pair if via_field == Some("value") => Ok(ast
            .child_by_field(parent, "key")
            .and_then(|key| key_name(ast, key))
            .unwrap_or_else(|| ANONYMOUS.to_string())),
        NodeKind::FieldDefinition if via_field == Some("value") => Ok(ast
            .child_by_field(parent, "property")
            .and_then(|key| key_name(ast, key))
            .unwrap_or_else(|| ANONYMOUS.to_string())),
        _ => Ok(ANONYMOUS.to_string()),
    }
}

/// Walk up through parentheses; returns the outermost wrapped node and its parent
fn syntactic_parent(ast: &Ast<'_>, id: NodeId) -> (NodeId, Option<NodeId>) {
    let mut via = id;
    let mut parent = ast.parent(id);
    while let Some(p) = parent {
        if ast.kind(p) != NodeKind::ParenthesizedExpression {
            break;
        }
        via = p;
        parent = ast.parent(p);
    }
    (via, parent)
}

fn key_name(ast: &Ast<'_>, key: NodeId) -> Option<String> {
    match ast.kind(key) {
        NodeKind::PropertyIdentifier
        | NodeKind::PrivatePropertyIdentifier
        | NodeKind::Identifier => Some(ast.source(key).to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(source: &str) -> Vec<Result<String, NamingFailure>> {
        let ast = Ast::parse("t.js", source).unwrap();
        ast.ids()
            .filter(|&id| is_function_boundary(&ast, id))
            .map(|id| resolve_name(&ast, id))
            .collect()
    }

    fn single(source: &str) -> String {
        let mut all = names(source);
        assert_eq!(all.len(), 1, "expected one function in {source}");
        all.remove(0).unwrap()
    }

    #[test]
    fn test_declaration_uses_own_name() {
        assert_eq!(single("function add(a, b) { return a + b; }"), "add");
    }

    #[test]
    fn test_named_expression_uses_own_name() {
        assert_eq!(single("var f = function inner() {};"), "inner");
    }

    #[test]
    fn test_assignment_target() {
        assert_eq!(single("obj.f = function () {};"), "obj.f");
        assert_eq!(single("a[\"k\"] = () => 1;"), "a[\"k\"]");
    }

    #[test]
    fn test_variable_binding() {
        assert_eq!(single("var f = function () {};"), "f");
        assert_eq!(single("const g = (x) => x;"), "g");
        assert_eq!(single("let h = (function () {});"), "h");
    }

    #[test]
    fn test_destructuring_binding_fails() {
        let all = names("var { a } = function () {};");
        assert!(matches!(all[0], Err(NamingFailure::NoBinding { .. })));
    }

    #[test]
    fn test_iife_is_anonymous() {
        assert_eq!(single("(function (scope) {})(module);"), ANONYMOUS);
    }

    #[test]
    fn test_argument_is_anonymous() {
        assert_eq!(single("arr.map(function (x) { return x; });"), ANONYMOUS);
        assert_eq!(single("setTimeout(() => done(), 10);"), ANONYMOUS);
    }

    #[test]
    fn test_member_keys() {
        assert_eq!(single("var o = { run: function () {} };"), "run");
        assert_eq!(single("var o = { go() {} };"), "go");
        assert_eq!(single("class A { start() {} }"), "start");
        assert_eq!(single("class A { handler = () => {} }"), "handler");
    }

    #[test]
    fn test_computed_member_is_anonymous() {
        assert_eq!(single("var o = { [key]() {} };"), ANONYMOUS);
        assert_eq!(single("var o = { 'quoted': function () {} };"), ANONYMOUS);
    }

    #[test]
    fn test_other_contexts_are_anonymous() {
        assert_eq!(single("module.exports.x = cond ? function () {} : null;"), ANONYMOUS);
        assert_eq!(single("export default function () {}"), ANONYMOUS);
    }

    #[test]
    fn test_expression_body_detection() {
        let ast = Ast::parse("t.js", "var a = x => x + 1; var b = x => { return x; };").unwrap();
        let arrows: Vec<_> = ast
            .ids()
            .filter(|&id| ast.kind(id) == NodeKind::ArrowFunction)
            .collect();
        assert!(is_expression_body(&ast, arrows[0]));
        assert!(!is_expression_body(&ast, arrows[1]));
    }

    #[test]
    fn test_non_functions_are_not_boundaries() {
        let ast = Ast::parse("t.js", "var x = 1; foo(x);").unwrap();
        assert!(ast.ids().all(|id| !is_function_boundary(&ast, id)));
    }
}
