//! AST facade over tree-sitter
//!
//! The tree-sitter parse is flattened into an arena: every node (named or
//! anonymous token) gets a [`NodeId`] in preorder, parents and children are
//! plain indices, and node kinds are a closed enum so the classifier can match
//! on them exhaustively instead of comparing kind strings.

use std::ops::Range;

use tree_sitter::{Language, Parser, Point};

use crate::error::InstrumentError;

/// Index of a node inside an [`Ast`] arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A source position: 1-based line, 0-based byte column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl From<Point> for Position {
    fn from(point: Point) -> Self {
        Self {
            line: point.row + 1,
            column: point.column,
        }
    }
}

/// Node kinds the instrumentation engine cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Program,
    FunctionDeclaration,
    GeneratorFunctionDeclaration,
    FunctionExpression,
    GeneratorFunction,
    ArrowFunction,
    MethodDefinition,
    StatementBlock,
    FormalParameters,
    ReturnStatement,
    CatchClause,
    ExpressionStatement,
    CallExpression,
    NewExpression,
    Arguments,
    AssignmentExpression,
    VariableDeclarator,
    Pair,
    FieldDefinition,
    ParenthesizedExpression,
    Identifier,
    PropertyIdentifier,
    PrivatePropertyIdentifier,
    String,
    AssignmentPattern,
    RestPattern,
    Comment,
    /// A syntax error or a token the parser had to invent
    Error,
    /// Any other named node
    Other(&'static str),
    /// An anonymous token such as `{`, `return` or `;`
    Token(&'static str),
}

impl NodeKind {
    fn classify(kind: &'static str, named: bool) -> Self {
        if !named {
            return NodeKind::Token(kind);
        }
        match kind {
            "program" => NodeKind::Program,
            "function_declaration" => NodeKind::FunctionDeclaration,
            "generator_function_declaration" => NodeKind::GeneratorFunctionDeclaration,
            // Older grammars name function expressions plain "function"
            "function_expression" | "function" => NodeKind::FunctionExpression,
            "generator_function" => NodeKind::GeneratorFunction,
            "arrow_function" => NodeKind::ArrowFunction,
            "method_definition" => NodeKind::MethodDefinition,
            "statement_block" => NodeKind::StatementBlock,
            "formal_parameters" => NodeKind::FormalParameters,
            "return_statement" => NodeKind::ReturnStatement,
            "catch_clause" => NodeKind::CatchClause,
            "expression_statement" => NodeKind::ExpressionStatement,
            "call_expression" => NodeKind::CallExpression,
            "new_expression" => NodeKind::NewExpression,
            "arguments" => NodeKind::Arguments,
            "assignment_expression" => NodeKind::AssignmentExpression,
            "variable_declarator" => NodeKind::VariableDeclarator,
            "pair" => NodeKind::Pair,
            "field_definition" => NodeKind::FieldDefinition,
            "parenthesized_expression" => NodeKind::ParenthesizedExpression,
            "identifier" => NodeKind::Identifier,
            "property_identifier" => NodeKind::PropertyIdentifier,
            "private_property_identifier" => NodeKind::PrivatePropertyIdentifier,
            "string" => NodeKind::String,
            "assignment_pattern" => NodeKind::AssignmentPattern,
            "rest_pattern" => NodeKind::RestPattern,
            "comment" | "html_comment" => NodeKind::Comment,
            "ERROR" => NodeKind::Error,
            other => NodeKind::Other(other),
        }
    }

    /// Named, non-comment nodes: the ones that carry syntax
    pub fn is_syntax(self) -> bool {
        !matches!(self, NodeKind::Token(_) | NodeKind::Comment)
    }
}

/// One arena node
#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    /// Field name under the parent (e.g. `body`, `left`), if any
    pub field: Option<&'static str>,
    /// Byte range into the parsed source
    pub range: Range<usize>,
    pub start: Position,
    pub end: Position,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// Distance from the root
    pub depth: usize,
}

/// A parsed JavaScript module
#[derive(Debug)]
pub struct Ast<'src> {
    source: &'src str,
    nodes: Vec<Node>,
}

impl<'src> Ast<'src> {
    /// Parse `source`, failing if the parser reports any syntax error
    pub fn parse(file: &str, source: &'src str) -> Result<Self, InstrumentError> {
        let language: Language = tree_sitter_javascript::LANGUAGE.into();
        let mut parser = Parser::new();
        parser
            .set_language(&language)
            .map_err(|e| InstrumentError::Language(e.to_string()))?;

        let tree = parser
            .parse(source, None)
            .ok_or_else(|| InstrumentError::Parse {
                file: file.to_string(),
                line: 1,
                column: 1,
            })?;

        let ast = Self::from_tree(source, &tree);

        if tree.root_node().has_error() {
            let at = ast
                .ids()
                .find(|&id| ast.kind(id) == NodeKind::Error)
                .map(|id| ast.node(id).start)
                .unwrap_or_default();
            return Err(InstrumentError::Parse {
                file: file.to_string(),
                line: at.line.max(1),
                column: at.column + 1,
            });
        }

        Ok(ast)
    }

    fn from_tree(source: &'src str, tree: &tree_sitter::Tree) -> Self {
        let mut nodes: Vec<Node> = Vec::new();
        let mut ancestors: Vec<NodeId> = Vec::new();
        let mut cursor = tree.walk();

        'walk: loop {
            let ts_node = cursor.node();
            let id = NodeId(nodes.len());
            let parent = ancestors.last().copied();
            let kind = if ts_node.is_error() || ts_node.is_missing() {
                NodeKind::Error
            } else {
                NodeKind::classify(ts_node.kind(), ts_node.is_named())
            };

            nodes.push(Node {
                kind,
                field: cursor.field_name(),
                range: ts_node.start_byte()..ts_node.end_byte(),
                start: ts_node.start_position().into(),
                end: ts_node.end_position().into(),
                parent,
                children: Vec::new(),
                depth: ancestors.len(),
            });
            if let Some(parent) = parent {
                nodes[parent.0].children.push(id);
            }

            if cursor.goto_first_child() {
                ancestors.push(id);
                continue;
            }

            while !cursor.goto_next_sibling() {
                if !cursor.goto_parent() {
                    break 'walk;
                }
                ancestors.pop();
            }
        }

        Self { source, nodes }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All node ids in preorder
    pub fn ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId)
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn kind(&self, id: NodeId) -> NodeKind {
        self.nodes[id.0].kind
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    /// Children that carry syntax (no anonymous tokens, no comments)
    pub fn syntax_children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.children(id)
            .iter()
            .copied()
            .filter(move |&child| self.kind(child).is_syntax())
    }

    pub fn child_by_field(&self, id: NodeId, field: &str) -> Option<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .find(|&child| self.nodes[child.0].field == Some(field))
    }

    /// The original source text covered by `id`
    pub fn source(&self, id: NodeId) -> &'src str {
        &self.source[self.nodes[id.0].range.clone()]
    }

    pub fn text(&self) -> &'src str {
        self.source
    }
}
