//! Instrumentation engine
//!
//! One traversal of a module's AST decides which nodes are function
//! boundaries, which return statements and catch clauses they own, and
//! records range-anchored edits that splice hook calls into the text. The
//! edits are applied in a single pass at the end, so every range refers to
//! the original source. No newlines are ever inserted, which keeps line
//! numbers in host stack traces unchanged.

use std::ops::Range;

use serde_json::Value;

use crate::ast::{Ast, NodeId, NodeKind};
use crate::classify::{self, NamingFailure};
use crate::edits::EditBuffer;
use crate::error::InstrumentError;
use crate::hooks::{CATCH_HOOK, ENTRY_HOOK, EXIT_HOOK};

/// Base of every identifier the engine introduces
const TEMP_PREFIX: &str = "__ct";

/// Rewrite policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InjectOptions {
    /// Guard each body with try/catch so uncaught exceptions still report an exit
    pub wrap_in_try_catch: bool,
    /// Pass the call arguments to the entry hook
    pub include_arguments: bool,
    /// Pass return values to the exit hook (`null` otherwise)
    pub capture_return_values: bool,
    /// The host wraps every module in a synthetic function starting on line 1
    pub whole_file_wrapped: bool,
}

impl Default for InjectOptions {
    fn default() -> Self {
        Self {
            wrap_in_try_catch: true,
            include_arguments: true,
            capture_return_values: true,
            whole_file_wrapped: false,
        }
    }
}

/// A function boundary that received entry/exit calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDescriptor {
    pub name: String,
    /// Byte range in the original source
    pub range: Range<usize>,
    pub is_expression_body: bool,
    pub start_line: usize,
    pub end_line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// A function expression whose name could not be recovered
    NameResolutionFailure,
    /// A function declaration without an identifier
    UnnamedDeclaration,
}

/// A non-fatal problem found while instrumenting; the boundary was skipped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub line: usize,
    pub message: String,
}

/// Result of instrumenting one module
#[derive(Debug, Clone)]
pub struct Instrumentation {
    pub code: String,
    pub functions: Vec<FunctionDescriptor>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Which function owns the statements below a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Owner {
    /// Module top level
    Module,
    /// An instrumented function
    Traced,
    /// The whole-file wrapper or a function that could not be named
    Untraced,
}

/// Instrument `source`, which was loaded from `filename`
pub fn instrument(
    filename: &str,
    source: &str,
    options: &InjectOptions,
) -> Result<Instrumentation, InstrumentError> {
    let ast = Ast::parse(filename, source)?;
    let mut injector = Injector::new(filename, &ast, *options);
    injector.run();

    let Injector {
        edits,
        functions,
        diagnostics,
        ..
    } = injector;

    tracing::info!(
        "Instrumented {} function(s) in {} ({} edit(s), {} skipped)",
        functions.len(),
        filename,
        edits.len(),
        diagnostics.len()
    );

    let code = edits.apply()?;
    verify_rewrite(filename, &code)?;

    Ok(Instrumentation {
        code,
        functions,
        diagnostics,
    })
}

/// A rewrite the host could not compile must never replace the original
fn verify_rewrite(filename: &str, code: &str) -> Result<(), InstrumentError> {
    match Ast::parse(filename, code) {
        Ok(_) => Ok(()),
        Err(InstrumentError::Parse { file, line, column }) => {
            tracing::warn!("{}: rewrite does not parse at {}:{}", file, line, column);
            Err(InstrumentError::InvalidRewrite { file, line, column })
        }
        Err(e) => Err(e),
    }
}

/// Pick a temporary-name prefix that does not occur anywhere in `source`
fn temp_prefix(source: &str) -> String {
    if !source.contains(TEMP_PREFIX) {
        return TEMP_PREFIX.to_string();
    }
    let mut n = 1;
    loop {
        let candidate = format!("{}{}_", TEMP_PREFIX, n);
        if !source.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

fn json_string(text: &str) -> String {
    Value::from(text).to_string()
}

struct Injector<'a, 'src> {
    file: &'a str,
    ast: &'a Ast<'src>,
    options: InjectOptions,
    edits: EditBuffer<'src>,
    functions: Vec<FunctionDescriptor>,
    diagnostics: Vec<Diagnostic>,
    entry_var: String,
    error_var: String,
    prefix: String,
    temps: usize,
    line_offset: usize,
}

impl<'a, 'src> Injector<'a, 'src> {
    fn new(file: &'a str, ast: &'a Ast<'src>, options: InjectOptions) -> Self {
        let prefix = temp_prefix(ast.text());
        Self {
            file,
            ast,
            options,
            edits: EditBuffer::new(ast.text()),
            functions: Vec::new(),
            diagnostics: Vec::new(),
            entry_var: format!("{}Entry__", prefix),
            error_var: format!("{}Err__", prefix),
            prefix,
            temps: 0,
            line_offset: usize::from(options.whole_file_wrapped),
        }
    }

    fn line(&self, raw: usize) -> usize {
        raw.saturating_sub(self.line_offset)
    }

    fn next_temp(&mut self) -> String {
        let name = format!("{}Ret{}__", self.prefix, self.temps);
        self.temps += 1;
        name
    }

    /// The synthetic wrapper: the first function boundary starting on line 1
    fn find_wrapper(&self) -> Option<NodeId> {
        if !self.options.whole_file_wrapped {
            return None;
        }
        self.ast
            .ids()
            .find(|&id| classify::is_function_boundary(self.ast, id))
            .filter(|&id| self.ast.node(id).start.line == 1)
    }

    fn run(&mut self) {
        let wrapper = self.find_wrapper();
        let mut work = vec![(self.ast.root(), Owner::Module)];

        while let Some((id, owner)) = work.pop() {
            let mut child_owner = owner;

            if classify::is_function_boundary(self.ast, id) {
                child_owner = if Some(id) == wrapper {
                    tracing::debug!("{}: skipping whole-file wrapper", self.file);
                    Owner::Untraced
                } else {
                    self.function(id)
                };
            } else if owner == Owner::Traced {
                match self.ast.kind(id) {
                    NodeKind::ReturnStatement => self.return_statement(id),
                    NodeKind::CatchClause => self.catch_clause(id),
                    _ => {}
                }
            }

            for &child in self.ast.children(id).iter().rev() {
                work.push((child, child_owner));
            }
        }
    }

    fn function(&mut self, id: NodeId) -> Owner {
        let node = self.ast.node(id);
        let start_line = self.line(node.start.line);

        let name = match classify::resolve_name(self.ast, id) {
            Ok(name) => name,
            Err(failure) => {
                let kind = match failure {
                    NamingFailure::UnnamedDeclaration => DiagnosticKind::UnnamedDeclaration,
                    NamingFailure::NoBinding { .. } => DiagnosticKind::NameResolutionFailure,
                };
                let message = format!("{}:{}: {}", self.file, start_line, failure);
                tracing::warn!("{}, function left uninstrumented", message);
                self.diagnostics.push(Diagnostic {
                    kind,
                    line: start_line,
                    message,
                });
                return Owner::Untraced;
            }
        };

        let descriptor = FunctionDescriptor {
            name,
            range: node.range.clone(),
            is_expression_body: classify::is_expression_body(self.ast, id),
            start_line,
            end_line: self.line(node.end.line),
        };
        tracing::debug!(
            "{}: {}::{} (expression body: {})",
            self.file,
            descriptor.name,
            descriptor.start_line,
            descriptor.is_expression_body
        );

        match self.ast.child_by_field(id, "body") {
            Some(body) if descriptor.is_expression_body => self.expression_body(id, body, &descriptor),
            Some(body) => self.block_body(id, body, &descriptor),
            None => return Owner::Untraced,
        }

        self.functions.push(descriptor);
        Owner::Traced
    }

    /// `var E = ENTRY({...});` plus `try{` when guarding
    fn entry_text(&self, id: NodeId, descriptor: &FunctionDescriptor) -> String {
        let args = if self.options.include_arguments {
            let list = if self.ast.kind(id) == NodeKind::ArrowFunction {
                self.arrow_arguments(id)
            } else {
                "arguments".to_string()
            };
            format!(", args:{}", list)
        } else {
            String::new()
        };
        let mut text = format!(
            "var {} = {}({{file:{}, name:{}, line:{}{}}});",
            self.entry_var,
            ENTRY_HOOK,
            json_string(self.file),
            json_string(&descriptor.name),
            descriptor.start_line,
            args
        );
        if self.options.wrap_in_try_catch {
            text.push_str("try{");
        }
        text
    }

    fn exit_call(&self, exception: bool, line: usize, return_value: &str) -> String {
        format!(
            "{}({{entryData:{}, exception:{}, line:{}, returnValue:{}}});",
            EXIT_HOOK, self.entry_var, exception, line, return_value
        )
    }

    /// `}catch(e){EXIT(exception); throw e;}` when guarding
    fn guard_close(&self, descriptor: &FunctionDescriptor) -> String {
        if !self.options.wrap_in_try_catch {
            return String::new();
        }
        format!(
            "}}catch({err}){{{exit} throw {err};}}",
            err = self.error_var,
            exit = self.exit_call(true, descriptor.start_line, "null")
        )
    }

    fn captured<'v>(&self, temp: &'v str) -> &'v str {
        if self.options.capture_return_values {
            temp
        } else {
            "null"
        }
    }

    fn block_body(&mut self, id: NodeId, body: NodeId, descriptor: &FunctionDescriptor) {
        let depth = self.ast.node(id).depth;
        let block = self.ast.node(body).range.clone();
        let close_at = block.end - 1;

        let mut open = self.entry_text(id, descriptor);
        let open_at = match self.directive_prologue_end(body) {
            Some((end, terminated)) => {
                if !terminated {
                    open.insert(0, ';');
                }
                end
            }
            None => block.start + 1,
        };

        // The last statement may end without a semicolon on the brace line
        let mut close = format!(";{}", self.exit_call(false, descriptor.end_line, "null"));
        close.push_str(&self.guard_close(descriptor));

        if open_at == close_at {
            open.push_str(&close);
            self.edits.insert_open(open_at, depth, open);
        } else {
            self.edits.insert_open(open_at, depth, open);
            self.edits.insert_close(close_at, depth, close);
        }
    }

    fn expression_body(&mut self, id: NodeId, body: NodeId, descriptor: &FunctionDescriptor) {
        let depth = self.ast.node(id).depth;
        let range = self.ast.node(body).range.clone();
        let temp = self.next_temp();

        let open = format!("{{{}var {} = (", self.entry_text(id, descriptor), temp);
        let close = format!(
            "); {} return {};{}}}",
            self.exit_call(false, descriptor.end_line, self.captured(&temp)),
            temp,
            self.guard_close(descriptor)
        );
        self.edits.insert_open(range.start, depth, open);
        self.edits.insert_close(range.end, depth, close);
    }

    fn return_statement(&mut self, id: NodeId) {
        let node = self.ast.node(id);
        let depth = node.depth;
        let line = self.line(node.start.line);

        let keyword = self
            .ast
            .children(id)
            .iter()
            .copied()
            .find(|&c| self.ast.kind(c) == NodeKind::Token("return"));
        let semicolon = self
            .ast
            .children(id)
            .iter()
            .copied()
            .find(|&c| self.ast.kind(c) == NodeKind::Token(";") && !self.ast.node(c).range.is_empty())
            .map(|c| self.ast.node(c).range.end);
        let value = self.ast.syntax_children(id).next();

        match (keyword, value) {
            (Some(keyword), Some(value)) => {
                let temp = self.next_temp();
                let value_end = self.ast.node(value).range.end;
                self.edits.replace(
                    self.ast.node(keyword).range.clone(),
                    depth,
                    format!("{{var {} = (", temp),
                );
                let mut close = format!(
                    "); {} return {}",
                    self.exit_call(false, line, self.captured(&temp)),
                    temp
                );
                match semicolon {
                    Some(end) => {
                        self.edits.insert_close(value_end, depth, close);
                        self.edits.insert_close(end, depth, "}");
                    }
                    None => {
                        close.push_str(";}");
                        self.edits.insert_close(value_end, depth, close);
                    }
                }
            }
            (Some(keyword), None) => {
                let open = format!("{{{} ", self.exit_call(false, line, "null"));
                self.edits.insert_open(node.range.start, depth, open);
                match semicolon {
                    Some(end) => self.edits.insert_close(end, depth, "}"),
                    None => self
                        .edits
                        .insert_close(self.ast.node(keyword).range.end, depth, ";}"),
                }
            }
            (None, _) => {
                tracing::warn!("{}:{}: return statement without keyword token", self.file, line);
            }
        }
    }

    fn catch_clause(&mut self, id: NodeId) {
        let Some(body) = self.ast.child_by_field(id, "body") else {
            return;
        };
        let at = self.ast.node(body).range.start + 1;
        let text = format!("{}({{entryData:{}}});", CATCH_HOOK, self.entry_var);
        self.edits.insert_open(at, self.ast.node(id).depth, text);
    }

    /// End offset of the leading `"use strict"`-style directives, and whether
    /// the last one carries its own semicolon
    fn directive_prologue_end(&self, block: NodeId) -> Option<(usize, bool)> {
        let mut end = None;
        for statement in self.ast.syntax_children(block) {
            if self.ast.kind(statement) != NodeKind::ExpressionStatement {
                break;
            }
            let mut inner = self.ast.syntax_children(statement);
            let is_directive = matches!(
                (inner.next(), inner.next()),
                (Some(first), None) if self.ast.kind(first) == NodeKind::String
            );
            if !is_directive {
                break;
            }
            let range = self.ast.node(statement).range.clone();
            end = Some((range.end, self.ast.source(statement).ends_with(';')));
        }
        end
    }

    /// Arrows have no `arguments` of their own: rebuild the list from the
    /// parameter bindings, `null` standing in for destructured parameters
    fn arrow_arguments(&self, id: NodeId) -> String {
        if let Some(single) = self.ast.child_by_field(id, "parameter") {
            return format!("[{}]", self.ast.source(single));
        }
        let Some(params) = self.ast.child_by_field(id, "parameters") else {
            return "[]".to_string();
        };
        let items: Vec<String> = self
            .ast
            .syntax_children(params)
            .map(|param| self.parameter_binding(param))
            .collect();
        format!("[{}]", items.join(", "))
    }

    fn parameter_binding(&self, param: NodeId) -> String {
        match self.ast.kind(param) {
            NodeKind::Identifier => self.ast.source(param).to_string(),
            NodeKind::AssignmentPattern => self
                .ast
                .child_by_field(param, "left")
                .filter(|&left| self.ast.kind(left) == NodeKind::Identifier)
                .map(|left| self.ast.source(left).to_string())
                .unwrap_or_else(|| "null".to_string()),
            NodeKind::RestPattern => self
                .ast
                .syntax_children(param)
                .next()
                .filter(|&target| self.ast.kind(target) == NodeKind::Identifier)
                .map(|target| format!("...{}", self.ast.source(target)))
                .unwrap_or_else(|| "null".to_string()),
            _ => "null".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare() -> InjectOptions {
        InjectOptions {
            wrap_in_try_catch: false,
            include_arguments: false,
            capture_return_values: true,
            whole_file_wrapped: false,
        }
    }

    fn run(source: &str, options: InjectOptions) -> Instrumentation {
        let result = instrument("a.js", source, &options).unwrap();
        assert!(
            Ast::parse("a.js", &result.code).is_ok(),
            "instrumented code does not parse:\n{}",
            result.code
        );
        result
    }

    #[test]
    fn test_return_rewrite_exact() {
        let result = run("function f() { return 1; }", bare());
        assert_eq!(
            result.code,
            "function f() {var __ctEntry__ = __calltraceEntry__({file:\"a.js\", name:\"f\", line:1}); \
             {var __ctRet0__ = ( 1); __calltraceExit__({entryData:__ctEntry__, exception:false, line:1, returnValue:__ctRet0__}); return __ctRet0__;} \
             ;__calltraceExit__({entryData:__ctEntry__, exception:false, line:1, returnValue:null});}"
        );
        assert_eq!(result.functions.len(), 1);
        assert_eq!(result.functions[0].name, "f");
    }

    #[test]
    fn test_arguments_and_guard() {
        let result = run("function add(a, b) {\n  return a + b;\n}", InjectOptions::default());
        assert!(result.code.contains("args:arguments"));
        assert!(result.code.contains("try{"));
        assert!(result.code.contains(
            "}catch(__ctErr__){__calltraceExit__({entryData:__ctEntry__, exception:true, line:1, returnValue:null}); throw __ctErr__;}"
        ));
        assert!(result.code.contains("exception:false, line:2, returnValue:__ctRet0__"));
        assert!(result.code.contains("exception:false, line:3, returnValue:null"));
        assert_eq!(result.code.lines().count(), 3);
    }

    #[test]
    fn test_expression_body_arrow() {
        let result = run("var inc = x => x + 1;", bare());
        assert_eq!(
            result.code,
            "var inc = x => {var __ctEntry__ = __calltraceEntry__({file:\"a.js\", name:\"inc\", line:1});\
             var __ctRet0__ = (x + 1); __calltraceExit__({entryData:__ctEntry__, exception:false, line:1, returnValue:__ctRet0__}); return __ctRet0__;};"
        );
        assert!(result.functions[0].is_expression_body);
    }

    #[test]
    fn test_arrow_arguments_are_reified() {
        let options = InjectOptions {
            include_arguments: true,
            ..bare()
        };
        let result = run("var f = (a, b = 2, {c}, ...rest) => a;", options);
        assert!(result.code.contains("args:[a, b, null, ...rest]"));

        let single = run("var g = x => x;", options);
        assert!(single.code.contains("args:[x]"));
    }

    #[test]
    fn test_bare_return() {
        let result = run("function f(x) { if (x) return; x(); }", bare());
        assert!(result.code.contains(
            "if (x) {__calltraceExit__({entryData:__ctEntry__, exception:false, line:1, returnValue:null}); return;}"
        ));
    }

    #[test]
    fn test_return_without_semicolon() {
        let result = run("function f() {\n  return 1\n}", bare());
        assert!(result.code.contains("return __ctRet0__;}"));
    }

    #[test]
    fn test_nested_returns_belong_to_their_function() {
        let result = run(
            "function outer() { var g = function () { return 2; }; return g(); }",
            bare(),
        );
        assert_eq!(result.functions.len(), 2);
        assert_eq!(result.code.matches("__calltraceEntry__").count(), 2);
        // Two value returns plus two fall-through exits
        assert_eq!(result.code.matches("__calltraceExit__").count(), 4);
    }

    #[test]
    fn test_catch_clause_hook() {
        let result = run("function f() { try { g(); } catch (e) { h(e); } }", bare());
        assert!(result
            .code
            .contains("catch (e) {__calltraceCatch__({entryData:__ctEntry__}); h(e); }"));
    }

    #[test]
    fn test_top_level_catch_and_return_untouched() {
        let source = "try { a(); } catch (e) { b(); }";
        let result = run(source, bare());
        assert_eq!(result.code, source);
        assert!(result.functions.is_empty());
    }

    #[test]
    fn test_directive_prologue_kept_first() {
        let result = run("function f() { 'use strict'; g(); }", bare());
        assert!(result.code.starts_with("function f() { 'use strict';var __ctEntry__"));

        let unterminated = run("function f() {\n'use strict'\ng();\n}", bare());
        assert!(unterminated.code.contains("'use strict';var __ctEntry__"));
    }

    #[test]
    fn test_empty_body_orders_entry_before_exit() {
        let result = run("function f() {}", bare());
        let entry = result.code.find("__calltraceEntry__").unwrap();
        let exit = result.code.find("__calltraceExit__").unwrap();
        assert!(entry < exit);
    }

    #[test]
    fn test_whole_file_wrapper_is_invisible() {
        let options = InjectOptions {
            whole_file_wrapped: true,
            ..bare()
        };
        let source = "(function (exports) {\nfunction a() { return 1; }\ntry { a(); } catch (e) {}\nreturn exports;\n})";
        let result = run(source, options);
        assert_eq!(result.functions.len(), 1);
        assert_eq!(result.functions[0].name, "a");
        assert_eq!(result.functions[0].start_line, 1);
        assert!(result.code.contains("\nreturn exports;\n"));
        assert!(!result.code.contains("__calltraceCatch__"));
    }

    #[test]
    fn test_unnamed_binding_is_skipped_with_diagnostic() {
        let result = run("var { a } = function () { return 1; };", bare());
        assert!(result.functions.is_empty());
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(result.diagnostics[0].kind, DiagnosticKind::NameResolutionFailure);
        assert!(!result.code.contains("__calltraceExit__"));
    }

    #[test]
    fn test_temp_prefix_avoids_collisions() {
        assert_eq!(temp_prefix("var x;"), "__ct");
        assert_eq!(temp_prefix("var __ctEntry__;"), "__ct1_");
        assert_eq!(temp_prefix("var __ct, __ct1_;"), "__ct2_");

        let result = run("var __ctEntry__ = 1; function f() {}", bare());
        assert!(result.code.contains("var __ct1_Entry__ = "));
    }

    #[test]
    fn test_return_values_can_be_suppressed() {
        let options = InjectOptions {
            capture_return_values: false,
            ..bare()
        };
        let result = run("function f() { return g(); }", options);
        assert!(result.code.contains("returnValue:null}); return __ctRet0__"));
        assert_eq!(result.code.matches("g()").count(), 1);
    }

    #[test]
    fn test_names_are_json_escaped() {
        let result = run("a[\"k\"] = function () {};", bare());
        assert!(result.code.contains(r#"name:"a[\"k\"]""#));
    }

    #[test]
    fn test_unterminated_last_statement_on_brace_line() {
        let result = run("function f() { g() }", bare());
        assert!(result
            .code
            .contains("g() ;__calltraceExit__({entryData:__ctEntry__, exception:false, line:1, returnValue:null});}"));

        let guarded = run("function h(){ x++ }", InjectOptions::default());
        assert!(guarded.code.contains("x++ ;__calltraceExit__("));
        assert!(guarded.code.contains("});}catch(__ctErr__)"));
    }

    #[test]
    fn test_unparsable_rewrite_is_rejected() {
        assert!(verify_rewrite("a.js", "function f() { g(); }").is_ok());
        let err = verify_rewrite("a.js", "function f() { g() h() }").unwrap_err();
        assert!(matches!(err, InstrumentError::InvalidRewrite { line: 1, .. }));
    }

    #[test]
    fn test_parse_failure_is_an_error() {
        let err = instrument("bad.js", "function (", &bare()).unwrap_err();
        assert!(matches!(err, InstrumentError::Parse { .. }));
    }
}
