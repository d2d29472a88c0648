//! The WGSL surface grammar.
//!
//! ```text
//! Root        = (GlobalDirective | Module | Import | Export | HashDirective
//!               | Alias | Struct | Fn | GlobalVar)*
//! Fn          = Attribute* 'fn' word '(' Param,* ')' ('->' Type)? Block
//! Struct      = 'struct' word '{' Member,* '}'
//! GlobalVar   = Attribute* ('var'|'const'|'override'|'let') Template? word
//!               (':' Type)? ...';'
//! Alias       = 'alias' word '=' Type ';'
//! Import      = 'import' Tree ('from' Path)? ';'
//! ```
//!
//! The grammar does not understand WGSL statements; function bodies are
//! scanned token-wise, collecting call sites (identifier followed by `(`)
//! and the type references of inline declarations. Collected names land in
//! the `"call"` and `"type_ref"` tag buckets and are harvested when each
//! top-level rule pushes its element.

use std::rc::Rc;
use std::sync::LazyLock;

use weld_parse::combinator::{
    any, any_not, any_through, disable_pre_parse, kind, opt, or, pre_parse, repeat, repeat_plus,
    req, req_at, text, tokens, trace, with_sep,
};
use weld_parse::{
    one_of, ErrMode, Error, IgnoreSet, Lexer, Match, PResult, ParseCtx, Parser, ParserExt, Span,
    SourceMap, Tags, Token, TokenMatcher,
};

use crate::builtin::{is_builtin_fn, is_builtin_type, CALLISH_KEYWORDS};
use crate::elem::{
    AliasElem, CallElem, Elem, ExportElem, ExtendsElem, FnElem, GlobalDirectiveElem, MemberElem,
    ModuleElem, StructElem, TemplateElem, TreeImportElem, TypeRefElem, VarElem,
};
use crate::import_tree::{ImportTree, Segment, SimpleSegment};

type Ctx<'s> = ParseCtx<'s, Vec<Elem>>;
type PR<'s, O> = PResult<'s, O>;

static MAIN: LazyLock<TokenMatcher> = LazyLock::new(|| {
    TokenMatcher::new(&[
        ("line_comment", r"//[^\n]*"),
        ("directive", r"#[a-zA-Z_]+"),
        ("word", r"[a-zA-Z_][a-zA-Z0-9_]*"),
        (
            "digits",
            r"(?:0[xX][\da-fA-F]+[iu]?)|(?:\d+\.\d*(?:[eE][+-]?\d+)?[fh]?)|(?:\.\d+(?:[eE][+-]?\d+)?[fh]?)|(?:\d+(?:[eE][+-]?\d+)?[fhiu]?)",
        ),
        ("ws", r"\s+"),
        // No << >> tokens: nested template closers like `vec2<f32>>` must
        // lex as single angle brackets.
        (
            "symbol",
            &one_of("-> :: <= >= == != && || += -= ( ) { } [ ] < > @ ; , : = & | ^ * / % + - ! ~ ."),
        ),
    ])
});

// Hash-directive tails are line-scoped: newlines are significant.
static DIRECTIVE: LazyLock<TokenMatcher> = LazyLock::new(|| {
    TokenMatcher::new(&[
        ("eol", r"\r?\n"),
        ("relpath", r"\.{1,2}/[\w./-]+"),
        ("word", r"[a-zA-Z_][a-zA-Z0-9_]*"),
        ("digits", r"\d+"),
        ("ws", r"[ \t]+"),
        ("symbol", &one_of(":: / ( ) { } , ; *")),
    ])
});

// Raw text inside block comments; nothing is ignored.
static COMMENT: LazyLock<TokenMatcher> = LazyLock::new(|| {
    TokenMatcher::new(&[
        ("open", r"/\*"),
        ("close", r"\*/"),
        ("text", r"[^*/]+"),
        ("other", r"[*/]"),
    ])
});

const IGNORE: IgnoreSet = &["ws", "line_comment"];
const DIR_IGNORE: IgnoreSet = &["ws"];

/// Parse one module source into its element list.
///
/// Never fails: parse errors are reported through the sink and the rule
/// resynchronizes. A budget overrun reports and yields an empty list.
#[must_use]
pub fn parse_module_text(
    src: &str,
    src_map: Option<Rc<SourceMap>>,
    budget: Option<u32>,
) -> Vec<Elem> {
    let lexer = Lexer::new(&MAIN, src, IGNORE);
    let mut ctx = ParseCtx::new(lexer, Vec::new());
    if let Some(map) = src_map {
        ctx = ctx.with_src_map(map);
    }
    if let Some(budget) = budget {
        ctx = ctx.with_budget(budget);
    }
    let root = pre_parse(comment_skip, trace("module_root", module_root));
    match root.parse_next(&mut ctx) {
        Ok(_) => ctx.state,
        Err(err) => {
            let pos = ctx.lexer.position();
            ctx.report_at(&err.error().to_string(), pos);
            Vec::new()
        }
    }
}

fn module_root<'s>(ctx: &mut Ctx<'s>) -> PR<'s, ()> {
    repeat(or((
        or((global_directive, module_decl, import_stmt, export_decl, hash_directive)),
        or((global_alias, struct_decl, fn_decl, global_var, unknown_item)),
    )))
    .map(|_| ())
    .parse_next(ctx)
}

fn unknown_item<'s>(ctx: &mut Ctx<'s>) -> PR<'s, ()> {
    let m = any().parse_next(ctx)?;
    ctx.report_at(&format!("unexpected token {}", m.value), m.value.span.0);
    Ok(m.map(|_| ()))
}

// === comments ===============================================================

// Tried before every token consumption; handles nestable block comments,
// which a single regex in the ignore set cannot.
fn comment_skip<'s>(ctx: &mut Ctx<'s>) -> PR<'s, ()> {
    tokens(&COMMENT, &[], block_comment).parse_next(ctx)
}

fn block_comment<'s>(ctx: &mut Ctx<'s>) -> PR<'s, ()> {
    (text("/*"), disable_pre_parse(comment_rest))
        .map(|_| ())
        .parse_next(ctx)
}

fn comment_rest<'s>(ctx: &mut Ctx<'s>) -> PR<'s, ()> {
    let body = repeat(or((
        block_comment,
        any_not(text("*/")).map(|_| ()),
    )));
    (body, req(text("*/"), "closing '*/'"))
        .map(|_| ())
        .parse_next(ctx)
}

// === shared pieces ==========================================================

fn attributes<'s>(ctx: &mut Ctx<'s>) -> PR<'s, ()> {
    repeat((text("@"), kind("word"), opt(balanced_parens)))
        .map(|_| ())
        .parse_next(ctx)
}

fn balanced_parens<'s>(ctx: &mut Ctx<'s>) -> PR<'s, ()> {
    let item = or((
        balanced_parens,
        any_not(or((text("("), text(")")))).map(|_| ()),
    ));
    (text("("), repeat(item), req(text(")"), "text ')'"))
        .map(|_| ())
        .parse_next(ctx)
}

/// A possibly-templated type. The leading identifier and the first
/// identifier of each template level land in the `"type_ref"` bucket;
/// trailing template arguments may be access-mode keywords, so they are
/// scanned as plain tokens.
fn type_specifier<'s>(ctx: &mut Ctx<'s>) -> PR<'s, ()> {
    (kind("word").tag("type_ref"), opt(template_args))
        .map(|_| ())
        .parse_next(ctx)
}

fn template_args<'s>(ctx: &mut Ctx<'s>) -> PR<'s, ()> {
    let first = or((type_specifier, template_token));
    (
        text("<"),
        opt(first),
        repeat(or((template_args, template_token))),
        req(text(">"), "text '>'"),
    )
        .map(|_| ())
        .parse_next(ctx)
}

fn template_token<'s>(ctx: &mut Ctx<'s>) -> PR<'s, ()> {
    any_not(or((text("<"), text(">"))))
        .map(|_| ())
        .parse_next(ctx)
}

fn type_refs_from(tags: &Tags) -> Vec<TypeRefElem> {
    tags.get("type_ref")
        .iter()
        .filter(|token| !is_builtin_type(token.text))
        .map(|token| TypeRefElem::new(token.text, token.span))
        .collect()
}

fn calls_from(tags: &Tags) -> Vec<CallElem> {
    tags.get("call")
        .iter()
        .filter(|token| !is_builtin_fn(token.text))
        .map(|token| CallElem::new(token.text, token.span))
        .collect()
}

// === function bodies ========================================================

fn block<'s>(ctx: &mut Ctx<'s>) -> PR<'s, ()> {
    (text("{"), repeat(statement), req(text("}"), "text '}'"))
        .map(|_| ())
        .parse_next(ctx)
}

fn statement<'s>(ctx: &mut Ctx<'s>) -> PR<'s, ()> {
    or((block, var_stmt, fn_call, stmt_token)).parse_next(ctx)
}

// `ident(` is a call; `if (..)` and friends are not.
fn fn_call<'s>(ctx: &mut Ctx<'s>) -> PR<'s, ()> {
    (callable_word.tag("call"), text("("))
        .map(|_| ())
        .parse_next(ctx)
}

fn callable_word<'s>(ctx: &mut Ctx<'s>) -> PR<'s, Token<'s>> {
    let start = ctx.checkpoint();
    let m = kind("word").parse_next(ctx)?;
    if CALLISH_KEYWORDS.contains(&m.value.text) {
        ctx.reset(start);
        return Err(ErrMode::Backtrack(Error::Expected {
            wanted: "a callable name",
            got: "keyword",
        }));
    }
    Ok(m)
}

// Declarations inside a block contribute their type to the enclosing fn.
fn var_stmt<'s>(ctx: &mut Ctx<'s>) -> PR<'s, ()> {
    (
        or((text("var"), text("let"), text("const"))),
        opt(template_args),
        kind("word"),
        opt((text(":"), type_specifier)),
    )
        .map(|_| ())
        .parse_next(ctx)
}

fn stmt_token<'s>(ctx: &mut Ctx<'s>) -> PR<'s, ()> {
    any_not(or((text("{"), text("}"))))
        .map(|_| ())
        .parse_next(ctx)
}

// === top-level rules ========================================================

fn fn_decl<'s>(ctx: &mut Ctx<'s>) -> PR<'s, ()> {
    let p = (
        attributes,
        text("fn"),
        req(kind("word"), "fn name"),
        req(text("("), "text '('"),
        with_sep(text(","), fn_param),
        req(text(")"), "text ')'"),
        opt((text("->"), attributes, type_specifier)),
        req(block, "fn body"),
    );
    let m = trace("fn_decl", p).parse_next(ctx)?;
    if let Some(name) = m.value.2 {
        ctx.state.push(Elem::Fn(FnElem {
            name: name.text.to_owned(),
            name_span: name.span,
            span: m.span,
            calls: calls_from(&m.tags),
            type_refs: type_refs_from(&m.tags),
        }));
    }
    Ok(Match::empty((), m.span.1))
}

fn fn_param<'s>(ctx: &mut Ctx<'s>) -> PR<'s, ()> {
    (attributes, kind("word"), opt((text(":"), type_specifier)))
        .map(|_| ())
        .parse_next(ctx)
}

fn struct_decl<'s>(ctx: &mut Ctx<'s>) -> PR<'s, ()> {
    let p = (
        text("struct"),
        req(kind("word"), "struct name"),
        req(text("{"), "text '{'"),
        with_sep(text(","), struct_member),
        req(text("}"), "text '}'"),
    );
    let m = trace("struct_decl", p).parse_next(ctx)?;
    let (_, name, _, members, _) = m.value;
    if let Some(name) = name {
        ctx.state.push(Elem::Struct(StructElem {
            name: name.text.to_owned(),
            name_span: name.span,
            span: m.span,
            members,
            extends: Vec::new(),
        }));
    }
    Ok(Match::empty((), m.span.1))
}

// Members keep their own type references, so this rule harvests the
// `"type_ref"` bucket locally instead of letting it bubble.
fn struct_member<'s>(ctx: &mut Ctx<'s>) -> PR<'s, MemberElem> {
    let head = (attributes, kind("word"), req(text(":"), "text ':'")).parse_next(ctx)?;
    let name = head.value.1;
    let ty = type_specifier(ctx)?;
    Ok(Match {
        value: MemberElem {
            name: name.text.to_owned(),
            span: name.span,
            type_refs: type_refs_from(&ty.tags),
        },
        tags: Tags::default(),
        span: (head.span.0, ty.span.1.max(head.span.1)),
    })
}

fn global_var<'s>(ctx: &mut Ctx<'s>) -> PR<'s, ()> {
    let head = (
        attributes,
        or((text("var"), text("const"), text("override"), text("let"))),
        opt(template_args),
        req(kind("word"), "variable name"),
        opt((text(":"), type_specifier)),
    )
        .parse_next(ctx)?;
    let tail = any_through(text(";")).parse_next(ctx)?;
    let Some(name) = head.value.3 else {
        return Ok(Match::empty((), tail.span.1));
    };
    ctx.state.push(Elem::Var(VarElem {
        name: name.text.to_owned(),
        name_span: name.span,
        span: (head.span.0, tail.span.1),
        type_refs: type_refs_from(&head.tags),
    }));
    Ok(Match::empty((), tail.span.1))
}

fn global_alias<'s>(ctx: &mut Ctx<'s>) -> PR<'s, ()> {
    let head = (
        text("alias"),
        req(kind("word"), "alias name"),
        req(text("="), "text '='"),
    )
        .parse_next(ctx)?;
    let ty = type_specifier(ctx)?;
    let semi = req(text(";"), "text ';'").parse_next(ctx)?;
    let Some(name) = head.value.1 else {
        return Ok(Match::empty((), semi.span.1));
    };
    let target_name = ty
        .tags
        .get("type_ref")
        .first()
        .map_or_else(String::new, |token| token.text.to_owned());
    ctx.state.push(Elem::Alias(AliasElem {
        name: name.text.to_owned(),
        name_span: name.span,
        span: (head.span.0, semi.span.1.max(ty.span.1)),
        target_name,
        type_refs: type_refs_from(&ty.tags),
    }));
    Ok(Match::empty((), semi.span.1.max(ty.span.1)))
}

// `diagnostic`, `enable`, `requires` and module-scope `const_assert` are
// kept for the emitter but contribute no references.
fn global_directive<'s>(ctx: &mut Ctx<'s>) -> PR<'s, ()> {
    let p = (
        or((
            text("diagnostic"),
            text("enable"),
            text("requires"),
            text("const_assert"),
        )),
        any_through(text(";")),
    );
    let m = p.parse_next(ctx)?;
    ctx.state
        .push(Elem::GlobalDirective(GlobalDirectiveElem { span: m.span }));
    Ok(m.map(|_| ()))
}

fn module_decl<'s>(ctx: &mut Ctx<'s>) -> PR<'s, ()> {
    let sep = or((text("::"), text("."), text("/")));
    let p = (
        text("module"),
        req(kind("word"), "module path"),
        repeat((sep, kind("word"))),
        opt(text(";")),
    );
    let m = p.parse_next(ctx)?;
    let (_, first, rest, _) = m.value;
    let Some(first) = first else {
        return Ok(Match::empty((), m.span.1));
    };
    let mut segments = vec![first.text.to_owned()];
    segments.extend(rest.into_iter().map(|(_, word)| word.text.to_owned()));
    ctx.state.push(Elem::Module(ModuleElem {
        name: segments.join("/"),
        span: m.span,
    }));
    Ok(Match::empty((), m.span.1))
}

// Keyword form: `export` or `export(A, B)`, marking the next declaration.
fn export_decl<'s>(ctx: &mut Ctx<'s>) -> PR<'s, ()> {
    let params = (
        text("("),
        with_sep(text(","), kind("word")),
        req(text(")"), "text ')'"),
    );
    let m = (text("export"), opt(params)).parse_next(ctx)?;
    let params = m
        .value
        .1
        .map(|(_, words, _)| words.iter().map(|w| w.text.to_owned()).collect())
        .unwrap_or_default();
    ctx.state.push(Elem::Export(ExportElem { params, span: m.span }));
    Ok(Match::empty((), m.span.1))
}

// === import statements ======================================================

fn import_stmt<'s>(ctx: &mut Ctx<'s>) -> PR<'s, ()> {
    let kw = text("import").parse_next(ctx)?;
    let tree = import_tree(ctx)?;
    let from = opt((text("from"), import_path)).parse_next(ctx)?;
    let semi = req(text(";"), "text ';'").parse_next(ctx)?;
    let end = semi.span.1.max(from.span.1).max(tree.span.1);
    let tree = match from.value {
        Some((_, path)) => prepend_path(path, tree.value),
        None => tree.value,
    };
    let span = (kw.span.0, end);
    ctx.state.push(Elem::TreeImport(TreeImportElem { span, tree }));
    Ok(Match::empty((), span.1))
}

fn prepend_path(path: Vec<String>, tree: ImportTree) -> ImportTree {
    let mut segments: Vec<Segment> = path
        .into_iter()
        .map(|name| Segment::Simple(SimpleSegment::named(name)))
        .collect();
    segments.extend(tree.segments);
    ImportTree { segments }
}

fn import_tree<'s>(ctx: &mut Ctx<'s>) -> PR<'s, ImportTree> {
    let start = ctx.checkpoint();
    let mut segments = Vec::new();
    let mut end = start;
    loop {
        let branch = opt(import_branch).parse_next(ctx)?;
        if let Some(branches) = branch.value {
            // A list is always the last segment.
            end = end.max(branch.span.1);
            segments.push(Segment::List(branches));
            break;
        }
        // `*` is reserved syntax; accepted here, rejected at resolution.
        let star = opt(text("*")).parse_next(ctx)?;
        if let Some(star) = star.value {
            end = end.max(star.span.1);
            segments.push(Segment::Simple(SimpleSegment::named("*")));
            break;
        }
        let simple = import_segment(ctx)?;
        end = end.max(simple.span.1);
        segments.push(Segment::Simple(simple.value));
        let sep = opt(or((text("::"), text("/")))).parse_next(ctx)?;
        if sep.value.is_none() {
            break;
        }
    }
    Ok(Match { value: ImportTree { segments }, tags: Tags::default(), span: (start, end) })
}

fn import_branch<'s>(ctx: &mut Ctx<'s>) -> PR<'s, Vec<ImportTree>> {
    (
        text("{"),
        with_sep(text(","), import_tree),
        req(text("}"), "text '}'"),
    )
        .map(|(_, branches, _)| branches)
        .parse_next(ctx)
}

fn import_segment<'s>(ctx: &mut Ctx<'s>) -> PR<'s, SimpleSegment> {
    let args = (
        text("("),
        with_sep(text(","), or((kind("word"), kind("digits")))),
        req(text(")"), "text ')'"),
    );
    let p = (
        kind("word"),
        opt(args),
        opt((text("as"), req(kind("word"), "import alias"))),
    );
    p.map(|(name, args, as_name)| SimpleSegment {
        name: name.text.to_owned(),
        args: args.map(|(_, tokens, _)| tokens.iter().map(|t| t.text.to_owned()).collect()),
        as_name: as_name.and_then(|(_, alias)| alias.map(|t| t.text.to_owned())),
    })
    .parse_next(ctx)
}

// `./file1`, `../util/x` or `a::b` after `from`.
fn import_path<'s>(ctx: &mut Ctx<'s>) -> PR<'s, Vec<String>> {
    let sep = or((text("::"), text("/")));
    let worded = (kind("word"), repeat((sep, kind("word")))).map(|(first, rest)| {
        let mut segments = vec![first.text.to_owned()];
        segments.extend(rest.into_iter().map(|(_, w)| w.text.to_owned()));
        segments
    });
    or((main_relpath, worded)).parse_next(ctx)
}

// The main matcher lexes `./file1` as `.` `/` `file1`; reassemble it.
fn main_relpath<'s>(ctx: &mut Ctx<'s>) -> PR<'s, Vec<String>> {
    let p = (
        repeat_plus(text(".")),
        text("/"),
        kind("word"),
        repeat((text("/"), or((kind("word"), text("."))))),
    );
    p.map(|(_, _, first, rest)| {
        let mut segments = vec![first.text.to_owned()];
        segments.extend(
            rest.into_iter()
                .filter(|(_, t)| t.kind == "word")
                .map(|(_, t)| t.text.to_owned()),
        );
        segments
    })
    .parse_next(ctx)
}

pub(crate) fn relpath_segments(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
        .map(|segment| {
            segment
                .strip_suffix(".wgsl")
                .unwrap_or(segment)
                .to_owned()
        })
        .collect()
}

// === hash directives ========================================================

fn hash_directive<'s>(ctx: &mut Ctx<'s>) -> PR<'s, ()> {
    let m = kind("directive").parse_next(ctx)?;
    let directive = m.value;
    match directive.text {
        "#import" => {
            let tail = move |ctx: &mut Ctx<'s>| hash_import_tail(ctx, directive.span);
            tokens(&DIRECTIVE, DIR_IGNORE, tail).parse_next(ctx)
        }
        "#export" => {
            let tail = move |ctx: &mut Ctx<'s>| hash_export_tail(ctx, directive.span);
            tokens(&DIRECTIVE, DIR_IGNORE, tail).parse_next(ctx)
        }
        "#extends" | "#importMerge" => {
            let tail = move |ctx: &mut Ctx<'s>| hash_extends_tail(ctx, directive.span);
            tokens(&DIRECTIVE, DIR_IGNORE, tail).parse_next(ctx)
        }
        "#template" => {
            let tail = move |ctx: &mut Ctx<'s>| hash_template_tail(ctx, directive.span);
            tokens(&DIRECTIVE, DIR_IGNORE, tail).parse_next(ctx)
        }
        "#module" => {
            let tail = move |ctx: &mut Ctx<'s>| hash_module_tail(ctx, directive.span);
            tokens(&DIRECTIVE, DIR_IGNORE, tail).parse_next(ctx)
        }
        _ => {
            ctx.report_at(
                &format!("unrecognized directive {}", directive.text),
                directive.span.0,
            );
            tokens(&DIRECTIVE, DIR_IGNORE, skip_line).parse_next(ctx)
        }
    }
}

fn skip_line<'s>(ctx: &mut Ctx<'s>) -> PR<'s, ()> {
    (repeat(any_not(kind("eol"))), opt(kind("eol")))
        .map(|_| ())
        .parse_next(ctx)
}

fn directive_args<'s>(ctx: &mut Ctx<'s>) -> PR<'s, Vec<String>> {
    (
        text("("),
        with_sep(text(","), or((kind("word"), kind("digits")))),
        req(text(")"), "text ')'"),
    )
        .map(|(_, tokens, _)| tokens.iter().map(|t| t.text.to_owned()).collect())
        .parse_next(ctx)
}

fn directive_path<'s>(ctx: &mut Ctx<'s>) -> PR<'s, Vec<String>> {
    let dotted = kind("relpath").map(|token: Token| relpath_segments(token.text));
    let sep = or((text("::"), text("/")));
    let worded = (kind("word"), repeat((sep, kind("word")))).map(|(first, rest)| {
        let mut segments = vec![first.text.to_owned()];
        segments.extend(rest.into_iter().map(|(_, w)| w.text.to_owned()));
        segments
    });
    or((dotted, worded)).parse_next(ctx)
}

// `#import name(args?) as alias from path`
fn hash_import_tail<'s>(ctx: &mut Ctx<'s>, dir_span: Span) -> PR<'s, ()> {
    let p = (
        req(kind("word"), "import name"),
        opt(directive_args),
        opt((text("as"), req(kind("word"), "import alias"))),
        req(text("from"), "text 'from'"),
        req(directive_path, "import path"),
        opt(kind("eol")),
    );
    let m = p.parse_next(ctx)?;
    let (name, args, as_name, _, path, _) = m.value;
    let (Some(name), Some(path)) = (name, path) else {
        return Ok(Match::empty((), m.span.1));
    };
    let leaf = SimpleSegment {
        name: name.text.to_owned(),
        args,
        as_name: as_name.and_then(|(_, alias)| alias.map(|t| t.text.to_owned())),
    };
    let tree = prepend_path(path, ImportTree::from_path(vec![leaf]));
    let span = (dir_span.0, m.span.1.max(dir_span.1));
    ctx.state.push(Elem::TreeImport(TreeImportElem { span, tree }));
    Ok(Match::empty((), span.1))
}

// `#export (A, B)`; the parameter list must close before the line ends.
// When it does not, the caret belongs under the opening `(`.
fn hash_export_tail<'s>(ctx: &mut Ctx<'s>, dir_span: Span) -> PR<'s, ()> {
    let open = opt(text("(")).parse_next(ctx)?;
    let Some(open) = open.value else {
        let eol = opt(kind("eol")).parse_next(ctx)?;
        let span = (dir_span.0, eol.span.1.max(dir_span.1));
        ctx.state
            .push(Elem::Export(ExportElem { params: Vec::new(), span }));
        return Ok(Match::empty((), span.1));
    };
    let words = with_sep(text(","), kind("word")).parse_next(ctx)?;
    let close = req_at(text(")"), "text ')'", open.span.0).parse_next(ctx)?;
    let eol = opt(kind("eol")).parse_next(ctx)?;
    let span = (dir_span.0, eol.span.1.max(close.span.1).max(dir_span.1));
    // An unclosed list was already reported; drop it entirely so a
    // half-parsed export does not mark the next declaration.
    if close.value.is_some() {
        let params = words.value.iter().map(|w| w.text.to_owned()).collect();
        ctx.state.push(Elem::Export(ExportElem { params, span }));
    }
    Ok(Match::empty((), span.1))
}

// `#extends Name(args?) as Alias from path`
fn hash_extends_tail<'s>(ctx: &mut Ctx<'s>, dir_span: Span) -> PR<'s, ()> {
    let p = (
        req(kind("word"), "struct name"),
        opt(directive_args),
        opt((text("as"), req(kind("word"), "alias"))),
        req(text("from"), "text 'from'"),
        req(directive_path, "module path"),
        opt(kind("eol")),
    );
    let m = p.parse_next(ctx)?;
    let (name, args, as_name, _, path, _) = m.value;
    let (Some(name), Some(path)) = (name, path) else {
        return Ok(Match::empty((), m.span.1));
    };
    let span = (dir_span.0, m.span.1.max(dir_span.1));
    ctx.state.push(Elem::Extends(ExtendsElem {
        name: name.text.to_owned(),
        args: args.unwrap_or_default(),
        as_name: as_name.and_then(|(_, alias)| alias.map(|t| t.text.to_owned())),
        from_path: path,
        span,
        target: std::cell::RefCell::new(None),
    }));
    Ok(Match::empty((), span.1))
}

fn hash_template_tail<'s>(ctx: &mut Ctx<'s>, dir_span: Span) -> PR<'s, ()> {
    let m = (req(kind("word"), "template name"), opt(kind("eol"))).parse_next(ctx)?;
    let span = (dir_span.0, m.span.1.max(dir_span.1));
    if let Some(name) = m.value.0 {
        ctx.state.push(Elem::Template(TemplateElem {
            name: name.text.to_owned(),
            span,
        }));
    }
    Ok(Match::empty((), span.1))
}

fn hash_module_tail<'s>(ctx: &mut Ctx<'s>, dir_span: Span) -> PR<'s, ()> {
    let m = (req(directive_path, "module path"), opt(kind("eol"))).parse_next(ctx)?;
    let span = (dir_span.0, m.span.1.max(dir_span.1));
    if let Some(path) = m.value.0 {
        ctx.state.push(Elem::Module(ModuleElem { name: path.join("/"), span }));
    }
    Ok(Match::empty((), span.1))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use weld_parse::sink::capture_reports;

    use super::*;

    fn parse(src: &str) -> Vec<Elem> {
        parse_module_text(src, None, None)
    }

    fn only_fn(elems: &[Elem]) -> &FnElem {
        let fns: Vec<&FnElem> = elems
            .iter()
            .filter_map(|elem| match elem {
                Elem::Fn(func) => Some(func),
                _ => None,
            })
            .collect();
        assert_eq!(fns.len(), 1, "expected exactly one fn in {elems:?}");
        fns[0]
    }

    #[test]
    fn collects_calls_not_builtins_or_keywords() {
        let elems = parse("fn scene() { let c = max(1, 2); if (c) { helper(); } shade(c); }");
        let func = only_fn(&elems);
        let calls: Vec<&str> = func.calls.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(calls, ["helper", "shade"]);
    }

    #[test]
    fn call_spans_sit_inside_the_fn_span() {
        let src = "fn scene() { helper(); }";
        let elems = parse(src);
        let func = only_fn(&elems);
        let call = &func.calls[0];
        assert_eq!(call.span, (13, 19));
        assert!(func.span.0 <= call.span.0 && call.span.1 <= func.span.1);
    }

    #[test]
    fn signature_and_body_types_are_collected() {
        let elems = parse(
            "fn draw(light: Light, n: u32) -> Color { var tmp: Mat = m(); return tmp.c; }",
        );
        let func = only_fn(&elems);
        let types: Vec<&str> = func.type_refs.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(types, ["Light", "Color", "Mat"]);
        assert_eq!(func.name, "draw");
    }

    #[test]
    fn struct_members_keep_their_own_type_refs() {
        let elems = parse("struct Scene { lights: array<Light, 4>, count: u32 }");
        let Elem::Struct(strukt) = &elems[0] else {
            panic!("expected struct, got {elems:?}")
        };
        assert_eq!(strukt.name, "Scene");
        assert_eq!(strukt.members.len(), 2);
        let light_refs: Vec<&str> = strukt.members[0]
            .type_refs
            .iter()
            .map(|t| t.name.as_str())
            .collect();
        assert_eq!(light_refs, ["Light"]);
        assert!(strukt.members[1].type_refs.is_empty());
    }

    #[test]
    fn alias_records_target_and_refs() {
        let elems = parse("alias Positions = array<vec3<f32>>; alias B = MyThing;");
        let Elem::Alias(positions) = &elems[0] else {
            panic!("expected alias")
        };
        assert_eq!(positions.target_name, "array");
        assert!(positions.type_refs.is_empty());
        let Elem::Alias(b) = &elems[1] else { panic!("expected alias") };
        assert_eq!(b.type_refs[0].name, "MyThing");
    }

    #[test]
    fn global_var_with_attributes_and_template() {
        let elems = parse("@group(0) @binding(0) var<uniform> u: Uniforms;");
        let Elem::Var(var) = &elems[0] else { panic!("expected var") };
        assert_eq!(var.name, "u");
        let refs: Vec<&str> = var.type_refs.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(refs, ["Uniforms"]);
    }

    #[test]
    fn module_decl_accepts_all_separators() {
        for src in ["module a.b.c", "module a::b::c;", "module a/b/c"] {
            let elems = parse(src);
            let Elem::Module(module) = &elems[0] else {
                panic!("expected module elem for {src}")
            };
            assert_eq!(module.name, "a/b/c", "{src}");
        }
    }

    #[test]
    fn gleam_import_with_branch_list() {
        let elems = parse("import a::b::{c, d::e};");
        let Elem::TreeImport(import) = &elems[0] else {
            panic!("expected import")
        };
        let flat = import.tree.flatten();
        assert_eq!(flat.len(), 2);
        assert_eq!(flat[0].exp_segments, ["a", "b", "c"]);
        assert_eq!(flat[1].exp_segments, ["a", "b", "d", "e"]);
    }

    #[test]
    fn import_with_args_alias_and_relative_path() {
        for src in [
            "import foo(u32) as f from ./file1;",
            "#import foo(u32) as f from ./file1\n",
        ] {
            let elems = parse(src);
            let Elem::TreeImport(import) = &elems[0] else {
                panic!("expected import for {src}")
            };
            let flat = import.tree.flatten();
            assert_eq!(flat[0].exp_segments, ["file1", "foo"], "{src}");
            assert_eq!(flat[0].imp_name, "f", "{src}");
            assert_eq!(flat[0].args.as_deref(), Some(&["u32".to_owned()][..]), "{src}");
        }
    }

    #[test]
    fn export_forms_produce_params() {
        let elems = parse("export fn plain() {}");
        assert!(matches!(&elems[0], Elem::Export(e) if e.params.is_empty()));

        let elems = parse("export(A, B) fn generic(a: A, b: B) {}");
        let Elem::Export(export) = &elems[0] else { panic!("expected export") };
        assert_eq!(export.params, ["A", "B"]);

        let elems = parse("#export (Elem)\nfn reduce() {}");
        let Elem::Export(export) = &elems[0] else { panic!("expected export") };
        assert_eq!(export.params, ["Elem"]);
    }

    #[test]
    fn extends_directive_is_parsed() {
        let elems = parse("#extends Light(T) as L from ./lib\nstruct S { n: u32 }");
        let Elem::Extends(extends) = &elems[0] else {
            panic!("expected extends, got {elems:?}")
        };
        assert_eq!(extends.name, "Light");
        assert_eq!(extends.args, ["T"]);
        assert_eq!(extends.as_name.as_deref(), Some("L"));
        assert_eq!(extends.from_path, ["lib"]);
    }

    #[test]
    fn template_directive_is_parsed() {
        let elems = parse("#template simple\nfn f() {}");
        assert!(matches!(&elems[0], Elem::Template(t) if t.name == "simple"));
    }

    #[test]
    fn unterminated_export_params_report_and_produce_nothing() {
        let src = "#export (A\n   )\n";
        let (elems, reports) = capture_reports(|| parse(src));
        let report = reports
            .iter()
            .find(|r| r.contains("expected text ')'"))
            .unwrap_or_else(|| panic!("missing report in {reports:?}"));
        // The caret sits under the opening `(`.
        let lines: Vec<&str> = report.lines().collect();
        assert_eq!(lines[1], "#export (A");
        let caret_column = lines[2].find('^').unwrap();
        assert_eq!(caret_column, src.find('(').unwrap());
        let produced = elems
            .iter()
            .filter(|elem| matches!(elem, Elem::Export(_) | Elem::Fn(_)))
            .count();
        assert_eq!(produced, 0, "{elems:?}");
    }

    #[test]
    fn nested_block_comments_are_skipped() {
        let elems = parse("/* outer /* inner */ still comment */ fn f() { ok(); }");
        let func = only_fn(&elems);
        assert_eq!(func.calls[0].name, "ok");
    }

    #[test]
    fn global_directives_are_skipped_through_semicolon() {
        let elems = parse("enable f16; const_assert 1 < 2; fn f() {}");
        assert!(matches!(elems[0], Elem::GlobalDirective(_)));
        assert!(matches!(elems[1], Elem::GlobalDirective(_)));
        assert!(matches!(elems[2], Elem::Fn(_)));
    }

    #[test]
    fn budget_overrun_reports_and_yields_nothing() {
        let (elems, reports) = capture_reports(|| {
            parse_module_text("fn f() { a(); b(); c(); }", None, Some(4))
        });
        assert!(elems.is_empty());
        assert!(
            reports.iter().any(|r| r.contains("parse budget exhausted")),
            "{reports:?}"
        );
    }

    #[test]
    fn disabled_region_spaces_parse_to_nothing() {
        // What the preprocessor leaves behind for `#if false` regions.
        let elems = parse("       \n        \n      \n");
        assert!(elems.is_empty());
    }

    #[test]
    fn lex_garbage_recovers_and_reports() {
        let (elems, reports) = capture_reports(|| parse("fn f() { § ok(); }"));
        let func = only_fn(&elems);
        assert_eq!(func.calls[0].name, "ok");
        assert!(
            reports.iter().any(|r| r.contains("unrecognized character")),
            "{reports:?}"
        );
    }
}
