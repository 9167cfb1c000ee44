//! Line-oriented parser for `.pk` schema files.
//!
//! Parsing runs in two passes. The scan pass turns each line into a raw
//! declaration and attaches comments. The resolve pass then checks names
//! against the file and its imports, assigns transaction and publish IDs and
//! builds the [`Namespace`]. Declarations may therefore appear in any order.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use tracing::debug;

use crate::binary;
use crate::context::ParseContext;
use crate::error::{ParseError, Result};
use crate::model::{
    Constant, Enum, EnumValue, Field, FieldType, Message, Name, Namespace, Publish, Transaction,
};

/// Extension of IDL source files.
pub const SCHEMA_EXTENSION: &str = "pk";
/// Extension of precompiled binary schemas.
pub const BINARY_EXTENSION: &str = "pkb";

/// Entry points for turning schema sources into namespaces.
pub struct Parser;

impl Parser {
    /// Parse a schema file into `ctx` and return the new namespace name.
    ///
    /// The namespace is `parent_namespace.<file stem>`, or just the stem when
    /// `parent_namespace` is empty. A `.pkb` file is loaded as a precompiled
    /// schema and keeps the namespace name stored inside it.
    pub fn parse_file(
        path: &Path,
        parent_namespace: &str,
        ctx: &mut ParseContext,
    ) -> Result<String> {
        let io_error = |source| ParseError::Io {
            path: path.to_path_buf(),
            source,
        };

        if path.extension().is_some_and(|ext| ext == BINARY_EXTENSION) {
            let bytes = std::fs::read(path).map_err(io_error)?;
            return binary::load_namespace(&bytes, ctx);
        }

        let stem = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| ParseError::Syntax {
                line: 0,
                message: format!("schema file name is not valid UTF-8: {}", path.display()),
            })?;
        let namespace = if parent_namespace.is_empty() {
            stem.to_string()
        } else {
            format!("{parent_namespace}.{stem}")
        };

        let source = std::fs::read_to_string(path).map_err(io_error)?;
        Self::parse_str(&source, &namespace, ctx)?;
        Ok(namespace)
    }

    /// Parse schema source text as `namespace` and add it to `ctx`.
    pub fn parse_str(source: &str, namespace: &str, ctx: &mut ParseContext) -> Result<()> {
        if !is_path(namespace) {
            return Err(ParseError::Syntax {
                line: 0,
                message: format!("invalid namespace name '{namespace}'"),
            });
        }
        if ctx.contains(namespace) {
            return Err(ParseError::DuplicateNamespace(namespace.to_string()));
        }

        let raw = scan(source)?;
        let (parsed, next_id) = Resolver::new(ctx, namespace, &raw)?.resolve()?;

        debug!(
            namespace,
            constants = parsed.constants.len(),
            enums = parsed.enums.len(),
            messages = parsed.messages.len(),
            transactions = parsed.transactions.len(),
            publishes = parsed.publishes.len(),
            "parsed schema"
        );
        ctx.insert(parsed, next_id)
    }
}

#[derive(Debug, Default)]
struct RawFile {
    imports: Vec<RawImport>,
    constants: Vec<RawConstant>,
    enums: Vec<RawEnum>,
    messages: Vec<RawMessage>,
    endpoints: Vec<RawEndpoint>,
}

#[derive(Debug)]
struct RawImport {
    line: usize,
    name: String,
}

#[derive(Debug)]
struct RawConstant {
    line: usize,
    ty: String,
    name: String,
    value: String,
    comments: Vec<String>,
    inline_comment: Option<String>,
}

#[derive(Debug)]
struct RawEnum {
    line: usize,
    name: String,
    values: Vec<RawEnumValue>,
    comments: Vec<String>,
}

#[derive(Debug)]
struct RawEnumValue {
    line: usize,
    label: String,
    value: Option<i64>,
    comments: Vec<String>,
    inline_comment: Option<String>,
}

#[derive(Debug)]
struct RawMessage {
    line: usize,
    name: String,
    fields: Vec<RawField>,
    comments: Vec<String>,
}

#[derive(Debug)]
struct RawField {
    line: usize,
    name: String,
    ty: String,
    optional: bool,
    comments: Vec<String>,
    inline_comment: Option<String>,
}

#[derive(Debug)]
enum EndpointKind {
    Transaction { request: String, response: String },
    Publish { message: String },
}

#[derive(Debug)]
struct RawEndpoint {
    line: usize,
    name: String,
    kind: EndpointKind,
    comments: Vec<String>,
}

#[derive(Debug)]
enum Block {
    Message(RawMessage),
    Enum(RawEnum),
}

impl Block {
    fn line(&self) -> usize {
        match self {
            Block::Message(m) => m.line,
            Block::Enum(e) => e.line,
        }
    }
}

fn syntax(line: usize, message: impl Into<String>) -> ParseError {
    ParseError::Syntax {
        line,
        message: message.into(),
    }
}

fn scan(source: &str) -> Result<RawFile> {
    let mut file = RawFile::default();
    let mut pending: Vec<String> = Vec::new();
    let mut block: Option<Block> = None;

    for (index, text) in source.lines().enumerate() {
        let line = index + 1;
        let (code, comment) = split_comment(text);
        let code = code.trim();

        if code.is_empty() {
            if let Some(comment) = comment {
                pending.push(comment.to_string());
            }
            continue;
        }

        let comments = std::mem::take(&mut pending);
        let inline_comment = comment
            .filter(|c| !c.trim().is_empty())
            .map(str::to_string);

        if let Some(open) = block.as_mut() {
            if code == "}" || code == "};" {
                match block.take() {
                    Some(Block::Message(message)) => file.messages.push(message),
                    Some(Block::Enum(enumeration)) => file.enums.push(enumeration),
                    None => {}
                }
                continue;
            }
            if code.ends_with('{') {
                return Err(ParseError::NestedBlock { line });
            }
            match open {
                Block::Message(message) => {
                    message
                        .fields
                        .push(scan_field(line, code, comments, inline_comment)?);
                }
                Block::Enum(enumeration) => {
                    enumeration
                        .values
                        .push(scan_enum_value(line, code, comments, inline_comment)?);
                }
            }
            continue;
        }

        if code.starts_with('}') {
            return Err(ParseError::UnexpectedClose { line });
        }

        let (keyword, rest) = code
            .split_once(char::is_whitespace)
            .map_or((code, ""), |(keyword, rest)| (keyword, rest.trim()));

        match keyword {
            "import" => {
                let name = statement(line, rest)?;
                if !is_path(name) {
                    return Err(syntax(line, format!("invalid import '{name}'")));
                }
                file.imports.push(RawImport {
                    line,
                    name: name.to_string(),
                });
            }
            "constant" => {
                file.constants
                    .push(scan_constant(line, rest, comments, inline_comment)?);
            }
            "message" => {
                block = Some(Block::Message(RawMessage {
                    line,
                    name: block_header(line, rest)?,
                    fields: Vec::new(),
                    comments,
                }));
            }
            "enum" => {
                block = Some(Block::Enum(RawEnum {
                    line,
                    name: block_header(line, rest)?,
                    values: Vec::new(),
                    comments,
                }));
            }
            "transaction" => {
                let (name, args) = bracketed(line, rest)?;
                let [request, response]: [String; 2] = args.try_into().map_err(|_| {
                    syntax(line, "transaction takes [Request, Response] messages")
                })?;
                file.endpoints.push(RawEndpoint {
                    line,
                    name,
                    kind: EndpointKind::Transaction { request, response },
                    comments,
                });
            }
            "publish" => {
                let (name, args) = bracketed(line, rest)?;
                let [message]: [String; 1] = args
                    .try_into()
                    .map_err(|_| syntax(line, "publish takes exactly one [Message]"))?;
                file.endpoints.push(RawEndpoint {
                    line,
                    name,
                    kind: EndpointKind::Publish { message },
                    comments,
                });
            }
            _ => return Err(syntax(line, format!("unrecognized declaration '{code}'"))),
        }
    }

    if let Some(open) = block {
        return Err(ParseError::UnterminatedBlock { line: open.line() });
    }

    Ok(file)
}

/// Split a line at the first `#` outside double quotes.
fn split_comment(text: &str) -> (&str, Option<&str>) {
    let mut in_quotes = false;
    let mut escaped = false;
    for (index, c) in text.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            '#' if !in_quotes => return (&text[..index], Some(text[index + 1..].trim_end())),
            _ => {}
        }
    }
    (text, None)
}

fn statement(line: usize, text: &str) -> Result<&str> {
    text.trim()
        .strip_suffix(';')
        .map(str::trim)
        .ok_or_else(|| syntax(line, "expected ';' at end of declaration"))
}

fn block_header(line: usize, rest: &str) -> Result<String> {
    let name = rest
        .strip_suffix('{')
        .map(str::trim)
        .ok_or_else(|| syntax(line, "expected '{' after block name"))?;
    if !is_ident(name) {
        return Err(syntax(line, format!("invalid name '{name}'")));
    }
    Ok(name.to_string())
}

/// Parse `name[A, B];` into the name and the bracketed arguments.
fn bracketed(line: usize, rest: &str) -> Result<(String, Vec<String>)> {
    let body = statement(line, rest)?;
    let (name, args) = body
        .split_once('[')
        .ok_or_else(|| syntax(line, "expected '[' after name"))?;
    let args = args
        .strip_suffix(']')
        .ok_or_else(|| syntax(line, "expected ']' before ';'"))?;

    let name = name.trim();
    if !is_ident(name) {
        return Err(syntax(line, format!("invalid name '{name}'")));
    }
    let args: Vec<String> = args.split(',').map(|arg| arg.trim().to_string()).collect();
    if let Some(bad) = args.iter().find(|arg| !is_path(arg)) {
        return Err(syntax(line, format!("invalid message name '{bad}'")));
    }
    Ok((name.to_string(), args))
}

fn scan_constant(
    line: usize,
    rest: &str,
    comments: Vec<String>,
    inline_comment: Option<String>,
) -> Result<RawConstant> {
    let body = statement(line, rest)?;
    let (declaration, value) = body
        .split_once('=')
        .ok_or_else(|| syntax(line, "constant needs '= value'"))?;
    let (ty, name) = match declaration.split_whitespace().collect::<Vec<_>>()[..] {
        [ty, name] => (ty, name),
        _ => return Err(syntax(line, "constant is declared as '<type> <name> = <value>'")),
    };
    if !is_ident(name) {
        return Err(syntax(line, format!("invalid constant name '{name}'")));
    }
    let value = value.trim();
    if value.is_empty() {
        return Err(syntax(line, "constant value is empty"));
    }
    Ok(RawConstant {
        line,
        ty: ty.to_string(),
        name: name.to_string(),
        value: value.to_string(),
        comments,
        inline_comment,
    })
}

fn scan_field(
    line: usize,
    code: &str,
    comments: Vec<String>,
    inline_comment: Option<String>,
) -> Result<RawField> {
    let body = statement(line, code)?;
    let (optional, ty, name) = match body.split_whitespace().collect::<Vec<_>>()[..] {
        ["optional", ty, name] => (true, ty, name),
        [ty, name] => (false, ty, name),
        _ => return Err(syntax(line, format!("invalid field '{body}'"))),
    };
    if !is_ident(name) {
        return Err(syntax(line, format!("invalid field name '{name}'")));
    }
    Ok(RawField {
        line,
        name: name.to_string(),
        ty: ty.to_string(),
        optional,
        comments,
        inline_comment,
    })
}

fn scan_enum_value(
    line: usize,
    code: &str,
    comments: Vec<String>,
    inline_comment: Option<String>,
) -> Result<RawEnumValue> {
    let body = statement(line, code)?;
    let (label, value) = match body.split_once('=') {
        Some((label, value)) => (label.trim(), Some(parse_integer(line, value.trim())?)),
        None => (body, None),
    };
    if !is_ident(label) {
        return Err(syntax(line, format!("invalid enum label '{label}'")));
    }
    Ok(RawEnumValue {
        line,
        label: label.to_string(),
        value,
        comments,
        inline_comment,
    })
}

fn parse_integer(line: usize, text: &str) -> Result<i64> {
    let parsed = match text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
    {
        Some(hex) => i64::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|_| syntax(line, format!("invalid integer '{text}'")))
}

fn is_ident(text: &str) -> bool {
    let mut chars = text.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub(crate) fn is_path(text: &str) -> bool {
    !text.is_empty() && text.split('.').all(is_ident)
}

/// `{name}` placeholders in a constant value, in order of appearance.
pub(crate) fn placeholders(value: &str) -> Vec<&str> {
    let mut found = Vec::new();
    let mut rest = value;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            break;
        };
        let candidate = after[..close].trim();
        if is_path(candidate) && !found.contains(&candidate) {
            found.push(candidate);
        }
        rest = &after[close + 1..];
    }
    found
}

struct Resolver<'a> {
    ctx: &'a ParseContext,
    namespace: &'a str,
    raw: &'a RawFile,
    imports: Vec<&'a Namespace>,
}

impl<'a> Resolver<'a> {
    fn new(ctx: &'a ParseContext, namespace: &'a str, raw: &'a RawFile) -> Result<Self> {
        let mut imports: Vec<&Namespace> = Vec::new();
        for import in &raw.imports {
            let found = ctx
                .namespace(&import.name)
                .ok_or_else(|| ParseError::UnknownImport {
                    line: import.line,
                    name: import.name.clone(),
                })?;
            if !imports.iter().any(|ns| ns.name == found.name) {
                imports.push(found);
            }
        }
        Ok(Self {
            ctx,
            namespace,
            raw,
            imports,
        })
    }

    fn resolve(self) -> Result<(Namespace, u16)> {
        self.check_duplicates()?;

        let mut namespace = Namespace::new(self.namespace);
        namespace.imports = self.imports.iter().map(|ns| ns.name.clone()).collect();
        namespace.constants = self
            .raw
            .constants
            .iter()
            .map(|c| self.resolve_constant(c))
            .collect::<Result<_>>()?;
        namespace.enums = self
            .raw
            .enums
            .iter()
            .map(resolve_enum)
            .collect::<Result<_>>()?;
        namespace.messages = self
            .raw
            .messages
            .iter()
            .map(|m| self.resolve_message(m))
            .collect::<Result<_>>()?;
        check_recursion(&namespace)?;

        let next_id = self.assign_endpoints(&mut namespace)?;
        debug!(
            namespace = self.namespace,
            ctx_next_id = self.ctx.next_id(),
            next_id,
            "assigned endpoint ids"
        );
        Ok((namespace, next_id))
    }

    fn check_duplicates(&self) -> Result<()> {
        let types = self
            .raw
            .messages
            .iter()
            .map(|m| (m.line, m.name.as_str()))
            .chain(self.raw.enums.iter().map(|e| (e.line, e.name.as_str())));
        first_duplicate(types)?;
        first_duplicate(
            self.raw
                .constants
                .iter()
                .map(|c| (c.line, c.name.as_str())),
        )?;
        first_duplicate(
            self.raw
                .endpoints
                .iter()
                .map(|e| (e.line, e.name.as_str())),
        )?;
        for message in &self.raw.messages {
            first_duplicate(message.fields.iter().map(|f| (f.line, f.name.as_str())))?;
        }
        for enumeration in &self.raw.enums {
            first_duplicate(
                enumeration
                    .values
                    .iter()
                    .map(|v| (v.line, v.label.as_str())),
            )?;
        }
        Ok(())
    }

    /// Split `a.b.Name` into an imported namespace and its member name.
    fn imported<'t>(&self, text: &'t str) -> Option<(&'a Namespace, &'t str)> {
        let (namespace, member) = text.rsplit_once('.')?;
        let found = self.imports.iter().find(|ns| ns.name == namespace)?;
        Some((*found, member))
    }

    fn resolve_type(&self, line: usize, text: &str) -> Result<(FieldType, Option<Name>)> {
        if let Some(ty) = FieldType::from_keyword(text) {
            return Ok((ty, None));
        }

        if self.raw.messages.iter().any(|m| m.name == text) {
            return Ok((FieldType::Message, Some(Name::new(text, self.namespace))));
        }
        if self.raw.enums.iter().any(|e| e.name == text) {
            return Ok((FieldType::Enum, Some(Name::new(text, self.namespace))));
        }

        if let Some((namespace, member)) = self.imported(text) {
            if namespace.message(member).is_some() {
                return Ok((FieldType::Message, Some(Name::new(member, &namespace.name))));
            }
            if namespace.enumeration(member).is_some() {
                return Ok((FieldType::Enum, Some(Name::new(member, &namespace.name))));
            }
        }

        Err(ParseError::Unresolved {
            line,
            name: text.to_string(),
        })
    }

    fn resolve_message_name(&self, line: usize, text: &str) -> Result<Name> {
        match self.resolve_type(line, text)? {
            (FieldType::Message, Some(name)) => Ok(name),
            _ => Err(ParseError::Unresolved {
                line,
                name: text.to_string(),
            }),
        }
    }

    fn resolve_field(&self, raw: &RawField) -> Result<Field> {
        let list_inner = raw
            .ty
            .strip_prefix("list[")
            .map(|rest| {
                rest.strip_suffix(']')
                    .map(str::trim)
                    .ok_or_else(|| syntax(raw.line, format!("invalid list type '{}'", raw.ty)))
            })
            .transpose()?;

        let (ty, element, reference) = match list_inner {
            Some(inner) => {
                if inner.starts_with("list[") {
                    return Err(ParseError::NestedList { line: raw.line });
                }
                let (element, reference) = self.resolve_type(raw.line, inner)?;
                (FieldType::List, Some(element), reference)
            }
            None => {
                let (ty, reference) = self.resolve_type(raw.line, &raw.ty)?;
                (ty, None, reference)
            }
        };

        Ok(Field {
            name: raw.name.clone(),
            ty,
            element,
            optional: raw.optional,
            reference,
            comments: raw.comments.clone(),
            inline_comment: raw.inline_comment.clone(),
        })
    }

    fn resolve_message(&self, raw: &RawMessage) -> Result<Message> {
        Ok(Message {
            name: raw.name.clone(),
            fields: raw
                .fields
                .iter()
                .map(|f| self.resolve_field(f))
                .collect::<Result<_>>()?,
            comments: raw.comments.clone(),
        })
    }

    fn resolve_constant(&self, raw: &RawConstant) -> Result<Constant> {
        let ty = FieldType::from_keyword(&raw.ty)
            .filter(|ty| ty.is_constant_type())
            .ok_or_else(|| ParseError::InvalidConstantType {
                line: raw.line,
                ty: raw.ty.clone(),
            })?;

        let mut references = Vec::new();
        for placeholder in placeholders(&raw.value) {
            let local = self.raw.constants.iter().any(|c| c.name == placeholder);
            let name = if local {
                Name::new(placeholder, self.namespace)
            } else {
                self.imported(placeholder)
                    .filter(|(ns, member)| ns.constant(member).is_some())
                    .map(|(ns, member)| Name::new(member, &ns.name))
                    .ok_or_else(|| ParseError::Unresolved {
                        line: raw.line,
                        name: placeholder.to_string(),
                    })?
            };
            references.push(name);
        }

        Ok(Constant {
            name: raw.name.clone(),
            ty,
            value: raw.value.clone(),
            references,
            comments: raw.comments.clone(),
            inline_comment: raw.inline_comment.clone(),
        })
    }

    /// Assign IDs in declaration order, starting past every imported ID and
    /// past anything the session already handed out.
    fn assign_endpoints(&self, namespace: &mut Namespace) -> Result<u16> {
        let mut next = self.ctx.next_id();
        for import in &self.imports {
            if let Some(max) = import.max_id() {
                next = next.max(u16::from(max) + 1);
            }
        }

        for raw in &self.raw.endpoints {
            let id = u8::try_from(next).map_err(|_| ParseError::IdOverflow {
                name: raw.name.clone(),
                id: next,
            })?;
            next += 1;

            match &raw.kind {
                EndpointKind::Transaction { request, response } => {
                    namespace.transactions.push(Transaction {
                        name: raw.name.clone(),
                        id,
                        request: self.resolve_message_name(raw.line, request)?,
                        response: self.resolve_message_name(raw.line, response)?,
                        comments: raw.comments.clone(),
                    });
                }
                EndpointKind::Publish { message } => {
                    namespace.publishes.push(Publish {
                        name: raw.name.clone(),
                        id,
                        message: self.resolve_message_name(raw.line, message)?,
                        comments: raw.comments.clone(),
                    });
                }
            }
        }
        Ok(next)
    }
}

fn first_duplicate<'n>(names: impl Iterator<Item = (usize, &'n str)>) -> Result<()> {
    let mut seen = HashSet::new();
    for (line, name) in names {
        if !seen.insert(name) {
            return Err(ParseError::Duplicate {
                line,
                name: name.to_string(),
            });
        }
    }
    Ok(())
}

fn resolve_enum(raw: &RawEnum) -> Result<Enum> {
    if raw.values.is_empty() {
        return Err(syntax(raw.line, format!("enum '{}' declares no values", raw.name)));
    }
    let mut values = Vec::with_capacity(raw.values.len());
    let mut used = HashSet::new();
    let mut next: i64 = 0;

    for value in &raw.values {
        let number = value.value.unwrap_or(next);
        let byte = u8::try_from(number).map_err(|_| ParseError::EnumValueRange {
            line: value.line,
            value: number,
        })?;
        if !used.insert(byte) {
            return Err(syntax(
                value.line,
                format!("enum value {byte} is already used in '{}'", raw.name),
            ));
        }
        next = number + 1;
        values.push(EnumValue {
            label: value.label.clone(),
            value: byte,
            comments: value.comments.clone(),
            inline_comment: value.inline_comment.clone(),
        });
    }

    Ok(Enum {
        name: raw.name.clone(),
        values,
        comments: raw.comments.clone(),
    })
}

/// Reject messages that contain themselves through non-list message fields.
/// Such a message has no finite encoding.
pub(crate) fn check_recursion(namespace: &Namespace) -> Result<()> {
    let edges: HashMap<&str, Vec<&str>> = namespace
        .messages
        .iter()
        .map(|message| {
            let children = message
                .fields
                .iter()
                .filter(|f| f.ty == FieldType::Message)
                .filter_map(|f| f.reference.as_ref())
                .filter(|r| r.namespace == namespace.name)
                .map(|r| r.name.as_str())
                .collect();
            (message.name.as_str(), children)
        })
        .collect();

    fn visit<'n>(
        node: &'n str,
        edges: &HashMap<&'n str, Vec<&'n str>>,
        stack: &mut Vec<&'n str>,
        done: &mut HashSet<&'n str>,
    ) -> Result<()> {
        if done.contains(node) {
            return Ok(());
        }
        if stack.contains(&node) {
            return Err(ParseError::RecursiveMessage {
                name: node.to_string(),
            });
        }
        stack.push(node);
        for &child in edges.get(node).into_iter().flatten() {
            visit(child, edges, stack, done)?;
        }
        stack.pop();
        done.insert(node);
        Ok(())
    }

    let mut done = HashSet::new();
    for message in &namespace.messages {
        visit(&message.name, &edges, &mut Vec::new(), &mut done)?;
    }
    Ok(())
}
