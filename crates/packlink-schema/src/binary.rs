//! Precompiled `.pkb` schemas.
//!
//! A binary schema is a [`Namespace`] encoded as the `NamespaceDef` message of
//! a meta-schema that is itself written in the IDL. Loading one skips parsing
//! but keeps the namespace's own name and IDs.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use bytes::Bytes;
use tracing::debug;

use crate::context::ParseContext;
use crate::engine::{Engine, Record, Value};
use crate::error::{ParseError, Result};
use crate::model::{
    Constant, Enum, EnumValue, Field, FieldType, Message, Name, Namespace, Publish, Transaction,
};
use crate::parser::{check_recursion, Parser};

/// Namespace of the meta-schema.
pub const META_NAMESPACE: &str = "packlink.schema";

/// The schema model described in its own language.
pub const META_SCHEMA: &str = "\
# Wire type tags, in the order of FieldType::ALL.
enum FieldType {
    BOOL = 0;
    UINT8_T;
    UINT16_T;
    UINT32_T;
    UINT64_T;
    INT8_T;
    INT16_T;
    INT32_T;
    INT64_T;
    FLOAT32;
    FLOAT64;
    STRING;
    BYTES;
    LIST;
    MESSAGE;
    ENUM;
}

message Name {
    string name;
    string namespace;
}

message FieldDef {
    string name;
    FieldType kind;
    optional FieldType element;
    bool optional;
    optional Name reference;
    list[string] comments;
    optional string inline_comment;
}

message MessageDef {
    string name;
    list[FieldDef] fields;
    list[string] comments;
}

message EnumValue {
    string label;
    uint8_t value;
    list[string] comments;
    optional string inline_comment;
}

message EnumDef {
    string name;
    list[EnumValue] values;
    list[string] comments;
}

message ConstantDef {
    string name;
    FieldType kind;
    string value;
    list[Name] references;
    list[string] comments;
    optional string inline_comment;
}

message TransactionDef {
    string name;
    uint8_t id;
    Name request;
    Name response;
    list[string] comments;
}

message PublishDef {
    string name;
    uint8_t id;
    Name message;
    list[string] comments;
}

message NamespaceDef {
    string name;
    list[string] imports;
    list[ConstantDef] constants;
    list[EnumDef] enums;
    list[MessageDef] messages;
    list[TransactionDef] transactions;
    list[PublishDef] publishes;
}
";

static META: OnceLock<ParseContext> = OnceLock::new();

/// The parsed meta-schema, built on first use.
pub fn meta_context() -> Result<&'static ParseContext> {
    if let Some(ctx) = META.get() {
        return Ok(ctx);
    }
    let mut ctx = ParseContext::new();
    Parser::parse_str(META_SCHEMA, META_NAMESPACE, &mut ctx)?;
    Ok(META.get_or_init(|| ctx))
}

fn meta(name: &str) -> Name {
    Name::new(name, META_NAMESPACE)
}

/// Serialize a namespace to the binary schema form.
pub fn encode_namespace(namespace: &Namespace) -> Result<Bytes> {
    let ctx = meta_context()?;
    let bytes = Engine::new(ctx).encode(&meta("NamespaceDef"), &namespace_record(namespace))?;
    Ok(bytes)
}

/// Deserialize a binary schema.
pub fn decode_namespace(bytes: &[u8]) -> Result<Namespace> {
    let ctx = meta_context()?;
    let record = Engine::new(ctx).decode_exact(&meta("NamespaceDef"), bytes)?;
    namespace_from(&record)
}

/// Decode a binary schema and add it to `ctx`, returning its namespace name.
///
/// Every namespace it imports must already be in `ctx`. The decoded
/// namespace must pass the checks a parsed one does: unique names, resolvable
/// references, complete field types, distinct IDs and no recursion outside
/// lists.
pub fn load_namespace(bytes: &[u8], ctx: &mut ParseContext) -> Result<String> {
    let namespace = decode_namespace(bytes)?;
    if let Some(missing) = namespace.imports.iter().find(|i| !ctx.contains(i)) {
        return Err(ParseError::UnknownImport {
            line: 0,
            name: missing.clone(),
        });
    }
    Checker {
        namespace: &namespace,
        ctx: &*ctx,
    }
    .check()?;

    let name = namespace.name.clone();
    let next_id = namespace.max_id().map_or(0, |max| u16::from(max) + 1);
    debug!(namespace = %name, next_id, "loaded binary schema");
    ctx.insert(namespace, next_id)?;
    Ok(name)
}

fn invalid(message: String) -> ParseError {
    ParseError::InvalidBinary(message)
}

/// Consistency checks for a namespace that did not come from the parser.
struct Checker<'a> {
    namespace: &'a Namespace,
    ctx: &'a ParseContext,
}

impl<'a> Checker<'a> {
    fn check(&self) -> Result<()> {
        let ns = self.namespace;
        unique(
            "type",
            ns.messages
                .iter()
                .map(|m| m.name.as_str())
                .chain(ns.enums.iter().map(|e| e.name.as_str())),
        )?;
        unique("constant", ns.constants.iter().map(|c| c.name.as_str()))?;
        unique("endpoint", endpoints(ns).map(|(_, name)| name))?;

        for constant in &ns.constants {
            if !constant.ty.is_constant_type() {
                return Err(invalid(format!(
                    "constant '{}' has type {}, which is not a scalar",
                    constant.name,
                    constant.ty.keyword()
                )));
            }
            for reference in &constant.references {
                self.scope(reference)
                    .and_then(|scope| scope.constant(&reference.name))
                    .ok_or_else(|| unresolved("constant", reference))?;
            }
        }
        for enumeration in &ns.enums {
            self.enumeration(enumeration)?;
        }
        for message in &ns.messages {
            unique("field", message.fields.iter().map(|f| f.name.as_str()))?;
            for field in &message.fields {
                self.field(message, field)?;
            }
        }
        for transaction in &ns.transactions {
            self.message(&transaction.request)?;
            self.message(&transaction.response)?;
        }
        for publish in &ns.publishes {
            self.message(&publish.message)?;
        }
        self.ids()?;
        check_recursion(ns)
    }

    /// The namespace a reference may point into: this one or a direct import.
    fn scope(&self, name: &Name) -> Option<&'a Namespace> {
        if name.namespace == self.namespace.name {
            Some(self.namespace)
        } else if self.namespace.imports.contains(&name.namespace) {
            self.ctx.namespace(&name.namespace)
        } else {
            None
        }
    }

    fn message(&self, name: &Name) -> Result<()> {
        self.scope(name)
            .and_then(|scope| scope.message(&name.name))
            .map(drop)
            .ok_or_else(|| unresolved("message", name))
    }

    fn enumeration(&self, enumeration: &Enum) -> Result<()> {
        if enumeration.values.is_empty() {
            return Err(invalid(format!("enum '{}' declares no values", enumeration.name)));
        }
        unique("label", enumeration.values.iter().map(|v| v.label.as_str()))?;
        let mut used = HashSet::new();
        for value in &enumeration.values {
            if !used.insert(value.value) {
                return Err(invalid(format!(
                    "enum value {} is used twice in '{}'",
                    value.value, enumeration.name
                )));
            }
        }
        Ok(())
    }

    fn field(&self, message: &Message, field: &Field) -> Result<()> {
        let problem = |what: &str| invalid(format!("{}.{}: {what}", message.name, field.name));
        let value = match (field.ty, field.element) {
            (FieldType::List, None) => return Err(problem("list without an element type")),
            (FieldType::List, Some(FieldType::List)) => {
                return Err(problem("nested lists are not supported"))
            }
            (FieldType::List, Some(element)) => element,
            (ty, None) => ty,
            (_, Some(_)) => return Err(problem("element type on a field that is not a list")),
        };
        match (value, &field.reference) {
            (FieldType::Message, Some(reference)) => self.message(reference),
            (FieldType::Enum, Some(reference)) => self
                .scope(reference)
                .and_then(|scope| scope.enumeration(&reference.name))
                .map(drop)
                .ok_or_else(|| unresolved("enum", reference)),
            (FieldType::Message | FieldType::Enum, None) => {
                Err(problem("missing type reference"))
            }
            (_, Some(_)) => Err(problem("reference on a built-in type")),
            (_, None) => Ok(()),
        }
    }

    /// IDs must be distinct here and from every ID an import declares.
    fn ids(&self) -> Result<()> {
        let mut taken: HashMap<u8, String> = HashMap::new();
        for import in &self.namespace.imports {
            if let Some(import) = self.ctx.namespace(import) {
                for (id, name) in endpoints(import) {
                    taken.insert(id, format!("{}.{name}", import.name));
                }
            }
        }
        for (id, name) in endpoints(self.namespace) {
            if let Some(owner) = taken.insert(id, name.to_string()) {
                return Err(invalid(format!("ID {id} of '{name}' is already used by '{owner}'")));
            }
        }
        Ok(())
    }
}

fn endpoints(namespace: &Namespace) -> impl Iterator<Item = (u8, &str)> {
    namespace
        .transactions
        .iter()
        .map(|t| (t.id, t.name.as_str()))
        .chain(namespace.publishes.iter().map(|p| (p.id, p.name.as_str())))
}

fn unique<'n>(what: &str, names: impl Iterator<Item = &'n str>) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(invalid(format!("duplicate {what} '{name}'")));
        }
    }
    Ok(())
}

fn unresolved(what: &str, name: &Name) -> ParseError {
    invalid(format!("unresolved {what} '{}'", name.qualified()))
}

fn strings(values: &[String]) -> Value {
    Value::list(values.iter().map(String::as_str))
}

fn kind(ty: FieldType) -> Value {
    Value::Enum(ty.code())
}

fn name_record(name: &Name) -> Value {
    Value::Message(
        Record::new()
            .with("name", name.name.as_str())
            .with("namespace", name.namespace.as_str()),
    )
}

fn with_inline(mut record: Record, inline_comment: &Option<String>) -> Record {
    if let Some(comment) = inline_comment {
        record.insert("inline_comment", comment.as_str());
    }
    record
}

fn field_record(field: &Field) -> Value {
    let mut record = Record::new()
        .with("name", field.name.as_str())
        .with("kind", kind(field.ty))
        .with("optional", field.optional)
        .with("comments", strings(&field.comments));
    if let Some(element) = field.element {
        record.insert("element", kind(element));
    }
    if let Some(reference) = &field.reference {
        record.insert("reference", name_record(reference));
    }
    Value::Message(with_inline(record, &field.inline_comment))
}

fn namespace_record(namespace: &Namespace) -> Record {
    let constants = namespace.constants.iter().map(|c| {
        let record = Record::new()
            .with("name", c.name.as_str())
            .with("kind", kind(c.ty))
            .with("value", c.value.as_str())
            .with("references", Value::list(c.references.iter().map(name_record)))
            .with("comments", strings(&c.comments));
        Value::Message(with_inline(record, &c.inline_comment))
    });

    let enums = namespace.enums.iter().map(|e| {
        let values = e.values.iter().map(|v| {
            let record = Record::new()
                .with("label", v.label.as_str())
                .with("value", v.value)
                .with("comments", strings(&v.comments));
            Value::Message(with_inline(record, &v.inline_comment))
        });
        Record::new()
            .with("name", e.name.as_str())
            .with("values", Value::list(values))
            .with("comments", strings(&e.comments))
    });

    let messages = namespace.messages.iter().map(|m| {
        Record::new()
            .with("name", m.name.as_str())
            .with("fields", Value::list(m.fields.iter().map(field_record)))
            .with("comments", strings(&m.comments))
    });

    let transactions = namespace.transactions.iter().map(|t| {
        Record::new()
            .with("name", t.name.as_str())
            .with("id", t.id)
            .with("request", name_record(&t.request))
            .with("response", name_record(&t.response))
            .with("comments", strings(&t.comments))
    });

    let publishes = namespace.publishes.iter().map(|p| {
        Record::new()
            .with("name", p.name.as_str())
            .with("id", p.id)
            .with("message", name_record(&p.message))
            .with("comments", strings(&p.comments))
    });

    Record::new()
        .with("name", namespace.name.as_str())
        .with("imports", strings(&namespace.imports))
        .with("constants", Value::list(constants))
        .with("enums", Value::list(enums))
        .with("messages", Value::list(messages))
        .with("transactions", Value::list(transactions))
        .with("publishes", Value::list(publishes))
}

fn invalid_field(field: &str, expected: &str) -> ParseError {
    ParseError::InvalidBinary(format!("field '{field}' is not {expected}"))
}

fn string(record: &Record, field: &str) -> Result<String> {
    match record.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        _ => Err(invalid_field(field, "a string")),
    }
}

fn optional_string(record: &Record, field: &str) -> Result<Option<String>> {
    match record.get(field) {
        None => Ok(None),
        Some(_) => string(record, field).map(Some),
    }
}

fn byte(record: &Record, field: &str) -> Result<u8> {
    match record.get(field) {
        Some(Value::U8(v)) => Ok(*v),
        _ => Err(invalid_field(field, "a u8")),
    }
}

fn flag(record: &Record, field: &str) -> Result<bool> {
    match record.get(field) {
        Some(Value::Bool(v)) => Ok(*v),
        _ => Err(invalid_field(field, "a bool")),
    }
}

fn field_type(record: &Record, field: &str) -> Result<FieldType> {
    match record.get(field) {
        Some(Value::Enum(code)) => {
            FieldType::from_code(*code).ok_or_else(|| invalid_field(field, "a known type tag"))
        }
        _ => Err(invalid_field(field, "a type tag")),
    }
}

fn list<'r>(record: &'r Record, field: &str) -> Result<&'r [Value]> {
    match record.get(field) {
        Some(Value::List(items)) => Ok(items),
        _ => Err(invalid_field(field, "a list")),
    }
}

fn records<'r>(record: &'r Record, field: &str) -> Result<Vec<&'r Record>> {
    list(record, field)?
        .iter()
        .map(|item| match item {
            Value::Message(r) => Ok(r),
            _ => Err(invalid_field(field, "a list of messages")),
        })
        .collect()
}

fn string_list(record: &Record, field: &str) -> Result<Vec<String>> {
    list(record, field)?
        .iter()
        .map(|item| match item {
            Value::String(s) => Ok(s.clone()),
            _ => Err(invalid_field(field, "a list of strings")),
        })
        .collect()
}

fn name_from(record: &Record) -> Result<Name> {
    Ok(Name::new(string(record, "name")?, string(record, "namespace")?))
}

fn name_field(record: &Record, field: &str) -> Result<Name> {
    match record.get(field) {
        Some(Value::Message(r)) => name_from(r),
        _ => Err(invalid_field(field, "a Name")),
    }
}

fn field_from(record: &Record) -> Result<Field> {
    Ok(Field {
        name: string(record, "name")?,
        ty: field_type(record, "kind")?,
        element: match record.get("element") {
            None => None,
            Some(_) => Some(field_type(record, "element")?),
        },
        optional: flag(record, "optional")?,
        reference: match record.get("reference") {
            None => None,
            Some(_) => Some(name_field(record, "reference")?),
        },
        comments: string_list(record, "comments")?,
        inline_comment: optional_string(record, "inline_comment")?,
    })
}

fn namespace_from(record: &Record) -> Result<Namespace> {
    let constants = records(record, "constants")?
        .into_iter()
        .map(|c| {
            Ok(Constant {
                name: string(c, "name")?,
                ty: field_type(c, "kind")?,
                value: string(c, "value")?,
                references: records(c, "references")?
                    .into_iter()
                    .map(name_from)
                    .collect::<Result<_>>()?,
                comments: string_list(c, "comments")?,
                inline_comment: optional_string(c, "inline_comment")?,
            })
        })
        .collect::<Result<_>>()?;

    let enums = records(record, "enums")?
        .into_iter()
        .map(|e| {
            let values = records(e, "values")?
                .into_iter()
                .map(|v| {
                    Ok(EnumValue {
                        label: string(v, "label")?,
                        value: byte(v, "value")?,
                        comments: string_list(v, "comments")?,
                        inline_comment: optional_string(v, "inline_comment")?,
                    })
                })
                .collect::<Result<_>>()?;
            Ok(Enum {
                name: string(e, "name")?,
                values,
                comments: string_list(e, "comments")?,
            })
        })
        .collect::<Result<_>>()?;

    let messages = records(record, "messages")?
        .into_iter()
        .map(|m| {
            Ok(Message {
                name: string(m, "name")?,
                fields: records(m, "fields")?
                    .into_iter()
                    .map(field_from)
                    .collect::<Result<_>>()?,
                comments: string_list(m, "comments")?,
            })
        })
        .collect::<Result<_>>()?;

    let transactions = records(record, "transactions")?
        .into_iter()
        .map(|t| {
            Ok(Transaction {
                name: string(t, "name")?,
                id: byte(t, "id")?,
                request: name_field(t, "request")?,
                response: name_field(t, "response")?,
                comments: string_list(t, "comments")?,
            })
        })
        .collect::<Result<_>>()?;

    let publishes = records(record, "publishes")?
        .into_iter()
        .map(|p| {
            Ok(Publish {
                name: string(p, "name")?,
                id: byte(p, "id")?,
                message: name_field(p, "message")?,
                comments: string_list(p, "comments")?,
            })
        })
        .collect::<Result<_>>()?;

    Ok(Namespace {
        name: string(record, "name")?,
        imports: string_list(record, "imports")?,
        constants,
        enums,
        messages,
        transactions,
        publishes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const OTHER: &str = "\
constant uint8_t limit = 4;
message Pong {
    uint8_t pong;
}
transaction other_ping[Pong, Pong];
";

    const SAMPLE: &str = "\
import demo.other;

# Composed
constant uint16_t total = 2 + {demo.other.limit};  # sum
enum Level {
    LOW;
    HIGH = 7;
}
# Outer doc
message Outer {
    optional Level level;  # maybe
    list[demo.other.Pong] pongs;
    bytes raw;
}
transaction go[Outer, demo.other.Pong];
publish tick[Outer];
";

    fn sample_context() -> ParseContext {
        let mut ctx = ParseContext::new();
        Parser::parse_str(OTHER, "demo.other", &mut ctx).unwrap();
        Parser::parse_str(SAMPLE, "demo.sample", &mut ctx).unwrap();
        ctx
    }

    #[test]
    fn meta_schema_parses() {
        let ctx = meta_context().unwrap();
        let ns = ctx.namespace(META_NAMESPACE).unwrap();
        let tags = ns.enumeration("FieldType").unwrap();
        assert_eq!(tags.values.len(), FieldType::ALL.len());
        for (value, ty) in tags.values.iter().zip(FieldType::ALL) {
            assert_eq!(value.value, ty.code());
        }
    }

    #[test]
    fn namespace_survives_binary_roundtrip() {
        let ctx = sample_context();
        let original = ctx.namespace("demo.sample").unwrap();

        let bytes = encode_namespace(original).unwrap();
        let decoded = decode_namespace(&bytes).unwrap();
        assert_eq!(&decoded, original);
    }

    #[test]
    fn load_requires_imports() {
        let ctx = sample_context();
        let bytes = encode_namespace(ctx.namespace("demo.sample").unwrap()).unwrap();

        let mut fresh = ParseContext::new();
        assert!(matches!(
            load_namespace(&bytes, &mut fresh),
            Err(ParseError::UnknownImport { .. })
        ));

        let other = encode_namespace(ctx.namespace("demo.other").unwrap()).unwrap();
        assert_eq!(load_namespace(&other, &mut fresh).unwrap(), "demo.other");
        assert_eq!(load_namespace(&bytes, &mut fresh).unwrap(), "demo.sample");
        assert_eq!(fresh.next_id(), 3);
        assert!(matches!(
            load_namespace(&bytes, &mut fresh),
            Err(ParseError::DuplicateNamespace(_))
        ));
    }

    #[test]
    fn parse_file_reads_pkb() {
        let dir = std::env::temp_dir().join(format!(
            "packlink-schema-binary-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("other.pkb");

        let ctx = sample_context();
        std::fs::write(&path, encode_namespace(ctx.namespace("demo.other").unwrap()).unwrap())
            .unwrap();

        let mut fresh = ParseContext::new();
        let name = Parser::parse_file(&path, "ignored", &mut fresh).unwrap();
        assert_eq!(name, "demo.other");
        assert_eq!(fresh.namespace("demo.other"), ctx.namespace("demo.other"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            decode_namespace(&[0x05, 0x00, b'a']),
            Err(ParseError::Binary(_))
        ));
    }

    /// Encode `namespace` after `tamper` and load it next to `demo.other`.
    fn load_tampered(tamper: impl FnOnce(&mut Namespace)) -> Result<String> {
        let ctx = sample_context();
        let mut namespace = ctx.namespace("demo.sample").unwrap().clone();
        tamper(&mut namespace);
        let bytes = encode_namespace(&namespace).unwrap();

        let mut fresh = ParseContext::new();
        load_namespace(&encode_namespace(ctx.namespace("demo.other").unwrap()).unwrap(), &mut fresh)
            .unwrap();
        load_namespace(&bytes, &mut fresh)
    }

    fn rejected(result: Result<String>, needle: &str) -> bool {
        matches!(result, Err(ParseError::InvalidBinary(message)) if message.contains(needle))
    }

    #[test]
    fn loaded_schemas_get_the_parser_checks() {
        assert_eq!(load_tampered(|_| {}).unwrap(), "demo.sample");

        assert!(rejected(
            load_tampered(|ns| ns.messages[0].fields[1].element = None),
            "Outer.pongs: list without an element type"
        ));
        assert!(rejected(
            load_tampered(|ns| ns.messages[0].fields[1].element = Some(FieldType::List)),
            "nested lists"
        ));
        assert!(rejected(
            load_tampered(|ns| ns.messages[0].fields[0].reference = None),
            "missing type reference"
        ));
        assert!(rejected(
            load_tampered(|ns| ns.messages[0].fields[2].element = Some(FieldType::U8)),
            "not a list"
        ));
        assert!(rejected(
            load_tampered(|ns| ns.transactions[0].request = Name::new("Ghost", "demo.sample")),
            "unresolved message 'demo.sample.Ghost'"
        ));
        assert!(rejected(
            load_tampered(|ns| {
                let copy = ns.messages[0].clone();
                ns.messages.push(copy);
            }),
            "duplicate type 'Outer'"
        ));
        assert!(rejected(
            load_tampered(|ns| ns.enums[0].values[1].value = 0),
            "used twice"
        ));
        assert!(rejected(
            load_tampered(|ns| ns.constants[0].references[0] = Name::new("nope", "demo.other")),
            "unresolved constant"
        ));
    }

    #[test]
    fn loaded_ids_must_not_collide() {
        assert!(rejected(
            load_tampered(|ns| ns.publishes[0].id = ns.transactions[0].id),
            "already used by 'go'"
        ));
        assert!(rejected(
            load_tampered(|ns| ns.transactions[0].id = 0),
            "already used by 'demo.other.other_ping'"
        ));
    }

    #[test]
    fn loaded_recursion_is_rejected() {
        let result = load_tampered(|ns| {
            ns.messages[0].fields.push(Field {
                name: "again".to_string(),
                ty: FieldType::Message,
                element: None,
                optional: true,
                reference: Some(Name::new("Outer", "demo.sample")),
                comments: Vec::new(),
                inline_comment: None,
            });
        });
        assert!(matches!(result, Err(ParseError::RecursiveMessage { name }) if name == "Outer"));
    }
}
