//! Rust target.
//!
//! The output is one module body. Messages implement `codec::Message` through
//! the same wire primitives the dynamic engine uses. Imported namespaces are
//! expected as sibling modules named after their last segment.

use std::collections::HashMap;
use std::fmt::Write;

use packlink_schema::{Constant, Enum, FieldType, Message, Name, Namespace, ParseContext};

use crate::constants;
use crate::error::{GenError, Result};
use crate::names::{pascal_case, rust_ident, stem, upper_snake};
use crate::shape::Shape;
use crate::GenerateOptions;

const INDENT: &str = "    ";

pub(crate) fn generate(
    ctx: &ParseContext,
    namespace: &Namespace,
    options: &GenerateOptions,
) -> Result<String> {
    let mut gen = RustGenerator {
        ctx,
        namespace,
        runtime: options.runtime_path.trim_end_matches("::"),
        out: String::new(),
    };
    gen.header(options.client)?;
    for constant in &namespace.constants {
        gen.constant(constant)?;
    }
    for enumeration in &namespace.enums {
        gen.enumeration(enumeration)?;
    }
    for message in &namespace.messages {
        gen.message(message)?;
    }
    if namespace.has_endpoints() {
        gen.registry()?;
        if options.client {
            gen.endpoints()?;
            gen.client()?;
        }
    }
    Ok(gen.out)
}

struct RustGenerator<'a> {
    ctx: &'a ParseContext,
    namespace: &'a Namespace,
    runtime: &'a str,
    out: String,
}

impl RustGenerator<'_> {
    fn header(&mut self, client: bool) -> Result<()> {
        writeln!(
            self.out,
            "// Generated by packlink-gen from `{}`. Do not edit.\n",
            self.namespace.name
        )?;
        writeln!(self.out, "#[allow(unused_imports)]")?;
        writeln!(self.out, "use {}::codec as pk;", self.runtime)?;
        if client && self.namespace.has_endpoints() {
            writeln!(self.out, "#[allow(unused_imports)]")?;
            writeln!(self.out, "use {}::node as pk_node;", self.runtime)?;
        }
        let namespace = self.namespace;
        for import in &namespace.imports {
            writeln!(self.out, "#[allow(unused_imports)]")?;
            writeln!(self.out, "use super::{};", rust_ident(stem(import)))?;
        }
        Ok(())
    }

    fn docs(&mut self, comments: &[String], indent: &str) -> Result<()> {
        for comment in comments {
            writeln!(self.out, "{indent}///{comment}")?;
        }
        Ok(())
    }

    fn constant(&mut self, constant: &Constant) -> Result<()> {
        let name = Name::new(constant.name.clone(), self.namespace.name.clone());
        let value = constants::expand(self.ctx, &name)?;
        let ty = match constant.ty {
            FieldType::String => "&str",
            other => scalar_type(other),
        };

        writeln!(self.out)?;
        self.docs(&constant.comments, "")?;
        write!(
            self.out,
            "pub const {}: {ty} = {value};",
            rust_ident(&upper_snake(&constant.name))
        )?;
        trailing_comment(&mut self.out, &constant.inline_comment)?;
        writeln!(self.out)?;
        Ok(())
    }

    fn enumeration(&mut self, enumeration: &Enum) -> Result<()> {
        let name = &enumeration.name;
        writeln!(self.out)?;
        self.docs(&enumeration.comments, "")?;
        writeln!(
            self.out,
            "#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]\n#[repr(u8)]\npub enum {name} {{"
        )?;
        for (index, value) in enumeration.values.iter().enumerate() {
            self.docs(&value.comments, INDENT)?;
            if index == 0 {
                writeln!(self.out, "{INDENT}#[default]")?;
            }
            write!(self.out, "{INDENT}{} = {},", variant(&value.label), value.value)?;
            trailing_comment(&mut self.out, &value.inline_comment)?;
            writeln!(self.out)?;
        }
        writeln!(self.out, "}}\n")?;

        writeln!(self.out, "impl pk::WireEnum for {name} {{")?;
        writeln!(self.out, "{INDENT}fn to_wire(self) -> u8 {{\n{INDENT}{INDENT}self as u8\n{INDENT}}}\n")?;
        writeln!(self.out, "{INDENT}fn from_wire(value: u8) -> pk::Result<Self> {{")?;
        writeln!(self.out, "{INDENT}{INDENT}match value {{")?;
        for value in &enumeration.values {
            writeln!(
                self.out,
                "{INDENT}{INDENT}{INDENT}{} => Ok(Self::{}),",
                value.value,
                variant(&value.label)
            )?;
        }
        writeln!(
            self.out,
            "{INDENT}{INDENT}{INDENT}other => Err(pk::CodecError::invalid_enum(\"{}\", other)),",
            self.qualified(name)
        )?;
        writeln!(self.out, "{INDENT}{INDENT}}}\n{INDENT}}}\n}}")?;
        Ok(())
    }

    fn message(&mut self, message: &Message) -> Result<()> {
        let name = &message.name;
        let shapes = message
            .fields
            .iter()
            .map(|field| Shape::of(name, field))
            .collect::<Result<Vec<_>>>()?;

        writeln!(self.out)?;
        self.docs(&message.comments, "")?;
        writeln!(self.out, "#[derive(Debug, Clone, PartialEq, Default)]")?;
        writeln!(self.out, "pub struct {name} {{")?;
        for (field, shape) in message.fields.iter().zip(&shapes) {
            self.docs(&field.comments, INDENT)?;
            let mut ty = self.value_type(*shape)?;
            if field.optional {
                ty = format!("Option<{ty}>");
            }
            write!(self.out, "{INDENT}pub {}: {ty},", rust_ident(&field.name))?;
            trailing_comment(&mut self.out, &field.inline_comment)?;
            writeln!(self.out)?;
        }
        writeln!(self.out, "}}\n")?;

        let empty = message.fields.is_empty();
        let (dst, reader) = if empty {
            ("_dst", "_reader")
        } else {
            ("dst", "reader")
        };

        writeln!(self.out, "impl pk::Message for {name} {{")?;
        writeln!(
            self.out,
            "{INDENT}const NAME: &'static str = \"{}\";\n",
            self.qualified(name)
        )?;

        writeln!(
            self.out,
            "{INDENT}fn encode(&self, {dst}: &mut pk::BytesMut) -> pk::Result<()> {{"
        )?;
        let body = self.encode_body(message, &shapes)?;
        write_lines(&mut self.out, &body, 2)?;
        writeln!(self.out, "{INDENT}{INDENT}Ok(())\n{INDENT}}}\n")?;

        writeln!(
            self.out,
            "{INDENT}fn decode({reader}: &mut pk::WireReader<'_>) -> pk::Result<Self> {{"
        )?;
        let body = self.decode_body(message, &shapes)?;
        write_lines(&mut self.out, &body, 2)?;
        writeln!(self.out, "{INDENT}}}\n}}")?;
        Ok(())
    }

    fn encode_body(&self, message: &Message, shapes: &[Shape<'_>]) -> Result<Vec<String>> {
        let mut lines = Vec::new();
        let optional_count = message.optional_count();
        if optional_count > 0 {
            lines.push(format!(
                "let mut present = pk::Bitfield::new({optional_count});"
            ));
            let optionals = message.fields.iter().filter(|f| f.optional);
            for (index, field) in optionals.enumerate() {
                lines.push(format!(
                    "present.set({index}, self.{}.is_some());",
                    rust_ident(&field.name)
                ));
            }
            lines.push("present.write(dst);".to_string());
        }

        for (field, shape) in message.fields.iter().zip(shapes) {
            let place = format!("self.{}", rust_ident(&field.name));
            if field.optional {
                lines.push(format!("if let Some(value) = &{place} {{"));
                lines.extend(indented(self.encode_value(*shape, "*value")?));
                lines.push("}".to_string());
            } else {
                lines.extend(self.encode_value(*shape, &place)?);
            }
        }
        Ok(lines)
    }

    /// Statements writing the value at `place` to `dst`.
    fn encode_value(&self, shape: Shape<'_>, place: &str) -> Result<Vec<String>> {
        let lines = match shape.ty {
            FieldType::Bool => vec![format!("pk::wire::put_bool(dst, {place});")],
            FieldType::String => vec![format!("pk::wire::put_str(dst, &{place})?;")],
            FieldType::Bytes => vec![format!("pk::wire::put_bytes(dst, &{place})?;")],
            FieldType::Enum => vec![format!("pk::wire::put_enum(dst, {place});")],
            FieldType::Message => vec![format!("pk::Message::encode(&{place}, dst)?;")],
            FieldType::List => {
                let mut lines = vec![format!(
                    "pk::wire::put_list(dst, &{place}, |dst, item| {{"
                )];
                lines.extend(indented(self.encode_value(shape.element()?, "*item")?));
                lines.push(format!("{INDENT}Ok(())"));
                lines.push("})?;".to_string());
                lines
            }
            scalar => vec![format!(
                "pk::wire::put_{}(dst, {place});",
                scalar_type(scalar)
            )],
        };
        Ok(lines)
    }

    fn decode_body(&self, message: &Message, shapes: &[Shape<'_>]) -> Result<Vec<String>> {
        let mut lines = Vec::new();
        let optional_count = message.optional_count();
        if optional_count > 0 {
            lines.push(format!(
                "let present = pk::Bitfield::read(reader, {optional_count})?;"
            ));
        }
        if message.fields.is_empty() {
            lines.push("Ok(Self {})".to_string());
            return Ok(lines);
        }

        lines.push("Ok(Self {".to_string());
        let mut optional_index = 0;
        for (field, shape) in message.fields.iter().zip(shapes) {
            let value = self.decode_value(*shape)?;
            let ident = rust_ident(&field.name);
            if field.optional {
                lines.push(format!(
                    "{INDENT}{ident}: if present.is_set({optional_index}) {{ Some({value}?) }} else {{ None }},"
                ));
                optional_index += 1;
            } else {
                lines.push(format!("{INDENT}{ident}: {value}?,"));
            }
        }
        lines.push("})".to_string());
        Ok(lines)
    }

    /// Expression of type `pk::Result<T>` reading one value from `reader`.
    fn decode_value(&self, shape: Shape<'_>) -> Result<String> {
        let expr = match shape.ty {
            FieldType::Bool => "reader.bool()".to_string(),
            FieldType::String => "reader.string()".to_string(),
            FieldType::Bytes => "reader.bytes()".to_string(),
            FieldType::Enum => format!(
                "reader.enumeration::<{}>()",
                self.type_path(shape.reference()?)
            ),
            FieldType::Message => format!(
                "<{} as pk::Message>::decode(reader)",
                self.type_path(shape.reference()?)
            ),
            FieldType::List => {
                format!("reader.list(|reader| {})", self.decode_value(shape.element()?)?)
            }
            scalar => format!("reader.{}()", scalar_type(scalar)),
        };
        Ok(expr)
    }

    fn value_type(&self, shape: Shape<'_>) -> Result<String> {
        let ty = match shape.ty {
            FieldType::String => "String".to_string(),
            FieldType::Bytes => "Vec<u8>".to_string(),
            FieldType::Message | FieldType::Enum => self.type_path(shape.reference()?),
            FieldType::List => format!("Vec<{}>", self.value_type(shape.element()?)?),
            scalar => scalar_type(scalar).to_string(),
        };
        Ok(ty)
    }

    /// Path of a message or enum as seen from this module.
    fn type_path(&self, name: &Name) -> String {
        if name.namespace == self.namespace.name {
            name.name.clone()
        } else {
            format!("{}::{}", rust_ident(stem(&name.namespace)), name.name)
        }
    }

    fn qualified(&self, name: &str) -> String {
        format!("{}.{name}", self.namespace.name)
    }

    /// `Inbound` decodes any frame the device may send; `REGISTRY` lists the
    /// message type behind each ID.
    fn registry(&mut self) -> Result<()> {
        let namespace = self.namespace;
        let mut inbound = Vec::new();
        let mut claimed: HashMap<String, &str> = HashMap::new();
        let endpoints = namespace
            .transactions
            .iter()
            .map(|t| (t.id, t.name.as_str(), &t.response))
            .chain(namespace.publishes.iter().map(|p| (p.id, p.name.as_str(), &p.message)));
        for (id, endpoint, message) in endpoints {
            let variant = pascal_case(endpoint);
            if let Some(first) = claimed.insert(variant.clone(), endpoint) {
                return Err(GenError::VariantCollision {
                    variant,
                    first: first.to_string(),
                    second: endpoint.to_string(),
                });
            }
            inbound.push((id, variant, message));
        }
        inbound.sort_by_key(|(id, _, _)| *id);

        writeln!(self.out)?;
        writeln!(
            self.out,
            "/// Messages the device sends, one variant per transaction response or publish."
        )?;
        writeln!(self.out, "#[derive(Debug, Clone, PartialEq)]")?;
        writeln!(self.out, "pub enum Inbound {{")?;
        for (_, variant, message) in &inbound {
            writeln!(self.out, "{INDENT}{variant}({}),", self.type_path(message))?;
        }
        writeln!(self.out, "}}\n")?;

        writeln!(self.out, "impl Inbound {{")?;
        writeln!(
            self.out,
            "{INDENT}/// Decode a payload by the ID it arrived with. `None` for IDs this schema does not define."
        )?;
        writeln!(
            self.out,
            "{INDENT}pub fn decode(id: u8, payload: &[u8]) -> Option<pk::Result<Self>> {{"
        )?;
        writeln!(self.out, "{INDENT}{INDENT}match id {{")?;
        for (id, variant, message) in &inbound {
            writeln!(
                self.out,
                "{INDENT}{INDENT}{INDENT}{id} => Some(<{} as pk::Message>::from_bytes(payload).map(Self::{variant})),",
                self.type_path(message)
            )?;
        }
        writeln!(self.out, "{INDENT}{INDENT}{INDENT}_ => None,")?;
        writeln!(self.out, "{INDENT}{INDENT}}}\n{INDENT}}}\n")?;

        writeln!(self.out, "{INDENT}pub fn id(&self) -> u8 {{")?;
        writeln!(self.out, "{INDENT}{INDENT}match self {{")?;
        for (id, variant, _) in &inbound {
            writeln!(self.out, "{INDENT}{INDENT}{INDENT}Self::{variant}(_) => {id},")?;
        }
        writeln!(self.out, "{INDENT}{INDENT}}}\n{INDENT}}}\n}}\n")?;

        writeln!(self.out, "/// Message type behind each transaction and publish ID.")?;
        writeln!(self.out, "pub const REGISTRY: &[(u8, &str)] = &[")?;
        for (id, _, message) in &inbound {
            writeln!(self.out, "{INDENT}({id}, \"{}\"),", message.qualified())?;
        }
        writeln!(self.out, "];")?;
        Ok(())
    }

    fn endpoints(&mut self) -> Result<()> {
        let namespace = self.namespace;
        writeln!(self.out)?;
        writeln!(self.out, "/// Typed transaction and publish handles.")?;
        writeln!(self.out, "pub mod endpoints {{")?;
        writeln!(self.out, "{INDENT}#[allow(unused_imports)]\n{INDENT}use super::*;")?;
        for transaction in &namespace.transactions {
            writeln!(self.out)?;
            self.docs(&transaction.comments, INDENT)?;
            writeln!(
                self.out,
                "{INDENT}pub const {}: pk_node::Transaction<{}, {}> =\n{INDENT}{INDENT}pk_node::Transaction::new({}, \"{}\");",
                rust_ident(&upper_snake(&transaction.name)),
                self.type_path(&transaction.request),
                self.type_path(&transaction.response),
                transaction.id,
                transaction.name
            )?;
        }
        for publish in &namespace.publishes {
            writeln!(self.out)?;
            self.docs(&publish.comments, INDENT)?;
            writeln!(
                self.out,
                "{INDENT}pub const {}: pk_node::Publish<{}> = pk_node::Publish::new({}, \"{}\");",
                rust_ident(&upper_snake(&publish.name)),
                self.type_path(&publish.message),
                publish.id,
                publish.name
            )?;
        }
        writeln!(self.out, "}}")?;
        Ok(())
    }

    fn client(&mut self) -> Result<()> {
        let namespace = self.namespace;
        let client = format!("{}Client", pascal_case(stem(&namespace.name)));
        writeln!(self.out)?;
        writeln!(
            self.out,
            "/// Client for the `{}` endpoints over any transport.",
            namespace.name
        )?;
        writeln!(self.out, "pub struct {client}<T: pk_node::Transport> {{")?;
        writeln!(self.out, "{INDENT}node: pk_node::Node<T>,\n}}\n")?;

        writeln!(self.out, "impl<T: pk_node::Transport> {client}<T> {{")?;
        writeln!(
            self.out,
            "{INDENT}pub fn new(transport: T) -> Self {{\n{INDENT}{INDENT}Self {{ node: pk_node::Node::new(transport) }}\n{INDENT}}}\n"
        )?;
        writeln!(
            self.out,
            "{INDENT}pub fn with_config(transport: T, config: pk_node::NodeConfig) -> Self {{\n{INDENT}{INDENT}Self {{ node: pk_node::Node::with_config(transport, config) }}\n{INDENT}}}\n"
        )?;
        writeln!(
            self.out,
            "{INDENT}pub fn node(&self) -> &pk_node::Node<T> {{\n{INDENT}{INDENT}&self.node\n{INDENT}}}\n"
        )?;
        writeln!(
            self.out,
            "{INDENT}pub fn open(&self) -> pk_node::Result<()> {{\n{INDENT}{INDENT}self.node.open()\n{INDENT}}}\n"
        )?;
        write!(
            self.out,
            "{INDENT}pub fn close(&self) -> pk_node::Result<()> {{\n{INDENT}{INDENT}self.node.close()\n{INDENT}}}\n"
        )?;

        for transaction in &namespace.transactions {
            writeln!(self.out)?;
            self.docs(&transaction.comments, INDENT)?;
            writeln!(
                self.out,
                "{INDENT}pub fn {}(&self, request: &{}) -> pk_node::Result<{}> {{",
                rust_ident(&transaction.name),
                self.type_path(&transaction.request),
                self.type_path(&transaction.response)
            )?;
            writeln!(
                self.out,
                "{INDENT}{INDENT}endpoints::{}.transact(&self.node, request)\n{INDENT}}}",
                rust_ident(&upper_snake(&transaction.name))
            )?;
        }
        for publish in &namespace.publishes {
            writeln!(self.out)?;
            self.docs(&publish.comments, INDENT)?;
            writeln!(
                self.out,
                "{INDENT}pub fn on_{}<F>(&self, callback: F)\n{INDENT}where\n{INDENT}{INDENT}F: FnMut({}) + Send + 'static,\n{INDENT}{{",
                publish.name,
                self.type_path(&publish.message)
            )?;
            writeln!(
                self.out,
                "{INDENT}{INDENT}endpoints::{}.subscribe(&self.node, callback);\n{INDENT}}}",
                rust_ident(&upper_snake(&publish.name))
            )?;
        }
        writeln!(self.out, "}}")?;
        Ok(())
    }
}

fn scalar_type(ty: FieldType) -> &'static str {
    match ty {
        FieldType::Bool => "bool",
        FieldType::U8 => "u8",
        FieldType::U16 => "u16",
        FieldType::U32 => "u32",
        FieldType::U64 => "u64",
        FieldType::I8 => "i8",
        FieldType::I16 => "i16",
        FieldType::I32 => "i32",
        FieldType::I64 => "i64",
        FieldType::F32 => "f32",
        FieldType::F64 => "f64",
        FieldType::String => "String",
        FieldType::Bytes => "Vec<u8>",
        FieldType::List | FieldType::Message | FieldType::Enum => "()",
    }
}

fn variant(label: &str) -> String {
    rust_ident(&pascal_case(label))
}

fn trailing_comment(out: &mut String, comment: &Option<String>) -> std::fmt::Result {
    match comment {
        Some(comment) => write!(out, " //{comment}"),
        None => Ok(()),
    }
}

fn indented(lines: Vec<String>) -> impl Iterator<Item = String> {
    lines.into_iter().map(|line| format!("{INDENT}{line}"))
}

fn write_lines(out: &mut String, lines: &[String], depth: usize) -> std::fmt::Result {
    let indent = INDENT.repeat(depth);
    for line in lines {
        writeln!(out, "{indent}{line}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use packlink_schema::Parser;

    const OTHER: &str = "\
message Pong {
    uint8_t pong;
}
";

    const SAMPLE: &str = "\
import demo.other;

# Page size in words
constant uint16_t page_words = 2 * 8;  # two rows

enum Verbosity {
    LOW;
    MEDIUM;
    HIGH = 0x10;
}

# A page of flash
message FlashPage {
    uint32_t address;
    list[uint32_t] data;  # words
    optional uint32_t read_size;
}

message LogMessage {
    string message;
    Verbosity verbosity;
}

message Mixed {
    list[string] names;
    list[demo.other.Pong] pongs;
    optional LogMessage log;
    bytes type;
}

message Nothing {
}

transaction ping[demo.other.Pong, LogMessage];
publish log[LogMessage];
";

    fn generated() -> String {
        let mut ctx = ParseContext::new();
        Parser::parse_str(OTHER, "demo.other", &mut ctx).unwrap();
        Parser::parse_str(SAMPLE, "demo.sample", &mut ctx).unwrap();
        let ns = ctx.namespace("demo.sample").unwrap();
        generate(&ctx, ns, &GenerateOptions::default()).unwrap()
    }

    #[test]
    fn header_imports_runtime_and_siblings() {
        let out = generated();
        assert!(out.starts_with("// Generated by packlink-gen from `demo.sample`."));
        assert!(out.contains("use ::packlink::codec as pk;"));
        assert!(out.contains("use ::packlink::node as pk_node;"));
        assert!(out.contains("use super::other;"));
        assert!(!out.contains("//!"));
    }

    #[test]
    fn constants_are_expanded() {
        let out = generated();
        assert!(out.contains("/// Page size in words\npub const PAGE_WORDS: u16 = 2 * 8; // two rows\n"));
    }

    #[test]
    fn enums_are_repr_u8() {
        let out = generated();
        assert!(out.contains("#[repr(u8)]\npub enum Verbosity {"));
        assert!(out.contains("    #[default]\n    Low = 0,\n    Medium = 1,\n    High = 16,\n"));
        assert!(out.contains("            16 => Ok(Self::High),"));
        assert!(out.contains("invalid_enum(\"demo.sample.Verbosity\", other)"));
    }

    #[test]
    fn messages_follow_wire_layout() {
        let out = generated();
        assert!(out.contains("/// A page of flash\n#[derive(Debug, Clone, PartialEq, Default)]\npub struct FlashPage {"));
        assert!(out.contains("    pub data: Vec<u32>, // words\n"));
        assert!(out.contains("    pub read_size: Option<u32>,\n"));
        assert!(out.contains("const NAME: &'static str = \"demo.sample.FlashPage\";"));

        let encode = [
            "        let mut present = pk::Bitfield::new(1);",
            "        present.set(0, self.read_size.is_some());",
            "        present.write(dst);",
            "        pk::wire::put_u32(dst, self.address);",
            "        pk::wire::put_list(dst, &self.data, |dst, item| {",
            "            pk::wire::put_u32(dst, *item);",
            "            Ok(())",
            "        })?;",
            "        if let Some(value) = &self.read_size {",
            "            pk::wire::put_u32(dst, *value);",
            "        }",
        ]
        .join("\n");
        assert!(out.contains(&encode), "{out}");

        assert!(out.contains("        let present = pk::Bitfield::read(reader, 1)?;"));
        assert!(out.contains("            data: reader.list(|reader| reader.u32())?,"));
        assert!(out.contains(
            "            read_size: if present.is_set(0) { Some(reader.u32()?) } else { None },"
        ));
    }

    #[test]
    fn cross_namespace_and_keyword_fields() {
        let out = generated();
        assert!(out.contains("    pub pongs: Vec<other::Pong>,"));
        assert!(out.contains("    pub r#type: Vec<u8>,"));
        assert!(out.contains("    pub names: Vec<String>,"));
        assert!(out.contains("            pk::wire::put_str(dst, &*item)?;"));
        assert!(out.contains("pongs: reader.list(|reader| <other::Pong as pk::Message>::decode(reader))?,"));
        assert!(out.contains("if let Some(value) = &self.log {\n            pk::Message::encode(&*value, dst)?;"));
    }

    #[test]
    fn empty_messages_ignore_their_arguments() {
        let out = generated();
        assert!(out.contains("fn encode(&self, _dst: &mut pk::BytesMut)"));
        assert!(out.contains("fn decode(_reader: &mut pk::WireReader<'_>) -> pk::Result<Self> {\n        Ok(Self {})"));
    }

    #[test]
    fn registry_and_client() {
        let out = generated();
        assert!(out.contains("pub enum Inbound {\n    Ping(LogMessage),\n    Log(LogMessage),\n}"));
        assert!(out.contains("0 => Some(<LogMessage as pk::Message>::from_bytes(payload).map(Self::Ping)),"));
        assert!(out.contains("pub const REGISTRY: &[(u8, &str)] = &[\n    (0, \"demo.sample.LogMessage\"),\n    (1, \"demo.sample.LogMessage\"),\n];"));
        assert!(out.contains("pub const PING: pk_node::Transaction<other::Pong, LogMessage> =\n        pk_node::Transaction::new(0, \"ping\");"));
        assert!(out.contains("pub const LOG: pk_node::Publish<LogMessage> = pk_node::Publish::new(1, \"log\");"));
        assert!(out.contains("pub struct SampleClient<T: pk_node::Transport> {"));
        assert!(out.contains("    pub fn ping(&self, request: &other::Pong) -> pk_node::Result<LogMessage> {"));
        assert!(out.contains("    pub fn on_log<F>(&self, callback: F)"));
    }

    #[test]
    fn client_can_be_disabled() {
        let mut ctx = ParseContext::new();
        Parser::parse_str(OTHER, "demo.other", &mut ctx).unwrap();
        Parser::parse_str(SAMPLE, "demo.sample", &mut ctx).unwrap();
        let ns = ctx.namespace("demo.sample").unwrap();
        let options = GenerateOptions {
            client: false,
            ..GenerateOptions::default()
        };
        let out = generate(&ctx, ns, &options).unwrap();
        assert!(out.contains("pub enum Inbound"));
        assert!(!out.contains("pk_node"));
    }

    #[test]
    fn endpoints_that_share_a_variant_name_are_rejected() {
        let schema = "\
message Pong {
    uint8_t pong;
}
transaction get_x[Pong, Pong];
publish getX[Pong];
";
        let mut ctx = ParseContext::new();
        Parser::parse_str(schema, "demo.clash", &mut ctx).unwrap();
        let ns = ctx.namespace("demo.clash").unwrap();
        let err = generate(&ctx, ns, &GenerateOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            GenError::VariantCollision { variant, first, second }
                if variant == "GetX" && first == "get_x" && second == "getX"
        ));
    }

    #[test]
    fn list_without_element_type_is_an_error() {
        let mut ctx = ParseContext::new();
        Parser::parse_str(OTHER, "demo.other", &mut ctx).unwrap();
        Parser::parse_str(SAMPLE, "demo.sample", &mut ctx).unwrap();
        let mut ns = ctx.namespace("demo.sample").unwrap().clone();
        let page = ns.messages.iter_mut().find(|m| m.name == "FlashPage").unwrap();
        page.fields[1].element = None;

        let err = generate(&ctx, &ns, &GenerateOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            GenError::InvalidField { message, field, .. } if message == "FlashPage" && field == "data"
        ));
    }
}
