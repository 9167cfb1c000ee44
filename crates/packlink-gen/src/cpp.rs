//! C++ target (device side).
//!
//! Emits one header per namespace. Every struct is declared up front, the
//! definitions follow in dependency order, and the `serialize`/`deserialize`
//! bodies come last, out of line. The bodies are built on `packlink::wire`
//! helpers that copy little-endian values with `memcpy` and check every
//! access against the buffer: `serialize` yields `std::nullopt` when the
//! buffer is too small or a length does not fit in 16 bits, `deserialize`
//! when the input runs short or a bool is neither 0 nor 1. The stub form
//! keeps only the declarations.

use std::collections::HashSet;
use std::fmt::Write;

use packlink_schema::{Constant, Enum, FieldType, Message, Name, Namespace, ParseContext};

use crate::constants;
use crate::error::Result;
use crate::names::{pascal_case, stem};
use crate::shape::Shape;

const INDENT: &str = "    ";

const INCLUDES: &str = "\
#include <cstddef>
#include <cstdint>
#include <cstring>
#include <optional>
#include <span>
#include <string>
#include <string_view>
#include <utility>
#include <vector>
";

const WIRE_HELPERS: &str = "\
#ifndef PACKLINK_WIRE_HELPERS
#define PACKLINK_WIRE_HELPERS
namespace packlink::wire {

inline bool put_raw(std::span<uint8_t> buffer, size_t &offset, const void *data, size_t size) {
    if (buffer.size() - offset < size) return false;
    if (size > 0) std::memcpy(buffer.data() + offset, data, size);
    offset += size;
    return true;
}

inline bool get_raw(std::span<const uint8_t> buffer, size_t &offset, void *data, size_t size) {
    if (buffer.size() - offset < size) return false;
    if (size > 0) std::memcpy(data, buffer.data() + offset, size);
    offset += size;
    return true;
}

template <typename T>
inline bool put(std::span<uint8_t> buffer, size_t &offset, const T &value) {
    return put_raw(buffer, offset, &value, sizeof(T));
}

inline bool put(std::span<uint8_t> buffer, size_t &offset, bool value) {
    uint8_t raw = value ? 1 : 0;
    return put_raw(buffer, offset, &raw, 1);
}

template <typename T>
inline bool get(std::span<const uint8_t> buffer, size_t &offset, T &value) {
    return get_raw(buffer, offset, &value, sizeof(T));
}

inline bool get(std::span<const uint8_t> buffer, size_t &offset, bool &value) {
    uint8_t raw;
    if (!get_raw(buffer, offset, &raw, 1) || raw > 1) return false;
    value = raw == 1;
    return true;
}

inline bool put_len(std::span<uint8_t> buffer, size_t &offset, size_t size) {
    if (size > 0xFFFF) return false;
    return put(buffer, offset, static_cast<uint16_t>(size));
}

inline bool put_bytes(std::span<uint8_t> buffer, size_t &offset, const void *data, size_t size) {
    return put_len(buffer, offset, size) && put_raw(buffer, offset, data, size);
}

inline bool get_string(std::span<const uint8_t> buffer, size_t &offset, std::string &value) {
    uint16_t size;
    if (!get(buffer, offset, size) || buffer.size() - offset < size) return false;
    value.assign(reinterpret_cast<const char *>(buffer.data() + offset), size);
    offset += size;
    return true;
}

inline bool get_bytes(std::span<const uint8_t> buffer, size_t &offset, std::vector<uint8_t> &value) {
    uint16_t size;
    if (!get(buffer, offset, size) || buffer.size() - offset < size) return false;
    value.assign(buffer.begin() + offset, buffer.begin() + offset + size);
    offset += size;
    return true;
}

}  // namespace packlink::wire
#endif  // PACKLINK_WIRE_HELPERS
";

const FAIL: &str = "return std::nullopt;";

pub(crate) fn generate(ctx: &ParseContext, namespace: &Namespace, stub: bool) -> Result<String> {
    let mut gen = CppGenerator {
        ctx,
        namespace,
        stub,
        out: String::new(),
    };
    gen.header()?;
    for constant in &namespace.constants {
        gen.constant(constant)?;
    }
    for enumeration in &namespace.enums {
        gen.enumeration(enumeration)?;
    }
    if !namespace.messages.is_empty() {
        gen.forward_declarations()?;
        for message in definition_order(namespace) {
            gen.message(message)?;
        }
        if !stub {
            for message in &namespace.messages {
                gen.serialize(message)?;
                gen.deserialize(message)?;
            }
        }
    }
    if !namespace.publishes.is_empty() {
        gen.publish_ids()?;
    }
    if !namespace.transactions.is_empty() {
        gen.project_class()?;
    }
    gen.footer()?;
    Ok(gen.out)
}

/// Messages ordered so that each one follows every local message it holds by
/// value. Lists and other namespaces impose no order: `std::vector` accepts a
/// declared-only element type and imports arrive complete. The parser
/// rejects recursion outside lists, so the by-value graph has no cycles.
fn definition_order(namespace: &Namespace) -> Vec<&Message> {
    fn visit<'a>(
        namespace: &'a Namespace,
        message: &'a Message,
        placed: &mut HashSet<&'a str>,
        order: &mut Vec<&'a Message>,
    ) {
        if !placed.insert(message.name.as_str()) {
            return;
        }
        for field in &message.fields {
            if field.ty != FieldType::Message {
                continue;
            }
            let held = field
                .reference
                .as_ref()
                .filter(|name| name.namespace == namespace.name)
                .and_then(|name| namespace.message(&name.name));
            if let Some(held) = held {
                visit(namespace, held, placed, order);
            }
        }
        order.push(message);
    }

    let mut placed = HashSet::new();
    let mut order = Vec::with_capacity(namespace.messages.len());
    for message in &namespace.messages {
        visit(namespace, message, &mut placed, &mut order);
    }
    order
}

struct CppGenerator<'a> {
    ctx: &'a ParseContext,
    namespace: &'a Namespace,
    stub: bool,
    out: String,
}

impl CppGenerator<'_> {
    fn header(&mut self) -> Result<()> {
        let namespace = self.namespace;
        writeln!(
            self.out,
            "// Generated by packlink-gen from `{}`. Do not edit.\n",
            namespace.name
        )?;
        writeln!(self.out, "#pragma once\n")?;
        writeln!(self.out, "{INCLUDES}")?;
        if !namespace.imports.is_empty() {
            for import in &namespace.imports {
                writeln!(self.out, "#include \"{}.hpp\"", import.replace('.', "/"))?;
            }
            writeln!(self.out)?;
        }
        if !self.stub {
            writeln!(self.out, "{WIRE_HELPERS}")?;
        }
        for segment in namespace.segments() {
            writeln!(self.out, "namespace {segment} {{")?;
        }
        Ok(())
    }

    fn footer(&mut self) -> Result<()> {
        let namespace = self.namespace;
        writeln!(self.out)?;
        let segments: Vec<&str> = namespace.segments().collect();
        for segment in segments.iter().rev() {
            writeln!(self.out, "}}  // namespace {segment}")?;
        }
        Ok(())
    }

    fn comments(&mut self, comments: &[String], indent: &str) -> Result<()> {
        for comment in comments {
            writeln!(self.out, "{indent}//{comment}")?;
        }
        Ok(())
    }

    fn constant(&mut self, constant: &Constant) -> Result<()> {
        let name = Name::new(constant.name.clone(), self.namespace.name.clone());
        let value = constants::expand(self.ctx, &name)?;

        writeln!(self.out)?;
        self.comments(&constant.comments, "")?;
        match constant.ty {
            FieldType::String => write!(
                self.out,
                "inline constexpr std::string_view {} = {value};",
                constant.name
            )?,
            ty => write!(
                self.out,
                "constexpr {} {} = {value};",
                scalar_type(ty),
                constant.name
            )?,
        }
        trailing_comment(&mut self.out, &constant.inline_comment)?;
        writeln!(self.out)?;
        Ok(())
    }

    fn enumeration(&mut self, enumeration: &Enum) -> Result<()> {
        writeln!(self.out)?;
        self.comments(&enumeration.comments, "")?;
        writeln!(self.out, "enum class {} : uint8_t {{", enumeration.name)?;
        for value in &enumeration.values {
            self.comments(&value.comments, INDENT)?;
            write!(self.out, "{INDENT}{} = {},", value.label, value.value)?;
            trailing_comment(&mut self.out, &value.inline_comment)?;
            writeln!(self.out)?;
        }
        writeln!(self.out, "}};")?;
        Ok(())
    }

    fn forward_declarations(&mut self) -> Result<()> {
        let namespace = self.namespace;
        writeln!(self.out)?;
        for message in &namespace.messages {
            writeln!(self.out, "struct {};", message.name)?;
        }
        Ok(())
    }

    fn message(&mut self, message: &Message) -> Result<()> {
        let name = &message.name;
        writeln!(self.out)?;
        self.comments(&message.comments, "")?;
        writeln!(self.out, "struct {name} {{")?;
        for field in &message.fields {
            self.comments(&field.comments, INDENT)?;
            let mut ty = self.value_type(Shape::of(name, field)?)?;
            if field.optional {
                ty = format!("std::optional<{ty}>");
            }
            write!(self.out, "{INDENT}{ty} {};", field.name)?;
            trailing_comment(&mut self.out, &field.inline_comment)?;
            writeln!(self.out)?;
        }
        if !message.fields.is_empty() {
            writeln!(self.out)?;
        }
        writeln!(
            self.out,
            "{INDENT}std::optional<std::span<uint8_t>> serialize(std::span<uint8_t> buffer) const;"
        )?;
        writeln!(
            self.out,
            "{INDENT}static std::optional<std::pair<{name}, std::span<const uint8_t>>> deserialize(std::span<const uint8_t> buffer);"
        )?;
        writeln!(self.out, "}};")?;
        Ok(())
    }

    fn serialize(&mut self, message: &Message) -> Result<()> {
        let name = &message.name;
        let mut lines = vec!["size_t offset = 0;".to_string()];
        let optional_count = message.optional_count();
        if optional_count > 0 {
            lines.push(format!(
                "uint8_t present[{}] = {{}};",
                optional_count.div_ceil(8)
            ));
            let optionals = message.fields.iter().filter(|f| f.optional);
            for (index, field) in optionals.enumerate() {
                lines.push(format!(
                    "if (this->{}.has_value()) present[{}] |= {};",
                    field.name,
                    index / 8,
                    bit_mask(index)
                ));
            }
            lines.push(format!(
                "if (!packlink::wire::put_raw(buffer, offset, present, sizeof(present))) {FAIL}"
            ));
        }

        for field in &message.fields {
            let shape = Shape::of(name, field)?;
            let place = format!("this->{}", field.name);
            if field.optional {
                lines.push(format!("if ({place}.has_value()) {{"));
                lines.extend(indented(self.serialize_value(shape, &format!("(*{place})"))?));
                lines.push("}".to_string());
            } else {
                lines.extend(self.serialize_value(shape, &place)?);
            }
        }
        lines.push("return buffer.subspan(0, offset);".to_string());

        writeln!(self.out)?;
        writeln!(
            self.out,
            "inline std::optional<std::span<uint8_t>> {name}::serialize(std::span<uint8_t> buffer) const {{"
        )?;
        write_lines(&mut self.out, &lines, 1)?;
        writeln!(self.out, "}}")?;
        Ok(())
    }

    fn serialize_value(&self, shape: Shape<'_>, place: &str) -> Result<Vec<String>> {
        let lines = match shape.ty {
            FieldType::String | FieldType::Bytes => vec![format!(
                "if (!packlink::wire::put_bytes(buffer, offset, {place}.data(), {place}.size())) {FAIL}"
            )],
            FieldType::Message => vec![
                "{".to_string(),
                format!("{INDENT}auto written = {place}.serialize(buffer.subspan(offset));"),
                format!("{INDENT}if (!written) {FAIL}"),
                format!("{INDENT}offset += written->size();"),
                "}".to_string(),
            ],
            FieldType::List => {
                let mut lines = vec![
                    format!("if (!packlink::wire::put_len(buffer, offset, {place}.size())) {FAIL}"),
                    format!("for (const auto &item : {place}) {{"),
                ];
                lines.extend(indented(self.serialize_value(shape.element()?, "item")?));
                lines.push("}".to_string());
                lines
            }
            _ => vec![format!(
                "if (!packlink::wire::put(buffer, offset, {place})) {FAIL}"
            )],
        };
        Ok(lines)
    }

    fn deserialize(&mut self, message: &Message) -> Result<()> {
        let name = &message.name;
        let mut lines = vec![format!("{name} out;"), "size_t offset = 0;".to_string()];
        let optional_count = message.optional_count();
        if optional_count > 0 {
            lines.push(format!("uint8_t present[{}];", optional_count.div_ceil(8)));
            lines.push(format!(
                "if (!packlink::wire::get_raw(buffer, offset, present, sizeof(present))) {FAIL}"
            ));
        }

        let mut optional_index = 0;
        for field in &message.fields {
            let shape = Shape::of(name, field)?;
            let place = format!("out.{}", field.name);
            if field.optional {
                lines.push(format!(
                    "if (present[{}] & {}) {{",
                    optional_index / 8,
                    bit_mask(optional_index)
                ));
                lines.push(format!("{INDENT}{place}.emplace();"));
                lines.extend(indented(self.deserialize_value(shape, &format!("(*{place})"))?));
                lines.push("}".to_string());
                optional_index += 1;
            } else {
                lines.extend(self.deserialize_value(shape, &place)?);
            }
        }
        lines.push("return std::make_pair(std::move(out), buffer.subspan(0, offset));".to_string());

        writeln!(self.out)?;
        writeln!(
            self.out,
            "inline std::optional<std::pair<{name}, std::span<const uint8_t>>> {name}::deserialize(std::span<const uint8_t> buffer) {{"
        )?;
        write_lines(&mut self.out, &lines, 1)?;
        writeln!(self.out, "}}")?;
        Ok(())
    }

    fn deserialize_value(&self, shape: Shape<'_>, place: &str) -> Result<Vec<String>> {
        let lines = match shape.ty {
            FieldType::String => vec![format!(
                "if (!packlink::wire::get_string(buffer, offset, {place})) {FAIL}"
            )],
            FieldType::Bytes => vec![format!(
                "if (!packlink::wire::get_bytes(buffer, offset, {place})) {FAIL}"
            )],
            FieldType::Message => vec![
                "{".to_string(),
                format!(
                    "{INDENT}auto decoded = {}::deserialize(buffer.subspan(offset));",
                    self.type_path(shape.reference()?)
                ),
                format!("{INDENT}if (!decoded) {FAIL}"),
                format!("{INDENT}{place} = std::move(decoded->first);"),
                format!("{INDENT}offset += decoded->second.size();"),
                "}".to_string(),
            ],
            FieldType::List => {
                let element = shape.element()?;
                let mut lines = vec![
                    "{".to_string(),
                    format!("{INDENT}uint16_t count;"),
                    format!("{INDENT}if (!packlink::wire::get(buffer, offset, count)) {FAIL}"),
                    format!("{INDENT}{place}.clear();"),
                    format!("{INDENT}{place}.reserve(count);"),
                    format!("{INDENT}for (uint16_t i = 0; i < count; ++i) {{"),
                    format!("{INDENT}{INDENT}{} item{{}};", self.value_type(element)?),
                ];
                let body = self.deserialize_value(element, "item")?;
                lines.extend(indented(indented(body).collect()));
                lines.push(format!("{INDENT}{INDENT}{place}.push_back(std::move(item));"));
                lines.push(format!("{INDENT}}}"));
                lines.push("}".to_string());
                lines
            }
            _ => vec![format!(
                "if (!packlink::wire::get(buffer, offset, {place})) {FAIL}"
            )],
        };
        Ok(lines)
    }

    fn value_type(&self, shape: Shape<'_>) -> Result<String> {
        let ty = match shape.ty {
            FieldType::Message | FieldType::Enum => self.type_path(shape.reference()?),
            FieldType::List => format!("std::vector<{}>", self.value_type(shape.element()?)?),
            other => scalar_type(other).to_string(),
        };
        Ok(ty)
    }

    fn type_path(&self, name: &Name) -> String {
        if name.namespace == self.namespace.name {
            name.name.clone()
        } else {
            format!("::{}::{}", name.namespace.replace('.', "::"), name.name)
        }
    }

    fn publish_ids(&mut self) -> Result<()> {
        let namespace = self.namespace;
        writeln!(self.out)?;
        writeln!(self.out, "enum class PublishId : uint8_t {{")?;
        for publish in &namespace.publishes {
            self.comments(&publish.comments, INDENT)?;
            writeln!(self.out, "{INDENT}{} = {},", publish.name, publish.id)?;
        }
        writeln!(self.out, "}};")?;
        Ok(())
    }

    /// The device-side handler class: one method per transaction, bound to
    /// its ID by `register_handlers`.
    fn project_class(&mut self) -> Result<()> {
        let namespace = self.namespace;
        let class = pascal_case(stem(&namespace.name));
        writeln!(self.out)?;
        writeln!(self.out, "class {class} {{")?;
        writeln!(self.out, "  public:")?;
        writeln!(self.out, "{INDENT}{class}();")?;
        writeln!(self.out, "{INDENT}~{class}();\n")?;

        writeln!(self.out, "{INDENT}template <class Node>")?;
        if self.stub {
            writeln!(self.out, "{INDENT}void register_handlers(Node &node);\n")?;
        } else {
            writeln!(self.out, "{INDENT}void register_handlers(Node &node) {{")?;
            for transaction in &namespace.transactions {
                let request = self.type_path(&transaction.request);
                let response = self.type_path(&transaction.response);
                writeln!(
                    self.out,
                    "{INDENT}{INDENT}node.template register_handler<{request}, {response}>(\n{INDENT}{INDENT}{INDENT}{}, [this](const {request} &request) {{ return {}(request); }});",
                    transaction.id,
                    transaction.name
                )?;
            }
            writeln!(self.out, "{INDENT}}}\n")?;
        }

        for transaction in &namespace.transactions {
            self.comments(&transaction.comments, INDENT)?;
            writeln!(
                self.out,
                "{INDENT}{} {}(const {} &request);",
                self.type_path(&transaction.response),
                transaction.name,
                self.type_path(&transaction.request)
            )?;
        }

        writeln!(self.out, "\n  private:")?;
        writeln!(self.out, "{INDENT}struct {class}Impl;")?;
        writeln!(self.out, "{INDENT}{class}Impl *impl_;")?;
        writeln!(self.out, "}};")?;
        Ok(())
    }
}

fn scalar_type(ty: FieldType) -> &'static str {
    match ty {
        FieldType::Bool => "bool",
        FieldType::U8 => "uint8_t",
        FieldType::U16 => "uint16_t",
        FieldType::U32 => "uint32_t",
        FieldType::U64 => "uint64_t",
        FieldType::I8 => "int8_t",
        FieldType::I16 => "int16_t",
        FieldType::I32 => "int32_t",
        FieldType::I64 => "int64_t",
        FieldType::F32 => "float",
        FieldType::F64 => "double",
        FieldType::String => "std::string",
        FieldType::Bytes => "std::vector<uint8_t>",
        FieldType::List | FieldType::Message | FieldType::Enum => "void",
    }
}

fn bit_mask(index: usize) -> String {
    format!("0x{:02x}", 1u8 << (index % 8))
}

fn trailing_comment(out: &mut String, comment: &Option<String>) -> std::fmt::Result {
    match comment {
        Some(comment) => write!(out, "  //{comment}"),
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
