//! Constant expansion shared by every target.

use packlink_schema::{Constant, FieldType, Name, Namespace, ParseContext};

use crate::error::{GenError, Result};

/// Fully expanded value of the constant `name`.
///
/// Each `{reference}` is replaced by the referenced constant's own expanded
/// value. A string constant substituted into another string contributes its
/// text without the surrounding quotes.
pub fn expand(ctx: &ParseContext, name: &Name) -> Result<String> {
    let mut stack = Vec::new();
    expand_inner(ctx, name, &mut stack)
}

fn expand_inner(ctx: &ParseContext, name: &Name, stack: &mut Vec<Name>) -> Result<String> {
    if stack.contains(name) {
        return Err(GenError::ConstantCycle {
            name: name.qualified(),
        });
    }
    let constant = find(ctx, name)?;

    stack.push(name.clone());
    let mut value = constant.value.clone();
    for reference in &constant.references {
        let referenced = find(ctx, reference)?;
        let mut expanded = expand_inner(ctx, reference, stack)?;
        if constant.ty == FieldType::String && referenced.ty == FieldType::String {
            expanded = unquote(&expanded).to_string();
        }
        let placeholder = format!("{{{}}}", reference.relative_to(&name.namespace));
        value = value.replace(&placeholder, &expanded);
    }
    stack.pop();
    Ok(value)
}

fn find<'c>(ctx: &'c ParseContext, name: &Name) -> Result<&'c Constant> {
    ctx.constant(name).ok_or_else(|| GenError::UnknownConstant {
        name: name.qualified(),
    })
}

/// Look up a constant by its name relative to `namespace`.
pub fn lookup(ctx: &ParseContext, namespace: &Namespace, relative: &str) -> Option<Name> {
    ctx.visible_constants(namespace)
        .map(|(ns, constant)| Name::new(constant.name.clone(), ns))
        .find(|name| name.relative_to(&namespace.name) == relative)
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}
