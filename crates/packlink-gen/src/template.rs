//! Template target: substitute constants into arbitrary text.

use packlink_schema::{Namespace, ParseContext};

use crate::constants;
use crate::error::{GenError, Result};

const OPEN: &str = "{{ ";
const CLOSE: &str = " }}";

/// Replace every `{{ name }}` in `template` with the expanded value of the
/// constant `name`, given relative to `namespace`. Lines keep their order and
/// each ends with a newline.
pub(crate) fn render(ctx: &ParseContext, namespace: &Namespace, template: &str) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    for line in template.lines() {
        render_line(ctx, namespace, line, &mut out)?;
        out.push('\n');
    }
    Ok(out)
}

fn render_line(ctx: &ParseContext, namespace: &Namespace, line: &str, out: &mut String) -> Result<()> {
    let mut rest = line;
    while let Some(start) = rest.find(OPEN) {
        let after = &rest[start + OPEN.len()..];
        let Some(end) = after.find(CLOSE) else {
            break;
        };
        let key = &after[..end];
        if !is_placeholder(key) {
            out.push_str(&rest[..start + OPEN.len()]);
            rest = after;
            continue;
        }

        let name = constants::lookup(ctx, namespace, key)
            .ok_or_else(|| GenError::UnknownConstant { name: key.to_string() })?;
        out.push_str(&rest[..start]);
        out.push_str(&constants::expand(ctx, &name)?);
        rest = &after[end + CLOSE.len()..];
    }
    out.push_str(rest);
    Ok(())
}

fn is_placeholder(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use packlink_schema::Parser;

    fn context() -> ParseContext {
        let mut ctx = ParseContext::new();
        Parser::parse_str("constant uint8_t limit = 4;\n", "demo.other", &mut ctx).unwrap();
        Parser::parse_str(
            "import demo.other;\nconstant uint16_t size = 2 * {demo.other.limit};\n",
            "demo.sample",
            &mut ctx,
        )
        .unwrap();
        ctx
    }

    #[test]
    fn substitutes_local_and_imported_constants() {
        let ctx = context();
        let ns = ctx.namespace("demo.sample").unwrap();
        let out = render(
            &ctx,
            ns,
            "#define SIZE {{ size }}\n#define LIMIT {{ demo.other.limit }}\nplain {{ }} text",
        )
        .unwrap();
        assert_eq!(
            out,
            "#define SIZE 2 * 4\n#define LIMIT 4\nplain {{ }} text\n"
        );
    }

    #[test]
    fn several_placeholders_on_one_line() {
        let ctx = context();
        let ns = ctx.namespace("demo.sample").unwrap();
        let out = render(&ctx, ns, "{{ size }}/{{ demo.other.limit }}").unwrap();
        assert_eq!(out, "2 * 4/4\n");
    }

    #[test]
    fn unknown_names_fail() {
        let ctx = context();
        let ns = ctx.namespace("demo.sample").unwrap();
        let err = render(&ctx, ns, "{{ missing }}").unwrap_err();
        assert!(matches!(err, GenError::UnknownConstant { name } if name == "missing"));
    }
}
