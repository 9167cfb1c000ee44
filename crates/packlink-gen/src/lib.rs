//! Code generators for packlink schemas.
//!
//! Every target reads the same [`ParseContext`] and produces deterministic
//! text: the same schema always yields byte-identical output.
//!
//! | target | output |
//! |---|---|
//! | [`Target::Rust`] | module body with messages, enums, constants, registry and client |
//! | [`Target::Cpp`] | header with structs, inline serializers and the handler class |
//! | [`Target::CppStub`] | the same header with declarations only |
//! | [`Target::Template`] | a text template with `{{ constant }}` placeholders filled in |

pub mod constants;
pub mod error;
pub mod names;

mod cpp;
mod rust;
mod shape;
mod template;

use std::path::{Path, PathBuf};

use packlink_schema::{ParseContext, Parser};
use tracing::{debug, info};

pub use error::{GenError, Result};

/// Output language of a generator run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Rust,
    Cpp,
    CppStub,
    Template,
}

impl Target {
    /// Conventional file extension of the output, if the target has one.
    pub fn extension(self) -> Option<&'static str> {
        match self {
            Target::Rust => Some("rs"),
            Target::Cpp | Target::CppStub => Some("hpp"),
            Target::Template => None,
        }
    }
}

/// Knobs shared by all targets.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    /// Path generated Rust code uses to reach the runtime crate.
    pub runtime_path: String,
    /// Emit endpoint handles and the client type for namespaces that declare
    /// transactions or publishes.
    pub client: bool,
    /// Template text for [`Target::Template`].
    pub template: Option<String>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            runtime_path: "::packlink".to_string(),
            client: true,
            template: None,
        }
    }
}

impl GenerateOptions {
    pub fn with_runtime_path(mut self, path: impl Into<String>) -> Self {
        self.runtime_path = path.into();
        self
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }
}

/// Generate `target` output for the namespace `namespace` of `ctx`.
pub fn generate(
    ctx: &ParseContext,
    namespace: &str,
    target: Target,
    options: &GenerateOptions,
) -> Result<String> {
    let ns = ctx
        .namespace(namespace)
        .ok_or_else(|| GenError::UnknownNamespace(namespace.to_string()))?;
    debug!(namespace, ?target, "generating");
    match target {
        Target::Rust => rust::generate(ctx, ns, options),
        Target::Cpp => cpp::generate(ctx, ns, false),
        Target::CppStub => cpp::generate(ctx, ns, true),
        Target::Template => {
            let template = options.template.as_deref().ok_or(GenError::MissingTemplate)?;
            template::render(ctx, ns, template)
        }
    }
}

/// One generator invocation over files on disk.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// Schema to generate code for.
    pub input: PathBuf,
    /// Schemas `input` imports, directly or not, in dependency order.
    pub deps: Vec<PathBuf>,
    /// Prefix of the namespace each file's stem is appended to.
    pub parent_namespace: String,
    pub output: PathBuf,
    pub target: Target,
    /// Template file for [`Target::Template`].
    pub template: Option<PathBuf>,
    pub options: GenerateOptions,
}

impl GenerateRequest {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>, target: Target) -> Self {
        Self {
            input: input.into(),
            deps: Vec::new(),
            parent_namespace: String::new(),
            output: output.into(),
            target,
            template: None,
            options: GenerateOptions::default(),
        }
    }

    pub fn with_deps(mut self, deps: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        self.deps = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_parent_namespace(mut self, parent: impl Into<String>) -> Self {
        self.parent_namespace = parent.into();
        self
    }

    pub fn with_template(mut self, template: impl Into<PathBuf>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn with_options(mut self, options: GenerateOptions) -> Self {
        self.options = options;
        self
    }
}

/// Parse the dependencies and the input in a fresh context, generate, and
/// write the output file. Returns the generated namespace name.
pub fn generate_file(request: &GenerateRequest) -> Result<String> {
    let mut ctx = ParseContext::new();
    for dep in &request.deps {
        Parser::parse_file(dep, &request.parent_namespace, &mut ctx)?;
    }
    let namespace = Parser::parse_file(&request.input, &request.parent_namespace, &mut ctx)?;

    let mut options = request.options.clone();
    if let Some(path) = &request.template {
        options.template = Some(read(path)?);
    }
    let text = generate(&ctx, &namespace, request.target, &options)?;

    if let Some(parent) = request.output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|source| io_error(parent, source))?;
        }
    }
    std::fs::write(&request.output, text).map_err(|source| io_error(&request.output, source))?;
    info!(
        namespace = %namespace,
        output = %request.output.display(),
        "generated"
    );
    Ok(namespace)
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| io_error(path, source))
}

fn io_error(path: &Path, source: std::io::Error) -> GenError {
    GenError::Io {
        path: path.to_path_buf(),
        source,
    }
}
