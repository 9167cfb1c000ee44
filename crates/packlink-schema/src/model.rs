use serde::{Deserialize, Serialize};

/// Wire type of a field, list element or constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Bool,
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    String,
    Bytes,
    List,
    Message,
    Enum,
}

impl FieldType {
    /// Every variant, in wire-code order.
    pub const ALL: [FieldType; 16] = [
        FieldType::Bool,
        FieldType::U8,
        FieldType::U16,
        FieldType::U32,
        FieldType::U64,
        FieldType::I8,
        FieldType::I16,
        FieldType::I32,
        FieldType::I64,
        FieldType::F32,
        FieldType::F64,
        FieldType::String,
        FieldType::Bytes,
        FieldType::List,
        FieldType::Message,
        FieldType::Enum,
    ];

    /// Look up a built-in IDL type keyword.
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        let ty = match keyword {
            "bool" => Self::Bool,
            "uint8_t" => Self::U8,
            "uint16_t" => Self::U16,
            "uint32_t" => Self::U32,
            "uint64_t" => Self::U64,
            "int8_t" => Self::I8,
            "int16_t" => Self::I16,
            "int32_t" => Self::I32,
            "int64_t" => Self::I64,
            "float32" => Self::F32,
            "float64" => Self::F64,
            "string" => Self::String,
            "bytes" => Self::Bytes,
            _ => return None,
        };
        Some(ty)
    }

    /// IDL spelling of the type.
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::U8 => "uint8_t",
            Self::U16 => "uint16_t",
            Self::U32 => "uint32_t",
            Self::U64 => "uint64_t",
            Self::I8 => "int8_t",
            Self::I16 => "int16_t",
            Self::I32 => "int32_t",
            Self::I64 => "int64_t",
            Self::F32 => "float32",
            Self::F64 => "float64",
            Self::String => "string",
            Self::Bytes => "bytes",
            Self::List => "list",
            Self::Message => "message",
            Self::Enum => "enum",
        }
    }

    /// Encoded width of fixed-size types.
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            Self::Bool | Self::U8 | Self::I8 | Self::Enum => Some(1),
            Self::U16 | Self::I16 => Some(2),
            Self::U32 | Self::I32 | Self::F32 => Some(4),
            Self::U64 | Self::I64 | Self::F64 => Some(8),
            Self::String | Self::Bytes | Self::List | Self::Message => None,
        }
    }

    /// Numbers and bool.
    pub fn is_scalar(self) -> bool {
        !matches!(
            self,
            Self::String | Self::Bytes | Self::List | Self::Message | Self::Enum
        )
    }

    /// Types that refer to a user declaration.
    pub fn is_user_defined(self) -> bool {
        matches!(self, Self::Message | Self::Enum)
    }

    /// Types that may be declared as a constant.
    pub fn is_constant_type(self) -> bool {
        self.is_scalar() || self == Self::String
    }

    /// Position in [`FieldType::ALL`], used by the binary schema form.
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(usize::from(code)).copied()
    }
}

/// Reference to a declaration in some namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Name {
    pub name: String,
    pub namespace: String,
}

impl Name {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// The name as written from inside `namespace`: bare when local,
    /// namespace-qualified otherwise.
    pub fn relative_to(&self, namespace: &str) -> String {
        if self.namespace == namespace {
            self.name.clone()
        } else {
            self.qualified()
        }
    }

    /// `namespace.name`.
    pub fn qualified(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }
}

impl std::fmt::Display for Name {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.qualified())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub ty: FieldType,
    /// Element type when `ty` is [`FieldType::List`].
    pub element: Option<FieldType>,
    pub optional: bool,
    /// Target of a message or enum field, or of a list of messages or enums.
    pub reference: Option<Name>,
    #[serde(default)]
    pub comments: Vec<String>,
    #[serde(default)]
    pub inline_comment: Option<String>,
}

impl Field {
    /// The type a single value of this field carries: the element type for
    /// lists, the field type otherwise.
    pub fn value_type(&self) -> FieldType {
        match (self.ty, self.element) {
            (FieldType::List, Some(element)) => element,
            (ty, _) => ty,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub name: String,
    pub fields: Vec<Field>,
    #[serde(default)]
    pub comments: Vec<String>,
}

impl Message {
    pub fn optional_count(&self) -> usize {
        self.fields.iter().filter(|field| field.optional).count()
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumValue {
    pub label: String,
    pub value: u8,
    #[serde(default)]
    pub comments: Vec<String>,
    #[serde(default)]
    pub inline_comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enum {
    pub name: String,
    pub values: Vec<EnumValue>,
    #[serde(default)]
    pub comments: Vec<String>,
}

impl Enum {
    pub fn contains(&self, value: u8) -> bool {
        self.values.iter().any(|v| v.value == value)
    }

    pub fn label_of(&self, value: u8) -> Option<&str> {
        self.values
            .iter()
            .find(|v| v.value == value)
            .map(|v| v.label.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constant {
    pub name: String,
    pub ty: FieldType,
    /// Value text as written, including any `{reference}` placeholders.
    pub value: String,
    /// Constants referenced by placeholders, in order of first appearance.
    pub references: Vec<Name>,
    #[serde(default)]
    pub comments: Vec<String>,
    #[serde(default)]
    pub inline_comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub name: String,
    pub id: u8,
    /// Message the host sends.
    pub request: Name,
    /// Message the device answers with.
    pub response: Name,
    #[serde(default)]
    pub comments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publish {
    pub name: String,
    pub id: u8,
    pub message: Name,
    #[serde(default)]
    pub comments: Vec<String>,
}

/// Every declaration parsed from one schema file.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Namespace {
    /// Dotted path, e.g. `nlb.proto.flash`.
    pub name: String,
    pub imports: Vec<String>,
    pub constants: Vec<Constant>,
    pub enums: Vec<Enum>,
    pub messages: Vec<Message>,
    pub transactions: Vec<Transaction>,
    pub publishes: Vec<Publish>,
}

impl Namespace {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Path segments of the namespace name.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.name.split('.').filter(|s| !s.is_empty())
    }

    /// Final path segment, used as the module or project name.
    pub fn stem(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }

    pub fn message(&self, name: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.name == name)
    }

    pub fn enumeration(&self, name: &str) -> Option<&Enum> {
        self.enums.iter().find(|e| e.name == name)
    }

    pub fn constant(&self, name: &str) -> Option<&Constant> {
        self.constants.iter().find(|c| c.name == name)
    }

    pub fn transaction(&self, name: &str) -> Option<&Transaction> {
        self.transactions.iter().find(|t| t.name == name)
    }

    pub fn publish(&self, name: &str) -> Option<&Publish> {
        self.publishes.iter().find(|p| p.name == name)
    }

    /// Highest transaction or publish ID declared here.
    pub fn max_id(&self) -> Option<u8> {
        self.transactions
            .iter()
            .map(|t| t.id)
            .chain(self.publishes.iter().map(|p| p.id))
            .max()
    }

    pub fn has_endpoints(&self) -> bool {
        !self.transactions.is_empty() || !self.publishes.is_empty()
    }

    /// Pretty JSON dump for inspection.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_roundtrip() {
        for ty in FieldType::ALL {
            if matches!(ty, FieldType::List | FieldType::Message | FieldType::Enum) {
                assert_eq!(FieldType::from_keyword(ty.keyword()), None);
            } else {
                assert_eq!(FieldType::from_keyword(ty.keyword()), Some(ty));
            }
            assert_eq!(FieldType::from_code(ty.code()), Some(ty));
        }
        assert_eq!(FieldType::from_code(16), None);
    }

    #[test]
    fn relative_names() {
        let local = Name::new("Ping", "a.b");
        assert_eq!(local.relative_to("a.b"), "Ping");
        assert_eq!(local.relative_to("a.c"), "a.b.Ping");
        assert_eq!(local.to_string(), "a.b.Ping");
    }

    #[test]
    fn namespace_helpers() {
        let mut ns = Namespace::new("nlb.proto.flash");
        ns.transactions.push(Transaction {
            name: "ping".into(),
            id: 3,
            request: Name::new("Ping", "nlb.proto.flash"),
            response: Name::new("Ping", "nlb.proto.flash"),
            comments: Vec::new(),
        });
        ns.publishes.push(Publish {
            name: "log".into(),
            id: 7,
            message: Name::new("Log", "nlb.proto.flash"),
            comments: Vec::new(),
        });

        assert_eq!(ns.stem(), "flash");
        assert_eq!(ns.segments().collect::<Vec<_>>(), ["nlb", "proto", "flash"]);
        assert_eq!(ns.max_id(), Some(7));
        assert!(ns.has_endpoints());
        assert_eq!(Namespace::new("x").max_id(), None);
    }

    #[test]
    fn json_roundtrip() {
        let mut ns = Namespace::new("demo");
        ns.enums.push(Enum {
            name: "Level".into(),
            values: vec![EnumValue {
                label: "LOW".into(),
                value: 0,
                comments: vec!["quiet".into()],
                inline_comment: None,
            }],
            comments: Vec::new(),
        });

        let json = ns.to_json().unwrap();
        assert!(json.contains("\"LOW\""));
        assert_eq!(Namespace::from_json(&json).unwrap(), ns);
    }
}
