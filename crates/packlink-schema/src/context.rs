use crate::error::{ParseError, Result};
use crate::model::{Constant, Enum, Message, Name, Namespace};

/// State shared by every file parsed in one compile session.
///
/// Holds the parsed namespaces in parse order and the session-wide ID counter
/// that transactions and publishes draw from.
#[derive(Debug, Clone, Default)]
pub struct ParseContext {
    namespaces: Vec<Namespace>,
    next_id: u16,
}

impl ParseContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn namespace(&self, name: &str) -> Option<&Namespace> {
        self.namespaces.iter().find(|ns| ns.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.namespace(name).is_some()
    }

    /// Namespaces in the order they were added.
    pub fn namespaces(&self) -> impl Iterator<Item = &Namespace> {
        self.namespaces.iter()
    }

    /// Next ID the counter would hand out.
    pub fn next_id(&self) -> u16 {
        self.next_id
    }

    pub(crate) fn insert(&mut self, namespace: Namespace, next_id: u16) -> Result<()> {
        if self.contains(&namespace.name) {
            return Err(ParseError::DuplicateNamespace(namespace.name));
        }
        self.next_id = self.next_id.max(next_id);
        self.namespaces.push(namespace);
        Ok(())
    }

    pub fn message(&self, name: &Name) -> Option<&Message> {
        self.namespace(&name.namespace)?.message(&name.name)
    }

    pub fn enumeration(&self, name: &Name) -> Option<&Enum> {
        self.namespace(&name.namespace)?.enumeration(&name.name)
    }

    pub fn constant(&self, name: &Name) -> Option<&Constant> {
        self.namespace(&name.namespace)?.constant(&name.name)
    }

    /// Constants visible from `namespace`: its own, then those of each import,
    /// paired with the namespace that declares them.
    pub fn visible_constants<'a>(
        &'a self,
        namespace: &'a Namespace,
    ) -> impl Iterator<Item = (&'a str, &'a Constant)> + 'a {
        let own = namespace
            .constants
            .iter()
            .map(move |c| (namespace.name.as_str(), c));
        let imported = namespace
            .imports
            .iter()
            .filter_map(move |import| self.namespace(import))
            .flat_map(|ns| ns.constants.iter().map(move |c| (ns.name.as_str(), c)));
        own.chain(imported)
    }
}
