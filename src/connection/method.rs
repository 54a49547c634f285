//! Method descriptors resolved by the bind handshake.

use std::collections::HashMap;

use crate::error::{ConsumerError, Result};
use crate::protocol::{BindServiceReply, ABORT_METHOD_ID, BIND_METHOD_ID, RESERVED_METHOD_ID};

/// A remote procedure of a bound service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Method {
    name: String,
    id: u16,
}

impl Method {
    pub fn new(name: impl Into<String>, id: u16) -> Self {
        Self {
            name: name.into(),
            id,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Method ID used in invoke frame headers.
    pub fn id(&self) -> u16 {
        self.id
    }
}

/// Name -> [`Method`] mapping for one bound service.
///
/// Built once from the bind reply and never modified afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodTable {
    service_id: u32,
    methods: HashMap<String, Method>,
}

impl MethodTable {
    /// Build a table from a bind reply.
    ///
    /// Rejects replies that use reserved method IDs or repeat a name.
    pub fn from_reply(reply: BindServiceReply) -> Result<Self> {
        let mut methods = HashMap::with_capacity(reply.methods.len());

        for remote in reply.methods {
            if matches!(remote.id, RESERVED_METHOD_ID | BIND_METHOD_ID | ABORT_METHOD_ID) {
                return Err(ConsumerError::Protocol(format!(
                    "Method {} uses reserved ID {:#06x}",
                    remote.name, remote.id
                )));
            }
            if methods.contains_key(&remote.name) {
                return Err(ConsumerError::Protocol(format!(
                    "Method {} listed twice in bind reply",
                    remote.name
                )));
            }
            methods.insert(remote.name.clone(), Method::new(remote.name, remote.id));
        }

        Ok(Self {
            service_id: reply.service_id,
            methods,
        })
    }

    pub fn service_id(&self) -> u32 {
        self.service_id
    }

    pub fn get(&self, name: &str) -> Option<&Method> {
        self.methods.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Method names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn iter(&self) -> impl Iterator<Item = &Method> {
        self.methods.values()
    }
}
