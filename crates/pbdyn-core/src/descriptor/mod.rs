//! Descriptor registry.
//!
//! A [`Registry`] is built once from serialized `FileDescriptorSet` bytes and
//! is read-only afterwards. It indexes every message and enum type of every
//! file under its fully-qualified name and binds each field's type
//! reference to a [`MessageIndex`] or [`EnumIndex`].
//!
//! ## Build
//!
//! 1. Parse the descriptor-set bytes into per-file trees
//! 2. Walk every file in order, assigning indices and collecting all type
//!    names, nested types included
//! 3. Bind field references against the complete name index, so forward,
//!    cross-file and self references all resolve
//! 4. Detect map fields from the bound entry types

mod parse;
mod types;

use crate::error::{Error, Result};
use crate::wire::MAX_FIELD_NUMBER;
use parse::{EnumProto, FieldProto, FileProto, MessageProto};
use std::collections::HashMap;
use tracing::{debug, trace, warn};

pub use types::{
    Cardinality, EnumDescriptor, EnumIndex, EnumValue, FieldDescriptor, FieldKind,
    FileDescriptor, MessageDescriptor, MessageIndex, Syntax,
};

/// How the registry treats two types with the same fully-qualified name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// The first occurrence in file order, then declaration order, wins
    #[default]
    FirstWins,
    /// Duplicate names fail the build with [`Error::SchemaParse`]
    Error,
}

/// Configuration for building a registry
#[derive(Debug, Clone, Default)]
pub struct RegistryConfig {
    /// Treatment of duplicate type names
    pub duplicate_names: DuplicatePolicy,
}

impl RegistryConfig {
    /// Creates a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the duplicate-name policy
    pub fn duplicate_names(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_names = policy;
        self
    }
}

/// A bound type reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TypeRef {
    Message(MessageIndex),
    Enum(EnumIndex),
}

/// Index of message and enum types from a descriptor set
#[derive(Debug, Clone)]
pub struct Registry {
    files: Vec<FileDescriptor>,
    messages: Vec<MessageDescriptor>,
    enums: Vec<EnumDescriptor>,
    message_names: HashMap<String, MessageIndex>,
    enum_names: HashMap<String, EnumIndex>,
}

/// Pass-one record of a message: where it lives and its raw definition
struct PendingMessage<'p> {
    full_name: String,
    file: usize,
    proto: &'p MessageProto,
    nested_messages: Vec<MessageIndex>,
    nested_enums: Vec<EnumIndex>,
}

impl Registry {
    /// Builds a registry from serialized `FileDescriptorSet` bytes
    pub fn build(descriptor_set: &[u8]) -> Result<Self> {
        Self::build_with_config(descriptor_set, &RegistryConfig::default())
    }

    /// Builds a registry with custom configuration
    pub fn build_with_config(descriptor_set: &[u8], config: &RegistryConfig) -> Result<Self> {
        let protos = parse::parse_descriptor_set(descriptor_set)?;
        debug!(
            "Parsed descriptor set: {} file(s), {} bytes",
            protos.len(),
            descriptor_set.len()
        );
        Self::from_protos(&protos, config)
    }

    fn from_protos(protos: &[FileProto], config: &RegistryConfig) -> Result<Self> {
        let mut collector = Collector::new(config);

        // Pass one: assign indices and names
        for (file_index, file) in protos.iter().enumerate() {
            let syntax = Syntax::try_from(file.syntax.as_str())?;
            let mut file_desc = FileDescriptor {
                name: file.name.clone(),
                package: file.package.clone(),
                dependencies: file.dependencies.clone(),
                syntax,
                messages: Vec::with_capacity(file.messages.len()),
                enums: Vec::with_capacity(file.enums.len()),
            };

            for message in &file.messages {
                let index = collector.collect_message(message, &file.package, file_index)?;
                file_desc.messages.push(index);
            }
            for enum_type in &file.enums {
                let index = collector.collect_enum(enum_type, &file.package)?;
                file_desc.enums.push(index);
            }
            collector.files.push(file_desc);
        }

        // Pass two: bind field references
        let Collector {
            files,
            pending,
            enums,
            message_names,
            enum_names,
            ..
        } = collector;

        let mut registry = Registry {
            files,
            messages: Vec::with_capacity(pending.len()),
            enums,
            message_names,
            enum_names,
        };

        for (i, message) in pending.iter().enumerate() {
            let descriptor = registry.bind_message(MessageIndex(i), message, &pending)?;
            registry.messages.push(descriptor);
        }

        debug!(
            "Registry built: {} message type(s), {} enum type(s)",
            registry.messages.len(),
            registry.enums.len()
        );
        Ok(registry)
    }

    fn bind_message(
        &self,
        index: MessageIndex,
        message: &PendingMessage<'_>,
        pending: &[PendingMessage<'_>],
    ) -> Result<MessageDescriptor> {
        let mut fields = Vec::with_capacity(message.proto.fields.len());
        let mut by_number = HashMap::with_capacity(message.proto.fields.len());

        for field in &message.proto.fields {
            let descriptor = self.bind_field(&message.full_name, field, pending)?;
            if by_number.insert(descriptor.number, fields.len()).is_some() {
                return Err(Error::schema_parse(format!(
                    "field number {} is used twice in '{}'",
                    descriptor.number, message.full_name
                )));
            }
            fields.push(descriptor);
        }

        Ok(MessageDescriptor {
            index,
            full_name: message.full_name.clone(),
            name: message.proto.name.clone(),
            file: message.file,
            fields,
            by_number,
            nested_messages: message.nested_messages.clone(),
            nested_enums: message.nested_enums.clone(),
            map_entry: message.proto.map_entry,
        })
    }

    fn bind_field(
        &self,
        scope: &str,
        field: &FieldProto,
        pending: &[PendingMessage<'_>],
    ) -> Result<FieldDescriptor> {
        let full_name = format!("{scope}.{}", field.name);

        if field.number < 1 || field.number as u32 > MAX_FIELD_NUMBER {
            return Err(Error::schema_parse(format!(
                "field '{full_name}' has invalid number {}",
                field.number
            )));
        }

        let cardinality = match field.label {
            None | Some(1) => Cardinality::Optional,
            Some(2) => Cardinality::Required,
            Some(3) => Cardinality::Repeated,
            Some(other) => {
                return Err(Error::schema_parse(format!(
                    "field '{full_name}' has unknown label {other}"
                )))
            }
        };

        let referenced = match &field.type_name {
            Some(name) if !name.is_empty() => {
                let bound = self.lookup_type(scope, name).ok_or_else(|| {
                    Error::unresolved_reference(name.trim_start_matches('.'), &full_name)
                })?;
                Some(bound)
            }
            _ => None,
        };

        let kind = match (field.r#type, referenced) {
            (Some(1), _) => FieldKind::Double,
            (Some(2), _) => FieldKind::Float,
            (Some(3), _) => FieldKind::Int64,
            (Some(4), _) => FieldKind::UInt64,
            (Some(5), _) => FieldKind::Int32,
            (Some(6), _) => FieldKind::Fixed64,
            (Some(7), _) => FieldKind::Fixed32,
            (Some(8), _) => FieldKind::Bool,
            (Some(9), _) => FieldKind::String,
            (Some(10), Some(TypeRef::Message(m))) => FieldKind::Group(m),
            (Some(11) | None, Some(TypeRef::Message(m))) => FieldKind::Message(m),
            (Some(12), _) => FieldKind::Bytes,
            (Some(13), _) => FieldKind::UInt32,
            (Some(14) | None, Some(TypeRef::Enum(e))) => FieldKind::Enum(e),
            (Some(15), _) => FieldKind::SFixed32,
            (Some(16), _) => FieldKind::SFixed64,
            (Some(17), _) => FieldKind::SInt32,
            (Some(18), _) => FieldKind::SInt64,
            (Some(10 | 11 | 14) | None, _) => {
                // Reference missing or bound to the wrong sort of type
                let name = field.type_name.as_deref().unwrap_or_default();
                if name.is_empty() {
                    return Err(Error::schema_parse(format!(
                        "field '{full_name}' declares no type"
                    )));
                }
                return Err(Error::unresolved_reference(
                    name.trim_start_matches('.'),
                    &full_name,
                ));
            }
            (Some(other), _) => {
                return Err(Error::schema_parse(format!(
                    "field '{full_name}' has unknown type {other}"
                )))
            }
        };

        let type_name = match kind {
            FieldKind::Message(m) | FieldKind::Group(m) => Some(pending[m.0].full_name.clone()),
            FieldKind::Enum(e) => Some(self.enums[e.0].full_name.clone()),
            _ => None,
        };

        let repeated = cardinality == Cardinality::Repeated;
        let is_map = match kind {
            FieldKind::Message(m) if repeated => is_map_entry(pending[m.0].proto),
            _ => false,
        };

        trace!("Bound field {} as {}", full_name, kind.name());

        Ok(FieldDescriptor {
            number: field.number as u32,
            json_name: field
                .json_name
                .clone()
                .unwrap_or_else(|| types::to_lower_camel_case(&field.name)),
            name: field.name.clone(),
            full_name,
            cardinality,
            kind,
            type_name,
            is_map,
            is_packed: repeated && kind.is_packable(),
        })
    }

    /// Resolves a type name as written in a field, relative to `scope`.
    ///
    /// Names with a leading `.` are absolute. Others are searched from the
    /// innermost enclosing scope outwards, as protoc does.
    fn lookup_type(&self, scope: &str, name: &str) -> Option<TypeRef> {
        if let Some(absolute) = name.strip_prefix('.') {
            return self.lookup_exact(absolute);
        }

        let mut scope = scope;
        loop {
            let candidate = if scope.is_empty() {
                name.to_string()
            } else {
                format!("{scope}.{name}")
            };
            if let Some(found) = self.lookup_exact(&candidate) {
                return Some(found);
            }
            if scope.is_empty() {
                return None;
            }
            scope = match scope.rfind('.') {
                Some(i) => &scope[..i],
                None => "",
            };
        }
    }

    fn lookup_exact(&self, name: &str) -> Option<TypeRef> {
        self.message_names
            .get(name)
            .map(|&m| TypeRef::Message(m))
            .or_else(|| self.enum_names.get(name).map(|&e| TypeRef::Enum(e)))
    }

    /// Resolves a fully-qualified message type name.
    ///
    /// A single leading `.` is accepted and ignored.
    pub fn resolve(&self, full_name: &str) -> Result<&MessageDescriptor> {
        let name = full_name.strip_prefix('.').unwrap_or(full_name);
        self.message_names
            .get(name)
            .map(|&i| &self.messages[i.0])
            .ok_or_else(|| Error::type_not_found(name))
    }

    /// Resolves a fully-qualified enum type name
    pub fn resolve_enum(&self, full_name: &str) -> Result<&EnumDescriptor> {
        let name = full_name.strip_prefix('.').unwrap_or(full_name);
        self.enum_names
            .get(name)
            .map(|&i| &self.enums[i.0])
            .ok_or_else(|| Error::type_not_found(name))
    }

    /// Returns the message type at `index`
    pub fn message(&self, index: MessageIndex) -> &MessageDescriptor {
        &self.messages[index.0]
    }

    /// Returns the enum type at `index`
    pub fn enum_type(&self, index: EnumIndex) -> &EnumDescriptor {
        &self.enums[index.0]
    }

    /// Files in descriptor-set order
    pub fn files(&self) -> &[FileDescriptor] {
        &self.files
    }

    /// All message types, nested and shadowed duplicates included
    pub fn messages(&self) -> impl Iterator<Item = &MessageDescriptor> {
        self.messages.iter()
    }

    /// All enum types, nested and shadowed duplicates included
    pub fn enums(&self) -> impl Iterator<Item = &EnumDescriptor> {
        self.enums.iter()
    }
}

/// The synthetic entry type protoc generates for `map<K, V>`
fn is_map_entry(message: &MessageProto) -> bool {
    message.map_entry
        && message.fields.len() == 2
        && message
            .fields
            .iter()
            .any(|f| f.name == "key" && f.number == 1)
        && message
            .fields
            .iter()
            .any(|f| f.name == "value" && f.number == 2)
}

/// Pass-one state
struct Collector<'p> {
    policy: DuplicatePolicy,
    files: Vec<FileDescriptor>,
    pending: Vec<PendingMessage<'p>>,
    enums: Vec<EnumDescriptor>,
    message_names: HashMap<String, MessageIndex>,
    enum_names: HashMap<String, EnumIndex>,
}

impl<'p> Collector<'p> {
    fn new(config: &RegistryConfig) -> Self {
        Self {
            policy: config.duplicate_names,
            files: Vec::new(),
            pending: Vec::new(),
            enums: Vec::new(),
            message_names: HashMap::new(),
            enum_names: HashMap::new(),
        }
    }

    fn qualify(scope: &str, name: &str) -> String {
        if scope.is_empty() {
            name.to_string()
        } else {
            format!("{scope}.{name}")
        }
    }

    /// Records a name unless it is taken; returns whether it was recorded
    fn claim_name(&self, full_name: &str) -> Result<bool> {
        let taken =
            self.message_names.contains_key(full_name) || self.enum_names.contains_key(full_name);
        if !taken {
            return Ok(true);
        }
        match self.policy {
            DuplicatePolicy::FirstWins => {
                warn!(
                    "Duplicate type name '{}': keeping the first definition",
                    full_name
                );
                Ok(false)
            }
            DuplicatePolicy::Error => Err(Error::schema_parse(format!(
                "type '{full_name}' is defined more than once"
            ))),
        }
    }

    fn collect_message(
        &mut self,
        message: &'p MessageProto,
        scope: &str,
        file: usize,
    ) -> Result<MessageIndex> {
        let full_name = Self::qualify(scope, &message.name);
        let index = MessageIndex(self.pending.len());

        if self.claim_name(&full_name)? {
            self.message_names.insert(full_name.clone(), index);
        }
        self.pending.push(PendingMessage {
            full_name: full_name.clone(),
            file,
            proto: message,
            nested_messages: Vec::new(),
            nested_enums: Vec::new(),
        });

        let mut nested_messages = Vec::with_capacity(message.nested.len());
        for nested in &message.nested {
            nested_messages.push(self.collect_message(nested, &full_name, file)?);
        }
        let mut nested_enums = Vec::with_capacity(message.enums.len());
        for enum_type in &message.enums {
            nested_enums.push(self.collect_enum(enum_type, &full_name)?);
        }

        let entry = &mut self.pending[index.0];
        entry.nested_messages = nested_messages;
        entry.nested_enums = nested_enums;
        Ok(index)
    }

    fn collect_enum(&mut self, enum_type: &EnumProto, scope: &str) -> Result<EnumIndex> {
        let full_name = Self::qualify(scope, &enum_type.name);
        let index = EnumIndex(self.enums.len());

        if self.claim_name(&full_name)? {
            self.enum_names.insert(full_name.clone(), index);
        }

        let values = enum_type
            .values
            .iter()
            .map(|(name, number)| EnumValue {
                name: name.clone(),
                number: *number,
            })
            .collect();
        self.enums.push(EnumDescriptor::new(
            full_name,
            enum_type.name.clone(),
            values,
        ));
        Ok(index)
    }
}
