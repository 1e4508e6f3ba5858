//! Builders for `FileDescriptorSet` bytes and reference payloads.
#![allow(dead_code)]

use prost::Message;
use prost_reflect::{DescriptorPool, DynamicMessage, MessageDescriptor};
use prost_types::{
    field_descriptor_proto::{Label, Type},
    DescriptorProto, EnumDescriptorProto, EnumValueDescriptorProto, FieldDescriptorProto,
    FileDescriptorProto, FileDescriptorSet, MessageOptions,
};

pub const PACKAGE: &str = "itest";

/// One proto3 file in package `itest`
pub fn file(
    name: &str,
    messages: Vec<DescriptorProto>,
    enums: Vec<EnumDescriptorProto>,
) -> FileDescriptorProto {
    FileDescriptorProto {
        name: Some(name.to_string()),
        package: Some(PACKAGE.to_string()),
        message_type: messages,
        enum_type: enums,
        syntax: Some("proto3".to_string()),
        ..Default::default()
    }
}

/// Serializes files into a descriptor set
pub fn build_fds(files: Vec<FileDescriptorProto>) -> Vec<u8> {
    FileDescriptorSet { file: files }.encode_to_vec()
}

pub fn message(name: &str, fields: Vec<FieldDescriptorProto>) -> DescriptorProto {
    DescriptorProto {
        name: Some(name.to_string()),
        field: fields,
        ..Default::default()
    }
}

pub fn scalar_field(name: &str, number: i32, typ: Type) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.to_string()),
        number: Some(number),
        r#type: Some(typ.into()),
        label: Some(Label::Optional.into()),
        ..Default::default()
    }
}

pub fn repeated_field(name: &str, number: i32, typ: Type) -> FieldDescriptorProto {
    FieldDescriptorProto {
        label: Some(Label::Repeated.into()),
        ..scalar_field(name, number, typ)
    }
}

pub fn message_field(name: &str, number: i32, type_name: &str, label: Label) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.to_string()),
        number: Some(number),
        r#type: Some(Type::Message.into()),
        type_name: Some(type_name.to_string()),
        label: Some(label.into()),
        ..Default::default()
    }
}

pub fn enum_field(name: &str, number: i32, type_name: &str) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.to_string()),
        number: Some(number),
        r#type: Some(Type::Enum.into()),
        type_name: Some(type_name.to_string()),
        label: Some(Label::Optional.into()),
        ..Default::default()
    }
}

pub fn simple_enum(name: &str, values: &[(&str, i32)]) -> EnumDescriptorProto {
    EnumDescriptorProto {
        name: Some(name.to_string()),
        value: values
            .iter()
            .map(|(n, num)| EnumValueDescriptorProto {
                name: Some(n.to_string()),
                number: Some(*num),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    }
}

/// The entry type protoc generates for `map<K, V>`
pub fn map_entry_message(name: &str, key_type: Type, value_type: Type) -> DescriptorProto {
    DescriptorProto {
        options: Some(MessageOptions {
            map_entry: Some(true),
            ..Default::default()
        }),
        ..message(
            name,
            vec![
                scalar_field("key", 1, key_type),
                scalar_field("value", 2, value_type),
            ],
        )
    }
}

/// Reference message descriptor for encoding payloads
pub fn reference_desc(fds: &[u8], name: &str) -> MessageDescriptor {
    let pool = DescriptorPool::decode(fds).unwrap();
    pool.get_message_by_name(name).unwrap()
}

pub fn encode_dynamic(msg: &DynamicMessage) -> Vec<u8> {
    msg.encode_to_vec()
}

/// Appends a varint to `out`
pub fn put_varint(mut v: u64, out: &mut Vec<u8>) {
    while v >= 0x80 {
        out.push((v as u8) | 0x80);
        v >>= 7;
    }
    out.push(v as u8);
}
