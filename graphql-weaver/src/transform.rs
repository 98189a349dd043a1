//! Generic schema cloning through transformer callbacks.
//!
//! [`transform_schema`] produces a new schema from an old one. Transformers
//! receive each type's mutable config record while it is being cloned and may
//! change anything about it, including its name. Type references are carried
//! over in old-name form and relinked in a second phase, once the complete
//! old-name to new-name mapping is known, so arbitrarily recursive schemas
//! transform without special casing.

use apollo_compiler::ast;
use apollo_compiler::collections::IndexMap;
use apollo_compiler::collections::IndexSet;
use apollo_compiler::schema::Component;
use apollo_compiler::schema::ComponentName;
use apollo_compiler::schema::EnumType;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::schema::InputObjectType;
use apollo_compiler::schema::InterfaceType;
use apollo_compiler::schema::ObjectType;
use apollo_compiler::schema::ScalarType;
use apollo_compiler::schema::UnionType;
use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::Schema;

use crate::error::TransformError;

const BUILT_IN_SCALARS: [&str; 5] = ["Int", "Float", "String", "Boolean", "ID"];
const BUILT_IN_DIRECTIVES: [&str; 4] = ["skip", "include", "deprecated", "specifiedBy"];

/// True for names the transformer passes through unchanged: introspection
/// types and the built-in scalars.
pub fn is_native_type(name: &str) -> bool {
    name.starts_with("__") || BUILT_IN_SCALARS.contains(&name)
}

pub fn is_native_directive(name: &str) -> bool {
    BUILT_IN_DIRECTIVES.contains(&name)
}

/// Context handed to every transformer callback.
pub struct TransformContext<'a> {
    /// The schema being transformed, untouched.
    pub old: &'a Schema,
}

/// A set of optional callbacks, one per AST category.
///
/// Callbacks fire on the new type's config record after it has been cloned
/// from the old one and before references are relinked; they may mutate the
/// record freely but must not assume other types have been transformed yet.
/// Several transformers compose left-to-right on the same record; the empty
/// slice is the identity transformation.
pub trait SchemaTransformer {
    fn transform_scalar(
        &self,
        _ty: &mut ScalarType,
        _ctx: &TransformContext<'_>,
    ) -> Result<(), TransformError> {
        Ok(())
    }

    fn transform_object(
        &self,
        _ty: &mut ObjectType,
        _ctx: &TransformContext<'_>,
    ) -> Result<(), TransformError> {
        Ok(())
    }

    fn transform_interface(
        &self,
        _ty: &mut InterfaceType,
        _ctx: &TransformContext<'_>,
    ) -> Result<(), TransformError> {
        Ok(())
    }

    fn transform_union(
        &self,
        _ty: &mut UnionType,
        _ctx: &TransformContext<'_>,
    ) -> Result<(), TransformError> {
        Ok(())
    }

    fn transform_enum(
        &self,
        _ty: &mut EnumType,
        _ctx: &TransformContext<'_>,
    ) -> Result<(), TransformError> {
        Ok(())
    }

    fn transform_input_object(
        &self,
        _ty: &mut InputObjectType,
        _ctx: &TransformContext<'_>,
    ) -> Result<(), TransformError> {
        Ok(())
    }

    fn transform_directive(
        &self,
        _directive: &mut ast::DirectiveDefinition,
        _ctx: &TransformContext<'_>,
    ) -> Result<(), TransformError> {
        Ok(())
    }

    fn transform_field(
        &self,
        _parent: &Name,
        _field: &mut ast::FieldDefinition,
        _ctx: &TransformContext<'_>,
    ) -> Result<(), TransformError> {
        Ok(())
    }

    fn transform_input_field(
        &self,
        _parent: &Name,
        _field: &mut ast::InputValueDefinition,
        _ctx: &TransformContext<'_>,
    ) -> Result<(), TransformError> {
        Ok(())
    }
}

/// Clone `old` through the transformer chain into a new schema.
pub fn transform_schema(
    old: &Schema,
    transformers: &[&dyn SchemaTransformer],
) -> Result<Schema, TransformError> {
    let ctx = TransformContext { old };
    let mut new = Schema::new();
    let mut renames: IndexMap<Name, Name> = IndexMap::default();
    let mut inserted: Vec<Name> = Vec::new();

    // Phase one: clone and transform every non-native type. References still
    // carry old names afterwards.
    for (name, ty) in &old.types {
        if is_native_type(name.as_str()) {
            // Shared by identity: `Schema::new` already carries the built-in
            // and introspection definitions.
            continue;
        }
        let new_ty = transform_type(name, ty, transformers, &ctx)?;
        let new_name = new_ty.name().clone();
        if new.types.contains_key(&new_name) {
            return Err(TransformError::DuplicateTypeName {
                name: new_name.to_string(),
            });
        }
        renames.insert(name.clone(), new_name.clone());
        inserted.push(new_name.clone());
        new.types.insert(new_name, new_ty);
    }

    for (name, definition) in &old.directive_definitions {
        if is_native_directive(name.as_str()) {
            continue;
        }
        let mut directive = (**definition).clone();
        for transformer in transformers {
            transformer.transform_directive(&mut directive, &ctx)?;
        }
        new.directive_definitions
            .insert(directive.name.clone(), Node::new(directive));
    }

    // Phase two: relink every type reference through the complete mapping.
    for name in &inserted {
        if let Some(ty) = new.types.get_mut(name) {
            relink_type(ty, &renames)?;
        }
    }
    let directive_names: Vec<Name> = new
        .directive_definitions
        .keys()
        .filter(|name| !is_native_directive(name.as_str()))
        .cloned()
        .collect();
    for name in &directive_names {
        if let Some(definition) = new.directive_definitions.get_mut(name) {
            for argument in &mut definition.make_mut().arguments {
                let argument = argument.make_mut();
                argument.ty = Node::new(map_type(&argument.ty, &renames)?);
            }
        }
    }

    let schema_definition = new.schema_definition.make_mut();
    schema_definition.description = old.schema_definition.description.clone();
    schema_definition.directives = old.schema_definition.directives.clone();
    schema_definition.query = map_root(&old.schema_definition.query, &renames)?;
    schema_definition.mutation = map_root(&old.schema_definition.mutation, &renames)?;
    schema_definition.subscription = map_root(&old.schema_definition.subscription, &renames)?;

    Ok(new)
}

fn transform_type(
    old_name: &Name,
    ty: &ExtendedType,
    transformers: &[&dyn SchemaTransformer],
    ctx: &TransformContext<'_>,
) -> Result<ExtendedType, TransformError> {
    Ok(match ty {
        ExtendedType::Scalar(node) => {
            let mut scalar = (**node).clone();
            for transformer in transformers {
                transformer.transform_scalar(&mut scalar, ctx)?;
            }
            ExtendedType::Scalar(Node::new(scalar))
        }
        ExtendedType::Object(node) => {
            let mut object = (**node).clone();
            for transformer in transformers {
                transformer.transform_object(&mut object, ctx)?;
            }
            object.fields = transform_fields(old_name, &object.fields, transformers, ctx)?;
            ExtendedType::Object(Node::new(object))
        }
        ExtendedType::Interface(node) => {
            let mut interface = (**node).clone();
            for transformer in transformers {
                transformer.transform_interface(&mut interface, ctx)?;
            }
            interface.fields = transform_fields(old_name, &interface.fields, transformers, ctx)?;
            ExtendedType::Interface(Node::new(interface))
        }
        ExtendedType::Union(node) => {
            let mut union_ = (**node).clone();
            for transformer in transformers {
                transformer.transform_union(&mut union_, ctx)?;
            }
            ExtendedType::Union(Node::new(union_))
        }
        ExtendedType::Enum(node) => {
            let mut enum_ = (**node).clone();
            for transformer in transformers {
                transformer.transform_enum(&mut enum_, ctx)?;
            }
            ExtendedType::Enum(Node::new(enum_))
        }
        ExtendedType::InputObject(node) => {
            let mut input_object = (**node).clone();
            for transformer in transformers {
                transformer.transform_input_object(&mut input_object, ctx)?;
            }
            let mut fields: IndexMap<Name, Component<ast::InputValueDefinition>> =
                IndexMap::default();
            for field in input_object.fields.values() {
                let mut field_definition = (***field).clone();
                for transformer in transformers {
                    transformer.transform_input_field(old_name, &mut field_definition, ctx)?;
                }
                let field_name = field_definition.name.clone();
                if fields
                    .insert(field_name.clone(), Component::new(field_definition))
                    .is_some()
                {
                    return Err(TransformError::DuplicateField {
                        type_name: input_object.name.to_string(),
                        field: field_name.to_string(),
                    });
                }
            }
            input_object.fields = fields;
            ExtendedType::InputObject(Node::new(input_object))
        }
    })
}

fn transform_fields(
    parent: &Name,
    old_fields: &IndexMap<Name, Component<ast::FieldDefinition>>,
    transformers: &[&dyn SchemaTransformer],
    ctx: &TransformContext<'_>,
) -> Result<IndexMap<Name, Component<ast::FieldDefinition>>, TransformError> {
    let mut fields: IndexMap<Name, Component<ast::FieldDefinition>> = IndexMap::default();
    for field in old_fields.values() {
        let mut field_definition = (***field).clone();
        for transformer in transformers {
            transformer.transform_field(parent, &mut field_definition, ctx)?;
        }
        let field_name = field_definition.name.clone();
        if fields
            .insert(field_name.clone(), Component::new(field_definition))
            .is_some()
        {
            return Err(TransformError::DuplicateField {
                type_name: parent.to_string(),
                field: field_name.to_string(),
            });
        }
    }
    Ok(fields)
}

fn relink_type(ty: &mut ExtendedType, renames: &IndexMap<Name, Name>) -> Result<(), TransformError> {
    match ty {
        ExtendedType::Scalar(_) | ExtendedType::Enum(_) => {}
        ExtendedType::Object(node) => {
            let object = node.make_mut();
            object.implements_interfaces =
                map_component_names(&object.implements_interfaces, renames)?;
            relink_fields(&mut object.fields, renames)?;
        }
        ExtendedType::Interface(node) => {
            let interface = node.make_mut();
            interface.implements_interfaces =
                map_component_names(&interface.implements_interfaces, renames)?;
            relink_fields(&mut interface.fields, renames)?;
        }
        ExtendedType::Union(node) => {
            let union_ = node.make_mut();
            union_.members = map_component_names(&union_.members, renames)?;
        }
        ExtendedType::InputObject(node) => {
            for field in node.make_mut().fields.values_mut() {
                let field = field.make_mut();
                field.ty = Node::new(map_type(&field.ty, renames)?);
            }
        }
    }
    Ok(())
}

fn relink_fields(
    fields: &mut IndexMap<Name, Component<ast::FieldDefinition>>,
    renames: &IndexMap<Name, Name>,
) -> Result<(), TransformError> {
    for field in fields.values_mut() {
        let field = field.make_mut();
        field.ty = map_type(&field.ty, renames)?;
        for argument in &mut field.arguments {
            let argument = argument.make_mut();
            argument.ty = Node::new(map_type(&argument.ty, renames)?);
        }
    }
    Ok(())
}

fn map_component_names(
    names: &IndexSet<ComponentName>,
    renames: &IndexMap<Name, Name>,
) -> Result<IndexSet<ComponentName>, TransformError> {
    names
        .iter()
        .map(|component| Ok(ComponentName::from(map_named(&component.name, renames)?)))
        .collect()
}

fn map_root(
    root: &Option<ComponentName>,
    renames: &IndexMap<Name, Name>,
) -> Result<Option<ComponentName>, TransformError> {
    root.as_ref()
        .map(|component| Ok(ComponentName::from(map_named(&component.name, renames)?)))
        .transpose()
}

/// Maps a type reference into the new schema: structural wrappers are
/// recreated around the mapped inner type, native names return unchanged,
/// everything else is looked up in the rename map.
pub(crate) fn map_type(
    ty: &ast::Type,
    renames: &IndexMap<Name, Name>,
) -> Result<ast::Type, TransformError> {
    Ok(match ty {
        ast::Type::Named(name) => ast::Type::Named(map_named(name, renames)?),
        ast::Type::NonNullNamed(name) => ast::Type::NonNullNamed(map_named(name, renames)?),
        ast::Type::List(inner) => ast::Type::List(Box::new(map_type(inner, renames)?)),
        ast::Type::NonNullList(inner) => ast::Type::NonNullList(Box::new(map_type(inner, renames)?)),
    })
}

fn map_named(name: &Name, renames: &IndexMap<Name, Name>) -> Result<Name, TransformError> {
    if is_native_type(name.as_str()) {
        return Ok(name.clone());
    }
    renames
        .get(name)
        .cloned()
        .ok_or_else(|| TransformError::UnknownTypeReference {
            name: name.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(sdl: &str) -> Schema {
        Schema::parse_and_validate(sdl, "schema.graphql")
            .unwrap()
            .into_inner()
    }

    const RECURSIVE: &str = r#"
        schema { query: Query }
        type Query { node: Node people: [Person] }
        interface Node { id: ID! }
        type Person implements Node { id: ID! friends: [Person] pet: Animal }
        union Animal = Dog | Cat
        type Dog implements Node { id: ID! owner: Person }
        type Cat implements Node { id: ID! }
        input PersonFilter { name: String and: [PersonFilter!] }
        enum Color { RED GREEN }
        scalar Date
        directive @tag(name: String!) on FIELD_DEFINITION
    "#;

    #[test]
    fn empty_transformer_chain_is_the_identity() {
        let old = parse(RECURSIVE);
        let new = transform_schema(&old, &[]).unwrap();
        for (name, ty) in &old.types {
            if is_native_type(name.as_str()) {
                continue;
            }
            let cloned = new.types.get(name).expect("type survives");
            match (ty, cloned) {
                (ExtendedType::Object(a), ExtendedType::Object(b)) => {
                    let a_fields: Vec<(String, String)> = a
                        .fields
                        .iter()
                        .map(|(n, f)| (n.to_string(), f.ty.to_string()))
                        .collect();
                    let b_fields: Vec<(String, String)> = b
                        .fields
                        .iter()
                        .map(|(n, f)| (n.to_string(), f.ty.to_string()))
                        .collect();
                    assert_eq!(a_fields, b_fields);
                }
                (ExtendedType::Union(a), ExtendedType::Union(b)) => {
                    assert_eq!(a.members.len(), b.members.len());
                }
                (ExtendedType::Scalar(_), ExtendedType::Scalar(_))
                | (ExtendedType::Interface(_), ExtendedType::Interface(_))
                | (ExtendedType::Enum(_), ExtendedType::Enum(_))
                | (ExtendedType::InputObject(_), ExtendedType::InputObject(_)) => {}
                _ => panic!("type {name} changed kind"),
            }
        }
        assert!(new.directive_definitions.contains_key("tag"));
        // The identity-transformed schema is still valid, recursion intact.
        new.validate().unwrap();
    }

    struct Prefixer;

    impl SchemaTransformer for Prefixer {
        fn transform_scalar(
            &self,
            ty: &mut ScalarType,
            _ctx: &TransformContext<'_>,
        ) -> Result<(), TransformError> {
            ty.name = Name::new(&format!("X_{}", ty.name)).unwrap();
            Ok(())
        }

        fn transform_object(
            &self,
            ty: &mut ObjectType,
            _ctx: &TransformContext<'_>,
        ) -> Result<(), TransformError> {
            ty.name = Name::new(&format!("X_{}", ty.name)).unwrap();
            Ok(())
        }

        fn transform_interface(
            &self,
            ty: &mut InterfaceType,
            _ctx: &TransformContext<'_>,
        ) -> Result<(), TransformError> {
            ty.name = Name::new(&format!("X_{}", ty.name)).unwrap();
            Ok(())
        }

        fn transform_union(
            &self,
            ty: &mut UnionType,
            _ctx: &TransformContext<'_>,
        ) -> Result<(), TransformError> {
            ty.name = Name::new(&format!("X_{}", ty.name)).unwrap();
            Ok(())
        }

        fn transform_enum(
            &self,
            ty: &mut EnumType,
            _ctx: &TransformContext<'_>,
        ) -> Result<(), TransformError> {
            ty.name = Name::new(&format!("X_{}", ty.name)).unwrap();
            Ok(())
        }

        fn transform_input_object(
            &self,
            ty: &mut InputObjectType,
            _ctx: &TransformContext<'_>,
        ) -> Result<(), TransformError> {
            ty.name = Name::new(&format!("X_{}", ty.name)).unwrap();
            Ok(())
        }
    }

    #[test]
    fn recursive_references_survive_renaming() {
        let old = parse(RECURSIVE);
        let new = transform_schema(&old, &[&Prefixer]).unwrap();

        let person = new.get_object("X_Person").expect("renamed object");
        assert_eq!(
            person.fields.get("friends").unwrap().ty.to_string(),
            "[X_Person]"
        );
        assert_eq!(person.fields.get("pet").unwrap().ty.to_string(), "X_Animal");
        assert!(person
            .implements_interfaces
            .iter()
            .any(|i| i.name == "X_Node"));
        // Built-in scalars pass through unrenamed.
        assert_eq!(person.fields.get("id").unwrap().ty.to_string(), "ID!");

        let filter = match new.types.get("X_PersonFilter").unwrap() {
            ExtendedType::InputObject(input) => input,
            _ => panic!("expected input object"),
        };
        assert_eq!(
            filter.fields.get("and").unwrap().ty.to_string(),
            "[X_PersonFilter!]"
        );

        assert_eq!(
            new.schema_definition.query.as_ref().unwrap().name.as_str(),
            "X_Query"
        );
        new.validate().unwrap();
    }

    #[test]
    fn native_types_are_not_cloned() {
        let old = parse(RECURSIVE);
        let new = transform_schema(&old, &[&Prefixer]).unwrap();
        for name in new.types.keys() {
            assert!(
                !name.as_str().starts_with("X___"),
                "introspection type {name} was cloned"
            );
        }
        assert!(new.types.contains_key("String"));
        assert!(!new.types.contains_key("X_String"));
    }

    struct BadFieldType;

    impl SchemaTransformer for BadFieldType {
        fn transform_field(
            &self,
            _parent: &Name,
            field: &mut ast::FieldDefinition,
            _ctx: &TransformContext<'_>,
        ) -> Result<(), TransformError> {
            if field.name == "node" {
                field.ty = ast::Type::Named(Name::new("Missing").unwrap());
            }
            Ok(())
        }
    }

    #[test]
    fn unknown_references_are_rejected() {
        let old = parse(RECURSIVE);
        let error = transform_schema(&old, &[&BadFieldType]).unwrap_err();
        assert!(matches!(
            error,
            TransformError::UnknownTypeReference { name } if name == "Missing"
        ));
    }

    struct FieldSquasher;

    impl SchemaTransformer for FieldSquasher {
        fn transform_field(
            &self,
            parent: &Name,
            field: &mut ast::FieldDefinition,
            _ctx: &TransformContext<'_>,
        ) -> Result<(), TransformError> {
            if parent.as_str() == "Person" {
                field.name = Name::new("same").unwrap();
            }
            Ok(())
        }
    }

    #[test]
    fn duplicate_fields_are_rejected() {
        let old = parse(RECURSIVE);
        let error = transform_schema(&old, &[&FieldSquasher]).unwrap_err();
        assert!(matches!(error, TransformError::DuplicateField { .. }));
    }

    struct TypeSquasher;

    impl SchemaTransformer for TypeSquasher {
        fn transform_object(
            &self,
            ty: &mut ObjectType,
            _ctx: &TransformContext<'_>,
        ) -> Result<(), TransformError> {
            if ty.name == "Dog" || ty.name == "Cat" {
                ty.name = Name::new("Pet").unwrap();
            }
            Ok(())
        }
    }

    #[test]
    fn colliding_type_names_are_rejected() {
        let old = parse(RECURSIVE);
        let error = transform_schema(&old, &[&TypeSquasher]).unwrap_err();
        assert!(matches!(
            error,
            TransformError::DuplicateTypeName { name } if name == "Pet"
        ));
    }
}
