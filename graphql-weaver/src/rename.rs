//! Namespace prefixing and its reversal.

use apollo_compiler::ast;
use apollo_compiler::schema::EnumType;
use apollo_compiler::schema::InputObjectType;
use apollo_compiler::schema::InterfaceType;
use apollo_compiler::schema::ObjectType;
use apollo_compiler::schema::ScalarType;
use apollo_compiler::schema::UnionType;
use apollo_compiler::Name;

use crate::error::TransformError;
use crate::transform::SchemaTransformer;
use crate::transform::TransformContext;

/// The namespace of one endpoint, applied as a type-name prefix.
///
/// An empty namespace leaves names untouched, for a single pass-through
/// endpoint.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Namespace {
    prefix: String,
}

impl Namespace {
    const SEPARATOR: char = '_';

    pub fn new(namespace: &str) -> Self {
        let prefix = if namespace.is_empty() {
            String::new()
        } else {
            format!("{namespace}{}", Self::SEPARATOR)
        };
        Namespace { prefix }
    }

    /// Prefixes a type or root-field name.
    pub fn rename(&self, name: &str) -> Result<Name, TransformError> {
        Name::new(&format!("{}{name}", self.prefix)).map_err(|_| TransformError::InvalidName {
            name: format!("{}{name}", self.prefix),
        })
    }

    /// Strips the prefix, if this name carries it.
    pub fn strip(&self, name: &str) -> Option<Name> {
        if self.prefix.is_empty() {
            return None;
        }
        name.strip_prefix(&self.prefix)
            .and_then(|stripped| Name::new(stripped).ok())
    }

    /// The upstream-facing form of a merged type name: the prefix is
    /// stripped, shared native names pass through unchanged.
    pub fn reverse(&self, name: &Name) -> Name {
        self.strip(name.as_str()).unwrap_or_else(|| name.clone())
    }

    /// The upstream-facing form of a merged type reference, recursing
    /// through list and non-null wrappers.
    pub fn reverse_type(&self, ty: &ast::Type) -> ast::Type {
        match ty {
            ast::Type::Named(name) => ast::Type::Named(self.reverse(name)),
            ast::Type::NonNullNamed(name) => ast::Type::NonNullNamed(self.reverse(name)),
            ast::Type::List(inner) => ast::Type::List(Box::new(self.reverse_type(inner))),
            ast::Type::NonNullList(inner) => {
                ast::Type::NonNullList(Box::new(self.reverse_type(inner)))
            }
        }
    }
}

/// Prefixes every non-native type name of a schema with its endpoint's
/// namespace.
pub struct NamespaceRenamer<'a> {
    pub namespace: &'a Namespace,
}

impl SchemaTransformer for NamespaceRenamer<'_> {
    fn transform_scalar(
        &self,
        ty: &mut ScalarType,
        _ctx: &TransformContext<'_>,
    ) -> Result<(), TransformError> {
        ty.name = self.namespace.rename(ty.name.as_str())?;
        Ok(())
    }

    fn transform_object(
        &self,
        ty: &mut ObjectType,
        _ctx: &TransformContext<'_>,
    ) -> Result<(), TransformError> {
        ty.name = self.namespace.rename(ty.name.as_str())?;
        Ok(())
    }

    fn transform_interface(
        &self,
        ty: &mut InterfaceType,
        _ctx: &TransformContext<'_>,
    ) -> Result<(), TransformError> {
        ty.name = self.namespace.rename(ty.name.as_str())?;
        Ok(())
    }

    fn transform_union(
        &self,
        ty: &mut UnionType,
        _ctx: &TransformContext<'_>,
    ) -> Result<(), TransformError> {
        ty.name = self.namespace.rename(ty.name.as_str())?;
        Ok(())
    }

    fn transform_enum(
        &self,
        ty: &mut EnumType,
        _ctx: &TransformContext<'_>,
    ) -> Result<(), TransformError> {
        ty.name = self.namespace.rename(ty.name.as_str())?;
        Ok(())
    }

    fn transform_input_object(
        &self,
        ty: &mut InputObjectType,
        _ctx: &TransformContext<'_>,
    ) -> Result<(), TransformError> {
        ty.name = self.namespace.rename(ty.name.as_str())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use apollo_compiler::Schema;

    use super::*;
    use crate::transform::transform_schema;

    #[test]
    fn reverse_undoes_rename() {
        let namespace = Namespace::new("A");
        for name in ["Animal", "Person", "X"] {
            let renamed = namespace.rename(name).unwrap();
            assert_eq!(namespace.reverse(&renamed).as_str(), name);
        }
    }

    #[test]
    fn native_names_reverse_unchanged() {
        let namespace = Namespace::new("A");
        let int = Name::new("Int").unwrap();
        assert_eq!(namespace.reverse(&int), int);
    }

    #[test]
    fn empty_namespace_is_the_identity() {
        let namespace = Namespace::new("");
        let name = Name::new("Person").unwrap();
        assert_eq!(namespace.rename("Person").unwrap(), name);
        assert_eq!(namespace.reverse(&name), name);
    }

    #[test]
    fn reverse_type_recurses_through_wrappers() {
        let namespace = Namespace::new("A");
        let ty = ast::Type::NonNullList(Box::new(ast::Type::NonNullNamed(
            Name::new("A_Person").unwrap(),
        )));
        assert_eq!(namespace.reverse_type(&ty).to_string(), "[Person!]!");
    }

    #[test]
    fn renamer_prefixes_every_type_exactly_once() {
        let old = Schema::parse_and_validate(
            r#"
            type Query { animal: Animal }
            interface Animal { name: String }
            "#,
            "schema.graphql",
        )
        .unwrap()
        .into_inner();
        let namespace = Namespace::new("A");
        let new = transform_schema(&old, &[&NamespaceRenamer { namespace: &namespace }]).unwrap();
        assert!(new.types.contains_key("A_Animal"));
        assert!(new.types.contains_key("A_Query"));
        assert!(!new.types.contains_key("Animal"));
        assert!(!new.types.contains_key("A_A_Animal"));
        assert_eq!(
            new.get_object("A_Query")
                .unwrap()
                .fields
                .get("animal")
                .unwrap()
                .ty
                .to_string(),
            "A_Animal"
        );
    }
}
