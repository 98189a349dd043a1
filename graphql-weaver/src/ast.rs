//! Small builders and collectors for GraphQL ASTs.
//!
//! Everything here is pure: inputs are never mutated, callers reuse
//! unchanged subtrees by reference ([`Node`] is cheap to clone).

use apollo_compiler::ast;
use apollo_compiler::collections::IndexMap;
use apollo_compiler::collections::IndexSet;
use apollo_compiler::executable;
use apollo_compiler::Name;
use apollo_compiler::Node;

use crate::error::TransformError;

/// A minimal field with no arguments or sub-selection.
pub(crate) fn field_node(name: Name) -> ast::Field {
    ast::Field {
        alias: None,
        name,
        arguments: Vec::new(),
        directives: Default::default(),
        selection_set: Vec::new(),
    }
}

/// One level of an ancestor chain wrapped around a selection set.
#[derive(Clone, Debug)]
pub(crate) struct ChainLink {
    pub(crate) name: Name,
    pub(crate) arguments: Vec<Node<ast::Argument>>,
}

impl ChainLink {
    pub(crate) fn plain(name: Name) -> Self {
        ChainLink {
            name,
            arguments: Vec::new(),
        }
    }
}

/// Wraps a selection set in nested field nodes, outermost link first.
///
/// An empty chain returns the inner selections unchanged.
pub(crate) fn selection_chain(
    outer: &[ChainLink],
    inner: Vec<ast::Selection>,
) -> Vec<ast::Selection> {
    outer.iter().rev().fold(inner, |wrapped, link| {
        vec![ast::Selection::Field(Node::new(ast::Field {
            alias: None,
            name: link.name.clone(),
            arguments: link.arguments.clone(),
            directives: Default::default(),
            selection_set: wrapped,
        }))]
    })
}

/// Appends a variable definition under a name that is not already taken.
///
/// The generated name is `base`, or `base2`, `base3`, … until unused. The
/// existing definitions keep their order; the input is not mutated.
pub(crate) fn add_variable_definition_safely(
    existing: &[Node<ast::VariableDefinition>],
    base: &str,
    ty: ast::Type,
) -> Result<(Vec<Node<ast::VariableDefinition>>, Name), TransformError> {
    let taken: IndexSet<&str> = existing.iter().map(|def| def.name.as_str()).collect();
    let name = unused_name(base, |candidate| !taken.contains(candidate))?;
    let mut definitions = existing.to_vec();
    definitions.push(Node::new(ast::VariableDefinition {
        name: name.clone(),
        ty: Node::new(ty),
        default_value: None,
        directives: Default::default(),
    }));
    Ok((definitions, name))
}

/// How a field needed by the weaver is obtained from a selection set.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum KeySelection {
    /// A non-aliased selection of the field already exists; its output key
    /// is the field name.
    Existing(Name),

    /// The field must be added under this collision-free alias.
    Added(Name),
}

impl KeySelection {
    pub(crate) fn output_key(&self) -> &Name {
        match self {
            KeySelection::Existing(key) | KeySelection::Added(key) => key,
        }
    }
}

/// Determines how to select `field_name` within a selection set without
/// disturbing the output keys the client asked for.
///
/// If a non-aliased selection of the field exists anywhere in the set,
/// including through fragment spreads and inline fragments, its output key
/// is reused. Otherwise an alias is picked that collides with no existing
/// output key. The result is deterministic for a given selection set, so
/// the sub-query building and the response stitching side derive the same
/// key independently.
pub(crate) fn key_field_selection(
    selections: &[executable::Selection],
    fragments: &IndexMap<Name, Node<executable::Fragment>>,
    field_name: &str,
) -> Result<KeySelection, TransformError> {
    if has_plain_selection(selections, fragments, field_name) {
        return Ok(KeySelection::Existing(Name::new(field_name).map_err(
            |_| TransformError::InvalidName {
                name: field_name.to_string(),
            },
        )?));
    }
    let mut taken = IndexSet::default();
    collect_output_keys(selections, fragments, &mut taken);
    let alias = unused_name(field_name, |candidate| !taken.contains(candidate))?;
    Ok(KeySelection::Added(alias))
}

fn has_plain_selection(
    selections: &[executable::Selection],
    fragments: &IndexMap<Name, Node<executable::Fragment>>,
    field_name: &str,
) -> bool {
    selections.iter().any(|selection| match selection {
        executable::Selection::Field(field) => {
            field.alias.is_none() && field.name.as_str() == field_name
        }
        executable::Selection::FragmentSpread(spread) => fragments
            .get(&spread.fragment_name)
            .is_some_and(|fragment| {
                has_plain_selection(&fragment.selection_set.selections, fragments, field_name)
            }),
        executable::Selection::InlineFragment(inline) => {
            has_plain_selection(&inline.selection_set.selections, fragments, field_name)
        }
    })
}

/// Collects every output key produced by a selection set, traversing
/// fragment spreads and inline fragments.
pub(crate) fn collect_output_keys(
    selections: &[executable::Selection],
    fragments: &IndexMap<Name, Node<executable::Fragment>>,
    keys: &mut IndexSet<String>,
) {
    for selection in selections {
        match selection {
            executable::Selection::Field(field) => {
                keys.insert(field.response_key().to_string());
            }
            executable::Selection::FragmentSpread(spread) => {
                if let Some(fragment) = fragments.get(&spread.fragment_name) {
                    collect_output_keys(&fragment.selection_set.selections, fragments, keys);
                }
            }
            executable::Selection::InlineFragment(inline) => {
                collect_output_keys(&inline.selection_set.selections, fragments, keys);
            }
        }
    }
}

/// Collects the names of all variables referenced by a rewritten selection
/// set: in argument values and in directive arguments.
pub(crate) fn collect_variables(selections: &[ast::Selection], used: &mut IndexSet<Name>) {
    for selection in selections {
        match selection {
            ast::Selection::Field(field) => {
                for argument in &field.arguments {
                    collect_value_variables(&argument.value, used);
                }
                collect_directive_variables(&field.directives, used);
                collect_variables(&field.selection_set, used);
            }
            ast::Selection::FragmentSpread(spread) => {
                collect_directive_variables(&spread.directives, used);
            }
            ast::Selection::InlineFragment(inline) => {
                collect_directive_variables(&inline.directives, used);
                collect_variables(&inline.selection_set, used);
            }
        }
    }
}

pub(crate) fn collect_directive_variables(
    directives: &ast::DirectiveList,
    used: &mut IndexSet<Name>,
) {
    for directive in directives.iter() {
        for argument in &directive.arguments {
            collect_value_variables(&argument.value, used);
        }
    }
}

pub(crate) fn collect_value_variables(value: &ast::Value, used: &mut IndexSet<Name>) {
    match value {
        ast::Value::Variable(name) => {
            used.insert(name.clone());
        }
        ast::Value::List(values) => {
            for value in values {
                collect_value_variables(value, used);
            }
        }
        ast::Value::Object(fields) => {
            for (_, value) in fields {
                collect_value_variables(value, used);
            }
        }
        _ => {}
    }
}

fn unused_name(base: &str, mut free: impl FnMut(&str) -> bool) -> Result<Name, TransformError> {
    let invalid = |name: &str| TransformError::InvalidName {
        name: name.to_string(),
    };
    if free(base) {
        return Name::new(base).map_err(|_| invalid(base));
    }
    let mut counter = 2usize;
    loop {
        let candidate = format!("{base}{counter}");
        if free(&candidate) {
            return Name::new(&candidate).map_err(|_| invalid(&candidate));
        }
        counter += 1;
    }
}

#[cfg(test)]
mod tests {
    use apollo_compiler::validation::Valid;
    use apollo_compiler::ExecutableDocument;
    use apollo_compiler::Schema;

    use super::*;

    fn parse_selections(query: &str) -> ExecutableDocument {
        let schema = Schema::parse_and_validate(
            r#"
            type Query { person: Person }
            type Person { countryCode: String name: String friends: [Person] }
            "#,
            "schema.graphql",
        )
        .unwrap();
        ExecutableDocument::parse_and_validate(&schema, query, "query.graphql")
            .unwrap()
            .into_inner()
    }

    fn person_selections(document: &ExecutableDocument) -> &[executable::Selection] {
        let operation = document.operations.get(None).unwrap();
        match &operation.selection_set.selections[0] {
            executable::Selection::Field(field) => &field.selection_set.selections,
            _ => panic!("expected a field"),
        }
    }

    #[test]
    fn variable_names_are_suffixed_until_unused(){
        let ty = ast::Type::Named(Name::new("String").unwrap());
        let (definitions, first) =
            add_variable_definition_safely(&[], "code", ty.clone()).unwrap();
        let (definitions, second) =
            add_variable_definition_safely(&definitions, "code", ty.clone()).unwrap();
        let (definitions, third) =
            add_variable_definition_safely(&definitions, "code", ty).unwrap();
        assert_eq!(first.as_str(), "code");
        assert_eq!(second.as_str(), "code2");
        assert_eq!(third.as_str(), "code3");
        assert_eq!(definitions.len(), 3);
    }

    #[test]
    fn existing_plain_selection_is_reused() {
        let document = parse_selections("{ person { countryCode name } }");
        let key = key_field_selection(
            person_selections(&document),
            &document.fragments,
            "countryCode",
        )
        .unwrap();
        assert_eq!(
            key,
            KeySelection::Existing(Name::new("countryCode").unwrap())
        );
    }

    #[test]
    fn plain_selections_are_found_through_fragments() {
        let document = parse_selections(
            "{ person { ...F } } fragment F on Person { countryCode }",
        );
        let key = key_field_selection(
            person_selections(&document),
            &document.fragments,
            "countryCode",
        )
        .unwrap();
        assert_eq!(
            key,
            KeySelection::Existing(Name::new("countryCode").unwrap())
        );
    }

    #[test]
    fn added_aliases_avoid_existing_output_keys() {
        let document = parse_selections("{ person { countryCode: name } }");
        let key = key_field_selection(
            person_selections(&document),
            &document.fragments,
            "countryCode",
        )
        .unwrap();
        // `countryCode` is taken by the alias, so the next candidate is used.
        assert_eq!(key, KeySelection::Added(Name::new("countryCode2").unwrap()));
    }

    #[test]
    fn selection_chain_wraps_outermost_first() {
        let inner = vec![ast::Selection::Field(Node::new(field_node(
            Name::new("name").unwrap(),
        )))];
        let chain = selection_chain(
            &[
                ChainLink::plain(Name::new("countries").unwrap()),
                ChainLink::plain(Name::new("byCode").unwrap()),
            ],
            inner.clone(),
        );
        let ast::Selection::Field(outer) = &chain[0] else {
            panic!("expected a field");
        };
        assert_eq!(outer.name.as_str(), "countries");
        let ast::Selection::Field(middle) = &outer.selection_set[0] else {
            panic!("expected a field");
        };
        assert_eq!(middle.name.as_str(), "byCode");

        // An empty chain returns the inner selections unchanged.
        assert_eq!(selection_chain(&[], inner.clone()).len(), inner.len());
    }

    #[test]
    fn variables_are_collected_from_nested_values() {
        let mut used = IndexSet::default();
        let value = ast::Value::Object(vec![(
            Name::new("filter").unwrap(),
            Node::new(ast::Value::List(vec![Node::new(ast::Value::Variable(
                Name::new("codes").unwrap(),
            ))])),
        )]);
        collect_value_variables(&value, &mut used);
        assert!(used.contains(&Name::new("codes").unwrap()));
    }
}
