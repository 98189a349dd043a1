//! Reconstruction of upstream-facing sub-query documents.

use apollo_compiler::ast;
use apollo_compiler::collections::IndexMap;
use apollo_compiler::collections::IndexSet;
use apollo_compiler::executable;
use apollo_compiler::name;
use apollo_compiler::Name;
use apollo_compiler::Node;

use crate::ast::collect_directive_variables;
use crate::ast::collect_variables;
use crate::ast::field_node;
use crate::ast::key_field_selection;
use crate::ast::KeySelection;
use crate::error::RequestError;
use crate::graphql;
use crate::json_ext::Object;
use crate::links::LinkMap;
use crate::rename::Namespace;

const TYPENAME: &str = "__typename";

/// Rewrites merged-schema selections into the form one upstream expects:
/// type conditions reverse-renamed, linked fields replaced by their key
/// scalars, `__typename` discriminators injected next to fragment
/// references.
pub(crate) struct Rewriter<'a> {
    pub(crate) namespace: &'a Namespace,
    pub(crate) links: &'a LinkMap,
    pub(crate) fragments: &'a IndexMap<Name, Node<executable::Fragment>>,
    needed_fragments: IndexSet<Name>,
}

impl<'a> Rewriter<'a> {
    pub(crate) fn new(
        namespace: &'a Namespace,
        links: &'a LinkMap,
        fragments: &'a IndexMap<Name, Node<executable::Fragment>>,
    ) -> Self {
        Rewriter {
            namespace,
            links,
            fragments,
            needed_fragments: IndexSet::default(),
        }
    }

    pub(crate) fn rewrite_selection_set(
        &mut self,
        set: &executable::SelectionSet,
    ) -> Result<Vec<ast::Selection>, RequestError> {
        let mut rewritten = Vec::with_capacity(set.selections.len());
        let mut has_fragment_reference = false;
        for selection in &set.selections {
            match selection {
                executable::Selection::Field(field) => {
                    if field
                        .alias
                        .as_ref()
                        .is_some_and(|alias| alias.as_str() == TYPENAME)
                        && field.name.as_str() != TYPENAME
                    {
                        return Err(RequestError::ReservedFieldAlias {
                            field: field.name.to_string(),
                        });
                    }
                    if let Some(link) = self.links.get(set.ty.as_str(), field.name.as_str()) {
                        // The linked field does not exist upstream. What the
                        // join needs is the key scalar, selected under a key
                        // that disturbs nothing the client asked for.
                        let key = key_field_selection(
                            &set.selections,
                            self.fragments,
                            link.key_field.as_str(),
                        )
                        .map_err(|e| RequestError::Internal {
                            reason: e.to_string(),
                        })?;
                        if let KeySelection::Added(alias) = key {
                            let mut key_field = field_node(link.key_field.clone());
                            if alias != link.key_field {
                                key_field.alias = Some(alias);
                            }
                            rewritten.push(ast::Selection::Field(Node::new(key_field)));
                        }
                        continue;
                    }
                    let selection_set = if field.selection_set.selections.is_empty() {
                        Vec::new()
                    } else {
                        self.rewrite_selection_set(&field.selection_set)?
                    };
                    rewritten.push(ast::Selection::Field(Node::new(ast::Field {
                        alias: field.alias.clone(),
                        name: field.name.clone(),
                        arguments: field.arguments.clone(),
                        directives: field.directives.clone(),
                        selection_set,
                    })));
                }
                executable::Selection::FragmentSpread(spread) => {
                    has_fragment_reference = true;
                    self.needed_fragments.insert(spread.fragment_name.clone());
                    rewritten.push(ast::Selection::FragmentSpread(Node::new(
                        ast::FragmentSpread {
                            fragment_name: spread.fragment_name.clone(),
                            directives: spread.directives.clone(),
                        },
                    )));
                }
                executable::Selection::InlineFragment(inline) => {
                    has_fragment_reference = true;
                    rewritten.push(ast::Selection::InlineFragment(Node::new(
                        ast::InlineFragment {
                            type_condition: inline
                                .type_condition
                                .as_ref()
                                .map(|condition| self.namespace.reverse(condition)),
                            directives: inline.directives.clone(),
                            selection_set: self.rewrite_selection_set(&inline.selection_set)?,
                        },
                    )));
                }
            }
        }
        // Abstract-type discrimination downstream relies on `__typename`.
        if has_fragment_reference && !has_plain_typename(&rewritten) {
            rewritten.push(ast::Selection::Field(Node::new(field_node(
                name!("__typename"),
            ))));
        }
        Ok(rewritten)
    }

    /// Rewrites every fragment reachable from the rewritten selections,
    /// transitively.
    pub(crate) fn rewrite_fragments(
        &mut self,
    ) -> Result<Vec<ast::FragmentDefinition>, RequestError> {
        let mut definitions = Vec::new();
        let mut index = 0;
        while index < self.needed_fragments.len() {
            let Some(fragment_name) = self.needed_fragments.get_index(index).cloned() else {
                break;
            };
            index += 1;
            let Some(fragment) = self.fragments.get(&fragment_name) else {
                // Validation has already rejected unknown fragments.
                continue;
            };
            let selection_set = self.rewrite_selection_set(&fragment.selection_set)?;
            definitions.push(ast::FragmentDefinition {
                name: fragment_name,
                type_condition: self.namespace.reverse(fragment.type_condition()),
                directives: fragment.directives.clone(),
                selection_set,
            });
        }
        Ok(definitions)
    }
}

fn has_plain_typename(selections: &[ast::Selection]) -> bool {
    selections.iter().any(|selection| {
        matches!(
            selection,
            ast::Selection::Field(field)
                if field.alias.is_none() && field.name.as_str() == TYPENAME
        )
    })
}

/// A ready-to-dispatch sub-query.
#[derive(Debug)]
pub(crate) struct Subquery {
    pub(crate) request: graphql::Request,
}

/// Assembles a sub-query document: one operation wrapping the given root
/// selections, the reachable fragments, and the referenced subset of the
/// client's variables.
pub(crate) fn build_subquery(
    operation_type: ast::OperationType,
    root_selections: Vec<ast::Selection>,
    fragments: Vec<ast::FragmentDefinition>,
    client_definitions: &[Node<ast::VariableDefinition>],
    extra_definitions: Vec<Node<ast::VariableDefinition>>,
    namespace: &Namespace,
    client_variables: &Object,
    extra_variables: Object,
) -> Subquery {
    let mut used: IndexSet<Name> = IndexSet::default();
    collect_variables(&root_selections, &mut used);
    for fragment in &fragments {
        collect_directive_variables(&fragment.directives, &mut used);
        collect_variables(&fragment.selection_set, &mut used);
    }

    // Variable definitions referencing merged type names are rewritten to
    // the upstream's own names; values are filtered to the used subset.
    let mut variables: Vec<Node<ast::VariableDefinition>> = client_definitions
        .iter()
        .filter(|definition| used.contains(&definition.name))
        .map(|definition| {
            let mut rewritten = (**definition).clone();
            rewritten.ty = Node::new(namespace.reverse_type(&rewritten.ty));
            Node::new(rewritten)
        })
        .collect();
    let mut variable_values: Object = client_variables
        .iter()
        .filter(|(name, _)| used.contains(name.as_str()))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();

    variables.extend(extra_definitions);
    variable_values.extend(extra_variables);

    let mut document = ast::Document::new();
    document
        .definitions
        .push(ast::Definition::OperationDefinition(Node::new(
            ast::OperationDefinition {
                operation_type,
                name: None,
                variables,
                directives: Default::default(),
                selection_set: root_selections,
            },
        )));
    for fragment in fragments {
        document
            .definitions
            .push(ast::Definition::FragmentDefinition(Node::new(fragment)));
    }

    Subquery {
        request: graphql::Request {
            query: document.to_string(),
            operation_name: None,
            variables: variable_values,
            extensions: Default::default(),
        },
    }
}

/// Builds the sub-query for one merged root field group.
///
/// The upstream field is selected under its own unprefixed name; the data
/// is descended by that name on response, and error paths drop it when they
/// are shifted into the outer coordinate system.
pub(crate) fn build_root_subquery(
    operation: &executable::Operation,
    rewriter: &mut Rewriter<'_>,
    upstream_field: &Name,
    fields: &[&executable::Field],
    client_variables: &Object,
) -> Result<Subquery, RequestError> {
    let mut selections = Vec::new();
    for field in fields {
        selections.extend(rewriter.rewrite_selection_set(&field.selection_set)?);
    }
    let first = fields.first().ok_or_else(|| RequestError::Internal {
        reason: "empty root field group".to_string(),
    })?;
    let root = ast::Field {
        alias: None,
        name: upstream_field.clone(),
        arguments: first.arguments.clone(),
        directives: Default::default(),
        selection_set: selections,
    };
    let fragments = rewriter.rewrite_fragments()?;

    Ok(build_subquery(
        operation.operation_type,
        vec![ast::Selection::Field(Node::new(root))],
        fragments,
        &operation.variables,
        Vec::new(),
        rewriter.namespace,
        client_variables,
        Object::new(),
    ))
}

#[cfg(test)]
mod tests {
    use apollo_compiler::validation::Valid;
    use apollo_compiler::ExecutableDocument;
    use apollo_compiler::Schema;

    use super::*;
    use crate::links::LinkMap;

    fn merged_schema() -> Valid<Schema> {
        Schema::parse_and_validate(
            r#"
            type Query { A_animal: A_Animal A_hello(name: String): String }
            interface A_Animal { name: String }
            type A_Dog implements A_Animal { name: String barks: Boolean }
            "#,
            "schema.graphql",
        )
        .unwrap()
    }

    fn rewrite(query: &str) -> (String, Vec<String>) {
        let schema = merged_schema();
        let document = ExecutableDocument::parse_and_validate(&schema, query, "query.graphql")
            .unwrap()
            .into_inner();
        let operation = document.operations.get(None).unwrap();
        let namespace = Namespace::new("A");
        let links = LinkMap::default();
        let mut rewriter = Rewriter::new(&namespace, &links, &document.fragments);
        let fields: Vec<&executable::Field> =
            operation.root_fields(&document).map(|f| &**f).collect();
        let upstream = Name::new(fields[0].name.as_str().strip_prefix("A_").unwrap()).unwrap();
        let subquery = build_root_subquery(
            operation,
            &mut rewriter,
            &upstream,
            &fields,
            &Object::new(),
        )
        .unwrap();
        let variables = subquery.request.variables.keys().cloned().collect();
        (subquery.request.query, variables)
    }

    #[test]
    fn type_conditions_are_reverse_renamed_and_typename_injected() {
        let (query, _) = rewrite(
            r#"
            { A_animal { ...F } }
            fragment F on A_Animal { name ... on A_Dog { barks } }
            "#,
        );
        assert!(query.contains("fragment F on Animal"), "got: {query}");
        assert!(query.contains("... on Dog"), "got: {query}");
        assert!(query.contains("__typename"), "got: {query}");
        assert!(!query.contains("A_"), "got: {query}");
    }

    #[test]
    fn scalar_roots_have_no_selection_set() {
        let (query, _) = rewrite("{ A_hello }");
        assert!(query.contains("hello"), "got: {query}");
        assert_eq!(
            query.matches('{').count(),
            1,
            "scalar root grew a selection set: {query}"
        );
    }

    #[test]
    fn unused_variables_are_dropped() {
        let schema = merged_schema();
        let document = ExecutableDocument::parse_and_validate(
            &schema,
            "query($name: String, $unused: String) { A_hello(name: $name) other: A_hello(name: $unused) }",
            "query.graphql",
        )
        .unwrap()
        .into_inner();
        let operation = document.operations.get(None).unwrap();
        let namespace = Namespace::new("A");
        let links = LinkMap::default();
        let mut rewriter = Rewriter::new(&namespace, &links, &document.fragments);
        let fields: Vec<&executable::Field> = operation
            .root_fields(&document)
            .filter(|field| field.response_key().as_str() == "A_hello")
            .map(|f| &**f)
            .collect();
        let mut variables = Object::new();
        variables.insert("name".to_string(), "Ada".into());
        variables.insert("unused".to_string(), "Grace".into());
        let subquery = build_root_subquery(
            operation,
            &mut rewriter,
            &Name::new("hello").unwrap(),
            &fields,
            &variables,
        )
        .unwrap();
        assert!(subquery.request.variables.contains_key("name"));
        assert!(!subquery.request.variables.contains_key("unused"));
        assert!(subquery.request.query.contains("$name: String"));
        assert!(!subquery.request.query.contains("$unused"));
    }

    #[test]
    fn aliasing_a_field_to_typename_is_rejected() {
        let schema = merged_schema();
        let document = ExecutableDocument::parse_and_validate(
            &schema,
            "{ A_animal { __typename: name ...F } } fragment F on A_Animal { name }",
            "query.graphql",
        )
        .unwrap()
        .into_inner();
        let operation = document.operations.get(None).unwrap();
        let namespace = Namespace::new("A");
        let links = LinkMap::default();
        let mut rewriter = Rewriter::new(&namespace, &links, &document.fragments);
        let fields: Vec<&executable::Field> =
            operation.root_fields(&document).map(|f| &**f).collect();
        let error = build_root_subquery(
            operation,
            &mut rewriter,
            &Name::new("animal").unwrap(),
            &fields,
            &Object::new(),
        )
        .unwrap_err();
        assert!(matches!(error, RequestError::ReservedFieldAlias { .. }));
    }
}
