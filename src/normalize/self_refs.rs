//! Self-reference passes.

use serde_json::json;

use crate::ast::clone::plan_clone;
use crate::ast::raw::RawArena;
use crate::ast::{AstNode, Node, NodeKind, PropValue};
use crate::error::{EngineError, ErrorKind};
use crate::id::{IdCategory, IdGenerator, NodeId};
use crate::registry::{NodeRegistry, NodeView};

const SELF_SEGMENT: &str = "@self";

/// Replace every field block's `value` with a fresh
/// `Reference(["answers", "@self"])`, subsequently resolved by
/// [`resolve_self_references`]. Fields inside iterate templates are plain
/// registered blocks, so the kind index covers them too.
pub fn add_self_value_to_fields(
    registry: &mut NodeRegistry,
    ids: &mut IdGenerator,
    arena: &mut RawArena,
    errors: &mut Vec<EngineError>,
) {
    let field_ids: Vec<NodeId> = registry
        .ids_of_kind(NodeKind::Block)
        .iter()
        .filter(|id| registry.ast(id).is_some_and(AstNode::is_field_block))
        .cloned()
        .collect();

    for field_id in field_ids {
        let field_path = registry.path(&field_id).unwrap_or_default().to_string();
        let reference_id = ids.next(IdCategory::CompileAst);
        let raw = arena.intern(json!({
            "type": "Expression.Reference",
            "path": ["answers", SELF_SEGMENT],
        }));
        let mut properties = crate::ast::PropMap::new();
        properties.insert(
            "path".to_string(),
            PropValue::List(vec![
                PropValue::Value("answers".into()),
                PropValue::Value(SELF_SEGMENT.into()),
            ]),
        );
        let reference = AstNode {
            id: reference_id.clone(),
            kind: NodeKind::Reference,
            properties,
            raw,
        };
        let path = format!("{}.value", field_path);
        if let Err(err) = registry.register(Node::Ast(reference), Some(field_id.clone()), path) {
            errors.push(
                EngineError::new(ErrorKind::DuplicateId, err.to_string()).with_node(reference_id),
            );
            continue;
        }
        if let Some(field) = registry.ast_mut(&field_id) {
            field
                .properties
                .insert("value".to_string(), PropValue::Node(reference_id));
        }
    }
}

/// Resolve `["answers", "@self", …]` reference paths against the nearest
/// ancestor field block's `code`.
pub fn resolve_self_references(
    registry: &mut NodeRegistry,
    ids: &mut IdGenerator,
    errors: &mut Vec<EngineError>,
) {
    let reference_ids: Vec<NodeId> = registry.ids_of_kind(NodeKind::Reference).to_vec();

    for reference_id in reference_ids {
        if !starts_with_self(registry, &reference_id) {
            continue;
        }
        let breadcrumb = registry
            .path(&reference_id)
            .unwrap_or_default()
            .to_string();

        // Ancestry from the reference up to the root, nearest first.
        let mut ancestry = Vec::new();
        let mut cursor = registry.parent(&reference_id).cloned();
        while let Some(ancestor) = cursor {
            cursor = registry.parent(&ancestor).cloned();
            ancestry.push(ancestor);
        }

        let Some(field_id) = ancestry
            .iter()
            .find(|id| registry.ast(id).is_some_and(AstNode::is_field_block))
            .cloned()
        else {
            errors.push(
                EngineError::new(
                    ErrorKind::SelfOutsideField,
                    "'@self' reference used outside a field block",
                )
                .with_node(reference_id)
                .with_path(breadcrumb),
            );
            continue;
        };

        let code = registry
            .ast(&field_id)
            .and_then(|field| field.prop("code"))
            .cloned();
        let segment = match code {
            Some(PropValue::Value(value)) if value.is_string() => PropValue::Value(value),
            Some(PropValue::Node(code_id)) => {
                // '@self' must not sit inside the code expression it resolves to.
                if ancestry
                    .iter()
                    .take_while(|id| **id != field_id)
                    .any(|id| *id == code_id)
                {
                    errors.push(
                        EngineError::new(
                            ErrorKind::SelfInsideCode,
                            "'@self' reference inside the field's own 'code' expression",
                        )
                        .with_node(reference_id)
                        .with_path(breadcrumb),
                    );
                    continue;
                }
                let Some(plan) = plan_clone(NodeView::base_only(registry), &code_id) else {
                    errors.push(
                        EngineError::new(
                            ErrorKind::MissingFieldCode,
                            "field 'code' expression could not be cloned",
                        )
                        .with_node(reference_id)
                        .with_path(breadcrumb),
                    );
                    continue;
                };
                let clone_path = format!("{}.path[1]", breadcrumb);
                match plan.register(
                    registry,
                    ids,
                    IdCategory::RuntimeAst,
                    Some(reference_id.clone()),
                    &clone_path,
                ) {
                    Ok((clone_root, _)) => PropValue::Node(clone_root),
                    Err(err) => {
                        errors.push(
                            EngineError::new(ErrorKind::DuplicateId, err.to_string())
                                .with_node(reference_id),
                        );
                        continue;
                    }
                }
            }
            _ => {
                errors.push(
                    EngineError::new(
                        ErrorKind::MissingFieldCode,
                        "'@self' reference requires the owning field to declare 'code'",
                    )
                    .with_node(reference_id)
                    .with_path(breadcrumb),
                );
                continue;
            }
        };

        if let Some(reference) = registry.ast_mut(&reference_id) {
            if let Some(PropValue::List(path)) = reference.properties.get_mut("path") {
                path[1] = segment;
            }
        }
    }
}

fn starts_with_self(registry: &NodeRegistry, reference_id: &NodeId) -> bool {
    let Some(reference) = registry.ast(reference_id) else {
        return false;
    };
    let Some(PropValue::List(path)) = reference.prop("path") else {
        return false;
    };
    path.first().and_then(PropValue::as_str) == Some("answers")
        && path.get(1).and_then(PropValue::as_str) == Some(SELF_SEGMENT)
}
