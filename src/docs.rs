use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::{json, Map, Value};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{authz, models, routes};

#[derive(OpenApi)]
#[openapi(
	components(
		schemas(
			models::user::User,
			models::user::AuthResponse,
			models::user::LoginRequest,
			models::user::RegisterRequest,
			models::project::Project,
			models::project::ProjectCreateRequest,
			models::project::ProjectUpdateRequest,
			models::project::PermissionGrant,
			models::project::GroupPermissionGrant,
			models::project::GrantPermissionRequest,
			models::project::UpdatePermissionRequest,
			models::project::GrantGroupPermissionRequest,
			models::project::ChangeVisibilityRequest,
			models::project::MyRoleResponse,
			models::project::ProjectMember,
			models::project::ProjectCollaborator,
			models::project::ProjectUsersResponse,
			models::project::ProjectGroupGrant,
			models::project::ProjectGroupsResponse,
			models::group::Group,
			models::group::GroupMember,
			models::group::GroupDetailResponse,
			models::group::GroupCreateRequest,
			models::group::GroupUpdateRequest,
			models::group::AddGroupMemberRequest,
			models::field::FieldType,
			models::field::FieldConstraints,
			models::field::FieldDefinition,
			models::field::FieldDefinitionCreateRequest,
			models::field::FieldDefinitionUpdateRequest,
			models::field::FieldValueInput,
			models::field::WriteFieldValuesRequest,
			models::field::ProjectFieldValue,
			authz::Role,
			authz::Visibility,
			routes::health::HealthResponse
		)
	),
	tags(
		(name = "Auth", description = "Authentication endpoints"),
		(name = "Projects", description = "Project management"),
		(name = "Sharing", description = "Project permissions and visibility"),
		(name = "Groups", description = "Groups and membership"),
		(name = "Fields", description = "Custom field definitions"),
		(name = "Health", description = "Service health")
	)
)]
pub struct ApiDoc;

pub fn build_openapi(port: u16) -> anyhow::Result<utoipa::openapi::OpenApi> {
	let mut doc = serde_json::to_value(&ApiDoc::openapi())?;

	ensure_security_components(&mut doc);
	ensure_global_security(&mut doc);
	ensure_openapi_version(&mut doc);
	add_request_examples(&mut doc);
	ensure_servers(&mut doc, port);

	Ok(serde_json::from_value(doc)?)
}

pub fn swagger_routes(doc: utoipa::openapi::OpenApi) -> Router {
	let swagger_config = utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"])
		.try_it_out_enabled(true)
		.with_credentials(true)
		.persist_authorization(true);

	let doc_json = Arc::new(serde_json::to_value(&doc).expect("OpenAPI serialization must succeed"));

	let json_route = {
		let doc_json = Arc::clone(&doc_json);
		get(move || {
			let doc_json = Arc::clone(&doc_json);
			async move { Json((*doc_json).clone()) }
		})
	};

	Router::new()
		.route("/api-docs/openapi.json", json_route)
		.merge(SwaggerUi::new("/docs").config(swagger_config))
}

fn ensure_security_components(doc: &mut Value) {
	let components = doc
		.as_object_mut()
		.expect("OpenAPI root must be an object")
		.entry("components")
		.or_insert_with(|| Value::Object(Map::new()))
		.as_object_mut()
		.expect("components must be an object");

	let schemes = components
		.entry("securitySchemes")
		.or_insert_with(|| Value::Object(Map::new()))
		.as_object_mut()
		.expect("securitySchemes must be an object");

	schemes.insert(
		"bearerAuth".to_string(),
		json!({
			"type": "http",
			"scheme": "bearer",
			"bearerFormat": "JWT"
		}),
	);
}

fn ensure_global_security(doc: &mut Value) {
	doc
		.as_object_mut()
		.expect("OpenAPI root must be an object")
		.entry("security")
		.or_insert_with(|| json!([{ "bearerAuth": [] }]));
}

fn ensure_openapi_version(doc: &mut Value) {
	doc
		.as_object_mut()
		.expect("OpenAPI root must be an object")
		.entry("openapi")
		.or_insert_with(|| Value::String("3.1.0".to_string()));
}

fn add_request_examples(doc: &mut Value) {
	if let Some(paths) = doc.get_mut("paths").and_then(Value::as_object_mut) {
		for item in paths.values_mut() {
			if let Some(operations) = item.as_object_mut() {
				for operation in operations.values_mut() {
					apply_request_example(operation);
				}
			}
		}
	}
}

fn apply_request_example(operation: &mut Value) {
	let Some(request_body) = operation.get_mut("requestBody") else { return; };
	let Some(content) = request_body.get_mut("content").and_then(Value::as_object_mut) else { return; };
	let Some(app_json) = content.get_mut("application/json").and_then(Value::as_object_mut) else { return; };
	let Some(schema) = app_json.get("schema").and_then(Value::as_object) else { return; };
	let Some(reference) = schema.get("$ref").and_then(Value::as_str) else { return; };

	let example = match reference {
		"#/components/schemas/LoginRequest" => Some(json!({
			"email": "ada@example.com",
			"password": "S3cureP@ssw0rd"
		})),
		"#/components/schemas/RegisterRequest" => Some(json!({
			"name": "Ada Lovelace",
			"email": "ada@example.com",
			"password": "S3cureP@ssw0rd"
		})),
		"#/components/schemas/ProjectCreateRequest" => Some(json!({
			"name": "Launch Planning",
			"description": "Prepare milestones for the product launch.",
			"visibility": "private"
		})),
		"#/components/schemas/GrantPermissionRequest" => Some(json!({
			"email": "grace@example.com",
			"role": "editor"
		})),
		"#/components/schemas/GrantGroupPermissionRequest" => Some(json!({
			"group_id": "00000000-0000-0000-0000-000000000000",
			"role": "viewer"
		})),
		"#/components/schemas/ChangeVisibilityRequest" => Some(json!({
			"visibility": "public"
		})),
		"#/components/schemas/FieldDefinitionCreateRequest" => Some(json!({
			"name": "Budget",
			"key": "budget",
			"field_type": "number",
			"required": true,
			"validations": { "min": 0, "max": 1000000 }
		})),
		"#/components/schemas/WriteFieldValuesRequest" => Some(json!({
			"values": [
				{ "field_id": "00000000-0000-0000-0000-000000000000", "value": 500 }
			]
		})),
		_ => None,
	};

	if let Some(example) = example {
		app_json.insert("example".to_string(), example);
	}
}

fn ensure_servers(doc: &mut Value, port: u16) {
	let server_url = format!("http://localhost:{}", port);

	match doc.get_mut("servers") {
		Some(Value::Array(arr)) => {
			let has = arr.iter().any(|v| v.get("url").and_then(Value::as_str) == Some(server_url.as_str()));
			if !has {
				arr.push(json!({ "url": server_url }));
			}
		}
		_ => {
			doc["servers"] = json!([{ "url": server_url }]);
		}
	}
}
