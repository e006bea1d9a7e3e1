use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::{json, Map, Value};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{models, routes};

#[derive(OpenApi)]
#[openapi(
	paths(
		routes::auth::register,
		routes::auth::login,
		routes::auth::me,
		routes::auth::logout,
		routes::rbac::list_roles,
		routes::rbac::create_role,
		routes::rbac::get_role,
		routes::rbac::delete_role,
		routes::rbac::get_role_permissions,
		routes::rbac::assign_permission_to_role,
		routes::rbac::delete_permission_from_role,
		routes::rbac::list_permissions,
		routes::rbac::create_permission,
		routes::rbac::assign_role_to_user,
		routes::rbac::get_effective_permissions,
		routes::plan::list_activities,
		routes::plan::create_activity,
		routes::plan::get_activity,
		routes::plan::list_indicators,
		routes::plan::create_indicator,
		routes::plan::get_indicator,
		routes::reports::create_report,
		routes::reports::list_reports,
		routes::reports::get_report,
		routes::reports::update_report,
		routes::reports::get_report_history,
		routes::reports::submit_report,
		routes::reports::approve_report,
		routes::reports::reject_report,
		routes::reports::resubmit_report,
		routes::notifications::list_notifications,
		routes::notifications::unread_count,
		routes::notifications::mark_read,
		routes::notifications::mark_all_read,
		routes::audit::list_activity_log,
		routes::health::health
	),
	components(
		schemas(
			models::user::User,
			models::user::AuthResponse,
			models::user::LoginRequest,
			models::user::RegisterRequest,
			models::user::MeResponse,
			models::rbac::Role,
			models::rbac::RoleCreateRequest,
			models::rbac::Permission,
			models::rbac::PermissionCreateRequest,
			models::rbac::RolePermission,
			models::rbac::AssignPermissionToRoleRequest,
			models::rbac::AssignRoleRequest,
			models::rbac::UserRole,
			models::rbac::EffectivePermissions,
			models::plan::Activity,
			models::plan::ActivityCreateRequest,
			models::plan::Indicator,
			models::plan::IndicatorCreateRequest,
			models::report::ReportStatus,
			models::report::ApprovalAction,
			models::report::ProgressReport,
			models::report::ReportCreateRequest,
			models::report::ReportUpdateRequest,
			models::report::TransitionRequest,
			models::report::ApprovalHistoryEntry,
			models::notification::Notification,
			models::notification::UnreadCountResponse,
			models::audit::ActivityLogEntry,
			routes::auth::MessageResponse,
			routes::health::HealthResponse
		)
	),
	tags(
		(name = "Auth", description = "Authentication endpoints"),
		(name = "RBAC", description = "Roles, permission catalog and user role assignment"),
		(name = "Plan", description = "Activities and indicators reports attach to"),
		(name = "Reports", description = "Progress report lifecycle and approval history"),
		(name = "Notifications", description = "Per-user notification inbox"),
		(name = "Audit", description = "Activity log readout"),
		(name = "Health", description = "Service health")
	)
)]
pub struct ApiDoc;

pub fn build_openapi(port: u16) -> anyhow::Result<utoipa::openapi::OpenApi> {
	let mut doc = serde_json::to_value(&ApiDoc::openapi())?;

	normalize_path_operations(&mut doc);
	ensure_security_components(&mut doc);
	ensure_global_security(&mut doc);
	ensure_openapi_version(&mut doc);
	ensure_servers(&mut doc, port);

	let doc: utoipa::openapi::OpenApi = serde_json::from_value(doc)?;
	sanitize_methods(doc)
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

fn sanitize_methods(doc: utoipa::openapi::OpenApi) -> anyhow::Result<utoipa::openapi::OpenApi> {
	let mut value = serde_json::to_value(&doc)?;
	normalize_path_operations(&mut value);
	Ok(serde_json::from_value(value)?)
}

fn normalize_path_operations(doc: &mut Value) {
	if let Some(paths) = doc.get_mut("paths").and_then(Value::as_object_mut) {
		let snapshot = paths.clone();
		for (path, item) in snapshot {
			if let Some(ops) = item.as_object() {
				let mut normalized = Map::new();
				for (method, val) in ops {
					let key = method.to_lowercase();
					if let Some(existing) = normalized.get_mut(&key) {
						merge_values(existing, &val);
					} else {
						normalized.insert(key, val.clone());
					}
				}
				paths.insert(path, Value::Object(normalized));
			}
		}
	}
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

fn ensure_servers(doc: &mut Value, port: u16) {
	// Determine whether the running server will use TLS. If CERT_PATH+KEY_PATH are
	// provided (or USE_SELF_SIGNED_TLS is set), prefer https so Swagger Try-it-out
	// will call the backend over TLS.
	let tls_enabled = std::env::var("CERT_PATH").is_ok() && std::env::var("KEY_PATH").is_ok()
		|| std::env::var("USE_SELF_SIGNED_TLS").is_ok();

	let scheme = if tls_enabled { "https" } else { "http" };

	let server_url = format!("{}://localhost:{}", scheme, port);

	match doc.get_mut("servers") {
		Some(Value::Array(arr)) => {
			// ensure an entry for our server_url exists
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

fn merge_values(target: &mut Value, addition: &Value) {
	match (target, addition) {
		(Value::Object(dest), Value::Object(src)) => {
			for (key, value) in src {
				if let Some(existing) = dest.get_mut(key) {
					merge_values(existing, value);
				} else {
					dest.insert(key.clone(), value.clone());
				}
			}
		}
		(Value::Array(dest), Value::Array(src)) => {
			for item in src {
				if !dest.contains(item) {
					dest.push(item.clone());
				}
			}
		}
		_ => {}
	}
}
