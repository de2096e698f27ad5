mod common;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use common::{cluster, configured, form_value};
use hemmer_provider_couchbase::testing::{
    assert_plan_changes_attribute, assert_plan_replaces, assert_plan_updates_in_place, TestError,
};
use serde_json::{json, Value};
use wiremock::matchers::path_regex;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Parse `name[bucket:scope:collection]` entries into REST role objects.
fn parse_roles(roles: &str, origin: &str) -> Vec<Value> {
    roles
        .split(',')
        .filter(|r| !r.is_empty())
        .map(|role| {
            let (name, target) = match role.split_once('[') {
                Some((name, rest)) => (name, rest.trim_end_matches(']')),
                None => (role, ""),
            };
            let mut entry = json!({"role": name, "origins": [{"type": origin}]});
            let keys = ["bucket_name", "scope_name", "collection_name"];
            for (key, part) in keys.iter().zip(target.split(':').filter(|p| !p.is_empty())) {
                entry[*key] = json!(part);
            }
            entry
        })
        .collect()
}

/// Local users and groups behind `/settings/rbac`.
#[derive(Clone, Default)]
struct Rbac {
    users: Arc<Mutex<BTreeMap<String, Value>>>,
    groups: Arc<Mutex<BTreeMap<String, Value>>>,
    passwords: Arc<Mutex<BTreeMap<String, String>>>,
}

impl Rbac {
    fn user(&self, request: &Request, username: &str) -> ResponseTemplate {
        let mut users = self.users.lock().unwrap();
        match request.method.as_str() {
            "GET" => match users.get(username) {
                Some(user) => ResponseTemplate::new(200).set_body_json(user),
                None => ResponseTemplate::new(404).set_body_string("\"Unknown user.\""),
            },
            "PUT" => {
                let groups: Vec<String> = form_value(request, "groups")
                    .unwrap_or_default()
                    .split(',')
                    .filter(|g| !g.is_empty())
                    .map(str::to_string)
                    .collect();
                // Group roles show up on the user with a group origin.
                let mut roles = parse_roles(&form_value(request, "roles").unwrap_or_default(), "user");
                for group in &groups {
                    if let Some(group) = self.groups.lock().unwrap().get(group) {
                        for role in group["roles"].as_array().into_iter().flatten() {
                            let mut role = role.clone();
                            role["origins"] = json!([{"type": "group", "name": group["id"]}]);
                            roles.push(role);
                        }
                    }
                }
                match form_value(request, "password") {
                    Some(password) => {
                        self.passwords
                            .lock()
                            .unwrap()
                            .insert(username.to_string(), password);
                    }
                    None if !users.contains_key(username) => {
                        return ResponseTemplate::new(400)
                            .set_body_json(json!({"errors": {"password": "The password must be supplied"}}));
                    }
                    None => {}
                }
                users.insert(
                    username.to_string(),
                    json!({
                        "id": username,
                        "domain": "local",
                        "name": form_value(request, "name").unwrap_or_default(),
                        "roles": roles,
                        "groups": groups,
                        "password_change_date": "2024-03-01T10:00:00.000Z"
                    }),
                );
                ResponseTemplate::new(200)
            }
            "DELETE" => match users.remove(username) {
                Some(_) => ResponseTemplate::new(200),
                None => ResponseTemplate::new(404).set_body_string("\"User was not found.\""),
            },
            _ => ResponseTemplate::new(405),
        }
    }

    fn group(&self, request: &Request, name: &str) -> ResponseTemplate {
        let mut groups = self.groups.lock().unwrap();
        match request.method.as_str() {
            "GET" => match groups.get(name) {
                Some(group) => ResponseTemplate::new(200).set_body_json(group),
                None => ResponseTemplate::new(404).set_body_string("\"Unknown group.\""),
            },
            "PUT" => {
                groups.insert(
                    name.to_string(),
                    json!({
                        "id": name,
                        "description": form_value(request, "description").unwrap_or_default(),
                        "roles": parse_roles(&form_value(request, "roles").unwrap_or_default(), "group"),
                        "ldap_group_ref": form_value(request, "ldap_group_ref").unwrap_or_default()
                    }),
                );
                ResponseTemplate::new(200)
            }
            "DELETE" => match groups.remove(name) {
                Some(_) => ResponseTemplate::new(200),
                None => ResponseTemplate::new(404).set_body_string("\"Group was not found.\""),
            },
            _ => ResponseTemplate::new(405),
        }
    }
}

impl Respond for Rbac {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let url_path = request.url.path().to_string();
        if let Some(username) = url_path.strip_prefix("/settings/rbac/users/local/") {
            self.user(request, username)
        } else if let Some(name) = url_path.strip_prefix("/settings/rbac/groups/") {
            self.group(request, name)
        } else {
            ResponseTemplate::new(404)
        }
    }
}

async fn mount_rbac(server: &MockServer) -> Rbac {
    let rbac = Rbac::default();
    Mock::given(path_regex("^/settings/rbac/"))
        .respond_with(rbac.clone())
        .mount(server)
        .await;
    rbac
}

fn role(name: &str, bucket: &str) -> Value {
    json!({"name": name, "bucket": bucket, "scope": "", "collection": ""})
}

#[tokio::test]
async fn test_user_lifecycle() {
    let server = cluster().await;
    let rbac = mount_rbac(&server).await;
    let tester = configured(&server).await;

    let user = tester
        .lifecycle_create(
            "couchbase_security_user",
            json!({
                "username": "alice",
                "display_name": "Alice",
                "password": "s3cret!",
                "role": [role("ro_admin", ""), role("bucket_admin", "beer-sample")]
            }),
        )
        .await
        .unwrap();
    assert_eq!(user["id"], "alice");
    assert_eq!(user["password"], "s3cret!");
    assert_eq!(user["role"], json!([role("bucket_admin", "beer-sample"), role("ro_admin", "")]));
    assert_eq!(rbac.passwords.lock().unwrap()["alice"], "s3cret!");

    let proposed = json!({
        "username": "alice",
        "display_name": "Alice Liddell",
        "password": "s3cret!",
        "role": [role("ro_admin", ""), role("bucket_admin", "beer-sample")]
    });
    let plan = tester
        .plan_update("couchbase_security_user", user.clone(), proposed.clone())
        .await
        .unwrap();
    assert_plan_updates_in_place(&plan);
    assert_plan_changes_attribute(&plan, "display_name");
    assert_eq!(plan.changes.len(), 1);

    let updated = tester
        .lifecycle_update("couchbase_security_user", user, proposed)
        .await
        .unwrap();
    assert_eq!(updated["display_name"], "Alice Liddell");

    tester
        .lifecycle_delete("couchbase_security_user", updated.clone())
        .await
        .unwrap();
    assert!(rbac.users.lock().unwrap().is_empty());
    assert!(!tester.exists("couchbase_security_user", updated).await.unwrap());
}

#[tokio::test]
async fn test_user_roles_exclude_group_roles() {
    let server = cluster().await;
    mount_rbac(&server).await;
    let tester = configured(&server).await;

    tester
        .lifecycle_create(
            "couchbase_security_group",
            json!({
                "name": "analysts",
                "description": "Analytics team",
                "role": [role("analytics_reader", "")]
            }),
        )
        .await
        .unwrap();

    let user = tester
        .lifecycle_create(
            "couchbase_security_user",
            json!({
                "username": "bob",
                "password": "hunter22",
                "groups": ["analysts"],
                "role": [role("query_select", "beer-sample")]
            }),
        )
        .await
        .unwrap();
    assert_eq!(user["groups"], json!(["analysts"]));
    assert_eq!(user["role"], json!([role("query_select", "beer-sample")]));
}

#[tokio::test]
async fn test_import_user_without_password() {
    let server = cluster().await;
    let rbac = mount_rbac(&server).await;
    rbac.users.lock().unwrap().insert(
        "carol".to_string(),
        json!({"id": "carol", "domain": "local", "name": "Carol", "roles": [], "groups": []}),
    );
    let tester = configured(&server).await;

    let user = tester
        .lifecycle_import("couchbase_security_user", "carol")
        .await
        .unwrap();
    assert_eq!(user["username"], "carol");
    assert!(user["password"].is_null());
}

#[tokio::test]
async fn test_group_lifecycle() {
    let server = cluster().await;
    let rbac = mount_rbac(&server).await;
    let tester = configured(&server).await;

    let group = tester
        .lifecycle_create(
            "couchbase_security_group",
            json!({
                "name": "readers",
                "description": "Read-only",
                "role": [
                    {"name": "data_reader", "bucket": "travel-sample", "scope": "inventory", "collection": "airline"}
                ]
            }),
        )
        .await
        .unwrap();
    assert_eq!(group["id"], "readers");
    assert_eq!(group["role"][0]["collection"], "airline");
    assert_eq!(
        rbac.groups.lock().unwrap()["readers"]["roles"][0]["scope_name"],
        "inventory"
    );

    let updated = tester
        .lifecycle_update(
            "couchbase_security_group",
            group,
            json!({
                "name": "readers",
                "description": "Read-only",
                "ldap_reference": "cn=readers,ou=groups,dc=example,dc=com",
                "role": [
                    {"name": "data_reader", "bucket": "travel-sample", "scope": "inventory", "collection": "airline"}
                ]
            }),
        )
        .await
        .unwrap();
    assert_eq!(updated["ldap_reference"], "cn=readers,ou=groups,dc=example,dc=com");

    tester
        .lifecycle_delete("couchbase_security_group", updated.clone())
        .await
        .unwrap();
    assert!(tester
        .read("couchbase_security_group", updated)
        .await
        .unwrap()
        .is_null());
}

#[tokio::test]
async fn test_renamed_group_is_replaced() {
    let server = cluster().await;
    let rbac = mount_rbac(&server).await;
    let tester = configured(&server).await;

    let group = tester
        .lifecycle_create(
            "couchbase_security_group",
            json!({"name": "readers", "role": [role("ro_admin", "")]}),
        )
        .await
        .unwrap();

    let proposed = json!({"name": "auditors", "role": [role("ro_admin", "")]});
    let plan = tester
        .plan_update("couchbase_security_group", group.clone(), proposed.clone())
        .await
        .unwrap();
    assert_plan_replaces(&plan);
    assert!(plan.planned_state["id"].is_null());

    let replaced = tester
        .lifecycle_update("couchbase_security_group", group, proposed)
        .await
        .unwrap();
    assert_eq!(replaced["id"], "auditors");
    let names: Vec<String> = rbac.groups.lock().unwrap().keys().cloned().collect();
    assert_eq!(names, vec!["auditors".to_string()]);
}

#[tokio::test]
async fn test_wildcard_role_scope_rejected() {
    let server = cluster().await;
    let tester = configured(&server).await;

    let err = tester
        .validate_resource_config(
            "couchbase_security_group",
            json!({
                "name": "readers",
                "role": [{"name": "data_reader", "bucket": "travel-sample", "scope": "*"}]
            }),
        )
        .await
        .unwrap_err();
    let TestError::Diagnostics(diagnostics) = err else {
        panic!("expected diagnostics");
    };
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].summary, "Value of 'role.0.scope' can't be \"*\"");
}
