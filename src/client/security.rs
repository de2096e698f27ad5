//! Local RBAC users and groups: `/settings/rbac`.

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{segment, ClientResult, CouchbaseClient};

/// An RBAC role, optionally scoped to a bucket, scope and collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Role {
    /// Role name, e.g. `bucket_admin`.
    pub name: String,
    /// Bucket, `*` for all buckets, or empty for a cluster-wide role.
    #[serde(default)]
    pub bucket: String,
    /// Scope within the bucket.
    #[serde(default)]
    pub scope: String,
    /// Collection within the scope.
    #[serde(default)]
    pub collection: String,
}

impl Role {
    /// Encode as `name[bucket:scope:collection]`, omitting empty trailing parts.
    pub fn to_rbac_string(&self) -> String {
        let parts: Vec<&str> = [
            self.bucket.as_str(),
            self.scope.as_str(),
            self.collection.as_str(),
        ]
        .into_iter()
        .take_while(|part| !part.is_empty())
        .collect();

        if parts.is_empty() {
            self.name.clone()
        } else {
            format!("{}[{}]", self.name, parts.join(":"))
        }
    }
}

#[derive(Debug, Deserialize)]
struct RoleOrigin {
    #[serde(rename = "type")]
    origin_type: String,
}

#[derive(Debug, Deserialize)]
struct RoleEntry {
    role: String,
    #[serde(default)]
    bucket_name: Option<String>,
    #[serde(default)]
    scope_name: Option<String>,
    #[serde(default)]
    collection_name: Option<String>,
    #[serde(default)]
    origins: Vec<RoleOrigin>,
}

impl RoleEntry {
    /// Held directly rather than inherited from a group.
    fn is_direct(&self) -> bool {
        self.origins.is_empty() || self.origins.iter().any(|o| o.origin_type == "user")
    }

    fn into_role(self) -> Role {
        Role {
            name: self.role,
            bucket: self.bucket_name.unwrap_or_default(),
            scope: self.scope_name.unwrap_or_default(),
            collection: self.collection_name.unwrap_or_default(),
        }
    }
}

fn join_roles(roles: &[Role]) -> String {
    roles
        .iter()
        .map(Role::to_rbac_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// A local user.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct User {
    /// User id.
    pub username: String,
    /// Full name.
    pub display_name: String,
    /// Never returned by the cluster.
    pub password: Option<String>,
    /// Roles held directly.
    pub roles: Vec<Role>,
    /// Group memberships.
    pub groups: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    roles: Vec<RoleEntry>,
    #[serde(default)]
    groups: Vec<String>,
}

impl From<UserResponse> for User {
    fn from(response: UserResponse) -> Self {
        Self {
            username: response.id,
            display_name: response.name,
            password: None,
            roles: response
                .roles
                .into_iter()
                .filter(RoleEntry::is_direct)
                .map(RoleEntry::into_role)
                .collect(),
            groups: response.groups,
        }
    }
}

/// An RBAC group.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Group {
    /// Group id.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Roles granted to members.
    pub roles: Vec<Role>,
    /// Mapped LDAP group, if any.
    pub ldap_group_reference: String,
}

#[derive(Debug, Deserialize)]
struct GroupResponse {
    id: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    roles: Vec<RoleEntry>,
    #[serde(default)]
    ldap_group_ref: String,
}

impl From<GroupResponse> for Group {
    fn from(response: GroupResponse) -> Self {
        Self {
            name: response.id,
            description: response.description,
            roles: response.roles.into_iter().map(RoleEntry::into_role).collect(),
            ldap_group_reference: response.ldap_group_ref,
        }
    }
}

fn user_path(username: &str) -> String {
    format!("/settings/rbac/users/local/{}", segment(username))
}

fn group_path(name: &str) -> String {
    format!("/settings/rbac/groups/{}", segment(name))
}

impl CouchbaseClient {
    /// Read a local user.
    pub async fn get_user(&self, username: &str) -> ClientResult<User> {
        let response: UserResponse = self
            .get_json(&user_path(username), &format!("user {}", username))
            .await?;
        Ok(response.into())
    }

    /// Create or replace a local user.
    pub async fn upsert_user(&self, user: &User) -> ClientResult<()> {
        info!(username = %user.username, roles = user.roles.len(), "Upserting user");
        let mut form = vec![
            ("name", user.display_name.clone()),
            ("roles", join_roles(&user.roles)),
            ("groups", user.groups.join(",")),
        ];
        if let Some(password) = &user.password {
            form.push(("password", password.clone()));
        }
        self.put_form(&user_path(&user.username), &form, &format!("user {}", user.username))
            .await
    }

    /// Delete a local user.
    pub async fn drop_user(&self, username: &str) -> ClientResult<()> {
        info!(username, "Dropping user");
        self.delete(&user_path(username), &format!("user {}", username))
            .await
    }

    /// Read a group.
    pub async fn get_group(&self, name: &str) -> ClientResult<Group> {
        let response: GroupResponse = self
            .get_json(&group_path(name), &format!("group {}", name))
            .await?;
        Ok(response.into())
    }

    /// Create or replace a group.
    pub async fn upsert_group(&self, group: &Group) -> ClientResult<()> {
        info!(group = %group.name, roles = group.roles.len(), "Upserting group");
        let form = [
            ("description", group.description.clone()),
            ("roles", join_roles(&group.roles)),
            ("ldap_group_ref", group.ldap_group_reference.clone()),
        ];
        self.put_form(&group_path(&group.name), &form, &format!("group {}", group.name))
            .await
    }

    /// Delete a group.
    pub async fn drop_group(&self, name: &str) -> ClientResult<()> {
        info!(group = name, "Dropping group");
        self.delete(&group_path(name), &format!("group {}", name))
            .await
    }
}
