//! End-to-end engine scenarios against the in-memory directory.

mod support;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use dirview::auth::Auth;
use dirview::config::AppConfig;
use dirview::errors::ApiError;
use dirview::ldap::DirectoryHandle;
use dirview::view::registry::ViewRegistry;
use dirview::view::{AuthUser, JsonMap};
use support::{MemoryDirectory, Op, StubOracle};

const CONFIG: &str = r#"
ldap:
  serverUri: ldap://localhost:389
  prefix: dc=example,dc=com
  bindDn: cn=admin,dc=example,dc=com
  bindPassword: admin
  timeout: 5
auth:
  secretKey: test-secret
  headerPrefix: Bearer
  expiration: 3600
  autoLoginExpiration: 60
  view: users
  antiSpam:
    questions:
      - question: "2+2?"
        answer: "4"
mail:
  host: localhost
  sender: noreply@example.com
  siteBaseUrl: https://example.com
  siteName: Example
allowOrigins: []
views:
  users:
    dn: ou=users
    title: Users
    primaryKey: uid
    permissions: [isAdmin]
    objectClass: [inetOrgPerson]
    autoCreate:
      objectClass: [top, organizationalUnit]
      ou: users
    list:
      uid: {type: text, title: Username}
      displayName: {type: text, title: Name, field: cn}
    auth:
      primaryKey: {type: text, title: Username, field: uid}
      mail: {type: text, title: Mail}
      isAdmin: {type: isMemberOf, title: Administrator, memberOf: admin, foreignView: groups}
      timestamp: {type: text, title: Changed, field: modifyTimestamp}
    details:
      user:
        type: fields
        title: User
        fields:
          uid: {type: text, title: Username, required: true, writable: false, format: '[a-zA-Z0-9_-]+'}
          givenName: {type: text, title: First name}
          sn: {type: text, title: Last name}
          cn: {type: generate, title: Display name, format: '{givenName} {sn}'}
          mail: {type: text, title: Mail, format: '[^@ ]+@[^@ ]+\.[^@ ]+'}
          birthday: {type: datetime, title: Born, field: birthDate}
          isAdmin: {type: isMemberOf, title: Administrator, memberOf: admin, foreignView: groups}
      password:
        type: fields
        title: Password
        fields:
          _enabled: {type: objectClass, title: Password enabled, objectClass: simpleSecurityObject}
          userPassword: {type: password, title: Password, hashing: salted_sha1, readable: false}
      memberOfGroups:
        type: memberOf
        title: Groups
        foreignView: groups
    self:
      user:
        type: fields
        title: User
        fields:
          givenName: {type: text, title: First name}
          sn: {type: text, title: Last name}
          cn: {type: generate, title: Display name, format: '{givenName} {sn}'}
          mail: {type: text, title: Mail, format: '[^@ ]+@[^@ ]+\.[^@ ]+'}
      password:
        type: fields
        title: Password
        fields:
          userPassword: {type: password, title: Password, hashing: salted_sha1, readable: false, pwnedPasswordCheck: true}
    register:
      user:
        type: fields
        title: Account
        fields:
          uid: {type: text, title: Username, required: true, format: '[a-zA-Z0-9_-]+'}
          givenName: {type: text, title: First name}
          sn: {type: text, title: Last name}
          cn: {type: generate, title: Display name, format: '{givenName} {sn}'}
          mail: {type: text, title: Mail, required: true, format: '[^@ ]+@[^@ ]+\.[^@ ]+'}
      password:
        type: fields
        title: Password
        fields:
          userPassword: {type: password, title: Password, hashing: salted_sha1, readable: false}
  groups:
    dn: ou=groups
    title: Groups
    primaryKey: cn
    permissions: [isAdmin]
    objectClass: [groupOfNames]
    autoCreate:
      objectClass: [top, organizationalUnit]
      ou: groups
    list:
      cn: {type: text, title: Name}
    details:
      group:
        type: fields
        title: Group
        fields:
          cn: {type: text, title: Name, required: true, format: '[a-zA-Z0-9_-]+'}
      members:
        type: member
        title: Members
        foreignView: users
"#;

struct Harness {
    dir: Arc<MemoryDirectory>,
    views: Arc<ViewRegistry>,
    auth: Auth,
}

async fn harness() -> Harness {
    let config = AppConfig::from_yaml(CONFIG, Vec::new()).unwrap();
    let dir = Arc::new(MemoryDirectory::new());
    let handle: DirectoryHandle = dir.clone();
    let views = Arc::new(
        ViewRegistry::new(
            &config.views,
            &config.ldap.prefix,
            handle.clone(),
            Arc::new(StubOracle {
                breached: vec!["hunter2".into()],
            }),
        )
        .await
        .unwrap(),
    );
    let auth = Auth::new(&config.auth, handle).unwrap();
    Harness { dir, views, auth }
}

fn obj(value: Value) -> JsonMap {
    value.as_object().unwrap().clone()
}

fn admin() -> AuthUser {
    AuthUser(obj(json!({"primaryKey": "root", "isAdmin": true})))
}

async fn seed(h: &Harness) {
    let groups = h.views.get("groups").unwrap();
    for name in ["admin", "staff"] {
        groups
            .create_detail(&h.views, &admin(), &obj(json!({"group": {"cn": name}})))
            .await
            .unwrap();
    }

    let users = h.views.get("users").unwrap();
    users
        .create_detail(
            &h.views,
            &admin(),
            &obj(json!({
                "user": {
                    "uid": "alice",
                    "givenName": "Ada",
                    "sn": "Lovelace",
                    "mail": "alice@example.com",
                },
                "password": {"_enabled": true, "userPassword": "CorrectHorse9"},
            })),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn register_then_login() {
    let h = harness().await;
    seed(&h).await;

    let users = h.views.get("users").unwrap();
    users
        .create_register(
            &h.views,
            &obj(json!({
                "user": {
                    "uid": "bob",
                    "givenName": "Bob",
                    "sn": "Builder",
                    "mail": "bob@example.com",
                },
                "password": {"userPassword": "SturdyWalls8"},
                "antiSpamToken": "ignored-by-the-view",
                "antiSpamAnswer": "4",
            })),
        )
        .await
        .unwrap();

    let response = h.auth.login(&h.views, "bob", "SturdyWalls8").await.unwrap();
    assert_eq!(response.user.get("primaryKey"), Some(&json!("bob")));

    let user = h.auth.authenticate(&h.views, &response.token).await.unwrap();
    assert_eq!(user.primary_key(), Some("bob"));
}

#[tokio::test]
async fn login_failures_are_unauthorized() {
    let h = harness().await;
    seed(&h).await;

    let wrong = h.auth.login(&h.views, "alice", "nope").await;
    assert!(matches!(wrong, Err(ApiError::Unauthorized)));

    // An unknown subject fails identically to a bad password.
    let unknown = h.auth.login(&h.views, "nobody", "nope").await;
    assert!(matches!(unknown, Err(ApiError::Unauthorized)));

    let empty = h.auth.login(&h.views, "alice", "").await;
    assert!(matches!(empty, Err(ApiError::Unauthorized)));
}

#[tokio::test]
async fn self_update_rotates_token() {
    let h = harness().await;
    seed(&h).await;

    let login = h.auth.login(&h.views, "alice", "CorrectHorse9").await.unwrap();
    let alice = h.auth.authenticate(&h.views, &login.token).await.unwrap();

    let users = h.views.get("users").unwrap();
    users
        .update_self(
            &h.views,
            &alice,
            &obj(json!({"password": {"userPassword": "EvenBetter10"}})),
        )
        .await
        .unwrap();

    // The password write bumped modifyTimestamp, so the old token's
    // timestamp no longer matches the auth record.
    let stale = h.auth.authenticate(&h.views, &login.token).await;
    assert!(matches!(stale, Err(ApiError::Unauthorized)));

    let fresh = h.auth.relogin(&h.views, "alice").await.unwrap();
    assert!(h.auth.authenticate(&h.views, &fresh.token).await.is_ok());

    assert!(h.auth.login(&h.views, "alice", "EvenBetter10").await.is_ok());
    assert!(matches!(
        h.auth.login(&h.views, "alice", "CorrectHorse9").await,
        Err(ApiError::Unauthorized)
    ));
}

#[tokio::test]
async fn membership_symmetry_member_of_side() {
    let h = harness().await;
    seed(&h).await;

    let users = h.views.get("users").unwrap();
    users
        .update_details(
            &h.views,
            &admin(),
            "alice",
            &obj(json!({"memberOfGroups": {"add": ["admin"]}})),
        )
        .await
        .unwrap();

    // The opposite direction is observable through the group's members.
    let groups = h.views.get("groups").unwrap();
    let detail = groups
        .get_detail_entry(&h.views, &admin(), "admin")
        .await
        .unwrap();
    let members = detail.get("members").unwrap().as_array().unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0]["uid"], json!("alice"));

    // And through the user's own membership projection.
    let login = h.auth.relogin(&h.views, "alice").await.unwrap();
    assert_eq!(login.user.get("isAdmin"), Some(&json!(true)));
}

#[tokio::test]
async fn membership_symmetry_member_side() {
    let h = harness().await;
    seed(&h).await;

    let groups = h.views.get("groups").unwrap();
    groups
        .update_details(
            &h.views,
            &admin(),
            "staff",
            &obj(json!({"members": {"add": ["alice"]}})),
        )
        .await
        .unwrap();

    let users = h.views.get("users").unwrap();
    let detail = users
        .get_detail_entry(&h.views, &admin(), "alice")
        .await
        .unwrap();
    let memberships = detail.get("memberOfGroups").unwrap().as_array().unwrap();
    assert_eq!(memberships.len(), 1);
    assert_eq!(memberships[0]["cn"], json!("staff"));
}

#[tokio::test]
async fn is_member_of_writes_are_idempotent() {
    let h = harness().await;
    seed(&h).await;

    let users = h.views.get("users").unwrap();
    let grant = obj(json!({"user": {"isAdmin": true}}));
    users
        .update_details(&h.views, &admin(), "alice", &grant)
        .await
        .unwrap();
    let after_first = h.dir.modify_count();

    users
        .update_details(&h.views, &admin(), "alice", &grant)
        .await
        .unwrap();
    assert_eq!(h.dir.modify_count(), after_first);
}

#[tokio::test]
async fn member_of_group_updates_are_idempotent() {
    let h = harness().await;
    seed(&h).await;

    let users = h.views.get("users").unwrap();
    let join = obj(json!({"memberOfGroups": {"add": ["admin"]}}));
    users
        .update_details(&h.views, &admin(), "alice", &join)
        .await
        .unwrap();
    let after_first = h.dir.modify_count();

    users
        .update_details(&h.views, &admin(), "alice", &join)
        .await
        .unwrap();
    assert_eq!(h.dir.modify_count(), after_first);
}

#[tokio::test]
async fn validation_error_names_the_field_path() {
    let h = harness().await;
    seed(&h).await;

    let users = h.views.get("users").unwrap();
    let err = users
        .update_details(
            &h.views,
            &admin(),
            "alice",
            &obj(json!({"user": {"mail": "notmail"}})),
        )
        .await
        .unwrap_err();

    let ApiError::Validation(tree) = err else {
        panic!("expected a validation error");
    };
    let payload = serde_json::to_value(&tree).unwrap();
    assert!(payload["user"]["mail"]
        .as_str()
        .unwrap()
        .contains("expecting"));
}

#[tokio::test]
async fn anti_spam_challenges() {
    let h = harness().await;
    let spam = h.auth.anti_spam();

    let challenge = spam.challenge();
    let token = challenge["token"].as_str().unwrap();
    assert_eq!(challenge["question"], json!("2+2?"));

    assert!(spam.verify_answer(Some(token), Some("4")).is_ok());
    assert!(matches!(
        spam.verify_answer(Some(token), Some("5")),
        Err(ApiError::Forbidden)
    ));
    assert!(matches!(
        spam.verify_answer(Some("bogus-token"), Some("4")),
        Err(ApiError::Forbidden)
    ));
}

#[tokio::test]
async fn mail_auto_login_issues_short_lived_token() {
    let h = harness().await;
    seed(&h).await;

    let primary_key = h.auth.resolve_mail(&h.views, "alice@example.com").await.unwrap();
    assert_eq!(primary_key, "alice");

    let token = h.auth.auto_login(&h.views, &primary_key).await.unwrap();
    let user = h.auth.authenticate(&h.views, &token).await.unwrap();
    assert_eq!(user.primary_key(), Some("alice"));

    let missing = h.auth.resolve_mail(&h.views, "nobody@example.com").await;
    assert!(matches!(missing, Err(ApiError::NotFound)));
}

#[tokio::test]
async fn list_search_fetches_exactly_the_declared_attributes() {
    let h = harness().await;
    seed(&h).await;

    let users = h.views.get("users").unwrap();
    users.get_list(&admin()).await.unwrap();

    let last_search = h
        .dir
        .log()
        .into_iter()
        .rev()
        .find_map(|op| match op {
            Op::Search { base, attrs } if base == "ou=users,dc=example,dc=com" => Some(attrs),
            _ => None,
        })
        .unwrap();
    assert_eq!(last_search, vec!["cn".to_string(), "uid".to_string()]);
}

#[tokio::test]
async fn unchanged_assignment_issues_no_modify() {
    let h = harness().await;
    seed(&h).await;

    let users = h.views.get("users").unwrap();
    let before = h.dir.modify_count();
    users
        .update_details(
            &h.views,
            &admin(),
            "alice",
            &obj(json!({"user": {"mail": "alice@example.com", "givenName": "Ada"}})),
        )
        .await
        .unwrap();
    assert_eq!(h.dir.modify_count(), before);
}

#[tokio::test]
async fn password_assignment_always_replaces() {
    let h = harness().await;
    seed(&h).await;

    let alice = AuthUser(h.auth.relogin(&h.views, "alice").await.unwrap().user);
    let users = h.views.get("users").unwrap();
    let rotate = obj(json!({"password": {"userPassword": "SamePass12"}}));

    let before = h.dir.modify_count();
    users.update_self(&h.views, &alice, &rotate).await.unwrap();
    users.update_self(&h.views, &alice, &rotate).await.unwrap();
    // Salted hashes never compare equal: both assignments must write.
    assert_eq!(h.dir.modify_count(), before + 2);
}

#[tokio::test]
async fn breached_password_is_rejected() {
    let h = harness().await;
    seed(&h).await;

    let alice = AuthUser(h.auth.relogin(&h.views, "alice").await.unwrap().user);
    let users = h.views.get("users").unwrap();
    let err = users
        .update_self(
            &h.views,
            &alice,
            &obj(json!({"password": {"userPassword": "hunter2"}})),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));
}

#[tokio::test]
async fn text_and_datetime_round_trip() {
    let h = harness().await;
    seed(&h).await;

    let users = h.views.get("users").unwrap();
    users
        .update_details(
            &h.views,
            &admin(),
            "alice",
            &obj(json!({"user": {
                "mail": "ada@example.com",
                "birthday": "1990-04-01T12:00:00Z",
            }})),
        )
        .await
        .unwrap();

    let detail = users
        .get_detail_entry(&h.views, &admin(), "alice")
        .await
        .unwrap();
    assert_eq!(detail["user"]["mail"], json!("ada@example.com"));
    assert_eq!(detail["user"]["birthday"], json!("1990-04-01T12:00:00Z"));

    // Stored as generalized time on the wire.
    let entry = h.dir.entry("uid=alice,ou=users,dc=example,dc=com").unwrap();
    assert_eq!(entry.get("birthDate"), Some(&vec!["19900401120000Z".to_string()]));
}

#[tokio::test]
async fn generated_field_recomputes_from_inputs() {
    let h = harness().await;
    seed(&h).await;

    let users = h.views.get("users").unwrap();
    users
        .update_details(
            &h.views,
            &admin(),
            "alice",
            &obj(json!({"user": {"givenName": "Grace"}})),
        )
        .await
        .unwrap();

    let detail = users
        .get_detail_entry(&h.views, &admin(), "alice")
        .await
        .unwrap();
    // Assigned givenName combined with the fetched sn.
    assert_eq!(detail["user"]["cn"], json!("Grace Lovelace"));

    let err = users
        .update_details(
            &h.views,
            &admin(),
            "alice",
            &obj(json!({"user": {"cn": "Forged"}})),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));
}

#[tokio::test]
async fn enabled_gating_skips_sibling_fields() {
    let h = harness().await;
    seed(&h).await;

    let users = h.views.get("users").unwrap();
    users
        .create_detail(
            &h.views,
            &admin(),
            &obj(json!({
                "user": {"uid": "carol", "givenName": "Carol", "sn": "Jones",
                         "mail": "carol@example.com"},
                "password": {"userPassword": "NeverStored1"},
            })),
        )
        .await
        .unwrap();

    // Without the `_enabled` producer turning true, the password field is
    // disabled for this record and nothing was written.
    let entry = h.dir.entry("uid=carol,ou=users,dc=example,dc=com").unwrap();
    assert!(!entry.contains_key("userPassword"));
    assert!(matches!(
        h.auth.login(&h.views, "carol", "NeverStored1").await,
        Err(ApiError::Unauthorized)
    ));

    users
        .update_details(
            &h.views,
            &admin(),
            "carol",
            &obj(json!({"password": {"_enabled": true, "userPassword": "NowStored2"}})),
        )
        .await
        .unwrap();

    let entry = h.dir.entry("uid=carol,ou=users,dc=example,dc=com").unwrap();
    assert!(entry.contains_key("userPassword"));
    assert!(entry
        .get("objectClass")
        .unwrap()
        .contains(&"simpleSecurityObject".to_string()));
    assert!(h.auth.login(&h.views, "carol", "NowStored2").await.is_ok());
}

#[tokio::test]
async fn write_permission_is_enforced() {
    let h = harness().await;
    seed(&h).await;

    let nobody = AuthUser(obj(json!({"primaryKey": "alice"})));
    let users = h.views.get("users").unwrap();

    let err = users
        .create_detail(
            &h.views,
            &nobody,
            &obj(json!({"user": {"uid": "mallory", "mail": "m@example.com"}})),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Forbidden));

    let err = users.delete(&nobody, "alice").await.unwrap_err();
    assert!(matches!(err, ApiError::Forbidden));

    // Reads stay open: the users view has no readPermissions.
    assert!(users.get_list(&nobody).await.is_ok());
}

#[tokio::test]
async fn delete_removes_the_entry() {
    let h = harness().await;
    seed(&h).await;

    let users = h.views.get("users").unwrap();
    users.delete(&admin(), "alice").await.unwrap();

    let err = users
        .get_detail_entry(&h.views, &admin(), "alice")
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::NotFound));

    let err = users.delete(&admin(), "alice").await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound));
}

#[tokio::test]
async fn duplicate_create_conflicts() {
    let h = harness().await;
    seed(&h).await;

    let users = h.views.get("users").unwrap();
    let err = users
        .create_detail(
            &h.views,
            &admin(),
            &obj(json!({
                "user": {"uid": "alice", "givenName": "Copy", "sn": "Cat",
                         "mail": "copy@example.com"},
            })),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Conflict));
}

#[tokio::test]
async fn list_entry_uses_the_list_projection() {
    let h = harness().await;
    seed(&h).await;

    let users = h.views.get("users").unwrap();
    let entry = users.get_list_entry(&admin(), "alice").await.unwrap();
    assert_eq!(entry.get("uid"), Some(&json!("alice")));
    assert_eq!(entry.get("displayName"), Some(&json!("Ada Lovelace")));
    // List projections do not carry detail groups.
    assert!(entry.get("memberOfGroups").is_none());

    let err = users.get_list_entry(&admin(), "ghost").await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound));
}

#[tokio::test]
async fn config_documents() {
    let h = harness().await;
    seed(&h).await;

    let users = h.views.get("users").unwrap();

    let for_admin = users.user_config(&admin());
    assert!(for_admin.get("details").is_some());
    assert!(for_admin.get("list").is_some());
    assert!(for_admin.get("self").is_some());

    let for_plain = users.user_config(&AuthUser(obj(json!({"primaryKey": "alice"}))));
    assert!(for_plain.get("details").is_none());
    assert!(for_plain.get("list").is_some());

    let public = users.public_config().unwrap();
    assert_eq!(public["key"], json!("users"));
    assert!(public.get("register").is_some());

    let groups = h.views.get("groups").unwrap();
    assert!(groups.public_config().is_none());
}
