//! Session authorization tests
//!
//! Logon (authentication, temporal pruning, DSD), access checks and role
//! activation against the in-memory directory.

mod common;

use arbiter_rbac::{
    AdminRole, Constraint, ConstraintViolation, DirectoryStore, DropReason, EngineConfig,
    HierarchyKind, InMemoryDirectory, Permission, RbacEngine, RbacError, Role, SessionRequest,
    User, UserRole,
};
use common::{assign, bank_directory, cash_dsd, init_tracing, monday_at, saturday_at, TENANT};
use proptest::prelude::*;

async fn engine_with(config: EngineConfig) -> (InMemoryDirectory, RbacEngine) {
    init_tracing();
    let dir = bank_directory().await;
    let engine = RbacEngine::in_memory(dir.clone(), config);
    (dir, engine)
}

async fn engine() -> (InMemoryDirectory, RbacEngine) {
    engine_with(EngineConfig::default()).await
}

// ============================================================================
// LOGON
// ============================================================================

#[tokio::test]
async fn test_password_logon() {
    let (dir, engine) = engine().await;
    assign(&dir, "alice", &["Teller"]).await;

    let session = engine
        .sessions()
        .create_session_at(
            &SessionRequest::with_password(TENANT, "alice", "alice-pw"),
            monday_at(9, 0),
        )
        .await
        .unwrap();

    assert!(session.authenticated);
    assert_eq!(session.user_id, "alice");
    assert_eq!(session.last_access, monday_at(9, 0));
    assert!(session.has_role("Teller"));
    assert!(session.dropped.is_empty());
}

#[tokio::test]
async fn test_wrong_password_rejected() {
    let (dir, engine) = engine().await;
    assign(&dir, "alice", &["Teller"]).await;

    let err = engine
        .sessions()
        .create_session(&SessionRequest::with_password(TENANT, "alice", "guess"))
        .await
        .unwrap_err();

    assert!(matches!(err, RbacError::Authentication(_)));
}

#[tokio::test]
async fn test_trusted_logon_skips_authentication() {
    let (dir, engine) = engine().await;
    assign(&dir, "alice", &["Teller"]).await;
    let internal = dir_user_internal_id(&dir, "alice").await;

    let session = engine
        .sessions()
        .create_session_at(&SessionRequest::trusted(TENANT, "alice"), monday_at(9, 0))
        .await
        .unwrap();

    assert!(!session.authenticated);
    assert_eq!(session.internal_id, internal);
}

async fn dir_user_internal_id(dir: &InMemoryDirectory, user: &str) -> String {
    dir.read_user(user, TENANT).await.unwrap().internal_id
}

#[tokio::test]
async fn test_requested_roles_filter_and_report_unassigned() {
    let (dir, engine) = engine().await;
    assign(&dir, "alice", &["Teller", "Clerk"]).await;

    let request = SessionRequest::trusted(TENANT, "alice").with_roles(["Clerk", "Ghost"]);
    let session = engine
        .sessions()
        .create_session_at(&request, monday_at(9, 0))
        .await
        .unwrap();

    let names: Vec<&str> = session.role_names().collect();
    assert_eq!(names, vec!["Clerk"]);
    assert_eq!(session.dropped.len(), 1);
    assert_eq!(session.dropped[0].name, "Ghost");
    assert!(!session.dropped[0].admin);
    assert_eq!(session.dropped[0].reason, DropReason::NotAssigned);
}

// ============================================================================
// TEMPORAL CONSTRAINTS
// ============================================================================

#[tokio::test]
async fn test_role_constraint_failure_drops_role() {
    let (dir, engine) = engine().await;
    dir.put_role(
        TENANT,
        Role::new("Clerk").with_constraint(Constraint::new("Clerk").with_day_mask("23456")),
    )
    .await
    .unwrap();
    assign(&dir, "alice", &["Teller", "Clerk"]).await;

    let session = engine
        .sessions()
        .create_session_at(&SessionRequest::trusted(TENANT, "alice"), saturday_at(9, 0))
        .await
        .unwrap();

    assert!(session.has_role("Teller"));
    assert!(!session.has_role("Clerk"));
    assert_eq!(
        session.dropped[0].reason,
        DropReason::Constraint(ConstraintViolation::BadDay)
    );
}

#[tokio::test]
async fn test_user_constraint_failure_aborts_logon() {
    let (dir, engine) = engine().await;
    dir.put_user(
        TENANT,
        User::new("carol", "north").with_constraint(Constraint::new("carol").with_day_mask("23456")),
        None,
    )
    .await;

    let err = engine
        .sessions()
        .create_session_at(&SessionRequest::trusted(TENANT, "carol"), saturday_at(9, 0))
        .await
        .unwrap_err();

    match err {
        RbacError::Constraint { subject, reason } => {
            assert_eq!(subject, "carol");
            assert_eq!(reason, ConstraintViolation::BadDay);
        }
        other => panic!("expected constraint failure, got {other}"),
    }
}

#[tokio::test]
async fn test_assignment_override_wins_over_role_default() {
    let (dir, engine) = engine().await;
    dir.put_role(
        TENANT,
        Role::new("Clerk").with_constraint(Constraint::new("Clerk").with_time_window("0800", "1700")),
    )
    .await
    .unwrap();
    dir.assign_role(
        TENANT,
        &UserRole::new("alice", "Clerk")
            .with_constraint(Constraint::default().with_time_window("0800", "1200")),
    )
    .await
    .unwrap();

    let session = engine
        .sessions()
        .create_session_at(&SessionRequest::trusted(TENANT, "alice"), monday_at(13, 0))
        .await
        .unwrap();

    assert!(session.roles.is_empty());
    assert_eq!(
        session.dropped[0].reason,
        DropReason::Constraint(ConstraintViolation::BadTime)
    );
}

#[tokio::test]
async fn test_idle_timeout_prunes_role_on_access_check() {
    let (dir, engine) = engine().await;
    dir.put_role(
        TENANT,
        Role::new("Teller")
            .with_parent("Supervisor")
            .with_constraint(Constraint::new("Teller").with_timeout(30)),
    )
    .await
    .unwrap();
    assign(&dir, "alice", &["Teller"]).await;

    let sessions = engine.sessions();
    let mut session = sessions
        .create_session_at(&SessionRequest::trusted(TENANT, "alice"), monday_at(9, 0))
        .await
        .unwrap();

    assert!(sessions
        .check_access_at(&mut session, "Account", "debit", monday_at(9, 10))
        .await
        .unwrap());
    assert_eq!(session.last_access, monday_at(9, 10));

    assert!(!sessions
        .check_access_at(&mut session, "Account", "debit", monday_at(10, 0))
        .await
        .unwrap());
    assert!(session.roles.is_empty());
    assert_eq!(
        session.dropped.last().map(|d| d.reason),
        Some(DropReason::Constraint(ConstraintViolation::Timeout))
    );
}

// ============================================================================
// DYNAMIC SEPARATION OF DUTY
// ============================================================================

#[tokio::test]
async fn test_dsd_rejects_conflicting_activation() {
    let (dir, engine) = engine().await;
    assign(&dir, "alice", &["Teller", "Auditor"]).await;
    engine.sod().create_sd_set(TENANT, cash_dsd()).await.unwrap();

    let both = SessionRequest::trusted(TENANT, "alice").with_roles(["Teller", "Auditor"]);
    let err = engine
        .sessions()
        .create_session_at(&both, monday_at(9, 0))
        .await
        .unwrap_err();

    match err {
        RbacError::DsdViolation { set, matched, cardinality, .. } => {
            assert_eq!(set, "cash-handling");
            assert_eq!(matched, 2);
            assert_eq!(cardinality, 2);
        }
        other => panic!("expected DSD violation, got {other}"),
    }

    let teller = SessionRequest::trusted(TENANT, "alice").with_roles(["Teller"]);
    let session = engine
        .sessions()
        .create_session_at(&teller, monday_at(9, 0))
        .await
        .unwrap();
    assert!(session.has_role("Teller"));
}

#[tokio::test]
async fn test_dsd_counts_inherited_roles() {
    let (dir, engine) = engine().await;
    assign(&dir, "alice", &["Trainee", "Auditor"]).await;
    engine.sod().create_sd_set(TENANT, cash_dsd()).await.unwrap();

    // Trainee inherits Teller
    let err = engine
        .sessions()
        .create_session_at(&SessionRequest::trusted(TENANT, "alice"), monday_at(9, 0))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "DSD_VIOLATION");
}

#[tokio::test]
async fn test_dsd_enforcement_can_be_disabled() {
    let config = EngineConfig {
        enforce_dsd: false,
        ..EngineConfig::default()
    };
    let (dir, engine) = engine_with(config).await;
    assign(&dir, "alice", &["Teller", "Auditor"]).await;
    engine.sod().create_sd_set(TENANT, cash_dsd()).await.unwrap();

    let session = engine
        .sessions()
        .create_session_at(&SessionRequest::trusted(TENANT, "alice"), monday_at(9, 0))
        .await
        .unwrap();
    assert_eq!(session.roles.len(), 2);
}

// ============================================================================
// ACCESS CHECKS
// ============================================================================

#[tokio::test]
async fn test_inherited_grant() {
    let (dir, engine) = engine().await;
    assign(&dir, "alice", &["Teller"]).await;

    let sessions = engine.sessions();
    let mut session = sessions
        .create_session_at(&SessionRequest::trusted(TENANT, "alice"), monday_at(9, 0))
        .await
        .unwrap();

    assert!(sessions
        .check_access_at(&mut session, "Account", "debit", monday_at(9, 1))
        .await
        .unwrap());
    assert!(!sessions
        .check_access_at(&mut session, "Account", "audit", monday_at(9, 2))
        .await
        .unwrap());
    assert!(!sessions
        .check_access_at(&mut session, "Vault", "open", monday_at(9, 3))
        .await
        .unwrap());

    let authorized = sessions.authorized_roles(&session).await.unwrap();
    assert!(authorized.contains("Teller"));
    assert!(authorized.contains("Supervisor"));
}

#[tokio::test]
async fn test_direct_user_grant() {
    let (_dir, engine) = engine().await;

    let sessions = engine.sessions();
    let mut session = sessions
        .create_session_at(&SessionRequest::trusted(TENANT, "bob"), monday_at(9, 0))
        .await
        .unwrap();

    assert!(session.roles.is_empty());
    assert!(sessions
        .check_access_at(&mut session, "Ledger", "read", monday_at(9, 1))
        .await
        .unwrap());
}

#[tokio::test]
async fn test_admin_permission_checked_against_admin_roles() {
    let (dir, engine) = engine().await;
    dir.put_admin_role(TENANT, AdminRole::new("BranchAdmin")).await.unwrap();
    let mut desk = AdminRole::new("DeskAdmin").with_range("Trainee", true, "Teller", true);
    desk.role.parents.insert("BranchAdmin".to_string());
    dir.put_admin_role(TENANT, desk).await.unwrap();
    dir.assign_admin_role(TENANT, UserRole::new("alice", "DeskAdmin"))
        .await;
    dir.put_permission(
        TENANT,
        Permission::new("Role", "assign")
            .granted_to_role("BranchAdmin")
            .admin(),
    )
    .await;
    assign(&dir, "bob", &["Supervisor"]).await;

    let sessions = engine.sessions();
    let mut admin_session = sessions
        .create_session_at(&SessionRequest::trusted(TENANT, "alice"), monday_at(9, 0))
        .await
        .unwrap();
    assert!(admin_session.has_admin_role("DeskAdmin"));
    assert!(sessions
        .check_access_at(&mut admin_session, "Role", "assign", monday_at(9, 1))
        .await
        .unwrap());

    let mut user_session = sessions
        .create_session_at(&SessionRequest::trusted(TENANT, "bob"), monday_at(9, 0))
        .await
        .unwrap();
    assert!(!sessions
        .check_access_at(&mut user_session, "Role", "assign", monday_at(9, 1))
        .await
        .unwrap());
}

// ============================================================================
// ROLE ACTIVATION
// ============================================================================

#[tokio::test]
async fn test_add_and_drop_active_role() {
    let (dir, engine) = engine().await;
    assign(&dir, "alice", &["Teller", "Auditor", "Clerk"]).await;
    engine.sod().create_sd_set(TENANT, cash_dsd()).await.unwrap();

    let sessions = engine.sessions();
    let mut session = sessions
        .create_session_at(
            &SessionRequest::trusted(TENANT, "alice").with_roles(["Teller"]),
            monday_at(9, 0),
        )
        .await
        .unwrap();

    let err = sessions
        .add_active_role_at(&mut session, "Auditor", monday_at(9, 5))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "DSD_VIOLATION");
    assert!(!session.has_role("Auditor"));

    sessions
        .add_active_role_at(&mut session, "Clerk", monday_at(9, 5))
        .await
        .unwrap();
    assert!(session.has_role("Clerk"));
    assert_eq!(session.last_access, monday_at(9, 5));

    assert!(sessions
        .add_active_role_at(&mut session, "Clerk", monday_at(9, 6))
        .await
        .is_err());

    sessions.drop_active_role(&mut session, "Teller").unwrap();
    sessions
        .add_active_role_at(&mut session, "Auditor", monday_at(9, 7))
        .await
        .unwrap();

    assert!(matches!(
        sessions.drop_active_role(&mut session, "Teller"),
        Err(RbacError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_add_unassigned_role_fails() {
    let (dir, engine) = engine().await;
    assign(&dir, "alice", &["Teller"]).await;

    let sessions = engine.sessions();
    let mut session = sessions
        .create_session_at(&SessionRequest::trusted(TENANT, "alice"), monday_at(9, 0))
        .await
        .unwrap();

    let err = sessions
        .add_active_role_at(&mut session, "Auditor", monday_at(9, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, RbacError::NotFound { .. }));
}

#[tokio::test]
async fn test_add_role_failing_constraint_is_an_error() {
    let (dir, engine) = engine().await;
    dir.put_role(
        TENANT,
        Role::new("Clerk").with_constraint(Constraint::new("Clerk").with_day_mask("23456")),
    )
    .await
    .unwrap();
    assign(&dir, "alice", &["Teller", "Clerk"]).await;

    let sessions = engine.sessions();
    let mut session = sessions
        .create_session_at(
            &SessionRequest::trusted(TENANT, "alice").with_roles(["Teller"]),
            saturday_at(9, 0),
        )
        .await
        .unwrap();

    let err = sessions
        .add_active_role_at(&mut session, "Clerk", saturday_at(9, 1))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "BAD_DAY");
}

// ============================================================================
// PROPERTY-BASED TESTS (PROPTEST)
// ============================================================================

const BANK_ROLES: [&str; 5] = ["Supervisor", "Teller", "Trainee", "Auditor", "Clerk"];

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_created_sessions_never_break_dsd(
        picks in proptest::collection::btree_set(0usize..BANK_ROLES.len(), 1..=BANK_ROLES.len())
    ) {
        tokio_test::block_on(async {
            let (dir, engine) = engine().await;
            let roles: Vec<&str> = picks.iter().map(|i| BANK_ROLES[*i]).collect();
            assign(&dir, "alice", &roles).await;
            engine.sod().create_sd_set(TENANT, cash_dsd()).await.unwrap();

            let graph = engine
                .graphs()
                .graph_for(HierarchyKind::Role, TENANT)
                .await
                .unwrap();
            let conflicting = cash_dsd().is_violated_by(&graph.ascendants_of_all(roles.iter().copied()));

            let result = engine
                .sessions()
                .create_session_at(&SessionRequest::trusted(TENANT, "alice"), monday_at(9, 0))
                .await;

            match result {
                Ok(session) => {
                    assert!(!conflicting, "session created over conflicting roles {:?}", roles);
                    let closure = graph.ascendants_of_all(session.role_names());
                    assert!(!cash_dsd().is_violated_by(&closure));
                }
                Err(err) => {
                    assert!(conflicting, "unexpected rejection of {:?}: {}", roles, err);
                    assert_eq!(err.code(), "DSD_VIOLATION");
                }
            }
        });
    }
}
