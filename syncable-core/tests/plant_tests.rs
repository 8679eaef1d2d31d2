//! Tests for plant.rs: processing, stamping, rights, atomicity.

use pretty_assertions::assert_eq;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::sync::Arc;
use syncable_core::diff::apply_diffs;
use syncable_core::{
    ChangePlant, ChangeSession, Context, CoreError, CoreResult, SchemaRegistry,
    SyncableContainer, SyncableSchema,
};
use syncable_types::{
    AccessControlEntry, AccessRight, ChangePacket, STAMPED_FIELDS, Syncable, SyncableCreationRef,
    SyncableId, SyncableRef, Timestamp,
};

use AccessRight::{Full, Read, Write};

#[derive(Deserialize)]
struct BriefOptions {
    brief: String,
}

fn create_task(session: &mut ChangeSession<'_>) -> CoreResult<()> {
    let options: BriefOptions = session.options_as()?;
    let creation = session.creation_ref("task")?.clone();
    session.create(Syncable::from_creation_ref(&creation).with_field("brief", options.brief));
    Ok(())
}

fn update_task_brief(session: &mut ChangeSession<'_>) -> CoreResult<()> {
    let options: BriefOptions = session.options_as()?;
    session.syncable_mut("task")?.set("brief", options.brief);
    Ok(())
}

fn assign_task(session: &mut ChangeSession<'_>) -> CoreResult<()> {
    session.syncable_mut("task")?.set("assigned", true);
    Ok(())
}

fn make_plant() -> ChangePlant {
    let mut plant = ChangePlant::new()
        .with("create-task", create_task)
        .with("update-task-brief", update_task_brief)
        .with("touch-task", |session| {
            session.syncable_mut("task")?;
            Ok(())
        })
        .with("rename-task", |session| {
            session.syncable_mut("task")?.id = SyncableId::from("task-2");
            Ok(())
        })
        .with("change-owner", |session| {
            session.syncable_mut("task")?.set("owner", "bob");
            Ok(())
        })
        .with("lock-task", |session| {
            session
                .syncable_mut("task")?
                .acl
                .push(AccessControlEntry::deny("lock", [Write]));
            Ok(())
        })
        .with("remove-task", |session| session.remove_named("task"))
        .with("ping", |session| {
            session.notify(json!({"pong": true}));
            Ok(())
        })
        .with("edit-both", |session| {
            session.syncable_mut("a")?.set("brief", "changed");
            session.syncable_mut("b")?.set("brief", "changed");
            Ok(())
        })
        .with("prepare-twice", |session| {
            let reference = session.object("task")?.reference();
            session.prepare(&reference)?.set("step", 1);
            let step = session.prepare(&reference)?.get("step").cloned();
            session.syncable_mut("task")?.set("seen", step.unwrap_or(Value::Null));
            Ok(())
        });

    plant.register_processor("assign", assign_task, Some(json!({"resolve": ["assignee"]})));

    plant
}

fn make_schemas() -> Arc<SchemaRegistry> {
    Arc::new(SchemaRegistry::new().with_schema(SyncableSchema::new("task").with_securing_field("owner")))
}

fn make_task(acl: &[AccessControlEntry]) -> Syncable {
    let mut task = Syncable::new("task", "task-1").with_field("brief", "x");
    task.acl = acl.to_vec();
    task
}

fn make_container(syncables: impl IntoIterator<Item = Syncable>) -> SyncableContainer {
    SyncableContainer::with_syncables(make_schemas(), syncables)
}

fn task_ref() -> SyncableRef {
    SyncableRef::new("task", "task-1")
}

fn task_packet(change_type: &str) -> ChangePacket {
    ChangePacket::new(change_type).with_ref("task", task_ref())
}

fn changed_fields(diffs: &[syncable_core::Diff]) -> BTreeSet<String> {
    diffs
        .iter()
        .filter_map(|diff| diff.field())
        .filter(|field| !STAMPED_FIELDS.contains(field))
        .map(str::to_string)
        .collect()
}

// ── Creations ───────────────────────────────────────────────────

#[test]
fn create_stamps_clock_and_timestamps() {
    let plant = make_plant();
    let container = make_container([]);
    let packet = ChangePacket::new("create-task")
        .with_creation("task", SyncableCreationRef::with_id("task", "task-9"))
        .with_options(json!({"brief": "x"}))
        .with_created_at(Timestamp::from_millis(1_000));

    let result = plant.process(&packet, &Context::client(), &container, Some(7)).unwrap();

    assert_eq!(result.id, packet.id);
    assert_eq!(result.clock, Some(7));
    assert_eq!(result.creations.len(), 1);

    let created = &result.creations[0];
    assert_eq!(created.reference(), SyncableRef::new("task", "task-9"));
    assert_eq!(created.clock, 7);
    assert_eq!(created.created_at, Timestamp::from_millis(1_000));
    assert_eq!(created.updated_at, Timestamp::from_millis(1_000));
    assert_eq!(created.get_str("brief"), Some("x"));
}

#[test]
fn preview_leaves_clock_unset() {
    let plant = make_plant();
    let container = make_container([]);
    let packet = ChangePacket::new("create-task")
        .with_creation("task", SyncableCreationRef::new("task"))
        .with_options(json!({"brief": "x"}));

    let result = plant.process(&packet, &Context::client(), &container, None).unwrap();

    assert_eq!(result.clock, None);
    assert_eq!(result.creations[0].clock, 0);
    assert!(serde_json::to_value(&result).unwrap().get("clock").is_none());
}

#[test]
fn server_uses_wall_clock() {
    let plant = make_plant();
    let container = make_container([]);
    let packet = ChangePacket::new("create-task")
        .with_creation("task", SyncableCreationRef::new("task"))
        .with_options(json!({"brief": "x"}))
        .with_created_at(Timestamp::from_millis(1));

    let before = Timestamp::now();
    let result = plant.process(&packet, &Context::server(), &container, Some(1)).unwrap();

    assert!(result.creations[0].created_at >= before);
}

// ── Updates ─────────────────────────────────────────────────────

#[test]
fn update_diff_touches_only_changed_field() {
    let plant = make_plant();
    let container = make_container([make_task(&[])]);
    let packet = task_packet("update-task-brief").with_options(json!({"brief": "y"}));

    let result = plant.process(&packet, &Context::server(), &container, Some(3)).unwrap();

    assert_eq!(result.updates.len(), 1);
    let update = &result.updates[0];
    assert_eq!(changed_fields(&update.diffs), BTreeSet::from(["brief".to_string()]));
    assert_eq!(update.snapshot.get_str("brief"), Some("y"));
    assert_eq!(update.snapshot.clock, 3);

    let mut replayed = serde_json::to_value(container.get_syncable(&task_ref()).unwrap()).unwrap();
    apply_diffs(&mut replayed, &update.diffs).unwrap();
    assert_eq!(replayed["brief"], json!("y"));
    assert_eq!(replayed, serde_json::to_value(&update.snapshot).unwrap());
}

#[test]
fn bookkeeping_only_change_emits_no_update() {
    let plant = make_plant();
    let container = make_container([make_task(&[])]);

    let result = plant
        .process(&task_packet("touch-task"), &Context::server(), &container, Some(5))
        .unwrap();

    assert!(result.updates.is_empty());
    assert!(result.is_empty());
}

#[test]
fn identical_value_emits_no_update() {
    let plant = make_plant();
    let container = make_container([make_task(&[])]);
    let packet = task_packet("update-task-brief").with_options(json!({"brief": "x"}));

    let result = plant.process(&packet, &Context::server(), &container, Some(5)).unwrap();

    assert!(result.updates.is_empty());
}

#[test]
fn identity_mutation_is_invalid() {
    let plant = make_plant();
    let container = make_container([make_task(&[])]);

    let err = plant
        .process(&task_packet("rename-task"), &Context::server(), &container, Some(1))
        .unwrap_err();

    assert!(matches!(err, CoreError::InvalidOperation(_)));
}

#[test]
fn update_without_write_is_denied() {
    let plant = make_plant();
    let container = make_container([make_task(&[AccessControlEntry::allow("readers", [Read])])]);
    let packet = task_packet("update-task-brief").with_options(json!({"brief": "y"}));

    let err = plant.process(&packet, &Context::server(), &container, Some(1)).unwrap_err();

    match err {
        CoreError::AccessDenied { missing, .. } => assert_eq!(missing, vec![Write]),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(container.get_syncable(&task_ref()).unwrap().get_str("brief"), Some("x"));
}

#[test]
fn securing_field_requires_full() {
    let plant = make_plant();
    let editors = AccessControlEntry::allow("editors", [Read, Write]);
    let container = make_container([make_task(&[editors])]);

    let packet = task_packet("update-task-brief").with_options(json!({"brief": "y"}));
    assert!(plant.process(&packet, &Context::server(), &container, Some(1)).is_ok());

    let err = plant
        .process(&task_packet("change-owner"), &Context::server(), &container, Some(1))
        .unwrap_err();

    match err {
        CoreError::AccessDenied { missing, .. } => assert_eq!(missing, vec![Full]),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn reserved_field_requires_full() {
    let plant = make_plant();
    let container = make_container([make_task(&[AccessControlEntry::allow("editors", [Read, Write])])]);

    let err = plant
        .process(&task_packet("lock-task"), &Context::server(), &container, Some(1))
        .unwrap_err();

    assert!(matches!(err, CoreError::AccessDenied { .. }));

    let container = make_container([make_task(&[])]);
    let result = plant
        .process(&task_packet("lock-task"), &Context::server(), &container, Some(1))
        .unwrap();

    assert_eq!(changed_fields(&result.updates[0].diffs), BTreeSet::from(["_acl".to_string()]));
}

#[test]
fn denied_second_object_aborts_whole_change() {
    let plant = make_plant();
    let a = Syncable::new("task", "a").with_field("brief", "x");
    let b = Syncable::new("task", "b")
        .with_field("brief", "x")
        .with_acl(AccessControlEntry::allow("readers", [Read]));
    let container = make_container([a, b]);

    let packet = ChangePacket::new("edit-both")
        .with_ref("a", SyncableRef::new("task", "a"))
        .with_ref("b", SyncableRef::new("task", "b"));

    let err = plant.process(&packet, &Context::server(), &container, Some(1)).unwrap_err();

    assert!(matches!(err, CoreError::AccessDenied { .. }));
    assert_eq!(container.get_syncable(&SyncableRef::new("task", "a")).unwrap().get_str("brief"), Some("x"));
}

#[test]
fn repeated_prepare_returns_same_copy() {
    let plant = make_plant();
    let container = make_container([make_task(&[])]);

    let result = plant
        .process(&task_packet("prepare-twice"), &Context::server(), &container, None)
        .unwrap();

    let snapshot = &result.updates[0].snapshot;
    assert_eq!(snapshot.get("step"), Some(&json!(1)));
    assert_eq!(snapshot.get("seen"), Some(&json!(1)));
}

#[test]
fn prepare_requires_read() {
    let plant = make_plant();
    let container = make_container([make_task(&[AccessControlEntry::deny("hidden", [Read])])]);

    let err = plant
        .process(&task_packet("touch-task"), &Context::server(), &container, None)
        .unwrap_err();

    match err {
        CoreError::AccessDenied { missing, .. } => assert_eq!(missing, vec![Read]),
        other => panic!("unexpected error: {other}"),
    }
}

// ── Removals and notifications ──────────────────────────────────

#[test]
fn remove_excludes_object_from_updates() {
    let plant = make_plant();
    let container = make_container([make_task(&[])]);

    let result = plant
        .process(&task_packet("remove-task"), &Context::server(), &container, Some(2))
        .unwrap();

    assert_eq!(result.removals, vec![task_ref()]);
    assert!(result.updates.is_empty());
}

#[test]
fn remove_requires_full() {
    let plant = make_plant();
    let container = make_container([make_task(&[AccessControlEntry::allow("editors", [Read, Write])])]);

    let err = plant
        .process(&task_packet("remove-task"), &Context::server(), &container, Some(2))
        .unwrap_err();

    match err {
        CoreError::AccessDenied { missing, .. } => assert_eq!(missing, vec![Full]),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn notifications_are_collected() {
    let plant = make_plant();
    let container = make_container([]);

    let result = plant
        .process(&ChangePacket::new("ping"), &Context::server(), &container, None)
        .unwrap();

    assert_eq!(result.notifications, vec![json!({"pong": true})]);
    assert!(result.is_empty());
}

// ── Errors and registry ─────────────────────────────────────────

#[test]
fn unknown_change_type_fails() {
    let plant = make_plant();
    let container = make_container([make_task(&[])]);

    let err = plant
        .process(&task_packet("nonexistent"), &Context::server(), &container, None)
        .unwrap_err();

    match err {
        CoreError::UnknownChangeType(change_type) => assert_eq!(change_type, "nonexistent"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn missing_ref_is_not_found() {
    let plant = make_plant();
    let container = make_container([]);

    let err = plant
        .process(&task_packet("touch-task"), &Context::server(), &container, None)
        .unwrap_err();

    assert!(matches!(err, CoreError::NotFound { .. }));
}

#[test]
fn unknown_ref_name_is_invalid() {
    let plant = make_plant();
    let container = make_container([make_task(&[])]);
    let packet = ChangePacket::new("touch-task").with_ref("other", task_ref());

    let err = plant.process(&packet, &Context::server(), &container, None).unwrap_err();

    assert!(matches!(err, CoreError::InvalidOperation(_)));
}

#[test]
fn dependency_options_are_exposed() {
    let plant = make_plant();

    assert_eq!(plant.dependency_options("assign"), Some(&json!({"resolve": ["assignee"]})));
    assert_eq!(plant.dependency_options("touch-task"), None);
    assert_eq!(plant.dependency_options("nonexistent"), None);
}

#[test]
fn registered_processor_runs() {
    let plant = make_plant();
    let container = make_container([make_task(&[])]);

    let result = plant
        .process(&task_packet("assign"), &Context::server(), &container, None)
        .unwrap();

    assert_eq!(result.updates[0].snapshot.get("assigned"), Some(&json!(true)));
}
