//! Integration test for entity and component lifecycles.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tessera_core::{
    Bitfield, Component, ComponentAttached, ComponentDestroyed, EcsError, EntityCreated,
    EntityDestroyed, EntitySystem, MessageKind, Scope, SystemConfig,
};

#[derive(Debug, PartialEq)]
struct Position {
    x: f32,
    y: f32,
}

impl Component for Position {
    const NAME: &'static str = "Position";
    const CHUNK_SIZE: usize = 8;
}

#[derive(Debug, PartialEq)]
struct Health(u32);

impl Component for Health {
    const NAME: &'static str = "Health";
}

struct Armor;

impl Component for Armor {
    const NAME: &'static str = "Armor";
}

#[test]
fn test_stale_handles_never_come_back() {
    let mut system = EntitySystem::new();
    let mut stale = Vec::new();

    for round in 0..5 {
        let live: Vec<_> = (0..20).map(|_| system.entity_create().unwrap()).collect();
        for entity in &live {
            assert!(system.entity_alive(*entity));
        }
        for old in &stale {
            assert!(!system.entity_alive(*old), "round {round}: {old} came back");
            assert!(!live.contains(old));
        }
        for entity in &live {
            assert!(system.entity_destroy(*entity));
        }
        stale.extend(live);
    }

    assert_eq!(system.entity_count(), 0);
}

#[test]
fn test_pool_growth_keeps_addresses() {
    let mut system = EntitySystem::new();
    let first: Vec<_> = (0..8)
        .map(|i| system.component_create(Position { x: i as f32, y: 0.0 }).unwrap())
        .collect();
    let addresses: Vec<*const Position> = first
        .iter()
        .map(|id| system.component_get::<Position>(*id).unwrap() as *const _)
        .collect();

    // The ninth value opens a second chunk.
    system.component_create(Position { x: 8.0, y: 0.0 }).unwrap();
    for _ in 0..100 {
        system.component_create(Position { x: 0.0, y: 0.0 }).unwrap();
    }

    let family = system.family::<Position>().unwrap();
    assert!(system.pool(family).unwrap().chunk_count() > 1);
    for (id, address) in first.iter().zip(addresses) {
        let now = system.component_get::<Position>(*id).unwrap() as *const Position;
        assert_eq!(now, address);
    }
}

#[test]
fn test_component_handles_are_family_checked() {
    let mut system = EntitySystem::new();
    let health = system.component_create(Health(10)).unwrap();

    assert_eq!(system.component_get::<Health>(health), Some(&Health(10)));
    assert!(system.component_get::<Position>(health).is_none());
    assert_eq!(system.components_of::<Health>().collect::<Vec<_>>(), vec![health]);

    assert!(system.component_destroy(health));
    assert!(!system.component_destroy(health));
    let again = system.component_create(Health(20)).unwrap();
    assert_eq!(again.index(), health.index());
    assert!(system.component_get::<Health>(health).is_none());
}

#[test]
fn test_shape_tracks_attachments() {
    let mut system = EntitySystem::new();
    let entity = system.entity_create().unwrap();
    let health = system.component_create(Health(1)).unwrap();
    let armor = system.component_create(Armor).unwrap();
    system.component_attach(health, entity).unwrap();
    system.component_attach(armor, entity).unwrap();

    let health_family = system.family::<Health>().unwrap() as usize;
    let armor_family = system.family::<Armor>().unwrap() as usize;
    let expected: Bitfield = [health_family, armor_family].into_iter().collect();
    assert_eq!(system.entity_shape(entity), Some(&expected));
    assert_eq!(system.entity_components(entity).len(), 2);

    system.component_destroy(armor);
    let expected: Bitfield = [health_family].into_iter().collect();
    assert_eq!(system.entity_shape(entity), Some(&expected));
    assert!(system.pool_occupancy(armor_family as u8).unwrap().is_empty());
}

#[test]
fn test_lifecycle_events_in_order() {
    let mut system = EntitySystem::new();
    let log = Rc::new(RefCell::new(Vec::new()));

    let sink = Rc::clone(&log);
    system.event_listen::<EntityCreated, _>(0, move |_, _| sink.borrow_mut().push("entity+"));
    let sink = Rc::clone(&log);
    system.event_listen::<ComponentAttached, _>(0, move |_, _| sink.borrow_mut().push("attach"));
    let sink = Rc::clone(&log);
    system.event_listen::<ComponentDestroyed, _>(0, move |_, event| {
        assert!(event.entity.is_some());
        sink.borrow_mut().push("component-");
    });
    let sink = Rc::clone(&log);
    system.event_listen::<EntityDestroyed, _>(0, move |system, event| {
        assert!(!system.entity_alive(event.entity));
        sink.borrow_mut().push("entity-");
    });

    let entity = system.entity_create().unwrap();
    let health = system.component_create(Health(3)).unwrap();
    system.component_attach(health, entity).unwrap();
    system.entity_destroy(entity);

    assert_eq!(*log.borrow(), vec!["entity+", "attach", "component-", "entity-"]);
}

#[test]
fn test_destroyed_watchers_see_value() {
    let mut system = EntitySystem::new();
    let entity = system.entity_create().unwrap();
    let health = system.component_create(Health(42)).unwrap();
    let armor = system.component_create(Armor).unwrap();
    system.component_attach(health, entity).unwrap();
    system.component_attach(armor, entity).unwrap();

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    let family = system.family::<Health>().unwrap();
    system
        .component_request(armor, family, Scope::Local, 0, false, move |system, _, message| {
            let value = message
                .sender()
                .and_then(|c| system.component_get::<Health>(c))
                .map(|h| h.0);
            sink.borrow_mut().push((message.kind(), value));
        })
        .unwrap();

    system.component_destroy(health);

    assert_eq!(
        *seen.borrow(),
        vec![
            (MessageKind::Attached, Some(42)),
            (MessageKind::Destroyed, Some(42)),
        ]
    );
}

#[test]
fn test_finalize_detects_missing_required_family() {
    let mut system = EntitySystem::new();
    let armor_family = system.register_family::<Armor>().unwrap();

    let entity = system.entity_create().unwrap();
    let health = system.component_create(Health(5)).unwrap();
    system.component_attach(health, entity).unwrap();
    system
        .component_request(health, armor_family, Scope::Local, 0, true, |_, _, _| {})
        .unwrap();

    assert_eq!(
        system.finalize_entity(entity),
        Err(EcsError::MissingRequired {
            entity,
            family: armor_family
        })
    );
    assert!(!system.entity_alive(entity));
    assert!(!system.component_alive(health));
    assert_eq!(system.finalize_entity(entity), Err(EcsError::InvalidEntity(entity)));
}

#[test]
fn test_finalize_passes_when_required_family_present() {
    let mut system = EntitySystem::new();
    let armor_family = system.register_family::<Armor>().unwrap();

    let entity = system.entity_create().unwrap();
    let health = system.component_create(Health(5)).unwrap();
    let armor = system.component_create(Armor).unwrap();
    system.component_attach(health, entity).unwrap();
    system.component_attach(armor, entity).unwrap();
    system
        .component_request(health, armor_family, Scope::Local, 0, true, |_, _, _| {})
        .unwrap();

    system.finalize_entity(entity).unwrap();
    assert!(system.entity_finalized(entity));
}

#[test]
fn test_required_watch_needs_attached_owner() {
    let mut system = EntitySystem::new();
    let armor_family = system.register_family::<Armor>().unwrap();
    let loose = system.component_create(Health(1)).unwrap();

    assert_eq!(
        system.component_request(loose, armor_family, Scope::Global, 0, true, |_, _, _| {}),
        Err(EcsError::Unattached(loose))
    );
}

#[test]
fn test_oversized_chunk_config_fails_creation() {
    let config = SystemConfig::from_toml_str("default_chunk_size = 9223372036854775807").unwrap();
    let mut system = EntitySystem::with_config(config);

    assert!(matches!(
        system.component_create(Health(1)),
        Err(EcsError::InvalidConfig(_))
    ));
    // Families with their own chunk size or no storage are unaffected.
    assert!(system.component_create(Position { x: 0.0, y: 0.0 }).is_ok());
    assert!(system.component_create(Armor).is_ok());
}

#[test]
fn test_replacement_survives_watchers_reattaching() {
    const ROUNDS: u32 = 10_000;

    let mut system = EntitySystem::new();
    let health_family = system.register_family::<Health>().unwrap();
    let entity = system.entity_create().unwrap();
    let old = system.component_create(Health(1)).unwrap();
    system.component_attach(old, entity).unwrap();

    let rounds = Rc::new(Cell::new(0));
    let watcher = system.component_create(Armor).unwrap();
    let counter = Rc::clone(&rounds);
    system
        .component_request(watcher, health_family, Scope::Global, 0, false, move |system, _, message| {
            if message.kind() == MessageKind::Detached
                && message.sender() == Some(old)
                && counter.get() < ROUNDS
            {
                counter.set(counter.get() + 1);
                system.component_attach(old, entity).unwrap();
            }
        })
        .unwrap();

    let new = system.component_create(Health(2)).unwrap();
    system.component_attach(new, entity).unwrap();

    assert_eq!(rounds.get(), ROUNDS);
    assert_eq!(system.entity_component(entity, health_family), Some(new));
    assert_eq!(system.component_owner(old), None);
}
