mod common;

use interactsync::fault_injection::{FaultPoint, configure_fault, reset_faults};
use interactsync::{
    CommitStage, EngineState, Entity, EntityGraph, EntityId, EntityKind, SyncBackend, SyncError,
    attribute, relation,
};
use serde_json::json;

use common::{engine, human, protein, publication, two_hybrid_interaction};

#[test]
fn test_new_interaction_inserts_every_entity() {
    let fixture = two_hybrid_interaction();
    let mut engine = engine();

    let result = engine
        .synchronize(&fixture.graph, &[fixture.interaction])
        .expect("synchronize");

    let stats = &result.statistics;
    assert_eq!(stats.inserted(EntityKind::Interaction), 1);
    assert_eq!(stats.inserted(EntityKind::Participant), 2);
    assert_eq!(stats.inserted(EntityKind::Interactor), 2);
    assert_eq!(stats.inserted(EntityKind::CvTerm), 5);
    assert_eq!(stats.inserted(EntityKind::BioSource), 1);
    assert_eq!(stats.inserted(EntityKind::Xref), 8);
    assert_eq!(stats.total_inserted(), 21);
    assert_eq!(stats.total_duplicates(), 0);

    for participant in &fixture.participants {
        assert!(result.id_of(*participant).is_some(), "participant has an id");
    }
    let root = result.root(fixture.interaction).expect("root record");
    assert_eq!(root.kind, EntityKind::Interaction);
    assert_eq!(root.many(relation::PARTICIPANTS).len(), 2);
    assert_eq!(
        root.many(relation::EXPERIMENTS),
        &[result.id_of(fixture.experiment).expect("experiment id")]
    );
    assert_eq!(engine.state(), EngineState::Idle);
    assert_eq!(engine.backend().record_count().expect("count"), 21);
}

#[test]
fn test_caller_graph_is_not_modified() {
    let fixture = two_hybrid_interaction();
    let before = fixture.graph.clone();
    let mut engine = engine();
    engine
        .synchronize(&fixture.graph, &[fixture.interaction])
        .expect("synchronize");
    assert_eq!(fixture.graph, before);
}

#[test]
fn test_exact_duplicate_reuses_stored_interaction() {
    let mut engine = engine();
    let first = two_hybrid_interaction();
    let stored = engine
        .synchronize(&first.graph, &[first.interaction])
        .expect("first");

    let second = two_hybrid_interaction();
    let result = engine
        .synchronize(&second.graph, &[second.interaction])
        .expect("second");

    assert_eq!(result.statistics.duplicates(EntityKind::Interaction), 1);
    assert_eq!(result.statistics.total_inserted(), 0);
    assert_eq!(result.statistics.total_updated(), 0);
    assert_eq!(
        result.id_of(second.interaction),
        stored.id_of(first.interaction)
    );
    assert_eq!(engine.backend().record_count().expect("count"), 21);
}

#[test]
fn test_exact_duplicate_with_update_mode_changes_nothing() {
    let mut engine = engine();
    let first = two_hybrid_interaction();
    let stored = engine
        .synchronize(&first.graph, &[first.interaction])
        .expect("first");

    engine.set_update_without_identifier(true);
    let second = two_hybrid_interaction();
    let result = engine
        .synchronize(&second.graph, &[second.interaction])
        .expect("second");

    assert_eq!(result.statistics.duplicates(EntityKind::Interaction), 1);
    assert_eq!(result.statistics.total_inserted(), 0);
    assert_eq!(result.statistics.total_updated(), 0);
    assert_eq!(
        result.id_of(second.interaction),
        stored.id_of(first.interaction)
    );
}

#[test]
fn test_resubmitting_with_identifiers_is_idempotent() {
    let mut engine = engine();
    let fixture = two_hybrid_interaction();
    let stored = engine
        .synchronize(&fixture.graph, &[fixture.interaction])
        .expect("first");

    let mut again = fixture.graph.clone();
    for (handle, id) in &stored.identifiers {
        again.entity_mut(*handle).expect("entity").id = Some(*id);
    }
    let result = engine
        .synchronize(&again, &[fixture.interaction])
        .expect("second");

    assert_eq!(result.statistics.total_inserted(), 0);
    assert_eq!(result.statistics.total_updated(), 0);
    assert_eq!(result.statistics.transient(EntityKind::Interaction), 1);
    assert_eq!(
        result.id_of(fixture.interaction),
        stored.id_of(fixture.interaction)
    );
}

#[test]
fn test_partial_update_adds_xref_and_keeps_existing_ones() {
    let mut engine = engine();
    let mut graph = EntityGraph::new();
    let publication = publication(&mut graph, "123", "smith-2020");
    graph
        .add_child(
            publication,
            relation::XREFS,
            Entity::xref("doi", "10.1000/xyz", None),
        )
        .expect("doi");
    let id = engine
        .synchronize(&graph, &[publication])
        .expect("first")
        .id_of(publication)
        .expect("publication id");

    let stored_xrefs = engine
        .backend()
        .get_record(id)
        .expect("stored publication")
        .many(relation::XREFS)
        .to_vec();

    let mut update = EntityGraph::new();
    let submitted = update.add(Entity::new(EntityKind::Publication, "smith-2020").with_id(id));
    let mut xrefs = Vec::new();
    for (database, primary, qualifier) in [
        (attribute::PUBMED, "123", Some(attribute::PRIMARY_REFERENCE_QUALIFIER)),
        ("doi", "10.1000/xyz", None),
        ("imex", "IM-1", Some("imex-primary")),
    ] {
        let xref = update
            .add_child(
                submitted,
                relation::XREFS,
                Entity::xref(database, primary, qualifier),
            )
            .expect("xref");
        xrefs.push(xref);
    }
    let result = engine.synchronize(&update, &[submitted]).expect("update");

    assert_eq!(result.statistics.updated(EntityKind::Publication), 1);
    assert_eq!(result.statistics.inserted(EntityKind::Xref), 1);
    assert_eq!(result.statistics.transient(EntityKind::Publication), 1);
    let record = result.root(submitted).expect("root");
    assert_eq!(record.id, id);
    assert_eq!(record.many(relation::XREFS).len(), 3);

    // Matched xrefs report the stored ids; the new one gets a fresh id.
    assert_eq!(result.id_of(xrefs[0]), Some(stored_xrefs[0]));
    assert_eq!(result.id_of(xrefs[1]), Some(stored_xrefs[1]));
    let imex = result.id_of(xrefs[2]).expect("imex id");
    assert!(!stored_xrefs.contains(&imex));
    assert!(record.many(relation::XREFS).contains(&imex));
}

#[test]
fn test_not_loaded_collection_is_left_untouched() {
    let mut engine = engine();
    let mut graph = EntityGraph::new();
    let publication = publication(&mut graph, "123", "smith-2020");
    let id = engine
        .synchronize(&graph, &[publication])
        .expect("first")
        .id_of(publication)
        .expect("publication id");

    let mut update = EntityGraph::new();
    let submitted = update.add(
        Entity::new(EntityKind::Publication, "smith-2020")
            .with_id(id)
            .with_attribute("year", 2020),
    );
    update
        .mark_not_loaded(submitted, relation::XREFS)
        .expect("not loaded");
    let result = engine.synchronize(&update, &[submitted]).expect("update");

    assert_eq!(result.statistics.updated(EntityKind::Publication), 1);
    let record = engine.backend().get_record(id).expect("record");
    assert_eq!(record.attribute("year"), Some(&json!(2020)));
    assert_eq!(record.many(relation::XREFS).len(), 1);
}

#[test]
fn test_loaded_collection_detaches_missing_children() {
    let mut engine = engine();
    let mut graph = EntityGraph::new();
    let publication = publication(&mut graph, "123", "smith-2020");
    graph
        .add_child(
            publication,
            relation::XREFS,
            Entity::xref("doi", "10.1000/xyz", None),
        )
        .expect("doi");
    let id = engine
        .synchronize(&graph, &[publication])
        .expect("first")
        .id_of(publication)
        .expect("publication id");

    let mut update = EntityGraph::new();
    let submitted = update.add(Entity::new(EntityKind::Publication, "smith-2020").with_id(id));
    update
        .add_child(
            submitted,
            relation::XREFS,
            Entity::xref(
                attribute::PUBMED,
                "123",
                Some(attribute::PRIMARY_REFERENCE_QUALIFIER),
            ),
        )
        .expect("pubmed");
    let result = engine.synchronize(&update, &[submitted]).expect("update");

    assert_eq!(result.statistics.updated(EntityKind::Publication), 1);
    assert_eq!(result.statistics.updated(EntityKind::Xref), 1);
    let children = engine.backend().children_of(id).expect("children");
    assert_eq!(children.get(relation::XREFS).map(Vec::len), Some(1));
}

#[test]
fn test_clearing_significant_relation_is_rejected_before_writes() {
    let mut engine = engine();
    let mut graph = EntityGraph::new();
    let organism = human(&mut graph);
    let p53 = protein(&mut graph, "P04637", "p53_human", organism);
    let id = engine
        .synchronize(&graph, &[p53])
        .expect("first")
        .id_of(p53)
        .expect("interactor id");
    let before = engine.backend().counters();

    let mut update = EntityGraph::new();
    let submitted = update.add(Entity::new(EntityKind::Interactor, "p53_human").with_id(id));
    update
        .link(submitted, relation::ORGANISM, None)
        .expect("clear organism");
    let err = engine
        .synchronize(&update, &[submitted])
        .expect_err("merge must be rejected");

    assert!(
        matches!(&err, SyncError::InvalidMerge { relation, .. } if relation == "organism"),
        "unexpected error: {err}"
    );
    let after = engine.backend().counters();
    assert_eq!(after.insert_count, before.insert_count);
    assert_eq!(after.update_count, before.update_count);
    assert_eq!(engine.state(), EngineState::Failed);
    let stored = engine.backend().get_record(id).expect("record");
    assert!(stored.one(relation::ORGANISM).is_some());
}

#[test]
fn test_dropping_identity_xref_is_rejected() {
    let mut engine = engine();
    let mut graph = EntityGraph::new();
    let organism = human(&mut graph);
    let p53 = protein(&mut graph, "P04637", "p53_human", organism);
    let id = engine
        .synchronize(&graph, &[p53])
        .expect("first")
        .id_of(p53)
        .expect("interactor id");

    let mut update = EntityGraph::new();
    let submitted = update.add(Entity::new(EntityKind::Interactor, "p53_human").with_id(id));
    update.clear(submitted, relation::XREFS).expect("clear");
    let err = engine
        .synchronize(&update, &[submitted])
        .expect_err("identity xref must stay");
    assert!(matches!(err, SyncError::InvalidMerge { kind: EntityKind::Interactor, .. }));
}

#[test]
fn test_update_without_identifier_merges_into_stored_record() {
    let mut engine = engine();
    let mut graph = EntityGraph::new();
    let organism = human(&mut graph);
    let p53 = protein(&mut graph, "P04637", "p53_human", organism);
    graph.entity_mut(p53).expect("p53").attributes.insert(
        attribute::FULL_NAME.to_string(),
        json!("Cellular tumor antigen p53"),
    );
    let id = engine
        .synchronize(&graph, &[p53])
        .expect("first")
        .id_of(p53)
        .expect("interactor id");

    let mut resubmitted = EntityGraph::new();
    let organism = human(&mut resubmitted);
    let again = protein(&mut resubmitted, "P04637", "p53_human", organism);
    resubmitted.entity_mut(again).expect("p53").attributes.insert(
        attribute::FULL_NAME.to_string(),
        json!("Tumor suppressor p53"),
    );

    engine.set_update_without_identifier(true);
    let result = engine.synchronize(&resubmitted, &[again]).expect("merge");

    assert_eq!(result.statistics.updated(EntityKind::Interactor), 1);
    assert_eq!(result.statistics.total_inserted(), 0);
    assert_eq!(result.id_of(again), Some(id));
    let record = engine.backend().get_record(id).expect("record");
    assert_eq!(
        record.attribute(attribute::FULL_NAME),
        Some(&json!("Tumor suppressor p53"))
    );
}

#[test]
fn test_matched_entity_without_update_mode_is_a_duplicate() {
    let mut engine = engine();
    let mut graph = EntityGraph::new();
    let organism = human(&mut graph);
    let p53 = protein(&mut graph, "P04637", "p53_human", organism);
    graph.entity_mut(p53).expect("p53").attributes.insert(
        attribute::FULL_NAME.to_string(),
        json!("Cellular tumor antigen p53"),
    );
    let id = engine
        .synchronize(&graph, &[p53])
        .expect("first")
        .id_of(p53)
        .expect("interactor id");

    let mut resubmitted = EntityGraph::new();
    let organism = human(&mut resubmitted);
    let again = protein(&mut resubmitted, "P04637", "p53_human", organism);
    resubmitted.entity_mut(again).expect("p53").attributes.insert(
        attribute::FULL_NAME.to_string(),
        json!("Tumor suppressor p53"),
    );
    let result = engine.synchronize(&resubmitted, &[again]).expect("duplicate");

    assert_eq!(result.statistics.duplicates(EntityKind::Interactor), 1);
    assert_eq!(result.statistics.total_updated(), 0);
    assert_eq!(result.id_of(again), Some(id));
    let record = engine.backend().get_record(id).expect("record");
    assert_eq!(
        record.attribute(attribute::FULL_NAME),
        Some(&json!("Cellular tumor antigen p53"))
    );
}

#[test]
fn test_duplicates_within_one_batch_are_folded() {
    let mut engine = engine();
    let mut graph = EntityGraph::new();
    let first = publication(&mut graph, "123", "smith-2020");
    let second = publication(&mut graph, "123", "Smith 2020");
    let experiment = graph.add(Entity::new(EntityKind::Experiment, "smith-2020-1"));
    graph
        .link(experiment, relation::PUBLICATION, Some(second))
        .expect("publication");

    let result = engine
        .synchronize(&graph, &[first, second, experiment])
        .expect("synchronize");

    assert_eq!(result.statistics.inserted(EntityKind::Publication), 1);
    assert_eq!(result.statistics.duplicates(EntityKind::Publication), 1);
    assert_eq!(result.statistics.inserted(EntityKind::Xref), 1);
    let id = result.id_of(first).expect("id");
    assert_eq!(result.id_of(second), Some(id));
    let experiment = result.root(experiment).expect("experiment");
    assert_eq!(experiment.one(relation::PUBLICATION), Some(id));
}

#[test]
fn test_identified_and_content_forms_fold_in_one_batch() {
    let mut engine = engine();
    let mut graph = EntityGraph::new();
    let seeded = publication(&mut graph, "123", "smith-2020");
    let id = engine
        .synchronize(&graph, &[seeded])
        .expect("seed")
        .id_of(seeded)
        .expect("id");
    let count = engine.backend().record_count().expect("count");

    let mut batch = EntityGraph::new();
    let by_content = publication(&mut batch, "123", "smith-2020");
    let by_id = batch.add(Entity::new(EntityKind::Publication, "smith-2020").with_id(id));
    let result = engine
        .synchronize(&batch, &[by_content, by_id])
        .expect("synchronize");

    // The content form is found in the store and registered under the
    // stored key, so the identified form folds into it without a reload.
    assert_eq!(result.statistics.duplicates(EntityKind::Publication), 2);
    assert_eq!(result.statistics.transient(EntityKind::Publication), 0);
    assert_eq!(result.statistics.total_inserted(), 0);
    assert_eq!(result.statistics.updated(EntityKind::Publication), 0);
    assert_eq!(result.id_of(by_content), Some(id));
    assert_eq!(result.id_of(by_id), Some(id));
    assert_eq!(engine.backend().record_count().expect("count"), count);
}

#[test]
fn test_shared_vocabulary_is_not_counted_as_duplicate() {
    let mut engine = engine();
    let mut graph = EntityGraph::new();
    let organism = human(&mut graph);
    let first_type = common::cv_term(&mut graph, "interactor type", "protein", "MI:0326");
    let second_type = common::cv_term(&mut graph, "interactor type", "protein", "MI:0326");
    let a = protein(&mut graph, "P04637", "p53_human", organism);
    let b = protein(&mut graph, "Q00987", "mdm2_human", organism);
    graph
        .link(a, relation::INTERACTOR_TYPE, Some(first_type))
        .expect("type a");
    graph
        .link(b, relation::INTERACTOR_TYPE, Some(second_type))
        .expect("type b");

    let result = engine.synchronize(&graph, &[a, b]).expect("synchronize");

    assert_eq!(result.statistics.inserted(EntityKind::CvTerm), 1);
    assert_eq!(result.statistics.duplicates(EntityKind::CvTerm), 0);
    assert_eq!(result.id_of(first_type), result.id_of(second_type));
}

#[test]
fn test_records_only_reference_earlier_records() {
    let mut engine = engine();
    let fixture = two_hybrid_interaction();
    engine
        .synchronize(&fixture.graph, &[fixture.interaction])
        .expect("synchronize");

    let store = engine.backend();
    let links = store.links().expect("links");
    assert!(!links.is_empty());
    for (from, name, to) in links {
        assert!(to < from, "{name} link {from} -> {to} points forward");
    }
    let forward_parents: i64 = store
        .connection()
        .query_row(
            "SELECT COUNT(*) FROM records WHERE parent_id IS NOT NULL AND parent_id >= id",
            [],
            |row| row.get(0),
        )
        .expect("count");
    assert_eq!(forward_parents, 0);
}

#[test]
fn test_reference_to_unpersisted_record_names_the_offender() {
    let mut engine = engine();
    let mut graph = EntityGraph::new();
    let missing = graph.add(Entity::reference(EntityKind::BioSource, EntityId(9999)));
    let p53 = graph.add(Entity::new(EntityKind::Interactor, "p53_human"));
    graph
        .link(p53, relation::ORGANISM, Some(missing))
        .expect("organism");

    let err = engine
        .synchronize(&graph, &[p53])
        .expect_err("dangling reference");

    match &err {
        SyncError::UnpersistedDependency {
            record,
            statistics,
            ..
        } => {
            assert!(record.contains("p53_human"), "record was {record}");
            assert_eq!(statistics.inserted(EntityKind::Interactor), 1);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(engine.backend().record_count().expect("count"), 0);
}

#[test]
fn test_flush_failure_carries_statistics_and_rolls_back() {
    reset_faults();
    let mut engine = engine();
    let fixture = two_hybrid_interaction();
    configure_fault(FaultPoint::FlushBeforeCommit, 1);

    let err = engine
        .synchronize(&fixture.graph, &[fixture.interaction])
        .expect_err("flush fault");
    reset_faults();

    match &err {
        SyncError::BackendIntegrity {
            stage, statistics, ..
        } => {
            assert_eq!(*stage, CommitStage::Flush);
            assert_eq!(statistics.total_inserted(), 21);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.statistics().map(|s| s.total_inserted()), Some(21));
    assert_eq!(engine.backend().record_count().expect("count"), 0);
    assert!(engine.statistics().is_empty());

    let result = engine
        .synchronize(&fixture.graph, &[fixture.interaction])
        .expect("retry");
    assert_eq!(result.statistics.total_inserted(), 21);
}

#[test]
fn test_insert_failure_names_the_record() {
    reset_faults();
    let mut engine = engine();
    let fixture = two_hybrid_interaction();
    configure_fault(FaultPoint::InsertRecord, 1);

    let err = engine
        .synchronize(&fixture.graph, &[fixture.interaction])
        .expect_err("insert fault");
    reset_faults();

    match err {
        SyncError::BackendIntegrity { stage, record, .. } => {
            assert_eq!(stage, CommitStage::Insert);
            assert!(record.starts_with("cv_term"), "record was {record}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(engine.backend().record_count().expect("count"), 0);
}

#[test]
fn test_unknown_identifier_is_reported() {
    let mut engine = engine();
    let mut graph = EntityGraph::new();
    let ghost = graph.add(Entity::new(EntityKind::Publication, "ghost").with_id(EntityId(42)));
    let err = engine.synchronize(&graph, &[ghost]).expect_err("unknown id");
    assert!(matches!(
        err,
        SyncError::UnknownIdentifier {
            kind: EntityKind::Publication,
            id: EntityId(42)
        }
    ));
}

#[test]
fn test_hollow_root_is_returned_as_stored() {
    let mut engine = engine();
    let mut graph = EntityGraph::new();
    let publication = publication(&mut graph, "123", "smith-2020");
    let id = engine
        .synchronize(&graph, &[publication])
        .expect("first")
        .id_of(publication)
        .expect("id");

    let mut reference = EntityGraph::new();
    let hollow = reference.add(Entity::reference(EntityKind::Publication, id));
    let result = engine.synchronize(&reference, &[hollow]).expect("reference");
    assert!(result.statistics.is_empty());
    assert_eq!(
        result.root(hollow).map(|record| record.short_label.as_str()),
        Some("smith-2020")
    );
}

#[test]
fn test_entity_without_content_or_identifier_is_rejected() {
    let mut engine = engine();
    let mut graph = EntityGraph::new();
    let organism = human(&mut graph);
    let mut empty = Entity::reference(EntityKind::Interactor, EntityId(1));
    empty.id = None;
    let empty = graph.add(empty);

    let err = engine
        .synchronize(&graph, &[organism, empty])
        .expect_err("empty entity");

    assert!(matches!(err, SyncError::InvalidGraph(_)), "unexpected error: {err}");
    assert_eq!(engine.state(), EngineState::Failed);
    assert_eq!(engine.backend().record_count().expect("count"), 0);
}

#[test]
fn test_reload_failure_rolls_back_the_batch() {
    let mut engine = engine();
    let mut graph = EntityGraph::new();
    let organism = human(&mut graph);
    let missing = graph.add(Entity::reference(EntityKind::Publication, EntityId(9999)));

    let err = engine
        .synchronize(&graph, &[organism, missing])
        .expect_err("missing publication");

    assert!(
        matches!(
            err,
            SyncError::DuplicateResolution {
                kind: EntityKind::Publication,
                ..
            }
        ),
        "unexpected error: {err}"
    );
    assert_eq!(engine.backend().record_count().expect("count"), 0);
    assert!(engine.backend().connection().is_autocommit());

    let result = engine.synchronize(&graph, &[organism]).expect("retry");
    assert_eq!(result.statistics.inserted(EntityKind::BioSource), 1);
    assert_eq!(engine.backend().record_count().expect("count"), 1);
}

#[test]
fn test_scope_commits_on_success_and_rolls_back_on_failure() {
    reset_faults();
    let mut engine = engine();
    let fixture = two_hybrid_interaction();
    configure_fault(FaultPoint::FlushBeforeCommit, 1);
    engine
        .synchronize_in_new_scope(&fixture.graph, &[fixture.interaction])
        .expect_err("flush fault");
    reset_faults();
    assert_eq!(engine.backend().record_count().expect("count"), 0);
    assert!(engine.backend().connection().is_autocommit());

    let result = engine
        .synchronize_in_new_scope(&fixture.graph, &[fixture.interaction])
        .expect("scoped");
    assert_eq!(result.statistics.total_inserted(), 21);
    assert!(engine.backend().connection().is_autocommit());
    assert_eq!(engine.backend().record_count().expect("count"), 21);
}

#[test]
fn test_statistics_can_be_disabled_and_reset() {
    let mut engine = engine();
    engine.set_statistics_enabled(false);
    let fixture = two_hybrid_interaction();
    let result = engine
        .synchronize(&fixture.graph, &[fixture.interaction])
        .expect("synchronize");
    assert!(result.statistics.is_empty());
    assert!(engine.statistics().is_empty());
    assert_eq!(engine.backend().record_count().expect("count"), 21);

    engine.set_statistics_enabled(true);
    let again = two_hybrid_interaction();
    engine
        .synchronize(&again.graph, &[again.interaction])
        .expect("duplicate");
    assert_eq!(engine.statistics().duplicates(EntityKind::Interaction), 1);
    engine.reset_statistics();
    assert!(engine.statistics().is_empty());
}

#[test]
fn test_engine_over_borrowed_store() {
    let store = interactsync::SqliteStore::open_in_memory().expect("store");
    let mut graph = EntityGraph::new();
    let organism = human(&mut graph);
    {
        let mut engine = interactsync::SyncEngine::new(&store);
        engine.synchronize(&graph, &[organism]).expect("synchronize");
    }
    assert_eq!(store.record_count().expect("count"), 1);
    assert!(!store.is_tracked(graph.entity(organism).expect("entity")));
}
