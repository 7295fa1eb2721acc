#![allow(dead_code)]

use interactsync::{
    Entity, EntityGraph, EntityKind, Handle, SqliteStore, SyncEngine, attribute, relation,
};

pub fn engine() -> SyncEngine<SqliteStore> {
    SyncEngine::new(SqliteStore::open_in_memory().expect("store"))
}

pub fn human(graph: &mut EntityGraph) -> Handle {
    graph.add(Entity::bio_source("human", 9606))
}

/// Controlled vocabulary term with its PSI-MI identity xref.
pub fn cv_term(graph: &mut EntityGraph, cv_class: &str, label: &str, mi: &str) -> Handle {
    let term = graph.add(Entity::cv_term(cv_class, label));
    graph
        .add_child(
            term,
            relation::XREFS,
            Entity::xref("psi-mi", mi, Some(attribute::IDENTITY_QUALIFIER)),
        )
        .expect("cv xref");
    term
}

pub fn protein(graph: &mut EntityGraph, uniprot: &str, label: &str, organism: Handle) -> Handle {
    let interactor = graph.add(Entity::new(EntityKind::Interactor, label));
    graph
        .link(interactor, relation::ORGANISM, Some(organism))
        .expect("organism");
    graph
        .add_child(
            interactor,
            relation::XREFS,
            Entity::xref("uniprotkb", uniprot, Some(attribute::IDENTITY_QUALIFIER)),
        )
        .expect("identity xref");
    interactor
}

pub fn publication(graph: &mut EntityGraph, pubmed: &str, label: &str) -> Handle {
    let publication = graph.add(Entity::new(EntityKind::Publication, label));
    graph
        .add_child(
            publication,
            relation::XREFS,
            Entity::xref(
                attribute::PUBMED,
                pubmed,
                Some(attribute::PRIMARY_REFERENCE_QUALIFIER),
            ),
        )
        .expect("pubmed xref");
    publication
}

pub struct InteractionFixture {
    pub graph: EntityGraph,
    pub interaction: Handle,
    pub participants: Vec<Handle>,
    pub interactors: Vec<Handle>,
    pub experiment: Handle,
}

/// A two-protein interaction detected by two-hybrid, fully built from content.
pub fn two_hybrid_interaction() -> InteractionFixture {
    let mut graph = EntityGraph::new();
    let organism = human(&mut graph);
    let publication = publication(&mut graph, "15102471", "rual-2005");
    let method = cv_term(
        &mut graph,
        "interaction detection method",
        "two hybrid",
        "MI:0018",
    );
    let experiment = graph.add(Entity::new(EntityKind::Experiment, "rual-2005-1"));
    graph
        .link(experiment, relation::PUBLICATION, Some(publication))
        .expect("publication");
    graph
        .link(experiment, relation::HOST_ORGANISM, Some(organism))
        .expect("host");
    graph
        .link(
            experiment,
            relation::INTERACTION_DETECTION_METHOD,
            Some(method),
        )
        .expect("method");

    let interaction_type = cv_term(
        &mut graph,
        "interaction type",
        "physical association",
        "MI:0915",
    );
    let bait = cv_term(&mut graph, "experimental role", "bait", "MI:0496");
    let prey = cv_term(&mut graph, "experimental role", "prey", "MI:0498");
    let unspecified = cv_term(
        &mut graph,
        "biological role",
        "unspecified role",
        "MI:0499",
    );

    let interaction = graph.add(Entity::new(EntityKind::Interaction, "tp53-mdm2"));
    graph
        .link(interaction, relation::INTERACTION_TYPE, Some(interaction_type))
        .expect("type");
    graph
        .push(interaction, relation::EXPERIMENTS, experiment)
        .expect("experiment");

    let mut participants = Vec::new();
    let mut interactors = Vec::new();
    for (uniprot, label, role) in [
        ("P04637", "p53_human", bait),
        ("Q00987", "mdm2_human", prey),
    ] {
        let interactor = protein(&mut graph, uniprot, label, organism);
        let participant = graph
            .add_child(
                interaction,
                relation::PARTICIPANTS,
                Entity::new(EntityKind::Participant, label),
            )
            .expect("participant");
        graph
            .link(participant, relation::INTERACTOR, Some(interactor))
            .expect("interactor");
        graph
            .link(participant, relation::EXPERIMENTAL_ROLE, Some(role))
            .expect("role");
        graph
            .link(participant, relation::BIOLOGICAL_ROLE, Some(unspecified))
            .expect("bio role");
        participants.push(participant);
        interactors.push(interactor);
    }

    InteractionFixture {
        graph,
        interaction,
        participants,
        interactors,
        experiment,
    }
}
