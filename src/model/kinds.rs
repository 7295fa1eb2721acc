use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::SyncError;

/// Relation names shared by the builders, the identity rules and the store.
pub mod relation {
    pub const OWNER: &str = "owner";
    pub const XREFS: &str = "xrefs";
    pub const ALIASES: &str = "aliases";
    pub const ANNOTATIONS: &str = "annotations";
    pub const PUBLICATION: &str = "publication";
    pub const HOST_ORGANISM: &str = "host_organism";
    pub const INTERACTION_DETECTION_METHOD: &str = "interaction_detection_method";
    pub const PARTICIPANT_DETECTION_METHOD: &str = "participant_detection_method";
    pub const ORGANISM: &str = "organism";
    pub const INTERACTOR_TYPE: &str = "interactor_type";
    pub const INTERACTION_TYPE: &str = "interaction_type";
    pub const EXPERIMENTS: &str = "experiments";
    pub const PARTICIPANTS: &str = "participants";
    pub const INTERACTOR: &str = "interactor";
    pub const EXPERIMENTAL_ROLE: &str = "experimental_role";
    pub const BIOLOGICAL_ROLE: &str = "biological_role";
    pub const FEATURES: &str = "features";
    pub const FEATURE_TYPE: &str = "feature_type";
}

/// Attribute names and well-known values read by the identity rules.
pub mod attribute {
    pub const CV_CLASS: &str = "cv_class";
    pub const TAXID: &str = "taxid";
    pub const FULL_NAME: &str = "full_name";
    pub const DATABASE: &str = "database";
    pub const PRIMARY_ID: &str = "primary_id";
    pub const SECONDARY_ID: &str = "secondary_id";
    pub const VERSION: &str = "version";
    pub const QUALIFIER: &str = "qualifier";
    pub const ALIAS_TYPE: &str = "alias_type";
    pub const NAME: &str = "name";
    pub const TOPIC: &str = "topic";
    pub const TEXT: &str = "text";

    pub const IDENTITY_QUALIFIER: &str = "identity";
    pub const PRIMARY_REFERENCE_QUALIFIER: &str = "primary-reference";
    pub const PUBMED: &str = "pubmed";
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Institution,
    CvTerm,
    BioSource,
    Publication,
    Experiment,
    Interactor,
    Interaction,
    Participant,
    Feature,
    Xref,
    Alias,
    Annotation,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cardinality {
    One,
    Many,
}

/// Static description of one relation of an entity kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RelationSpec {
    pub name: &'static str,
    pub target: EntityKind,
    pub cardinality: Cardinality,
    /// Owned collections hold scoped children that store a parent link.
    pub owned: bool,
    /// Significant relations may not be cleared by a merge.
    pub significant: bool,
}

impl RelationSpec {
    const fn one(name: &'static str, target: EntityKind) -> Self {
        Self {
            name,
            target,
            cardinality: Cardinality::One,
            owned: false,
            significant: false,
        }
    }

    const fn many(name: &'static str, target: EntityKind) -> Self {
        Self {
            name,
            target,
            cardinality: Cardinality::Many,
            owned: false,
            significant: false,
        }
    }

    const fn owned(name: &'static str, target: EntityKind) -> Self {
        Self {
            name,
            target,
            cardinality: Cardinality::Many,
            owned: true,
            significant: false,
        }
    }

    const fn significant(self) -> Self {
        Self {
            significant: true,
            ..self
        }
    }
}

const OWNER: RelationSpec = RelationSpec::one(relation::OWNER, EntityKind::Institution);
const XREFS: RelationSpec = RelationSpec::owned(relation::XREFS, EntityKind::Xref);
const ALIASES: RelationSpec = RelationSpec::owned(relation::ALIASES, EntityKind::Alias);
const ANNOTATIONS: RelationSpec =
    RelationSpec::owned(relation::ANNOTATIONS, EntityKind::Annotation);

const INSTITUTION: &[RelationSpec] = &[XREFS, ANNOTATIONS];
const CV_TERM: &[RelationSpec] = &[XREFS, ANNOTATIONS];
const BIO_SOURCE: &[RelationSpec] = &[OWNER, XREFS, ANNOTATIONS];
const PUBLICATION: &[RelationSpec] = &[OWNER, XREFS, ANNOTATIONS];
const EXPERIMENT: &[RelationSpec] = &[
    OWNER,
    RelationSpec::one(relation::PUBLICATION, EntityKind::Publication),
    RelationSpec::one(relation::HOST_ORGANISM, EntityKind::BioSource),
    RelationSpec::one(relation::INTERACTION_DETECTION_METHOD, EntityKind::CvTerm).significant(),
    RelationSpec::one(relation::PARTICIPANT_DETECTION_METHOD, EntityKind::CvTerm),
    XREFS,
    ANNOTATIONS,
];
const INTERACTOR: &[RelationSpec] = &[
    OWNER,
    RelationSpec::one(relation::ORGANISM, EntityKind::BioSource).significant(),
    RelationSpec::one(relation::INTERACTOR_TYPE, EntityKind::CvTerm),
    XREFS,
    ALIASES,
    ANNOTATIONS,
];
const INTERACTION: &[RelationSpec] = &[
    OWNER,
    RelationSpec::one(relation::INTERACTION_TYPE, EntityKind::CvTerm).significant(),
    RelationSpec::many(relation::EXPERIMENTS, EntityKind::Experiment),
    RelationSpec::owned(relation::PARTICIPANTS, EntityKind::Participant),
    XREFS,
    ANNOTATIONS,
];
const PARTICIPANT: &[RelationSpec] = &[
    RelationSpec::one(relation::INTERACTOR, EntityKind::Interactor).significant(),
    RelationSpec::one(relation::EXPERIMENTAL_ROLE, EntityKind::CvTerm),
    RelationSpec::one(relation::BIOLOGICAL_ROLE, EntityKind::CvTerm),
    RelationSpec::owned(relation::FEATURES, EntityKind::Feature),
    XREFS,
    ALIASES,
    ANNOTATIONS,
];
const FEATURE: &[RelationSpec] = &[
    RelationSpec::one(relation::FEATURE_TYPE, EntityKind::CvTerm),
    XREFS,
    ALIASES,
    ANNOTATIONS,
];
const LEAF: &[RelationSpec] = &[];

impl EntityKind {
    pub const ALL: [EntityKind; 12] = [
        EntityKind::Institution,
        EntityKind::CvTerm,
        EntityKind::BioSource,
        EntityKind::Publication,
        EntityKind::Experiment,
        EntityKind::Interactor,
        EntityKind::Interaction,
        EntityKind::Participant,
        EntityKind::Feature,
        EntityKind::Xref,
        EntityKind::Alias,
        EntityKind::Annotation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Institution => "institution",
            EntityKind::CvTerm => "cv_term",
            EntityKind::BioSource => "bio_source",
            EntityKind::Publication => "publication",
            EntityKind::Experiment => "experiment",
            EntityKind::Interactor => "interactor",
            EntityKind::Interaction => "interaction",
            EntityKind::Participant => "participant",
            EntityKind::Feature => "feature",
            EntityKind::Xref => "xref",
            EntityKind::Alias => "alias",
            EntityKind::Annotation => "annotation",
        }
    }

    /// Scoped kinds take their identity from their parent and are never
    /// looked up on their own.
    pub fn is_scoped(self) -> bool {
        matches!(
            self,
            EntityKind::Participant
                | EntityKind::Feature
                | EntityKind::Xref
                | EntityKind::Alias
                | EntityKind::Annotation
        )
    }

    /// Shared kinds are expected to be referenced from many places in one
    /// batch, so meeting them twice is not counted as a duplicate.
    pub fn is_shared(self) -> bool {
        matches!(
            self,
            EntityKind::Participant | EntityKind::CvTerm | EntityKind::Institution
        )
    }

    pub fn relations(self) -> &'static [RelationSpec] {
        match self {
            EntityKind::Institution => INSTITUTION,
            EntityKind::CvTerm => CV_TERM,
            EntityKind::BioSource => BIO_SOURCE,
            EntityKind::Publication => PUBLICATION,
            EntityKind::Experiment => EXPERIMENT,
            EntityKind::Interactor => INTERACTOR,
            EntityKind::Interaction => INTERACTION,
            EntityKind::Participant => PARTICIPANT,
            EntityKind::Feature => FEATURE,
            EntityKind::Xref | EntityKind::Alias | EntityKind::Annotation => LEAF,
        }
    }

    pub fn relation(self, name: &str) -> Option<&'static RelationSpec> {
        self.relations().iter().find(|spec| spec.name == name)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| SyncError::UnsupportedEntityType(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_round_trip_through_from_str() {
        for kind in EntityKind::ALL {
            assert_eq!(kind.as_str().parse::<EntityKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_kind_is_unsupported() {
        let err = "complex".parse::<EntityKind>().unwrap_err();
        assert!(matches!(err, SyncError::UnsupportedEntityType(name) if name == "complex"));
    }

    #[test]
    fn owned_collections_hold_scoped_kinds_only() {
        for kind in EntityKind::ALL {
            for spec in kind.relations() {
                assert_eq!(
                    spec.owned,
                    spec.target.is_scoped(),
                    "{kind}.{} owned flag disagrees with target scoping",
                    spec.name
                );
            }
        }
    }
}
